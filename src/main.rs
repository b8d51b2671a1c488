use anyhow::{Context, Result};
use clap::Parser;
use reqwest::Client;
use site_reports::{
    config::Config,
    drive::{
        DriveClient, JsonFileMappingStore, MappingStore, RemoteFiles, Resolver, ServiceAccountKey,
        ServiceAccountTokens,
    },
    history::RunLog,
    runner::{SiteOutcome, SiteRunner},
    source::{discover_sites, load_definitions, MySqlSource, SiteFile},
};
use std::{path::PathBuf, time::Duration};
use tracing::{error, info, warn};
use tracing_subscriber::{fmt, EnvFilter};

/// Run every site's reports and publish them to Drive.
#[derive(Parser, Debug)]
struct Args {
    /// YAML configuration file
    #[arg(long, default_value = "config/reportes.yaml")]
    config: PathBuf,

    /// Only run these sites (repeatable)
    #[arg(long = "site")]
    sites: Vec<String>,

    /// Start of the report window, overrides the config
    #[arg(long)]
    from: Option<String>,

    /// End of the report window, overrides the config
    #[arg(long)]
    to: Option<String>,
}

#[tokio::main(flavor = "current_thread")]
async fn main() -> Result<()> {
    let env = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));
    fmt::Subscriber::builder()
        .with_env_filter(env)
        .with_target(false)
        .init();

    let args = Args::parse();

    let mut config = Config::load(&args.config)
        .with_context(|| format!("loading config {}", args.config.display()))?;
    if let Some(from) = args.from {
        config.range.from = from;
    }
    if let Some(to) = args.to {
        config.range.to = to;
    }
    let key = ServiceAccountKey::from_file(&config.drive.service_account_json)
        .context("loading service account")?;
    info!(
        sites_dir = %config.sites_dir.display(),
        folder = %config.drive.folder_id,
        from = %config.range.from,
        to = %config.range.to,
        "startup"
    );

    let http = Client::builder()
        .timeout(Duration::from_secs(120))
        .build()
        .context("building HTTP client")?;
    let tokens = ServiceAccountTokens::new(key, http.clone());
    let store = JsonFileMappingStore::new(&config.drive.mapping_path);
    info!(mapping = %store.path().display(), "using id mapping");
    let resolver = Resolver::new(
        DriveClient::new(http, tokens),
        store,
        config.drive.folder_id.clone(),
    );
    let runner = SiteRunner::new(&resolver, config.range.clone(), &config.tmp_dir);

    let mut sites = match discover_sites(&config.sites_dir) {
        Ok(s) => s,
        Err(e) => {
            error!("site discovery failed: {}", e);
            Vec::new()
        }
    };
    if !args.sites.is_empty() {
        for wanted in &args.sites {
            if !sites.iter().any(|s| &s.key == wanted) {
                warn!(site = %wanted, "no definition file for requested site");
            }
        }
        sites.retain(|s| args.sites.contains(&s.key));
    }
    if sites.is_empty() {
        warn!("no sites to run");
    }

    let mut log = RunLog::open_today(&config.log_dir);
    for site in &sites {
        info!(site = %site.key, "running site");
        match run_site(&config, &runner, site).await {
            Ok(outcome) => {
                info!(
                    site = %outcome.site,
                    status = %outcome.status,
                    id = %outcome.remote_id,
                    path = ?outcome.path,
                    "site done"
                );
                log.record(&site.key, outcome.status);
            }
            Err(e) => {
                error!(site = %site.key, "site failed: {:#}", e);
                log.record_error(&site.key, &e);
            }
        }
    }

    match log.write() {
        Ok(()) => info!(path = %log.path().display(), sites = sites.len(), "run log written"),
        Err(e) => error!("writing run log failed: {:#}", e),
    }
    Ok(())
}

async fn run_site<A: RemoteFiles, S: MappingStore>(
    config: &Config,
    runner: &SiteRunner<'_, A, S>,
    site: &SiteFile,
) -> Result<SiteOutcome> {
    let creds = config.site(&site.key)?;
    let defs = load_definitions(&site.path)?;
    let source = MySqlSource::new(creds);

    let result = runner
        .run(&site.key, &creds.table_prefix(), &defs, &source)
        .await;
    if let Err(e) = source.disconnect().await {
        warn!(site = %site.key, "closing database pool: {}", e);
    }
    Ok(result?)
}

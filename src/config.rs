//! Configuration loading.
//!
//! Everything comes from one YAML document (see `config/reportes.example.yaml`).
//! Required fields are checked eagerly so a broken deployment fails before any
//! query runs, with an error naming the field.

use serde::Deserialize;
use std::{
    collections::BTreeMap,
    fs,
    path::{Path, PathBuf},
};

use crate::{Error, Result};

pub const DEFAULT_FROM: &str = "2024-01-01";
pub const DEFAULT_TO: &str = "2025-12-31";
pub const DEFAULT_PREFIX: &str = "ps_";

#[derive(Debug, Clone, Deserialize)]
pub struct Config {
    pub drive: DriveConfig,
    #[serde(default)]
    pub range: DateRange,
    #[serde(default = "default_sites_dir")]
    pub sites_dir: PathBuf,
    #[serde(default = "default_tmp_dir")]
    pub tmp_dir: PathBuf,
    #[serde(default = "default_log_dir")]
    pub log_dir: PathBuf,
    #[serde(default)]
    pub sites: BTreeMap<String, SiteCredentials>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct DriveConfig {
    /// Parent folder (or shared drive) that owns every published file.
    #[serde(default)]
    pub folder_id: String,
    #[serde(default)]
    pub service_account_json: PathBuf,
    #[serde(default = "default_mapping_path")]
    pub mapping_path: PathBuf,
}

/// Inclusive report window handed to queries as `:from` / `:to`.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
pub struct DateRange {
    pub from: String,
    pub to: String,
}

impl Default for DateRange {
    fn default() -> Self {
        Self {
            from: DEFAULT_FROM.to_string(),
            to: DEFAULT_TO.to_string(),
        }
    }
}

/// Connection settings for one site's database.
#[derive(Debug, Clone, Deserialize)]
pub struct SiteCredentials {
    #[serde(default, alias = "ip")]
    pub host: String,
    #[serde(default = "default_port")]
    pub port: u16,
    #[serde(default)]
    pub dbname: String,
    #[serde(default)]
    pub username: String,
    #[serde(default)]
    pub password: String,
    #[serde(default = "default_prefix")]
    pub prefix: String,
    /// Session `time_zone` to set on connect. Unset keeps the server default.
    #[serde(default)]
    pub time_zone: Option<String>,
}

fn default_sites_dir() -> PathBuf {
    PathBuf::from("sitios")
}
fn default_tmp_dir() -> PathBuf {
    PathBuf::from("tmp")
}
fn default_log_dir() -> PathBuf {
    PathBuf::from("logs")
}
fn default_mapping_path() -> PathBuf {
    PathBuf::from("tmp/drive_map.json")
}
fn default_port() -> u16 {
    3306
}
fn default_prefix() -> String {
    DEFAULT_PREFIX.to_string()
}

impl Config {
    /// Read and validate the YAML file at `path`.
    pub fn load(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        let text = fs::read_to_string(path).map_err(|e| {
            Error::Config(format!("cannot read config file {}: {}", path.display(), e))
        })?;
        Self::from_yaml(&text)
    }

    pub fn from_yaml(text: &str) -> Result<Self> {
        let cfg: Config = serde_yaml::from_str(text)
            .map_err(|e| Error::Config(format!("invalid config document: {}", e)))?;
        cfg.validate()?;
        Ok(cfg)
    }

    pub fn validate(&self) -> Result<()> {
        if self.drive.folder_id.trim().is_empty() {
            return Err(missing("drive.folder_id"));
        }
        if self.drive.service_account_json.as_os_str().is_empty() {
            return Err(missing("drive.service_account_json"));
        }
        if self.range.from.trim().is_empty() {
            return Err(missing("range.from"));
        }
        if self.range.to.trim().is_empty() {
            return Err(missing("range.to"));
        }
        for (key, site) in &self.sites {
            site.validate(key)?;
        }
        Ok(())
    }

    /// Credentials for `site`, or a configuration error when none are defined.
    pub fn site(&self, site: &str) -> Result<&SiteCredentials> {
        self.sites
            .get(site)
            .ok_or_else(|| Error::Config(format!("no credentials for '{}'", site)))
    }
}

impl SiteCredentials {
    fn validate(&self, key: &str) -> Result<()> {
        for (field, value) in [
            ("host", &self.host),
            ("dbname", &self.dbname),
            ("username", &self.username),
        ] {
            if value.trim().is_empty() {
                return Err(missing(&format!("sites.{}.{}", key, field)));
            }
        }
        Ok(())
    }

    /// Table prefix with exactly one trailing underscore, as substituted for `{{p}}`.
    pub fn table_prefix(&self) -> String {
        normalize_prefix(&self.prefix)
    }
}

pub fn normalize_prefix(prefix: &str) -> String {
    format!("{}_", prefix.trim_end_matches('_'))
}

fn missing(field: &str) -> Error {
    Error::Config(format!("missing required field `{}`", field))
}

#[cfg(test)]
mod tests {
    use super::*;

    const FULL: &str = r#"
drive:
  folder_id: "folder123"
  service_account_json: "config/sa.json"
sites:
  ubikemotos:
    ip: "10.0.0.5"
    dbname: "shop"
    username: "reader"
    password: "pw"
    prefix: "ub"
"#;

    #[test]
    fn test_defaults_fill_in() {
        let cfg = Config::from_yaml(FULL).unwrap();
        assert_eq!(cfg.range, DateRange::default());
        assert_eq!(cfg.range.from, "2024-01-01");
        assert_eq!(cfg.range.to, "2025-12-31");
        assert_eq!(cfg.drive.mapping_path, PathBuf::from("tmp/drive_map.json"));
        assert_eq!(cfg.sites_dir, PathBuf::from("sitios"));

        let site = cfg.site("ubikemotos").unwrap();
        assert_eq!(site.host, "10.0.0.5");
        assert_eq!(site.port, 3306);
        assert_eq!(site.table_prefix(), "ub_");
        assert_eq!(site.time_zone, None);
    }

    #[test]
    fn test_site_time_zone_is_read() {
        let text = FULL.replace("prefix: \"ub\"", "prefix: \"ub\"\n    time_zone: \"-03:00\"");
        let cfg = Config::from_yaml(&text).unwrap();
        assert_eq!(cfg.site("ubikemotos").unwrap().time_zone.as_deref(), Some("-03:00"));
    }

    #[test]
    fn test_missing_folder_is_named() {
        let err = Config::from_yaml("drive:\n  service_account_json: sa.json\n").unwrap_err();
        match err {
            Error::Config(msg) => assert!(msg.contains("drive.folder_id"), "{}", msg),
            other => panic!("unexpected error: {:?}", other),
        }
    }

    #[test]
    fn test_missing_site_field_is_named() {
        let text = r#"
drive:
  folder_id: f
  service_account_json: sa.json
sites:
  broken:
    host: h
    username: u
"#;
        let err = Config::from_yaml(text).unwrap_err();
        assert!(err.to_string().contains("sites.broken.dbname"), "{}", err);
    }

    #[test]
    fn test_unknown_site_is_config_error() {
        let cfg = Config::from_yaml(FULL).unwrap();
        let err = cfg.site("nope").unwrap_err();
        assert!(matches!(err, Error::Config(_)));
        assert!(err.to_string().contains("no credentials for 'nope'"));
    }

    #[test]
    fn test_normalize_prefix() {
        assert_eq!(normalize_prefix("ps_"), "ps_");
        assert_eq!(normalize_prefix("ps"), "ps_");
        assert_eq!(normalize_prefix("ps__"), "ps_");
        assert_eq!(normalize_prefix(""), "_");
    }

    #[test]
    fn test_bundled_example_parses() {
        let path = Path::new(env!("CARGO_MANIFEST_DIR")).join("config/reportes.example.yaml");
        let cfg = Config::load(path).unwrap();
        assert_eq!(cfg.site("ubikemotos").unwrap().table_prefix(), "ps_");
    }
}

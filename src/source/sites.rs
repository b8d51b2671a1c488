// src/source/sites.rs

use glob::glob;
use std::{
    fs,
    path::{Path, PathBuf},
};
use tracing::warn;

use super::ReportDef;
use crate::{Error, Result};

/// A site definition file found on disk.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SiteFile {
    pub key: String,
    pub path: PathBuf,
}

/// Every `*.yaml` / `*.yml` under `dir`, keyed by file stem, sorted by key.
pub fn discover_sites(dir: &Path) -> Result<Vec<SiteFile>> {
    let mut out = Vec::new();
    for ext in ["yaml", "yml"] {
        let pattern = format!("{}/*.{}", dir.display(), ext);
        let entries = glob(&pattern)
            .map_err(|e| Error::Config(format!("invalid sites pattern {}: {}", pattern, e)))?;
        for entry in entries {
            let path = match entry {
                Ok(p) => p,
                Err(e) => {
                    warn!("cannot read site entry: {}", e);
                    continue;
                }
            };
            if !path.is_file() {
                continue;
            }
            let Some(key) = path.file_stem().and_then(|s| s.to_str()) else {
                continue;
            };
            out.push(SiteFile {
                key: key.to_string(),
                path,
            });
        }
    }
    out.sort_by(|a, b| a.key.cmp(&b.key));
    Ok(out)
}

/// Parse a site file: a YAML list of report definitions.
pub fn load_definitions(path: &Path) -> Result<Vec<ReportDef>> {
    let text = fs::read_to_string(path).map_err(|e| {
        Error::DataSource(format!("cannot read site file {}: {}", path.display(), e))
    })?;
    let defs: Vec<ReportDef> = serde_yaml::from_str(&text).map_err(|e| {
        Error::DataSource(format!(
            "site file {} is not a list of reports: {}",
            path.display(),
            e
        ))
    })?;
    Ok(defs)
}

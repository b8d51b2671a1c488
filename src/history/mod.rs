// src/history/mod.rs

use anyhow::{Context, Result};
use chrono::{Local, NaiveDate};
use serde_json::{Map, Value};
use std::{
    collections::BTreeMap,
    fs,
    path::{Path, PathBuf},
};
use tracing::warn;

use crate::runner::Status;

/// Per-day record of what each site's run ended in.
///
/// Stored as `<log_dir>/<YYYY-MM-DD>.json` shaped `{"<date>": {"<site>": "<status>"}}`.
/// Opening a day that already has a log keeps its entries, so several runs on
/// the same day accumulate; a site recorded again is overwritten.
pub struct RunLog {
    path: PathBuf,
    date: String,
    entries: BTreeMap<String, String>,
}

impl RunLog {
    pub fn open(log_dir: impl AsRef<Path>, date: NaiveDate) -> Self {
        let date = date.format("%Y-%m-%d").to_string();
        let path = log_dir.as_ref().join(format!("{}.json", date));
        let entries = load_day(&path, &date);
        Self {
            path,
            date,
            entries,
        }
    }

    /// Log for today's date in the local time zone.
    pub fn open_today(log_dir: impl AsRef<Path>) -> Self {
        Self::open(log_dir, Local::now().date_naive())
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    pub fn record(&mut self, site: &str, status: Status) {
        self.entries
            .insert(site.to_string(), status.as_str().to_string());
    }

    pub fn record_error(&mut self, site: &str, err: &anyhow::Error) {
        self.entries
            .insert(site.to_string(), format!("error: {:#}", err));
    }

    pub fn get(&self, site: &str) -> Option<&str> {
        self.entries.get(site).map(String::as_str)
    }

    /// Write the whole document, replacing any previous file atomically.
    pub fn write(&self) -> Result<()> {
        if let Some(dir) = self.path.parent() {
            fs::create_dir_all(dir)
                .with_context(|| format!("creating log directory {}", dir.display()))?;
        }
        let mut doc = Map::new();
        doc.insert(
            self.date.clone(),
            serde_json::to_value(&self.entries).context("encoding run log")?,
        );
        let body = serde_json::to_string_pretty(&Value::Object(doc)).context("encoding run log")?;

        let tmp = self.path.with_extension("json.tmp");
        fs::write(&tmp, body).with_context(|| format!("writing {}", tmp.display()))?;
        fs::rename(&tmp, &self.path)
            .with_context(|| format!("renaming {} to {}", tmp.display(), self.path.display()))?;
        Ok(())
    }
}

fn load_day(path: &Path, date: &str) -> BTreeMap<String, String> {
    let Ok(text) = fs::read_to_string(path) else {
        return BTreeMap::new();
    };
    let parsed: Value = match serde_json::from_str(&text) {
        Ok(v) => v,
        Err(e) => {
            warn!(path = %path.display(), "replacing unreadable run log: {}", e);
            return BTreeMap::new();
        }
    };
    parsed
        .get(date)
        .and_then(Value::as_object)
        .map(|day| {
            day.iter()
                .filter_map(|(site, v)| v.as_str().map(|s| (site.clone(), s.to_string())))
                .collect()
        })
        .unwrap_or_default()
}

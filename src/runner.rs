// src/runner.rs

//! Runs one site end to end: queries, matrix, publish.
//!
//! The spreadsheet path is tried first. If anything in it fails, the same
//! matrix is rendered to a local CSV and uploaded as a plain file instead.

use std::path::PathBuf;
use tracing::{debug, info, warn};

use crate::config::DateRange;
use crate::drive::{MappingStore, RemoteFiles, Resolver};
use crate::report::{write_csv, MetricMatrix, RowSet, CSV_MIME};
use crate::source::{QuerySource, ReportDef};
use crate::Result;

/// Range written by the primary publish path.
pub const START_CELL: &str = "A1";

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Status {
    Updated,
    Unchanged,
}

impl Status {
    pub fn as_str(self) -> &'static str {
        match self {
            Status::Updated => "updated",
            Status::Unchanged => "unchanged",
        }
    }
}

impl std::fmt::Display for Status {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PublishPath {
    /// Values written into the native spreadsheet.
    Primary,
    /// CSV uploaded as a file after the primary path failed.
    Fallback,
}

#[derive(Debug, Clone, PartialEq)]
pub struct SiteOutcome {
    pub site: String,
    pub status: Status,
    pub remote_id: String,
    pub file: Option<PathBuf>,
    pub path: PublishPath,
    pub fallback_reason: Option<String>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Phase {
    Querying,
    Aggregating,
    Publishing(PublishPath),
    Done,
}

pub fn spreadsheet_name(site: &str) -> String {
    format!("{}__reportes", site)
}

pub fn fallback_file_name(site: &str) -> String {
    format!("{}__reportes.csv", site)
}

/// Shared settings for every site of a batch.
pub struct SiteRunner<'a, A, S> {
    resolver: &'a Resolver<A, S>,
    range: DateRange,
    tmp_dir: PathBuf,
}

impl<'a, A: RemoteFiles, S: MappingStore> SiteRunner<'a, A, S> {
    pub fn new(resolver: &'a Resolver<A, S>, range: DateRange, tmp_dir: impl Into<PathBuf>) -> Self {
        Self {
            resolver,
            range,
            tmp_dir: tmp_dir.into(),
        }
    }

    /// Run every report of `site` against `source` and publish the result.
    ///
    /// Query failures abort the site. A failing primary publish is recovered
    /// by the fallback; a failing fallback is returned.
    pub async fn run<Q: QuerySource + ?Sized>(
        &self,
        site: &str,
        prefix: &str,
        defs: &[ReportDef],
        source: &Q,
    ) -> Result<SiteOutcome> {
        let mut phase = Phase::Querying;
        debug!(site, ?phase, reports = defs.len());

        let mut sets = Vec::with_capacity(defs.len());
        for def in defs {
            let sql = def.render_sql(prefix);
            let params = def.bound_params(&self.range);
            let rows = source.fetch(&sql, &params).await?;
            debug!(site, title = %def.title, rows = rows.len(), "query finished");
            sets.push(RowSet::new(def.title.clone(), rows));
        }

        phase = Phase::Aggregating;
        debug!(site, ?phase);
        let matrix = MetricMatrix::build(&sets);
        info!(
            site,
            keys = matrix.keys().count(),
            metrics = matrix.metrics().len(),
            "built metric matrix"
        );

        phase = Phase::Publishing(PublishPath::Primary);
        debug!(site, ?phase);
        let outcome = match self.publish_values(site, &matrix).await {
            Ok(remote_id) => SiteOutcome {
                site: site.to_string(),
                status: Status::Updated,
                remote_id,
                file: None,
                path: PublishPath::Primary,
                fallback_reason: None,
            },
            Err(e) => {
                warn!(site, "spreadsheet update failed, uploading file instead: {}", e);
                phase = Phase::Publishing(PublishPath::Fallback);
                debug!(site, ?phase);
                self.publish_file(site, &matrix, e.to_string()).await?
            }
        };

        phase = Phase::Done;
        debug!(site, ?phase, status = %outcome.status, id = %outcome.remote_id);
        Ok(outcome)
    }

    async fn publish_values(&self, site: &str, matrix: &MetricMatrix) -> Result<String> {
        let id = self.resolver.ensure(&spreadsheet_name(site)).await?;
        let values = matrix.to_values();
        self.resolver
            .api()
            .update_values(&id, START_CELL, &values)
            .await?;
        info!(site, id = %id, rows = values.len(), "spreadsheet updated");
        Ok(id)
    }

    async fn publish_file(
        &self,
        site: &str,
        matrix: &MetricMatrix,
        reason: String,
    ) -> Result<SiteOutcome> {
        let name = fallback_file_name(site);
        let (path, bytes) = write_csv(matrix, &self.tmp_dir, &name)?;
        let upsert = self.resolver.upsert_file(&bytes, &name, CSV_MIME).await?;
        let status = if upsert.updated {
            Status::Updated
        } else {
            Status::Unchanged
        };
        info!(site, id = %upsert.remote_id, %status, "file published");
        Ok(SiteOutcome {
            site: site.to_string(),
            status,
            remote_id: upsert.remote_id,
            file: Some(path),
            path: PublishPath::Fallback,
            fallback_reason: Some(reason),
        })
    }
}

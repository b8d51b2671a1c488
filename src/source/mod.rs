// src/source/mod.rs

use async_trait::async_trait;
use serde::Deserialize;
use std::collections::BTreeMap;

use crate::config::DateRange;
use crate::report::Row;
use crate::Result;

pub mod mysql;
pub mod sites;

pub use mysql::MySqlSource;
pub use sites::{discover_sites, load_definitions, SiteFile};

/// Placeholder replaced by the site's table prefix.
pub const PREFIX_PLACEHOLDER: &str = "{{p}}";

/// One report of a site: a titled query with optional bound parameters.
#[derive(Debug, Clone, Deserialize, PartialEq)]
pub struct ReportDef {
    pub title: String,
    pub sql: String,
    #[serde(default)]
    pub params: BTreeMap<String, String>,
}

impl ReportDef {
    /// SQL with `{{p}}` replaced by `prefix`.
    pub fn render_sql(&self, prefix: &str) -> String {
        self.sql.replace(PREFIX_PLACEHOLDER, prefix)
    }

    /// Parameters with the date range merged in. Values the definition already
    /// sets for `from` / `to` are kept. A leading `:` on names is dropped.
    pub fn bound_params(&self, range: &DateRange) -> BTreeMap<String, String> {
        let mut params: BTreeMap<String, String> = self
            .params
            .iter()
            .map(|(k, v)| (k.trim_start_matches(':').to_string(), v.clone()))
            .collect();
        params
            .entry("from".to_string())
            .or_insert_with(|| range.from.clone());
        params
            .entry("to".to_string())
            .or_insert_with(|| range.to.clone());
        params
    }
}

/// Something that can run a report query and hand back its rows.
#[async_trait]
pub trait QuerySource: Send + Sync {
    /// Execute `sql` with named parameters, rows in result order.
    async fn fetch(&self, sql: &str, params: &BTreeMap<String, String>) -> Result<Vec<Row>>;
}

#[cfg(test)]
pub(crate) mod testing {
    use super::*;
    use crate::Error;
    use std::sync::Mutex;

    /// Answers queries from a canned list, keyed by a substring of the SQL.
    #[derive(Default)]
    pub struct StaticSource {
        answers: Vec<(String, Vec<Row>)>,
        pub seen: Mutex<Vec<(String, BTreeMap<String, String>)>>,
    }

    impl StaticSource {
        pub fn with(mut self, needle: &str, rows: Vec<Row>) -> Self {
            self.answers.push((needle.to_string(), rows));
            self
        }
    }

    #[async_trait]
    impl QuerySource for StaticSource {
        async fn fetch(&self, sql: &str, params: &BTreeMap<String, String>) -> Result<Vec<Row>> {
            self.seen
                .lock()
                .unwrap()
                .push((sql.to_string(), params.clone()));
            self.answers
                .iter()
                .find(|(needle, _)| sql.contains(needle.as_str()))
                .map(|(_, rows)| rows.clone())
                .ok_or_else(|| Error::DataSource(format!("no canned answer for: {}", sql)))
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn def(params: &[(&str, &str)]) -> ReportDef {
        ReportDef {
            title: "TotalPedidos".into(),
            sql: "SELECT COUNT(*) FROM {{p}}orders o JOIN {{p}}customer c".into(),
            params: params
                .iter()
                .map(|(k, v)| (k.to_string(), v.to_string()))
                .collect(),
        }
    }

    #[test]
    fn test_prefix_injected_everywhere() {
        assert_eq!(
            def(&[]).render_sql("ub_"),
            "SELECT COUNT(*) FROM ub_orders o JOIN ub_customer c"
        );
    }

    #[test]
    fn test_range_merged_when_absent() {
        let p = def(&[]).bound_params(&DateRange::default());
        assert_eq!(p.get("from").map(String::as_str), Some("2024-01-01"));
        assert_eq!(p.get("to").map(String::as_str), Some("2025-12-31"));
    }

    #[test]
    fn test_own_params_win_over_range() {
        let p = def(&[(":from", "2025-01-01 00:00:00"), ("shop", "3")])
            .bound_params(&DateRange::default());
        assert_eq!(p.get("from").map(String::as_str), Some("2025-01-01 00:00:00"));
        assert_eq!(p.get("to").map(String::as_str), Some("2025-12-31"));
        assert_eq!(p.get("shop").map(String::as_str), Some("3"));
        assert_eq!(p.len(), 3);
    }
}

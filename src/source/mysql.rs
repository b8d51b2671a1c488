// src/source/mysql.rs

use async_trait::async_trait;
use mysql_async::{prelude::Queryable, Opts, OptsBuilder, Params, Pool, Value};
use std::collections::{BTreeMap, HashMap, HashSet};
use tracing::debug;

use super::QuerySource;
use crate::config::SiteCredentials;
use crate::report::{Row, Scalar};
use crate::Result;

/// Query source backed by one site's MySQL database.
pub struct MySqlSource {
    pool: Pool,
}

impl MySqlSource {
    pub fn new(creds: &SiteCredentials) -> Self {
        Self {
            pool: Pool::new(connection_opts(creds)),
        }
    }

    /// Close every pooled connection.
    pub async fn disconnect(self) -> Result<()> {
        self.pool.disconnect().await?;
        Ok(())
    }
}

#[async_trait]
impl QuerySource for MySqlSource {
    async fn fetch(&self, sql: &str, params: &BTreeMap<String, String>) -> Result<Vec<Row>> {
        let mut conn = self.pool.get_conn().await?;
        let bound = named_params(sql, params);
        debug!(params = ?params.keys().collect::<Vec<_>>(), "executing report query");
        let rows: Vec<mysql_async::Row> = conn.exec(sql, bound).await?;
        Ok(rows.iter().map(convert_row).collect())
    }
}

fn connection_opts(creds: &SiteCredentials) -> Opts {
    let init: Vec<String> = creds
        .time_zone
        .as_deref()
        .map(str::trim)
        .filter(|tz| !tz.is_empty())
        .map(|tz| format!("SET time_zone = '{}'", tz.replace('\'', "''")))
        .into_iter()
        .collect();
    OptsBuilder::default()
        .ip_or_hostname(creds.host.clone())
        .tcp_port(creds.port)
        .db_name(Some(creds.dbname.clone()))
        .user(Some(creds.username.clone()))
        .pass(Some(creds.password.clone()))
        .init(init)
        .into()
}

/// Only the parameters the statement mentions are bound; MySQL rejects
/// named parameters for statements without placeholders.
fn named_params(sql: &str, params: &BTreeMap<String, String>) -> Params {
    let wanted = placeholders(sql);
    let used: HashMap<Vec<u8>, Value> = params
        .iter()
        .filter(|(k, _)| wanted.contains(k.as_str()))
        .map(|(k, v)| (k.as_bytes().to_vec(), Value::from(v.as_str())))
        .collect();
    if used.is_empty() {
        Params::Empty
    } else {
        Params::Named(used)
    }
}

/// Names of `:name` placeholders outside string literals and comments.
/// Names start with `a-z` or `_` and continue with `a-z`, `0-9` or `_`,
/// the same rule the driver applies when binding.
fn placeholders(sql: &str) -> HashSet<&str> {
    let bytes = sql.as_bytes();
    let mut names = HashSet::new();
    let mut i = 0;
    while i < bytes.len() {
        match bytes[i] {
            quote @ (b'\'' | b'"' | b'`') => {
                i += 1;
                while i < bytes.len() && bytes[i] != quote {
                    if bytes[i] == b'\\' {
                        i += 1;
                    }
                    i += 1;
                }
                i += 1;
            }
            b'#' => i = line_end(bytes, i),
            b'-' if bytes.get(i + 1) == Some(&b'-') => i = line_end(bytes, i),
            b'/' if bytes.get(i + 1) == Some(&b'*') => {
                i = sql[i + 2..].find("*/").map_or(bytes.len(), |end| i + 2 + end + 2);
            }
            b':' if matches!(bytes.get(i + 1), Some(b'a'..=b'z' | b'_')) => {
                let start = i + 1;
                let mut end = start;
                while matches!(bytes.get(end), Some(b'a'..=b'z' | b'0'..=b'9' | b'_')) {
                    end += 1;
                }
                names.insert(&sql[start..end]);
                i = end;
            }
            _ => i += 1,
        }
    }
    names
}

fn line_end(bytes: &[u8], from: usize) -> usize {
    bytes[from..]
        .iter()
        .position(|b| *b == b'\n')
        .map_or(bytes.len(), |p| from + p)
}

fn convert_row(row: &mysql_async::Row) -> Row {
    row.columns_ref()
        .iter()
        .enumerate()
        .map(|(i, col)| {
            let value = row.as_ref(i).map(to_scalar).unwrap_or_default();
            (col.name_str().into_owned(), value)
        })
        .collect()
}

fn to_scalar(value: &Value) -> Scalar {
    match value {
        Value::NULL => Scalar::Null,
        Value::Int(v) => Scalar::Int(*v),
        Value::UInt(v) => i64::try_from(*v)
            .map(Scalar::Int)
            .unwrap_or_else(|_| Scalar::Text(v.to_string())),
        Value::Float(v) => Scalar::Float(f64::from(*v)),
        Value::Double(v) => Scalar::Float(*v),
        Value::Bytes(b) => Scalar::Text(String::from_utf8_lossy(b).into_owned()),
        Value::Date(y, mo, d, h, mi, s, us) => {
            let mut out = format!("{:04}-{:02}-{:02}", y, mo, d);
            if (*h, *mi, *s, *us) != (0, 0, 0, 0) {
                out.push_str(&format!(" {:02}:{:02}:{:02}", h, mi, s));
            }
            Scalar::Text(out)
        }
        Value::Time(neg, days, h, mi, s, _) => {
            let hours = u32::from(*h) + days * 24;
            let sign = if *neg { "-" } else { "" };
            Scalar::Text(format!("{}{:02}:{:02}:{:02}", sign, hours, mi, s))
        }
    }
}

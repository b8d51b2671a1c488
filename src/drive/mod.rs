//! Google Drive / Sheets publishing.
//!
//! - `auth`: service-account bearer tokens
//! - `client`: HTTP calls and error classification
//! - `mapping`: persisted logical name → file id cache
//! - `resolver`: find-or-create logic on top of the two

use async_trait::async_trait;
use serde::Deserialize;
use serde_json::Value;

use crate::report::Scalar;
use crate::Result;

pub mod auth;
pub mod client;
pub mod mapping;
pub mod resolver;

#[cfg(test)]
pub(crate) mod testing;

pub use auth::{ServiceAccountKey, ServiceAccountTokens, TokenProvider};
pub use client::DriveClient;
pub use mapping::{JsonFileMappingStore, MappingStore, MemoryMappingStore};
pub use resolver::{Resolver, Upsert};

/// MIME type Drive uses for native Google spreadsheets.
pub const SPREADSHEET_MIME: &str = "application/vnd.google-apps.spreadsheet";

/// Fields requested whenever file metadata comes back.
pub const META_FIELDS: &str = "id,name,md5Checksum,createdTime,modifiedTime";

/// Metadata of a remote file. Only `id` and `md5_checksum` are ever looked at.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RemoteFileMeta {
    pub id: String,
    #[serde(default)]
    pub name: Option<String>,
    #[serde(default)]
    pub md5_checksum: Option<String>,
    #[serde(default)]
    pub created_time: Option<String>,
    #[serde(default)]
    pub modified_time: Option<String>,
}

impl RemoteFileMeta {
    pub fn with_id(id: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            name: None,
            md5_checksum: None,
            created_time: None,
            modified_time: None,
        }
    }
}

/// The remote calls the resolver and the site runner need.
#[async_trait]
pub trait RemoteFiles: Send + Sync {
    /// Metadata of file `id`, restricted to `fields`.
    async fn get(&self, id: &str, fields: &str) -> Result<RemoteFileMeta>;

    /// Files matching a Drive query, at most `limit`, ordered by `order_by`.
    async fn search(&self, query: &str, order_by: &str, limit: u32) -> Result<Vec<RemoteFileMeta>>;

    /// Create an empty file of `mime_type` under `parent`.
    async fn create_metadata_only(
        &self,
        parent: &str,
        name: &str,
        mime_type: &str,
    ) -> Result<RemoteFileMeta>;

    /// Create a file with content under `parent` in one request.
    async fn create_multipart(
        &self,
        parent: &str,
        name: &str,
        mime_type: &str,
        content: &[u8],
    ) -> Result<RemoteFileMeta>;

    /// Overwrite the content of an existing file.
    async fn replace_content(
        &self,
        id: &str,
        content: &[u8],
        mime_type: &str,
    ) -> Result<RemoteFileMeta>;

    /// Write `values` into spreadsheet `id` starting at `range`.
    async fn update_values(&self, id: &str, range: &str, values: &[Vec<Scalar>]) -> Result<Value>;
}

/// Drive query matching non-trashed files called `name` directly under `parent`.
pub fn name_query(name: &str, parent: &str) -> String {
    format!(
        "name='{}' and '{}' in parents and trashed=false",
        escape_query(name),
        escape_query(parent)
    )
}

fn escape_query(s: &str) -> String {
    s.replace('\\', "\\\\").replace('\'', "\\'")
}

/// Lower-case hex MD5 of `content`, the format Drive reports in `md5Checksum`.
pub fn md5_hex(content: &[u8]) -> String {
    use md5::{Digest, Md5};
    Md5::digest(content)
        .iter()
        .map(|b| format!("{:02x}", b))
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_name_query_escapes_quotes() {
        assert_eq!(
            name_query("o'hara__reportes", "fold"),
            r"name='o\'hara__reportes' and 'fold' in parents and trashed=false"
        );
    }

    #[test]
    fn test_md5_hex() {
        assert_eq!(md5_hex(b""), "d41d8cd98f00b204e9800998ecf8427e");
        assert_eq!(md5_hex(b"abc"), "900150983cd24fb0d6963f7d28e17f72");
    }

    #[test]
    fn test_meta_parses_drive_json() {
        let meta: RemoteFileMeta = serde_json::from_str(
            r#"{"id":"abc","md5Checksum":"ff","modifiedTime":"2025-01-01T00:00:00.000Z","kind":"drive#file"}"#,
        )
        .unwrap();
        assert_eq!(meta.id, "abc");
        assert_eq!(meta.md5_checksum.as_deref(), Some("ff"));
        assert_eq!(meta.name, None);
    }
}

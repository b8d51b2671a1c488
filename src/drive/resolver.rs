// src/drive/resolver.rs

use tracing::{debug, info, warn};

use super::{
    mapping::MappingStore, md5_hex, name_query, RemoteFileMeta, RemoteFiles, SPREADSHEET_MIME,
};
use crate::Result;

const ORDER_BY: &str = "modifiedTime desc";

/// Result of [`Resolver::upsert_file`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Upsert {
    pub updated: bool,
    pub remote_id: String,
}

/// Turns logical names into remote file ids without creating duplicates.
///
/// Lookup order: cached id (confirmed remotely), then a name search in the
/// parent folder, then creation. Every id that comes out is written back to
/// the mapping store.
pub struct Resolver<A, S> {
    api: A,
    store: S,
    parent: String,
}

impl<A: RemoteFiles, S: MappingStore> Resolver<A, S> {
    pub fn new(api: A, store: S, parent: impl Into<String>) -> Self {
        Self {
            api,
            store,
            parent: parent.into(),
        }
    }

    pub fn api(&self) -> &A {
        &self.api
    }

    pub fn store(&self) -> &S {
        &self.store
    }

    /// Id of the spreadsheet called `name`, creating an empty one if needed.
    pub async fn ensure(&self, name: &str) -> Result<String> {
        if let Some(meta) = self.locate(name, "id").await? {
            self.remember(name, &meta.id)?;
            return Ok(meta.id);
        }

        let created = self
            .api
            .create_metadata_only(&self.parent, name, SPREADSHEET_MIME)
            .await?;
        info!(name, id = %created.id, "created spreadsheet");
        self.remember(name, &created.id)?;
        Ok(created.id)
    }

    /// Publish `content` as the file `name`, skipping the upload when the
    /// remote copy already has the same MD5.
    pub async fn upsert_file(&self, content: &[u8], name: &str, mime_type: &str) -> Result<Upsert> {
        let existing = self.locate(name, "id,md5Checksum").await?;
        let local_md5 = md5_hex(content);

        let meta = match existing {
            Some(meta) if meta.md5_checksum.as_deref() == Some(local_md5.as_str()) => {
                debug!(name, id = %meta.id, "remote content unchanged");
                self.remember(name, &meta.id)?;
                return Ok(Upsert {
                    updated: false,
                    remote_id: meta.id,
                });
            }
            Some(meta) => {
                let replaced = self.api.replace_content(&meta.id, content, mime_type).await?;
                info!(name, id = %replaced.id, bytes = content.len(), "replaced file content");
                replaced
            }
            None => {
                let created = self
                    .api
                    .create_multipart(&self.parent, name, mime_type, content)
                    .await?;
                info!(name, id = %created.id, bytes = content.len(), "uploaded new file");
                created
            }
        };

        self.remember(name, &meta.id)?;
        Ok(Upsert {
            updated: true,
            remote_id: meta.id,
        })
    }

    /// Cached id if it still exists, else the most recently modified file
    /// with that exact name in the parent folder.
    async fn locate(&self, name: &str, fields: &str) -> Result<Option<RemoteFileMeta>> {
        if let Some(meta) = self.confirm_cached(name, fields).await {
            return Ok(Some(meta));
        }
        let query = name_query(name, &self.parent);
        let found = self.api.search(&query, ORDER_BY, 1).await?;
        if let Some(meta) = found.first() {
            debug!(name, id = %meta.id, "found by name");
        }
        Ok(found.into_iter().next())
    }

    /// Any failure confirming the cached id counts as a miss.
    async fn confirm_cached(&self, name: &str, fields: &str) -> Option<RemoteFileMeta> {
        let cached = self.store.load().get(name).cloned()?;
        match self.api.get(&cached, fields).await {
            Ok(meta) => Some(meta),
            Err(e) => {
                warn!(name, id = %cached, "cached id not usable, falling back to search: {}", e);
                None
            }
        }
    }

    fn remember(&self, name: &str, id: &str) -> Result<()> {
        let mut mapping = self.store.load();
        if mapping.get(name).map(String::as_str) == Some(id) {
            return Ok(());
        }
        mapping.insert(name.to_string(), id.to_string());
        self.store.save(&mapping)
    }
}

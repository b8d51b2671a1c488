// src/drive/testing.rs

//! In-memory stand-in for Drive and Sheets, used by the resolver and runner tests.

use async_trait::async_trait;
use serde_json::{json, Value};
use std::{collections::BTreeMap, sync::Mutex};

use super::{md5_hex, RemoteFileMeta, RemoteFiles};
use crate::report::Scalar;
use crate::{Error, Result};

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct Calls {
    pub gets: usize,
    pub searches: usize,
    pub creates: usize,
    pub uploads: usize,
    pub replaces: usize,
    pub value_updates: usize,
}

#[derive(Debug, Clone)]
struct FakeFile {
    name: String,
    parent: String,
    mime_type: String,
    content: Option<Vec<u8>>,
    values: Option<Vec<Vec<Scalar>>>,
    modified: u64,
}

#[derive(Default)]
struct State {
    files: BTreeMap<String, FakeFile>,
    next_id: u64,
    clock: u64,
    calls: Calls,
    fail_gets: bool,
    fail_searches: bool,
    fail_value_updates: bool,
    quota_on_upload: bool,
}

impl State {
    fn insert(&mut self, parent: &str, name: &str, mime_type: &str, content: Option<Vec<u8>>) -> String {
        self.next_id += 1;
        self.clock += 1;
        let id = format!("file-{}", self.next_id);
        self.files.insert(
            id.clone(),
            FakeFile {
                name: name.to_string(),
                parent: parent.to_string(),
                mime_type: mime_type.to_string(),
                content,
                values: None,
                modified: self.clock,
            },
        );
        id
    }

    fn meta(&self, id: &str) -> Option<RemoteFileMeta> {
        let file = self.files.get(id)?;
        let mut meta = RemoteFileMeta::with_id(id);
        meta.name = Some(file.name.clone());
        meta.md5_checksum = file.content.as_deref().map(md5_hex);
        Some(meta)
    }
}

#[derive(Default)]
pub struct FakeDrive {
    state: Mutex<State>,
}

impl FakeDrive {
    fn with_state<T>(&self, f: impl FnOnce(&mut State) -> T) -> T {
        let mut guard = self.state.lock().unwrap();
        f(&mut guard)
    }

    /// Seed a file as if someone created it earlier. Returns its id.
    pub fn insert_file(&self, parent: &str, name: &str, mime_type: &str, content: Option<&[u8]>) -> String {
        self.with_state(|s| s.insert(parent, name, mime_type, content.map(<[u8]>::to_vec)))
    }

    pub fn delete(&self, id: &str) {
        self.with_state(|s| {
            s.files.remove(id);
        });
    }

    pub fn calls(&self) -> Calls {
        self.with_state(|s| s.calls)
    }

    pub fn content(&self, id: &str) -> Option<Vec<u8>> {
        self.with_state(|s| s.files.get(id).and_then(|f| f.content.clone()))
    }

    pub fn values(&self, id: &str) -> Option<Vec<Vec<Scalar>>> {
        self.with_state(|s| s.files.get(id).and_then(|f| f.values.clone()))
    }

    pub fn mime_type(&self, id: &str) -> Option<String> {
        self.with_state(|s| s.files.get(id).map(|f| f.mime_type.clone()))
    }

    /// Ids of every file called `name`, in any folder.
    pub fn ids_named(&self, name: &str) -> Vec<String> {
        self.with_state(|s| {
            s.files
                .iter()
                .filter(|(_, f)| f.name == name)
                .map(|(id, _)| id.clone())
                .collect()
        })
    }

    pub fn fail_gets(&self, on: bool) {
        self.with_state(|s| s.fail_gets = on);
    }

    pub fn fail_searches(&self, on: bool) {
        self.with_state(|s| s.fail_searches = on);
    }

    pub fn fail_value_updates(&self, on: bool) {
        self.with_state(|s| s.fail_value_updates = on);
    }

    /// Every create or content write answers like a service account with no quota.
    pub fn fail_uploads_with_quota(&self, on: bool) {
        self.with_state(|s| s.quota_on_upload = on);
    }
}

fn not_found(id: &str) -> Error {
    Error::remote(
        format!("File not found: {}.", id),
        json!({"error": {"code": 404, "message": format!("File not found: {}.", id)}}),
    )
}

fn quota() -> Error {
    Error::QuotaExceeded {
        payload: json!({"error": {"code": 403, "errors": [{"reason": "storageQuotaExceeded"}]}}),
    }
}

/// Read a single-quoted Drive query literal at the start of `s`.
/// Returns the unescaped value and the rest of the input.
fn quoted(s: &str) -> Option<(String, &str)> {
    let body = s.strip_prefix('\'')?;
    let mut out = String::new();
    let mut chars = body.char_indices();
    while let Some((i, c)) = chars.next() {
        match c {
            '\\' => out.push(chars.next()?.1),
            '\'' => return Some((out, &body[i + 1..])),
            _ => out.push(c),
        }
    }
    None
}

/// Pull `(name, parent)` out of a query built by `name_query`.
fn parse_name_query(query: &str) -> Option<(String, String)> {
    let (name, rest) = quoted(query.strip_prefix("name=")?)?;
    let (parent, rest) = quoted(rest.strip_prefix(" and ")?)?;
    rest.starts_with(" in parents").then_some((name, parent))
}

#[async_trait]
impl RemoteFiles for FakeDrive {
    async fn get(&self, id: &str, _fields: &str) -> Result<RemoteFileMeta> {
        self.with_state(|s| {
            s.calls.gets += 1;
            if s.fail_gets {
                return Err(Error::remote("backend error", json!({"error": {"code": 500}})));
            }
            s.meta(id).ok_or_else(|| not_found(id))
        })
    }

    async fn search(&self, query: &str, _order_by: &str, limit: u32) -> Result<Vec<RemoteFileMeta>> {
        self.with_state(|s| {
            s.calls.searches += 1;
            if s.fail_searches {
                return Err(Error::remote("Invalid Value", json!({"error": {"code": 400}})));
            }
            let (name, parent) = parse_name_query(query)
                .ok_or_else(|| Error::remote("unsupported query", Value::String(query.into())))?;
            let mut hits: Vec<(&String, &FakeFile)> = s
                .files
                .iter()
                .filter(|(_, f)| f.name == name && f.parent == parent)
                .collect();
            hits.sort_by(|a, b| b.1.modified.cmp(&a.1.modified));
            Ok(hits
                .into_iter()
                .take(limit as usize)
                .filter_map(|(id, _)| s.meta(id))
                .collect())
        })
    }

    async fn create_metadata_only(
        &self,
        parent: &str,
        name: &str,
        mime_type: &str,
    ) -> Result<RemoteFileMeta> {
        self.with_state(|s| {
            s.calls.creates += 1;
            if s.quota_on_upload {
                return Err(quota());
            }
            let id = s.insert(parent, name, mime_type, None);
            Ok(RemoteFileMeta::with_id(id))
        })
    }

    async fn create_multipart(
        &self,
        parent: &str,
        name: &str,
        mime_type: &str,
        content: &[u8],
    ) -> Result<RemoteFileMeta> {
        self.with_state(|s| {
            s.calls.uploads += 1;
            if s.quota_on_upload {
                return Err(quota());
            }
            let id = s.insert(parent, name, mime_type, Some(content.to_vec()));
            s.meta(&id).ok_or_else(|| not_found(&id))
        })
    }

    async fn replace_content(
        &self,
        id: &str,
        content: &[u8],
        _mime_type: &str,
    ) -> Result<RemoteFileMeta> {
        self.with_state(|s| {
            s.calls.replaces += 1;
            if s.quota_on_upload {
                return Err(quota());
            }
            s.clock += 1;
            let clock = s.clock;
            let file = s.files.get_mut(id).ok_or_else(|| not_found(id))?;
            file.content = Some(content.to_vec());
            file.modified = clock;
            s.meta(id).ok_or_else(|| not_found(id))
        })
    }

    async fn update_values(&self, id: &str, range: &str, values: &[Vec<Scalar>]) -> Result<Value> {
        self.with_state(|s| {
            s.calls.value_updates += 1;
            if s.fail_value_updates {
                return Err(Error::remote(
                    "The caller does not have permission",
                    json!({"error": {"code": 403, "message": "The caller does not have permission"}}),
                ));
            }
            let file = s.files.get_mut(id).ok_or_else(|| not_found(id))?;
            file.values = Some(values.to_vec());
            Ok(json!({
                "spreadsheetId": id,
                "updatedRange": range,
                "updatedRows": values.len(),
            }))
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::drive::name_query;

    #[test]
    fn test_parses_generated_queries() {
        assert_eq!(
            parse_name_query(&name_query("o'hara__reportes", "f1")),
            Some(("o'hara__reportes".to_string(), "f1".to_string()))
        );
        assert_eq!(parse_name_query("mimeType='x'"), None);
    }
}

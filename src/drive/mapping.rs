// src/drive/mapping.rs

use std::{
    collections::BTreeMap,
    fs,
    path::{Path, PathBuf},
    sync::Mutex,
};
use tracing::warn;

use crate::Result;

/// Logical name → remote file id.
pub type Mapping = BTreeMap<String, String>;

/// Whole-document store for the name → id cache. No locking: last writer wins.
pub trait MappingStore: Send + Sync {
    /// Current mapping. A missing or unreadable document is an empty mapping.
    fn load(&self) -> Mapping;

    /// Replace the stored document with `mapping`.
    fn save(&self, mapping: &Mapping) -> Result<()>;
}

/// Mapping kept as one JSON object on disk.
#[derive(Debug, Clone)]
pub struct JsonFileMappingStore {
    path: PathBuf,
}

impl JsonFileMappingStore {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }
}

impl MappingStore for JsonFileMappingStore {
    fn load(&self) -> Mapping {
        let text = match fs::read_to_string(&self.path) {
            Ok(t) => t,
            Err(_) => return Mapping::new(),
        };
        match serde_json::from_str(&text) {
            Ok(m) => m,
            Err(e) => {
                warn!(path = %self.path.display(), "ignoring unparsable mapping: {}", e);
                Mapping::new()
            }
        }
    }

    fn save(&self, mapping: &Mapping) -> Result<()> {
        if let Some(parent) = self.path.parent() {
            if !parent.as_os_str().is_empty() {
                fs::create_dir_all(parent)?;
            }
        }
        let tmp = self.path.with_extension("json.tmp");
        fs::write(&tmp, serde_json::to_vec(mapping)?)?;
        fs::rename(&tmp, &self.path)?;
        Ok(())
    }
}

/// Mapping held in memory; nothing survives the process.
#[derive(Debug, Default)]
pub struct MemoryMappingStore {
    inner: Mutex<Mapping>,
}

impl MemoryMappingStore {
    pub fn new(initial: Mapping) -> Self {
        Self {
            inner: Mutex::new(initial),
        }
    }
}

impl MappingStore for MemoryMappingStore {
    fn load(&self) -> Mapping {
        self.inner.lock().map(|m| m.clone()).unwrap_or_default()
    }

    fn save(&self, mapping: &Mapping) -> Result<()> {
        let mut guard = self
            .inner
            .lock()
            .map_err(|_| crate::Error::Io(std::io::Error::other("mapping lock poisoned")))?;
        *guard = mapping.clone();
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::tempdir;

    #[test]
    fn test_missing_file_is_empty() {
        let tmp = tempdir().unwrap();
        let store = JsonFileMappingStore::new(tmp.path().join("none.json"));
        assert!(store.load().is_empty());
    }

    #[test]
    fn test_garbage_file_is_empty() {
        let tmp = tempdir().unwrap();
        let path = tmp.path().join("drive_map.json");
        fs::write(&path, "{not json").unwrap();
        assert!(JsonFileMappingStore::new(&path).load().is_empty());

        fs::write(&path, "[1,2,3]").unwrap();
        assert!(JsonFileMappingStore::new(&path).load().is_empty());
    }

    #[test]
    fn test_save_then_load_whole_document() {
        let tmp = tempdir().unwrap();
        let path = tmp.path().join("tmp").join("drive_map.json");
        let store = JsonFileMappingStore::new(&path);

        let mut m = Mapping::new();
        m.insert("a__reportes".into(), "id-a".into());
        store.save(&m).unwrap();

        m.insert("b__reportes.csv".into(), "id-b".into());
        store.save(&m).unwrap();

        let loaded = store.load();
        assert_eq!(loaded, m);
        let raw: serde_json::Value =
            serde_json::from_str(&fs::read_to_string(&path).unwrap()).unwrap();
        assert_eq!(raw["a__reportes"], "id-a");
        assert!(!path.with_extension("json.tmp").exists());
    }

    #[test]
    fn test_memory_store() {
        let store = MemoryMappingStore::default();
        let mut m = store.load();
        m.insert("x".into(), "1".into());
        store.save(&m).unwrap();
        assert_eq!(store.load().get("x").map(String::as_str), Some("1"));
    }
}

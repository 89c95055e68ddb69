use std::path::Path;

use anyhow::{Context, Result};

use super::{Fields, LocalStore, StorageBackend, StoreError, StoreResult};

/// Store persisted in an embedded sled database, one JSON value per document.
pub type SledStore = LocalStore<SledBackend>;

#[derive(Clone)]
pub struct SledBackend {
    tree: sled::Tree,
}

impl SledBackend {
    const TREE: &'static str = "documents";

    pub fn open(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        std::fs::create_dir_all(path)
            .with_context(|| format!("failed to create storage directory {:?}", path))?;
        let db = sled::open(path)
            .with_context(|| format!("failed to open sled database at {:?}", path))?;
        let tree = db
            .open_tree(Self::TREE)
            .context("failed to open document tree")?;
        Ok(Self { tree })
    }
}

impl SledStore {
    pub fn open(path: impl AsRef<Path>) -> Result<Self> {
        Ok(LocalStore::with_backend(SledBackend::open(path)?))
    }
}

fn backend_err(err: sled::Error) -> StoreError {
    StoreError::Backend(err.to_string())
}

impl StorageBackend for SledBackend {
    fn read(&self, key: &str) -> StoreResult<Option<Fields>> {
        match self.tree.get(key.as_bytes()).map_err(backend_err)? {
            Some(raw) => Ok(Some(serde_json::from_slice(&raw)?)),
            None => Ok(None),
        }
    }

    fn write_batch(&self, entries: &[(String, Fields)]) -> StoreResult<()> {
        // encode everything first so a bad value aborts before any write
        let mut batch = sled::Batch::default();
        for (key, fields) in entries {
            batch.insert(key.as_bytes(), serde_json::to_vec(fields)?);
        }
        self.tree.apply_batch(batch).map_err(backend_err)?;
        Ok(())
    }

    fn scan(&self, prefix: &str) -> StoreResult<Vec<(String, Fields)>> {
        let mut entries = Vec::new();
        for entry in self.tree.scan_prefix(prefix.as_bytes()) {
            let (key, value) = entry.map_err(backend_err)?;
            let key = String::from_utf8(key.to_vec())
                .map_err(|_| StoreError::Backend("stored key was not valid UTF-8".into()))?;
            entries.push((key, serde_json::from_slice(&value)?));
        }
        Ok(entries)
    }

    fn flush(&self) -> StoreResult<()> {
        self.tree.flush().map_err(backend_err)?;
        Ok(())
    }
}

use super::{Fields, LocalStore, StorageBackend, StoreError, StoreResult};
use std::collections::BTreeMap;
use std::sync::RwLock;

/// Process-local store, used by tests and single-process demos.
pub type MemoryStore = LocalStore<MemoryBackend>;

#[derive(Default)]
pub struct MemoryBackend {
    docs: RwLock<BTreeMap<String, Fields>>,
}

impl MemoryStore {
    pub fn new() -> Self {
        LocalStore::with_backend(MemoryBackend::default())
    }
}

impl Default for MemoryStore {
    fn default() -> Self {
        Self::new()
    }
}

fn poisoned() -> StoreError {
    StoreError::Backend("memory store lock poisoned".into())
}

impl StorageBackend for MemoryBackend {
    fn read(&self, key: &str) -> StoreResult<Option<Fields>> {
        Ok(self.docs.read().map_err(|_| poisoned())?.get(key).cloned())
    }

    fn write_batch(&self, entries: &[(String, Fields)]) -> StoreResult<()> {
        let mut docs = self.docs.write().map_err(|_| poisoned())?;
        for (key, fields) in entries {
            docs.insert(key.clone(), fields.clone());
        }
        Ok(())
    }

    fn scan(&self, prefix: &str) -> StoreResult<Vec<(String, Fields)>> {
        let docs = self.docs.read().map_err(|_| poisoned())?;
        Ok(docs
            .range(prefix.to_string()..)
            .take_while(|(key, _)| key.starts_with(prefix))
            .map(|(key, fields)| (key.clone(), fields.clone()))
            .collect())
    }
}

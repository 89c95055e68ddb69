//! Commit engine shared by the local store backends.
//!
//! Every write runs inside one commit: the commit lock is held while the
//! writes are staged, applied to the backend as one batch and published to
//! listeners, so create-if-absent is race free and each subscription
//! observes commits in order.

use super::subscriptions::ListenerRegistry;
use super::{
    sentinel, CollectionPath, DocPath, Document, DocumentStore, Fields, Query, Sentinel,
    Snapshot, StoreError, StoreResult, Subscription, Target,
};
use async_trait::async_trait;
use serde_json::Value;
use std::sync::{Mutex, MutexGuard};
use tracing::trace;
use uuid::Uuid;

/// Raw key/value persistence underneath a [`LocalStore`].
pub trait StorageBackend: Send + Sync {
    fn read(&self, key: &str) -> StoreResult<Option<Fields>>;
    /// Persist every entry, or none of them.
    fn write_batch(&self, entries: &[(String, Fields)]) -> StoreResult<()>;
    /// All entries whose key starts with `prefix`.
    fn scan(&self, prefix: &str) -> StoreResult<Vec<(String, Fields)>>;
    fn flush(&self) -> StoreResult<()> {
        Ok(())
    }
}

/// Document store running in this process on top of a [`StorageBackend`].
pub struct LocalStore<B> {
    backend: B,
    last_stamp: Mutex<i64>,
    listeners: ListenerRegistry,
}

struct Txn<'a, B> {
    backend: &'a B,
    last_stamp: &'a mut i64,
    writes: Vec<(DocPath, Fields)>,
}

impl<B: StorageBackend> Txn<'_, B> {
    fn read(&self, path: &DocPath) -> StoreResult<Option<Fields>> {
        if let Some((_, staged)) = self.writes.iter().rev().find(|(p, _)| p == path) {
            return Ok(Some(staged.clone()));
        }
        self.backend.read(&path.key())
    }

    fn stamp(&mut self) -> i64 {
        let now = chrono::Utc::now().timestamp_millis();
        let next = now.max(*self.last_stamp + 1);
        *self.last_stamp = next;
        next
    }

    fn resolve(&mut self, fields: Fields) -> Fields {
        let mut resolved = Fields::new();
        for (key, value) in fields {
            match sentinel(&value) {
                Some(Sentinel::Delete) => {}
                Some(Sentinel::ServerTimestamp) => {
                    resolved.insert(key, Value::from(self.stamp()));
                }
                None => {
                    let value = match value {
                        Value::Object(nested) => Value::Object(self.resolve(nested)),
                        other => other,
                    };
                    resolved.insert(key, value);
                }
            }
        }
        resolved
    }

    /// Merge a patch whose keys may be dotted paths into nested maps.
    fn merge(&mut self, target: &mut Fields, patch: Fields) {
        for (key, value) in patch {
            let mut parts: Vec<&str> = key.split('.').collect();
            let Some(leaf) = parts.pop() else { continue };

            let mut node = &mut *target;
            for part in parts {
                let entry = node
                    .entry(part.to_string())
                    .or_insert_with(|| Value::Object(Fields::new()));
                if !entry.is_object() {
                    *entry = Value::Object(Fields::new());
                }
                let Value::Object(child) = entry else { unreachable!() };
                node = child;
            }

            match sentinel(&value) {
                Some(Sentinel::Delete) => {
                    node.remove(leaf);
                }
                Some(Sentinel::ServerTimestamp) => {
                    let stamp = self.stamp();
                    node.insert(leaf.to_string(), Value::from(stamp));
                }
                None => {
                    let value = match value {
                        Value::Object(nested) => Value::Object(self.resolve(nested)),
                        other => other,
                    };
                    node.insert(leaf.to_string(), value);
                }
            }
        }
    }

    fn stage(&mut self, path: DocPath, fields: Fields) {
        self.writes.push((path, fields));
    }
}

impl<B: StorageBackend> LocalStore<B> {
    pub fn with_backend(backend: B) -> Self {
        Self {
            backend,
            last_stamp: Mutex::new(0),
            listeners: ListenerRegistry::default(),
        }
    }

    /// Number of open subscriptions, for leak checks.
    pub fn listener_count(&self) -> usize {
        self.listeners.len()
    }

    fn lock(&self) -> StoreResult<MutexGuard<'_, i64>> {
        self.last_stamp
            .lock()
            .map_err(|_| StoreError::Backend("commit lock poisoned".into()))
    }

    fn commit<R>(
        &self,
        op: impl FnOnce(&mut Txn<'_, B>) -> StoreResult<R>,
    ) -> StoreResult<R> {
        let mut last_stamp = self.lock()?;
        let mut txn = Txn {
            backend: &self.backend,
            last_stamp: &mut *last_stamp,
            writes: Vec::new(),
        };
        let out = op(&mut txn)?;
        let (changed, entries): (Vec<DocPath>, Vec<(String, Fields)>) =
            std::mem::take(&mut txn.writes)
                .into_iter()
                .map(|(path, fields)| {
                    let key = path.key();
                    (path, (key, fields))
                })
                .unzip();

        self.backend.write_batch(&entries)?;
        self.backend.flush()?;
        self.publish(&changed)?;
        Ok(out)
    }

    fn publish(&self, changed: &[DocPath]) -> StoreResult<()> {
        for (id, target) in self.listeners.affected(changed)? {
            let snapshot = self.evaluate(&target)?;
            trace!(subscription = id, docs = snapshot.len(), "delivering snapshot");
            self.listeners.deliver(id, snapshot)?;
        }
        Ok(())
    }

    fn evaluate(&self, target: &Target) -> StoreResult<Snapshot> {
        match target {
            Target::Document(path) => Ok(self
                .backend
                .read(&path.key())?
                .map(|fields| Document {
                    path: path.clone(),
                    fields,
                })
                .into_iter()
                .collect()),
            Target::Query(query) => self.run_query(query),
        }
    }

    fn run_query(&self, query: &Query) -> StoreResult<Vec<Document>> {
        let prefix = format!("{}/", query.collection.key());
        let depth = query.collection.depth() + 1;
        let candidates = self
            .backend
            .scan(&prefix)?
            .into_iter()
            .map(|(key, fields)| Document {
                path: DocPath::from_key(&key),
                fields,
            })
            .filter(|doc| doc.path.depth() == depth)
            .collect();
        Ok(query.apply(candidates))
    }
}

#[async_trait]
impl<B: StorageBackend> DocumentStore for LocalStore<B> {
    async fn get(&self, path: &DocPath) -> StoreResult<Option<Document>> {
        path.validate()?;
        Ok(self.backend.read(&path.key())?.map(|fields| Document {
            path: path.clone(),
            fields,
        }))
    }

    async fn create(&self, path: &DocPath, fields: Fields) -> StoreResult<()> {
        path.validate()?;
        self.commit(|txn| {
            if txn.read(path)?.is_some() {
                return Err(StoreError::AlreadyExists(path.key()));
            }
            let fields = txn.resolve(fields);
            txn.stage(path.clone(), fields);
            Ok(())
        })
    }

    async fn add(&self, collection: &CollectionPath, fields: Fields) -> StoreResult<DocPath> {
        collection.validate()?;
        let path = collection.doc(&Uuid::new_v4().simple().to_string());
        self.create(&path, fields).await?;
        Ok(path)
    }

    async fn set(&self, path: &DocPath, fields: Fields) -> StoreResult<()> {
        path.validate()?;
        self.commit(|txn| {
            let fields = txn.resolve(fields);
            txn.stage(path.clone(), fields);
            Ok(())
        })
    }

    async fn update(&self, path: &DocPath, patch: Fields) -> StoreResult<()> {
        self.batch_update(vec![(path.clone(), patch)]).await
    }

    async fn batch_update(&self, updates: Vec<(DocPath, Fields)>) -> StoreResult<()> {
        for (path, _) in &updates {
            path.validate()?;
        }
        self.commit(|txn| {
            for (path, patch) in updates {
                let mut current = txn
                    .read(&path)?
                    .ok_or_else(|| StoreError::NotFound(path.key()))?;
                txn.merge(&mut current, patch);
                txn.stage(path, current);
            }
            Ok(())
        })
    }

    async fn query(&self, query: &Query) -> StoreResult<Vec<Document>> {
        query.collection.validate()?;
        self.run_query(query)
    }

    async fn subscribe(&self, target: Target) -> StoreResult<Subscription> {
        target.validate()?;
        let _commit = self.lock()?;
        let initial = self.evaluate(&target)?;
        self.listeners.register(target, initial)
    }
}

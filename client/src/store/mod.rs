//! Document store contract consumed by every component.
//!
//! The store is the single shared mutable resource: documents addressed by
//! slash-separated paths, targeted partial writes, and live subscriptions
//! that push the full current result set on every matching commit. Two
//! local backends are provided; a hosted backend implements the same trait.

mod engine;
mod memory;
mod sled_backend;
mod subscriptions;

pub use engine::{LocalStore, StorageBackend};
pub use memory::{MemoryBackend, MemoryStore};
pub use sled_backend::{SledBackend, SledStore};
pub use subscriptions::{Snapshot, Subscription};

use async_trait::async_trait;
use serde::{de::DeserializeOwned, Serialize};
use serde_json::{json, Value};
use std::cmp::Ordering;
use std::fmt;

/// Field map of a single document.
pub type Fields = serde_json::Map<String, Value>;

/// Errors reported by a document store.
#[derive(Debug, thiserror::Error)]
pub enum StoreError {
    #[error("document not found: {0}")]
    NotFound(String),
    #[error("document already exists: {0}")]
    AlreadyExists(String),
    #[error("invalid path: {0}")]
    InvalidPath(String),
    #[error("invalid document: {0}")]
    InvalidDocument(String),
    #[error("serialization error: {0}")]
    Serialization(#[from] serde_json::Error),
    #[error("backend error: {0}")]
    Backend(String),
}

pub type StoreResult<T> = std::result::Result<T, StoreError>;

/// Asynchronous document store with live queries.
#[async_trait]
pub trait DocumentStore: Send + Sync {
    async fn get(&self, path: &DocPath) -> StoreResult<Option<Document>>;

    /// Create-if-absent. Fails with [`StoreError::AlreadyExists`] when the
    /// document is present, so concurrent creators of one id deduplicate.
    async fn create(&self, path: &DocPath, fields: Fields) -> StoreResult<()>;

    /// Create a document under a generated id.
    async fn add(&self, collection: &CollectionPath, fields: Fields) -> StoreResult<DocPath>;

    /// Overwrite the whole document.
    async fn set(&self, path: &DocPath, fields: Fields) -> StoreResult<()>;

    /// Merge `patch` into an existing document. Keys may be dotted
    /// (`reactions.alice`) to address a single nested entry.
    async fn update(&self, path: &DocPath, patch: Fields) -> StoreResult<()>;

    /// Apply several updates atomically: all targets must exist.
    async fn batch_update(&self, updates: Vec<(DocPath, Fields)>) -> StoreResult<()>;

    async fn query(&self, query: &Query) -> StoreResult<Vec<Document>>;

    /// Open a live subscription. The current result set is delivered first.
    async fn subscribe(&self, target: Target) -> StoreResult<Subscription>;
}

/// Serialize a model into a document field map.
pub fn to_fields<T: Serialize>(value: &T) -> StoreResult<Fields> {
    match serde_json::to_value(value)? {
        Value::Object(fields) => Ok(fields),
        other => Err(StoreError::InvalidDocument(format!(
            "expected an object, got {other}"
        ))),
    }
}

/// Field map from a `json!` object literal; any other value yields an
/// empty map.
pub fn object(value: Value) -> Fields {
    match value {
        Value::Object(fields) => fields,
        _ => Fields::new(),
    }
}

fn check_segments(segments: &[String]) -> StoreResult<()> {
    if segments
        .iter()
        .any(|segment| segment.is_empty() || segment.contains('/'))
    {
        return Err(StoreError::InvalidPath(segments.join("/")));
    }
    Ok(())
}

/// Path of a collection: `chats` or `chats/{id}/messages`.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct CollectionPath(Vec<String>);

impl CollectionPath {
    pub fn root(name: &str) -> Self {
        Self(vec![name.to_string()])
    }

    pub fn doc(&self, id: &str) -> DocPath {
        let mut segments = self.0.clone();
        segments.push(id.to_string());
        DocPath(segments)
    }

    pub fn key(&self) -> String {
        self.0.join("/")
    }

    pub(crate) fn depth(&self) -> usize {
        self.0.len()
    }

    pub fn validate(&self) -> StoreResult<()> {
        if self.0.len() % 2 == 0 {
            return Err(StoreError::InvalidPath(self.key()));
        }
        check_segments(&self.0)
    }
}

impl fmt::Display for CollectionPath {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.key())
    }
}

/// Path of a document: `users/{id}` or `chats/{id}/messages/{message}`.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct DocPath(Vec<String>);

impl DocPath {
    pub fn new(collection: &str, id: &str) -> Self {
        Self(vec![collection.to_string(), id.to_string()])
    }

    /// Subcollection nested under this document.
    pub fn collection(&self, name: &str) -> CollectionPath {
        let mut segments = self.0.clone();
        segments.push(name.to_string());
        CollectionPath(segments)
    }

    pub fn id(&self) -> &str {
        self.0.last().map(String::as_str).unwrap_or_default()
    }

    pub fn parent(&self) -> CollectionPath {
        CollectionPath(self.0[..self.0.len().saturating_sub(1)].to_vec())
    }

    pub fn key(&self) -> String {
        self.0.join("/")
    }

    pub(crate) fn from_key(key: &str) -> Self {
        Self(key.split('/').map(str::to_string).collect())
    }

    pub(crate) fn depth(&self) -> usize {
        self.0.len()
    }

    pub fn validate(&self) -> StoreResult<()> {
        if self.0.is_empty() || self.0.len() % 2 != 0 {
            return Err(StoreError::InvalidPath(self.key()));
        }
        check_segments(&self.0)
    }
}

impl fmt::Display for DocPath {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.key())
    }
}

/// A document as read from the store.
#[derive(Debug, Clone, PartialEq)]
pub struct Document {
    pub path: DocPath,
    pub fields: Fields,
}

impl Document {
    pub fn id(&self) -> &str {
        self.path.id()
    }

    pub fn get(&self, field: &str) -> Option<&Value> {
        lookup(&self.fields, field)
    }

    pub fn decode<T: DeserializeOwned>(&self) -> Result<T, serde_json::Error> {
        serde_json::from_value(Value::Object(self.fields.clone()))
    }
}

const SENTINEL_KEY: &str = "$sentinel";

/// Placeholder values resolved by the store at commit time.
pub struct FieldValue;

impl FieldValue {
    /// Replaced with a strictly increasing millisecond timestamp.
    pub fn server_timestamp() -> Value {
        json!({ SENTINEL_KEY: "serverTimestamp" })
    }

    /// Removes the addressed field in an update.
    pub fn delete() -> Value {
        json!({ SENTINEL_KEY: "delete" })
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum Sentinel {
    ServerTimestamp,
    Delete,
}

pub(crate) fn sentinel(value: &Value) -> Option<Sentinel> {
    let object = value.as_object()?;
    if object.len() != 1 {
        return None;
    }
    match object.get(SENTINEL_KEY)?.as_str()? {
        "serverTimestamp" => Some(Sentinel::ServerTimestamp),
        "delete" => Some(Sentinel::Delete),
        _ => None,
    }
}

/// Resolve a possibly dotted field path.
pub(crate) fn lookup<'a>(fields: &'a Fields, field: &str) -> Option<&'a Value> {
    let mut parts = field.split('.');
    let mut current = fields.get(parts.next()?)?;
    for part in parts {
        current = current.as_object()?.get(part)?;
    }
    Some(current)
}

#[derive(Debug, Clone, PartialEq)]
pub enum Filter {
    Eq(String, Value),
    Ne(String, Value),
    ArrayContains(String, Value),
}

impl Filter {
    fn matches(&self, fields: &Fields) -> bool {
        match self {
            Filter::Eq(field, expected) => lookup(fields, field) == Some(expected),
            Filter::Ne(field, excluded) => {
                matches!(lookup(fields, field), Some(value) if value != excluded)
            }
            Filter::ArrayContains(field, needle) => lookup(fields, field)
                .and_then(Value::as_array)
                .is_some_and(|items| items.contains(needle)),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Direction {
    Ascending,
    Descending,
}

/// Filtered, optionally ordered and limited view of one collection.
#[derive(Debug, Clone, PartialEq)]
pub struct Query {
    pub collection: CollectionPath,
    pub filters: Vec<Filter>,
    pub order_by: Option<(String, Direction)>,
    pub limit: Option<usize>,
}

impl Query {
    pub fn new(collection: CollectionPath) -> Self {
        Self {
            collection,
            filters: Vec::new(),
            order_by: None,
            limit: None,
        }
    }

    pub fn where_eq(mut self, field: &str, value: impl Into<Value>) -> Self {
        self.filters.push(Filter::Eq(field.to_string(), value.into()));
        self
    }

    pub fn where_ne(mut self, field: &str, value: impl Into<Value>) -> Self {
        self.filters.push(Filter::Ne(field.to_string(), value.into()));
        self
    }

    pub fn where_array_contains(mut self, field: &str, value: impl Into<Value>) -> Self {
        self.filters
            .push(Filter::ArrayContains(field.to_string(), value.into()));
        self
    }

    pub fn order_by(mut self, field: &str, direction: Direction) -> Self {
        self.order_by = Some((field.to_string(), direction));
        self
    }

    pub fn limit(mut self, limit: usize) -> Self {
        self.limit = Some(limit);
        self
    }

    pub(crate) fn matches(&self, document: &Document) -> bool {
        document.path.parent() == self.collection
            && self.filters.iter().all(|f| f.matches(&document.fields))
    }

    /// Filter, order and limit candidate documents of the collection.
    pub(crate) fn apply(&self, candidates: Vec<Document>) -> Vec<Document> {
        let mut docs: Vec<Document> = candidates
            .into_iter()
            .filter(|doc| self.matches(doc))
            .collect();

        docs.sort_by(|a, b| a.id().cmp(b.id()));
        if let Some((field, direction)) = &self.order_by {
            docs.sort_by(|a, b| {
                match (lookup(&a.fields, field), lookup(&b.fields, field)) {
                    (Some(x), Some(y)) => {
                        let ord = compare_values(x, y);
                        match direction {
                            Direction::Ascending => ord,
                            Direction::Descending => ord.reverse(),
                        }
                    }
                    (Some(_), None) => Ordering::Less,
                    (None, Some(_)) => Ordering::Greater,
                    (None, None) => Ordering::Equal,
                }
            });
        }

        if let Some(limit) = self.limit {
            docs.truncate(limit);
        }
        docs
    }
}

fn compare_values(a: &Value, b: &Value) -> Ordering {
    match (a, b) {
        (Value::Number(x), Value::Number(y)) => x
            .as_f64()
            .partial_cmp(&y.as_f64())
            .unwrap_or(Ordering::Equal),
        (Value::String(x), Value::String(y)) => x.cmp(y),
        (Value::Bool(x), Value::Bool(y)) => x.cmp(y),
        _ => Ordering::Equal,
    }
}

/// What a live subscription watches.
#[derive(Debug, Clone, PartialEq)]
pub enum Target {
    Document(DocPath),
    Query(Query),
}

impl Target {
    pub(crate) fn watches(&self, changed: &DocPath) -> bool {
        match self {
            Target::Document(path) => path == changed,
            Target::Query(query) => changed.parent() == query.collection,
        }
    }

    pub(crate) fn validate(&self) -> StoreResult<()> {
        match self {
            Target::Document(path) => path.validate(),
            Target::Query(query) => query.collection.validate(),
        }
    }
}

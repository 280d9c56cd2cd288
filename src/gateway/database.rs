//! Database driver boundary.
//!
//! The gateway talks to the document store only through the `Database`
//! trait. Drivers are assumed not to retry internally; retry policy belongs
//! to gateway callers.

use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Duration;

use async_trait::async_trait;
use dashmap::DashMap;
use serde::Serialize;
use thiserror::Error;

use crate::Document;

/// Errors reported by a database driver.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum DbError {
    #[error("document '{0}' not found")]
    NotFound(String),

    #[error("write conflict on '{0}'")]
    Conflict(String),

    #[error("database call exceeded {}ms", .0.as_millis())]
    Timeout(Duration),

    #[error("database connection failed: {0}")]
    Connection(String),

    #[error("database error: {0}")]
    Backend(String),
}

impl DbError {
    /// Whether this error says something about database health.
    ///
    /// Not-found and conflict are answers from a working database and must
    /// not trip the circuit breaker.
    pub fn counts_as_failure(&self) -> bool {
        !matches!(self, DbError::NotFound(_) | DbError::Conflict(_))
    }

    /// Whether repeating the call later may succeed.
    pub fn is_transient(&self) -> bool {
        matches!(self, DbError::Timeout(_) | DbError::Connection(_))
    }
}

/// Acknowledgement of a successful write.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct WriteAck {
    pub key: String,
    /// Monotonic per-database version assigned to the write.
    pub version: u64,
}

/// A document database driver.
#[async_trait]
pub trait Database: Send + Sync {
    /// Fetch the document stored under `key`.
    async fn fetch(&self, key: &str) -> Result<Document, DbError>;

    /// Store `value` under `key`, replacing any previous document.
    async fn write(&self, key: &str, value: Document) -> Result<WriteAck, DbError>;

    /// Remove the document under `key`. Missing keys are `DbError::NotFound`.
    async fn delete(&self, key: &str) -> Result<(), DbError>;
}

/// In-process document store used by the binary and tests.
#[derive(Debug, Default)]
pub struct MemoryDatabase {
    documents: DashMap<String, (Document, u64)>,
    version: AtomicU64,
}

impl MemoryDatabase {
    pub fn new() -> Self {
        Self::default()
    }

    /// Seed the store with `(key, document)` pairs.
    pub fn with_documents<K, I>(documents: I) -> Self
    where
        K: Into<String>,
        I: IntoIterator<Item = (K, Document)>,
    {
        let db = Self::new();
        for (key, doc) in documents {
            let version = db.next_version();
            db.documents.insert(key.into(), (doc, version));
        }
        db
    }

    pub fn len(&self) -> usize {
        self.documents.len()
    }

    pub fn is_empty(&self) -> bool {
        self.documents.is_empty()
    }

    fn next_version(&self) -> u64 {
        self.version.fetch_add(1, Ordering::Relaxed) + 1
    }
}

#[async_trait]
impl Database for MemoryDatabase {
    async fn fetch(&self, key: &str) -> Result<Document, DbError> {
        self.documents
            .get(key)
            .map(|entry| entry.0.clone())
            .ok_or_else(|| DbError::NotFound(key.to_string()))
    }

    async fn write(&self, key: &str, value: Document) -> Result<WriteAck, DbError> {
        let version = self.next_version();
        self.documents.insert(key.to_string(), (value, version));
        Ok(WriteAck {
            key: key.to_string(),
            version,
        })
    }

    async fn delete(&self, key: &str) -> Result<(), DbError> {
        self.documents
            .remove(key)
            .map(|_| ())
            .ok_or_else(|| DbError::NotFound(key.to_string()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[tokio::test]
    async fn test_memory_database_roundtrip() {
        let db = MemoryDatabase::new();
        let first = db.write("sku-1", json!({"name": "lamp"})).await.unwrap();
        let second = db.write("sku-1", json!({"name": "desk lamp"})).await.unwrap();
        assert!(second.version > first.version);

        assert_eq!(db.fetch("sku-1").await.unwrap(), json!({"name": "desk lamp"}));
        db.delete("sku-1").await.unwrap();
        assert_eq!(db.fetch("sku-1").await, Err(DbError::NotFound("sku-1".into())));
        assert_eq!(db.delete("sku-1").await, Err(DbError::NotFound("sku-1".into())));
    }

    #[tokio::test]
    async fn test_seeded_documents() {
        let db = MemoryDatabase::with_documents([("a", json!(1)), ("b", json!(2))]);
        assert_eq!(db.len(), 2);
        assert_eq!(db.fetch("b").await.unwrap(), json!(2));
    }

    #[test]
    fn test_error_classification() {
        assert!(!DbError::NotFound("k".into()).counts_as_failure());
        assert!(!DbError::Conflict("k".into()).counts_as_failure());
        assert!(DbError::Timeout(Duration::from_secs(1)).counts_as_failure());
        assert!(DbError::Backend("disk full".into()).counts_as_failure());

        assert!(DbError::Connection("refused".into()).is_transient());
        assert!(!DbError::Backend("disk full".into()).is_transient());
    }
}

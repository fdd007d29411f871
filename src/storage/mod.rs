//! Storage facade
//!
//! One `Storage` trait covers every persistence backend; `MultiStorage`
//! fans a record out to all of them and isolates failures, so a broken
//! backend costs its own writes and nothing else. The in-tree backends are
//! a JSON batch file sink and an in-memory store; document stores and
//! search indexes implement the same trait externally.

mod json_sink;
mod memory;

pub use json_sink::JsonFileSink;
pub use memory::MemoryStore;

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Errors raised by storage backends
#[derive(Debug, Error)]
pub enum StorageError {
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
    #[error("Serialization error: {0}")]
    Serialize(#[from] serde_json::Error),
    #[error("Backend unavailable: {0}")]
    Unavailable(String),
}

/// Content fingerprints as persisted
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct FingerprintRecord {
    /// Hex of the 256-bit exact hash
    pub exact: String,
    /// 64-bit SimHash
    pub simhash: u64,
}

/// One crawled page, as handed to storage
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PageRecord {
    /// Canonical URL that was crawled
    pub url: String,
    /// URL after redirects
    pub final_url: String,
    /// Host of the canonical URL
    pub domain: String,
    /// Link depth from the seeds
    pub depth: u32,
    /// URL of the page that discovered this one
    pub parent_url: Option<String>,
    /// When the page was fetched
    pub fetched_at: DateTime<Utc>,
    /// HTTP status
    pub status: u16,
    /// Whether a JS renderer produced the body
    pub rendered: bool,
    /// Content fingerprints
    pub fingerprint: FingerprintRecord,
    /// Visible page text
    pub text: String,
    /// Opaque extractor payload
    pub extraction: serde_json::Value,
}

/// Persistence seam; implementations must be shareable across workers.
#[async_trait]
pub trait Storage: Send + Sync {
    async fn save(&self, record: &PageRecord) -> Result<(), StorageError>;
    async fn flush(&self) -> Result<(), StorageError>;
    /// Short backend name for logs
    fn name(&self) -> &'static str;
}

/// Fan-out over several storage backends.
///
/// A failing backend is logged and skipped; the crawl never stops because
/// one sink is down.
pub struct MultiStorage {
    backends: Vec<Arc<dyn Storage>>,
    write_errors: AtomicU64,
}

impl MultiStorage {
    pub fn new(backends: Vec<Arc<dyn Storage>>) -> Self {
        Self {
            backends,
            write_errors: AtomicU64::new(0),
        }
    }

    pub fn is_empty(&self) -> bool {
        self.backends.is_empty()
    }

    /// Total writes that failed across all backends.
    pub fn write_errors(&self) -> u64 {
        self.write_errors.load(Ordering::Relaxed)
    }

    pub async fn save(&self, record: &PageRecord) {
        for backend in &self.backends {
            if let Err(e) = backend.save(record).await {
                self.write_errors.fetch_add(1, Ordering::Relaxed);
                tracing::warn!(
                    backend = backend.name(),
                    url = %record.url,
                    error = %e,
                    "storage write failed"
                );
            }
        }
    }

    pub async fn flush(&self) {
        for backend in &self.backends {
            if let Err(e) = backend.flush().await {
                tracing::warn!(backend = backend.name(), error = %e, "storage flush failed");
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    pub(crate) fn sample_record(url: &str) -> PageRecord {
        PageRecord {
            url: url.to_string(),
            final_url: url.to_string(),
            domain: "example.com".to_string(),
            depth: 0,
            parent_url: None,
            fetched_at: Utc::now(),
            status: 200,
            rendered: false,
            fingerprint: FingerprintRecord {
                exact: "ab".repeat(32),
                simhash: 0x1234_5678,
            },
            text: "page text".to_string(),
            extraction: serde_json::json!({"title": "t"}),
        }
    }

    struct FailingStorage;

    #[async_trait]
    impl Storage for FailingStorage {
        async fn save(&self, _record: &PageRecord) -> Result<(), StorageError> {
            Err(StorageError::Unavailable("down for maintenance".into()))
        }

        async fn flush(&self) -> Result<(), StorageError> {
            Ok(())
        }

        fn name(&self) -> &'static str {
            "failing"
        }
    }

    #[tokio::test]
    async fn fan_out_survives_a_failing_backend() {
        let memory = Arc::new(MemoryStore::new());
        let multi = MultiStorage::new(vec![
            Arc::new(FailingStorage) as Arc<dyn Storage>,
            memory.clone(),
        ]);

        multi.save(&sample_record("https://example.com/a")).await;
        multi.save(&sample_record("https://example.com/b")).await;
        multi.flush().await;

        assert_eq!(multi.write_errors(), 2);
        assert_eq!(memory.len(), 2);
    }

    #[test]
    fn page_record_roundtrips_through_json() {
        let record = sample_record("https://example.com/x");
        let json = serde_json::to_string(&record).unwrap();
        let back: PageRecord = serde_json::from_str(&json).unwrap();
        assert_eq!(back.url, record.url);
        assert_eq!(back.fingerprint.simhash, record.fingerprint.simhash);
    }
}

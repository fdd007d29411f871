//! In-memory storage backend
//!
//! Keeps records in a vector behind a lock. Used by tests and small crawls
//! where the caller wants the results back in process.

use async_trait::async_trait;
use parking_lot::RwLock;

use super::{PageRecord, Storage, StorageError};

/// Storage backend holding all records in memory
#[derive(Default)]
pub struct MemoryStore {
    records: RwLock<Vec<PageRecord>>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn len(&self) -> usize {
        self.records.read().len()
    }

    pub fn is_empty(&self) -> bool {
        self.records.read().is_empty()
    }

    /// Clone of everything stored so far.
    pub fn records(&self) -> Vec<PageRecord> {
        self.records.read().clone()
    }
}

#[async_trait]
impl Storage for MemoryStore {
    async fn save(&self, record: &PageRecord) -> Result<(), StorageError> {
        self.records.write().push(record.clone());
        Ok(())
    }

    async fn flush(&self) -> Result<(), StorageError> {
        Ok(())
    }

    fn name(&self) -> &'static str {
        "memory"
    }
}

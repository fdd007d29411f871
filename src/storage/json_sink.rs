//! JSON batch file sink
//!
//! Buffers records and writes them as numbered batch files
//! (`batch_0001.json`, ...) with a small envelope recording the batch
//! number, count, and write timestamp. `flush` writes any partial batch;
//! the engine calls it during shutdown.

use std::path::PathBuf;

use async_trait::async_trait;
use chrono::Utc;
use parking_lot::Mutex;
use serde_json::json;

use super::{PageRecord, Storage, StorageError};

struct SinkState {
    batch: Vec<serde_json::Value>,
    batch_count: u64,
    total_records: u64,
}

/// Storage backend writing JSON batch files to a directory
pub struct JsonFileSink {
    output_dir: PathBuf,
    batch_size: usize,
    pretty: bool,
    state: Mutex<SinkState>,
}

impl JsonFileSink {
    pub fn new(output_dir: PathBuf, batch_size: usize, pretty: bool) -> Result<Self, StorageError> {
        std::fs::create_dir_all(&output_dir)?;
        Ok(Self {
            output_dir,
            batch_size: batch_size.max(1),
            pretty,
            state: Mutex::new(SinkState {
                batch: Vec::new(),
                batch_count: 0,
                total_records: 0,
            }),
        })
    }

    /// Records written so far, including any still buffered.
    pub fn total_records(&self) -> u64 {
        self.state.lock().total_records
    }

    /// Pull the buffered batch out under the lock; write it without.
    fn take_batch(&self, min_len: usize) -> Option<(u64, Vec<serde_json::Value>)> {
        let mut state = self.state.lock();
        if state.batch.is_empty() || state.batch.len() < min_len {
            return None;
        }
        state.batch_count += 1;
        let number = state.batch_count;
        Some((number, std::mem::take(&mut state.batch)))
    }

    async fn write_batch(&self, number: u64, pages: Vec<serde_json::Value>) -> Result<(), StorageError> {
        let path = self.output_dir.join(format!("batch_{number:04}.json"));
        let envelope = json!({
            "batch": number,
            "count": pages.len(),
            "timestamp": Utc::now().to_rfc3339(),
            "pages": pages,
        });

        let content = if self.pretty {
            serde_json::to_vec_pretty(&envelope)?
        } else {
            serde_json::to_vec(&envelope)?
        };

        let written = path.clone();
        tokio::task::spawn_blocking(move || std::fs::write(&written, content))
            .await
            .map_err(|e| StorageError::Unavailable(format!("write task failed: {e}")))??;

        tracing::debug!(path = %path.display(), "batch written");
        Ok(())
    }
}

#[async_trait]
impl Storage for JsonFileSink {
    async fn save(&self, record: &PageRecord) -> Result<(), StorageError> {
        {
            let mut state = self.state.lock();
            state.batch.push(serde_json::to_value(record)?);
            state.total_records += 1;
        }

        if let Some((number, pages)) = self.take_batch(self.batch_size) {
            self.write_batch(number, pages).await?;
        }
        Ok(())
    }

    async fn flush(&self) -> Result<(), StorageError> {
        if let Some((number, pages)) = self.take_batch(1) {
            self.write_batch(number, pages).await?;
        }
        Ok(())
    }

    fn name(&self) -> &'static str {
        "json-file"
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::storage::tests::sample_record;
    use tempfile::TempDir;

    #[tokio::test]
    async fn flush_writes_partial_batch() {
        let dir = TempDir::new().unwrap();
        let sink = JsonFileSink::new(dir.path().to_path_buf(), 100, false).unwrap();

        sink.save(&sample_record("https://example.com/a")).await.unwrap();
        sink.save(&sample_record("https://example.com/b")).await.unwrap();
        sink.flush().await.unwrap();

        let content = std::fs::read_to_string(dir.path().join("batch_0001.json")).unwrap();
        let envelope: serde_json::Value = serde_json::from_str(&content).unwrap();
        assert_eq!(envelope["batch"], 1);
        assert_eq!(envelope["count"], 2);
        assert_eq!(envelope["pages"].as_array().unwrap().len(), 2);
        assert_eq!(sink.total_records(), 2);
    }

    #[tokio::test]
    async fn full_batches_roll_over_automatically() {
        let dir = TempDir::new().unwrap();
        let sink = JsonFileSink::new(dir.path().to_path_buf(), 2, true).unwrap();

        for i in 0..5 {
            sink.save(&sample_record(&format!("https://example.com/{i}")))
                .await
                .unwrap();
        }
        sink.flush().await.unwrap();

        assert!(dir.path().join("batch_0001.json").exists());
        assert!(dir.path().join("batch_0002.json").exists());
        assert!(dir.path().join("batch_0003.json").exists());
        assert_eq!(sink.total_records(), 5);
    }

    #[tokio::test]
    async fn flush_with_empty_buffer_is_a_no_op() {
        let dir = TempDir::new().unwrap();
        let sink = JsonFileSink::new(dir.path().to_path_buf(), 10, false).unwrap();
        sink.flush().await.unwrap();
        assert_eq!(std::fs::read_dir(dir.path()).unwrap().count(), 0);
    }
}

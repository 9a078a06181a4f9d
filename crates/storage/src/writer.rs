//! Batch writers.
//!
//! `JsonLinesWriter` persists batches as newline-delimited JSON under a
//! `date=<date>/symbol=<symbol>/` layout. `RetryingWriter` wraps any
//! writer with bounded exponential backoff and converts exhaustion into a
//! partition-scoped `StorageWrite` error.

use std::fs;
use std::io::Write as _;
use std::path::{Path, PathBuf};
use std::thread;
use std::time::Duration;

use tickalign_core::config::StorageConfig;
use tickalign_core::{Error, Result};

use crate::batch::{PartitionWriter, RecordBatch};

/// Writes each batch as one NDJSON part file inside its partition
/// directory.
pub struct JsonLinesWriter {
    root: PathBuf,
    parts_written: u64,
}

impl JsonLinesWriter {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self {
            root: root.into(),
            parts_written: 0,
        }
    }

    /// Directory a partition's part files land in.
    pub fn partition_dir(&self, batch: &RecordBatch) -> PathBuf {
        self.root
            .join(format!("date={}", batch.partition.date))
            .join(format!("symbol={}", batch.partition.symbol))
    }

    pub fn root(&self) -> &Path {
        &self.root
    }
}

impl PartitionWriter for JsonLinesWriter {
    fn write_batch(&mut self, batch: &RecordBatch) -> Result<()> {
        let dir = self.partition_dir(batch);
        fs::create_dir_all(&dir)?;
        let path = dir.join(format!(
            "part-{:05}.v{}.jsonl",
            self.parts_written, batch.schema_version
        ));
        let mut buf = Vec::with_capacity(batch.len() * 256);
        for row in &batch.rows {
            serde_json::to_writer(&mut buf, row)?;
            buf.push(b'\n');
        }
        let mut file = fs::File::create(&path)?;
        file.write_all(&buf)?;
        file.sync_all()?;
        self.parts_written += 1;
        tracing::debug!(path = %path.display(), rows = batch.len(), "wrote part file");
        Ok(())
    }
}

/// Bounded-retry wrapper around a writer.
///
/// A transient failure is retried with doubling backoff up to
/// `max_retries` extra attempts; the rest of the session is unaffected
/// either way, since the resulting error names only its partition.
pub struct RetryingWriter<W: PartitionWriter> {
    inner: W,
    max_retries: u32,
    backoff: Duration,
}

impl<W: PartitionWriter> RetryingWriter<W> {
    pub fn new(inner: W, config: &StorageConfig) -> Self {
        Self {
            inner,
            max_retries: config.max_retries,
            backoff: Duration::from_millis(config.retry_backoff_ms),
        }
    }

    pub fn into_inner(self) -> W {
        self.inner
    }
}

impl<W: PartitionWriter> PartitionWriter for RetryingWriter<W> {
    fn write_batch(&mut self, batch: &RecordBatch) -> Result<()> {
        let attempts = self.max_retries + 1;
        let mut delay = self.backoff;
        let mut last_reason = String::new();
        for attempt in 1..=attempts {
            match self.inner.write_batch(batch) {
                Ok(()) => return Ok(()),
                Err(e) => {
                    last_reason = e.to_string();
                    tracing::warn!(
                        partition = %batch.partition,
                        attempt,
                        error = %e,
                        "batch write failed"
                    );
                    if attempt < attempts {
                        thread::sleep(delay);
                        delay *= 2;
                    }
                }
            }
        }
        Err(Error::StorageWrite {
            partition: batch.partition.to_string(),
            attempts,
            reason: last_reason,
        })
    }
}

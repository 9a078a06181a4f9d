//! Per-partition batch staging.
//!
//! Aligned records accumulate in memory per (date, symbol) partition and
//! flush to the writer when a partition reaches the row threshold or its
//! oldest staged row exceeds the flush interval. Rows inside a batch keep
//! their alignment order; a partition is only ever flushed by the thread
//! that owns its builder.

use std::collections::HashMap;
use std::time::{Duration, Instant};

use tickalign_core::config::StorageConfig;
use tickalign_core::{ts_to_date, AlignedRecord, PartitionKey, Result};

use crate::schema::{AlignedRow, SCHEMA_VERSION};

/// One flushed unit of output.
#[derive(Debug, Clone, PartialEq)]
pub struct RecordBatch {
    pub partition: PartitionKey,
    pub schema_version: u32,
    pub rows: Vec<AlignedRow>,
}

impl RecordBatch {
    pub fn len(&self) -> usize {
        self.rows.len()
    }

    pub fn is_empty(&self) -> bool {
        self.rows.is_empty()
    }
}

/// Destination for flushed batches.
pub trait PartitionWriter {
    fn write_batch(&mut self, batch: &RecordBatch) -> Result<()>;
}

/// Counters reported after a run.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct WriteStats {
    pub rows_written: u64,
    pub batches_written: u64,
}

struct Staged {
    rows: Vec<AlignedRow>,
    first_push: Instant,
}

/// Accumulates aligned records and flushes them per partition.
pub struct BatchBuilder<W: PartitionWriter> {
    config: StorageConfig,
    writer: W,
    staged: HashMap<PartitionKey, Staged>,
    stats: WriteStats,
}

impl<W: PartitionWriter> BatchBuilder<W> {
    pub fn new(writer: W, config: StorageConfig) -> Self {
        Self {
            config,
            writer,
            staged: HashMap::new(),
            stats: WriteStats::default(),
        }
    }

    /// Stage one record, flushing its partition if a threshold tripped.
    pub fn push(&mut self, record: &AlignedRecord) -> Result<()> {
        let key = PartitionKey::new(ts_to_date(record.trade.ts_us), &record.trade.symbol);
        let staged = self.staged.entry(key.clone()).or_insert_with(|| Staged {
            rows: Vec::new(),
            first_push: Instant::now(),
        });
        staged.rows.push(AlignedRow::from_record(record));

        let interval = Duration::from_millis(self.config.flush_interval_ms);
        if staged.rows.len() >= self.config.flush_rows || staged.first_push.elapsed() >= interval {
            self.flush_partition(&key)?;
        }
        Ok(())
    }

    /// Flush one partition's staged rows, if any.
    pub fn flush_partition(&mut self, key: &PartitionKey) -> Result<()> {
        let Some(staged) = self.staged.remove(key) else {
            return Ok(());
        };
        if staged.rows.is_empty() {
            return Ok(());
        }
        let batch = RecordBatch {
            partition: key.clone(),
            schema_version: SCHEMA_VERSION,
            rows: staged.rows,
        };
        tracing::debug!(partition = %key, rows = batch.len(), "flushing batch");
        self.writer.write_batch(&batch)?;
        self.stats.rows_written += batch.len() as u64;
        self.stats.batches_written += 1;
        Ok(())
    }

    /// Flush every partition with staged rows, in key order.
    pub fn flush_all(&mut self) -> Result<()> {
        let mut keys: Vec<PartitionKey> = self.staged.keys().cloned().collect();
        keys.sort();
        for key in keys {
            self.flush_partition(&key)?;
        }
        Ok(())
    }

    /// Rows currently staged for a partition.
    pub fn staged_rows(&self, key: &PartitionKey) -> usize {
        self.staged.get(key).map_or(0, |s| s.rows.len())
    }

    pub fn stats(&self) -> WriteStats {
        self.stats
    }

    /// Flush everything and hand the writer back.
    pub fn finish(mut self) -> Result<(W, WriteStats)> {
        self.flush_all()?;
        Ok((self.writer, self.stats))
    }
}

/// In-memory writer, for tests and for pipelines that post-process batches
/// themselves.
#[derive(Debug, Default)]
pub struct MemoryWriter {
    pub batches: Vec<RecordBatch>,
    /// Number of upcoming writes that should fail, for retry testing.
    pub fail_next: u32,
}

impl MemoryWriter {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn failing(fail_next: u32) -> Self {
        Self {
            batches: Vec::new(),
            fail_next,
        }
    }

    pub fn total_rows(&self) -> usize {
        self.batches.iter().map(RecordBatch::len).sum()
    }
}

impl PartitionWriter for MemoryWriter {
    fn write_batch(&mut self, batch: &RecordBatch) -> Result<()> {
        if self.fail_next > 0 {
            self.fail_next -= 1;
            return Err(tickalign_core::Error::Io("injected write failure".to_string()));
        }
        self.batches.push(batch.clone());
        Ok(())
    }
}

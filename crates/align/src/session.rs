//! Parallel alignment of independent (date, symbol) partitions.
//!
//! Partitions never share mutable state, so a session is a plain work
//! queue: worker threads pull partitions off a crossbeam channel, run the
//! alignment engine on each, hand the output to the caller's sink, and
//! report one status per partition. A failed partition is reported and
//! skipped; it never takes down the rest of the session.

use std::num::NonZeroUsize;
use std::thread;

use tickalign_core::config::{MalformedPolicy, SessionConfig};
use tickalign_core::{AlignedRecord, Config, DepthDelta, Error, PartitionKey, Result, TradeEvent};

use crate::engine::AlignmentEngine;

/// One partition's worth of input, already split by (date, symbol).
///
/// Record-scoped errors from the readers travel inline so the engine can
/// count and skip them next to the records they belong to.
#[derive(Debug)]
pub struct PartitionInput {
    pub key: PartitionKey,
    pub trades: Vec<Result<TradeEvent>>,
    pub deltas: Vec<Result<DepthDelta>>,
}

/// Outcome of aligning one partition.
#[derive(Debug, Clone)]
pub struct PartitionStatus {
    pub key: PartitionKey,
    /// Aligned records produced (including any emitted before a failure).
    pub aligned: u64,
    /// Records emitted with reduced confidence.
    pub reduced: u64,
    /// Depth sequence gaps observed.
    pub gaps: u64,
    /// Book reconciliation resets.
    pub reconciliations: u64,
    /// Record-scoped input errors skipped.
    pub skipped_records: u64,
    /// Fatal error, if the partition was aborted.
    pub error: Option<Error>,
}

impl PartitionStatus {
    pub fn ok(&self) -> bool {
        self.error.is_none()
    }
}

/// Per-partition statuses for a whole session, sorted by key.
#[derive(Debug)]
pub struct SessionReport {
    pub partitions: Vec<PartitionStatus>,
}

impl SessionReport {
    pub fn all_ok(&self) -> bool {
        self.partitions.iter().all(PartitionStatus::ok)
    }

    pub fn failed(&self) -> impl Iterator<Item = &PartitionStatus> {
        self.partitions.iter().filter(|p| !p.ok())
    }

    pub fn total_aligned(&self) -> u64 {
        self.partitions.iter().map(|p| p.aligned).sum()
    }
}

/// Runs alignment across partitions on a fixed pool of worker threads.
pub struct SessionRunner {
    workers: usize,
}

impl SessionRunner {
    pub fn new(config: &SessionConfig) -> Self {
        let workers = if config.workers == 0 {
            thread::available_parallelism().map_or(1, NonZeroUsize::get)
        } else {
            config.workers as usize
        };
        Self { workers }
    }

    /// Align every partition, delivering each partition's output to
    /// `sink` as it completes. Completion order is nondeterministic; the
    /// records within each delivery are fully ordered, and the returned
    /// report is sorted by partition key. Workers honor the alignment
    /// settings and the reader's malformed-record policy from `config`.
    pub fn run<F>(&self, partitions: Vec<PartitionInput>, config: &Config, sink: F) -> SessionReport
    where
        F: Fn(&PartitionKey, Vec<AlignedRecord>) + Send + Sync,
    {
        let workers = self.workers.min(partitions.len().max(1));
        let (work_tx, work_rx) = crossbeam_channel::unbounded::<PartitionInput>();
        let (status_tx, status_rx) = crossbeam_channel::unbounded::<PartitionStatus>();
        for input in partitions {
            // unbounded channel; send cannot fail while the receiver lives
            let _ = work_tx.send(input);
        }
        drop(work_tx);

        let sink = &sink;
        thread::scope(|scope| {
            for _ in 0..workers {
                let work_rx = work_rx.clone();
                let status_tx = status_tx.clone();
                scope.spawn(move || {
                    while let Ok(input) = work_rx.recv() {
                        let (records, status) = align_partition(input, config);
                        if !records.is_empty() {
                            sink(&status.key, records);
                        }
                        let _ = status_tx.send(status);
                    }
                });
            }
        });
        drop(status_tx);

        let mut statuses: Vec<PartitionStatus> = status_rx.iter().collect();
        statuses.sort_by(|a, b| a.key.cmp(&b.key));
        for failed in statuses.iter().filter(|s| !s.ok()) {
            tracing::warn!(partition = %failed.key, error = ?failed.error, "partition aborted");
        }
        SessionReport { partitions: statuses }
    }
}

/// Align one partition in isolation. On a fatal error the records already
/// produced are kept and the error lands in the status.
fn align_partition(input: PartitionInput, config: &Config) -> (Vec<AlignedRecord>, PartitionStatus) {
    let PartitionInput { key, trades, deltas } = input;
    let malformed = config.reader.malformed_policy;
    let mut engine =
        AlignmentEngine::new(key.symbol.clone(), deltas.into_iter(), config.alignment.clone())
            .with_malformed_policy(malformed);

    let mut records = Vec::with_capacity(trades.len());
    let mut skipped_trades = 0u64;
    let mut error = None;
    for item in trades {
        match item {
            Ok(trade) => match engine.align(trade) {
                Ok(record) => records.push(record),
                Err(e) => {
                    error = Some(e);
                    break;
                }
            },
            Err(e)
                if e.is_record_scoped()
                    && !(malformed == MalformedPolicy::Abort
                        && matches!(e, Error::MalformedRecord { .. })) =>
            {
                tracing::debug!(partition = %key, %e, "skipping bad trade record");
                skipped_trades += 1;
            }
            Err(e) => {
                error = Some(e);
                break;
            }
        }
    }

    let stats = engine.stats();
    let status = PartitionStatus {
        key,
        aligned: records.len() as u64,
        reduced: stats.reduced,
        gaps: stats.gaps,
        reconciliations: stats.reconciliations,
        skipped_records: stats.skipped_records + skipped_trades,
        error,
    };
    (records, status)
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::BTreeMap;
    use std::sync::Mutex;
    use tickalign_core::{Aggressor, BookSide, DeltaKind};

    fn make_key(symbol: &str) -> PartitionKey {
        PartitionKey::new(
            chrono::NaiveDate::from_ymd_opt(2025, 8, 26).unwrap(),
            symbol,
        )
    }

    fn make_trade(symbol: &str, seq: u64, ts_us: i64) -> Result<TradeEvent> {
        Ok(TradeEvent {
            symbol: symbol.to_string(),
            ts_us,
            price: 100.0,
            size: 1,
            aggressor: Aggressor::Buy,
            sequence: seq,
            rollover: false,
        })
    }

    fn make_delta(symbol: &str, seq: u64, ts_us: i64) -> Result<DepthDelta> {
        Ok(DepthDelta {
            symbol: symbol.to_string(),
            ts_us,
            side: BookSide::Bid,
            price: 100.0,
            size: 10,
            kind: DeltaKind::Insert,
            sequence: seq,
            rollover: false,
        })
    }

    fn partition(symbol: &str, trades: usize) -> PartitionInput {
        PartitionInput {
            key: make_key(symbol),
            trades: (0..trades)
                .map(|i| make_trade(symbol, i as u64, 100 + i as i64 * 10))
                .collect(),
            deltas: vec![make_delta(symbol, 1, 50)],
        }
    }

    #[test]
    fn test_session_aligns_all_partitions() {
        let runner = SessionRunner::new(&SessionConfig { workers: 2 });
        let outputs: Mutex<BTreeMap<PartitionKey, usize>> = Mutex::new(BTreeMap::new());

        let report = runner.run(
            vec![partition("ESU25", 5), partition("NQU25", 3), partition("CLV25", 7)],
            &Config::default(),
            |key, records| {
                outputs.lock().unwrap().insert(key.clone(), records.len());
            },
        );

        assert!(report.all_ok());
        assert_eq!(report.total_aligned(), 15);
        let outputs = outputs.into_inner().unwrap();
        assert_eq!(outputs[&make_key("ESU25")], 5);
        assert_eq!(outputs[&make_key("NQU25")], 3);
        assert_eq!(outputs[&make_key("CLV25")], 7);
    }

    #[test]
    fn test_failed_partition_does_not_poison_others() {
        let mut bad = partition("NQU25", 2);
        bad.trades
            .push(Err(Error::format("NQU25.scid", "bad magic")));

        let runner = SessionRunner::new(&SessionConfig { workers: 2 });
        let report = runner.run(
            vec![partition("ESU25", 4), bad],
            &Config::default(),
            |_, _| {},
        );

        assert!(!report.all_ok());
        let failed: Vec<_> = report.failed().collect();
        assert_eq!(failed.len(), 1);
        assert_eq!(failed[0].key.symbol, "NQU25");
        // records before the failure are still counted
        assert_eq!(failed[0].aligned, 2);
        let good = report
            .partitions
            .iter()
            .find(|p| p.key.symbol == "ESU25")
            .unwrap();
        assert!(good.ok());
        assert_eq!(good.aligned, 4);
    }

    #[test]
    fn test_skipped_trade_records_counted_in_status() {
        let mut input = partition("ESU25", 1);
        input.trades.push(Err(Error::malformed(96, "bad price")));
        input.trades.push(make_trade("ESU25", 5, 900));

        let runner = SessionRunner::new(&SessionConfig { workers: 1 });
        let report = runner.run(vec![input], &Config::default(), |_, _| {});

        let status = &report.partitions[0];
        assert!(status.ok());
        assert_eq!(status.aligned, 2);
        assert_eq!(status.skipped_records, 1);
    }

    #[test]
    fn test_abort_policy_fails_partition_on_malformed() {
        let mut bad = partition("NQU25", 1);
        bad.trades.push(Err(Error::malformed(136, "bad price")));
        bad.trades.push(make_trade("NQU25", 5, 900));

        let mut config = Config::default();
        config.reader.malformed_policy = MalformedPolicy::Abort;
        let runner = SessionRunner::new(&SessionConfig { workers: 1 });
        let report = runner.run(vec![partition("ESU25", 2), bad], &config, |_, _| {});

        let failed: Vec<_> = report.failed().collect();
        assert_eq!(failed.len(), 1);
        assert_eq!(failed[0].key.symbol, "NQU25");
        assert!(matches!(
            failed[0].error,
            Some(Error::MalformedRecord { offset: 136, .. })
        ));
        // the record before the bad one still made it out
        assert_eq!(failed[0].aligned, 1);
        assert!(report
            .partitions
            .iter()
            .find(|p| p.key.symbol == "ESU25")
            .unwrap()
            .ok());
    }

    #[test]
    fn test_report_sorted_by_key() {
        let runner = SessionRunner::new(&SessionConfig { workers: 3 });
        let report = runner.run(
            vec![partition("NQU25", 1), partition("CLV25", 1), partition("ESU25", 1)],
            &Config::default(),
            |_, _| {},
        );
        let symbols: Vec<_> = report
            .partitions
            .iter()
            .map(|p| p.key.symbol.as_str())
            .collect();
        assert_eq!(symbols, vec!["CLV25", "ESU25", "NQU25"]);
    }

    #[test]
    fn test_zero_workers_defaults_to_parallelism() {
        let runner = SessionRunner::new(&SessionConfig { workers: 0 });
        assert!(runner.workers >= 1);
    }
}

//! Per-symbol alignment of trades with reconstructed book state.
//!
//! The engine performs an ordered merge of one symbol's trade stream and
//! depth-delta stream by (timestamp, sequence). For each trade it drives
//! the reconstructor forward through every delta that precedes the trade
//! under the configured tie-break convention, snapshots the book, and
//! emits exactly one aligned record. Degraded conditions (sequence gaps,
//! clock skew beyond tolerance, unsynced books) reduce the record's
//! confidence; they never drop the trade.

use std::iter::Peekable;
use tickalign_book::Reconstructor;
use tickalign_core::config::{AlignmentConfig, MalformedPolicy, TieBreak};
use tickalign_core::{
    AlignedRecord, AlignmentMeta, Confidence, DepthDelta, Error, Result, Sequence, TimestampUs,
    TradeEvent,
};

/// Running statistics for one symbol's alignment.
#[derive(Debug, Clone, Default)]
pub struct AlignStats {
    /// Aligned records emitted.
    pub aligned: u64,
    /// Records emitted with reduced confidence.
    pub reduced: u64,
    /// Sequence gaps observed in the depth stream.
    pub gaps: u64,
    /// Book reconciliation resets.
    pub reconciliations: u64,
    /// Record-scoped input errors skipped (malformed, duplicates).
    pub skipped_records: u64,
}

/// Aligns one symbol's trades against its depth-delta stream.
pub struct AlignmentEngine<D>
where
    D: Iterator<Item = Result<DepthDelta>>,
{
    config: AlignmentConfig,
    malformed_policy: MalformedPolicy,
    book: Reconstructor,
    deltas: Peekable<D>,
    last_out: Option<(TimestampUs, Sequence)>,
    stats: AlignStats,
}

impl<D> AlignmentEngine<D>
where
    D: Iterator<Item = Result<DepthDelta>>,
{
    pub fn new(symbol: impl Into<String>, deltas: D, config: AlignmentConfig) -> Self {
        Self {
            config,
            malformed_policy: MalformedPolicy::SkipAndLog,
            book: Reconstructor::new(symbol),
            deltas: deltas.peekable(),
            last_out: None,
            stats: AlignStats::default(),
        }
    }

    /// Override the handling of undecodable records. `SkipAndLog` (the
    /// default) counts them and keeps going; `Abort` fails the partition
    /// at the first one.
    pub fn with_malformed_policy(mut self, policy: MalformedPolicy) -> Self {
        self.malformed_policy = policy;
        self
    }

    /// Align a single trade, producing its record.
    ///
    /// Trades must arrive in (timestamp, sequence) order; anything else is
    /// an `UnorderedInput` error for the partition.
    pub fn align(&mut self, trade: TradeEvent) -> Result<AlignedRecord> {
        if let Some((ts, seq)) = self.last_out {
            if (trade.ts_us, trade.sequence) <= (ts, seq) {
                return Err(Error::UnorderedInput {
                    symbol: trade.symbol.clone(),
                    sequence: trade.sequence,
                });
            }
        }

        self.advance_book(trade.ts_us)?;

        // deltas applied under the tolerance window may sit slightly past
        // the trade's clock; the snapshot instant recorded on the record
        // is still the trade's own timestamp (no look-ahead in as_of)
        let book_at = self.book.last_ts_us();
        let query_ts = book_at.map_or(trade.ts_us, |t| t.max(trade.ts_us));
        let mut snapshot = self
            .book
            .snapshot(query_ts, self.config.depth_levels)?;
        snapshot.as_of_us = trade.ts_us;

        let skew_us = book_at.map_or(0, |t| trade.ts_us - t);
        let book_synced = snapshot.status == tickalign_core::SyncStatus::Synced;
        let confidence = if !book_synced
            || book_at.is_none()
            || skew_us.abs() > self.config.max_staleness_us
        {
            Confidence::Reduced
        } else {
            Confidence::Full
        };
        if confidence == Confidence::Reduced {
            self.stats.reduced += 1;
        }
        self.stats.aligned += 1;
        self.last_out = Some((trade.ts_us, trade.sequence));

        Ok(AlignedRecord {
            trade,
            book: snapshot,
            meta: AlignmentMeta {
                confidence,
                skew_us,
                book_synced,
            },
        })
    }

    /// Align a whole trade stream. Record-scoped trade errors are skipped
    /// and counted (or abort the partition under `MalformedPolicy::Abort`);
    /// stream-scoped errors always abort.
    pub fn align_all<T>(&mut self, trades: T) -> Result<Vec<AlignedRecord>>
    where
        T: IntoIterator<Item = Result<TradeEvent>>,
    {
        let mut out = Vec::new();
        for item in trades {
            match item {
                Ok(trade) => out.push(self.align(trade)?),
                Err(e) if e.is_record_scoped() => self.skip_record(e)?,
                Err(e) => return Err(e),
            }
        }
        Ok(out)
    }

    /// Apply the malformed-record policy to a record-scoped error.
    fn skip_record(&mut self, e: Error) -> Result<()> {
        if self.malformed_policy == MalformedPolicy::Abort
            && matches!(e, Error::MalformedRecord { .. })
        {
            return Err(e);
        }
        tracing::debug!(%e, "skipping bad record");
        self.stats.skipped_records += 1;
        Ok(())
    }

    /// Apply every delta that precedes `trade_ts` under the tie-break
    /// convention: strictly earlier deltas always apply; deltas within the
    /// skew-tolerance window of the trade are simultaneous, and apply
    /// first only under `DepthFirst`.
    fn advance_book(&mut self, trade_ts: TimestampUs) -> Result<()> {
        let horizon = match self.config.tie_break {
            TieBreak::DepthFirst => trade_ts.saturating_add(self.config.skew_tolerance_us),
            TieBreak::TradeFirst => trade_ts.saturating_sub(1),
        };
        loop {
            match self.deltas.peek() {
                Some(Ok(delta)) if delta.ts_us <= horizon => {
                    let delta = match self.deltas.next() {
                        Some(Ok(d)) => d,
                        _ => unreachable!(),
                    };
                    use tickalign_book::ApplyOutcome::*;
                    match self.book.apply(&delta) {
                        Applied | Resynced => {}
                        GapDetected => self.stats.gaps += 1,
                        Reconciled => self.stats.reconciliations += 1,
                    }
                }
                Some(Err(_)) => {
                    let e = match self.deltas.next() {
                        Some(Err(e)) => e,
                        _ => unreachable!(),
                    };
                    self.skip_record(e)?;
                }
                _ => break,
            }
        }
        Ok(())
    }

    /// Statistics accumulated so far.
    pub fn stats(&self) -> &AlignStats {
        &self.stats
    }

    /// Book-level statistics (gaps, reconciliations, snapshot resets).
    pub fn book_stats(&self) -> &tickalign_book::BookStats {
        self.book.stats()
    }
}

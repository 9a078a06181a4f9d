//! Bounded intake queue between live ingestion and alignment.
//!
//! The adapter is a bounded MPMC channel with an explicit saturation
//! policy. `Block` holds the producer until the consumer catches up;
//! `DropOldest` evicts the oldest queued event and counts the loss, so a
//! stalled consumer degrades visibly instead of silently. Closing every
//! intake handle ends the stream; buffered events still drain first.

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use crossbeam_channel::{Receiver, Sender, TrySendError};
use tickalign_core::config::{BackpressurePolicy, StreamConfig};
use tickalign_core::{Error, EventSource, MarketEvent, Result};

/// Producer side of the intake queue. Cloneable; the stream ends when the
/// last clone is dropped.
#[derive(Clone)]
pub struct IntakeHandle {
    tx: Sender<MarketEvent>,
    // eviction tap, held only under the drop-oldest policy; under Block it
    // must be absent so a vanished consumer disconnects the channel
    evict_rx: Option<Receiver<MarketEvent>>,
    dropped: Arc<AtomicU64>,
}

/// Consumer side of the intake queue.
pub struct StreamSource {
    rx: Receiver<MarketEvent>,
    dropped: Arc<AtomicU64>,
}

/// Build a bounded intake queue with the configured saturation policy.
pub fn bounded(config: &StreamConfig) -> (IntakeHandle, StreamSource) {
    let (tx, rx) = crossbeam_channel::bounded(config.queue_capacity);
    let dropped = Arc::new(AtomicU64::new(0));
    let evict_rx = match config.backpressure {
        BackpressurePolicy::Block => None,
        BackpressurePolicy::DropOldest => Some(rx.clone()),
    };
    let handle = IntakeHandle {
        tx,
        evict_rx,
        dropped: Arc::clone(&dropped),
    };
    let source = StreamSource { rx, dropped };
    (handle, source)
}

impl IntakeHandle {
    /// Enqueue one event.
    ///
    /// Under `Block` this waits for queue space. Under `DropOldest` it
    /// never waits: when the queue is full the oldest queued event is
    /// evicted and counted, and the new event goes in.
    pub fn push(&self, event: MarketEvent) -> Result<()> {
        let Some(evict_rx) = &self.evict_rx else {
            return self
                .tx
                .send(event)
                .map_err(|_| Error::Io("stream consumer disconnected".to_string()));
        };
        let mut event = event;
        loop {
            match self.tx.try_send(event) {
                Ok(()) => return Ok(()),
                Err(TrySendError::Full(back)) => {
                    if evict_rx.try_recv().is_ok() {
                        let total = self.dropped.fetch_add(1, Ordering::Relaxed) + 1;
                        tracing::warn!(total, "intake queue full, evicted oldest event");
                    }
                    event = back;
                }
                Err(TrySendError::Disconnected(_)) => {
                    return Err(Error::Io("stream consumer disconnected".to_string()))
                }
            }
        }
    }

    /// Events evicted so far under `DropOldest`.
    pub fn dropped(&self) -> u64 {
        self.dropped.load(Ordering::Relaxed)
    }

    /// Events currently queued.
    pub fn queued(&self) -> usize {
        self.tx.len()
    }
}

impl StreamSource {
    /// Blocking receive. `None` once every intake handle is gone and the
    /// queue has drained.
    pub fn recv(&self) -> Option<MarketEvent> {
        self.rx.recv().ok()
    }

    /// Non-blocking receive.
    pub fn try_recv(&self) -> Option<MarketEvent> {
        self.rx.try_recv().ok()
    }

    /// Events evicted so far under `DropOldest`.
    pub fn dropped(&self) -> u64 {
        self.dropped.load(Ordering::Relaxed)
    }
}

impl EventSource for StreamSource {
    fn next_event(&mut self) -> Option<Result<MarketEvent>> {
        self.recv().map(Ok)
    }
}

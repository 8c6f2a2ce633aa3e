use std::sync::atomic::{AtomicU64, Ordering};

use prometheus::IntCounter;

use crate::metrics;

/// Per-subscription counters. Cumulative across instances and reconnects.
#[derive(Debug, Default)]
pub struct SyncCounters {
    frames: AtomicU64,
    operations_applied: AtomicU64,
    snapshots: AtomicU64,
    decode_errors: AtomicU64,
    apply_errors: AtomicU64,
    noop_removes: AtomicU64,
    stale_frames: AtomicU64,
    reconnects: AtomicU64,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct CounterSnapshot {
    pub frames: u64,
    pub operations_applied: u64,
    pub snapshots: u64,
    pub decode_errors: u64,
    pub apply_errors: u64,
    pub noop_removes: u64,
    pub stale_frames: u64,
    pub reconnects: u64,
}

impl SyncCounters {
    pub fn snapshot(&self) -> CounterSnapshot {
        let load = |counter: &AtomicU64| counter.load(Ordering::Relaxed);
        CounterSnapshot {
            frames: load(&self.frames),
            operations_applied: load(&self.operations_applied),
            snapshots: load(&self.snapshots),
            decode_errors: load(&self.decode_errors),
            apply_errors: load(&self.apply_errors),
            noop_removes: load(&self.noop_removes),
            stale_frames: load(&self.stale_frames),
            reconnects: load(&self.reconnects),
        }
    }
}

/// Bumps the local counters together with the process-wide prometheus series
/// for one endpoint.
#[derive(Debug, Clone)]
pub(crate) struct Recorder {
    frames: IntCounter,
    operations_applied: IntCounter,
    snapshots: IntCounter,
    decode_errors: IntCounter,
    apply_errors: IntCounter,
    noop_removes: IntCounter,
    stale_frames: IntCounter,
    reconnects: IntCounter,
}

impl Recorder {
    pub(crate) fn new(endpoint: &str) -> Self {
        let labels = [endpoint];
        Self {
            frames: metrics::FRAMES_RECEIVED.with_label_values(&labels),
            operations_applied: metrics::OPERATIONS_APPLIED.with_label_values(&labels),
            snapshots: metrics::SNAPSHOTS.with_label_values(&labels),
            decode_errors: metrics::DECODE_ERRORS.with_label_values(&labels),
            apply_errors: metrics::APPLY_ERRORS.with_label_values(&labels),
            noop_removes: metrics::NOOP_REMOVES.with_label_values(&labels),
            stale_frames: metrics::STALE_FRAMES.with_label_values(&labels),
            reconnects: metrics::RECONNECTS.with_label_values(&labels),
        }
    }

    pub(crate) fn frame(&self, counters: &SyncCounters) {
        counters.frames.fetch_add(1, Ordering::Relaxed);
        self.frames.inc();
    }

    pub(crate) fn applied(&self, counters: &SyncCounters) {
        counters.operations_applied.fetch_add(1, Ordering::Relaxed);
        self.operations_applied.inc();
    }

    pub(crate) fn snapshot(&self, counters: &SyncCounters) {
        counters.snapshots.fetch_add(1, Ordering::Relaxed);
        self.snapshots.inc();
    }

    pub(crate) fn decode_error(&self, counters: &SyncCounters) {
        counters.decode_errors.fetch_add(1, Ordering::Relaxed);
        self.decode_errors.inc();
    }

    pub(crate) fn apply_error(&self, counters: &SyncCounters) {
        counters.apply_errors.fetch_add(1, Ordering::Relaxed);
        self.apply_errors.inc();
    }

    pub(crate) fn noop_remove(&self, counters: &SyncCounters) {
        counters.noop_removes.fetch_add(1, Ordering::Relaxed);
        self.noop_removes.inc();
    }

    pub(crate) fn stale_frame(&self, counters: &SyncCounters) {
        counters.stale_frames.fetch_add(1, Ordering::Relaxed);
        self.stale_frames.inc();
    }

    pub(crate) fn reconnect(&self, counters: &SyncCounters) {
        counters.reconnects.fetch_add(1, Ordering::Relaxed);
        self.reconnects.inc();
    }
}

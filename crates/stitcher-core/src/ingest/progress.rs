//! Advisory change notifications. Producers never block on them.

use crate::types::EntityId;
use crossbeam_channel::{bounded, Receiver, Sender, TrySendError};
use serde::Serialize;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

pub const DEFAULT_PROGRESS_CAPACITY: usize = 1024;

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "event", rename_all = "kebab-case")]
pub enum ProgressEvent {
    EntityAdded {
        source: String,
        entity: EntityId,
        ordinal: u64,
    },
    Error {
        source: Option<String>,
        ordinal: Option<u64>,
        message: String,
    },
}

/// Sending half of a progress channel.
#[derive(Debug, Clone)]
pub struct ProgressSink {
    tx: Sender<ProgressEvent>,
    dropped: Arc<AtomicU64>,
}

/// Bounded progress channel.
pub fn channel(capacity: usize) -> (ProgressSink, Receiver<ProgressEvent>) {
    let (tx, rx) = bounded(capacity.max(1));
    (
        ProgressSink {
            tx,
            dropped: Arc::new(AtomicU64::new(0)),
        },
        rx,
    )
}

impl ProgressSink {
    /// Non-blocking enqueue. A full or disconnected channel counts a drop.
    pub fn send(&self, event: ProgressEvent) {
        match self.tx.try_send(event) {
            Ok(()) => {}
            Err(TrySendError::Full(_)) | Err(TrySendError::Disconnected(_)) => {
                self.dropped.fetch_add(1, Ordering::Relaxed);
            }
        }
    }

    #[must_use]
    pub fn dropped(&self) -> u64 {
        self.dropped.load(Ordering::Relaxed)
    }
}

/// Running counters of one job.
#[derive(Debug, Default)]
pub struct JobCounters {
    count: AtomicU64,
    error: AtomicU64,
    total: AtomicU64,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct CounterSnapshot {
    pub count: u64,
    pub error: u64,
    pub total: u64,
}

impl JobCounters {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn record_added(&self) {
        self.count.fetch_add(1, Ordering::Relaxed);
        self.total.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_error(&self) {
        self.error.fetch_add(1, Ordering::Relaxed);
        self.total.fetch_add(1, Ordering::Relaxed);
    }

    pub fn snapshot(&self) -> CounterSnapshot {
        CounterSnapshot {
            count: self.count.load(Ordering::Relaxed),
            error: self.error.load(Ordering::Relaxed),
            total: self.total.load(Ordering::Relaxed),
        }
    }
}

/// Where an ingestion pass reports to. Both parts are optional.
#[derive(Debug, Clone, Default)]
pub struct Progress {
    pub sink: Option<ProgressSink>,
    pub counters: Option<Arc<JobCounters>>,
}

impl Progress {
    pub fn none() -> Self {
        Self::default()
    }

    pub fn with_sink(mut self, sink: ProgressSink) -> Self {
        self.sink = Some(sink);
        self
    }

    pub fn with_counters(mut self, counters: Arc<JobCounters>) -> Self {
        self.counters = Some(counters);
        self
    }

    pub(crate) fn added(&self, source: &str, entity: EntityId, ordinal: u64) {
        if let Some(counters) = &self.counters {
            counters.record_added();
        }
        if let Some(sink) = &self.sink {
            sink.send(ProgressEvent::EntityAdded {
                source: source.to_string(),
                entity,
                ordinal,
            });
        }
    }

    pub(crate) fn error(&self, source: Option<&str>, ordinal: Option<u64>, message: impl Into<String>) {
        if let Some(counters) = &self.counters {
            counters.record_error();
        }
        if let Some(sink) = &self.sink {
            sink.send(ProgressEvent::Error {
                source: source.map(str::to_string),
                ordinal,
                message: message.into(),
            });
        }
    }
}

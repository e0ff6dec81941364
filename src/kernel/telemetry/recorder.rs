use std::collections::VecDeque;
use std::sync::{Arc, Mutex, PoisonError};

use super::event::AccessEvent;
use super::metrics::{compute_snapshot, TelemetrySnapshot};

const MAX_EVENTS: usize = 10_000;

#[derive(Debug)]
pub struct TelemetryRecorder {
    buffer: VecDeque<AccessEvent>,
}

impl Default for TelemetryRecorder {
    fn default() -> Self {
        Self::new()
    }
}

impl TelemetryRecorder {
    pub fn new() -> Self {
        Self {
            buffer: VecDeque::with_capacity(MAX_EVENTS),
        }
    }

    pub fn record(&mut self, event: AccessEvent) {
        if self.buffer.len() >= MAX_EVENTS {
            self.buffer.pop_front();
        }
        self.buffer.push_back(event);
    }

    pub fn snapshot(&self) -> TelemetrySnapshot {
        compute_snapshot(&self.buffer)
    }

    pub fn len(&self) -> usize {
        self.buffer.len()
    }

    pub fn is_empty(&self) -> bool {
        self.buffer.is_empty()
    }

    pub fn clear(&mut self) {
        self.buffer.clear();
    }
}

/// Recorder shared between the annotator task and query callers.
#[derive(Debug, Clone, Default)]
pub struct SharedTelemetry {
    inner: Arc<Mutex<TelemetryRecorder>>,
}

impl SharedTelemetry {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn record(&self, event: AccessEvent) {
        self.inner
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .record(event);
    }

    pub fn snapshot(&self) -> TelemetrySnapshot {
        self.inner
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .snapshot()
    }
}

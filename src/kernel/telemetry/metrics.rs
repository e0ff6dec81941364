use std::collections::VecDeque;

use serde::Serialize;

use super::event::{AccessEvent, AccessPath};

#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct TelemetrySnapshot {
    pub background: BackgroundStats,
    pub foreground: ForegroundStats,
    pub resets: u64,
    pub current_generation: u64,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct BackgroundStats {
    pub appended: u64,
    pub skipped: u64,
    pub busy: u64,
    pub capture_failures: u64,
    pub failures: u64,
    pub timeouts: u64,
    /// Share of attempted appends that lost to contention (skipped + busy).
    pub contention_ratio: f64,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct ForegroundStats {
    pub answered: u64,
    pub failures: u64,
    pub timeouts: u64,
}

pub fn compute_snapshot(events: &VecDeque<AccessEvent>) -> TelemetrySnapshot {
    let mut snap = TelemetrySnapshot::default();

    for event in events {
        match event {
            AccessEvent::Appended { generation } => {
                snap.background.appended += 1;
                snap.current_generation = snap.current_generation.max(*generation);
            }
            AccessEvent::Skipped => snap.background.skipped += 1,
            AccessEvent::Busy => snap.background.busy += 1,
            AccessEvent::CaptureFailed => snap.background.capture_failures += 1,
            AccessEvent::Answered { generation } => {
                snap.foreground.answered += 1;
                snap.current_generation = snap.current_generation.max(*generation);
            }
            AccessEvent::Failed { path, .. } => match path {
                AccessPath::Background => snap.background.failures += 1,
                AccessPath::Foreground => snap.foreground.failures += 1,
            },
            AccessEvent::TimedOut { path } => match path {
                AccessPath::Background => snap.background.timeouts += 1,
                AccessPath::Foreground => snap.foreground.timeouts += 1,
            },
            AccessEvent::Reset { generation } => {
                snap.resets += 1;
                snap.current_generation = snap.current_generation.max(*generation);
            }
        }
    }

    let contended = snap.background.skipped + snap.background.busy;
    let attempted = contended + snap.background.appended + snap.background.failures + snap.background.timeouts;
    if attempted > 0 {
        snap.background.contention_ratio = contended as f64 / attempted as f64;
    }

    snap
}

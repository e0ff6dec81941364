use serde::{Deserialize, Serialize};

/// Which discipline an access went through.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum AccessPath {
    /// Annotator appends (best-effort).
    Background,
    /// Interactive queries (guaranteed).
    Foreground,
}

// Allowed: generations, outcome kinds, paths
// Forbidden: frame bytes, descriptions, questions, answers

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum AccessEvent {
    Appended { generation: u64 },
    Skipped,
    Busy,
    CaptureFailed,
    Answered { generation: u64 },
    Failed { path: AccessPath, capacity_exceeded: bool },
    TimedOut { path: AccessPath },
    Reset { generation: u64 },
}

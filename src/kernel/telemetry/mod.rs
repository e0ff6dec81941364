//! Arbitration telemetry.
//!
//! # SAFETY INVARIANT
//! Telemetry is a READ-ONLY side-effect layer.
//! It must **NEVER** be read inside decision logic (Arbiter, Annotator, QueryService).
//! It exists solely for observability and verification.
//!
//! # PRIVACY INVARIANT
//! Telemetry events must **NEVER** contain user content (questions, answers, frames).
//! Only session generations and outcome kinds are allowed.

pub mod event;
pub mod metrics;
pub mod recorder;

pub use event::{AccessEvent, AccessPath};
pub use metrics::TelemetrySnapshot;
pub use recorder::{SharedTelemetry, TelemetryRecorder};

//! Arbitration core: one shared session, a background producer and an
//! interactive consumer.

pub mod annotator;
pub mod arbiter;
pub mod lifecycle;
pub mod query;
pub mod session;
pub mod telemetry;

pub use annotator::{Annotator, AnnotatorHandle, AnnotatorPhase, Observation, ObservationSink};
pub use arbiter::Arbiter;
pub use lifecycle::{SessionHandle, SessionLifecycle};
pub use query::QueryService;
pub use session::{ChatSession, SessionFactory};

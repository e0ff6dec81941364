use std::sync::Arc;

use tracing::{debug, info, warn};

use super::arbiter::Arbiter;
use super::lifecycle::SessionLifecycle;
use super::telemetry::{AccessEvent, AccessPath, SharedTelemetry};
use crate::error::{AccessError, QueryError, SessionError};

/// Foreground consumer. Questions wait for the session and are never dropped.
pub struct QueryService {
    arbiter: Arc<Arbiter>,
    lifecycle: Arc<SessionLifecycle>,
    telemetry: SharedTelemetry,
}

impl QueryService {
    pub fn new(arbiter: Arc<Arbiter>, lifecycle: Arc<SessionLifecycle>) -> Self {
        Self {
            arbiter,
            lifecycle,
            telemetry: SharedTelemetry::new(),
        }
    }

    pub fn with_telemetry(mut self, telemetry: SharedTelemetry) -> Self {
        self.telemetry = telemetry;
        self
    }

    /// Answers `question` from everything appended to the current session.
    ///
    /// On `CapacityExceeded` the session that failed is reset before the error
    /// is returned, so asking again starts from a clean context. If that
    /// session was already replaced, the current one is left alone.
    pub async fn ask(&self, question: &str) -> Result<String, QueryError> {
        if question.trim().is_empty() {
            return Err(QueryError::EmptyQuestion);
        }

        let lifecycle = &self.lifecycle;
        let mut used = None;
        let slot = &mut used;
        let outcome = self
            .arbiter
            .run_guaranteed(|| async move {
                // Resolved under the gate so a reset while we queued is honoured.
                let handle = lifecycle.current();
                *slot = Some(handle.clone());
                let answer = handle.query(question).await?;
                Ok::<_, SessionError>((answer, handle.generation()))
            })
            .await;

        match outcome {
            Ok((answer, generation)) => {
                debug!(generation, "Query answered");
                self.telemetry.record(AccessEvent::Answered { generation });
                Ok(answer)
            }
            Err(AccessError::TimedOut(deadline)) => {
                warn!(?deadline, "Query timed out");
                self.telemetry.record(AccessEvent::TimedOut { path: AccessPath::Foreground });
                Err(QueryError::TimedOut(deadline))
            }
            Err(AccessError::Failed(source)) => {
                let capacity_exceeded = source.is_capacity_exceeded();
                warn!(error = %source, "Query failed");
                self.telemetry.record(AccessEvent::Failed {
                    path: AccessPath::Foreground,
                    capacity_exceeded,
                });
                let fresh = match used {
                    Some(failed) if capacity_exceeded => self.lifecycle.reset_if_current(&failed),
                    _ => None,
                };
                if let Some(fresh) = &fresh {
                    info!(generation = fresh.generation(), "Context exhausted; session reset");
                    self.telemetry.record(AccessEvent::Reset { generation: fresh.generation() });
                }
                let context_cleared = fresh.is_some();
                Err(QueryError::Session { source, context_cleared })
            }
        }
    }
}

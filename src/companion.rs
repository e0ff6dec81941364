use std::sync::Arc;
use std::time::Duration;

use tracing::info;

use crate::config::LookoutConfig;
use crate::error::{AnnotatorError, QueryError};
use crate::kernel::annotator::{Annotator, AnnotatorHandle, Observation, ObservationSink};
use crate::kernel::arbiter::Arbiter;
use crate::kernel::lifecycle::SessionLifecycle;
use crate::kernel::query::QueryService;
use crate::kernel::session::SessionFactory;
use crate::kernel::telemetry::{AccessEvent, SharedTelemetry, TelemetrySnapshot};
use crate::transcript::Transcript;
use crate::vision::FrameSource;

pub const MEMORY_CLEARED_NOTICE: &str =
    "Memory cleared: the conversation ran out of context and was restarted. Earlier observations are gone.";

const MANUAL_RESET_NOTICE: &str = "Memory cleared.";

/// Routes annotator output into the transcript.
struct TranscriptSink {
    transcript: Arc<dyn Transcript>,
}

impl ObservationSink for TranscriptSink {
    fn on_observation(&self, observation: Observation) {
        self.transcript.on_observation(&observation.text);
    }

    fn on_memory_cleared(&self) {
        self.transcript.on_system_message(MEMORY_CLEARED_NOTICE);
    }
}

/// The layer a front end talks to: one session, one arbiter, one transcript.
pub struct Companion {
    arbiter: Arc<Arbiter>,
    lifecycle: Arc<SessionLifecycle>,
    queries: QueryService,
    transcript: Arc<dyn Transcript>,
    telemetry: SharedTelemetry,
    observe_prompt: String,
}

impl Companion {
    pub fn new(factory: Arc<dyn SessionFactory>, transcript: Arc<dyn Transcript>, config: &LookoutConfig) -> Self {
        let arbiter = Arc::new(Arbiter::new(config.access_deadline()));
        let lifecycle = Arc::new(SessionLifecycle::new(factory));
        let telemetry = SharedTelemetry::new();
        let queries = QueryService::new(arbiter.clone(), lifecycle.clone()).with_telemetry(telemetry.clone());

        Self {
            arbiter,
            lifecycle,
            queries,
            transcript,
            telemetry,
            observe_prompt: config.observe_prompt.clone(),
        }
    }

    pub fn start_annotator(
        &self,
        source: Arc<dyn FrameSource>,
        interval: Duration,
    ) -> Result<AnnotatorHandle, AnnotatorError> {
        let sink = Arc::new(TranscriptSink {
            transcript: self.transcript.clone(),
        });
        Annotator::new(self.arbiter.clone(), self.lifecycle.clone(), source, sink)
            .with_prompt(self.observe_prompt.clone())
            .with_telemetry(self.telemetry.clone())
            .start(interval)
    }

    /// Records the exchange in the transcript around [`QueryService::ask`].
    pub async fn ask(&self, question: &str) -> Result<String, QueryError> {
        if !question.trim().is_empty() {
            self.transcript.on_user_message(question);
        }

        let result = self.queries.ask(question).await;
        match &result {
            Ok(answer) => self.transcript.on_assistant_message(answer),
            Err(QueryError::EmptyQuestion) => {}
            Err(e) if e.context_cleared() => {
                self.transcript.on_system_message(&format!("Error: {}", e));
                self.transcript.on_system_message(MEMORY_CLEARED_NOTICE);
            }
            Err(e) => self.transcript.on_system_message(&format!("Error: {}", e)),
        }
        result
    }

    /// Drops everything observed so far and starts a fresh session.
    pub fn reset(&self) {
        let fresh = self.lifecycle.reset();
        info!(generation = fresh.generation(), "Memory cleared on request");
        self.telemetry.record(AccessEvent::Reset {
            generation: fresh.generation(),
        });
        self.transcript.on_system_message(MANUAL_RESET_NOTICE);
    }

    pub fn usage_count(&self) -> u64 {
        self.lifecycle.usage_count()
    }

    pub fn lifecycle(&self) -> &Arc<SessionLifecycle> {
        &self.lifecycle
    }

    pub fn arbiter(&self) -> &Arc<Arbiter> {
        &self.arbiter
    }

    pub fn telemetry(&self) -> TelemetrySnapshot {
        self.telemetry.snapshot()
    }
}

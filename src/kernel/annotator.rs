use std::sync::Arc;
use std::time::Duration;

use tokio::sync::watch;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use super::arbiter::Arbiter;
use super::lifecycle::SessionLifecycle;
use super::telemetry::{AccessEvent, AccessPath, SharedTelemetry};
use crate::error::{AnnotatorError, SessionError, TryAccessError};
use crate::vision::FrameSource;

pub const DEFAULT_INTERVAL: Duration = Duration::from_secs(1);

pub const DEFAULT_OBSERVE_PROMPT: &str =
    "Describe what is visible in this frame in one or two sentences. Note anything that changed.";

/// One description produced by a successful append.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Observation {
    /// 1-based position in the annotator's output stream.
    pub ordinal: u64,
    pub text: String,
    /// Generation of the session that produced the description.
    pub generation: u64,
}

/// Receives the annotator's output. Called from the annotator task.
pub trait ObservationSink: Send + Sync {
    fn on_observation(&self, observation: Observation);

    /// The session was reset after running out of context.
    fn on_memory_cleared(&self) {}
}

impl<F> ObservationSink for F
where
    F: Fn(Observation) + Send + Sync,
{
    fn on_observation(&self, observation: Observation) {
        self(observation)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AnnotatorPhase {
    Waiting,
    Capturing,
    Appending,
    Stopped,
}

/// Background producer: wait, capture, best-effort append, report. Forever.
///
/// Contention and failures only cost the current frame; the frame is dropped,
/// never queued, since a description is only worth something while it is fresh.
pub struct Annotator {
    arbiter: Arc<Arbiter>,
    lifecycle: Arc<SessionLifecycle>,
    source: Arc<dyn FrameSource>,
    sink: Arc<dyn ObservationSink>,
    prompt: String,
    telemetry: SharedTelemetry,
}

impl Annotator {
    pub fn new(
        arbiter: Arc<Arbiter>,
        lifecycle: Arc<SessionLifecycle>,
        source: Arc<dyn FrameSource>,
        sink: Arc<dyn ObservationSink>,
    ) -> Self {
        Self {
            arbiter,
            lifecycle,
            source,
            sink,
            prompt: DEFAULT_OBSERVE_PROMPT.to_string(),
            telemetry: SharedTelemetry::new(),
        }
    }

    pub fn with_prompt(mut self, prompt: impl Into<String>) -> Self {
        self.prompt = prompt.into();
        self
    }

    pub fn with_telemetry(mut self, telemetry: SharedTelemetry) -> Self {
        self.telemetry = telemetry;
        self
    }

    /// Spawns the loop on the current runtime.
    pub fn start(self, interval: Duration) -> Result<AnnotatorHandle, AnnotatorError> {
        if interval.is_zero() {
            return Err(AnnotatorError::ZeroInterval);
        }

        let cancel = CancellationToken::new();
        let (phase_tx, phase_rx) = watch::channel(AnnotatorPhase::Waiting);
        let task = tokio::spawn(self.run(interval, cancel.clone(), phase_tx));

        Ok(AnnotatorHandle {
            cancel,
            task: Some(task),
            phase: phase_rx,
        })
    }

    async fn run(self, interval: Duration, cancel: CancellationToken, phase: watch::Sender<AnnotatorPhase>) {
        info!(?interval, "Annotator started");
        let mut ordinal = 0u64;

        loop {
            phase.send_replace(AnnotatorPhase::Waiting);
            tokio::select! {
                _ = cancel.cancelled() => break,
                _ = tokio::time::sleep(interval) => {}
            }

            // Dropping a step mid-append releases the gate through its guard.
            let observed = tokio::select! {
                _ = cancel.cancelled() => break,
                observed = self.step(&phase) => observed,
            };

            if let Some((text, generation)) = observed {
                ordinal += 1;
                self.sink.on_observation(Observation { ordinal, text, generation });
            }
        }

        phase.send_replace(AnnotatorPhase::Stopped);
        info!(observations = ordinal, "Annotator stopped");
    }

    async fn step(&self, phase: &watch::Sender<AnnotatorPhase>) -> Option<(String, u64)> {
        phase.send_replace(AnnotatorPhase::Capturing);
        let frame = match self.source.capture().await {
            Ok(frame) => frame,
            Err(e) => {
                warn!(error = %e, "Frame capture failed; skipping cycle");
                self.telemetry.record(AccessEvent::CaptureFailed);
                return None;
            }
        };

        phase.send_replace(AnnotatorPhase::Appending);
        let lifecycle = &self.lifecycle;
        let prompt = self.prompt.as_str();
        let frame = &frame;
        let mut used = None;
        let slot = &mut used;
        let outcome = self
            .arbiter
            .try_best_effort(|| async move {
                let handle = lifecycle.current();
                *slot = Some(handle.clone());
                let text = handle.append(frame, prompt).await?;
                Ok::<_, SessionError>((text, handle))
            })
            .await;

        match outcome {
            Ok((text, handle)) => {
                match self.lifecycle.record_append_on(&handle) {
                    Some(count) => debug!(generation = handle.generation(), count, "Observation appended"),
                    None => debug!(generation = handle.generation(), "Append landed on a retired session"),
                }
                self.telemetry.record(AccessEvent::Appended { generation: handle.generation() });
                Some((text, handle.generation()))
            }
            Err(TryAccessError::Skipped) => {
                debug!("Append skipped: query pending");
                self.telemetry.record(AccessEvent::Skipped);
                None
            }
            Err(TryAccessError::Busy) => {
                debug!("Append skipped: session busy");
                self.telemetry.record(AccessEvent::Busy);
                None
            }
            Err(TryAccessError::TimedOut(deadline)) => {
                warn!(?deadline, "Append timed out; frame dropped");
                self.telemetry.record(AccessEvent::TimedOut { path: AccessPath::Background });
                None
            }
            Err(TryAccessError::Failed(cause)) => {
                let capacity_exceeded = cause.is_capacity_exceeded();
                warn!(error = %cause, "Append failed; frame dropped");
                self.telemetry.record(AccessEvent::Failed {
                    path: AccessPath::Background,
                    capacity_exceeded,
                });
                let fresh = match used {
                    Some(failed) if capacity_exceeded => self.lifecycle.reset_if_current(&failed),
                    _ => None,
                };
                if let Some(fresh) = fresh {
                    info!(generation = fresh.generation(), "Context exhausted; session reset");
                    self.telemetry.record(AccessEvent::Reset { generation: fresh.generation() });
                    self.sink.on_memory_cleared();
                }
                None
            }
        }
    }
}

/// Owns the running annotator task. Dropping the handle cancels the loop.
#[derive(Debug)]
pub struct AnnotatorHandle {
    cancel: CancellationToken,
    task: Option<JoinHandle<()>>,
    phase: watch::Receiver<AnnotatorPhase>,
}

impl AnnotatorHandle {
    pub fn cancel(&self) {
        self.cancel.cancel();
    }

    pub fn is_running(&self) -> bool {
        self.task.as_ref().map_or(false, |task| !task.is_finished())
    }

    pub fn phase(&self) -> AnnotatorPhase {
        *self.phase.borrow()
    }

    /// Cancels the loop and waits for the task to exit.
    pub async fn stop(mut self) {
        self.cancel.cancel();
        if let Some(task) = self.task.take() {
            if let Err(e) = task.await {
                warn!(error = %e, "Annotator task ended abnormally");
            }
        }
    }
}

impl Drop for AnnotatorHandle {
    fn drop(&mut self) {
        self.cancel.cancel();
    }
}

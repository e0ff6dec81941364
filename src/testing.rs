//! Scripted collaborators for exercising the arbitration layer without a
//! display or a model server.

use std::collections::VecDeque;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex, PoisonError};
use std::time::Duration;

use async_trait::async_trait;

use crate::error::{CaptureError, SessionError};
use crate::kernel::session::{ChatSession, SessionFactory};
use crate::vision::{Frame, FrameSource};

/// Counts how many session calls overlap, across every session of a factory.
#[derive(Debug, Default)]
pub struct ConcurrencyProbe {
    in_flight: AtomicUsize,
    max_in_flight: AtomicUsize,
    entries: AtomicUsize,
    exits: AtomicUsize,
}

impl ConcurrencyProbe {
    pub fn enter(&self) -> ProbeGuard<'_> {
        self.entries.fetch_add(1, Ordering::SeqCst);
        let now = self.in_flight.fetch_add(1, Ordering::SeqCst) + 1;
        self.max_in_flight.fetch_max(now, Ordering::SeqCst);
        ProbeGuard { probe: self }
    }

    pub fn max_in_flight(&self) -> usize {
        self.max_in_flight.load(Ordering::SeqCst)
    }

    pub fn in_flight(&self) -> usize {
        self.in_flight.load(Ordering::SeqCst)
    }

    pub fn entries(&self) -> usize {
        self.entries.load(Ordering::SeqCst)
    }

    pub fn exits(&self) -> usize {
        self.exits.load(Ordering::SeqCst)
    }
}

/// Leaves the probe when dropped, including when the call is cancelled.
pub struct ProbeGuard<'a> {
    probe: &'a ConcurrencyProbe,
}

impl Drop for ProbeGuard<'_> {
    fn drop(&mut self) {
        self.probe.in_flight.fetch_sub(1, Ordering::SeqCst);
        self.probe.exits.fetch_add(1, Ordering::SeqCst);
    }
}

#[derive(Debug, Clone, Default)]
pub struct Script {
    pub append_delay: Duration,
    pub query_delay: Duration,
}

/// Deterministic stand-in for a remote conversation.
///
/// Appends reply `"observation #n"`; queries reply with the question and the
/// number of observations this session has absorbed, so a fresh session is
/// recognisable by its answers.
pub struct ScriptedSession {
    script: Script,
    probe: Arc<ConcurrencyProbe>,
    append_failures: Mutex<VecDeque<SessionError>>,
    query_failures: Mutex<VecDeque<SessionError>>,
    append_calls: AtomicUsize,
    query_calls: AtomicUsize,
    observations: AtomicUsize,
}

impl ScriptedSession {
    pub fn new(script: Script, probe: Arc<ConcurrencyProbe>) -> Self {
        Self {
            script,
            probe,
            append_failures: Mutex::new(VecDeque::new()),
            query_failures: Mutex::new(VecDeque::new()),
            append_calls: AtomicUsize::new(0),
            query_calls: AtomicUsize::new(0),
            observations: AtomicUsize::new(0),
        }
    }

    pub fn fail_next_append(&self, err: SessionError) {
        self.append_failures
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .push_back(err);
    }

    pub fn fail_next_query(&self, err: SessionError) {
        self.query_failures
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .push_back(err);
    }

    pub fn append_calls(&self) -> usize {
        self.append_calls.load(Ordering::SeqCst)
    }

    pub fn query_calls(&self) -> usize {
        self.query_calls.load(Ordering::SeqCst)
    }

    pub fn observations(&self) -> usize {
        self.observations.load(Ordering::SeqCst)
    }
}

fn next_failure(queue: &Mutex<VecDeque<SessionError>>) -> Option<SessionError> {
    queue.lock().unwrap_or_else(PoisonError::into_inner).pop_front()
}

#[async_trait]
impl ChatSession for ScriptedSession {
    async fn append(&self, _frame: &Frame, _prompt: &str) -> Result<String, SessionError> {
        let _inside = self.probe.enter();
        self.append_calls.fetch_add(1, Ordering::SeqCst);
        if !self.script.append_delay.is_zero() {
            tokio::time::sleep(self.script.append_delay).await;
        }
        if let Some(err) = next_failure(&self.append_failures) {
            return Err(err);
        }
        let n = self.observations.fetch_add(1, Ordering::SeqCst) + 1;
        Ok(format!("observation #{}", n))
    }

    async fn query(&self, question: &str) -> Result<String, SessionError> {
        let _inside = self.probe.enter();
        self.query_calls.fetch_add(1, Ordering::SeqCst);
        if !self.script.query_delay.is_zero() {
            tokio::time::sleep(self.script.query_delay).await;
        }
        if let Some(err) = next_failure(&self.query_failures) {
            return Err(err);
        }
        Ok(format!("{} -> seen {} observations", question, self.observations()))
    }
}

/// Opens [`ScriptedSession`]s sharing one [`ConcurrencyProbe`], and keeps them
/// for inspection.
#[derive(Default)]
pub struct ScriptedFactory {
    script: Script,
    probe: Arc<ConcurrencyProbe>,
    opened: Mutex<Vec<Arc<ScriptedSession>>>,
}

impl ScriptedFactory {
    pub fn new(script: Script) -> Arc<Self> {
        Arc::new(Self {
            script,
            ..Self::default()
        })
    }

    pub fn probe(&self) -> Arc<ConcurrencyProbe> {
        self.probe.clone()
    }

    pub fn opened(&self) -> Vec<Arc<ScriptedSession>> {
        self.opened.lock().unwrap_or_else(PoisonError::into_inner).clone()
    }

    /// The most recently opened session, i.e. the current one.
    pub fn latest(&self) -> Option<Arc<ScriptedSession>> {
        self.opened
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .last()
            .cloned()
    }
}

impl SessionFactory for ScriptedFactory {
    fn open(&self) -> Arc<dyn ChatSession> {
        let session = Arc::new(ScriptedSession::new(self.script.clone(), self.probe.clone()));
        self.opened
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .push(session.clone());
        session
    }
}

/// Hands out the same tiny frame, optionally failing the first `n` captures.
#[derive(Debug, Default)]
pub struct StaticFrames {
    failures_left: AtomicUsize,
    captures: AtomicUsize,
}

impl StaticFrames {
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    pub fn failing_first(n: usize) -> Arc<Self> {
        Arc::new(Self {
            failures_left: AtomicUsize::new(n),
            captures: AtomicUsize::new(0),
        })
    }

    pub fn captures(&self) -> usize {
        self.captures.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl FrameSource for StaticFrames {
    async fn capture(&self) -> Result<Frame, CaptureError> {
        self.captures.fetch_add(1, Ordering::SeqCst);
        let failing = self
            .failures_left
            .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |left| left.checked_sub(1))
            .is_ok();
        if failing {
            return Err(CaptureError::Backend("scripted capture failure".to_string()));
        }
        Ok(Frame::new(vec![0xFF, 0xD8, 0xFF, 0xD9], "image/jpeg", 2, 2))
    }
}

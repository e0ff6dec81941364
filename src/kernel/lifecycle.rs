use std::fmt;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, PoisonError, RwLock};

use tracing::{debug, info};
use uuid::Uuid;

use super::session::{ChatSession, SessionFactory};
use crate::error::SessionError;
use crate::vision::Frame;

/// The live session plus its identity.
///
/// Cheap to clone. A handle stays usable after it is superseded, but results
/// from a superseded handle say nothing about the current one.
#[derive(Clone)]
pub struct SessionHandle {
    id: Uuid,
    generation: u64,
    session: Arc<dyn ChatSession>,
}

impl SessionHandle {
    pub fn id(&self) -> Uuid {
        self.id
    }

    /// 1 for the session opened at construction, +1 per reset.
    pub fn generation(&self) -> u64 {
        self.generation
    }

    pub(crate) async fn append(&self, frame: &Frame, prompt: &str) -> Result<String, SessionError> {
        self.session.append(frame, prompt).await
    }

    pub(crate) async fn query(&self, question: &str) -> Result<String, SessionError> {
        self.session.query(question).await
    }
}

impl fmt::Debug for SessionHandle {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("SessionHandle")
            .field("id", &self.id)
            .field("generation", &self.generation)
            .finish_non_exhaustive()
    }
}

/// Owns the current session and its usage bookkeeping.
///
/// Knows nothing about access disciplines. Capacity is handled reactively:
/// whoever sees [`SessionError::CapacityExceeded`] calls
/// [`reset_if_current`](Self::reset_if_current) with the handle that failed.
pub struct SessionLifecycle {
    factory: Arc<dyn SessionFactory>,
    current: RwLock<SessionHandle>,
    usage: AtomicU64,
}

impl SessionLifecycle {
    pub fn new(factory: Arc<dyn SessionFactory>) -> Self {
        let first = SessionHandle {
            id: Uuid::new_v4(),
            generation: 1,
            session: factory.open(),
        };
        info!(session = %first.id, "Session opened");
        Self {
            factory,
            current: RwLock::new(first),
            usage: AtomicU64::new(0),
        }
    }

    pub fn current(&self) -> SessionHandle {
        self.current
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
    }

    pub fn generation(&self) -> u64 {
        self.current
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .generation
    }

    /// Installs a freshly opened session and zeroes the usage counter.
    /// Every call yields a distinct handle.
    pub fn reset(&self) -> SessionHandle {
        let session = self.factory.open();
        let mut current = self.current.write().unwrap_or_else(PoisonError::into_inner);
        self.replace(&mut current, session)
    }

    /// Resets only if `failed` is still the live session.
    ///
    /// A failure reported by a superseded handle has already been dealt with
    /// by whoever replaced it, so this returns `None` and leaves the current
    /// session alone.
    pub fn reset_if_current(&self, failed: &SessionHandle) -> Option<SessionHandle> {
        let mut current = self.current.write().unwrap_or_else(PoisonError::into_inner);
        if current.id != failed.id {
            debug!(
                stale = %failed.id,
                generation = failed.generation,
                "Reset request from a retired session ignored"
            );
            return None;
        }
        // Opened under the lock so two failures on one handle cannot both reset.
        let session = self.factory.open();
        Some(self.replace(&mut current, session))
    }

    fn replace(&self, current: &mut SessionHandle, session: Arc<dyn ChatSession>) -> SessionHandle {
        let next = SessionHandle {
            id: Uuid::new_v4(),
            generation: current.generation + 1,
            session,
        };
        let retired = std::mem::replace(current, next.clone());
        // Zeroed under the write lock so no reader pairs the new handle with a stale count.
        let appends = self.usage.swap(0, Ordering::AcqRel);

        info!(
            retired = %retired.id,
            session = %next.id,
            generation = next.generation,
            appends,
            "Session reset"
        );
        next
    }

    /// Counts one confirmed append against the current session.
    pub fn record_successful_append(&self) -> u64 {
        let _current = self.current.read().unwrap_or_else(PoisonError::into_inner);
        self.usage.fetch_add(1, Ordering::AcqRel) + 1
    }

    /// Like [`record_successful_append`](Self::record_successful_append), but
    /// only if `handle` is still current. Returns `None` for a superseded handle.
    pub fn record_append_on(&self, handle: &SessionHandle) -> Option<u64> {
        let current = self.current.read().unwrap_or_else(PoisonError::into_inner);
        if current.id != handle.id {
            return None;
        }
        Some(self.usage.fetch_add(1, Ordering::AcqRel) + 1)
    }

    pub fn usage_count(&self) -> u64 {
        self.usage.load(Ordering::Acquire)
    }
}

impl fmt::Debug for SessionLifecycle {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("SessionLifecycle")
            .field("current", &self.current())
            .field("usage", &self.usage_count())
            .finish_non_exhaustive()
    }
}

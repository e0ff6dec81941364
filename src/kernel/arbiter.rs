use std::future::Future;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::time::Duration;

use tokio::sync::Mutex;
use tokio::time::timeout;
use tracing::{debug, trace, warn};

use crate::error::{AccessError, TryAccessError};

pub const DEFAULT_ACCESS_DEADLINE: Duration = Duration::from_secs(30);

/// Serializes every access to the live session.
///
/// One gate (capacity 1) plus a preemption signal. Two disciplines:
///
/// - [`Arbiter::try_best_effort`] never waits. It backs off when a guaranteed
///   access is pending (`Skipped`) or the gate is taken (`Busy`).
/// - [`Arbiter::run_guaranteed`] raises the signal, waits for the gate and
///   runs. The signal only deters *new* best-effort attempts; one already
///   holding the gate finishes first, so a guaranteed caller waits behind at
///   most one append.
///
/// Both disciplines bound `work` by the same deadline, measured from when
/// `work` starts. The gate is released and the signal lowered on every exit
/// path, including when the caller's future is dropped or `work` panics.
#[derive(Debug)]
pub struct Arbiter {
    gate: Mutex<()>,
    // Number of guaranteed accesses between "announce" and "done".
    // The preemption signal reads as set while this is non-zero.
    pending_guaranteed: AtomicUsize,
    deadline: Duration,
}

impl Default for Arbiter {
    fn default() -> Self {
        Self::new(DEFAULT_ACCESS_DEADLINE)
    }
}

impl Arbiter {
    pub fn new(deadline: Duration) -> Self {
        Self {
            gate: Mutex::new(()),
            pending_guaranteed: AtomicUsize::new(0),
            deadline,
        }
    }

    pub fn deadline(&self) -> Duration {
        self.deadline
    }

    /// Whether a guaranteed access is announced or running.
    pub fn is_preempting(&self) -> bool {
        self.pending_guaranteed.load(Ordering::Acquire) > 0
    }

    /// Diagnostic probe. Briefly takes the gate, so a best-effort attempt
    /// racing with this call may observe `Busy`.
    pub fn is_gate_free(&self) -> bool {
        self.gate.try_lock().is_ok()
    }

    pub async fn try_best_effort<F, Fut, T, E>(&self, work: F) -> Result<T, TryAccessError<E>>
    where
        F: FnOnce() -> Fut,
        Fut: Future<Output = Result<T, E>>,
    {
        // Checked before touching the gate so we never queue against a query.
        if self.is_preempting() {
            trace!("best-effort access skipped: guaranteed access pending");
            return Err(TryAccessError::Skipped);
        }

        let _permit = match self.gate.try_lock() {
            Ok(permit) => permit,
            Err(_) => {
                trace!("best-effort access busy");
                return Err(TryAccessError::Busy);
            }
        };

        self.run_bounded(work).await.map_err(TryAccessError::from)
    }

    pub async fn run_guaranteed<F, Fut, T, E>(&self, work: F) -> Result<T, AccessError<E>>
    where
        F: FnOnce() -> Fut,
        Fut: Future<Output = Result<T, E>>,
    {
        // Declared first so it drops last: the gate is released before the
        // signal is lowered, and the signal is lowered even if we never got
        // the gate.
        let _signal = PreemptionSignal::raise(&self.pending_guaranteed);

        let _permit = match timeout(self.deadline, self.gate.lock()).await {
            Ok(permit) => permit,
            Err(_) => {
                warn!(deadline = ?self.deadline, "guaranteed access timed out waiting for the gate");
                return Err(AccessError::TimedOut(self.deadline));
            }
        };
        debug!("guaranteed access acquired the gate");

        self.run_bounded(work).await
    }

    async fn run_bounded<F, Fut, T, E>(&self, work: F) -> Result<T, AccessError<E>>
    where
        F: FnOnce() -> Fut,
        Fut: Future<Output = Result<T, E>>,
    {
        match timeout(self.deadline, work()).await {
            Ok(Ok(value)) => Ok(value),
            Ok(Err(cause)) => Err(AccessError::Failed(cause)),
            Err(_) => {
                warn!(deadline = ?self.deadline, "access exceeded its deadline");
                Err(AccessError::TimedOut(self.deadline))
            }
        }
    }
}

struct PreemptionSignal<'a> {
    pending: &'a AtomicUsize,
}

impl<'a> PreemptionSignal<'a> {
    fn raise(pending: &'a AtomicUsize) -> Self {
        pending.fetch_add(1, Ordering::AcqRel);
        Self { pending }
    }
}

impl Drop for PreemptionSignal<'_> {
    fn drop(&mut self) {
        self.pending.fetch_sub(1, Ordering::AcqRel);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn signal_counts_overlapping_guaranteed_accesses() {
        let pending = AtomicUsize::new(0);
        let first = PreemptionSignal::raise(&pending);
        let second = PreemptionSignal::raise(&pending);
        assert_eq!(pending.load(Ordering::Acquire), 2);

        drop(first);
        assert_eq!(pending.load(Ordering::Acquire), 1, "signal must stay raised while one is pending");

        drop(second);
        assert_eq!(pending.load(Ordering::Acquire), 0);
    }

    #[test]
    fn default_deadline_is_thirty_seconds() {
        let arbiter = Arbiter::default();
        assert_eq!(arbiter.deadline(), Duration::from_secs(30));
        assert!(!arbiter.is_preempting());
        assert!(arbiter.is_gate_free());
    }
}

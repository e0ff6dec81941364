use std::sync::Arc;

use async_trait::async_trait;

use crate::error::SessionError;
use crate::vision::Frame;

/// The remote conversational resource.
///
/// Stateful and append-only: every successful `append` or `query` grows a
/// history that the caller cannot read back. Not safe for concurrent use;
/// all calls are routed through the [`Arbiter`](super::arbiter::Arbiter).
#[async_trait]
pub trait ChatSession: Send + Sync {
    /// Adds a frame to the conversation and returns the service's description of it.
    async fn append(&self, frame: &Frame, prompt: &str) -> Result<String, SessionError>;

    /// Asks a question answered from everything appended so far.
    async fn query(&self, question: &str) -> Result<String, SessionError>;
}

/// Opens fresh, empty sessions. Used at startup and on every reset.
pub trait SessionFactory: Send + Sync {
    fn open(&self) -> Arc<dyn ChatSession>;
}

impl<F> SessionFactory for F
where
    F: Fn() -> Arc<dyn ChatSession> + Send + Sync,
{
    fn open(&self) -> Arc<dyn ChatSession> {
        self()
    }
}

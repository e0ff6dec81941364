pub mod companion;
pub mod config;
pub mod error;
pub mod kernel;
pub mod services;
#[cfg(any(test, feature = "test-util"))]
pub mod testing;
pub mod transcript;
pub mod vision;

// Re-export specific items for convenient access
pub use companion::Companion;
pub use config::LookoutConfig;
pub use kernel::{Annotator, Arbiter, QueryService, SessionLifecycle};

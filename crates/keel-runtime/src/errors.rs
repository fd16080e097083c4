//! Runtime error types.

use keel_core::errors::DriverError;
use thiserror::Error;

/// A single reactor's destroy-hook failure, collected during teardown.
#[derive(Debug)]
pub struct TeardownFailure {
    /// Reactor that failed.
    pub reactor: &'static str,
    /// What went wrong.
    pub error: anyhow::Error,
}

/// Errors surfaced by the registry and engine.
#[derive(Debug, Error)]
pub enum RuntimeError {
    /// A reactor's initialize hook failed; startup was aborted.
    #[error("reactor `{name}` failed to initialize: {source}")]
    ReactorInit {
        /// Reactor that failed.
        name: &'static str,
        /// Hook error.
        #[source]
        source: anyhow::Error,
    },

    /// One or more destroy hooks failed. Teardown of the remaining
    /// reactors still ran to completion.
    #[error("teardown completed with {} failure(s)", .0.len())]
    Teardown(Vec<TeardownFailure>),

    /// The engine has not been initialized.
    #[error("engine is not initialized")]
    NotInitialized,

    /// A previous exchange is still streaming.
    #[error("an exchange is already in flight")]
    ExchangeInFlight,

    /// Driver-level failure outside the stream itself.
    #[error(transparent)]
    Driver(#[from] DriverError),
}

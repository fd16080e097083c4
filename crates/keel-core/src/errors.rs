//! Error types shared across the pipeline.

use thiserror::Error;

/// Failures reported by the driver collaborator.
///
/// Stream-level failures never escape as `Err` past the driver adapter —
/// the adapter folds them into a Stream-layer `error` event so partial
/// conversation state stays observable.
#[derive(Debug, Error)]
pub enum DriverError {
    /// Transport-level failure (connection dropped, timeout).
    #[error("driver connection failed: {0}")]
    Connection(String),

    /// The provider rejected or aborted the request.
    #[error("provider error: {0}")]
    Provider(String),

    /// Anything else the driver wants to surface.
    #[error("{0}")]
    Other(String),
}

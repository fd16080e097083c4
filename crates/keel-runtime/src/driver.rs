//! Driver collaborator contract.
//!
//! The driver is the external LLM backend: it accepts user input, emits an
//! asynchronous stream of [`StreamEvent`]s, and honors interrupt/dispose.
//! Retry/backoff and timeout policy live inside the driver, not in the
//! pipeline.

use std::pin::Pin;

use async_trait::async_trait;
use futures::Stream;
use keel_core::errors::DriverError;
use keel_core::events::StreamEvent;

/// One user-supplied request.
#[derive(Clone, Debug)]
pub struct UserInput {
    /// Raw input text.
    pub text: String,
}

impl UserInput {
    /// Wrap input text.
    #[must_use]
    pub fn new(text: impl Into<String>) -> Self {
        Self { text: text.into() }
    }
}

/// The driver's output stream.
///
/// Once the stream begins emitting it either terminates with a
/// `MessageStop`/`Error` event (or an `Err` item) or is abandoned via
/// [`Driver::abort`].
pub type DriverStream = Pin<Box<dyn Stream<Item = Result<StreamEvent, DriverError>> + Send>>;

/// External LLM backend.
#[async_trait]
pub trait Driver: Send + Sync {
    /// Async startup (auth, warmup). Default: nothing to do.
    async fn initialize(&self) -> Result<(), DriverError> {
        Ok(())
    }

    /// Send user input; returns the response stream.
    async fn receive(&self, input: UserInput) -> Result<DriverStream, DriverError>;

    /// Interrupt the in-flight response. Fire-and-forget.
    fn abort(&self);

    /// Async teardown. Default: nothing to do.
    async fn dispose(&self) -> Result<(), DriverError> {
        Ok(())
    }
}

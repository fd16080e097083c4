//! Branded ID newtypes.
//!
//! UUID v7 under the hood so ids sort by creation time.

use std::fmt;

use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// Correlation id for one user-request/assistant-response round trip.
///
/// Assigned by the driver adapter at send time; carried on the user
/// message event and the closing exchange event.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct ExchangeId(Uuid);

impl ExchangeId {
    /// Generate a fresh id.
    #[must_use]
    pub fn new() -> Self {
        Self(Uuid::now_v7())
    }
}

impl Default for ExchangeId {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Display for ExchangeId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "exch_{}", self.0)
    }
}

/// Id of one logical message.
///
/// Stream-derived messages reuse the driver's message/tool-call id string;
/// locally originated messages (user input, error messages) mint a fresh one.
#[derive(Clone, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct MessageId(String);

impl MessageId {
    /// Generate a fresh local id.
    #[must_use]
    pub fn new() -> Self {
        Self(format!("msg_{}", Uuid::now_v7()))
    }

    /// Wrap an id string supplied by the driver.
    #[must_use]
    pub fn from_driver(id: impl Into<String>) -> Self {
        Self(id.into())
    }

    /// The raw id string.
    #[must_use]
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for MessageId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

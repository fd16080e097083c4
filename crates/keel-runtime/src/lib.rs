//! # keel-runtime
//!
//! Event bus, reactors, and engine for the Keel agent pipeline.
//!
//! - **Bus**: typed publish/subscribe with synchronous, ordered delivery
//! - **Reactors**: state machine, message assembler, exchange tracker,
//!   driver adapter — each folding one event layer into the next
//! - **Registry**: ordered initialize, reverse-ordered destroy
//! - **Engine**: composition root wiring driver, bus, and reactors
//!
//! ## Crate Position
//!
//! Aggregation layer. Depends on: keel-core.

#![deny(unsafe_code)]

pub mod bus;
pub mod driver;
pub mod engine;
pub mod errors;
pub mod pricing;
pub mod reactor;
pub mod reactors;
pub mod testutil;

// Re-export main public API
pub use bus::{EventBus, Subscription};
pub use driver::{Driver, DriverStream, UserInput};
pub use engine::Engine;
pub use errors::{RuntimeError, TeardownFailure};
pub use reactor::{Reactor, ReactorRegistry};
pub use reactors::{DriverAdapter, ExchangeTracker, MessageAssembler, StateMachine};

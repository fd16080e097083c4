//! # keel-core
//!
//! Foundation types for the Keel agent pipeline.
//!
//! This crate provides the shared vocabulary the runtime crate is built on:
//!
//! - **Events**: the four-layer event vocabulary ([`events::StreamEvent`],
//!   [`events::StateEvent`], [`events::MessageEvent`], [`events::ExchangeEvent`])
//!   carried in a timestamped [`events::Event`] envelope
//! - **Messages**: [`messages::Message`] with user/assistant/tool-call/
//!   tool-result/error subtypes, plus [`messages::TokenUsage`]
//! - **Branded IDs**: [`ids::ExchangeId`] and [`ids::MessageId`] as newtypes
//! - **Errors**: [`errors::DriverError`] via `thiserror`
//! - **Logging**: [`logging::init`] subscriber setup
//!
//! ## Crate Position
//!
//! Foundation crate. Depended on by `keel-runtime`.

#![deny(unsafe_code)]

pub mod errors;
pub mod events;
pub mod ids;
pub mod logging;
pub mod messages;

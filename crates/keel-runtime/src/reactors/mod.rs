//! Built-in pipeline reactors.
//!
//! Registration order matters: the state machine and assembler must see
//! stream events before the exchange tracker closes an exchange, and the
//! driver adapter comes last so everything downstream is attached before
//! the first delta arrives.

pub mod assembler;
pub mod driver_adapter;
pub mod exchange;
pub mod state_machine;

pub use assembler::MessageAssembler;
pub use driver_adapter::DriverAdapter;
pub use exchange::ExchangeTracker;
pub use state_machine::StateMachine;

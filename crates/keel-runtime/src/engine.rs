//! Engine — composition root of one agent pipeline.
//!
//! Owns the bus, the registry, and the built-in reactors, wired in a fixed
//! order so derived layers are attached before the driver adapter produces
//! its first event: state machine, assembler, exchange tracker, then the
//! adapter. Custom reactors registered before `initialize` slot in after
//! the built-ins.

use std::sync::Arc;

use keel_core::events::{Event, EventKind};
use keel_core::ids::ExchangeId;
use parking_lot::Mutex;
use tracing::{info, warn};

use crate::bus::{EventBus, Subscription};
use crate::driver::Driver;
use crate::errors::RuntimeError;
use crate::reactor::{Reactor, ReactorRegistry};
use crate::reactors::{DriverAdapter, ExchangeTracker, MessageAssembler, StateMachine};

/// One agent pipeline instance.
pub struct Engine {
    bus: Arc<EventBus>,
    registry: ReactorRegistry,
    adapter: Arc<DriverAdapter>,
    initialized: Mutex<bool>,
}

impl Engine {
    /// Build a pipeline over a driver, with the built-in reactors
    /// registered and attached.
    #[must_use]
    pub fn new(driver: Arc<dyn Driver>) -> Self {
        let bus = Arc::new(EventBus::new());
        let registry = ReactorRegistry::new(Arc::clone(&bus));

        let adapter = Arc::new(DriverAdapter::new(driver, Arc::clone(&bus)));
        registry.register(Arc::new(StateMachine::new(Arc::clone(&bus))));
        registry.register(Arc::new(MessageAssembler::new(Arc::clone(&bus))));
        registry.register(Arc::new(ExchangeTracker::new(Arc::clone(&bus))));
        registry.register(Arc::clone(&adapter) as Arc<dyn Reactor>);

        Self {
            bus,
            registry,
            adapter,
            initialized: Mutex::new(false),
        }
    }

    /// Register an additional reactor. It attaches immediately and its
    /// lifecycle hooks run after the built-ins'.
    pub fn register(&self, reactor: Arc<dyn Reactor>) {
        self.registry.register(reactor);
    }

    /// Run every reactor's initialize hook in registration order.
    ///
    /// Idempotent: re-initializing is a warn-and-return no-op inside the
    /// registry.
    pub async fn initialize(&self) -> Result<(), RuntimeError> {
        self.registry.initialize().await?;
        *self.initialized.lock() = true;
        info!("engine initialized");
        Ok(())
    }

    /// Send user input to the driver, returning the exchange id.
    ///
    /// Errors when the engine is not initialized or an exchange is still
    /// streaming; driver failures surface as Stream-layer error events.
    pub async fn send(&self, text: impl Into<String>) -> Result<ExchangeId, RuntimeError> {
        if !*self.initialized.lock() {
            return Err(RuntimeError::NotInitialized);
        }
        self.adapter.send(text).await
    }

    /// Interrupt the in-flight exchange. Fire-and-forget.
    pub fn abort(&self) {
        self.adapter.abort();
    }

    /// Tear the pipeline down: destroy hooks in reverse order, then close
    /// the bus. Idempotent; hook failures are aggregated, teardown always
    /// runs to completion.
    pub async fn destroy(&self) -> Result<(), RuntimeError> {
        *self.initialized.lock() = false;
        let result = self.registry.destroy().await;
        self.bus.close();
        if let Err(error) = &result {
            warn!(%error, "engine destroyed with teardown failures");
        } else {
            info!("engine destroyed");
        }
        result
    }

    /// Subscribe to one event kind.
    pub fn subscribe(
        &self,
        kind: EventKind,
        handler: impl Fn(&Event) -> anyhow::Result<()> + Send + Sync + 'static,
    ) -> Subscription {
        self.bus.subscribe(kind, handler)
    }

    /// Subscribe to every event kind.
    pub fn subscribe_any(
        &self,
        handler: impl Fn(&Event) -> anyhow::Result<()> + Send + Sync + 'static,
    ) -> Subscription {
        self.bus.subscribe_any(handler)
    }

    /// The underlying bus, for reactors constructed outside the engine.
    #[must_use]
    pub fn bus(&self) -> &Arc<EventBus> {
        &self.bus
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testutil::{collect_events, ScriptedDriver};

    #[tokio::test]
    async fn send_before_initialize_is_rejected() {
        let engine = Engine::new(Arc::new(ScriptedDriver::new()));
        let err = engine.send("hello").await.unwrap_err();
        assert!(matches!(err, RuntimeError::NotInitialized));
    }

    #[tokio::test]
    async fn destroy_is_idempotent_and_closes_the_bus() {
        let engine = Engine::new(Arc::new(ScriptedDriver::new()));
        engine.initialize().await.unwrap();

        engine.destroy().await.unwrap();
        assert!(engine.bus().is_closed());
        engine.destroy().await.unwrap();

        let err = engine.send("hello").await.unwrap_err();
        assert!(matches!(err, RuntimeError::NotInitialized));
    }

    #[tokio::test]
    async fn events_after_destroy_are_dropped() {
        let engine = Engine::new(Arc::new(ScriptedDriver::new()));
        engine.initialize().await.unwrap();
        engine.destroy().await.unwrap();

        let events = collect_events(engine.bus());
        let _ = engine.bus().publish(Event::stream(
            keel_core::events::StreamEvent::Error {
                message: "late".into(),
            },
        ));
        assert!(events.lock().is_empty());
    }
}

//! Test support: scripted drivers, probe reactors, and bus collectors.
//!
//! Used by the unit tests and the integration suite; not part of the
//! stable API surface.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use async_trait::async_trait;
use keel_core::errors::DriverError;
use keel_core::events::{AgentState, Event, EventPayload, ExchangeEvent, StateEvent, StreamEvent};
use keel_core::messages::Message;
use parking_lot::Mutex;

use crate::bus::{EventBus, Subscription};
use crate::driver::{Driver, DriverStream, UserInput};
use crate::reactor::Reactor;

// ─────────────────────────────────────────────────────────────────────────────
// Bus collectors
// ─────────────────────────────────────────────────────────────────────────────

/// Record every published event. The subscription stays attached for the
/// life of the bus.
#[must_use]
pub fn collect_events(bus: &Arc<EventBus>) -> Arc<Mutex<Vec<Event>>> {
    let collected = Arc::new(Mutex::new(Vec::new()));
    let sink = Arc::clone(&collected);
    let _sub = bus.subscribe_any(move |event| {
        sink.lock().push(event.clone());
        Ok(())
    });
    collected
}

/// Record every state transition as `(from, to)` pairs.
#[must_use]
pub fn collect_state_transitions(bus: &Arc<EventBus>) -> Arc<Mutex<Vec<(AgentState, AgentState)>>> {
    let collected = Arc::new(Mutex::new(Vec::new()));
    let sink = Arc::clone(&collected);
    let _sub = bus.subscribe_any(move |event| {
        if let EventPayload::State(StateEvent::Changed { from, to }) = &event.payload {
            sink.lock().push((*from, *to));
        }
        Ok(())
    });
    collected
}

/// Record every completed message.
#[must_use]
pub fn collect_messages(bus: &Arc<EventBus>) -> Arc<Mutex<Vec<Message>>> {
    let collected = Arc::new(Mutex::new(Vec::new()));
    let sink = Arc::clone(&collected);
    let _sub = bus.subscribe_any(move |event| {
        if let EventPayload::Message(m) = &event.payload {
            sink.lock().push(m.message.clone());
        }
        Ok(())
    });
    collected
}

/// Record every completed exchange.
#[must_use]
pub fn collect_exchanges(bus: &Arc<EventBus>) -> Arc<Mutex<Vec<ExchangeEvent>>> {
    let collected = Arc::new(Mutex::new(Vec::new()));
    let sink = Arc::clone(&collected);
    let _sub = bus.subscribe_any(move |event| {
        if let EventPayload::Exchange(exchange) = &event.payload {
            sink.lock().push(exchange.clone());
        }
        Ok(())
    });
    collected
}

// ─────────────────────────────────────────────────────────────────────────────
// ScriptedDriver
// ─────────────────────────────────────────────────────────────────────────────

enum Script {
    /// Yield these items, then end the stream.
    Events(Vec<Result<StreamEvent, DriverError>>),
    /// A stream that never yields (exercises abort paths).
    Stalled,
    /// `receive` itself fails.
    Reject,
}

/// Driver that replays a fixed script per `receive` call.
pub struct ScriptedDriver {
    script: Mutex<Option<Script>>,
    aborted: AtomicBool,
    disposed: AtomicBool,
}

impl ScriptedDriver {
    /// Driver whose stream ends immediately.
    #[must_use]
    pub fn new() -> Self {
        Self {
            script: Mutex::new(None),
            aborted: AtomicBool::new(false),
            disposed: AtomicBool::new(false),
        }
    }

    /// Replay these items on the next `receive`.
    #[must_use]
    pub fn with_script(self, script: Vec<Result<StreamEvent, DriverError>>) -> Self {
        *self.script.lock() = Some(Script::Events(script));
        self
    }

    /// The next `receive` returns a stream that never yields.
    #[must_use]
    pub fn with_stalled_script(self) -> Self {
        *self.script.lock() = Some(Script::Stalled);
        self
    }

    /// The next `receive` fails outright.
    #[must_use]
    pub fn rejecting_receive(self) -> Self {
        *self.script.lock() = Some(Script::Reject);
        self
    }

    /// Whether [`Driver::abort`] was called.
    #[must_use]
    pub fn was_aborted(&self) -> bool {
        self.aborted.load(Ordering::SeqCst)
    }

    /// Whether [`Driver::dispose`] was called.
    #[must_use]
    pub fn was_disposed(&self) -> bool {
        self.disposed.load(Ordering::SeqCst)
    }
}

impl Default for ScriptedDriver {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl Driver for ScriptedDriver {
    async fn receive(&self, _input: UserInput) -> Result<DriverStream, DriverError> {
        match self.script.lock().take() {
            Some(Script::Events(events)) => Ok(Box::pin(futures::stream::iter(events))),
            Some(Script::Stalled) => Ok(Box::pin(futures::stream::pending())),
            Some(Script::Reject) => Err(DriverError::Provider("scripted rejection".into())),
            None => Ok(Box::pin(futures::stream::empty())),
        }
    }

    fn abort(&self) {
        self.aborted.store(true, Ordering::SeqCst);
    }

    async fn dispose(&self) -> Result<(), DriverError> {
        self.disposed.store(true, Ordering::SeqCst);
        Ok(())
    }
}

// ─────────────────────────────────────────────────────────────────────────────
// ProbeReactor
// ─────────────────────────────────────────────────────────────────────────────

/// Reactor that records its lifecycle hooks into a shared log.
pub struct ProbeReactor {
    name: &'static str,
    log: Arc<Mutex<Vec<String>>>,
    fail_init: bool,
    fail_destroy: bool,
}

impl ProbeReactor {
    /// A well-behaved probe.
    #[must_use]
    pub fn arc(name: &'static str, log: &Arc<Mutex<Vec<String>>>) -> Arc<dyn Reactor> {
        Arc::new(Self {
            name,
            log: Arc::clone(log),
            fail_init: false,
            fail_destroy: false,
        })
    }

    /// A probe whose initialize hook fails (after logging).
    #[must_use]
    pub fn failing_init(name: &'static str, log: &Arc<Mutex<Vec<String>>>) -> Arc<dyn Reactor> {
        Arc::new(Self {
            name,
            log: Arc::clone(log),
            fail_init: true,
            fail_destroy: false,
        })
    }

    /// A probe whose destroy hook fails (after logging).
    #[must_use]
    pub fn failing_destroy(name: &'static str, log: &Arc<Mutex<Vec<String>>>) -> Arc<dyn Reactor> {
        Arc::new(Self {
            name,
            log: Arc::clone(log),
            fail_init: false,
            fail_destroy: true,
        })
    }
}

#[async_trait]
impl Reactor for ProbeReactor {
    fn name(&self) -> &'static str {
        self.name
    }

    fn attach(self: Arc<Self>, _bus: &Arc<EventBus>) -> Vec<Subscription> {
        Vec::new()
    }

    async fn initialize(&self) -> anyhow::Result<()> {
        self.log.lock().push(format!("{}:init", self.name));
        if self.fail_init {
            anyhow::bail!("{} failed to initialize", self.name);
        }
        Ok(())
    }

    async fn destroy(&self) -> anyhow::Result<()> {
        self.log.lock().push(format!("{}:destroy", self.name));
        if self.fail_destroy {
            anyhow::bail!("{} failed to destroy", self.name);
        }
        Ok(())
    }
}

//! Reactor trait and registry.
//!
//! A reactor is a unit of behavior that consumes (and optionally produces)
//! bus events, with an attach/detach lifetime managed by the registry and
//! optional async initialize/destroy hooks. The registry sequences startup
//! in registration order and teardown in reverse, so a later reactor may
//! assume every earlier one is ready.

use std::sync::Arc;

use async_trait::async_trait;
use parking_lot::Mutex;
use tracing::{debug, info, warn};

use crate::bus::{EventBus, Subscription};
use crate::errors::{RuntimeError, TeardownFailure};

/// A unit subscribing to and optionally publishing bus events.
#[async_trait]
pub trait Reactor: Send + Sync {
    /// Stable name, used in logs and error reports.
    fn name(&self) -> &'static str;

    /// Subscribe to the bus. Called once, at registration.
    ///
    /// The returned tokens are owned by the registry and detached at
    /// destroy. Pure producers return an empty vec.
    fn attach(self: Arc<Self>, bus: &Arc<EventBus>) -> Vec<Subscription>;

    /// Async startup hook, run in registration order.
    async fn initialize(&self) -> anyhow::Result<()> {
        Ok(())
    }

    /// Async teardown hook, run in reverse registration order.
    async fn destroy(&self) -> anyhow::Result<()> {
        Ok(())
    }
}

struct RegisteredReactor {
    reactor: Arc<dyn Reactor>,
    subscriptions: Vec<Subscription>,
}

/// Ordered list of reactors with lifecycle sequencing.
pub struct ReactorRegistry {
    bus: Arc<EventBus>,
    entries: Mutex<Vec<RegisteredReactor>>,
    initialized: Mutex<bool>,
}

impl ReactorRegistry {
    /// Create an empty registry over a bus.
    #[must_use]
    pub fn new(bus: Arc<EventBus>) -> Self {
        Self {
            bus,
            entries: Mutex::new(Vec::new()),
            initialized: Mutex::new(false),
        }
    }

    /// Append a reactor and attach it to the bus immediately.
    pub fn register(&self, reactor: Arc<dyn Reactor>) {
        let subscriptions = Arc::clone(&reactor).attach(&self.bus);
        debug!(
            reactor = reactor.name(),
            subscriptions = subscriptions.len(),
            "reactor registered"
        );
        self.entries.lock().push(RegisteredReactor {
            reactor,
            subscriptions,
        });
    }

    /// Append several reactors, preserving the given order.
    pub fn register_all(&self, reactors: impl IntoIterator<Item = Arc<dyn Reactor>>) {
        for reactor in reactors {
            self.register(reactor);
        }
    }

    /// Number of registered reactors.
    #[must_use]
    pub fn len(&self) -> usize {
        self.entries.lock().len()
    }

    /// Whether the registry is empty.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.entries.lock().is_empty()
    }

    /// Run every initialize hook in registration order, awaiting each.
    ///
    /// The first failure aborts startup. Re-initializing an initialized
    /// registry is a warn-and-return no-op.
    pub async fn initialize(&self) -> Result<(), RuntimeError> {
        if *self.initialized.lock() {
            warn!("registry already initialized; ignoring");
            return Ok(());
        }
        let reactors: Vec<Arc<dyn Reactor>> = self
            .entries
            .lock()
            .iter()
            .map(|e| Arc::clone(&e.reactor))
            .collect();
        for reactor in reactors {
            reactor
                .initialize()
                .await
                .map_err(|source| RuntimeError::ReactorInit {
                    name: reactor.name(),
                    source,
                })?;
            debug!(reactor = reactor.name(), "reactor initialized");
        }
        *self.initialized.lock() = true;
        info!(reactors = self.len(), "registry initialized");
        Ok(())
    }

    /// Run every destroy hook in reverse registration order, awaiting
    /// each and continuing past failures, then detach all subscriptions.
    ///
    /// Collected hook failures are surfaced together as
    /// [`RuntimeError::Teardown`]. Destroying a registry that was never
    /// initialized only detaches subscriptions.
    pub async fn destroy(&self) -> Result<(), RuntimeError> {
        let was_initialized = {
            let mut initialized = self.initialized.lock();
            std::mem::replace(&mut *initialized, false)
        };

        let mut failures = Vec::new();
        if was_initialized {
            let reactors: Vec<Arc<dyn Reactor>> = self
                .entries
                .lock()
                .iter()
                .map(|e| Arc::clone(&e.reactor))
                .collect();
            for reactor in reactors.into_iter().rev() {
                if let Err(error) = reactor.destroy().await {
                    warn!(reactor = reactor.name(), %error, "destroy hook failed; continuing teardown");
                    failures.push(TeardownFailure {
                        reactor: reactor.name(),
                        error,
                    });
                } else {
                    debug!(reactor = reactor.name(), "reactor destroyed");
                }
            }
        } else {
            debug!("destroy on uninitialized registry; detaching only");
        }

        for entry in self.entries.lock().iter() {
            for sub in &entry.subscriptions {
                sub.unsubscribe();
            }
        }

        if failures.is_empty() {
            Ok(())
        } else {
            Err(RuntimeError::Teardown(failures))
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testutil::ProbeReactor;
    use assert_matches::assert_matches;

    fn probe_registry() -> (ReactorRegistry, Arc<Mutex<Vec<String>>>) {
        let bus = Arc::new(EventBus::new());
        let registry = ReactorRegistry::new(bus);
        let log = Arc::new(Mutex::new(Vec::new()));
        (registry, log)
    }

    #[tokio::test]
    async fn initialize_runs_in_registration_order() {
        let (registry, log) = probe_registry();
        registry.register_all([
            ProbeReactor::arc("a", &log),
            ProbeReactor::arc("b", &log),
            ProbeReactor::arc("c", &log),
        ]);

        registry.initialize().await.unwrap();
        assert_eq!(*log.lock(), vec!["a:init", "b:init", "c:init"]);
    }

    #[tokio::test]
    async fn destroy_runs_in_reverse_order() {
        let (registry, log) = probe_registry();
        registry.register_all([
            ProbeReactor::arc("a", &log),
            ProbeReactor::arc("b", &log),
            ProbeReactor::arc("c", &log),
        ]);

        registry.initialize().await.unwrap();
        registry.destroy().await.unwrap();
        assert_eq!(
            *log.lock(),
            vec![
                "a:init",
                "b:init",
                "c:init",
                "c:destroy",
                "b:destroy",
                "a:destroy"
            ]
        );
    }

    #[tokio::test]
    async fn double_initialize_is_noop() {
        let (registry, log) = probe_registry();
        registry.register(ProbeReactor::arc("a", &log));

        registry.initialize().await.unwrap();
        registry.initialize().await.unwrap();
        assert_eq!(*log.lock(), vec!["a:init"]);
    }

    #[tokio::test]
    async fn double_destroy_is_noop() {
        let (registry, log) = probe_registry();
        registry.register(ProbeReactor::arc("a", &log));

        registry.initialize().await.unwrap();
        registry.destroy().await.unwrap();
        registry.destroy().await.unwrap();
        assert_eq!(*log.lock(), vec!["a:init", "a:destroy"]);
    }

    #[tokio::test]
    async fn initialize_aborts_on_first_failure() {
        let (registry, log) = probe_registry();
        registry.register(ProbeReactor::arc("a", &log));
        registry.register(ProbeReactor::failing_init("b", &log));
        registry.register(ProbeReactor::arc("c", &log));

        let err = registry.initialize().await.unwrap_err();
        assert_matches!(err, RuntimeError::ReactorInit { name: "b", .. });
        // c's hook never ran.
        assert_eq!(*log.lock(), vec!["a:init", "b:init"]);
    }

    #[tokio::test]
    async fn destroy_continues_past_failures_and_aggregates() {
        let (registry, log) = probe_registry();
        registry.register(ProbeReactor::arc("a", &log));
        registry.register(ProbeReactor::failing_destroy("b", &log));
        registry.register(ProbeReactor::failing_destroy("c", &log));

        registry.initialize().await.unwrap();
        let err = registry.destroy().await.unwrap_err();
        assert_matches!(err, RuntimeError::Teardown(failures) => {
            assert_eq!(failures.len(), 2);
            assert_eq!(failures[0].reactor, "c");
            assert_eq!(failures[1].reactor, "b");
        });
        // All hooks ran despite the failures, in reverse order.
        assert_eq!(
            *log.lock(),
            vec![
                "a:init",
                "b:init",
                "c:init",
                "c:destroy",
                "b:destroy",
                "a:destroy"
            ]
        );
    }

    #[tokio::test]
    async fn destroy_without_initialize_skips_hooks() {
        let (registry, log) = probe_registry();
        registry.register(ProbeReactor::arc("a", &log));

        registry.destroy().await.unwrap();
        assert!(log.lock().is_empty());
    }
}

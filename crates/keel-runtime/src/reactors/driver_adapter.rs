//! Driver adapter — bridges the external driver onto the bus.
//!
//! `send` assigns the exchange correlation id, publishes the user message
//! event, then pumps the driver's response stream onto the bus in arrival
//! order from a spawned task. Stream failures become Stream-layer `error`
//! events so the state machine and assembler can fold them into a terminal
//! state — they are never thrown at the caller.

use std::sync::Arc;

use async_trait::async_trait;
use futures::StreamExt;
use keel_core::events::{Event, StreamEvent};
use keel_core::ids::{ExchangeId, MessageId};
use keel_core::messages::Message;
use parking_lot::Mutex;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use crate::bus::{EventBus, Subscription};
use crate::driver::{Driver, UserInput};
use crate::errors::RuntimeError;
use crate::reactor::Reactor;

struct Pump {
    cancel: CancellationToken,
    task: JoinHandle<()>,
}

/// Reactor wrapping the external driver.
pub struct DriverAdapter {
    driver: Arc<dyn Driver>,
    bus: Arc<EventBus>,
    pump: Mutex<Option<Pump>>,
}

impl DriverAdapter {
    /// Create an adapter over a driver and bus.
    #[must_use]
    pub fn new(driver: Arc<dyn Driver>, bus: Arc<EventBus>) -> Self {
        Self {
            driver,
            bus,
            pump: Mutex::new(None),
        }
    }

    /// Send a user message to the driver and start pumping its response
    /// stream onto the bus.
    ///
    /// Returns the exchange correlation id. A driver failure acquiring the
    /// stream is folded into a Stream-layer `error` event, not returned —
    /// the pipeline still reaches a terminal observable state. Errors only
    /// when a previous exchange is still streaming.
    pub async fn send(&self, text: impl Into<String>) -> Result<ExchangeId, RuntimeError> {
        {
            let pump = self.pump.lock();
            if let Some(p) = pump.as_ref() {
                if !p.task.is_finished() {
                    return Err(RuntimeError::ExchangeInFlight);
                }
            }
        }

        let text = text.into();
        let exchange_id = ExchangeId::new();
        let _ = self.bus.publish(Event::message(Message::User {
            id: MessageId::new(),
            exchange_id,
            text: text.clone(),
        }));

        let stream = match self.driver.receive(UserInput::new(text)).await {
            Ok(stream) => stream,
            Err(error) => {
                warn!(%error, "driver rejected request");
                let _ = self.bus.publish(Event::stream(StreamEvent::Error {
                    message: error.to_string(),
                }));
                return Ok(exchange_id);
            }
        };

        let cancel = CancellationToken::new();
        let task = tokio::spawn(pump_stream(
            stream,
            Arc::clone(&self.bus),
            cancel.clone(),
        ));
        *self.pump.lock() = Some(Pump { cancel, task });
        info!(%exchange_id, "exchange started");
        Ok(exchange_id)
    }

    /// Stop pumping and forward the interrupt to the driver.
    ///
    /// Fire-and-forget: no acknowledgement event is guaranteed. Pending
    /// pipeline state is discarded at the following destroy.
    pub fn abort(&self) {
        if let Some(pump) = self.pump.lock().as_ref() {
            pump.cancel.cancel();
        }
        self.driver.abort();
        debug!("abort forwarded to driver");
    }
}

async fn pump_stream(
    mut stream: crate::driver::DriverStream,
    bus: Arc<EventBus>,
    cancel: CancellationToken,
) {
    loop {
        // Drain items that are already ready before honoring cancellation,
        // so teardown flushes the tail of a finished stream.
        tokio::select! {
            biased;
            item = stream.next() => match item {
                Some(Ok(event)) => {
                    let _ = bus.publish(Event::stream(event));
                }
                Some(Err(error)) => {
                    warn!(%error, "driver stream failed");
                    let _ = bus.publish(Event::stream(StreamEvent::Error {
                        message: error.to_string(),
                    }));
                    break;
                }
                None => break,
            },
            () = cancel.cancelled() => {
                debug!("stream pump cancelled");
                break;
            }
        }
    }
}

#[async_trait]
impl Reactor for DriverAdapter {
    fn name(&self) -> &'static str {
        "driver_adapter"
    }

    // Pure producer; consumes nothing from the bus.
    fn attach(self: Arc<Self>, _bus: &Arc<EventBus>) -> Vec<Subscription> {
        Vec::new()
    }

    async fn initialize(&self) -> anyhow::Result<()> {
        self.driver.initialize().await?;
        Ok(())
    }

    async fn destroy(&self) -> anyhow::Result<()> {
        let pump = self.pump.lock().take();
        if let Some(pump) = pump {
            pump.cancel.cancel();
            if let Err(error) = pump.task.await {
                warn!(%error, "stream pump task panicked");
            }
        }
        self.driver.dispose().await?;
        Ok(())
    }
}

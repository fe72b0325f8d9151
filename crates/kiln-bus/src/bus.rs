use async_trait::async_trait;
use tokio::sync::{mpsc, Mutex};

use crate::error::BusError;
use crate::event::EventWithOrg;

/// Ordered, at-least-once queue between the store-side writers and the
/// dispatcher. FIFO per queue; no per-key ordering guarantee. The payload is
/// opaque to the bus.
#[async_trait]
pub trait EventBus: Send + Sync + 'static {
    async fn publish(&self, event: EventWithOrg) -> Result<(), BusError>;

    /// Attach the single consumer. Events published before the consumer
    /// attaches are buffered and delivered in order.
    async fn subscribe(&self) -> Result<EventReceiver, BusError>;
}

pub struct EventReceiver {
    inner: mpsc::UnboundedReceiver<EventWithOrg>,
}

impl EventReceiver {
    /// Next event, or `None` once every producer handle is gone.
    pub async fn recv(&mut self) -> Option<EventWithOrg> {
        self.inner.recv().await
    }
}

/// In-process implementation of [`EventBus`].
///
/// Queue durability across process restarts is provided by the startup
/// recovery scan, which re-derives pending work from the store.
pub struct InMemoryBus {
    tx: mpsc::UnboundedSender<EventWithOrg>,
    rx: Mutex<Option<mpsc::UnboundedReceiver<EventWithOrg>>>,
}

impl InMemoryBus {
    pub fn new() -> Self {
        let (tx, rx) = mpsc::unbounded_channel();
        InMemoryBus { tx, rx: Mutex::new(Some(rx)) }
    }
}

impl Default for InMemoryBus {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl EventBus for InMemoryBus {
    async fn publish(&self, event: EventWithOrg) -> Result<(), BusError> {
        self.tx.send(event).map_err(|_| BusError::Closed)
    }

    async fn subscribe(&self) -> Result<EventReceiver, BusError> {
        let rx = self.rx.lock().await.take().ok_or(BusError::ConsumerAttached)?;
        Ok(EventReceiver { inner: rx })
    }
}

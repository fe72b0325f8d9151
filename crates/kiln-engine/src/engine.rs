use std::sync::Arc;

use tokio_util::sync::CancellationToken;
use tracing::info;

use kiln_builder::Builder;
use kiln_bus::{EventBus, LogStream};
use kiln_store::Store;

use crate::config::EngineConfig;
use crate::dispatch::Dispatcher;
use crate::error::ServiceError;
use crate::recovery::{recover, RecoveryReport};
use crate::registry::TaskRegistry;
use crate::service::ResourceService;
use crate::watchdog::TimeoutWatchdog;

/// Wires store, bus, stream and builder into a running control plane:
/// startup recovery first, then the dispatcher consuming the bus and the
/// watchdog on its timer.
pub struct Engine {
    store: Arc<dyn Store>,
    bus: Arc<dyn EventBus>,
    stream: Arc<dyn LogStream>,
    builder: Arc<dyn Builder>,
    service: Arc<ResourceService>,
    registry: Arc<TaskRegistry>,
    config: EngineConfig,
    shutdown: CancellationToken,
}

impl Engine {
    pub fn new(
        store: Arc<dyn Store>,
        bus: Arc<dyn EventBus>,
        stream: Arc<dyn LogStream>,
        builder: Arc<dyn Builder>,
        config: EngineConfig,
    ) -> Self {
        let registry = Arc::new(TaskRegistry::new());
        let service = Arc::new(ResourceService::new(
            store.clone(),
            bus.clone(),
            stream.clone(),
            registry.clone(),
        ));
        Engine {
            store,
            bus,
            stream,
            builder,
            service,
            registry,
            config,
            shutdown: CancellationToken::new(),
        }
    }

    pub fn service(&self) -> Arc<ResourceService> {
        self.service.clone()
    }

    pub fn shutdown_token(&self) -> CancellationToken {
        self.shutdown.clone()
    }

    /// Run the startup scan, then start the dispatcher and the watchdog.
    /// Recovery publishes before the consumer attaches, so requeued work is
    /// at the head of the queue when consumption begins.
    pub async fn start(&self) -> Result<RecoveryReport, ServiceError> {
        let report = recover(&self.service, &self.store).await;

        let receiver = self.bus.subscribe().await?;
        let dispatcher = Arc::new(Dispatcher::new(
            self.service.clone(),
            self.store.clone(),
            self.builder.clone(),
            self.stream.clone(),
            self.registry.clone(),
            self.config.clone(),
            self.shutdown.clone(),
        ));
        tokio::spawn(dispatcher.run(receiver));

        let watchdog = TimeoutWatchdog::new(
            self.service.clone(),
            self.store.clone(),
            self.config.clone(),
            self.shutdown.clone(),
        );
        tokio::spawn(watchdog.run());

        info!("engine started");
        Ok(report)
    }

    /// Cooperative shutdown: running tasks observe their child tokens and
    /// persist final conditions within the grace window.
    pub fn stop(&self) {
        self.shutdown.cancel();
    }
}

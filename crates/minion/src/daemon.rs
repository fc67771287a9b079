//! Start and stop sequence of the minion.
//!
//! Start: modules are registered, the metrics endpoint is bound, the broker
//! connects, then the sink listeners start. Stop runs the other way round:
//! listeners, broker, metrics endpoint.

use std::net::{Ipv4Addr, SocketAddr};
use std::sync::Arc;

use anyhow::Context;
use minion_api::{Identified, MinionConfig, Sink, SinkModule, SINK_MODULES};
use minion_broker::{propagation, Broker, BrokerMetrics};
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{error, info, warn};

use crate::metrics_server::MetricsServer;

pub struct Minion {
    broker: Arc<Broker>,
    listeners: Vec<Arc<dyn SinkModule>>,
    shutdown: CancellationToken,
    metrics_task: Option<JoinHandle<()>>,
}

impl Minion {
    pub async fn start(config: MinionConfig) -> anyhow::Result<Self> {
        info!(
            id = %config.id,
            location = %config.location,
            broker = %config.broker_type,
            url = %config.broker_url,
            "Starting minion"
        );
        propagation::install_propagator();
        minion_rpc::register_all();
        minion_sink::register_all(&config);
        let listeners = SINK_MODULES.list();

        let metrics = Arc::new(
            BrokerMetrics::new(config.id.as_str()).context("cannot register metrics")?,
        );
        let shutdown = CancellationToken::new();
        let metrics_task = if config.stats_port > 0 {
            let server =
                MetricsServer::bind(SocketAddr::from((Ipv4Addr::UNSPECIFIED, config.stats_port)))
                    .await?;
            Some(server.spawn(Arc::clone(&metrics), shutdown.clone()))
        } else {
            None
        };

        let broker = Arc::new(Broker::from_config(&config, metrics).context("cannot create broker")?);
        if let Err(e) = broker.start().await {
            shutdown.cancel();
            return Err(e).context("cannot connect to the controller");
        }

        let minion = Self {
            broker,
            listeners: Vec::new(),
            shutdown,
            metrics_task,
        };
        minion.start_listeners(&config, listeners).await
    }

    async fn start_listeners(
        mut self,
        config: &MinionConfig,
        modules: Vec<Arc<dyn SinkModule>>,
    ) -> anyhow::Result<Self> {
        let sink: Arc<dyn Sink> = self.broker.clone();
        for module in modules {
            if let Err(e) = module.start(config, Arc::clone(&sink)).await {
                error!(module = %module.id(), error = %e, "Listener failed to start");
                self.stop().await;
                return Err(e).with_context(|| format!("cannot start listener {}", module.id()));
            }
            info!(module = %module.id(), "Listener started");
            self.listeners.push(module);
        }
        info!(listeners = self.listeners.len(), "Minion started");
        Ok(self)
    }

    /// Stops listeners, then the broker, then the metrics endpoint.
    pub async fn stop(&mut self) {
        for module in self.listeners.drain(..).rev() {
            module.stop().await;
        }
        self.broker.stop().await;
        self.shutdown.cancel();
        if let Some(task) = self.metrics_task.take() {
            if let Err(e) = task.await {
                warn!(error = %e, "Metrics endpoint task failed");
            }
        }
        info!("Minion stopped");
    }
}

/// Runs until SIGINT or SIGTERM.
pub async fn run(config: MinionConfig) -> anyhow::Result<()> {
    let mut minion = Minion::start(config).await?;
    wait_for_signal().await;
    minion.stop().await;
    Ok(())
}

async fn wait_for_signal() {
    #[cfg(unix)]
    {
        use tokio::signal::unix::{signal, SignalKind};
        match signal(SignalKind::terminate()) {
            Ok(mut term) => {
                tokio::select! {
                    _ = tokio::signal::ctrl_c() => info!("Received SIGINT"),
                    _ = term.recv() => info!("Received SIGTERM"),
                }
                return;
            }
            Err(e) => warn!(error = %e, "Cannot install SIGTERM handler"),
        }
    }
    if let Err(e) = tokio::signal::ctrl_c().await {
        warn!(error = %e, "Cannot wait for SIGINT");
    }
}

//! Heartbeat sink module: the minion's identity, sent every 30 seconds.

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use minion_api::dto::MinionIdentityDto;
use minion_api::{Identified, MinionConfig, Sink, SinkMessage, SinkModule, ToXml};
use tokio::time::MissedTickBehavior;
use tracing::{debug, info, warn};

use crate::listener::ListenerTasks;

pub const HEARTBEAT_MODULE_ID: &str = "Heartbeat";
pub const HEARTBEAT_INTERVAL: Duration = Duration::from_secs(30);

/// Announces the minion's identity to the controller on a fixed period.
pub struct HeartbeatModule {
    interval: Duration,
    tasks: ListenerTasks,
}

impl HeartbeatModule {
    pub fn new() -> Self {
        Self::with_interval(HEARTBEAT_INTERVAL)
    }

    /// Heartbeats every `interval` instead of [`HEARTBEAT_INTERVAL`].
    pub fn with_interval(interval: Duration) -> Self {
        Self {
            interval,
            tasks: ListenerTasks::new(),
        }
    }
}

impl Default for HeartbeatModule {
    fn default() -> Self {
        Self::new()
    }
}

impl Identified for HeartbeatModule {
    fn id(&self) -> &str {
        HEARTBEAT_MODULE_ID
    }
}

#[async_trait]
impl SinkModule for HeartbeatModule {
    async fn start(&self, config: &MinionConfig, sink: Arc<dyn Sink>) -> minion_api::Result<()> {
        let id = config.id.clone();
        let location = config.location.clone();
        let cancel = self.tasks.token();
        let mut ticker = tokio::time::interval(self.interval);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);

        self.tasks.spawn(async move {
            loop {
                tokio::select! {
                    _ = cancel.cancelled() => break,
                    _ = ticker.tick() => {
                        let beat = MinionIdentityDto::now(id.as_str(), location.as_str());
                        let message = SinkMessage::new(HEARTBEAT_MODULE_ID, beat.to_xml_bytes());
                        match sink.send(message).await {
                            Ok(()) => debug!(id = %id, "Sent heartbeat"),
                            Err(e) => warn!(error = %e, "Failed to send heartbeat"),
                        }
                    }
                }
            }
        });
        info!(interval = ?self.interval, "Heartbeat started");
        Ok(())
    }

    async fn stop(&self) {
        self.tasks.stop(HEARTBEAT_MODULE_ID).await;
    }
}

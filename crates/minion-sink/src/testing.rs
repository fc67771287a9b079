//! A [`Sink`] that records what listeners publish, for tests.

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use minion_api::{Sink, SinkMessage};
use tokio::sync::{mpsc, Mutex};

pub struct RecordingSink {
    tx: mpsc::UnboundedSender<SinkMessage>,
    rx: Mutex<mpsc::UnboundedReceiver<SinkMessage>>,
}

impl RecordingSink {
    pub fn new() -> Arc<Self> {
        let (tx, rx) = mpsc::unbounded_channel();
        Arc::new(Self {
            tx,
            rx: Mutex::new(rx),
        })
    }

    /// Next published message; panics after five seconds without one.
    pub async fn next(&self) -> SinkMessage {
        let mut rx = self.rx.lock().await;
        match tokio::time::timeout(Duration::from_secs(5), rx.recv()).await {
            Ok(Some(message)) => message,
            _ => panic!("no sink message received"),
        }
    }

    /// Waits briefly and returns a message only if one was published.
    pub async fn try_next(&self, wait: Duration) -> Option<SinkMessage> {
        let mut rx = self.rx.lock().await;
        tokio::time::timeout(wait, rx.recv()).await.ok().flatten()
    }
}

#[async_trait]
impl Sink for RecordingSink {
    async fn send(&self, message: SinkMessage) -> minion_api::Result<()> {
        self.tx
            .send(message)
            .map_err(|e| minion_api::ApiError::send(e.0.module_id, "recorder closed"))
    }
}

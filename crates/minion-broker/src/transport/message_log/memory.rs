//! In-process message log, used when no external log is available and by
//! the tests.

use std::collections::HashMap;
use std::sync::atomic::{AtomicUsize, Ordering};

use async_trait::async_trait;
use futures::StreamExt;
use parking_lot::Mutex;
use tokio::sync::mpsc;
use tokio_stream::wrappers::UnboundedReceiverStream;

use super::{MessageLog, RecordStream};
use crate::error::{BrokerError, Result};

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Record {
    pub topic: String,
    pub key: String,
    pub payload: Vec<u8>,
}

/// Keeps every produced record and fans it out to live subscribers.
pub struct InMemoryLog {
    records: Mutex<Vec<Record>>,
    subscribers: Mutex<HashMap<String, Vec<mpsc::UnboundedSender<Vec<u8>>>>>,
    remaining: AtomicUsize,
}

impl Default for InMemoryLog {
    fn default() -> Self {
        Self::new()
    }
}

impl InMemoryLog {
    pub fn new() -> Self {
        Self {
            records: Mutex::new(Vec::new()),
            subscribers: Mutex::new(HashMap::new()),
            remaining: AtomicUsize::new(usize::MAX),
        }
    }

    /// Makes every produce after the next `n` fail.
    pub fn fail_after(&self, n: usize) {
        self.remaining.store(n, Ordering::SeqCst);
    }

    /// Live subscriptions on `topic`.
    pub fn subscriber_count(&self, topic: &str) -> usize {
        self.subscribers
            .lock()
            .get(topic)
            .map_or(0, |subscribers| subscribers.iter().filter(|tx| !tx.is_closed()).count())
    }

    /// Records produced to `topic`, oldest first.
    pub fn records(&self, topic: &str) -> Vec<Record> {
        self.records
            .lock()
            .iter()
            .filter(|r| r.topic == topic)
            .cloned()
            .collect()
    }
}

#[async_trait]
impl MessageLog for InMemoryLog {
    async fn produce(&self, topic: &str, key: &str, payload: Vec<u8>) -> Result<()> {
        let admitted = self
            .remaining
            .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |n| n.checked_sub(1))
            .is_ok();
        if !admitted {
            return Err(BrokerError::produce(topic, "log rejected the record"));
        }

        if let Some(subscribers) = self.subscribers.lock().get_mut(topic) {
            subscribers.retain(|tx| tx.send(payload.clone()).is_ok());
        }
        self.records.lock().push(Record {
            topic: topic.to_string(),
            key: key.to_string(),
            payload,
        });
        Ok(())
    }

    async fn subscribe(&self, topic: &str) -> Result<RecordStream> {
        let (tx, rx) = mpsc::unbounded_channel();
        self.subscribers
            .lock()
            .entry(topic.to_string())
            .or_default()
            .push(tx);
        Ok(UnboundedReceiverStream::new(rx).map(Ok).boxed())
    }

    async fn close(&self) {
        self.subscribers.lock().clear();
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_subscribers_see_new_records() {
        let log = InMemoryLog::new();
        let mut stream = log.subscribe("t").await.unwrap();
        log.produce("t", "k", b"one".to_vec()).await.unwrap();
        log.produce("other", "k", b"two".to_vec()).await.unwrap();
        assert_eq!(stream.next().await.unwrap().unwrap(), b"one");
        assert_eq!(log.records("t").len(), 1);
        assert_eq!(log.records("other")[0].payload, b"two");
    }

    #[tokio::test]
    async fn test_close_ends_subscriptions() {
        let log = InMemoryLog::new();
        let mut stream = log.subscribe("t").await.unwrap();
        assert_eq!(log.subscriber_count("t"), 1);
        log.close().await;
        assert_eq!(log.subscriber_count("t"), 0);
        assert!(stream.next().await.is_none());
    }

    #[tokio::test]
    async fn test_fail_after() {
        let log = InMemoryLog::new();
        log.fail_after(2);
        assert!(log.produce("t", "k", vec![1]).await.is_ok());
        assert!(log.produce("t", "k", vec![2]).await.is_ok());
        assert!(log.produce("t", "k", vec![3]).await.is_err());
        assert_eq!(log.records("t").len(), 2);
    }
}

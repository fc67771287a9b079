//! Task bookkeeping shared by the listeners.

use std::future::Future;
use std::sync::atomic::{AtomicBool, Ordering};

use tokio_util::sync::CancellationToken;
use tokio_util::task::TaskTracker;
use tracing::debug;

/// Background tasks of one listener, stopped together.
#[derive(Debug, Default)]
pub struct ListenerTasks {
    cancel: CancellationToken,
    tracker: TaskTracker,
    stopping: AtomicBool,
}

impl ListenerTasks {
    pub fn new() -> Self {
        Self::default()
    }

    /// Token cancelled when the listener stops.
    pub fn token(&self) -> CancellationToken {
        self.cancel.clone()
    }

    /// Whether `stop` has been called. Errors raised after this are expected.
    pub fn is_stopping(&self) -> bool {
        self.stopping.load(Ordering::Acquire)
    }

    /// Handle for tasks that spawn their own children, such as accept loops.
    pub fn tracker(&self) -> TaskTracker {
        self.tracker.clone()
    }

    pub fn spawn<F>(&self, task: F)
    where
        F: Future<Output = ()> + Send + 'static,
    {
        self.tracker.spawn(task);
    }

    /// Cancels every task and waits for them. Later calls return at once.
    pub async fn stop(&self, name: &str) {
        if self.stopping.swap(true, Ordering::AcqRel) {
            return;
        }
        debug!(listener = name, tasks = self.tracker.len(), "Stopping listener");
        self.cancel.cancel();
        self.tracker.close();
        self.tracker.wait().await;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;

    #[tokio::test]
    async fn test_stop_is_idempotent() {
        let tasks = ListenerTasks::new();
        let token = tasks.token();
        tasks.spawn(async move { token.cancelled().await });
        assert!(!tasks.is_stopping());

        tokio::time::timeout(Duration::from_secs(1), tasks.stop("test"))
            .await
            .unwrap();
        assert!(tasks.is_stopping());
        tasks.stop("test").await;
    }
}

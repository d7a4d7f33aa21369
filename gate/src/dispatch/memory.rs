use std::sync::Arc;
use std::time::Duration;

use tokio::sync::{Mutex, Notify};

use crate::bail;
use crate::dispatch::base::Dispatcher;
use crate::error::{ErrorKind, GateResult};
use crate::types::TriggerMessage;

#[derive(Debug, Default)]
struct Inner {
    messages: Vec<TriggerMessage>,
    attempts: usize,
    failures_remaining: usize,
}

/// Dispatcher keeping published messages in memory.
///
/// Clones share the same messages. It can be told to fail upcoming publications.
#[derive(Debug, Clone)]
pub struct MemoryDispatcher {
    inner: Arc<Mutex<Inner>>,
    published: Arc<Notify>,
}

impl MemoryDispatcher {
    pub fn new() -> Self {
        Self {
            inner: Arc::new(Mutex::new(Inner::default())),
            published: Arc::new(Notify::new()),
        }
    }

    /// Returns every message published so far, in publication order.
    pub async fn messages(&self) -> Vec<TriggerMessage> {
        self.inner.lock().await.messages.clone()
    }

    /// Returns the number of publication attempts, failed ones included.
    pub async fn attempts(&self) -> usize {
        self.inner.lock().await.attempts
    }

    /// Makes the next `count` publications fail.
    pub async fn fail_next(&self, count: usize) {
        self.inner.lock().await.failures_remaining = count;
    }

    /// Waits until at least `count` messages are published.
    ///
    /// Returns `false` if `timeout` elapses first.
    pub async fn wait_for_messages(&self, count: usize, timeout: Duration) -> bool {
        let deadline = tokio::time::Instant::now() + timeout;

        loop {
            let published = self.published.notified();
            if self.inner.lock().await.messages.len() >= count {
                return true;
            }

            if tokio::time::timeout_at(deadline, published).await.is_err() {
                return false;
            }
        }
    }
}

impl Default for MemoryDispatcher {
    fn default() -> Self {
        Self::new()
    }
}

impl Dispatcher for MemoryDispatcher {
    async fn dispatch(&self, message: &TriggerMessage) -> GateResult<()> {
        let mut inner = self.inner.lock().await;
        inner.attempts += 1;

        if inner.failures_remaining > 0 {
            inner.failures_remaining -= 1;
            bail!(
                ErrorKind::DispatchFailed,
                "Trigger message could not be published",
                format!("publication of the trigger for {} was rejected", message.batch_key())
            );
        }

        inner.messages.push(message.clone());
        drop(inner);

        self.published.notify_waiters();

        Ok(())
    }
}

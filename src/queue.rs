//! Operator task intake and response delivery.
//!
//! Producers push JSON-encoded tasks; the station pops at most one per cycle
//! without blocking. Each consumed task gets exactly one response, kept for
//! a short time under `response:<task_id>`.

use std::collections::HashMap;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::time::{Duration, Instant};

use thiserror::Error;
use tokio::sync::mpsc::{self, error::TryRecvError};

use crate::tasks::Response;

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum QueueError {
    #[error("task queue producers disconnected")]
    Disconnected,
    #[error("response store unavailable: {0}")]
    Backend(String),
}

pub trait TaskQueue {
    /// `WouldBlock` when no task is waiting.
    fn pop(&mut self) -> nb::Result<String, QueueError>;
}

pub trait ResponseStore {
    fn put(&mut self, response: &Response, ttl: Duration) -> Result<(), QueueError>;
}

pub fn response_key(task_id: &str) -> String {
    format!("response:{task_id}")
}

pub type TaskSender = mpsc::UnboundedSender<String>;

/// Consumer end of an in-process task FIFO.
#[derive(Debug)]
pub struct ChannelTaskQueue {
    rx: mpsc::UnboundedReceiver<String>,
}

impl ChannelTaskQueue {
    pub fn channel() -> (TaskSender, Self) {
        let (tx, rx) = mpsc::unbounded_channel();
        (tx, Self { rx })
    }
}

impl TaskQueue for ChannelTaskQueue {
    fn pop(&mut self) -> nb::Result<String, QueueError> {
        match self.rx.try_recv() {
            Ok(task) => Ok(task),
            Err(TryRecvError::Empty) => Err(nb::Error::WouldBlock),
            Err(TryRecvError::Disconnected) => Err(nb::Error::Other(QueueError::Disconnected)),
        }
    }
}

#[derive(Debug)]
struct StoredResponse {
    result: String,
    expires_at: Instant,
}

/// Expiring response map shared between the station thread and the
/// operator endpoint.
#[derive(Debug, Clone, Default)]
pub struct SharedResponses {
    inner: Arc<Mutex<HashMap<String, StoredResponse>>>,
}

impl SharedResponses {
    pub fn new() -> Self {
        Self::default()
    }

    fn lock(&self) -> MutexGuard<'_, HashMap<String, StoredResponse>> {
        self.inner.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Removes and returns a live response. Expired entries read as absent.
    pub fn take(&self, task_id: &str) -> Option<String> {
        let stored = self.lock().remove(&response_key(task_id))?;
        (Instant::now() < stored.expires_at).then_some(stored.result)
    }

    pub fn purge_expired(&self) -> usize {
        let now = Instant::now();
        let mut map = self.lock();
        let before = map.len();
        map.retain(|_, stored| now < stored.expires_at);
        before - map.len()
    }

    pub fn len(&self) -> usize {
        self.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.lock().is_empty()
    }
}

impl ResponseStore for SharedResponses {
    fn put(&mut self, response: &Response, ttl: Duration) -> Result<(), QueueError> {
        let mut map = self.lock();
        let now = Instant::now();
        map.retain(|_, stored| now < stored.expires_at);
        map.insert(
            response_key(&response.task_id),
            StoredResponse {
                result: response.result.clone(),
                expires_at: now + ttl,
            },
        );
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn empty_queue_would_block() {
        let (_tx, mut queue) = ChannelTaskQueue::channel();
        assert!(matches!(queue.pop(), Err(nb::Error::WouldBlock)));
    }

    #[test]
    fn dropped_producers_disconnect() {
        let (tx, mut queue) = ChannelTaskQueue::channel();
        tx.send("{}".into()).unwrap();
        drop(tx);

        assert_eq!(queue.pop().unwrap(), "{}");
        assert!(matches!(queue.pop(), Err(nb::Error::Other(QueueError::Disconnected))));
    }
}

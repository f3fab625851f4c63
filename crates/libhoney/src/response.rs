// Copyright 2023-Present Datadog, Inc. https://www.datadoghq.com/
// SPDX-License-Identifier: Apache-2.0

use crate::error::RecvTimeout;
use crate::queue;
use serde::Serialize;
use serde_json::Value;
use std::sync::Arc;
use std::thread;
use std::time::{Duration, Instant};
use tokio::sync::mpsc::{self, error::TryRecvError, error::TrySendError};
use tokio::sync::Mutex;
use tracing::debug;

pub(crate) const SAMPLED_OUT: &str = "event dropped due to sampling";
pub(crate) const QUEUE_OVERFLOW: &str = "event dropped; queue overflow";

/// Delivery outcome of a single event.
///
/// `error` is empty on success. `metadata` is the token attached to the event,
/// handed back untouched so callers can correlate.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Response {
    pub status_code: u16,
    pub duration_ms: f64,
    pub metadata: Option<Value>,
    pub body: String,
    pub error: String,
}

impl Response {
    pub(crate) fn sampled_out(metadata: Option<Value>) -> Self {
        Self::dropped(metadata, SAMPLED_OUT)
    }

    pub(crate) fn queue_overflow(metadata: Option<Value>) -> Self {
        Self::dropped(metadata, QUEUE_OVERFLOW)
    }

    fn dropped(metadata: Option<Value>, error: &str) -> Self {
        Self {
            status_code: 0,
            duration_ms: 0.0,
            metadata,
            body: String::new(),
            error: error.to_string(),
        }
    }

    pub fn is_success(&self) -> bool {
        self.error.is_empty() && (200..300).contains(&self.status_code)
    }
}

/// Producer side of the response queue. `None` is the terminal sentinel.
#[derive(Debug, Clone)]
pub(crate) struct ResponseSink {
    tx: mpsc::Sender<Option<Response>>,
    block: bool,
}

impl ResponseSink {
    /// Pushes from synchronous code. Dropped silently when the queue is full
    /// and the sink does not block.
    pub fn push(&self, response: Response) {
        if let Err(e) = queue::put(&self.tx, Some(response), self.block) {
            match e {
                TrySendError::Full(_) => debug!("Response queue full, dropping response"),
                TrySendError::Closed(_) => debug!("Response queue closed, dropping response"),
            }
        }
    }

    pub async fn push_async(&self, response: Response) {
        if self.block {
            if self.tx.send(Some(response)).await.is_err() {
                debug!("Response queue closed, dropping response");
            }
        } else if self.tx.try_send(Some(response)).is_err() {
            debug!("Response queue full, dropping response");
        }
    }

    /// Pushes the terminal sentinel, giving up after `timeout`.
    pub fn close_blocking(&self, timeout: Duration) -> bool {
        queue::put_timeout(&self.tx, None, timeout).is_ok()
    }

    pub async fn close(&self, timeout: Duration) -> bool {
        matches!(
            tokio::time::timeout(timeout, self.tx.send(None)).await,
            Ok(Ok(()))
        )
    }
}

/// Consumer side of the response queue.
///
/// Clones share the same underlying queue; each response is observed by
/// exactly one consumer. Every receive method returns `None` for the terminal
/// sentinel pushed on close.
#[derive(Debug, Clone)]
pub struct ResponseQueue {
    rx: Arc<Mutex<mpsc::Receiver<Option<Response>>>>,
    tx: mpsc::WeakSender<Option<Response>>,
}

impl ResponseQueue {
    /// Blocks the current thread until a response is available.
    ///
    /// # Panics
    ///
    /// Panics when called from within an async runtime; use `recv_async`.
    pub fn recv(&self) -> Option<Response> {
        self.rx.blocking_lock().blocking_recv().flatten()
    }

    pub async fn recv_async(&self) -> Option<Response> {
        self.rx.lock().await.recv().await.flatten()
    }

    /// Returns `Ok(None)` for the sentinel and `TryRecvError::Empty` when
    /// nothing is queued.
    pub fn try_recv(&self) -> Result<Option<Response>, TryRecvError> {
        match self.rx.try_lock() {
            Ok(mut rx) => rx.try_recv(),
            Err(_) => Err(TryRecvError::Empty),
        }
    }

    pub fn recv_timeout(&self, timeout: Duration) -> Result<Option<Response>, RecvTimeout> {
        let deadline = Instant::now() + timeout;
        loop {
            match self.try_recv() {
                Ok(response) => return Ok(response),
                Err(TryRecvError::Disconnected) => return Ok(None),
                Err(TryRecvError::Empty) if Instant::now() >= deadline => return Err(RecvTimeout),
                Err(TryRecvError::Empty) => thread::sleep(Duration::from_millis(5)),
            }
        }
    }

    /// Number of responses waiting to be consumed, the end marker included.
    ///
    /// Counted on the producer side while a producer is alive, so a consumer
    /// parked in `recv_async` does not hide queued responses. Once every
    /// producer is gone the receiver is inspected instead, which reports 0
    /// while another consumer holds it.
    pub fn len(&self) -> usize {
        match self.tx.upgrade() {
            Some(tx) => tx.max_capacity() - tx.capacity(),
            None => self.rx.try_lock().map(|rx| rx.len()).unwrap_or(0),
        }
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

pub(crate) fn response_channel(capacity: usize, block: bool) -> (ResponseSink, ResponseQueue) {
    let (tx, rx) = mpsc::channel(capacity);
    let queue = ResponseQueue {
        rx: Arc::new(Mutex::new(rx)),
        tx: tx.downgrade(),
    };
    (ResponseSink { tx, block }, queue)
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_dropped_responses() {
        let response = Response::sampled_out(Some(json!({"id": 1})));
        assert_eq!(response.status_code, 0);
        assert_eq!(response.duration_ms, 0.0);
        assert_eq!(response.error, "event dropped due to sampling");
        assert_eq!(response.metadata, Some(json!({"id": 1})));
        assert!(!response.is_success());

        let response = Response::queue_overflow(None);
        assert_eq!(response.error, "event dropped; queue overflow");
        assert!(response.body.is_empty());
    }

    #[test]
    fn test_push_and_sentinel() {
        let (sink, queue) = response_channel(4, false);
        sink.push(Response::sampled_out(None));
        assert!(sink.close_blocking(Duration::from_millis(10)));

        assert_eq!(queue.len(), 2);
        assert_eq!(queue.recv(), Some(Response::sampled_out(None)));
        assert_eq!(queue.recv(), None);
        assert!(queue.is_empty());
    }

    #[test]
    fn test_full_queue_drops_without_blocking() {
        let (sink, queue) = response_channel(1, false);
        sink.push(Response::sampled_out(None));
        sink.push(Response::queue_overflow(None));

        assert_eq!(queue.len(), 1);
        assert_eq!(
            queue.try_recv().ok().flatten().map(|r| r.error),
            Some(SAMPLED_OUT.to_string())
        );
        assert!(matches!(queue.try_recv(), Err(TryRecvError::Empty)));
    }

    #[test]
    fn test_recv_timeout() {
        let (sink, queue) = response_channel(1, false);
        assert_eq!(
            queue.recv_timeout(Duration::from_millis(20)),
            Err(RecvTimeout)
        );

        sink.push(Response::sampled_out(None));
        assert!(queue.recv_timeout(Duration::from_millis(20)).is_ok());

        drop(sink);
        assert_eq!(queue.recv_timeout(Duration::from_millis(20)), Ok(None));
    }

    #[tokio::test]
    async fn test_len_while_receiver_is_held() {
        let (sink, queue) = response_channel(4, false);
        sink.push(Response::sampled_out(None));
        sink.push(Response::queue_overflow(None));

        let held = Arc::clone(&queue.rx);
        let _guard = held.lock().await;
        assert_eq!(queue.len(), 2);
        assert!(!queue.is_empty());
    }

    #[tokio::test]
    async fn test_async_push_and_recv() {
        let (sink, queue) = response_channel(2, true);
        sink.push_async(Response::sampled_out(None)).await;
        assert!(sink.close(Duration::from_millis(10)).await);

        assert!(queue.recv_async().await.is_some());
        assert!(queue.recv_async().await.is_none());
    }
}

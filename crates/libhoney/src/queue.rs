// Copyright 2023-Present Datadog, Inc. https://www.datadoghq.com/
// SPDX-License-Identifier: Apache-2.0

//! Put helpers over bounded tokio channels, usable from plain threads and
//! from inside a runtime.

use std::thread;
use std::time::{Duration, Instant};
use tokio::runtime::{Handle, RuntimeFlavor};
use tokio::sync::mpsc::{self, error::TrySendError};
use tracing::warn;

const POLL_INTERVAL: Duration = Duration::from_millis(5);

/// Puts `item` on the channel.
///
/// Without `block` this never waits and a full channel is reported as
/// `TrySendError::Full`. With `block` the caller waits for space: a plain
/// thread parks, a multi-thread runtime worker waits in `block_in_place`.
/// A current-thread runtime cannot wait without stalling the consumer, so
/// there a full channel is still reported as `TrySendError::Full`.
pub(crate) fn put<T>(tx: &mpsc::Sender<T>, item: T, block: bool) -> Result<(), TrySendError<T>> {
    let closed = |mpsc::error::SendError(item): mpsc::error::SendError<T>| TrySendError::Closed(item);
    match tx.try_send(item) {
        Err(TrySendError::Full(item)) if block => match Handle::try_current() {
            Err(_) => tx.blocking_send(item).map_err(closed),
            Ok(handle) if handle.runtime_flavor() == RuntimeFlavor::MultiThread => {
                tokio::task::block_in_place(|| handle.block_on(tx.send(item))).map_err(closed)
            }
            Ok(_) => {
                warn!("Queue full and a current-thread runtime cannot block, not waiting");
                Err(TrySendError::Full(item))
            }
        },
        other => other,
    }
}

/// Puts `item` on the channel, waiting at most `timeout` for space.
///
/// Polls instead of parking so it is safe to call from any context. The item
/// is given back on timeout or when the receiver is gone.
pub(crate) fn put_timeout<T>(tx: &mpsc::Sender<T>, item: T, timeout: Duration) -> Result<(), T> {
    let deadline = Instant::now() + timeout;
    let mut item = item;
    loop {
        match tx.try_send(item) {
            Ok(()) => return Ok(()),
            Err(TrySendError::Closed(returned)) => return Err(returned),
            Err(TrySendError::Full(returned)) => {
                if Instant::now() >= deadline {
                    return Err(returned);
                }
                item = returned;
                thread::sleep(POLL_INTERVAL);
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_put_non_blocking_reports_full() {
        let (tx, mut rx) = mpsc::channel(1);
        assert!(put(&tx, 1, false).is_ok());
        assert!(matches!(put(&tx, 2, false), Err(TrySendError::Full(2))));
        assert_eq!(rx.try_recv().ok(), Some(1));
    }

    #[test]
    fn test_put_closed() {
        let (tx, rx) = mpsc::channel::<u32>(1);
        drop(rx);
        assert!(matches!(put(&tx, 1, true), Err(TrySendError::Closed(1))));
    }

    #[test]
    fn test_put_blocking_waits_for_space() {
        let (tx, mut rx) = mpsc::channel(1);
        put(&tx, 1, true).expect("first put");

        let consumer = thread::spawn(move || {
            thread::sleep(Duration::from_millis(50));
            let first = rx.blocking_recv();
            let second = rx.blocking_recv();
            (first, second)
        });

        put(&tx, 2, true).expect("second put");
        drop(tx);
        assert_eq!(consumer.join().expect("consumer"), (Some(1), Some(2)));
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 2)]
    async fn test_put_blocking_inside_multi_thread_runtime_waits() {
        let (tx, mut rx) = mpsc::channel(1);
        put(&tx, 1, true).expect("first put");

        let consumer = tokio::spawn(async move {
            tokio::time::sleep(Duration::from_millis(50)).await;
            let first = rx.recv().await;
            let second = rx.recv().await;
            (first, second)
        });

        put(&tx, 2, true).expect("second put");
        assert_eq!(tx.capacity(), 0);
        drop(tx);
        assert_eq!(consumer.await.expect("consumer"), (Some(1), Some(2)));
    }

    #[tokio::test]
    async fn test_put_blocking_inside_current_thread_runtime_reports_full() {
        let (tx, mut rx) = mpsc::channel(1);
        put(&tx, 1, true).expect("first put");
        assert!(matches!(put(&tx, 2, true), Err(TrySendError::Full(2))));

        drop(tx);
        assert_eq!(rx.recv().await, Some(1));
        assert_eq!(rx.recv().await, None);
    }

    #[test]
    fn test_put_timeout() {
        let (tx, mut rx) = mpsc::channel(1);
        assert!(put_timeout(&tx, 1, Duration::from_millis(10)).is_ok());

        let start = Instant::now();
        assert_eq!(put_timeout(&tx, 2, Duration::from_millis(30)), Err(2));
        assert!(start.elapsed() >= Duration::from_millis(30));

        assert_eq!(rx.try_recv().ok(), Some(1));
        assert!(put_timeout(&tx, 3, Duration::from_millis(10)).is_ok());
    }
}

// Copyright 2023-Present Datadog, Inc. https://www.datadoghq.com/
// SPDX-License-Identifier: Apache-2.0

use serde::Serialize;
use std::sync::atomic::{AtomicU64, Ordering};

/// Engine counters, shared between producers and the control loop.
#[derive(Debug, Default)]
pub(crate) struct Stats {
    queued: AtomicU64,
    queue_overflow: AtomicU64,
    sent: AtomicU64,
    send_errors: AtomicU64,
}

/// Point in time view of the engine counters.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct StatsSnapshot {
    pub queue_length: usize,
    pub messages_queued: u64,
    pub queue_overflow: u64,
    pub messages_sent: u64,
    pub send_errors: u64,
}

impl Stats {
    pub fn incr_queued(&self) {
        self.queued.fetch_add(1, Ordering::Relaxed);
    }

    pub fn incr_queue_overflow(&self) {
        self.queue_overflow.fetch_add(1, Ordering::Relaxed);
    }

    pub fn add_sent(&self, count: u64) {
        self.sent.fetch_add(count, Ordering::Relaxed);
    }

    pub fn add_send_errors(&self, count: u64) {
        self.send_errors.fetch_add(count, Ordering::Relaxed);
    }

    pub fn snapshot(&self, queue_length: usize) -> StatsSnapshot {
        StatsSnapshot {
            queue_length,
            messages_queued: self.queued.load(Ordering::Relaxed),
            queue_overflow: self.queue_overflow.load(Ordering::Relaxed),
            messages_sent: self.sent.load(Ordering::Relaxed),
            send_errors: self.send_errors.load(Ordering::Relaxed),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_counters() {
        let stats = Stats::default();
        stats.incr_queued();
        stats.incr_queued();
        stats.incr_queue_overflow();
        stats.add_sent(5);
        stats.add_send_errors(2);

        let snapshot = stats.snapshot(3);
        assert_eq!(
            snapshot,
            StatsSnapshot {
                queue_length: 3,
                messages_queued: 2,
                queue_overflow: 1,
                messages_sent: 5,
                send_errors: 2,
            }
        );
        let json = serde_json::to_value(snapshot).expect("serializable");
        assert_eq!(json["messages_sent"], 5);
    }
}

// Copyright 2023-Present Datadog, Inc. https://www.datadoghq.com/
// SPDX-License-Identifier: Apache-2.0

//! Delivery of events to the ingestion API.
//!
//! Events go through a bounded pending queue into a control loop that batches
//! them by destination, on a size or time trigger, and sends each batch with a
//! bounded number of requests in flight. Every event that reaches the engine
//! produces exactly one `Response`.
//!
//! The same control loop backs two drivers: `ThreadedTransmission` runs it on
//! a dedicated thread with its own runtime, `AsyncTransmission` runs it as a
//! task on the caller's runtime.

pub mod batch;
mod control;
pub mod file;
pub mod sender;
pub mod stats;
pub mod task;
pub mod threaded;

use async_trait::async_trait;

use crate::error::Error;
use crate::event::Event;
use crate::response::{Response, ResponseQueue};

pub use file::FileTransmission;
pub use stats::StatsSnapshot;
pub use task::AsyncTransmission;
pub use threaded::ThreadedTransmission;

/// A sink for events.
#[async_trait]
pub trait Transmission: Send + Sync {
    fn start(&self) -> Result<(), Error>;

    /// Accepts an event for delivery. Never fails: capacity problems are
    /// reported on the response queue.
    fn send(&self, event: Event);

    /// `send` for async callers. Waits for queue space without blocking the
    /// runtime thread when the transmission blocks on send.
    async fn send_async(&self, event: Event) {
        self.send(event)
    }

    /// Delivers everything accepted so far and stops.
    fn close(&self);

    /// Consumer handle of the response queue, if this transmission has one.
    fn responses(&self) -> Option<ResponseQueue>;

    /// Pushes a response that did not come from a delivery attempt, such as
    /// an event dropped by the sampler.
    fn push_response(&self, response: Response);

    fn flush(&self) {}
}

/// Items of the pending queue.
#[derive(Debug)]
pub(crate) enum Pending {
    Event(Box<Event>),
    Shutdown,
}

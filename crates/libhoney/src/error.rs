// Copyright 2023-Present Datadog, Inc. https://www.datadoghq.com/
// SPDX-License-Identifier: Apache-2.0

/// Errors raised while configuring or starting the library.
#[derive(Debug, thiserror::Error)]
pub enum Error {
    #[error("Invalid configuration: {0}")]
    InvalidConfig(String),

    #[error("add requires a JSON object, got {0}")]
    InvalidFields(&'static str),

    #[error("AsyncTransmission must be started from within a tokio runtime")]
    NoRuntime,

    #[error("Failed to build HTTP client: {0}")]
    HttpClient(#[from] reqwest::Error),

    #[error("Failed to start transmission worker: {0}")]
    Worker(#[from] std::io::Error),
}

/// Errors returned synchronously by `Event::send` and `Event::send_presampled`.
///
/// These indicate a programming mistake (an event that can never be delivered),
/// not an operational failure. Delivery failures are reported on the response
/// queue instead.
#[derive(Debug, Clone, Copy, PartialEq, Eq, thiserror::Error)]
pub enum SendError {
    #[error("Tried to send on a closed or uninitialized client")]
    NotReady,

    #[error("No metrics added to event. Won't send empty event.")]
    EmptyFields,

    #[error("No api_host for Honeycomb. Can't send to the Great Unknown.")]
    MissingApiHost,

    #[error("No writekey specified. Can't send event.")]
    MissingWriteKey,

    #[error("No dataset for Honeycomb. Can't send event without knowing which dataset it belongs to.")]
    MissingDataset,
}

/// Returned by `ResponseQueue::recv_timeout` when nothing arrived in time.
#[derive(Debug, Clone, Copy, PartialEq, Eq, thiserror::Error)]
#[error("Timed out waiting for a response")]
pub struct RecvTimeout;

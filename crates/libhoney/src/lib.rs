// Copyright 2023-Present Datadog, Inc. https://www.datadoghq.com/
// SPDX-License-Identifier: Apache-2.0

//! Batching client for sending structured events to Honeycomb.
//!
//! ```rust,ignore
//! let client = Client::new(ClientConfig {
//!     writekey: "my-key".to_string(),
//!     dataset: "my-dataset".to_string(),
//!     ..Default::default()
//! })?;
//! client.add_field("service", "checkout");
//!
//! let mut event = client.new_event();
//! event.add_field("duration_ms", 153.12);
//! event.send()?;
//!
//! client.close();
//! while let Some(response) = client.responses().and_then(|r| r.recv()) {
//!     println!("{} {}", response.status_code, response.error);
//! }
//! ```

#![cfg_attr(not(test), deny(clippy::panic))]
#![cfg_attr(not(test), deny(clippy::unwrap_used))]
#![cfg_attr(not(test), deny(clippy::expect_used))]
#![cfg_attr(not(test), deny(clippy::todo))]
#![cfg_attr(not(test), deny(clippy::unimplemented))]

pub mod builder;
pub mod client;
pub mod config;
pub mod error;
pub mod event;
pub mod fields;
pub mod global;
mod queue;
pub mod response;
pub mod transmission;

pub use builder::Builder;
pub use client::Client;
pub use config::{ClientConfig, TransmissionConfig, DEFAULT_API_HOST};
pub use error::{Error, RecvTimeout, SendError};
pub use event::{should_drop, should_drop_with, Event, Timer};
pub use fields::{DynamicField, FieldHolder};
pub use response::{Response, ResponseQueue};
pub use transmission::{
    AsyncTransmission, FileTransmission, StatsSnapshot, ThreadedTransmission, Transmission,
};

// Copyright 2023-Present Datadog, Inc. https://www.datadoghq.com/
// SPDX-License-Identifier: Apache-2.0

//! Process-wide client for code that does not want to pass a `Client` around.
//!
//! Everything here is a no-op until `init` is called. Events created before
//! that are accepted and discarded, with a single warning for the process.

use crate::builder::Builder;
use crate::client::Client;
use crate::config::ClientConfig;
use crate::error::Error;
use crate::event::Event;
use crate::fields::{DynamicField, FieldHolder};
use crate::response::ResponseQueue;
use serde_json::Value;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::RwLock;
use tracing::warn;

static GLOBAL_CLIENT: RwLock<Option<Client>> = RwLock::new(None);
static WARNED_UNINITIALIZED: AtomicBool = AtomicBool::new(false);

/// Initializes the global client. A second call keeps the first client.
pub fn init(config: ClientConfig) -> Result<(), Error> {
    let mut global = write_client();
    if global.is_some() {
        warn!("libhoney is already initialized, ignoring init");
        return Ok(());
    }
    *global = Some(Client::new(config)?);
    Ok(())
}

/// Initializes the global client with an already built client.
pub fn init_with_client(client: Client) {
    let mut global = write_client();
    if global.is_some() {
        warn!("libhoney is already initialized, ignoring init");
        return;
    }
    *global = Some(client);
}

/// Closes and forgets the global client. Safe to call when not initialized.
pub fn close() {
    let client = write_client().take();
    if let Some(client) = client {
        client.close();
    }
}

/// Delivers everything the global client has pending.
pub fn flush() {
    if let Some(client) = client() {
        client.flush();
    }
}

pub fn client() -> Option<Client> {
    read_client()
}

pub fn responses() -> Option<ResponseQueue> {
    client().and_then(|client| client.responses())
}

pub fn add_field(name: impl Into<String>, value: impl Into<Value>) {
    match client() {
        Some(client) => client.add_field(name, value),
        None => warn_uninitialized(),
    }
}

pub fn add_dynamic_field(field: DynamicField) {
    match client() {
        Some(client) => client.add_dynamic_field(field),
        None => warn_uninitialized(),
    }
}

pub fn add<I, K, V>(data: I)
where
    I: IntoIterator<Item = (K, V)>,
    K: Into<String>,
    V: Into<Value>,
{
    match client() {
        Some(client) => client.add(data),
        None => warn_uninitialized(),
    }
}

/// Events from here warn instead of failing when sent without a client.
pub fn new_event() -> Event {
    Event::new(client().as_ref(), &FieldHolder::new()).mark_global()
}

pub fn new_builder() -> Builder {
    Builder::new(client().as_ref(), &FieldHolder::new()).mark_global()
}

pub fn send_now<I, K, V>(data: I)
where
    I: IntoIterator<Item = (K, V)>,
    K: Into<String>,
    V: Into<Value>,
{
    let mut event = new_event();
    event.add(data);
    if let Err(e) = event.send() {
        warn!("Failed to send event: {}", e);
    }
}

pub(crate) fn warn_uninitialized() {
    if !WARNED_UNINITIALIZED.swap(true, Ordering::Relaxed) {
        warn!("libhoney is not initialized: call init before sending events");
    }
}

#[allow(clippy::expect_used)]
fn read_client() -> Option<Client> {
    GLOBAL_CLIENT.read().expect("lock poisoned").clone()
}

#[allow(clippy::expect_used)]
fn write_client() -> std::sync::RwLockWriteGuard<'static, Option<Client>> {
    GLOBAL_CLIENT.write().expect("lock poisoned")
}

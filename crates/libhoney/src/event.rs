// Copyright 2023-Present Datadog, Inc. https://www.datadoghq.com/
// SPDX-License-Identifier: Apache-2.0

use crate::client::{Client, ScopeConfig};
use crate::error::{Error, SendError};
use crate::fields::FieldHolder;
use crate::global;
use chrono::{DateTime, SecondsFormat, Utc};
use serde_json::{Map, Value};
use std::time::Instant;

/// A single unit of telemetry.
///
/// Holds a snapshot of the fields of the scope it was created from, with every
/// dynamic field evaluated once at construction. Destination and sample rate
/// are copied from that scope and may be changed before sending.
#[derive(Debug, Clone)]
pub struct Event {
    pub writekey: String,
    pub dataset: String,
    pub api_host: String,
    pub sample_rate: u32,
    pub created_at: DateTime<Utc>,
    /// Opaque token returned on the matching `Response`; never transmitted.
    pub metadata: Option<Value>,
    fields: FieldHolder,
    client: Option<Client>,
    global: bool,
}

impl Default for Event {
    fn default() -> Self {
        Self::new(None, &FieldHolder::new())
    }
}

impl Event {
    /// Builds an event from the client's current scope merged with `fields`.
    pub fn new(client: Option<&Client>, fields: &FieldHolder) -> Self {
        let mut holder = client.map(Client::fields).unwrap_or_default();
        holder.merge(fields);
        holder.evaluate_dynamic_fields();

        let scope = client.map(Client::scope).unwrap_or_default();
        Self::with_scope(client.cloned(), holder, scope)
    }

    pub(crate) fn with_scope(client: Option<Client>, fields: FieldHolder, scope: ScopeConfig) -> Self {
        Self {
            writekey: scope.writekey,
            dataset: scope.dataset,
            api_host: scope.api_host,
            sample_rate: scope.sample_rate,
            created_at: Utc::now(),
            metadata: None,
            fields,
            client,
            global: false,
        }
    }

    pub(crate) fn mark_global(mut self) -> Self {
        self.global = true;
        self
    }

    pub fn add_field(&mut self, name: impl Into<String>, value: impl Into<Value>) {
        self.fields.add_field(name, value);
    }

    pub fn add<I, K, V>(&mut self, data: I)
    where
        I: IntoIterator<Item = (K, V)>,
        K: Into<String>,
        V: Into<Value>,
    {
        self.fields.add(data);
    }

    pub fn add_json(&mut self, data: Value) -> Result<(), Error> {
        self.fields.add_json(data)
    }

    pub fn add_metadata(&mut self, metadata: impl Into<Value>) {
        self.metadata = Some(metadata.into());
    }

    pub fn fields(&self) -> &Map<String, Value> {
        self.fields.fields()
    }

    /// `created_at` as RFC 3339 in UTC with a `Z` suffix.
    pub fn timestamp(&self) -> String {
        self.created_at.to_rfc3339_opts(SecondsFormat::AutoSi, true)
    }

    /// Starts a timer that stores the elapsed milliseconds under `name` when
    /// the returned guard is dropped, including while unwinding.
    pub fn timer(&mut self, name: impl Into<String>) -> Timer<'_> {
        Timer {
            event: self,
            name: name.into(),
            start: Instant::now(),
        }
    }

    /// Runs `f` and records how long it took under `name`.
    pub fn timed<F, R>(&mut self, name: impl Into<String>, f: F) -> R
    where
        F: FnOnce() -> R,
    {
        let _timer = self.timer(name);
        f()
    }

    /// Samples the event, then hands it to the client's transmission.
    ///
    /// Events dropped by the sampler still produce a response.
    pub fn send(&self) -> Result<(), SendError> {
        let Some(client) = self.open_client() else {
            return self.not_ready();
        };
        if should_drop(self.sample_rate) {
            client.send_dropped_response(self);
            return Ok(());
        }
        self.send_presampled()
    }

    /// Sends without sampling, for callers that already made the sampling
    /// decision. `sample_rate` is still transmitted.
    pub fn send_presampled(&self) -> Result<(), SendError> {
        self.validate()?;
        let Some(client) = self.open_client() else {
            return self.not_ready();
        };
        client.enqueue(self.snapshot());
        Ok(())
    }

    /// `send` for async callers: waits for queue space without blocking the
    /// runtime thread when the transmission blocks on send.
    pub async fn send_async(&self) -> Result<(), SendError> {
        let Some(client) = self.open_client() else {
            return self.not_ready();
        };
        if should_drop(self.sample_rate) {
            client.send_dropped_response(self);
            return Ok(());
        }
        self.send_presampled_async().await
    }

    pub async fn send_presampled_async(&self) -> Result<(), SendError> {
        self.validate()?;
        let Some(client) = self.open_client() else {
            return self.not_ready();
        };
        client.enqueue_async(self.snapshot()).await;
        Ok(())
    }

    fn validate(&self) -> Result<(), SendError> {
        if self.fields.is_empty() {
            return Err(SendError::EmptyFields);
        }
        if self.api_host.is_empty() {
            return Err(SendError::MissingApiHost);
        }
        if self.writekey.is_empty() {
            return Err(SendError::MissingWriteKey);
        }
        if self.dataset.is_empty() {
            return Err(SendError::MissingDataset);
        }
        Ok(())
    }

    fn open_client(&self) -> Option<&Client> {
        self.client.as_ref().filter(|client| client.is_open())
    }

    fn not_ready(&self) -> Result<(), SendError> {
        if self.global {
            global::warn_uninitialized();
            Ok(())
        } else {
            Err(SendError::NotReady)
        }
    }

    // The engine keeps its own copy without the client handle, so queued
    // events never keep a client alive.
    fn snapshot(&self) -> Event {
        Event {
            writekey: self.writekey.clone(),
            dataset: self.dataset.clone(),
            api_host: self.api_host.clone(),
            sample_rate: self.sample_rate,
            created_at: self.created_at,
            metadata: self.metadata.clone(),
            fields: self.fields.clone(),
            client: None,
            global: self.global,
        }
    }
}

/// Records elapsed wall-clock milliseconds on its event when dropped.
pub struct Timer<'a> {
    event: &'a mut Event,
    name: String,
    start: Instant,
}

impl Drop for Timer<'_> {
    fn drop(&mut self) {
        let elapsed_ms = self.start.elapsed().as_secs_f64() * 1000.0;
        self.event
            .add_field(std::mem::take(&mut self.name), elapsed_ms);
    }
}

/// True when an event with this sample rate should be dropped.
pub fn should_drop(rate: u32) -> bool {
    should_drop_with(rate, &mut fastrand::Rng::new())
}

/// Keeps one event in `rate`: draws uniformly from `[1, rate]` and keeps only
/// on 1. Rates below 1 keep everything.
pub fn should_drop_with(rate: u32, rng: &mut fastrand::Rng) -> bool {
    let rate = rate.max(1);
    rng.u32(1..=rate) != 1
}

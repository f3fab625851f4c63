// Copyright 2023-Present Datadog, Inc. https://www.datadoghq.com/
// SPDX-License-Identifier: Apache-2.0

use crate::client::{Client, ScopeConfig};
use crate::error::{Error, SendError};
use crate::event::Event;
use crate::fields::{DynamicField, FieldHolder};
use serde_json::Value;

/// A reusable scope for creating events that share fields and destination.
///
/// The client's fields are copied when the builder is created. Events created
/// later also pick up fields added to the client in the meantime, with the
/// builder's own fields winning.
#[derive(Debug, Clone)]
pub struct Builder {
    pub writekey: String,
    pub dataset: String,
    pub api_host: String,
    pub sample_rate: u32,
    fields: FieldHolder,
    client: Option<Client>,
    global: bool,
}

impl Builder {
    pub fn new(client: Option<&Client>, fields: &FieldHolder) -> Self {
        let mut holder = client.map(Client::fields).unwrap_or_default();
        holder.merge(fields);
        let scope = client.map(Client::scope).unwrap_or_default();
        Self {
            writekey: scope.writekey,
            dataset: scope.dataset,
            api_host: scope.api_host,
            sample_rate: scope.sample_rate,
            fields: holder,
            client: client.cloned(),
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

    pub fn add_dynamic_field(&mut self, field: DynamicField) {
        self.fields.add_dynamic_field(field);
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

    pub fn fields(&self) -> &FieldHolder {
        &self.fields
    }

    pub fn new_event(&self) -> Event {
        let mut holder = self
            .client
            .as_ref()
            .map(Client::fields)
            .unwrap_or_default();
        holder.merge(&self.fields);
        holder.evaluate_dynamic_fields();

        let scope = ScopeConfig {
            writekey: self.writekey.clone(),
            dataset: self.dataset.clone(),
            api_host: self.api_host.clone(),
            sample_rate: self.sample_rate,
        };
        let event = Event::with_scope(self.client.clone(), holder, scope);
        if self.global {
            event.mark_global()
        } else {
            event
        }
    }

    /// Creates an event from this scope, adds `data` and sends it.
    pub fn send_now<I, K, V>(&self, data: I) -> Result<(), SendError>
    where
        I: IntoIterator<Item = (K, V)>,
        K: Into<String>,
        V: Into<Value>,
    {
        let mut event = self.new_event();
        event.add(data);
        event.send()
    }
}

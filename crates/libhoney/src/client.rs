// Copyright 2023-Present Datadog, Inc. https://www.datadoghq.com/
// SPDX-License-Identifier: Apache-2.0

use crate::builder::Builder;
use crate::config::{ClientConfig, DEFAULT_API_HOST};
use crate::error::{Error, SendError};
use crate::event::Event;
use crate::fields::{DynamicField, FieldHolder};
use crate::response::{Response, ResponseQueue};
use crate::transmission::{ThreadedTransmission, Transmission};
use serde_json::Value;
use std::fmt;
use std::sync::{Arc, RwLock, RwLockReadGuard, RwLockWriteGuard};
use tracing::{debug, warn};

/// Destination and sampling settings inherited by builders and events.
#[derive(Debug, Clone, PartialEq)]
pub(crate) struct ScopeConfig {
    pub writekey: String,
    pub dataset: String,
    pub api_host: String,
    pub sample_rate: u32,
}

impl Default for ScopeConfig {
    fn default() -> Self {
        Self {
            writekey: String::new(),
            dataset: String::new(),
            api_host: DEFAULT_API_HOST.to_string(),
            sample_rate: 1,
        }
    }
}

/// Owns a field scope and one transmission.
///
/// Cheap to clone; clones share the same scope and transmission.
#[derive(Clone)]
pub struct Client {
    inner: Arc<ClientInner>,
}

struct ClientInner {
    scope: RwLock<ScopeConfig>,
    fields: RwLock<FieldHolder>,
    transmission: RwLock<Option<Arc<dyn Transmission>>>,
    responses: Option<ResponseQueue>,
}

impl Client {
    /// Creates a client sending through a `ThreadedTransmission`.
    pub fn new(config: ClientConfig) -> Result<Self, Error> {
        config.validate()?;
        let transmission = ThreadedTransmission::new(config.transmission.clone())?;
        Self::with_transmission(config, Arc::new(transmission))
    }

    /// Creates a client on top of an existing transmission, which is started.
    pub fn with_transmission(
        config: ClientConfig,
        transmission: Arc<dyn Transmission>,
    ) -> Result<Self, Error> {
        config.validate()?;
        transmission.start()?;
        let responses = transmission.responses();
        let scope = ScopeConfig {
            writekey: config.writekey,
            dataset: config.dataset,
            api_host: config.api_host,
            sample_rate: config.sample_rate,
        };
        debug!("Client created for dataset {:?}", scope.dataset);
        Ok(Self {
            inner: Arc::new(ClientInner {
                scope: RwLock::new(scope),
                fields: RwLock::new(FieldHolder::new()),
                transmission: RwLock::new(Some(transmission)),
                responses,
            }),
        })
    }

    /// Queue of delivery outcomes, `None` when the transmission has none.
    pub fn responses(&self) -> Option<ResponseQueue> {
        self.inner.responses.clone()
    }

    pub fn add_field(&self, name: impl Into<String>, value: impl Into<Value>) {
        self.fields_mut().add_field(name, value);
    }

    pub fn add_dynamic_field(&self, field: DynamicField) {
        self.fields_mut().add_dynamic_field(field);
    }

    pub fn add<I, K, V>(&self, data: I)
    where
        I: IntoIterator<Item = (K, V)>,
        K: Into<String>,
        V: Into<Value>,
    {
        self.fields_mut().add(data);
    }

    pub fn add_json(&self, data: Value) -> Result<(), Error> {
        self.fields_mut().add_json(data)
    }

    pub fn new_event(&self) -> Event {
        Event::new(Some(self), &FieldHolder::new())
    }

    pub fn new_event_with(&self, fields: &FieldHolder) -> Event {
        Event::new(Some(self), fields)
    }

    pub fn new_builder(&self) -> Builder {
        Builder::new(Some(self), &FieldHolder::new())
    }

    pub fn new_builder_with(&self, fields: &FieldHolder) -> Builder {
        Builder::new(Some(self), fields)
    }

    /// Creates an event from the client scope, adds `data` and sends it.
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

    pub fn writekey(&self) -> String {
        self.scope().writekey
    }

    pub fn set_writekey(&self, writekey: impl Into<String>) {
        self.scope_mut().writekey = writekey.into();
    }

    pub fn dataset(&self) -> String {
        self.scope().dataset
    }

    pub fn set_dataset(&self, dataset: impl Into<String>) {
        self.scope_mut().dataset = dataset.into();
    }

    pub fn api_host(&self) -> String {
        self.scope().api_host
    }

    pub fn set_api_host(&self, api_host: impl Into<String>) {
        self.scope_mut().api_host = api_host.into();
    }

    pub fn sample_rate(&self) -> u32 {
        self.scope().sample_rate
    }

    pub fn set_sample_rate(&self, sample_rate: u32) {
        self.scope_mut().sample_rate = sample_rate.max(1);
    }

    pub fn is_open(&self) -> bool {
        self.transmission().is_some()
    }

    /// Delivers everything pending and keeps the client usable.
    pub fn flush(&self) {
        if let Some(transmission) = self.transmission() {
            transmission.flush();
        }
    }

    /// Delivers everything pending and closes the transmission. Later sends
    /// fail with `SendError::NotReady`. Calling it again is a no-op.
    pub fn close(&self) {
        let transmission = self.transmission_mut().take();
        if let Some(transmission) = transmission {
            transmission.close();
        }
    }

    pub(crate) fn fields(&self) -> FieldHolder {
        self.fields_ref().clone()
    }

    pub(crate) fn scope(&self) -> ScopeConfig {
        self.scope_ref().clone()
    }

    pub(crate) fn enqueue(&self, event: Event) {
        match self.transmission() {
            Some(transmission) => transmission.send(event),
            None => warn!("Client is closed, dropping event"),
        }
    }

    pub(crate) async fn enqueue_async(&self, event: Event) {
        let transmission = self.transmission();
        match transmission {
            Some(transmission) => transmission.send_async(event).await,
            None => warn!("Client is closed, dropping event"),
        }
    }

    pub(crate) fn send_dropped_response(&self, event: &Event) {
        if let Some(transmission) = self.transmission() {
            transmission.push_response(Response::sampled_out(event.metadata.clone()));
        }
    }

    // The transmission is cloned out so the lock is released before calling
    // into it: close and blocking sends can take a while.
    #[allow(clippy::expect_used)]
    fn transmission(&self) -> Option<Arc<dyn Transmission>> {
        self.inner
            .transmission
            .read()
            .expect("lock poisoned")
            .clone()
    }

    #[allow(clippy::expect_used)]
    fn transmission_mut(&self) -> RwLockWriteGuard<'_, Option<Arc<dyn Transmission>>> {
        self.inner.transmission.write().expect("lock poisoned")
    }

    #[allow(clippy::expect_used)]
    fn fields_ref(&self) -> RwLockReadGuard<'_, FieldHolder> {
        self.inner.fields.read().expect("lock poisoned")
    }

    #[allow(clippy::expect_used)]
    fn fields_mut(&self) -> RwLockWriteGuard<'_, FieldHolder> {
        self.inner.fields.write().expect("lock poisoned")
    }

    #[allow(clippy::expect_used)]
    fn scope_ref(&self) -> RwLockReadGuard<'_, ScopeConfig> {
        self.inner.scope.read().expect("lock poisoned")
    }

    #[allow(clippy::expect_used)]
    fn scope_mut(&self) -> RwLockWriteGuard<'_, ScopeConfig> {
        self.inner.scope.write().expect("lock poisoned")
    }
}

impl fmt::Debug for Client {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Client")
            .field("scope", &self.scope())
            .field("fields", &self.fields())
            .field("open", &self.is_open())
            .finish()
    }
}

impl Drop for ClientInner {
    fn drop(&mut self) {
        let transmission = match self.transmission.get_mut() {
            Ok(transmission) => transmission.take(),
            Err(poisoned) => poisoned.into_inner().take(),
        };
        if let Some(transmission) = transmission {
            transmission.close();
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::transmission::FileTransmission;
    use serde_json::json;
    use std::io::{self, Write};
    use std::sync::Mutex;

    #[derive(Clone, Default)]
    struct SharedBuffer(Arc<Mutex<Vec<u8>>>);

    impl SharedBuffer {
        fn lines(&self) -> Vec<Value> {
            let bytes = self.0.lock().expect("lock").clone();
            String::from_utf8(bytes)
                .expect("utf8")
                .lines()
                .map(|line| serde_json::from_str(line).expect("json line"))
                .collect()
        }
    }

    impl Write for SharedBuffer {
        fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
            self.0.lock().expect("lock").extend_from_slice(buf);
            Ok(buf.len())
        }

        fn flush(&mut self) -> io::Result<()> {
            Ok(())
        }
    }

    fn file_client(buffer: &SharedBuffer) -> Client {
        let config = ClientConfig {
            writekey: "key".to_string(),
            dataset: "ds".to_string(),
            ..Default::default()
        };
        let transmission = FileTransmission::new(Box::new(buffer.clone()), None);
        Client::with_transmission(config, Arc::new(transmission)).expect("client")
    }

    #[test]
    fn test_invalid_config_is_rejected() {
        let config = ClientConfig {
            sample_rate: 0,
            ..Default::default()
        };
        assert!(matches!(Client::new(config), Err(Error::InvalidConfig(_))));
    }

    #[test]
    fn test_events_inherit_client_scope() {
        let buffer = SharedBuffer::default();
        let client = file_client(&buffer);
        client.add_field("service", "checkout");
        client.add_dynamic_field(DynamicField::new("pid", || 99));
        client.set_sample_rate(5);

        let mut fields = FieldHolder::new();
        fields.add_field("service", "override");
        let event = client.new_event_with(&fields);

        assert_eq!(event.writekey, "key");
        assert_eq!(event.dataset, "ds");
        assert_eq!(event.sample_rate, 5);
        assert_eq!(event.fields().get("service"), Some(&json!("override")));
        assert_eq!(event.fields().get("pid"), Some(&json!(99)));
    }

    #[test]
    fn test_scope_changes_only_affect_later_events() {
        let buffer = SharedBuffer::default();
        let client = file_client(&buffer);
        let before = client.new_event();
        client.set_dataset("other");
        client.add_field("late", true);

        assert_eq!(before.dataset, "ds");
        assert!(before.fields().get("late").is_none());
        assert_eq!(client.new_event().dataset, "other");
    }

    #[test]
    fn test_builder_picks_up_later_client_fields() {
        let buffer = SharedBuffer::default();
        let client = file_client(&buffer);
        let mut builder = client.new_builder();
        builder.add_field("builder", 1);
        client.add_field("client", 2);

        let event = builder.new_event();
        assert_eq!(event.fields().get("builder"), Some(&json!(1)));
        assert_eq!(event.fields().get("client"), Some(&json!(2)));
    }

    #[test]
    fn test_send_now_and_close() {
        let buffer = SharedBuffer::default();
        let client = file_client(&buffer);
        assert!(client.is_open());
        assert!(client.responses().is_none());

        client.send_now([("a", 1)]).expect("sent");
        client.close();
        client.close();

        assert!(!client.is_open());
        assert_eq!(client.send_now([("a", 2)]), Err(SendError::NotReady));

        let lines = buffer.lines();
        assert_eq!(lines.len(), 1);
        assert_eq!(lines[0]["data"], json!({"a": 1}));
        assert_eq!(lines[0]["dataset"], "ds");
    }

    #[test]
    fn test_send_validates_before_enqueue() {
        let buffer = SharedBuffer::default();
        let client = file_client(&buffer);
        client.set_writekey("");

        assert_eq!(client.new_event().send(), Err(SendError::EmptyFields));
        assert_eq!(
            client.send_now([("a", 1)]),
            Err(SendError::MissingWriteKey)
        );
        assert!(buffer.lines().is_empty());
    }

    #[tokio::test]
    async fn test_send_async() {
        let buffer = SharedBuffer::default();
        let client = file_client(&buffer);

        let mut event = client.new_event();
        assert_eq!(event.send_async().await, Err(SendError::EmptyFields));
        event.add_field("a", 1);
        event.send_async().await.expect("sent");
        event.send_presampled_async().await.expect("sent");

        client.close();
        assert_eq!(event.send_async().await, Err(SendError::NotReady));
        assert_eq!(buffer.lines().len(), 2);
    }

    #[test]
    fn test_sampled_out_events_are_not_written() {
        let buffer = SharedBuffer::default();
        let client = file_client(&buffer);
        client.set_sample_rate(1_000_000);

        let sent = (0..20)
            .filter(|i| client.send_now([("i", *i)]).is_ok())
            .count();
        assert_eq!(sent, 20);
        assert!(buffer.lines().len() < 20);
    }

    #[test]
    fn test_send_presampled_skips_sampling() {
        let buffer = SharedBuffer::default();
        let client = file_client(&buffer);
        client.set_sample_rate(1_000_000);

        let mut event = client.new_event();
        event.add_field("a", 1);
        event.send_presampled().expect("sent");
        assert_eq!(buffer.lines()[0]["samplerate"], 1_000_000);
    }
}

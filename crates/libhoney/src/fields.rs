// Copyright 2023-Present Datadog, Inc. https://www.datadoghq.com/
// SPDX-License-Identifier: Apache-2.0

//! Field storage shared by clients, builders and events.

use crate::error::Error;
use serde_json::{Map, Value};
use std::collections::BTreeMap;
use std::fmt;
use std::sync::Arc;

pub type DynamicFn = Arc<dyn Fn() -> Value + Send + Sync>;

/// A named zero-argument function evaluated once each time an event is created.
/// Its return value is stored on the event under `name`.
#[derive(Clone)]
pub struct DynamicField {
    name: String,
    func: DynamicFn,
}

impl DynamicField {
    pub fn new<F, V>(name: impl Into<String>, func: F) -> Self
    where
        F: Fn() -> V + Send + Sync + 'static,
        V: Into<Value>,
    {
        Self {
            name: name.into(),
            func: Arc::new(move || func().into()),
        }
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn evaluate(&self) -> Value {
        (self.func)()
    }
}

impl PartialEq for DynamicField {
    fn eq(&self, other: &Self) -> bool {
        self.name == other.name && Arc::ptr_eq(&self.func, &other.func)
    }
}

impl fmt::Debug for DynamicField {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "DynamicField({})", self.name)
    }
}

/// Static fields plus dynamic fields.
///
/// Static fields are last-write-wins. Dynamic fields are keyed by name, so
/// registering a second function under the same name replaces the first.
#[derive(Clone, Default, PartialEq)]
pub struct FieldHolder {
    data: Map<String, Value>,
    dyn_fields: BTreeMap<String, DynamicField>,
}

impl FieldHolder {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn add_field(&mut self, name: impl Into<String>, value: impl Into<Value>) {
        self.data.insert(name.into(), value.into());
    }

    pub fn add_dynamic_field(&mut self, field: DynamicField) {
        self.dyn_fields.insert(field.name.clone(), field);
    }

    pub fn add<I, K, V>(&mut self, data: I)
    where
        I: IntoIterator<Item = (K, V)>,
        K: Into<String>,
        V: Into<Value>,
    {
        for (name, value) in data {
            self.add_field(name, value);
        }
    }

    /// Adds every key/value pair of a JSON object.
    ///
    /// Anything other than an object is rejected with `Error::InvalidFields`.
    pub fn add_json(&mut self, data: Value) -> Result<(), Error> {
        match data {
            Value::Object(map) => {
                self.data.extend(map);
                Ok(())
            }
            Value::Null => Err(Error::InvalidFields("null")),
            Value::Bool(_) => Err(Error::InvalidFields("a boolean")),
            Value::Number(_) => Err(Error::InvalidFields("a number")),
            Value::String(_) => Err(Error::InvalidFields("a string")),
            Value::Array(_) => Err(Error::InvalidFields("an array")),
        }
    }

    /// Merges `other` into `self`; `other` wins on conflicting names.
    pub fn merge(&mut self, other: &FieldHolder) {
        self.data
            .extend(other.data.iter().map(|(k, v)| (k.clone(), v.clone())));
        self.dyn_fields.extend(
            other
                .dyn_fields
                .iter()
                .map(|(k, v)| (k.clone(), v.clone())),
        );
    }

    /// True when no static field is set. Dynamic fields do not count until
    /// they have been evaluated into an event.
    pub fn is_empty(&self) -> bool {
        self.data.is_empty()
    }

    pub fn fields(&self) -> &Map<String, Value> {
        &self.data
    }

    pub fn get(&self, name: &str) -> Option<&Value> {
        self.data.get(name)
    }

    pub fn dynamic_fields(&self) -> impl Iterator<Item = &DynamicField> {
        self.dyn_fields.values()
    }

    pub(crate) fn evaluate_dynamic_fields(&mut self) {
        for field in self.dyn_fields.values() {
            self.data.insert(field.name.clone(), field.evaluate());
        }
    }
}

impl fmt::Debug for FieldHolder {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("FieldHolder")
            .field("data", &self.data)
            .field("dyn_fields", &self.dyn_fields.keys().collect::<Vec<_>>())
            .finish()
    }
}

impl fmt::Display for FieldHolder {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match serde_json::to_string(&self.data) {
            Ok(json) => f.write_str(&json),
            Err(_) => Err(fmt::Error),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;
    use std::sync::atomic::{AtomicUsize, Ordering};

    #[test]
    fn test_add_field_last_write_wins() {
        let mut fields = FieldHolder::new();
        assert!(fields.is_empty());

        fields.add_field("a", 1);
        fields.add_field("a", "two");

        assert!(!fields.is_empty());
        assert_eq!(fields.get("a"), Some(&json!("two")));
        assert_eq!(fields.fields().len(), 1);
    }

    #[test]
    fn test_add_pairs() {
        let mut fields = FieldHolder::new();
        fields.add([("a", json!(1)), ("b", json!({"nested": true}))]);

        assert_eq!(fields.get("a"), Some(&json!(1)));
        assert_eq!(fields.get("b"), Some(&json!({"nested": true})));
    }

    #[test]
    fn test_add_json_rejects_non_objects() {
        let mut fields = FieldHolder::new();
        assert!(fields.add_json(json!({"a": 1})).is_ok());
        assert!(matches!(
            fields.add_json(json!([1, 2])),
            Err(Error::InvalidFields("an array"))
        ));
        assert!(matches!(
            fields.add_json(json!("a")),
            Err(Error::InvalidFields("a string"))
        ));
        assert_eq!(fields.fields().len(), 1);
    }

    #[test]
    fn test_merge_other_wins() {
        let shared = DynamicField::new("host", || "web-1");

        let mut a = FieldHolder::new();
        a.add_field("a", 1);
        a.add_field("shared", "from a");
        a.add_dynamic_field(shared.clone());

        let mut b = FieldHolder::new();
        b.add_field("b", 2);
        b.add_field("shared", "from b");
        b.add_dynamic_field(DynamicField::new("pid", || 42));

        a.merge(&b);

        assert_eq!(a.get("a"), Some(&json!(1)));
        assert_eq!(a.get("b"), Some(&json!(2)));
        assert_eq!(a.get("shared"), Some(&json!("from b")));
        let names: Vec<&str> = a.dynamic_fields().map(DynamicField::name).collect();
        assert_eq!(names, vec!["host", "pid"]);
    }

    #[test]
    fn test_dynamic_field_same_name_replaces() {
        let mut fields = FieldHolder::new();
        fields.add_dynamic_field(DynamicField::new("value", || 1));
        fields.add_dynamic_field(DynamicField::new("value", || 2));

        assert_eq!(fields.dynamic_fields().count(), 1);
        fields.evaluate_dynamic_fields();
        assert_eq!(fields.get("value"), Some(&json!(2)));
    }

    #[test]
    fn test_dynamic_fields_do_not_count_as_data() {
        let mut fields = FieldHolder::new();
        fields.add_dynamic_field(DynamicField::new("value", || 1));
        assert!(fields.is_empty());
    }

    #[test]
    fn test_evaluate_calls_each_function_once() {
        let calls = Arc::new(AtomicUsize::new(0));
        let counter = Arc::clone(&calls);

        let mut fields = FieldHolder::new();
        fields.add_dynamic_field(DynamicField::new("calls", move || {
            counter.fetch_add(1, Ordering::SeqCst) + 1
        }));
        fields.evaluate_dynamic_fields();

        assert_eq!(calls.load(Ordering::SeqCst), 1);
        assert_eq!(fields.get("calls"), Some(&json!(1)));
    }

    #[test]
    fn test_equality() {
        let dynamic = DynamicField::new("d", || 1);

        let mut a = FieldHolder::new();
        a.add_field("x", 1);
        a.add_dynamic_field(dynamic.clone());

        let mut b = FieldHolder::new();
        b.add_field("x", 1);
        b.add_dynamic_field(dynamic);
        assert_eq!(a, b);

        // same name, different function
        b.add_dynamic_field(DynamicField::new("d", || 1));
        assert_ne!(a, b);
    }

    #[test]
    fn test_display_is_json() {
        let mut fields = FieldHolder::new();
        fields.add_field("a", 1);
        assert_eq!(fields.to_string(), r#"{"a":1}"#);
    }
}

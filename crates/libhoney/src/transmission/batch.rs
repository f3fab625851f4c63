// Copyright 2023-Present Datadog, Inc. https://www.datadoghq.com/
// SPDX-License-Identifier: Apache-2.0

//! Batch shaping: grouping, wire encoding and response correlation.

use crate::event::Event;
use crate::response::Response;
use reqwest::Url;
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use std::collections::HashMap;

/// Where a batch goes. Events only share a request with events of the same
/// destination.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct Destination {
    pub writekey: String,
    pub dataset: String,
    pub api_host: String,
}

impl Destination {
    pub fn of(event: &Event) -> Self {
        Self {
            writekey: event.writekey.clone(),
            dataset: event.dataset.clone(),
            api_host: event.api_host.clone(),
        }
    }
}

#[derive(Debug, thiserror::Error)]
pub enum BatchError {
    #[error("Invalid batch URL for api_host '{api_host}' and dataset '{dataset}': {reason}")]
    InvalidUrl {
        api_host: String,
        dataset: String,
        reason: String,
    },

    #[error("Failed to encode batch: {0}")]
    Encode(#[from] serde_json::Error),

    #[error("Invalid writekey header: {0}")]
    InvalidHeader(#[from] reqwest::header::InvalidHeaderValue),

    #[error("Failed to compress batch: {0}")]
    Compress(#[from] std::io::Error),
}

#[derive(Serialize)]
struct BatchEntry<'a> {
    time: String,
    samplerate: u32,
    data: &'a Map<String, Value>,
}

/// Per-event status returned by the batch endpoint.
#[derive(Debug, Clone, PartialEq, Deserialize)]
pub struct BatchItemStatus {
    pub status: u16,
    #[serde(default)]
    pub error: Option<String>,
}

/// Splits events by destination, keeping enqueue order within each group.
pub fn group_events_by_destination(events: Vec<Event>) -> HashMap<Destination, Vec<Event>> {
    let mut groups: HashMap<Destination, Vec<Event>> = HashMap::new();
    for event in events {
        groups.entry(Destination::of(&event)).or_default().push(event);
    }
    groups
}

pub fn encode_batch(events: &[Event]) -> Result<Vec<u8>, BatchError> {
    let entries: Vec<BatchEntry<'_>> = events
        .iter()
        .map(|event| BatchEntry {
            time: event.timestamp(),
            samplerate: event.sample_rate,
            data: event.fields(),
        })
        .collect();
    Ok(serde_json::to_vec(&entries)?)
}

/// `<api_host>/1/batch/<dataset>`
pub fn batch_url(destination: &Destination) -> Result<Url, BatchError> {
    let invalid = |reason: String| BatchError::InvalidUrl {
        api_host: destination.api_host.clone(),
        dataset: destination.dataset.clone(),
        reason,
    };
    Url::parse(&destination.api_host)
        .and_then(|base| base.join("/1/batch/"))
        .and_then(|base| base.join(&destination.dataset))
        .map_err(|e| invalid(e.to_string()))
}

/// One response per event, matched by position with `statuses`. Events the
/// endpoint did not report on get a failure response.
pub fn responses_from_statuses(
    events: &[Event],
    statuses: &[BatchItemStatus],
    duration_ms: f64,
) -> Vec<Response> {
    events
        .iter()
        .enumerate()
        .map(|(i, event)| match statuses.get(i) {
            Some(item) => Response {
                status_code: item.status,
                duration_ms,
                metadata: event.metadata.clone(),
                body: String::new(),
                error: item.error.clone().unwrap_or_default(),
            },
            None => Response {
                status_code: 0,
                duration_ms,
                metadata: event.metadata.clone(),
                body: String::new(),
                error: "no status returned for event".to_string(),
            },
        })
        .collect()
}

/// The same failure for every event of a batch.
pub fn failure_responses(
    events: &[Event],
    status_code: u16,
    duration_ms: f64,
    body: &str,
    error: &str,
) -> Vec<Response> {
    events
        .iter()
        .map(|event| Response {
            status_code,
            duration_ms,
            metadata: event.metadata.clone(),
            body: body.to_string(),
            error: error.to_string(),
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::{TimeZone, Utc};
    use proptest::prelude::*;
    use serde_json::json;

    fn event(writekey: &str, dataset: &str, seq: usize) -> Event {
        let mut event = Event::default();
        event.writekey = writekey.to_string();
        event.dataset = dataset.to_string();
        event.add_field("seq", seq);
        event
    }

    #[test]
    fn test_group_alternating_destinations() {
        let events: Vec<Event> = (0..100)
            .map(|i| event(if i % 2 == 0 { "a" } else { "b" }, "ds", i))
            .collect();

        let groups = group_events_by_destination(events);
        assert_eq!(groups.len(), 2);
        for (destination, events) in &groups {
            assert_eq!(events.len(), 50);
            assert!(events.iter().all(|e| e.writekey == destination.writekey));
        }
    }

    #[test]
    fn test_encode_batch() {
        let mut event = event("key", "ds", 1);
        event.sample_rate = 3;
        event.created_at = Utc
            .with_ymd_and_hms(2013, 1, 1, 11, 11, 11)
            .single()
            .expect("valid date");

        let body = encode_batch(&[event]).expect("encodable");
        let decoded: Value = serde_json::from_slice(&body).expect("json");
        assert_eq!(
            decoded,
            json!([{"time": "2013-01-01T11:11:11Z", "samplerate": 3, "data": {"seq": 1}}])
        );
    }

    #[test]
    fn test_batch_url() {
        let destination = Destination {
            writekey: "key".to_string(),
            dataset: "my-dataset".to_string(),
            api_host: "https://api.honeycomb.io".to_string(),
        };
        assert_eq!(
            batch_url(&destination).expect("valid url").as_str(),
            "https://api.honeycomb.io/1/batch/my-dataset"
        );

        let destination = Destination {
            api_host: "http://localhost:8080/".to_string(),
            ..destination
        };
        assert_eq!(
            batch_url(&destination).expect("valid url").as_str(),
            "http://localhost:8080/1/batch/my-dataset"
        );

        let destination = Destination {
            api_host: "nope".to_string(),
            ..destination
        };
        assert!(matches!(
            batch_url(&destination),
            Err(BatchError::InvalidUrl { .. })
        ));
    }

    #[test]
    fn test_status_parsing() {
        let statuses: Vec<BatchItemStatus> =
            serde_json::from_str(r#"[{"status": 202}, {"status": 400, "error": "bad event"}]"#)
                .expect("valid statuses");
        assert_eq!(statuses[0].error, None);
        assert_eq!(statuses[1].error.as_deref(), Some("bad event"));
    }

    #[test]
    fn test_responses_from_statuses() {
        let mut events = vec![event("k", "d", 0), event("k", "d", 1), event("k", "d", 2)];
        for (i, event) in events.iter_mut().enumerate() {
            event.add_metadata(i);
        }
        let statuses = vec![
            BatchItemStatus {
                status: 202,
                error: None,
            },
            BatchItemStatus {
                status: 400,
                error: Some("bad".to_string()),
            },
        ];

        let responses = responses_from_statuses(&events, &statuses, 12.0);
        assert_eq!(responses.len(), 3);
        assert!(responses[0].is_success());
        assert_eq!(responses[0].metadata, Some(json!(0)));
        assert_eq!(responses[1].status_code, 400);
        assert_eq!(responses[1].error, "bad");
        assert_eq!(responses[2].status_code, 0);
        assert!(!responses[2].error.is_empty());
        assert!(responses.iter().all(|r| r.duration_ms == 12.0));
    }

    #[test]
    fn test_failure_responses() {
        let events = vec![event("k", "d", 0), event("k", "d", 1)];
        let responses = failure_responses(&events, 500, 3.0, "oops", "server error");
        assert_eq!(responses.len(), 2);
        assert!(responses
            .iter()
            .all(|r| r.status_code == 500 && r.body == "oops" && r.error == "server error"));
    }

    proptest! {
        #[test]
        fn grouping_preserves_every_event_and_order(
            destinations in prop::collection::vec((0u8..3, 0u8..3), 0..200)
        ) {
            let events: Vec<Event> = destinations
                .iter()
                .enumerate()
                .map(|(seq, (key, ds))| event(&format!("key{key}"), &format!("ds{ds}"), seq))
                .collect();
            let total = events.len();

            let groups = group_events_by_destination(events);

            let grouped: usize = groups.values().map(Vec::len).sum();
            prop_assert_eq!(grouped, total);
            for (destination, events) in &groups {
                prop_assert!(events.iter().all(|e| Destination::of(e) == *destination));
                let seqs: Vec<u64> = events
                    .iter()
                    .filter_map(|e| e.fields().get("seq").and_then(Value::as_u64))
                    .collect();
                prop_assert!(seqs.windows(2).all(|w| w[0] < w[1]));
            }
        }
    }
}

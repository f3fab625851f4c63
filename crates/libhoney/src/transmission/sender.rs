// Copyright 2023-Present Datadog, Inc. https://www.datadoghq.com/
// SPDX-License-Identifier: Apache-2.0

use crate::config::TransmissionConfig;
use crate::error::Error;
use crate::event::Event;
use crate::response::Response;
use crate::transmission::batch::{
    batch_url, encode_batch, failure_responses, responses_from_statuses, BatchError,
    BatchItemStatus, Destination,
};
use flate2::write::GzEncoder;
use flate2::Compression;
use reqwest::header::{HeaderMap, HeaderValue, CONTENT_ENCODING, CONTENT_TYPE};
use std::io::Write;
use std::time::Instant;
use tracing::{debug, error};

pub const USER_AGENT: &str = concat!("libhoney-rust/", env!("CARGO_PKG_VERSION"));
const TEAM_HEADER: &str = "x-honeycomb-team";

pub fn user_agent(addition: Option<&str>) -> String {
    match addition {
        Some(addition) if !addition.is_empty() => format!("{USER_AGENT} {addition}"),
        _ => USER_AGENT.to_string(),
    }
}

/// Sends one batch per call and turns the outcome into one response per event.
#[derive(Debug, Clone)]
pub struct BatchSender {
    client: reqwest::Client,
    gzip: bool,
    compression_level: u32,
}

impl BatchSender {
    pub fn new(config: &TransmissionConfig) -> Result<Self, Error> {
        let mut builder = reqwest::Client::builder()
            .user_agent(user_agent(config.user_agent_addition.as_deref()))
            .timeout(config.timeout);
        if let Some(proxy) = &config.https_proxy {
            builder = builder.proxy(reqwest::Proxy::https(proxy)?);
        }
        Ok(Self {
            client: builder.build()?,
            gzip: config.gzip,
            compression_level: config.compression_level,
        })
    }

    /// Never fails: every error ends up in the returned responses.
    pub async fn send(&self, destination: &Destination, events: &[Event]) -> Vec<Response> {
        let start = Instant::now();
        let request = match self.build_request(destination, events) {
            Ok(request) => request,
            Err(e) => {
                error!("Failed to build batch request: {}", e);
                return failure_responses(events, 0, elapsed_ms(start), "", &e.to_string());
            }
        };

        let resp = match request.send().await {
            Ok(resp) => resp,
            Err(e) => {
                debug!(
                    "Failed to send batch of {} events to dataset {}: {}",
                    events.len(),
                    destination.dataset,
                    e
                );
                let status = e.status().map(|s| s.as_u16()).unwrap_or(0);
                return failure_responses(events, status, elapsed_ms(start), "", &e.to_string());
            }
        };

        let status = resp.status();
        if !status.is_success() {
            let body = resp.text().await.unwrap_or_default();
            debug!(
                "Batch to dataset {} rejected with {}: {}",
                destination.dataset, status, body
            );
            return failure_responses(
                events,
                status.as_u16(),
                elapsed_ms(start),
                &body,
                &format!("request failed with status {status}"),
            );
        }

        let body = match resp.text().await {
            Ok(body) => body,
            Err(e) => {
                return failure_responses(
                    events,
                    status.as_u16(),
                    elapsed_ms(start),
                    "",
                    &e.to_string(),
                )
            }
        };
        match serde_json::from_str::<Vec<BatchItemStatus>>(&body) {
            Ok(statuses) => responses_from_statuses(events, &statuses, elapsed_ms(start)),
            Err(e) => failure_responses(
                events,
                status.as_u16(),
                elapsed_ms(start),
                &body,
                &format!("unparseable batch response: {e}"),
            ),
        }
    }

    fn build_request(
        &self,
        destination: &Destination,
        events: &[Event],
    ) -> Result<reqwest::RequestBuilder, BatchError> {
        let url = batch_url(destination)?;
        let payload = encode_batch(events)?;

        let mut headers = HeaderMap::new();
        headers.insert(CONTENT_TYPE, HeaderValue::from_static("application/json"));
        headers.insert(TEAM_HEADER, HeaderValue::from_str(&destination.writekey)?);

        let body = if self.gzip {
            headers.insert(CONTENT_ENCODING, HeaderValue::from_static("gzip"));
            self.compress(&payload)?
        } else {
            payload
        };

        Ok(self.client.post(url).headers(headers).body(body))
    }

    fn compress(&self, payload: &[u8]) -> Result<Vec<u8>, BatchError> {
        let mut encoder = GzEncoder::new(Vec::new(), Compression::new(self.compression_level));
        encoder.write_all(payload)?;
        Ok(encoder.finish()?)
    }
}

fn elapsed_ms(start: Instant) -> f64 {
    start.elapsed().as_secs_f64() * 1000.0
}

// Copyright 2023-Present Datadog, Inc. https://www.datadoghq.com/
// SPDX-License-Identifier: Apache-2.0

#![cfg_attr(not(test), deny(clippy::panic))]
#![cfg_attr(not(test), deny(clippy::unwrap_used))]
#![cfg_attr(not(test), deny(clippy::expect_used))]
#![cfg_attr(not(test), deny(clippy::todo))]
#![cfg_attr(not(test), deny(clippy::unimplemented))]

use std::{env, io, sync::Arc};
use tokio::io::{AsyncBufReadExt, BufReader};
use tracing::{debug, error, info, warn};
use tracing_subscriber::EnvFilter;

use libhoney::{
    AsyncTransmission, Client, ClientConfig, Event, FileTransmission, ResponseQueue,
    Transmission,
};

#[derive(Debug, thiserror::Error)]
enum LineError {
    #[error("invalid JSON: {0}")]
    Parse(#[from] serde_json::Error),

    #[error(transparent)]
    Fields(#[from] libhoney::Error),
}

#[tokio::main]
pub async fn main() {
    let log_level = env::var("HONEYSEND_LOG_LEVEL")
        .map(|val| val.to_lowercase())
        .unwrap_or("info".to_string());
    let dry_run = env::var("HONEYSEND_DRY_RUN")
        .map(|val| val.to_lowercase() == "true")
        .unwrap_or(false);

    let env_filter = format!("h2=off,hyper=off,rustls=off,{}", log_level);

    #[allow(clippy::expect_used)]
    let subscriber = tracing_subscriber::fmt::Subscriber::builder()
        .with_env_filter(
            EnvFilter::try_new(env_filter).expect("could not parse log level in configuration"),
        )
        .with_writer(io::stderr)
        .with_level(true)
        .with_thread_names(false)
        .with_thread_ids(false)
        .with_line_number(false)
        .with_file(false)
        .with_target(true)
        .without_time()
        .finish();

    #[allow(clippy::expect_used)]
    tracing::subscriber::set_global_default(subscriber).expect("setting default subscriber failed");

    debug!("Logging subsystem enabled");

    let mut config = match ClientConfig::from_env() {
        Ok(config) => config,
        Err(e) => {
            error!("Invalid configuration: {}", e);
            return;
        }
    };
    config
        .transmission
        .user_agent_addition
        .get_or_insert_with(|| concat!("honeysend/", env!("CARGO_PKG_VERSION")).to_string());

    let (client, network) = if dry_run {
        let transmission = FileTransmission::new(
            Box::new(io::stdout()),
            config.transmission.user_agent_addition.as_deref(),
        );
        match Client::with_transmission(config, Arc::new(transmission)) {
            Ok(client) => (client, None),
            Err(e) => {
                error!("Failed to create client: {}", e);
                return;
            }
        }
    } else {
        let transmission = match AsyncTransmission::new(config.transmission.clone()) {
            Ok(transmission) => Arc::new(transmission),
            Err(e) => {
                error!("Failed to create transmission: {}", e);
                return;
            }
        };
        let shared: Arc<dyn Transmission> = transmission.clone();
        match Client::with_transmission(config, shared) {
            Ok(client) => (client, Some(transmission)),
            Err(e) => {
                error!("Failed to create client: {}", e);
                return;
            }
        }
    };

    let consumer = client.responses().map(|queue| tokio::spawn(log_responses(queue)));

    let mut lines = BufReader::new(tokio::io::stdin()).lines();
    let mut line_number = 0usize;
    loop {
        let line = match lines.next_line().await {
            Ok(Some(line)) => line,
            Ok(None) => break,
            Err(e) => {
                error!("Failed to read stdin: {}", e);
                break;
            }
        };
        line_number += 1;
        match event_from_line(&client, &line) {
            Ok(Some(event)) => {
                if let Err(e) = event.send_async().await {
                    warn!("Line {}: {}", line_number, e);
                }
            }
            Ok(None) => {}
            Err(e) => warn!("Line {}: {}", line_number, e),
        }
    }

    if let Some(transmission) = network {
        transmission.shutdown().await;
        info!("Sent events, stats: {:?}", transmission.stats());
    }
    client.close();

    if let Some(consumer) = consumer {
        if let Err(e) = consumer.await {
            error!("Response consumer failed: {}", e);
        }
    }
}

/// Builds an event from one line of input. Blank lines are skipped.
fn event_from_line(client: &Client, line: &str) -> Result<Option<Event>, LineError> {
    let line = line.trim();
    if line.is_empty() {
        return Ok(None);
    }
    let data: serde_json::Value = serde_json::from_str(line)?;
    let mut event = client.new_event();
    event.add_json(data)?;
    Ok(Some(event))
}

async fn log_responses(queue: ResponseQueue) {
    let mut failed = 0usize;
    let mut total = 0usize;
    while let Some(response) = queue.recv_async().await {
        total += 1;
        if !response.is_success() {
            failed += 1;
            warn!(
                "Event failed with status {}: {} {}",
                response.status_code, response.error, response.body
            );
        }
    }
    info!("{} responses, {} failed", total, failed);
}

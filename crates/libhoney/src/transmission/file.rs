// Copyright 2023-Present Datadog, Inc. https://www.datadoghq.com/
// SPDX-License-Identifier: Apache-2.0

use async_trait::async_trait;

use crate::error::Error;
use crate::event::Event;
use crate::response::{Response, ResponseQueue};
use crate::transmission::sender::user_agent;
use crate::transmission::Transmission;
use serde::Serialize;
use serde_json::{Map, Value};
use std::io::{self, Write};
use std::sync::{Mutex, MutexGuard};
use tracing::{debug, error};

#[derive(Serialize)]
struct FileEntry<'a> {
    time: String,
    samplerate: u32,
    dataset: &'a str,
    user_agent: &'a str,
    data: &'a Map<String, Value>,
}

/// Writes each event as a JSON line instead of sending it. No batching and no
/// response queue. Writes to stderr unless given another writer.
pub struct FileTransmission {
    writer: Mutex<Box<dyn Write + Send>>,
    user_agent: String,
}

impl Default for FileTransmission {
    fn default() -> Self {
        Self::new(Box::new(io::stderr()), None)
    }
}

impl FileTransmission {
    pub fn new(writer: Box<dyn Write + Send>, user_agent_addition: Option<&str>) -> Self {
        Self {
            writer: Mutex::new(writer),
            user_agent: user_agent(user_agent_addition),
        }
    }

    #[allow(clippy::expect_used)]
    fn writer(&self) -> MutexGuard<'_, Box<dyn Write + Send>> {
        self.writer.lock().expect("lock poisoned")
    }

    fn write_event(&self, event: &Event) -> Result<(), io::Error> {
        let entry = FileEntry {
            time: event.timestamp(),
            samplerate: event.sample_rate,
            dataset: &event.dataset,
            user_agent: &self.user_agent,
            data: event.fields(),
        };
        let mut line = serde_json::to_vec(&entry)?;
        line.push(b'\n');
        self.writer().write_all(&line)
    }
}

#[async_trait]
impl Transmission for FileTransmission {
    fn start(&self) -> Result<(), Error> {
        Ok(())
    }

    fn send(&self, event: Event) {
        if let Err(e) = self.write_event(&event) {
            error!("Failed to write event: {}", e);
        }
    }

    fn close(&self) {
        self.flush();
    }

    fn responses(&self) -> Option<ResponseQueue> {
        None
    }

    fn push_response(&self, _response: Response) {
        debug!("FileTransmission has no response queue, dropping response");
    }

    fn flush(&self) {
        if let Err(e) = self.writer().flush() {
            error!("Failed to flush event writer: {}", e);
        }
    }
}

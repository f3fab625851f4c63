// Copyright 2023-Present Datadog, Inc. https://www.datadoghq.com/
// SPDX-License-Identifier: Apache-2.0

use async_trait::async_trait;

use crate::config::TransmissionConfig;
use crate::error::Error;
use crate::event::Event;
use crate::response::{Response, ResponseQueue};
use crate::transmission::control::EngineCore;
use crate::transmission::stats::StatsSnapshot;
use crate::transmission::{Pending, Transmission};
use std::sync::{Mutex, MutexGuard};
use tokio::runtime::Handle;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tracing::{debug, error, warn};

/// Runs the control loop as a task on the tokio runtime that started it.
///
/// `close` only schedules the shutdown; await `shutdown` to wait until every
/// response, including the end marker, has been pushed.
#[derive(Debug)]
pub struct AsyncTransmission {
    core: EngineCore,
    state: Mutex<TaskState>,
}

#[derive(Debug, Default)]
struct TaskState {
    runtime: Option<Handle>,
    pending: Option<mpsc::Sender<Pending>>,
    control: Option<JoinHandle<()>>,
    shutdown: Option<JoinHandle<()>>,
}

impl AsyncTransmission {
    pub fn new(config: TransmissionConfig) -> Result<Self, Error> {
        Ok(Self {
            core: EngineCore::new(config)?,
            state: Mutex::new(TaskState::default()),
        })
    }

    /// Closes the transmission and waits for the drain to complete.
    pub async fn shutdown(&self) {
        self.close();
        let shutdown = self.state().shutdown.take();
        if let Some(shutdown) = shutdown {
            if let Err(e) = shutdown.await {
                error!("Transmission shutdown task failed: {}", e);
            }
        }
    }

    pub fn stats(&self) -> StatsSnapshot {
        self.core.stats(self.state().pending.as_ref())
    }

    pub fn is_running(&self) -> bool {
        self.state().pending.is_some()
    }

    #[allow(clippy::expect_used)]
    fn state(&self) -> MutexGuard<'_, TaskState> {
        self.state.lock().expect("lock poisoned")
    }
}

#[async_trait]
impl Transmission for AsyncTransmission {
    fn start(&self) -> Result<(), Error> {
        let runtime = Handle::try_current().map_err(|_| Error::NoRuntime)?;
        let mut state = self.state();
        if state.pending.is_some() {
            return Ok(());
        }

        let (tx, control) = self.core.control_loop();
        state.control = Some(runtime.spawn(control.run()));
        state.pending = Some(tx);
        state.runtime = Some(runtime);
        debug!("Async transmission started");
        Ok(())
    }

    fn send(&self, event: Event) {
        let tx = self.state().pending.clone();
        self.core.enqueue(tx.as_ref(), event);
    }

    async fn send_async(&self, event: Event) {
        let tx = self.state().pending.clone();
        self.core.enqueue_async(tx.as_ref(), event).await;
    }

    fn close(&self) {
        let mut state = self.state();
        let Some(tx) = state.pending.take() else {
            return;
        };
        let (Some(runtime), Some(control)) = (state.runtime.clone(), state.control.take()) else {
            return;
        };

        let sink = self.core.sink.clone();
        let timeout = self.core.config.close_timeout;
        state.shutdown = Some(runtime.spawn(async move {
            if tokio::time::timeout(timeout, tx.send(Pending::Shutdown))
                .await
                .is_err()
            {
                error!("Timed out after {:?} queueing transmission shutdown", timeout);
            }
            drop(tx);
            if let Err(e) = control.await {
                error!("Transmission control loop failed: {}", e);
            }
            if !sink.close(timeout).await {
                warn!("Timed out pushing the end of responses marker");
            }
            debug!("Async transmission closed");
        }));
    }

    fn responses(&self) -> Option<ResponseQueue> {
        Some(self.core.queue.clone())
    }

    fn push_response(&self, response: Response) {
        self.core.sink.push(response);
    }

    fn flush(&self) {
        warn!("flush is not supported by AsyncTransmission, use shutdown");
    }
}

impl Drop for AsyncTransmission {
    fn drop(&mut self) {
        self.close();
    }
}

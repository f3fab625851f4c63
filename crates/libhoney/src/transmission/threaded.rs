// Copyright 2023-Present Datadog, Inc. https://www.datadoghq.com/
// SPDX-License-Identifier: Apache-2.0

use async_trait::async_trait;

use crate::config::TransmissionConfig;
use crate::error::Error;
use crate::event::Event;
use crate::queue;
use crate::response::{Response, ResponseQueue};
use crate::transmission::control::EngineCore;
use crate::transmission::stats::StatsSnapshot;
use crate::transmission::{Pending, Transmission};
use std::sync::{Mutex, MutexGuard};
use std::thread;
use tokio::sync::mpsc;
use tracing::{debug, error, warn};

const WORKER_NAME: &str = "libhoney-transmission";

/// Runs the control loop on a dedicated thread with its own single-threaded
/// runtime. Producers can be any thread, inside or outside a runtime.
#[derive(Debug)]
pub struct ThreadedTransmission {
    core: EngineCore,
    state: Mutex<WorkerState>,
}

#[derive(Debug, Default)]
struct WorkerState {
    pending: Option<mpsc::Sender<Pending>>,
    worker: Option<thread::JoinHandle<()>>,
}

impl ThreadedTransmission {
    pub fn new(config: TransmissionConfig) -> Result<Self, Error> {
        Ok(Self {
            core: EngineCore::new(config)?,
            state: Mutex::new(WorkerState::default()),
        })
    }

    pub fn stats(&self) -> StatsSnapshot {
        self.core.stats(self.state().pending.as_ref())
    }

    pub fn is_running(&self) -> bool {
        self.state().pending.is_some()
    }

    #[allow(clippy::expect_used)]
    fn state(&self) -> MutexGuard<'_, WorkerState> {
        self.state.lock().expect("lock poisoned")
    }
}

#[async_trait]
impl Transmission for ThreadedTransmission {
    fn start(&self) -> Result<(), Error> {
        let mut state = self.state();
        if state.pending.is_some() {
            return Ok(());
        }

        let runtime = tokio::runtime::Builder::new_current_thread()
            .enable_all()
            .build()?;
        let (tx, control) = self.core.control_loop();
        let worker = thread::Builder::new()
            .name(WORKER_NAME.to_string())
            .spawn(move || runtime.block_on(control.run()))?;

        state.pending = Some(tx);
        state.worker = Some(worker);
        debug!("Threaded transmission started");
        Ok(())
    }

    fn send(&self, event: Event) {
        // the lock is not held while a blocking put waits for space
        let tx = self.state().pending.clone();
        self.core.enqueue(tx.as_ref(), event);
    }

    async fn send_async(&self, event: Event) {
        let tx = self.state().pending.clone();
        self.core.enqueue_async(tx.as_ref(), event).await;
    }

    fn close(&self) {
        let (tx, worker) = {
            let mut state = self.state();
            (state.pending.take(), state.worker.take())
        };
        let Some(tx) = tx else {
            return;
        };

        if queue::put_timeout(&tx, Pending::Shutdown, self.core.config.close_timeout).is_err() {
            error!(
                "Timed out after {:?} queueing transmission shutdown",
                self.core.config.close_timeout
            );
        }
        drop(tx);

        if let Some(worker) = worker {
            if worker.join().is_err() {
                error!("Transmission worker thread panicked");
            }
        }

        if !self.core.sink.close_blocking(self.core.config.close_timeout) {
            warn!("Timed out pushing the end of responses marker");
        }
        debug!("Threaded transmission closed, stats: {:?}", self.stats());
    }

    fn responses(&self) -> Option<ResponseQueue> {
        Some(self.core.queue.clone())
    }

    fn push_response(&self, response: Response) {
        self.core.sink.push(response);
    }

    /// Delivers everything pending, then restarts. Consumers see the end of
    /// responses marker once per flush.
    fn flush(&self) {
        self.close();
        if let Err(e) = self.start() {
            error!("Failed to restart transmission after flush: {}", e);
        }
    }
}

impl Drop for ThreadedTransmission {
    fn drop(&mut self) {
        self.close();
    }
}

// Copyright 2023-Present Datadog, Inc. https://www.datadoghq.com/
// SPDX-License-Identifier: Apache-2.0

use crate::config::TransmissionConfig;
use crate::error::Error;
use crate::event::Event;
use crate::queue;
use crate::response::{response_channel, Response, ResponseQueue, ResponseSink};
use crate::transmission::batch::group_events_by_destination;
use crate::transmission::sender::BatchSender;
use crate::transmission::stats::{Stats, StatsSnapshot};
use crate::transmission::Pending;
use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio::sync::mpsc::{self, error::TrySendError};
use tokio::sync::Semaphore;
use tokio::task::JoinSet;
use tracing::{debug, error, warn};

/// State shared by the network drivers, independent of where the control
/// loop runs.
#[derive(Debug)]
pub(crate) struct EngineCore {
    pub config: TransmissionConfig,
    pub stats: Arc<Stats>,
    pub sink: ResponseSink,
    pub queue: ResponseQueue,
    sender: BatchSender,
}

impl EngineCore {
    pub fn new(config: TransmissionConfig) -> Result<Self, Error> {
        config.validate()?;
        let sender = BatchSender::new(&config)?;
        let (sink, queue) = response_channel(config.response_queue_size, config.block_on_response);
        Ok(Self {
            config,
            stats: Arc::new(Stats::default()),
            sink,
            queue,
            sender,
        })
    }

    /// Pending queue and the control loop draining it.
    pub fn control_loop(&self) -> (mpsc::Sender<Pending>, ControlLoop) {
        let (tx, rx) = mpsc::channel(self.config.pending_queue_size);
        let control = ControlLoop {
            rx,
            max_batch_size: self.config.max_batch_size,
            send_frequency: self.config.send_frequency,
            dispatcher: Dispatcher {
                sender: self.sender.clone(),
                permits: Arc::new(Semaphore::new(self.config.max_concurrent_batches)),
                sink: self.sink.clone(),
                stats: Arc::clone(&self.stats),
                in_flight: JoinSet::new(),
            },
        };
        (tx, control)
    }

    /// Enqueues an event, turning overflow into a response.
    pub fn enqueue(&self, tx: Option<&mpsc::Sender<Pending>>, event: Event) {
        let Some(tx) = tx else {
            warn!("Transmission is not running, dropping event");
            return;
        };
        match queue::put(tx, Pending::Event(Box::new(event)), self.config.block_on_send) {
            Ok(()) => self.stats.incr_queued(),
            Err(TrySendError::Full(pending)) => {
                self.stats.incr_queue_overflow();
                debug!("Pending queue full, dropping event");
                let metadata = match pending {
                    Pending::Event(event) => event.metadata,
                    Pending::Shutdown => None,
                };
                self.sink.push(Response::queue_overflow(metadata));
            }
            Err(TrySendError::Closed(_)) => warn!("Transmission is closed, dropping event"),
        }
    }

    /// Enqueues from async code. With `block_on_send` this awaits space
    /// instead of blocking the thread.
    pub async fn enqueue_async(&self, tx: Option<&mpsc::Sender<Pending>>, event: Event) {
        match tx {
            Some(tx) if self.config.block_on_send => {
                match tx.send(Pending::Event(Box::new(event))).await {
                    Ok(()) => self.stats.incr_queued(),
                    Err(_) => warn!("Transmission is closed, dropping event"),
                }
            }
            _ => self.enqueue(tx, event),
        }
    }

    pub fn stats(&self, tx: Option<&mpsc::Sender<Pending>>) -> StatsSnapshot {
        let queue_length = tx.map_or(0, |tx| tx.max_capacity() - tx.capacity());
        self.stats.snapshot(queue_length)
    }
}

/// Accumulates pending events and flushes them on size, age or shutdown.
#[derive(Debug)]
pub(crate) struct ControlLoop {
    rx: mpsc::Receiver<Pending>,
    max_batch_size: usize,
    send_frequency: Duration,
    dispatcher: Dispatcher,
}

impl ControlLoop {
    pub async fn run(mut self) {
        debug!("Transmission control loop started");
        let mut events: Vec<Event> = Vec::with_capacity(self.max_batch_size);
        let mut last_flush = Instant::now();

        loop {
            match tokio::time::timeout(self.send_frequency, self.rx.recv()).await {
                Ok(Some(Pending::Event(event))) => {
                    events.push(*event);
                    if events.len() >= self.max_batch_size
                        || last_flush.elapsed() > self.send_frequency
                    {
                        self.dispatcher.flush(std::mem::take(&mut events)).await;
                        last_flush = Instant::now();
                    }
                }
                Ok(Some(Pending::Shutdown)) | Ok(None) => {
                    self.drain_closed(&mut events).await;
                    self.dispatcher.flush(std::mem::take(&mut events)).await;
                    break;
                }
                Err(_) => {
                    self.dispatcher.flush(std::mem::take(&mut events)).await;
                    last_flush = Instant::now();
                }
            }
        }

        self.dispatcher.drain().await;
        debug!(
            "Transmission control loop stopped, stats: {:?}",
            self.dispatcher.stats.snapshot(0)
        );
    }

    /// Closes the pending queue and takes whatever producers managed to put
    /// on it before the close, so every queued event is still sent.
    async fn drain_closed(&mut self, events: &mut Vec<Event>) {
        self.rx.close();
        while let Ok(pending) = self.rx.try_recv() {
            let Pending::Event(event) = pending else {
                continue;
            };
            events.push(*event);
            if events.len() >= self.max_batch_size {
                self.dispatcher.flush(std::mem::take(events)).await;
            }
        }
    }
}

/// Sends batches with at most `max_concurrent_batches` requests in flight.
#[derive(Debug)]
struct Dispatcher {
    sender: BatchSender,
    permits: Arc<Semaphore>,
    sink: ResponseSink,
    stats: Arc<Stats>,
    in_flight: JoinSet<()>,
}

impl Dispatcher {
    async fn flush(&mut self, events: Vec<Event>) {
        if events.is_empty() {
            return;
        }
        for (destination, batch) in group_events_by_destination(events) {
            let Ok(permit) = Arc::clone(&self.permits).acquire_owned().await else {
                error!("Dispatch semaphore closed, dropping batch");
                continue;
            };
            self.reap();

            let sender = self.sender.clone();
            let sink = self.sink.clone();
            let stats = Arc::clone(&self.stats);
            self.in_flight.spawn(async move {
                let _permit = permit;
                let responses = sender.send(&destination, &batch).await;
                let sent = responses.iter().filter(|r| r.is_success()).count() as u64;
                stats.add_sent(sent);
                stats.add_send_errors(responses.len() as u64 - sent);
                for response in responses {
                    sink.push_async(response).await;
                }
            });
        }
    }

    fn reap(&mut self) {
        while let Some(result) = self.in_flight.try_join_next() {
            if let Err(e) = result {
                error!("Batch dispatch task failed: {}", e);
            }
        }
    }

    async fn drain(&mut self) {
        while let Some(result) = self.in_flight.join_next().await {
            if let Err(e) = result {
                error!("Batch dispatch task failed: {}", e);
            }
        }
    }
}

//! Tracker service and its handle.
//!
//! The service owns the session, the buffer and the active configuration and
//! runs as a single task. Everything else talks to it through a cloneable
//! [`EventTracker`] handle:
//!
//! - `track` only enqueues a command and returns immediately
//! - at most one batch is in flight; flush requests made meanwhile are
//!   deferred until it settles
//! - `destroy` (or dropping every handle) stops the timer and hands the
//!   remaining events to the transport's beacon path

use std::sync::Arc;
use std::time::Duration;

use serde_json::Value;
use tokio::sync::{mpsc, oneshot};
use tokio::time::{Instant, Interval, MissedTickBehavior};
use tracing::{debug, trace, warn};

use crate::config::{ConfigError, TrackerConfig};
use crate::tracker::buffer::{Batch, Buffer};
use crate::tracker::constants::MAX_BACKOFF_EXPONENT;
use crate::tracker::event::{Event, RawEvent};
use crate::tracker::session::Session;
use crate::tracker::transport::{HttpTransport, SendOutcome, Transport};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FlushReason {
    /// Periodic flush timer.
    Timer,
    /// The buffer reached its capacity.
    Threshold,
    /// Explicit `flush()` call.
    Manual,
}

impl FlushReason {
    fn respects_backoff(self) -> bool {
        !matches!(self, FlushReason::Manual)
    }

    /// Reason a deferred flush keeps when another request joins it.
    fn merge(self, other: FlushReason) -> FlushReason {
        if self == FlushReason::Manual || other == FlushReason::Manual {
            FlushReason::Manual
        } else {
            other
        }
    }
}

#[derive(Debug)]
pub(crate) enum TrackerCommand {
    Track(RawEvent),
    Flush(FlushReason, Option<oneshot::Sender<()>>),
    Pending(oneshot::Sender<Vec<Event>>),
    Reconfigure(Box<TrackerConfig>),
    Destroy(oneshot::Sender<()>),
}

#[derive(Debug, thiserror::Error)]
pub enum TrackerError {
    #[error("tracker service is no longer running")]
    Closed,
    #[error(transparent)]
    Config(#[from] ConfigError),
}

#[derive(Debug)]
struct Settlement {
    batch: Batch,
    outcome: SendOutcome,
    reason: FlushReason,
}

/// Handle to a running tracker service.
///
/// Cloning the handle is cheap; every clone feeds the same session. Once
/// every clone is dropped the service tears down as if `destroy` was called.
#[derive(Clone, Debug)]
pub struct EventTracker {
    tx: mpsc::UnboundedSender<TrackerCommand>,
    session_id: Arc<str>,
}

impl EventTracker {
    /// Validates `config`, spawns the tracker service on the current tokio
    /// runtime and returns its handle.
    ///
    /// # Panics
    ///
    /// Panics if called outside of a tokio runtime.
    pub fn init<T: Transport>(config: TrackerConfig, transport: T) -> Result<Self, ConfigError> {
        let config = config.validate()?;
        let (service, tracker) = TrackerService::new(config, transport);
        tokio::spawn(service.run());
        Ok(tracker)
    }

    /// Same as [`EventTracker::init`] with the HTTP transport built from `config`.
    pub fn init_http(config: TrackerConfig) -> Result<Self, ConfigError> {
        let transport = HttpTransport::new(&config);
        EventTracker::init(config, transport)
    }

    #[must_use]
    pub fn session_id(&self) -> &str {
        &self.session_id
    }

    /// Records an event. Never blocks and never fails: once the service is
    /// gone the event is silently discarded.
    pub fn track(&self, name: &str, properties: Value) {
        if self
            .tx
            .send(TrackerCommand::Track(RawEvent::new(name, properties)))
            .is_err()
        {
            trace!("TRACKER | service stopped, discarding event {}", name);
        }
    }

    /// Flushes the buffer, resolving once the flush cycle has settled.
    pub async fn flush(&self) -> Result<(), TrackerError> {
        let (response_tx, response_rx) = oneshot::channel();
        self.tx
            .send(TrackerCommand::Flush(FlushReason::Manual, Some(response_tx)))
            .map_err(|_| TrackerError::Closed)?;
        response_rx.await.map_err(|_| TrackerError::Closed)
    }

    /// Events currently buffered, oldest first. In-flight events are not included.
    pub async fn pending(&self) -> Result<Vec<Event>, TrackerError> {
        let (response_tx, response_rx) = oneshot::channel();
        self.tx
            .send(TrackerCommand::Pending(response_tx))
            .map_err(|_| TrackerError::Closed)?;
        response_rx.await.map_err(|_| TrackerError::Closed)
    }

    /// Replaces the whole configuration.
    pub fn reconfigure(&self, config: TrackerConfig) -> Result<(), TrackerError> {
        let config = config.validate()?;
        self.tx
            .send(TrackerCommand::Reconfigure(Box::new(config)))
            .map_err(|_| TrackerError::Closed)
    }

    /// Stops the service after a best-effort final flush.
    pub async fn destroy(&self) -> Result<(), TrackerError> {
        let (response_tx, response_rx) = oneshot::channel();
        self.tx
            .send(TrackerCommand::Destroy(response_tx))
            .map_err(|_| TrackerError::Closed)?;
        response_rx.await.map_err(|_| TrackerError::Closed)
    }

    #[must_use]
    pub fn is_closed(&self) -> bool {
        self.tx.is_closed()
    }
}

pub struct TrackerService<T: Transport> {
    config: TrackerConfig,
    session: Session,
    buffer: Buffer,
    transport: Arc<T>,
    rx: mpsc::UnboundedReceiver<TrackerCommand>,
    settle_tx: mpsc::UnboundedSender<Settlement>,
    settle_rx: mpsc::UnboundedReceiver<Settlement>,
    in_flight: bool,
    deferred: Option<FlushReason>,
    waiters: Vec<oneshot::Sender<()>>,
    consecutive_failures: u32,
    backoff_until: Option<Instant>,
}

impl<T: Transport> TrackerService<T> {
    /// `config` is expected to be validated already.
    #[must_use]
    pub fn new(config: TrackerConfig, transport: T) -> (Self, EventTracker) {
        let (tx, rx) = mpsc::unbounded_channel();
        let (settle_tx, settle_rx) = mpsc::unbounded_channel();
        let session = Session::new();
        let tracker = EventTracker {
            tx,
            session_id: Arc::from(session.id()),
        };

        let service = TrackerService {
            buffer: Buffer::new(config.max_buffer_size),
            config,
            session,
            transport: Arc::new(transport),
            rx,
            settle_tx,
            settle_rx,
            in_flight: false,
            deferred: None,
            waiters: Vec::new(),
            consecutive_failures: 0,
            backoff_until: None,
        };

        (service, tracker)
    }

    pub async fn run(mut self) {
        debug!("TRACKER | service started for session {}", self.session.id());
        let mut ticker = Self::ticker(&self.config);

        loop {
            tokio::select! {
                command = self.rx.recv() => match command {
                    Some(TrackerCommand::Track(raw)) => self.track(raw),
                    Some(TrackerCommand::Flush(reason, response_tx)) => {
                        self.request_flush(reason, response_tx);
                    }
                    Some(TrackerCommand::Pending(response_tx)) => {
                        let _ = response_tx.send(self.buffer.snapshot());
                    }
                    Some(TrackerCommand::Reconfigure(config)) => {
                        if self.reconfigure(*config) {
                            ticker = Self::ticker(&self.config);
                        }
                    }
                    Some(TrackerCommand::Destroy(response_tx)) => {
                        debug!("TRACKER | destroy requested");
                        self.teardown();
                        let _ = response_tx.send(());
                        break;
                    }
                    None => {
                        debug!("TRACKER | all handles dropped, tearing down");
                        self.teardown();
                        break;
                    }
                },
                Some(settlement) = self.settle_rx.recv() => self.settle(settlement),
                _ = ticker.tick() => self.request_flush(FlushReason::Timer, None),
            }
        }

        debug!("TRACKER | service stopped for session {}", self.session.id());
    }

    fn ticker(config: &TrackerConfig) -> Interval {
        let period = config.flush_interval();
        let mut ticker = tokio::time::interval_at(Instant::now() + period, period);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
        ticker
    }

    fn track(&mut self, raw: RawEvent) {
        if !self.config.enabled {
            trace!("TRACKER | tracking disabled, ignoring {}", raw.name);
            return;
        }
        let event = self.session.stamp(raw, &self.config.global_properties);
        if let Some(evicted) = self.buffer.append(event) {
            debug!(
                "TRACKER | buffer full, evicted event {} ({})",
                evicted.sequence, evicted.name
            );
        }
        if self.buffer.is_full() {
            self.request_flush(FlushReason::Threshold, None);
        }
    }

    fn request_flush(&mut self, reason: FlushReason, response_tx: Option<oneshot::Sender<()>>) {
        self.waiters.extend(response_tx);
        if self.in_flight {
            debug!("TRACKER | batch in flight, deferring {:?} flush", reason);
            self.deferred = Some(self.deferred.map_or(reason, |d| d.merge(reason)));
            return;
        }
        self.start_cycle(reason);
    }

    fn start_cycle(&mut self, reason: FlushReason) {
        if reason.respects_backoff() {
            if let Some(until) = self.backoff_until {
                if Instant::now() < until {
                    debug!("TRACKER | backing off, skipping {:?} flush", reason);
                    self.finish_cycle();
                    return;
                }
            }
        }
        self.send_next(reason);
    }

    fn send_next(&mut self, reason: FlushReason) {
        let batch = self.buffer.take_batch(self.config.max_batch_size);
        if batch.is_empty() {
            self.finish_cycle();
            return;
        }

        self.in_flight = true;
        let transport = Arc::clone(&self.transport);
        let settle_tx = self.settle_tx.clone();
        tokio::spawn(async move {
            let outcome = transport.send(&batch).await;
            let _ = settle_tx.send(Settlement {
                batch,
                outcome,
                reason,
            });
        });
    }

    fn settle(&mut self, settlement: Settlement) {
        self.in_flight = false;
        let Settlement {
            batch,
            outcome,
            reason,
        } = settlement;

        let keep_draining = match outcome {
            SendOutcome::Delivered => {
                self.consecutive_failures = 0;
                self.backoff_until = None;
                true
            }
            SendOutcome::Rejected => {
                warn!(
                    "TRACKER | dropping rejected batch of {} events {:?}",
                    batch.len(),
                    batch.sequences()
                );
                self.consecutive_failures = 0;
                self.backoff_until = None;
                true
            }
            SendOutcome::Unreachable => {
                let size = batch.len();
                let requeue = self.buffer.requeue(batch, self.config.max_retries);
                if requeue.expired > 0 || requeue.evicted > 0 {
                    warn!(
                        "TRACKER | collector unreachable, dropped {} events out of attempts and {} evicted",
                        requeue.expired, requeue.evicted
                    );
                }
                self.consecutive_failures = self.consecutive_failures.saturating_add(1);
                let backoff = self.backoff();
                self.backoff_until = Some(Instant::now() + backoff);
                debug!(
                    "TRACKER | collector unreachable, requeued {} of {} events, backing off {:?}",
                    requeue.requeued, size, backoff
                );
                false
            }
        };

        if keep_draining && !self.buffer.is_empty() {
            self.send_next(reason);
        } else {
            self.finish_cycle();
        }
    }

    fn finish_cycle(&mut self) {
        if let Some(deferred) = self.deferred.take() {
            self.start_cycle(deferred);
            return;
        }
        for response_tx in self.waiters.drain(..) {
            let _ = response_tx.send(());
        }
    }

    /// `flush_interval * 2^(failures - 1)`, capped at `max_backoff`.
    fn backoff(&self) -> Duration {
        let exponent = self
            .consecutive_failures
            .saturating_sub(1)
            .min(MAX_BACKOFF_EXPONENT);
        self.config
            .flush_interval()
            .saturating_mul(1 << exponent)
            .min(self.config.max_backoff())
    }

    /// Applies a new configuration snapshot. Returns whether the flush timer
    /// must be restarted.
    fn reconfigure(&mut self, config: TrackerConfig) -> bool {
        if !config.enabled {
            let dropped = self.buffer.clear();
            if dropped > 0 {
                debug!("TRACKER | tracking disabled, dropped {} buffered events", dropped);
            }
        }
        let evicted = self.buffer.set_capacity(config.max_buffer_size);
        if evicted > 0 {
            debug!("TRACKER | buffer shrunk, evicted {} events", evicted);
        }
        if config.endpoint != self.config.endpoint
            || config.api_key != self.config.api_key
            || config.https_proxy != self.config.https_proxy
            || config.request_timeout_ms != self.config.request_timeout_ms
        {
            warn!("TRACKER | transport settings changed, they apply to the next session");
        }

        let restart_timer = config.flush_interval_ms != self.config.flush_interval_ms;
        self.config = config;
        restart_timer
    }

    /// Hands whatever is left to the beacon path and releases pending waiters.
    fn teardown(&mut self) {
        let batches = self.buffer.drain_batches(self.config.max_batch_size);
        if !batches.is_empty() {
            debug!("TRACKER | sending {} final batches", batches.len());
        }
        for batch in batches {
            self.transport.beacon(batch);
        }
        self.deferred = None;
        for response_tx in self.waiters.drain(..) {
            let _ = response_tx.send(());
        }
    }
}

impl<T: Transport> std::fmt::Debug for TrackerService<T> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("TrackerService")
            .field("session", &self.session.id())
            .field("buffered", &self.buffer.len())
            .field("in_flight", &self.in_flight)
            .field("consecutive_failures", &self.consecutive_failures)
            .finish_non_exhaustive()
    }
}

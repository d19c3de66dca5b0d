#![allow(dead_code)]

use std::collections::VecDeque;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use async_trait::async_trait;
use tokio::sync::mpsc;
use tokio::time::Instant;
use visitor_tracker::config::TrackerConfig;
use visitor_tracker::tracker::{Batch, Event, SendOutcome, Transport};

/// Transport double answering with scripted outcomes and recording every
/// batch it is handed.
pub struct RecordingTransport {
    outcomes: Mutex<VecDeque<SendOutcome>>,
    fallback: SendOutcome,
    delay: Option<Duration>,
    hang: bool,
    sent_tx: mpsc::UnboundedSender<Vec<Event>>,
    sent_at: Arc<Mutex<Vec<Instant>>>,
    beacons: Arc<Mutex<Vec<Vec<Event>>>>,
    in_flight: Arc<AtomicUsize>,
    max_in_flight: Arc<AtomicUsize>,
}

/// Test-side view of what a `RecordingTransport` saw.
pub struct Recorder {
    pub sent: mpsc::UnboundedReceiver<Vec<Event>>,
    pub sent_at: Arc<Mutex<Vec<Instant>>>,
    pub beacons: Arc<Mutex<Vec<Vec<Event>>>>,
    pub max_in_flight: Arc<AtomicUsize>,
}

impl RecordingTransport {
    pub fn new(outcomes: Vec<SendOutcome>) -> (Self, Recorder) {
        let (sent_tx, sent) = mpsc::unbounded_channel();
        let sent_at = Arc::new(Mutex::new(Vec::new()));
        let beacons = Arc::new(Mutex::new(Vec::new()));
        let max_in_flight = Arc::new(AtomicUsize::new(0));
        let transport = RecordingTransport {
            outcomes: Mutex::new(outcomes.into()),
            fallback: SendOutcome::Delivered,
            delay: None,
            hang: false,
            sent_tx,
            sent_at: Arc::clone(&sent_at),
            beacons: Arc::clone(&beacons),
            in_flight: Arc::new(AtomicUsize::new(0)),
            max_in_flight: Arc::clone(&max_in_flight),
        };
        let recorder = Recorder {
            sent,
            sent_at,
            beacons,
            max_in_flight,
        };
        (transport, recorder)
    }

    pub fn always(outcome: SendOutcome) -> (Self, Recorder) {
        let (mut transport, recorder) = RecordingTransport::new(Vec::new());
        transport.fallback = outcome;
        (transport, recorder)
    }

    #[must_use]
    pub fn with_delay(mut self, delay: Duration) -> Self {
        self.delay = Some(delay);
        self
    }

    /// Sends never settle.
    #[must_use]
    pub fn hanging(mut self) -> Self {
        self.hang = true;
        self
    }
}

#[async_trait]
impl Transport for RecordingTransport {
    async fn send(&self, batch: &Batch) -> SendOutcome {
        let current = self.in_flight.fetch_add(1, Ordering::SeqCst) + 1;
        self.max_in_flight.fetch_max(current, Ordering::SeqCst);
        self.sent_at.lock().unwrap().push(Instant::now());
        let _ = self.sent_tx.send(batch.events().cloned().collect());

        if self.hang {
            std::future::pending::<()>().await;
        }
        if let Some(delay) = self.delay {
            tokio::time::sleep(delay).await;
        }

        self.in_flight.fetch_sub(1, Ordering::SeqCst);
        self.outcomes
            .lock()
            .unwrap()
            .pop_front()
            .unwrap_or(self.fallback)
    }

    fn beacon(&self, batch: Batch) {
        self.beacons
            .lock()
            .unwrap()
            .push(batch.events().cloned().collect());
    }
}

impl Recorder {
    /// Next batch handed to the transport, waiting at most `wait`.
    pub async fn next_batch(&mut self, wait: Duration) -> Option<Vec<Event>> {
        tokio::time::timeout(wait, self.sent.recv()).await.ok().flatten()
    }

    /// Milliseconds between consecutive send attempts.
    pub fn gaps_ms(&self) -> Vec<u128> {
        let sent_at = self.sent_at.lock().unwrap();
        sent_at
            .windows(2)
            .map(|pair| (pair[1] - pair[0]).as_millis())
            .collect()
    }

    pub fn sequences(batch: &[Event]) -> Vec<u64> {
        batch.iter().map(|event| event.sequence).collect()
    }
}

pub fn test_config() -> TrackerConfig {
    TrackerConfig {
        flush_interval_ms: 60_000,
        ..TrackerConfig::new("http://collector.invalid/events")
    }
}

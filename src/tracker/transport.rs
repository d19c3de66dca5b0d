use async_trait::async_trait;
use reqwest::StatusCode;
use tracing::{debug, error, warn};

use crate::config::TrackerConfig;
use crate::http_client;
use crate::tracker::buffer::Batch;
use crate::API_KEY_HEADER;

/// Result of one delivery attempt. A batch is delivered as a whole or not
/// at all.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SendOutcome {
    /// The collector acknowledged the batch.
    Delivered,
    /// The collector refused the batch; resending it cannot succeed.
    Rejected,
    /// The collector could not be reached or failed; the batch may be retried.
    Unreachable,
}

impl SendOutcome {
    /// Maps a collector response status to an outcome.
    #[must_use]
    pub fn from_status(status: StatusCode) -> Self {
        if status.is_success() {
            SendOutcome::Delivered
        } else if status.is_client_error() {
            SendOutcome::Rejected
        } else {
            SendOutcome::Unreachable
        }
    }
}

/// Delivers batches to the collector.
#[async_trait]
pub trait Transport: Send + Sync + 'static {
    /// Sends `batch` and waits for the collector's answer.
    async fn send(&self, batch: &Batch) -> SendOutcome;

    /// Best-effort send used during teardown. Must not wait for a response.
    fn beacon(&self, batch: Batch);
}

/// JSON over HTTP `POST` transport.
#[derive(Debug, Clone)]
pub struct HttpTransport {
    client: reqwest::Client,
    endpoint: String,
    api_key: Option<String>,
}

impl HttpTransport {
    #[must_use]
    pub fn new(config: &TrackerConfig) -> Self {
        HttpTransport {
            client: http_client::get_client(config),
            endpoint: config.endpoint.clone(),
            api_key: config.api_key.clone(),
        }
    }

    #[must_use]
    pub fn endpoint(&self) -> &str {
        &self.endpoint
    }

    fn request(&self, body: Vec<u8>) -> reqwest::RequestBuilder {
        let req = self
            .client
            .post(&self.endpoint)
            .header("Content-Type", "application/json");
        let req = match &self.api_key {
            Some(api_key) => req.header(API_KEY_HEADER, api_key),
            None => req,
        };
        req.body(body)
    }
}

#[async_trait]
impl Transport for HttpTransport {
    async fn send(&self, batch: &Batch) -> SendOutcome {
        let body = match batch.to_json() {
            Ok(body) => body,
            Err(e) => {
                error!("TRANSPORT | Failed to serialize batch: {}", e);
                return SendOutcome::Unreachable;
            }
        };

        let post_time = std::time::Instant::now();
        let resp = self.request(body).send().await;
        let post_time = post_time.elapsed();

        match resp {
            Ok(resp) => {
                let status = resp.status();
                let _ = resp.text().await;
                let outcome = SendOutcome::from_status(status);
                match outcome {
                    SendOutcome::Delivered => debug!(
                        "TRANSPORT | Delivered {} events in {:?}",
                        batch.len(),
                        post_time
                    ),
                    SendOutcome::Rejected => {
                        warn!("TRANSPORT | Collector rejected batch: {}", status);
                    }
                    SendOutcome::Unreachable => {
                        debug!("TRANSPORT | Collector failed batch: {}", status);
                    }
                }
                outcome
            }
            Err(e) => {
                if e.is_timeout() {
                    debug!("TRANSPORT | Collector timed out after {:?}", post_time);
                } else {
                    debug!("TRANSPORT | Failed to reach collector: {}", e);
                }
                SendOutcome::Unreachable
            }
        }
    }

    fn beacon(&self, batch: Batch) {
        let Ok(runtime) = tokio::runtime::Handle::try_current() else {
            warn!(
                "TRANSPORT | No runtime available, dropping {} events on teardown",
                batch.len()
            );
            return;
        };
        let body = match batch.to_json() {
            Ok(body) => body,
            Err(e) => {
                error!("TRANSPORT | Failed to serialize beacon batch: {}", e);
                return;
            }
        };
        let req = self.request(body);
        runtime.spawn(async move {
            if let Err(e) = req.send().await {
                debug!("TRANSPORT | Beacon send failed: {}", e);
            }
        });
    }
}

use tracing::error;

use crate::config::TrackerConfig;
use crate::{TRACKER_NAME, TRACKER_VERSION};

/// Builds the collector client, falling back to a client without proxy when
/// the proxy configuration cannot be used.
#[must_use]
pub fn get_client(config: &TrackerConfig) -> reqwest::Client {
    match build_client(config) {
        Ok(client) => client,
        Err(e) => {
            error!(
                "HTTP_CLIENT | Unable to parse proxy configuration: {}, no proxy will be used",
                e
            );
            base_builder(config)
                .build()
                .unwrap_or_else(|_| reqwest::Client::new())
        }
    }
}

fn base_builder(config: &TrackerConfig) -> reqwest::ClientBuilder {
    reqwest::Client::builder()
        .timeout(config.request_timeout())
        .user_agent(format!("{TRACKER_NAME}/{TRACKER_VERSION}"))
}

fn build_client(config: &TrackerConfig) -> Result<reqwest::Client, reqwest::Error> {
    let client = base_builder(config);
    if let Some(https_uri) = &config.https_proxy {
        let proxy = reqwest::Proxy::https(https_uri.clone())?;
        client.proxy(proxy).build()
    } else {
        client.build()
    }
}

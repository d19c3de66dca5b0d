#![deny(clippy::all)]
#![deny(clippy::pedantic)]
#![deny(clippy::unwrap_used)]
#![deny(unused_extern_crates)]
#![deny(missing_debug_implementations)]

use std::{env, error::Error, path::Path};

use tokio::io::{stdin, BufReader};
use tracing::{debug, error};
use visitor_tracker::{
    config, logger,
    tracker::{constants::TEARDOWN_GRACE, producer::LineProducer, EventTracker},
};

#[tokio::main]
async fn main() -> Result<(), Box<dyn Error>> {
    let config_directory = env::var("TRACKER_CONFIG_DIR").unwrap_or_else(|_| ".".to_string());
    let config = config::get_config(Path::new(&config_directory))?;

    if let Err(e) = logger::init(config.log_level) {
        eprintln!("Failed to enable logging subsystem: {e}");
    }
    debug!(
        "Starting tracker, flushing to {} every {:?}",
        config.endpoint,
        config.flush_interval()
    );

    let tracker = EventTracker::init_http(config)?;
    let mut producer = LineProducer::new(BufReader::new(stdin()), tracker.clone());

    let cancel_token = producer.cancel_token();
    tokio::spawn(async move {
        match tokio::signal::ctrl_c().await {
            Ok(()) => cancel_token.cancel(),
            Err(e) => error!("Unable to listen for shutdown signal: {e}"),
        }
    });

    let tracked = producer.spin().await;
    debug!("Tracked {} events in session {}", tracked, tracker.session_id());

    if let Err(e) = tracker.destroy().await {
        error!("Failed to tear down tracker: {e}");
    }
    // let the final beacon sends go out before the runtime stops
    tokio::time::sleep(TEARDOWN_GRACE).await;

    Ok(())
}

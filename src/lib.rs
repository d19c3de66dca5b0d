//! Crate for the `visitor-tracker` project
#![deny(clippy::all)]
#![deny(clippy::pedantic)]
#![deny(clippy::unwrap_used)]
#![deny(unused_extern_crates)]
#![deny(unused_allocation)]
#![deny(unused_assignments)]
#![deny(unused_comparisons)]
#![deny(unreachable_pub)]
#![deny(missing_copy_implementations)]
#![allow(missing_docs)]
#![allow(clippy::missing_errors_doc)]
#![allow(clippy::module_name_repetitions)]

pub mod config;
pub mod http_client;
pub mod logger;
pub mod tracker;

pub const TRACKER_NAME: &str = "visitor-tracker";
pub const TRACKER_VERSION: &str = env!("CARGO_PKG_VERSION");

/// Name of the YAML file looked up in the configuration directory.
pub const CONFIG_FILE_NAME: &str = "tracker.yaml";

/// Prefix of the environment variables overriding the YAML file.
pub const ENV_PREFIX: &str = "TRACKER_";

/// Header carrying the collector API key, when one is configured.
pub const API_KEY_HEADER: &str = "X-Tracker-Api-Key";

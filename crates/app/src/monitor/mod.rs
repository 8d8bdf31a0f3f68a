//! Larva density monitoring pipeline.
//!
//! Capture frames from one source, run segmentation through a single
//! inference lane, derive density metrics, fan the results out to live
//! consumers over WebSockets, and raise cooldown-debounced alerts when the
//! density crosses the configured threshold.

mod alerts;
mod annotate;
mod broadcast;
mod config;
mod data;
mod density;
mod inference;
mod pipeline;
mod server;
mod stats;
mod store;
mod telemetry;
mod watchdog;

pub use config::{MonitorConfig, OracleKind};
pub use pipeline::run;

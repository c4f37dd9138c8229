//! IoT data bridge: ingests telemetry frames over MQTT or a SignalR-class
//! hub, rewrites them into canonical (object, value) tuples via a mapping
//! catalog, fans each tuple out to the devices subscribed to its object,
//! and delivers over the configured egress transport.

pub mod backoff;
pub mod catalog;
pub mod client;
pub mod config;
pub mod counters;
pub mod delivery_log;
pub mod egress;
pub mod hub;
pub mod ingest;
pub mod mapper;
pub mod mqtt;
pub mod pipeline;
pub mod resolver;
pub mod supervisor;

pub use config::{AppConfig, ConfigError};
pub use counters::{CounterSnapshot, PipelineCounters};
pub use supervisor::BridgeError;

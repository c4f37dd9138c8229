//! Bridge configuration loading.
//!
//! TOML is the sole config source. The default path is
//! `/etc/iot-data-bridge/bridge.toml`; `--config` or `BRIDGE_CONFIG`
//! override it without changing semantics.
//!
//! # Required fields
//! - `mapping_catalog_path`, `device_catalog_path`
//! - `[input]` with `type` and the matching dialect table
//! - `[transports]` with `type` and the matching dialect table
//!
//! Everything else has a default.

use bridge_protocol::TransportKind;
use serde::Deserialize;
use std::path::{Path, PathBuf};

// ---------------------------------------------------------------------------
// Validated config types
// ---------------------------------------------------------------------------

/// Top-level bridge configuration.
#[derive(Debug, Clone)]
pub struct AppConfig {
    pub app_name: String,
    pub mapping_catalog_path: PathBuf,
    pub device_catalog_path: PathBuf,
    pub input: EndpointConfig,
    pub transports: EndpointConfig,
    pub logging: LoggingConfig,
    pub pipeline: PipelineConfig,
}

/// One side of the bridge: the chosen dialect plus its parameters.
///
/// Invariant (enforced at load): the table matching `kind` is present.
#[derive(Debug, Clone)]
pub struct EndpointConfig {
    pub kind: TransportKind,
    pub mqtt: Option<MqttConfig>,
    pub signalr: Option<SignalrConfig>,
}

impl EndpointConfig {
    /// The MQTT parameters; panics only if the load-time invariant is broken.
    pub fn mqtt(&self) -> &MqttConfig {
        self.mqtt.as_ref().expect("mqtt table validated at load")
    }

    pub fn signalr(&self) -> &SignalrConfig {
        self.signalr.as_ref().expect("signalr table validated at load")
    }
}

#[derive(Debug, Clone)]
pub struct MqttConfig {
    pub host: String,
    pub port: u16,
    pub username: Option<String>,
    pub password: Option<String>,
    pub topic: String,
    pub qos: u8,
    pub keepalive_seconds: u64,
    pub ssl: bool,
    /// CA bundle bytes, read from `ca_file` at load time when `ssl = true`.
    pub ca: Option<Vec<u8>>,
}

#[derive(Debug, Clone)]
pub struct SignalrConfig {
    pub url: String,
    pub group: String,
    pub username: Option<String>,
    pub password: Option<String>,
    /// Hub method invoked for each egress send.
    pub send_method: String,
    /// Event target name: listened for on ingest, passed on egress sends.
    pub target: String,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LogTimestamps {
    Local,
    Utc,
}

#[derive(Debug, Clone)]
pub struct LoggingConfig {
    pub level: String,
    pub file: PathBuf,
    pub max_size: u64,
    pub backup_count: u32,
    pub timestamps: LogTimestamps,
}

/// Tuning knobs for the pipeline and both transport clients.
#[derive(Debug, Clone)]
pub struct PipelineConfig {
    /// 0 disables the ingest idle watchdog.
    pub ingest_idle_timeout_seconds: u64,
    /// 0 disables the egress idle watchdog.
    pub egress_idle_timeout_seconds: u64,
    pub send_timeout_seconds: u64,
    /// 0 disables the periodic counter snapshot line.
    pub stats_interval_seconds: u64,
    /// `"immediate"` or `"batched"` (SignalR egress only).
    pub batch_mode: String,
    pub batch_flush_ms: u64,
    pub batch_max_events: usize,
    /// Treat a retried send as fatal for that device (strict per-device order).
    pub strict_device_order: bool,
}

// ---------------------------------------------------------------------------
// Raw TOML deserialization types (with Option for optional fields)
// ---------------------------------------------------------------------------

#[derive(Debug, Deserialize)]
struct RawConfig {
    app_name: Option<String>,
    mapping_catalog_path: Option<PathBuf>,
    device_catalog_path: Option<PathBuf>,
    input: Option<RawEndpointConfig>,
    transports: Option<RawEndpointConfig>,
    logging: Option<RawLoggingConfig>,
    pipeline: Option<RawPipelineConfig>,
}

#[derive(Debug, Deserialize)]
struct RawEndpointConfig {
    #[serde(rename = "type")]
    kind: Option<String>,
    mqtt: Option<RawMqttConfig>,
    signalr: Option<RawSignalrConfig>,
}

#[derive(Debug, Deserialize)]
struct RawMqttConfig {
    host: Option<String>,
    port: Option<u16>,
    username: Option<String>,
    password: Option<String>,
    topic: Option<String>,
    qos: Option<u8>,
    keepalive_seconds: Option<u64>,
    ssl: Option<bool>,
    ca_file: Option<PathBuf>,
}

#[derive(Debug, Deserialize)]
struct RawSignalrConfig {
    url: Option<String>,
    group: Option<String>,
    username: Option<String>,
    password: Option<String>,
    send_method: Option<String>,
    target: Option<String>,
}

#[derive(Debug, Deserialize)]
struct RawLoggingConfig {
    level: Option<String>,
    file: Option<PathBuf>,
    max_size: Option<u64>,
    backup_count: Option<u32>,
    timestamps: Option<String>,
}

#[derive(Debug, Deserialize)]
struct RawPipelineConfig {
    ingest_idle_timeout_seconds: Option<u64>,
    egress_idle_timeout_seconds: Option<u64>,
    send_timeout_seconds: Option<u64>,
    stats_interval_seconds: Option<u64>,
    batch_mode: Option<String>,
    batch_flush_ms: Option<u64>,
    batch_max_events: Option<usize>,
    strict_device_order: Option<bool>,
}

// ---------------------------------------------------------------------------
// Error type
// ---------------------------------------------------------------------------

#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("IO error: {0}")]
    Io(String),
    #[error("Parse error: {0}")]
    Parse(String),
    #[error("Missing required field: {0}")]
    MissingField(String),
    #[error("Invalid config value: {0}")]
    InvalidValue(String),
}

// ---------------------------------------------------------------------------
// Public API
// ---------------------------------------------------------------------------

pub const DEFAULT_CONFIG_PATH: &str = "/etc/iot-data-bridge/bridge.toml";

/// Load bridge config from a custom path.
pub fn load_config_from_path(path: &Path) -> Result<AppConfig, ConfigError> {
    let toml_str = std::fs::read_to_string(path)
        .map_err(|e| ConfigError::Io(format!("reading config file '{}': {}", path.display(), e)))?;
    load_config_from_str(&toml_str)
}

/// Load bridge config from a TOML string.
pub fn load_config_from_str(toml_str: &str) -> Result<AppConfig, ConfigError> {
    let raw: RawConfig = toml::from_str(toml_str).map_err(|e| ConfigError::Parse(e.to_string()))?;

    let mapping_catalog_path = raw
        .mapping_catalog_path
        .ok_or_else(|| ConfigError::MissingField("mapping_catalog_path".to_owned()))?;
    let device_catalog_path = raw
        .device_catalog_path
        .ok_or_else(|| ConfigError::MissingField("device_catalog_path".to_owned()))?;

    let input = validate_endpoint(
        raw.input.ok_or_else(|| ConfigError::MissingField("input".to_owned()))?,
        "input",
    )?;
    let transports = validate_endpoint(
        raw.transports.ok_or_else(|| ConfigError::MissingField("transports".to_owned()))?,
        "transports",
    )?;

    let logging = validate_logging(raw.logging)?;
    let pipeline = validate_pipeline(raw.pipeline)?;

    Ok(AppConfig {
        app_name: raw.app_name.unwrap_or_else(|| "iot-data-bridge".to_owned()),
        mapping_catalog_path,
        device_catalog_path,
        input,
        transports,
        logging,
        pipeline,
    })
}

// ---------------------------------------------------------------------------
// Section validators
// ---------------------------------------------------------------------------

fn validate_endpoint(raw: RawEndpointConfig, section: &str) -> Result<EndpointConfig, ConfigError> {
    let kind_str = raw
        .kind
        .ok_or_else(|| ConfigError::MissingField(format!("{section}.type")))?;
    let kind = match kind_str.as_str() {
        "mqtt" => TransportKind::Mqtt,
        "signalr" => TransportKind::Signalr,
        other => {
            return Err(ConfigError::InvalidValue(format!(
                "{section}.type must be \"mqtt\" or \"signalr\", got \"{other}\""
            )));
        }
    };

    let mqtt = raw.mqtt.map(|m| validate_mqtt(m, section)).transpose()?;
    let signalr = raw.signalr.map(|s| validate_signalr(s, section)).transpose()?;

    match kind {
        TransportKind::Mqtt if mqtt.is_none() => {
            return Err(ConfigError::MissingField(format!("{section}.mqtt")));
        }
        TransportKind::Signalr if signalr.is_none() => {
            return Err(ConfigError::MissingField(format!("{section}.signalr")));
        }
        _ => {}
    }

    Ok(EndpointConfig { kind, mqtt, signalr })
}

fn validate_mqtt(raw: RawMqttConfig, section: &str) -> Result<MqttConfig, ConfigError> {
    let host = raw
        .host
        .ok_or_else(|| ConfigError::MissingField(format!("{section}.mqtt.host")))?;
    let topic = raw
        .topic
        .ok_or_else(|| ConfigError::MissingField(format!("{section}.mqtt.topic")))?;
    let qos = raw.qos.unwrap_or(1);
    if qos > 2 {
        return Err(ConfigError::InvalidValue(format!(
            "{section}.mqtt.qos must be 0, 1 or 2, got {qos}"
        )));
    }

    let ssl = raw.ssl.unwrap_or(false);
    let ca = if ssl {
        let ca_file = raw
            .ca_file
            .ok_or_else(|| ConfigError::MissingField(format!("{section}.mqtt.ca_file")))?;
        let bytes = std::fs::read(&ca_file).map_err(|e| {
            ConfigError::Io(format!("reading CA bundle '{}': {}", ca_file.display(), e))
        })?;
        Some(bytes)
    } else {
        None
    };

    Ok(MqttConfig {
        host,
        port: raw.port.unwrap_or(1883),
        username: raw.username,
        password: raw.password,
        topic,
        qos,
        keepalive_seconds: raw.keepalive_seconds.unwrap_or(60),
        ssl,
        ca,
    })
}

fn validate_signalr(raw: RawSignalrConfig, section: &str) -> Result<SignalrConfig, ConfigError> {
    let url = raw
        .url
        .ok_or_else(|| ConfigError::MissingField(format!("{section}.signalr.url")))?;
    let group = raw
        .group
        .ok_or_else(|| ConfigError::MissingField(format!("{section}.signalr.group")))?;
    Ok(SignalrConfig {
        url,
        group,
        username: raw.username,
        password: raw.password,
        send_method: raw.send_method.unwrap_or_else(|| "SendMessage".to_owned()),
        target: raw.target.unwrap_or_else(|| "ingress".to_owned()),
    })
}

fn validate_logging(raw: Option<RawLoggingConfig>) -> Result<LoggingConfig, ConfigError> {
    let raw = raw.unwrap_or(RawLoggingConfig {
        level: None,
        file: None,
        max_size: None,
        backup_count: None,
        timestamps: None,
    });
    let timestamps = match raw.timestamps.as_deref() {
        None | Some("local") => LogTimestamps::Local,
        Some("utc") => LogTimestamps::Utc,
        Some(other) => {
            return Err(ConfigError::InvalidValue(format!(
                "logging.timestamps must be \"local\" or \"utc\", got \"{other}\""
            )));
        }
    };
    Ok(LoggingConfig {
        level: raw.level.unwrap_or_else(|| "info".to_owned()),
        file: raw.file.unwrap_or_else(|| PathBuf::from("logs/bridge.log")),
        max_size: raw.max_size.unwrap_or(10 * 1024 * 1024),
        backup_count: raw.backup_count.unwrap_or(5),
        timestamps,
    })
}

fn validate_pipeline(raw: Option<RawPipelineConfig>) -> Result<PipelineConfig, ConfigError> {
    let raw = raw.unwrap_or(RawPipelineConfig {
        ingest_idle_timeout_seconds: None,
        egress_idle_timeout_seconds: None,
        send_timeout_seconds: None,
        stats_interval_seconds: None,
        batch_mode: None,
        batch_flush_ms: None,
        batch_max_events: None,
        strict_device_order: None,
    });

    let send_timeout_seconds = raw.send_timeout_seconds.unwrap_or(10);
    if !(3..=30).contains(&send_timeout_seconds) {
        return Err(ConfigError::InvalidValue(format!(
            "pipeline.send_timeout_seconds must be within 3..=30, got {send_timeout_seconds}"
        )));
    }

    let batch_mode = raw.batch_mode.unwrap_or_else(|| "immediate".to_owned());
    if batch_mode != "immediate" && batch_mode != "batched" {
        return Err(ConfigError::InvalidValue(format!(
            "pipeline.batch_mode must be \"immediate\" or \"batched\", got \"{batch_mode}\""
        )));
    }

    Ok(PipelineConfig {
        ingest_idle_timeout_seconds: raw.ingest_idle_timeout_seconds.unwrap_or(60),
        egress_idle_timeout_seconds: raw.egress_idle_timeout_seconds.unwrap_or(90),
        send_timeout_seconds,
        stats_interval_seconds: raw.stats_interval_seconds.unwrap_or(60),
        batch_mode,
        batch_flush_ms: raw.batch_flush_ms.unwrap_or(50),
        batch_max_events: raw.batch_max_events.unwrap_or(20),
        strict_device_order: raw.strict_device_order.unwrap_or(false),
    })
}

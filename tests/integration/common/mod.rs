//! Shared harness helpers for the integration suites.
#![allow(dead_code)]

use bridge::config::{AppConfig, load_config_from_str};
use std::io::Write;
use std::path::{Path, PathBuf};

pub const MAPPINGS: &str = r#"
[[mappings]]
equip_tag = "GPS001"
message_id = "GLL001"
object = "GPS.LAT"
value_type = "float"

[[mappings]]
equip_tag = "ENG001"
message_id = "RPM001"
object = "ENG.RPM"
value_type = "integer"

[[mappings]]
equip_tag = "AUX001"
message_id = "AUX001"
object = "AUX.UNROUTED"
value_type = "float"
"#;

pub const DEVICES: &str = r#"
[objects]
"GPS.LAT" = ["VM-A"]
"ENG.RPM" = ["VM-A", "VM-B", "VM-C"]
"#;

pub fn write_file(dir: &Path, name: &str, content: &str) -> PathBuf {
    let path = dir.join(name);
    let mut f = std::fs::File::create(&path).unwrap();
    f.write_all(content.as_bytes()).unwrap();
    path
}

/// Build a SignalR-to-SignalR bridge config against two in-process hubs.
///
/// `pipeline_extra` appends lines to the `[pipeline]` table (e.g.
/// `"ingest_idle_timeout_seconds = 1"`).
pub fn signalr_config(
    dir: &Path,
    ingest_url: &str,
    egress_url: &str,
    pipeline_extra: &str,
) -> AppConfig {
    let mappings = write_file(dir, "mappings.toml", MAPPINGS);
    let devices = write_file(dir, "devices.toml", DEVICES);
    let log_file = dir.join("delivery.log");

    let toml = format!(
        r#"
app_name = "bridge-test"
mapping_catalog_path = "{mappings}"
device_catalog_path = "{devices}"

[input]
type = "signalr"
[input.signalr]
url = "{ingest_url}"
group = "gateways"

[transports]
type = "signalr"
[transports.signalr]
url = "{egress_url}"
group = "devices"

[logging]
file = "{log}"
timestamps = "utc"

[pipeline]
stats_interval_seconds = 0
send_timeout_seconds = 3
{pipeline_extra}
"#,
        mappings = mappings.display(),
        devices = devices.display(),
        log = log_file.display(),
    );
    load_config_from_str(&toml).unwrap()
}

pub fn delivery_log_path(dir: &Path) -> PathBuf {
    dir.join("delivery.log")
}

//! Shared rumqttc plumbing for the two MQTT clients.

use crate::config::MqttConfig;
use rumqttc::{MqttOptions, QoS, TlsConfiguration, Transport};
use std::time::Duration;

/// Build client options from config. TLS uses the CA bundle read at config
/// load time.
pub fn mqtt_options(cfg: &MqttConfig, client_id: &str) -> MqttOptions {
    let mut options = MqttOptions::new(client_id, cfg.host.clone(), cfg.port);
    options.set_keep_alive(Duration::from_secs(cfg.keepalive_seconds));
    if let (Some(username), Some(password)) = (&cfg.username, &cfg.password) {
        options.set_credentials(username.clone(), password.clone());
    }
    if let Some(ca) = &cfg.ca {
        options.set_transport(Transport::Tls(TlsConfiguration::Simple {
            ca: ca.clone(),
            alpn: None,
            client_auth: None,
        }));
    }
    options
}

pub fn qos_level(qos: u8) -> QoS {
    match qos {
        0 => QoS::AtMostOnce,
        2 => QoS::ExactlyOnce,
        _ => QoS::AtLeastOnce,
    }
}

/// Egress topic for one device: `devices/<device_id_lowercase>/ingress`.
pub fn device_topic(device_id: &str) -> String {
    format!("devices/{}/ingress", device_id.to_lowercase())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn device_topic_lower_cases_the_id() {
        assert_eq!(device_topic("VM-A"), "devices/vm-a/ingress");
        assert_eq!(device_topic("vm-b"), "devices/vm-b/ingress");
    }

    #[test]
    fn qos_levels_map_to_the_protocol_constants() {
        assert_eq!(qos_level(0), QoS::AtMostOnce);
        assert_eq!(qos_level(1), QoS::AtLeastOnce);
        assert_eq!(qos_level(2), QoS::ExactlyOnce);
    }
}

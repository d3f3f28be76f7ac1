//! MQTT connection configuration.

use serde::Deserialize;

/// Paths to the PEM files for mutual TLS.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct CertificatePaths {
    /// CA certificate.
    pub ca: String,
    /// Device X.509 certificate.
    pub client: String,
    /// Device private key.
    pub key: String,
}

/// Topic templates; `{vin}` is substituted at channel construction.
#[derive(Debug, Clone, Deserialize)]
pub struct TopicTemplates {
    #[serde(default = "default_telemetry_topic")]
    pub telemetry: String,
    #[serde(default = "default_status_topic")]
    pub status: String,
}

impl Default for TopicTemplates {
    fn default() -> Self {
        Self {
            telemetry: default_telemetry_topic(),
            status: default_status_topic(),
        }
    }
}

fn default_telemetry_topic() -> String {
    cl_protocol::topics::TELEMETRY_TEMPLATE.to_string()
}

fn default_status_topic() -> String {
    cl_protocol::topics::STATUS_TEMPLATE.to_string()
}

/// MQTT broker connection settings.
#[derive(Debug, Clone, Deserialize)]
pub struct MqttConfig {
    /// Broker hostname.
    pub endpoint: String,
    /// Broker port (default 8883 for TLS).
    #[serde(default = "default_port")]
    pub port: u16,
    /// Keep-alive interval in seconds.
    #[serde(default = "default_keep_alive")]
    pub keep_alive: u16,
    /// Quality of service for publishes (0, 1 or 2; default 1).
    #[serde(default = "default_qos")]
    pub qos: u8,
    /// Mutual-TLS certificate paths. Empty paths disable TLS (local dev).
    #[serde(default)]
    pub certificates: CertificatePaths,
    #[serde(default)]
    pub topics: TopicTemplates,
}

fn default_port() -> u16 {
    8883
}

fn default_keep_alive() -> u16 {
    60
}

fn default_qos() -> u8 {
    1
}

impl MqttConfig {
    pub fn use_tls(&self) -> bool {
        !self.certificates.ca.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn minimal_config_gets_defaults() {
        let yaml = "endpoint: broker.example.com\n";
        let config: MqttConfig = serde_yaml::from_str(yaml).unwrap();
        assert_eq!(config.port, 8883);
        assert_eq!(config.keep_alive, 60);
        assert_eq!(config.qos, 1);
        assert_eq!(config.topics.telemetry, "vehicle/{vin}/telemetry");
        assert_eq!(config.topics.status, "vehicle/{vin}/status");
        assert!(!config.use_tls());
    }

    #[test]
    fn full_config_parses() {
        let yaml = r#"
endpoint: a1b2c3-ats.iot.us-east-1.amazonaws.com
port: 8883
keep_alive: 30
qos: 1
certificates:
  ca: /certs/AmazonRootCA1.pem
  client: /certs/device.pem.crt
  key: /certs/device.private.key
topics:
  telemetry: "fleet/{vin}/telemetry"
  status: "fleet/{vin}/status"
"#;
        let config: MqttConfig = serde_yaml::from_str(yaml).unwrap();
        assert_eq!(config.keep_alive, 30);
        assert!(config.use_tls());
        assert_eq!(config.topics.telemetry, "fleet/{vin}/telemetry");
    }
}

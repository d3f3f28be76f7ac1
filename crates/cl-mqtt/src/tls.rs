//! TLS configuration for mutual-TLS broker connections.
//!
//! Loads the X.509 device certificate, private key, and CA certificate
//! from PEM files and configures rumqttc's TLS transport.

use rumqttc::Transport;

use crate::config::MqttConfig;
use crate::error::{MqttError, MqttResult};

/// Build a TLS transport from the certificate paths in the config.
pub fn load_tls_transport(config: &MqttConfig) -> MqttResult<Transport> {
    let certs = &config.certificates;

    let ca = std::fs::read(&certs.ca)
        .map_err(|e| MqttError::Tls(format!("failed to read CA cert '{}': {e}", certs.ca)))?;

    let client_cert = std::fs::read(&certs.client).map_err(|e| {
        MqttError::Tls(format!("failed to read client cert '{}': {e}", certs.client))
    })?;

    let client_key = std::fs::read(&certs.key)
        .map_err(|e| MqttError::Tls(format!("failed to read client key '{}': {e}", certs.key)))?;

    Ok(Transport::tls_with_config(
        rumqttc::TlsConfiguration::Simple {
            ca,
            alpn: None,
            client_auth: Some((client_cert, client_key)),
        },
    ))
}

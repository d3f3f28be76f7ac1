//! MQTT uplink for the CanLink edge gateway.
//!
//! Wraps `rumqttc::AsyncClient` with a typed publish surface, mutual-TLS
//! transport loading, a retry ladder, and connection-state tracking driven
//! from the event loop.

pub mod channel;
pub mod config;
pub mod error;
pub mod mock;
pub mod tls;

pub use channel::{Channel, ConnectionState, MqttChannel, drive_event_loop, publish_with_retry};
pub use config::{CertificatePaths, MqttConfig, TopicTemplates};
pub use error::{MqttError, MqttResult};
pub use mock::MockChannel;

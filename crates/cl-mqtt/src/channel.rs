//! MQTT channel — async client for the telemetry broker.
//!
//! Wraps `rumqttc::AsyncClient` with typed publish helpers for telemetry
//! and status, a 1 s / 2 s / 4 s retry ladder, and connection-state
//! tracking fed by the event-loop driver.

use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::Duration;

use async_trait::async_trait;
use rumqttc::{AsyncClient, Event, EventLoop, MqttOptions, Packet, QoS};
use tokio::sync::watch;

use cl_protocol::{TelemetryEnvelope, topics};

use crate::config::MqttConfig;
use crate::error::{MqttError, MqttResult};
use crate::tls;

/// Retry schedule for a failed publish (exponential backoff).
const RETRY_DELAYS: [Duration; 3] = [
    Duration::from_secs(1),
    Duration::from_secs(2),
    Duration::from_secs(4),
];

// ── Channel trait ─────────────────────────────────────────────

/// Abstraction for broker publishing; enables mocking without a broker.
#[async_trait]
pub trait Channel: Send + Sync {
    /// Publish a raw payload to a topic. One attempt, no retry.
    async fn publish(&self, topic: &str, payload: &[u8]) -> MqttResult<()>;
}

/// Publish with the retry ladder; gives up after the last delay.
pub async fn publish_with_retry(
    channel: &dyn Channel,
    topic: &str,
    payload: &[u8],
) -> MqttResult<()> {
    let mut last_error = None;
    for (attempt, delay) in RETRY_DELAYS.iter().enumerate() {
        match channel.publish(topic, payload).await {
            Ok(()) => return Ok(()),
            Err(e) => {
                tracing::warn!(
                    attempt = attempt + 1,
                    topic,
                    error = %e,
                    retry_in_secs = delay.as_secs(),
                    "publish attempt failed"
                );
                last_error = Some(e);
                tokio::time::sleep(*delay).await;
            }
        }
    }
    Err(last_error.unwrap_or_else(|| MqttError::Publish("publish failed".into())))
}

// ── Connection state ──────────────────────────────────────────

/// Shared broker-connection flag, written by the event-loop driver.
#[derive(Clone, Default)]
pub struct ConnectionState(Arc<AtomicBool>);

impl ConnectionState {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn is_connected(&self) -> bool {
        self.0.load(Ordering::Relaxed)
    }

    pub fn set(&self, connected: bool) {
        self.0.store(connected, Ordering::Relaxed);
    }
}

/// Drive the rumqttc event loop until shutdown, maintaining `state`.
///
/// Connection errors back off 5 s before the next poll so a dead broker
/// does not spin the loop.
pub async fn drive_event_loop(
    mut eventloop: EventLoop,
    state: ConnectionState,
    mut shutdown: watch::Receiver<bool>,
) {
    loop {
        tokio::select! {
            event = eventloop.poll() => match event {
                Ok(Event::Incoming(Packet::ConnAck(_))) => {
                    tracing::info!("connected to MQTT broker");
                    state.set(true);
                }
                Ok(Event::Incoming(Packet::Disconnect)) => {
                    tracing::warn!("broker sent disconnect");
                    state.set(false);
                }
                Ok(_) => {}
                Err(e) => {
                    state.set(false);
                    tracing::warn!(error = %e, "MQTT event loop error, retrying in 5s");
                    tokio::time::sleep(Duration::from_secs(5)).await;
                }
            },
            _ = shutdown.changed() => {
                if *shutdown.borrow() {
                    state.set(false);
                    break;
                }
            }
        }
    }
    tracing::info!("MQTT event loop stopped");
}

// ── MqttChannel ───────────────────────────────────────────────

/// MQTT channel bound to one vehicle.
///
/// `new()` returns the channel and the `EventLoop`; the caller must spawn
/// [`drive_event_loop`] on the latter or nothing will flow.
pub struct MqttChannel {
    client: AsyncClient,
    qos: QoS,
    telemetry_topic: String,
    status_topic: String,
}

impl MqttChannel {
    /// Create a channel for `vin`, using it as the MQTT client id with a
    /// persistent session.
    pub fn new(config: &MqttConfig, vin: &str) -> MqttResult<(Self, EventLoop)> {
        let mut options = MqttOptions::new(vin, &config.endpoint, config.port);
        options.set_keep_alive(Duration::from_secs(config.keep_alive.into()));
        options.set_clean_session(false);

        if config.use_tls() {
            options.set_transport(tls::load_tls_transport(config)?);
        }

        let (client, eventloop) = AsyncClient::new(options, 64);

        Ok((
            Self {
                client,
                qos: qos_from(config.qos),
                telemetry_topic: topics::render(&config.topics.telemetry, vin),
                status_topic: topics::render(&config.topics.status, vin),
            },
            eventloop,
        ))
    }

    pub fn telemetry_topic(&self) -> &str {
        &self.telemetry_topic
    }

    pub fn status_topic(&self) -> &str {
        &self.status_topic
    }

    /// Publish one telemetry envelope to the telemetry topic, with retry.
    pub async fn publish_telemetry(&self, envelope: &TelemetryEnvelope) -> MqttResult<()> {
        let payload = serde_json::to_vec(envelope)
            .map_err(|e| MqttError::Serialization(e.to_string()))?;
        publish_with_retry(self, &self.telemetry_topic, &payload).await
    }

    /// Publish a status payload to the status topic, with retry.
    pub async fn publish_status(&self, status: &serde_json::Value) -> MqttResult<()> {
        let payload = serde_json::to_vec(status)
            .map_err(|e| MqttError::Serialization(e.to_string()))?;
        publish_with_retry(self, &self.status_topic, &payload).await
    }
}

#[async_trait]
impl Channel for MqttChannel {
    async fn publish(&self, topic: &str, payload: &[u8]) -> MqttResult<()> {
        self.client
            .publish(topic, self.qos, false, payload)
            .await
            .map_err(|e| MqttError::Publish(e.to_string()))
    }
}

fn qos_from(level: u8) -> QoS {
    match level {
        0 => QoS::AtMostOnce,
        2 => QoS::ExactlyOnce,
        _ => QoS::AtLeastOnce,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::{CertificatePaths, TopicTemplates};
    use crate::mock::MockChannel;

    fn config() -> MqttConfig {
        MqttConfig {
            endpoint: "localhost".into(),
            port: 1883,
            keep_alive: 30,
            qos: 1,
            certificates: CertificatePaths::default(),
            topics: TopicTemplates::default(),
        }
    }

    #[test]
    fn topics_render_vin() {
        let (channel, _eventloop) = MqttChannel::new(&config(), "1HGBH41JXMN109186").unwrap();
        assert_eq!(channel.telemetry_topic(), "vehicle/1HGBH41JXMN109186/telemetry");
        assert_eq!(channel.status_topic(), "vehicle/1HGBH41JXMN109186/status");
    }

    #[test]
    fn qos_mapping() {
        assert_eq!(qos_from(0), QoS::AtMostOnce);
        assert_eq!(qos_from(1), QoS::AtLeastOnce);
        assert_eq!(qos_from(2), QoS::ExactlyOnce);
        // Unknown levels fall back to at-least-once.
        assert_eq!(qos_from(9), QoS::AtLeastOnce);
    }

    #[test]
    fn connection_state_flips() {
        let state = ConnectionState::new();
        assert!(!state.is_connected());
        state.set(true);
        assert!(state.is_connected());
        state.set(false);
        assert!(!state.is_connected());
    }

    #[tokio::test(start_paused = true)]
    async fn retry_ladder_recovers_from_transient_failures() {
        let mock = MockChannel::new();
        mock.fail_next(2);

        publish_with_retry(&mock, "vehicle/VIN/telemetry", b"payload")
            .await
            .unwrap();
        assert_eq!(mock.published_count(), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn retry_ladder_gives_up_after_three_attempts() {
        let mock = MockChannel::new();
        mock.fail_next(10);

        let result = publish_with_retry(&mock, "t", b"p").await;
        assert!(result.is_err());
        assert_eq!(mock.published_count(), 0);
    }
}

//! Periodic status heartbeat.
//!
//! Publishes a liveness payload to the status topic every 30 s so the
//! cloud side can distinguish "offline vehicle" from "no telemetry".

use std::sync::Arc;
use std::time::Duration;

use tokio::sync::watch;

use cl_mqtt::{Channel, ConnectionState, publish_with_retry};

use crate::publisher::PublishCounters;

/// Heartbeat publish interval.
pub const HEARTBEAT_INTERVAL: Duration = Duration::from_secs(30);

/// Build the status payload.
pub fn status_payload(vin: &str, counters: &PublishCounters) -> serde_json::Value {
    serde_json::json!({
        "vin": vin,
        "status": "online",
        "timestamp": chrono::Utc::now().to_rfc3339_opts(chrono::SecondsFormat::Millis, true),
        "stats": {
            "publish_success": counters.success(),
            "publish_failed": counters.failed(),
        },
    })
}

/// Run the heartbeat loop until shutdown.
pub async fn run(
    channel: Arc<dyn Channel>,
    connection: ConnectionState,
    topic: String,
    vin: String,
    counters: Arc<PublishCounters>,
    mut shutdown: watch::Receiver<bool>,
) {
    let mut ticker = tokio::time::interval(HEARTBEAT_INTERVAL);
    ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Skip);
    // Skip the immediate first tick; nothing useful to report yet.
    ticker.tick().await;

    loop {
        tokio::select! {
            _ = ticker.tick() => {
                if !connection.is_connected() {
                    continue;
                }
                let payload = status_payload(&vin, &counters);
                let bytes = serde_json::to_vec(&payload).unwrap_or_default();
                if let Err(e) = publish_with_retry(channel.as_ref(), &topic, &bytes).await {
                    tracing::warn!(error = %e, "failed to publish heartbeat");
                } else {
                    tracing::debug!("heartbeat sent");
                }
            }
            _ = shutdown.changed() => {
                if *shutdown.borrow() {
                    break;
                }
            }
        }
    }
    tracing::info!("heartbeat stopped");
}

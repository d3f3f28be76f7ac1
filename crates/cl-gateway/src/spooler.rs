//! Spooler stage: wraps decoded messages in telemetry envelopes and
//! accumulates them into durable batches.

use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Duration;

use tokio::sync::{mpsc, watch};

use cl_protocol::{PipelineMessage, TelemetryEnvelope};
use cl_spool::Spool;

/// Tick so age-based flushes fire even when no traffic arrives.
const FLUSH_TICK: Duration = Duration::from_millis(500);

/// Counters for the spooler stage, shared with the stats task.
#[derive(Default)]
pub struct SpoolerCounters {
    pub enveloped: AtomicU64,
    pub schema_rejects: AtomicU64,
}

/// Identity stamped onto every envelope.
#[derive(Clone)]
pub struct EnvelopeIdentity {
    pub vin: String,
    pub gateway_id: String,
}

/// Build and validate the telemetry envelope for a pipeline message.
pub fn build_envelope(
    identity: &EnvelopeIdentity,
    message: &PipelineMessage,
) -> Result<TelemetryEnvelope, cl_protocol::SchemaViolation> {
    let envelope = TelemetryEnvelope::new(
        identity.vin.clone(),
        identity.gateway_id.clone(),
        message.kind(),
        message.received_at,
        serde_json::to_value(&message.payload).unwrap_or_default(),
    );
    envelope.validate()?;
    Ok(envelope)
}

/// Run the spooler until shutdown, then flush the in-memory batch.
pub async fn run(
    mut decoded_rx: mpsc::Receiver<PipelineMessage>,
    mut spool: Spool,
    identity: EnvelopeIdentity,
    counters: Arc<SpoolerCounters>,
    mut shutdown: watch::Receiver<bool>,
) {
    tracing::info!("spooler started");
    let mut ticker = tokio::time::interval(FLUSH_TICK);
    ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Skip);

    loop {
        tokio::select! {
            message = decoded_rx.recv() => {
                let Some(message) = message else {
                    break; // decoder gone
                };
                match build_envelope(&identity, &message) {
                    Ok(envelope) => {
                        counters.enveloped.fetch_add(1, Ordering::Relaxed);
                        if let Err(e) = spool.add_message(envelope) {
                            tracing::error!(error = %e, "failed to spool message");
                        }
                    }
                    Err(violation) => {
                        counters.schema_rejects.fetch_add(1, Ordering::Relaxed);
                        tracing::warn!(error = %violation, "telemetry schema violation, rejected");
                    }
                }
            }
            _ = ticker.tick() => {
                if spool.flush_due() {
                    if let Err(e) = spool.flush() {
                        tracing::error!(error = %e, "age-based flush failed");
                    }
                }
            }
            _ = shutdown.changed() => {
                if *shutdown.borrow() {
                    break;
                }
            }
        }
    }

    // Drain whatever the decoder managed to enqueue, then flush.
    while let Ok(message) = decoded_rx.try_recv() {
        if let Ok(envelope) = build_envelope(&identity, &message) {
            counters.enveloped.fetch_add(1, Ordering::Relaxed);
            let _ = spool.add_message(envelope);
        }
    }
    match spool.flush() {
        Ok(Some(id)) => tracing::info!(batch_id = id, "final batch flushed"),
        Ok(None) => {}
        Err(e) => tracing::error!(error = %e, "final flush failed"),
    }

    tracing::info!("spooler stopped");
}

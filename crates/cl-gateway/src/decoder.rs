//! Decoder stage: drains the ingest buffer and turns diagnostic-range
//! frames into decoded pipeline messages.
//!
//! Frames on 0x7E8–0x7EF are tried against both protocols: a validated
//! UDS decode and an OBD-II decode each enqueue a message when they yield
//! substance. The decoded queue is bounded; overflow drops the message
//! and counts it rather than stalling the CAN side.

use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::{Duration, Instant};

use tokio::sync::{mpsc, watch};

use cl_canbus::{IngestBuffer, obd2, uds, validator};
use cl_protocol::{CanFrame, PipelineMessage, PipelinePayload, is_diagnostic_response};

/// Idle sleep when the ingest buffer is empty.
const IDLE_SLEEP: Duration = Duration::from_millis(10);

/// Queue-drop warnings repeat at most once per this window.
const DROP_WARN_INTERVAL: Duration = Duration::from_secs(60);

/// Counters for the decoder stage, shared with the stats task.
#[derive(Default)]
pub struct DecoderCounters {
    pub uds_decoded: AtomicU64,
    pub obd2_decoded: AtomicU64,
    pub decode_failures: AtomicU64,
    pub validation_failures: AtomicU64,
    pub queue_drops: AtomicU64,
}

/// Decode one frame into zero, one or two pipeline messages.
pub fn decode_frame(frame: &CanFrame, counters: &DecoderCounters) -> Vec<PipelineMessage> {
    let mut messages = Vec::new();

    if !is_diagnostic_response(frame.arbitration_id) {
        return messages;
    }

    // UDS path, gated on the validator.
    match validator::validate(&frame.data, frame.arbitration_id) {
        Ok(warnings) => {
            for warning in &warnings {
                tracing::debug!(
                    ecu = %format!("0x{:03X}", frame.arbitration_id),
                    warning = %warning,
                    "UDS validation warning"
                );
            }
            match uds::decode_message(&frame.data, frame.arbitration_id) {
                Ok(message) => {
                    counters.uds_decoded.fetch_add(1, Ordering::Relaxed);
                    messages.push(PipelineMessage::new(
                        PipelinePayload::Uds(message),
                        "uds_decoder",
                        frame,
                    ));
                }
                Err(e) => {
                    counters.decode_failures.fetch_add(1, Ordering::Relaxed);
                    tracing::warn!(
                        error = %e,
                        payload = %frame.data.iter().map(|b| format!("{b:02x}")).collect::<String>(),
                        "UDS decode failed"
                    );
                }
            }
        }
        Err(error) => {
            counters.validation_failures.fetch_add(1, Ordering::Relaxed);
            if error.code == validator::ValidationCode::InvalidServiceId {
                // Expected on the shared diagnostic range: OBD-II modes are
                // not UDS services. The OBD-II path below still runs.
                tracing::debug!(
                    ecu = %format!("0x{:03X}", frame.arbitration_id),
                    "payload is not a UDS service"
                );
            } else {
                validator::log_invalid(&frame.data, frame.arbitration_id, &error);
            }
        }
    }

    // OBD-II path; only messages with decoded substance are forwarded.
    match obd2::decode_message(&frame.data) {
        Ok(message) => {
            if !message.parameters.is_empty() || !message.dtcs.is_empty() {
                counters.obd2_decoded.fetch_add(1, Ordering::Relaxed);
                messages.push(PipelineMessage::new(
                    PipelinePayload::Obd2(message),
                    "obd2_decoder",
                    frame,
                ));
            }
        }
        Err(e) => {
            counters.decode_failures.fetch_add(1, Ordering::Relaxed);
            tracing::debug!(error = %e, "OBD-II decode failed");
        }
    }

    messages
}

/// Run the decoder until shutdown, then process a final drain.
pub async fn run(
    buffer: Arc<IngestBuffer>,
    decoded_tx: mpsc::Sender<PipelineMessage>,
    counters: Arc<DecoderCounters>,
    shutdown: watch::Receiver<bool>,
) {
    tracing::info!("decoder started");
    let mut last_drop_warn: Option<Instant> = None;

    loop {
        let stopping = *shutdown.borrow();
        let frames = buffer.drain();

        if frames.is_empty() {
            if stopping {
                break;
            }
            tokio::time::sleep(IDLE_SLEEP).await;
            continue;
        }

        for frame in &frames {
            for message in decode_frame(frame, &counters) {
                if decoded_tx.try_send(message).is_err() {
                    let drops = counters.queue_drops.fetch_add(1, Ordering::Relaxed) + 1;
                    let due = last_drop_warn.is_none_or(|t| t.elapsed() >= DROP_WARN_INTERVAL);
                    if due {
                        last_drop_warn = Some(Instant::now());
                        tracing::warn!(total_drops = drops, "decoded queue full, dropping");
                    }
                }
            }
        }

        if stopping {
            // One more drain next iteration picks up frames that raced in.
            continue;
        }
    }

    tracing::info!("decoder stopped");
}

//! Inter-stage pipeline message.
//!
//! Each stage hands single-owner messages to the next through bounded
//! queues; the payload is a tagged sum so the kind determines the schema.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::frame::CanFrame;
use crate::obd2::Obd2Message;
use crate::telemetry::TelemetryType;
use crate::uds::UdsMessage;

/// Kind-tagged payload of a pipeline message.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum PipelinePayload {
    CanFrame(CanFrame),
    Obd2(Obd2Message),
    Uds(UdsMessage),
}

impl PipelinePayload {
    pub fn kind(&self) -> TelemetryType {
        match self {
            PipelinePayload::CanFrame(_) => TelemetryType::CanFrame,
            PipelinePayload::Obd2(_) => TelemetryType::Obd2,
            PipelinePayload::Uds(_) => TelemetryType::Uds,
        }
    }
}

/// A message in flight between pipeline stages.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PipelineMessage {
    pub payload: PipelinePayload,
    /// Name of the stage that produced the message.
    pub source: String,
    /// Wall-clock timestamp of the underlying observation.
    pub received_at: DateTime<Utc>,
    /// Monotonic ordering timestamp in microseconds.
    pub monotonic_micros: u64,
}

impl PipelineMessage {
    pub fn new(payload: PipelinePayload, source: impl Into<String>, frame: &CanFrame) -> Self {
        Self {
            payload,
            source: source.into(),
            received_at: frame.received_at,
            monotonic_micros: frame.monotonic_micros,
        }
    }

    pub fn kind(&self) -> TelemetryType {
        self.payload.kind()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::obd2::Obd2Message;

    #[test]
    fn kind_follows_payload() {
        let frame = CanFrame::now(0x7E8, vec![0x41, 0x0C, 0x27, 0x10]);
        let msg = PipelineMessage::new(
            PipelinePayload::Obd2(Obd2Message::new(0x01, true)),
            "decoder",
            &frame,
        );
        assert_eq!(msg.kind(), TelemetryType::Obd2);
        assert_eq!(msg.monotonic_micros, frame.monotonic_micros);
    }

    #[test]
    fn payload_serializes_with_kind_tag() {
        let payload = PipelinePayload::Obd2(Obd2Message::new(0x01, true));
        let json = serde_json::to_string(&payload).unwrap();
        assert!(json.contains(r#""kind":"obd2""#));
    }
}

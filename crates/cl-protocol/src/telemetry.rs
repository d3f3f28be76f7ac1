//! Telemetry envelope published to the broker.
//!
//! The JSON shape is bit-compatible with the cloud ingestion consumer:
//! camelCase keys, `telemetryType` ∈ {obd2, uds, can_frame}, ISO-8601 UTC
//! timestamps. Consumers dedupe on `messageId`.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Kind of telemetry carried by an envelope.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TelemetryType {
    Obd2,
    Uds,
    CanFrame,
}

impl TelemetryType {
    pub fn as_str(&self) -> &'static str {
        match self {
            TelemetryType::Obd2 => "obd2",
            TelemetryType::Uds => "uds",
            TelemetryType::CanFrame => "can_frame",
        }
    }
}

/// Envelope for a single telemetry message.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TelemetryEnvelope {
    /// Opaque correlation id (UUID v7 — time-ordered). Dedupe key.
    pub message_id: String,
    /// 17-character vehicle identification number.
    pub vin: String,
    /// Wall-clock timestamp of the underlying observation.
    pub timestamp: DateTime<Utc>,
    /// Identifier of the gateway that produced the message.
    pub gateway_id: String,
    /// Payload discriminator.
    pub telemetry_type: TelemetryType,
    /// Kind-specific payload.
    pub data: serde_json::Value,
}

/// Schema violation detected before a message enters the spool.
#[derive(Debug, Error, PartialEq, Eq)]
pub enum SchemaViolation {
    #[error("messageId is empty")]
    EmptyMessageId,
    #[error("vin must be exactly 17 characters, got {0}")]
    BadVinLength(usize),
    #[error("gatewayId is empty")]
    EmptyGatewayId,
}

impl TelemetryEnvelope {
    pub fn new(
        vin: impl Into<String>,
        gateway_id: impl Into<String>,
        telemetry_type: TelemetryType,
        timestamp: DateTime<Utc>,
        data: serde_json::Value,
    ) -> Self {
        Self {
            message_id: uuid::Uuid::now_v7().to_string(),
            vin: vin.into(),
            timestamp,
            gateway_id: gateway_id.into(),
            telemetry_type,
            data,
        }
    }

    /// Enforce the downstream consumer's required-field contract.
    pub fn validate(&self) -> Result<(), SchemaViolation> {
        if self.message_id.is_empty() {
            return Err(SchemaViolation::EmptyMessageId);
        }
        if self.vin.len() != 17 {
            return Err(SchemaViolation::BadVinLength(self.vin.len()));
        }
        if self.gateway_id.is_empty() {
            return Err(SchemaViolation::EmptyGatewayId);
        }
        Ok(())
    }
}

/// Serde adapter: `Vec<u8>` as a lowercase hex string.
pub mod hex_bytes {
    use serde::{self, Deserialize, Deserializer, Serializer};

    pub fn serialize<S>(bytes: &[u8], serializer: S) -> Result<S::Ok, S::Error>
    where
        S: Serializer,
    {
        let hex_string: String = bytes.iter().map(|b| format!("{b:02x}")).collect();
        serializer.serialize_str(&hex_string)
    }

    pub fn deserialize<'de, D>(deserializer: D) -> Result<Vec<u8>, D::Error>
    where
        D: Deserializer<'de>,
    {
        let s = String::deserialize(deserializer)?;
        (0..s.len())
            .step_by(2)
            .map(|i| u8::from_str_radix(&s[i..i + 2], 16).map_err(serde::de::Error::custom))
            .collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn envelope() -> TelemetryEnvelope {
        TelemetryEnvelope::new(
            "1HGBH41JXMN109186",
            "gw-001",
            TelemetryType::Obd2,
            Utc::now(),
            serde_json::json!({"mode": "0x1"}),
        )
    }

    #[test]
    fn envelope_uses_camel_case_keys() {
        let json = serde_json::to_string(&envelope()).unwrap();
        assert!(json.contains("\"messageId\""));
        assert!(json.contains("\"gatewayId\""));
        assert!(json.contains("\"telemetryType\":\"obd2\""));
        assert!(json.contains("\"vin\":\"1HGBH41JXMN109186\""));
    }

    #[test]
    fn envelope_roundtrip() {
        let env = envelope();
        let json = serde_json::to_string(&env).unwrap();
        let back: TelemetryEnvelope = serde_json::from_str(&json).unwrap();
        assert_eq!(back.message_id, env.message_id);
        assert_eq!(back.telemetry_type, TelemetryType::Obd2);
    }

    #[test]
    fn message_ids_are_unique() {
        let a = envelope();
        let b = envelope();
        assert_ne!(a.message_id, b.message_id);
    }

    #[test]
    fn validate_rejects_short_vin() {
        let mut env = envelope();
        env.vin = "SHORT".into();
        assert_eq!(env.validate(), Err(SchemaViolation::BadVinLength(5)));
    }

    #[test]
    fn validate_rejects_empty_gateway_id() {
        let mut env = envelope();
        env.gateway_id.clear();
        assert_eq!(env.validate(), Err(SchemaViolation::EmptyGatewayId));
    }

    #[test]
    fn validate_accepts_well_formed() {
        assert!(envelope().validate().is_ok());
    }

    #[test]
    fn telemetry_type_tags() {
        assert_eq!(
            serde_json::to_string(&TelemetryType::CanFrame).unwrap(),
            r#""can_frame""#
        );
        assert_eq!(serde_json::to_string(&TelemetryType::Uds).unwrap(), r#""uds""#);
    }
}

//! Core CAN frame type and OBD-II diagnostic CAN ID constants.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

// ── OBD-II CAN IDs ──────────────────────────────────────────────

/// Standard OBD-II broadcast request CAN ID.
pub const OBD_REQUEST_ID: u32 = 0x7DF;

/// First diagnostic response CAN ID (ECU #1).
pub const DIAG_RESPONSE_ID_MIN: u32 = 0x7E8;

/// Last diagnostic response CAN ID (ECU #8).
pub const DIAG_RESPONSE_ID_MAX: u32 = 0x7EF;

/// Whether a CAN ID is in the diagnostic ECU response range.
pub fn is_diagnostic_response(id: u32) -> bool {
    (DIAG_RESPONSE_ID_MIN..=DIAG_RESPONSE_ID_MAX).contains(&id)
}

// ── CAN Frame ───────────────────────────────────────────────────

/// A received CAN frame with reception timestamps.
///
/// Carries both clocks: `monotonic_micros` orders frames within the
/// pipeline; `received_at` is the wall-clock instant used when the frame
/// leaves the gateway.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CanFrame {
    /// CAN arbitration ID (11-bit standard or 29-bit extended).
    pub arbitration_id: u32,
    /// Data payload (0–8 bytes for classic CAN).
    #[serde(with = "crate::telemetry::hex_bytes")]
    pub data: Vec<u8>,
    /// Monotonic reception timestamp in microseconds.
    pub monotonic_micros: u64,
    /// Wall-clock reception timestamp.
    pub received_at: DateTime<Utc>,
    #[serde(default)]
    pub is_extended_id: bool,
    #[serde(default)]
    pub is_error_frame: bool,
    #[serde(default)]
    pub is_remote_frame: bool,
}

impl CanFrame {
    /// Build a frame stamped with both clocks at the moment of the call.
    pub fn now(arbitration_id: u32, data: Vec<u8>) -> Self {
        Self {
            arbitration_id,
            data,
            monotonic_micros: crate::clock::monotonic_micros(),
            received_at: Utc::now(),
            is_extended_id: false,
            is_error_frame: false,
            is_remote_frame: false,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn diagnostic_response_range() {
        assert!(is_diagnostic_response(0x7E8));
        assert!(is_diagnostic_response(0x7EF));
        assert!(!is_diagnostic_response(0x7E7));
        assert!(!is_diagnostic_response(0x7F0));
        assert!(!is_diagnostic_response(OBD_REQUEST_ID));
    }

    #[test]
    fn frame_data_serializes_as_hex() {
        let frame = CanFrame::now(0x7E8, vec![0x41, 0x0C, 0x1B, 0x58]);
        let json = serde_json::to_string(&frame).unwrap();
        assert!(json.contains("410c1b58"));

        let back: CanFrame = serde_json::from_str(&json).unwrap();
        assert_eq!(back.data, vec![0x41, 0x0C, 0x1B, 0x58]);
        assert_eq!(back.arbitration_id, 0x7E8);
    }

    #[test]
    fn successive_frames_are_monotonic() {
        let a = CanFrame::now(0x100, vec![]);
        let b = CanFrame::now(0x100, vec![]);
        assert!(b.monotonic_micros >= a.monotonic_micros);
    }
}

//! OBD-II (SAE J1979) message types. Decoding lives in `cl-canbus`.

use serde::{Deserialize, Serialize};

/// OBD-II mode identifiers.
pub const MODE_CURRENT_DATA: u8 = 0x01;
pub const MODE_FREEZE_FRAME: u8 = 0x02;
pub const MODE_STORED_DTCS: u8 = 0x03;
pub const MODE_CLEAR_DTCS: u8 = 0x04;
pub const MODE_PENDING_DTCS: u8 = 0x07;
pub const MODE_VEHICLE_INFO: u8 = 0x09;
pub const MODE_PERMANENT_DTCS: u8 = 0x0A;

/// Offset added to a request mode to form the response SID.
pub const RESPONSE_SID_OFFSET: u8 = 0x40;

/// Human-readable mode name, `UNKNOWN_MODE_0xNN` for anything else.
pub fn mode_name(mode: u8) -> String {
    match mode {
        0x01 => "SHOW_CURRENT_DATA".to_string(),
        0x02 => "SHOW_FREEZE_FRAME".to_string(),
        0x03 => "SHOW_STORED_DTCS".to_string(),
        0x04 => "CLEAR_DTCS".to_string(),
        0x05 => "TEST_RESULTS_O2".to_string(),
        0x06 => "TEST_RESULTS_OTHER".to_string(),
        0x07 => "SHOW_PENDING_DTCS".to_string(),
        0x08 => "CONTROL_OPERATION".to_string(),
        0x09 => "REQUEST_VEHICLE_INFO".to_string(),
        0x0A => "PERMANENT_DTCS".to_string(),
        other => format!("UNKNOWN_MODE_0x{other:02X}"),
    }
}

/// A decoded OBD-II parameter with its engineering value.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Obd2Parameter {
    /// Semantic name, e.g. "engine_rpm".
    pub name: String,
    pub pid: u8,
    /// Engineering value, rounded to two decimal places.
    pub value: f64,
    pub unit: String,
    /// Raw data bytes the value was computed from.
    #[serde(with = "crate::telemetry::hex_bytes")]
    pub raw: Vec<u8>,
}

/// A decoded OBD-II message.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Obd2Message {
    /// Mode with the response bit stripped.
    pub mode: u8,
    pub mode_name: String,
    pub is_response: bool,
    /// PID for modes that carry one (0x01, 0x02).
    #[serde(skip_serializing_if = "Option::is_none")]
    pub pid: Option<u8>,
    /// Decoded parameters (mode 0x01 responses with a known PID).
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub parameters: Vec<Obd2Parameter>,
    /// DTC code strings (mode 0x03/0x07/0x0A responses).
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub dtcs: Vec<String>,
}

impl Obd2Message {
    pub fn new(mode: u8, is_response: bool) -> Self {
        Self {
            mode,
            mode_name: mode_name(mode),
            is_response,
            pid: None,
            parameters: Vec::new(),
            dtcs: Vec::new(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn mode_names() {
        assert_eq!(mode_name(0x01), "SHOW_CURRENT_DATA");
        assert_eq!(mode_name(0x03), "SHOW_STORED_DTCS");
        assert_eq!(mode_name(0x7B), "UNKNOWN_MODE_0x7B");
    }

    #[test]
    fn message_json_omits_empty_fields() {
        let msg = Obd2Message::new(0x03, false);
        let json = serde_json::to_string(&msg).unwrap();
        assert!(!json.contains("parameters"));
        assert!(!json.contains("dtcs"));
        assert!(!json.contains("pid"));
    }

    #[test]
    fn parameter_roundtrip() {
        let param = Obd2Parameter {
            name: "engine_rpm".into(),
            pid: 0x0C,
            value: 2500.0,
            unit: "rpm".into(),
            raw: vec![0x27, 0x10],
        };
        let json = serde_json::to_string(&param).unwrap();
        assert!(json.contains("2710"));
        let back: Obd2Parameter = serde_json::from_str(&json).unwrap();
        assert_eq!(back, param);
    }
}

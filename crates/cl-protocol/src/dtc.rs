//! Diagnostic Trouble Code decoding shared by the OBD-II and UDS decoders.

use serde::{Deserialize, Serialize};

/// Severity derived from the top three bits of the UDS DTC status byte.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DtcSeverity {
    /// 0x80 — check immediately.
    Critical,
    /// 0x40 — check at next halt.
    High,
    /// 0x20 — maintenance only.
    Medium,
    /// No severity bits set.
    Low,
}

impl DtcSeverity {
    pub fn from_status(status: u8) -> Self {
        let bits = status & 0xE0;
        if bits & 0x80 != 0 {
            DtcSeverity::Critical
        } else if bits & 0x40 != 0 {
            DtcSeverity::High
        } else if bits & 0x20 != 0 {
            DtcSeverity::Medium
        } else {
            DtcSeverity::Low
        }
    }
}

/// A decoded Diagnostic Trouble Code with its UDS status byte.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DtcInfo {
    /// 5-character code, e.g. "P0301".
    pub code: String,
    /// Raw status byte from the 0x19 response record.
    pub status: u8,
    pub severity: DtcSeverity,
}

impl DtcInfo {
    pub fn new(code: String, status: u8) -> Self {
        Self {
            code,
            status,
            severity: DtcSeverity::from_status(status),
        }
    }
}

const DTC_PREFIXES: [char; 4] = ['P', 'C', 'B', 'U'];

/// Decode the 2-byte OBD-II DTC form (e.g. Mode 0x03 records).
///
/// Byte A: top two bits prefix, next two bits first digit, low nibble
/// second digit. Byte B: high nibble third digit, low nibble fourth.
/// All-zero records are padding and decode to `None`.
pub fn decode_dtc_2byte(a: u8, b: u8) -> Option<String> {
    if a == 0x00 && b == 0x00 {
        return None;
    }

    let prefix = DTC_PREFIXES[((a >> 6) & 0x03) as usize];
    let d1 = (a >> 4) & 0x03;
    let d2 = a & 0x0F;
    let d3 = (b >> 4) & 0x0F;
    let d4 = b & 0x0F;

    Some(format!("{prefix}{d1}{d2:X}{d3:X}{d4:X}"))
}

/// Decode the 3-byte UDS DTC form (ISO 14229).
///
/// Bytes A and B carry the same layout as the 2-byte form; byte C is the
/// manufacturer-specific fifth digit, discarded when producing the
/// 5-character OBD-II-style code.
pub fn decode_dtc_3byte(bytes: &[u8; 3]) -> String {
    decode_dtc_2byte(bytes[0], bytes[1]).unwrap_or_else(|| "P0000".to_string())
}

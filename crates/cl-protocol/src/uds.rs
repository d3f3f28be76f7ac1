//! UDS (ISO 14229) message types. Decoding lives in `cl-canbus`.

use serde::{Deserialize, Serialize};

use crate::dtc::DtcInfo;

/// Response bit set on the service id of positive responses.
pub const UDS_RESPONSE_BIT: u8 = 0x40;

/// Negative response sentinel service id.
pub const UDS_NEGATIVE_RESPONSE: u8 = 0x7F;

/// Data identifier carrying the ASCII VIN.
pub const DID_VIN: u16 = 0xF190;

/// A decoded negative response (service id 0x7F).
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct NegativeResponse {
    /// Service the ECU rejected.
    pub requested_service: u8,
    /// ISO 14229 negative response code.
    pub code: u8,
    /// Textual meaning from the ISO 14229 table.
    pub meaning: String,
}

/// A decoded UDS message.
///
/// Service-specific payloads are explicit option fields; exactly the ones
/// the service populates are `Some`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct UdsMessage {
    /// Service id with the response bit stripped.
    pub service: u8,
    pub service_name: String,
    /// Source ECU arbitration id.
    pub ecu_address: u32,
    pub is_response: bool,
    /// Full raw payload as received.
    #[serde(with = "crate::telemetry::hex_bytes")]
    pub raw: Vec<u8>,
    /// Sub-function byte (0x19, 0x3E).
    #[serde(skip_serializing_if = "Option::is_none")]
    pub sub_function: Option<u8>,
    /// 0x3E: high bit of the sub-function requests response suppression.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub suppress_positive_response: Option<bool>,
    /// 0x22: big-endian data identifier.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub data_identifier: Option<u16>,
    /// 0x22 response payload after the data identifier.
    #[serde(skip_serializing_if = "Option::is_none", with = "opt_hex_bytes", default)]
    pub response_payload: Option<Vec<u8>>,
    /// 0x22 with DID 0xF190: decoded 17-character VIN.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub vin: Option<String>,
    /// 0x19 response: decoded DTC records.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub dtc_info: Option<Vec<DtcInfo>>,
    /// 0x7F: negative response details.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub negative: Option<NegativeResponse>,
}

impl UdsMessage {
    pub fn new(
        service: u8,
        service_name: impl Into<String>,
        ecu_address: u32,
        is_response: bool,
        raw: Vec<u8>,
    ) -> Self {
        Self {
            service,
            service_name: service_name.into(),
            ecu_address,
            is_response,
            raw,
            sub_function: None,
            suppress_positive_response: None,
            data_identifier: None,
            response_payload: None,
            vin: None,
            dtc_info: None,
            negative: None,
        }
    }
}

mod opt_hex_bytes {
    use serde::{Deserialize, Deserializer, Serializer};

    pub fn serialize<S>(bytes: &Option<Vec<u8>>, serializer: S) -> Result<S::Ok, S::Error>
    where
        S: Serializer,
    {
        match bytes {
            Some(b) => crate::telemetry::hex_bytes::serialize(b, serializer),
            None => serializer.serialize_none(),
        }
    }

    pub fn deserialize<'de, D>(deserializer: D) -> Result<Option<Vec<u8>>, D::Error>
    where
        D: Deserializer<'de>,
    {
        let s: Option<String> = Option::deserialize(deserializer)?;
        match s {
            None => Ok(None),
            Some(s) => (0..s.len())
                .step_by(2)
                .map(|i| {
                    u8::from_str_radix(&s[i..i + 2], 16).map_err(serde::de::Error::custom)
                })
                .collect::<Result<Vec<u8>, _>>()
                .map(Some),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::dtc::DtcInfo;

    #[test]
    fn message_json_omits_absent_payloads() {
        let msg = UdsMessage::new(0x3E, "TESTER_PRESENT", 0x7E8, false, vec![0x3E, 0x00]);
        let json = serde_json::to_string(&msg).unwrap();
        assert!(!json.contains("dtc_info"));
        assert!(!json.contains("data_identifier"));
        assert!(!json.contains("negative"));
        assert!(json.contains(r#""raw":"3e00""#));
    }

    #[test]
    fn dtc_payload_roundtrip() {
        let mut msg = UdsMessage::new(0x19, "READ_DTC_INFORMATION", 0x7E8, true, vec![0x59]);
        msg.sub_function = Some(0x02);
        msg.dtc_info = Some(vec![DtcInfo::new("P0301".into(), 0x08)]);

        let json = serde_json::to_string(&msg).unwrap();
        let back: UdsMessage = serde_json::from_str(&json).unwrap();
        assert_eq!(back.dtc_info.unwrap()[0].code, "P0301");
        assert_eq!(back.sub_function, Some(0x02));
    }

    #[test]
    fn response_payload_hex_roundtrip() {
        let mut msg = UdsMessage::new(0x22, "READ_DATA_BY_IDENTIFIER", 0x7E8, true, vec![0x62]);
        msg.data_identifier = Some(0xF190);
        msg.response_payload = Some(vec![0xDE, 0xAD]);

        let json = serde_json::to_string(&msg).unwrap();
        assert!(json.contains(r#""response_payload":"dead""#));
        let back: UdsMessage = serde_json::from_str(&json).unwrap();
        assert_eq!(back.response_payload, Some(vec![0xDE, 0xAD]));
    }
}

//! UDS message validation against ISO 14229 structural rules.
//!
//! Validation is a pure function, separate from decoding: the pipeline
//! validates first, logs rejects with the full payload, and only decodes
//! messages that pass.

use serde::Serialize;

use crate::uds::{KNOWN_SERVICES, negative_response_meaning};

/// Minimum payload lengths per service id.
const MIN_LENGTHS: &[(u8, usize)] = &[
    (0x10, 2),
    (0x11, 2),
    (0x14, 4),
    (0x19, 2),
    (0x22, 3),
    (0x23, 4),
    (0x27, 2),
    (0x2E, 4),
    (0x31, 4),
    (0x3E, 2),
];

/// Valid 0x19 report sub-functions.
const DTC_SUB_FUNCTIONS: &[u8] = &[
    0x01, 0x02, 0x03, 0x04, 0x06, 0x0A, 0x0B, 0x0C, 0x0D, 0x0E,
];

/// Machine-readable validation failure code.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum ValidationCode {
    EmptyMessage,
    InvalidServiceId,
    InvalidLength,
    InvalidNegativeResponse,
}

impl ValidationCode {
    pub fn as_str(&self) -> &'static str {
        match self {
            ValidationCode::EmptyMessage => "EMPTY_MESSAGE",
            ValidationCode::InvalidServiceId => "INVALID_SERVICE_ID",
            ValidationCode::InvalidLength => "INVALID_LENGTH",
            ValidationCode::InvalidNegativeResponse => "INVALID_NEGATIVE_RESPONSE",
        }
    }
}

/// A rejected message.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ValidationError {
    pub code: ValidationCode,
    pub message: String,
}

impl std::fmt::Display for ValidationError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}: {}", self.code.as_str(), self.message)
    }
}

/// Validate a UDS payload. `Ok` carries non-fatal warnings.
pub fn validate(data: &[u8], ecu_address: u32) -> Result<Vec<String>, ValidationError> {
    let Some(&first) = data.first() else {
        return Err(ValidationError {
            code: ValidationCode::EmptyMessage,
            message: "message data is empty".into(),
        });
    };

    // Negative response sentinel.
    if first == 0x7F {
        return validate_negative_response(data);
    }

    let is_response = first >= 0x40;
    let service = if is_response { first - 0x40 } else { first };

    if !KNOWN_SERVICES.contains(&service) {
        tracing::warn!(
            service_id = %format!("0x{first:02X}"),
            ecu = %format!("0x{ecu_address:03X}"),
            "unknown UDS service id"
        );
        return Err(ValidationError {
            code: ValidationCode::InvalidServiceId,
            message: format!("unknown service id: 0x{first:02X}"),
        });
    }

    let min_length = MIN_LENGTHS
        .iter()
        .find(|(sid, _)| *sid == service)
        .map(|(_, len)| *len)
        .unwrap_or(1);
    if data.len() < min_length {
        return Err(ValidationError {
            code: ValidationCode::InvalidLength,
            message: format!(
                "message too short: {} bytes (minimum: {min_length})",
                data.len()
            ),
        });
    }

    Ok(service_specific_warnings(service, data, is_response))
}

fn validate_negative_response(data: &[u8]) -> Result<Vec<String>, ValidationError> {
    if data.len() < 3 {
        return Err(ValidationError {
            code: ValidationCode::InvalidNegativeResponse,
            message: "negative response too short".into(),
        });
    }

    let meaning = negative_response_meaning(data[2]);
    tracing::info!(
        requested_service = %format!("0x{:02X}", data[1]),
        response_code = %format!("0x{:02X}", data[2]),
        meaning = %meaning,
        "negative response"
    );
    Ok(vec![format!("Negative response: {meaning}")])
}

fn service_specific_warnings(service: u8, data: &[u8], is_response: bool) -> Vec<String> {
    let mut warnings = Vec::new();

    match service {
        0x19 => {
            let sub_function = data[1];
            if !DTC_SUB_FUNCTIONS.contains(&sub_function) {
                warnings.push(format!("Unknown DTC sub-function: 0x{sub_function:02X}"));
            }
        }
        0x22 => {
            if !is_response && data.len() != 3 {
                warnings.push(
                    "Unexpected message length for Read Data By Identifier request".to_string(),
                );
            }
        }
        0x3E => {
            let sub_function = data[1] & 0x7F; // remove suppress bit
            if sub_function != 0x00 {
                warnings.push(format!(
                    "Non-standard Tester Present sub-function: 0x{sub_function:02X}"
                ));
            }
        }
        _ => {}
    }

    warnings
}

/// Log a rejected message with its full payload and SID/sub-function split.
pub fn log_invalid(data: &[u8], ecu_address: u32, error: &ValidationError) {
    tracing::error!(
        ecu = %format!("0x{ecu_address:03X}"),
        code = error.code.as_str(),
        message = %error.message,
        payload = %data.iter().map(|b| format!("{b:02x}")).collect::<String>(),
        service_id = %data.first().map(|b| format!("0x{b:02X}")).unwrap_or_default(),
        sub_function = %data
            .get(1..)
            .map(|rest| rest.iter().map(|b| format!("{b:02x}")).collect::<String>())
            .unwrap_or_default(),
        "invalid UDS message"
    );
}

#[cfg(test)]
mod tests {
    use super::*;

    const ECU: u32 = 0x7E0;

    #[test]
    fn valid_tester_present() {
        let warnings = validate(&[0x3E, 0x00], ECU).unwrap();
        assert!(warnings.is_empty());
    }

    #[test]
    fn tester_present_nonzero_sub_function_warns() {
        let warnings = validate(&[0x3E, 0x01], ECU).unwrap();
        assert_eq!(warnings.len(), 1);
        assert!(warnings[0].contains("Tester Present"));
    }

    #[test]
    fn tester_present_suppress_bit_is_standard() {
        // 0x80 with the suppress bit stripped is sub-function 0x00.
        let warnings = validate(&[0x3E, 0x80], ECU).unwrap();
        assert!(warnings.is_empty());
    }

    #[test]
    fn empty_message_rejected() {
        let err = validate(&[], ECU).unwrap_err();
        assert_eq!(err.code, ValidationCode::EmptyMessage);
    }

    #[test]
    fn unknown_service_rejected() {
        let err = validate(&[0xFF, 0x00], ECU).unwrap_err();
        assert_eq!(err.code, ValidationCode::InvalidServiceId);
        assert_eq!(err.code.as_str(), "INVALID_SERVICE_ID");
    }

    #[test]
    fn short_message_rejected() {
        let err = validate(&[0x19], ECU).unwrap_err();
        assert_eq!(err.code, ValidationCode::InvalidLength);
    }

    #[test]
    fn read_data_by_identifier_short_rejected() {
        let err = validate(&[0x22, 0xF1], ECU).unwrap_err();
        assert_eq!(err.code, ValidationCode::InvalidLength);
    }

    #[test]
    fn read_data_by_identifier_valid() {
        assert!(validate(&[0x22, 0xF1, 0x90], ECU).unwrap().is_empty());
    }

    #[test]
    fn read_data_by_identifier_long_request_warns() {
        let warnings = validate(&[0x22, 0xF1, 0x90, 0x00], ECU).unwrap();
        assert_eq!(warnings.len(), 1);
    }

    #[test]
    fn unknown_dtc_sub_function_warns() {
        let warnings = validate(&[0x19, 0x42], ECU).unwrap();
        assert_eq!(warnings.len(), 1);
        assert!(warnings[0].contains("0x42"));
    }

    #[test]
    fn known_dtc_sub_function_clean() {
        for sub in [0x01u8, 0x02, 0x0A, 0x0E] {
            assert!(validate(&[0x19, sub], ECU).unwrap().is_empty());
        }
    }

    #[test]
    fn negative_response_ok_with_warning() {
        let warnings = validate(&[0x7F, 0x22, 0x11], ECU).unwrap();
        assert_eq!(warnings.len(), 1);
        assert!(warnings[0].contains("Negative response"));
        assert!(warnings[0].contains("Service Not Supported"));
    }

    #[test]
    fn negative_response_too_short_rejected() {
        let err = validate(&[0x7F, 0x22], ECU).unwrap_err();
        assert_eq!(err.code, ValidationCode::InvalidNegativeResponse);
    }

    #[test]
    fn response_forms_of_known_services_accepted() {
        // 0x62 = positive response to 0x22.
        assert!(validate(&[0x62, 0xF1, 0x90, 0x41], ECU).is_ok());
        // 0x59 = positive response to 0x19.
        assert!(validate(&[0x59, 0x02, 0xFF], ECU).is_ok());
    }

    #[test]
    fn log_invalid_does_not_panic() {
        let err = validate(&[0xFF, 0x00], ECU).unwrap_err();
        log_invalid(&[0xFF, 0x00], ECU, &err);
        log_invalid(&[], ECU, &err);
    }
}

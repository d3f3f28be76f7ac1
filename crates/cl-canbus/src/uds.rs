//! UDS (ISO 14229) wire decoder.
//!
//! Structural decode paths exist for Read DTC Information (0x19), Read
//! Data By Identifier (0x22), Tester Present (0x3E) and negative responses
//! (0x7F); every other known service decodes to its name and raw payload.

use cl_protocol::dtc::{DtcInfo, decode_dtc_3byte};
use cl_protocol::uds::{DID_VIN, NegativeResponse, UDS_NEGATIVE_RESPONSE, UDS_RESPONSE_BIT, UdsMessage};

use crate::error::{CanError, CanResult};

/// Known UDS service identifiers (ISO 14229-1).
pub const KNOWN_SERVICES: &[u8] = &[
    0x10, 0x11, 0x14, 0x19, 0x22, 0x23, 0x24, 0x27, 0x28, 0x2A, 0x2C, 0x2E, 0x2F, 0x31, 0x34,
    0x35, 0x36, 0x37, 0x38, 0x3D, 0x3E, 0x83, 0x84, 0x85, 0x86, 0x87,
];

pub const SID_READ_DTC_INFORMATION: u8 = 0x19;
pub const SID_READ_DATA_BY_IDENTIFIER: u8 = 0x22;
pub const SID_TESTER_PRESENT: u8 = 0x3E;

/// 0x19 sub-functions whose responses carry 4-byte DTC records.
const DTC_REPORT_SUB_FUNCTIONS: &[u8] = &[0x02, 0x0A, 0x0B, 0x0C, 0x0D, 0x0E];

/// Service name, `UNKNOWN_SERVICE_0xNN` for anything outside the table.
pub fn service_name(service: u8) -> String {
    match service {
        0x10 => "DIAGNOSTIC_SESSION_CONTROL".to_string(),
        0x11 => "ECU_RESET".to_string(),
        0x14 => "CLEAR_DIAGNOSTIC_INFORMATION".to_string(),
        0x19 => "READ_DTC_INFORMATION".to_string(),
        0x22 => "READ_DATA_BY_IDENTIFIER".to_string(),
        0x23 => "READ_MEMORY_BY_ADDRESS".to_string(),
        0x24 => "READ_SCALING_DATA_BY_IDENTIFIER".to_string(),
        0x27 => "SECURITY_ACCESS".to_string(),
        0x28 => "COMMUNICATION_CONTROL".to_string(),
        0x2A => "READ_DATA_BY_PERIODIC_IDENTIFIER".to_string(),
        0x2C => "DYNAMICALLY_DEFINE_DATA_IDENTIFIER".to_string(),
        0x2E => "WRITE_DATA_BY_IDENTIFIER".to_string(),
        0x2F => "INPUT_OUTPUT_CONTROL_BY_IDENTIFIER".to_string(),
        0x31 => "ROUTINE_CONTROL".to_string(),
        0x34 => "REQUEST_DOWNLOAD".to_string(),
        0x35 => "REQUEST_UPLOAD".to_string(),
        0x36 => "TRANSFER_DATA".to_string(),
        0x37 => "REQUEST_TRANSFER_EXIT".to_string(),
        0x38 => "REQUEST_FILE_TRANSFER".to_string(),
        0x3D => "WRITE_MEMORY_BY_ADDRESS".to_string(),
        0x3E => "TESTER_PRESENT".to_string(),
        0x83 => "ACCESS_TIMING_PARAMETER".to_string(),
        0x84 => "SECURED_DATA_TRANSMISSION".to_string(),
        0x85 => "CONTROL_DTC_SETTING".to_string(),
        0x86 => "RESPONSE_ON_EVENT".to_string(),
        0x87 => "LINK_CONTROL".to_string(),
        other => format!("UNKNOWN_SERVICE_0x{other:02X}"),
    }
}

/// Textual meaning of an ISO 14229 negative response code.
pub fn negative_response_meaning(code: u8) -> String {
    match code {
        0x10 => "General Reject".to_string(),
        0x11 => "Service Not Supported".to_string(),
        0x12 => "Sub-Function Not Supported".to_string(),
        0x13 => "Incorrect Message Length Or Invalid Format".to_string(),
        0x14 => "Response Too Long".to_string(),
        0x21 => "Busy Repeat Request".to_string(),
        0x22 => "Conditions Not Correct".to_string(),
        0x24 => "Request Sequence Error".to_string(),
        0x25 => "No Response From Sub-Net Component".to_string(),
        0x26 => "Failure Prevents Execution Of Requested Action".to_string(),
        0x31 => "Request Out Of Range".to_string(),
        0x33 => "Security Access Denied".to_string(),
        0x35 => "Invalid Key".to_string(),
        0x36 => "Exceed Number Of Attempts".to_string(),
        0x37 => "Required Time Delay Not Expired".to_string(),
        0x70 => "Upload Download Not Accepted".to_string(),
        0x71 => "Transfer Data Suspended".to_string(),
        0x72 => "General Programming Failure".to_string(),
        0x73 => "Wrong Block Sequence Counter".to_string(),
        0x78 => "Request Correctly Received - Response Pending".to_string(),
        0x7E => "Sub-Function Not Supported In Active Session".to_string(),
        0x7F => "Service Not Supported In Active Session".to_string(),
        other => format!("Unknown response code: 0x{other:02X}"),
    }
}

/// Decode a UDS payload from an ECU at `ecu_address`.
pub fn decode_message(data: &[u8], ecu_address: u32) -> CanResult<UdsMessage> {
    let Some(&first) = data.first() else {
        return Err(CanError::Decode("empty UDS payload".into()));
    };

    if first == UDS_NEGATIVE_RESPONSE {
        return decode_negative_response(data, ecu_address);
    }

    let is_response = first >= UDS_RESPONSE_BIT;
    let service = if is_response {
        first - UDS_RESPONSE_BIT
    } else {
        first
    };

    let mut message = UdsMessage::new(
        service,
        service_name(service),
        ecu_address,
        is_response,
        data.to_vec(),
    );

    match service {
        SID_READ_DTC_INFORMATION => decode_read_dtc_information(&mut message, data),
        SID_READ_DATA_BY_IDENTIFIER => decode_read_data_by_identifier(&mut message, data),
        SID_TESTER_PRESENT => decode_tester_present(&mut message, data),
        _ => {}
    }

    Ok(message)
}

fn decode_negative_response(data: &[u8], ecu_address: u32) -> CanResult<UdsMessage> {
    if data.len() < 3 {
        return Err(CanError::Decode(format!(
            "negative response too short: {} bytes",
            data.len()
        )));
    }

    let requested_service = data[1];
    let code = data[2];

    let mut message = UdsMessage::new(
        UDS_NEGATIVE_RESPONSE,
        "NEGATIVE_RESPONSE",
        ecu_address,
        true,
        data.to_vec(),
    );
    message.negative = Some(NegativeResponse {
        requested_service,
        code,
        meaning: negative_response_meaning(code),
    });
    Ok(message)
}

fn decode_read_dtc_information(message: &mut UdsMessage, data: &[u8]) {
    let Some(&sub_function) = data.get(1) else {
        tracing::warn!(
            payload = %hex(data),
            "Read DTC Information payload missing sub-function"
        );
        return;
    };
    message.sub_function = Some(sub_function);

    if !message.is_response || !DTC_REPORT_SUB_FUNCTIONS.contains(&sub_function) {
        return;
    }

    // Skip service id, sub-function, status availability mask.
    let mut dtcs = Vec::new();
    let mut offset = if data.len() > 2 { 3 } else { 2 };
    while offset + 3 < data.len() {
        let code = decode_dtc_3byte(&[data[offset], data[offset + 1], data[offset + 2]]);
        let status = data[offset + 3];
        dtcs.push(DtcInfo::new(code, status));
        offset += 4;
    }

    tracing::debug!(count = dtcs.len(), ecu = message.ecu_address, "decoded DTC records");
    message.dtc_info = Some(dtcs);
}

fn decode_read_data_by_identifier(message: &mut UdsMessage, data: &[u8]) {
    if data.len() < 3 {
        tracing::warn!(
            payload = %hex(data),
            "Read Data By Identifier payload missing data identifier"
        );
        return;
    }

    let did = u16::from_be_bytes([data[1], data[2]]);
    message.data_identifier = Some(did);

    if message.is_response && data.len() > 3 {
        let payload = &data[3..];
        message.response_payload = Some(payload.to_vec());

        if did == DID_VIN {
            if let Ok(vin) = std::str::from_utf8(payload) {
                if vin.len() == 17 && vin.chars().all(|c| c.is_ascii_alphanumeric()) {
                    message.vin = Some(vin.to_string());
                }
            }
        }
    }
}

fn decode_tester_present(message: &mut UdsMessage, data: &[u8]) {
    let Some(&sub_function) = data.get(1) else {
        return;
    };
    message.sub_function = Some(sub_function);
    message.suppress_positive_response = Some(sub_function & 0x80 != 0);
}

fn hex(data: &[u8]) -> String {
    data.iter().map(|b| format!("{b:02x}")).collect()
}

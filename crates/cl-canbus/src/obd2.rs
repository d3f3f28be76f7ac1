//! OBD-II (SAE J1979) wire decoder and request builders.
//!
//! Input payloads are assumed already reassembled by the CAN stack; the
//! decoder sees `[mode, pid?, data...]` with the response bit (0x40) on
//! the mode byte of responses.

use cl_protocol::dtc::decode_dtc_2byte;
use cl_protocol::obd2::{
    MODE_CURRENT_DATA, MODE_STORED_DTCS, Obd2Message, Obd2Parameter, RESPONSE_SID_OFFSET,
};
use cl_protocol::{CanFrame, OBD_REQUEST_ID};

use crate::error::{CanError, CanResult};

/// Static definition of a first-class PID.
struct PidDefinition {
    name: &'static str,
    unit: &'static str,
    bytes: usize,
    formula: fn(&[u8]) -> f64,
}

/// Look up a first-class PID; all others pass through undecoded.
fn pid_definition(pid: u8) -> Option<PidDefinition> {
    let def = match pid {
        0x04 => PidDefinition {
            name: "engine_load",
            unit: "percent",
            bytes: 1,
            formula: |d| d[0] as f64 * 100.0 / 255.0,
        },
        0x05 => PidDefinition {
            name: "coolant_temp",
            unit: "celsius",
            bytes: 1,
            formula: |d| d[0] as f64 - 40.0,
        },
        0x0C => PidDefinition {
            name: "engine_rpm",
            unit: "rpm",
            bytes: 2,
            formula: |d| (d[0] as f64 * 256.0 + d[1] as f64) / 4.0,
        },
        0x0D => PidDefinition {
            name: "vehicle_speed",
            unit: "km/h",
            bytes: 1,
            formula: |d| d[0] as f64,
        },
        0x0E => PidDefinition {
            name: "timing_advance",
            unit: "degrees",
            bytes: 1,
            formula: |d| d[0] as f64 / 2.0 - 64.0,
        },
        0x0F => PidDefinition {
            name: "intake_air_temp",
            unit: "celsius",
            bytes: 1,
            formula: |d| d[0] as f64 - 40.0,
        },
        0x10 => PidDefinition {
            name: "maf_flow_rate",
            unit: "g/s",
            bytes: 2,
            formula: |d| (d[0] as f64 * 256.0 + d[1] as f64) / 100.0,
        },
        0x11 => PidDefinition {
            name: "throttle_position",
            unit: "percent",
            bytes: 1,
            formula: |d| d[0] as f64 * 100.0 / 255.0,
        },
        0x2F => PidDefinition {
            name: "fuel_level",
            unit: "percent",
            bytes: 1,
            formula: |d| d[0] as f64 * 100.0 / 255.0,
        },
        0x42 => PidDefinition {
            name: "control_module_voltage",
            unit: "volts",
            bytes: 2,
            formula: |d| (d[0] as f64 * 256.0 + d[1] as f64) / 1000.0,
        },
        _ => return None,
    };
    Some(def)
}

fn round2(value: f64) -> f64 {
    (value * 100.0).round() / 100.0
}

/// Decode an OBD-II payload.
pub fn decode_message(data: &[u8]) -> CanResult<Obd2Message> {
    if data.len() < 2 {
        return Err(CanError::Decode(format!(
            "OBD-II payload too short: {} bytes",
            data.len()
        )));
    }

    let raw_mode = data[0];
    let is_response = raw_mode >= RESPONSE_SID_OFFSET;
    let mode = if is_response {
        raw_mode - RESPONSE_SID_OFFSET
    } else {
        raw_mode
    };

    let mut message = Obd2Message::new(mode, is_response);

    match mode {
        MODE_CURRENT_DATA => decode_current_data(&mut message, data),
        MODE_STORED_DTCS => decode_stored_dtcs(&mut message, data),
        _ => {}
    }

    Ok(message)
}

fn decode_current_data(message: &mut Obd2Message, data: &[u8]) {
    let pid = data[1];
    message.pid = Some(pid);

    if !message.is_response {
        return;
    }

    let Some(def) = pid_definition(pid) else {
        // Unknown PID on a response is passed through without parameters.
        tracing::debug!(pid = %format!("0x{pid:02X}"), "PID not in first-class table");
        return;
    };

    let payload = &data[2..];
    if payload.len() < def.bytes {
        tracing::warn!(
            pid = %format!("0x{pid:02X}"),
            need = def.bytes,
            got = payload.len(),
            "mode 01 response truncated"
        );
        return;
    }

    let raw = &payload[..def.bytes];
    message.parameters.push(Obd2Parameter {
        name: def.name.to_string(),
        pid,
        value: round2((def.formula)(raw)),
        unit: def.unit.to_string(),
        raw: raw.to_vec(),
    });
}

fn decode_stored_dtcs(message: &mut Obd2Message, data: &[u8]) {
    if !message.is_response {
        return;
    }

    let count = data[1] as usize;
    let mut offset = 2;
    while offset + 1 < data.len() && message.dtcs.len() < count {
        if let Some(code) = decode_dtc_2byte(data[offset], data[offset + 1]) {
            message.dtcs.push(code);
        }
        offset += 2;
    }
}

// ── Frame builders ──────────────────────────────────────────────

/// Build a standard 8-byte OBD-II request frame for a mode and PID.
pub fn build_request(mode: u8, pid: u8) -> CanFrame {
    CanFrame::now(
        OBD_REQUEST_ID,
        vec![0x02, mode, pid, 0x00, 0x00, 0x00, 0x00, 0x00],
    )
}

/// Encode a mode 0x01 response payload from raw data bytes.
pub fn encode_current_data_response(pid: u8, raw: &[u8]) -> Vec<u8> {
    let mut out = Vec::with_capacity(2 + raw.len());
    out.push(MODE_CURRENT_DATA + RESPONSE_SID_OFFSET);
    out.push(pid);
    out.extend_from_slice(raw);
    out
}

//! MQTT topic templates for the vehicle topic hierarchy.
//!
//! Topic structure:
//! ```text
//! vehicle/{vin}/telemetry
//! vehicle/{vin}/status
//! ```
//! Templates are configurable; `{vin}` is the only substitution token.

/// Default telemetry topic template.
pub const TELEMETRY_TEMPLATE: &str = "vehicle/{vin}/telemetry";

/// Default status topic template.
pub const STATUS_TEMPLATE: &str = "vehicle/{vin}/status";

/// Render a topic template against a VIN.
pub fn render(template: &str, vin: &str) -> String {
    template.replace("{vin}", vin)
}

pub fn telemetry(vin: &str) -> String {
    render(TELEMETRY_TEMPLATE, vin)
}

pub fn status(vin: &str) -> String {
    render(STATUS_TEMPLATE, vin)
}

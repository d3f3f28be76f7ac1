pub mod clock;
pub mod dtc;
pub mod frame;
pub mod obd2;
pub mod pipeline;
pub mod telemetry;
pub mod topics;
pub mod uds;

pub use dtc::*;
pub use frame::*;
pub use obd2::*;
pub use pipeline::*;
pub use telemetry::*;
pub use uds::*;

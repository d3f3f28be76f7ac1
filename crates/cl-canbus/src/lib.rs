//! CAN bus layer for the CanLink edge gateway.
//!
//! Provides a trait-based CAN interface abstraction with a SocketCAN
//! implementation and a test mock, the bounded ingest buffer with overflow
//! accounting, the OBD-II and UDS wire decoders, the UDS validator, and
//! the per-PID polling scheduler.

pub mod buffer;
pub mod error;
pub mod interface;
pub mod mock;
pub mod monitor;
pub mod obd2;
pub mod poller;
pub mod uds;
pub mod validator;

// Re-export key types for convenience
pub use buffer::{BufferStats, IngestBuffer};
pub use error::{CanError, CanResult};
pub use interface::CanInterface;
pub use mock::MockCanInterface;
pub use poller::{PidRequest, Poller, PollerCommand};

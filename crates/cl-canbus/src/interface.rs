//! CAN interface abstraction and the SocketCAN implementation.
//!
//! The trait is the seam the whole pipeline is tested through: production
//! uses [`SocketCanInterface`], tests use [`crate::mock::MockCanInterface`].

use async_trait::async_trait;
use std::time::Duration;

use cl_protocol::CanFrame;

use crate::error::CanResult;

/// Abstraction over a CAN bus endpoint.
#[async_trait]
pub trait CanInterface: Send + Sync {
    /// Transmit a frame.
    async fn send_frame(&self, frame: &CanFrame) -> CanResult<()>;

    /// Receive the next frame, waiting at most `timeout`.
    ///
    /// Returns [`crate::error::CanError::Timeout`] when nothing arrives in
    /// time; callers treat that as a normal idle condition.
    async fn recv_frame(&self, timeout: Duration) -> CanResult<CanFrame>;
}

#[cfg(target_os = "linux")]
pub use self::socketcan_impl::SocketCanInterface;

#[cfg(target_os = "linux")]
mod socketcan_impl {
    use async_trait::async_trait;
    use socketcan::tokio::CanSocket;
    use socketcan::{CanFrame as RawFrame, EmbeddedFrame, ExtendedId, Id, StandardId};
    use std::time::Duration;

    use cl_protocol::{CanFrame, clock};

    use crate::error::{CanError, CanResult};
    use crate::interface::CanInterface;

    /// CAN interface backed by a Linux SocketCAN socket.
    ///
    /// The interface must already be up at the configured bitrate
    /// (`ip link set canX up type can bitrate N`).
    pub struct SocketCanInterface {
        socket: CanSocket,
        name: String,
    }

    impl SocketCanInterface {
        pub fn open(name: &str) -> CanResult<Self> {
            let socket = CanSocket::open(name).map_err(|e| {
                CanError::Interface(format!("failed to open CAN interface '{name}': {e}"))
            })?;
            tracing::info!(interface = name, "connected to CAN bus");
            Ok(Self {
                socket,
                name: name.to_string(),
            })
        }

        pub fn name(&self) -> &str {
            &self.name
        }
    }

    #[async_trait]
    impl CanInterface for SocketCanInterface {
        async fn send_frame(&self, frame: &CanFrame) -> CanResult<()> {
            let id: Id = if frame.is_extended_id {
                ExtendedId::new(frame.arbitration_id)
                    .ok_or_else(|| {
                        CanError::Interface(format!(
                            "invalid extended CAN id 0x{:08X}",
                            frame.arbitration_id
                        ))
                    })?
                    .into()
            } else {
                StandardId::new(frame.arbitration_id as u16)
                    .ok_or_else(|| {
                        CanError::Interface(format!(
                            "invalid standard CAN id 0x{:03X}",
                            frame.arbitration_id
                        ))
                    })?
                    .into()
            };

            let raw = RawFrame::new(id, &frame.data)
                .ok_or_else(|| CanError::Interface("frame data exceeds 8 bytes".into()))?;

            self.socket
                .write_frame(raw)
                .await
                .map_err(|e| CanError::Interface(format!("CAN write failed: {e}")))
        }

        async fn recv_frame(&self, timeout: Duration) -> CanResult<CanFrame> {
            let raw = match tokio::time::timeout(timeout, self.socket.read_frame()).await {
                Err(_) => {
                    return Err(CanError::Timeout {
                        timeout_ms: timeout.as_millis() as u64,
                    });
                }
                Ok(Err(e)) => return Err(CanError::Interface(format!("CAN read failed: {e}"))),
                Ok(Ok(raw)) => raw,
            };

            // Timestamp at reception, both clocks.
            let monotonic_micros = clock::monotonic_micros();
            let received_at = chrono::Utc::now();

            let (arbitration_id, is_extended_id) = match raw.id() {
                Id::Standard(id) => (id.as_raw() as u32, false),
                Id::Extended(id) => (id.as_raw(), true),
            };

            Ok(CanFrame {
                arbitration_id,
                data: raw.data().to_vec(),
                monotonic_micros,
                received_at,
                is_extended_id,
                is_error_frame: matches!(raw, RawFrame::Error(_)),
                is_remote_frame: matches!(raw, RawFrame::Remote(_)),
            })
        }
    }
}

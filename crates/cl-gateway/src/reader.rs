//! CAN reader stage: blocks on the socket, deposits frames into the
//! ingest buffer.

use std::sync::Arc;
use std::time::Duration;

use tokio::sync::watch;

use cl_canbus::{CanError, CanInterface, IngestBuffer};

/// Per-read timeout so the shutdown flag is observed promptly.
const READ_TIMEOUT: Duration = Duration::from_millis(100);

/// Backoff after a hard interface error.
const ERROR_BACKOFF: Duration = Duration::from_secs(1);

/// Run the reader until shutdown.
pub async fn run(
    interface: Arc<dyn CanInterface>,
    buffer: Arc<IngestBuffer>,
    shutdown: watch::Receiver<bool>,
) {
    tracing::info!("CAN reader started");

    while !*shutdown.borrow() {
        match interface.recv_frame(READ_TIMEOUT).await {
            Ok(frame) => buffer.push(frame),
            Err(CanError::Timeout { .. }) => {}
            Err(e) => {
                tracing::error!(error = %e, "CAN read error");
                tokio::time::sleep(ERROR_BACKOFF).await;
            }
        }
    }

    tracing::info!("CAN reader stopped");
}

#[cfg(test)]
mod tests {
    use super::*;
    use cl_canbus::MockCanInterface;
    use cl_protocol::CanFrame;

    #[tokio::test]
    async fn reader_moves_frames_into_buffer() {
        let mock = Arc::new(MockCanInterface::new());
        for n in 0..3u8 {
            mock.queue_response(CanFrame::now(0x7E8, vec![n]));
        }

        let buffer = Arc::new(IngestBuffer::new(100, 0.8));
        let (shutdown_tx, shutdown_rx) = watch::channel(false);

        let handle = tokio::spawn(run(mock.clone(), buffer.clone(), shutdown_rx));

        // Wait for the mock's queue to drain into the buffer.
        for _ in 0..50 {
            if buffer.stats().total_received == 3 {
                break;
            }
            tokio::time::sleep(Duration::from_millis(10)).await;
        }

        shutdown_tx.send(true).unwrap();
        tokio::time::timeout(Duration::from_secs(1), handle)
            .await
            .expect("reader should stop")
            .unwrap();

        assert_eq!(buffer.stats().total_received, 3);
        let payloads: Vec<u8> = buffer.drain().iter().map(|f| f.data[0]).collect();
        assert_eq!(payloads, vec![0, 1, 2]);
    }
}

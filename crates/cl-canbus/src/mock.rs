//! Mock CAN interface for testing.
//!
//! Supports scripted response queues and frame recording. All tests use
//! this instead of real CAN hardware so the suite runs in CI on any
//! platform.

use async_trait::async_trait;
use std::sync::Mutex;
use std::time::Duration;

use cl_protocol::CanFrame;

use crate::error::{CanError, CanResult};
use crate::interface::CanInterface;

/// Mock CAN interface with scripted responses and frame recording.
pub struct MockCanInterface {
    /// Queued frames returned by `recv_frame` (FIFO order).
    responses: Mutex<Vec<CanFrame>>,
    /// All frames passed to `send_frame` (for test assertions).
    sent_frames: Mutex<Vec<CanFrame>>,
}

impl MockCanInterface {
    /// Create a new mock with no queued responses.
    pub fn new() -> Self {
        Self {
            responses: Mutex::new(Vec::new()),
            sent_frames: Mutex::new(Vec::new()),
        }
    }

    /// Create a mock pre-loaded with response frames.
    pub fn with_responses(responses: Vec<CanFrame>) -> Self {
        Self {
            responses: Mutex::new(responses),
            sent_frames: Mutex::new(Vec::new()),
        }
    }

    /// Queue an additional response frame.
    pub fn queue_response(&self, frame: CanFrame) {
        self.responses.lock().unwrap().push(frame);
    }

    /// Get copies of all frames that were sent.
    pub fn sent_frames(&self) -> Vec<CanFrame> {
        self.sent_frames.lock().unwrap().clone()
    }

    /// Get the last sent frame, if any.
    pub fn last_sent(&self) -> Option<CanFrame> {
        self.sent_frames.lock().unwrap().last().cloned()
    }
}

impl Default for MockCanInterface {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl CanInterface for MockCanInterface {
    async fn send_frame(&self, frame: &CanFrame) -> CanResult<()> {
        self.sent_frames.lock().unwrap().push(frame.clone());
        Ok(())
    }

    async fn recv_frame(&self, timeout: Duration) -> CanResult<CanFrame> {
        let mut responses = self.responses.lock().unwrap();
        if responses.is_empty() {
            return Err(CanError::Timeout {
                timeout_ms: timeout.as_millis() as u64,
            });
        }
        Ok(responses.remove(0))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn records_sent_frames() {
        let mock = MockCanInterface::new();
        let frame = CanFrame::now(0x7DF, vec![0x02, 0x01, 0x0C, 0, 0, 0, 0, 0]);
        mock.send_frame(&frame).await.unwrap();

        let sent = mock.sent_frames();
        assert_eq!(sent.len(), 1);
        assert_eq!(sent[0].arbitration_id, 0x7DF);
    }

    #[tokio::test]
    async fn returns_queued_responses_in_order() {
        let first = CanFrame::now(0x7E8, vec![0x41, 0x0C, 0x1B, 0x58]);
        let second = CanFrame::now(0x7E8, vec![0x41, 0x0D, 0x3C]);
        let mock = MockCanInterface::with_responses(vec![first.clone(), second.clone()]);

        let a = mock.recv_frame(Duration::from_millis(100)).await.unwrap();
        let b = mock.recv_frame(Duration::from_millis(100)).await.unwrap();
        assert_eq!(a, first);
        assert_eq!(b, second);
    }

    #[tokio::test]
    async fn timeout_when_empty() {
        let mock = MockCanInterface::new();
        let result = mock.recv_frame(Duration::from_millis(100)).await;
        assert!(matches!(result, Err(CanError::Timeout { .. })));
    }

    #[tokio::test]
    async fn queue_after_construction() {
        let mock = MockCanInterface::new();
        let frame = CanFrame::now(0x7E8, vec![0x43, 0x01, 0x03, 0x01]);
        mock.queue_response(frame.clone());

        let received = mock.recv_frame(Duration::from_millis(100)).await.unwrap();
        assert_eq!(received, frame);
    }
}

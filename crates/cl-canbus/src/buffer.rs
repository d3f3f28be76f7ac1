//! Bounded circular ingest buffer for CAN frames.
//!
//! Fixed capacity, drop-oldest on overflow, full accounting. The invariant
//! `total_received == total_drained + total_dropped + current_size` holds
//! at every instant the internal lock is released.

use std::collections::VecDeque;
use std::sync::Mutex;
use std::time::{Duration, Instant};

use serde::Serialize;

use cl_protocol::CanFrame;

/// Utilisation warnings repeat at most once per this window.
const WARN_INTERVAL: Duration = Duration::from_secs(60);

/// Snapshot of buffer accounting.
#[derive(Debug, Clone, Copy, Serialize)]
pub struct BufferStats {
    pub current_size: usize,
    pub capacity: usize,
    pub utilization_percent: f64,
    pub total_received: u64,
    pub total_dropped: u64,
    pub total_drained: u64,
}

struct Inner {
    frames: VecDeque<CanFrame>,
    total_received: u64,
    total_dropped: u64,
    total_drained: u64,
    last_warning: Option<Instant>,
}

/// Thread-safe bounded circular buffer between the CAN reader and decoder.
pub struct IngestBuffer {
    inner: Mutex<Inner>,
    capacity: usize,
    warning_threshold: f64,
}

impl IngestBuffer {
    /// Create a buffer holding at most `capacity` frames.
    ///
    /// `warning_threshold` is a utilisation fraction in [0, 1]; crossing it
    /// on push logs a rate-limited warning.
    pub fn new(capacity: usize, warning_threshold: f64) -> Self {
        Self {
            inner: Mutex::new(Inner {
                frames: VecDeque::with_capacity(capacity),
                total_received: 0,
                total_dropped: 0,
                total_drained: 0,
                last_warning: None,
            }),
            capacity,
            warning_threshold,
        }
    }

    /// Deposit a frame. When full, the oldest frame is discarded and the
    /// dropped counter incremented; the received counter always increments.
    pub fn push(&self, frame: CanFrame) {
        let mut inner = self.inner.lock().unwrap();

        if inner.frames.len() >= self.capacity {
            inner.frames.pop_front();
            inner.total_dropped += 1;
        }
        inner.frames.push_back(frame);
        inner.total_received += 1;

        let utilization = inner.frames.len() as f64 / self.capacity as f64;
        if utilization >= self.warning_threshold {
            let due = inner
                .last_warning
                .is_none_or(|t| t.elapsed() >= WARN_INTERVAL);
            if due {
                inner.last_warning = Some(Instant::now());
                tracing::warn!(
                    utilization_percent = utilization * 100.0,
                    threshold_percent = self.warning_threshold * 100.0,
                    capacity = self.capacity,
                    "CAN ingest buffer under pressure"
                );
            }
        }
    }

    /// Remove and return all held frames in arrival order.
    pub fn drain(&self) -> Vec<CanFrame> {
        let mut inner = self.inner.lock().unwrap();
        let frames: Vec<CanFrame> = inner.frames.drain(..).collect();
        inner.total_drained += frames.len() as u64;
        frames
    }

    pub fn stats(&self) -> BufferStats {
        let inner = self.inner.lock().unwrap();
        BufferStats {
            current_size: inner.frames.len(),
            capacity: self.capacity,
            utilization_percent: inner.frames.len() as f64 / self.capacity as f64 * 100.0,
            total_received: inner.total_received,
            total_dropped: inner.total_dropped,
            total_drained: inner.total_drained,
        }
    }

    pub fn is_empty(&self) -> bool {
        self.inner.lock().unwrap().frames.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn frame(n: u8) -> CanFrame {
        CanFrame::now(0x7E8, vec![n])
    }

    #[test]
    fn push_and_drain_in_order() {
        let buffer = IngestBuffer::new(10, 0.8);
        for n in 0..5 {
            buffer.push(frame(n));
        }

        let drained = buffer.drain();
        assert_eq!(drained.len(), 5);
        let payloads: Vec<u8> = drained.iter().map(|f| f.data[0]).collect();
        assert_eq!(payloads, vec![0, 1, 2, 3, 4]);
        assert!(buffer.is_empty());
    }

    #[test]
    fn overflow_drops_oldest() {
        let buffer = IngestBuffer::new(10, 0.8);
        for n in 0..15 {
            buffer.push(frame(n));
        }

        let stats = buffer.stats();
        assert_eq!(stats.total_received, 15);
        assert_eq!(stats.total_dropped, 5);
        assert_eq!(stats.current_size, 10);

        // The 10 newest, still in arrival order.
        let payloads: Vec<u8> = buffer.drain().iter().map(|f| f.data[0]).collect();
        assert_eq!(payloads, (5..15).collect::<Vec<u8>>());
    }

    #[test]
    fn accounting_invariant_holds() {
        let buffer = IngestBuffer::new(4, 0.8);
        for n in 0..7 {
            buffer.push(frame(n));
        }
        buffer.drain();
        for n in 0..3 {
            buffer.push(frame(n));
        }

        let stats = buffer.stats();
        assert_eq!(
            stats.total_received,
            stats.total_drained + stats.total_dropped + stats.current_size as u64
        );
    }

    #[test]
    fn utilization_percent() {
        let buffer = IngestBuffer::new(10, 0.99);
        for n in 0..8 {
            buffer.push(frame(n));
        }
        let stats = buffer.stats();
        assert!((stats.utilization_percent - 80.0).abs() < f64::EPSILON);
    }

    #[test]
    fn drain_on_empty_is_empty() {
        let buffer = IngestBuffer::new(10, 0.8);
        assert!(buffer.drain().is_empty());
        assert_eq!(buffer.stats().total_drained, 0);
    }
}

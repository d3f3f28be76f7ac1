//! Periodic ingest-buffer monitoring.
//!
//! Samples buffer accounting on an interval, derives the frame rate from
//! received deltas, and escalates to warnings on pressure, drops, or frame
//! storms.

use std::sync::Arc;
use std::time::{Duration, Instant};

use serde::Serialize;
use tokio::sync::watch;

use crate::buffer::IngestBuffer;

/// Frame rate above which a storm warning is logged.
const STORM_FRAMES_PER_SEC: f64 = 1000.0;

/// One monitoring sample.
#[derive(Debug, Clone, Serialize)]
pub struct BufferMetrics {
    pub current_size: usize,
    pub capacity: usize,
    pub utilization_percent: f64,
    pub total_received: u64,
    pub total_dropped: u64,
    pub frames_per_second: f64,
}

/// Monitors an [`IngestBuffer`] until shutdown.
pub struct BufferMonitor {
    buffer: Arc<IngestBuffer>,
    warning_threshold: f64,
    last_received: u64,
    last_sample: Instant,
}

impl BufferMonitor {
    pub fn new(buffer: Arc<IngestBuffer>, warning_threshold: f64) -> Self {
        Self {
            buffer,
            warning_threshold,
            last_received: 0,
            last_sample: Instant::now(),
        }
    }

    /// Take one sample and emit log lines.
    pub fn sample(&mut self) -> BufferMetrics {
        let stats = self.buffer.stats();
        let elapsed = self.last_sample.elapsed().as_secs_f64();
        let frames_per_second = if elapsed > 0.0 {
            (stats.total_received - self.last_received) as f64 / elapsed
        } else {
            0.0
        };

        let metrics = BufferMetrics {
            current_size: stats.current_size,
            capacity: stats.capacity,
            utilization_percent: stats.utilization_percent,
            total_received: stats.total_received,
            total_dropped: stats.total_dropped,
            frames_per_second,
        };

        tracing::debug!(
            size = metrics.current_size,
            capacity = metrics.capacity,
            utilization_percent = metrics.utilization_percent,
            received = metrics.total_received,
            dropped = metrics.total_dropped,
            fps = metrics.frames_per_second,
            "buffer metrics"
        );

        if metrics.utilization_percent >= self.warning_threshold * 100.0 {
            tracing::warn!(
                utilization_percent = metrics.utilization_percent,
                threshold_percent = self.warning_threshold * 100.0,
                "buffer utilization over threshold"
            );
        }
        if metrics.total_dropped > 0 {
            tracing::warn!(
                dropped = metrics.total_dropped,
                received = metrics.total_received,
                "buffer has dropped frames"
            );
        }
        if metrics.frames_per_second > STORM_FRAMES_PER_SEC {
            tracing::warn!(fps = metrics.frames_per_second, "high CAN frame rate");
        }

        self.last_received = stats.total_received;
        self.last_sample = Instant::now();
        metrics
    }

    /// Run the sampling loop until the shutdown flag flips.
    pub async fn run(mut self, interval: Duration, mut shutdown: watch::Receiver<bool>) {
        let mut ticker = tokio::time::interval(interval);
        ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Skip);
        ticker.tick().await; // first tick fires immediately

        loop {
            tokio::select! {
                _ = ticker.tick() => {
                    self.sample();
                }
                _ = shutdown.changed() => {
                    if *shutdown.borrow() {
                        break;
                    }
                }
            }
        }
        tracing::info!("buffer monitor stopped");
    }
}

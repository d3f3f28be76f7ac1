//! In-memory batch accumulation and gzip batch codec.

use std::io::{Read, Write};
use std::time::{Duration, Instant};

use flate2::Compression;
use flate2::read::GzDecoder;
use flate2::write::GzEncoder;

use cl_protocol::TelemetryEnvelope;

use crate::error::SpoolResult;

/// Flush when the accumulated uncompressed size crosses this.
pub const MAX_BATCH_BYTES: usize = 256 * 1024;

/// Flush when the current batch is older than this.
pub const MAX_BATCH_AGE: Duration = Duration::from_secs(5);

/// Serialise a message batch as a gzip-compressed JSON array.
pub fn compress_batch(messages: &[TelemetryEnvelope]) -> SpoolResult<Vec<u8>> {
    let json = serde_json::to_vec(messages)?;
    let mut encoder = GzEncoder::new(Vec::new(), Compression::default());
    encoder.write_all(&json)?;
    Ok(encoder.finish()?)
}

/// Inflate and parse a compressed batch payload.
pub fn decompress_batch(payload: &[u8]) -> SpoolResult<Vec<TelemetryEnvelope>> {
    let mut decoder = GzDecoder::new(payload);
    let mut json = Vec::new();
    decoder.read_to_end(&mut json)?;
    Ok(serde_json::from_slice(&json)?)
}

/// Accumulates messages until a size or age threshold is crossed.
pub struct BatchAccumulator {
    messages: Vec<TelemetryEnvelope>,
    uncompressed_bytes: usize,
    started_at: Instant,
    max_bytes: usize,
    max_age: Duration,
}

impl BatchAccumulator {
    pub fn new() -> Self {
        Self::with_thresholds(MAX_BATCH_BYTES, MAX_BATCH_AGE)
    }

    pub fn with_thresholds(max_bytes: usize, max_age: Duration) -> Self {
        Self {
            messages: Vec::new(),
            uncompressed_bytes: 0,
            started_at: Instant::now(),
            max_bytes,
            max_age,
        }
    }

    /// Append a message, accounting its serialised size.
    pub fn push(&mut self, message: TelemetryEnvelope) -> SpoolResult<()> {
        let size = serde_json::to_vec(&message)?.len();
        if self.messages.is_empty() {
            self.started_at = Instant::now();
        }
        self.messages.push(message);
        self.uncompressed_bytes += size;
        Ok(())
    }

    /// Whether a flush is due on size or age.
    pub fn should_flush(&self) -> bool {
        if self.messages.is_empty() {
            return false;
        }
        self.uncompressed_bytes >= self.max_bytes || self.started_at.elapsed() >= self.max_age
    }

    pub fn is_empty(&self) -> bool {
        self.messages.is_empty()
    }

    pub fn len(&self) -> usize {
        self.messages.len()
    }

    pub fn uncompressed_bytes(&self) -> usize {
        self.uncompressed_bytes
    }

    /// Take the accumulated messages, resetting the accumulator.
    pub fn take(&mut self) -> (Vec<TelemetryEnvelope>, usize) {
        let bytes = self.uncompressed_bytes;
        self.uncompressed_bytes = 0;
        self.started_at = Instant::now();
        (std::mem::take(&mut self.messages), bytes)
    }
}

impl Default for BatchAccumulator {
    fn default() -> Self {
        Self::new()
    }
}

//! Spool facade joining the accumulator and the store.
//!
//! Owned by the spooler stage. The publisher works against the shared
//! [`SpoolStore`] directly; the store serialises concurrent access.

use std::sync::Arc;

use cl_protocol::TelemetryEnvelope;

use crate::batch::{BatchAccumulator, compress_batch};
use crate::error::SpoolResult;
use crate::store::SpoolStore;

pub struct Spool {
    store: Arc<SpoolStore>,
    accumulator: BatchAccumulator,
}

impl Spool {
    pub fn new(store: Arc<SpoolStore>) -> Self {
        Self {
            store,
            accumulator: BatchAccumulator::new(),
        }
    }

    pub fn with_accumulator(store: Arc<SpoolStore>, accumulator: BatchAccumulator) -> Self {
        Self { store, accumulator }
    }

    pub fn store(&self) -> &Arc<SpoolStore> {
        &self.store
    }

    /// Add a message; flushes when a threshold is crossed.
    ///
    /// Returns the new batch id when a flush happened.
    pub fn add_message(&mut self, message: TelemetryEnvelope) -> SpoolResult<Option<i64>> {
        self.accumulator.push(message)?;
        if self.accumulator.should_flush() {
            return self.flush();
        }
        Ok(None)
    }

    /// Whether the current batch has aged past its flush deadline.
    pub fn flush_due(&self) -> bool {
        self.accumulator.should_flush()
    }

    pub fn pending_in_memory(&self) -> usize {
        self.accumulator.len()
    }

    /// Flush the current batch to disk, if non-empty.
    pub fn flush(&mut self) -> SpoolResult<Option<i64>> {
        if self.accumulator.is_empty() {
            return Ok(None);
        }

        let (messages, uncompressed_bytes) = self.accumulator.take();
        let count = messages.len();
        let compressed = compress_batch(&messages)?;
        let timestamp = chrono::Utc::now().timestamp_micros() as f64 / 1_000_000.0;
        let id = self
            .store
            .insert_batch(&compressed, uncompressed_bytes as u64, timestamp)?;

        tracing::debug!(
            batch_id = id,
            messages = count,
            compressed_bytes = compressed.len(),
            uncompressed_bytes,
            "flushed batch to spool"
        );
        Ok(Some(id))
    }
}

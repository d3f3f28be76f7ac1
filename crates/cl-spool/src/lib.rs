//! Durable local spool for telemetry batches.
//!
//! Messages accumulate in memory and flush to SQLite as gzip-compressed
//! JSON arrays when a size or age threshold is crossed. The on-disk
//! footprint is capped; eviction prefers already-sent batches so unsent
//! data survives long network outages.

pub mod batch;
pub mod error;
pub mod spool;
pub mod store;

pub use batch::{BatchAccumulator, compress_batch, decompress_batch};
pub use error::{SpoolError, SpoolResult};
pub use spool::Spool;
pub use store::{SpoolBatch, SpoolStats, SpoolStore};

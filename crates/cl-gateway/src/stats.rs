//! Periodic system statistics log.
//!
//! One structured line per subsystem every minute, so field logs show the
//! pipeline's health without metrics infrastructure.

use std::sync::Arc;
use std::sync::atomic::Ordering;
use std::time::Duration;

use tokio::sync::watch;

use cl_canbus::IngestBuffer;
use cl_mqtt::ConnectionState;
use cl_spool::SpoolStore;

use crate::decoder::DecoderCounters;
use crate::publisher::PublishCounters;
use crate::spooler::SpoolerCounters;

/// Stats log interval.
pub const STATS_INTERVAL: Duration = Duration::from_secs(60);

pub struct StatsContext {
    pub buffer: Arc<IngestBuffer>,
    pub store: Arc<SpoolStore>,
    pub connection: ConnectionState,
    pub decoder: Arc<DecoderCounters>,
    pub spooler: Arc<SpoolerCounters>,
    pub publisher: Arc<PublishCounters>,
}

pub fn log_stats(ctx: &StatsContext) {
    let buffer = ctx.buffer.stats();
    tracing::info!(
        size = buffer.current_size,
        capacity = buffer.capacity,
        utilization_percent = buffer.utilization_percent,
        received = buffer.total_received,
        dropped = buffer.total_dropped,
        "stats: ingest buffer"
    );

    tracing::info!(
        uds = ctx.decoder.uds_decoded.load(Ordering::Relaxed),
        obd2 = ctx.decoder.obd2_decoded.load(Ordering::Relaxed),
        decode_failures = ctx.decoder.decode_failures.load(Ordering::Relaxed),
        validation_failures = ctx.decoder.validation_failures.load(Ordering::Relaxed),
        queue_drops = ctx.decoder.queue_drops.load(Ordering::Relaxed),
        "stats: decoder"
    );

    tracing::info!(
        enveloped = ctx.spooler.enveloped.load(Ordering::Relaxed),
        schema_rejects = ctx.spooler.schema_rejects.load(Ordering::Relaxed),
        "stats: spooler"
    );

    match ctx.store.stats() {
        Ok(spool) => tracing::info!(
            pending_batches = spool.pending_batches,
            sent_batches = spool.sent_batches,
            utilization_percent = spool.utilization_percent,
            pending_bytes = spool.pending_size_bytes,
            "stats: spool"
        ),
        Err(e) => tracing::warn!(error = %e, "stats: spool unavailable"),
    }

    tracing::info!(
        connected = ctx.connection.is_connected(),
        publish_success = ctx.publisher.success(),
        publish_failed = ctx.publisher.failed(),
        batches_sent = ctx.publisher.batches_sent.load(Ordering::Relaxed),
        "stats: publisher"
    );
}

/// Run the stats loop until shutdown.
pub async fn run(ctx: StatsContext, mut shutdown: watch::Receiver<bool>) {
    let mut ticker = tokio::time::interval(STATS_INTERVAL);
    ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Skip);
    ticker.tick().await;

    loop {
        tokio::select! {
            _ = ticker.tick() => log_stats(&ctx),
            _ = shutdown.changed() => {
                if *shutdown.borrow() {
                    break;
                }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use cl_spool::SpoolStore;

    #[test]
    fn log_stats_does_not_panic() {
        let ctx = StatsContext {
            buffer: Arc::new(IngestBuffer::new(10, 0.8)),
            store: Arc::new(SpoolStore::open_in_memory().unwrap()),
            connection: ConnectionState::new(),
            decoder: Arc::new(DecoderCounters::default()),
            spooler: Arc::new(SpoolerCounters::default()),
            publisher: Arc::new(PublishCounters::default()),
        };
        log_stats(&ctx);
    }
}

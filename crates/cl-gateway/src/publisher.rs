//! Publisher stage: drains the spool oldest-first while connected.
//!
//! A batch is marked sent only after every constituent message published;
//! any failure aborts the sweep and the whole batch is retried on the
//! next iteration. Consumers dedupe re-sent batches on `messageId`.

use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Duration;

use tokio::sync::watch;

use cl_mqtt::{Channel, ConnectionState, publish_with_retry};
use cl_spool::{SpoolStore, decompress_batch};

/// Pause between sweeps.
const SWEEP_INTERVAL: Duration = Duration::from_secs(1);

/// Batches fetched per sweep.
const BATCH_FETCH_LIMIT: u32 = 10;

/// Counters for the publisher stage, shared with heartbeat and stats.
#[derive(Default)]
pub struct PublishCounters {
    pub publish_success: AtomicU64,
    pub publish_failed: AtomicU64,
    pub batches_sent: AtomicU64,
}

impl PublishCounters {
    pub fn success(&self) -> u64 {
        self.publish_success.load(Ordering::Relaxed)
    }

    pub fn failed(&self) -> u64 {
        self.publish_failed.load(Ordering::Relaxed)
    }
}

/// One sweep: publish pending batches until done or a publish fails.
///
/// Returns the number of batches fully published.
pub async fn sweep(
    store: &SpoolStore,
    channel: &dyn Channel,
    topic: &str,
    counters: &PublishCounters,
) -> u64 {
    let batches = match store.pending(BATCH_FETCH_LIMIT) {
        Ok(batches) => batches,
        Err(e) => {
            tracing::error!(error = %e, "failed to read pending batches");
            return 0;
        }
    };

    let mut sent = 0;
    for batch in batches {
        let messages = match decompress_batch(&batch.payload) {
            Ok(messages) => messages,
            Err(e) => {
                // A corrupt batch would wedge the queue; drop it loudly.
                tracing::error!(batch_id = batch.id, error = %e, "corrupt spool batch, discarding");
                let _ = store.mark_sent(batch.id);
                continue;
            }
        };

        let mut all_published = true;
        for message in &messages {
            let payload = match serde_json::to_vec(message) {
                Ok(payload) => payload,
                Err(e) => {
                    tracing::error!(error = %e, "unserialisable spool message, skipping");
                    continue;
                }
            };
            match publish_with_retry(channel, topic, &payload).await {
                Ok(()) => {
                    counters.publish_success.fetch_add(1, Ordering::Relaxed);
                }
                Err(e) => {
                    counters.publish_failed.fetch_add(1, Ordering::Relaxed);
                    tracing::warn!(
                        batch_id = batch.id,
                        error = %e,
                        "publish failed mid-batch, will retry batch"
                    );
                    all_published = false;
                    break;
                }
            }
        }

        if !all_published {
            // Abort the sweep; the batch stays pending and is re-sent
            // whole on the next iteration.
            break;
        }

        if let Err(e) = store.mark_sent(batch.id) {
            tracing::error!(batch_id = batch.id, error = %e, "failed to mark batch sent");
            break;
        }
        counters.batches_sent.fetch_add(1, Ordering::Relaxed);
        tracing::debug!(batch_id = batch.id, messages = messages.len(), "batch published");
        sent += 1;
    }

    sent
}

/// Run the publisher until shutdown, then attempt one final sweep.
pub async fn run(
    store: Arc<SpoolStore>,
    channel: Arc<dyn Channel>,
    connection: ConnectionState,
    topic: String,
    counters: Arc<PublishCounters>,
    mut shutdown: watch::Receiver<bool>,
) {
    tracing::info!(topic = %topic, "publisher started");
    let mut ticker = tokio::time::interval(SWEEP_INTERVAL);
    ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Skip);

    loop {
        tokio::select! {
            _ = ticker.tick() => {
                if connection.is_connected() {
                    sweep(&store, channel.as_ref(), &topic, &counters).await;
                }
            }
            _ = shutdown.changed() => {
                if *shutdown.borrow() {
                    break;
                }
            }
        }
    }

    // Final send attempt so a graceful stop drains what it can.
    if connection.is_connected() {
        let sent = sweep(&store, channel.as_ref(), &topic, &counters).await;
        if sent > 0 {
            tracing::info!(batches = sent, "final publish sweep completed");
        }
    }
    tracing::info!("publisher stopped");
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Utc;
    use cl_mqtt::MockChannel;
    use cl_protocol::{TelemetryEnvelope, TelemetryType};
    use cl_spool::compress_batch;

    fn envelope(n: u32) -> TelemetryEnvelope {
        TelemetryEnvelope::new(
            "1HGBH41JXMN109186",
            "gw-001",
            TelemetryType::Obd2,
            Utc::now(),
            serde_json::json!({"seq": n}),
        )
    }

    fn store_with_batches(batches: &[Vec<TelemetryEnvelope>]) -> Arc<SpoolStore> {
        let store = Arc::new(SpoolStore::open_in_memory().unwrap());
        for (i, batch) in batches.iter().enumerate() {
            let compressed = compress_batch(batch).unwrap();
            store.insert_batch(&compressed, 100, i as f64).unwrap();
        }
        store
    }

    #[tokio::test]
    async fn sweep_publishes_and_marks_sent() {
        let store = store_with_batches(&[vec![envelope(0), envelope(1)]]);
        let channel = MockChannel::new();
        let counters = PublishCounters::default();

        let sent = sweep(&store, &channel, "vehicle/VIN/telemetry", &counters).await;

        assert_eq!(sent, 1);
        assert_eq!(channel.published_count(), 2);
        assert!(store.pending(10).unwrap().is_empty());
        assert_eq!(counters.success(), 2);
    }

    #[tokio::test]
    async fn sweep_publishes_oldest_first() {
        let store = store_with_batches(&[vec![envelope(0)], vec![envelope(1)]]);
        let channel = MockChannel::new();
        let counters = PublishCounters::default();

        sweep(&store, &channel, "t", &counters).await;

        let published = channel.published();
        assert_eq!(published.len(), 2);
        let first: TelemetryEnvelope = serde_json::from_slice(&published[0].payload).unwrap();
        assert_eq!(first.data["seq"], 0);
    }

    #[tokio::test(start_paused = true)]
    async fn failure_leaves_batch_pending_until_retry_succeeds() {
        let store = store_with_batches(&[vec![envelope(0), envelope(1)]]);
        let channel = MockChannel::new();
        let counters = PublishCounters::default();

        // Every attempt fails: the batch must stay pending, unmarked.
        channel.fail_next(u32::MAX);
        let sent = sweep(&store, &channel, "t", &counters).await;
        assert_eq!(sent, 0);
        assert_eq!(store.pending(10).unwrap().len(), 1);
        assert_eq!(counters.failed(), 1);

        // Broker recovers: the whole batch is re-sent and marked.
        channel.fail_next(0);
        let sent = sweep(&store, &channel, "t", &counters).await;
        assert_eq!(sent, 1);
        assert_eq!(channel.published_count(), 2);
        assert!(store.pending(10).unwrap().is_empty());
    }

    #[tokio::test]
    async fn run_waits_for_connection() {
        let store = store_with_batches(&[vec![envelope(0)]]);
        let channel: Arc<dyn Channel> = Arc::new(MockChannel::new());
        let connection = ConnectionState::new(); // disconnected
        let counters = Arc::new(PublishCounters::default());
        let (shutdown_tx, shutdown_rx) = watch::channel(false);

        let handle = tokio::spawn(run(
            store.clone(),
            channel,
            connection,
            "t".into(),
            counters.clone(),
            shutdown_rx,
        ));

        tokio::time::sleep(Duration::from_millis(50)).await;
        shutdown_tx.send(true).unwrap();
        tokio::time::timeout(Duration::from_secs(1), handle)
            .await
            .expect("publisher should stop")
            .unwrap();

        // Never connected: nothing published, batch still pending.
        assert_eq!(counters.success(), 0);
        assert_eq!(store.pending(10).unwrap().len(), 1);
    }
}

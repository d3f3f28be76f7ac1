//! End-to-end pipeline tests: scripted CAN frames through ingest, decode
//! and spool, then publish through a mock channel.

use std::sync::Arc;
use std::time::Duration;

use tokio::sync::{mpsc, watch};

use cl_canbus::{IngestBuffer, MockCanInterface};
use cl_gateway::decoder::{self, DecoderCounters};
use cl_gateway::publisher::{self, PublishCounters};
use cl_gateway::reader;
use cl_gateway::spooler::{self, EnvelopeIdentity, SpoolerCounters};
use cl_mqtt::MockChannel;
use cl_protocol::{CanFrame, TelemetryEnvelope};
use cl_spool::{Spool, SpoolStore};

const VIN: &str = "1HGBH41JXMN109186";

fn identity() -> EnvelopeIdentity {
    EnvelopeIdentity {
        vin: VIN.into(),
        gateway_id: "gw-001".into(),
    }
}

/// Scripted ECU traffic: two mode-01 responses, a mode-03 DTC response, a
/// UDS 0x19 DTC report, an empty junk frame, and a UDS VIN read.
fn scripted_frames() -> Vec<CanFrame> {
    let mut vin_payload = vec![0x62, 0xF1, 0x90];
    vin_payload.extend_from_slice(VIN.as_bytes());

    vec![
        CanFrame::now(0x7E8, vec![0x41, 0x0C, 0x27, 0x10]),
        CanFrame::now(0x7E8, vec![0x41, 0x05, 0x82]),
        CanFrame::now(0x7E8, vec![0x43, 0x02, 0x03, 0x01, 0x04, 0x20]),
        CanFrame::now(
            0x7E9,
            vec![0x59, 0x02, 0xFF, 0x03, 0x01, 0x00, 0x08, 0x04, 0x20, 0x00, 0x48],
        ),
        CanFrame::now(0x7E9, vec![]),
        CanFrame::now(0x7E8, vin_payload),
    ]
}

/// Drive reader → decoder → spooler over scripted frames, stop them, and
/// return the store with everything flushed.
async fn ingest_scripted(store: Arc<SpoolStore>) {
    let mock = Arc::new(MockCanInterface::new());
    for frame in scripted_frames() {
        mock.queue_response(frame);
    }

    let buffer = Arc::new(IngestBuffer::new(1000, 0.8));
    let (decoded_tx, decoded_rx) = mpsc::channel(64);
    let (shutdown_tx, shutdown_rx) = watch::channel(false);

    let reader_handle = tokio::spawn(reader::run(mock.clone(), buffer.clone(), shutdown_rx.clone()));
    let decoder_handle = tokio::spawn(decoder::run(
        buffer.clone(),
        decoded_tx,
        Arc::new(DecoderCounters::default()),
        shutdown_rx.clone(),
    ));
    let spooler_handle = tokio::spawn(spooler::run(
        decoded_rx,
        Spool::new(store),
        identity(),
        Arc::new(SpoolerCounters::default()),
        shutdown_rx,
    ));

    // Wait for all scripted frames to traverse reader and decoder.
    for _ in 0..100 {
        let stats = buffer.stats();
        if stats.total_received == 6 && stats.current_size == 0 {
            break;
        }
        tokio::time::sleep(Duration::from_millis(10)).await;
    }
    tokio::time::sleep(Duration::from_millis(100)).await;

    shutdown_tx.send(true).unwrap();
    for handle in [reader_handle, decoder_handle, spooler_handle] {
        tokio::time::timeout(Duration::from_secs(2), handle)
            .await
            .expect("stage should stop in the join window")
            .unwrap();
    }
}

#[tokio::test]
async fn frames_flow_to_spool_and_broker() {
    let store = Arc::new(SpoolStore::open_in_memory().unwrap());
    ingest_scripted(store.clone()).await;

    // The empty frame is dropped by validation; five messages spool:
    // rpm, coolant, OBD-II DTCs, UDS DTC report, UDS VIN.
    let pending = store.pending(10).unwrap();
    assert_eq!(pending.len(), 1, "one flushed batch expected");

    let channel = MockChannel::new();
    let counters = PublishCounters::default();
    let sent = publisher::sweep(&store, &channel, "vehicle/VIN/telemetry", &counters).await;
    assert_eq!(sent, 1);

    let published = channel.published();
    assert_eq!(published.len(), 5);

    let envelopes: Vec<TelemetryEnvelope> = published
        .iter()
        .map(|m| serde_json::from_slice(&m.payload).unwrap())
        .collect();

    // Downstream schema: required fields on every message.
    for envelope in &envelopes {
        assert_eq!(envelope.vin, VIN);
        assert!(!envelope.message_id.is_empty());
        assert_eq!(envelope.gateway_id, "gw-001");
        envelope.validate().unwrap();
    }

    // Arrival order is preserved through the batch.
    assert_eq!(envelopes[0].data["kind"], "obd2");
    assert_eq!(
        envelopes[0].data["parameters"][0]["name"], "engine_rpm",
        "first message should be the RPM decode"
    );
    assert_eq!(envelopes[0].data["parameters"][0]["value"], 2500.0);
    assert_eq!(envelopes[1].data["parameters"][0]["name"], "coolant_temp");
    assert_eq!(envelopes[2].data["dtcs"][0], "P0301");
    assert_eq!(envelopes[2].data["dtcs"][1], "P0420");
    assert_eq!(envelopes[3].data["kind"], "uds");
    assert_eq!(envelopes[3].data["dtc_info"][0]["code"], "P0301");
    assert_eq!(envelopes[3].data["dtc_info"][1]["severity"], "high");
    assert_eq!(envelopes[4].data["vin"], VIN);

    // After mark_sent, nothing is pending.
    assert!(store.pending(10).unwrap().is_empty());
}

#[tokio::test(start_paused = true)]
async fn outage_keeps_batches_until_broker_recovers() {
    let store = Arc::new(SpoolStore::open_in_memory().unwrap());

    // Spool one batch directly.
    let mut spool = Spool::new(store.clone());
    let frame = CanFrame::now(0x7E8, vec![0x41, 0x0C, 0x27, 0x10]);
    let counters = DecoderCounters::default();
    for message in decoder::decode_frame(&frame, &counters) {
        let envelope = spooler::build_envelope(&identity(), &message).unwrap();
        spool.add_message(envelope).unwrap();
    }
    spool.flush().unwrap().expect("batch flushed");

    let channel = MockChannel::new();
    let publish_counters = PublishCounters::default();

    // Broker down: batch survives the failed sweep.
    channel.fail_next(u32::MAX);
    let sent = publisher::sweep(&store, &channel, "t", &publish_counters).await;
    assert_eq!(sent, 0);
    assert_eq!(store.pending(10).unwrap().len(), 1);

    // Broker back: the same batch goes out and is marked sent.
    channel.fail_next(0);
    let sent = publisher::sweep(&store, &channel, "t", &publish_counters).await;
    assert_eq!(sent, 1);
    assert!(store.pending(10).unwrap().is_empty());
    assert_eq!(channel.published_count(), 1);
}

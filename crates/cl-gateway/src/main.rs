//! CanLink edge gateway — on-vehicle CAN-to-broker telemetry pipeline.
//!
//! Wires the CAN reader, decoder, spooler, publisher and PID poller into
//! a single binary for ARM edge devices.

use std::sync::Arc;
use std::time::Duration;

use tokio::sync::{mpsc, watch};
use tracing_subscriber::EnvFilter;

use cl_canbus::monitor::BufferMonitor;
use cl_canbus::{CanInterface, IngestBuffer, PidRequest, Poller, PollerCommand, obd2};
use cl_gateway::config::GatewayConfig;
use cl_gateway::decoder::DecoderCounters;
use cl_gateway::publisher::PublishCounters;
use cl_gateway::spooler::{EnvelopeIdentity, SpoolerCounters};
use cl_gateway::stats::StatsContext;
use cl_gateway::{decoder, heartbeat, publisher, reader, spooler, stats};
use cl_mqtt::{Channel, ConnectionState, MqttChannel, drive_event_loop};
use cl_protocol::obd2::MODE_CURRENT_DATA;
use cl_spool::{Spool, SpoolStore};

/// Bound on the decoded queue between decoder and spooler.
const DECODED_QUEUE_CAPACITY: usize = 500;

/// Buffer monitor sampling interval.
const MONITOR_INTERVAL: Duration = Duration::from_secs(5);

/// Join window for graceful shutdown.
const SHUTDOWN_JOIN_WINDOW: Duration = Duration::from_secs(5);

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::from_default_env())
        .json()
        .init();

    tracing::info!(version = env!("CARGO_PKG_VERSION"), "cl-gateway starting");

    // ── Load config ─────────────────────────────────────────────
    let config_path = std::env::args()
        .nth(1)
        .unwrap_or_else(|| "config/gateway.yaml".to_string());
    let config = GatewayConfig::load(&config_path)?;
    tracing::info!(
        vin = %config.vehicle.vin,
        gateway_id = %config.vehicle.gateway_id,
        can_interface = %config.can.interface,
        can_bitrate = config.can.bitrate,
        "config loaded"
    );

    // ── CAN interface ───────────────────────────────────────────
    #[cfg(target_os = "linux")]
    let interface: Arc<dyn CanInterface> = Arc::new(
        cl_canbus::interface::SocketCanInterface::open(&config.can.interface)?,
    );
    #[cfg(not(target_os = "linux"))]
    let interface: Arc<dyn CanInterface> = {
        anyhow::bail!("cl-gateway requires Linux SocketCAN support");
    };

    // ── Shared components ───────────────────────────────────────
    let buffer = Arc::new(IngestBuffer::new(
        config.can.buffer_size,
        config.can.buffer_warning_threshold,
    ));
    let store = Arc::new(SpoolStore::open(&config.buffer.db_path)?);
    let (channel, eventloop) = MqttChannel::new(&config.mqtt, &config.vehicle.vin)?;
    let telemetry_topic = channel.telemetry_topic().to_string();
    let status_topic = channel.status_topic().to_string();
    let channel: Arc<dyn Channel> = Arc::new(channel);
    let connection = ConnectionState::new();

    let decoder_counters = Arc::new(DecoderCounters::default());
    let spooler_counters = Arc::new(SpoolerCounters::default());
    let publish_counters = Arc::new(PublishCounters::default());

    let (shutdown_tx, shutdown_rx) = watch::channel(false);
    let (decoded_tx, decoded_rx) = mpsc::channel(DECODED_QUEUE_CAPACITY);

    // ── Spawn the pipeline ──────────────────────────────────────
    let mut handles = Vec::new();

    handles.push(tokio::spawn(drive_event_loop(
        eventloop,
        connection.clone(),
        shutdown_rx.clone(),
    )));

    handles.push(tokio::spawn(reader::run(
        interface.clone(),
        buffer.clone(),
        shutdown_rx.clone(),
    )));

    handles.push(tokio::spawn(decoder::run(
        buffer.clone(),
        decoded_tx,
        decoder_counters.clone(),
        shutdown_rx.clone(),
    )));

    handles.push(tokio::spawn(spooler::run(
        decoded_rx,
        Spool::new(store.clone()),
        EnvelopeIdentity {
            vin: config.vehicle.vin.clone(),
            gateway_id: config.vehicle.gateway_id.clone(),
        },
        spooler_counters.clone(),
        shutdown_rx.clone(),
    )));

    handles.push(tokio::spawn(publisher::run(
        store.clone(),
        channel.clone(),
        connection.clone(),
        telemetry_topic,
        publish_counters.clone(),
        shutdown_rx.clone(),
    )));

    handles.push(tokio::spawn(heartbeat::run(
        channel.clone(),
        connection.clone(),
        status_topic,
        config.vehicle.vin.clone(),
        publish_counters.clone(),
        shutdown_rx.clone(),
    )));

    handles.push(tokio::spawn(
        BufferMonitor::new(buffer.clone(), config.can.buffer_warning_threshold)
            .run(MONITOR_INTERVAL, shutdown_rx.clone()),
    ));

    handles.push(tokio::spawn(stats::run(
        StatsContext {
            buffer: buffer.clone(),
            store: store.clone(),
            connection: connection.clone(),
            decoder: decoder_counters,
            spooler: spooler_counters,
            publisher: publish_counters,
        },
        shutdown_rx.clone(),
    )));

    // ── PID poller ──────────────────────────────────────────────
    // The command sender is the poller's control surface; held here for
    // the lifetime of the process.
    let _poller_commands: Option<mpsc::Sender<PollerCommand>> = if config.obd2.enabled {
        let entries = config.schedule_entries();
        if entries.is_empty() {
            None
        } else {
            let (request_tx, request_rx) = mpsc::channel::<PidRequest>(64);
            let (command_tx, command_rx) = mpsc::channel::<PollerCommand>(16);

            handles.push(tokio::spawn(Poller::new(entries).run(
                request_tx,
                command_rx,
                shutdown_rx.clone(),
            )));
            handles.push(tokio::spawn(dispatch_requests(
                request_rx,
                interface.clone(),
                shutdown_rx.clone(),
            )));
            Some(command_tx)
        }
    } else {
        None
    };

    tracing::info!(tasks = handles.len(), "cl-gateway running");

    // ── Graceful shutdown ───────────────────────────────────────
    tokio::signal::ctrl_c().await?;
    tracing::info!("shutdown signal received");
    shutdown_tx.send(true)?;

    let join_all = async {
        for handle in handles {
            let _ = handle.await;
        }
    };
    if tokio::time::timeout(SHUTDOWN_JOIN_WINDOW, join_all).await.is_err() {
        tracing::warn!("shutdown join window elapsed with tasks still running");
    }

    tracing::info!("cl-gateway stopped");
    Ok(())
}

/// Forward poller requests onto the CAN bus as mode 0x01 request frames.
async fn dispatch_requests(
    mut requests: mpsc::Receiver<PidRequest>,
    interface: Arc<dyn CanInterface>,
    mut shutdown: watch::Receiver<bool>,
) {
    loop {
        tokio::select! {
            request = requests.recv() => {
                let Some(request) = request else { break };
                let frame = obd2::build_request(MODE_CURRENT_DATA, request.pid);
                if let Err(e) = interface.send_frame(&frame).await {
                    tracing::warn!(
                        pid = %format!("0x{:02X}", request.pid),
                        error = %e,
                        "failed to send PID request"
                    );
                }
            }
            _ = shutdown.changed() => {
                if *shutdown.borrow() {
                    break;
                }
            }
        }
    }
}

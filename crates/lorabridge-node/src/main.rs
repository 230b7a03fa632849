//! LoRa Telemetry Bridge - daemon
//!
//! This binary runs the full bridge:
//! - UDP-framed radio link ingesting telemetry packets
//! - MQTT session publishing frames, signal and status records
//! - HTTP settings endpoint for field reconfiguration
//!
//! Saving settings ends the process with [`RESTART_EXIT_CODE`] so a
//! supervisor (systemd `RestartForceExitStatus=`, or a shell loop) can
//! bring it back up on the new configuration, the same way a reboot
//! would.

mod server;

use clap::Parser;
use std::net::SocketAddr;
use std::sync::Arc;
use std::time::{Duration, Instant};
use tracing::{error, info, warn, Level};
use tracing_subscriber::FmtSubscriber;

use lorabridge::{
    radio, BusSession, ConfigStore, HostNetwork, IngestLoop, LoopExit, LoopHandle, MqttLink,
    NetworkSupervisor, ReconnectConfig, Topics, UdpRadio,
};

/// Exit status that asks the supervisor for a restart rather than a stop
pub const RESTART_EXIT_CODE: i32 = 75;

#[derive(Parser)]
#[command(name = "lorabridge-node")]
#[command(about = "LoRa to MQTT telemetry bridge with settings endpoint")]
struct Args {
    /// Configuration directory (created on first run)
    #[arg(long, default_value = "lorabridge-data")]
    config_dir: String,

    /// Settings endpoint listen port
    #[arg(long, default_value_t = 8080)]
    http_port: u16,

    /// Bind address for the UDP radio transport
    #[arg(long, default_value = "0.0.0.0:1700")]
    radio_bind: SocketAddr,

    /// Enable verbose logging
    #[arg(long, short)]
    verbose: bool,
}

/// Application state shared across handlers
pub struct AppState {
    /// Configuration store, shared with the ingestion loop
    pub store: Arc<ConfigStore>,
    /// Handle for querying and stopping the ingestion loop
    pub loop_handle: LoopHandle,
    /// Process start time
    pub start_time: Instant,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let args = Args::parse();

    let level = if args.verbose { Level::DEBUG } else { Level::INFO };
    let subscriber = FmtSubscriber::builder().with_max_level(level).finish();
    tracing::subscriber::set_global_default(subscriber)?;

    info!("Starting LoRa telemetry bridge");

    let store = Arc::new(ConfigStore::open(&args.config_dir)?);
    info!("Configuration directory: {}", args.config_dir);

    // Radio first: without it the device has no purpose. A persistent
    // bring-up failure is fatal, matching a hardware fault.
    let mut radio_link = UdpRadio::new(args.radio_bind);
    radio::bring_up_blocking(
        &mut radio_link,
        &store.radio(),
        10,
        Duration::from_millis(500),
    )
    .await?;
    info!("Radio listening on {}", args.radio_bind);

    // Network bring-up is bounded but not fatal: the loop keeps
    // re-associating, and the settings endpoint stays reachable either way
    let mut net = NetworkSupervisor::new(HostNetwork::new(), store.network());
    if let Err(e) = net.bring_up_blocking(30, Duration::from_secs(1)).await {
        warn!(error = %e, "Network not associated at startup, continuing");
    }

    let session = BusSession::new(
        MqttLink::new(),
        Arc::clone(&store),
        Topics::default(),
        ReconnectConfig::default(),
    );

    let report_interval = store.radio().report_interval;
    let (ingest, loop_handle) = IngestLoop::new(radio_link, net, session, report_interval);

    let state = Arc::new(AppState {
        store: Arc::clone(&store),
        loop_handle: loop_handle.clone(),
        start_time: Instant::now(),
    });

    let http_bind = format!("0.0.0.0:{}", args.http_port);
    let listener = tokio::net::TcpListener::bind(&http_bind).await?;
    info!("Settings endpoint listening on http://{}", http_bind);

    let app = server::create_router(state);
    tokio::spawn(async move {
        if let Err(e) = axum::serve(listener, app).await {
            error!("Settings endpoint error: {}", e);
        }
    });

    // Ctrl-C stops the loop cleanly
    let shutdown_handle = loop_handle.clone();
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            info!("Interrupt received");
            let _ = shutdown_handle.shutdown().await;
        }
    });

    match ingest.run().await {
        LoopExit::Shutdown => {
            info!("Bridge stopped");
            Ok(())
        }
        LoopExit::Restart => {
            info!("Configuration saved, exiting for restart");
            std::process::exit(RESTART_EXIT_CODE);
        }
    }
}

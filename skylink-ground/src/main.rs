//! Skylink ground service entry point.
//!
//! ```text
//! skylink-ground                       Run with skylink-ground.toml (or defaults)
//! skylink-ground --config <path>       Load a custom config TOML
//! skylink-ground --gen-config          Write the default config to --config and exit
//! skylink-ground --mode tcp --ground 192.168.4.1
//! skylink-ground --json                Print synchronized parameters as JSON
//! ```

use std::fs::OpenOptions;
use std::net::IpAddr;
use std::path::PathBuf;
use std::sync::Mutex;

use clap::Parser;
use tokio_stream::StreamExt;
use tokio_stream::wrappers::BroadcastStream;
use tokio_stream::wrappers::errors::BroadcastStreamRecvError;
use tracing::{debug, info, trace, warn};
use tracing_subscriber::EnvFilter;

use skylink_core::{LinkEvent, Supervisor, TransportMode};
use skylink_ground::config::{GroundConfig, LoggingConfig};

// ── CLI ──────────────────────────────────────────────────────────

#[derive(Parser, Debug)]
#[command(name = "skylink-ground", about = "Ground-side MAVLink link supervisor")]
struct Cli {
    /// Path to configuration TOML file.
    #[arg(short, long, default_value = "skylink-ground.toml")]
    config: PathBuf,

    /// Write the default configuration to the config path and exit.
    #[arg(long)]
    gen_config: bool,

    /// Transport: "datagram" (udp) or "stream" (tcp).
    #[arg(long)]
    mode: Option<TransportMode>,

    /// Ground-side peer address.
    #[arg(long)]
    ground: Option<IpAddr>,

    /// Local UDP port to bind in datagram mode.
    #[arg(long)]
    local_port: Option<u16>,

    /// Print the parameter table as JSON each time a sync completes.
    #[arg(long)]
    json: bool,
}

// ── Main ─────────────────────────────────────────────────────────

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    let cli = Cli::parse();

    if cli.gen_config {
        GroundConfig::write_default(&cli.config)?;
        println!("wrote default config to {}", cli.config.display());
        return Ok(());
    }

    let mut config = GroundConfig::load(&cli.config);
    if let Some(mode) = cli.mode {
        config.link.mode = mode;
    }
    if let Some(ground) = cli.ground {
        config.link.ground_address = ground;
    }
    if let Some(port) = cli.local_port {
        config.link.local_port = port;
    }

    init_tracing(&config.logging)?;

    info!("skylink-ground v{}", env!("CARGO_PKG_VERSION"));
    info!("mode: {}", config.link.mode);
    info!("ground: {}", config.link.ground_addr());
    info!("tick: {} ms", config.link.tick_interval_ms);

    let supervisor = Supervisor::bind(config.link.clone()).await?;
    let mut events = BroadcastStream::new(supervisor.subscribe());
    let handle = supervisor.spawn();

    let ctrl_c = tokio::signal::ctrl_c();
    tokio::pin!(ctrl_c);

    loop {
        tokio::select! {
            _ = &mut ctrl_c => {
                info!("Ctrl-C received, shutting down");
                break;
            }
            event = events.next() => match event {
                Some(Ok(event)) => report(&event, cli.json),
                Some(Err(BroadcastStreamRecvError::Lagged(skipped))) => {
                    warn!("event stream lagged; {skipped} events skipped");
                }
                None => break,
            },
        }
    }

    handle.shutdown().await?;
    Ok(())
}

fn init_tracing(logging: &LoggingConfig) -> std::io::Result<()> {
    let filter =
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(&logging.level));

    if logging.file.is_empty() {
        tracing_subscriber::fmt().with_env_filter(filter).init();
    } else {
        let file = OpenOptions::new()
            .create(true)
            .append(true)
            .open(&logging.file)?;
        tracing_subscriber::fmt()
            .with_env_filter(filter)
            .with_ansi(false)
            .with_writer(Mutex::new(file))
            .init();
    }
    Ok(())
}

fn report(event: &LinkEvent, json: bool) {
    match event {
        LinkEvent::SetupComplete { mode, local_addr } => match local_addr {
            Some(addr) => info!("{mode} transport ready on {addr}"),
            None => info!("{mode} transport ready"),
        },
        LinkEvent::StateChanged { from, to } => info!("link: {from} -> {to}"),
        LinkEvent::LoadingChanged(loading) => debug!(loading, "loading changed"),
        LinkEvent::SavingChanged(saving) => debug!(saving, "saving changed"),
        LinkEvent::HeartbeatAge(Some(age)) => debug!("heartbeat age: {} ms", age.as_millis()),
        LinkEvent::HeartbeatAge(None) => debug!("no heartbeat yet"),
        LinkEvent::LinkLost(reason) => warn!("link lost: {reason}"),
        LinkEvent::ParametersChanged(params) => {
            info!("{} parameters synchronized", params.len());
            if json {
                match serde_json::to_string_pretty(&**params) {
                    Ok(text) => println!("{text}"),
                    Err(e) => warn!("failed to render parameters: {e}"),
                }
            }
        }
        LinkEvent::Message(frame) => trace!(
            system = frame.header.system_id,
            component = frame.header.component_id,
            sequence = frame.header.sequence,
            "frame received"
        ),
    }
}

//! UTTT-Over-LAN peer — entry point.
//!
//! Wires the discovery, arbitration, and session services together and runs
//! headless: it announces itself on the LAN while unconnected, collects the
//! announcements of others, and (with `--auto-accept`) upgrades the first
//! discovered peer into a game session.  A hosting façade embedding this
//! crate drives the same components through the library API instead.
//!
//! # Architecture
//!
//! ```text
//! main()
//!  └─ load AppConfig (TOML) + CLI overrides
//!  └─ start services
//!       ├─ stream accept loop     (Tokio task on the TCP listener)
//!       ├─ discovery listener     (UDP background thread)
//!       ├─ DiscoveryBroadcaster   (background thread while searching)
//!       └─ run_session_events     (Tokio task routing inbound messages)
//! ```
//!
//! # Usage
//!
//! ```text
//! uttt-peer [OPTIONS]
//!
//! Options:
//!   --identity <NAME>         Display name announced on the network
//!   --config <PATH>           Explicit config file path
//!   --discovery-port <PORT>   UDP discovery port [default: 24820]
//!   --broadcast-addr <ADDR>   Broadcast destination [default: 255.255.255.255]
//!   --listen-only             Collect requests without announcing
//!   --auto-accept             Accept the first discovered peer
//! ```
//!
//! CLI args take precedence over the config file; `RUST_LOG` overrides the
//! configured log level.

use std::net::{IpAddr, SocketAddr};
use std::path::PathBuf;
use std::sync::{
    atomic::{AtomicBool, Ordering},
    Arc,
};
use std::time::Duration;

use anyhow::Context;
use clap::Parser;
use tracing::{error, info, warn};
use tracing_subscriber::EnvFilter;

use uttt_peer::application::{run_session_events, PeerRegistry};
use uttt_peer::infrastructure::network::{
    discovery::start_discovery_listener, spawn_accept_loop, ConnectionArbiter,
    DiscoveryBroadcaster, PendingRequestRegistry, PeerSession,
};
use uttt_peer::infrastructure::storage::config::{load_config, load_config_from, AppConfig};

// ── CLI argument definitions ──────────────────────────────────────────────────

/// Serverless two-player Ultimate Tic-Tac-Toe peer for local networks.
#[derive(Debug, Parser)]
#[command(
    name = "uttt-peer",
    about = "Serverless two-player Ultimate Tic-Tac-Toe over the local network",
    version
)]
struct Cli {
    /// Display name announced on the network.
    #[arg(long, env = "UTTT_IDENTITY")]
    identity: Option<String>,

    /// Explicit config file path (defaults to the platform config dir).
    #[arg(long)]
    config: Option<PathBuf>,

    /// UDP port for discovery broadcasts.
    #[arg(long, env = "UTTT_DISCOVERY_PORT")]
    discovery_port: Option<u16>,

    /// Destination address for announcement broadcasts.
    #[arg(long, env = "UTTT_BROADCAST_ADDR")]
    broadcast_addr: Option<String>,

    /// Collect connection requests without broadcasting our own.
    #[arg(long, default_value_t = false)]
    listen_only: bool,

    /// Accept the first discovered peer automatically.
    #[arg(long, default_value_t = false)]
    auto_accept: bool,
}

impl Cli {
    /// Merges the CLI overrides into the loaded configuration.
    fn apply_to(self, config: &mut AppConfig) {
        if let Some(identity) = self.identity {
            config.peer.identity = identity;
        }
        if let Some(port) = self.discovery_port {
            config.network.discovery_port = port;
        }
        if let Some(addr) = self.broadcast_addr {
            config.network.broadcast_address = addr;
        }
    }
}

// ── Entry point ───────────────────────────────────────────────────────────────

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();
    let listen_only = cli.listen_only;
    let auto_accept = cli.auto_accept;

    let mut config = match &cli.config {
        Some(path) => load_config_from(path)
            .with_context(|| format!("failed to load config from {}", path.display()))?,
        None => load_config().unwrap_or_default(),
    };
    cli.apply_to(&mut config);

    // Structured logging; RUST_LOG wins over the configured level.
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| EnvFilter::new(config.peer.log_level.clone())),
        )
        .init();

    let identity = config.peer.identity.clone();
    info!(identity, "UTTT-Over-LAN peer starting");

    let bind_addr: IpAddr = config
        .network
        .bind_address
        .parse()
        .with_context(|| format!("invalid bind address '{}'", config.network.bind_address))?;
    let broadcast_dest: SocketAddr = format!(
        "{}:{}",
        config.network.broadcast_address, config.network.discovery_port
    )
    .parse()
    .with_context(|| {
        format!(
            "invalid broadcast address '{}'",
            config.network.broadcast_address
        )
    })?;

    // Shutdown flag shared across all background services.
    let running = Arc::new(AtomicBool::new(true));

    // ── Session + event routing ───────────────────────────────────────────────
    let (session, session_events) = PeerSession::new(identity.clone());
    let peers = Arc::new(PeerRegistry::new());
    tokio::spawn(run_session_events(
        Arc::clone(&peers),
        Arc::clone(&session),
        session_events,
    ));

    // ── Stream listener ───────────────────────────────────────────────────────
    let stream_listener = tokio::net::TcpListener::bind((bind_addr, 0))
        .await
        .context("failed to bind stream listener")?;
    let listen_port = stream_listener
        .local_addr()
        .context("failed to read stream listener address")?
        .port();
    info!(listen_port, "stream listener bound");
    spawn_accept_loop(stream_listener, Arc::clone(&session));

    // ── Discovery ─────────────────────────────────────────────────────────────
    let pending = Arc::new(PendingRequestRegistry::with_staleness(
        identity.clone(),
        Duration::from_secs(config.timing.stale_after_secs),
    ));

    match start_discovery_listener(
        bind_addr,
        config.network.discovery_port,
        Arc::clone(&pending),
        Arc::clone(&session),
        Arc::clone(&running),
    ) {
        Ok(_handle) => {}
        Err(e) => error!("failed to start discovery listener: {e}"),
    }

    let broadcaster = Arc::new(DiscoveryBroadcaster::new(
        listen_port,
        broadcast_dest,
        Duration::from_secs(config.timing.announce_interval_secs.max(1)),
        Arc::clone(&session),
    ));
    if listen_only {
        info!("listen-only mode: not broadcasting");
    } else {
        broadcaster.start();
    }

    let arbiter = ConnectionArbiter::new(
        Arc::clone(&pending),
        Arc::clone(&broadcaster),
        Arc::clone(&session),
    )
    .with_connect_timeout(Duration::from_secs(config.timing.connect_timeout_secs.max(1)));

    // ── Ctrl-C handler ────────────────────────────────────────────────────────
    let running_clone = Arc::clone(&running);
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            info!("shutdown signal received");
            running_clone.store(false, Ordering::Relaxed);
        }
    });

    info!("ready; press Ctrl-C to exit");

    // ── Main loop ─────────────────────────────────────────────────────────────
    while running.load(Ordering::Relaxed) {
        tokio::time::sleep(Duration::from_secs(2)).await;

        if let Some(status) = session.take_status() {
            info!(status, "session status");
        }

        if session.is_connected() {
            continue;
        }

        let requests = pending.list();
        if !requests.is_empty() {
            for request in &requests {
                info!(
                    identity = %request.identity,
                    address = %request.address,
                    port = request.listen_port,
                    strength = request.strength,
                    "pending connection request"
                );
            }

            if auto_accept {
                let first = &requests[0];
                match arbiter.accept(&first.identity).await {
                    Ok(()) => info!(identity = %first.identity, "connected"),
                    Err(e) => warn!("auto-accept failed: {e}"),
                }
            }
        }
    }

    // ── Graceful shutdown ─────────────────────────────────────────────────────
    broadcaster.stop();
    if let Some(remote) = session.remote_identity() {
        if let Some(entry) = peers.get(&remote) {
            entry.leave("Opponent left the game").await;
        }
    }

    info!("UTTT-Over-LAN peer stopped");
    Ok(())
}

// ── Tests ─────────────────────────────────────────────────────────────────────

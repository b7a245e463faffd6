//! UDP broadcast-based peer discovery.
//!
//! Discovery is symmetric: while unconnected, a peer may broadcast
//! announcements (making itself acceptable by others) and always listens
//! for the announcements of others.
//!
//! 1. The [`DiscoveryBroadcaster`] sends one [`Announcement`] per interval
//!    to the LAN broadcast address on the discovery port.  Every host on
//!    the segment receives it.
//! 2. The listener loop receives those datagrams, drops malformed and
//!    self-originated ones (and everything once a session is connected),
//!    and records the rest into the [`PendingRequestRegistry`].
//! 3. The arbiter later upgrades a recorded entry into a TCP session; the
//!    datagram's source address is authoritative for that connect, the
//!    announced address is informational.
//!
//! Both loops run as blocking threads with short socket timeouts so the
//! synchronous socket I/O never ties up the Tokio runtime and shutdown
//! flags are observed within one timeout tick.

use std::net::{IpAddr, Ipv4Addr, SocketAddr, UdpSocket};
use std::sync::{
    atomic::{AtomicBool, Ordering},
    Arc, Mutex,
};
use std::thread::{self, JoinHandle};
use std::time::Duration;

use thiserror::Error;
use tracing::{debug, error, info, warn};
use uttt_core::{decode_announcement, encode_announcement, Announcement, SequenceCounter};

use crate::infrastructure::network::pending::PendingRequestRegistry;
use crate::infrastructure::network::session::PeerSession;

/// Default interval between announcements while searching.
pub const DEFAULT_ANNOUNCE_INTERVAL: Duration = Duration::from_secs(1);

/// Consecutive send failures after which the broadcast loop gives up
/// instead of spinning.
const MAX_SEND_FAILURES: u32 = 5;

/// Granularity at which the broadcast loop re-checks its shutdown flag
/// while sleeping; bounds how long `stop()` blocks.
const SLEEP_STEP: Duration = Duration::from_millis(100);

/// Read timeout on the listener socket; bounds shutdown latency.
const LISTEN_READ_TIMEOUT: Duration = Duration::from_millis(500);

/// Error type for discovery operations.
#[derive(Debug, Error)]
pub enum DiscoveryError {
    /// The UDP socket could not be bound.
    #[error("failed to bind discovery socket on {addr}: {source}")]
    BindFailed {
        addr: SocketAddr,
        #[source]
        source: std::io::Error,
    },
}

// ── Broadcaster ───────────────────────────────────────────────────────────────

/// Periodically announces this peer's identity and listening endpoint to
/// the broadcast address until stopped or until a session connects.
pub struct DiscoveryBroadcaster {
    identity: String,
    advertised_addr: String,
    listen_port: u16,
    destination: SocketAddr,
    interval: Duration,
    session: Arc<PeerSession>,
    sequence: Arc<SequenceCounter>,
    running: Arc<AtomicBool>,
    worker: Mutex<Option<JoinHandle<()>>>,
}

impl DiscoveryBroadcaster {
    /// Creates a broadcaster announcing `identity` and `listen_port` to
    /// `destination` (broadcast address + discovery port).  The session is
    /// consulted each tick so announcements cease once connected.
    pub fn new(
        listen_port: u16,
        destination: SocketAddr,
        interval: Duration,
        session: Arc<PeerSession>,
    ) -> Self {
        Self {
            identity: session.local_identity().to_string(),
            advertised_addr: local_ip().to_string(),
            listen_port,
            destination,
            interval,
            session,
            sequence: Arc::new(SequenceCounter::new()),
            running: Arc::new(AtomicBool::new(false)),
            worker: Mutex::new(None),
        }
    }

    /// Starts the background broadcast loop.  Calling `start` while already
    /// broadcasting is a no-op.
    pub fn start(&self) {
        if self.running.swap(true, Ordering::SeqCst) {
            debug!("broadcast already running");
            return;
        }

        let mut slot = self.worker.lock().expect("broadcast worker poisoned");
        // A worker from a previous search may still sit in the slot; it has
        // already observed running == false and exited (or will within one
        // sleep step).
        if let Some(old) = slot.take() {
            let _ = old.join();
        }

        let identity = self.identity.clone();
        let advertised_addr = self.advertised_addr.clone();
        let listen_port = self.listen_port;
        let destination = self.destination;
        let interval = self.interval;
        let session = Arc::clone(&self.session);
        let sequence = Arc::clone(&self.sequence);
        let running = Arc::clone(&self.running);

        let handle = thread::Builder::new()
            .name("uttt-broadcast".to_string())
            .spawn(move || {
                broadcast_loop(
                    identity,
                    advertised_addr,
                    listen_port,
                    destination,
                    interval,
                    session,
                    sequence,
                    running,
                );
            })
            .expect("failed to spawn broadcast thread");
        *slot = Some(handle);
        info!(destination = %self.destination, "broadcasting connection requests");
    }

    /// Stops the broadcast loop and joins the worker.  Idempotent; on
    /// return no further announcements will be sent.  The wait is bounded
    /// by one sleep step plus one send.
    pub fn stop(&self) {
        self.running.store(false, Ordering::SeqCst);
        if let Some(handle) = self
            .worker
            .lock()
            .expect("broadcast worker poisoned")
            .take()
        {
            let _ = handle.join();
        }
    }

    pub fn is_broadcasting(&self) -> bool {
        self.running.load(Ordering::SeqCst)
    }
}

#[allow(clippy::too_many_arguments)]
fn broadcast_loop(
    identity: String,
    advertised_addr: String,
    listen_port: u16,
    destination: SocketAddr,
    interval: Duration,
    session: Arc<PeerSession>,
    sequence: Arc<SequenceCounter>,
    running: Arc<AtomicBool>,
) {
    let socket = match UdpSocket::bind((Ipv4Addr::UNSPECIFIED, 0)) {
        Ok(socket) => socket,
        Err(e) => {
            error!("failed to bind broadcast socket: {e}");
            running.store(false, Ordering::SeqCst);
            return;
        }
    };
    if let Err(e) = socket.set_broadcast(true) {
        error!("failed to enable SO_BROADCAST: {e}");
        running.store(false, Ordering::SeqCst);
        return;
    }

    let mut consecutive_failures: u32 = 0;

    while running.load(Ordering::SeqCst) {
        if session.is_connected() {
            info!("session connected; stopping announcements");
            break;
        }

        let announcement = Announcement {
            identity: identity.clone(),
            advertised_addr: advertised_addr.clone(),
            listen_port,
            sequence: sequence.next(),
        };

        match encode_announcement(&announcement) {
            Ok(datagram) => match socket.send_to(&datagram, destination) {
                Ok(_) => consecutive_failures = 0,
                Err(e) => {
                    consecutive_failures += 1;
                    warn!(
                        "announcement send failed ({consecutive_failures}/{MAX_SEND_FAILURES}): {e}"
                    );
                    if consecutive_failures >= MAX_SEND_FAILURES {
                        error!("persistent send failure; stopping broadcast");
                        break;
                    }
                }
            },
            Err(e) => {
                error!("failed to encode announcement: {e}");
                break;
            }
        }

        // Sleep in short steps so stop() observes a prompt exit.
        let mut slept = Duration::ZERO;
        while slept < interval && running.load(Ordering::SeqCst) {
            thread::sleep(SLEEP_STEP);
            slept += SLEEP_STEP;
        }
    }

    running.store(false, Ordering::SeqCst);
    info!("broadcast loop stopped");
}

// ── Listener ──────────────────────────────────────────────────────────────────

/// Binds the discovery port and spawns the background listener thread.
///
/// The loop receives announcement datagrams, drops malformed payloads,
/// self-originated ones, and all input once a session is connected, and
/// records everything else into `registry`.
///
/// # Errors
///
/// Returns [`DiscoveryError::BindFailed`] if the socket cannot be bound.
pub fn start_discovery_listener(
    bind_addr: IpAddr,
    discovery_port: u16,
    registry: Arc<PendingRequestRegistry>,
    session: Arc<PeerSession>,
    running: Arc<AtomicBool>,
) -> Result<JoinHandle<()>, DiscoveryError> {
    let addr = SocketAddr::new(bind_addr, discovery_port);
    let socket =
        UdpSocket::bind(addr).map_err(|source| DiscoveryError::BindFailed { addr, source })?;
    socket.set_read_timeout(Some(LISTEN_READ_TIMEOUT)).ok();

    let handle = thread::Builder::new()
        .name("uttt-discovery".to_string())
        .spawn(move || {
            listen_loop(socket, registry, session, running);
        })
        .expect("failed to spawn discovery thread");

    info!("listening for connection requests on UDP {addr}");
    Ok(handle)
}

fn listen_loop(
    socket: UdpSocket,
    registry: Arc<PendingRequestRegistry>,
    session: Arc<PeerSession>,
    running: Arc<AtomicBool>,
) {
    let local_identity = session.local_identity().to_string();
    let mut buf = vec![0u8; 2048];

    while running.load(Ordering::Relaxed) {
        let (len, src) = match socket.recv_from(&mut buf) {
            Ok(pair) => pair,
            Err(e) if is_timeout_error(&e) => continue,
            Err(e) => {
                error!("discovery recv error: {e}");
                continue;
            }
        };

        if session.is_connected() {
            // Already paired; new requests are not collected.
            continue;
        }

        match decode_announcement(&buf[..len]) {
            Ok(announcement) => {
                if announcement.identity == local_identity {
                    continue;
                }
                debug!(
                    identity = %announcement.identity,
                    %src,
                    sequence = announcement.sequence,
                    "announcement received"
                );
                registry.record(&announcement, src.ip());
            }
            Err(e) => {
                debug!("failed to decode discovery datagram from {src}: {e}");
            }
        }
    }

    info!("discovery listener stopped");
}

/// Returns `true` for OS timeout / would-block errors that should be retried.
fn is_timeout_error(e: &std::io::Error) -> bool {
    matches!(
        e.kind(),
        std::io::ErrorKind::WouldBlock | std::io::ErrorKind::TimedOut
    )
}

/// Best-effort guess of this host's LAN address, used for the informational
/// `advertised_addr` field.  Connecting a UDP socket sends no packets; it
/// only asks the OS which interface would route there.
pub fn local_ip() -> IpAddr {
    let fallback: IpAddr = Ipv4Addr::LOCALHOST.into();
    let Ok(socket) = UdpSocket::bind((Ipv4Addr::UNSPECIFIED, 0)) else {
        return fallback;
    };
    if socket.connect(("10.254.254.254", 1)).is_err() {
        return fallback;
    }
    socket.local_addr().map(|addr| addr.ip()).unwrap_or(fallback)
}

// ── Tests ─────────────────────────────────────────────────────────────────────

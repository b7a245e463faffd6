//! Connection arbitration: upgrading a pending discovery request into the
//! live peer session.
//!
//! Two paths lead into a session:
//!
//! - **Active** ([`ConnectionArbiter::accept`]): the user picks a pending
//!   request; we stop announcing, open an outbound TCP connection to the
//!   request's source address and advertised port within a bounded
//!   timeout, promote the stream, clear the registry, and send the
//!   `CONNECTION_ACCEPTED` handshake.
//! - **Passive** ([`spawn_accept_loop`]): our stream listener promotes the
//!   first inbound connection; while a session is active every further
//!   inbound attempt is dropped immediately.
//!
//! Simultaneous mutual accepts are an ordinary race: the first
//! transport-level connect to promote a session wins, and the losing
//! side's attempt surfaces as a plain [`ArbiterError::ConnectFailed`].

use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;

use thiserror::Error;
use tokio::net::{TcpListener, TcpStream};
use tokio::time::timeout;
use tracing::{debug, info, warn};
use uttt_core::PeerMessage;

use crate::infrastructure::network::discovery::DiscoveryBroadcaster;
use crate::infrastructure::network::pending::PendingRequestRegistry;
use crate::infrastructure::network::session::{PeerSession, SessionRole};

/// Default bound on the outbound connect attempt.
pub const DEFAULT_CONNECT_TIMEOUT: Duration = Duration::from_secs(5);

/// Error type for accept decisions.
#[derive(Debug, Error)]
pub enum ArbiterError {
    /// No live pending request exists for the identity.
    #[error("no pending request from '{identity}'")]
    NotFound { identity: String },
    /// The outbound connect or the handshake failed; the pending request
    /// is kept so the user can retry.
    #[error("failed to connect to '{identity}': {reason}")]
    ConnectFailed { identity: String, reason: String },
}

/// Accept/reject logic over the pending-request registry.
pub struct ConnectionArbiter {
    registry: Arc<PendingRequestRegistry>,
    broadcaster: Arc<DiscoveryBroadcaster>,
    session: Arc<PeerSession>,
    connect_timeout: Duration,
}

impl ConnectionArbiter {
    pub fn new(
        registry: Arc<PendingRequestRegistry>,
        broadcaster: Arc<DiscoveryBroadcaster>,
        session: Arc<PeerSession>,
    ) -> Self {
        Self {
            registry,
            broadcaster,
            session,
            connect_timeout: DEFAULT_CONNECT_TIMEOUT,
        }
    }

    /// Overrides the connect timeout (tests use a short one).
    pub fn with_connect_timeout(mut self, connect_timeout: Duration) -> Self {
        self.connect_timeout = connect_timeout;
        self
    }

    /// Accepts the pending request from `identity` and upgrades it to the
    /// live session.
    ///
    /// # Errors
    ///
    /// [`ArbiterError::NotFound`] when no live request exists for the
    /// identity (no I/O is performed).  [`ArbiterError::ConnectFailed`] on
    /// connect timeout or refusal, on losing a simultaneous-accept race,
    /// or when the handshake send fails; any partially opened socket is
    /// closed on the failure path.
    pub async fn accept(&self, identity: &str) -> Result<(), ArbiterError> {
        let entry = self
            .registry
            .get(identity)
            .ok_or_else(|| ArbiterError::NotFound {
                identity: identity.to_string(),
            })?;

        // No further announcements from this side; the caller has chosen.
        self.broadcaster.stop();

        let addr = SocketAddr::new(entry.address, entry.listen_port);
        info!(identity, %addr, "accepting connection request");

        let stream = match timeout(self.connect_timeout, TcpStream::connect(addr)).await {
            Ok(Ok(stream)) => stream,
            Ok(Err(e)) => {
                return Err(ArbiterError::ConnectFailed {
                    identity: identity.to_string(),
                    reason: e.to_string(),
                });
            }
            Err(_) => {
                return Err(ArbiterError::ConnectFailed {
                    identity: identity.to_string(),
                    reason: format!("connect timeout after {:?}", self.connect_timeout),
                });
            }
        };

        if let Err(e) = Arc::clone(&self.session)
            .attach(stream, Some(identity.to_string()), SessionRole::Acceptor)
            .await
        {
            // Lost the mutual-accept race: an inbound connection was
            // promoted first.  The freshly opened stream is dropped.
            return Err(ArbiterError::ConnectFailed {
                identity: identity.to_string(),
                reason: e.to_string(),
            });
        }

        self.registry.clear();

        let handshake = PeerMessage::ConnectionAccepted {
            identity: self.session.local_identity().to_string(),
        };
        if let Err(e) = self.session.send(&handshake).await {
            return Err(ArbiterError::ConnectFailed {
                identity: identity.to_string(),
                reason: format!("handshake failed: {e}"),
            });
        }

        Ok(())
    }

    /// Rejects the pending request from `identity`: purges the entry, no
    /// I/O, always succeeds (an absent entry is a no-op).
    pub fn reject(&self, identity: &str) {
        debug!(identity, "rejecting connection request");
        self.registry.remove(identity);
    }
}

/// Spawns the passive accept loop on `listener`.
///
/// The first inbound connection while unconnected is promoted to the peer
/// session with role [`SessionRole::Listener`]; everything else is dropped
/// immediately, enforcing at most one active session.
pub fn spawn_accept_loop(
    listener: TcpListener,
    session: Arc<PeerSession>,
) -> tokio::task::JoinHandle<()> {
    tokio::spawn(async move {
        loop {
            match listener.accept().await {
                Ok((stream, addr)) => {
                    if session.is_connected() {
                        debug!(%addr, "refusing inbound connection: already connected");
                        continue;
                    }
                    match Arc::clone(&session).attach(stream, None, SessionRole::Listener).await {
                        Ok(()) => info!(%addr, "inbound connection promoted to session"),
                        // A racing attach won between the check and here.
                        Err(e) => debug!(%addr, "inbound connection refused: {e}"),
                    }
                }
                Err(e) => {
                    warn!("accept error: {e}");
                    tokio::time::sleep(Duration::from_millis(100)).await;
                }
            }
        }
    })
}

// ── Tests ─────────────────────────────────────────────────────────────────────

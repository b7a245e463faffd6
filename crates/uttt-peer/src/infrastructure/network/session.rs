//! The established peer session: one reliable TCP channel between exactly
//! two participants.
//!
//! Architecture:
//! - [`PeerSession`] owns the write half of the stream behind an async
//!   mutex; a spawned read loop owns the read half.
//! - Inbound frames are decoded one at a time and dispatched by message
//!   type: `CONNECTION_ACCEPTED` and `DISCONNECT` are handled by the
//!   session itself; everything else is forwarded on an `mpsc` channel to
//!   the application layer.
//! - Channel loss surfaces in two ways: a [`SessionEvent::Disconnected`]
//!   event for the consumer task, and a one-shot status string readable via
//!   [`PeerSession::take_status`] for a polling façade.
//!
//! A caller thread and the read loop can race on the connected flag and the
//! status slot, so both live behind atomics/mutexes; the first
//! [`disconnect`](PeerSession::disconnect) wins and later calls are no-ops.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};

use thiserror::Error;
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::tcp::{OwnedReadHalf, OwnedWriteHalf};
use tokio::net::TcpStream;
use tokio::sync::{mpsc, Mutex as AsyncMutex};
use tracing::{debug, info, warn};
use uttt_core::{
    decode_payload, encode_frame, parse_frame_header, PeerMessage, ProtocolError,
    FRAME_HEADER_SIZE,
};

/// Errors surfaced to callers of the session's send path.
#[derive(Debug, Error)]
pub enum SessionError {
    /// No peer is connected.
    #[error("no peer connected")]
    NotConnected,
    /// An attach was attempted while a session is already active.
    #[error("a peer session is already connected")]
    AlreadyConnected,
    /// A message could not be encoded.
    #[error("protocol error: {0}")]
    Protocol(#[from] ProtocolError),
    /// The write failed; the session has transitioned to disconnected.
    #[error("write failed: {0}")]
    Io(#[from] std::io::Error),
}

/// Which side of the connection upgrade this endpoint played.
///
/// The role decides the first mover: the accepting side opens the game.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SessionRole {
    /// This endpoint looked up a pending request and connected out.
    Acceptor,
    /// This endpoint's stream listener received the connection.
    Listener,
}

/// Events delivered to the application layer's consumer task.
#[derive(Debug)]
pub enum SessionEvent {
    /// The remote identity became known (at attach for the acceptor, on
    /// receipt of `CONNECTION_ACCEPTED` for the listener).
    Connected { identity: String },
    /// An application message arrived (MOVE, PLAYER_READY, GAME_START).
    Message(PeerMessage),
    /// The channel was lost or closed; emitted exactly once per session.
    Disconnected { reason: String },
}

/// One endpoint's half of the reliable channel.
pub struct PeerSession {
    local_identity: String,
    connected: AtomicBool,
    remote_identity: Mutex<Option<String>>,
    role: Mutex<Option<SessionRole>>,
    status: Mutex<Option<String>>,
    write_half: AsyncMutex<Option<OwnedWriteHalf>>,
    event_tx: mpsc::Sender<SessionEvent>,
}

impl PeerSession {
    /// Creates a new, unconnected session and the receiver its events are
    /// delivered on.
    pub fn new(local_identity: impl Into<String>) -> (Arc<Self>, mpsc::Receiver<SessionEvent>) {
        let (event_tx, event_rx) = mpsc::channel(128);
        let session = Arc::new(Self {
            local_identity: local_identity.into(),
            connected: AtomicBool::new(false),
            remote_identity: Mutex::new(None),
            role: Mutex::new(None),
            status: Mutex::new(None),
            write_half: AsyncMutex::new(None),
            event_tx,
        });
        (session, event_rx)
    }

    pub fn local_identity(&self) -> &str {
        &self.local_identity
    }

    pub fn is_connected(&self) -> bool {
        self.connected.load(Ordering::Acquire)
    }

    /// The remote peer's identity, once known.
    pub fn remote_identity(&self) -> Option<String> {
        self.remote_identity
            .lock()
            .expect("remote identity poisoned")
            .clone()
    }

    /// This endpoint's side of the connection upgrade.
    pub fn role(&self) -> Option<SessionRole> {
        *self.role.lock().expect("role poisoned")
    }

    /// Promotes `stream` to the active session and spawns its read loop.
    ///
    /// `remote_identity` is passed by the acceptor (it knows the peer from
    /// the pending request); the listener passes `None` and learns it from
    /// the `CONNECTION_ACCEPTED` handshake.
    ///
    /// # Errors
    ///
    /// [`SessionError::AlreadyConnected`] when a session is active; the
    /// stream is dropped (at most one active session per endpoint).
    pub async fn attach(
        self: Arc<Self>,
        stream: TcpStream,
        remote_identity: Option<String>,
        role: SessionRole,
    ) -> Result<(), SessionError> {
        if self
            .connected
            .compare_exchange(false, true, Ordering::AcqRel, Ordering::Acquire)
            .is_err()
        {
            return Err(SessionError::AlreadyConnected);
        }

        let peer_addr = stream.peer_addr().ok();
        let (read_half, write_half) = stream.into_split();
        *self.write_half.lock().await = Some(write_half);
        *self.role.lock().expect("role poisoned") = Some(role);

        info!(?role, ?peer_addr, "peer session connected");

        if let Some(identity) = remote_identity {
            *self
                .remote_identity
                .lock()
                .expect("remote identity poisoned") = Some(identity.clone());
            let _ = self.event_tx.send(SessionEvent::Connected { identity }).await;
        }

        let session = Arc::clone(&self);
        tokio::spawn(async move {
            session.read_loop(read_half).await;
        });
        Ok(())
    }

    /// Serializes and writes one message.
    ///
    /// # Errors
    ///
    /// [`SessionError::NotConnected`] when no peer is attached.  On a write
    /// failure the session transitions to disconnected (recording the
    /// reason) and the error is returned.
    pub async fn send(&self, msg: &PeerMessage) -> Result<(), SessionError> {
        if !self.is_connected() {
            return Err(SessionError::NotConnected);
        }
        let frame = encode_frame(msg)?;

        let mut guard = self.write_half.lock().await;
        let writer = guard.as_mut().ok_or(SessionError::NotConnected)?;
        match writer.write_all(&frame).await {
            Ok(()) => {
                debug!(kind = msg.kind(), "sent message");
                Ok(())
            }
            Err(e) => {
                // The disconnect path re-acquires the write lock.
                drop(guard);
                self.disconnect(&format!("send failed: {e}")).await;
                Err(SessionError::Io(e))
            }
        }
    }

    /// Tears the session down.  Idempotent: only the first call closes the
    /// channel, clears the remote identity, records the one-shot status,
    /// and emits the `Disconnected` event; later calls are no-ops.
    pub async fn disconnect(&self, reason: &str) {
        if !self.connected.swap(false, Ordering::AcqRel) {
            return;
        }

        if let Some(mut writer) = self.write_half.lock().await.take() {
            let _ = writer.shutdown().await;
        }
        self.remote_identity
            .lock()
            .expect("remote identity poisoned")
            .take();
        *self.status.lock().expect("status poisoned") = Some(reason.to_string());

        info!(reason, "peer session disconnected");
        let _ = self
            .event_tx
            .send(SessionEvent::Disconnected {
                reason: reason.to_string(),
            })
            .await;
    }

    /// Returns and clears the last recorded status.  A second immediate
    /// call observes no status.
    pub fn take_status(&self) -> Option<String> {
        self.status.lock().expect("status poisoned").take()
    }

    /// Receives frames until the channel is lost, dispatching each message
    /// by type.  Malformed payloads are logged and dropped; framing-level
    /// failures and EOF tear the session down.
    async fn read_loop(self: Arc<Self>, mut reader: OwnedReadHalf) {
        let reason = loop {
            let mut header = [0u8; FRAME_HEADER_SIZE];
            if let Err(e) = reader.read_exact(&mut header).await {
                break read_error_reason(&e);
            }

            let payload_len = match parse_frame_header(&header) {
                Ok(len) => len,
                Err(e) => break format!("framing error: {e}"),
            };

            let mut payload = vec![0u8; payload_len];
            if let Err(e) = reader.read_exact(&mut payload).await {
                break read_error_reason(&e);
            }

            match decode_payload(&payload) {
                Ok(PeerMessage::ConnectionAccepted { identity }) => {
                    self.handle_connection_accepted(identity).await;
                }
                Ok(PeerMessage::Disconnect { message }) => {
                    info!(message, "peer requested disconnect");
                    self.disconnect(&message).await;
                    return;
                }
                Ok(msg) => {
                    let _ = self.event_tx.send(SessionEvent::Message(msg)).await;
                }
                Err(e) => {
                    // Payload-level failure: the frame boundary held, so
                    // the channel stays open.
                    warn!(error = %e, "dropping malformed message");
                }
            }
        };

        self.disconnect(&reason).await;
    }

    async fn handle_connection_accepted(&self, identity: String) {
        let newly_known = {
            let mut guard = self
                .remote_identity
                .lock()
                .expect("remote identity poisoned");
            if guard.is_none() {
                *guard = Some(identity.clone());
                true
            } else {
                debug!(identity, "redundant CONNECTION_ACCEPTED");
                false
            }
        };
        if newly_known {
            info!(identity, "connection accepted by peer");
            let _ = self
                .event_tx
                .send(SessionEvent::Connected { identity })
                .await;
        }
    }
}

/// Maps a read-side I/O error to the recorded disconnect reason.
fn read_error_reason(e: &std::io::Error) -> String {
    match e.kind() {
        std::io::ErrorKind::UnexpectedEof => "connection closed by peer".to_string(),
        std::io::ErrorKind::ConnectionReset => "connection reset by peer".to_string(),
        _ => format!("read error: {e}"),
    }
}

// ── Tests ─────────────────────────────────────────────────────────────────────

#[cfg(test)]
mod tests {
    use super::*;
    use tokio::net::TcpListener;

    /// Returns a connected loopback socket pair.
    async fn socket_pair() -> (TcpStream, TcpStream) {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        let client = TcpStream::connect(addr).await.unwrap();
        let (server, _) = listener.accept().await.unwrap();
        (client, server)
    }

    #[test]
    fn test_new_session_is_unconnected() {
        let (session, _rx) = PeerSession::new("alice");
        assert!(!session.is_connected());
        assert!(session.remote_identity().is_none());
        assert!(session.role().is_none());
        assert!(session.take_status().is_none());
    }

    #[tokio::test]
    async fn test_send_without_connection_fails() {
        let (session, _rx) = PeerSession::new("alice");
        let result = session
            .send(&PeerMessage::PlayerReady {
                identity: "alice".to_string(),
            })
            .await;
        assert!(matches!(result, Err(SessionError::NotConnected)));
    }

    #[tokio::test]
    async fn test_attach_marks_connected_and_stores_identity() {
        let (session, mut rx) = PeerSession::new("alice");
        let (client, _server) = socket_pair().await;

        Arc::clone(&session)
            .attach(client, Some("bob".to_string()), SessionRole::Acceptor)
            .await
            .unwrap();

        assert!(session.is_connected());
        assert_eq!(session.remote_identity().as_deref(), Some("bob"));
        assert_eq!(session.role(), Some(SessionRole::Acceptor));

        match rx.recv().await {
            Some(SessionEvent::Connected { identity }) => assert_eq!(identity, "bob"),
            other => panic!("expected Connected event, got {other:?}"),
        }
    }

    #[tokio::test]
    async fn test_second_attach_is_refused() {
        let (session, _rx) = PeerSession::new("alice");
        let (client, _server) = socket_pair().await;
        let (extra, _server2) = socket_pair().await;

        Arc::clone(&session)
            .attach(client, Some("bob".to_string()), SessionRole::Acceptor)
            .await
            .unwrap();
        let result = Arc::clone(&session).attach(extra, None, SessionRole::Listener).await;
        assert!(matches!(result, Err(SessionError::AlreadyConnected)));
    }

    #[tokio::test]
    async fn test_status_is_read_once() {
        let (session, _rx) = PeerSession::new("alice");
        let (client, _server) = socket_pair().await;
        Arc::clone(&session)
            .attach(client, Some("bob".to_string()), SessionRole::Acceptor)
            .await
            .unwrap();

        session.disconnect("Opponent left the game").await;

        assert_eq!(
            session.take_status().as_deref(),
            Some("Opponent left the game")
        );
        assert!(
            session.take_status().is_none(),
            "a second immediate call must observe no status"
        );
    }

    #[tokio::test]
    async fn test_disconnect_is_idempotent() {
        let (session, _rx) = PeerSession::new("alice");
        let (client, _server) = socket_pair().await;
        Arc::clone(&session)
            .attach(client, Some("bob".to_string()), SessionRole::Acceptor)
            .await
            .unwrap();

        session.disconnect("first reason").await;
        session.disconnect("second reason").await;

        assert!(!session.is_connected());
        assert!(session.remote_identity().is_none());
        assert_eq!(
            session.take_status().as_deref(),
            Some("first reason"),
            "only the first disconnect records a status"
        );
    }

    #[tokio::test]
    async fn test_peer_eof_surfaces_as_disconnect() {
        let (session, mut rx) = PeerSession::new("alice");
        let (client, server) = socket_pair().await;
        Arc::clone(&session)
            .attach(client, Some("bob".to_string()), SessionRole::Acceptor)
            .await
            .unwrap();
        // Consume the attach-time Connected event.
        let _ = rx.recv().await;

        drop(server);

        match rx.recv().await {
            Some(SessionEvent::Disconnected { reason }) => {
                assert_eq!(reason, "connection closed by peer");
            }
            other => panic!("expected Disconnected event, got {other:?}"),
        }
        assert!(!session.is_connected());
        assert_eq!(
            session.take_status().as_deref(),
            Some("connection closed by peer")
        );
    }

    #[tokio::test]
    async fn test_malformed_payload_does_not_close_the_channel() {
        let (session, mut rx) = PeerSession::new("alice");
        let (client, mut server) = socket_pair().await;
        Arc::clone(&session)
            .attach(client, Some("bob".to_string()), SessionRole::Acceptor)
            .await
            .unwrap();
        let _ = rx.recv().await; // Connected

        // A well-framed record whose payload is garbage: dropped, channel open.
        let mut bad_frame = vec![uttt_core::PROTOCOL_VERSION];
        bad_frame.extend_from_slice(&4u32.to_be_bytes());
        bad_frame.extend_from_slice(&[0xFF, 0xFF, 0xFF, 0xFF]);
        server.write_all(&bad_frame).await.unwrap();

        // A valid message afterwards still arrives.
        let frame = encode_frame(&PeerMessage::PlayerReady {
            identity: "bob".to_string(),
        })
        .unwrap();
        server.write_all(&frame).await.unwrap();

        match rx.recv().await {
            Some(SessionEvent::Message(PeerMessage::PlayerReady { identity })) => {
                assert_eq!(identity, "bob");
            }
            other => panic!("expected PlayerReady after the dropped frame, got {other:?}"),
        }
        assert!(session.is_connected());
    }

    #[tokio::test]
    async fn test_framing_error_closes_the_channel() {
        let (session, mut rx) = PeerSession::new("alice");
        let (client, mut server) = socket_pair().await;
        Arc::clone(&session)
            .attach(client, Some("bob".to_string()), SessionRole::Acceptor)
            .await
            .unwrap();
        let _ = rx.recv().await; // Connected

        // Unknown version byte: the reader cannot resync.
        server.write_all(&[0x7F, 0, 0, 0, 1, 0]).await.unwrap();

        match rx.recv().await {
            Some(SessionEvent::Disconnected { reason }) => {
                assert!(reason.contains("framing error"), "reason: {reason}");
            }
            other => panic!("expected Disconnected event, got {other:?}"),
        }
        assert!(!session.is_connected());
    }

    #[tokio::test]
    async fn test_inbound_disconnect_message_records_carried_reason() {
        let (session, mut rx) = PeerSession::new("alice");
        let (client, mut server) = socket_pair().await;
        Arc::clone(&session)
            .attach(client, Some("bob".to_string()), SessionRole::Acceptor)
            .await
            .unwrap();
        let _ = rx.recv().await; // Connected

        let frame = encode_frame(&PeerMessage::Disconnect {
            message: "Opponent left the game".to_string(),
        })
        .unwrap();
        server.write_all(&frame).await.unwrap();

        match rx.recv().await {
            Some(SessionEvent::Disconnected { reason }) => {
                assert_eq!(reason, "Opponent left the game");
            }
            other => panic!("expected Disconnected event, got {other:?}"),
        }
        assert_eq!(
            session.take_status().as_deref(),
            Some("Opponent left the game")
        );
    }

    #[tokio::test]
    async fn test_listener_learns_identity_from_handshake() {
        let (session, mut rx) = PeerSession::new("alice");
        let (client, mut server) = socket_pair().await;
        Arc::clone(&session)
            .attach(client, None, SessionRole::Listener)
            .await
            .unwrap();
        assert!(session.remote_identity().is_none());

        let frame = encode_frame(&PeerMessage::ConnectionAccepted {
            identity: "bob".to_string(),
        })
        .unwrap();
        server.write_all(&frame).await.unwrap();

        match rx.recv().await {
            Some(SessionEvent::Connected { identity }) => assert_eq!(identity, "bob"),
            other => panic!("expected Connected event, got {other:?}"),
        }
        assert_eq!(session.remote_identity().as_deref(), Some("bob"));
    }
}

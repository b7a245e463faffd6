//! Mutual-readiness handshake gating game start.
//!
//! Each side keeps a local-ready flag (set by its own user) and a
//! remote-ready flag (set only on receipt of `PLAYER_READY`).  The first
//! transition of their AND to true emits exactly one `GAME_START` message
//! and reports the first mover to the caller so the engine can be started.
//!
//! # First-mover rule
//!
//! The accepting side always moves first.  Both endpoints hold the session
//! role locally, so both derive the same `first_player` identity without a
//! coordinator; the emitted `GAME_START` carries it redundantly so a side
//! whose ready-AND completes late can start from the message instead.
//!
//! The flags are written by a caller thread (`mark_ready`) and by the
//! session's receive path (`on_remote_ready`), so they live behind a mutex.

use std::sync::{Arc, Mutex};

use tracing::{info, warn};
use uttt_core::PeerMessage;

use crate::infrastructure::network::session::{PeerSession, SessionRole};

#[derive(Debug, Default)]
struct ReadyFlags {
    local_ready: bool,
    remote_ready: bool,
    start_sent: bool,
}

/// Readiness state for one peer session.
pub struct ReadySync {
    session: Arc<PeerSession>,
    flags: Mutex<ReadyFlags>,
}

impl ReadySync {
    pub fn new(session: Arc<PeerSession>) -> Self {
        Self {
            session,
            flags: Mutex::new(ReadyFlags::default()),
        }
    }

    /// Marks the local side ready and, while connected, notifies the peer
    /// with `PLAYER_READY`.
    ///
    /// Returns the first mover's identity when this call completed the
    /// both-ready transition.
    pub async fn mark_ready(&self) -> Option<String> {
        self.flags.lock().expect("ready flags poisoned").local_ready = true;

        if self.session.is_connected() {
            let msg = PeerMessage::PlayerReady {
                identity: self.session.local_identity().to_string(),
            };
            if let Err(e) = self.session.send(&msg).await {
                warn!("failed to send PLAYER_READY: {e}");
            }
        }

        self.maybe_emit_start().await
    }

    /// Records the remote side's `PLAYER_READY`.
    ///
    /// Returns the first mover's identity when this call completed the
    /// both-ready transition.
    pub async fn on_remote_ready(&self) -> Option<String> {
        self.flags.lock().expect("ready flags poisoned").remote_ready = true;
        self.maybe_emit_start().await
    }

    /// Whether both sides have signalled readiness.
    pub fn both_ready(&self) -> bool {
        let flags = self.flags.lock().expect("ready flags poisoned");
        flags.local_ready && flags.remote_ready
    }

    /// Emits `GAME_START` exactly once, on the first observation of the
    /// both-ready AND.  Requires a connected session: the role and remote
    /// identity that define the first mover are only known then.
    async fn maybe_emit_start(&self) -> Option<String> {
        if !self.session.is_connected() {
            return None;
        }
        let role = self.session.role()?;
        let remote = self.session.remote_identity()?;

        {
            let mut flags = self.flags.lock().expect("ready flags poisoned");
            if !(flags.local_ready && flags.remote_ready) || flags.start_sent {
                return None;
            }
            flags.start_sent = true;
        }

        let first_player = match role {
            SessionRole::Acceptor => self.session.local_identity().to_string(),
            SessionRole::Listener => remote,
        };

        let msg = PeerMessage::GameStart {
            first_player: first_player.clone(),
        };
        if let Err(e) = self.session.send(&msg).await {
            warn!("failed to send GAME_START: {e}");
        }
        info!(first_player, "both players ready");
        Some(first_player)
    }
}

// ── Tests ─────────────────────────────────────────────────────────────────────

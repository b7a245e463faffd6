//! Per-identity peer registry: one `{engine, ready, session}` triple per
//! remote identity, each entry independently synchronized.
//!
//! The hosting façade holds this registry and is the sole caller of the
//! entry operations; [`run_session_events`] is the routing contract that
//! feeds inbound session events into the matching triple.

use std::collections::HashMap;
use std::sync::{Arc, Mutex};

use thiserror::Error;
use tokio::sync::mpsc;
use tracing::{debug, info, warn};
use uttt_core::{
    ActiveBoard, GameEngine, GameOutcome, GamePhase, MoveError, MoveMessage, MoveOutcome,
    PeerMessage,
};

use crate::application::ready_sync::ReadySync;
use crate::infrastructure::network::session::{PeerSession, SessionError, SessionEvent};

/// Why a local move could not be played.
#[derive(Debug, Error)]
pub enum PlayError {
    /// The rules engine rejected the move; nothing was sent.
    #[error(transparent)]
    Rules(#[from] MoveError),
    /// The move applied locally but the MOVE message could not be sent;
    /// the session has transitioned to disconnected.
    #[error(transparent)]
    Session(#[from] SessionError),
}

/// One remote identity's game engine, readiness state, and session handle.
pub struct PeerEntry {
    identity: String,
    session: Arc<PeerSession>,
    engine: Mutex<GameEngine>,
    ready: ReadySync,
}

impl PeerEntry {
    fn new(identity: String, session: Arc<PeerSession>) -> Arc<Self> {
        let ready = ReadySync::new(Arc::clone(&session));
        Arc::new(Self {
            identity,
            session,
            engine: Mutex::new(GameEngine::new()),
            ready,
        })
    }

    /// The remote identity this entry belongs to.
    pub fn identity(&self) -> &str {
        &self.identity
    }

    pub fn session(&self) -> &Arc<PeerSession> {
        &self.session
    }

    /// Marks the local player ready, notifies the peer, and starts the
    /// engine when this completed the both-ready transition.  Returns
    /// whether both sides are now ready.
    pub async fn mark_ready(&self) -> bool {
        if let Some(first_player) = self.ready.mark_ready().await {
            self.start_engine(&first_player);
        }
        self.ready.both_ready()
    }

    /// Routes an inbound `PLAYER_READY`.
    pub async fn handle_remote_ready(&self) {
        if let Some(first_player) = self.ready.on_remote_ready().await {
            self.start_engine(&first_player);
        }
    }

    /// Routes an inbound `GAME_START`.  Idempotent: a side that already
    /// started from its own ready transition ignores the message.
    pub fn handle_game_start(&self, first_player: &str) {
        self.start_engine(first_player);
    }

    fn start_engine(&self, first_player: &str) {
        let mut engine = self.engine.lock().expect("engine poisoned");
        if engine.phase() == GamePhase::NotStarted {
            let is_first = first_player == self.session.local_identity();
            engine.start(is_first);
            info!(first_player, is_first, "game started");
        }
    }

    /// Applies a local move and mirrors it to the peer.
    ///
    /// # Errors
    ///
    /// [`PlayError::Rules`] on a rule violation (no I/O performed);
    /// [`PlayError::Session`] when the MOVE message could not be sent.
    pub async fn play(
        &self,
        main_row: usize,
        main_col: usize,
        sub_row: usize,
        sub_col: usize,
    ) -> Result<MoveOutcome, PlayError> {
        let outcome = self
            .engine
            .lock()
            .expect("engine poisoned")
            .apply_local_move(main_row, main_col, sub_row, sub_col)?;

        let msg = PeerMessage::Move(MoveMessage {
            main_row: main_row as u8,
            main_col: main_col as u8,
            sub_row: sub_row as u8,
            sub_col: sub_col as u8,
            sub_board_result: outcome.sub_board_result,
            game_over: outcome.game_over,
            winner: outcome.winner,
            is_draw: outcome.is_draw,
        });
        self.session.send(&msg).await?;
        Ok(outcome)
    }

    /// Routes an inbound MOVE into the engine.
    pub fn handle_remote_move(&self, msg: &MoveMessage) {
        let result = self.engine.lock().expect("engine poisoned").apply_remote_move(
            msg.main_row as usize,
            msg.main_col as usize,
            msg.sub_row as usize,
            msg.sub_col as usize,
        );
        match result {
            Ok(outcome) => {
                // The mirror fields come from the sender's engine; a
                // mismatch means the two copies have diverged.
                if outcome.game_over != msg.game_over
                    || outcome.sub_board_result != msg.sub_board_result
                {
                    warn!(
                        identity = %self.identity,
                        "engine outcome disagrees with peer's reported outcome"
                    );
                }
            }
            Err(e) => warn!(identity = %self.identity, "remote move rejected: {e}"),
        }
    }

    /// Announces departure to the peer (best effort) and closes the session.
    pub async fn leave(&self, message: &str) {
        if self.session.is_connected() {
            let _ = self
                .session
                .send(&PeerMessage::Disconnect {
                    message: message.to_string(),
                })
                .await;
        }
        self.session.disconnect("You left the game").await;
    }

    // ── Accessors for the polling façade ─────────────────────────────────────

    pub fn both_ready(&self) -> bool {
        self.ready.both_ready()
    }

    pub fn is_my_turn(&self) -> bool {
        self.engine.lock().expect("engine poisoned").is_my_turn()
    }

    pub fn outcome(&self) -> Option<GameOutcome> {
        self.engine.lock().expect("engine poisoned").outcome()
    }

    pub fn active_board(&self) -> ActiveBoard {
        self.engine.lock().expect("engine poisoned").active_board()
    }

    pub fn phase(&self) -> GamePhase {
        self.engine.lock().expect("engine poisoned").phase()
    }

    pub fn my_mark(&self) -> Option<uttt_core::Mark> {
        self.engine.lock().expect("engine poisoned").my_mark()
    }
}

/// Registry of per-identity triples.
#[derive(Default)]
pub struct PeerRegistry {
    entries: Mutex<HashMap<String, Arc<PeerEntry>>>,
}

impl PeerRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Creates (or replaces) the triple for `identity`.
    pub fn insert(&self, identity: &str, session: Arc<PeerSession>) -> Arc<PeerEntry> {
        let entry = PeerEntry::new(identity.to_string(), session);
        self.entries
            .lock()
            .expect("peer registry poisoned")
            .insert(identity.to_string(), Arc::clone(&entry));
        entry
    }

    pub fn get(&self, identity: &str) -> Option<Arc<PeerEntry>> {
        self.entries
            .lock()
            .expect("peer registry poisoned")
            .get(identity)
            .cloned()
    }

    pub fn remove(&self, identity: &str) -> Option<Arc<PeerEntry>> {
        self.entries
            .lock()
            .expect("peer registry poisoned")
            .remove(identity)
    }

    pub fn is_empty(&self) -> bool {
        self.entries
            .lock()
            .expect("peer registry poisoned")
            .is_empty()
    }
}

/// Consumes one session's event stream and routes it into the registry:
/// `Connected` creates the triple, application messages go to the matching
/// entry, `Disconnected` removes it.
///
/// Runs until the session (and with it the event sender) is dropped.
pub async fn run_session_events(
    registry: Arc<PeerRegistry>,
    session: Arc<PeerSession>,
    mut events: mpsc::Receiver<SessionEvent>,
) {
    // The session clears its remote identity on disconnect, so the pump
    // remembers which entry it is serving.
    let mut current: Option<String> = None;

    while let Some(event) = events.recv().await {
        match event {
            SessionEvent::Connected { identity } => {
                info!(identity, "peer connected");
                registry.insert(&identity, Arc::clone(&session));
                current = Some(identity);
            }
            SessionEvent::Message(msg) => {
                let Some(identity) = current.as_deref() else {
                    warn!(kind = msg.kind(), "message before handshake; dropped");
                    continue;
                };
                let Some(entry) = registry.get(identity) else {
                    warn!(identity, kind = msg.kind(), "no entry for identity; dropped");
                    continue;
                };
                match msg {
                    PeerMessage::PlayerReady { .. } => entry.handle_remote_ready().await,
                    PeerMessage::GameStart { first_player } => {
                        entry.handle_game_start(&first_player);
                    }
                    PeerMessage::Move(m) => entry.handle_remote_move(&m),
                    other => debug!(kind = other.kind(), "unexpected message; dropped"),
                }
            }
            SessionEvent::Disconnected { reason } => {
                info!(reason, "peer session ended");
                if let Some(identity) = current.take() {
                    registry.remove(&identity);
                }
            }
        }
    }
}

// ── Tests ─────────────────────────────────────────────────────────────────────

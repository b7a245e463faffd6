//! All UTTT-Over-LAN protocol message types.
//!
//! Two kinds of record cross the network:
//!
//! - [`Announcement`] – the UDP discovery datagram a searching peer
//!   broadcasts once per interval.
//! - [`PeerMessage`] – every message exchanged on the established TCP
//!   session.  The enum variant acts as the `type` discriminator on the
//!   wire; payloads are plain data structs, so decoding can never execute
//!   code.

use crate::game::board::{Mark, SubOutcome};
use serde::{Deserialize, Serialize};

// ── Protocol constants ────────────────────────────────────────────────────────

/// Current protocol version byte, carried in front of every frame and
/// every discovery datagram.
pub const PROTOCOL_VERSION: u8 = 0x01;

// ── Discovery datagram ────────────────────────────────────────────────────────

/// Broadcast packet advertising availability for connection.
///
/// The receive address of the datagram is authoritative for contacting the
/// sender; `advertised_addr` is informational (the sender's own view of its
/// LAN address, useful for logs and UIs).
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Announcement {
    /// Display name uniquely identifying the sender for the session's duration.
    pub identity: String,
    /// The sender's own view of its reachable address.
    pub advertised_addr: String,
    /// TCP port the sender's stream listener is bound to.
    pub listen_port: u16,
    /// Monotonically increasing counter, one per broadcast tick.
    pub sequence: u64,
}

// ── Stream messages ───────────────────────────────────────────────────────────

/// A single move into the nested board, plus the sender's locally computed
/// outcome.  The outcome fields mirror what the receiver will compute and
/// are informational.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct MoveMessage {
    /// Row of the targeted sub-board in the outer 3×3 grid.
    pub main_row: u8,
    /// Column of the targeted sub-board in the outer 3×3 grid.
    pub main_col: u8,
    /// Row of the targeted cell inside the sub-board.
    pub sub_row: u8,
    /// Column of the targeted cell inside the sub-board.
    pub sub_col: u8,
    /// Terminal value the targeted sub-board reached with this move, if any.
    pub sub_board_result: Option<SubOutcome>,
    /// Whether this move ended the overall game.
    pub game_over: bool,
    /// Winning mark when the game ended with a line.
    pub winner: Option<Mark>,
    /// Whether the game ended as an overall draw.
    pub is_draw: bool,
}

/// Every message exchanged on an established peer session.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum PeerMessage {
    /// Handshake sent by the accepting side immediately after its outbound
    /// TCP connect succeeds, carrying the acceptor's identity.
    ConnectionAccepted { identity: String },
    /// The sender has finished local setup and is ready to start.
    PlayerReady { identity: String },
    /// Both sides are ready; carries the identity of the side that moves
    /// first.
    GameStart { first_player: String },
    /// A move by the sender.
    Move(MoveMessage),
    /// The sender is leaving; `message` is shown to the remaining player.
    Disconnect { message: String },
}

impl PeerMessage {
    /// Short static name for logging.
    pub fn kind(&self) -> &'static str {
        match self {
            PeerMessage::ConnectionAccepted { .. } => "CONNECTION_ACCEPTED",
            PeerMessage::PlayerReady { .. } => "PLAYER_READY",
            PeerMessage::GameStart { .. } => "GAME_START",
            PeerMessage::Move(_) => "MOVE",
            PeerMessage::Disconnect { .. } => "DISCONNECT",
        }
    }
}

// ── Tests ─────────────────────────────────────────────────────────────────────

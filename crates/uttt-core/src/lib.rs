//! # uttt-core
//!
//! Shared library for UTTT-Over-LAN containing the wire protocol types, the
//! length-prefixed framing codec, and the nested-board (Ultimate Tic-Tac-Toe)
//! rules engine.
//!
//! This crate is used by the peer application and its integration tests.
//! It has zero dependencies on sockets, threads, or the async runtime.
//!
//! Module map:
//!
//! - **`protocol`** – How bytes travel between two peers.  Stream messages
//!   are serde structs encoded with `bincode` behind an explicit
//!   `[version][length]` frame header; discovery announcements use the same
//!   versioned encoding as a single datagram payload.
//!
//! - **`game`** – Pure rules logic.  A `GameEngine` holds the 3×3 grid of
//!   3×3 sub-boards, validates moves, detects cascading sub-board and
//!   overall outcomes, and hands the turn back and forth.

pub mod game;
pub mod protocol;

// Re-export the most-used types at the crate root so callers can write
// `uttt_core::PeerMessage` instead of `uttt_core::protocol::messages::PeerMessage`.
pub use game::board::{GameOutcome, Mark, SubOutcome};
pub use game::engine::{ActiveBoard, GameEngine, GamePhase, MoveError, MoveOutcome};
pub use protocol::codec::{
    decode_announcement, decode_payload, encode_announcement, encode_frame, parse_frame_header,
    ProtocolError, FRAME_HEADER_SIZE, MAX_FRAME_SIZE,
};
pub use protocol::messages::{Announcement, MoveMessage, PeerMessage, PROTOCOL_VERSION};
pub use protocol::sequence::SequenceCounter;

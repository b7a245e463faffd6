//! Application layer: mutual-readiness handshake and the per-identity
//! registry of `{engine, ready, session}` triples.

pub mod peer_registry;
pub mod ready_sync;

pub use peer_registry::{run_session_events, PeerEntry, PeerRegistry, PlayError};
pub use ready_sync::ReadySync;

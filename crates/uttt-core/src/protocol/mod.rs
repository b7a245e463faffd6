//! Wire protocol: message types, framing codec, and sequence numbering.

pub mod codec;
pub mod messages;
pub mod sequence;

pub use codec::{ProtocolError, FRAME_HEADER_SIZE, MAX_FRAME_SIZE};
pub use messages::{Announcement, MoveMessage, PeerMessage, PROTOCOL_VERSION};
pub use sequence::SequenceCounter;

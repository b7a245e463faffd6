//! Framing codec for stream messages and discovery datagrams.
//!
//! Stream wire format:
//! ```text
//! [version:1][payload_len:4 BE][payload = bincode(PeerMessage)]
//! ```
//! The TCP stream has no inherent message boundaries, so every record is
//! explicitly delimited by this 5-byte header.  A reader pulls exactly
//! [`FRAME_HEADER_SIZE`] bytes, validates them with [`parse_frame_header`],
//! then pulls exactly `payload_len` more bytes and decodes them with
//! [`decode_payload`].
//!
//! Discovery datagram format:
//! ```text
//! [version:1][payload = bincode(Announcement)]
//! ```
//! Datagrams arrive whole, so no length prefix is needed there.
//!
//! # Error severity
//!
//! Header-level failures (wrong version, zero or oversized declared length)
//! mean the reader can no longer trust where the next message starts; the
//! session must disconnect.  [`ProtocolError::is_framing`] identifies these.
//! A bincode failure on a correctly framed payload only invalidates that one
//! message; the caller logs and drops it and the channel stays open.

use crate::protocol::messages::{Announcement, PeerMessage, PROTOCOL_VERSION};
use thiserror::Error;

/// Size of the frame header: 1 version byte + 4-byte big-endian payload length.
pub const FRAME_HEADER_SIZE: usize = 5;

/// Maximum accepted payload size.  Bounds the allocation a remote peer can
/// force on decode; real messages are well under 1 KiB.
pub const MAX_FRAME_SIZE: u32 = 64 * 1024;

/// Errors that can occur during message encoding or decoding.
#[derive(Debug, Error, PartialEq)]
pub enum ProtocolError {
    /// The version byte in the header is not a recognized value.
    #[error("unsupported protocol version: 0x{0:02X}")]
    UnsupportedVersion(u8),

    /// The header declared a zero-length payload.
    #[error("invalid frame length: 0")]
    EmptyFrame,

    /// The header declared a payload larger than [`MAX_FRAME_SIZE`].
    #[error("frame too large: {declared} bytes (max: {max})")]
    FrameTooLarge { declared: u32, max: u32 },

    /// The payload bytes could not be decoded into a message.
    #[error("malformed payload: {0}")]
    MalformedPayload(String),

    /// A message could not be serialized.
    #[error("encode error: {0}")]
    Encode(String),
}

impl ProtocolError {
    /// Whether this error invalidates the stream's framing.
    ///
    /// When `true`, the byte stream cannot be re-synchronized and the
    /// session must be torn down.  When `false`, only the current message
    /// is lost.
    pub fn is_framing(&self) -> bool {
        matches!(
            self,
            ProtocolError::UnsupportedVersion(_)
                | ProtocolError::EmptyFrame
                | ProtocolError::FrameTooLarge { .. }
        )
    }
}

// ── Stream frames ─────────────────────────────────────────────────────────────

/// Encodes a [`PeerMessage`] into a framed byte vector (header + payload).
///
/// # Errors
///
/// Returns [`ProtocolError::Encode`] if serialization fails and
/// [`ProtocolError::FrameTooLarge`] if the serialized payload exceeds
/// [`MAX_FRAME_SIZE`].
pub fn encode_frame(msg: &PeerMessage) -> Result<Vec<u8>, ProtocolError> {
    let payload = bincode::serialize(msg).map_err(|e| ProtocolError::Encode(e.to_string()))?;

    if payload.len() as u32 > MAX_FRAME_SIZE {
        return Err(ProtocolError::FrameTooLarge {
            declared: payload.len() as u32,
            max: MAX_FRAME_SIZE,
        });
    }

    let mut buf = Vec::with_capacity(FRAME_HEADER_SIZE + payload.len());
    buf.push(PROTOCOL_VERSION);
    buf.extend_from_slice(&(payload.len() as u32).to_be_bytes());
    buf.extend_from_slice(&payload);
    Ok(buf)
}

/// Validates a frame header and returns the payload length to read next.
///
/// # Errors
///
/// Returns a framing-level [`ProtocolError`] (see [`ProtocolError::is_framing`])
/// when the version byte is unknown or the declared length is zero or exceeds
/// [`MAX_FRAME_SIZE`].
pub fn parse_frame_header(header: &[u8; FRAME_HEADER_SIZE]) -> Result<usize, ProtocolError> {
    let version = header[0];
    if version != PROTOCOL_VERSION {
        return Err(ProtocolError::UnsupportedVersion(version));
    }

    let len = u32::from_be_bytes([header[1], header[2], header[3], header[4]]);
    if len == 0 {
        return Err(ProtocolError::EmptyFrame);
    }
    if len > MAX_FRAME_SIZE {
        return Err(ProtocolError::FrameTooLarge {
            declared: len,
            max: MAX_FRAME_SIZE,
        });
    }

    Ok(len as usize)
}

/// Decodes a correctly framed payload into a [`PeerMessage`].
///
/// # Errors
///
/// Returns [`ProtocolError::MalformedPayload`] when the bytes do not decode;
/// this is a payload-level error and does not invalidate the stream.
pub fn decode_payload(payload: &[u8]) -> Result<PeerMessage, ProtocolError> {
    bincode::deserialize(payload).map_err(|e| ProtocolError::MalformedPayload(e.to_string()))
}

// ── Discovery datagrams ───────────────────────────────────────────────────────

/// Encodes an [`Announcement`] into a versioned discovery datagram.
///
/// # Errors
///
/// Returns [`ProtocolError::Encode`] if serialization fails.
pub fn encode_announcement(ann: &Announcement) -> Result<Vec<u8>, ProtocolError> {
    let payload = bincode::serialize(ann).map_err(|e| ProtocolError::Encode(e.to_string()))?;
    let mut buf = Vec::with_capacity(1 + payload.len());
    buf.push(PROTOCOL_VERSION);
    buf.extend_from_slice(&payload);
    Ok(buf)
}

/// Decodes a discovery datagram into an [`Announcement`].
///
/// # Errors
///
/// Returns [`ProtocolError::UnsupportedVersion`] for a foreign version byte
/// and [`ProtocolError::MalformedPayload`] when the body does not decode.
/// Discovery datagrams are unauthenticated LAN input; callers drop failures
/// at debug level and keep listening.
pub fn decode_announcement(datagram: &[u8]) -> Result<Announcement, ProtocolError> {
    let (&version, payload) = datagram
        .split_first()
        .ok_or_else(|| ProtocolError::MalformedPayload("empty datagram".to_string()))?;
    if version != PROTOCOL_VERSION {
        return Err(ProtocolError::UnsupportedVersion(version));
    }
    bincode::deserialize(payload).map_err(|e| ProtocolError::MalformedPayload(e.to_string()))
}

// ── Tests ─────────────────────────────────────────────────────────────────────

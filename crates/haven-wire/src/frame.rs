//! Frame encoding and decoding for the HAVEN wire protocol.
//!
//! A frame is `[version(1)][type(1)][payload]`. Decoding rejects frames
//! shorter than two bytes or carrying an unsupported version before the
//! type byte is interpreted.

use crate::error::WireError;
use crate::{MIN_FRAME_LEN, PROTOCOL_VERSION};

/// Message types of the HAVEN protocol.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[repr(u8)]
pub enum MessageType {
    /// Client opens a handshake with a random tag
    Hello = 1,
    /// Coordinator echoes the client tag and adds its own
    HelloAck = 2,
    /// Client presents the coordinator tag and its ephemeral key
    EcdhInit = 3,
    /// Coordinator answers with its ephemeral key and a sealed signature
    EcdhResponse = 4,
    /// Sealed registration envelope (request and acknowledgment)
    Register = 5,
    /// Keepalive, no payload
    Ping = 6,
    /// Sealed challenge rotation
    Heartbeat = 7,
    /// Sealed signed answer for a signaling session
    Answer = 8,
    /// Coordinator-initiated failover announcement
    Migrate = 9,
    /// Coordinator-relayed connection offer
    Offer = 10,
    /// Post-authentication rate-limit or ban signal, no payload
    Error = 255,
}

impl TryFrom<u8> for MessageType {
    type Error = WireError;

    fn try_from(value: u8) -> Result<Self, WireError> {
        match value {
            1 => Ok(Self::Hello),
            2 => Ok(Self::HelloAck),
            3 => Ok(Self::EcdhInit),
            4 => Ok(Self::EcdhResponse),
            5 => Ok(Self::Register),
            6 => Ok(Self::Ping),
            7 => Ok(Self::Heartbeat),
            8 => Ok(Self::Answer),
            9 => Ok(Self::Migrate),
            10 => Ok(Self::Offer),
            255 => Ok(Self::Error),
            other => Err(WireError::UnknownType(other)),
        }
    }
}

/// Encode a frame from a message type and payload bytes.
#[must_use]
pub fn encode_frame(msg_type: MessageType, payload: &[u8]) -> Vec<u8> {
    let mut out = Vec::with_capacity(MIN_FRAME_LEN + payload.len());
    out.push(PROTOCOL_VERSION);
    out.push(msg_type as u8);
    out.extend_from_slice(payload);
    out
}

/// Decode a frame into its message type and payload slice (zero-copy).
///
/// # Errors
///
/// Returns [`WireError::TooShort`] for inputs under two bytes,
/// [`WireError::UnsupportedVersion`] for a foreign version byte, and
/// [`WireError::UnknownType`] for an unrecognized type byte.
pub fn decode_frame(data: &[u8]) -> Result<(MessageType, &[u8]), WireError> {
    if data.len() < MIN_FRAME_LEN {
        return Err(WireError::TooShort {
            expected: MIN_FRAME_LEN,
            actual: data.len(),
        });
    }
    if data[0] != PROTOCOL_VERSION {
        return Err(WireError::UnsupportedVersion(data[0]));
    }
    let msg_type = MessageType::try_from(data[1])?;
    Ok((msg_type, &data[MIN_FRAME_LEN..]))
}

//! Per-phase payload layouts.
//!
//! Short fixed-size fields (tags, public keys, session ids, signatures)
//! carry a 1-byte length prefix; variable blobs (challenges, offer/answer
//! payloads, hostnames) carry a 2-byte big-endian length; timestamps are
//! 8 bytes big-endian. Envelope types here describe the *plaintext* of
//! sealed blobs — sealing itself happens in `haven-crypto`.

use crate::error::WireError;
use crate::{PUBLIC_KEY_LEN, SESSION_ID_LEN, SIGNATURE_LEN, TAG_LEN};

/// Cursor over a payload buffer with length-prefixed reads.
struct Reader<'a> {
    buf: &'a [u8],
    pos: usize,
}

impl<'a> Reader<'a> {
    fn new(buf: &'a [u8]) -> Self {
        Self { buf, pos: 0 }
    }

    fn take(&mut self, n: usize) -> Result<&'a [u8], WireError> {
        let end = self
            .pos
            .checked_add(n)
            .ok_or(WireError::Malformed("length overflow"))?;
        if end > self.buf.len() {
            return Err(WireError::TooShort {
                expected: end,
                actual: self.buf.len(),
            });
        }
        let slice = &self.buf[self.pos..end];
        self.pos = end;
        Ok(slice)
    }

    fn u8(&mut self) -> Result<u8, WireError> {
        Ok(self.take(1)?[0])
    }

    fn u16(&mut self) -> Result<u16, WireError> {
        let b = self.take(2)?;
        Ok(u16::from_be_bytes([b[0], b[1]]))
    }

    fn u64(&mut self) -> Result<u64, WireError> {
        let b = self.take(8)?;
        let mut raw = [0u8; 8];
        raw.copy_from_slice(b);
        Ok(u64::from_be_bytes(raw))
    }

    /// Fixed-size field with a 1-byte length prefix that must equal `n`.
    fn fixed<const N: usize>(&mut self) -> Result<[u8; N], WireError> {
        let len = self.u8()? as usize;
        if len != N {
            return Err(WireError::Malformed("fixed field length mismatch"));
        }
        let mut out = [0u8; N];
        out.copy_from_slice(self.take(N)?);
        Ok(out)
    }

    /// Variable blob with a 2-byte big-endian length prefix.
    fn blob(&mut self) -> Result<&'a [u8], WireError> {
        let len = self.u16()? as usize;
        self.take(len)
    }

    /// UTF-8 string stored as a blob.
    fn string(&mut self) -> Result<String, WireError> {
        let raw = self.blob()?;
        std::str::from_utf8(raw)
            .map(str::to_owned)
            .map_err(|_| WireError::Malformed("invalid utf-8"))
    }

    /// Remaining unread bytes.
    fn rest(&mut self) -> &'a [u8] {
        let slice = &self.buf[self.pos..];
        self.pos = self.buf.len();
        slice
    }

    fn finish(&self) -> Result<(), WireError> {
        if self.pos != self.buf.len() {
            return Err(WireError::Malformed("trailing bytes"));
        }
        Ok(())
    }
}

fn push_fixed(out: &mut Vec<u8>, field: &[u8]) {
    debug_assert!(field.len() <= u8::MAX as usize);
    out.push(field.len() as u8);
    out.extend_from_slice(field);
}

fn push_blob(out: &mut Vec<u8>, blob: &[u8]) -> Result<(), WireError> {
    let len = u16::try_from(blob.len()).map_err(|_| WireError::Malformed("blob too long"))?;
    out.extend_from_slice(&len.to_be_bytes());
    out.extend_from_slice(blob);
    Ok(())
}

/// HELLO: the client's random tag.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Hello {
    /// Tag echoed back in HELLO_ACK
    pub client_tag: [u8; TAG_LEN],
}

impl Hello {
    /// Encode the payload.
    #[must_use]
    pub fn encode(&self) -> Vec<u8> {
        let mut out = Vec::with_capacity(1 + TAG_LEN);
        push_fixed(&mut out, &self.client_tag);
        out
    }

    /// Decode the payload.
    ///
    /// # Errors
    ///
    /// Returns [`WireError`] on truncated or trailing bytes.
    pub fn decode(payload: &[u8]) -> Result<Self, WireError> {
        let mut r = Reader::new(payload);
        let client_tag = r.fixed::<TAG_LEN>()?;
        r.finish()?;
        Ok(Self { client_tag })
    }
}

/// HELLO_ACK: echoed client tag plus the coordinator's tag.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct HelloAck {
    /// The tag from the client's HELLO
    pub client_tag: [u8; TAG_LEN],
    /// The coordinator's freshly generated tag
    pub coordinator_tag: [u8; TAG_LEN],
}

impl HelloAck {
    /// Encode the payload.
    #[must_use]
    pub fn encode(&self) -> Vec<u8> {
        let mut out = Vec::with_capacity(2 * (1 + TAG_LEN));
        push_fixed(&mut out, &self.client_tag);
        push_fixed(&mut out, &self.coordinator_tag);
        out
    }

    /// Decode the payload.
    ///
    /// # Errors
    ///
    /// Returns [`WireError`] on truncated or trailing bytes.
    pub fn decode(payload: &[u8]) -> Result<Self, WireError> {
        let mut r = Reader::new(payload);
        let client_tag = r.fixed::<TAG_LEN>()?;
        let coordinator_tag = r.fixed::<TAG_LEN>()?;
        r.finish()?;
        Ok(Self {
            client_tag,
            coordinator_tag,
        })
    }
}

/// ECDH_INIT: the coordinator tag proving the HELLO round trip, and the
/// client's ephemeral agreement key.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct EcdhInit {
    /// Tag issued by the coordinator in HELLO_ACK
    pub coordinator_tag: [u8; TAG_LEN],
    /// Client's ephemeral X25519 public key
    pub ephemeral_public: [u8; PUBLIC_KEY_LEN],
}

impl EcdhInit {
    /// Encode the payload.
    #[must_use]
    pub fn encode(&self) -> Vec<u8> {
        let mut out = Vec::with_capacity(1 + TAG_LEN + 1 + PUBLIC_KEY_LEN);
        push_fixed(&mut out, &self.coordinator_tag);
        push_fixed(&mut out, &self.ephemeral_public);
        out
    }

    /// Decode the payload.
    ///
    /// # Errors
    ///
    /// Returns [`WireError`] on truncated or trailing bytes.
    pub fn decode(payload: &[u8]) -> Result<Self, WireError> {
        let mut r = Reader::new(payload);
        let coordinator_tag = r.fixed::<TAG_LEN>()?;
        let ephemeral_public = r.fixed::<PUBLIC_KEY_LEN>()?;
        r.finish()?;
        Ok(Self {
            coordinator_tag,
            ephemeral_public,
        })
    }
}

/// ECDH_RESPONSE: the coordinator's ephemeral key followed by the sealed
/// `{timestamp, signature}` envelope. The sealed blob is the remainder of
/// the frame, opaque at this layer.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct EcdhResponse {
    /// Coordinator's ephemeral X25519 public key
    pub ephemeral_public: [u8; PUBLIC_KEY_LEN],
    /// Sealed signature envelope
    pub sealed: Vec<u8>,
}

impl EcdhResponse {
    /// Encode the payload.
    #[must_use]
    pub fn encode(&self) -> Vec<u8> {
        let mut out = Vec::with_capacity(1 + PUBLIC_KEY_LEN + self.sealed.len());
        push_fixed(&mut out, &self.ephemeral_public);
        out.extend_from_slice(&self.sealed);
        out
    }

    /// Decode the payload.
    ///
    /// # Errors
    ///
    /// Returns [`WireError`] on truncated input.
    pub fn decode(payload: &[u8]) -> Result<Self, WireError> {
        let mut r = Reader::new(payload);
        let ephemeral_public = r.fixed::<PUBLIC_KEY_LEN>()?;
        let sealed = r.rest().to_vec();
        Ok(Self {
            ephemeral_public,
            sealed,
        })
    }
}

/// Plaintext of the sealed ECDH_RESPONSE envelope.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct KeyProof {
    /// Coordinator clock at signing time (unix seconds)
    pub timestamp: u64,
    /// Signature over `coordinator_ephemeral ∥ client_ephemeral`
    pub signature: [u8; SIGNATURE_LEN],
}

impl KeyProof {
    /// Encode the envelope plaintext.
    #[must_use]
    pub fn encode(&self) -> Vec<u8> {
        let mut out = Vec::with_capacity(8 + 1 + SIGNATURE_LEN);
        out.extend_from_slice(&self.timestamp.to_be_bytes());
        push_fixed(&mut out, &self.signature);
        out
    }

    /// Decode the envelope plaintext.
    ///
    /// # Errors
    ///
    /// Returns [`WireError`] on truncated or trailing bytes.
    pub fn decode(payload: &[u8]) -> Result<Self, WireError> {
        let mut r = Reader::new(payload);
        let timestamp = r.u64()?;
        let signature = r.fixed::<SIGNATURE_LEN>()?;
        r.finish()?;
        Ok(Self {
            timestamp,
            signature,
        })
    }
}

/// Plaintext of the sealed REGISTER envelope.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RegisterEnvelope {
    /// Claimed long-term public key
    pub public_key: [u8; PUBLIC_KEY_LEN],
    /// Client clock at signing time (unix seconds)
    pub timestamp: u64,
    /// Initial challenge nonce
    pub challenge: String,
    /// hex(SHA-256(challenge ∥ passphrase))
    pub answer_hash: String,
    /// Signature over the ephemeral-key binding and all fields above
    pub signature: [u8; SIGNATURE_LEN],
}

impl RegisterEnvelope {
    /// Encode the envelope plaintext.
    ///
    /// # Errors
    ///
    /// Returns [`WireError::Malformed`] if a variable field exceeds 64 KiB.
    pub fn encode(&self) -> Result<Vec<u8>, WireError> {
        let mut out = Vec::new();
        push_fixed(&mut out, &self.public_key);
        out.extend_from_slice(&self.timestamp.to_be_bytes());
        push_blob(&mut out, self.challenge.as_bytes())?;
        push_blob(&mut out, self.answer_hash.as_bytes())?;
        push_fixed(&mut out, &self.signature);
        Ok(out)
    }

    /// Decode the envelope plaintext.
    ///
    /// # Errors
    ///
    /// Returns [`WireError`] on truncated, non-UTF-8, or trailing bytes.
    pub fn decode(payload: &[u8]) -> Result<Self, WireError> {
        let mut r = Reader::new(payload);
        let public_key = r.fixed::<PUBLIC_KEY_LEN>()?;
        let timestamp = r.u64()?;
        let challenge = r.string()?;
        let answer_hash = r.string()?;
        let signature = r.fixed::<SIGNATURE_LEN>()?;
        r.finish()?;
        Ok(Self {
            public_key,
            timestamp,
            challenge,
            answer_hash,
            signature,
        })
    }

    /// Canonical bytes covered by the envelope signature:
    /// `coordinator_ephemeral ∥ client_ephemeral ∥ public_key ∥ timestamp ∥
    /// challenge ∥ answer_hash`.
    #[must_use]
    pub fn signed_bytes(
        &self,
        coordinator_ephemeral: &[u8; PUBLIC_KEY_LEN],
        client_ephemeral: &[u8; PUBLIC_KEY_LEN],
    ) -> Vec<u8> {
        let mut out = Vec::new();
        out.extend_from_slice(coordinator_ephemeral);
        out.extend_from_slice(client_ephemeral);
        out.extend_from_slice(&self.public_key);
        out.extend_from_slice(&self.timestamp.to_be_bytes());
        out.extend_from_slice(self.challenge.as_bytes());
        out.extend_from_slice(self.answer_hash.as_bytes());
        out
    }
}

/// Plaintext of the sealed HEARTBEAT envelope: the next challenge pair.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct HeartbeatEnvelope {
    /// New challenge nonce
    pub challenge: String,
    /// hex(SHA-256(challenge ∥ passphrase))
    pub answer_hash: String,
}

impl HeartbeatEnvelope {
    /// Encode the envelope plaintext.
    ///
    /// # Errors
    ///
    /// Returns [`WireError::Malformed`] if a field exceeds 64 KiB.
    pub fn encode(&self) -> Result<Vec<u8>, WireError> {
        let mut out = Vec::new();
        push_blob(&mut out, self.challenge.as_bytes())?;
        push_blob(&mut out, self.answer_hash.as_bytes())?;
        Ok(out)
    }

    /// Decode the envelope plaintext.
    ///
    /// # Errors
    ///
    /// Returns [`WireError`] on truncated, non-UTF-8, or trailing bytes.
    pub fn decode(payload: &[u8]) -> Result<Self, WireError> {
        let mut r = Reader::new(payload);
        let challenge = r.string()?;
        let answer_hash = r.string()?;
        r.finish()?;
        Ok(Self {
            challenge,
            answer_hash,
        })
    }
}

/// Plaintext of the sealed ANSWER envelope.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AnswerEnvelope {
    /// Claimed long-term public key
    pub public_key: [u8; PUBLIC_KEY_LEN],
    /// Signaling session being answered
    pub session_id: [u8; SESSION_ID_LEN],
    /// Client clock at signing time (unix seconds)
    pub timestamp: u64,
    /// Answer payload (SDP), opaque here
    pub payload: Vec<u8>,
    /// Signature over all fields above
    pub signature: [u8; SIGNATURE_LEN],
}

impl AnswerEnvelope {
    /// Encode the envelope plaintext.
    ///
    /// # Errors
    ///
    /// Returns [`WireError::Malformed`] if the payload exceeds 64 KiB.
    pub fn encode(&self) -> Result<Vec<u8>, WireError> {
        let mut out = Vec::new();
        push_fixed(&mut out, &self.public_key);
        push_fixed(&mut out, &self.session_id);
        out.extend_from_slice(&self.timestamp.to_be_bytes());
        push_blob(&mut out, &self.payload)?;
        push_fixed(&mut out, &self.signature);
        Ok(out)
    }

    /// Decode the envelope plaintext.
    ///
    /// # Errors
    ///
    /// Returns [`WireError`] on truncated or trailing bytes.
    pub fn decode(payload: &[u8]) -> Result<Self, WireError> {
        let mut r = Reader::new(payload);
        let public_key = r.fixed::<PUBLIC_KEY_LEN>()?;
        let session_id = r.fixed::<SESSION_ID_LEN>()?;
        let timestamp = r.u64()?;
        let answer_payload = r.blob()?.to_vec();
        let signature = r.fixed::<SIGNATURE_LEN>()?;
        r.finish()?;
        Ok(Self {
            public_key,
            session_id,
            timestamp,
            payload: answer_payload,
            signature,
        })
    }

    /// Canonical bytes covered by the envelope signature:
    /// `public_key ∥ session_id ∥ timestamp ∥ payload`.
    #[must_use]
    pub fn signed_bytes(&self) -> Vec<u8> {
        let mut out = Vec::new();
        out.extend_from_slice(&self.public_key);
        out.extend_from_slice(&self.session_id);
        out.extend_from_slice(&self.timestamp.to_be_bytes());
        out.extend_from_slice(&self.payload);
        out
    }
}

/// Plaintext of the sealed OFFER envelope.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct OfferEnvelope {
    /// Signaling session this offer belongs to
    pub session_id: [u8; SESSION_ID_LEN],
    /// Offer payload (SDP), opaque here
    pub payload: Vec<u8>,
}

impl OfferEnvelope {
    /// Encode the envelope plaintext.
    ///
    /// # Errors
    ///
    /// Returns [`WireError::Malformed`] if the payload exceeds 64 KiB.
    pub fn encode(&self) -> Result<Vec<u8>, WireError> {
        let mut out = Vec::new();
        push_fixed(&mut out, &self.session_id);
        push_blob(&mut out, &self.payload)?;
        Ok(out)
    }

    /// Decode the envelope plaintext.
    ///
    /// # Errors
    ///
    /// Returns [`WireError`] on truncated or trailing bytes.
    pub fn decode(payload: &[u8]) -> Result<Self, WireError> {
        let mut r = Reader::new(payload);
        let session_id = r.fixed::<SESSION_ID_LEN>()?;
        let offer_payload = r.blob()?.to_vec();
        r.finish()?;
        Ok(Self {
            session_id,
            payload: offer_payload,
        })
    }
}

/// Plaintext of the sealed MIGRATE envelope: the failover coordinator.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MigrateEnvelope {
    /// Hostname or IP of the new coordinator
    pub host: String,
    /// UDP port of the new coordinator
    pub port: u16,
    /// New coordinator's long-term public key
    pub coordinator_key: [u8; PUBLIC_KEY_LEN],
}

impl MigrateEnvelope {
    /// Encode the envelope plaintext.
    ///
    /// # Errors
    ///
    /// Returns [`WireError::Malformed`] if the host exceeds 64 KiB.
    pub fn encode(&self) -> Result<Vec<u8>, WireError> {
        let mut out = Vec::new();
        push_blob(&mut out, self.host.as_bytes())?;
        out.extend_from_slice(&self.port.to_be_bytes());
        push_fixed(&mut out, &self.coordinator_key);
        Ok(out)
    }

    /// Decode the envelope plaintext.
    ///
    /// # Errors
    ///
    /// Returns [`WireError`] on truncated, non-UTF-8, or trailing bytes.
    pub fn decode(payload: &[u8]) -> Result<Self, WireError> {
        let mut r = Reader::new(payload);
        let host = r.string()?;
        let port = r.u16()?;
        let coordinator_key = r.fixed::<PUBLIC_KEY_LEN>()?;
        r.finish()?;
        Ok(Self {
            host,
            port,
            coordinator_key,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;

    #[test]
    fn test_hello_roundtrip() {
        let msg = Hello {
            client_tag: [1, 2, 3, 4],
        };
        assert_eq!(Hello::decode(&msg.encode()).unwrap(), msg);
    }

    #[test]
    fn test_hello_rejects_wrong_tag_length() {
        // length prefix says 3 but the tag must be 4 bytes
        let raw = [3u8, 1, 2, 3];
        assert!(Hello::decode(&raw).is_err());
    }

    #[test]
    fn test_hello_rejects_trailing_bytes() {
        let mut raw = Hello {
            client_tag: [0; 4],
        }
        .encode();
        raw.push(0xff);
        assert_eq!(
            Hello::decode(&raw),
            Err(WireError::Malformed("trailing bytes"))
        );
    }

    #[test]
    fn test_hello_ack_roundtrip() {
        let msg = HelloAck {
            client_tag: [1, 2, 3, 4],
            coordinator_tag: [5, 6, 7, 8],
        };
        assert_eq!(HelloAck::decode(&msg.encode()).unwrap(), msg);
    }

    #[test]
    fn test_ecdh_init_roundtrip() {
        let msg = EcdhInit {
            coordinator_tag: [9, 9, 9, 9],
            ephemeral_public: [0x42; 32],
        };
        assert_eq!(EcdhInit::decode(&msg.encode()).unwrap(), msg);
    }

    #[test]
    fn test_ecdh_response_roundtrip() {
        let msg = EcdhResponse {
            ephemeral_public: [7; 32],
            sealed: vec![1, 2, 3, 4, 5],
        };
        assert_eq!(EcdhResponse::decode(&msg.encode()).unwrap(), msg);
    }

    #[test]
    fn test_ecdh_response_empty_sealed() {
        let msg = EcdhResponse {
            ephemeral_public: [7; 32],
            sealed: Vec::new(),
        };
        assert_eq!(EcdhResponse::decode(&msg.encode()).unwrap(), msg);
    }

    #[test]
    fn test_key_proof_roundtrip() {
        let msg = KeyProof {
            timestamp: 1_700_000_000,
            signature: [0xab; 64],
        };
        assert_eq!(KeyProof::decode(&msg.encode()).unwrap(), msg);
    }

    #[test]
    fn test_register_envelope_roundtrip() {
        let msg = RegisterEnvelope {
            public_key: [3; 32],
            timestamp: 1_700_000_123,
            challenge: "c1".to_string(),
            answer_hash: "h1".to_string(),
            signature: [0xcd; 64],
        };
        let raw = msg.encode().unwrap();
        assert_eq!(RegisterEnvelope::decode(&raw).unwrap(), msg);
    }

    #[test]
    fn test_register_envelope_signed_bytes_binds_ephemerals() {
        let msg = RegisterEnvelope {
            public_key: [3; 32],
            timestamp: 7,
            challenge: "c".to_string(),
            answer_hash: "h".to_string(),
            signature: [0; 64],
        };
        let a = msg.signed_bytes(&[1; 32], &[2; 32]);
        let b = msg.signed_bytes(&[1; 32], &[9; 32]);
        assert_ne!(a, b);
    }

    #[test]
    fn test_heartbeat_envelope_roundtrip() {
        let msg = HeartbeatEnvelope {
            challenge: "c2".to_string(),
            answer_hash: "h2".to_string(),
        };
        let raw = msg.encode().unwrap();
        assert_eq!(HeartbeatEnvelope::decode(&raw).unwrap(), msg);
    }

    #[test]
    fn test_answer_envelope_roundtrip() {
        let msg = AnswerEnvelope {
            public_key: [3; 32],
            session_id: [0xee; 16],
            timestamp: 55,
            payload: b"v=0 sdp answer".to_vec(),
            signature: [0x11; 64],
        };
        let raw = msg.encode().unwrap();
        assert_eq!(AnswerEnvelope::decode(&raw).unwrap(), msg);
    }

    #[test]
    fn test_offer_envelope_roundtrip() {
        let msg = OfferEnvelope {
            session_id: [0xee; 16],
            payload: b"v=0 sdp offer".to_vec(),
        };
        let raw = msg.encode().unwrap();
        assert_eq!(OfferEnvelope::decode(&raw).unwrap(), msg);
    }

    #[test]
    fn test_migrate_envelope_roundtrip() {
        let msg = MigrateEnvelope {
            host: "failover.example.net".to_string(),
            port: 9999,
            coordinator_key: [0x77; 32],
        };
        let raw = msg.encode().unwrap();
        assert_eq!(MigrateEnvelope::decode(&raw).unwrap(), msg);
    }

    #[test]
    fn test_register_envelope_truncated() {
        let msg = RegisterEnvelope {
            public_key: [3; 32],
            timestamp: 1,
            challenge: "c1".to_string(),
            answer_hash: "h1".to_string(),
            signature: [0; 64],
        };
        let raw = msg.encode().unwrap();
        for cut in [0, 1, 10, raw.len() - 1] {
            assert!(RegisterEnvelope::decode(&raw[..cut]).is_err());
        }
    }

    #[test]
    fn test_heartbeat_envelope_rejects_bad_utf8() {
        // blob length 1, byte 0xff is not valid utf-8
        let raw = [0u8, 1, 0xff, 0, 0];
        assert!(HeartbeatEnvelope::decode(&raw).is_err());
    }

    proptest! {
        #[test]
        fn prop_decoders_never_panic(data in proptest::collection::vec(any::<u8>(), 0..256)) {
            let _ = crate::frame::decode_frame(&data);
            let _ = Hello::decode(&data);
            let _ = HelloAck::decode(&data);
            let _ = EcdhInit::decode(&data);
            let _ = EcdhResponse::decode(&data);
            let _ = KeyProof::decode(&data);
            let _ = RegisterEnvelope::decode(&data);
            let _ = HeartbeatEnvelope::decode(&data);
            let _ = AnswerEnvelope::decode(&data);
            let _ = OfferEnvelope::decode(&data);
            let _ = MigrateEnvelope::decode(&data);
        }

        #[test]
        fn prop_offer_roundtrip(
            session_id in proptest::array::uniform16(any::<u8>()),
            payload in proptest::collection::vec(any::<u8>(), 0..2048),
        ) {
            let msg = OfferEnvelope { session_id, payload };
            let raw = msg.encode().unwrap();
            prop_assert_eq!(OfferEnvelope::decode(&raw).unwrap(), msg);
        }
    }
}

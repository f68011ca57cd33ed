//! Short-lived offer/answer session records.
//!
//! A signaling session carries one remote client's connection offer
//! through the coordinator to a registered home-node and the node's
//! answer back. Sessions are keyed by an opaque random id, deleted after
//! one successful answer poll, and expired after a fixed timeout if never
//! answered. The HTTP surface over this API is a collaborator; this
//! module only owns the records.

use dashmap::DashMap;
use std::time::{Duration, Instant};
use thiserror::Error;

use crate::registry::NodeKey;

/// Opaque signaling session identifier.
pub type SessionId = [u8; 16];

/// Errors surfaced to the signaling caller (the HTTP layer).
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum SignalingError {
    /// Target public key has no live registration
    #[error("target not registered")]
    NotFound,

    /// Presented challenge answer does not match the target's current one
    #[error("invalid challenge answer")]
    InvalidChallenge,

    /// Session existed but outlived the signaling timeout unanswered
    #[error("session expired")]
    Expired,

    /// Too many connection attempts against this target
    #[error("rate limited")]
    RateLimited,

    /// Offer could not be sealed or sent to the target
    #[error("offer dispatch failed")]
    Dispatch,
}

/// Outcome of polling a session.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum PollOutcome {
    /// No answer yet; poll again
    Waiting,
    /// The answer payload; the session is now deleted
    Answer(Vec<u8>),
}

struct SignalingSession {
    target_key: NodeKey,
    answer: Option<Vec<u8>>,
    created: Instant,
}

/// Store of in-flight signaling sessions.
pub struct Signaling {
    sessions: DashMap<SessionId, SignalingSession>,
    timeout: Duration,
}

impl Signaling {
    /// Create a store with the given unanswered-session timeout.
    #[must_use]
    pub fn new(timeout: Duration) -> Self {
        Self {
            sessions: DashMap::new(),
            timeout,
        }
    }

    /// Insert a new session awaiting an answer from `target_key`.
    pub fn insert(&self, session_id: SessionId, target_key: NodeKey) {
        self.sessions.insert(
            session_id,
            SignalingSession {
                target_key,
                answer: None,
                created: Instant::now(),
            },
        );
    }

    /// The target key a session is waiting on.
    pub fn target_of(&self, session_id: &SessionId) -> Option<NodeKey> {
        self.sessions.get(session_id).map(|s| s.target_key)
    }

    /// Store a verified answer. Unknown ids are ignored: the session may
    /// have expired between offer dispatch and the node's reply.
    pub fn store_answer(&self, session_id: &SessionId, answer: Vec<u8>) {
        if let Some(mut session) = self.sessions.get_mut(session_id) {
            session.answer = Some(answer);
        }
    }

    /// Poll a session for its answer.
    ///
    /// # Errors
    ///
    /// [`SignalingError::NotFound`] for unknown ids,
    /// [`SignalingError::Expired`] for sessions past the timeout (removed
    /// as a side effect).
    pub fn poll(&self, session_id: &SessionId) -> Result<PollOutcome, SignalingError> {
        {
            let session = self
                .sessions
                .get(session_id)
                .ok_or(SignalingError::NotFound)?;
            if session.created.elapsed() > self.timeout {
                drop(session);
                self.sessions.remove(session_id);
                return Err(SignalingError::Expired);
            }
            if session.answer.is_none() {
                return Ok(PollOutcome::Waiting);
            }
        }
        // answered: consume the session on this single successful poll
        let (_, session) = self
            .sessions
            .remove(session_id)
            .ok_or(SignalingError::NotFound)?;
        match session.answer {
            Some(answer) => Ok(PollOutcome::Answer(answer)),
            None => Ok(PollOutcome::Waiting),
        }
    }

    /// Remove sessions older than the timeout.
    pub fn sweep(&self, now: Instant) -> usize {
        let timeout = self.timeout;
        let before = self.sessions.len();
        self.sessions
            .retain(|_, session| now.duration_since(session.created) <= timeout);
        before - self.sessions.len()
    }

    /// Number of in-flight sessions.
    #[must_use]
    pub fn len(&self) -> usize {
        self.sessions.len()
    }

    /// Whether no sessions are in flight.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.sessions.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_poll_waiting_then_answer() {
        let store = Signaling::new(Duration::from_secs(60));
        store.insert([1; 16], [9; 32]);

        assert_eq!(store.poll(&[1; 16]), Ok(PollOutcome::Waiting));

        store.store_answer(&[1; 16], b"sdp answer".to_vec());
        assert_eq!(
            store.poll(&[1; 16]),
            Ok(PollOutcome::Answer(b"sdp answer".to_vec()))
        );

        // consumed by the successful poll
        assert_eq!(store.poll(&[1; 16]), Err(SignalingError::NotFound));
    }

    #[test]
    fn test_unknown_session() {
        let store = Signaling::new(Duration::from_secs(60));
        assert_eq!(store.poll(&[0; 16]), Err(SignalingError::NotFound));
    }

    #[test]
    fn test_store_answer_unknown_id_ignored() {
        let store = Signaling::new(Duration::from_secs(60));
        store.store_answer(&[0; 16], b"late".to_vec());
        assert!(store.is_empty());
    }

    #[test]
    fn test_expired_session() {
        let store = Signaling::new(Duration::from_millis(0));
        store.insert([1; 16], [9; 32]);

        std::thread::sleep(Duration::from_millis(5));
        assert_eq!(store.poll(&[1; 16]), Err(SignalingError::Expired));
        // removed as a side effect
        assert_eq!(store.poll(&[1; 16]), Err(SignalingError::NotFound));
    }

    #[test]
    fn test_sweep_removes_only_expired() {
        let store = Signaling::new(Duration::from_secs(60));
        store.insert([1; 16], [9; 32]);

        assert_eq!(store.sweep(Instant::now()), 0);
        assert_eq!(store.len(), 1);

        let future = Instant::now() + Duration::from_secs(61);
        assert_eq!(store.sweep(future), 1);
        assert!(store.is_empty());
    }

    #[test]
    fn test_target_of() {
        let store = Signaling::new(Duration::from_secs(60));
        store.insert([1; 16], [9; 32]);
        assert_eq!(store.target_of(&[1; 16]), Some([9; 32]));
        assert_eq!(store.target_of(&[2; 16]), None);
    }
}

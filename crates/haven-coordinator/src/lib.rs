//! # HAVEN Coordinator
//!
//! The public rendezvous side of the HAVEN protocol: a UDP engine that
//! drives home-nodes through the five-phase registration handshake, a
//! registry of live registrations, and a signaling relay that carries
//! offer/answer exchanges between remote clients and registered nodes.
//!
//! # Handshake Flow
//!
//! ```text
//! Home-node                      Coordinator
//!     |                               |
//!     |-------- HELLO (T1) --------->|        reply-rate limited
//!     |<----- HELLO_ACK (T1, T2) ----|        HelloSession stored
//!     |------ ECDH_INIT (T2, Ea) --->|        tag gate, then ECDH
//!     |<-- ECDH_RESPONSE (Eb, blob)--|        HandshakeSession stored
//!     |------ REGISTER (sealed) ---->|        signature verified
//!     |<------- sealed "ok" ---------|        ServerRecord created
//! ```
//!
//! After registration: PING refreshes the timestamp, HEARTBEAT rotates the
//! challenge/key, OFFER and ANSWER bridge signaling sessions, MIGRATE
//! points the node at a failover coordinator.
//!
//! Datagrams are processed strictly sequentially; background maintenance
//! (registry sweep, transient-session expiry) runs on one owned task that
//! the engine cancels on shutdown.

#![warn(missing_docs)]
#![warn(clippy::all)]

pub mod engine;
pub mod error;
pub mod ratelimit;
pub mod registry;
pub mod signaling;

pub use engine::{CoordinatorConfig, CoordinatorEngine, HandlerOutcome};
pub use error::{CoordinatorError, DropReason};
pub use registry::{NodeKey, Registry, ServerRecord};
pub use signaling::{PollOutcome, SessionId, Signaling, SignalingError};

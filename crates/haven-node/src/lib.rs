//! # HAVEN Node
//!
//! The home-node side of the HAVEN protocol: a UDP client engine that
//! registers with a coordinator through the five-phase handshake, keeps
//! the registration alive with PING and rotates its key with HEARTBEAT,
//! answers relayed connection offers, and follows coordinator-initiated
//! migration to a failover coordinator.
//!
//! Inbound coordinator traffic surfaces as typed [`NodeEvent`]s on an mpsc
//! channel rather than string-keyed callbacks, so consumers match
//! exhaustively on what can actually happen.

#![warn(missing_docs)]
#![warn(clippy::all)]

pub mod engine;
pub mod error;

pub use engine::{ClientState, HomeNode, NodeConfig, NodeEvent};
pub use error::NodeError;

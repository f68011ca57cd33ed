//! Home-node protocol engine.
//!
//! Drives the five-phase registration handshake as a client, then owns
//! the keepalive and heartbeat timers and the inbound event loop. All
//! background tasks are tied to the engine instance and cancelled through
//! a single teardown path; nothing ambient outlives a shutdown.

use std::net::SocketAddr;
use std::sync::Arc;
use std::time::{Duration, SystemTime, UNIX_EPOCH};
use tokio::net::UdpSocket;
use tokio::sync::{mpsc, watch, Mutex, RwLock};
use tokio::time::timeout;

use haven_crypto::agreement::{EphemeralKeyPair, PublicKey as AgreementKey};
use haven_crypto::random::{random_challenge, random_tag};
use haven_crypto::sealed::{hash_challenge_answer, SessionKey};
use haven_crypto::signing::{Signature, SigningIdentity, VerifyingKey};
use haven_crypto::Agreement;
use haven_wire::payload::{
    AnswerEnvelope, EcdhInit, EcdhResponse, HeartbeatEnvelope, Hello, HelloAck, KeyProof,
    MigrateEnvelope, OfferEnvelope, RegisterEnvelope,
};
use haven_wire::{decode_frame, encode_frame, MessageType};

use crate::error::{NodeError, Result};

/// Registration state of the engine. Drives which inbound message types
/// are meaningful.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ClientState {
    /// No registration and no handshake in flight
    Disconnected,
    /// Handshake in flight
    Registering,
    /// Registration acknowledged; timers running
    Registered,
}

/// Coordinator traffic surfaced to the application.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum NodeEvent {
    /// A remote client wants a connection; answer via
    /// [`HomeNode::submit_answer`]
    Offer {
        /// Signaling session to answer into
        session_id: [u8; 16],
        /// Offer payload (SDP), opaque to the engine
        payload: Vec<u8>,
    },
    /// The coordinator announced a failover coordinator. The engine is
    /// already attempting the migration; a collaborator should persist
    /// these fields across restarts.
    Migrate {
        /// Failover host
        host: String,
        /// Failover port
        port: u16,
        /// Failover coordinator's public key
        coordinator_key: [u8; 32],
    },
    /// The engine reverted to [`ClientState::Disconnected`]
    Disconnected {
        /// Human-readable reason
        reason: String,
    },
}

/// Home-node engine configuration.
#[derive(Debug, Clone)]
pub struct NodeConfig {
    /// Coordinator to register with
    pub coordinator_addr: SocketAddr,
    /// Pinned coordinator public key; when set, the ECDH_RESPONSE
    /// signature must verify against it
    pub coordinator_key: Option<[u8; 32]>,
    /// Shared passphrase hashed into challenge answers
    pub passphrase: String,
    /// PING cadence
    pub keepalive_interval: Duration,
    /// Challenge rotation cadence
    pub heartbeat_interval: Duration,
    /// Per-step handshake timeout
    pub step_timeout: Duration,
    /// How long a migration handshake may take before the old
    /// registration is kept as-is
    pub migration_window: Duration,
    /// Key agreement curve
    pub agreement: Agreement,
}

impl NodeConfig {
    /// Config with protocol-default timers.
    #[must_use]
    pub fn new(coordinator_addr: SocketAddr, passphrase: impl Into<String>) -> Self {
        Self {
            coordinator_addr,
            coordinator_key: None,
            passphrase: passphrase.into(),
            keepalive_interval: Duration::from_secs(30),
            heartbeat_interval: Duration::from_secs(600),
            step_timeout: Duration::from_secs(10),
            migration_window: Duration::from_secs(30),
            agreement: Agreement::X25519,
        }
    }
}

/// Rotating key material shared between the timers and the event loop.
struct KeyState {
    challenge: String,
    expected_answer: String,
    key: SessionKey,
}

/// One established coordinator connection: socket, key state, and the
/// background tasks bound to it.
struct Link {
    socket: Arc<UdpSocket>,
    coordinator_addr: SocketAddr,
    keys: Mutex<KeyState>,
    tasks: Mutex<Vec<tokio::task::JoinHandle<()>>>,
}

impl Link {
    fn abort_tasks_blocking(&self) {
        if let Ok(tasks) = self.tasks.try_lock() {
            for task in tasks.iter() {
                task.abort();
            }
        }
    }

    async fn abort_tasks(&self) {
        for task in self.tasks.lock().await.drain(..) {
            task.abort();
        }
    }
}

struct Shared {
    identity: Arc<SigningIdentity>,
    config: NodeConfig,
    state: RwLock<ClientState>,
    link: RwLock<Option<Arc<Link>>>,
    events: mpsc::UnboundedSender<NodeEvent>,
    shutdown: watch::Sender<bool>,
}

/// The home-node protocol engine.
pub struct HomeNode {
    shared: Arc<Shared>,
}

impl HomeNode {
    /// Create an engine and the receiver for its events.
    #[must_use]
    pub fn new(
        config: NodeConfig,
        identity: Arc<SigningIdentity>,
    ) -> (Self, mpsc::UnboundedReceiver<NodeEvent>) {
        let (events, events_rx) = mpsc::unbounded_channel();
        let (shutdown, _) = watch::channel(false);
        let shared = Arc::new(Shared {
            identity,
            config,
            state: RwLock::new(ClientState::Disconnected),
            link: RwLock::new(None),
            events,
            shutdown,
        });
        (Self { shared }, events_rx)
    }

    /// Current registration state.
    pub async fn state(&self) -> ClientState {
        *self.shared.state.read().await
    }

    /// Register with the configured coordinator.
    ///
    /// Runs the full handshake sequentially, each step under the
    /// configured timeout, then starts the keepalive and heartbeat timers
    /// and the inbound event loop.
    ///
    /// # Errors
    ///
    /// Any failure reverts the engine to [`ClientState::Disconnected`] and
    /// surfaces the reason; retry cadence is the caller's responsibility.
    pub async fn register(&self) -> Result<()> {
        let shared = &self.shared;
        if *shared.shutdown.borrow() {
            return Err(NodeError::ShuttingDown);
        }
        {
            let mut state = shared.state.write().await;
            if *state == ClientState::Registered {
                return Err(NodeError::InvalidState("already registered"));
            }
            *state = ClientState::Registering;
        }

        match Shared::establish_link(
            shared,
            shared.config.coordinator_addr,
            shared.config.coordinator_key,
        )
        .await
        {
            Ok(link) => {
                *shared.link.write().await = Some(Arc::clone(&link));
                Shared::attach(shared, &link).await;
                *shared.state.write().await = ClientState::Registered;
                tracing::info!(coordinator = %link.coordinator_addr, "registered");
                Ok(())
            }
            Err(e) => {
                *shared.state.write().await = ClientState::Disconnected;
                Err(e)
            }
        }
    }

    /// Sign, seal, and send an answer for a relayed offer.
    ///
    /// # Errors
    ///
    /// Returns [`NodeError::NotRegistered`] without a live registration,
    /// or the underlying encode/seal/send failure.
    pub async fn submit_answer(&self, session_id: [u8; 16], payload: &[u8]) -> Result<()> {
        let link = self
            .shared
            .link
            .read()
            .await
            .clone()
            .ok_or(NodeError::NotRegistered)?;

        let mut envelope = AnswerEnvelope {
            public_key: self.shared.identity.verifying_key().to_bytes(),
            session_id,
            timestamp: unix_now(),
            payload: payload.to_vec(),
            signature: [0; 64],
        };
        envelope.signature = self
            .shared
            .identity
            .sign(&envelope.signed_bytes())
            .to_bytes();

        let keys = link.keys.lock().await;
        let sealed = keys.key.seal(&envelope.encode()?)?;
        drop(keys);

        link.socket
            .send(&encode_frame(MessageType::Answer, &sealed))
            .await?;
        Ok(())
    }

    /// Stop the engine: cancel all timers and loops, release the socket,
    /// and fail any in-flight registration with
    /// [`NodeError::ShuttingDown`].
    pub async fn shutdown(&self) {
        let _ = self.shared.shutdown.send(true);
        if let Some(link) = self.shared.link.write().await.take() {
            link.abort_tasks().await;
        }
        *self.shared.state.write().await = ClientState::Disconnected;
    }
}

impl Shared {
    /// Run the five handshake phases against `coordinator_addr` on a fresh
    /// socket and return the established link.
    async fn establish_link(
        shared: &Arc<Shared>,
        coordinator_addr: SocketAddr,
        pinned_key: Option<[u8; 32]>,
    ) -> Result<Arc<Link>> {
        let socket = UdpSocket::bind("0.0.0.0:0").await?;
        socket.connect(coordinator_addr).await?;
        let mut shutdown = shared.shutdown.subscribe();

        // HELLO -> HELLO_ACK
        let client_tag = random_tag()?;
        let hello = Hello { client_tag };
        socket
            .send(&encode_frame(MessageType::Hello, &hello.encode()))
            .await?;
        let payload = recv_step(
            &socket,
            MessageType::HelloAck,
            shared.config.step_timeout,
            &mut shutdown,
            "HELLO_ACK",
        )
        .await?;
        let ack = HelloAck::decode(&payload)?;
        if ack.client_tag != client_tag {
            return Err(NodeError::TagMismatch);
        }

        // ECDH_INIT -> ECDH_RESPONSE
        let pair = EphemeralKeyPair::generate(shared.config.agreement, &mut rand_core::OsRng);
        let client_ephemeral = pair.public_key().to_bytes();
        let init = EcdhInit {
            coordinator_tag: ack.coordinator_tag,
            ephemeral_public: client_ephemeral,
        };
        socket
            .send(&encode_frame(MessageType::EcdhInit, &init.encode()))
            .await?;
        let payload = recv_step(
            &socket,
            MessageType::EcdhResponse,
            shared.config.step_timeout,
            &mut shutdown,
            "ECDH_RESPONSE",
        )
        .await?;
        let response = EcdhResponse::decode(&payload)?;

        let shared_secret = pair.agree(&AgreementKey::from_bytes(response.ephemeral_public))?;
        let key = SessionKey::derive(shared_secret.as_bytes());

        let proof = KeyProof::decode(&key.open(&response.sealed)?)?;
        if let Some(pinned) = pinned_key {
            let verifying =
                VerifyingKey::from_bytes(&pinned).map_err(|_| NodeError::CoordinatorSignature)?;
            let mut binding = Vec::with_capacity(64);
            binding.extend_from_slice(&response.ephemeral_public);
            binding.extend_from_slice(&client_ephemeral);
            verifying
                .verify(&binding, &Signature::from_bytes(proof.signature))
                .map_err(|_| NodeError::CoordinatorSignature)?;
        }

        // REGISTER -> sealed ok
        let challenge = random_challenge()?;
        let answer_hash = hash_challenge_answer(&challenge, &shared.config.passphrase);
        let mut envelope = RegisterEnvelope {
            public_key: shared.identity.verifying_key().to_bytes(),
            timestamp: unix_now(),
            challenge: challenge.clone(),
            answer_hash: answer_hash.clone(),
            signature: [0; 64],
        };
        let signed = envelope.signed_bytes(&response.ephemeral_public, &client_ephemeral);
        envelope.signature = shared.identity.sign(&signed).to_bytes();

        let sealed = key.seal(&envelope.encode()?)?;
        socket
            .send(&encode_frame(MessageType::Register, &sealed))
            .await?;
        let payload = recv_step(
            &socket,
            MessageType::Register,
            shared.config.step_timeout,
            &mut shutdown,
            "registration ack",
        )
        .await?;
        if key.open(&payload)? != b"ok" {
            return Err(NodeError::AckInvalid);
        }

        // post-registration traffic is keyed by the rotating answer, not
        // the handshake secret
        Ok(Arc::new(Link {
            socket: Arc::new(socket),
            coordinator_addr,
            keys: Mutex::new(KeyState {
                challenge,
                expected_answer: answer_hash.clone(),
                key: SessionKey::from_answer(&answer_hash),
            }),
            tasks: Mutex::new(Vec::new()),
        }))
    }

    /// Spawn the event loop and both timers for `link`.
    async fn attach(shared: &Arc<Shared>, link: &Arc<Link>) {
        let mut tasks = link.tasks.lock().await;
        tasks.push(tokio::spawn(recv_loop(
            Arc::clone(shared),
            Arc::clone(link),
        )));
        tasks.push(tokio::spawn(keepalive_loop(
            Arc::clone(shared),
            Arc::clone(link),
        )));
        tasks.push(tokio::spawn(heartbeat_loop(
            Arc::clone(shared),
            Arc::clone(link),
        )));
    }

    /// Revert to Disconnected: surface the reason, then tear the link down.
    async fn disconnect(self: &Arc<Self>, reason: &str) {
        *self.state.write().await = ClientState::Disconnected;
        let link = self.link.write().await.take();
        let _ = self.events.send(NodeEvent::Disconnected {
            reason: reason.to_string(),
        });
        tracing::warn!(reason, "disconnected");
        // abort last: this may be called from one of the tasks being
        // aborted, and everything above must already be done
        if let Some(link) = link {
            link.abort_tasks_blocking();
        }
    }
}

/// Receive frames until one of the expected type arrives, the step times
/// out, or the engine shuts down. Unrelated datagrams are ignored.
async fn recv_step(
    socket: &UdpSocket,
    expected: MessageType,
    step_timeout: Duration,
    shutdown: &mut watch::Receiver<bool>,
    what: &'static str,
) -> Result<Vec<u8>> {
    let mut buf = vec![0u8; 65536];
    let deadline = tokio::time::sleep(step_timeout);
    tokio::pin!(deadline);

    loop {
        tokio::select! {
            _ = shutdown.changed() => return Err(NodeError::ShuttingDown),
            _ = &mut deadline => return Err(NodeError::Timeout(what)),
            recv = socket.recv(&mut buf) => {
                let len = recv?;
                if let Ok((msg_type, payload)) = decode_frame(&buf[..len]) {
                    if msg_type == expected {
                        return Ok(payload.to_vec());
                    }
                    tracing::debug!(?msg_type, "ignoring frame during handshake step");
                }
            }
        }
    }
}

/// Inbound event loop for one link: offers, migration, error signals.
async fn recv_loop(shared: Arc<Shared>, link: Arc<Link>) {
    let mut buf = vec![0u8; 65536];
    let mut shutdown = shared.shutdown.subscribe();

    loop {
        tokio::select! {
            _ = shutdown.changed() => break,
            recv = link.socket.recv(&mut buf) => {
                match recv {
                    Ok(len) => {
                        if handle_inbound(&shared, &link, &buf[..len]).await {
                            break;
                        }
                    }
                    Err(e) => {
                        tracing::warn!(error = %e, "receive error");
                        shared.disconnect("socket receive failed").await;
                        break;
                    }
                }
            }
        }
    }
}

/// Handle one coordinator datagram. Returns true when the loop must stop.
async fn handle_inbound(shared: &Arc<Shared>, link: &Arc<Link>, datagram: &[u8]) -> bool {
    let Ok((msg_type, payload)) = decode_frame(datagram) else {
        tracing::debug!("malformed datagram dropped");
        return false;
    };

    match msg_type {
        MessageType::Offer => {
            let keys = link.keys.lock().await;
            let opened = keys.key.open(payload);
            drop(keys);
            match opened.ok().and_then(|plain| OfferEnvelope::decode(&plain).ok()) {
                Some(envelope) => {
                    let _ = shared.events.send(NodeEvent::Offer {
                        session_id: envelope.session_id,
                        payload: envelope.payload,
                    });
                }
                None => tracing::debug!("undecryptable offer dropped"),
            }
            false
        }
        MessageType::Migrate => {
            let keys = link.keys.lock().await;
            let opened = keys.key.open(payload);
            drop(keys);
            match opened
                .ok()
                .and_then(|plain| MigrateEnvelope::decode(&plain).ok())
            {
                Some(envelope) => {
                    let _ = shared.events.send(NodeEvent::Migrate {
                        host: envelope.host.clone(),
                        port: envelope.port,
                        coordinator_key: envelope.coordinator_key,
                    });
                    tokio::spawn(migrate(
                        Arc::clone(shared),
                        envelope.host,
                        envelope.port,
                        envelope.coordinator_key,
                    ));
                }
                None => tracing::debug!("undecryptable migrate dropped"),
            }
            false
        }
        MessageType::Error => {
            shared.disconnect("coordinator signaled error").await;
            true
        }
        other => {
            tracing::debug!(?other, "unexpected frame dropped");
            false
        }
    }
}

/// Attempt a full independent handshake against the failover coordinator.
/// The current registration stays active until the new REGISTER is
/// acknowledged; on any failure within the window it stays, period.
fn migrate(
    shared: Arc<Shared>,
    host: String,
    port: u16,
    coordinator_key: [u8; 32],
) -> std::pin::Pin<Box<dyn std::future::Future<Output = ()> + Send>> {
    Box::pin(async move {
    let target = match tokio::net::lookup_host((host.as_str(), port)).await {
        Ok(mut addrs) => match addrs.next() {
            Some(addr) => addr,
            None => {
                tracing::warn!(%host, port, "failover coordinator did not resolve");
                return;
            }
        },
        Err(e) => {
            tracing::warn!(%host, port, error = %e, "failover coordinator did not resolve");
            return;
        }
    };

    let attempt = timeout(
        shared.config.migration_window,
        Shared::establish_link(&shared, target, Some(coordinator_key)),
    )
    .await;

    match attempt {
        Ok(Ok(new_link)) => {
            Shared::attach(&shared, &new_link).await;
            let old = shared.link.write().await.replace(Arc::clone(&new_link));
            if let Some(old) = old {
                old.abort_tasks().await;
            }
            tracing::info!(coordinator = %target, "migrated");
        }
        Ok(Err(e)) => {
            tracing::warn!(coordinator = %target, error = %e, "migration failed; keeping current coordinator");
        }
        Err(_) => {
            tracing::warn!(coordinator = %target, "migration window elapsed; keeping current coordinator");
        }
    }
    })
}

/// PING on the keepalive cadence. No payload, no reply expected.
async fn keepalive_loop(shared: Arc<Shared>, link: Arc<Link>) {
    let mut ticker = tokio::time::interval(shared.config.keepalive_interval);
    ticker.tick().await; // interval fires immediately; the registration just happened

    loop {
        ticker.tick().await;
        if let Err(e) = link
            .socket
            .send(&encode_frame(MessageType::Ping, &[]))
            .await
        {
            tracing::warn!(error = %e, "keepalive send failed");
        }
    }
}

/// Rotate the challenge pair on the heartbeat cadence.
///
/// The new pair is sealed under the *current* key and the local commit
/// happens strictly after the send: the coordinator and the node must
/// never disagree about which key is current, so a failed send leaves
/// this side on the old key too.
async fn heartbeat_loop(shared: Arc<Shared>, link: Arc<Link>) {
    let mut ticker = tokio::time::interval(shared.config.heartbeat_interval);
    ticker.tick().await;

    loop {
        ticker.tick().await;

        let challenge = match random_challenge() {
            Ok(challenge) => challenge,
            Err(e) => {
                tracing::warn!(error = %e, "challenge generation failed");
                continue;
            }
        };
        let answer_hash = hash_challenge_answer(&challenge, &shared.config.passphrase);
        let envelope = HeartbeatEnvelope {
            challenge: challenge.clone(),
            answer_hash: answer_hash.clone(),
        };

        let mut keys = link.keys.lock().await;
        let sealed = match envelope.encode().ok().and_then(|plain| keys.key.seal(&plain).ok()) {
            Some(sealed) => sealed,
            None => {
                tracing::warn!("heartbeat sealing failed");
                continue;
            }
        };

        match link
            .socket
            .send(&encode_frame(MessageType::Heartbeat, &sealed))
            .await
        {
            Ok(_) => {
                keys.challenge = challenge;
                keys.expected_answer = answer_hash.clone();
                keys.key = SessionKey::from_answer(&answer_hash);
                tracing::debug!("challenge rotated");
            }
            Err(e) => tracing::warn!(error = %e, "heartbeat send failed"),
        }
    }
}

/// Seconds since the unix epoch.
fn unix_now() -> u64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_secs())
        .unwrap_or(0)
}

#[cfg(test)]
mod tests {
    use super::*;
    use haven_crypto::SignatureScheme;
    use rand_core::OsRng;

    fn identity() -> Arc<SigningIdentity> {
        Arc::new(SigningIdentity::generate(
            SignatureScheme::Ed25519,
            &mut OsRng,
        ))
    }

    fn config(addr: &str) -> NodeConfig {
        let mut config = NodeConfig::new(addr.parse().unwrap(), "passphrase");
        config.step_timeout = Duration::from_millis(100);
        config
    }

    #[tokio::test]
    async fn test_initial_state_is_disconnected() {
        let (node, _events) = HomeNode::new(config("127.0.0.1:1"), identity());
        assert_eq!(node.state().await, ClientState::Disconnected);
    }

    #[tokio::test]
    async fn test_submit_answer_requires_registration() {
        let (node, _events) = HomeNode::new(config("127.0.0.1:1"), identity());
        let result = node.submit_answer([0; 16], b"answer").await;
        assert!(matches!(result, Err(NodeError::NotRegistered)));
    }

    #[tokio::test]
    async fn test_register_times_out_against_silence() {
        // a socket that never answers: registration must fail on the
        // HELLO_ACK step and revert to Disconnected
        let silent = UdpSocket::bind("127.0.0.1:0").await.unwrap();
        let addr = silent.local_addr().unwrap();

        let (node, _events) = HomeNode::new(config(&addr.to_string()), identity());
        let result = node.register().await;
        assert!(matches!(result, Err(NodeError::Timeout("HELLO_ACK"))));
        assert_eq!(node.state().await, ClientState::Disconnected);
    }

    #[tokio::test]
    async fn test_register_after_shutdown_fails() {
        let (node, _events) = HomeNode::new(config("127.0.0.1:1"), identity());
        node.shutdown().await;
        assert!(matches!(node.register().await, Err(NodeError::ShuttingDown)));
    }

    #[tokio::test]
    async fn test_shutdown_aborts_pending_registration() {
        let silent = UdpSocket::bind("127.0.0.1:0").await.unwrap();
        let addr = silent.local_addr().unwrap();

        let mut cfg = config(&addr.to_string());
        cfg.step_timeout = Duration::from_secs(30);
        let (node, _events) = HomeNode::new(cfg, identity());

        let shared = Arc::clone(&node.shared);
        let pending = tokio::spawn(async move {
            let node = HomeNode { shared };
            node.register().await
        });

        tokio::time::sleep(Duration::from_millis(50)).await;
        node.shutdown().await;

        let result = pending.await.unwrap();
        assert!(matches!(result, Err(NodeError::ShuttingDown)));
        assert_eq!(node.state().await, ClientState::Disconnected);
    }

    #[tokio::test]
    async fn test_hello_ack_tag_mismatch_aborts() {
        // a fake coordinator that echoes a wrong tag
        let fake = UdpSocket::bind("127.0.0.1:0").await.unwrap();
        let addr = fake.local_addr().unwrap();

        tokio::spawn(async move {
            let mut buf = [0u8; 1024];
            let (len, from) = fake.recv_from(&mut buf).await.unwrap();
            let (msg_type, _) = decode_frame(&buf[..len]).unwrap();
            assert_eq!(msg_type, MessageType::Hello);
            let ack = HelloAck {
                client_tag: [0xde, 0xad, 0xbe, 0xef],
                coordinator_tag: [1, 2, 3, 4],
            };
            fake.send_to(&encode_frame(MessageType::HelloAck, &ack.encode()), from)
                .await
                .unwrap();
        });

        let (node, _events) = HomeNode::new(config(&addr.to_string()), identity());
        let result = node.register().await;
        assert!(matches!(result, Err(NodeError::TagMismatch)));
        assert_eq!(node.state().await, ClientState::Disconnected);
    }

    #[test]
    fn test_config_defaults() {
        let config = NodeConfig::new("10.0.0.1:7000".parse().unwrap(), "p");
        assert_eq!(config.keepalive_interval, Duration::from_secs(30));
        assert_eq!(config.heartbeat_interval, Duration::from_secs(600));
        assert_eq!(config.migration_window, Duration::from_secs(30));
        assert!(config.coordinator_key.is_none());
        assert_eq!(config.agreement, Agreement::X25519);
    }
}

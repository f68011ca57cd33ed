//! Coordinator protocol engine.
//!
//! The UDP-facing state machine that drives home-nodes through the
//! five-phase handshake and serves post-registration traffic. Per-address
//! phase is implicit in which transient store holds an entry:
//! pre-hello → hello-pending → ecdh-pending → registered.
//!
//! Every inbound datagram resolves to a [`HandlerOutcome`]; per-message
//! failures never abort the engine or touch other peers' sessions. The
//! pre-authentication phases answer failure with silence only, so the
//! coordinator cannot be used as a reflection amplifier and leaks nothing
//! through its error behavior.

use std::collections::HashMap;
use std::net::SocketAddr;
use std::sync::Arc;
use std::time::{Duration, Instant, SystemTime, UNIX_EPOCH};
use tokio::net::UdpSocket;
use tokio::sync::{watch, Mutex};

use haven_crypto::agreement::{EphemeralKeyPair, PublicKey as AgreementKey};
use haven_crypto::random::{random_session_id, random_tag};
use haven_crypto::sealed::SessionKey;
use haven_crypto::signing::{Signature, SigningIdentity, VerifyingKey};
use haven_crypto::Agreement;
use haven_wire::payload::{
    AnswerEnvelope, EcdhInit, EcdhResponse, HeartbeatEnvelope, Hello, HelloAck, KeyProof,
    MigrateEnvelope, OfferEnvelope, RegisterEnvelope,
};
use haven_wire::{decode_frame, encode_frame, MessageType};

use crate::error::{CoordinatorError, DropReason};
use crate::ratelimit::AttemptWindow;
use crate::registry::{NodeKey, Registry, RegistryError};
use crate::signaling::{PollOutcome, SessionId, Signaling, SignalingError};

/// Coordinator engine configuration.
#[derive(Debug, Clone)]
pub struct CoordinatorConfig {
    /// Maximum registered home-nodes
    pub max_servers: usize,
    /// Registration expires after this much silence
    pub server_timeout: Duration,
    /// Maintenance tick (registry sweep, session expiry, limiter prune)
    pub sweep_interval: Duration,
    /// HELLO sessions expire after this long without an ECDH_INIT
    pub hello_timeout: Duration,
    /// Handshake sessions expire after this long without a REGISTER
    pub handshake_timeout: Duration,
    /// HELLO replies allowed per source address per rate window
    pub hello_rate_limit: u32,
    /// Authenticated messages allowed per registered address per window
    pub post_auth_rate_limit: u32,
    /// Connection offers allowed per target node per window
    pub offer_rate_limit: u32,
    /// Sliding rate window
    pub rate_window: Duration,
    /// Unanswered signaling sessions expire after this long
    pub signaling_timeout: Duration,
    /// Key agreement curve
    pub agreement: Agreement,
}

impl Default for CoordinatorConfig {
    fn default() -> Self {
        Self {
            max_servers: 1024,
            server_timeout: Duration::from_secs(300),
            sweep_interval: Duration::from_secs(60),
            hello_timeout: Duration::from_secs(30),
            handshake_timeout: Duration::from_secs(300),
            hello_rate_limit: 10,
            post_auth_rate_limit: 120,
            offer_rate_limit: 30,
            rate_window: Duration::from_secs(60),
            signaling_timeout: Duration::from_secs(60),
            agreement: Agreement::X25519,
        }
    }
}

/// Result of handling one inbound datagram.
#[derive(Debug)]
pub enum HandlerOutcome {
    /// Send these bytes back to the source address
    Reply(Vec<u8>),
    /// Handled, nothing to send
    NoReply,
    /// Dropped without a reply; the reason is logged, never transmitted
    Dropped(DropReason),
}

/// Tag state for an address that completed HELLO.
struct HelloSession {
    coordinator_tag: [u8; 4],
    created: Instant,
}

/// Key state for an address that completed ECDH_INIT.
struct HandshakeSession {
    coordinator_ephemeral: [u8; 32],
    client_ephemeral: [u8; 32],
    key: SessionKey,
    created: Instant,
}

/// The coordinator protocol engine.
pub struct CoordinatorEngine {
    socket: Arc<UdpSocket>,
    identity: Arc<SigningIdentity>,
    config: CoordinatorConfig,
    registry: Arc<Registry>,
    signaling: Arc<Signaling>,
    hello_sessions: Arc<Mutex<HashMap<SocketAddr, HelloSession>>>,
    handshakes: Arc<Mutex<HashMap<SocketAddr, HandshakeSession>>>,
    hello_limiter: Arc<Mutex<AttemptWindow<SocketAddr>>>,
    post_auth_limiter: Arc<Mutex<AttemptWindow<SocketAddr>>>,
    offer_limiter: Arc<Mutex<AttemptWindow<NodeKey>>>,
    shutdown: watch::Sender<bool>,
    maintenance: Mutex<Option<tokio::task::JoinHandle<()>>>,
}

impl CoordinatorEngine {
    /// Bind the engine to `addr`.
    ///
    /// # Errors
    ///
    /// Returns [`CoordinatorError::Bind`] if the socket cannot be bound.
    pub async fn bind(
        addr: SocketAddr,
        identity: Arc<SigningIdentity>,
        config: CoordinatorConfig,
    ) -> Result<Self, CoordinatorError> {
        let socket = UdpSocket::bind(addr).await.map_err(CoordinatorError::Bind)?;
        let (shutdown, _) = watch::channel(false);

        Ok(Self {
            socket: Arc::new(socket),
            identity,
            registry: Arc::new(Registry::new(config.max_servers, config.server_timeout)),
            signaling: Arc::new(Signaling::new(config.signaling_timeout)),
            hello_sessions: Arc::new(Mutex::new(HashMap::new())),
            handshakes: Arc::new(Mutex::new(HashMap::new())),
            hello_limiter: Arc::new(Mutex::new(AttemptWindow::new(config.rate_window))),
            post_auth_limiter: Arc::new(Mutex::new(AttemptWindow::new(config.rate_window))),
            offer_limiter: Arc::new(Mutex::new(AttemptWindow::new(config.rate_window))),
            config,
            shutdown,
            maintenance: Mutex::new(None),
        })
    }

    /// The address the engine is bound to.
    ///
    /// # Errors
    ///
    /// Returns [`CoordinatorError::Socket`] if the socket has no local address.
    pub fn local_addr(&self) -> Result<SocketAddr, CoordinatorError> {
        self.socket.local_addr().map_err(CoordinatorError::Socket)
    }

    /// The registration store.
    #[must_use]
    pub fn registry(&self) -> &Arc<Registry> {
        &self.registry
    }

    /// The signaling session store.
    #[must_use]
    pub fn signaling(&self) -> &Arc<Signaling> {
        &self.signaling
    }

    /// Run the engine until [`Self::shutdown`] is called.
    ///
    /// Datagrams are handled strictly sequentially: one message runs to
    /// completion, including its outbound send, before the next is read.
    ///
    /// # Errors
    ///
    /// Returns [`CoordinatorError::Socket`] on a hard send failure.
    pub async fn run(&self) -> Result<(), CoordinatorError> {
        tracing::info!(
            addr = %self.local_addr()?,
            identity = %self.identity.verifying_key(),
            "coordinator listening"
        );

        self.spawn_maintenance().await;

        let mut shutdown = self.shutdown.subscribe();
        let mut buf = vec![0u8; 65536];

        loop {
            tokio::select! {
                _ = shutdown.changed() => {
                    tracing::info!("coordinator stopping");
                    return Ok(());
                }
                recv = self.socket.recv_from(&mut buf) => {
                    match recv {
                        Ok((len, from)) => {
                            match self.handle_datagram(&buf[..len], from).await {
                                HandlerOutcome::Reply(bytes) => {
                                    self.socket
                                        .send_to(&bytes, from)
                                        .await
                                        .map_err(CoordinatorError::Socket)?;
                                }
                                HandlerOutcome::NoReply => {}
                                HandlerOutcome::Dropped(reason) => {
                                    tracing::debug!(%from, %reason, "datagram dropped");
                                }
                            }
                        }
                        // transient (ICMP-induced) receive errors are not fatal
                        Err(e) => tracing::warn!(error = %e, "receive error"),
                    }
                }
            }
        }
    }

    /// Stop the engine: cancel the maintenance task and unblock `run`.
    pub async fn shutdown(&self) {
        let _ = self.shutdown.send(true);
        if let Some(handle) = self.maintenance.lock().await.take() {
            handle.abort();
        }
    }

    /// Handle one inbound datagram.
    pub async fn handle_datagram(&self, datagram: &[u8], from: SocketAddr) -> HandlerOutcome {
        let (msg_type, payload) = match decode_frame(datagram) {
            Ok(frame) => frame,
            Err(_) => return HandlerOutcome::Dropped(DropReason::Malformed),
        };

        match msg_type {
            MessageType::Hello => self.handle_hello(payload, from).await,
            MessageType::EcdhInit => self.handle_ecdh_init(payload, from).await,
            MessageType::Register => self.handle_register(payload, from).await,
            MessageType::Ping => self.handle_ping(from).await,
            MessageType::Heartbeat => self.handle_heartbeat(payload, from).await,
            MessageType::Answer => self.handle_answer(payload, from).await,
            // coordinator-to-node types arriving inbound
            MessageType::HelloAck
            | MessageType::EcdhResponse
            | MessageType::Migrate
            | MessageType::Offer
            | MessageType::Error => HandlerOutcome::Dropped(DropReason::UnexpectedType),
        }
    }

    /// HELLO: rate-gate, issue a coordinator tag, echo the client's.
    ///
    /// The limiter runs before anything else because the source address is
    /// untrusted here; over the limit the datagram vanishes (an ERROR reply
    /// would make the coordinator an amplifier toward spoofed victims).
    async fn handle_hello(&self, payload: &[u8], from: SocketAddr) -> HandlerOutcome {
        let hello = match Hello::decode(payload) {
            Ok(hello) => hello,
            Err(_) => return HandlerOutcome::Dropped(DropReason::Malformed),
        };

        if !self
            .hello_limiter
            .lock()
            .await
            .check_and_record(from, self.config.hello_rate_limit)
        {
            return HandlerOutcome::Dropped(DropReason::RateLimited);
        }

        let coordinator_tag = match random_tag() {
            Ok(tag) => tag,
            Err(e) => {
                tracing::warn!(error = %e, "tag generation failed");
                return HandlerOutcome::NoReply;
            }
        };

        self.hello_sessions.lock().await.insert(
            from,
            HelloSession {
                coordinator_tag,
                created: Instant::now(),
            },
        );

        let ack = HelloAck {
            client_tag: hello.client_tag,
            coordinator_tag,
        };
        HandlerOutcome::Reply(encode_frame(MessageType::HelloAck, &ack.encode()))
    }

    /// ECDH_INIT: verify the hello tag, then (and only then) do the
    /// asymmetric work and reply with the sealed key proof.
    async fn handle_ecdh_init(&self, payload: &[u8], from: SocketAddr) -> HandlerOutcome {
        let init = match EcdhInit::decode(payload) {
            Ok(init) => init,
            Err(_) => return HandlerOutcome::Dropped(DropReason::Malformed),
        };

        // The tag gate sits before any asymmetric crypto: without a HELLO
        // round trip an attacker cannot make the coordinator burn CPU here.
        {
            let mut sessions = self.hello_sessions.lock().await;
            let verdict = match sessions.get(&from) {
                None => Err(DropReason::NoSession),
                Some(session) if session.created.elapsed() > self.config.hello_timeout => {
                    Err(DropReason::NoSession)
                }
                Some(session) if session.coordinator_tag != init.coordinator_tag => {
                    Err(DropReason::TagMismatch)
                }
                Some(_) => Ok(()),
            };
            match verdict {
                // consumed on the matching ECDH_INIT, expired ones swept out
                Ok(()) | Err(DropReason::NoSession) => {
                    sessions.remove(&from);
                }
                Err(_) => {}
            }
            if let Err(reason) = verdict {
                return HandlerOutcome::Dropped(reason);
            }
        }

        let pair = EphemeralKeyPair::generate(self.config.agreement, &mut rand_core::OsRng);
        let coordinator_ephemeral = pair.public_key().to_bytes();
        let peer_key = AgreementKey::from_bytes(init.ephemeral_public);
        let shared = match pair.agree(&peer_key) {
            Ok(shared) => shared,
            Err(_) => return HandlerOutcome::Dropped(DropReason::Malformed),
        };
        let key = SessionKey::derive(shared.as_bytes());

        let mut binding = Vec::with_capacity(64);
        binding.extend_from_slice(&coordinator_ephemeral);
        binding.extend_from_slice(&init.ephemeral_public);
        let signature = self.identity.sign(&binding);

        let proof = KeyProof {
            timestamp: unix_now(),
            signature: signature.to_bytes(),
        };
        let sealed = match key.seal(&proof.encode()) {
            Ok(sealed) => sealed,
            Err(e) => {
                tracing::warn!(error = %e, "key proof sealing failed");
                return HandlerOutcome::NoReply;
            }
        };

        self.handshakes.lock().await.insert(
            from,
            HandshakeSession {
                coordinator_ephemeral,
                client_ephemeral: init.ephemeral_public,
                key,
                created: Instant::now(),
            },
        );

        let response = EcdhResponse {
            ephemeral_public: coordinator_ephemeral,
            sealed,
        };
        HandlerOutcome::Reply(encode_frame(MessageType::EcdhResponse, &response.encode()))
    }

    /// REGISTER: open the sealed envelope, verify the identity signature
    /// over the ephemeral-key binding, create the registration.
    ///
    /// Failure is never acknowledged: an unauthenticated peer learns
    /// nothing about why its registration vanished.
    async fn handle_register(&self, payload: &[u8], from: SocketAddr) -> HandlerOutcome {
        let (envelope, session_key, binding) = {
            let mut handshakes = self.handshakes.lock().await;
            let expired = matches!(
                handshakes.get(&from),
                Some(session) if session.created.elapsed() > self.config.handshake_timeout
            );
            if expired {
                handshakes.remove(&from);
                return HandlerOutcome::Dropped(DropReason::NoSession);
            }
            let Some(session) = handshakes.get(&from) else {
                return HandlerOutcome::Dropped(DropReason::NoSession);
            };

            let plaintext = match session.key.open(payload) {
                Ok(plaintext) => plaintext,
                Err(_) => return HandlerOutcome::Dropped(DropReason::AuthenticationFailed),
            };
            let envelope = match RegisterEnvelope::decode(&plaintext) {
                Ok(envelope) => envelope,
                Err(_) => return HandlerOutcome::Dropped(DropReason::Malformed),
            };
            let binding = (session.coordinator_ephemeral, session.client_ephemeral);
            (envelope, session.key.clone(), binding)
        };

        let verifying = match VerifyingKey::from_bytes(&envelope.public_key) {
            Ok(key) => key,
            Err(_) => return HandlerOutcome::Dropped(DropReason::SignatureInvalid),
        };
        let signed = envelope.signed_bytes(&binding.0, &binding.1);
        let signature = Signature::from_bytes(envelope.signature);
        if verifying.verify(&signed, &signature).is_err() {
            return HandlerOutcome::Dropped(DropReason::SignatureInvalid);
        }

        match self
            .registry
            .register(
                envelope.public_key,
                from,
                envelope.challenge.clone(),
                envelope.answer_hash.clone(),
            )
            .await
        {
            Ok(()) => {}
            Err(RegistryError::CapacityExceeded) => {
                return HandlerOutcome::Dropped(DropReason::CapacityExceeded);
            }
        }

        let ack = match session_key.seal(b"ok") {
            Ok(ack) => ack,
            Err(e) => {
                tracing::warn!(error = %e, "registration ack sealing failed");
                return HandlerOutcome::NoReply;
            }
        };

        self.handshakes.lock().await.remove(&from);
        tracing::info!(
            key = %hex::encode(&envelope.public_key[..8]),
            %from,
            "home-node registered"
        );
        HandlerOutcome::Reply(encode_frame(MessageType::Register, &ack))
    }

    /// PING: timestamp refresh only. No payload, no crypto, no reply.
    async fn handle_ping(&self, from: SocketAddr) -> HandlerOutcome {
        self.registry.update_timestamp(from).await;
        HandlerOutcome::NoReply
    }

    /// HEARTBEAT: successful AEAD open under the current key *is* the
    /// authentication; on success the challenge pair rotates.
    async fn handle_heartbeat(&self, payload: &[u8], from: SocketAddr) -> HandlerOutcome {
        let Some((_, record)) = self.registry.lookup_by_address(from).await else {
            return HandlerOutcome::Dropped(DropReason::UnknownPeer);
        };

        if let Some(outcome) = self.post_auth_gate(from).await {
            return outcome;
        }

        let key = SessionKey::from_answer(&record.expected_answer);
        let plaintext = match key.open(payload) {
            Ok(plaintext) => plaintext,
            Err(_) => {
                // stale or wrong key: leave the record untouched, the
                // node's own timer will try again
                return HandlerOutcome::Dropped(DropReason::AuthenticationFailed);
            }
        };
        let envelope = match HeartbeatEnvelope::decode(&plaintext) {
            Ok(envelope) => envelope,
            Err(_) => return HandlerOutcome::Dropped(DropReason::Malformed),
        };

        self.registry
            .update_challenge(from, envelope.challenge, envelope.answer_hash)
            .await;
        HandlerOutcome::NoReply
    }

    /// ANSWER: open under the current key, verify the envelope signature
    /// against the claimed (and registered) identity, hand to signaling.
    async fn handle_answer(&self, payload: &[u8], from: SocketAddr) -> HandlerOutcome {
        let Some((registered_key, record)) = self.registry.lookup_by_address(from).await else {
            return HandlerOutcome::Dropped(DropReason::UnknownPeer);
        };

        if let Some(outcome) = self.post_auth_gate(from).await {
            return outcome;
        }

        let key = SessionKey::from_answer(&record.expected_answer);
        let plaintext = match key.open(payload) {
            Ok(plaintext) => plaintext,
            Err(_) => return HandlerOutcome::Dropped(DropReason::AuthenticationFailed),
        };
        let envelope = match AnswerEnvelope::decode(&plaintext) {
            Ok(envelope) => envelope,
            Err(_) => return HandlerOutcome::Dropped(DropReason::Malformed),
        };

        if envelope.public_key != registered_key {
            return HandlerOutcome::Dropped(DropReason::SignatureInvalid);
        }
        let verifying = match VerifyingKey::from_bytes(&envelope.public_key) {
            Ok(key) => key,
            Err(_) => return HandlerOutcome::Dropped(DropReason::SignatureInvalid),
        };
        let signature = Signature::from_bytes(envelope.signature);
        if verifying.verify(&envelope.signed_bytes(), &signature).is_err() {
            return HandlerOutcome::Dropped(DropReason::SignatureInvalid);
        }

        match self.signaling.target_of(&envelope.session_id) {
            Some(target) if target == envelope.public_key => {
                self.signaling
                    .store_answer(&envelope.session_id, envelope.payload);
                HandlerOutcome::NoReply
            }
            Some(_) => HandlerOutcome::Dropped(DropReason::NoSession),
            // the session may have expired while the node composed its
            // answer; nothing to do
            None => HandlerOutcome::NoReply,
        }
    }

    /// Post-authentication rate gate. Registered peers over the limit get
    /// an explicit ERROR frame (the relationship is authenticated enough
    /// to identify the target by address).
    async fn post_auth_gate(&self, from: SocketAddr) -> Option<HandlerOutcome> {
        let allowed = self
            .post_auth_limiter
            .lock()
            .await
            .check_and_record(from, self.config.post_auth_rate_limit);
        if allowed {
            None
        } else {
            tracing::warn!(%from, "registered peer over rate limit");
            Some(HandlerOutcome::Reply(encode_frame(MessageType::Error, &[])))
        }
    }

    /// Create a signaling session: validate the challenge answer against
    /// the target's current one, seal the offer under the target's key,
    /// dispatch it, and record the session.
    ///
    /// # Errors
    ///
    /// See [`SignalingError`]; these surface to the local (HTTP) caller
    /// only and never to the network peer.
    pub async fn create_session(
        &self,
        target_key: NodeKey,
        challenge_answer: &str,
        offer: &[u8],
    ) -> Result<SessionId, SignalingError> {
        let record = self
            .registry
            .lookup_by_key(&target_key)
            .await
            .ok_or(SignalingError::NotFound)?;

        if record.expected_answer != challenge_answer {
            return Err(SignalingError::InvalidChallenge);
        }

        if !self
            .offer_limiter
            .lock()
            .await
            .check_and_record(target_key, self.config.offer_rate_limit)
        {
            return Err(SignalingError::RateLimited);
        }

        let session_id = random_session_id().map_err(|_| SignalingError::Dispatch)?;
        let envelope = OfferEnvelope {
            session_id,
            payload: offer.to_vec(),
        };
        let key = SessionKey::from_answer(&record.expected_answer);
        let sealed = envelope
            .encode()
            .ok()
            .and_then(|plain| key.seal(&plain).ok())
            .ok_or(SignalingError::Dispatch)?;

        self.socket
            .send_to(&encode_frame(MessageType::Offer, &sealed), record.address)
            .await
            .map_err(|_| SignalingError::Dispatch)?;

        self.signaling.insert(session_id, target_key);
        tracing::debug!(
            session = %hex::encode(session_id),
            target = %hex::encode(&target_key[..8]),
            "offer dispatched"
        );
        Ok(session_id)
    }

    /// Poll a signaling session for its answer.
    ///
    /// # Errors
    ///
    /// See [`Signaling::poll`].
    pub fn poll_session(&self, session_id: &SessionId) -> Result<PollOutcome, SignalingError> {
        self.signaling.poll(session_id)
    }

    /// Point a registered node at a failover coordinator.
    ///
    /// # Errors
    ///
    /// [`SignalingError::NotFound`] if the key has no registration,
    /// [`SignalingError::Dispatch`] on seal or send failure.
    pub async fn send_migrate(
        &self,
        target_key: &NodeKey,
        host: &str,
        port: u16,
        new_coordinator_key: [u8; 32],
    ) -> Result<(), SignalingError> {
        let record = self
            .registry
            .lookup_by_key(target_key)
            .await
            .ok_or(SignalingError::NotFound)?;

        let envelope = MigrateEnvelope {
            host: host.to_string(),
            port,
            coordinator_key: new_coordinator_key,
        };
        let key = SessionKey::from_answer(&record.expected_answer);
        let sealed = envelope
            .encode()
            .ok()
            .and_then(|plain| key.seal(&plain).ok())
            .ok_or(SignalingError::Dispatch)?;

        self.socket
            .send_to(&encode_frame(MessageType::Migrate, &sealed), record.address)
            .await
            .map_err(|_| SignalingError::Dispatch)?;

        tracing::info!(
            target = %hex::encode(&target_key[..8]),
            %host,
            port,
            "migrate sent"
        );
        Ok(())
    }

    /// Spawn the single maintenance task: registry sweep, transient-session
    /// expiry, signaling expiry, limiter pruning. Cancelled by `shutdown`.
    async fn spawn_maintenance(&self) {
        let registry = Arc::clone(&self.registry);
        let signaling = Arc::clone(&self.signaling);
        let hello_sessions = Arc::clone(&self.hello_sessions);
        let handshakes = Arc::clone(&self.handshakes);
        let hello_limiter = Arc::clone(&self.hello_limiter);
        let post_auth_limiter = Arc::clone(&self.post_auth_limiter);
        let offer_limiter = Arc::clone(&self.offer_limiter);
        let hello_timeout = self.config.hello_timeout;
        let handshake_timeout = self.config.handshake_timeout;
        let interval = self.config.sweep_interval;

        let handle = tokio::spawn(async move {
            let mut ticker = tokio::time::interval(interval);
            loop {
                ticker.tick().await;
                let now = Instant::now();

                let expired = registry.sweep(now).await;
                if expired > 0 {
                    tracing::info!(expired, "registrations expired");
                }
                signaling.sweep(now);

                hello_sessions
                    .lock()
                    .await
                    .retain(|_, session| now.duration_since(session.created) <= hello_timeout);
                handshakes
                    .lock()
                    .await
                    .retain(|_, session| now.duration_since(session.created) <= handshake_timeout);

                hello_limiter.lock().await.prune();
                post_auth_limiter.lock().await.prune();
                offer_limiter.lock().await.prune();
            }
        });

        *self.maintenance.lock().await = Some(handle);
    }
}

/// Seconds since the unix epoch.
fn unix_now() -> u64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_secs())
        .unwrap_or(0)
}

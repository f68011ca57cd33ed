//! Authoritative store of registered home-nodes.
//!
//! Records are keyed by the node's long-term public key (compact 32-byte
//! encoding) with a secondary index by network address for O(1) reverse
//! lookup. Both maps live behind one lock so they can never disagree:
//! re-registering a key from a new address removes the old address entry
//! in the same critical section that writes the new one.

use std::collections::HashMap;
use std::net::SocketAddr;
use std::time::{Duration, Instant};
use thiserror::Error;
use tokio::sync::RwLock;

/// A home-node's long-term public key, compact encoding.
pub type NodeKey = [u8; 32];

/// Registry errors surfaced to local callers only, never to the network.
#[derive(Debug, Error, Clone, Copy, PartialEq, Eq)]
pub enum RegistryError {
    /// Registry is full and the key is not already present
    #[error("registry at capacity")]
    CapacityExceeded,
}

/// One registered home-node.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ServerRecord {
    /// Network address the registration arrived from
    pub address: SocketAddr,
    /// Current challenge nonce
    pub challenge: String,
    /// hex(SHA-256(challenge ∥ passphrase)) — the rotating key root
    pub expected_answer: String,
    /// Last time this node was heard from
    pub last_seen: Instant,
}

struct Inner {
    by_key: HashMap<NodeKey, ServerRecord>,
    by_addr: HashMap<SocketAddr, NodeKey>,
}

/// Registration store with forward and reverse indices.
pub struct Registry {
    inner: RwLock<Inner>,
    capacity: usize,
    server_timeout: Duration,
}

impl Registry {
    /// Create a registry bounded at `capacity` records.
    #[must_use]
    pub fn new(capacity: usize, server_timeout: Duration) -> Self {
        Self {
            inner: RwLock::new(Inner {
                by_key: HashMap::new(),
                by_addr: HashMap::new(),
            }),
            capacity,
            server_timeout,
        }
    }

    /// Insert or overwrite the record for `key`.
    ///
    /// A prior record under a different address has its old address-index
    /// entry removed first, so the index never points at a stale key.
    ///
    /// # Errors
    ///
    /// Returns [`RegistryError::CapacityExceeded`] when full and `key` is
    /// not already registered.
    pub async fn register(
        &self,
        key: NodeKey,
        address: SocketAddr,
        challenge: String,
        expected_answer: String,
    ) -> Result<(), RegistryError> {
        let mut guard = self.inner.write().await;
        let inner = &mut *guard;

        if inner.by_key.len() >= self.capacity && !inner.by_key.contains_key(&key) {
            return Err(RegistryError::CapacityExceeded);
        }

        if let Some(old) = inner.by_key.get(&key) {
            let old_address = old.address;
            if old_address != address {
                inner.by_addr.remove(&old_address);
            }
        }

        inner.by_key.insert(
            key,
            ServerRecord {
                address,
                challenge,
                expected_answer,
                last_seen: Instant::now(),
            },
        );
        inner.by_addr.insert(address, key);
        Ok(())
    }

    /// Refresh the timestamp for the record at `address`.
    ///
    /// Returns false for an unknown address; the caller ignores that
    /// silently (a PING from a non-registered address means nothing).
    pub async fn update_timestamp(&self, address: SocketAddr) -> bool {
        let mut guard = self.inner.write().await;
        let inner = &mut *guard;
        let Some(key) = inner.by_addr.get(&address).copied() else {
            return false;
        };
        if let Some(record) = inner.by_key.get_mut(&key) {
            record.last_seen = Instant::now();
            return true;
        }
        false
    }

    /// Replace the challenge pair and refresh the timestamp for the record
    /// at `address`, atomically.
    pub async fn update_challenge(
        &self,
        address: SocketAddr,
        challenge: String,
        expected_answer: String,
    ) -> bool {
        let mut guard = self.inner.write().await;
        let inner = &mut *guard;
        let Some(key) = inner.by_addr.get(&address).copied() else {
            return false;
        };
        if let Some(record) = inner.by_key.get_mut(&key) {
            record.challenge = challenge;
            record.expected_answer = expected_answer;
            record.last_seen = Instant::now();
            return true;
        }
        false
    }

    /// Look up a record by public key.
    pub async fn lookup_by_key(&self, key: &NodeKey) -> Option<ServerRecord> {
        self.inner.read().await.by_key.get(key).cloned()
    }

    /// Look up the key and record registered at `address`.
    pub async fn lookup_by_address(&self, address: SocketAddr) -> Option<(NodeKey, ServerRecord)> {
        let inner = self.inner.read().await;
        let key = inner.by_addr.get(&address)?;
        inner.by_key.get(key).map(|record| (*key, record.clone()))
    }

    /// Remove the record for `key`, if any.
    pub async fn remove(&self, key: &NodeKey) -> bool {
        let mut guard = self.inner.write().await;
        let inner = &mut *guard;
        match inner.by_key.remove(key) {
            Some(record) => {
                inner.by_addr.remove(&record.address);
                true
            }
            None => false,
        }
    }

    /// Remove every record not heard from within the server timeout.
    ///
    /// Returns the number of records removed. Runs on the maintenance
    /// interval, not on every access.
    pub async fn sweep(&self, now: Instant) -> usize {
        let timeout = self.server_timeout;
        let mut guard = self.inner.write().await;
        let inner = &mut *guard;

        let expired: Vec<(NodeKey, SocketAddr)> = inner
            .by_key
            .iter()
            .filter(|(_, record)| now.duration_since(record.last_seen) > timeout)
            .map(|(key, record)| (*key, record.address))
            .collect();

        for (key, address) in &expired {
            inner.by_key.remove(key);
            inner.by_addr.remove(address);
        }
        expired.len()
    }

    /// Number of live registrations.
    pub async fn len(&self) -> usize {
        self.inner.read().await.by_key.len()
    }

    /// Whether the registry holds no registrations.
    pub async fn is_empty(&self) -> bool {
        self.len().await == 0
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn addr(port: u16) -> SocketAddr {
        format!("10.0.0.1:{port}").parse().unwrap()
    }

    fn registry() -> Registry {
        Registry::new(8, Duration::from_secs(300))
    }

    #[tokio::test]
    async fn test_register_and_lookup() {
        let reg = registry();
        reg.register([1; 32], addr(1000), "c1".into(), "h1".into())
            .await
            .unwrap();

        let record = reg.lookup_by_key(&[1; 32]).await.unwrap();
        assert_eq!(record.address, addr(1000));
        assert_eq!(record.challenge, "c1");
        assert_eq!(record.expected_answer, "h1");

        let (key, _) = reg.lookup_by_address(addr(1000)).await.unwrap();
        assert_eq!(key, [1; 32]);
    }

    #[tokio::test]
    async fn test_reregistration_moves_address_index() {
        let reg = registry();
        reg.register([1; 32], addr(1000), "c1".into(), "h1".into())
            .await
            .unwrap();
        reg.register([1; 32], addr(2000), "c2".into(), "h2".into())
            .await
            .unwrap();

        // old address no longer resolves, new one does, exactly one record
        assert!(reg.lookup_by_address(addr(1000)).await.is_none());
        assert_eq!(reg.lookup_by_address(addr(2000)).await.unwrap().0, [1; 32]);
        assert_eq!(reg.len().await, 1);
    }

    #[tokio::test]
    async fn test_capacity_rejects_new_keys_only() {
        let reg = Registry::new(1, Duration::from_secs(300));
        reg.register([1; 32], addr(1000), "c".into(), "h".into())
            .await
            .unwrap();

        assert_eq!(
            reg.register([2; 32], addr(2000), "c".into(), "h".into())
                .await,
            Err(RegistryError::CapacityExceeded)
        );

        // overwriting an existing key is always allowed
        reg.register([1; 32], addr(3000), "c2".into(), "h2".into())
            .await
            .unwrap();
        assert_eq!(reg.len().await, 1);
    }

    #[tokio::test]
    async fn test_update_timestamp_unknown_address() {
        let reg = registry();
        assert!(!reg.update_timestamp(addr(9)).await);
    }

    #[tokio::test]
    async fn test_update_challenge_replaces_both_fields() {
        let reg = registry();
        reg.register([1; 32], addr(1000), "c1".into(), "h1".into())
            .await
            .unwrap();

        assert!(reg.update_challenge(addr(1000), "c2".into(), "h2".into()).await);

        let record = reg.lookup_by_key(&[1; 32]).await.unwrap();
        assert_eq!(record.challenge, "c2");
        assert_eq!(record.expected_answer, "h2");
    }

    #[tokio::test]
    async fn test_ping_does_not_touch_challenge() {
        let reg = registry();
        reg.register([1; 32], addr(1000), "c2".into(), "h2".into())
            .await
            .unwrap();

        assert!(reg.update_timestamp(addr(1000)).await);

        let record = reg.lookup_by_key(&[1; 32]).await.unwrap();
        assert_eq!(record.challenge, "c2");
        assert_eq!(record.expected_answer, "h2");
    }

    #[tokio::test]
    async fn test_remove_clears_both_indices() {
        let reg = registry();
        reg.register([1; 32], addr(1000), "c".into(), "h".into())
            .await
            .unwrap();

        assert!(reg.remove(&[1; 32]).await);
        assert!(!reg.remove(&[1; 32]).await);
        assert!(reg.lookup_by_address(addr(1000)).await.is_none());
        assert!(reg.is_empty().await);
    }

    #[tokio::test]
    async fn test_sweep_removes_exactly_expired() {
        let reg = Registry::new(8, Duration::from_secs(300));
        reg.register([1; 32], addr(1000), "c".into(), "h".into())
            .await
            .unwrap();
        reg.register([2; 32], addr(2000), "c".into(), "h".into())
            .await
            .unwrap();

        // nothing is older than the timeout yet
        assert_eq!(reg.sweep(Instant::now()).await, 0);
        assert_eq!(reg.len().await, 2);

        // a sweep from 301 seconds in the future expires everything
        let future = Instant::now() + Duration::from_secs(301);
        assert_eq!(reg.sweep(future).await, 2);
        assert!(reg.is_empty().await);
        assert!(reg.lookup_by_address(addr(1000)).await.is_none());
        assert!(reg.lookup_by_address(addr(2000)).await.is_none());
    }

    #[tokio::test]
    async fn test_sweep_spares_recently_seen() {
        let reg = Registry::new(8, Duration::from_secs(300));
        reg.register([1; 32], addr(1000), "c".into(), "h".into())
            .await
            .unwrap();

        let future = Instant::now() + Duration::from_secs(200);
        assert_eq!(reg.sweep(future).await, 0);
        assert_eq!(reg.len().await, 1);
    }
}

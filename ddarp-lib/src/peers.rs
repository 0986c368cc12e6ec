//! Peer registry: the source of truth for who to probe. Membership is a
//! copy-on-write map behind an `ArcSwap` so the probe path reads without
//! locking; per-peer dynamic state (last heard, liveness) lives in atomics
//! inside the shared record. Admin is the single membership writer.

use std::collections::HashMap;
use std::net::SocketAddr;
use std::sync::atomic::{AtomicU64, AtomicU8, Ordering};
use std::sync::{Arc, Mutex};

use arc_swap::ArcSwap;
use sha2::{Digest, Sha256};
use thiserror::Error;
use tracing::info;

use crate::types::{Liveness, NodeId, PeerKind};

/// Short digest of a shared secret, safe to log: lets operators confirm
/// both ends hold the same secret without exposing it.
fn secret_fingerprint(secret: &[u8]) -> String {
    let digest = Sha256::digest(secret);
    hex::encode(&digest[..4])
}

#[derive(Debug, Error, PartialEq, Eq)]
pub enum RegistryError {
    #[error("unknown peer: {0}")]
    UnknownPeer(NodeId),
}

#[derive(Debug)]
pub struct PeerRecord {
    pub node_id: NodeId,
    pub address: SocketAddr,
    shared_secret: Vec<u8>,
    pub kind: PeerKind,
    /// Wall-clock ns of the last authenticated receipt; 0 = never heard.
    last_heard_ns: AtomicU64,
    liveness: AtomicU8,
}

impl PeerRecord {
    fn new(node_id: NodeId, address: SocketAddr, shared_secret: Vec<u8>, kind: PeerKind) -> Self {
        Self {
            node_id,
            address,
            shared_secret,
            kind,
            last_heard_ns: AtomicU64::new(0),
            liveness: AtomicU8::new(Liveness::Unknown.as_u8()),
        }
    }

    pub fn shared_secret(&self) -> &[u8] {
        &self.shared_secret
    }

    pub fn liveness(&self) -> Liveness {
        Liveness::from_u8(self.liveness.load(Ordering::Relaxed))
    }

    pub fn last_heard_ns(&self) -> Option<u64> {
        match self.last_heard_ns.load(Ordering::Relaxed) {
            0 => None,
            ns => Some(ns),
        }
    }

    /// Authenticated receipt: refresh last-heard and promote to alive.
    pub fn touch(&self, now_ns: u64) {
        self.last_heard_ns.store(now_ns, Ordering::Relaxed);
        self.liveness
            .store(Liveness::Alive.as_u8(), Ordering::Relaxed);
    }

    fn set_liveness(&self, liveness: Liveness) {
        self.liveness.store(liveness.as_u8(), Ordering::Relaxed);
    }
}

/// Outcome of an idempotent add.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AddOutcome {
    Added,
    Updated,
    Unchanged,
}

type PeerMap = HashMap<NodeId, Arc<PeerRecord>>;

#[derive(Default)]
pub struct PeerRegistry {
    peers: ArcSwap<PeerMap>,
    // Serializes membership writers; readers never take it.
    write_lock: Mutex<()>,
}

impl PeerRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Idempotent add. Re-adding with a new address or secret updates in
    /// place, preserving the peer's liveness history.
    pub fn add_peer(
        &self,
        node_id: NodeId,
        address: SocketAddr,
        shared_secret: Vec<u8>,
        kind: PeerKind,
    ) -> AddOutcome {
        let _guard = self.write_lock.lock().unwrap_or_else(|e| e.into_inner());
        let current = self.peers.load();
        let outcome = match current.get(&node_id) {
            None => AddOutcome::Added,
            Some(existing)
                if existing.address == address
                    && existing.shared_secret == shared_secret
                    && existing.kind == kind =>
            {
                return AddOutcome::Unchanged;
            }
            Some(_) => AddOutcome::Updated,
        };

        let secret_fp = secret_fingerprint(&shared_secret);
        let record = Arc::new(PeerRecord::new(node_id.clone(), address, shared_secret, kind));
        if let (AddOutcome::Updated, Some(existing)) = (outcome, current.get(&node_id)) {
            record
                .last_heard_ns
                .store(existing.last_heard_ns.load(Ordering::Relaxed), Ordering::Relaxed);
            record.set_liveness(existing.liveness());
        }

        let mut next: PeerMap = (**current).clone();
        next.insert(node_id.clone(), record);
        self.peers.store(Arc::new(next));
        info!(peer = %node_id, %address, ?outcome, %secret_fp, "peer registered");
        outcome
    }

    pub fn remove_peer(&self, node_id: &NodeId) -> Result<Arc<PeerRecord>, RegistryError> {
        let _guard = self.write_lock.lock().unwrap_or_else(|e| e.into_inner());
        let current = self.peers.load();
        if !current.contains_key(node_id) {
            return Err(RegistryError::UnknownPeer(node_id.clone()));
        }
        let mut next: PeerMap = (**current).clone();
        let removed = next
            .remove(node_id)
            .ok_or_else(|| RegistryError::UnknownPeer(node_id.clone()))?;
        self.peers.store(Arc::new(next));
        info!(peer = %node_id, "peer removed");
        Ok(removed)
    }

    pub fn get(&self, node_id: &NodeId) -> Option<Arc<PeerRecord>> {
        self.peers.load().get(node_id).cloned()
    }

    /// Match a datagram source to a registered peer by address.
    pub fn by_address(&self, addr: &SocketAddr) -> Option<Arc<PeerRecord>> {
        self.peers
            .load()
            .values()
            .find(|p| p.address == *addr)
            .cloned()
    }

    /// Lock-free snapshot of the membership map.
    pub fn snapshot(&self) -> Arc<PeerMap> {
        self.peers.load_full()
    }

    pub fn len(&self) -> usize {
        self.peers.load().len()
    }

    pub fn is_empty(&self) -> bool {
        self.peers.load().is_empty()
    }

    pub fn touch(&self, node_id: &NodeId, now_ns: u64) {
        if let Some(peer) = self.peers.load().get(node_id) {
            peer.touch(now_ns);
        }
    }

    /// Demote peers that have gone quiet. Called from the housekeeping tick,
    /// never from the receive path, so alive -> dead always passes through
    /// suspect. Returns the transitions taken.
    pub fn sweep_liveness(
        &self,
        now_ns: u64,
        suspect_after_ms: u64,
        dead_after_ms: u64,
    ) -> Vec<(NodeId, Liveness, Liveness)> {
        let mut transitions = Vec::new();
        for peer in self.peers.load().values() {
            let Some(last_heard) = peer.last_heard_ns() else {
                continue;
            };
            let silent_ms = now_ns.saturating_sub(last_heard) / 1_000_000;
            let current = peer.liveness();
            let target = if silent_ms >= dead_after_ms {
                Liveness::Dead
            } else if silent_ms >= suspect_after_ms {
                Liveness::Suspect
            } else {
                continue;
            };
            // One rung per sweep: alive drops to suspect before dead.
            let next = match (current, target) {
                (Liveness::Alive, Liveness::Dead) => Liveness::Suspect,
                (c, t) if c == t => continue,
                (Liveness::Dead, Liveness::Suspect) => continue,
                (_, t) => t,
            };
            peer.set_liveness(next);
            transitions.push((peer.node_id.clone(), current, next));
        }
        transitions
    }
}

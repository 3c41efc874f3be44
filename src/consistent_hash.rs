//! Consistent hashing ring with virtual replicas.

use std::collections::HashMap;
use std::fmt::Debug;
use std::sync::Arc;

/// Pluggable hash function. Must be stable across processes since every node has to agree on key ownership.
pub type HashFn = Arc<dyn Fn(&[u8]) -> u32 + Send + Sync + 'static>;

/// Maps keys onto peers.
///
/// Every peer is put on the ring `replicas` times, at positions `hash("{i}{peer}")` for `i in 0..replicas`. A key
/// belongs to the peer owning the first position at or after `hash(key)`, wrapping around the end of the ring.
pub struct HashRing {
    hash:      HashFn,
    replicas:  usize,
    // Sorted
    positions: Vec<u32>,
    owners:    HashMap<u32, String>,
}

impl HashRing {
    /// Ring with CRC-32 (IEEE) hashing.
    pub fn new(replicas: usize) -> Self {
        Self::with_hasher(replicas, Arc::new(crc32fast::hash))
    }

    pub fn with_hasher(replicas: usize, hash: HashFn) -> Self {
        Self {
            hash,
            replicas,
            positions: Vec::new(),
            owners: HashMap::new(),
        }
    }

    #[inline]
    pub fn replicas(&self) -> usize {
        self.replicas
    }

    #[inline]
    pub fn is_empty(&self) -> bool {
        self.positions.is_empty()
    }

    /// Number of virtual positions on the ring.
    #[inline]
    pub fn len(&self) -> usize {
        self.positions.len()
    }

    /// Puts peers on the ring.
    ///
    /// Adding the same peer twice duplicates its positions. Membership changes are expected to rebuild the ring from
    /// scratch rather than add to an existing one.
    pub fn add<I, S>(&mut self, peers: I)
    where
        I: IntoIterator<Item = S>,
        S: AsRef<str>,
    {
        for peer in peers {
            let peer = peer.as_ref();
            for i in 0..self.replicas {
                let position = (self.hash)(format!("{i}{peer}").as_bytes());
                self.owners.insert(position, peer.to_string());
                self.positions.push(position);
            }
        }
        self.positions.sort_unstable();
    }

    /// The peer owning `key`, or `None` if the ring is empty.
    pub fn get(&self, key: &str) -> Option<&str> {
        if self.positions.is_empty() {
            return None;
        }

        let hash = (self.hash)(key.as_bytes());
        let idx = self.positions.partition_point(|&p| p < hash) % self.positions.len();

        self.owners.get(&self.positions[idx]).map(String::as_str)
    }
}

impl Debug for HashRing {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("HashRing")
            .field("replicas", &self.replicas)
            .field("positions", &self.positions.len())
            .finish()
    }
}

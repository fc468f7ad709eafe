//! SeenCache: a bounded, insertion-ordered set of packet IDs used for
//! duplicate detection. Two implementations share the same contract — an
//! in-memory LRU for the common case, and a sled-backed variant for
//! crash-survival of the "seen" set across restarts.

use std::collections::VecDeque;

use crate::error::EngineResult;

pub const DEFAULT_CAPACITY: usize = 1000;

/// Shared contract: `check_and_insert` returns `true` exactly when the id was
/// newly inserted — the caller should process the packet. `false` means the
/// id was already present and the packet is a duplicate.
pub trait SeenCache: Send + Sync {
    fn check_and_insert(&mut self, id: &str) -> EngineResult<bool>;
    fn len(&self) -> usize;
    fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

/// Amortized O(1) in-memory LRU set: a `HashSet` for membership plus a
/// `VecDeque` recording insertion order for oldest-eviction.
pub struct LruSeenCache {
    capacity: usize,
    members: std::collections::HashSet<String>,
    order: VecDeque<String>,
}

impl LruSeenCache {
    pub fn new(capacity: usize) -> Self {
        Self {
            capacity: capacity.max(1),
            members: std::collections::HashSet::new(),
            order: VecDeque::new(),
        }
    }
}

impl Default for LruSeenCache {
    fn default() -> Self {
        Self::new(DEFAULT_CAPACITY)
    }
}

impl SeenCache for LruSeenCache {
    fn check_and_insert(&mut self, id: &str) -> EngineResult<bool> {
        if self.members.contains(id) {
            return Ok(false);
        }
        if self.order.len() >= self.capacity {
            if let Some(oldest) = self.order.pop_front() {
                self.members.remove(&oldest);
            }
        }
        self.members.insert(id.to_string());
        self.order.push_back(id.to_string());
        Ok(true)
    }

    fn len(&self) -> usize {
        self.members.len()
    }
}

/// Durable variant backed by a sled tree (`seen_cache/{packet_id ->
/// insertion_epoch}`). Capacity is still enforced by tracking insertion
/// order in memory; only the membership test itself survives a restart.
pub struct DurableSeenCache {
    tree: sled::Tree,
    capacity: usize,
    order: VecDeque<String>,
}

impl DurableSeenCache {
    pub fn open(db: &sled::Db, capacity: usize) -> EngineResult<Self> {
        let tree = db.open_tree("seen_cache")?;
        let mut order: Vec<(String, i64)> = Vec::new();
        for entry in tree.iter() {
            let (k, v) = entry?;
            let id = String::from_utf8_lossy(&k).to_string();
            let epoch = i64::from_be_bytes(v.as_ref().try_into().unwrap_or([0; 8]));
            order.push((id, epoch));
        }
        order.sort_by_key(|(_, epoch)| *epoch);
        Ok(Self {
            tree,
            capacity: capacity.max(1),
            order: order.into_iter().map(|(id, _)| id).collect(),
        })
    }

    pub fn insert_at(&mut self, id: &str, epoch_ms: i64) -> EngineResult<bool> {
        if self.tree.contains_key(id)? {
            return Ok(false);
        }
        if self.order.len() >= self.capacity {
            if let Some(oldest) = self.order.pop_front() {
                self.tree.remove(oldest.as_bytes())?;
            }
        }
        self.tree.insert(id.as_bytes(), &epoch_ms.to_be_bytes())?;
        self.order.push_back(id.to_string());
        Ok(true)
    }
}

impl SeenCache for DurableSeenCache {
    fn check_and_insert(&mut self, id: &str) -> EngineResult<bool> {
        let now = chrono::Utc::now().timestamp_millis();
        self.insert_at(id, now)
    }

    fn len(&self) -> usize {
        self.order.len()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn new_id_is_processed_duplicate_is_dropped() {
        let mut c = LruSeenCache::new(10);
        assert!(c.check_and_insert("p1").unwrap());
        assert!(!c.check_and_insert("p1").unwrap());
    }

    #[test]
    fn bounded_capacity_evicts_oldest() {
        let mut c = LruSeenCache::new(2);
        assert!(c.check_and_insert("a").unwrap());
        assert!(c.check_and_insert("b").unwrap());
        assert!(c.check_and_insert("c").unwrap());
        assert_eq!(c.len(), 2);
        // "a" was the oldest, now evicted — it is seen as new again.
        assert!(c.check_and_insert("a").unwrap());
        // "c" is still within the window and must still read as a duplicate.
        assert!(!c.check_and_insert("c").unwrap());
    }

    #[test]
    fn len_never_exceeds_capacity() {
        let mut c = LruSeenCache::new(5);
        for i in 0..100 {
            c.check_and_insert(&format!("id-{i}")).unwrap();
            assert!(c.len() <= 5);
        }
    }

    #[test]
    fn durable_cache_survives_reopen() {
        let dir = tempfile::tempdir().unwrap();
        let db = sled::open(dir.path()).unwrap();
        {
            let mut c = DurableSeenCache::open(&db, 1000).unwrap();
            assert!(c.check_and_insert("p1").unwrap());
        }
        drop(db);
        let db2 = sled::open(dir.path()).unwrap();
        let mut c2 = DurableSeenCache::open(&db2, 1000).unwrap();
        assert!(!c2.check_and_insert("p1").unwrap());
    }

    #[test]
    fn durable_cache_respects_capacity_on_reopen() {
        let dir = tempfile::tempdir().unwrap();
        let db = sled::open(dir.path()).unwrap();
        let mut c = DurableSeenCache::open(&db, 2).unwrap();
        c.insert_at("a", 1).unwrap();
        c.insert_at("b", 2).unwrap();
        c.insert_at("c", 3).unwrap();
        assert_eq!(c.len(), 2);
    }
}

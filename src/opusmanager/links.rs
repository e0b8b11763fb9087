//! Link pools
//!
//! Disjoint sets of beat keys whose trees are kept identical, plus a reverse
//! index from key to pool. Pools with fewer than two members do not exist.

use std::collections::{BTreeSet, HashMap};

use crate::models::BeatKey;

#[derive(Debug, Clone, Default)]
pub struct LinkPools {
    pools: Vec<BTreeSet<BeatKey>>,
    index: HashMap<BeatKey, usize>,
    lock: usize,
}

impl LinkPools {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn pools(&self) -> &[BTreeSet<BeatKey>] {
        &self.pools
    }

    pub fn is_empty(&self) -> bool {
        self.pools.is_empty()
    }

    pub fn pool_of(&self, beat_key: BeatKey) -> Option<usize> {
        self.index.get(&beat_key).copied()
    }

    pub fn is_networked(&self, beat_key: BeatKey) -> bool {
        self.index.contains_key(&beat_key)
    }

    /// Enter a propagation scope. Scopes nest; only the outermost one fans out.
    pub fn lock(&mut self) {
        self.lock += 1;
    }

    pub fn unlock(&mut self) {
        self.lock = self.lock.saturating_sub(1);
    }

    pub fn is_locked(&self) -> bool {
        self.lock > 0
    }

    /// Every key sharing a pool with `beat_key`, sorted, including itself.
    /// Inside a nested propagation scope only `beat_key` is returned.
    pub fn get_all_linked(&self, beat_key: BeatKey) -> Vec<BeatKey> {
        if self.lock > 1 {
            return vec![beat_key];
        }
        match self.pool_of(beat_key) {
            Some(pool) => self.pools[pool].iter().copied().collect(),
            None => vec![beat_key],
        }
    }

    /// Make `keys` one pool, pulling each out of whatever pool it was in
    pub fn create_pool<I>(&mut self, keys: I)
    where
        I: IntoIterator<Item = BeatKey>,
    {
        let keys: BTreeSet<BeatKey> = keys.into_iter().collect();
        for key in &keys {
            self.detach_key(*key);
        }
        if keys.len() > 1 {
            self.pools.push(keys);
        }
        self.rebuild_index();
    }

    /// Add `beat_key` to an existing pool
    pub fn link_into(&mut self, beat_key: BeatKey, pool: usize) {
        if self.pool_of(beat_key) == Some(pool) {
            return;
        }
        let Some(mut members) = self.pools.get(pool).cloned() else {
            return;
        };
        members.insert(beat_key);
        self.pools[pool].clear();
        self.create_pool(members);
    }

    pub fn merge_pools(&mut self, first: usize, second: usize) {
        if first == second || first >= self.pools.len() || second >= self.pools.len() {
            return;
        }
        let mut members = self.pools[first].clone();
        members.extend(self.pools[second].iter().copied());
        self.pools[first].clear();
        self.pools[second].clear();
        self.create_pool(members);
    }

    /// Take `beat_key` out of its pool. Returns whether it was linked.
    pub fn unlink(&mut self, beat_key: BeatKey) -> bool {
        let linked = self.detach_key(beat_key);
        self.rebuild_index();
        linked
    }

    /// Dissolve the pool containing `beat_key`
    pub fn clear_pool(&mut self, beat_key: BeatKey) {
        if let Some(pool) = self.pool_of(beat_key) {
            self.pools[pool].clear();
            self.rebuild_index();
        }
    }

    pub fn snapshot(&self) -> Vec<BTreeSet<BeatKey>> {
        self.pools.clone()
    }

    pub fn restore(&mut self, pools: Vec<BTreeSet<BeatKey>>) {
        self.pools = pools;
        self.rebuild_index();
    }

    pub fn clear(&mut self) {
        self.pools.clear();
        self.index.clear();
    }

    /// Move every key through `f`; keys mapped to `None` leave their pool
    pub fn remap<F>(&mut self, f: F)
    where
        F: Fn(BeatKey) -> Option<BeatKey>,
    {
        self.pools = self
            .pools
            .iter()
            .map(|pool| pool.iter().filter_map(|key| f(*key)).collect())
            .collect();
        self.rebuild_index();
    }

    fn detach_key(&mut self, beat_key: BeatKey) -> bool {
        match self.index.remove(&beat_key) {
            Some(pool) => {
                self.pools[pool].remove(&beat_key);
                true
            }
            None => false,
        }
    }

    /// Drop undersized pools and reindex
    fn rebuild_index(&mut self) {
        self.pools.retain(|pool| pool.len() > 1);
        self.index.clear();
        for (pool, members) in self.pools.iter().enumerate() {
            for key in members {
                self.index.insert(*key, pool);
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn key(channel: usize, line_offset: usize, beat: usize) -> BeatKey {
        BeatKey::new(channel, line_offset, beat)
    }

    #[test]
    fn test_create_and_lookup() {
        let mut links = LinkPools::new();
        links.create_pool([key(0, 0, 2), key(0, 0, 0)]);
        assert!(links.is_networked(key(0, 0, 0)));
        assert_eq!(links.get_all_linked(key(0, 0, 2)), vec![key(0, 0, 0), key(0, 0, 2)]);
        assert_eq!(links.get_all_linked(key(1, 0, 0)), vec![key(1, 0, 0)]);
    }

    #[test]
    fn test_pair_dissolves_on_unlink() {
        let mut links = LinkPools::new();
        links.create_pool([key(0, 0, 0), key(0, 0, 1)]);
        assert!(links.unlink(key(0, 0, 0)));
        assert!(links.is_empty());
        assert!(!links.is_networked(key(0, 0, 1)));
    }

    #[test]
    fn test_merge_and_link_into() {
        let mut links = LinkPools::new();
        links.create_pool([key(0, 0, 0), key(0, 0, 1)]);
        links.create_pool([key(0, 0, 2), key(0, 0, 3)]);
        let first = links.pool_of(key(0, 0, 0)).unwrap();
        let second = links.pool_of(key(0, 0, 3)).unwrap();
        links.merge_pools(first, second);
        assert_eq!(links.pools().len(), 1);

        let pool = links.pool_of(key(0, 0, 0)).unwrap();
        links.link_into(key(1, 0, 0), pool);
        assert_eq!(links.get_all_linked(key(0, 0, 2)).len(), 5);
    }

    #[test]
    fn test_nested_lock_returns_single_key() {
        let mut links = LinkPools::new();
        links.create_pool([key(0, 0, 0), key(0, 0, 1)]);
        links.lock();
        assert_eq!(links.get_all_linked(key(0, 0, 0)).len(), 2);
        links.lock();
        assert_eq!(links.get_all_linked(key(0, 0, 0)), vec![key(0, 0, 0)]);
        links.unlock();
        links.unlock();
        assert!(!links.is_locked());
    }

    #[test]
    fn test_remap_drops_small_pools() {
        let mut links = LinkPools::new();
        links.create_pool([key(0, 0, 0), key(0, 0, 2)]);
        links.create_pool([key(0, 0, 1), key(0, 0, 3), key(0, 1, 3)]);

        // remove beat 0
        links.remap(|k| match k.beat {
            0 => None,
            beat => Some(k.with_beat(beat - 1)),
        });
        assert_eq!(links.pools().len(), 1);
        assert_eq!(
            links.get_all_linked(key(0, 0, 0)),
            vec![key(0, 0, 0), key(0, 0, 2), key(0, 1, 2)]
        );
    }

    #[test]
    fn test_snapshot_restore() {
        let mut links = LinkPools::new();
        links.create_pool([key(0, 0, 0), key(0, 0, 1)]);
        let snapshot = links.snapshot();
        links.clear();
        links.restore(snapshot);
        assert!(links.is_networked(key(0, 0, 1)));
    }
}

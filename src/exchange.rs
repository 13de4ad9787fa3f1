//! Reference subtable exchange.
//!
//! The task queue does not move data itself. It talks to an exchange that
//! caches reference subtables shipped in from other processes, counts how
//! many live tasks still reference each cached instance, and decides when
//! the process has nothing further to send or receive. The network side of
//! the exchange is not part of this crate; [LocalExchange] implements the
//! contract for a single process and backs the tests and demos.

use std::collections::{HashMap, VecDeque};
use std::sync::Arc;

use crate::task::CacheId;
use crate::tree::{NodeId, SubTable, Table};

/// Descriptor of a reference subtable announced to the task queue: the
/// source rank, the `(begin, count)` range in the source table and the
/// cache id under which the instance is held.
#[derive(Clone, Copy, PartialEq, Eq, Debug)]
pub struct SubtableDescriptor {
    /// Rank the subtable originates from.
    pub rank: usize,
    /// First point index of the subtable in the source table.
    pub begin: usize,
    /// Number of points the subtable covers.
    pub count: usize,
    /// Cache id of the held instance.
    pub cache_id: CacheId,
}

/// Contract between the task queue and the subtable exchange.
///
/// Every call is made while the task queue holds its own mutex, so an
/// implementation must not block on the network; it buffers outbound
/// messages instead.
pub trait SubtableExchange {
    /// Return the process-local reference table.
    fn local_table(&self) -> &Arc<Table>;

    /// Look up a cached subtable instance by its cache id.
    fn find_subtable(&self, cache_id: CacheId) -> Option<Arc<SubTable>>;

    /// Resolve a `(begin, count)` range against the local reference table.
    fn find_by_begin_count(&self, begin: usize, count: usize) -> Option<NodeId> {
        self.local_table().tree().find_by_begin_count(begin, count)
    }

    /// Increment the reference count of a cached instance `n` times.
    fn lock_cache(&mut self, cache_id: CacheId, n: usize);

    /// Decrement the reference count of a cached instance `n` times.
    fn release_cache(&mut self, cache_id: CacheId, n: usize);

    /// Report `units` of globally completed work for routing to peers.
    fn push_completed(&mut self, units: u64);

    /// Return true once the exchange has no pending traffic and no cached
    /// instance is referenced any more.
    fn can_terminate(&self) -> bool;

    /// Make progress on the exchange: buffer the outbound route requests
    /// and return the descriptors of subtables that arrived since the last
    /// call.
    fn send_receive(
        &mut self,
        thread_id: usize,
        outbound: &mut Vec<SubtableDescriptor>,
    ) -> Vec<SubtableDescriptor>;
}

struct CacheEntry {
    subtable: Option<Arc<SubTable>>,
    refcount: usize,
}

/// Exchange for a single process.
///
/// Subtables are staged explicitly and handed to the task queue on the
/// next [send_receive](SubtableExchange::send_receive) call. Staging a
/// range of the local table itself produces a descriptor without a cached
/// instance, which exercises the queue's fallback resolution path.
pub struct LocalExchange {
    local: Arc<Table>,
    cache: HashMap<CacheId, CacheEntry>,
    staged: VecDeque<SubtableDescriptor>,
    next_cache_id: CacheId,
    completed_units: u64,
}

impl LocalExchange {
    /// Create an exchange over the given local reference table.
    pub fn new(local: Arc<Table>) -> Self {
        Self {
            local,
            cache: HashMap::new(),
            staged: VecDeque::new(),
            next_cache_id: 0,
            completed_units: 0,
        }
    }

    fn fresh_cache_id(&mut self) -> CacheId {
        let cache_id = self.next_cache_id;
        self.next_cache_id += 1;
        cache_id
    }

    /// Stage a shipped subtable for delivery on the next `send_receive`.
    ///
    /// Returns the cache id under which the instance is held.
    pub fn stage_subtable(&mut self, subtable: SubTable) -> CacheId {
        let cache_id = self.fresh_cache_id();
        let descriptor = SubtableDescriptor {
            rank: subtable.rank(),
            begin: subtable.begin(),
            count: subtable.count(),
            cache_id,
        };

        self.cache.insert(
            cache_id,
            CacheEntry {
                subtable: Some(Arc::new(subtable)),
                refcount: 0,
            },
        );
        self.staged.push_back(descriptor);

        cache_id
    }

    /// Stage a range of the local table for delivery on the next
    /// `send_receive` without caching an instance.
    ///
    /// The range must match a node of the local tree.
    pub fn stage_local(&mut self, begin: usize, count: usize) -> CacheId {
        assert!(
            self.local.tree().find_by_begin_count(begin, count).is_some(),
            "({}, {}) does not match a node of the local reference tree",
            begin,
            count
        );

        let cache_id = self.fresh_cache_id();
        self.cache.insert(
            cache_id,
            CacheEntry {
                subtable: None,
                refcount: 0,
            },
        );
        self.staged.push_back(SubtableDescriptor {
            rank: self.local.rank(),
            begin,
            count,
            cache_id,
        });

        cache_id
    }

    /// Return the current reference count of a cached instance.
    pub fn refcount(&self, cache_id: CacheId) -> usize {
        self.cache
            .get(&cache_id)
            .map(|entry| entry.refcount)
            .unwrap_or(0)
    }

    /// Return the sum of all completed work units reported so far.
    pub fn completed_units(&self) -> u64 {
        self.completed_units
    }
}

impl SubtableExchange for LocalExchange {
    fn local_table(&self) -> &Arc<Table> {
        &self.local
    }

    fn find_subtable(&self, cache_id: CacheId) -> Option<Arc<SubTable>> {
        self.cache
            .get(&cache_id)
            .and_then(|entry| entry.subtable.clone())
    }

    fn lock_cache(&mut self, cache_id: CacheId, n: usize) {
        let entry = self
            .cache
            .get_mut(&cache_id)
            .unwrap_or_else(|| panic!("lock of unknown cache id {}", cache_id));
        entry.refcount += n;
    }

    fn release_cache(&mut self, cache_id: CacheId, n: usize) {
        let entry = self
            .cache
            .get_mut(&cache_id)
            .unwrap_or_else(|| panic!("release of unknown cache id {}", cache_id));
        debug_assert!(entry.refcount >= n, "cache refcount underflow");
        entry.refcount = entry.refcount.saturating_sub(n);
    }

    fn push_completed(&mut self, units: u64) {
        self.completed_units += units;
    }

    fn can_terminate(&self) -> bool {
        self.staged.is_empty() && self.cache.values().all(|entry| entry.refcount == 0)
    }

    fn send_receive(
        &mut self,
        _thread_id: usize,
        outbound: &mut Vec<SubtableDescriptor>,
    ) -> Vec<SubtableDescriptor> {
        // A single process has nobody to route to.
        outbound.clear();
        self.staged.drain(..).collect()
    }
}

#[cfg(test)]
mod test {
    use super::*;
    use crate::tools::generate_random_points;
    use crate::tree::Tree;
    use rand::prelude::*;
    use rand_chacha::ChaCha8Rng;

    fn local_table(npoints: usize) -> Arc<Table> {
        let mut rng = ChaCha8Rng::seed_from_u64(0);
        let points = generate_random_points(npoints, &mut rng, 0);
        Arc::new(Table::new(0, points, 16))
    }

    #[test]
    fn test_staged_subtable_arrives_once() {
        let local = local_table(64);
        let remote = local_table(64);
        let mut exchange = LocalExchange::new(local);

        let subtable = remote.extract_subtable(Tree::ROOT, 16);
        let cache_id = exchange.stage_subtable(subtable);

        let mut outbound = Vec::new();
        let arrivals = exchange.send_receive(0, &mut outbound);
        assert_eq!(arrivals.len(), 1);
        assert_eq!(arrivals[0].cache_id, cache_id);
        assert_eq!(arrivals[0].count, 64);

        // The staged queue is drained.
        assert!(exchange.send_receive(0, &mut outbound).is_empty());
    }

    #[test]
    fn test_local_staging_has_no_cached_instance() {
        let local = local_table(64);
        let mut exchange = LocalExchange::new(local.clone());

        let cache_id = exchange.stage_local(0, 64);
        assert!(exchange.find_subtable(cache_id).is_none());
        assert_eq!(
            exchange.find_by_begin_count(0, 64),
            Some(Tree::ROOT)
        );
    }

    #[test]
    fn test_lock_and_release_balance() {
        let local = local_table(64);
        let remote = local_table(64);
        let mut exchange = LocalExchange::new(local);

        let cache_id = exchange.stage_subtable(remote.extract_subtable(Tree::ROOT, 16));
        let mut outbound = Vec::new();
        exchange.send_receive(0, &mut outbound);

        exchange.lock_cache(cache_id, 2);
        exchange.lock_cache(cache_id, 1);
        assert_eq!(exchange.refcount(cache_id), 3);
        assert!(!exchange.can_terminate());

        exchange.release_cache(cache_id, 3);
        assert_eq!(exchange.refcount(cache_id), 0);
        assert!(exchange.can_terminate());
    }

    #[test]
    fn test_termination_waits_for_staged_arrivals() {
        let local = local_table(64);
        let mut exchange = LocalExchange::new(local);

        exchange.stage_local(0, 64);
        assert!(!exchange.can_terminate());

        let mut outbound = Vec::new();
        exchange.send_receive(0, &mut outbound);
        assert!(exchange.can_terminate());
    }
}

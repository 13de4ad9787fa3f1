//! The dual-tree task queue.
//!
//! One queue instance per process drives the shared-memory side of a
//! distributed dual-tree computation. The local query tree is partitioned
//! into a frontier of subtrees, each with its own priority heap of
//! (query subtree, reference subtree) tasks. Worker threads dequeue tasks,
//! evaluate them and report the completed work back; reference subtables
//! announced by the exchange are turned into new tasks, deduplicated per
//! query subtree through an interval set. When workers contend for the
//! same subtrees, the queue splits the largest busy subtree into its two
//! children and rebalances the pending tasks.
//!
//! All state lives behind one mutex. The per-subtree boolean locks handed
//! out on dequeue are advisory and only ever read or written under that
//! mutex; they tell other workers to stay away from a subtree while its
//! results are being accumulated.

use std::collections::BinaryHeap;
use std::sync::{Arc, Mutex, MutexGuard};

use crate::exchange::{SubtableDescriptor, SubtableExchange};
use crate::geometry::{BoundingBox, Metric};
use crate::intervals::DisjointIntervals;
use crate::task::{CacheId, QueryId, TableRef, Task};
use crate::tree::{NodeId, SubTable, Table, Tree};

/// Everything the queue tracks about one live query subtree.
struct SubtreeSlot {
    node: NodeId,
    heap: BinaryHeap<Task>,
    assigned: DisjointIntervals,
    remaining_work: u64,
    locked: bool,
}

struct QueueState<E> {
    query: Arc<Table>,
    slots: Vec<SubtreeSlot>,
    num_remaining_tasks: usize,
    remaining_global_work: u64,
    remaining_local_work: u64,
    split_requested: bool,
    // True when the query table is also the exchange's local reference
    // table. Only then can a task pair a node with itself.
    monochromatic: bool,
    exchange: E,
}

/// A resolved reference table handed to a worker along with its task.
pub enum ReferenceTable {
    /// The reference node lives in the process-local reference table.
    Local(Arc<Table>),
    /// The reference node lives in a cached subtable instance.
    Cached(Arc<SubTable>),
}

impl ReferenceTable {
    /// Return the table the reference node can be resolved against.
    pub fn table(&self) -> &Table {
        match self {
            ReferenceTable::Local(table) => table,
            ReferenceTable::Cached(subtable) => subtable.table(),
        }
    }
}

/// Shared-memory parallel task queue for a dual-tree computation.
pub struct TaskQueue<E> {
    inner: Mutex<QueueState<E>>,
}

impl<E: SubtableExchange> TaskQueue<E> {
    /// Create a queue over the local query table.
    ///
    /// The query tree is partitioned into a frontier of roughly one
    /// subtree per worker. `global_query_points` and
    /// `global_reference_points` are the point counts summed over all
    /// ranks; they seed the remaining-work counters that drive
    /// termination.
    pub fn new(
        query: Arc<Table>,
        exchange: E,
        num_workers: usize,
        global_query_points: u64,
        global_reference_points: u64,
    ) -> Self {
        let monochromatic = Arc::ptr_eq(&query, exchange.local_table());

        let slots: Vec<SubtreeSlot> = query
            .tree()
            .frontier(num_workers)
            .into_iter()
            .map(|node| SubtreeSlot {
                node,
                heap: BinaryHeap::new(),
                assigned: DisjointIntervals::new(),
                remaining_work: global_reference_points,
                locked: false,
            })
            .collect();

        let remaining_global_work = global_query_points * global_reference_points;
        let remaining_local_work = query.n_entries() as u64 * global_reference_points;

        Self {
            inner: Mutex::new(QueueState {
                query,
                slots,
                num_remaining_tasks: 0,
                remaining_global_work,
                remaining_local_work,
                split_requested: false,
                monochromatic,
                exchange,
            }),
        }
    }

    fn lock(&self) -> MutexGuard<'_, QueueState<E>> {
        self.inner.lock().expect("task queue mutex poisoned")
    }

    /// Turn a batch of announced reference subtables into tasks.
    ///
    /// Each descriptor is resolved through the exchange cache, falling
    /// back to the local reference table by `(begin, count)`. A descriptor
    /// that resolves nowhere has simply not arrived yet and is skipped.
    /// Every query subtree whose interval set has not seen the announced
    /// range gets one task, and the cache entry is locked once per task
    /// actually created.
    pub fn generate_tasks<M: Metric>(&self, metric: &M, arrivals: &[SubtableDescriptor]) {
        let mut state = self.lock();
        state.generate_tasks(metric, arrivals);
    }

    /// Dequeue the nearest pending task of the first unlocked query
    /// subtree, in ascending slot order.
    ///
    /// With `lock_subtree` set, the subtree is marked so that no other
    /// worker dequeues from it until [unlock](Self::unlock). Slots whose
    /// heap is empty and whose remaining work has reached zero are retired
    /// along the way by swapping in the tail slot. Callers must not hold
    /// any subtree lock when calling this, since the retired tail could
    /// otherwise be a slot they still reference.
    ///
    /// Returns the task and its slot index, or `None` if every pending
    /// task belongs to a locked subtree (the caller's cue to
    /// [request_split](Self::request_split)).
    pub fn dequeue(&self, lock_subtree: bool) -> Option<(Task, usize)> {
        let mut state = self.lock();

        let mut index = 0;
        while index < state.slots.len() {
            if !state.slots[index].heap.is_empty() {
                if !state.slots[index].locked {
                    if let Some(task) = state.slots[index].heap.pop() {
                        state.slots[index].locked = lock_subtree;
                        debug_assert!(state.num_remaining_tasks > 0);
                        state.num_remaining_tasks -= 1;
                        return Some((task, index));
                    }
                }
                index += 1;
            } else if state.slots[index].remaining_work == 0 {
                // Swap the tail into the probed slot and re-examine it. If
                // the probed slot is the tail itself this just drops it.
                state.slots.swap_remove(index);
            } else {
                index += 1;
            }
        }

        None
    }

    /// Dequeue the nearest pending task of one specific slot.
    ///
    /// Same acquisition rule as [dequeue](Self::dequeue) but without any
    /// compaction. Returns `None` when the slot is locked or its heap is
    /// empty; the caller keeps whatever state it had.
    pub fn dequeue_from(&self, index: usize, lock_subtree: bool) -> Option<Task> {
        let mut state = self.lock();

        if state.slots[index].locked {
            return None;
        }
        let task = state.slots[index].heap.pop()?;
        state.slots[index].locked = lock_subtree;
        debug_assert!(state.num_remaining_tasks > 0);
        state.num_remaining_tasks -= 1;
        Some(task)
    }

    /// Release the advisory lock on the query subtree with the given
    /// identity.
    pub fn unlock(&self, query_id: &QueryId) {
        let mut state = self.lock();
        let index = state.find_slot(query_id);
        state.slots[index].locked = false;
    }

    /// Report work completed against one query subtree.
    ///
    /// `ref_count` is the number of reference points the finished task
    /// covered; `units` is the number of (query point, reference point)
    /// pairs it reconciled.
    pub fn push_completed(&self, query_id: &QueryId, ref_count: u64, units: u64) {
        let mut state = self.lock();

        decrement(&mut state.remaining_global_work, units);
        decrement(&mut state.remaining_local_work, units);
        state.exchange.push_completed(units);

        let index = state.find_slot(query_id);
        decrement(&mut state.slots[index].remaining_work, ref_count);
    }

    /// Report work completed that cannot be attributed to a single query
    /// subtree; every live subtree's remaining work drops by `ref_count`.
    pub fn push_completed_all(&self, ref_count: u64, units: u64) {
        let mut state = self.lock();

        decrement(&mut state.remaining_global_work, units);
        decrement(&mut state.remaining_local_work, units);
        state.exchange.push_completed(units);

        for slot in &mut state.slots {
            decrement(&mut slot.remaining_work, ref_count);
        }
    }

    /// Release `n` reference counts on a cached subtable instance.
    ///
    /// Serialized through the queue mutex so releases cannot interleave
    /// with the lock increments performed during task generation.
    pub fn release_cache(&self, cache_id: CacheId, n: usize) {
        let mut state = self.lock();
        state.exchange.release_cache(cache_id, n);
    }

    /// Make progress on the exchange and integrate any arrived reference
    /// subtables as fresh tasks, all under one lock acquisition.
    pub fn send_receive<M: Metric>(
        &self,
        thread_id: usize,
        metric: &M,
        outbound: &mut Vec<SubtableDescriptor>,
    ) {
        let mut state = self.lock();
        let arrivals = state.exchange.send_receive(thread_id, outbound);
        if !arrivals.is_empty() {
            state.generate_tasks(metric, &arrivals);
        }
    }

    /// Request that the next [redistribute](Self::redistribute) pass split
    /// a query subtree.
    ///
    /// Raised by workers that saw pending work but found every
    /// corresponding subtree locked.
    pub fn request_split(&self) {
        let mut state = self.lock();
        state.split_requested = true;
    }

    /// Split one query subtree if a split was requested.
    ///
    /// Picks the unlocked non-leaf subtree with the most points and a
    /// non-empty heap, ties to the lowest slot, replaces it by its left
    /// child and appends the right child as a new slot. Pending tasks of
    /// the split subtree are re-issued against both children with freshly
    /// computed priorities. The request latch is cleared whether or not an
    /// eligible subtree existed.
    pub fn redistribute<M: Metric>(&self, metric: &M) {
        let mut state = self.lock();

        if !state.split_requested {
            return;
        }

        let mut split_index = None;
        let mut split_count = 0;
        for (index, slot) in state.slots.iter().enumerate() {
            if !slot.locked
                && !state.query.tree().is_leaf(slot.node)
                && !slot.heap.is_empty()
                && state.query.tree().count(slot.node) > split_count
            {
                split_count = state.query.tree().count(slot.node);
                split_index = Some(index);
            }
        }

        if let Some(index) = split_index {
            state.split_subtree(metric, index);
        }
        state.split_requested = false;
    }

    /// Return true once no work remains anywhere and the exchange has
    /// nothing further in flight.
    pub fn can_terminate(&self) -> bool {
        let state = self.lock();
        state.remaining_global_work == 0 && state.exchange.can_terminate()
    }

    /// Return the number of live query subtrees.
    pub fn num_query_subtrees(&self) -> usize {
        self.lock().slots.len()
    }

    /// Return the number of pending tasks across all query subtrees.
    pub fn num_remaining_tasks(&self) -> usize {
        self.lock().num_remaining_tasks
    }

    /// Return true if no task is pending.
    pub fn is_empty(&self) -> bool {
        self.lock().num_remaining_tasks == 0
    }

    /// Return the local query table.
    pub fn query_table(&self) -> Arc<Table> {
        self.lock().query.clone()
    }

    /// Return the wire identity of a task's query subtree.
    pub fn query_id(&self, task: &Task) -> QueryId {
        let state = self.lock();
        QueryId {
            rank: state.query.rank(),
            begin: state.query.tree().begin(task.query()),
            count: state.query.tree().count(task.query()),
        }
    }

    /// Resolve the reference table of a dequeued task so a worker can
    /// evaluate it outside the queue lock.
    pub fn reference_table(&self, task: &Task) -> ReferenceTable {
        let state = self.lock();
        match task.table() {
            TableRef::Local => ReferenceTable::Local(state.exchange.local_table().clone()),
            TableRef::Cached(cache_id) => {
                let subtable = state.exchange.find_subtable(cache_id).unwrap_or_else(|| {
                    panic!("task references evicted cache id {}", cache_id)
                });
                ReferenceTable::Cached(subtable)
            }
        }
    }

    /// Run a closure against the exchange under the queue mutex.
    pub fn with_exchange<R>(&self, body: impl FnOnce(&E) -> R) -> R {
        let state = self.lock();
        body(&state.exchange)
    }
}

impl<E: SubtableExchange> QueueState<E> {
    fn find_slot(&self, query_id: &QueryId) -> usize {
        let tree = self.query.tree();
        self.slots
            .iter()
            .position(|slot| {
                tree.begin(slot.node) == query_id.begin && tree.count(slot.node) == query_id.count
            })
            .unwrap_or_else(|| {
                panic!(
                    "no live query subtree matches ({}, {})",
                    query_id.begin, query_id.count
                )
            })
    }

    fn reference_bound(&self, table: TableRef, node: NodeId) -> BoundingBox {
        match table {
            TableRef::Local => self.exchange.local_table().tree().bound(node),
            TableRef::Cached(cache_id) => {
                let subtable = self.exchange.find_subtable(cache_id).unwrap_or_else(|| {
                    panic!("task references evicted cache id {}", cache_id)
                });
                subtable.table().tree().bound(node)
            }
        }
    }

    fn push_task<M: Metric>(
        &mut self,
        metric: &M,
        index: usize,
        table: TableRef,
        reference: NodeId,
        cache_id: CacheId,
    ) {
        let query_node = self.slots[index].node;
        let query_bound = self.query.tree().bound(query_node);
        let reference_bound = self.reference_bound(table, reference);
        let range = metric.squared_distance_range(&query_bound, &reference_bound);

        self.slots[index]
            .heap
            .push(Task::new(query_node, table, reference, cache_id, range.mid()));
        self.num_remaining_tasks += 1;
    }

    fn generate_tasks<M: Metric>(&mut self, metric: &M, arrivals: &[SubtableDescriptor]) {
        for descriptor in arrivals {
            // Grab the cached instance, or fall back to the local
            // reference table when none is held here.
            let resolved = match self.exchange.find_subtable(descriptor.cache_id) {
                Some(subtable) => Some((TableRef::Cached(descriptor.cache_id), Tree::ROOT, subtable.rank())),
                None => self
                    .exchange
                    .find_by_begin_count(descriptor.begin, descriptor.count)
                    .map(|node| (TableRef::Local, node, self.exchange.local_table().rank())),
            };
            // Data that has not arrived yet; a later announcement covers it.
            let Some((table, reference, rank)) = resolved else {
                continue;
            };

            for index in 0..self.slots.len() {
                if self.slots[index].assigned.insert(
                    rank,
                    descriptor.begin,
                    descriptor.begin + descriptor.count,
                ) {
                    self.push_task(metric, index, table, reference, descriptor.cache_id);
                    self.exchange.lock_cache(descriptor.cache_id, 1);
                }
            }
        }
    }

    fn split_subtree<M: Metric>(&mut self, metric: &M, index: usize) {
        let parent = self.slots[index].node;
        let (left, right) = self
            .query
            .tree()
            .children(parent)
            .expect("split target is never a leaf");

        // The slot keeps the left child; the right child gets a fresh slot
        // that inherits the parent's assignment history and work credit.
        self.slots[index].node = left;
        self.slots.push(SubtreeSlot {
            node: right,
            heap: BinaryHeap::new(),
            assigned: self.slots[index].assigned.clone(),
            remaining_work: self.slots[index].remaining_work,
            locked: false,
        });
        let right_index = self.slots.len() - 1;

        // Reissue the pending tasks against the two children. Priorities
        // are recomputed at push time since the bounds have changed.
        let drained = std::mem::take(&mut self.slots[index].heap).into_vec();
        debug_assert!(self.num_remaining_tasks >= drained.len());
        self.num_remaining_tasks -= drained.len();

        for task in drained {
            let self_pair = self.monochromatic
                && task.table() == TableRef::Local
                && task.reference() == parent
                && !self.query.tree().is_leaf(task.reference());

            if self_pair {
                // The reference side is the split node itself, so the
                // reference splits too: four child pairs instead of two.
                // One reference count carries over from the drained task;
                // three more cover the additional tasks.
                for slot in [index, right_index] {
                    for reference in [left, right] {
                        self.push_task(metric, slot, task.table(), reference, task.cache_id());
                    }
                }
                self.exchange.lock_cache(task.cache_id(), 3);
            } else {
                self.push_task(metric, index, task.table(), task.reference(), task.cache_id());
                self.push_task(
                    metric,
                    right_index,
                    task.table(),
                    task.reference(),
                    task.cache_id(),
                );
                self.exchange.lock_cache(task.cache_id(), 1);
            }
        }
    }
}

// Work counters only ever count down. Going below zero means completions
// were over-reported somewhere.
fn decrement(counter: &mut u64, amount: u64) {
    debug_assert!(*counter >= amount, "work counter underflow");
    *counter = counter.saturating_sub(amount);
}

//! Worker threads that drain a task queue.
//!
//! The queue itself only schedules; evaluating a (query subtree, reference
//! subtree) pair is the job of a kernel supplied by the caller. Workers
//! loop until the queue reports global termination: pump the exchange,
//! dequeue the nearest pending pair, evaluate it, report the completed
//! work and release the cache entry the task was holding.

use crate::exchange::{SubtableDescriptor, SubtableExchange};
use crate::geometry::Metric;
use crate::queue::TaskQueue;
use crate::task::QueryId;
use crate::tree::{NodeId, Table};

/// The numeric kernel evaluated once per task.
///
/// Implementations accumulate their results internally; the queue only
/// accounts for the number of point pairs each evaluation reconciles.
pub trait DualTreeKernel: Sync {
    /// Evaluate one pair of subtrees.
    ///
    /// `query_node` indexes into `query`'s tree and `reference_node` into
    /// `reference`'s tree; the point slices are available through
    /// [Table::points_of].
    fn evaluate(
        &self,
        query: &Table,
        query_node: NodeId,
        reference: &Table,
        reference_node: NodeId,
    );
}

impl<F> DualTreeKernel for F
where
    F: Fn(&Table, NodeId, &Table, NodeId) + Sync,
{
    fn evaluate(
        &self,
        query: &Table,
        query_node: NodeId,
        reference: &Table,
        reference_node: NodeId,
    ) {
        self(query, query_node, reference, reference_node)
    }
}

/// Run `num_workers` worker threads against the queue until it can
/// terminate.
pub fn run<E, K, M>(queue: &TaskQueue<E>, kernel: &K, metric: &M, num_workers: usize)
where
    E: SubtableExchange + Send,
    K: DualTreeKernel,
    M: Metric,
{
    assert!(num_workers > 0);

    std::thread::scope(|scope| {
        for thread_id in 0..num_workers {
            scope.spawn(move || worker_loop(queue, kernel, metric, thread_id));
        }
    });
}

fn worker_loop<E, K, M>(queue: &TaskQueue<E>, kernel: &K, metric: &M, thread_id: usize)
where
    E: SubtableExchange + Send,
    K: DualTreeKernel,
    M: Metric,
{
    let query = queue.query_table();
    let mut outbound = Vec::<SubtableDescriptor>::new();

    while !queue.can_terminate() {
        queue.send_receive(thread_id, metric, &mut outbound);

        let Some((task, _)) = queue.dequeue(true) else {
            // Pending work behind locked subtrees asks for a split.
            if queue.num_remaining_tasks() > 0 {
                queue.request_split();
            }
            queue.redistribute(metric);
            std::thread::yield_now();
            continue;
        };

        let reference = queue.reference_table(&task);
        kernel.evaluate(
            &query,
            task.query(),
            reference.table(),
            task.reference(),
        );

        let query_id = QueryId {
            rank: query.rank(),
            begin: query.tree().begin(task.query()),
            count: query.tree().count(task.query()),
        };
        let ref_count = reference.table().tree().count(task.reference()) as u64;
        let units = query_id.count as u64 * ref_count;

        queue.push_completed(&query_id, ref_count, units);
        queue.release_cache(task.cache_id(), 1);
        queue.unlock(&query_id);
    }
}

#[cfg(test)]
mod test {
    use super::*;
    use crate::exchange::LocalExchange;
    use crate::geometry::Euclidean;
    use crate::queue::TaskQueue;
    use crate::tools::generate_random_points;
    use crate::tree::Tree;
    use rand::prelude::*;
    use rand_chacha::ChaCha8Rng;
    use std::sync::atomic::{AtomicU64, Ordering};
    use std::sync::Arc;

    /// Count pairs closer than a radius by brute force over two slices.
    fn count_close_pairs(
        first: &[crate::geometry::Point],
        second: &[crate::geometry::Point],
        radius_sq: f64,
    ) -> u64 {
        let mut count = 0;
        for p in first {
            for q in second {
                let mut dist_sq = 0.0;
                for dim in 0..3 {
                    let diff = p.coords()[dim] - q.coords()[dim];
                    dist_sq += diff * diff;
                }
                if dist_sq <= radius_sq {
                    count += 1;
                }
            }
        }
        count
    }

    #[test]
    fn test_workers_reproduce_brute_force_pair_count() {
        let radius_sq = 0.05;
        let num_workers = 4;

        let mut rng = ChaCha8Rng::seed_from_u64(0);
        let points = generate_random_points(256, &mut rng, 0);
        let table = Arc::new(Table::new(0, points, 16));

        // Monochromatic run: the table is query and reference at once,
        // announced in one piece.
        let mut exchange = LocalExchange::new(table.clone());
        exchange.stage_local(0, 256);
        let queue = TaskQueue::new(table.clone(), exchange, num_workers, 256, 256);

        let found = AtomicU64::new(0);
        let kernel = |query: &Table, query_node: NodeId, reference: &Table, reference_node: NodeId| {
            let count = count_close_pairs(
                query.points_of(query_node),
                reference.points_of(reference_node),
                radius_sq,
            );
            found.fetch_add(count, Ordering::Relaxed);
        };

        run(&queue, &kernel, &Euclidean, num_workers);

        let expected = count_close_pairs(table.points(), table.points(), radius_sq);
        assert_eq!(found.load(Ordering::Relaxed), expected);
        assert!(queue.can_terminate());
        assert!(queue.is_empty());
    }

    #[test]
    fn test_single_worker_run_terminates() {
        let mut rng = ChaCha8Rng::seed_from_u64(1);
        let query_points = generate_random_points(64, &mut rng, 0);
        let reference_points = generate_random_points(96, &mut rng, 1000);

        let query = Arc::new(Table::new(0, query_points, 8));
        let reference = Arc::new(Table::new(0, reference_points, 8));

        let mut exchange = LocalExchange::new(reference.clone());
        // Announce the two halves of the reference table separately.
        let (left, right) = reference.tree().children(Tree::ROOT).unwrap();
        exchange.stage_subtable(reference.extract_subtable(left, 8));
        exchange.stage_subtable(reference.extract_subtable(right, 8));

        let queue = TaskQueue::new(query.clone(), exchange, 1, 64, 96);

        let evaluated = AtomicU64::new(0);
        let kernel = |query: &Table, query_node: NodeId, reference: &Table, reference_node: NodeId| {
            let pairs =
                query.tree().count(query_node) as u64 * reference.tree().count(reference_node) as u64;
            evaluated.fetch_add(pairs, Ordering::Relaxed);
        };

        run(&queue, &kernel, &Euclidean, 1);

        // Every (query point, reference point) pair was visited exactly
        // once.
        assert_eq!(evaluated.load(Ordering::Relaxed), 64 * 96);
        assert!(queue.can_terminate());
    }
}

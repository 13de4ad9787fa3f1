//! Multi-threaded dual-tree pair count on a single process.
use dualtree_queue::{generate_random_points, run, Euclidean, LocalExchange, NodeId, Table, TaskQueue};
use rand::prelude::*;
use rand_chacha::ChaCha8Rng;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

pub fn main() {
    let npoints = 20000;
    let leaf_size = 64;
    let num_workers = 8;
    let radius_sq = 0.001;

    let mut rng = ChaCha8Rng::seed_from_u64(0);
    let points = generate_random_points(npoints, &mut rng, 0);
    let table = Arc::new(Table::new(0, points, leaf_size));

    // Monochromatic run: the table plays both sides.
    let mut exchange = LocalExchange::new(table.clone());
    exchange.stage_local(0, npoints);

    let queue = TaskQueue::new(
        table.clone(),
        exchange,
        num_workers,
        npoints as u64,
        npoints as u64,
    );
    println!("Initial query subtrees: {}", queue.num_query_subtrees());

    let close_pairs = AtomicU64::new(0);
    let evaluated_tasks = AtomicU64::new(0);

    run(
        &queue,
        &|query: &Table, query_node: NodeId, reference: &Table, reference_node: NodeId| {
            let mut count = 0;
            for p in query.points_of(query_node) {
                for q in reference.points_of(reference_node) {
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
            close_pairs.fetch_add(count, Ordering::Relaxed);
            evaluated_tasks.fetch_add(1, Ordering::Relaxed);
        },
        &Euclidean,
        num_workers,
    );

    assert!(queue.can_terminate());

    println!("Evaluated tasks: {}", evaluated_tasks.load(Ordering::Relaxed));
    println!(
        "Pairs within squared radius {}: {}",
        radius_sq,
        close_pairs.load(Ordering::Relaxed)
    );
    println!("Finished.");
}

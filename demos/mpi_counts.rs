//! Per-rank queue construction with cluster-wide work accounting.
use dualtree_queue::parallel::{distributed_queue, global_point_count, SubtableId};
use dualtree_queue::{generate_random_points, Euclidean, LocalExchange, SubtableDescriptor, Table};
use mpi::traits::{Communicator, CommunicatorCollectives};
use rand::prelude::*;
use rand_chacha::ChaCha8Rng;
use std::sync::Arc;

pub fn main() {
    let universe = mpi::initialize().unwrap();
    let world = universe.world();
    let rank = world.rank();
    let n_per_rank = 5000;
    let leaf_size = 64;

    let mut rng = ChaCha8Rng::seed_from_u64(rank as u64);
    let points = generate_random_points(n_per_rank, &mut rng, rank as usize * n_per_rank);
    let table = Arc::new(Table::new(rank as usize, points, leaf_size));

    let global_points = global_point_count(table.n_entries(), &world);
    if rank == 0 {
        println!("Global point count: {}", global_points);
    }

    // Announce every rank's local root to every other rank. Announcements
    // whose data has not been shipped here resolve nowhere and are
    // skipped; only the local share turns into tasks.
    let mut exchange = LocalExchange::new(table.clone());
    let cache_id = exchange.stage_local(0, n_per_rank);

    let announcement = SubtableId::from_descriptor(&SubtableDescriptor {
        rank: rank as usize,
        begin: 0,
        count: n_per_rank,
        cache_id,
    });
    let mut announcements =
        vec![SubtableId { rank: 0, begin: 0, count: 0, cache_id: 0 }; world.size() as usize];
    world.all_gather_into(&announcement, &mut announcements[..]);
    if rank == 0 {
        for peer in &announcements {
            println!(
                "Rank {} announces ({}, {}) under cache id {}",
                peer.rank, peer.begin, peer.count, peer.cache_id
            );
        }
    }

    let queue = distributed_queue(&world, table.clone(), exchange, 1);

    // Pump the staged local announcement into tasks and drain them.
    let mut outbound = Vec::new();
    queue.send_receive(0, &Euclidean, &mut outbound);

    let mut evaluated = 0u64;
    while let Some((task, _)) = queue.dequeue(false) {
        let query_id = queue.query_id(&task);
        let reference = queue.reference_table(&task);
        let ref_count = reference.table().tree().count(task.reference()) as u64;

        evaluated += query_id.count as u64 * ref_count;
        queue.push_completed(&query_id, ref_count, query_id.count as u64 * ref_count);
        queue.release_cache(task.cache_id(), 1);
    }

    println!(
        "Rank {}: evaluated {} of {} local pair units",
        rank,
        evaluated,
        n_per_rank as u64 * global_points
    );
    println!(
        "Rank {}: {} tasks remaining, {} query subtrees live",
        rank,
        queue.num_remaining_tasks(),
        queue.num_query_subtrees()
    );
}

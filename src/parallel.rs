//! Cluster coordination helpers.
//!
//! The task queue itself is process local; what it needs from the cluster
//! is the global point counts that seed its work accounting, and fixed
//! wire representations for the identities that peers exchange. Both live
//! here, generic over the MPI communicator like the rest of the crate's
//! distributed code.

use std::sync::Arc;

use mpi::collective::SystemOperation;
use mpi::traits::{CommunicatorCollectives, Equivalence};

use crate::exchange::{SubtableDescriptor, SubtableExchange};
use crate::queue::TaskQueue;
use crate::task::QueryId;
use crate::tree::Table;

/// Compute the sum of a per-rank count over all ranks.
pub fn global_point_count<C: CommunicatorCollectives>(local_count: usize, comm: &C) -> u64 {
    let local_count = local_count as u64;
    let mut global_count = 0;

    comm.all_reduce_into(&local_count, &mut global_count, SystemOperation::sum());

    global_count
}

/// Build a task queue whose work counters span the whole communicator.
///
/// Sums the query and reference point counts over all ranks and seeds the
/// queue with them.
pub fn distributed_queue<C, E>(
    comm: &C,
    query: Arc<Table>,
    exchange: E,
    num_workers: usize,
) -> TaskQueue<E>
where
    C: CommunicatorCollectives,
    E: SubtableExchange,
{
    let global_query_points = global_point_count(query.n_entries(), comm);
    let global_reference_points = global_point_count(exchange.local_table().n_entries(), comm);

    TaskQueue::new(
        query,
        exchange,
        num_workers,
        global_query_points,
        global_reference_points,
    )
}

/// Wire representation of a reference subtable announcement.
#[derive(Clone, Copy, Equivalence)]
pub struct SubtableId {
    /// Rank the subtable originates from.
    pub rank: i32,
    /// First point index in the source table.
    pub begin: u64,
    /// Number of points covered.
    pub count: u64,
    /// Cache id of the held instance.
    pub cache_id: u64,
}

impl SubtableId {
    /// Convert from the in-process descriptor.
    pub fn from_descriptor(descriptor: &SubtableDescriptor) -> Self {
        Self {
            rank: descriptor.rank as i32,
            begin: descriptor.begin as u64,
            count: descriptor.count as u64,
            cache_id: descriptor.cache_id as u64,
        }
    }

    /// Convert into the in-process descriptor.
    pub fn to_descriptor(self) -> SubtableDescriptor {
        SubtableDescriptor {
            rank: self.rank as usize,
            begin: self.begin as usize,
            count: self.count as usize,
            cache_id: self.cache_id as usize,
        }
    }
}

/// Wire representation of a query subtree identity, used by peers to
/// attribute completed-work reports.
#[derive(Clone, Copy, Equivalence)]
pub struct QuerySubtreeId {
    /// Rank owning the query table.
    pub rank: i32,
    /// First point index of the subtree in the owning table.
    pub begin: u64,
    /// Number of points the subtree covers.
    pub count: u64,
}

impl QuerySubtreeId {
    /// Convert from the in-process identity.
    pub fn from_query_id(query_id: &QueryId) -> Self {
        Self {
            rank: query_id.rank as i32,
            begin: query_id.begin as u64,
            count: query_id.count as u64,
        }
    }

    /// Convert into the in-process identity.
    pub fn to_query_id(self) -> QueryId {
        QueryId {
            rank: self.rank as usize,
            begin: self.begin as usize,
            count: self.count as usize,
        }
    }
}

#[cfg(test)]
mod test {
    use super::*;

    #[test]
    fn test_subtable_id_round_trip() {
        let descriptor = SubtableDescriptor {
            rank: 3,
            begin: 128,
            count: 64,
            cache_id: 17,
        };

        let wire = SubtableId::from_descriptor(&descriptor);
        assert_eq!(wire.to_descriptor(), descriptor);
    }

    #[test]
    fn test_query_subtree_id_round_trip() {
        let query_id = QueryId {
            rank: 1,
            begin: 256,
            count: 32,
        };

        let wire = QuerySubtreeId::from_query_id(&query_id);
        assert_eq!(wire.to_query_id(), query_id);
    }
}

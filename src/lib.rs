//! A Rust based dual-tree task queue library
//!
//! This library provides the in-process core of a distributed dual-tree
//! computation: a [TaskQueue](crate::queue::TaskQueue) that dispatches pairs of query and
//! reference subtrees to worker threads, ordered so that geometrically close
//! pairs run first.
//!
//! A dual-tree computation reconciles every point of a query set against every
//! point of a reference set, pruning and batching through spatial trees built
//! over both sets. Across a cluster each process owns one fragment of the
//! query side and receives reference tree fragments from its peers through an
//! exchange. The queue turns every announced reference subtable into one task
//! per live query subtree, deduplicated through per-subtree interval sets, and
//! tracks the remaining work at three granularities: globally, per process and
//! per query subtree. When workers contend for the few remaining subtrees the
//! queue splits the largest busy subtree into its children and reissues the
//! pending tasks against both.
//!
//! The network side of the exchange is not part of this library. The
//! [SubtableExchange](crate::exchange::SubtableExchange) trait states the contract the queue relies on, and
//! [LocalExchange](crate::exchange::LocalExchange) implements it for a single process. Global point
//! counts for a real cluster run come from the MPI helpers in
//! [parallel](crate::parallel).
//!
//! ## Using the library.
//!
//! A queue is built over a point table, fed through an exchange and drained by
//! worker threads:
//! ```
//! use dualtree_queue::{
//!     generate_random_points, run, Euclidean, LocalExchange, NodeId, Table, TaskQueue,
//! };
//! use rand::prelude::*;
//! use rand_chacha::ChaCha8Rng;
//! use std::sync::atomic::{AtomicU64, Ordering};
//! use std::sync::Arc;
//!
//! let mut rng = ChaCha8Rng::seed_from_u64(0);
//! let points = generate_random_points(512, &mut rng, 0);
//! let table = Arc::new(Table::new(0, points, 32));
//!
//! // The table is both query and reference side of the computation.
//! let mut exchange = LocalExchange::new(table.clone());
//! exchange.stage_local(0, 512);
//!
//! let num_workers = 4;
//! let queue = TaskQueue::new(table.clone(), exchange, num_workers, 512, 512);
//!
//! // Count point pairs closer than a radius.
//! let close_pairs = AtomicU64::new(0);
//! run(
//!     &queue,
//!     &|query: &Table, query_node: NodeId, reference: &Table, reference_node: NodeId| {
//!         for p in query.points_of(query_node) {
//!             for q in reference.points_of(reference_node) {
//!                 let d: f64 = p
//!                     .coords()
//!                     .iter()
//!                     .zip(q.coords())
//!                     .map(|(a, b)| (a - b) * (a - b))
//!                     .sum();
//!                 if d <= 0.01 {
//!                     close_pairs.fetch_add(1, Ordering::Relaxed);
//!                 }
//!             }
//!         }
//!     },
//!     &Euclidean,
//!     num_workers,
//! );
//! assert!(queue.can_terminate());
//! ```
//! In this code we build a table over random points in the unit cube and
//! announce the whole of it as one reference subtable. The queue partitions
//! the query tree into roughly one subtree per worker and the workers drain
//! the resulting tasks, nearest pairs first, until the work counters and the
//! exchange both report completion.
#![cfg_attr(feature = "strict", deny(warnings), deny(unused_crate_dependencies))]
#![warn(missing_docs)]

pub mod driver;
pub mod exchange;
pub mod geometry;
pub mod intervals;
pub mod parallel;
pub mod queue;
pub mod task;
pub mod tools;
pub mod tree;

pub use crate::driver::{run, DualTreeKernel};
pub use crate::exchange::{LocalExchange, SubtableDescriptor, SubtableExchange};
pub use crate::geometry::{BoundingBox, DistRange, Euclidean, Metric, Point};
pub use crate::intervals::DisjointIntervals;
pub use crate::queue::TaskQueue;
pub use crate::task::{CacheId, QueryId, Task};
pub use crate::tools::generate_random_points;
pub use crate::tree::{NodeId, SubTable, Table, Tree};

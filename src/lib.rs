//! # tapcomm
//!
//! tapcomm builds topology-aware communication schedules for distributed
//! sparse linear algebra. Given, on every process, the global columns it
//! needs from other processes and their owners, it plans an exchange in
//! which data crossing node boundaries travels in few, aggregated messages
//! and everything else moves inside the node.
//!
//! ## Features
//! - Rank-to-node placement for cyclic, block and alternating launcher orderings
//! - Node-wide aggregation with traffic-driven replica counts
//! - Partner discovery through synchronous sends and a non-blocking barrier
//! - Four-phase execution (S, global, R, L) over any `Pod` value type, a
//!   two-step variant without the S phase, blocks of several values per
//!   column, and the transposed exchange that sums contributions into owners
//! - An in-process threaded backend for testing and an MPI backend
//!   (`mpi-support` feature)
//!
//! ## Determinism
//!
//! Schedules never depend on message arrival order: every list assembled from
//! any-source receives is ordered by source rank before it is used.
//!
//! ## Usage
//!
//! ```
//! use tapcomm::prelude::*;
//!
//! let out = run_world(2, |comm| {
//!     let cfg = TapConfig::default().with_ppn(1);
//!     let me = comm.rank();
//!     // rank r owns column r and needs the other one
//!     let deps = OffProcColumns::new(vec![1 - me], vec![1 - me]).unwrap();
//!     let tap = TapComm::build(&comm, &cfg, &deps, me..me + 1).unwrap();
//!     tap.communicate(&comm, &[me as f64 * 10.0]).unwrap()
//! });
//! assert_eq!(out, vec![vec![10.0], vec![0.0]]);
//! ```

pub mod algs;
pub mod config;
pub mod data;
pub mod tap_error;
pub mod topology;

/// A convenient prelude to import the most-used traits & types:
pub mod prelude {
    #[cfg(feature = "mpi-support")]
    pub use crate::algs::communicator::MpiComm;
    pub use crate::algs::communicator::{
        CommTag, Communicator, Source, ThreadComm, Wait, run_world,
    };
    pub use crate::algs::par_comm::ParComm;
    pub use crate::algs::tap::{TapComm, TapTags};
    pub use crate::config::{RankOrdering, TapConfig, TapVariant};
    pub use crate::data::columns::OffProcColumns;
    pub use crate::data::schedule::{CommData, ParSchedule};
    pub use crate::tap_error::TapError;
    pub use crate::topology::ProcessTopology;
}

//! Process placement on nodes.
//!
//! - [`process::ProcessTopology`] maps global ranks to `(node, local rank)` and back.
//! - [`node_set::NodeSet`] is the per-node bitset exchanged by the aggregation planner.

pub mod node_set;
pub mod process;

pub use node_set::NodeSet;
pub use process::ProcessTopology;

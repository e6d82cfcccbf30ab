//! Re-export public algorithms.

pub mod communicator;
pub mod exchange;
pub mod index_exchange;
pub mod par_comm;
pub mod permute;
pub mod tap;
pub mod wire;

pub use par_comm::ParComm;
pub use tap::{TapComm, TapTags};

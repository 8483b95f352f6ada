//! Worker side: the map and reduce executors, and an in-process cluster
//! that serves `DoTask` calls from the master.

pub mod core;
pub mod map;
pub mod reduce;

pub use crate::core::{LocalCluster, MRWorker, WorkerConfig};
pub use map::do_map;
pub use reduce::do_reduce;

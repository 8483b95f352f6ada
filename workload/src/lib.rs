//! Example MapReduce applications, looked up by name.

use common::Workload;

pub mod ii;
pub mod vertex_degree;
pub mod wc;

/// Names of every registered workload.
pub const NAMES: &[&str] = &["wc", "vertex-degree", "ii"];

/// Find a workload by name.
pub fn try_named(name: &str) -> Option<Workload> {
    match name {
        "wc" => Some(Workload {
            map_fn: wc::map,
            reduce_fn: wc::reduce,
        }),
        "vertex-degree" => Some(Workload {
            map_fn: vertex_degree::map,
            reduce_fn: vertex_degree::reduce,
        }),
        "ii" => Some(Workload {
            map_fn: ii::map,
            reduce_fn: ii::reduce,
        }),
        _ => None,
    }
}

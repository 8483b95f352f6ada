//! Shared types for the MapReduce dispatch engine.
//!
//! The master hands numbered map and reduce tasks to a pool of workers.
//! Everything both sides need to agree on lives here: the key-value record
//! type, the on-disk record codec, the file naming scheme and the task
//! descriptor that travels across the worker call boundary.

use std::fmt;
use std::fmt::Formatter;
use std::hash::Hasher;

use serde::{Deserialize, Serialize};

pub mod codec;
pub mod job;
pub mod rpc;

pub use job::{ans_name, merge_name, reduce_name, DoTaskArgs, TaskPhase};
pub use rpc::Invoker;

/////////////////////////////////////////////////////////////////////////////
// MapReduce application types
/////////////////////////////////////////////////////////////////////////////

/// A map function takes the name of an input split and its contents.
///
/// It returns every intermediate key-value pair the split produced.
pub type MapFn = fn(filename: &str, contents: &str) -> anyhow::Result<Vec<KeyValue>>;

/// A reduce function takes in a key and every value collected for that
/// key, in map-task order. It returns an [`anyhow::Result`]
/// containing a single output value.
pub type ReduceFn = fn(key: &str, values: &[String]) -> anyhow::Result<String>;

/// A map reduce application.
#[derive(Copy, Clone)]
pub struct Workload {
    pub map_fn: MapFn,
    pub reduce_fn: ReduceFn,
}

impl fmt::Debug for Workload {
    fn fmt(&self, f: &mut Formatter<'_>) -> fmt::Result {
        f.debug_struct("Workload").finish_non_exhaustive()
    }
}

/////////////////////////////////////////////////////////////////////////////
// Key-value pairs
/////////////////////////////////////////////////////////////////////////////

/// A single key-value pair.
#[derive(Clone, Eq, PartialEq, Hash, Debug, Serialize, Deserialize)]
pub struct KeyValue {
    /// The key.
    #[serde(rename = "Key")]
    pub key: String,

    /// The value.
    #[serde(rename = "Value")]
    pub value: String,
}

impl fmt::Display for KeyValue {
    fn fmt(&self, f: &mut Formatter<'_>) -> fmt::Result {
        write!(f, "{}: {}", self.key, self.value)
    }
}

impl KeyValue {
    /// Construct a new key-value pair from the given key and value.
    pub fn new(key: impl Into<String>, value: impl Into<String>) -> Self {
        Self {
            key: key.into(),
            value: value.into(),
        }
    }

    /// Get the key of this key-value pair.
    #[inline]
    pub fn key(&self) -> &str {
        &self.key
    }

    /// Get the value of this key-value pair.
    #[inline]
    pub fn value(&self) -> &str {
        &self.value
    }
}

/// Hashes an intermediate key. Compute a reduce bucket for a given key
/// by calculating `ihash(key) % n_reduce`.
pub fn ihash(key: &str) -> u32 {
    let mut hasher = fnv::FnvHasher::default();
    hasher.write(key.as_bytes());
    // Only the low 31 bits are kept, so the truncation is lossless.
    (hasher.finish() & 0x7fffffff) as u32
}

/// Reduce partition a key is routed to.
pub fn partition_for(key: &str, n_reduce: usize) -> usize {
    ihash(key) as usize % n_reduce.max(1)
}

//! The boundary between the master and its workers.
//!
//! Transport is not modelled here. A call either reports success or it
//! doesn't; the scheduler cannot tell a dead worker from a transient error
//! and treats both the same way.

use std::future::Future;
use std::sync::Arc;

use crate::job::DoTaskArgs;

/// Delivers a task descriptor to the worker at `endpoint` and waits for it
/// to finish.
pub trait Invoker: Send + Sync + 'static {
    /// Returns `true` only if the worker ran the task to completion.
    fn invoke(&self, endpoint: &str, args: DoTaskArgs) -> impl Future<Output = bool> + Send;
}

impl<T: Invoker> Invoker for Arc<T> {
    fn invoke(&self, endpoint: &str, args: DoTaskArgs) -> impl Future<Output = bool> + Send {
        (**self).invoke(endpoint, args)
    }
}

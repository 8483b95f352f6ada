use std::collections::HashMap;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

use tokio::sync::mpsc;
use tracing::{debug, info};

/// Address a worker can be reached at.
pub type WorkerAddress = String;

/// Distinguishes successive registrations of the same address.
type Generation = u64;

/// Registry for workers.
///
/// Idle workers sit in a hand-off queue. Taking a worker out of the queue
/// lends it to exactly one caller; the [`WorkerLease`] puts it back when
/// dropped. The queue is the only way to reach a worker, so one worker is
/// never lent to two callers at once.
#[derive(Debug)]
pub struct WorkerRegistry {
    /// Returning side of the hand-off queue. `None` once the registry is closed.
    sender: Mutex<Option<mpsc::UnboundedSender<(WorkerAddress, Generation)>>>,

    /// Borrowing side. Callers wait their turn here.
    receiver: tokio::sync::Mutex<mpsc::UnboundedReceiver<(WorkerAddress, Generation)>>,

    /// Workers currently registered, idle or lent out.
    registered: Mutex<HashMap<WorkerAddress, Generation>>,

    next_generation: Mutex<Generation>,
}

impl Default for WorkerRegistry {
    fn default() -> Self {
        let (sender, receiver) = mpsc::unbounded_channel();
        Self {
            sender: Mutex::new(Some(sender)),
            receiver: tokio::sync::Mutex::new(receiver),
            registered: Mutex::new(HashMap::new()),
            next_generation: Mutex::new(0),
        }
    }
}

fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(PoisonError::into_inner)
}

impl WorkerRegistry {
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    /// Add a worker and make it available.
    ///
    /// Returns `false` if the worker was already registered or the registry is closed.
    pub fn register_worker(&self, address: impl Into<WorkerAddress>) -> bool {
        let address = address.into();
        let sender = lock(&self.sender);
        let Some(sender) = sender.as_ref() else {
            return false;
        };

        let generation = {
            let mut registered = lock(&self.registered);
            if registered.contains_key(&address) {
                return false;
            }
            let mut next = lock(&self.next_generation);
            let generation = *next;
            *next += 1;
            registered.insert(address.clone(), generation);
            generation
        };

        info!("Worker {} registered", address);
        sender.send((address, generation)).is_ok()
    }

    /// Remove a worker from the registry.
    ///
    /// Note: A queued entry for the worker stays in the queue and is
    /// discarded when it reaches the front. A lent-out worker is not
    /// returned when its lease ends, even if the address registers again
    /// in the meantime.
    pub fn delete_worker(&self, address: &str) -> bool {
        let removed = lock(&self.registered).remove(address).is_some();
        if removed {
            info!("Worker {} left", address);
        }
        removed
    }

    /// Stop accepting registrations and worker returns.
    ///
    /// Callers waiting in [`WorkerRegistry::acquire`] get `None` once the
    /// workers still queued have been handed out.
    pub fn close(&self) {
        lock(&self.sender).take();
    }

    /// Number of registered workers.
    pub fn len(&self) -> usize {
        lock(&self.registered).len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn is_registered(&self, address: &str) -> bool {
        lock(&self.registered).contains_key(address)
    }

    fn is_current(&self, address: &str, generation: Generation) -> bool {
        lock(&self.registered).get(address) == Some(&generation)
    }

    /// Wait for an idle worker and borrow it.
    ///
    /// Returns `None` if the registry was closed and no worker is left.
    pub async fn acquire(self: &Arc<Self>) -> Option<WorkerLease> {
        let mut receiver = self.receiver.lock().await;

        while let Some((address, generation)) = receiver.recv().await {
            if self.is_current(&address, generation) {
                debug!("Lending worker {}", address);
                return Some(WorkerLease {
                    address,
                    generation,
                    registry: Arc::clone(self),
                });
            }
            debug!("Dropping stale queue entry for {}", address);
        }

        None
    }

    /// Put a worker back in the queue. Never blocks.
    fn release(&self, address: WorkerAddress, generation: Generation) {
        if !self.is_current(&address, generation) {
            return;
        }

        if let Some(sender) = lock(&self.sender).as_ref() {
            debug!("Worker {} is idle again", address);
            let _ = sender.send((address, generation));
        }
    }
}

/// A worker borrowed from the registry for one call.
///
/// Dropping the lease returns the worker, whatever the outcome of the call.
#[derive(Debug)]
pub struct WorkerLease {
    address: WorkerAddress,
    generation: Generation,
    registry: Arc<WorkerRegistry>,
}

impl WorkerLease {
    pub fn address(&self) -> &str {
        &self.address
    }
}

impl Drop for WorkerLease {
    fn drop(&mut self) {
        self.registry
            .release(std::mem::take(&mut self.address), self.generation);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;

    #[tokio::test]
    async fn lease_returns_worker_on_drop() {
        let registry = WorkerRegistry::new();
        assert!(registry.register_worker("w0"));

        let lease = registry.acquire().await.unwrap();
        assert_eq!(lease.address(), "w0");
        drop(lease);

        let again = registry.acquire().await.unwrap();
        assert_eq!(again.address(), "w0");
    }

    #[tokio::test]
    async fn borrowed_worker_is_not_lent_twice() {
        let registry = WorkerRegistry::new();
        registry.register_worker("w0");

        let _held = registry.acquire().await.unwrap();
        let second = tokio::time::timeout(Duration::from_millis(50), registry.acquire()).await;
        assert!(second.is_err(), "second caller must wait for the lease to end");
    }

    #[tokio::test]
    async fn waiting_caller_gets_worker_registered_later() {
        let registry = WorkerRegistry::new();

        let waiter = {
            let registry = Arc::clone(&registry);
            tokio::spawn(async move { registry.acquire().await.map(|l| l.address().to_string()) })
        };

        tokio::time::sleep(Duration::from_millis(20)).await;
        registry.register_worker("late");

        assert_eq!(waiter.await.unwrap().as_deref(), Some("late"));
    }

    #[tokio::test]
    async fn duplicate_registration_is_ignored() {
        let registry = WorkerRegistry::new();
        assert!(registry.register_worker("w0"));
        assert!(!registry.register_worker("w0"));
        assert_eq!(registry.len(), 1);
    }

    #[tokio::test]
    async fn deleted_worker_is_skipped_and_not_returned() {
        let registry = WorkerRegistry::new();
        registry.register_worker("gone");
        registry.register_worker("w1");

        registry.delete_worker("gone");
        let lease = registry.acquire().await.unwrap();
        assert_eq!(lease.address(), "w1");

        registry.delete_worker("w1");
        drop(lease);
        registry.close();
        assert!(registry.acquire().await.is_none());
    }

    #[tokio::test]
    async fn re_registered_worker_is_queued_once() {
        let registry = WorkerRegistry::new();
        registry.register_worker("w0");
        registry.delete_worker("w0");
        registry.register_worker("w0");

        let lease = registry.acquire().await.unwrap();
        assert_eq!(lease.address(), "w0");
        let second = tokio::time::timeout(Duration::from_millis(50), registry.acquire()).await;
        assert!(second.is_err(), "stale entry must not lend w0 a second time");
    }

    #[tokio::test]
    async fn closed_registry_hands_out_remaining_workers_then_none() {
        let registry = WorkerRegistry::new();
        registry.register_worker("w0");
        registry.close();

        assert!(!registry.register_worker("w1"));
        let lease = registry.acquire().await.unwrap();
        drop(lease);
        assert!(registry.acquire().await.is_none());
    }
}

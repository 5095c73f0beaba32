//! Per-host request admission.
//!
//! Every attempt, including retries on the same host and speculative
//! executions, takes a slot from the target host before it is sent. When
//! all slots are taken the attempt waits in a bounded queue; once the
//! queue is full the attempt fails with [`DriverError::Busy`] and the
//! orchestrator moves on to the next host of the plan.

use std::collections::HashMap;
use std::net::SocketAddr;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex, PoisonError};

use cql_core::{DriverError, Result};
use tokio::sync::{OwnedSemaphorePermit, Semaphore};

use crate::config::PoolingConfig;

#[derive(Debug)]
struct HostSlots {
    permits: Arc<Semaphore>,
    queued: AtomicUsize,
}

/// Decrements the wait counter when the waiter leaves the queue, including
/// when its future is dropped.
struct QueuePosition<'a>(&'a AtomicUsize);

impl Drop for QueuePosition<'_> {
    fn drop(&mut self) {
        self.0.fetch_sub(1, Ordering::AcqRel);
    }
}

/// A reserved in-flight slot on one host. Released on drop.
#[derive(Debug)]
pub struct RequestSlot {
    _permit: OwnedSemaphorePermit,
}

/// Bounded in-flight and queued request counts per host.
#[derive(Debug)]
pub struct RequestSlots {
    config: PoolingConfig,
    hosts: Mutex<HashMap<SocketAddr, Arc<HostSlots>>>,
}

impl RequestSlots {
    /// Creates admission state with the given limits.
    pub fn new(config: PoolingConfig) -> Self {
        Self {
            config,
            hosts: Mutex::new(HashMap::new()),
        }
    }

    fn slots_for(&self, address: SocketAddr) -> Arc<HostSlots> {
        let mut hosts = self.hosts.lock().unwrap_or_else(PoisonError::into_inner);
        Arc::clone(hosts.entry(address).or_insert_with(|| {
            Arc::new(HostSlots {
                permits: Arc::new(Semaphore::new(self.config.max_requests_per_host())),
                queued: AtomicUsize::new(0),
            })
        }))
    }

    /// Reserves a slot on `address`, waiting in the host queue if needed.
    pub async fn acquire(&self, address: SocketAddr) -> Result<RequestSlot> {
        let slots = self.slots_for(address);

        if let Ok(permit) = Arc::clone(&slots.permits).try_acquire_owned() {
            return Ok(RequestSlot { _permit: permit });
        }

        let busy = || DriverError::Busy {
            address,
            max_in_flight: self.config.max_requests_per_host(),
        };
        if slots.queued.fetch_add(1, Ordering::AcqRel) >= self.config.max_queued_per_host() {
            slots.queued.fetch_sub(1, Ordering::AcqRel);
            return Err(busy());
        }
        let _position = QueuePosition(&slots.queued);

        let permit = Arc::clone(&slots.permits)
            .acquire_owned()
            .await
            .map_err(|_| DriverError::Connection(format!("request slots for {} closed", address)))?;
        Ok(RequestSlot { _permit: permit })
    }

    /// Requests currently holding a slot on `address`.
    pub fn in_flight(&self, address: &SocketAddr) -> usize {
        let hosts = self.hosts.lock().unwrap_or_else(PoisonError::into_inner);
        hosts
            .get(address)
            .map(|s| self.config.max_requests_per_host() - s.permits.available_permits())
            .unwrap_or(0)
    }

    /// Requests currently waiting for a slot on `address`.
    pub fn queued(&self, address: &SocketAddr) -> usize {
        let hosts = self.hosts.lock().unwrap_or_else(PoisonError::into_inner);
        hosts
            .get(address)
            .map(|s| s.queued.load(Ordering::Acquire))
            .unwrap_or(0)
    }

    /// Drops the state of a removed host; pending waiters fail.
    pub fn remove(&self, address: &SocketAddr) {
        let removed = self
            .hosts
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .remove(address);
        if let Some(slots) = removed {
            slots.permits.close();
        }
    }
}

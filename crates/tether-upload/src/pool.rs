//! Collaborator seams: the contractor, the worker pool and the
//! fault-injection hook.
//!
//! The upload core only queries these; contract maintenance and the actual
//! piece transfers live behind them.

use std::collections::HashSet;

use tether_types::{ContractMap, HostPublicKey, HostUtilities};

/// Read-only view of the contract set.
pub trait Contractor: Send + Sync {
    /// Usable storage contracts keyed by host.
    fn contracts(&self) -> ContractMap;

    /// Offline / good-for-renew side tables for the contract hosts.
    fn host_utilities(&self) -> HostUtilities;
}

/// Read-only view of the upload worker pool.
pub trait WorkerPool: Send + Sync {
    /// Hosts a worker is currently connected to.
    fn hosts(&self) -> HashSet<HostPublicKey>;

    fn worker_count(&self) -> usize {
        self.hosts().len()
    }
}

/// Fault-injection hook consulted at named points in the driver.
pub trait Disruptor: Send + Sync {
    fn disrupt(&self, _tag: &str) -> bool {
        false
    }
}

/// Default disruptor: never fires.
pub struct NoDisruption;

impl Disruptor for NoDisruption {}

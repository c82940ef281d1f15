// Route reconciliation - converge a device's enabled routes on a desired set

use dashmap::DashMap;
use std::collections::HashSet;
use std::fmt;
use std::sync::Arc;
use thiserror::Error;
use tokio::sync::{Mutex, OwnedMutexGuard};

use crate::store::{MachineStore, StoreError};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ReconcilePhase {
    LoadRoutes,
    ExitNode,
    SubnetReset,
    SubnetEnable,
}

impl fmt::Display for ReconcilePhase {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::LoadRoutes => write!(f, "load routes"),
            Self::ExitNode => write!(f, "exit node"),
            Self::SubnetReset => write!(f, "subnet reset"),
            Self::SubnetEnable => write!(f, "subnet enable"),
        }
    }
}

/// A failed step. Steps committed before it stay committed.
#[derive(Error, Debug)]
#[error("{phase} phase failed{}: {source}", route_label(.route_id))]
pub struct ReconcileError {
    pub phase: ReconcilePhase,
    pub route_id: Option<u64>,
    pub source: StoreError,
}

fn route_label(route_id: &Option<u64>) -> String {
    match route_id {
        Some(id) => format!(" on route {}", id),
        None => String::new(),
    }
}

impl ReconcileError {
    fn new(phase: ReconcilePhase, route_id: Option<u64>, source: StoreError) -> Self {
        ReconcileError {
            phase,
            route_id,
            source,
        }
    }
}

/// One async mutex per machine. Holders see the machine's routes without
/// interleaving from other reconciliations.
#[derive(Debug, Default)]
pub struct RouteLocks {
    locks: DashMap<u64, Arc<Mutex<()>>>,
}

impl RouteLocks {
    pub fn new() -> Self {
        Self::default()
    }

    pub async fn acquire(&self, machine_id: u64) -> OwnedMutexGuard<()> {
        let lock = self.locks.entry(machine_id).or_default().clone();
        lock.lock_owned().await
    }

    /// Drop the lock entry of a deleted machine.
    pub fn forget(&self, machine_id: u64) {
        self.locks.remove(&machine_id);
    }
}

/// Set the exit node and subnet routes of a machine to exactly the desired state.
///
/// The exit route is switched first, then every subnet route is disabled and
/// finally the advertised subnets listed in `desired_subnets` are enabled.
/// Entries that match no advertised subnet are ignored. Each step is a
/// separate store call and the first failure aborts the rest; re-running the
/// call converges again. Callers serialize through [`RouteLocks`].
pub async fn set_subnet_and_exit(
    store: &dyn MachineStore,
    machine_id: u64,
    exit_enabled: bool,
    desired_subnets: &[String],
) -> Result<(), ReconcileError> {
    let routes = store
        .get_machine_routes(machine_id)
        .await
        .map_err(|e| ReconcileError::new(ReconcilePhase::LoadRoutes, None, e))?;

    tracing::debug!(
        "Reconciling {} routes on machine {} (exit node: {})",
        routes.len(),
        machine_id,
        exit_enabled
    );

    tracing::debug!("Machine {}: {} phase", machine_id, ReconcilePhase::ExitNode);
    for route in routes.iter().filter(|r| r.is_exit_route()) {
        let result = if exit_enabled && route.advertised {
            store.enable_route(route.id).await
        } else {
            store.disable_route(route.id).await
        };
        result.map_err(|e| ReconcileError::new(ReconcilePhase::ExitNode, Some(route.id), e))?;
    }

    let subnets: Vec<_> = routes.iter().filter(|r| !r.is_exit_route()).collect();

    tracing::debug!(
        "Machine {}: {} phase over {} subnets",
        machine_id,
        ReconcilePhase::SubnetReset,
        subnets.len()
    );
    for route in &subnets {
        store
            .disable_route(route.id)
            .await
            .map_err(|e| ReconcileError::new(ReconcilePhase::SubnetReset, Some(route.id), e))?;
    }

    let desired: HashSet<&str> = desired_subnets.iter().map(String::as_str).collect();
    tracing::debug!("Machine {}: {} phase", machine_id, ReconcilePhase::SubnetEnable);
    let mut enabled = 0;
    for route in subnets
        .iter()
        .filter(|r| r.advertised && desired.contains(r.cidr().as_str()))
    {
        store
            .enable_route(route.id)
            .await
            .map_err(|e| ReconcileError::new(ReconcilePhase::SubnetEnable, Some(route.id), e))?;
        enabled += 1;
    }

    tracing::debug!(
        "Machine {}: {} of {} requested subnets enabled",
        machine_id,
        enabled,
        desired.len()
    );

    Ok(())
}

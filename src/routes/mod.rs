// Routes module - advertised device routes, classification and reconciliation

pub mod classify;
pub mod reconcile;

use ipnetwork::IpNetwork;
use serde::{Deserialize, Serialize};

pub use classify::{classify, RouteView};
pub use reconcile::{set_subnet_and_exit, ReconcileError, ReconcilePhase, RouteLocks};

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Route {
    pub id: u64,
    pub machine_id: u64,
    pub prefix: IpNetwork,
    #[serde(default)]
    pub advertised: bool,
    #[serde(default)]
    pub enabled: bool,
}

impl Route {
    /// A default route (prefix length 0) marks the device as an exit node.
    pub fn is_exit_route(&self) -> bool {
        self.prefix.prefix() == 0
    }

    /// Canonical CIDR text, as shown to the console and matched on updates.
    pub fn cidr(&self) -> String {
        self.prefix.to_string()
    }
}

#[cfg(test)]
pub(crate) fn test_route(id: u64, prefix: &str, advertised: bool, enabled: bool) -> Route {
    Route {
        id,
        machine_id: 1,
        prefix: prefix.parse().unwrap(),
        advertised,
        enabled,
    }
}

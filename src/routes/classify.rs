// Route classification - exit node vs subnet routes

use serde::Serialize;

use super::Route;
use crate::api::nullable_list;

/// Console view of a device's routes. Lists keep route insertion order.
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct RouteView {
    pub has_subnets: bool,
    pub advertised_exit_node: bool,
    pub allowed_exit_node: bool,
    #[serde(rename = "advertisedIPs", serialize_with = "nullable_list")]
    pub advertised_ips: Vec<String>,
    #[serde(rename = "allowedIPs", serialize_with = "nullable_list")]
    pub allowed_ips: Vec<String>,
    #[serde(rename = "extraIPs", serialize_with = "nullable_list")]
    pub extra_ips: Vec<String>,
}

/// Partition a device's routes for the console.
///
/// Every advertised exit route counts: the device is an exit node when any
/// of them is advertised, and an allowed one when any of them is enabled.
pub fn classify(routes: &[Route]) -> RouteView {
    let mut view = RouteView::default();
    let mut exit_routes = 0;

    for route in routes {
        if route.is_exit_route() {
            exit_routes += 1;
            if exit_routes == 2 {
                tracing::warn!(
                    "Machine {} has more than one exit route (route {})",
                    route.machine_id,
                    route.id
                );
            }
            if route.advertised {
                view.advertised_exit_node = true;
                view.allowed_exit_node |= route.enabled;
            }
        } else if route.advertised {
            let cidr = route.cidr();
            view.has_subnets = true;
            view.advertised_ips.push(cidr.clone());
            if route.enabled {
                view.allowed_ips.push(cidr);
            } else {
                view.extra_ips.push(cidr);
            }
        }
    }

    view
}

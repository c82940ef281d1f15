// Console view of a machine, composed from stored fields and derived state

use chrono::{DateTime, FixedOffset, Utc};
use serde::Serialize;
use std::collections::BTreeMap;
use std::net::IpAddr;

use super::derp::{compute_preference, samples_from_report};
use super::expiry::describe;
use super::{Machine, User};
use crate::api::nullable_list;
use crate::routes::{classify, Route, RouteView};

const TIMESTAMP_FORMAT: &str = "%Y-%m-%d %H:%M:%S";

/// Rendering settings shared by every view.
#[derive(Debug, Clone, Copy)]
pub struct ViewSettings {
    pub offset: FixedOffset,
}

impl ViewSettings {
    pub fn format_timestamp(&self, ts: DateTime<Utc>) -> String {
        ts.with_timezone(&self.offset).format(TIMESTAMP_FORMAT).to_string()
    }
}

#[derive(Debug, Clone, Serialize)]
pub struct MachineStateView {
    pub name: String,
    pub useraccount: String,
    pub usernamehead: String,
    pub mipv4: String,
    pub mipv6: String,
    pub os: String,
    pub hostname: String,
    pub version: String,
    pub ifonline: bool,
    pub lastseen: String,
    pub createat: String,

    pub issharedin: bool,
    pub issharedout: bool,
    #[serde(rename = "neverExpires")]
    pub never_expires: bool,

    #[serde(flatten)]
    pub routes: RouteView,

    pub varies: bool,
    pub hairpinning: bool,
    pub ipv6en: bool,
    pub udpen: bool,
    pub upnpen: bool,
    pub pcpen: bool,
    pub pmpen: bool,

    pub expirydesc: String,

    #[serde(serialize_with = "nullable_list")]
    pub endpoints: Vec<String>,
    pub derps: Option<BTreeMap<String, i64>>,
    pub usederp: String,
    #[serde(rename = "automaticNameMode")]
    pub automatic_name_mode: bool,
}

/// Response to a machine update: naming and expiry state, plus the route
/// view when routes were touched.
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct MachineUpdateView {
    pub name: String,
    pub hostname: String,
    pub automatic_name_mode: bool,
    pub never_expires: bool,
    pub expires: String,
    #[serde(flatten)]
    pub routes: RouteView,
}

impl MachineUpdateView {
    pub fn new(machine: &Machine, expires: String, routes: RouteView) -> Self {
        MachineUpdateView {
            name: machine.given_name.clone(),
            hostname: machine.hostname.clone(),
            automatic_name_mode: machine.auto_gen_name,
            never_expires: machine.never_expires(),
            expires,
            routes,
        }
    }
}

/// First character of a display name, used as an avatar.
pub fn name_head(display_name: &str) -> String {
    display_name.chars().next().map(String::from).unwrap_or_default()
}

/// Client version without the build suffix, e.g. `1.50.1-t1234` -> `1.50.1`.
fn short_version(version: &str) -> &str {
    version.split('-').next().unwrap_or(version)
}

/// First IPv4 address and first non-IPv4 address.
fn split_addresses(addresses: &[IpAddr]) -> (String, String) {
    let v4 = addresses.iter().find(|a| a.is_ipv4());
    let v6 = addresses.iter().find(|a| !a.is_ipv4());
    (
        v4.map(ToString::to_string).unwrap_or_default(),
        v6.map(ToString::to_string).unwrap_or_default(),
    )
}

pub fn build_view(
    machine: &Machine,
    owner: &User,
    routes: &[Route],
    now: DateTime<Utc>,
    settings: &ViewSettings,
) -> MachineStateView {
    let net = &machine.net_info;
    let derp = compute_preference(&samples_from_report(&net.derp_latency), net.preferred_derp);
    let (mipv4, mipv6) = split_addresses(&machine.ip_addresses);

    let expirydesc = match machine.expiry {
        Some(expiry) => describe(expiry - now),
        None => String::new(),
    };

    MachineStateView {
        name: machine.given_name.clone(),
        useraccount: owner.name.clone(),
        usernamehead: name_head(&owner.display_name),
        mipv4,
        mipv6,
        os: machine.os.clone(),
        hostname: machine.hostname.clone(),
        version: short_version(&machine.ipn_version).to_string(),
        ifonline: machine.online,
        lastseen: machine
            .last_seen
            .map(|ts| settings.format_timestamp(ts))
            .unwrap_or_default(),
        createat: settings.format_timestamp(machine.created_at),
        issharedin: false,
        issharedout: false,
        never_expires: machine.never_expires(),
        routes: classify(routes),
        varies: net.mapping_varies_by_dest_ip == Some(true),
        hairpinning: net.hair_pinning == Some(true),
        ipv6en: net.working_ipv6 == Some(true),
        udpen: net.working_udp == Some(true),
        upnpen: net.upnp == Some(true),
        pcpen: net.pcp == Some(true),
        pmpen: net.pmp == Some(true),
        expirydesc,
        endpoints: machine.endpoints.clone(),
        derps: derp.effective,
        usederp: derp.preferred_label,
        automatic_name_mode: machine.auto_gen_name,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::routes::test_route;
    use chrono::Duration;

    fn settings() -> ViewSettings {
        ViewSettings {
            offset: FixedOffset::east_opt(8 * 3600).unwrap(),
        }
    }

    fn owner() -> User {
        User::new("alice", "Alice", 180)
    }

    fn now() -> DateTime<Utc> {
        "2024-06-01T00:00:00Z".parse().unwrap()
    }

    #[test]
    fn test_never_expires_skips_description() {
        let machine = Machine::new(1, "laptop", "alice");
        let view = build_view(&machine, &owner(), &[], now(), &settings());
        assert!(view.never_expires);
        assert_eq!(view.expirydesc, "");
    }

    #[test]
    fn test_expiry_description() {
        let mut machine = Machine::new(1, "laptop", "alice");
        machine.expiry = Some(now() + Duration::days(3) + Duration::hours(2));
        let view = build_view(&machine, &owner(), &[], now(), &settings());
        assert!(!view.never_expires);
        assert_eq!(view.expirydesc, "3 days remaining");

        machine.expiry = Some(now() - Duration::minutes(1));
        let view = build_view(&machine, &owner(), &[], now(), &settings());
        assert_eq!(view.expirydesc, "expired");
    }

    #[test]
    fn test_stored_fields() {
        let mut machine = Machine::new(1, "laptop", "alice");
        machine.last_seen = Some("2024-05-31T20:30:00Z".parse().unwrap());
        machine.online = true;
        machine.ip_addresses = vec!["fd7a:115c:a1e0::9".parse().unwrap(), "100.64.0.9".parse().unwrap()];
        machine.net_info.working_udp = Some(true);
        machine.net_info.upnp = Some(false);

        let view = build_view(&machine, &owner(), &[], now(), &settings());
        assert_eq!(view.name, "laptop");
        assert_eq!(view.usernamehead, "A");
        assert_eq!(view.version, "1.50.1");
        assert_eq!(view.mipv4, "100.64.0.9");
        assert_eq!(view.mipv6, "fd7a:115c:a1e0::9");
        assert_eq!(view.createat, "2024-03-01 12:00:00");
        assert_eq!(view.lastseen, "2024-06-01 04:30:00");
        assert!(view.ifonline);
        assert!(view.udpen);
        assert!(!view.upnpen);
        assert!(!view.pmpen);
    }

    #[test]
    fn test_relays_and_routes() {
        let mut machine = Machine::new(1, "router", "alice");
        machine.net_info.preferred_derp = 2;
        machine.net_info.derp_latency.insert("2-v4".to_string(), 0.020);
        machine.net_info.derp_latency.insert("2-v6".to_string(), 0.010);
        machine.net_info.derp_latency.insert("7-v4".to_string(), 0.005);
        let routes = vec![
            test_route(1, "0.0.0.0/0", true, true),
            test_route(2, "10.0.0.0/24", true, false),
        ];

        let view = build_view(&machine, &owner(), &routes, now(), &settings());
        assert_eq!(view.usederp, "2");
        let derps = view.derps.as_ref().unwrap();
        assert_eq!(derps["2"], 10);
        assert_eq!(derps["7"], 5);
        assert!(view.routes.allowed_exit_node);
        assert_eq!(view.routes.extra_ips, vec!["10.0.0.0/24"]);

        let json = serde_json::to_value(&view).unwrap();
        assert_eq!(json["usederp"], "2");
        assert_eq!(json["derps"]["2"], 10);
        assert_eq!(json["advertisedExitNode"], true);
        assert_eq!(json["extraIPs"], serde_json::json!(["10.0.0.0/24"]));
        assert_eq!(json["allowedIPs"], serde_json::Value::Null);
        assert_eq!(json["endpoints"], serde_json::Value::Null);
    }

    #[test]
    fn test_no_relay_measurements() {
        let machine = Machine::new(1, "laptop", "alice");
        let view = build_view(&machine, &owner(), &[], now(), &settings());
        assert_eq!(view.usederp, "x");
        let json = serde_json::to_value(&view).unwrap();
        assert_eq!(json["derps"], serde_json::Value::Null);
    }

    #[test]
    fn test_name_head() {
        assert_eq!(name_head("Élodie"), "É");
        assert_eq!(name_head(""), "");
    }
}

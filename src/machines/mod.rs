// Machines module - device records and the console view derived from them

pub mod derp;
pub mod expiry;
pub mod view;

use chrono::{DateTime, Duration, Utc};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::net::IpAddr;
use thiserror::Error;

use crate::store::{MachineStore, StoreResult};

const MAX_NAME_LEN: usize = 63;

/// Key lifetime for accounts that never chose one.
pub const DEFAULT_KEY_EXPIRY_DAYS: u32 = 180;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct User {
    /// Account name, the key callers are authorized by.
    pub name: String,
    #[serde(default)]
    pub display_name: String,
    /// Default key lifetime handed to devices when expiry is re-enabled.
    pub key_expiry_days: u32,
}

/// Network conditions last reported by the device.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct NetInfo {
    /// 0 until the device has measured its relays.
    #[serde(default)]
    pub preferred_derp: u32,
    /// Seconds, keyed by `"<relay>-v4"`, `"<relay>-v6"` or a bare relay name.
    #[serde(default)]
    pub derp_latency: HashMap<String, f64>,
    pub mapping_varies_by_dest_ip: Option<bool>,
    pub hair_pinning: Option<bool>,
    pub working_ipv6: Option<bool>,
    pub working_udp: Option<bool>,
    pub upnp: Option<bool>,
    pub pcp: Option<bool>,
    pub pmp: Option<bool>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Machine {
    pub id: u64,
    pub given_name: String,
    pub hostname: String,
    #[serde(default)]
    pub auto_gen_name: bool,
    /// Owning account.
    pub owner: String,
    #[serde(default)]
    pub os: String,
    #[serde(default)]
    pub ipn_version: String,
    #[serde(default)]
    pub ip_addresses: Vec<IpAddr>,
    #[serde(default)]
    pub endpoints: Vec<String>,
    pub created_at: DateTime<Utc>,
    pub last_seen: Option<DateTime<Utc>>,
    #[serde(default)]
    pub online: bool,
    /// `None` means the key never expires.
    #[serde(default)]
    pub expiry: Option<DateTime<Utc>>,
    #[serde(default)]
    pub net_info: NetInfo,
}

impl Machine {
    pub fn never_expires(&self) -> bool {
        self.expiry.is_none()
    }
}

#[derive(Error, Debug, PartialEq)]
pub enum NameError {
    #[error("name is longer than 63 characters")]
    TooLong,

    #[error("name may only contain a-z, 0-9 and '-' and must not start or end with '-'")]
    InvalidCharacters,
}

/// Name derived from the hostname when no explicit name is set.
pub fn automatic_name(hostname: &str) -> String {
    let mut name = String::with_capacity(hostname.len());
    for c in hostname.to_lowercase().chars() {
        if c.is_ascii_alphanumeric() {
            name.push(c);
        } else if !name.ends_with('-') {
            name.push('-');
        }
    }
    let name: String = name.trim_matches('-').chars().take(MAX_NAME_LEN).collect();
    let name = name.trim_end_matches('-');
    if name.is_empty() {
        "node".to_string()
    } else {
        name.to_string()
    }
}

/// Resolve a rename request to `(given_name, automatic)`. An empty request
/// returns to the automatic name.
pub fn resolve_given_name(hostname: &str, requested: &str) -> Result<(String, bool), NameError> {
    let requested = requested.trim().to_lowercase();
    if requested.is_empty() {
        return Ok((automatic_name(hostname), true));
    }
    if requested.len() > MAX_NAME_LEN {
        return Err(NameError::TooLong);
    }
    let valid_chars = requested
        .chars()
        .all(|c| c.is_ascii_lowercase() || c.is_ascii_digit() || c == '-');
    if !valid_chars || requested.starts_with('-') || requested.ends_with('-') {
        return Err(NameError::InvalidCharacters);
    }
    Ok((requested, false))
}

#[derive(Debug, Clone, PartialEq)]
pub struct ExpiryToggle {
    pub never_expires: bool,
    /// Empty when the key no longer expires.
    pub description: String,
}

/// Flip a machine between "never expires" and expiring after the owner's
/// default key lifetime.
pub async fn toggle_key_expiry(
    store: &dyn MachineStore,
    machine: &Machine,
    owner: &User,
    now: DateTime<Utc>,
) -> StoreResult<ExpiryToggle> {
    if !machine.never_expires() {
        store.set_machine_expiry(machine.id, None).await?;
        tracing::info!("Machine {} key expiry disabled", machine.id);
        return Ok(ExpiryToggle {
            never_expires: true,
            description: String::new(),
        });
    }

    let lifetime = Duration::days(i64::from(owner.key_expiry_days));
    store.set_machine_expiry(machine.id, Some(now + lifetime)).await?;
    tracing::info!(
        "Machine {} key expiry enabled, {} days",
        machine.id,
        owner.key_expiry_days
    );
    Ok(ExpiryToggle {
        never_expires: false,
        description: expiry::describe(lifetime),
    })
}

#[cfg(test)]
impl User {
    pub(crate) fn new(name: &str, display_name: &str, key_expiry_days: u32) -> Self {
        User {
            name: name.to_string(),
            display_name: display_name.to_string(),
            key_expiry_days,
        }
    }
}

#[cfg(test)]
impl Machine {
    pub(crate) fn new(id: u64, hostname: &str, owner: &str) -> Self {
        Machine {
            id,
            given_name: automatic_name(hostname),
            hostname: hostname.to_string(),
            auto_gen_name: true,
            owner: owner.to_string(),
            os: "linux".to_string(),
            ipn_version: "1.50.1-t1234abcd".to_string(),
            ip_addresses: vec!["100.64.0.1".parse().unwrap(), "fd7a:115c:a1e0::1".parse().unwrap()],
            endpoints: vec![],
            created_at: "2024-03-01T04:00:00Z".parse().unwrap(),
            last_seen: None,
            online: false,
            expiry: None,
            net_info: NetInfo::default(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::store::MemoryStore;

    #[test]
    fn test_automatic_name() {
        assert_eq!(automatic_name("Alice's MacBook Pro"), "alice-s-macbook-pro");
        assert_eq!(automatic_name("--web_01--"), "web-01");
        assert_eq!(automatic_name("???"), "node");
        assert_eq!(automatic_name(&"a".repeat(80)).len(), MAX_NAME_LEN);
    }

    #[test]
    fn test_resolve_given_name() {
        assert_eq!(
            resolve_given_name("Build Box", "  CI-Runner "),
            Ok(("ci-runner".to_string(), false))
        );
        assert_eq!(
            resolve_given_name("Build Box", ""),
            Ok(("build-box".to_string(), true))
        );
        assert_eq!(resolve_given_name("x", "-edge"), Err(NameError::InvalidCharacters));
        assert_eq!(resolve_given_name("x", "with space"), Err(NameError::InvalidCharacters));
        assert_eq!(resolve_given_name("x", &"n".repeat(64)), Err(NameError::TooLong));
    }

    #[tokio::test]
    async fn test_toggle_key_expiry() {
        let store = MemoryStore::new();
        let owner = User::new("alice", "Alice", 45);
        store.insert_user(owner.clone()).await;
        store.insert_machine(Machine::new(7, "laptop", "alice")).await;
        let now: DateTime<Utc> = "2024-06-01T00:00:00Z".parse().unwrap();

        let machine = store.get_machine(7).await.unwrap();
        let toggle = toggle_key_expiry(&store, &machine, &owner, now).await.unwrap();
        assert!(!toggle.never_expires);
        assert_eq!(toggle.description, "1 months 15 days remaining");
        let machine = store.get_machine(7).await.unwrap();
        assert_eq!(machine.expiry, Some(now + Duration::days(45)));

        let toggle = toggle_key_expiry(&store, &machine, &owner, now).await.unwrap();
        assert!(toggle.never_expires);
        assert!(toggle.description.is_empty());
        assert!(store.get_machine(7).await.unwrap().never_expires());
    }
}

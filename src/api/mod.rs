// API module - console endpoints, request and response types

pub mod rest;

use serde::{Deserialize, Serialize, Serializer};
use std::collections::BTreeMap;

use crate::machines::view::MachineStateView;

/// Envelope around every console response.
#[derive(Debug, Serialize)]
pub struct ApiResponse<T: Serialize> {
    pub status: String,
    pub data: Option<T>,
}

impl<T: Serialize> ApiResponse<T> {
    pub fn success(data: T) -> Self {
        ApiResponse {
            status: "success".to_string(),
            data: Some(data),
        }
    }

    pub fn error(message: &str) -> Self {
        ApiResponse {
            status: format!("error-{}", message),
            data: None,
        }
    }
}

/// Serialize an empty list as `null`, which is what console clients expect.
pub fn nullable_list<S: Serializer>(items: &[String], serializer: S) -> Result<S::Ok, S::Error> {
    if items.is_empty() {
        serializer.serialize_none()
    } else {
        items.serialize(serializer)
    }
}

#[derive(Debug, Clone, Deserialize)]
pub struct MachineUpdateRequest {
    pub mid: String,
    #[serde(flatten)]
    pub command: MachineCommand,
}

#[derive(Debug, Clone, PartialEq, Deserialize)]
#[serde(tag = "state")]
pub enum MachineCommand {
    #[serde(rename = "set-expires")]
    SetExpires,
    #[serde(rename = "rename-node")]
    RenameNode {
        /// An empty name returns the device to its automatic name.
        #[serde(rename = "nodeName")]
        node_name: String,
    },
    #[serde(rename = "set-route-settings")]
    SetRouteSettings {
        #[serde(rename = "allowedIPs")]
        allowed_ips: Vec<String>,
        #[serde(rename = "allowedExitNode")]
        allowed_exit_node: bool,
    },
}

#[derive(Debug, Clone, Deserialize)]
pub struct RemoveMachineRequest {
    pub mid: String,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct KeyExpiryRequest {
    pub max_key_duration_days: u32,
}

#[derive(Debug, Serialize)]
pub struct ConsoleProfile {
    pub basedomain: String,
    pub username: String,
    pub usernamehead: String,
    pub useraccount: String,
    pub orgname: String,
}

#[derive(Debug, Serialize)]
pub struct MachineList {
    pub basedomain: String,
    pub mlist: BTreeMap<String, MachineStateView>,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct NetSettings {
    pub file_sharing: bool,
    pub services_collection: bool,
    pub https_enabled: bool,
    pub provider: String,
    pub machine_auth_needed: bool,
    pub max_key_duration_days: u32,
    pub network_lock_enabled: bool,
}

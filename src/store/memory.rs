// In-memory store, optionally seeded from a JSON fixture

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::Deserialize;
use std::collections::{BTreeMap, HashMap};
use std::path::Path;
use std::sync::Arc;
use tokio::sync::RwLock;

use super::{MachineStore, StoreError, StoreResult};
use crate::machines::{Machine, User};
use crate::routes::Route;

/// Fixture file layout.
#[derive(Debug, Default, Deserialize)]
pub struct Seed {
    #[serde(default)]
    pub users: Vec<SeedUser>,
    #[serde(default)]
    pub machines: Vec<Machine>,
    #[serde(default)]
    pub routes: Vec<Route>,
}

#[derive(Debug, Deserialize)]
pub struct SeedUser {
    pub name: String,
    #[serde(default)]
    pub display_name: String,
    /// Falls back to the configured default key lifetime.
    #[serde(default)]
    pub key_expiry_days: Option<u32>,
}

impl SeedUser {
    fn into_user(self, default_key_expiry_days: u32) -> User {
        User {
            name: self.name,
            display_name: self.display_name,
            key_expiry_days: self.key_expiry_days.unwrap_or(default_key_expiry_days),
        }
    }
}

#[derive(Default)]
struct Tables {
    users: HashMap<String, User>,
    machines: BTreeMap<u64, Machine>,
    // Route ids follow insertion order, so id order is the stable order.
    routes: BTreeMap<u64, Route>,
}

#[derive(Clone, Default)]
pub struct MemoryStore {
    tables: Arc<RwLock<Tables>>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub async fn from_seed(seed: Seed, default_key_expiry_days: u32) -> StoreResult<Self> {
        let store = Self::new();
        for user in seed.users {
            store.insert_user(user.into_user(default_key_expiry_days)).await;
        }
        for machine in seed.machines {
            store.insert_machine(machine).await;
        }
        for route in seed.routes {
            store.insert_route(route).await?;
        }
        Ok(store)
    }

    pub async fn load(path: &Path, default_key_expiry_days: u32) -> anyhow::Result<Self> {
        let content = tokio::fs::read_to_string(path).await?;
        let seed: Seed = serde_json::from_str(&content)?;
        let store = Self::from_seed(seed, default_key_expiry_days).await?;
        {
            let tables = store.tables.read().await;
            tracing::info!(
                "Seeded store from {}: {} users, {} machines, {} routes",
                path.display(),
                tables.users.len(),
                tables.machines.len(),
                tables.routes.len()
            );
        }
        Ok(store)
    }

    pub async fn insert_user(&self, user: User) {
        let mut tables = self.tables.write().await;
        tables.users.insert(user.name.clone(), user);
    }

    pub async fn insert_machine(&self, machine: Machine) {
        let mut tables = self.tables.write().await;
        tables.machines.insert(machine.id, machine);
    }

    /// Insert a route, keeping at most one exit route per machine.
    pub async fn insert_route(&self, route: Route) -> StoreResult<()> {
        let mut tables = self.tables.write().await;
        if !tables.machines.contains_key(&route.machine_id) {
            return Err(StoreError::MachineNotFound(route.machine_id));
        }
        if route.enabled && !route.advertised {
            return Err(StoreError::RouteNotAdvertised(route.id));
        }
        if route.is_exit_route()
            && tables
                .routes
                .values()
                .any(|r| r.machine_id == route.machine_id && r.is_exit_route())
        {
            return Err(StoreError::DuplicateExitRoute(route.machine_id));
        }
        tables.routes.insert(route.id, route);
        Ok(())
    }

    async fn update_machine<F>(&self, machine_id: u64, update: F) -> StoreResult<()>
    where
        F: FnOnce(&mut Machine),
    {
        let mut tables = self.tables.write().await;
        let machine = tables
            .machines
            .get_mut(&machine_id)
            .ok_or(StoreError::MachineNotFound(machine_id))?;
        update(machine);
        Ok(())
    }
}

#[async_trait]
impl MachineStore for MemoryStore {
    async fn list_machines_by_user(&self, account: &str) -> StoreResult<Vec<Machine>> {
        let tables = self.tables.read().await;
        if !tables.users.contains_key(account) {
            return Err(StoreError::UserNotFound(account.to_string()));
        }
        Ok(tables
            .machines
            .values()
            .filter(|m| m.owner == account)
            .cloned()
            .collect())
    }

    async fn get_machine(&self, machine_id: u64) -> StoreResult<Machine> {
        let tables = self.tables.read().await;
        tables
            .machines
            .get(&machine_id)
            .cloned()
            .ok_or(StoreError::MachineNotFound(machine_id))
    }

    async fn get_machine_routes(&self, machine_id: u64) -> StoreResult<Vec<Route>> {
        let tables = self.tables.read().await;
        if !tables.machines.contains_key(&machine_id) {
            return Err(StoreError::MachineNotFound(machine_id));
        }
        Ok(tables
            .routes
            .values()
            .filter(|r| r.machine_id == machine_id)
            .cloned()
            .collect())
    }

    async fn enable_route(&self, route_id: u64) -> StoreResult<()> {
        let mut tables = self.tables.write().await;
        let route = tables
            .routes
            .get_mut(&route_id)
            .ok_or(StoreError::RouteNotFound(route_id))?;
        if !route.advertised {
            return Err(StoreError::RouteNotAdvertised(route_id));
        }
        route.enabled = true;
        Ok(())
    }

    async fn disable_route(&self, route_id: u64) -> StoreResult<()> {
        let mut tables = self.tables.write().await;
        let route = tables
            .routes
            .get_mut(&route_id)
            .ok_or(StoreError::RouteNotFound(route_id))?;
        route.enabled = false;
        Ok(())
    }

    async fn set_machine_expiry(
        &self,
        machine_id: u64,
        expiry: Option<DateTime<Utc>>,
    ) -> StoreResult<()> {
        self.update_machine(machine_id, |m| m.expiry = expiry).await
    }

    async fn set_given_name(
        &self,
        machine_id: u64,
        given_name: &str,
        automatic: bool,
    ) -> StoreResult<()> {
        self.update_machine(machine_id, |m| {
            m.given_name = given_name.to_string();
            m.auto_gen_name = automatic;
        })
        .await
    }

    async fn delete_machine(&self, machine_id: u64) -> StoreResult<()> {
        let mut tables = self.tables.write().await;
        tables
            .machines
            .remove(&machine_id)
            .ok_or(StoreError::MachineNotFound(machine_id))?;
        tables.routes.retain(|_, r| r.machine_id != machine_id);
        Ok(())
    }

    async fn get_user(&self, account: &str) -> StoreResult<User> {
        let tables = self.tables.read().await;
        tables
            .users
            .get(account)
            .cloned()
            .ok_or_else(|| StoreError::UserNotFound(account.to_string()))
    }

    async fn update_user_key_expiry(&self, account: &str, days: u32) -> StoreResult<()> {
        let mut tables = self.tables.write().await;
        let user = tables
            .users
            .get_mut(account)
            .ok_or_else(|| StoreError::UserNotFound(account.to_string()))?;
        user.key_expiry_days = days;
        Ok(())
    }
}

// Store module - persistence contract for machines, routes and users

pub mod memory;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use thiserror::Error;

use crate::machines::{Machine, User};
use crate::routes::Route;

pub use memory::MemoryStore;

#[derive(Error, Debug)]
pub enum StoreError {
    #[error("machine {0} not found")]
    MachineNotFound(u64),

    #[error("route {0} not found")]
    RouteNotFound(u64),

    #[error("user {0} not found")]
    UserNotFound(String),

    #[error("machine {0} already has an exit route")]
    DuplicateExitRoute(u64),

    #[error("route {0} is not advertised")]
    RouteNotAdvertised(u64),

    #[error("storage backend error: {0}")]
    Backend(String),
}

pub type StoreResult<T> = Result<T, StoreError>;

/// Persistence collaborator behind the console.
///
/// Every call is committed on its own; callers that need several calls to be
/// observed together serialize through [`crate::routes::reconcile::RouteLocks`].
#[async_trait]
pub trait MachineStore: Send + Sync {
    async fn list_machines_by_user(&self, account: &str) -> StoreResult<Vec<Machine>>;

    async fn get_machine(&self, machine_id: u64) -> StoreResult<Machine>;

    /// Routes in their stable insertion order.
    async fn get_machine_routes(&self, machine_id: u64) -> StoreResult<Vec<Route>>;

    async fn enable_route(&self, route_id: u64) -> StoreResult<()>;

    async fn disable_route(&self, route_id: u64) -> StoreResult<()>;

    /// `None` makes the machine key never expire.
    async fn set_machine_expiry(
        &self,
        machine_id: u64,
        expiry: Option<DateTime<Utc>>,
    ) -> StoreResult<()>;

    async fn set_given_name(
        &self,
        machine_id: u64,
        given_name: &str,
        automatic: bool,
    ) -> StoreResult<()>;

    async fn delete_machine(&self, machine_id: u64) -> StoreResult<()>;

    async fn get_user(&self, account: &str) -> StoreResult<User>;

    async fn update_user_key_expiry(&self, account: &str, days: u32) -> StoreResult<()>;
}

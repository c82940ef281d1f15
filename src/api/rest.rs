// REST API endpoints for the admin console

use axum::{
    extract::{rejection::JsonRejection, State},
    response::Json,
    routing::{get, post},
    Router,
};
use chrono::Utc;
use std::collections::BTreeMap;
use std::sync::Arc;
use tower_http::cors::CorsLayer;
use tower_http::trace::TraceLayer;

use super::{
    ApiResponse, ConsoleProfile, KeyExpiryRequest, MachineCommand, MachineList,
    MachineUpdateRequest, NetSettings, RemoveMachineRequest,
};
use crate::auth::{ConsoleUser, TokenVerifier};
use crate::config::ConsoleSettings;
use crate::error::{AppError, AppResult};
use crate::machines::view::{build_view, name_head, MachineUpdateView};
use crate::machines::{resolve_given_name, toggle_key_expiry, Machine};
use crate::routes::{classify, set_subnet_and_exit, RouteLocks, RouteView};
use crate::store::MachineStore;

const MAX_KEY_DURATION_DAYS: u32 = 365;

/// Shared application state
pub struct AppState {
    pub store: Arc<dyn MachineStore>,
    pub verifier: Arc<dyn TokenVerifier>,
    pub route_locks: RouteLocks,
    pub console: ConsoleSettings,
}

impl AppState {
    pub fn new(
        store: Arc<dyn MachineStore>,
        verifier: Arc<dyn TokenVerifier>,
        console: ConsoleSettings,
    ) -> Self {
        AppState {
            store,
            verifier,
            route_locks: RouteLocks::new(),
            console,
        }
    }

    /// Load a machine the caller owns.
    async fn owned_machine(&self, user: &ConsoleUser, mid: &str) -> AppResult<Machine> {
        let machine_id: u64 = mid
            .trim()
            .parse()
            .map_err(|_| AppError::BadRequest(format!("invalid machine id {:?}", mid)))?;
        let machine = self.store.get_machine(machine_id).await?;
        if machine.owner != user.account {
            return Err(AppError::Forbidden(machine_id));
        }
        Ok(machine)
    }
}

type ApiResult<T> = AppResult<Json<ApiResponse<T>>>;

/// Every endpoint answers with the `{status, data}` envelope, including
/// self, machines and remove. Front-ends written against the bare
/// profile/list/remove bodies must unwrap `data`.
pub fn create_api_router(state: Arc<AppState>) -> Router {
    Router::new()
        .route("/api/console/self", get(get_self))
        .route("/api/console/machines", get(list_machines))
        .route("/api/console/machines/update", post(update_machine))
        .route("/api/console/machines/remove", post(remove_machine))
        .route("/api/console/netsettings", get(get_net_settings))
        .route("/api/console/netsettings/key-expiry", post(update_key_expiry))
        .layer(TraceLayer::new_for_http())
        .layer(CorsLayer::permissive())
        .with_state(state)
}

async fn get_self(State(state): State<Arc<AppState>>, user: ConsoleUser) -> ApiResult<ConsoleProfile> {
    let orgname = if state.console.org_name == "Personal" {
        user.account.clone()
    } else {
        state.console.org_name.clone()
    };

    Ok(Json(ApiResponse::success(ConsoleProfile {
        basedomain: state.console.base_domain.clone(),
        usernamehead: name_head(&user.display_name),
        username: user.display_name,
        useraccount: user.account,
        orgname,
    })))
}

async fn list_machines(State(state): State<Arc<AppState>>, user: ConsoleUser) -> ApiResult<MachineList> {
    let owner = state.store.get_user(&user.account).await?;
    let machines = state.store.list_machines_by_user(&user.account).await?;
    let now = Utc::now();

    let mut mlist = BTreeMap::new();
    for machine in &machines {
        let routes = state.store.get_machine_routes(machine.id).await?;
        let view = build_view(machine, &owner, &routes, now, &state.console.view);
        mlist.insert(machine.id.to_string(), view);
    }

    Ok(Json(ApiResponse::success(MachineList {
        basedomain: state.console.base_domain.clone(),
        mlist,
    })))
}

async fn update_machine(
    State(state): State<Arc<AppState>>,
    user: ConsoleUser,
    payload: Result<Json<MachineUpdateRequest>, JsonRejection>,
) -> ApiResult<MachineUpdateView> {
    let Json(request) = payload?;
    let machine = state.owned_machine(&user, &request.mid).await?;

    let view = match request.command {
        MachineCommand::SetExpires => {
            let owner = state.store.get_user(&user.account).await?;
            let toggle = toggle_key_expiry(state.store.as_ref(), &machine, &owner, Utc::now()).await?;
            let machine = state.store.get_machine(machine.id).await?;
            MachineUpdateView::new(&machine, toggle.description, RouteView::default())
        }
        MachineCommand::RenameNode { node_name } => {
            let (given_name, automatic) = resolve_given_name(&machine.hostname, &node_name)?;
            state
                .store
                .set_given_name(machine.id, &given_name, automatic)
                .await?;
            tracing::info!("Machine {} renamed to {}", machine.id, given_name);
            let machine = state.store.get_machine(machine.id).await?;
            MachineUpdateView::new(&machine, String::new(), RouteView::default())
        }
        MachineCommand::SetRouteSettings {
            allowed_ips,
            allowed_exit_node,
        } => {
            let _guard = state.route_locks.acquire(machine.id).await;
            set_subnet_and_exit(state.store.as_ref(), machine.id, allowed_exit_node, &allowed_ips)
                .await?;
            let routes = state.store.get_machine_routes(machine.id).await?;
            tracing::info!(
                "Machine {} routes updated: exit node {}, {} subnets requested",
                machine.id,
                allowed_exit_node,
                allowed_ips.len()
            );
            MachineUpdateView::new(&machine, String::new(), classify(&routes))
        }
    };

    Ok(Json(ApiResponse::success(view)))
}

async fn remove_machine(
    State(state): State<Arc<AppState>>,
    user: ConsoleUser,
    payload: Result<Json<RemoveMachineRequest>, JsonRejection>,
) -> ApiResult<String> {
    let Json(request) = payload?;
    let machine = state.owned_machine(&user, &request.mid).await?;
    {
        let _guard = state.route_locks.acquire(machine.id).await;
        state.store.delete_machine(machine.id).await?;
    }
    state.route_locks.forget(machine.id);
    tracing::info!("Machine {} removed by {}", machine.id, user.account);

    Ok(Json(ApiResponse::success(machine.id.to_string())))
}

async fn get_net_settings(State(state): State<Arc<AppState>>, user: ConsoleUser) -> ApiResult<NetSettings> {
    let owner = state.store.get_user(&user.account).await?;

    Ok(Json(ApiResponse::success(NetSettings {
        file_sharing: false,
        services_collection: false,
        https_enabled: false,
        provider: state.console.provider.clone(),
        machine_auth_needed: false,
        max_key_duration_days: owner.key_expiry_days,
        network_lock_enabled: false,
    })))
}

async fn update_key_expiry(
    State(state): State<Arc<AppState>>,
    user: ConsoleUser,
    payload: Result<Json<KeyExpiryRequest>, JsonRejection>,
) -> ApiResult<u32> {
    let Json(request) = payload?;
    let days = request.max_key_duration_days;
    if !(1..=MAX_KEY_DURATION_DAYS).contains(&days) {
        return Err(AppError::BadRequest(format!(
            "key lifetime must be between 1 and {} days",
            MAX_KEY_DURATION_DAYS
        )));
    }
    state.store.update_user_key_expiry(&user.account, days).await?;
    tracing::info!("Key lifetime of {} set to {} days", user.account, days);

    Ok(Json(ApiResponse::success(days)))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::auth::{IdTokenClaims, StaticTokenVerifier};
    use crate::machines::view::ViewSettings;
    use crate::machines::{Machine, User};
    use crate::routes::test_route;
    use crate::store::MemoryStore;
    use axum::body::Body;
    use axum::http::{header, Request};
    use chrono::FixedOffset;
    use serde_json::{json, Value};
    use tower::ServiceExt;

    async fn test_app() -> (Router, MemoryStore) {
        let store = MemoryStore::new();
        store.insert_user(User::new("alice", "Alice", 90)).await;
        store.insert_user(User::new("bob", "Bob", 180)).await;
        store.insert_machine(Machine::new(1, "gateway", "alice")).await;
        store.insert_machine(Machine::new(2, "desktop", "bob")).await;
        for route in [
            test_route(1, "0.0.0.0/0", true, false),
            test_route(2, "10.0.0.0/8", true, true),
            test_route(3, "192.168.1.0/24", true, false),
        ] {
            store.insert_route(route).await.unwrap();
        }

        let verifier = StaticTokenVerifier::new([
            (
                "tok-alice".to_string(),
                IdTokenClaims {
                    email: Some("alice@example.com".to_string()),
                    preferred_username: None,
                    name: Some("Alice".to_string()),
                },
            ),
            (
                "tok-bob".to_string(),
                IdTokenClaims {
                    email: Some("bob@example.com".to_string()),
                    preferred_username: None,
                    name: None,
                },
            ),
        ]);
        let console = ConsoleSettings {
            base_domain: "mesh.test".to_string(),
            org_name: "Personal".to_string(),
            provider: "Mesh SaaS".to_string(),
            strip_email_domain: true,
            view: ViewSettings {
                offset: FixedOffset::east_opt(0).unwrap(),
            },
        };
        let state = Arc::new(AppState::new(
            Arc::new(store.clone()),
            Arc::new(verifier),
            console,
        ));
        (create_api_router(state), store)
    }

    async fn call(app: &Router, token: Option<&str>, method: &str, uri: &str, body: Option<Value>) -> Value {
        let mut builder = Request::builder().method(method).uri(uri);
        if let Some(token) = token {
            builder = builder.header(header::COOKIE, format!("OIDC_Token={}", token));
        }
        let request = match body {
            Some(body) => builder
                .header(header::CONTENT_TYPE, "application/json")
                .body(Body::from(body.to_string()))
                .unwrap(),
            None => builder.body(Body::empty()).unwrap(),
        };
        let response = app.clone().oneshot(request).await.unwrap();
        let bytes = axum::body::to_bytes(response.into_body(), usize::MAX).await.unwrap();
        serde_json::from_slice(&bytes).unwrap()
    }

    #[tokio::test]
    async fn test_requires_identity() {
        let (app, _) = test_app().await;
        let res = call(&app, None, "GET", "/api/console/machines", None).await;
        assert_eq!(res["status"], "error-user identity check failed");
        let res = call(&app, Some("forged"), "GET", "/api/console/self", None).await;
        assert_eq!(res["status"], "error-user identity check failed");
    }

    #[tokio::test]
    async fn test_self_profile() {
        let (app, _) = test_app().await;
        let res = call(&app, Some("tok-alice"), "GET", "/api/console/self", None).await;
        assert_eq!(res["status"], "success");
        assert_eq!(res["data"]["useraccount"], "alice");
        assert_eq!(res["data"]["usernamehead"], "A");
        assert_eq!(res["data"]["orgname"], "alice");
        assert_eq!(res["data"]["basedomain"], "mesh.test");
    }

    #[tokio::test]
    async fn test_list_only_own_machines() {
        let (app, _) = test_app().await;
        let res = call(&app, Some("tok-alice"), "GET", "/api/console/machines", None).await;
        assert_eq!(res["status"], "success");
        let mlist = res["data"]["mlist"].as_object().unwrap();
        assert_eq!(mlist.len(), 1);
        let gateway = &mlist["1"];
        assert_eq!(gateway["advertisedExitNode"], true);
        assert_eq!(gateway["allowedExitNode"], false);
        assert_eq!(gateway["allowedIPs"], json!(["10.0.0.0/8"]));
        assert_eq!(gateway["extraIPs"], json!(["192.168.1.0/24"]));
        assert_eq!(gateway["usederp"], "x");
        assert_eq!(gateway["neverExpires"], true);
    }

    #[tokio::test]
    async fn test_set_route_settings() {
        let (app, store) = test_app().await;
        let res = call(
            &app,
            Some("tok-alice"),
            "POST",
            "/api/console/machines/update",
            Some(json!({
                "mid": "1",
                "state": "set-route-settings",
                "allowedIPs": ["192.168.1.0/24", "172.16.0.0/12"],
                "allowedExitNode": true
            })),
        )
        .await;
        assert_eq!(res["status"], "success");
        assert_eq!(res["data"]["allowedExitNode"], true);
        assert_eq!(res["data"]["allowedIPs"], json!(["192.168.1.0/24"]));
        assert_eq!(res["data"]["extraIPs"], json!(["10.0.0.0/8"]));
        assert_eq!(res["data"]["hasSubnets"], true);

        let view = classify(&store.get_machine_routes(1).await.unwrap());
        assert_eq!(view.allowed_ips, vec!["192.168.1.0/24"]);
    }

    #[tokio::test]
    async fn test_foreign_machine_rejected() {
        let (app, store) = test_app().await;
        let res = call(
            &app,
            Some("tok-bob"),
            "POST",
            "/api/console/machines/update",
            Some(json!({"mid": "1", "state": "set-route-settings", "allowedIPs": [], "allowedExitNode": false})),
        )
        .await;
        assert_eq!(res["status"], "error-permission denied for this device");
        assert!(store.get_machine_routes(1).await.unwrap()[1].enabled);

        let res = call(&app, Some("tok-bob"), "POST", "/api/console/machines/remove", Some(json!({"mid": "1"}))).await;
        assert_eq!(res["status"], "error-permission denied for this device");
    }

    #[tokio::test]
    async fn test_malformed_update() {
        let (app, _) = test_app().await;
        let res = call(
            &app,
            Some("tok-alice"),
            "POST",
            "/api/console/machines/update",
            Some(json!({"mid": "1", "state": "reboot"})),
        )
        .await;
        assert!(res["status"].as_str().unwrap().starts_with("error-malformed request"));

        let res = call(
            &app,
            Some("tok-alice"),
            "POST",
            "/api/console/machines/update",
            Some(json!({"mid": "one", "state": "set-expires"})),
        )
        .await;
        assert!(res["status"].as_str().unwrap().starts_with("error-malformed request"));

        let res = call(
            &app,
            Some("tok-alice"),
            "POST",
            "/api/console/machines/update",
            Some(json!({"mid": "99", "state": "set-expires"})),
        )
        .await;
        assert_eq!(res["status"], "error-device not found");
    }

    #[tokio::test]
    async fn test_update_missing_fields_changes_nothing() {
        let (app, store) = test_app().await;
        let res = call(
            &app,
            Some("tok-alice"),
            "POST",
            "/api/console/machines/update",
            Some(json!({"mid": "1", "state": "set-route-settings", "allowedExitNode": false})),
        )
        .await;
        assert!(res["status"].as_str().unwrap().starts_with("error-malformed request"));
        let routes = store.get_machine_routes(1).await.unwrap();
        assert!(routes.iter().any(|r| r.cidr() == "10.0.0.0/8" && r.enabled));

        let before = store.get_machine(1).await.unwrap().given_name;
        let res = call(
            &app,
            Some("tok-alice"),
            "POST",
            "/api/console/machines/update",
            Some(json!({"mid": "1", "state": "rename-node"})),
        )
        .await;
        assert!(res["status"].as_str().unwrap().starts_with("error-malformed request"));
        assert_eq!(store.get_machine(1).await.unwrap().given_name, before);
    }

    #[tokio::test]
    async fn test_toggle_expiry_and_rename() {
        let (app, store) = test_app().await;
        let res = call(
            &app,
            Some("tok-alice"),
            "POST",
            "/api/console/machines/update",
            Some(json!({"mid": "1", "state": "set-expires"})),
        )
        .await;
        assert_eq!(res["data"]["neverExpires"], false);
        assert_eq!(res["data"]["expires"], "3 months 0 days remaining");
        assert!(store.get_machine(1).await.unwrap().expiry.is_some());

        let res = call(
            &app,
            Some("tok-alice"),
            "POST",
            "/api/console/machines/update",
            Some(json!({"mid": "1", "state": "rename-node", "nodeName": "Edge-GW"})),
        )
        .await;
        assert_eq!(res["status"], "success");
        assert_eq!(res["data"]["name"], "edge-gw");
        assert_eq!(res["data"]["automaticNameMode"], false);

        let res = call(
            &app,
            Some("tok-alice"),
            "POST",
            "/api/console/machines/update",
            Some(json!({"mid": "1", "state": "rename-node", "nodeName": "bad name!"})),
        )
        .await;
        assert!(res["status"].as_str().unwrap().starts_with("error-failed to rename device"));
    }

    #[tokio::test]
    async fn test_remove_machine() {
        let (app, store) = test_app().await;
        let res = call(&app, Some("tok-alice"), "POST", "/api/console/machines/remove", Some(json!({"mid": "1"}))).await;
        assert_eq!(res, json!({"status": "success", "data": "1"}));
        assert!(store.get_machine(1).await.is_err());
    }

    #[tokio::test]
    async fn test_net_settings() {
        let (app, store) = test_app().await;
        let res = call(&app, Some("tok-alice"), "GET", "/api/console/netsettings", None).await;
        assert_eq!(res["data"]["maxKeyDurationDays"], 90);
        assert_eq!(res["data"]["provider"], "Mesh SaaS");

        let res = call(
            &app,
            Some("tok-alice"),
            "POST",
            "/api/console/netsettings/key-expiry",
            Some(json!({"maxKeyDurationDays": 30})),
        )
        .await;
        assert_eq!(res, json!({"status": "success", "data": 30}));
        assert_eq!(store.get_user("alice").await.unwrap().key_expiry_days, 30);

        let res = call(
            &app,
            Some("tok-alice"),
            "POST",
            "/api/console/netsettings/key-expiry",
            Some(json!({"maxKeyDurationDays": 0})),
        )
        .await;
        assert!(res["status"].as_str().unwrap().starts_with("error-malformed request"));
    }
}

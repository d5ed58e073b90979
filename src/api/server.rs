//! `ControlServer`: the daemon's local-socket HTTP API.
//!
//! Routing and JSON (de)serialization follow the same axum `Router<AppState>`
//! plus `IntoResponse`-error shape this workspace's own HTTP server uses,
//! adapted from a TCP listener to a Unix stream socket.

use std::path::Path;
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use axum::Json;
use axum::extract::{Path as AxumPath, State};
use axum::http::StatusCode;
use axum::routing::{delete, get, patch, post};
use chrono::Utc;
use tokio::net::UnixListener;
use tokio::sync::Notify;
use tokio_util::sync::CancellationToken;

use crate::config::DaemonConfig;
use crate::core::idle_timer::IdleTimer;
use crate::core::providers::ProviderRegistry;
use crate::core::refresh::{self, CredentialStore};
use crate::core::registry::Registry;
use crate::error::{ConflictError, DaemonError, NotFoundError, ValidationError};

use super::types::{
    HealthResponse, RegisterRequest, RegisterResponse, RegisterRoutesRequest, RunListEntry, ShutdownResponse,
    UpdateRunRequest, parse_network_policy,
};

/// External collaborator the `/v1/routes/{agent}` endpoints delegate to.
/// Out of scope for this crate; the control server only defines
/// the capability seam.
#[async_trait]
pub trait RouteTable: Send + Sync {
    /// Register `services` (name → URL) for `agent`.
    async fn register(&self, agent: &str, services: std::collections::HashMap<String, String>) -> anyhow::Result<()>;

    /// Remove all routes registered for `agent`.
    async fn unregister(&self, agent: &str) -> anyhow::Result<()>;
}

#[derive(Clone)]
struct AppState {
    registry: Arc<Registry>,
    providers: Arc<ProviderRegistry>,
    credential_store: Arc<dyn CredentialStore>,
    route_table: Option<Arc<dyn RouteTable>>,
    proxy_port: u16,
    started_at: chrono::DateTime<Utc>,
    refresh_interval: Duration,
    idle_timer: Arc<IdleTimer>,
    shutdown_notify: Arc<Notify>,
    control_shutdown_drain: Duration,
}

/// The daemon's control socket HTTP server.
pub struct ControlServer {
    state: AppState,
}

impl std::fmt::Debug for ControlServer {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ControlServer").finish_non_exhaustive()
    }
}

impl ControlServer {
    /// Build a server over a fresh [`Registry`], wired to `idle_timer` and
    /// the other collaborators the control API needs.
    #[allow(clippy::too_many_arguments, reason = "each argument is a distinct capability the routes need")]
    pub fn new(
        registry: Arc<Registry>,
        providers: Arc<ProviderRegistry>,
        credential_store: Arc<dyn CredentialStore>,
        route_table: Option<Arc<dyn RouteTable>>,
        proxy_port: u16,
        idle_timer: Arc<IdleTimer>,
        config: &DaemonConfig,
    ) -> Self {
        Self {
            state: AppState {
                registry,
                providers,
                credential_store,
                route_table,
                proxy_port,
                started_at: Utc::now(),
                refresh_interval: config.refresh_interval,
                idle_timer,
                shutdown_notify: Arc::new(Notify::new()),
                control_shutdown_drain: config.control_shutdown_drain,
            },
        }
    }

    /// Trigger the same graceful-shutdown path `POST /v1/shutdown` does.
    /// Used by the idle timer to stop the server when no run has been
    /// registered for the configured duration.
    pub fn trigger_shutdown(&self) {
        self.state.shutdown_notify.notify_one();
    }

    /// A handle that, when notified, triggers the same shutdown path as
    /// [`ControlServer::trigger_shutdown`]. Lets a caller wire the idle
    /// timer to this server before `serve` is called, without needing a
    /// `&ControlServer` held across the `.await`.
    pub fn shutdown_handle(&self) -> Arc<Notify> {
        Arc::clone(&self.state.shutdown_notify)
    }

    fn router(&self) -> axum::Router {
        axum::Router::new()
            .route("/v1/health", get(health))
            .route("/v1/runs", post(register_run).get(list_runs))
            .route("/v1/runs/{token}", patch(update_run).delete(unregister_run))
            .route("/v1/routes/{agent}", post(register_routes).delete(unregister_routes))
            .route("/v1/shutdown", post(shutdown))
            .layer(tower_http::trace::TraceLayer::new_for_http())
            .with_state(self.state.clone())
    }

    /// Bind `sock_path` (removing any stale file first) and serve until
    /// `Stop` is requested via `/v1/shutdown`, draining in-flight requests
    /// for up to `control_shutdown_drain`.
    pub async fn serve(&self, sock_path: &Path) -> std::io::Result<()> {
        let _ = std::fs::remove_file(sock_path);
        if let Some(parent) = sock_path.parent() {
            std::fs::create_dir_all(parent)?;
        }
        let listener = UnixListener::bind(sock_path)?;

        let shutdown_notify = Arc::clone(&self.state.shutdown_notify);
        let drain = self.state.control_shutdown_drain;
        let shutdown_signal = async move {
            shutdown_notify.notified().await;
            tokio::time::sleep(drain).await;
        };

        let result = axum::serve(listener, self.router())
            .with_graceful_shutdown(shutdown_signal)
            .await;

        let _ = std::fs::remove_file(sock_path);
        result
    }
}

async fn health(State(state): State<AppState>) -> Json<HealthResponse> {
    Json(HealthResponse {
        pid: std::process::id(),
        proxy_port: state.proxy_port,
        run_count: state.registry.count().await,
        started_at: state.started_at.to_rfc3339(),
    })
}

async fn register_run(
    State(state): State<AppState>,
    body: Result<Json<RegisterRequest>, axum::extract::rejection::JsonRejection>,
) -> Result<(StatusCode, Json<RegisterResponse>), DaemonError> {
    let Json(request) = body.map_err(|err| {
        DaemonError::Validation(ValidationError::MalformedBody { reason: err.to_string() })
    })?;

    let network_policy = parse_network_policy(&request.network_policy)?;

    let (token, run) = state.registry.build(request.run_id.clone());

    for entry in &request.credentials {
        crate::core::run::ProxyConfigurer::set_credential_with_grant(
            run.as_ref(),
            &entry.host,
            &entry.header,
            &entry.value,
            entry.grant.as_deref(),
        )
        .await;
    }
    for entry in &request.extra_headers {
        crate::core::run::ProxyConfigurer::add_extra_header(run.as_ref(), &entry.host, &entry.header_name, &entry.value)
            .await;
    }
    for entry in &request.remove_headers {
        crate::core::run::ProxyConfigurer::remove_request_header(run.as_ref(), &entry.host, &entry.header_name).await;
    }
    for entry in &request.token_substitutions {
        crate::core::run::ProxyConfigurer::set_token_substitution(
            run.as_ref(),
            &entry.host,
            &entry.placeholder,
            &entry.real_token,
        )
        .await;
    }

    run.set_mcp_servers(request.mcp_servers.into_iter().map(Into::into).collect()).await;
    run.set_network_policy(network_policy, request.network_allow).await;
    run.set_aws_config(request.aws_config.map(Into::into)).await;

    let refreshable = refresh::refreshable_grants(request.grants, &state.providers);
    let cancel = match &refreshable {
        Some(_) => {
            let cancel = CancellationToken::new();
            run.set_refresh_cancel(cancel.clone()).await;
            Some(cancel)
        }
        None => None,
    };

    state.registry.publish(token.clone(), Arc::clone(&run)).await;

    if let (Some(grants), Some(cancel)) = (refreshable, cancel) {
        refresh::spawn_worker(
            token.clone(),
            grants,
            cancel,
            Arc::clone(&state.registry),
            Arc::clone(&state.providers),
            Arc::clone(&state.credential_store),
            state.refresh_interval,
        );
    }

    state.idle_timer.cancel();

    Ok((
        StatusCode::CREATED,
        Json(RegisterResponse { auth_token: token, proxy_port: state.proxy_port }),
    ))
}

async fn list_runs(State(state): State<AppState>) -> Json<Vec<RunListEntry>> {
    let runs = state.registry.list().await;
    Json(
        runs.into_iter()
            .map(|run| RunListEntry {
                run_id: run.run_id,
                container_id: run.container_id,
                registered_at: run.registered_at.to_rfc3339(),
            })
            .collect(),
    )
}

async fn update_run(
    State(state): State<AppState>,
    AxumPath(token): AxumPath<String>,
    Json(body): Json<UpdateRunRequest>,
) -> Result<StatusCode, DaemonError> {
    if state.registry.update_container_id(&token, body.container_id).await {
        Ok(StatusCode::NO_CONTENT)
    } else {
        Err(DaemonError::NotFound(NotFoundError::Run))
    }
}

async fn unregister_run(
    State(state): State<AppState>,
    AxumPath(token): AxumPath<String>,
) -> Result<StatusCode, DaemonError> {
    let Some(run) = state.registry.unregister(&token).await else {
        return Err(DaemonError::NotFound(NotFoundError::Run));
    };
    run.cancel_refresh().await;

    if state.registry.is_empty().await {
        state.idle_timer.reset();
    }

    Ok(StatusCode::NO_CONTENT)
}

async fn register_routes(
    State(state): State<AppState>,
    AxumPath(agent): AxumPath<String>,
    Json(body): Json<RegisterRoutesRequest>,
) -> Result<StatusCode, DaemonError> {
    let Some(route_table) = &state.route_table else {
        return Err(DaemonError::Conflict(ConflictError::NoRouteTable));
    };
    route_table
        .register(&agent, body.services)
        .await
        .map_err(|source| DaemonError::Conflict(ConflictError::RouteTableFailure { agent: agent.clone(), source }))?;
    Ok(StatusCode::NO_CONTENT)
}

async fn unregister_routes(State(state): State<AppState>, AxumPath(agent): AxumPath<String>) -> Result<StatusCode, DaemonError> {
    let Some(route_table) = &state.route_table else {
        return Err(DaemonError::Conflict(ConflictError::NoRouteTable));
    };
    route_table
        .unregister(&agent)
        .await
        .map_err(|source| DaemonError::Conflict(ConflictError::RouteTableFailure { agent: agent.clone(), source }))?;
    Ok(StatusCode::NO_CONTENT)
}

async fn shutdown(State(state): State<AppState>) -> Json<ShutdownResponse> {
    // Schedule the actual shutdown asynchronously so the response is
    // flushed to the caller before the socket goes away.
    let notify = Arc::clone(&state.shutdown_notify);
    tokio::spawn(async move {
        notify.notify_one();
    });
    Json(ShutdownResponse { status: "shutting down".to_owned() })
}

#[cfg(test)]
mod tests {
    use std::collections::HashMap;

    use super::*;
    use crate::core::registry::Registry;

    struct NoopStore;

    #[async_trait]
    impl CredentialStore for NoopStore {
        async fn get(&self, _grant_name: &str) -> Option<String> {
            None
        }
    }

    fn test_server() -> ControlServer {
        ControlServer::new(
            Arc::new(Registry::new()),
            Arc::new(ProviderRegistry::built_in()),
            Arc::new(NoopStore),
            None,
            9119,
            Arc::new(IdleTimer::spawn(Duration::from_secs(300), || {})),
            &DaemonConfig::default(),
        )
    }

    #[tokio::test]
    async fn health_reports_zero_runs_on_fresh_registry() {
        let server = test_server();
        let response = health(State(server.state.clone())).await;
        assert_eq!(response.run_count, 0);
        assert_eq!(response.proxy_port, 9119);
        assert!(response.pid > 0);
    }

    #[tokio::test]
    async fn register_then_list_round_trips_run_id_and_credential() {
        let server = test_server();
        let request = RegisterRequest {
            run_id: "run-abc".to_owned(),
            credentials: vec![super::super::types::CredentialEntry {
                host: "api.github.com".to_owned(),
                header: "Authorization".to_owned(),
                value: "Bearer ghp_xxx".to_owned(),
                grant: Some("github".to_owned()),
            }],
            extra_headers: Vec::new(),
            remove_headers: Vec::new(),
            token_substitutions: Vec::new(),
            mcp_servers: Vec::new(),
            network_policy: String::new(),
            network_allow: Vec::new(),
            grants: Vec::new(),
            aws_config: None,
        };

        let (status, Json(response)) =
            register_run(State(server.state.clone()), Ok(Json(request))).await.expect("register");
        assert_eq!(status, StatusCode::CREATED);
        assert_eq!(response.proxy_port, 9119);
        assert_eq!(response.auth_token.len(), 64);

        let Json(runs) = list_runs(State(server.state.clone())).await;
        assert_eq!(runs.len(), 1);
        assert_eq!(runs[0].run_id, "run-abc");

        let run = server.state.registry.lookup(&response.auth_token).await.expect("registered");
        let cred = crate::core::run::ProxyConfigurer::get_credential(run.as_ref(), "api.github.com")
            .await
            .expect("credential present");
        assert_eq!(cred.value, "Bearer ghp_xxx");
    }

    #[tokio::test]
    async fn update_run_unknown_token_is_404() {
        let server = test_server();
        let result = update_run(
            State(server.state.clone()),
            AxumPath("nonexistent".to_owned()),
            Json(UpdateRunRequest { container_id: "ctr-123".to_owned() }),
        )
        .await;
        assert!(matches!(result, Err(DaemonError::NotFound(NotFoundError::Run))));
    }

    #[tokio::test]
    async fn two_phase_bind_then_list_reflects_container_id() {
        let server = test_server();
        let (token, _run) = server.state.registry.register("run-abc".to_owned()).await;

        let status = update_run(
            State(server.state.clone()),
            AxumPath(token),
            Json(UpdateRunRequest { container_id: "ctr-123".to_owned() }),
        )
        .await
        .expect("update");
        assert_eq!(status, StatusCode::NO_CONTENT);

        let Json(runs) = list_runs(State(server.state.clone())).await;
        assert_eq!(runs[0].container_id, "ctr-123");
    }

    #[tokio::test]
    async fn register_routes_without_route_table_is_503() {
        let server = test_server();
        let result = register_routes(
            State(server.state.clone()),
            AxumPath("claude".to_owned()),
            Json(RegisterRoutesRequest { services: HashMap::new() }),
        )
        .await;
        assert!(matches!(result, Err(DaemonError::Conflict(ConflictError::NoRouteTable))));
    }

    #[tokio::test]
    async fn unregister_run_twice_second_call_is_404() {
        let server = test_server();
        let (token, _run) = server.state.registry.register("run-abc".to_owned()).await;
        let first = unregister_run(State(server.state.clone()), AxumPath(token.clone())).await;
        assert_eq!(first.expect("first removal"), StatusCode::NO_CONTENT);
        let second = unregister_run(State(server.state.clone()), AxumPath(token)).await;
        assert!(matches!(second, Err(DaemonError::NotFound(NotFoundError::Run))));
    }
}

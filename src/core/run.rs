//! `RunContext`: per-run injection rule set and the `ProxyConfigurer`
//! capability providers use to populate it.

use std::collections::HashMap;
use std::sync::Arc;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tokio::sync::RwLock;
use tokio_util::sync::CancellationToken;

/// A single host-scoped credential entry.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Credential {
    /// Request header the credential is injected into.
    pub header_name: String,
    /// The header value (e.g. `Bearer ghp_xxx`).
    pub value: String,
    /// Which provider grant produced this credential, if any.
    pub grant: Option<String>,
}

/// AWS-specific run configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AwsConfig {
    /// Role to assume.
    pub role_arn: String,
    /// AWS region.
    pub region: String,
    /// Requested STS session duration.
    pub session_duration_ns: u64,
    /// Optional external ID for the assume-role call.
    pub external_id: Option<String>,
}

/// An MCP server a container is permitted to reach.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct McpServer {
    /// Server name.
    pub name: String,
    /// Server URL.
    pub url: String,
    /// Extra headers to send when contacting it.
    pub headers: HashMap<String, String>,
}

/// Network egress policy for a run.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "lowercase")]
pub enum NetworkPolicy {
    /// No policy; behavior is up to the proxy's default.
    #[default]
    #[serde(rename = "")]
    Unset,
    /// Only hosts in `network_allow` are reachable.
    Allowlist,
    /// All hosts are reachable.
    Allowall,
}

/// An in-process response rewrite capability, populated by provider code.
/// Never serialized — the control API never receives or returns these.
#[async_trait]
pub trait ResponseTransformer: Send + Sync + std::fmt::Debug {
    /// Human-readable name, used in logs.
    fn name(&self) -> &str;
}

/// Per-run state: injection rules, container binding, and the refresh
/// cancellation handle.
///
/// All host-keyed maps are guarded by one internal lock ([`RunContext::inner`])
/// so that reads observe a consistent snapshot and writers never interleave.
/// Holding only a [`CancellationToken`] (not a reference back to this struct)
/// in the refresh task avoids a reference cycle between the run and its
/// own background worker.
pub struct RunContext {
    /// Caller-chosen run identifier.
    pub run_id: String,
    /// Bearer token the proxy presents to look this run up. Set once, before
    /// the run becomes observable through the registry.
    pub auth_token: String,
    /// When this run was registered.
    pub registered_at: DateTime<Utc>,
    container_id: RwLock<String>,
    inner: RwLock<RunState>,
    /// Cancels the run's refresh worker, if one was started. `None` when the
    /// run has no refreshable grants.
    refresh_cancel: RwLock<Option<CancellationToken>>,
}

#[derive(Default)]
struct RunState {
    credentials: HashMap<String, Credential>,
    extra_headers: HashMap<String, Vec<(String, String)>>,
    remove_headers: HashMap<String, Vec<String>>,
    token_substitutions: HashMap<String, (String, String)>,
    response_transformers: HashMap<String, Vec<Arc<dyn ResponseTransformer>>>,
    mcp_servers: Vec<McpServer>,
    network_policy: NetworkPolicy,
    network_allow: Vec<String>,
    aws_config: Option<AwsConfig>,
}

impl std::fmt::Debug for RunContext {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RunContext")
            .field("run_id", &self.run_id)
            .field("registered_at", &self.registered_at)
            .finish_non_exhaustive()
    }
}

/// Splits `host:port` into `(host, Some(port))`, returning `(key, None)` when
/// there is no port. Used to build the exact-then-bare-host lookup sequence
/// shared by every host-keyed accessor.
fn host_key_candidates(key: &str) -> Vec<&str> {
    match key.rsplit_once(':') {
        Some((host, port)) if !port.is_empty() && port.bytes().all(|b| b.is_ascii_digit()) => {
            vec![key, host]
        }
        _ => vec![key],
    }
}

impl RunContext {
    /// Construct a fresh run with an empty rule set. `auth_token` must be set
    /// by the caller before the run is published into the registry.
    #[must_use]
    pub fn new(run_id: String, auth_token: String) -> Self {
        Self {
            run_id,
            auth_token,
            registered_at: Utc::now(),
            container_id: RwLock::new(String::new()),
            inner: RwLock::new(RunState::default()),
            refresh_cancel: RwLock::new(None),
        }
    }

    /// Current container ID, empty until phase 2 binding.
    pub async fn container_id(&self) -> String {
        self.container_id.read().await.clone()
    }

    /// Bind the container ID (phase 2 registration).
    pub async fn set_container_id(&self, container_id: String) {
        *self.container_id.write().await = container_id;
    }

    /// Install the refresh cancellation handle. Called before the run is
    /// published in the registry so a concurrent `DELETE` always observes a
    /// cancellable handle.
    pub async fn set_refresh_cancel(&self, token: CancellationToken) {
        *self.refresh_cancel.write().await = Some(token);
    }

    /// Cancel the refresh worker, if any. Single-shot: calling this more than
    /// once, or when no worker was ever started, is a no-op.
    pub async fn cancel_refresh(&self) {
        if let Some(token) = self.refresh_cancel.write().await.take() {
            token.cancel();
        }
    }

    /// Snapshot of the run's MCP server list.
    pub async fn mcp_servers(&self) -> Vec<McpServer> {
        self.inner.read().await.mcp_servers.clone()
    }

    /// Replace the MCP server list wholesale (set at registration time).
    pub async fn set_mcp_servers(&self, servers: Vec<McpServer>) {
        self.inner.write().await.mcp_servers = servers;
    }

    /// Current network policy and allow-list.
    pub async fn network_policy(&self) -> (NetworkPolicy, Vec<String>) {
        let state = self.inner.read().await;
        (state.network_policy, state.network_allow.clone())
    }

    /// Set the network policy and allow-list at registration time.
    pub async fn set_network_policy(&self, policy: NetworkPolicy, allow: Vec<String>) {
        let mut state = self.inner.write().await;
        state.network_policy = policy;
        state.network_allow = allow;
    }

    /// Current AWS configuration, if any.
    pub async fn aws_config(&self) -> Option<AwsConfig> {
        self.inner.read().await.aws_config.clone()
    }

    /// Set the AWS configuration at registration time.
    pub async fn set_aws_config(&self, config: Option<AwsConfig>) {
        self.inner.write().await.aws_config = config;
    }
}

/// The capability a run exposes to credential providers: host-keyed
/// injection rules, read and write. All operations are idempotent per host
/// except the append-only `Add*` operations.
#[async_trait]
pub trait ProxyConfigurer: Send + Sync {
    /// Equivalent to `set_credential_header(host, "Authorization", value)`.
    async fn set_credential(&self, host: &str, value: &str) {
        self.set_credential_header(host, "Authorization", value).await;
    }

    /// Equivalent to `set_credential_with_grant(host, name, value, None)`.
    async fn set_credential_header(&self, host: &str, name: &str, value: &str) {
        self.set_credential_with_grant(host, name, value, None).await;
    }

    /// Overwrite the credential for `host`.
    async fn set_credential_with_grant(&self, host: &str, name: &str, value: &str, grant: Option<&str>);

    /// Append an extra header for `host`.
    async fn add_extra_header(&self, host: &str, name: &str, value: &str);

    /// Append a header to strip from requests to `host`.
    async fn remove_request_header(&self, host: &str, name: &str);

    /// Append a response transformer for `host`.
    async fn add_response_transformer(&self, host: &str, transformer: Arc<dyn ResponseTransformer>);

    /// Overwrite the token substitution rule for `host`.
    async fn set_token_substitution(&self, host: &str, placeholder: &str, real_token: &str);

    /// Credential for `host`, falling back to the bare host if `host`
    /// includes a port and has no exact entry.
    async fn get_credential(&self, host: &str) -> Option<Credential>;

    /// Extra headers for `host`, with the same host:port fallback.
    async fn get_extra_headers(&self, host: &str) -> Vec<(String, String)>;

    /// Headers to strip for `host`, with the same host:port fallback.
    async fn get_remove_headers(&self, host: &str) -> Vec<String>;

    /// Token substitution rule for `host`, with the same host:port fallback.
    async fn get_token_substitution(&self, host: &str) -> Option<(String, String)>;

    /// Response transformers for `host`, with the same host:port fallback.
    async fn get_response_transformers(&self, host: &str) -> Vec<Arc<dyn ResponseTransformer>>;
}

#[async_trait]
impl ProxyConfigurer for RunContext {
    async fn set_credential_with_grant(&self, host: &str, name: &str, value: &str, grant: Option<&str>) {
        self.inner.write().await.credentials.insert(
            host.to_owned(),
            Credential {
                header_name: name.to_owned(),
                value: value.to_owned(),
                grant: grant.map(str::to_owned),
            },
        );
    }

    async fn add_extra_header(&self, host: &str, name: &str, value: &str) {
        self.inner
            .write()
            .await
            .extra_headers
            .entry(host.to_owned())
            .or_default()
            .push((name.to_owned(), value.to_owned()));
    }

    async fn remove_request_header(&self, host: &str, name: &str) {
        self.inner
            .write()
            .await
            .remove_headers
            .entry(host.to_owned())
            .or_default()
            .push(name.to_owned());
    }

    async fn add_response_transformer(&self, host: &str, transformer: Arc<dyn ResponseTransformer>) {
        self.inner
            .write()
            .await
            .response_transformers
            .entry(host.to_owned())
            .or_default()
            .push(transformer);
    }

    async fn set_token_substitution(&self, host: &str, placeholder: &str, real_token: &str) {
        self.inner
            .write()
            .await
            .token_substitutions
            .insert(host.to_owned(), (placeholder.to_owned(), real_token.to_owned()));
    }

    async fn get_credential(&self, host: &str) -> Option<Credential> {
        let state = self.inner.read().await;
        host_key_candidates(host)
            .into_iter()
            .find_map(|key| state.credentials.get(key).cloned())
    }

    async fn get_extra_headers(&self, host: &str) -> Vec<(String, String)> {
        let state = self.inner.read().await;
        host_key_candidates(host)
            .into_iter()
            .find_map(|key| state.extra_headers.get(key).cloned())
            .unwrap_or_default()
    }

    async fn get_remove_headers(&self, host: &str) -> Vec<String> {
        let state = self.inner.read().await;
        host_key_candidates(host)
            .into_iter()
            .find_map(|key| state.remove_headers.get(key).cloned())
            .unwrap_or_default()
    }

    async fn get_token_substitution(&self, host: &str) -> Option<(String, String)> {
        let state = self.inner.read().await;
        host_key_candidates(host)
            .into_iter()
            .find_map(|key| state.token_substitutions.get(key).cloned())
    }

    async fn get_response_transformers(&self, host: &str) -> Vec<Arc<dyn ResponseTransformer>> {
        let state = self.inner.read().await;
        host_key_candidates(host)
            .into_iter()
            .find_map(|key| state.response_transformers.get(key).cloned())
            .unwrap_or_default()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn run() -> RunContext {
        RunContext::new("run-abc".to_owned(), "a".repeat(64))
    }

    #[tokio::test]
    async fn set_credential_defaults_to_authorization_header() {
        let rc = run();
        rc.set_credential("api.github.com", "Bearer ghp_xxx").await;
        let cred = rc.get_credential("api.github.com").await.expect("present");
        assert_eq!(cred.header_name, "Authorization");
        assert_eq!(cred.value, "Bearer ghp_xxx");
    }

    #[tokio::test]
    async fn host_port_fallback_when_exact_key_absent() {
        let rc = run();
        rc.set_credential("api.github.com", "Bearer ghp_xxx").await;
        let cred = rc.get_credential("api.github.com:443").await.expect("fallback");
        assert_eq!(cred.value, "Bearer ghp_xxx");
    }

    #[tokio::test]
    async fn exact_key_wins_over_fallback() {
        let rc = run();
        rc.set_credential("api.github.com", "Bearer bare").await;
        rc.set_credential("api.github.com:443", "Bearer with-port").await;
        let cred = rc.get_credential("api.github.com:443").await.expect("present");
        assert_eq!(cred.value, "Bearer with-port");
    }

    #[tokio::test]
    async fn extra_headers_append_in_order() {
        let rc = run();
        rc.add_extra_header("api.github.com", "X-One", "1").await;
        rc.add_extra_header("api.github.com", "X-Two", "2").await;
        let headers = rc.get_extra_headers("api.github.com").await;
        assert_eq!(
            headers,
            vec![
                ("X-One".to_owned(), "1".to_owned()),
                ("X-Two".to_owned(), "2".to_owned())
            ]
        );
    }

    #[tokio::test]
    async fn remove_headers_are_idempotent_in_effect() {
        let rc = run();
        rc.remove_request_header("api.github.com", "Cookie").await;
        rc.remove_request_header("api.github.com", "Cookie").await;
        assert_eq!(
            rc.get_remove_headers("api.github.com").await,
            vec!["Cookie".to_owned(), "Cookie".to_owned()]
        );
    }

    #[tokio::test]
    async fn token_substitution_last_write_wins() {
        let rc = run();
        rc.set_token_substitution("api.github.com", "PLACEHOLDER", "first").await;
        rc.set_token_substitution("api.github.com", "PLACEHOLDER", "second").await;
        let (placeholder, real) = rc.get_token_substitution("api.github.com").await.expect("present");
        assert_eq!(placeholder, "PLACEHOLDER");
        assert_eq!(real, "second");
    }

    #[tokio::test]
    async fn cancel_refresh_is_a_single_shot_no_op() {
        let rc = run();
        let token = CancellationToken::new();
        rc.set_refresh_cancel(token.clone()).await;
        rc.cancel_refresh().await;
        assert!(token.is_cancelled());
        rc.cancel_refresh().await; // second call: no panic, no-op
    }

    #[tokio::test]
    async fn cancel_refresh_without_a_worker_is_a_no_op() {
        let rc = run();
        rc.cancel_refresh().await;
    }

    #[test]
    fn host_key_candidates_splits_numeric_port_only() {
        assert_eq!(host_key_candidates("api.github.com:443"), vec!["api.github.com:443", "api.github.com"]);
        assert_eq!(host_key_candidates("api.github.com"), vec!["api.github.com"]);
        assert_eq!(host_key_candidates("2001:db8::1"), vec!["2001:db8::1"]);
    }
}

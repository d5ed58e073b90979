//! Wire types for the control socket HTTP API.

use std::collections::HashMap;

use serde::{Deserialize, Serialize};

use crate::core::run::{AwsConfig, McpServer, NetworkPolicy};

/// One credential entry in a [`RegisterRequest`].
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct CredentialEntry {
    /// Host the credential applies to.
    pub host: String,
    /// Header name to inject the credential under.
    pub header: String,
    /// The credential value.
    pub value: String,
    /// Which provider grant this credential came from, if any.
    #[serde(skip_serializing_if = "Option::is_none", default)]
    pub grant: Option<String>,
}

/// One extra-header entry in a [`RegisterRequest`].
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct ExtraHeaderEntry {
    /// Host the header applies to.
    pub host: String,
    /// Header name.
    pub header_name: String,
    /// Header value.
    pub value: String,
}

/// One header-removal entry in a [`RegisterRequest`].
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct RemoveHeaderEntry {
    /// Host the removal applies to.
    pub host: String,
    /// Header name to strip.
    pub header_name: String,
}

/// One token-substitution entry in a [`RegisterRequest`].
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct TokenSubstitutionEntry {
    /// Host the substitution applies to.
    pub host: String,
    /// Placeholder string the container may reference.
    pub placeholder: String,
    /// Real token to substitute in its place.
    pub real_token: String,
}

/// One MCP server entry in a [`RegisterRequest`].
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct McpServerEntry {
    /// Server name.
    pub name: String,
    /// Server URL.
    pub url: String,
    /// Extra headers to send when contacting it.
    #[serde(skip_serializing_if = "HashMap::is_empty", default)]
    pub headers: HashMap<String, String>,
}

/// AWS configuration entry in a [`RegisterRequest`].
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct AwsConfigEntry {
    /// Role to assume.
    pub role_arn: String,
    /// AWS region.
    pub region: String,
    /// Requested STS session duration, in nanoseconds.
    pub session_duration_ns: u64,
    /// Optional external ID for the assume-role call.
    #[serde(skip_serializing_if = "Option::is_none", default)]
    pub external_id: Option<String>,
}

fn is_unset(policy: &str) -> bool {
    policy.is_empty()
}

/// Body of `POST /v1/runs`.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct RegisterRequest {
    /// Caller-chosen run identifier.
    pub run_id: String,
    /// Credentials to inject, keyed by host.
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub credentials: Vec<CredentialEntry>,
    /// Extra headers to append per host.
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub extra_headers: Vec<ExtraHeaderEntry>,
    /// Headers to strip per host.
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub remove_headers: Vec<RemoveHeaderEntry>,
    /// Token substitutions per host.
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub token_substitutions: Vec<TokenSubstitutionEntry>,
    /// MCP servers the container may reach.
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub mcp_servers: Vec<McpServerEntry>,
    /// `""`, `"allowlist"`, or `"allowall"`.
    #[serde(default, skip_serializing_if = "is_unset")]
    pub network_policy: String,
    /// Host patterns allowed when `network_policy == "allowlist"`.
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub network_allow: Vec<String>,
    /// Grant names to resolve against the provider registry.
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub grants: Vec<String>,
    /// AWS-specific configuration, if this run needs AWS access.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub aws_config: Option<AwsConfigEntry>,
}

/// Response body of `POST /v1/runs`.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct RegisterResponse {
    /// 64-char lowercase-hex bearer token for this run.
    pub auth_token: String,
    /// Port the companion proxy listens on.
    pub proxy_port: u16,
}

/// Response body of `GET /v1/health`.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct HealthResponse {
    /// PID of the daemon process.
    pub pid: u32,
    /// Port the companion proxy listens on.
    pub proxy_port: u16,
    /// Number of currently registered runs.
    pub run_count: usize,
    /// RFC3339 timestamp the daemon started at.
    pub started_at: String,
}

/// One entry of `GET /v1/runs`.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct RunListEntry {
    /// Caller-chosen run identifier.
    pub run_id: String,
    /// Bound container ID, empty before phase 2.
    pub container_id: String,
    /// RFC3339 registration timestamp.
    pub registered_at: String,
}

/// Body of `PATCH /v1/runs/{token}`.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct UpdateRunRequest {
    /// Container ID to bind (phase 2 registration).
    pub container_id: String,
}

/// Body of `POST /v1/routes/{agent}`.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct RegisterRoutesRequest {
    /// Service name → URL mapping to register for this agent.
    pub services: HashMap<String, String>,
}

/// Response body of `POST /v1/shutdown`.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct ShutdownResponse {
    /// Always `"shutting down"`.
    pub status: String,
}

impl From<AwsConfigEntry> for AwsConfig {
    fn from(entry: AwsConfigEntry) -> Self {
        Self {
            role_arn: entry.role_arn,
            region: entry.region,
            session_duration_ns: entry.session_duration_ns,
            external_id: entry.external_id,
        }
    }
}

impl From<McpServerEntry> for McpServer {
    fn from(entry: McpServerEntry) -> Self {
        Self {
            name: entry.name,
            url: entry.url,
            headers: entry.headers,
        }
    }
}

/// Parse `network_policy`'s raw wire string into the typed enum, rejecting
/// anything other than the three allowed values.
pub fn parse_network_policy(raw: &str) -> Result<NetworkPolicy, crate::error::ValidationError> {
    match raw {
        "" => Ok(NetworkPolicy::Unset),
        "allowlist" => Ok(NetworkPolicy::Allowlist),
        "allowall" => Ok(NetworkPolicy::Allowall),
        other => Err(crate::error::ValidationError::UnknownNetworkPolicy { value: other.to_owned() }),
    }
}

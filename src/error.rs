//! Error kinds surfaced by the daemon's core and control API.
//!
//! Only [`ValidationError`], [`NotFoundError`], and [`ConflictError`] ever
//! reach an HTTP client, via [`DaemonError`]'s status mapping. Liveness-probe
//! and refresh failures are logged and consumed internally — they never
//! become a [`DaemonError`].

use thiserror::Error;

/// Malformed input at the control API boundary.
#[derive(Debug, Error)]
pub enum ValidationError {
    /// The request body did not parse as the expected JSON shape.
    #[error("invalid request body: {reason}")]
    MalformedBody {
        /// Human-readable parse failure.
        reason: String,
    },

    /// A path segment (auth token, agent name) was not well-formed.
    #[error("invalid path segment '{value}': {reason}")]
    MalformedPathSegment {
        /// The offending value.
        value: String,
        /// Why it was rejected.
        reason: String,
    },

    /// `network_policy` was set to something other than the three allowed values.
    #[error("unknown network_policy '{value}', expected one of: \"\", \"allowlist\", \"allowall\"")]
    UnknownNetworkPolicy {
        /// The offending value.
        value: String,
    },
}

/// The requested resource does not exist in the registry or route table.
#[derive(Debug, Error)]
pub enum NotFoundError {
    /// No run is registered under this auth token.
    #[error("no run registered for token")]
    Run,

    /// No route table entry exists for this agent.
    #[error("no routes registered for agent '{agent}'")]
    Routes {
        /// The agent name that was looked up.
        agent: String,
    },
}

/// A route registration collided with existing state.
#[derive(Debug, Error)]
pub enum ConflictError {
    /// The external route table rejected the registration as an internal failure.
    #[error("route table rejected registration for agent '{agent}': {source}")]
    RouteTableFailure {
        /// The agent whose route registration failed.
        agent: String,
        /// The underlying failure.
        #[source]
        source: anyhow::Error,
    },

    /// No route table is configured at all.
    #[error("no route table configured")]
    NoRouteTable,
}

/// Lifecycle failures: spawning or waiting for the daemon process.
#[derive(Debug, Error)]
pub enum LifecycleError {
    /// Another process holds the spawn lock past the allotted timeout.
    #[error("timed out waiting for spawn lock at {path}")]
    SpawnLockTimeout {
        /// The spawn-lock file path.
        path: std::path::PathBuf,
    },

    /// The daemon executable could not be located or was rejected.
    #[error("could not resolve daemon executable: {reason}")]
    ExecutableNotFound {
        /// Why resolution failed.
        reason: String,
    },

    /// The daemon process failed to spawn.
    #[error("failed to spawn daemon process: {source}")]
    SpawnFailed {
        /// The underlying IO error.
        #[source]
        source: std::io::Error,
    },

    /// The daemon did not become ready (socket + health check) within the deadline.
    #[error("daemon did not become ready within {timeout_ms}ms")]
    ReadinessTimeout {
        /// The deadline that was exceeded, in milliseconds.
        timeout_ms: u64,
    },
}

/// Top-level error returned by the control server and client.
///
/// `into_status` gives the HTTP status a [`ControlServer`](crate::api::server)
/// handler should return; the server never leaks the `Display` text of a
/// wrapped source back to the client, only the structured `{"error": "..."}`
/// category.
#[derive(Debug, Error)]
pub enum DaemonError {
    /// See [`ValidationError`].
    #[error(transparent)]
    Validation(#[from] ValidationError),

    /// See [`NotFoundError`].
    #[error(transparent)]
    NotFound(#[from] NotFoundError),

    /// See [`ConflictError`].
    #[error(transparent)]
    Conflict(#[from] ConflictError),

    /// See [`LifecycleError`].
    #[error(transparent)]
    Lifecycle(#[from] LifecycleError),

    /// Transport-level failure talking to the daemon (connection refused/reset).
    #[error("transport error: {0}")]
    Transport(#[source] anyhow::Error),

    /// An HTTP status was returned that the caller did not expect.
    #[error("unexpected status {status} from daemon")]
    UnexpectedStatus {
        /// The HTTP status code received.
        status: u16,
    },

    /// JSON encode/decode failure.
    #[error("json error: {0}")]
    Json(#[source] anyhow::Error),

    /// Unclassified IO failure (lock file, socket file, log file).
    #[error("io error: {0}")]
    Io(#[source] std::io::Error),
}

impl DaemonError {
    /// The category string placed in the `{"error": "<category>"}` response body.
    ///
    /// The server never echoes a wrapped error's `Display` text to the
    /// client: only this fixed category label crosses the
    /// control-socket boundary.
    #[must_use]
    pub const fn category(&self) -> &'static str {
        match self {
            Self::Validation(_) => "validation_error",
            Self::NotFound(_) => "not_found",
            Self::Conflict(ConflictError::NoRouteTable) => "no_route_table",
            Self::Conflict(_) => "conflict",
            Self::Lifecycle(_) => "lifecycle_error",
            Self::Transport(_) => "transport_error",
            Self::UnexpectedStatus { .. } => "unexpected_status",
            Self::Json(_) => "json_error",
            Self::Io(_) => "io_error",
        }
    }

    /// The HTTP status the control server should respond with.
    #[must_use]
    pub const fn http_status(&self) -> u16 {
        match self {
            Self::Validation(_) => 400,
            Self::NotFound(_) => 404,
            Self::Conflict(ConflictError::NoRouteTable) => 503,
            Self::Conflict(_) => 500,
            Self::Lifecycle(_) | Self::Transport(_) | Self::Json(_) | Self::Io(_) => 500,
            Self::UnexpectedStatus { status } => *status,
        }
    }
}

impl From<std::io::Error> for DaemonError {
    fn from(err: std::io::Error) -> Self {
        Self::Io(err)
    }
}

//! Daemon configuration: timers, intervals, and the base directory layout.
//!
//! An optional `<dir>/config.toml` provides a base, environment variables
//! override individual fields on top of it, and anything left unset falls
//! back to a hardcoded default.

use std::path::{Path, PathBuf};
use std::time::Duration;

use serde::{Deserialize, Serialize};

/// Daemon-wide tunables, loaded once at startup.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct DaemonConfig {
    /// How long the daemon stays up with zero registered runs before
    /// shutting itself down.
    #[serde(with = "duration_secs")]
    pub idle_shutdown_after: Duration,

    /// Interval between liveness sweeps of registered runs.
    #[serde(with = "duration_secs")]
    pub liveness_interval: Duration,

    /// Per-container timeout for a single liveness probe.
    #[serde(with = "duration_secs")]
    pub liveness_probe_timeout: Duration,

    /// Interval between credential refresh passes.
    #[serde(with = "duration_secs")]
    pub refresh_interval: Duration,

    /// Timeout for a single refresh pass across all registered runs.
    #[serde(with = "duration_secs")]
    pub refresh_pass_timeout: Duration,

    /// Grace period the control server waits for in-flight requests to
    /// drain before exiting on `/v1/shutdown`.
    #[serde(with = "duration_secs")]
    pub control_shutdown_drain: Duration,
}

impl Default for DaemonConfig {
    fn default() -> Self {
        Self {
            idle_shutdown_after: Duration::from_secs(5 * 60),
            liveness_interval: Duration::from_secs(30),
            liveness_probe_timeout: Duration::from_secs(5),
            refresh_interval: Duration::from_secs(5 * 60),
            refresh_pass_timeout: Duration::from_secs(30),
            control_shutdown_drain: Duration::from_secs(2),
        }
    }
}

impl DaemonConfig {
    /// Load `<dir>/config.toml` if present, then apply environment overrides.
    ///
    /// A missing config file is not an error: the defaults (overlaid by any
    /// env vars) are used as-is.
    pub fn load(dir: &Path) -> anyhow::Result<Self> {
        let path = dir.join("config.toml");
        let mut config = match std::fs::read_to_string(&path) {
            Ok(contents) => toml::from_str(&contents)
                .map_err(|err| anyhow::anyhow!("parsing {}: {err}", path.display()))?,
            Err(err) if err.kind() == std::io::ErrorKind::NotFound => Self::default(),
            Err(err) => return Err(anyhow::anyhow!("reading {}: {err}", path.display())),
        };
        config.apply_env_overrides();
        Ok(config)
    }

    fn apply_env_overrides(&mut self) {
        if let Some(secs) = env_u64("MOAT_IDLE_SHUTDOWN_SECS") {
            self.idle_shutdown_after = Duration::from_secs(secs);
        }
        if let Some(secs) = env_u64("MOAT_LIVENESS_INTERVAL_SECS") {
            self.liveness_interval = Duration::from_secs(secs);
        }
    }
}

fn env_u64(key: &str) -> Option<u64> {
    std::env::var(key).ok().and_then(|raw| raw.parse().ok())
}

/// The daemon's base directory: `$MOAT_DAEMON_DIR`, else `~/.moat/daemon`.
#[must_use]
pub fn base_dir() -> PathBuf {
    if let Some(dir) = std::env::var_os("MOAT_DAEMON_DIR") {
        return PathBuf::from(dir);
    }
    dirs::home_dir()
        .unwrap_or_else(|| PathBuf::from("."))
        .join(".moat")
        .join("daemon")
}

/// Path to the daemon's lock file within `dir`.
#[must_use]
pub fn lock_file_path(dir: &Path) -> PathBuf {
    dir.join("daemon.lock")
}

/// Path to the daemon's control-socket file within `dir`.
#[must_use]
pub fn socket_path(dir: &Path) -> PathBuf {
    dir.join("daemon.sock")
}

/// Path to the advisory spawn lock used to serialize self-spawn attempts.
#[must_use]
pub fn spawn_lock_path(dir: &Path) -> PathBuf {
    dir.join("spawn.lock")
}

/// Path the parent process redirects the daemon's stdout/stderr into.
#[must_use]
pub fn log_file_path(dir: &Path) -> PathBuf {
    dir.join("daemon.log")
}

/// Resolve the executable to self-spawn: `$MOAT_EXECUTABLE`, else the
/// current executable.
///
/// Rejects a resolved path that looks like a test binary (lives under a
/// `deps/` directory, or its file name ends in `-test`), guarding against
/// accidentally respawning a `cargo test` binary as the daemon.
pub fn resolve_daemon_executable() -> Result<PathBuf, crate::error::LifecycleError> {
    let path = if let Some(path) = std::env::var_os("MOAT_EXECUTABLE") {
        PathBuf::from(path)
    } else {
        std::env::current_exe().map_err(|err| crate::error::LifecycleError::ExecutableNotFound {
            reason: format!("current_exe(): {err}"),
        })?
    };

    let looks_like_test_binary = path
        .file_name()
        .and_then(|name| name.to_str())
        .is_some_and(|name| name.ends_with("-test"))
        || path
            .parent()
            .and_then(|parent| parent.file_name())
            .and_then(|name| name.to_str())
            == Some("deps");

    if looks_like_test_binary {
        return Err(crate::error::LifecycleError::ExecutableNotFound {
            reason: format!("resolved path {} looks like a test binary", path.display()),
        });
    }

    Ok(path)
}

mod duration_secs {
    use std::time::Duration;

    use serde::{Deserialize, Deserializer, Serializer};

    pub fn serialize<S: Serializer>(duration: &Duration, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_u64(duration.as_secs())
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(deserializer: D) -> Result<Duration, D::Error> {
        let secs = u64::deserialize(deserializer)?;
        Ok(Duration::from_secs(secs))
    }
}

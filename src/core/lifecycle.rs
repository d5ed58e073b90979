//! Daemon self-spawn and singleton control: `ensure_running` acquires a
//! spawn lock, checks for a live prior instance, and otherwise starts a
//! fresh detached daemon process. Grounded directly on this workspace's own
//! daemon-spawning helper, generalized from a single hardcoded socket path
//! to the per-`dir` layout this daemon uses.

use std::fs::{File, OpenOptions};
use std::io::Write as _;
use std::os::unix::process::CommandExt as _;
use std::path::{Path, PathBuf};
use std::process::{Command, Stdio};
use std::time::{Duration, Instant};

use fs2::FileExt as _;

use crate::api::client::ControlClient;
use crate::config;
use crate::core::lockfile::LockFile;
use crate::error::LifecycleError;

/// Deadline for the whole ensure-running sequence: spawn plus readiness
/// poll.
const READINESS_DEADLINE: Duration = Duration::from_secs(5);
const POLL_INTERVAL: Duration = Duration::from_millis(100);

/// RAII guard for `<dir>/spawn.lock`; removes the lock file on drop so a
/// crashed holder never wedges future spawns.
struct SpawnLockGuard {
    _file: File,
    path: PathBuf,
}

impl Drop for SpawnLockGuard {
    fn drop(&mut self) {
        let _ = std::fs::remove_file(&self.path);
    }
}

fn acquire_spawn_lock(dir: &Path) -> Result<SpawnLockGuard, LifecycleError> {
    let lock_path = config::spawn_lock_path(dir);
    std::fs::create_dir_all(dir).map_err(|_| LifecycleError::SpawnLockTimeout { path: lock_path.clone() })?;

    let mut file = OpenOptions::new()
        .write(true)
        .create(true)
        .truncate(true)
        .open(&lock_path)
        .map_err(|_| LifecycleError::SpawnLockTimeout { path: lock_path.clone() })?;

    file.try_lock_exclusive()
        .map_err(|_| LifecycleError::SpawnLockTimeout { path: lock_path.clone() })?;

    let _ = writeln!(file, "{}", std::process::id());

    Ok(SpawnLockGuard { _file: file, path: lock_path })
}

/// Start a detached `_daemon` process in a new session, with stdin bound to
/// the null device and stdout/stderr redirected into `<dir>/daemon.log`.
fn spawn_daemon_process(dir: &Path, proxy_port: u16) -> Result<(), LifecycleError> {
    let exe_path = config::resolve_daemon_executable()?;
    let log_path = config::log_file_path(dir);
    let log_file = OpenOptions::new()
        .create(true)
        .append(true)
        .open(&log_path)
        .map_err(|err| LifecycleError::SpawnFailed { source: err })?;
    let log_file_err = log_file
        .try_clone()
        .map_err(|err| LifecycleError::SpawnFailed { source: err })?;

    let mut child = Command::new(&exe_path)
        .arg("_daemon")
        .arg("--dir")
        .arg(dir)
        .arg("--proxy-port")
        .arg(proxy_port.to_string())
        .stdin(Stdio::null())
        .stdout(Stdio::from(log_file))
        .stderr(Stdio::from(log_file_err))
        .process_group(0)
        .spawn()
        .map_err(|err| LifecycleError::SpawnFailed { source: err })?;

    // Brief health check: a daemon that crashes on startup should fail fast
    // rather than silently leave `ensure_running` to time out on readiness.
    std::thread::sleep(Duration::from_millis(200));
    if let Ok(Some(status)) = child.try_wait() {
        return Err(LifecycleError::SpawnFailed {
            source: std::io::Error::other(format!("daemon exited immediately with {status}")),
        });
    }

    Ok(())
}

/// Poll `<dir>/daemon.sock` and `GET /v1/health` until either succeeds or
/// [`READINESS_DEADLINE`] expires.
async fn wait_for_daemon(dir: &Path) -> Result<ControlClient, LifecycleError> {
    let socket_path = config::socket_path(dir);
    let start = Instant::now();

    while start.elapsed() < READINESS_DEADLINE {
        if let Ok(client) = ControlClient::connect(socket_path.clone())
            && client.health().await.is_ok()
        {
            return Ok(client);
        }
        tokio::time::sleep(POLL_INTERVAL).await;
    }

    Err(LifecycleError::ReadinessTimeout { timeout_ms: READINESS_DEADLINE.as_millis() as u64 })
}

/// Ensure a daemon is running for `dir`, spawning one bound to `requested_port`
/// if necessary, and return a client connected to it.
///
/// Acquires the spawn lock, checks for a live prior instance, removes stale
/// state, resolves the executable, spawns detached, then polls for
/// readiness.
pub async fn ensure_running(dir: &Path, requested_port: u16) -> Result<ControlClient, LifecycleError> {
    let _spawn_lock = acquire_spawn_lock(dir)?;

    if let Ok(Some(lock)) = LockFile::read(dir)
        && lock.is_alive()
        && let Ok(client) = ControlClient::connect(PathBuf::from(&lock.sock_path))
        && client.health().await.is_ok()
    {
        return Ok(client);
    }

    // Stale lock/socket from a dead prior instance: remove before respawning.
    let _ = LockFile::remove(dir);
    let _ = std::fs::remove_file(config::socket_path(dir));

    spawn_daemon_process(dir, requested_port)?;
    wait_for_daemon(dir).await
}

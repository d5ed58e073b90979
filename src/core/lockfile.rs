//! The daemon's lock file: `{pid, proxy_port, sock_path, started_at}`,
//! written at startup and removed at graceful stop.

use std::path::Path;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Record written to `<dir>/daemon.lock`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct LockFile {
    /// PID of the running daemon process.
    pub pid: u32,
    /// Port the companion TLS-intercepting proxy listens on.
    pub proxy_port: u16,
    /// Path to the daemon's control socket.
    pub sock_path: String,
    /// When the daemon started, defaulting to "now" if left at the Unix epoch.
    #[serde(default = "Utc::now")]
    pub started_at: DateTime<Utc>,
}

impl LockFile {
    /// Build a record for the current process, defaulting `started_at` to now.
    #[must_use]
    pub fn new(proxy_port: u16, sock_path: String) -> Self {
        Self {
            pid: std::process::id(),
            proxy_port,
            sock_path,
            started_at: Utc::now(),
        }
    }

    /// Write this record as pretty JSON to `<dir>/daemon.lock`, creating `dir`
    /// if absent.
    pub fn write(&self, dir: &Path) -> std::io::Result<()> {
        std::fs::create_dir_all(dir)?;
        let path = crate::config::lock_file_path(dir);
        let json = serde_json::to_string_pretty(self)
            .map_err(|err| std::io::Error::other(format!("serializing lock file: {err}")))?;
        std::fs::write(path, json)
    }

    /// Read `<dir>/daemon.lock`. A missing file is `Ok(None)`, not an error;
    /// malformed JSON is an error.
    pub fn read(dir: &Path) -> std::io::Result<Option<Self>> {
        let path = crate::config::lock_file_path(dir);
        match std::fs::read_to_string(&path) {
            Ok(contents) => {
                let record = serde_json::from_str(&contents)
                    .map_err(|err| std::io::Error::other(format!("parsing {}: {err}", path.display())))?;
                Ok(Some(record))
            }
            Err(err) if err.kind() == std::io::ErrorKind::NotFound => Ok(None),
            Err(err) => Err(err),
        }
    }

    /// Remove `<dir>/daemon.lock`. Idempotent: a missing file is not an error.
    pub fn remove(dir: &Path) -> std::io::Result<()> {
        let path = crate::config::lock_file_path(dir);
        match std::fs::remove_file(path) {
            Ok(()) => Ok(()),
            Err(err) if err.kind() == std::io::ErrorKind::NotFound => Ok(()),
            Err(err) => Err(err),
        }
    }

    /// True iff the recorded pid is alive, checked by sending signal 0.
    #[must_use]
    pub fn is_alive(&self) -> bool {
        pid_is_alive(self.pid)
    }
}

/// Signals pid 0 to `pid` via the `kill` utility rather than linking libc
/// directly, keeping this crate free of `unsafe` (forbidden crate-wide).
fn pid_is_alive(pid: u32) -> bool {
    std::process::Command::new("kill")
        .arg("-0")
        .arg(pid.to_string())
        .stdout(std::process::Stdio::null())
        .stderr(std::process::Stdio::null())
        .status()
        .is_ok_and(|status| status.success())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn write_then_read_round_trips_modulo_nothing_for_set_timestamp() {
        let dir = tempfile::tempdir().expect("tempdir");
        let record = LockFile {
            pid: std::process::id(),
            proxy_port: 9119,
            sock_path: dir.path().join("daemon.sock").display().to_string(),
            started_at: Utc::now(),
        };
        record.write(dir.path()).expect("write");
        let read_back = LockFile::read(dir.path()).expect("read").expect("present");
        assert_eq!(record, read_back);
    }

    #[test]
    fn missing_file_is_none_not_error() {
        let dir = tempfile::tempdir().expect("tempdir");
        assert!(LockFile::read(dir.path()).expect("read").is_none());
    }

    #[test]
    fn malformed_json_is_an_error() {
        let dir = tempfile::tempdir().expect("tempdir");
        std::fs::write(dir.path().join("daemon.lock"), "not json").expect("write");
        assert!(LockFile::read(dir.path()).is_err());
    }

    #[test]
    fn remove_is_idempotent() {
        let dir = tempfile::tempdir().expect("tempdir");
        LockFile::remove(dir.path()).expect("first remove");
        LockFile::remove(dir.path()).expect("second remove");
    }

    #[test]
    fn is_alive_true_for_own_pid() {
        let record = LockFile::new(9119, "/tmp/daemon.sock".to_owned());
        assert!(record.is_alive());
    }

    #[test]
    fn is_alive_false_for_absurd_pid() {
        let record = LockFile {
            pid: u32::MAX,
            proxy_port: 9119,
            sock_path: "/tmp/daemon.sock".to_owned(),
            started_at: Utc::now(),
        };
        assert!(!record.is_alive());
    }
}

//! Shared helpers for the control-API integration tests: boot a real
//! [`ControlServer`] over a temp-directory Unix socket and hand back a
//! connected [`ControlClient`].

use std::sync::Arc;
use std::time::Duration;

use moat_daemon::api::{ControlClient, ControlServer};
use moat_daemon::config::{self, DaemonConfig};
use moat_daemon::core::IdleTimer;
use moat_daemon::core::providers::ProviderRegistry;
use moat_daemon::core::refresh::CredentialStore;
use moat_daemon::core::registry::Registry;

pub struct NoopCredentialStore;

#[async_trait::async_trait]
impl CredentialStore for NoopCredentialStore {
    async fn get(&self, _grant_name: &str) -> Option<String> {
        None
    }
}

/// A running daemon control server plus a client already pointed at it.
/// Keeping `_dir` alive keeps the socket file's tempdir from being cleaned
/// up out from under the listener.
pub struct TestDaemon {
    pub client: ControlClient,
    _dir: tempfile::TempDir,
}

impl TestDaemon {
    pub async fn idle_shutdown_after(duration: Duration) -> Self {
        let dir = tempfile::tempdir().expect("tempdir");
        let mut daemon_config = DaemonConfig::default();
        daemon_config.idle_shutdown_after = duration;

        let registry = Arc::new(Registry::new());
        let providers = Arc::new(ProviderRegistry::built_in());
        let credential_store: Arc<dyn CredentialStore> = Arc::new(NoopCredentialStore);
        let idle_timer = Arc::new(IdleTimer::spawn(daemon_config.idle_shutdown_after, || {}));

        let server = ControlServer::new(registry, providers, credential_store, None, 9443, idle_timer, &daemon_config);

        let sock_path = config::socket_path(dir.path());
        let serve_path = sock_path.clone();
        tokio::spawn(async move {
            let _ = server.serve(&serve_path).await;
        });

        // Give the listener a moment to bind before the first request.
        for _ in 0..50 {
            if sock_path.exists() {
                break;
            }
            tokio::time::sleep(Duration::from_millis(10)).await;
        }

        let client = ControlClient::connect(sock_path).expect("connect");
        Self { client, _dir: dir }
    }
}

pub async fn test_daemon() -> TestDaemon {
    TestDaemon::idle_shutdown_after(Duration::from_secs(300)).await
}

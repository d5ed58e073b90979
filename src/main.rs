use std::sync::Arc;

use async_trait::async_trait;
use clap::{Parser, Subcommand};

use moat_daemon::api::server::ControlServer;
use moat_daemon::config::{self, DaemonConfig};
use moat_daemon::core::idle_timer::IdleTimer;
use moat_daemon::core::liveness::{CachingContainerChecker, LivenessCallbacks, LivenessChecker};
use moat_daemon::core::lockfile::LockFile;
use moat_daemon::core::providers::ProviderRegistry;
use moat_daemon::core::refresh::CredentialStore;
use moat_daemon::core::registry::Registry;
use moat_daemon::observability;

#[derive(Parser)]
#[command(name = "moat-daemon")]
#[command(version)]
#[command(about = "Local credential-injection daemon for containerized coding-agent CLIs")]
#[command(long_about = "\
moat-daemon mediates outbound HTTPS from containerized coding-agent CLIs
(Claude Code, Gemini, Codex) so that no container ever holds a raw secret.

It provides:
  - A token-keyed run registry the TLS-intercepting proxy consults per request
  - A local control socket for registering, binding, and tearing down runs
  - A liveness sweep that evicts runs whose container has exited
  - Background credential refresh for refreshable grants

This binary only runs the daemon process itself (`_daemon`); the CLI that
drives it (spawning containers, issuing grants) is a separate front end.")]
#[command(after_long_help = "\
ENVIRONMENT VARIABLES:
    RUST_LOG                     Log level filter (default: moat_daemon=info)
    MOAT_LOG_FORMAT=json         Structured JSON log output
    MOAT_DAEMON_DIR              Base directory (default: ~/.moat/daemon)
    MOAT_EXECUTABLE              Override the daemon binary path used to self-spawn
    MOAT_IDLE_SHUTDOWN_SECS      Override the idle-shutdown timeout
    MOAT_LIVENESS_INTERVAL_SECS  Override the liveness sweep interval

FILE LOCATIONS:
    <dir>/daemon.lock   {pid, proxy_port, sock_path, started_at}
    <dir>/daemon.sock   Control socket
    <dir>/daemon.log    stdout+stderr of the detached daemon
    <dir>/spawn.lock    Advisory lock serializing self-spawn")]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Run the daemon process itself. Not meant to be invoked directly by
    /// end users: `ControlClient::ensure_running` spawns this.
    #[command(name = "_daemon")]
    Daemon {
        /// Base directory for the lock file, control socket, and log.
        #[arg(long)]
        dir: std::path::PathBuf,
        /// Port the companion TLS-intercepting proxy listens on.
        #[arg(long)]
        proxy_port: u16,
    },
}

/// Credential store stub: reads grant values from `MOAT_GRANT_<NAME>`
/// environment variables. Encrypted credential-at-rest storage is an
/// external collaborator; this is the simplest
/// implementation satisfying the `CredentialStore` capability seam so the
/// daemon binary runs standalone.
struct EnvCredentialStore;

#[async_trait]
impl CredentialStore for EnvCredentialStore {
    async fn get(&self, grant_name: &str) -> Option<String> {
        let key = format!("MOAT_GRANT_{}", grant_name.to_uppercase().replace('-', "_"));
        std::env::var(key).ok()
    }
}

fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();
    let Commands::Daemon { dir, proxy_port } = cli.command;

    observability::init_daemon_logging();

    let runtime = tokio::runtime::Runtime::new()?;
    runtime.block_on(run_daemon(dir, proxy_port))
}

async fn run_daemon(dir: std::path::PathBuf, proxy_port: u16) -> anyhow::Result<()> {
    let daemon_config = DaemonConfig::load(&dir)?;
    let sock_path = config::socket_path(&dir);

    let registry = Arc::new(Registry::new());
    let providers = Arc::new(ProviderRegistry::built_in());
    let credential_store: Arc<dyn CredentialStore> = Arc::new(EnvCredentialStore);

    // The idle timer's callback needs to notify the server's shutdown
    // handle, but the server isn't constructed until the (single) idle
    // timer already exists. Route the notification through a `OnceLock`
    // filled in immediately after construction; the callback only ever
    // fires later, once the daemon is fully wired up and serving.
    let shutdown_handle_slot: Arc<std::sync::OnceLock<Arc<tokio::sync::Notify>>> =
        Arc::new(std::sync::OnceLock::new());
    let idle_timer_shutdown_slot = Arc::clone(&shutdown_handle_slot);
    let idle_timer = Arc::new(IdleTimer::spawn(daemon_config.idle_shutdown_after, move || {
        tracing::info!("idle timeout elapsed with no registered runs, shutting down");
        if let Some(handle) = idle_timer_shutdown_slot.get() {
            handle.notify_one();
        }
    }));

    let server = ControlServer::new(
        Arc::clone(&registry),
        Arc::clone(&providers),
        credential_store,
        None,
        proxy_port,
        Arc::clone(&idle_timer),
        &daemon_config,
    );
    let _ = shutdown_handle_slot.set(server.shutdown_handle());

    let liveness = LivenessChecker::new(
        Arc::clone(&registry),
        Arc::new(CachingContainerChecker::new()),
        daemon_config.liveness_interval,
        LivenessCallbacks {
            on_cleanup: Some(Arc::new(|token, run_id| {
                tracing::info!(token, run_id, "evicted run: container no longer running");
            })),
            on_empty: Some(Arc::new(move || idle_timer.reset())),
        },
    );
    let liveness_cancel = tokio_util::sync::CancellationToken::new();
    let liveness_task_cancel = liveness_cancel.clone();
    tokio::spawn(async move {
        liveness.run(liveness_task_cancel).await;
    });

    let lock = LockFile::new(proxy_port, sock_path.display().to_string());
    lock.write(&dir)?;

    tracing::info!(pid = lock.pid, proxy_port, dir = %dir.display(), "daemon starting");

    let result = server.serve(&sock_path).await.map_err(anyhow::Error::from);

    liveness_cancel.cancel();
    let _ = LockFile::remove(&dir);

    result
}

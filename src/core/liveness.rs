//! Periodic sweep evicting runs whose bound container has exited.

use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::Duration;

use async_trait::async_trait;
use tokio::process::Command;
use tokio_util::sync::CancellationToken;

use super::registry::Registry;

/// Timeout applied to each individual container check, independent of the
/// sweep's own cadence, so a hung runtime never stalls the whole sweep.
const PER_CHECK_TIMEOUT: Duration = Duration::from_secs(5);

/// External capability: asks the container runtime whether `container_id`
/// is still running. Implementations should return `false` fast when the
/// runtime itself is unavailable rather than erroring.
#[async_trait]
pub trait ContainerChecker: Send + Sync {
    /// True iff the container is currently running.
    async fn is_container_running(&self, container_id: &str) -> bool;
}

/// Checks via `docker inspect`, modeled on the same `docker ps` parsing
/// pattern used elsewhere in this workspace for container presence checks.
#[derive(Debug, Default)]
pub struct DockerChecker;

#[async_trait]
impl ContainerChecker for DockerChecker {
    async fn is_container_running(&self, container_id: &str) -> bool {
        let output = Command::new("docker")
            .args(["inspect", "-f", "{{.State.Running}}", container_id])
            .output()
            .await;
        match output {
            Ok(output) if output.status.success() => {
                String::from_utf8_lossy(&output.stdout).trim() == "true"
            }
            _ => false,
        }
    }
}

/// Checks via Apple's `container` CLI.
#[derive(Debug, Default)]
pub struct AppleContainerChecker;

#[async_trait]
impl ContainerChecker for AppleContainerChecker {
    async fn is_container_running(&self, container_id: &str) -> bool {
        let output = Command::new("container")
            .args(["inspect", "--format", "{{.Status}}", container_id])
            .output()
            .await;
        match output {
            Ok(output) if output.status.success() => {
                String::from_utf8_lossy(&output.stdout).trim() == "running"
            }
            _ => false,
        }
    }
}

/// Tries Docker first; once it answers (successfully or not) remembers
/// whether Docker is usable at all and, if not, falls back to Apple's
/// container runtime for the remainder of the process lifetime.
#[derive(Debug)]
pub struct CachingContainerChecker {
    docker: DockerChecker,
    apple: AppleContainerChecker,
    docker_available: AtomicBool,
    probed: AtomicBool,
}

impl Default for CachingContainerChecker {
    fn default() -> Self {
        Self::new()
    }
}

impl CachingContainerChecker {
    /// A fresh checker; the first call decides which runtime answers for
    /// the rest of this process's lifetime.
    #[must_use]
    pub fn new() -> Self {
        Self {
            docker: DockerChecker,
            apple: AppleContainerChecker,
            docker_available: AtomicBool::new(false),
            probed: AtomicBool::new(false),
        }
    }

    async fn docker_usable(&self) -> bool {
        if self.probed.load(Ordering::Acquire) {
            return self.docker_available.load(Ordering::Acquire);
        }
        let available = Command::new("docker")
            .arg("version")
            .output()
            .await
            .is_ok_and(|output| output.status.success());
        self.docker_available.store(available, Ordering::Release);
        self.probed.store(true, Ordering::Release);
        available
    }
}

#[async_trait]
impl ContainerChecker for CachingContainerChecker {
    async fn is_container_running(&self, container_id: &str) -> bool {
        if self.docker_usable().await {
            self.docker.is_container_running(container_id).await
        } else {
            self.apple.is_container_running(container_id).await
        }
    }
}

/// Callbacks invoked as a side effect of a sweep.
pub struct LivenessCallbacks {
    /// Invoked with `(token, run_id)` once per evicted run.
    pub on_cleanup: Option<Arc<dyn Fn(&str, &str) + Send + Sync>>,
    /// Invoked once whenever a sweep leaves the registry empty.
    pub on_empty: Option<Arc<dyn Fn() + Send + Sync>>,
}

impl std::fmt::Debug for LivenessCallbacks {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("LivenessCallbacks").finish_non_exhaustive()
    }
}

/// Periodically asks `checker` whether each bound run's container is still
/// running, evicting the ones that aren't.
pub struct LivenessChecker {
    registry: Arc<Registry>,
    checker: Arc<dyn ContainerChecker>,
    interval: Duration,
    callbacks: LivenessCallbacks,
}

impl std::fmt::Debug for LivenessChecker {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("LivenessChecker")
            .field("interval", &self.interval)
            .finish_non_exhaustive()
    }
}

impl LivenessChecker {
    /// Build a checker over `registry`, probing liveness via `checker` every
    /// `interval`.
    pub fn new(
        registry: Arc<Registry>,
        checker: Arc<dyn ContainerChecker>,
        interval: Duration,
        callbacks: LivenessCallbacks,
    ) -> Self {
        Self {
            registry,
            checker,
            interval,
            callbacks,
        }
    }

    /// Run one sweep: every run with a bound container ID is probed (runs
    /// still in phase 1, with an empty container ID, are skipped); dead
    /// containers are evicted, their refresh worker cancelled first.
    pub async fn check_once(&self) {
        let runs = self.registry.list().await;
        for summary in runs {
            if summary.container_id.is_empty() {
                continue;
            }
            let alive = tokio::time::timeout(
                PER_CHECK_TIMEOUT,
                self.checker.is_container_running(&summary.container_id),
            )
            .await
            .unwrap_or(false);

            if alive {
                continue;
            }

            self.evict_by_run_id(&summary.run_id).await;
        }
    }

    async fn evict_by_run_id(&self, run_id: &str) {
        // The registry is keyed by token, not run_id; find the matching
        // token under a single snapshot read before mutating.
        let Some((token, run)) = self.find_token_for_run(run_id).await else {
            return;
        };
        run.cancel_refresh().await;
        self.registry.unregister(&token).await;
        if let Some(on_cleanup) = &self.callbacks.on_cleanup {
            on_cleanup(&token, run_id);
        }
        if self.registry.is_empty().await {
            if let Some(on_empty) = &self.callbacks.on_empty {
                on_empty();
            }
        }
    }

    async fn find_token_for_run(&self, run_id: &str) -> Option<(String, Arc<super::run::RunContext>)> {
        // Registry doesn't expose raw tokens via `list()`; reconstruct by
        // re-scanning is unnecessary here because liveness eviction always
        // operates against the live registry, so we ask it directly.
        self.registry.find_by_run_id(run_id).await
    }

    /// Run sweeps at the configured interval until `cancel` fires.
    pub async fn run(&self, cancel: CancellationToken) {
        let mut ticker = tokio::time::interval(self.interval);
        loop {
            tokio::select! {
                () = cancel.cancelled() => break,
                _ = ticker.tick() => {
                    self.check_once().await;
                }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use std::sync::Mutex;

    use super::*;

    struct StaticChecker {
        alive: std::collections::HashMap<String, bool>,
    }

    #[async_trait]
    impl ContainerChecker for StaticChecker {
        async fn is_container_running(&self, container_id: &str) -> bool {
            self.alive.get(container_id).copied().unwrap_or(false)
        }
    }

    #[tokio::test]
    async fn check_once_evicts_dead_containers_only() {
        let registry = Arc::new(Registry::new());
        let (token_alive, run_alive) = registry.register("run-alive".to_owned()).await;
        run_alive.set_container_id("alive".to_owned()).await;
        let (_token_dead, run_dead) = registry.register("run-dead".to_owned()).await;
        run_dead.set_container_id("dead".to_owned()).await;

        let cleanups = Arc::new(Mutex::new(Vec::new()));
        let cleanups_clone = Arc::clone(&cleanups);

        let checker: Arc<dyn ContainerChecker> = Arc::new(StaticChecker {
            alive: [("alive".to_owned(), true), ("dead".to_owned(), false)].into(),
        });
        let liveness = LivenessChecker::new(
            Arc::clone(&registry),
            checker,
            Duration::from_secs(30),
            LivenessCallbacks {
                on_cleanup: Some(Arc::new(move |token, run_id| {
                    cleanups_clone.lock().expect("lock").push((token.to_owned(), run_id.to_owned()));
                })),
                on_empty: None,
            },
        );

        liveness.check_once().await;

        assert_eq!(registry.count().await, 1);
        assert!(registry.lookup(&token_alive).await.is_some());
        let recorded = cleanups.lock().expect("lock");
        assert_eq!(recorded.len(), 1);
        assert_eq!(recorded[0].1, "run-dead");
    }

    #[tokio::test]
    async fn check_once_skips_unbound_runs() {
        let registry = Arc::new(Registry::new());
        registry.register("run-unbound".to_owned()).await;

        let checker: Arc<dyn ContainerChecker> = Arc::new(StaticChecker {
            alive: std::collections::HashMap::new(),
        });
        let liveness = LivenessChecker::new(
            Arc::clone(&registry),
            checker,
            Duration::from_secs(30),
            LivenessCallbacks { on_cleanup: None, on_empty: None },
        );

        liveness.check_once().await;
        assert_eq!(registry.count().await, 1);
    }

    #[tokio::test]
    async fn on_empty_fires_once_after_last_eviction() {
        let registry = Arc::new(Registry::new());
        let (_token, run) = registry.register("run-dead".to_owned()).await;
        run.set_container_id("dead".to_owned()).await;

        let empty_calls = Arc::new(std::sync::atomic::AtomicU64::new(0));
        let empty_calls_clone = Arc::clone(&empty_calls);

        let checker: Arc<dyn ContainerChecker> = Arc::new(StaticChecker {
            alive: [("dead".to_owned(), false)].into(),
        });
        let liveness = LivenessChecker::new(
            registry,
            checker,
            Duration::from_secs(30),
            LivenessCallbacks {
                on_cleanup: None,
                on_empty: Some(Arc::new(move || {
                    empty_calls_clone.fetch_add(1, Ordering::SeqCst);
                })),
            },
        );

        liveness.check_once().await;
        assert_eq!(empty_calls.load(Ordering::SeqCst), 1);
    }
}

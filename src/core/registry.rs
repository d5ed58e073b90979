//! Token-keyed map of active runs.

use std::collections::HashMap;
use std::sync::Arc;

use rand::RngCore;
use rand::rngs::OsRng;
use tokio::sync::RwLock;

use super::run::RunContext;

/// A snapshot entry returned by [`Registry::list`].
#[derive(Debug, Clone)]
pub struct RunSummary {
    /// Caller-chosen run identifier.
    pub run_id: String,
    /// Bound container ID, empty before phase 2.
    pub container_id: String,
    /// When the run was registered.
    pub registered_at: chrono::DateTime<chrono::Utc>,
}

/// Token → [`RunContext`] map, safe for concurrent registration, lookup, and
/// removal from many tasks at once.
pub struct Registry {
    state: RwLock<HashMap<String, Arc<RunContext>>>,
}

impl std::fmt::Debug for Registry {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Registry").finish_non_exhaustive()
    }
}

impl Default for Registry {
    fn default() -> Self {
        Self::new()
    }
}

impl Registry {
    /// An empty registry.
    #[must_use]
    pub fn new() -> Self {
        Self {
            state: RwLock::new(HashMap::new()),
        }
    }

    /// Generate a fresh 64-char lowercase-hex bearer token and construct a
    /// [`RunContext`] for it, without publishing the run into the registry
    /// yet.
    ///
    /// Split from publishing so a caller can attach state to the run (e.g. a
    /// refresh-cancel handle) before it becomes visible to a concurrent
    /// lookup or unregister. Call [`Registry::publish`] once that state is
    /// attached.
    ///
    /// RNG failure is treated as unrecoverable and aborts the process rather
    /// than returning a (silently weaker) token.
    #[must_use]
    pub fn build(&self, run_id: String) -> (String, Arc<RunContext>) {
        let token = generate_token();
        let run = Arc::new(RunContext::new(run_id, token.clone()));
        (token, run)
    }

    /// Insert a previously built run into the map, making it visible to
    /// `lookup`, `list`, `unregister`, and every other accessor.
    pub async fn publish(&self, token: String, run: Arc<RunContext>) {
        self.state.write().await.insert(token, run);
    }

    /// Build and immediately publish a fresh run. Convenience for callers
    /// with no state to attach before the run becomes visible.
    pub async fn register(&self, run_id: String) -> (String, Arc<RunContext>) {
        let (token, run) = self.build(run_id);
        self.publish(token.clone(), Arc::clone(&run)).await;
        (token, run)
    }

    /// Look up a run by token.
    pub async fn lookup(&self, token: &str) -> Option<Arc<RunContext>> {
        self.state.read().await.get(token).cloned()
    }

    /// Remove a run by token. Idempotent: removing an absent token is not an
    /// error, and returns `None`.
    pub async fn unregister(&self, token: &str) -> Option<Arc<RunContext>> {
        self.state.write().await.remove(token)
    }

    /// Bind a container ID to an existing run. Returns `false` if the token
    /// is absent.
    pub async fn update_container_id(&self, token: &str, container_id: String) -> bool {
        let Some(run) = self.state.read().await.get(token).cloned() else {
            return false;
        };
        run.set_container_id(container_id).await;
        true
    }

    /// Find the `(token, run)` pair for a given `run_id`. Used by the
    /// liveness sweep, which discovers dead runs by run-id (the container
    /// checker's domain) but must evict by token (the registry's key).
    pub async fn find_by_run_id(&self, run_id: &str) -> Option<(String, Arc<RunContext>)> {
        let state = self.state.read().await;
        state
            .iter()
            .find(|(_, run)| run.run_id == run_id)
            .map(|(token, run)| (token.clone(), Arc::clone(run)))
    }

    /// Snapshot of every registered run, in unspecified order.
    pub async fn list(&self) -> Vec<RunSummary> {
        let state = self.state.read().await;
        let mut summaries = Vec::with_capacity(state.len());
        for run in state.values() {
            summaries.push(RunSummary {
                run_id: run.run_id.clone(),
                container_id: run.container_id().await,
                registered_at: run.registered_at,
            });
        }
        summaries
    }

    /// Number of registered runs.
    pub async fn count(&self) -> usize {
        self.state.read().await.len()
    }

    /// True iff no runs are registered.
    pub async fn is_empty(&self) -> bool {
        self.state.read().await.is_empty()
    }
}

fn generate_token() -> String {
    let mut bytes = [0u8; 32];
    OsRng.fill_bytes(&mut bytes);
    hex::encode(bytes)
}

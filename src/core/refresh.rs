//! Per-run background refresh loop.
//!
//! The worker holds only a [`CancellationToken`] and a token string, never a
//! reference back to the owning [`RunContext`] — lookups go back through the
//! registry by token on every pass. That is what keeps a `RunContext` holding
//! a cancel handle to a task from creating a reference cycle back to itself.

use std::sync::Arc;
use std::time::Duration;

use tokio_util::sync::CancellationToken;

use super::providers::{Grant, ProviderRegistry};
use super::registry::Registry;

/// A single stored grant value, fetched from the credential store.
#[async_trait::async_trait]
pub trait CredentialStore: Send + Sync {
    /// Fetch the currently stored value for `grant_name`, if any.
    async fn get(&self, grant_name: &str) -> Option<String>;
}

const REFRESH_PASS_TIMEOUT: Duration = Duration::from_secs(30);

/// Filters `grants` down to the ones with a refreshable provider. Returns
/// `None` if the result is empty: a run with no refreshable grants needs no
/// background worker or cancel handle at all.
///
/// Split from spawning the worker so a caller can install the resulting
/// cancel handle on the run *before* publishing it in the registry — see
/// [`spawn_worker`].
#[must_use]
pub fn refreshable_grants(grants: Vec<String>, providers: &ProviderRegistry) -> Option<Vec<String>> {
    let refreshable: Vec<String> = grants.into_iter().filter(|grant| providers.resolve_refreshable(grant).is_some()).collect();
    if refreshable.is_empty() { None } else { Some(refreshable) }
}

/// Spawns a dedicated background task performing one immediate refresh pass
/// followed by periodic passes at `interval`, for every grant in
/// `grants` (already filtered by [`refreshable_grants`]).
///
/// `cancel` must already be reachable from the run via
/// `RunContext::set_refresh_cancel` before this is called, and the run must
/// already be published in `registry` so the first pass can find it.
pub fn spawn_worker(
    token: String,
    grants: Vec<String>,
    cancel: CancellationToken,
    registry: Arc<Registry>,
    providers: Arc<ProviderRegistry>,
    store: Arc<dyn CredentialStore>,
    interval: Duration,
) {
    tokio::spawn(async move {
        run_worker(token, grants, registry, providers, store, interval, cancel).await;
    });
}

async fn run_worker(
    token: String,
    grants: Vec<String>,
    registry: Arc<Registry>,
    providers: Arc<ProviderRegistry>,
    store: Arc<dyn CredentialStore>,
    interval: Duration,
    cancel: CancellationToken,
) {
    loop {
        refresh_pass(&token, &grants, &registry, &providers, store.as_ref()).await;

        tokio::select! {
            () = cancel.cancelled() => break,
            () = tokio::time::sleep(interval) => {}
        }
    }
}

async fn refresh_pass(
    token: &str,
    grants: &[String],
    registry: &Registry,
    providers: &ProviderRegistry,
    store: &dyn CredentialStore,
) {
    let Some(run) = registry.lookup(token).await else {
        return;
    };

    for grant_name in grants {
        let Some(provider) = providers.resolve_refreshable(grant_name) else {
            continue;
        };
        let Some(value) = store.get(grant_name).await else {
            continue;
        };
        let grant = Grant { name: grant_name.clone(), value };

        let result = tokio::time::timeout(REFRESH_PASS_TIMEOUT, provider.refresh(run.as_ref(), &grant)).await;
        match result {
            Ok(Ok(())) => {}
            Ok(Err(err)) => {
                tracing::debug!(run_id = %run.run_id, grant = %grant_name, error = %err, "refresh pass failed");
            }
            Err(_) => {
                tracing::debug!(run_id = %run.run_id, grant = %grant_name, "refresh pass timed out");
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use std::collections::HashMap;
    use std::sync::atomic::{AtomicU64, Ordering};

    use super::*;

    struct StaticStore(HashMap<String, String>);

    #[async_trait::async_trait]
    impl CredentialStore for StaticStore {
        async fn get(&self, grant_name: &str) -> Option<String> {
            self.0.get(grant_name).cloned()
        }
    }

    #[tokio::test]
    async fn no_refreshable_grants_when_none_resolve() {
        let providers = ProviderRegistry::built_in();
        let result = refreshable_grants(vec!["anthropic-api-key".to_owned()], &providers);
        assert!(result.is_none());
    }

    #[tokio::test]
    async fn unknown_and_ssh_grants_are_skipped() {
        let providers = ProviderRegistry::built_in();
        let result = refreshable_grants(vec!["ssh".to_owned(), "not-a-provider".to_owned()], &providers);
        assert!(result.is_none());
    }

    #[tokio::test(start_paused = true)]
    async fn worker_performs_an_immediate_pass_then_cancels_cleanly() {
        let registry = Arc::new(Registry::new());
        let providers = Arc::new(ProviderRegistry::built_in());
        let mut values = HashMap::new();
        values.insert("github".to_owned(), "ghp_xxx".to_owned());
        let store: Arc<dyn CredentialStore> = Arc::new(StaticStore(values));

        let (token, run) = registry.register("run-abc".to_owned()).await;
        let grants = refreshable_grants(vec!["github".to_owned()], &providers).expect("github is refreshable");
        let cancel = CancellationToken::new();
        run.set_refresh_cancel(cancel.clone()).await;
        spawn_worker(token.clone(), grants, cancel.clone(), Arc::clone(&registry), providers, store, Duration::from_secs(300));

        tokio::task::yield_now().await;
        tokio::task::yield_now().await;

        assert!(run.get_credential("api.github.com").await.is_some());

        run.cancel_refresh().await;
        assert!(cancel.is_cancelled());
    }

    #[tokio::test]
    async fn refresh_pass_against_removed_token_is_a_no_op() {
        let registry = Arc::new(Registry::new());
        let providers = Arc::new(ProviderRegistry::built_in());
        let store: Arc<dyn CredentialStore> = Arc::new(StaticStore(HashMap::new()));
        let calls = AtomicU64::new(0);
        calls.fetch_add(0, Ordering::SeqCst);

        refresh_pass("nonexistent-token", &["github".to_owned()], &registry, &providers, store.as_ref()).await;
        // no panic => pass
    }
}

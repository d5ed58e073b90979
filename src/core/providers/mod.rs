//! Credential providers: a closed polymorphism over a small capability set.
//! The core never knows about a concrete provider beyond this trait object.

mod anthropic_api_key;
mod aws;
mod claude_oauth;
mod github;

pub use anthropic_api_key::AnthropicApiKeyProvider;
pub use aws::AwsProvider;
pub use claude_oauth::ClaudeOAuthProvider;
pub use github::GitHubProvider;

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;

use crate::core::run::ProxyConfigurer;

/// A grant the daemon should never resolve to a provider: the container's
/// own SSH agent forwarding, handled entirely outside this crate.
pub const UNMANAGED_SSH_GRANT: &str = "ssh";

/// One stored credential grant, as read from the credential store.
#[derive(Debug, Clone)]
pub struct Grant {
    /// Grant name, e.g. `github`.
    pub name: String,
    /// The secret value as currently stored.
    pub value: String,
}

/// Capability set every provider implements: `{Name, ConfigureProxy,
/// ContainerEnv, ContainerMounts, Cleanup, ImpliedDependencies}`.
#[async_trait]
pub trait Provider: Send + Sync {
    /// Stable provider name, matched against `RegisterRequest.grants`.
    fn name(&self) -> &'static str;

    /// Apply this grant's injection rules to a run via its `ProxyConfigurer`.
    async fn configure_proxy(&self, configurer: &dyn ProxyConfigurer, grant: &Grant);

    /// Environment variables this provider wants set inside the container.
    fn container_env(&self) -> HashMap<String, String> {
        HashMap::new()
    }

    /// Host-path mounts this provider wants bind-mounted into the container.
    fn container_mounts(&self) -> Vec<(String, String)> {
        Vec::new()
    }

    /// Release any provider-held resources for a run that is ending.
    async fn cleanup(&self, _grant: &Grant) {}

    /// Other grant names this provider requires to function (e.g. AWS may
    /// imply a base identity grant). Empty for most providers.
    fn implied_dependencies(&self) -> &[&'static str] {
        &[]
    }
}

/// Optional refinement: a provider whose grant can be refreshed in place.
#[async_trait]
pub trait RefreshableProvider: Provider {
    /// Fetch a fresh credential value and re-apply it via `configure_proxy`.
    async fn refresh(&self, configurer: &dyn ProxyConfigurer, grant: &Grant) -> anyhow::Result<()>;

    /// How often this provider's grant should be refreshed.
    fn refresh_interval(&self) -> Duration {
        Duration::from_secs(5 * 60)
    }
}

/// Resolves grant names to provider implementations. Built with the four
/// providers named in spec.md §9; unknown names resolve to `None`.
pub struct ProviderRegistry {
    providers: HashMap<&'static str, Arc<dyn Provider>>,
    refreshable: HashMap<&'static str, Arc<dyn RefreshableProvider>>,
}

impl std::fmt::Debug for ProviderRegistry {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ProviderRegistry")
            .field("providers", &self.providers.keys().collect::<Vec<_>>())
            .finish()
    }
}

impl ProviderRegistry {
    /// The registry of built-in providers: github, claude-oauth,
    /// anthropic-api-key, aws.
    #[must_use]
    pub fn built_in() -> Self {
        let mut registry = Self {
            providers: HashMap::new(),
            refreshable: HashMap::new(),
        };
        registry.register_refreshable(Arc::new(GitHubProvider));
        registry.register_refreshable(Arc::new(ClaudeOAuthProvider));
        registry.register(Arc::new(AnthropicApiKeyProvider));
        registry.register_refreshable(Arc::new(AwsProvider));
        registry
    }

    fn register(&mut self, provider: Arc<dyn Provider>) {
        self.providers.insert(provider.name(), provider);
    }

    fn register_refreshable<P>(&mut self, provider: Arc<P>)
    where
        P: RefreshableProvider + 'static,
    {
        self.providers.insert(provider.name(), Arc::clone(&provider) as Arc<dyn Provider>);
        self.refreshable.insert(provider.name(), provider);
    }

    /// Resolve a grant name to its provider, skipping the unmanaged `ssh`
    /// grant and unknown names.
    #[must_use]
    pub fn resolve(&self, grant_name: &str) -> Option<Arc<dyn Provider>> {
        if grant_name == UNMANAGED_SSH_GRANT {
            return None;
        }
        self.providers.get(grant_name).cloned()
    }

    /// Resolve a grant name to its refreshable provider, if it has one.
    #[must_use]
    pub fn resolve_refreshable(&self, grant_name: &str) -> Option<Arc<dyn RefreshableProvider>> {
        if grant_name == UNMANAGED_SSH_GRANT {
            return None;
        }
        self.refreshable.get(grant_name).cloned()
    }
}

//! GitHub grant: a personal-access or installation token injected as a
//! bearer `Authorization` header against `api.github.com`.

use async_trait::async_trait;

use crate::core::run::ProxyConfigurer;

use super::{Grant, Provider, RefreshableProvider};

const GITHUB_HOST: &str = "api.github.com";

/// Injects a GitHub token for the GitHub API host.
#[derive(Debug, Default)]
pub struct GitHubProvider;

#[async_trait]
impl Provider for GitHubProvider {
    fn name(&self) -> &'static str {
        "github"
    }

    async fn configure_proxy(&self, configurer: &dyn ProxyConfigurer, grant: &Grant) {
        configurer
            .set_credential_with_grant(GITHUB_HOST, "Authorization", &format!("Bearer {}", grant.value), Some(self.name()))
            .await;
    }
}

#[async_trait]
impl RefreshableProvider for GitHubProvider {
    async fn refresh(&self, configurer: &dyn ProxyConfigurer, grant: &Grant) -> anyhow::Result<()> {
        // GitHub installation tokens are refreshed by the credential store;
        // re-applying the (possibly updated) stored value is sufficient here.
        self.configure_proxy(configurer, grant).await;
        Ok(())
    }
}

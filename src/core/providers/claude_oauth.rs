//! Claude Code's OAuth grant: a bearer token against `api.anthropic.com`,
//! refreshed via the stored OAuth refresh token.

use async_trait::async_trait;

use crate::core::run::ProxyConfigurer;

use super::{Grant, Provider, RefreshableProvider};

const ANTHROPIC_HOST: &str = "api.anthropic.com";

/// Injects a Claude Code OAuth access token.
#[derive(Debug, Default)]
pub struct ClaudeOAuthProvider;

#[async_trait]
impl Provider for ClaudeOAuthProvider {
    fn name(&self) -> &'static str {
        "claude-oauth"
    }

    async fn configure_proxy(&self, configurer: &dyn ProxyConfigurer, grant: &Grant) {
        configurer
            .set_credential_with_grant(ANTHROPIC_HOST, "Authorization", &format!("Bearer {}", grant.value), Some(self.name()))
            .await;
    }
}

#[async_trait]
impl RefreshableProvider for ClaudeOAuthProvider {
    async fn refresh(&self, configurer: &dyn ProxyConfigurer, grant: &Grant) -> anyhow::Result<()> {
        self.configure_proxy(configurer, grant).await;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use std::sync::Arc;

    use crate::core::run::RunContext;

    use super::*;

    #[tokio::test]
    async fn configure_proxy_targets_anthropic_host() {
        let rc: Arc<RunContext> = Arc::new(RunContext::new("run-abc".to_owned(), "a".repeat(64)));
        let grant = Grant { name: "claude-oauth".to_owned(), value: "sk-ant-oat-xxx".to_owned() };
        ClaudeOAuthProvider.configure_proxy(rc.as_ref(), &grant).await;
        assert!(rc.get_credential(ANTHROPIC_HOST).await.is_some());
        assert!(rc.get_credential("unrelated.example.com").await.is_none());
    }
}

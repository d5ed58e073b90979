//! A static Anthropic API key grant. Not refreshable: the key is a
//! long-lived credential issued directly, with no refresh flow.

use async_trait::async_trait;

use crate::core::run::ProxyConfigurer;

use super::{Grant, Provider};

const ANTHROPIC_HOST: &str = "api.anthropic.com";

/// Injects a static Anthropic API key via the `x-api-key` header.
#[derive(Debug, Default)]
pub struct AnthropicApiKeyProvider;

#[async_trait]
impl Provider for AnthropicApiKeyProvider {
    fn name(&self) -> &'static str {
        "anthropic-api-key"
    }

    async fn configure_proxy(&self, configurer: &dyn ProxyConfigurer, grant: &Grant) {
        configurer
            .set_credential_with_grant(ANTHROPIC_HOST, "x-api-key", &grant.value, Some(self.name()))
            .await;
    }
}

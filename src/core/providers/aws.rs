//! AWS grant: short-lived STS credentials presented as a signed-request
//! token substitution rather than a static header.

use async_trait::async_trait;

use crate::core::run::ProxyConfigurer;

use super::{Grant, Provider, RefreshableProvider};

const STS_HOST: &str = "sts.amazonaws.com";
const PLACEHOLDER: &str = "AWS_SESSION_TOKEN";

/// Injects an assumed-role session credential for AWS API calls.
///
/// The grant's value is already an assumed-role session token by the time it
/// reaches this provider; the `sts:AssumeRole` call (and any role selection)
/// happens upstream, in the credential store this provider is handed a
/// [`Grant`] from, not in this type.
#[derive(Debug, Default)]
pub struct AwsProvider;

#[async_trait]
impl Provider for AwsProvider {
    fn name(&self) -> &'static str {
        "aws"
    }

    async fn configure_proxy(&self, configurer: &dyn ProxyConfigurer, grant: &Grant) {
        configurer.set_token_substitution(STS_HOST, PLACEHOLDER, &grant.value).await;
    }

    fn implied_dependencies(&self) -> &[&'static str] {
        &[]
    }
}

#[async_trait]
impl RefreshableProvider for AwsProvider {
    async fn refresh(&self, configurer: &dyn ProxyConfigurer, grant: &Grant) -> anyhow::Result<()> {
        self.configure_proxy(configurer, grant).await;
        Ok(())
    }

    fn refresh_interval(&self) -> std::time::Duration {
        // STS session tokens typically outlive the default 5-minute refresh
        // tick, but re-checking at the same cadence as other providers keeps
        // the worker loop uniform.
        std::time::Duration::from_secs(5 * 60)
    }
}

#[cfg(test)]
mod tests {
    use std::sync::Arc;

    use crate::core::run::RunContext;

    use super::*;

    #[tokio::test]
    async fn configure_proxy_sets_token_substitution() {
        let rc: Arc<RunContext> = Arc::new(RunContext::new("run-abc".to_owned(), "a".repeat(64)));
        let grant = Grant { name: "aws".to_owned(), value: "session-token-value".to_owned() };
        AwsProvider.configure_proxy(rc.as_ref(), &grant).await;
        let (placeholder, real) = rc.get_token_substitution(STS_HOST).await.expect("present");
        assert_eq!(placeholder, PLACEHOLDER);
        assert_eq!(real, "session-token-value");
    }
}

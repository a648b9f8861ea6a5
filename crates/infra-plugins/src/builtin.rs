//! Built-in integration catalogue

use infra_state::IntegrationFactory;
use std::sync::Arc;

use crate::integrations::{cloudflare, github, CloudflareFactory, GithubFactory};
use crate::registry::IntegrationRegistry;

/// Factories for every integration shipped with the engine
pub fn builtin_factories() -> Vec<Arc<dyn IntegrationFactory>> {
    vec![
        Arc::new(CloudflareFactory) as Arc<dyn IntegrationFactory>,
        Arc::new(GithubFactory),
    ]
}

/// Identifiers of the built-in integrations
pub fn available_integrations() -> Vec<&'static str> {
    vec![cloudflare::IDENTIFIER, github::IDENTIFIER]
}

/// Register every built-in factory with `registry`
pub async fn register_builtin(registry: &IntegrationRegistry) {
    for factory in builtin_factories() {
        registry.register(factory).await;
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_register_builtin() {
        let registry = IntegrationRegistry::new();
        register_builtin(&registry).await;

        let infos = registry.get_registered_integrations().await;
        let ids: Vec<_> = infos.iter().map(|i| i.identifier.as_str()).collect();
        assert_eq!(ids, available_integrations());
        assert!(infos.iter().all(|i| !i.is_active));
        assert!(infos.iter().all(|i| !i.required_permissions.is_empty()));
    }
}

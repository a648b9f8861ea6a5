//! Reference integrations
//!
//! Resource ids carry a kind prefix (`pages:blog`, `env:site/production`) so
//! ids stay unique across the kinds a single backend manages. The part after
//! the prefix is the name the backend addresses the resource by.

pub mod cloudflare;
pub mod github;

use infra_core::{Action, IntegrationError, ResourceType, Result};

pub use cloudflare::{CloudflareFactory, CloudflareIntegration};
pub use github::{GithubFactory, GithubIntegration};

/// Id prefix used for a resource kind
pub fn id_prefix(kind: ResourceType) -> &'static str {
    match kind {
        ResourceType::CloudflarePagesProject => "pages",
        ResourceType::CloudflareWorker => "worker",
        ResourceType::CloudflareZone => "zone",
        ResourceType::GithubRepository => "repo",
        ResourceType::GithubEnvironment => "env",
    }
}

/// Resource id for a backend-side name
pub fn resource_id(kind: ResourceType, name: &str) -> String {
    format!("{}:{}", id_prefix(kind), name)
}

/// Backend-side name addressed by an action
pub(crate) fn local_name(action: &Action) -> Result<&str> {
    action
        .resource_id
        .strip_prefix(id_prefix(action.resource_type))
        .and_then(|rest| rest.strip_prefix(':'))
        .filter(|name| !name.is_empty())
        .ok_or_else(|| {
            IntegrationError::ValidationFailed(format!(
                "resource id '{}' must look like '{}:<name>'",
                action.resource_id,
                id_prefix(action.resource_type)
            ))
        })
}

pub(crate) fn unsupported_action(action: &Action) -> IntegrationError {
    IntegrationError::ActionNotSupported(format!(
        "{} on {} '{}'",
        action.action_type, action.resource_type, action.resource_id
    ))
}

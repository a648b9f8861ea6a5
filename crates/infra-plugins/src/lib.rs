//! infra-plugins: Integration registry and reference integrations
//!
//! Features:
//! - Registry with register/activate/deactivate lifecycle and event hooks
//! - Concurrent, panic-isolated health checks across active integrations
//! - Cloudflare (Pages, Workers, zones) and GitHub (repositories, environments)
//!   integrations built on the shared HTTP transport

pub mod builtin;
pub mod integrations;
pub mod registry;

pub use builtin::{available_integrations, builtin_factories, register_builtin};
pub use integrations::{CloudflareFactory, CloudflareIntegration, GithubFactory, GithubIntegration};
pub use registry::{HookHandler, IntegrationRegistry, RegistryEvent, DEFAULT_HEALTH_TIMEOUT};

/// Prelude for convenient imports
pub mod prelude {
    pub use super::registry::{IntegrationRegistry, RegistryEvent};
    pub use infra_state::prelude::*;
}

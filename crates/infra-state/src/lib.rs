//! infra-state: Integration contract and reconciliation
//!
//! Provides:
//! - `Integration` trait every backend implements
//! - `IntegrationFactory` used by the registry to construct backends
//! - Diff strategies and the sequential apply executor

pub mod integration;
pub mod reconcile;

pub use integration::{measure_health, Integration, IntegrationCapabilities, IntegrationFactory};
pub use reconcile::{apply_sequential, diff_by_id, diff_with_updates, plan_with_strategy, DiffStrategy};

/// Prelude for convenient imports
pub mod prelude {
    pub use super::integration::{Integration, IntegrationCapabilities, IntegrationFactory};
    pub use super::reconcile::DiffStrategy;
    pub use infra_core::{
        Action, ApplyResult, HealthStatus, IntegrationConfiguration, IntegrationDescriptor,
        IntegrationError, Resource, ResourceType, Result,
    };
}

//! Integration contract implemented by every backend

use async_trait::async_trait;
use infra_core::{
    Action, ApplyResult, HealthStatus, IntegrationConfiguration, IntegrationDescriptor,
    IntegrationError, Resource, ResourceType, Result,
};
use serde::{Deserialize, Serialize};
use std::future::Future;
use std::sync::Arc;
use std::time::Instant;

use crate::reconcile;

/// What an integration can do beyond create/delete
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct IntegrationCapabilities {
    pub supports_rollback: bool,
    /// Whether in-place updates are executed, required for field-level planning
    pub supports_updates: bool,
    pub managed_types: Vec<ResourceType>,
}

/// A backend that can report, plan and mutate its resources
#[async_trait]
pub trait Integration: Send + Sync {
    /// Static identity of this integration
    fn descriptor(&self) -> &IntegrationDescriptor;

    fn identifier(&self) -> &str {
        &self.descriptor().identifier
    }

    /// Every resource the backend currently holds, across all managed kinds
    async fn get_actual_state(&self) -> Result<Vec<Resource>>;

    /// Actions that converge actual state toward `desired`
    async fn plan(&self, desired: &[Resource]) -> Result<Vec<Action>> {
        let actual = self.get_actual_state().await?;
        Ok(reconcile::diff_by_id(&actual, desired))
    }

    /// Execute a single action against the backend
    async fn execute(&self, action: &Action) -> Result<()>;

    /// Execute actions in order, recording each outcome
    async fn apply(&self, actions: Vec<Action>) -> ApplyResult {
        reconcile::apply_sequential(self, actions).await
    }

    async fn rollback(&self) -> Result<()> {
        Err(IntegrationError::unsupported(format!(
            "rollback is not supported by '{}'",
            self.identifier()
        )))
    }

    /// Liveness probe; failures are reported in the status, never returned
    async fn health_check(&self) -> HealthStatus;

    fn capabilities(&self) -> IntegrationCapabilities {
        IntegrationCapabilities::default()
    }
}

/// Constructs live integrations from configuration
#[async_trait]
pub trait IntegrationFactory: Send + Sync {
    fn descriptor(&self) -> IntegrationDescriptor;

    /// Validate the configuration, build the transport and verify identity
    async fn create(&self, configuration: IntegrationConfiguration) -> Result<Arc<dyn Integration>>;
}

/// Time a probe and fold its outcome into a [`HealthStatus`]
pub async fn measure_health<F, T>(probe: F) -> HealthStatus
where
    F: Future<Output = Result<T>>,
    T: std::fmt::Display,
{
    let started = Instant::now();
    match probe.await {
        Ok(details) => HealthStatus::healthy(started.elapsed(), details.to_string()),
        Err(e) => HealthStatus::unhealthy(started.elapsed(), e.to_string()),
    }
}

//! Integration registry with controlled activation lifecycle
//!
//! Each identifier moves through Unregistered → Registered → Active and back
//! to Registered on deactivation; the factory is kept until `unregister`.

use anyhow::Result as HookResult;
use infra_core::{
    EngineConfig, HealthStatus, IntegrationConfiguration, IntegrationError, IntegrationInfo,
    Result,
};
use infra_state::{Integration, IntegrationFactory};
use std::collections::HashMap;
use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio::sync::RwLock;
use tracing::{debug, info, warn};

/// Default bound on a single integration's health check
pub const DEFAULT_HEALTH_TIMEOUT: Duration = Duration::from_secs(10);

/// Registry lifecycle event
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RegistryEvent {
    Registered { identifier: String },
    Activated { identifier: String },
    Deactivated { identifier: String },
    Unregistered { identifier: String },
    ActivationFailed { identifier: String, error: String },
}

/// Hook handler type
pub type HookHandler = Arc<dyn Fn(&RegistryEvent) -> HookResult<()> + Send + Sync>;

/// Holds integration factories and their active instances
pub struct IntegrationRegistry {
    factories: Arc<RwLock<HashMap<String, Arc<dyn IntegrationFactory>>>>,
    active: Arc<RwLock<HashMap<String, Arc<dyn Integration>>>>,
    hooks: Arc<RwLock<Vec<HookHandler>>>,
    health_timeout: Duration,
}

impl IntegrationRegistry {
    pub fn new() -> Self {
        Self {
            factories: Arc::new(RwLock::new(HashMap::new())),
            active: Arc::new(RwLock::new(HashMap::new())),
            hooks: Arc::new(RwLock::new(Vec::new())),
            health_timeout: DEFAULT_HEALTH_TIMEOUT,
        }
    }

    /// Registry using the engine config's health timeout
    pub fn from_config(config: &EngineConfig) -> Self {
        Self::new().with_health_timeout(config.health_timeout)
    }

    /// Bound each health check by `timeout`
    pub fn with_health_timeout(mut self, timeout: Duration) -> Self {
        self.health_timeout = timeout;
        self
    }

    /// Register a hook for registry events
    pub async fn register_hook(&self, handler: HookHandler) {
        let mut hooks = self.hooks.write().await;
        hooks.push(handler);
    }

    /// Emit an event to all hooks
    async fn emit_event(&self, event: RegistryEvent) {
        let hooks = self.hooks.read().await;
        for hook in hooks.iter() {
            if let Err(e) = hook(&event) {
                warn!("Hook error on {:?}: {}", event, e);
            }
        }
    }

    /// Register a factory, replacing any factory with the same identifier
    pub async fn register(&self, factory: Arc<dyn IntegrationFactory>) {
        let identifier = factory.descriptor().identifier;
        {
            let mut factories = self.factories.write().await;
            if factories.insert(identifier.clone(), factory).is_some() {
                debug!("Replaced factory for '{}'", identifier);
            }
        }

        info!("Registered integration: {}", identifier);
        self.emit_event(RegistryEvent::Registered { identifier }).await;
    }

    /// Remove a factory and drop its active instance, if any
    pub async fn unregister(&self, identifier: &str) -> Result<()> {
        {
            let mut factories = self.factories.write().await;
            if factories.remove(identifier).is_none() {
                return Err(IntegrationError::IntegrationNotFound(identifier.to_string()));
            }
        }
        self.active.write().await.remove(identifier);

        info!("Unregistered integration: {}", identifier);
        self.emit_event(RegistryEvent::Unregistered {
            identifier: identifier.to_string(),
        })
        .await;
        Ok(())
    }

    /// Construct an integration and make it the active instance.
    ///
    /// The factory verifies identity before returning; a second activation
    /// replaces the previous instance.
    pub async fn activate(
        &self,
        identifier: &str,
        configuration: IntegrationConfiguration,
    ) -> Result<Arc<dyn Integration>> {
        let factory = {
            let factories = self.factories.read().await;
            factories
                .get(identifier)
                .cloned()
                .ok_or_else(|| IntegrationError::IntegrationNotFound(identifier.to_string()))?
        };

        // the factory call does network I/O, no lock is held across it
        let integration = match factory.create(configuration).await {
            Ok(integration) => integration,
            Err(e) => {
                warn!("Failed to activate '{}': {}", identifier, e);
                self.emit_event(RegistryEvent::ActivationFailed {
                    identifier: identifier.to_string(),
                    error: e.to_string(),
                })
                .await;
                return Err(e);
            }
        };

        {
            // factories before active, the same order unregister takes them
            let factories = self.factories.read().await;
            let still_registered = factories
                .get(identifier)
                .map_or(false, |current| Arc::ptr_eq(current, &factory));
            if !still_registered {
                warn!("'{}' was unregistered during activation", identifier);
                return Err(IntegrationError::IntegrationNotFound(identifier.to_string()));
            }

            let mut active = self.active.write().await;
            if active
                .insert(identifier.to_string(), Arc::clone(&integration))
                .is_some()
            {
                debug!("Replaced active instance of '{}'", identifier);
            }
        }

        info!("Activated integration: {}", identifier);
        self.emit_event(RegistryEvent::Activated {
            identifier: identifier.to_string(),
        })
        .await;
        Ok(integration)
    }

    /// Drop the active instance; a no-op when not active
    pub async fn deactivate(&self, identifier: &str) {
        let removed = self.active.write().await.remove(identifier);
        if removed.is_some() {
            info!("Deactivated integration: {}", identifier);
            self.emit_event(RegistryEvent::Deactivated {
                identifier: identifier.to_string(),
            })
            .await;
        }
    }

    /// The active instance for `identifier`
    pub async fn get(&self, identifier: &str) -> Option<Arc<dyn Integration>> {
        let active = self.active.read().await;
        active.get(identifier).cloned()
    }

    pub async fn is_active(&self, identifier: &str) -> bool {
        self.active.read().await.contains_key(identifier)
    }

    /// Every registered integration, sorted by identifier
    pub async fn get_registered_integrations(&self) -> Vec<IntegrationInfo> {
        let factories = self.factories.read().await;
        let active = self.active.read().await;

        let mut infos: Vec<IntegrationInfo> = factories
            .iter()
            .map(|(identifier, factory)| {
                IntegrationInfo::from_descriptor(&factory.descriptor(), active.contains_key(identifier))
            })
            .collect();
        infos.sort_by(|a, b| a.identifier.cmp(&b.identifier));
        infos
    }

    /// Check every active integration concurrently.
    ///
    /// A check that panics or outlives the health timeout is reported as
    /// unhealthy; one integration never affects another's result.
    pub async fn health_check_all(&self) -> HashMap<String, HealthStatus> {
        let snapshot: Vec<(String, Arc<dyn Integration>)> = {
            let active = self.active.read().await;
            active
                .iter()
                .map(|(id, integration)| (id.clone(), Arc::clone(integration)))
                .collect()
        };

        let timeout = self.health_timeout;
        let checks = snapshot.into_iter().map(|(identifier, integration)| {
            let started = Instant::now();
            let task = tokio::spawn(async move {
                tokio::time::timeout(timeout, integration.health_check()).await
            });
            async move {
                let status = match task.await {
                    Ok(Ok(status)) => status,
                    Ok(Err(_)) => HealthStatus::unhealthy(
                        started.elapsed(),
                        format!("Health check timed out after {:?}", timeout),
                    ),
                    Err(e) if e.is_panic() => {
                        HealthStatus::unhealthy(started.elapsed(), "Health check panicked")
                    }
                    Err(e) => HealthStatus::unhealthy(
                        started.elapsed(),
                        format!("Health check aborted: {}", e),
                    ),
                };
                if !status.is_healthy {
                    warn!("Integration '{}' unhealthy: {}", identifier, status.details);
                }
                (identifier, status)
            }
        });

        futures::future::join_all(checks).await.into_iter().collect()
    }

    /// Number of registered factories
    pub async fn count(&self) -> usize {
        self.factories.read().await.len()
    }
}

impl Default for IntegrationRegistry {
    fn default() -> Self {
        Self::new()
    }
}

impl Clone for IntegrationRegistry {
    fn clone(&self) -> Self {
        Self {
            factories: Arc::clone(&self.factories),
            active: Arc::clone(&self.active),
            hooks: Arc::clone(&self.hooks),
            health_timeout: self.health_timeout,
        }
    }
}

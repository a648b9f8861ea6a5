//! Resource/action vocabulary shared by every integration

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::time::Duration;
use uuid::Uuid;

use crate::error::IntegrationError;
use crate::value::{ConfigValue, Configuration};

/// Lifecycle status as reported by the backend
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, Default)]
#[serde(rename_all = "lowercase")]
pub enum ResourceStatus {
    Creating,
    Active,
    Updating,
    Deleting,
    Deleted,
    Failed,
    Suspended,
    #[default]
    Unknown,
}

impl ResourceStatus {
    pub fn is_healthy(&self) -> bool {
        matches!(self, ResourceStatus::Active)
    }

    pub fn is_transitional(&self) -> bool {
        matches!(
            self,
            ResourceStatus::Creating | ResourceStatus::Updating | ResourceStatus::Deleting
        )
    }
}

impl std::fmt::Display for ResourceStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let s = match self {
            ResourceStatus::Creating => "creating",
            ResourceStatus::Active => "active",
            ResourceStatus::Updating => "updating",
            ResourceStatus::Deleting => "deleting",
            ResourceStatus::Deleted => "deleted",
            ResourceStatus::Failed => "failed",
            ResourceStatus::Suspended => "suspended",
            ResourceStatus::Unknown => "unknown",
        };
        write!(f, "{}", s)
    }
}

/// Concrete resource kind. The kind implies its owning integration.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ResourceType {
    CloudflarePagesProject,
    CloudflareWorker,
    CloudflareZone,
    GithubRepository,
    GithubEnvironment,
}

impl ResourceType {
    /// Identifier of the integration that manages this kind
    pub fn integration(&self) -> &'static str {
        match self {
            ResourceType::CloudflarePagesProject
            | ResourceType::CloudflareWorker
            | ResourceType::CloudflareZone => "cloudflare",
            ResourceType::GithubRepository | ResourceType::GithubEnvironment => "github",
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            ResourceType::CloudflarePagesProject => "cloudflare_pages_project",
            ResourceType::CloudflareWorker => "cloudflare_worker",
            ResourceType::CloudflareZone => "cloudflare_zone",
            ResourceType::GithubRepository => "github_repository",
            ResourceType::GithubEnvironment => "github_environment",
        }
    }
}

impl std::fmt::Display for ResourceType {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

/// Optional ownership and classification data attached to a resource
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ResourceMetadata {
    #[serde(default)]
    pub tags: Vec<String>,
    #[serde(default)]
    pub labels: BTreeMap<String, String>,
    #[serde(default)]
    pub annotations: BTreeMap<String, String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub owner: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub team: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub environment: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub cost_center: Option<String>,
}

/// One manageable unit of infrastructure
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Resource {
    /// Unique within its type and backend
    pub id: String,
    pub resource_type: ResourceType,
    pub name: String,
    #[serde(default)]
    pub status: ResourceStatus,
    #[serde(default)]
    pub configuration: Configuration,
    #[serde(default)]
    pub metadata: ResourceMetadata,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub created_at: Option<DateTime<Utc>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub updated_at: Option<DateTime<Utc>>,
}

impl Resource {
    pub fn new(id: impl Into<String>, resource_type: ResourceType, name: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            resource_type,
            name: name.into(),
            status: ResourceStatus::Unknown,
            configuration: Configuration::new(),
            metadata: ResourceMetadata::default(),
            created_at: None,
            updated_at: None,
        }
    }

    pub fn with_status(mut self, status: ResourceStatus) -> Self {
        self.status = status;
        self
    }

    pub fn with_configuration(mut self, configuration: Configuration) -> Self {
        self.configuration = configuration;
        self
    }

    /// Set a single configuration entry
    pub fn with_config(mut self, key: impl Into<String>, value: impl Into<ConfigValue>) -> Self {
        self.configuration.insert(key.into(), value.into());
        self
    }

    pub fn with_metadata(mut self, metadata: ResourceMetadata) -> Self {
        self.metadata = metadata;
        self
    }

    pub fn with_timestamps(
        mut self,
        created_at: Option<DateTime<Utc>>,
        updated_at: Option<DateTime<Utc>>,
    ) -> Self {
        self.created_at = created_at;
        self.updated_at = updated_at;
        self
    }

    pub fn is_healthy(&self) -> bool {
        self.status.is_healthy()
    }

    pub fn is_transitional(&self) -> bool {
        self.status.is_transitional()
    }
}

/// Kind of mutation an action performs
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ActionType {
    Create,
    Update,
    Delete,
    Deploy,
    Rollback,
    Start,
    Stop,
    Restart,
    Configure,
}

impl std::fmt::Display for ActionType {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let s = match self {
            ActionType::Create => "create",
            ActionType::Update => "update",
            ActionType::Delete => "delete",
            ActionType::Deploy => "deploy",
            ActionType::Rollback => "rollback",
            ActionType::Start => "start",
            ActionType::Stop => "stop",
            ActionType::Restart => "restart",
            ActionType::Configure => "configure",
        };
        write!(f, "{}", s)
    }
}

/// Payload needed to execute an action
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "operation", rename_all = "snake_case")]
pub enum Operation {
    CreateResource {
        name: String,
        configuration: Configuration,
    },
    UpdateResource {
        configuration: Configuration,
    },
    DeleteResource,
    Deploy {
        #[serde(default, skip_serializing_if = "Option::is_none")]
        reference: Option<String>,
    },
    Rollback {
        #[serde(default, skip_serializing_if = "Option::is_none")]
        target: Option<String>,
    },
    Start,
    Stop,
    Restart,
    Configure {
        settings: Configuration,
    },
}

/// A single proposed mutation produced by planning
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Action {
    /// Correlation id for logs
    pub id: Uuid,
    pub action_type: ActionType,
    pub resource_id: String,
    pub resource_type: ResourceType,
    pub operation: Operation,
    pub description: String,
}

impl Action {
    pub fn new(
        action_type: ActionType,
        resource_id: impl Into<String>,
        resource_type: ResourceType,
        operation: Operation,
        description: impl Into<String>,
    ) -> Self {
        Self {
            id: Uuid::new_v4(),
            action_type,
            resource_id: resource_id.into(),
            resource_type,
            operation,
            description: description.into(),
        }
    }

    pub fn create(resource: &Resource) -> Self {
        Self::new(
            ActionType::Create,
            &resource.id,
            resource.resource_type,
            Operation::CreateResource {
                name: resource.name.clone(),
                configuration: resource.configuration.clone(),
            },
            format!("Create {} '{}'", resource.resource_type, resource.name),
        )
    }

    pub fn update(resource: &Resource) -> Self {
        Self::new(
            ActionType::Update,
            &resource.id,
            resource.resource_type,
            Operation::UpdateResource {
                configuration: resource.configuration.clone(),
            },
            format!("Update {} '{}'", resource.resource_type, resource.name),
        )
    }

    pub fn delete(resource: &Resource) -> Self {
        Self::new(
            ActionType::Delete,
            &resource.id,
            resource.resource_type,
            Operation::DeleteResource,
            format!("Delete {} '{}'", resource.resource_type, resource.name),
        )
    }

    pub fn deploy(resource: &Resource, reference: Option<String>) -> Self {
        Self::new(
            ActionType::Deploy,
            &resource.id,
            resource.resource_type,
            Operation::Deploy { reference },
            format!("Deploy {} '{}'", resource.resource_type, resource.name),
        )
    }
}

/// An action that failed during apply, with its cause
#[derive(Debug)]
pub struct FailedAction {
    pub action: Action,
    pub error: IntegrationError,
}

/// Outcome of executing a batch of actions
#[derive(Debug, Default)]
pub struct ApplyResult {
    pub successful: Vec<Action>,
    pub failed: Vec<FailedAction>,
    pub duration: Duration,
    pub metadata: BTreeMap<String, String>,
}

impl ApplyResult {
    pub fn is_success(&self) -> bool {
        self.failed.is_empty()
    }

    pub fn total(&self) -> usize {
        self.successful.len() + self.failed.len()
    }
}

/// Access level requested by an integration
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum PermissionLevel {
    Read,
    Write,
    Admin,
}

/// Declarative capability descriptor, informational only
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Permission {
    pub scope: String,
    pub level: PermissionLevel,
    pub description: String,
}

impl Permission {
    pub fn new(scope: impl Into<String>, level: PermissionLevel, description: impl Into<String>) -> Self {
        Self {
            scope: scope.into(),
            level,
            description: description.into(),
        }
    }
}

/// Static identity of an integration
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct IntegrationDescriptor {
    pub identifier: String,
    pub display_name: String,
    pub version: String,
    #[serde(default)]
    pub required_permissions: Vec<Permission>,
}

/// Registry view of an integration
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct IntegrationInfo {
    pub identifier: String,
    pub display_name: String,
    pub version: String,
    pub required_permissions: Vec<Permission>,
    pub is_active: bool,
}

impl IntegrationInfo {
    pub fn from_descriptor(descriptor: &IntegrationDescriptor, is_active: bool) -> Self {
        Self {
            identifier: descriptor.identifier.clone(),
            display_name: descriptor.display_name.clone(),
            version: descriptor.version.clone(),
            required_permissions: descriptor.required_permissions.clone(),
            is_active,
        }
    }
}

/// Result of a liveness probe
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct HealthStatus {
    pub is_healthy: bool,
    pub latency: Duration,
    pub details: String,
    pub checked_at: DateTime<Utc>,
}

impl HealthStatus {
    pub fn healthy(latency: Duration, details: impl Into<String>) -> Self {
        Self {
            is_healthy: true,
            latency,
            details: details.into(),
            checked_at: Utc::now(),
        }
    }

    pub fn unhealthy(latency: Duration, details: impl Into<String>) -> Self {
        Self {
            is_healthy: false,
            latency,
            details: details.into(),
            checked_at: Utc::now(),
        }
    }
}

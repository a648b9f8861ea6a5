//! Cloudflare integration: pages projects, worker scripts and zones
//!
//! Every Cloudflare response is wrapped in an envelope
//! (`{success, errors, result, result_info}`); a `success: false` envelope is
//! an error even on a 2xx status.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use infra_core::{
    Action, Authentication, Configuration, HealthStatus, IntegrationConfiguration,
    IntegrationDescriptor, IntegrationError, Operation, Permission, PermissionLevel, Resource,
    ResourceStatus, ResourceType, Result,
};
use infra_http::{encode_path, HttpClient, HttpError, Method};
use infra_state::{measure_health, Integration, IntegrationCapabilities, IntegrationFactory};
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use serde_json::{json, Map, Value};
use std::sync::Arc;
use tracing::{debug, info};

use super::{local_name, resource_id, unsupported_action};

pub const IDENTIFIER: &str = "cloudflare";
pub const DEFAULT_BASE_URL: &str = "https://api.cloudflare.com/client/v4";

/// Cloudflare's error code for rejected credentials
const AUTH_ERROR_CODE: i64 = 10000;

#[derive(Debug, Deserialize)]
struct Envelope<T> {
    success: bool,
    #[serde(default)]
    errors: Vec<ApiMessage>,
    result: Option<T>,
    #[serde(default)]
    result_info: Option<ResultInfo>,
}

#[derive(Debug, Deserialize)]
struct ApiMessage {
    #[serde(default)]
    code: i64,
    #[serde(default)]
    message: String,
}

#[derive(Debug, Deserialize)]
struct ResultInfo {
    #[serde(default)]
    total_pages: Option<u32>,
}

#[derive(Debug, Deserialize)]
struct PagesProject {
    name: String,
    #[serde(default)]
    subdomain: Option<String>,
    #[serde(default)]
    production_branch: Option<String>,
    #[serde(default)]
    domains: Vec<String>,
    #[serde(default)]
    created_on: Option<DateTime<Utc>>,
}

#[derive(Debug, Deserialize)]
struct WorkerScript {
    id: String,
    #[serde(default)]
    usage_model: Option<String>,
    #[serde(default)]
    created_on: Option<DateTime<Utc>>,
    #[serde(default)]
    modified_on: Option<DateTime<Utc>>,
}

#[derive(Debug, Deserialize)]
struct Zone {
    id: String,
    name: String,
    #[serde(default)]
    status: String,
    #[serde(default)]
    paused: bool,
    #[serde(default, rename = "type")]
    zone_type: Option<String>,
    #[serde(default)]
    name_servers: Vec<String>,
    #[serde(default)]
    plan: Option<ZonePlan>,
    #[serde(default)]
    created_on: Option<DateTime<Utc>>,
    #[serde(default)]
    modified_on: Option<DateTime<Utc>>,
}

#[derive(Debug, Deserialize)]
struct ZonePlan {
    #[serde(default)]
    name: String,
}

#[derive(Debug, Deserialize)]
struct TokenStatus {
    #[serde(default)]
    status: String,
}

#[derive(Debug, Deserialize)]
struct User {
    #[serde(default)]
    email: String,
}

#[derive(Debug, Deserialize)]
struct ZoneRef {
    id: String,
}

impl PagesProject {
    fn into_resource(self) -> Resource {
        let mut resource = Resource::new(
            resource_id(ResourceType::CloudflarePagesProject, &self.name),
            ResourceType::CloudflarePagesProject,
            self.name,
        )
        .with_status(ResourceStatus::Active)
        .with_config("domains", self.domains)
        .with_timestamps(self.created_on, None);
        if let Some(branch) = self.production_branch {
            resource = resource.with_config("production_branch", branch);
        }
        if let Some(subdomain) = self.subdomain {
            resource = resource.with_config("subdomain", subdomain);
        }
        resource
    }
}

impl WorkerScript {
    fn into_resource(self) -> Resource {
        let mut resource = Resource::new(
            resource_id(ResourceType::CloudflareWorker, &self.id),
            ResourceType::CloudflareWorker,
            self.id,
        )
        .with_status(ResourceStatus::Active)
        .with_timestamps(self.created_on, self.modified_on);
        if let Some(usage_model) = self.usage_model {
            resource = resource.with_config("usage_model", usage_model);
        }
        resource
    }
}

impl Zone {
    fn into_resource(self) -> Resource {
        let status = zone_status(&self.status, self.paused);
        let mut resource = Resource::new(
            resource_id(ResourceType::CloudflareZone, &self.name),
            ResourceType::CloudflareZone,
            self.name,
        )
        .with_status(status)
        .with_config("zone_id", self.id)
        .with_config("paused", self.paused)
        .with_config("name_servers", self.name_servers)
        .with_timestamps(self.created_on, self.modified_on);
        if let Some(zone_type) = self.zone_type {
            resource = resource.with_config("type", zone_type);
        }
        if let Some(plan) = self.plan.filter(|p| !p.name.is_empty()) {
            resource = resource.with_config("plan", plan.name);
        }
        resource
    }
}

fn zone_status(status: &str, paused: bool) -> ResourceStatus {
    if paused {
        return ResourceStatus::Suspended;
    }
    match status {
        "active" => ResourceStatus::Active,
        "pending" | "initializing" => ResourceStatus::Creating,
        "moved" | "deactivated" => ResourceStatus::Suspended,
        "deleted" => ResourceStatus::Deleted,
        _ => ResourceStatus::Unknown,
    }
}

fn envelope_error(errors: &[ApiMessage]) -> IntegrationError {
    match errors.first() {
        Some(e) if e.code == AUTH_ERROR_CODE => {
            IntegrationError::AuthenticationFailed(e.message.clone())
        }
        Some(e) => IntegrationError::CloudflareError {
            code: e.code,
            message: e.message.clone(),
        },
        None => IntegrationError::CloudflareError {
            code: 0,
            message: "request failed without error details".into(),
        },
    }
}

/// Map a transport failure, preferring the vendor's own error payload
fn vendor_error(err: HttpError) -> IntegrationError {
    if err.is_retryable() {
        return err.into();
    }

    let status = err.status_code();
    let envelope = err
        .body()
        .and_then(|body| serde_json::from_str::<Envelope<Value>>(body).ok());

    match (status, envelope) {
        (Some(401), Some(envelope)) => IntegrationError::AuthenticationFailed(
            envelope
                .errors
                .first()
                .map(|e| e.message.clone())
                .unwrap_or_else(|| "invalid credentials".into()),
        ),
        (Some(_), Some(envelope)) if !envelope.errors.is_empty() => {
            envelope_error(&envelope.errors)
        }
        _ => err.into(),
    }
}

/// Settings Cloudflare accepts for a pages project
fn pages_settings(configuration: &Configuration) -> Map<String, Value> {
    let mut body = Map::new();
    if let Some(branch) = configuration.get("production_branch").and_then(|v| v.as_str()) {
        body.insert("production_branch".into(), json!(branch));
    }
    body
}

pub fn descriptor() -> IntegrationDescriptor {
    IntegrationDescriptor {
        identifier: IDENTIFIER.to_string(),
        display_name: "Cloudflare".to_string(),
        version: env!("CARGO_PKG_VERSION").to_string(),
        required_permissions: vec![
            Permission::new(
                "account.pages",
                PermissionLevel::Write,
                "Create, deploy and delete Pages projects",
            ),
            Permission::new(
                "account.workers_scripts",
                PermissionLevel::Write,
                "List and delete Worker scripts",
            ),
            Permission::new("zone.zone", PermissionLevel::Admin, "Manage zones"),
        ],
    }
}

/// Live Cloudflare integration bound to one account
pub struct CloudflareIntegration {
    descriptor: IntegrationDescriptor,
    client: HttpClient,
    account_id: String,
    uses_token: bool,
}

impl CloudflareIntegration {
    /// Validate configuration and build the transport, without network I/O
    pub fn new(configuration: IntegrationConfiguration) -> Result<Self> {
        let uses_token = match &configuration.authentication {
            Authentication::Bearer { token } if !token.is_empty() => true,
            Authentication::ApiKey { key, email } if !key.is_empty() && !email.is_empty() => false,
            Authentication::Bearer { .. } | Authentication::ApiKey { .. } => {
                return Err(IntegrationError::authentication("empty Cloudflare credentials"))
            }
            other => {
                return Err(IntegrationError::authentication(format!(
                    "Cloudflare accepts bearer or api_key credentials, got {}",
                    other.kind()
                )))
            }
        };

        let account_id = configuration
            .option_str("account_id")
            .ok_or_else(|| IntegrationError::MissingRequiredField("options.account_id".into()))?
            .to_string();

        let mut configuration = configuration;
        if configuration.base_url.is_empty() {
            configuration.base_url = DEFAULT_BASE_URL.to_string();
        }
        let client = HttpClient::from_configuration(&configuration)?;

        Ok(Self {
            descriptor: descriptor(),
            client,
            account_id,
            uses_token,
        })
    }

    /// Build the integration and verify its credentials
    pub async fn connect(configuration: IntegrationConfiguration) -> Result<Self> {
        let integration = Self::new(configuration)?;
        let identity = integration.verify().await?;
        info!(
            "Connected to Cloudflare account {} ({})",
            integration.account_id, identity
        );
        Ok(integration)
    }

    pub fn account_id(&self) -> &str {
        &self.account_id
    }

    /// Confirm the credentials are accepted
    pub async fn verify(&self) -> Result<String> {
        if self.uses_token {
            let token: TokenStatus = self.fetch("/user/tokens/verify", &[]).await?;
            if token.status != "active" {
                return Err(IntegrationError::authentication(format!(
                    "API token status is '{}'",
                    token.status
                )));
            }
            Ok("API token active".to_string())
        } else {
            let user: User = self.fetch("/user", &[]).await?;
            Ok(format!("authenticated as {}", user.email))
        }
    }

    async fn call<B, T>(
        &self,
        method: Method,
        path: &str,
        query: &[(&str, &str)],
        body: Option<&B>,
    ) -> Result<Envelope<T>>
    where
        B: Serialize + ?Sized,
        T: DeserializeOwned,
    {
        let envelope = self
            .client
            .request::<B, Envelope<T>>(method, path, query, &[], body)
            .await
            .map_err(vendor_error)?
            .into_body()
            .ok_or_else(|| IntegrationError::InvalidResponse(format!("empty response from {}", path)))?;

        if !envelope.success {
            return Err(envelope_error(&envelope.errors));
        }
        Ok(envelope)
    }

    async fn fetch<T: DeserializeOwned>(&self, path: &str, query: &[(&str, &str)]) -> Result<T> {
        self.call::<(), T>(Method::GET, path, query, None)
            .await?
            .result
            .ok_or_else(|| IntegrationError::InvalidResponse(format!("no result from {}", path)))
    }

    async fn send<B: Serialize + ?Sized>(&self, method: Method, path: &str, body: Option<&B>) -> Result<()> {
        self.call::<B, Value>(method, path, &[], body).await?;
        Ok(())
    }

    /// Collect every page of a list endpoint
    async fn list_all<T: DeserializeOwned>(&self, path: &str, query: &[(&str, &str)]) -> Result<Vec<T>> {
        let mut items = Vec::new();
        let mut page: u32 = 1;
        loop {
            let page_param = page.to_string();
            let mut params = query.to_vec();
            params.push(("page", page_param.as_str()));

            let envelope = self
                .call::<(), Vec<T>>(Method::GET, path, &params, None)
                .await?;
            let batch = envelope.result.unwrap_or_default();
            let fetched = batch.len();
            items.extend(batch);

            match envelope.result_info.and_then(|info| info.total_pages) {
                Some(total) if page < total && fetched > 0 => page += 1,
                _ => break,
            }
        }
        debug!("Fetched {} item(s) from {}", items.len(), path);
        Ok(items)
    }

    fn pages_path(&self) -> String {
        encode_path(&["accounts", self.account_id.as_str(), "pages", "projects"])
    }

    fn workers_path(&self) -> String {
        encode_path(&["accounts", self.account_id.as_str(), "workers", "scripts"])
    }

    async fn list_pages_projects(&self) -> Result<Vec<Resource>> {
        let projects: Vec<PagesProject> = self.list_all(&self.pages_path(), &[]).await?;
        Ok(projects.into_iter().map(PagesProject::into_resource).collect())
    }

    async fn list_workers(&self) -> Result<Vec<Resource>> {
        let scripts: Vec<WorkerScript> = self.list_all(&self.workers_path(), &[]).await?;
        Ok(scripts.into_iter().map(WorkerScript::into_resource).collect())
    }

    async fn list_zones(&self) -> Result<Vec<Resource>> {
        let zones: Vec<Zone> = self
            .list_all("/zones", &[("account.id", self.account_id.as_str())])
            .await?;
        Ok(zones.into_iter().map(Zone::into_resource).collect())
    }

    /// Backend id of the zone called `name`
    async fn zone_id(&self, name: &str) -> Result<String> {
        let zones: Vec<ZoneRef> = self
            .fetch(
                "/zones",
                &[("name", name), ("account.id", self.account_id.as_str())],
            )
            .await?;
        zones
            .into_iter()
            .next()
            .map(|z| z.id)
            .ok_or_else(|| IntegrationError::not_found(format!("zone '{}'", name)))
    }

    async fn execute_pages(&self, action: &Action, name: &str) -> Result<()> {
        let project_path = format!("{}{}", self.pages_path(), encode_path(&[name]));
        match &action.operation {
            Operation::CreateResource { configuration, .. } => {
                let mut body = pages_settings(configuration);
                body.insert("name".into(), json!(name));
                body.entry("production_branch").or_insert_with(|| json!("main"));
                self.send(Method::POST, &self.pages_path(), Some(&body)).await
            }
            Operation::UpdateResource { configuration } => {
                let body = pages_settings(configuration);
                self.send(Method::PATCH, &project_path, Some(&body)).await
            }
            Operation::DeleteResource => self.send::<()>(Method::DELETE, &project_path, None).await,
            Operation::Deploy { reference } => {
                let body = match reference {
                    Some(branch) => json!({ "branch": branch }),
                    None => json!({}),
                };
                self.send(Method::POST, &format!("{}/deployments", project_path), Some(&body))
                    .await
            }
            _ => Err(unsupported_action(action)),
        }
    }

    async fn execute_worker(&self, action: &Action, script: &str) -> Result<()> {
        match &action.operation {
            Operation::DeleteResource => {
                let path = format!("{}{}", self.workers_path(), encode_path(&[script]));
                self.send::<()>(Method::DELETE, &path, None).await
            }
            Operation::CreateResource { .. } | Operation::UpdateResource { .. } => {
                Err(IntegrationError::ActionNotSupported(format!(
                    "worker '{}' must be uploaded as a multipart script bundle",
                    script
                )))
            }
            _ => Err(unsupported_action(action)),
        }
    }

    async fn execute_zone(&self, action: &Action, name: &str) -> Result<()> {
        match &action.operation {
            Operation::CreateResource { configuration, .. } => {
                let zone_type = configuration
                    .get("type")
                    .and_then(|v| v.as_str())
                    .unwrap_or("full");
                let body = json!({
                    "name": name,
                    "account": { "id": self.account_id },
                    "type": zone_type,
                });
                self.send(Method::POST, "/zones", Some(&body)).await
            }
            Operation::UpdateResource { configuration } => {
                let mut body = Map::new();
                if let Some(paused) = configuration.get("paused").and_then(|v| v.as_bool()) {
                    body.insert("paused".into(), json!(paused));
                }
                let id = self.zone_id(name).await?;
                self.send(Method::PATCH, &encode_path(&["zones", id.as_str()]), Some(&body))
                    .await
            }
            Operation::DeleteResource => {
                let id = self.zone_id(name).await?;
                self.send::<()>(Method::DELETE, &encode_path(&["zones", id.as_str()]), None)
                    .await
            }
            _ => Err(unsupported_action(action)),
        }
    }
}

#[async_trait]
impl Integration for CloudflareIntegration {
    fn descriptor(&self) -> &IntegrationDescriptor {
        &self.descriptor
    }

    async fn get_actual_state(&self) -> Result<Vec<Resource>> {
        let (projects, workers, zones) = tokio::try_join!(
            async {
                self.list_pages_projects()
                    .await
                    .map_err(|e| IntegrationError::action_failed("Failed to list Pages projects", e))
            },
            async {
                self.list_workers()
                    .await
                    .map_err(|e| IntegrationError::action_failed("Failed to list Worker scripts", e))
            },
            async {
                self.list_zones()
                    .await
                    .map_err(|e| IntegrationError::action_failed("Failed to list zones", e))
            },
        )?;

        let mut resources = projects;
        resources.extend(workers);
        resources.extend(zones);
        Ok(resources)
    }

    async fn execute(&self, action: &Action) -> Result<()> {
        let name = local_name(action)?;
        match action.resource_type {
            ResourceType::CloudflarePagesProject => self.execute_pages(action, name).await,
            ResourceType::CloudflareWorker => self.execute_worker(action, name).await,
            ResourceType::CloudflareZone => self.execute_zone(action, name).await,
            _ => Err(unsupported_action(action)),
        }
    }

    async fn health_check(&self) -> HealthStatus {
        measure_health(self.verify()).await
    }

    fn capabilities(&self) -> IntegrationCapabilities {
        IntegrationCapabilities {
            supports_rollback: false,
            supports_updates: true,
            managed_types: vec![
                ResourceType::CloudflarePagesProject,
                ResourceType::CloudflareWorker,
                ResourceType::CloudflareZone,
            ],
        }
    }
}

/// Factory for [`CloudflareIntegration`]
#[derive(Debug, Default, Clone)]
pub struct CloudflareFactory;

#[async_trait]
impl IntegrationFactory for CloudflareFactory {
    fn descriptor(&self) -> IntegrationDescriptor {
        descriptor()
    }

    async fn create(&self, configuration: IntegrationConfiguration) -> Result<Arc<dyn Integration>> {
        Ok(Arc::new(CloudflareIntegration::connect(configuration).await?))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use infra_core::ErrorKind;
    use infra_http::header::HeaderMap;

    fn status(code: u16, body: &str) -> HttpError {
        HttpError::Status {
            status_code: code,
            body: body.to_string(),
            headers: HeaderMap::new(),
        }
    }

    fn configuration(authentication: Authentication) -> IntegrationConfiguration {
        IntegrationConfiguration::new("http://127.0.0.1:9", authentication)
            .with_option("account_id", "acct")
    }

    #[test]
    fn test_zone_status_mapping() {
        assert_eq!(zone_status("active", false), ResourceStatus::Active);
        assert_eq!(zone_status("active", true), ResourceStatus::Suspended);
        assert_eq!(zone_status("pending", false), ResourceStatus::Creating);
        assert_eq!(zone_status("moved", false), ResourceStatus::Suspended);
        assert_eq!(zone_status("read only", false), ResourceStatus::Unknown);
    }

    #[test]
    fn test_zone_resource_is_addressed_by_name() {
        let zone: Zone = serde_json::from_value(json!({
            "id": "023e105f4ecef8ad9ca31a8372d0c353",
            "name": "example.com",
            "status": "active",
            "paused": false,
            "type": "full",
            "name_servers": ["bob.ns.cloudflare.com"],
            "plan": {"name": "Free Website"},
            "created_on": "2014-01-01T05:20:00.12345Z"
        }))
        .unwrap();

        let resource = zone.into_resource();
        assert_eq!(resource.id, "zone:example.com");
        assert_eq!(resource.status, ResourceStatus::Active);
        assert_eq!(
            resource.configuration.get("zone_id").and_then(|v| v.as_str()),
            Some("023e105f4ecef8ad9ca31a8372d0c353")
        );
        assert_eq!(
            resource.configuration.get("plan").and_then(|v| v.as_str()),
            Some("Free Website")
        );
        assert!(resource.created_at.is_some());
    }

    #[test]
    fn test_vendor_errors() {
        let body = r#"{"success":false,"errors":[{"code":7003,"message":"Could not route"}],"result":null}"#;
        match vendor_error(status(400, body)) {
            IntegrationError::CloudflareError { code, message } => {
                assert_eq!(code, 7003);
                assert_eq!(message, "Could not route");
            }
            other => panic!("unexpected: {:?}", other),
        }

        let body = r#"{"success":false,"errors":[{"code":10000,"message":"Authentication error"}]}"#;
        assert_eq!(vendor_error(status(403, body)).kind(), ErrorKind::AuthenticationFailed);
        assert_eq!(
            vendor_error(status(401, r#"{"success":false,"errors":[]}"#)).kind(),
            ErrorKind::AuthenticationFailed
        );

        // transient failures keep their transport classification
        assert_eq!(vendor_error(status(503, body)).kind(), ErrorKind::ServerError);
        assert_eq!(vendor_error(status(404, "not json")).kind(), ErrorKind::ResourceNotFound);
    }

    #[test]
    fn test_rejects_unsupported_credentials() {
        let err = CloudflareIntegration::new(configuration(Authentication::OAuth {
            access_token: "t".into(),
            refresh_token: None,
        }))
        .err()
        .unwrap();
        assert_eq!(err.kind(), ErrorKind::AuthenticationFailed);

        let err = CloudflareIntegration::new(configuration(Authentication::Bearer {
            token: String::new(),
        }))
        .err()
        .unwrap();
        assert_eq!(err.kind(), ErrorKind::AuthenticationFailed);

        let err = CloudflareIntegration::new(configuration(Authentication::None))
            .err()
            .unwrap();
        assert_eq!(err.kind(), ErrorKind::AuthenticationFailed);
    }

    #[tokio::test]
    async fn test_factory_rejects_missing_credentials() {
        let err = CloudflareFactory
            .create(configuration(Authentication::None))
            .await
            .err()
            .unwrap();
        assert_eq!(err.kind(), ErrorKind::AuthenticationFailed);
    }

    #[test]
    fn test_requires_account_id() {
        let configuration = IntegrationConfiguration::new(
            "http://127.0.0.1:9",
            Authentication::Bearer { token: "t".into() },
        );
        let err = CloudflareIntegration::new(configuration).err().unwrap();
        assert_eq!(err.kind(), ErrorKind::MissingRequiredField);
    }

    #[test]
    fn test_defaults_base_url() {
        let mut configuration = configuration(Authentication::ApiKey {
            key: "k".into(),
            email: "ops@example.com".into(),
        });
        configuration.base_url = String::new();
        let integration = CloudflareIntegration::new(configuration).unwrap();
        assert_eq!(integration.account_id(), "acct");
        assert!(integration.client.base_url().as_str().starts_with(DEFAULT_BASE_URL));
    }
}

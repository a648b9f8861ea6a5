//! GitHub integration: repositories and their deployment environments

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use futures::stream::{self, StreamExt, TryStreamExt};
use infra_core::{
    Action, Authentication, Configuration, HealthStatus, IntegrationConfiguration,
    IntegrationDescriptor, IntegrationError, Operation, Permission, PermissionLevel, Resource,
    ResourceStatus, ResourceType, Result,
};
use infra_http::header::{HeaderName, HeaderValue, ACCEPT};
use infra_http::{auth_headers, encode_path, HttpClient, HttpError, Method};
use infra_state::{measure_health, Integration, IntegrationCapabilities, IntegrationFactory};
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use serde_json::{json, Map, Value};
use std::sync::Arc;
use tracing::{debug, info};

use super::{local_name, resource_id, unsupported_action};

pub const IDENTIFIER: &str = "github";
pub const DEFAULT_BASE_URL: &str = "https://api.github.com";

const API_VERSION: &str = "2022-11-28";
const PAGE_SIZE: usize = 100;

/// Environment listings in flight at once during `get_actual_state`
pub const ENVIRONMENT_FETCH_CONCURRENCY: usize = 8;

#[derive(Debug, Deserialize)]
struct ErrorBody {
    #[serde(default)]
    message: String,
    #[serde(default)]
    documentation_url: Option<String>,
}

#[derive(Debug, Deserialize)]
struct GithubUser {
    login: String,
}

#[derive(Debug, Deserialize)]
struct Repository {
    name: String,
    #[serde(default)]
    private: bool,
    #[serde(default)]
    archived: bool,
    #[serde(default)]
    description: Option<String>,
    #[serde(default)]
    default_branch: Option<String>,
    #[serde(default)]
    visibility: Option<String>,
    #[serde(default)]
    created_at: Option<DateTime<Utc>>,
    #[serde(default)]
    updated_at: Option<DateTime<Utc>>,
}

#[derive(Debug, Deserialize)]
struct EnvironmentList {
    #[serde(default)]
    environments: Vec<Environment>,
}

#[derive(Debug, Deserialize)]
struct Environment {
    name: String,
    #[serde(default)]
    html_url: Option<String>,
    #[serde(default)]
    created_at: Option<DateTime<Utc>>,
    #[serde(default)]
    updated_at: Option<DateTime<Utc>>,
}

impl Repository {
    fn into_resource(self, owner: &str) -> Resource {
        let status = if self.archived {
            ResourceStatus::Suspended
        } else {
            ResourceStatus::Active
        };
        let mut resource = Resource::new(
            resource_id(ResourceType::GithubRepository, &self.name),
            ResourceType::GithubRepository,
            self.name,
        )
        .with_status(status)
        .with_config("private", self.private)
        .with_config("archived", self.archived)
        .with_timestamps(self.created_at, self.updated_at);
        if let Some(description) = self.description {
            resource = resource.with_config("description", description);
        }
        if let Some(branch) = self.default_branch {
            resource = resource.with_config("default_branch", branch);
        }
        if let Some(visibility) = self.visibility {
            resource = resource.with_config("visibility", visibility);
        }
        resource.metadata.owner = Some(owner.to_string());
        resource
    }
}

impl Environment {
    fn into_resource(self, repository: &str) -> Resource {
        let mut resource = Resource::new(
            resource_id(
                ResourceType::GithubEnvironment,
                &format!("{}/{}", repository, self.name),
            ),
            ResourceType::GithubEnvironment,
            self.name,
        )
        .with_status(ResourceStatus::Active)
        .with_config("repository", repository)
        .with_timestamps(self.created_at, self.updated_at);
        if let Some(url) = self.html_url {
            resource = resource.with_config("html_url", url);
        }
        resource
    }
}

/// Map a transport failure, preferring GitHub's `{message}` error body
fn vendor_error(err: HttpError) -> IntegrationError {
    if err.is_retryable() {
        return err.into();
    }

    let status = match err.status_code() {
        Some(status) => status,
        None => return err.into(),
    };
    let body = err
        .body()
        .and_then(|body| serde_json::from_str::<ErrorBody>(body).ok());
    let message = match body {
        Some(ErrorBody {
            message,
            documentation_url: Some(docs),
        }) => format!("{} ({})", message, docs),
        Some(ErrorBody { message, .. }) => message,
        None => return err.into(),
    };

    match status {
        401 => IntegrationError::AuthenticationFailed(message),
        404 => IntegrationError::ResourceNotFound(message),
        s if (400..500).contains(&s) => IntegrationError::GithubError { status: s, message },
        _ => err.into(),
    }
}

/// Repository fields GitHub accepts on create and update
fn repository_settings(configuration: &Configuration) -> Map<String, Value> {
    let mut body = Map::new();
    for key in ["private", "archived", "auto_init", "has_issues", "has_wiki"] {
        if let Some(flag) = configuration.get(key).and_then(|v| v.as_bool()) {
            body.insert(key.into(), json!(flag));
        }
    }
    for key in ["description", "homepage", "default_branch"] {
        if let Some(text) = configuration.get(key).and_then(|v| v.as_str()) {
            body.insert(key.into(), json!(text));
        }
    }
    body
}

fn environment_settings(configuration: &Configuration) -> Map<String, Value> {
    let mut body = Map::new();
    if let Some(minutes) = configuration.get("wait_timer").and_then(|v| v.as_i64()) {
        body.insert("wait_timer".into(), json!(minutes));
    }
    body
}

pub fn descriptor() -> IntegrationDescriptor {
    IntegrationDescriptor {
        identifier: IDENTIFIER.to_string(),
        display_name: "GitHub".to_string(),
        version: env!("CARGO_PKG_VERSION").to_string(),
        required_permissions: vec![
            Permission::new(
                "repo",
                PermissionLevel::Write,
                "Create, update and deploy repositories",
            ),
            Permission::new(
                "delete_repo",
                PermissionLevel::Admin,
                "Delete repositories",
            ),
            Permission::new("read:user", PermissionLevel::Read, "Identify the account owner"),
        ],
    }
}

/// Live GitHub integration acting for one owner
pub struct GithubIntegration {
    descriptor: IntegrationDescriptor,
    client: HttpClient,
    configured_owner: Option<String>,
    owner: String,
    is_organization: bool,
}

impl GithubIntegration {
    /// Validate configuration and build the transport, without network I/O.
    ///
    /// The owner stays unresolved until [`GithubIntegration::connect`] runs.
    pub fn new(configuration: IntegrationConfiguration) -> Result<Self> {
        match &configuration.authentication {
            Authentication::Bearer { token }
            | Authentication::OAuth {
                access_token: token,
                ..
            } => {
                if token.is_empty() {
                    return Err(IntegrationError::authentication("empty GitHub token"));
                }
            }
            other => {
                return Err(IntegrationError::authentication(format!(
                    "GitHub accepts bearer or oauth credentials, got {}",
                    other.kind()
                )))
            }
        }

        let base_url = if configuration.base_url.is_empty() {
            DEFAULT_BASE_URL
        } else {
            configuration.base_url.as_str()
        };

        let mut headers = auth_headers(&configuration.authentication)?;
        headers.insert(ACCEPT, HeaderValue::from_static("application/vnd.github+json"));
        headers.insert(
            HeaderName::from_static("x-github-api-version"),
            HeaderValue::from_static(API_VERSION),
        );
        let client = HttpClient::new(
            base_url,
            headers,
            configuration.timeout,
            configuration.retry_policy.clone(),
        )?;

        let configured_owner = configuration.option_str("owner").map(str::to_string);
        Ok(Self {
            descriptor: descriptor(),
            client,
            owner: configured_owner.clone().unwrap_or_default(),
            configured_owner,
            is_organization: false,
        })
    }

    /// Build the integration, verify the token and resolve the owner
    pub async fn connect(configuration: IntegrationConfiguration) -> Result<Self> {
        let mut integration = Self::new(configuration)?;
        let login = integration.verify().await?;

        match &integration.configured_owner {
            Some(owner) => {
                integration.is_organization = !owner.eq_ignore_ascii_case(&login);
            }
            None => integration.owner = login.clone(),
        }
        info!(
            "Connected to GitHub as {} (owner {}{})",
            login,
            integration.owner,
            if integration.is_organization { ", organization" } else { "" }
        );
        Ok(integration)
    }

    pub fn owner(&self) -> &str {
        &self.owner
    }

    pub fn is_organization(&self) -> bool {
        self.is_organization
    }

    /// Login the token authenticates as
    pub async fn verify(&self) -> Result<String> {
        let user: GithubUser = self
            .client
            .get("/user", &[])
            .await
            .map_err(vendor_error)?
            .into_body()
            .ok_or_else(|| IntegrationError::InvalidResponse("empty /user response".into()))?;
        Ok(user.login)
    }

    async fn fetch<T: DeserializeOwned>(&self, path: &str, query: &[(&str, &str)]) -> Result<Option<T>> {
        Ok(self
            .client
            .get(path, query)
            .await
            .map_err(vendor_error)?
            .into_body())
    }

    async fn send<B: Serialize + ?Sized>(&self, method: Method, path: &str, body: Option<&B>) -> Result<()> {
        self.client
            .request::<B, Value>(method, path, &[], &[], body)
            .await
            .map_err(vendor_error)?;
        Ok(())
    }

    fn repos_path(&self) -> String {
        if self.is_organization {
            encode_path(&["orgs", self.owner.as_str(), "repos"])
        } else {
            "/user/repos".to_string()
        }
    }

    async fn list_repositories(&self) -> Result<Vec<Repository>> {
        let path = self.repos_path();
        let per_page = PAGE_SIZE.to_string();
        let mut repositories = Vec::new();
        let mut page: u32 = 1;
        loop {
            let page_param = page.to_string();
            let mut query = vec![("per_page", per_page.as_str()), ("page", page_param.as_str())];
            if !self.is_organization {
                query.push(("affiliation", "owner"));
            }

            let batch: Vec<Repository> = self.fetch(&path, &query).await?.unwrap_or_default();
            let fetched = batch.len();
            repositories.extend(batch);
            if fetched < PAGE_SIZE {
                break;
            }
            page += 1;
        }
        debug!("Fetched {} repositories from {}", repositories.len(), path);
        Ok(repositories)
    }

    async fn list_environments(&self, repository: &str) -> Result<Vec<Resource>> {
        let path = encode_path(&["repos", self.owner.as_str(), repository, "environments"]);
        let list = match self.fetch::<EnvironmentList>(&path, &[]).await {
            Ok(list) => list.map(|l| l.environments).unwrap_or_default(),
            // repositories without environment support answer 404
            Err(IntegrationError::ResourceNotFound(_)) => Vec::new(),
            Err(e) => return Err(e),
        };
        Ok(list
            .into_iter()
            .map(|env| env.into_resource(repository))
            .collect())
    }

    async fn default_branch(&self, repository: &str) -> Result<String> {
        let repo: Repository = self
            .fetch(&encode_path(&["repos", self.owner.as_str(), repository]), &[])
            .await?
            .ok_or_else(|| IntegrationError::InvalidResponse("empty repository response".into()))?;
        Ok(repo.default_branch.unwrap_or_else(|| "main".to_string()))
    }

    async fn execute_repository(&self, action: &Action, name: &str) -> Result<()> {
        let repo_path = encode_path(&["repos", self.owner.as_str(), name]);
        match &action.operation {
            Operation::CreateResource { configuration, .. } => {
                let mut body = repository_settings(configuration);
                // archived and default_branch only apply to existing repositories
                body.remove("archived");
                body.remove("default_branch");
                body.insert("name".into(), json!(name));
                self.send(Method::POST, &self.repos_path(), Some(&body)).await
            }
            Operation::UpdateResource { configuration } => {
                let body = repository_settings(configuration);
                self.send(Method::PATCH, &repo_path, Some(&body)).await
            }
            Operation::DeleteResource => self.send::<()>(Method::DELETE, &repo_path, None).await,
            Operation::Deploy { reference } => {
                let reference = match reference {
                    Some(reference) => reference.clone(),
                    None => self.default_branch(name).await?,
                };
                let body = json!({
                    "ref": reference,
                    "auto_merge": false,
                    "required_contexts": [],
                    "description": action.description,
                });
                self.send(Method::POST, &format!("{}/deployments", repo_path), Some(&body))
                    .await
            }
            _ => Err(unsupported_action(action)),
        }
    }

    async fn execute_environment(&self, action: &Action, qualified: &str) -> Result<()> {
        let (repository, environment) = qualified
            .split_once('/')
            .filter(|(repo, env)| !repo.is_empty() && !env.is_empty())
            .ok_or_else(|| {
                IntegrationError::ValidationFailed(format!(
                    "environment id '{}' must look like 'env:<repository>/<environment>'",
                    action.resource_id
                ))
            })?;
        let path = encode_path(&[
            "repos",
            self.owner.as_str(),
            repository,
            "environments",
            environment,
        ]);

        match &action.operation {
            Operation::CreateResource { configuration, .. }
            | Operation::UpdateResource { configuration } => {
                let body = environment_settings(configuration);
                self.send(Method::PUT, &path, Some(&body)).await
            }
            Operation::DeleteResource => self.send::<()>(Method::DELETE, &path, None).await,
            _ => Err(unsupported_action(action)),
        }
    }
}

#[async_trait]
impl Integration for GithubIntegration {
    fn descriptor(&self) -> &IntegrationDescriptor {
        &self.descriptor
    }

    async fn get_actual_state(&self) -> Result<Vec<Resource>> {
        let repositories = self
            .list_repositories()
            .await
            .map_err(|e| IntegrationError::action_failed("Failed to list repositories", e))?;

        let environment_fetches: Vec<_> = repositories
            .iter()
            .map(|repo| self.list_environments(&repo.name))
            .collect();
        let environments: Vec<Vec<Resource>> = stream::iter(environment_fetches)
            .buffered(ENVIRONMENT_FETCH_CONCURRENCY)
            .try_collect()
            .await
            .map_err(|e| IntegrationError::action_failed("Failed to list environments", e))?;

        let mut resources: Vec<Resource> = repositories
            .into_iter()
            .map(|repo| repo.into_resource(&self.owner))
            .collect();
        resources.extend(environments.into_iter().flatten());
        Ok(resources)
    }

    async fn execute(&self, action: &Action) -> Result<()> {
        let name = local_name(action)?;
        match action.resource_type {
            ResourceType::GithubRepository => self.execute_repository(action, name).await,
            ResourceType::GithubEnvironment => self.execute_environment(action, name).await,
            _ => Err(unsupported_action(action)),
        }
    }

    async fn health_check(&self) -> HealthStatus {
        measure_health(async {
            self.verify()
                .await
                .map(|login| format!("authenticated as {}", login))
        })
        .await
    }

    fn capabilities(&self) -> IntegrationCapabilities {
        IntegrationCapabilities {
            supports_rollback: false,
            supports_updates: true,
            managed_types: vec![ResourceType::GithubRepository, ResourceType::GithubEnvironment],
        }
    }
}

/// Factory for [`GithubIntegration`]
#[derive(Debug, Default, Clone)]
pub struct GithubFactory;

#[async_trait]
impl IntegrationFactory for GithubFactory {
    fn descriptor(&self) -> IntegrationDescriptor {
        descriptor()
    }

    async fn create(&self, configuration: IntegrationConfiguration) -> Result<Arc<dyn Integration>> {
        Ok(Arc::new(GithubIntegration::connect(configuration).await?))
    }
}

//! Image registry client backed by ECR

use async_trait::async_trait;
use aws_config::{BehaviorVersion, Region};
use aws_sdk_ecr::types::Tag;
use base64::{engine::general_purpose::STANDARD as BASE64, Engine as _};
use tracing::{debug, info};

use crate::adapters::docker::DockerCli;
use crate::errors::BuildError;

/// Registry namespace and image transfer operations needed by the pipeline
#[async_trait]
pub trait RegistryClient: Send + Sync {
    /// Ensure a repository exists, creating it if necessary. Idempotent:
    /// an existing repository is returned unchanged.
    async fn ensure_repository(&self, name: &str) -> Result<String, BuildError>;

    /// Fully qualified URI of a repository
    fn repository_uri(&self, name: &str) -> String;

    /// Obtain ephemeral credentials and authenticate the local container
    /// tool against the registry
    async fn authenticate(&self) -> Result<(), BuildError>;

    async fn tag(&self, local: &str, fully_qualified: &str) -> Result<(), BuildError>;

    async fn push(&self, fully_qualified: &str) -> Result<(), BuildError>;

    async fn delete_image(&self, name: &str, tag: &str) -> Result<(), BuildError>;
}

/// ECR-backed registry client. Repository management goes through the AWS
/// SDK; image transfer goes through the docker CLI after an SDK-issued
/// login token.
pub struct EcrRegistry {
    client: aws_sdk_ecr::Client,
    account_id: String,
    region: String,
    docker: DockerCli,
}

impl EcrRegistry {
    pub async fn new(account_id: &str, region: &str) -> Self {
        let config = aws_config::defaults(BehaviorVersion::latest())
            .region(Region::new(region.to_string()))
            .load()
            .await;

        info!(account_id, region, "Registry client initialized");

        Self {
            client: aws_sdk_ecr::Client::new(&config),
            account_id: account_id.to_string(),
            region: region.to_string(),
            docker: DockerCli,
        }
    }
}

#[async_trait]
impl RegistryClient for EcrRegistry {
    async fn ensure_repository(&self, name: &str) -> Result<String, BuildError> {
        debug!(name, "Getting or creating registry repository");

        let existing = self
            .client
            .describe_repositories()
            .repository_names(name)
            .send()
            .await;

        if let Ok(output) = existing {
            if !output.repositories().is_empty() {
                info!(name, "Registry repository already exists");
                return Ok(name.to_string());
            }
        }

        info!(name, "Creating registry repository");
        let created = self
            .client
            .create_repository()
            .repository_name(name)
            .tags(
                Tag::builder()
                    .key("managed-by")
                    .value("buildserver")
                    .build()
                    .expect("managed-by tag has required fields set"),
            )
            .send()
            .await
            .map_err(|e| {
                BuildError::AdapterError(format!("failed to create registry repository: {}", e))
            })?;

        if let Some(uri) = created.repository().and_then(|r| r.repository_uri()) {
            info!(name, uri, "Registry repository created");
        }
        Ok(name.to_string())
    }

    fn repository_uri(&self, name: &str) -> String {
        format!(
            "{}.dkr.ecr.{}.amazonaws.com/{}",
            self.account_id, self.region, name
        )
    }

    async fn authenticate(&self) -> Result<(), BuildError> {
        let output = self
            .client
            .get_authorization_token()
            .send()
            .await
            .map_err(|e| {
                BuildError::AdapterError(format!("failed to get registry auth token: {}", e))
            })?;

        let auth = output.authorization_data().first().ok_or_else(|| {
            BuildError::AdapterError("no registry authorization data returned".to_string())
        })?;

        let token = auth.authorization_token().ok_or_else(|| {
            BuildError::AdapterError("registry authorization token missing".to_string())
        })?;
        let endpoint = auth.proxy_endpoint().ok_or_else(|| {
            BuildError::AdapterError("registry proxy endpoint missing".to_string())
        })?;

        // Token decodes to "username:password"
        let decoded = BASE64.decode(token).map_err(|e| {
            BuildError::AdapterError(format!("failed to decode registry auth token: {}", e))
        })?;
        let decoded = String::from_utf8_lossy(&decoded);
        let (username, password) = decoded.split_once(':').ok_or_else(|| {
            BuildError::AdapterError(
                "invalid registry auth token format: expected username:password".to_string(),
            )
        })?;

        self.docker.login(username, password, endpoint).await
    }

    async fn tag(&self, local: &str, fully_qualified: &str) -> Result<(), BuildError> {
        self.docker.tag(local, fully_qualified).await
    }

    async fn push(&self, fully_qualified: &str) -> Result<(), BuildError> {
        self.docker.push(fully_qualified).await
    }

    async fn delete_image(&self, name: &str, tag: &str) -> Result<(), BuildError> {
        self.client
            .batch_delete_image()
            .repository_name(name)
            .image_ids(
                aws_sdk_ecr::types::ImageIdentifier::builder()
                    .image_tag(tag)
                    .build(),
            )
            .send()
            .await
            .map_err(|e| {
                BuildError::AdapterError(format!("failed to delete image from registry: {}", e))
            })?;
        Ok(())
    }
}

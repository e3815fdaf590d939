//! Manifest validation for fetched sources

use std::path::Path;

use async_trait::async_trait;
use tracing::debug;

use crate::errors::BuildError;

/// Platform manifest expected at the repository root
pub const CONFIG_MANIFEST: &str = "mhive.config.yaml";

/// Container build manifest expected at the repository root
pub const DOCKERFILE: &str = "Dockerfile";

/// Validates the manifests a buildable repository must carry
#[async_trait]
pub trait ManifestValidator: Send + Sync {
    async fn validate_config(&self, path: &Path) -> Result<(), BuildError>;

    async fn validate_dockerfile(&self, path: &Path) -> Result<(), BuildError>;
}

/// Validator backed by serde_yaml; no semantic linting, only structure
pub struct YamlManifestValidator;

#[async_trait]
impl ManifestValidator for YamlManifestValidator {
    async fn validate_config(&self, path: &Path) -> Result<(), BuildError> {
        let data = match tokio::fs::read(path).await {
            Ok(data) => data,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                return Err(BuildError::ValidationError(format!(
                    "{} not found",
                    CONFIG_MANIFEST
                )));
            }
            Err(e) => {
                return Err(BuildError::ValidationError(format!(
                    "failed to read {}: {}",
                    CONFIG_MANIFEST, e
                )));
            }
        };

        let config: serde_yaml::Value = serde_yaml::from_slice(&data)
            .map_err(|e| BuildError::ValidationError(format!("invalid YAML syntax: {}", e)))?;

        if !config.is_mapping() {
            return Err(BuildError::ValidationError(format!(
                "{} must contain a mapping at the root",
                CONFIG_MANIFEST
            )));
        }

        debug!(
            keys = config.as_mapping().map(|m| m.len()).unwrap_or(0),
            "Config manifest is valid"
        );
        Ok(())
    }

    async fn validate_dockerfile(&self, path: &Path) -> Result<(), BuildError> {
        let data = match tokio::fs::read(path).await {
            Ok(data) => data,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                return Err(BuildError::ValidationError(format!(
                    "{} not found",
                    DOCKERFILE
                )));
            }
            Err(e) => {
                return Err(BuildError::ValidationError(format!(
                    "failed to read {}: {}",
                    DOCKERFILE, e
                )));
            }
        };

        if data.is_empty() {
            return Err(BuildError::ValidationError(format!(
                "{} is empty",
                DOCKERFILE
            )));
        }

        debug!(bytes = data.len(), "Dockerfile is valid");
        Ok(())
    }
}

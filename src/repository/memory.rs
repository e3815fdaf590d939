//! In-memory store implementations

use std::collections::HashMap;

use async_trait::async_trait;
use chrono::Utc;
use tokio::sync::RwLock;

use crate::errors::BuildError;
use crate::models::deployment::{BuildStatus, Deployment};
use crate::models::mcp::McpServer;
use crate::repository::{CredentialSource, DeploymentStore, McpServerStore};

/// HashMap-backed deployment store
#[derive(Default)]
pub struct InMemoryDeploymentStore {
    items: RwLock<HashMap<(String, String), Deployment>>,
}

impl InMemoryDeploymentStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Seed a record, as the enqueue boundary would have done
    pub async fn insert(&self, deployment: Deployment) {
        let key = (
            deployment.server_id.clone(),
            deployment.deployment_id.clone(),
        );
        self.items.write().await.insert(key, deployment);
    }
}

#[async_trait]
impl DeploymentStore for InMemoryDeploymentStore {
    async fn get(
        &self,
        server_id: &str,
        deployment_id: &str,
    ) -> Result<Option<Deployment>, BuildError> {
        let items = self.items.read().await;
        Ok(items
            .get(&(server_id.to_string(), deployment_id.to_string()))
            .cloned())
    }

    async fn update(&self, deployment: &Deployment) -> Result<(), BuildError> {
        let key = (
            deployment.server_id.clone(),
            deployment.deployment_id.clone(),
        );
        self.items.write().await.insert(key, deployment.clone());
        Ok(())
    }

    async fn update_status(
        &self,
        server_id: &str,
        deployment_id: &str,
        status: BuildStatus,
    ) -> Result<(), BuildError> {
        let mut items = self.items.write().await;
        let deployment = items
            .get_mut(&(server_id.to_string(), deployment_id.to_string()))
            .ok_or_else(|| {
                BuildError::NotFound(format!("deployment {}/{}", server_id, deployment_id))
            })?;
        deployment.status = status;
        deployment.updated_at = Utc::now();
        Ok(())
    }
}

/// HashMap-backed MCP server store
#[derive(Default)]
pub struct InMemoryMcpServerStore {
    items: RwLock<HashMap<String, McpServer>>,
}

impl InMemoryMcpServerStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub async fn insert(&self, server: McpServer) {
        self.items.write().await.insert(server.id.clone(), server);
    }
}

#[async_trait]
impl McpServerStore for InMemoryMcpServerStore {
    async fn get(&self, server_id: &str) -> Result<Option<McpServer>, BuildError> {
        let items = self.items.read().await;
        Ok(items.get(server_id).cloned())
    }

    async fn update(&self, server: &McpServer) -> Result<(), BuildError> {
        self.items
            .write()
            .await
            .insert(server.id.clone(), server.clone());
        Ok(())
    }
}

/// Fixed owner → token mapping
#[derive(Default)]
pub struct StaticCredentialSource {
    tokens: RwLock<HashMap<String, String>>,
}

impl StaticCredentialSource {
    pub fn new() -> Self {
        Self::default()
    }

    pub async fn insert(&self, owner_id: impl Into<String>, token: impl Into<String>) {
        self.tokens
            .write()
            .await
            .insert(owner_id.into(), token.into());
    }
}

#[async_trait]
impl CredentialSource for StaticCredentialSource {
    async fn credential_for(&self, owner_id: &str) -> Result<String, BuildError> {
        let tokens = self.tokens.read().await;
        tokens
            .get(owner_id)
            .cloned()
            .ok_or_else(|| BuildError::NotFound(format!("credential for owner {}", owner_id)))
    }
}

//! Persistence interfaces
//!
//! The core addresses its record store through these traits only; the
//! production implementation lives with the surrounding service. The
//! in-memory implementations back tests and local runs.

pub mod memory;

use async_trait::async_trait;

use crate::errors::BuildError;
use crate::models::deployment::{BuildStatus, Deployment};
use crate::models::mcp::McpServer;

/// Deployment records keyed by `(server_id, deployment_id)`
#[async_trait]
pub trait DeploymentStore: Send + Sync {
    async fn get(
        &self,
        server_id: &str,
        deployment_id: &str,
    ) -> Result<Option<Deployment>, BuildError>;

    async fn update(&self, deployment: &Deployment) -> Result<(), BuildError>;

    async fn update_status(
        &self,
        server_id: &str,
        deployment_id: &str,
        status: BuildStatus,
    ) -> Result<(), BuildError>;
}

/// MCP server records keyed by server id
#[async_trait]
pub trait McpServerStore: Send + Sync {
    async fn get(&self, server_id: &str) -> Result<Option<McpServer>, BuildError>;

    async fn update(&self, server: &McpServer) -> Result<(), BuildError>;
}

/// Resolves the source-repository credential for an owner.
///
/// The returned token is plaintext; encryption at rest is the provider's
/// concern.
#[async_trait]
pub trait CredentialSource: Send + Sync {
    async fn credential_for(&self, owner_id: &str) -> Result<String, BuildError>;
}

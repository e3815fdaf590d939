//! MCP server models

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// An environment variable attached to an MCP server
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EnvironmentVariable {
    pub key: String,
    pub value: String,
}

/// The persistent record for an MCP server
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct McpServer {
    pub id: String,

    pub owner_id: String,

    pub name: String,

    pub description: String,

    /// Source repository URL the server is built from
    pub repository: String,

    /// Lifecycle status, e.g. "active", "inactive", "deploying", "failed"
    pub status: String,

    pub environment_variables: Vec<EnvironmentVariable>,

    /// Registry namespace provisioned by the build pipeline; empty until
    /// the first successful create_registry stage
    pub registry_repository_name: String,

    pub registry_repository_uri: String,

    pub created_at: DateTime<Utc>,

    pub updated_at: DateTime<Utc>,
}

impl McpServer {
    pub fn new(
        id: impl Into<String>,
        owner_id: impl Into<String>,
        repository: impl Into<String>,
    ) -> Self {
        let now = Utc::now();
        Self {
            id: id.into(),
            owner_id: owner_id.into(),
            name: String::new(),
            description: String::new(),
            repository: repository.into(),
            status: "active".to_string(),
            environment_variables: Vec::new(),
            registry_repository_name: String::new(),
            registry_repository_uri: String::new(),
            created_at: now,
            updated_at: now,
        }
    }
}

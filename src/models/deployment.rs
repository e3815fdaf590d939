//! Deployment models

use std::collections::HashMap;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Lifecycle status of a deployment build
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum BuildStatus {
    Queued,
    InProgress,
    Completed,
    Failed,
}

/// Status of a single build stage
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum StageState {
    Pending,
    InProgress,
    Completed,
    Failed,
}

/// Per-stage progress record
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StageStatus {
    pub status: StageState,

    #[serde(skip_serializing_if = "Option::is_none")]
    pub started_at: Option<DateTime<Utc>>,

    #[serde(skip_serializing_if = "Option::is_none")]
    pub completed_at: Option<DateTime<Utc>>,

    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

impl StageStatus {
    pub fn pending() -> Self {
        Self {
            status: StageState::Pending,
            started_at: None,
            completed_at: None,
            error: None,
        }
    }
}

/// Severity of a build log entry
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum LogLevel {
    Info,
    Warning,
    Error,
}

/// A single entry in the structured build log
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LogEntry {
    pub timestamp: DateTime<Utc>,
    pub stage: String,
    pub level: LogLevel,
    pub message: String,
}

/// The persistent record representing one build attempt
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Deployment {
    pub server_id: String,
    pub deployment_id: String,
    pub owner_id: String,
    pub branch: String,
    pub commit_hash: String,
    pub status: BuildStatus,
    pub stages: HashMap<String, StageStatus>,
    pub logs: Vec<LogEntry>,
    pub image_uri: String,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl Deployment {
    /// Create a fresh deployment record in the queued state
    pub fn new(
        server_id: impl Into<String>,
        deployment_id: impl Into<String>,
        owner_id: impl Into<String>,
        branch: impl Into<String>,
        commit_hash: impl Into<String>,
    ) -> Self {
        let now = Utc::now();
        Self {
            server_id: server_id.into(),
            deployment_id: deployment_id.into(),
            owner_id: owner_id.into(),
            branch: branch.into(),
            commit_hash: commit_hash.into(),
            status: BuildStatus::Queued,
            stages: HashMap::new(),
            logs: Vec::new(),
            image_uri: String::new(),
            created_at: now,
            updated_at: now,
        }
    }
}

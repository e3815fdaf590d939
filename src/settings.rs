//! Environment-backed settings
//!
//! OS environment variables take precedence over `.env` values; the `.env`
//! file is loaded by the binary before `Settings::load` runs.

use std::path::PathBuf;

use crate::errors::BuildError;
use crate::logs::LogLevel;
use crate::pipeline::log_buffer::DEFAULT_LOG_BUDGET;

pub const DEFAULT_QUEUE_CAPACITY: usize = 100;
pub const DEFAULT_WORKER_COUNT: usize = 5;

/// Envelope parameters recognized by the build server
#[derive(Debug, Clone)]
pub struct Settings {
    /// Queue buffer size (`QUEUE_CAPACITY`)
    pub queue_capacity: usize,

    /// Worker pool size (`WORKER_COUNT`)
    pub worker_count: usize,

    /// Persisted build log budget in bytes (`LOG_BUDGET`)
    pub log_budget: usize,

    /// Parent directory for per-build working directories (`WORKDIR_ROOT`)
    pub workdir_root: PathBuf,

    /// Registry account identity (`REGISTRY_ACCOUNT_ID`)
    pub registry_account_id: String,

    /// Registry region (`REGISTRY_REGION`)
    pub registry_region: String,

    /// Process log level (`LOG_LEVEL`)
    pub log_level: LogLevel,
}

impl Settings {
    /// Load settings from the process environment
    pub fn load() -> Result<Self, BuildError> {
        Self::from_lookup(&|key| std::env::var(key).ok())
    }

    fn from_lookup(lookup: &dyn Fn(&str) -> Option<String>) -> Result<Self, BuildError> {
        let mut problems = Vec::new();

        let queue_capacity =
            parse_or_default(lookup, "QUEUE_CAPACITY", DEFAULT_QUEUE_CAPACITY, &mut problems);
        let worker_count =
            parse_or_default(lookup, "WORKER_COUNT", DEFAULT_WORKER_COUNT, &mut problems);
        let log_budget = parse_or_default(lookup, "LOG_BUDGET", DEFAULT_LOG_BUDGET, &mut problems);

        let workdir_root = lookup("WORKDIR_ROOT")
            .map(PathBuf::from)
            .unwrap_or_else(std::env::temp_dir);

        let registry_account_id = lookup("REGISTRY_ACCOUNT_ID").unwrap_or_default();
        let registry_region =
            lookup("REGISTRY_REGION").unwrap_or_else(|| "us-east-1".to_string());

        let log_level = match lookup("LOG_LEVEL") {
            Some(raw) => raw.parse().unwrap_or_else(|e| {
                problems.push(e);
                LogLevel::Info
            }),
            None => LogLevel::Info,
        };

        if queue_capacity == 0 {
            problems.push("QUEUE_CAPACITY must be at least 1".to_string());
        }
        if worker_count == 0 {
            problems.push("WORKER_COUNT must be at least 1".to_string());
        }

        if registry_account_id.is_empty() {
            problems.push("REGISTRY_ACCOUNT_ID is required".to_string());
        } else if registry_account_id.len() != 12
            || !registry_account_id.bytes().all(|b| b.is_ascii_digit())
        {
            problems.push(format!(
                "REGISTRY_ACCOUNT_ID must be exactly 12 digits (got '{}')",
                registry_account_id
            ));
        }

        if !problems.is_empty() {
            return Err(BuildError::ConfigError(format!(
                "invalid settings: {}",
                problems.join("; ")
            )));
        }

        Ok(Self {
            queue_capacity,
            worker_count,
            log_budget,
            workdir_root,
            registry_account_id,
            registry_region,
            log_level,
        })
    }
}

fn parse_or_default(
    lookup: &dyn Fn(&str) -> Option<String>,
    key: &str,
    default: usize,
    problems: &mut Vec<String>,
) -> usize {
    match lookup(key) {
        Some(raw) => match raw.parse() {
            Ok(value) => value,
            Err(_) => {
                problems.push(format!("{} must be an integer (got '{}')", key, raw));
                default
            }
        },
        None => default,
    }
}

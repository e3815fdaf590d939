//! Application configuration options

use std::time::Duration;

use crate::pipeline::PipelineOptions;
use crate::settings::{Settings, DEFAULT_QUEUE_CAPACITY, DEFAULT_WORKER_COUNT};

/// Main application options
#[derive(Debug, Clone)]
pub struct AppOptions {
    /// Queue buffer size
    pub queue_capacity: usize,

    /// Worker pool size
    pub worker_count: usize,

    /// Pipeline options
    pub pipeline: PipelineOptions,

    /// Registry identity
    pub registry: RegistryOptions,

    /// Lifecycle configuration
    pub lifecycle: LifecycleOptions,
}

impl Default for AppOptions {
    fn default() -> Self {
        Self {
            queue_capacity: DEFAULT_QUEUE_CAPACITY,
            worker_count: DEFAULT_WORKER_COUNT,
            pipeline: PipelineOptions::default(),
            registry: RegistryOptions::default(),
            lifecycle: LifecycleOptions::default(),
        }
    }
}

impl AppOptions {
    pub fn from_settings(settings: &Settings) -> Self {
        Self {
            queue_capacity: settings.queue_capacity,
            worker_count: settings.worker_count,
            pipeline: PipelineOptions {
                workdir_root: settings.workdir_root.clone(),
                log_budget: settings.log_budget,
            },
            registry: RegistryOptions {
                account_id: settings.registry_account_id.clone(),
                region: settings.registry_region.clone(),
            },
            lifecycle: LifecycleOptions::default(),
        }
    }
}

/// Registry identity options
#[derive(Debug, Clone)]
pub struct RegistryOptions {
    /// Account owning the registry namespace
    pub account_id: String,

    /// Registry region
    pub region: String,
}

impl Default for RegistryOptions {
    fn default() -> Self {
        Self {
            account_id: String::new(),
            region: "us-east-1".to_string(),
        }
    }
}

/// Lifecycle options for the server
#[derive(Debug, Clone)]
pub struct LifecycleOptions {
    /// How long a graceful drain may run before in-flight builds are
    /// cancelled
    pub max_shutdown_delay: Duration,
}

impl Default for LifecycleOptions {
    fn default() -> Self {
        Self {
            max_shutdown_delay: Duration::from_secs(30),
        }
    }
}

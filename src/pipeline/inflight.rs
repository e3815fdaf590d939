//! In-flight build registry
//!
//! Working directories derive from `(server_id, deployment_id)`, so two
//! concurrent builds of one key would race on the same path. The registry
//! refuses the second acquisition; the guard releases the key on drop,
//! whatever the exit path.

use std::collections::HashSet;
use std::sync::{Arc, Mutex};

/// Process-wide set of deployment keys currently being built
#[derive(Default)]
pub struct InflightRegistry {
    keys: Mutex<HashSet<String>>,
}

impl InflightRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Claim a deployment key. Returns `None` if a build for the key is
    /// already running.
    pub fn acquire(
        self: &Arc<Self>,
        server_id: &str,
        deployment_id: &str,
    ) -> Option<InflightGuard> {
        let key = format!("{}/{}", server_id, deployment_id);
        let mut keys = self.keys.lock().unwrap_or_else(|e| e.into_inner());
        if !keys.insert(key.clone()) {
            return None;
        }
        Some(InflightGuard {
            registry: self.clone(),
            key,
        })
    }
}

/// Releases the claimed key when dropped
pub struct InflightGuard {
    registry: Arc<InflightRegistry>,
    key: String,
}

impl Drop for InflightGuard {
    fn drop(&mut self) {
        let mut keys = self
            .registry
            .keys
            .lock()
            .unwrap_or_else(|e| e.into_inner());
        keys.remove(&self.key);
    }
}

//! Build stage ordering and transition tracking

use std::collections::HashMap;
use std::fmt;

use chrono::Utc;

use crate::errors::BuildError;
use crate::models::deployment::{StageState, StageStatus};

/// One of the six ordered pipeline stages
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Stage {
    Clone,
    ValidateConfig,
    ValidateDocker,
    BuildImage,
    CreateRegistry,
    PushImage,
}

impl Stage {
    /// Total stage order; a stage runs only after every earlier stage
    /// completed
    pub const ORDER: [Stage; 6] = [
        Stage::Clone,
        Stage::ValidateConfig,
        Stage::ValidateDocker,
        Stage::BuildImage,
        Stage::CreateRegistry,
        Stage::PushImage,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            Stage::Clone => "clone",
            Stage::ValidateConfig => "validate_config",
            Stage::ValidateDocker => "validate_docker",
            Stage::BuildImage => "build_image",
            Stage::CreateRegistry => "create_registry",
            Stage::PushImage => "push_image",
        }
    }
}

impl fmt::Display for Stage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Tracks stage transitions for one in-flight build.
///
/// Transitions are monotonic: `pending → in_progress → (completed | failed)`
/// with at most one stage in progress. Violations are programmer errors and
/// surface as `BuildError::Internal`.
pub struct StageTracker {
    stages: HashMap<String, StageStatus>,
    current: Option<Stage>,
}

impl StageTracker {
    /// Create a tracker with every stage pending
    pub fn new() -> Self {
        let mut stages = HashMap::with_capacity(Stage::ORDER.len());
        for stage in Stage::ORDER {
            stages.insert(stage.as_str().to_string(), StageStatus::pending());
        }
        Self {
            stages,
            current: None,
        }
    }

    /// The stage currently in progress, if any
    pub fn current(&self) -> Option<Stage> {
        self.current
    }

    /// Copy of the per-stage status map, keyed by stage name
    pub fn snapshot(&self) -> HashMap<String, StageStatus> {
        self.stages.clone()
    }

    pub fn state_of(&self, stage: Stage) -> StageState {
        self.stages[stage.as_str()].status
    }

    /// Transition a pending stage to in_progress
    pub fn begin(&mut self, stage: Stage) -> Result<(), BuildError> {
        if let Some(current) = self.current {
            return Err(BuildError::Internal(format!(
                "cannot begin stage {}: stage {} is still in progress",
                stage, current
            )));
        }
        if let Some(failed) = Stage::ORDER
            .iter()
            .find(|s| self.stages[s.as_str()].status == StageState::Failed)
        {
            return Err(BuildError::Internal(format!(
                "cannot begin stage {}: stage {} has failed",
                stage, failed
            )));
        }
        let entry = self.entry_mut(stage);
        if entry.status != StageState::Pending {
            return Err(BuildError::Internal(format!(
                "cannot begin stage {}: already {:?}",
                stage, entry.status
            )));
        }

        entry.status = StageState::InProgress;
        entry.started_at = Some(Utc::now());
        self.current = Some(stage);
        Ok(())
    }

    /// Transition the in-progress stage to completed
    pub fn complete(&mut self, stage: Stage) -> Result<(), BuildError> {
        self.finish(stage, StageState::Completed, None)
    }

    /// Transition the in-progress stage to failed, recording the error
    pub fn fail(&mut self, stage: Stage, error: &BuildError) -> Result<(), BuildError> {
        self.finish(stage, StageState::Failed, Some(error.to_string()))
    }

    fn finish(
        &mut self,
        stage: Stage,
        outcome: StageState,
        error: Option<String>,
    ) -> Result<(), BuildError> {
        if self.current != Some(stage) {
            return Err(BuildError::Internal(format!(
                "cannot finish stage {}: not in progress",
                stage
            )));
        }

        let entry = self.entry_mut(stage);
        entry.status = outcome;
        entry.completed_at = Some(Utc::now());
        entry.error = error;
        self.current = None;
        Ok(())
    }

    fn entry_mut(&mut self, stage: Stage) -> &mut StageStatus {
        self.stages
            .get_mut(stage.as_str())
            .expect("tracker seeded with every stage")
    }
}

impl Default for StageTracker {
    fn default() -> Self {
        Self::new()
    }
}

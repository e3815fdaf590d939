//! Build pipeline orchestration

pub mod inflight;
pub mod log_buffer;
pub mod stages;

use std::future::Future;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use chrono::Utc;
use tokio_util::sync::CancellationToken;
use tracing::{error, info, warn};

use crate::adapters::{
    ImageBuilder, ManifestValidator, RegistryClient, SourceFetcher, CONFIG_MANIFEST, DOCKERFILE,
};
use crate::errors::BuildError;
use crate::models::deployment::{BuildStatus, Deployment};
use crate::pipeline::inflight::InflightRegistry;
use crate::pipeline::log_buffer::{BuildLogBuffer, DEFAULT_LOG_BUDGET};
use crate::pipeline::stages::{Stage, StageTracker};
use crate::queue::BuildJob;
use crate::repository::{CredentialSource, DeploymentStore, McpServerStore};

/// Pipeline tuning knobs
#[derive(Debug, Clone)]
pub struct PipelineOptions {
    /// Parent directory for per-build working directories
    pub workdir_root: PathBuf,

    /// Byte budget for persisted build logs
    pub log_budget: usize,
}

impl Default for PipelineOptions {
    fn default() -> Self {
        Self {
            workdir_root: std::env::temp_dir(),
            log_budget: DEFAULT_LOG_BUDGET,
        }
    }
}

/// Stores and adapters the pipeline drives
pub struct PipelineDeps {
    pub deployments: Arc<dyn DeploymentStore>,
    pub mcp_servers: Arc<dyn McpServerStore>,
    pub credentials: Arc<dyn CredentialSource>,
    pub fetcher: Arc<dyn SourceFetcher>,
    pub validator: Arc<dyn ManifestValidator>,
    pub builder: Arc<dyn ImageBuilder>,
    pub registry: Arc<dyn RegistryClient>,
}

/// Name of the per-build working directory under the workdir root
pub fn workdir_name(server_id: &str, deployment_id: &str) -> String {
    format!("mcp-build-{}-{}", server_id, deployment_id)
}

fn image_name(job: &BuildJob, short_commit: &str) -> String {
    format!("{}:{}-{}", job.server_id, job.branch, short_commit)
}

/// Removes the working directory on every exit path
struct WorkDirGuard {
    path: PathBuf,
}

impl Drop for WorkDirGuard {
    fn drop(&mut self) {
        if self.path.exists() {
            if let Err(e) = std::fs::remove_dir_all(&self.path) {
                warn!(
                    "Failed to clean up working directory {}: {}",
                    self.path.display(),
                    e
                );
            }
        }
    }
}

/// Drives one build through the six stages, persisting progress after each
/// transition
pub struct Pipeline {
    deployments: Arc<dyn DeploymentStore>,
    mcp_servers: Arc<dyn McpServerStore>,
    credentials: Arc<dyn CredentialSource>,
    fetcher: Arc<dyn SourceFetcher>,
    validator: Arc<dyn ManifestValidator>,
    builder: Arc<dyn ImageBuilder>,
    registry: Arc<dyn RegistryClient>,
    options: PipelineOptions,
    inflight: Arc<InflightRegistry>,
}

impl Pipeline {
    pub fn new(deps: PipelineDeps, options: PipelineOptions) -> Self {
        Self {
            deployments: deps.deployments,
            mcp_servers: deps.mcp_servers,
            credentials: deps.credentials,
            fetcher: deps.fetcher,
            validator: deps.validator,
            builder: deps.builder,
            registry: deps.registry,
            options,
            inflight: Arc::new(InflightRegistry::new()),
        }
    }

    /// Execute the complete build pipeline for a job.
    ///
    /// Returns `Ok(())` only when every stage completed and the final record
    /// write succeeded; otherwise the originating error.
    pub async fn execute(
        &self,
        job: &BuildJob,
        cancel: &CancellationToken,
    ) -> Result<(), BuildError> {
        // Stage tags derive from the first 8 characters of the commit;
        // reject short hashes before touching the filesystem.
        let short_commit = match job.commit_hash.get(..8) {
            Some(prefix) => prefix.to_string(),
            None => {
                return Err(BuildError::ValidationError(format!(
                    "commit hash must be at least 8 characters (got {})",
                    job.commit_hash.len()
                )));
            }
        };

        let _inflight = self
            .inflight
            .acquire(&job.server_id, &job.deployment_id)
            .ok_or_else(|| {
                BuildError::ValidationError(format!(
                    "deployment {}/{} is already being built",
                    job.server_id, job.deployment_id
                ))
            })?;

        info!(
            deployment_id = %job.deployment_id,
            server_id = %job.server_id,
            "Executing build pipeline"
        );

        // Fresh buffer per execution so concurrent builds never interleave
        let logs = BuildLogBuffer::new(self.options.log_budget);
        let mut tracker = StageTracker::new();

        let mut deployment = self
            .deployments
            .get(&job.server_id, &job.deployment_id)
            .await?
            .ok_or_else(|| {
                BuildError::NotFound(format!(
                    "deployment {}/{}",
                    job.server_id, job.deployment_id
                ))
            })?;

        deployment.status = BuildStatus::InProgress;
        deployment.stages = tracker.snapshot();
        self.persist(&mut deployment, &logs).await?;

        let workdir = self
            .options
            .workdir_root
            .join(workdir_name(&job.server_id, &job.deployment_id));
        let _workdir = WorkDirGuard {
            path: workdir.clone(),
        };

        let result = self
            .run_stages(
                job,
                &short_commit,
                &mut deployment,
                &mut tracker,
                &logs,
                &workdir,
                cancel,
            )
            .await;

        match result {
            Ok(image_uri) => {
                deployment.status = BuildStatus::Completed;
                deployment.image_uri = image_uri;
                logs.info("finalize", "Build pipeline completed successfully");
                self.persist(&mut deployment, &logs).await.map_err(|e| {
                    error!(
                        deployment_id = %job.deployment_id,
                        error = %e,
                        "Failed to persist completed deployment"
                    );
                    e
                })?;
                Ok(())
            }
            Err(e) => {
                deployment.status = BuildStatus::Failed;
                if let Err(persist_err) = self.persist(&mut deployment, &logs).await {
                    error!(
                        deployment_id = %job.deployment_id,
                        error = %persist_err,
                        "Failed to persist failed deployment"
                    );
                }
                Err(e)
            }
        }
    }

    #[allow(clippy::too_many_arguments)]
    async fn run_stages(
        &self,
        job: &BuildJob,
        short_commit: &str,
        deployment: &mut Deployment,
        tracker: &mut StageTracker,
        logs: &BuildLogBuffer,
        workdir: &Path,
        cancel: &CancellationToken,
    ) -> Result<String, BuildError> {
        self.enter_stage(Stage::Clone, deployment, tracker, logs).await?;
        match guarded(cancel, Stage::Clone, self.stage_clone(job, logs, workdir)).await {
            Ok(()) => self.leave_stage(Stage::Clone, deployment, tracker, logs).await?,
            Err(e) => return self.abort_stage(Stage::Clone, e, deployment, tracker),
        }

        self.enter_stage(Stage::ValidateConfig, deployment, tracker, logs).await?;
        match guarded(
            cancel,
            Stage::ValidateConfig,
            self.stage_validate_config(logs, workdir),
        )
        .await
        {
            Ok(()) => {
                self.leave_stage(Stage::ValidateConfig, deployment, tracker, logs)
                    .await?
            }
            Err(e) => return self.abort_stage(Stage::ValidateConfig, e, deployment, tracker),
        }

        self.enter_stage(Stage::ValidateDocker, deployment, tracker, logs).await?;
        match guarded(
            cancel,
            Stage::ValidateDocker,
            self.stage_validate_docker(logs, workdir),
        )
        .await
        {
            Ok(()) => {
                self.leave_stage(Stage::ValidateDocker, deployment, tracker, logs)
                    .await?
            }
            Err(e) => return self.abort_stage(Stage::ValidateDocker, e, deployment, tracker),
        }

        self.enter_stage(Stage::BuildImage, deployment, tracker, logs).await?;
        match guarded(
            cancel,
            Stage::BuildImage,
            self.stage_build_image(job, short_commit, logs, workdir),
        )
        .await
        {
            Ok(()) => {
                self.leave_stage(Stage::BuildImage, deployment, tracker, logs)
                    .await?
            }
            Err(e) => return self.abort_stage(Stage::BuildImage, e, deployment, tracker),
        }

        self.enter_stage(Stage::CreateRegistry, deployment, tracker, logs).await?;
        let repo_name = match guarded(
            cancel,
            Stage::CreateRegistry,
            self.stage_create_registry(job, logs),
        )
        .await
        {
            Ok(name) => {
                self.leave_stage(Stage::CreateRegistry, deployment, tracker, logs)
                    .await?;
                name
            }
            Err(e) => return self.abort_stage(Stage::CreateRegistry, e, deployment, tracker),
        };

        // The registry side effect is authoritative; a failed catalog update
        // must not fail the build.
        if let Err(e) = self.update_mcp_registry_info(&job.server_id, &repo_name).await {
            logs.error(
                Stage::CreateRegistry.as_str(),
                format!("Failed to update MCP server with registry info: {}", e),
            );
            warn!(
                server_id = %job.server_id,
                error = %e,
                "Secondary registry-info write failed"
            );
        }

        self.enter_stage(Stage::PushImage, deployment, tracker, logs).await?;
        let image_uri = match guarded(
            cancel,
            Stage::PushImage,
            self.stage_push_image(job, short_commit, &repo_name, logs),
        )
        .await
        {
            Ok(uri) => {
                self.leave_stage(Stage::PushImage, deployment, tracker, logs)
                    .await?;
                uri
            }
            Err(e) => return self.abort_stage(Stage::PushImage, e, deployment, tracker),
        };

        Ok(image_uri)
    }

    async fn stage_clone(
        &self,
        job: &BuildJob,
        logs: &BuildLogBuffer,
        workdir: &Path,
    ) -> Result<(), BuildError> {
        logs.info(Stage::Clone.as_str(), "Starting repository clone");

        let mcp = self
            .mcp_servers
            .get(&job.server_id)
            .await?
            .ok_or_else(|| {
                logs.error(Stage::Clone.as_str(), "MCP server not found");
                BuildError::NotFound(format!("mcp server {}", job.server_id))
            })?;

        let credential = self
            .credentials
            .credential_for(&job.owner_id)
            .await
            .map_err(|e| {
                logs.error(
                    Stage::Clone.as_str(),
                    format!("Credential lookup failed: {}", e),
                );
                e
            })?;

        self.fetcher
            .fetch(
                &mcp.repository,
                &job.branch,
                &job.commit_hash,
                workdir,
                Some(&credential),
            )
            .await
            .map_err(|e| {
                logs.error(
                    Stage::Clone.as_str(),
                    format!("Repository clone failed: {}", e),
                );
                e
            })?;

        logs.info(
            Stage::Clone.as_str(),
            format!("Repository cloned successfully to {}", workdir.display()),
        );
        Ok(())
    }

    async fn stage_validate_config(
        &self,
        logs: &BuildLogBuffer,
        workdir: &Path,
    ) -> Result<(), BuildError> {
        logs.info(
            Stage::ValidateConfig.as_str(),
            format!("Validating {}", CONFIG_MANIFEST),
        );

        self.validator
            .validate_config(&workdir.join(CONFIG_MANIFEST))
            .await
            .map_err(|e| {
                logs.error(
                    Stage::ValidateConfig.as_str(),
                    format!("Config validation failed: {}", e),
                );
                e
            })?;

        logs.info(
            Stage::ValidateConfig.as_str(),
            format!("{} is valid", CONFIG_MANIFEST),
        );
        Ok(())
    }

    async fn stage_validate_docker(
        &self,
        logs: &BuildLogBuffer,
        workdir: &Path,
    ) -> Result<(), BuildError> {
        logs.info(
            Stage::ValidateDocker.as_str(),
            format!("Validating {}", DOCKERFILE),
        );

        self.validator
            .validate_dockerfile(&workdir.join(DOCKERFILE))
            .await
            .map_err(|e| {
                logs.error(
                    Stage::ValidateDocker.as_str(),
                    format!("Dockerfile validation failed: {}", e),
                );
                e
            })?;

        logs.info(
            Stage::ValidateDocker.as_str(),
            format!("{} is valid", DOCKERFILE),
        );
        Ok(())
    }

    async fn stage_build_image(
        &self,
        job: &BuildJob,
        short_commit: &str,
        logs: &BuildLogBuffer,
        workdir: &Path,
    ) -> Result<(), BuildError> {
        let image = image_name(job, short_commit);
        logs.info(
            Stage::BuildImage.as_str(),
            format!("Starting image build for {}", image),
        );

        let (output, result) = self.builder.build(workdir, &image).await;
        if !output.is_empty() {
            logs.info(Stage::BuildImage.as_str(), output);
        }

        result.map_err(|e| {
            logs.error(
                Stage::BuildImage.as_str(),
                format!("Image build failed: {}", e),
            );
            e
        })?;

        logs.info(
            Stage::BuildImage.as_str(),
            format!("Image built successfully: {}", image),
        );
        Ok(())
    }

    async fn stage_create_registry(
        &self,
        job: &BuildJob,
        logs: &BuildLogBuffer,
    ) -> Result<String, BuildError> {
        let repo_name = format!("mcp-{}", job.server_id);
        logs.info(
            Stage::CreateRegistry.as_str(),
            format!("Creating or verifying registry repository {}", repo_name),
        );

        let repo_name = self
            .registry
            .ensure_repository(&repo_name)
            .await
            .map_err(|e| {
                logs.error(
                    Stage::CreateRegistry.as_str(),
                    format!("Failed to create registry repository: {}", e),
                );
                e
            })?;

        logs.info(
            Stage::CreateRegistry.as_str(),
            format!(
                "Registry repository ready: {}",
                self.registry.repository_uri(&repo_name)
            ),
        );
        Ok(repo_name)
    }

    async fn stage_push_image(
        &self,
        job: &BuildJob,
        short_commit: &str,
        repo_name: &str,
        logs: &BuildLogBuffer,
    ) -> Result<String, BuildError> {
        logs.info(
            Stage::PushImage.as_str(),
            format!("Pushing image to registry repository {}", repo_name),
        );

        self.registry.authenticate().await.map_err(|e| {
            logs.error(
                Stage::PushImage.as_str(),
                format!("Registry authentication failed: {}", e),
            );
            e
        })?;

        let repo_uri = self.registry.repository_uri(repo_name);
        let image = image_name(job, short_commit);
        let tags = [
            format!("{}-{}", job.branch, short_commit),
            "latest".to_string(),
        ];

        for tag in &tags {
            let fully_qualified = format!("{}:{}", repo_uri, tag);
            self.registry
                .tag(&image, &fully_qualified)
                .await
                .map_err(|e| {
                    logs.error(
                        Stage::PushImage.as_str(),
                        format!("Failed to tag image as {}: {}", fully_qualified, e),
                    );
                    e
                })?;
        }

        for tag in &tags {
            let fully_qualified = format!("{}:{}", repo_uri, tag);
            self.registry.push(&fully_qualified).await.map_err(|e| {
                logs.error(
                    Stage::PushImage.as_str(),
                    format!("Failed to push {}: {}", fully_qualified, e),
                );
                e
            })?;
        }

        let image_uri = format!("{}:{}", repo_uri, tags[0]);
        logs.info(
            Stage::PushImage.as_str(),
            format!("Image pushed successfully: {}", image_uri),
        );
        Ok(image_uri)
    }

    async fn update_mcp_registry_info(
        &self,
        server_id: &str,
        repo_name: &str,
    ) -> Result<(), BuildError> {
        let mut mcp = self
            .mcp_servers
            .get(server_id)
            .await?
            .ok_or_else(|| BuildError::NotFound(format!("mcp server {}", server_id)))?;

        mcp.registry_repository_name = repo_name.to_string();
        mcp.registry_repository_uri = self.registry.repository_uri(repo_name);
        mcp.updated_at = Utc::now();
        self.mcp_servers.update(&mcp).await
    }

    async fn enter_stage(
        &self,
        stage: Stage,
        deployment: &mut Deployment,
        tracker: &mut StageTracker,
        logs: &BuildLogBuffer,
    ) -> Result<(), BuildError> {
        tracker.begin(stage)?;
        deployment.stages = tracker.snapshot();
        self.persist_best_effort(deployment, logs).await;
        Ok(())
    }

    async fn leave_stage(
        &self,
        stage: Stage,
        deployment: &mut Deployment,
        tracker: &mut StageTracker,
        logs: &BuildLogBuffer,
    ) -> Result<(), BuildError> {
        tracker.complete(stage)?;
        deployment.stages = tracker.snapshot();
        self.persist_best_effort(deployment, logs).await;
        Ok(())
    }

    fn abort_stage(
        &self,
        stage: Stage,
        err: BuildError,
        deployment: &mut Deployment,
        tracker: &mut StageTracker,
    ) -> Result<String, BuildError> {
        if let Err(tracker_err) = tracker.fail(stage, &err) {
            error!(stage = %stage, error = %tracker_err, "Stage tracker rejected failure transition");
        }
        deployment.stages = tracker.snapshot();
        Err(err)
    }

    async fn persist(
        &self,
        deployment: &mut Deployment,
        logs: &BuildLogBuffer,
    ) -> Result<(), BuildError> {
        deployment.logs = logs.bounded();
        deployment.updated_at = Utc::now();
        self.deployments.update(deployment).await
    }

    async fn persist_best_effort(&self, deployment: &mut Deployment, logs: &BuildLogBuffer) {
        if let Err(e) = self.persist(deployment, logs).await {
            warn!(
                deployment_id = %deployment.deployment_id,
                error = %e,
                "Intermediate deployment update failed"
            );
        }
    }
}

/// Race a stage against cancellation; a cancelled stage fails with a
/// `Cancelled` error and the caller's cleanup still runs
async fn guarded<T>(
    cancel: &CancellationToken,
    stage: Stage,
    fut: impl Future<Output = Result<T, BuildError>>,
) -> Result<T, BuildError> {
    tokio::select! {
        result = fut => result,
        _ = cancel.cancelled() => Err(BuildError::Cancelled(format!(
            "build cancelled during stage {}",
            stage
        ))),
    }
}

//! End-to-end pipeline scenarios with substituted adapters

use std::path::Path;
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use tokio_util::sync::CancellationToken;

use buildserver::adapters::{
    ImageBuilder, RegistryClient, SourceFetcher, YamlManifestValidator,
};
use buildserver::app::options::AppOptions;
use buildserver::app::run::BuildServer;
use buildserver::errors::BuildError;
use buildserver::models::deployment::{BuildStatus, Deployment, LogLevel, StageState};
use buildserver::models::mcp::McpServer;
use buildserver::pipeline::log_buffer::TRUNCATION_NOTICE;
use buildserver::pipeline::{workdir_name, Pipeline, PipelineDeps, PipelineOptions};
use buildserver::queue::BuildJob;
use buildserver::repository::memory::{
    InMemoryDeploymentStore, InMemoryMcpServerStore, StaticCredentialSource,
};
use buildserver::repository::{DeploymentStore, McpServerStore};

const COMMIT: &str = "a1b2c3d4e5f6g7h8";

/// Writes a fixed file set instead of cloning
struct FakeFetcher {
    files: Vec<(&'static str, &'static str)>,
}

impl FakeFetcher {
    fn complete_repo() -> Self {
        Self {
            files: vec![
                ("mhive.config.yaml", "name: my-server\nruntime: node\n"),
                ("Dockerfile", "FROM node:20\nCOPY . .\n"),
            ],
        }
    }

    fn without_config() -> Self {
        Self {
            files: vec![("Dockerfile", "FROM node:20\n")],
        }
    }
}

#[async_trait]
impl SourceFetcher for FakeFetcher {
    async fn fetch(
        &self,
        _repo_url: &str,
        _branch: &str,
        _commit: &str,
        target_dir: &Path,
        _credential: Option<&str>,
    ) -> Result<(), BuildError> {
        tokio::fs::create_dir_all(target_dir).await?;
        for (name, contents) in &self.files {
            tokio::fs::write(target_dir.join(name), contents).await?;
        }
        Ok(())
    }
}

/// Emits canned output with a configurable delay and outcome
struct FakeBuilder {
    output: String,
    fail: bool,
    delay: Duration,
}

impl Default for FakeBuilder {
    fn default() -> Self {
        Self {
            output: "Step 1/2 : FROM node:20\nSuccessfully built abc123\n".to_string(),
            fail: false,
            delay: Duration::ZERO,
        }
    }
}

#[async_trait]
impl ImageBuilder for FakeBuilder {
    async fn build(
        &self,
        _context_dir: &Path,
        image_name: &str,
    ) -> (String, Result<(), BuildError>) {
        if !self.delay.is_zero() {
            tokio::time::sleep(self.delay).await;
        }
        let result = if self.fail {
            Err(BuildError::AdapterError(format!(
                "docker build of {} failed (exit status: 1)",
                image_name
            )))
        } else {
            Ok(())
        };
        (self.output.clone(), result)
    }
}

/// Records tags and pushes without touching a registry
#[derive(Default)]
struct FakeRegistry {
    pushed: std::sync::Mutex<Vec<String>>,
}

#[async_trait]
impl RegistryClient for FakeRegistry {
    async fn ensure_repository(&self, name: &str) -> Result<String, BuildError> {
        Ok(name.to_string())
    }

    fn repository_uri(&self, name: &str) -> String {
        format!("123456789012.dkr.ecr.us-east-1.amazonaws.com/{}", name)
    }

    async fn authenticate(&self) -> Result<(), BuildError> {
        Ok(())
    }

    async fn tag(&self, _local: &str, _fully_qualified: &str) -> Result<(), BuildError> {
        Ok(())
    }

    async fn push(&self, fully_qualified: &str) -> Result<(), BuildError> {
        self.pushed
            .lock()
            .unwrap()
            .push(fully_qualified.to_string());
        Ok(())
    }

    async fn delete_image(&self, _name: &str, _tag: &str) -> Result<(), BuildError> {
        Ok(())
    }
}

/// Serves reads but refuses writes
struct ReadOnlyMcpStore {
    inner: InMemoryMcpServerStore,
}

#[async_trait]
impl McpServerStore for ReadOnlyMcpStore {
    async fn get(&self, server_id: &str) -> Result<Option<McpServer>, BuildError> {
        self.inner.get(server_id).await
    }

    async fn update(&self, _server: &McpServer) -> Result<(), BuildError> {
        Err(BuildError::PersistenceError(
            "conditional check failed".to_string(),
        ))
    }
}

/// Accepts every write except the terminal one
struct FailFinalWriteStore {
    inner: InMemoryDeploymentStore,
}

#[async_trait]
impl DeploymentStore for FailFinalWriteStore {
    async fn get(
        &self,
        server_id: &str,
        deployment_id: &str,
    ) -> Result<Option<Deployment>, BuildError> {
        self.inner.get(server_id, deployment_id).await
    }

    async fn update(&self, deployment: &Deployment) -> Result<(), BuildError> {
        if deployment.status == BuildStatus::Completed {
            return Err(BuildError::PersistenceError(
                "item size exceeded".to_string(),
            ));
        }
        self.inner.update(deployment).await
    }

    async fn update_status(
        &self,
        server_id: &str,
        deployment_id: &str,
        status: BuildStatus,
    ) -> Result<(), BuildError> {
        self.inner
            .update_status(server_id, deployment_id, status)
            .await
    }
}

struct Harness {
    deployments: Arc<InMemoryDeploymentStore>,
    mcp_servers: Arc<InMemoryMcpServerStore>,
    credentials: Arc<StaticCredentialSource>,
    workdir_root: tempfile::TempDir,
}

impl Harness {
    async fn new() -> Self {
        let harness = Self {
            deployments: Arc::new(InMemoryDeploymentStore::new()),
            mcp_servers: Arc::new(InMemoryMcpServerStore::new()),
            credentials: Arc::new(StaticCredentialSource::new()),
            workdir_root: tempfile::tempdir().unwrap(),
        };
        harness.credentials.insert("u1", "tok123").await;
        harness
            .mcp_servers
            .insert(McpServer::new("s1", "u1", "https://github.com/acme/server.git"))
            .await;
        harness
    }

    async fn seed_deployment(&self, deployment_id: &str) {
        self.deployments
            .insert(Deployment::new("s1", deployment_id, "u1", "main", COMMIT))
            .await;
    }

    fn options(&self) -> PipelineOptions {
        PipelineOptions {
            workdir_root: self.workdir_root.path().to_path_buf(),
            ..Default::default()
        }
    }

    fn pipeline(&self, fetcher: FakeFetcher, builder: FakeBuilder) -> Pipeline {
        Pipeline::new(
            PipelineDeps {
                deployments: self.deployments.clone(),
                mcp_servers: self.mcp_servers.clone(),
                credentials: self.credentials.clone(),
                fetcher: Arc::new(fetcher),
                validator: Arc::new(YamlManifestValidator),
                builder: Arc::new(builder),
                registry: Arc::new(FakeRegistry::default()),
            },
            self.options(),
        )
    }

    fn job(&self, deployment_id: &str) -> BuildJob {
        BuildJob {
            deployment_id: deployment_id.to_string(),
            server_id: "s1".to_string(),
            owner_id: "u1".to_string(),
            branch: "main".to_string(),
            commit_hash: COMMIT.to_string(),
        }
    }

    fn workdir_exists(&self, deployment_id: &str) -> bool {
        self.workdir_root
            .path()
            .join(workdir_name("s1", deployment_id))
            .exists()
    }
}

#[tokio::test]
async fn test_happy_path_completes_every_stage() {
    let harness = Harness::new().await;
    harness.seed_deployment("d1").await;
    let pipeline = harness.pipeline(FakeFetcher::complete_repo(), FakeBuilder::default());

    pipeline
        .execute(&harness.job("d1"), &CancellationToken::new())
        .await
        .unwrap();

    let deployment = harness.deployments.get("s1", "d1").await.unwrap().unwrap();
    assert_eq!(deployment.status, BuildStatus::Completed);
    for status in deployment.stages.values() {
        assert_eq!(status.status, StageState::Completed);
    }
    assert_eq!(
        deployment.image_uri,
        "123456789012.dkr.ecr.us-east-1.amazonaws.com/mcp-s1:main-a1b2c3d4"
    );
    assert!(deployment
        .logs
        .iter()
        .all(|e| e.message != TRUNCATION_NOTICE));
    assert!(!harness.workdir_exists("d1"));

    // The MCP record picked up the provisioned registry namespace
    let mcp = harness.mcp_servers.get("s1").await.unwrap().unwrap();
    assert_eq!(mcp.registry_repository_name, "mcp-s1");
    assert_eq!(
        mcp.registry_repository_uri,
        "123456789012.dkr.ecr.us-east-1.amazonaws.com/mcp-s1"
    );
}

#[tokio::test]
async fn test_missing_config_fails_validate_config_stage() {
    let harness = Harness::new().await;
    harness.seed_deployment("d1").await;
    let pipeline = harness.pipeline(FakeFetcher::without_config(), FakeBuilder::default());

    let err = pipeline
        .execute(&harness.job("d1"), &CancellationToken::new())
        .await
        .unwrap_err();
    assert!(matches!(err, BuildError::ValidationError(_)));

    let deployment = harness.deployments.get("s1", "d1").await.unwrap().unwrap();
    assert_eq!(deployment.status, BuildStatus::Failed);
    assert_eq!(deployment.stages["clone"].status, StageState::Completed);

    let failed = &deployment.stages["validate_config"];
    assert_eq!(failed.status, StageState::Failed);
    assert!(!failed.error.as_deref().unwrap_or_default().is_empty());

    for later in ["validate_docker", "build_image", "create_registry", "push_image"] {
        assert_eq!(deployment.stages[later].status, StageState::Pending);
    }
    assert_eq!(deployment.image_uri, "");
    assert!(!harness.workdir_exists("d1"));
}

#[tokio::test]
async fn test_secondary_registry_write_failure_does_not_fail_build() {
    let harness = Harness::new().await;
    harness.seed_deployment("d1").await;

    let mcp_servers = Arc::new(ReadOnlyMcpStore {
        inner: {
            let inner = InMemoryMcpServerStore::new();
            inner
                .insert(McpServer::new("s1", "u1", "https://github.com/acme/server.git"))
                .await;
            inner
        },
    });

    let pipeline = Pipeline::new(
        PipelineDeps {
            deployments: harness.deployments.clone(),
            mcp_servers,
            credentials: harness.credentials.clone(),
            fetcher: Arc::new(FakeFetcher::complete_repo()),
            validator: Arc::new(YamlManifestValidator),
            builder: Arc::new(FakeBuilder::default()),
            registry: Arc::new(FakeRegistry::default()),
        },
        harness.options(),
    );

    pipeline
        .execute(&harness.job("d1"), &CancellationToken::new())
        .await
        .unwrap();

    let deployment = harness.deployments.get("s1", "d1").await.unwrap().unwrap();
    assert_eq!(deployment.status, BuildStatus::Completed);
    assert_eq!(
        deployment.stages["create_registry"].status,
        StageState::Completed
    );
    assert!(deployment.logs.iter().any(|e| {
        e.stage == "create_registry"
            && e.level == LogLevel::Error
            && e.message.contains("registry info")
    }));
    assert!(!deployment.image_uri.is_empty());
}

#[tokio::test]
async fn test_short_commit_hash_rejected_before_any_stage() {
    let harness = Harness::new().await;
    harness.seed_deployment("d1").await;
    let pipeline = harness.pipeline(FakeFetcher::complete_repo(), FakeBuilder::default());

    let mut job = harness.job("d1");
    job.commit_hash = "a1b2c3d".to_string();

    let err = pipeline
        .execute(&job, &CancellationToken::new())
        .await
        .unwrap_err();
    assert!(matches!(err, BuildError::ValidationError(_)));

    // Untouched record, no working directory
    let deployment = harness.deployments.get("s1", "d1").await.unwrap().unwrap();
    assert_eq!(deployment.status, BuildStatus::Queued);
    assert!(deployment.stages.is_empty());
    assert!(!harness.workdir_exists("d1"));
}

#[tokio::test]
async fn test_unknown_deployment_is_not_found() {
    let harness = Harness::new().await;
    let pipeline = harness.pipeline(FakeFetcher::complete_repo(), FakeBuilder::default());

    let err = pipeline
        .execute(&harness.job("missing"), &CancellationToken::new())
        .await
        .unwrap_err();
    assert!(matches!(err, BuildError::NotFound(_)));
    assert!(!harness.workdir_exists("missing"));
}

#[tokio::test]
async fn test_oversized_build_output_is_truncated_in_record() {
    let harness = Harness::new().await;
    harness.seed_deployment("d1").await;

    let builder = FakeBuilder {
        output: "x".repeat(500 * 1024),
        ..Default::default()
    };
    let pipeline = harness.pipeline(FakeFetcher::complete_repo(), builder);

    pipeline
        .execute(&harness.job("d1"), &CancellationToken::new())
        .await
        .unwrap();

    let deployment = harness.deployments.get("s1", "d1").await.unwrap().unwrap();
    assert_eq!(deployment.status, BuildStatus::Completed);

    let notice = deployment.logs.last().unwrap();
    assert_eq!(notice.stage, "system");
    assert_eq!(notice.level, LogLevel::Warning);
    assert_eq!(notice.message, TRUNCATION_NOTICE);
}

#[tokio::test]
async fn test_failed_build_keeps_worker_output_and_cleans_workdir() {
    let harness = Harness::new().await;
    harness.seed_deployment("d1").await;

    let builder = FakeBuilder {
        fail: true,
        ..Default::default()
    };
    let pipeline = harness.pipeline(FakeFetcher::complete_repo(), builder);

    let err = pipeline
        .execute(&harness.job("d1"), &CancellationToken::new())
        .await
        .unwrap_err();
    assert!(matches!(err, BuildError::AdapterError(_)));

    let deployment = harness.deployments.get("s1", "d1").await.unwrap().unwrap();
    assert_eq!(deployment.status, BuildStatus::Failed);
    assert_eq!(deployment.stages["build_image"].status, StageState::Failed);
    // The tool output is captured even though the build failed
    assert!(deployment
        .logs
        .iter()
        .any(|e| e.stage == "build_image" && e.message.contains("Step 1/2")));
    assert!(!harness.workdir_exists("d1"));
}

#[tokio::test]
async fn test_failed_final_write_fails_the_build() {
    let harness = Harness::new().await;

    let deployments = Arc::new(FailFinalWriteStore {
        inner: {
            let inner = InMemoryDeploymentStore::new();
            inner
                .insert(Deployment::new("s1", "d1", "u1", "main", COMMIT))
                .await;
            inner
        },
    });

    let pipeline = Pipeline::new(
        PipelineDeps {
            deployments,
            mcp_servers: harness.mcp_servers.clone(),
            credentials: harness.credentials.clone(),
            fetcher: Arc::new(FakeFetcher::complete_repo()),
            validator: Arc::new(YamlManifestValidator),
            builder: Arc::new(FakeBuilder::default()),
            registry: Arc::new(FakeRegistry::default()),
        },
        harness.options(),
    );

    let err = pipeline
        .execute(&harness.job("d1"), &CancellationToken::new())
        .await
        .unwrap_err();
    assert!(matches!(err, BuildError::PersistenceError(_)));
}

#[tokio::test]
async fn test_cancellation_fails_stage_and_cleans_up() {
    let harness = Harness::new().await;
    harness.seed_deployment("d1").await;

    let builder = FakeBuilder {
        delay: Duration::from_secs(30),
        ..Default::default()
    };
    let pipeline = Arc::new(harness.pipeline(FakeFetcher::complete_repo(), builder));

    let cancel = CancellationToken::new();
    let execution = {
        let pipeline = pipeline.clone();
        let job = harness.job("d1");
        let cancel = cancel.clone();
        tokio::spawn(async move { pipeline.execute(&job, &cancel).await })
    };

    tokio::time::sleep(Duration::from_millis(100)).await;
    cancel.cancel();

    let err = execution.await.unwrap().unwrap_err();
    assert!(matches!(err, BuildError::Cancelled(_)));

    let deployment = harness.deployments.get("s1", "d1").await.unwrap().unwrap();
    assert_eq!(deployment.status, BuildStatus::Failed);
    assert_eq!(deployment.stages["build_image"].status, StageState::Failed);
    assert!(!harness.workdir_exists("d1"));
}

#[tokio::test]
async fn test_duplicate_concurrent_execution_is_refused() {
    let harness = Harness::new().await;
    harness.seed_deployment("d1").await;

    let builder = FakeBuilder {
        delay: Duration::from_millis(300),
        ..Default::default()
    };
    let pipeline = Arc::new(harness.pipeline(FakeFetcher::complete_repo(), builder));

    let first = {
        let pipeline = pipeline.clone();
        let job = harness.job("d1");
        tokio::spawn(async move { pipeline.execute(&job, &CancellationToken::new()).await })
    };

    tokio::time::sleep(Duration::from_millis(100)).await;
    let second = pipeline
        .execute(&harness.job("d1"), &CancellationToken::new())
        .await;
    assert!(matches!(second, Err(BuildError::ValidationError(_))));

    first.await.unwrap().unwrap();
}

#[tokio::test]
async fn test_graceful_shutdown_drains_buffered_jobs() {
    let harness = Harness::new().await;
    for i in 1..=7 {
        harness.seed_deployment(&format!("d{}", i)).await;
    }

    let deps = PipelineDeps {
        deployments: harness.deployments.clone(),
        mcp_servers: harness.mcp_servers.clone(),
        credentials: harness.credentials.clone(),
        fetcher: Arc::new(FakeFetcher::complete_repo()),
        validator: Arc::new(YamlManifestValidator),
        builder: Arc::new(FakeBuilder {
            delay: Duration::from_millis(20),
            ..Default::default()
        }),
        registry: Arc::new(FakeRegistry::default()),
    };
    let options = AppOptions {
        queue_capacity: 10,
        worker_count: 2,
        pipeline: harness.options(),
        ..Default::default()
    };

    let server = BuildServer::start(&options, deps);
    for i in 1..=7 {
        server.enqueue(harness.job(&format!("d{}", i))).await.unwrap();
    }

    let queue = server.queue();
    server.shutdown().await.unwrap();

    assert!(matches!(
        queue.enqueue(harness.job("d1")).await,
        Err(BuildError::QueueClosed)
    ));

    for i in 1..=7 {
        let deployment = harness
            .deployments
            .get("s1", &format!("d{}", i))
            .await
            .unwrap()
            .unwrap();
        assert_eq!(
            deployment.status,
            BuildStatus::Completed,
            "deployment d{} not drained",
            i
        );
    }
}

#[tokio::test]
async fn test_one_failing_build_does_not_affect_others() {
    let harness = Harness::new().await;
    harness.seed_deployment("d1").await;
    harness.seed_deployment("d2").await;

    // d1 has no credential owner; d2 is fine
    let deps = PipelineDeps {
        deployments: harness.deployments.clone(),
        mcp_servers: harness.mcp_servers.clone(),
        credentials: harness.credentials.clone(),
        fetcher: Arc::new(FakeFetcher::complete_repo()),
        validator: Arc::new(YamlManifestValidator),
        builder: Arc::new(FakeBuilder::default()),
        registry: Arc::new(FakeRegistry::default()),
    };
    let options = AppOptions {
        queue_capacity: 10,
        worker_count: 1,
        pipeline: harness.options(),
        ..Default::default()
    };

    let server = BuildServer::start(&options, deps);

    let mut bad_job = harness.job("d1");
    bad_job.owner_id = "unknown-owner".to_string();
    server.enqueue(bad_job).await.unwrap();
    server.enqueue(harness.job("d2")).await.unwrap();
    server.shutdown().await.unwrap();

    let failed = harness.deployments.get("s1", "d1").await.unwrap().unwrap();
    assert_eq!(failed.status, BuildStatus::Failed);
    assert_eq!(failed.stages["clone"].status, StageState::Failed);

    let completed = harness.deployments.get("s1", "d2").await.unwrap().unwrap();
    assert_eq!(completed.status, BuildStatus::Completed);
}

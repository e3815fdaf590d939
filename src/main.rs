//! MCP Build Server - Entry Point
//!
//! Accepts build jobs for MCP server deployments and drives them through
//! the clone → validate → build → registry → push pipeline.

use std::sync::Arc;

use buildserver::adapters::{DockerCli, EcrRegistry, GitFetcher, YamlManifestValidator};
use buildserver::app::options::AppOptions;
use buildserver::app::run::run;
use buildserver::logs::{init_logging, LogOptions};
use buildserver::pipeline::PipelineDeps;
use buildserver::repository::memory::{
    InMemoryDeploymentStore, InMemoryMcpServerStore, StaticCredentialSource,
};
use buildserver::settings::Settings;

use tracing::{error, info};

#[tokio::main]
async fn main() {
    dotenvy::dotenv().ok();

    let settings = match Settings::load() {
        Ok(settings) => settings,
        Err(e) => {
            eprintln!("Invalid configuration: {e}");
            std::process::exit(1);
        }
    };

    let log_options = LogOptions {
        log_level: settings.log_level.clone(),
        ..Default::default()
    };
    if let Err(e) = init_logging(log_options) {
        println!("Failed to initialize logging: {e}");
    }

    let options = AppOptions::from_settings(&settings);

    let registry =
        EcrRegistry::new(&options.registry.account_id, &options.registry.region).await;

    // The production record store and credential provider are supplied by
    // the embedding service; in-memory implementations back a standalone
    // run.
    let deps = PipelineDeps {
        deployments: Arc::new(InMemoryDeploymentStore::new()),
        mcp_servers: Arc::new(InMemoryMcpServerStore::new()),
        credentials: Arc::new(StaticCredentialSource::new()),
        fetcher: Arc::new(GitFetcher),
        validator: Arc::new(YamlManifestValidator),
        builder: Arc::new(DockerCli),
        registry: Arc::new(registry),
    };

    info!("Running build server with options: {:?}", options);
    if let Err(e) = run(options, deps, await_shutdown_signal()).await {
        error!("Failed to run the build server: {e}");
    }
}

async fn await_shutdown_signal() {
    #[cfg(unix)]
    {
        use tokio::signal::unix::{signal, SignalKind};
        let mut sigterm = signal(SignalKind::terminate()).expect("failed to install SIGTERM handler");
        let mut sigint = signal(SignalKind::interrupt()).expect("failed to install SIGINT handler");

        tokio::select! {
            _ = sigterm.recv() => {
                info!("SIGTERM received, shutting down...");
            }
            _ = sigint.recv() => {
                info!("SIGINT received, shutting down...");
            }
            _ = tokio::signal::ctrl_c() => {
                info!("Ctrl+C received, shutting down...");
            }
        }
    }

    #[cfg(not(unix))]
    {
        tokio::signal::ctrl_c()
            .await
            .expect("Failed to listen for Ctrl+C");
        info!("Ctrl+C received, shutting down...");
    }
}

//! Container image operations via the docker CLI

use std::path::Path;
use std::process::Stdio;

use async_trait::async_trait;
use tokio::io::AsyncWriteExt;
use tokio::process::Command;
use tracing::{debug, info};

use crate::errors::BuildError;

/// Builds a container image from a context directory.
///
/// `build` returns the tool's combined stdout and stderr alongside the
/// outcome so callers can record the output even when the build fails.
#[async_trait]
pub trait ImageBuilder: Send + Sync {
    async fn build(&self, context_dir: &Path, image_name: &str)
        -> (String, Result<(), BuildError>);
}

/// Shells out to the docker CLI for build, tag, push and login
pub struct DockerCli;

impl DockerCli {
    /// Tag a local image with a fully qualified reference
    pub async fn tag(&self, local: &str, fully_qualified: &str) -> Result<(), BuildError> {
        debug!(local, fully_qualified, "Tagging image");

        let status = Command::new("docker")
            .args(["tag", local, fully_qualified])
            .status()
            .await
            .map_err(|e| BuildError::AdapterError(format!("failed to run docker tag: {}", e)))?;

        if !status.success() {
            return Err(BuildError::AdapterError(format!(
                "docker tag {} as {} failed ({})",
                local, fully_qualified, status
            )));
        }
        Ok(())
    }

    /// Push a fully qualified image reference
    pub async fn push(&self, fully_qualified: &str) -> Result<(), BuildError> {
        info!(fully_qualified, "Pushing image");

        let status = Command::new("docker")
            .args(["push", fully_qualified])
            .kill_on_drop(true)
            .status()
            .await
            .map_err(|e| BuildError::AdapterError(format!("failed to run docker push: {}", e)))?;

        if !status.success() {
            return Err(BuildError::AdapterError(format!(
                "docker push {} failed ({})",
                fully_qualified, status
            )));
        }
        Ok(())
    }

    /// Log in to a registry endpoint, feeding the password over stdin
    pub async fn login(
        &self,
        username: &str,
        password: &str,
        endpoint: &str,
    ) -> Result<(), BuildError> {
        debug!(endpoint, "Logging in to registry");

        let mut child = Command::new("docker")
            .args(["login", "-u", username, "--password-stdin", endpoint])
            .stdin(Stdio::piped())
            .stdout(Stdio::null())
            .stderr(Stdio::null())
            .spawn()
            .map_err(|e| BuildError::AdapterError(format!("failed to run docker login: {}", e)))?;

        if let Some(mut stdin) = child.stdin.take() {
            stdin
                .write_all(password.as_bytes())
                .await
                .map_err(|e| BuildError::AdapterError(format!("docker login stdin: {}", e)))?;
        }

        let output = child
            .wait_with_output()
            .await
            .map_err(|e| BuildError::AdapterError(format!("failed to run docker login: {}", e)))?;

        if !output.status.success() {
            return Err(BuildError::AdapterError(format!(
                "docker login to {} failed ({})",
                endpoint, output.status
            )));
        }
        Ok(())
    }
}

#[async_trait]
impl ImageBuilder for DockerCli {
    async fn build(
        &self,
        context_dir: &Path,
        image_name: &str,
    ) -> (String, Result<(), BuildError>) {
        info!(image_name, "Building image from {}", context_dir.display());

        let output = match Command::new("docker")
            .args(["build", "-t", image_name])
            .arg(context_dir)
            .kill_on_drop(true)
            .output()
            .await
        {
            Ok(output) => output,
            Err(e) => {
                return (
                    String::new(),
                    Err(BuildError::AdapterError(format!(
                        "failed to run docker build: {}",
                        e
                    ))),
                );
            }
        };

        let mut combined = String::from_utf8_lossy(&output.stdout).into_owned();
        combined.push_str(&String::from_utf8_lossy(&output.stderr));

        let result = if output.status.success() {
            Ok(())
        } else {
            Err(BuildError::AdapterError(format!(
                "docker build of {} failed ({})",
                image_name, output.status
            )))
        };

        (combined, result)
    }
}

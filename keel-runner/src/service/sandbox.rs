//! Container sandbox
//!
//! The [`Sandbox`] trait is the seam between job execution and the container
//! runtime. [`DockerSandbox`] talks to the local Docker daemon.

use anyhow::{Context, Result};
use async_trait::async_trait;
use bollard::Docker;
use bollard::container::{
    AttachContainerOptions, AttachContainerResults, Config, CreateContainerOptions,
    RemoveContainerOptions, StartContainerOptions, WaitContainerOptions,
};
use bollard::image::CreateImageOptions;
use bollard::models::HostConfig;
use futures::StreamExt;
use futures::stream::BoxStream;

use super::plan::SandboxSpec;

/// Raw output of a sandbox, stdout and stderr interleaved
pub type OutputStream = BoxStream<'static, Result<Vec<u8>>>;

#[async_trait]
pub trait Sandbox: Send + Sync {
    async fn pull(&self, image: &str) -> Result<()>;

    /// Create the sandbox without starting it. Returns its id.
    async fn create(&self, spec: &SandboxSpec) -> Result<String>;

    /// Attach to the combined output. Must be called before `start`.
    async fn attach(&self, id: &str) -> Result<OutputStream>;

    async fn start(&self, id: &str) -> Result<()>;

    /// Block until the sandbox exits and return its exit code
    async fn wait(&self, id: &str) -> Result<i64>;

    async fn remove(&self, id: &str) -> Result<()>;
}

/// Local Docker sandbox
pub struct DockerSandbox {
    docker: Docker,
}

impl DockerSandbox {
    /// Connect to the local Docker daemon
    pub fn connect() -> Result<Self> {
        let docker =
            Docker::connect_with_local_defaults().context("Failed to connect to Docker")?;
        Ok(Self { docker })
    }
}

#[async_trait]
impl Sandbox for DockerSandbox {
    async fn pull(&self, image: &str) -> Result<()> {
        tracing::info!(image, "Pulling image");
        let options = CreateImageOptions {
            from_image: image.to_string(),
            ..Default::default()
        };

        let mut progress = self.docker.create_image(Some(options), None, None);
        while let Some(update) = progress.next().await {
            let info = update.with_context(|| format!("Failed to pull image {}", image))?;
            if let Some(status) = info.status {
                tracing::debug!(status = %status, "Pull progress");
            }
        }

        Ok(())
    }

    async fn create(&self, spec: &SandboxSpec) -> Result<String> {
        let options = CreateContainerOptions {
            name: spec.name.clone(),
            platform: None,
        };

        let config = Config {
            image: Some(spec.image.clone()),
            cmd: Some(spec.cmd.clone()),
            env: Some(spec.env.clone()),
            working_dir: Some(spec.working_dir.clone()),
            attach_stdin: Some(false),
            attach_stdout: Some(true),
            attach_stderr: Some(true),
            open_stdin: Some(false),
            tty: Some(false),
            host_config: Some(HostConfig {
                binds: Some(spec.binds.clone()),
                ..Default::default()
            }),
            ..Default::default()
        };

        let created = self
            .docker
            .create_container(Some(options), config)
            .await
            .with_context(|| format!("Failed to create container {}", spec.name))?;

        for warning in &created.warnings {
            tracing::warn!(container = %spec.name, "Docker warning: {}", warning);
        }

        Ok(created.id)
    }

    async fn attach(&self, id: &str) -> Result<OutputStream> {
        let options = AttachContainerOptions::<String> {
            stdout: Some(true),
            stderr: Some(true),
            stream: Some(true),
            logs: Some(true),
            ..Default::default()
        };

        let AttachContainerResults { output, .. } = self
            .docker
            .attach_container(id, Some(options))
            .await
            .with_context(|| format!("Failed to attach to container {}", id))?;

        Ok(output
            .map(|frame| {
                frame
                    .map(|log| log.into_bytes().to_vec())
                    .context("Container output stream failed")
            })
            .boxed())
    }

    async fn start(&self, id: &str) -> Result<()> {
        self.docker
            .start_container(id, None::<StartContainerOptions<String>>)
            .await
            .with_context(|| format!("Failed to start container {}", id))
    }

    async fn wait(&self, id: &str) -> Result<i64> {
        let options = WaitContainerOptions {
            condition: "not-running",
        };

        let mut stream = self.docker.wait_container(id, Some(options));
        match stream.next().await {
            Some(Ok(response)) => Ok(response.status_code),
            // Non-zero exits are reported as an error carrying the code
            Some(Err(bollard::errors::Error::DockerContainerWaitError { code, .. })) => Ok(code),
            Some(Err(e)) => Err(e).with_context(|| format!("Failed to wait for container {}", id)),
            None => anyhow::bail!("Wait stream for container {} ended without a status", id),
        }
    }

    async fn remove(&self, id: &str) -> Result<()> {
        let options = RemoveContainerOptions {
            force: true,
            ..Default::default()
        };

        self.docker
            .remove_container(id, Some(options))
            .await
            .with_context(|| format!("Failed to remove container {}", id))
    }
}

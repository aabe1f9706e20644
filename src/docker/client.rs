use anyhow::{Context, Result};
use bollard::{Docker, API_DEFAULT_VERSION};
use tracing::info;

/// Connection to the local container engine.
pub struct DockerClient {
    docker: Docker,
}

impl DockerClient {
    pub async fn connect(socket_path: Option<&str>) -> Result<Self> {
        let docker = if let Some(socket) = socket_path {
            Docker::connect_with_socket(socket, 120, API_DEFAULT_VERSION)?
        } else {
            Docker::connect_with_socket_defaults()?
        };

        // Test connection
        let version = docker
            .version()
            .await
            .context("Failed to connect to Docker daemon")?;

        info!(
            "Connected to Docker daemon version: {}",
            version.version.unwrap_or_default()
        );

        Ok(Self { docker })
    }

    pub fn into_inner(self) -> Docker {
        self.docker
    }
}

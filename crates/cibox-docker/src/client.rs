//! Docker client wrapper

use std::time::Duration;

use bollard::Docker;
use tracing::info;

use crate::container::{ContainerManager, ContainerSpec, DockerContainer};
use crate::error::Result;
use crate::image::ImageManager;
use crate::types::PullPolicy;

/// Docker service configuration
#[derive(Debug, Clone)]
pub struct DockerConfig {
    /// Socket path (None for default)
    pub socket_path: Option<String>,
    /// Request timeout for daemon calls
    pub timeout: Duration,
}

impl Default for DockerConfig {
    fn default() -> Self {
        Self { socket_path: None, timeout: Duration::from_secs(120) }
    }
}

/// High-level Docker service wrapper
pub struct DockerService {
    client: Docker,
}

impl DockerService {
    /// Connect to the daemon and verify it answers
    pub async fn new(config: DockerConfig) -> Result<Self> {
        let client = match &config.socket_path {
            Some(path) => Docker::connect_with_socket(
                path,
                config.timeout.as_secs(),
                bollard::API_DEFAULT_VERSION,
            ),
            None => Docker::connect_with_local_defaults(),
        }?;

        // Test connection
        client.ping().await?;

        Ok(Self { client })
    }

    /// Get the underlying Docker client
    pub fn client(&self) -> &Docker {
        &self.client
    }

    /// Pull the image as needed, then create and start a container for a build
    pub async fn provision(&self, spec: &ContainerSpec, pull: PullPolicy) -> Result<DockerContainer> {
        ImageManager::new(&self.client).ensure(&spec.image, pull).await?;

        let id = ContainerManager::new(&self.client).run(spec).await?;
        info!("Provisioned build container from {}", spec.image);

        Ok(DockerContainer::new(self.client.clone(), id))
    }
}

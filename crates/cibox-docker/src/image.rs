//! Docker image management

use std::collections::HashMap;

use bollard::image::{CreateImageOptions, ListImagesOptions};
use futures::StreamExt;
use tracing::{debug, info};

use crate::error::{DockerError, Result};
use crate::types::PullPolicy;

/// Docker image manager
pub struct ImageManager<'a> {
    client: &'a bollard::Docker,
}

impl<'a> ImageManager<'a> {
    /// Create a new image manager
    pub fn new(client: &'a bollard::Docker) -> Self {
        Self { client }
    }

    /// Pull an image from registry
    pub async fn pull(&self, image: &str) -> Result<()> {
        let options = CreateImageOptions { from_image: image, ..Default::default() };

        info!("Pulling Docker image: {}", image);

        let mut stream = self.client.create_image(Some(options), None, None);

        while let Some(info) = stream.next().await {
            match info {
                Ok(output) => {
                    if let Some(status) = output.status {
                        debug!("Pull status: {}", status);
                    }
                    if let Some(error) = output.error {
                        return Err(DockerError::PullFailed {
                            image: image.to_string(),
                            reason: error,
                        });
                    }
                }
                Err(e) => {
                    return Err(DockerError::PullFailed {
                        image: image.to_string(),
                        reason: e.to_string(),
                    });
                }
            }
        }

        info!("Successfully pulled image: {}", image);
        Ok(())
    }

    /// Check if image exists locally
    pub async fn exists(&self, image: &str) -> Result<bool> {
        let filters = HashMap::from([("reference", vec![image])]);
        let options = ListImagesOptions { all: false, filters, ..Default::default() };

        let images = self.client.list_images(Some(options)).await?;

        Ok(!images.is_empty())
    }

    /// Make the image available according to the pull policy
    pub async fn ensure(&self, image: &str, policy: PullPolicy) -> Result<()> {
        match policy {
            PullPolicy::Always => self.pull(image).await,
            PullPolicy::IfNotPresent => {
                if self.exists(image).await? {
                    debug!("Image {} already present", image);
                    Ok(())
                } else {
                    self.pull(image).await
                }
            }
            PullPolicy::Never => Ok(()),
        }
    }
}

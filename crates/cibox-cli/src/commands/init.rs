//! Init command implementation

use std::path::PathBuf;

use cibox_config::STARTER_CONFIG;
use color_eyre::eyre::{Context, Result};
use tracing::info;

/// Init command implementation
pub struct InitCommand {
    output_path: PathBuf,
    force: bool,
}

impl InitCommand {
    pub fn new(output_path: PathBuf, force: bool) -> Self {
        Self { output_path, force }
    }

    pub async fn execute(&self) -> Result<()> {
        info!("Initializing configuration file at {}", self.output_path.display());

        if self.output_path.exists() && !self.force {
            return Err(color_eyre::eyre::eyre!(
                "Configuration file already exists: {}. Use --force to overwrite.",
                self.output_path.display()
            ));
        }

        tokio::fs::write(&self.output_path, STARTER_CONFIG)
            .await
            .with_context(|| format!("Failed to write config to {}", self.output_path.display()))?;

        println!("✓ Created configuration file: {}", self.output_path.display());
        println!("\nNext steps:");
        println!("1. Edit the image and steps to match your project");
        println!(
            "2. Run 'cibox validate -c {}' to validate the configuration",
            self.output_path.display()
        );
        println!("3. Run 'cibox run -c {}' to run the build", self.output_path.display());

        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use tempfile::TempDir;

    use super::*;

    #[tokio::test]
    async fn test_init_writes_starter_config() {
        let temp_dir = TempDir::new().unwrap();
        let path = temp_dir.path().join("cibox.yaml");

        InitCommand::new(path.clone(), false).execute().await.unwrap();
        assert_eq!(std::fs::read_to_string(&path).unwrap(), STARTER_CONFIG);
    }

    #[tokio::test]
    async fn test_init_refuses_to_overwrite() {
        let temp_dir = TempDir::new().unwrap();
        let path = temp_dir.path().join("cibox.yaml");
        std::fs::write(&path, "image: mine\n").unwrap();

        assert!(InitCommand::new(path.clone(), false).execute().await.is_err());
        assert_eq!(std::fs::read_to_string(&path).unwrap(), "image: mine\n");

        InitCommand::new(path.clone(), true).execute().await.unwrap();
        assert_eq!(std::fs::read_to_string(&path).unwrap(), STARTER_CONFIG);
    }
}

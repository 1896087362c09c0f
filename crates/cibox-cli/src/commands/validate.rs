//! Validate command implementation

use std::path::PathBuf;

use cibox_build::{Step, StepFactory, StepList};
use cibox_config::Config;
use cibox_docker::{DockerConfig, DockerService};
use color_eyre::eyre::{Context, Result};
use tracing::{error, info};

/// Validate command implementation
pub struct ValidateCommand {
    config_path: PathBuf,
    check_docker: bool,
}

impl ValidateCommand {
    pub fn new(config_path: PathBuf, check_docker: bool) -> Self {
        Self { config_path, check_docker }
    }

    pub async fn execute(&self) -> Result<()> {
        info!("Validating configuration");

        let config = Config::from_file(&self.config_path).with_context(|| {
            format!("Failed to load config from {}", self.config_path.display())
        })?;

        println!("✓ Configuration loaded successfully");
        println!("✓ Image: {} (pull: {:?})", config.image, config.pull);
        for volume in &config.volumes {
            println!("✓ Volume: {} -> {}", volume.source.display(), volume.target);
        }

        let root = StepFactory::new()
            .create_list(&config.name, &config.steps)
            .context("Invalid step declarations")?;

        println!("✓ {} steps declared:", count_steps(&root));
        print_tree(&root, 1);

        if self.check_docker {
            info!("Checking Docker availability");
            match DockerService::new(DockerConfig::default()).await {
                Ok(_) => println!("✓ Docker is available"),
                Err(e) => {
                    error!("Docker check failed: {}", e);
                    return Err(e).context("Docker availability check failed");
                }
            }
        }

        println!("\n✓ All validation checks passed!");
        Ok(())
    }
}

/// Number of leaf steps in a tree
fn count_steps(step: &dyn Step) -> usize {
    match step.as_any().downcast_ref::<StepList>() {
        Some(list) => list.steps().iter().map(|child| count_steps(child.as_ref())).sum(),
        None => 1,
    }
}

fn print_tree(list: &StepList, depth: usize) {
    for child in list.steps() {
        let core = child.core();
        println!("{}- {} [{}]", "  ".repeat(depth), core.name(), core.plugin());
        if let Some(nested) = child.as_any().downcast_ref::<StepList>() {
            print_tree(nested, depth + 1);
        }
    }
}

//! Main CLI entry point for cibox

use std::path::PathBuf;

use cibox_config::DEFAULT_CONFIG_FILE;
use clap::{Parser, Subcommand};
use color_eyre::eyre::Result;
use tracing_subscriber::EnvFilter;

mod commands;

/// cibox - run CI build steps inside a Docker container
#[derive(Parser, Debug)]
#[command(author, version, about, long_about = None)]
#[command(propagate_version = true)]
struct Cli {
    /// Increase logging verbosity
    #[arg(short, long, action = clap::ArgAction::Count)]
    verbose: u8,

    /// Decrease logging verbosity
    #[arg(short, long, action = clap::ArgAction::Count)]
    quiet: u8,

    /// Configuration file path (global option)
    #[arg(short, long, global = true, value_name = "FILE")]
    config: Option<PathBuf>,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand, Debug)]
enum Commands {
    /// Run the configured build
    Run {
        /// Write build output as JSON lines to this file instead of the terminal
        #[arg(short, long, value_name = "FILE")]
        transcript: Option<PathBuf>,

        /// Keep the build container after the build finishes
        #[arg(long)]
        keep_container: bool,

        /// Disable the interactive progress display
        #[arg(long)]
        no_progress: bool,

        /// Docker daemon socket path
        #[arg(long, value_name = "PATH")]
        docker_socket: Option<String>,
    },

    /// Validate the configuration file and step declarations
    Validate {
        /// Check Docker availability
        #[arg(long)]
        check_docker: bool,
    },

    /// Initialize a new configuration file
    Init {
        /// Output path for configuration file
        #[arg(short, long, value_name = "FILE", default_value = DEFAULT_CONFIG_FILE)]
        output: PathBuf,

        /// Force overwrite existing file
        #[arg(short, long)]
        force: bool,
    },
}

#[tokio::main]
async fn main() -> Result<()> {
    // Install color-eyre for better error reports
    color_eyre::install()?;

    let cli = Cli::parse();

    setup_logging(cli.verbose, cli.quiet)?;

    let config_path = cli.config.unwrap_or_else(|| PathBuf::from(DEFAULT_CONFIG_FILE));

    let result = match cli.command {
        Commands::Run { transcript, keep_container, no_progress, docker_socket } => {
            let command = commands::RunCommand::new(config_path, transcript, keep_container)
                .with_progress(!no_progress)
                .with_docker_socket(docker_socket);
            command.execute().await
        }

        Commands::Validate { check_docker } => {
            let command = commands::ValidateCommand::new(config_path, check_docker);
            command.execute().await
        }

        Commands::Init { output, force } => {
            let command = commands::InitCommand::new(output, force);
            command.execute().await
        }
    };

    if let Err(e) = result {
        tracing::error!("Command failed: {:#}", e);
        std::process::exit(1);
    }

    Ok(())
}

fn setup_logging(verbose: u8, quiet: u8) -> Result<()> {
    let log_level = match (verbose, quiet) {
        (0, 0) => "info",
        (1, 0) => "debug",
        (v, 0) if v >= 2 => "trace",
        (0, 1) => "warn",
        (0, 2) => "error",
        (0, q) if q > 2 => "off",
        _ => "info", // If both are set, default to info
    };

    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(log_level));

    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_target(false)
        .with_writer(std::io::stderr)
        .init();

    Ok(())
}

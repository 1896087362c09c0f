//! Run command implementation

use std::path::{Path, PathBuf};
use std::sync::Arc;

use cibox_build::{
    spawn_reporter, Build, BuildError, ExecSettings, ProgressUIFactory, StepFactory, StepList,
};
use cibox_config::Config;
use cibox_core::{OutputReceiver, StreamKind};
use cibox_docker::{short_id, Container, DockerConfig, DockerContainer, DockerService};
use color_eyre::eyre::{eyre, Context, Result};
use futures::{Stream, StreamExt};
use tokio::io::AsyncWriteExt;
use tokio::task::JoinHandle;
use tracing::{info, warn};

/// Run command implementation
pub struct RunCommand {
    config_path: PathBuf,
    transcript: Option<PathBuf>,
    keep_container: bool,
    progress: bool,
    docker_socket: Option<String>,
}

impl RunCommand {
    pub fn new(config_path: PathBuf, transcript: Option<PathBuf>, keep_container: bool) -> Self {
        Self { config_path, transcript, keep_container, progress: true, docker_socket: None }
    }

    pub fn with_progress(mut self, progress: bool) -> Self {
        self.progress = progress;
        self
    }

    pub fn with_docker_socket(mut self, socket: Option<String>) -> Self {
        self.docker_socket = socket;
        self
    }

    pub async fn execute(&self) -> Result<()> {
        info!("Starting build");

        let config = Config::from_file(&self.config_path).with_context(|| {
            format!("Failed to load config from {}", self.config_path.display())
        })?;
        println!("✓ Configuration loaded and validated");

        let root = StepFactory::new()
            .create_list(&config.name, &config.steps)
            .context("Invalid step declarations")?
            .with_emit_errors(true);

        let docker = DockerService::new(DockerConfig {
            socket_path: self.docker_socket.clone(),
            ..Default::default()
        })
        .await
        .context("Failed to connect to Docker")?;

        let container = Arc::new(
            docker
                .provision(&config.container_spec(), config.pull)
                .await
                .context("Failed to provision build container")?,
        );
        println!("✓ Build container started: {}", short_id(container.id()));

        let outcome = self.run_build(&config, root, container.clone()).await;

        if self.keep_container {
            println!("Keeping build container {}", container.id());
        } else if let Err(e) = container.remove().await {
            warn!("Failed to remove build container: {}", e);
        }

        outcome?;
        println!("\n✨ Build completed successfully!");
        Ok(())
    }

    async fn run_build(
        &self,
        config: &Config,
        root: StepList,
        container: Arc<DockerContainer>,
    ) -> Result<()> {
        let mut build = Build::new();
        build.set_container(container.clone())?;
        build.set_step(Box::new(root));
        build.set_exec_settings(ExecSettings {
            retries: config.retries,
            retry_delay: config.retry_delay(),
            env: Vec::new(),
        });

        // The terminal is only free for a progress display when output goes to a file
        let transcript = self.transcript.clone().or_else(|| config.transcript.clone());
        let ui = ProgressUIFactory::create(self.progress && transcript.is_some());
        let reporter = spawn_reporter(ui, build.subscribe_events(), build.subscribe_status());

        let writer: JoinHandle<Result<()>> = match transcript {
            Some(path) => {
                let lines = build.json_stream()?;
                tokio::spawn(async move { write_transcript(lines, &path).await })
            }
            None => {
                let stream = build.stream()?;
                tokio::spawn(async move {
                    print_output(stream).await;
                    Ok(())
                })
            }
        };

        let outcome = tokio::select! {
            result = build.run() => Some(result),
            _ = tokio::signal::ctrl_c() => {
                warn!("Interrupted, stopping build container");
                if let Err(e) = container.stop().await {
                    warn!("Failed to stop build container: {}", e);
                }
                None
            }
        };

        // Releasing the build closes the event channels and the output stream
        drop(build);
        writer.await.context("Output writer panicked")??;
        reporter.await.context("Progress reporter panicked")?;

        build_outcome(outcome)
    }
}

/// Map the build result to a report; `None` means the build was interrupted
fn build_outcome(outcome: Option<std::result::Result<(), BuildError>>) -> Result<()> {
    match outcome {
        Some(Ok(())) => Ok(()),
        Some(Err(e)) => Err(e).wrap_err("Build failed"),
        None => Err(eyre!("Build interrupted")),
    }
}

async fn write_transcript(lines: impl Stream<Item = String>, path: &Path) -> Result<()> {
    let mut file = tokio::fs::File::create(path)
        .await
        .with_context(|| format!("Failed to create transcript {}", path.display()))?;

    let mut lines = Box::pin(lines);
    let mut count = 0usize;
    while let Some(line) = lines.next().await {
        file.write_all(line.as_bytes()).await.context("Failed to write transcript")?;
        count += 1;
    }
    file.flush().await.context("Failed to flush transcript")?;

    info!("Wrote {} output records to {}", count, path.display());
    Ok(())
}

async fn print_output(mut stream: OutputReceiver) {
    while let Some(chunk) = stream.recv().await {
        match chunk.stream {
            StreamKind::Stdout => print!("{}", chunk.data),
            StreamKind::Stderr => eprint!("{}", chunk.data),
        }
    }
}

#[cfg(test)]
mod tests {
    use tempfile::TempDir;

    use super::*;

    #[tokio::test]
    async fn test_write_transcript() {
        let temp_dir = TempDir::new().unwrap();
        let path = temp_dir.path().join("build.jsonl");
        let lines = futures::stream::iter(vec!["{\"a\":1}\n".to_string(), "{\"b\":2}\n".to_string()]);

        write_transcript(lines, &path).await.unwrap();

        assert_eq!(std::fs::read_to_string(&path).unwrap(), "{\"a\":1}\n{\"b\":2}\n");
    }

    #[test]
    fn test_build_failure_keeps_error_chain() {
        let source = BuildError::NonZeroExit { name: "compile".to_string(), exit_code: 2 };
        let err = build_outcome(Some(Err(source))).unwrap_err();

        assert_eq!(err.to_string(), "Build failed");
        let chain: Vec<String> = err.chain().map(|cause| cause.to_string()).collect();
        assert_eq!(chain, vec!["Build failed", "compile exited with code 2"]);
        assert!(err.downcast_ref::<BuildError>().is_some());
    }

    #[test]
    fn test_interrupted_build_fails() {
        assert!(build_outcome(Some(Ok(()))).is_ok());
        assert_eq!(build_outcome(None).unwrap_err().to_string(), "Build interrupted");
    }

    #[tokio::test]
    async fn test_missing_config_fails() {
        let command = RunCommand::new(PathBuf::from("/nonexistent/cibox.yaml"), None, false);
        let err = command.execute().await.unwrap_err();
        assert!(format!("{err:#}").contains("Failed to load config"));
    }
}

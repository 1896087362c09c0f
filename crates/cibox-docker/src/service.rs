//! Container capability consumed by the build engine

use std::pin::Pin;

use async_trait::async_trait;
use futures::Stream;
use tokio::io::AsyncWrite;

use crate::error::Result;
use crate::types::{ContainerInfo, ExecSpec};

/// Demultiplexed output of an exec session
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum LogOutput {
    /// Standard output chunk
    Stdout(String),
    /// Standard error chunk
    Stderr(String),
}

/// Output half of an attached exec
pub type OutputStream = Pin<Box<dyn Stream<Item = Result<LogOutput>> + Send>>;

/// Duplex handles of a started exec
pub struct ExecAttachment {
    /// Output, already split into stdout and stderr chunks
    pub output: OutputStream,
    /// Input writer feeding the process stdin
    pub input: Pin<Box<dyn AsyncWrite + Send>>,
}

/// Final status of an exec
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct ExecInspection {
    /// Exit code, once the process has finished
    pub exit_code: Option<i64>,
    /// Whether the process is still running
    pub running: bool,
}

/// What a running container must offer to the step engine
#[async_trait]
pub trait Container: Send + Sync {
    /// Container id
    fn id(&self) -> &str;

    /// Span carrying the container context, used as a child logger
    fn span(&self) -> tracing::Span;

    /// Create an exec session, returning its id
    async fn create_exec(&self, spec: &ExecSpec) -> Result<String>;

    /// Start a created exec and attach to its streams
    async fn start_exec(&self, exec_id: &str) -> Result<ExecAttachment>;

    /// Query the status of an exec
    async fn inspect_exec(&self, exec_id: &str) -> Result<ExecInspection>;

    /// Stop the container
    async fn stop(&self) -> Result<()>;

    /// Snapshot of the container state
    async fn state(&self) -> Result<ContainerInfo>;
}

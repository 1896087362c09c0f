//! Executor for running step commands in the build container

use std::io::Cursor;
use std::sync::Arc;
use std::time::Duration;

use cibox_core::{OutputChunk, OutputSink, StreamKind};
use cibox_docker::{ContainerExec, ExecResult, DEFAULT_RETRIES, DEFAULT_RETRY_DELAY};
use tokio::sync::mpsc::{self, UnboundedReceiver};
use tracing::debug;

use crate::context::StepContext;
use crate::error::{BuildError, Result};
use crate::step::Step;

/// Settings applied to every exec a build issues
#[derive(Debug, Clone)]
pub struct ExecSettings {
    /// Retries for transient exec-creation failures
    pub retries: u32,
    /// Delay between retries
    pub retry_delay: Duration,
    /// Extra environment entries (`KEY=value`) for every exec
    pub env: Vec<String>,
}

impl Default for ExecSettings {
    fn default() -> Self {
        Self { retries: DEFAULT_RETRIES, retry_delay: DEFAULT_RETRY_DELAY, env: Vec::new() }
    }
}

/// Run the step's command inside the context container
///
/// Output is tagged with the step id and forwarded into the build stream.
/// Resolves once the exec has been inspected and both output sub-streams
/// have ended.
pub async fn exec_in_container<S: Step + ?Sized>(
    step: &S,
    ctx: &StepContext,
) -> Result<ExecResult> {
    let core = step.core();
    let command = step.build_command()?;
    let settings = ctx.exec_settings();

    debug!(step = %core.name(), command = ?command, "Executing step command");

    let mut exec = ContainerExec::new(Some(Arc::clone(ctx.container())), command)
        .map_err(|e| BuildError::exec(core.name(), e))?
        .with_env(settings.env.clone())
        .with_retries(settings.retries)
        .with_retry_delay(settings.retry_delay);

    if let Some(input) = step.stdin() {
        exec = exec.with_stdin(Cursor::new(input));
    }

    let (stdout_tx, stdout_rx) = mpsc::unbounded_channel();
    let (stderr_tx, stderr_rx) = mpsc::unbounded_channel();

    let (result, ()) = tokio::join!(
        exec.run(stdout_tx, stderr_tx),
        forward_output(core.id(), stdout_rx, stderr_rx, ctx.output())
    );

    result.map_err(|e| BuildError::exec(core.name(), e))
}

/// Tag both sub-streams and send them into the build stream until both end
async fn forward_output(
    step_id: &str,
    mut stdout: UnboundedReceiver<String>,
    mut stderr: UnboundedReceiver<String>,
    sink: &OutputSink,
) {
    let mut stdout_open = true;
    let mut stderr_open = true;

    while stdout_open || stderr_open {
        tokio::select! {
            chunk = stdout.recv(), if stdout_open => match chunk {
                Some(data) => send_chunk(sink, StreamKind::Stdout, data, step_id),
                None => stdout_open = false,
            },
            chunk = stderr.recv(), if stderr_open => match chunk {
                Some(data) => send_chunk(sink, StreamKind::Stderr, data, step_id),
                None => stderr_open = false,
            },
        }
    }
}

fn send_chunk(sink: &OutputSink, stream: StreamKind, data: String, step_id: &str) {
    // Nobody consuming the build stream is not an error
    let _ = sink.send(OutputChunk::new(stream, data, step_id));
}

//! Exec session wrapper
//!
//! A [`ContainerExec`] runs one command inside an already running container:
//! it creates the exec, starts it, splits the attached output into stdout
//! and stderr sub-streams, feeds an optional stdin, and finally inspects the
//! exec for its exit code. A non-zero exit code is returned as data; only
//! infrastructure failures are errors here.

use std::pin::Pin;
use std::sync::Arc;
use std::time::Duration;

use backoff::backoff::{Backoff, Constant};
use cibox_core::EventEmitter;
use futures::StreamExt;
use tokio::io::{AsyncRead, AsyncWrite, AsyncWriteExt};
use tokio::sync::mpsc::UnboundedSender;
use tracing::{debug, error, info, warn, Instrument};

use crate::error::{DockerError, Result};
use crate::service::{Container, ExecAttachment, LogOutput, OutputStream};
use crate::types::{short_id, ExecSpec};

/// Default number of retries for transient exec-creation failures
pub const DEFAULT_RETRIES: u32 = 3;

/// Default delay between exec-creation retries
pub const DEFAULT_RETRY_DELAY: Duration = Duration::from_millis(2000);

/// Lifecycle of an exec session
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ExecPhase {
    /// Nothing issued yet
    Idle,
    /// Exec created, not started
    Created,
    /// Attached and streaming
    Running,
    /// Output transport ended
    Exited,
    /// Exit code recorded
    Inspected,
}

/// Notification emitted while an exec runs
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ExecEvent {
    /// Streams are attached
    Running { exec_id: String },
    /// The output transport ended
    Exited { exec_id: String },
}

/// Outcome of a finished exec
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ExecResult {
    pub exit_code: i64,
}

/// One command execution inside a container
pub struct ContainerExec {
    container: Arc<dyn Container>,
    spec: ExecSpec,
    retries: u32,
    attempted_retries: u32,
    retry_delay: Duration,
    stdin: Option<Pin<Box<dyn AsyncRead + Send>>>,
    exec_id: Option<String>,
    exit_code: Option<i64>,
    phase: ExecPhase,
    events: EventEmitter<ExecEvent>,
}

impl ContainerExec {
    /// Create an exec session; a container is required
    pub fn new(container: Option<Arc<dyn Container>>, command: Vec<String>) -> Result<Self> {
        let container = container.ok_or(DockerError::MissingContainer)?;

        Ok(Self {
            container,
            spec: ExecSpec::new(command),
            retries: DEFAULT_RETRIES,
            attempted_retries: 0,
            retry_delay: DEFAULT_RETRY_DELAY,
            stdin: None,
            exec_id: None,
            exit_code: None,
            phase: ExecPhase::Idle,
            events: EventEmitter::new(),
        })
    }

    /// Set environment entries (`KEY=value`)
    pub fn with_env(mut self, env: Vec<String>) -> Self {
        self.spec.env = env;
        self
    }

    /// Set the retry budget for transient creation failures
    pub fn with_retries(mut self, retries: u32) -> Self {
        self.retries = retries;
        self
    }

    /// Set the delay between retries
    pub fn with_retry_delay(mut self, delay: Duration) -> Self {
        self.retry_delay = delay;
        self
    }

    /// Attach a stream to feed into the process stdin
    pub fn with_stdin(mut self, stdin: impl AsyncRead + Send + 'static) -> Self {
        self.stdin = Some(Box::pin(stdin));
        self.spec.attach_stdin = true;
        self
    }

    pub fn command(&self) -> &[String] {
        &self.spec.command
    }

    pub fn exec_id(&self) -> Option<&str> {
        self.exec_id.as_deref()
    }

    /// Exit code, available once the exec has been inspected
    pub fn exit_code(&self) -> Option<i64> {
        self.exit_code
    }

    pub fn phase(&self) -> ExecPhase {
        self.phase
    }

    pub fn retries(&self) -> u32 {
        self.retries
    }

    pub fn attempted_retries(&self) -> u32 {
        self.attempted_retries
    }

    /// Subscribe to `running`/`exited` notifications
    pub fn subscribe(&self) -> tokio::sync::mpsc::UnboundedReceiver<ExecEvent> {
        self.events.subscribe()
    }

    /// Create, start and inspect the exec
    ///
    /// Output chunks are sent to `stdout` and `stderr`; both senders are
    /// dropped when the transport ends, before inspection.
    pub async fn run(
        &mut self,
        stdout: UnboundedSender<String>,
        stderr: UnboundedSender<String>,
    ) -> Result<ExecResult> {
        if self.phase != ExecPhase::Idle {
            return Err(self.handle_error("run", DockerError::AlreadyStarted));
        }

        let span = self.container.span();
        async {
            self.create().await?;
            self.start(stdout, stderr).await?;
            let exit_code = self.inspect().await?;
            Ok::<_, DockerError>(ExecResult { exit_code })
        }
        .instrument(span)
        .await
    }

    /// Issue the exec, retrying broken-pipe failures with a fixed delay
    pub async fn create(&mut self) -> Result<String> {
        let mut backoff = Constant::new(self.retry_delay);

        loop {
            match self.container.create_exec(&self.spec).await {
                Ok(exec_id) => {
                    debug!(exec = %short_id(&exec_id), command = ?self.spec.command, "Created exec");
                    self.exec_id = Some(exec_id.clone());
                    self.phase = ExecPhase::Created;
                    return Ok(exec_id);
                }
                Err(err) if err.is_broken_pipe() => {
                    if self.attempted_retries >= self.retries {
                        let exhausted = DockerError::MaxRetriesExceeded {
                            attempts: self.attempted_retries,
                            source: Box::new(err),
                        };
                        return Err(self.handle_error("create", exhausted));
                    }

                    self.attempted_retries += 1;
                    let delay = backoff.next_backoff().unwrap_or(self.retry_delay);
                    warn!(
                        "Exec creation failed with a broken pipe (retry {}/{}), retrying in {:?}",
                        self.attempted_retries, self.retries, delay
                    );
                    tokio::time::sleep(delay).await;
                }
                Err(err) => return Err(self.handle_error("create", err)),
            }
        }
    }

    /// Attach to the exec and pump its streams until the transport ends
    pub async fn start(
        &mut self,
        stdout: UnboundedSender<String>,
        stderr: UnboundedSender<String>,
    ) -> Result<()> {
        let exec_id = match self.exec_id.clone() {
            Some(id) if self.phase == ExecPhase::Created => id,
            _ => {
                let err = DockerError::execution("exec must be created before it is started");
                return Err(self.handle_error("start", err));
            }
        };

        let ExecAttachment { output, mut input } = match self.container.start_exec(&exec_id).await {
            Ok(attachment) => attachment,
            Err(err) => return Err(self.handle_error("start", err)),
        };

        self.phase = ExecPhase::Running;
        self.events.emit(&ExecEvent::Running { exec_id: exec_id.clone() });

        let drain = drain_output(output, stdout, stderr);
        tokio::pin!(drain);

        let result = match self.stdin.take() {
            Some(mut stdin) => {
                let feed = feed_stdin(&mut stdin, &mut input);
                tokio::pin!(feed);
                tokio::select! {
                    biased;
                    // Input stays attached after stdin ends; keep draining.
                    () = &mut feed => drain.await,
                    result = &mut drain => result,
                }
            }
            None => drain.await,
        };

        self.phase = ExecPhase::Exited;
        self.events.emit(&ExecEvent::Exited { exec_id });

        result.map_err(|err| self.handle_error("start", err))
    }

    /// Query the exit status and record it
    pub async fn inspect(&mut self) -> Result<i64> {
        let exec_id = match self.exec_id.clone() {
            Some(id) => id,
            None => {
                let err = DockerError::execution("exec has not been created");
                return Err(self.handle_error("inspect", err));
            }
        };

        let inspection = match self.container.inspect_exec(&exec_id).await {
            Ok(inspection) => inspection,
            Err(err) => return Err(self.handle_error("inspect", err)),
        };

        let exit_code = match inspection.exit_code {
            Some(code) => code,
            None => {
                let err = DockerError::execution("exec finished without reporting an exit code");
                return Err(self.handle_error("inspect", err));
            }
        };

        info!(
            exec = %short_id(&exec_id),
            container = %short_id(self.container.id()),
            exit_code,
            "Exec finished"
        );

        self.exit_code = Some(exit_code);
        self.phase = ExecPhase::Inspected;
        Ok(exit_code)
    }

    /// Log the current exec status without recording anything
    pub async fn log_status(&self) {
        let Some(exec_id) = self.exec_id.as_deref() else {
            debug!(phase = ?self.phase, "Exec not created yet");
            return;
        };

        match self.container.inspect_exec(exec_id).await {
            Ok(inspection) => debug!(
                exec = %short_id(exec_id),
                container = %short_id(self.container.id()),
                running = inspection.running,
                exit_code = ?inspection.exit_code,
                "Exec status"
            ),
            Err(err) => debug!(exec = %short_id(exec_id), "Exec status unavailable: {}", err),
        }
    }

    fn handle_error(&self, stage: &str, err: DockerError) -> DockerError {
        error!(
            stage,
            exec = self.exec_id.as_deref().map(short_id).unwrap_or("-"),
            container = %short_id(self.container.id()),
            command = ?self.spec.command,
            "Exec failed: {}",
            err
        );
        err
    }
}

async fn drain_output(
    mut output: OutputStream,
    stdout: UnboundedSender<String>,
    stderr: UnboundedSender<String>,
) -> Result<()> {
    while let Some(chunk) = output.next().await {
        match chunk? {
            LogOutput::Stdout(text) => {
                let _ = stdout.send(text);
            }
            LogOutput::Stderr(text) => {
                let _ = stderr.send(text);
            }
        }
    }
    Ok(())
}

async fn feed_stdin<R, W>(stdin: &mut R, input: &mut W)
where
    R: AsyncRead + Unpin + ?Sized,
    W: AsyncWrite + Unpin + ?Sized,
{
    match tokio::io::copy(stdin, input).await {
        Ok(bytes) => debug!("Fed {} bytes to exec stdin", bytes),
        Err(err) => warn!("Failed to feed exec stdin: {}", err),
    }
    if let Err(err) = input.flush().await {
        warn!("Failed to flush exec stdin: {}", err);
    }
}

#[cfg(test)]
mod tests {
    use std::io;
    use std::sync::atomic::{AtomicU32, Ordering};
    use std::sync::Mutex;

    use async_trait::async_trait;
    use tokio::io::{AsyncReadExt, DuplexStream};

    use super::*;
    use crate::service::ExecInspection;
    use crate::types::{ContainerInfo, ContainerState};

    struct FakeContainer {
        broken_pipes: AtomicU32,
        create_calls: AtomicU32,
        chunks: Vec<LogOutput>,
        exit_code: Option<i64>,
        stdin_peer: Mutex<Option<DuplexStream>>,
        last_spec: Mutex<Option<ExecSpec>>,
    }

    impl FakeContainer {
        fn new(chunks: Vec<LogOutput>, exit_code: Option<i64>) -> Self {
            Self {
                broken_pipes: AtomicU32::new(0),
                create_calls: AtomicU32::new(0),
                chunks,
                exit_code,
                stdin_peer: Mutex::new(None),
                last_spec: Mutex::new(None),
            }
        }

        fn with_broken_pipes(self, count: u32) -> Self {
            self.broken_pipes.store(count, Ordering::SeqCst);
            self
        }
    }

    #[async_trait]
    impl Container for FakeContainer {
        fn id(&self) -> &str {
            "0123456789abcdef0123"
        }

        fn span(&self) -> tracing::Span {
            tracing::Span::none()
        }

        async fn create_exec(&self, spec: &ExecSpec) -> Result<String> {
            self.create_calls.fetch_add(1, Ordering::SeqCst);
            *self.last_spec.lock().unwrap() = Some(spec.clone());

            let remaining = self.broken_pipes.load(Ordering::SeqCst);
            if remaining > 0 {
                self.broken_pipes.store(remaining - 1, Ordering::SeqCst);
                return Err(DockerError::Io(io::Error::new(
                    io::ErrorKind::BrokenPipe,
                    "write EPIPE",
                )));
            }
            Ok("exec-fedcba9876543210".to_string())
        }

        async fn start_exec(&self, _exec_id: &str) -> Result<ExecAttachment> {
            let (ours, theirs) = tokio::io::duplex(4096);
            *self.stdin_peer.lock().unwrap() = Some(theirs);
            let chunks: Vec<Result<LogOutput>> = self.chunks.iter().cloned().map(Ok).collect();

            Ok(ExecAttachment {
                output: Box::pin(futures::stream::iter(chunks)),
                input: Box::pin(ours),
            })
        }

        async fn inspect_exec(&self, _exec_id: &str) -> Result<ExecInspection> {
            Ok(ExecInspection { exit_code: self.exit_code, running: false })
        }

        async fn stop(&self) -> Result<()> {
            Ok(())
        }

        async fn state(&self) -> Result<ContainerInfo> {
            Ok(ContainerInfo {
                id: self.id().to_string(),
                name: "fake".to_string(),
                image: "alpine".to_string(),
                state: ContainerState::Running,
                created: String::new(),
                labels: Default::default(),
            })
        }
    }

    fn channels() -> (
        (UnboundedSender<String>, tokio::sync::mpsc::UnboundedReceiver<String>),
        (UnboundedSender<String>, tokio::sync::mpsc::UnboundedReceiver<String>),
    ) {
        (tokio::sync::mpsc::unbounded_channel(), tokio::sync::mpsc::unbounded_channel())
    }

    #[test]
    fn test_missing_container_is_fatal() {
        let result = ContainerExec::new(None, vec!["true".to_string()]);
        assert!(matches!(result, Err(DockerError::MissingContainer)));
    }

    #[tokio::test]
    async fn test_run_demultiplexes_output() {
        let container = Arc::new(FakeContainer::new(
            vec![
                LogOutput::Stdout("one\n".to_string()),
                LogOutput::Stderr("oops\n".to_string()),
                LogOutput::Stdout("two\n".to_string()),
            ],
            Some(0),
        ));
        let mut exec =
            ContainerExec::new(Some(container.clone()), vec!["make".to_string()]).unwrap();
        let mut events = exec.subscribe();
        let ((out_tx, mut out_rx), (err_tx, mut err_rx)) = channels();

        let result = exec.run(out_tx, err_tx).await.unwrap();

        assert_eq!(result.exit_code, 0);
        assert_eq!(exec.exit_code(), Some(0));
        assert_eq!(exec.phase(), ExecPhase::Inspected);
        assert_eq!(out_rx.recv().await.unwrap(), "one\n");
        assert_eq!(out_rx.recv().await.unwrap(), "two\n");
        assert!(out_rx.recv().await.is_none());
        assert_eq!(err_rx.recv().await.unwrap(), "oops\n");
        assert!(err_rx.recv().await.is_none());

        let exec_id = "exec-fedcba9876543210".to_string();
        assert_eq!(events.recv().await.unwrap(), ExecEvent::Running { exec_id: exec_id.clone() });
        assert_eq!(events.recv().await.unwrap(), ExecEvent::Exited { exec_id });
    }

    #[tokio::test]
    async fn test_non_zero_exit_is_data() {
        let container = Arc::new(FakeContainer::new(vec![], Some(2)));
        let mut exec = ContainerExec::new(Some(container), vec!["false".to_string()]).unwrap();
        let ((out_tx, _out_rx), (err_tx, _err_rx)) = channels();

        let result = exec.run(out_tx, err_tx).await.unwrap();
        assert_eq!(result.exit_code, 2);
    }

    #[tokio::test]
    async fn test_broken_pipe_is_retried() {
        let container = Arc::new(FakeContainer::new(vec![], Some(0)).with_broken_pipes(2));
        let mut exec = ContainerExec::new(Some(container.clone()), vec!["true".to_string()])
            .unwrap()
            .with_retry_delay(Duration::from_millis(1));
        let ((out_tx, _out_rx), (err_tx, _err_rx)) = channels();

        exec.run(out_tx, err_tx).await.unwrap();

        assert_eq!(exec.attempted_retries(), 2);
        assert_eq!(container.create_calls.load(Ordering::SeqCst), 3);
    }

    #[tokio::test]
    async fn test_retry_budget_exhausted() {
        let container = Arc::new(FakeContainer::new(vec![], Some(0)).with_broken_pipes(10));
        let mut exec = ContainerExec::new(Some(container.clone()), vec!["true".to_string()])
            .unwrap()
            .with_retries(2)
            .with_retry_delay(Duration::from_millis(1));
        let ((out_tx, _out_rx), (err_tx, _err_rx)) = channels();

        let err = exec.run(out_tx, err_tx).await.unwrap_err();

        assert!(matches!(err, DockerError::MaxRetriesExceeded { attempts: 2, .. }));
        assert!(err.to_string().contains("Maximum number of retries exceeded"));
        assert_eq!(container.create_calls.load(Ordering::SeqCst), 3);
        assert_eq!(exec.exit_code(), None);
    }

    #[tokio::test]
    async fn test_stdin_is_fed_to_exec() {
        let container = Arc::new(FakeContainer::new(vec![], Some(0)));
        let mut exec = ContainerExec::new(Some(container.clone()), vec!["bash".to_string()])
            .unwrap()
            .with_stdin(io::Cursor::new(b"echo hi\nexit $?\n".to_vec()));
        let ((out_tx, _out_rx), (err_tx, _err_rx)) = channels();

        exec.run(out_tx, err_tx).await.unwrap();

        let spec = container.last_spec.lock().unwrap().clone().unwrap();
        assert!(spec.attach_stdin);

        let mut peer = container.stdin_peer.lock().unwrap().take().unwrap();
        let mut received = String::new();
        peer.read_to_string(&mut received).await.unwrap();
        assert_eq!(received, "echo hi\nexit $?\n");
    }

    #[tokio::test]
    async fn test_exec_is_not_restartable() {
        let container = Arc::new(FakeContainer::new(vec![], Some(0)));
        let mut exec = ContainerExec::new(Some(container), vec!["true".to_string()]).unwrap();
        let ((out_tx, _out_rx), (err_tx, _err_rx)) = channels();
        exec.run(out_tx, err_tx).await.unwrap();

        let ((out_tx, _out_rx), (err_tx, _err_rx)) = channels();
        let err = exec.run(out_tx, err_tx).await.unwrap_err();
        assert!(matches!(err, DockerError::AlreadyStarted));
    }

    #[tokio::test]
    async fn test_log_status_before_create_is_noop() {
        let container = Arc::new(FakeContainer::new(vec![], Some(0)));
        let exec = ContainerExec::new(Some(container), vec!["true".to_string()]).unwrap();
        exec.log_status().await;
        assert_eq!(exec.phase(), ExecPhase::Idle);
    }
}

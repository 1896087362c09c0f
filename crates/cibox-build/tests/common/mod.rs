//! Scripted container used by the integration tests
//!
//! Each exec created on the container consumes the next [`ScriptedExec`]
//! from a queue; when the queue is empty the exec succeeds silently.

#![allow(dead_code)]

use std::collections::{HashMap, VecDeque};
use std::sync::atomic::{AtomicU32, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use async_trait::async_trait;
use cibox_build::{Step, StepFactory};
use cibox_docker::{
    Container, ContainerInfo, ContainerState, DockerError, ExecAttachment, ExecInspection,
    ExecSpec, LogOutput, Result,
};
use serde_json::Value;
use tokio::io::AsyncReadExt;
use tokio::task::JoinHandle;

/// Behaviour of one exec
#[derive(Debug, Clone, Default)]
pub struct ScriptedExec {
    pub chunks: Vec<LogOutput>,
    pub exit_code: i64,
    pub delay: Option<Duration>,
    pub create_error: Option<String>,
}

impl ScriptedExec {
    pub fn stdout(data: &str) -> Self {
        Self { chunks: vec![LogOutput::Stdout(data.to_string())], ..Default::default() }
    }

    pub fn exit(code: i64) -> Self {
        Self { exit_code: code, ..Default::default() }
    }

    pub fn slow(delay: Duration) -> Self {
        Self { delay: Some(delay), ..Default::default() }
    }

    pub fn create_error(reason: &str) -> Self {
        Self { create_error: Some(reason.to_string()), ..Default::default() }
    }

    pub fn with_stderr(mut self, data: &str) -> Self {
        self.chunks.push(LogOutput::Stderr(data.to_string()));
        self
    }
}

#[derive(Default)]
pub struct MockContainer {
    queue: Mutex<VecDeque<ScriptedExec>>,
    active: Mutex<HashMap<String, ScriptedExec>>,
    specs: Mutex<Vec<ExecSpec>>,
    stdin_readers: Mutex<Vec<JoinHandle<Vec<u8>>>>,
    next_exec: AtomicU32,
    stop_calls: AtomicU32,
}

impl MockContainer {
    pub fn new(execs: Vec<ScriptedExec>) -> Arc<Self> {
        Arc::new(Self { queue: Mutex::new(execs.into()), ..Default::default() })
    }

    /// Specs of every exec created so far
    pub fn specs(&self) -> Vec<ExecSpec> {
        self.specs.lock().unwrap().clone()
    }

    pub fn commands(&self) -> Vec<Vec<String>> {
        self.specs().into_iter().map(|spec| spec.command).collect()
    }

    pub fn stop_calls(&self) -> u32 {
        self.stop_calls.load(Ordering::SeqCst)
    }

    /// Everything written to exec stdin, one entry per started exec
    pub async fn stdin_received(&self) -> Vec<String> {
        let readers: Vec<JoinHandle<Vec<u8>>> =
            self.stdin_readers.lock().unwrap().drain(..).collect();

        let mut received = Vec::new();
        for reader in readers {
            let bytes = reader.await.unwrap();
            received.push(String::from_utf8(bytes).unwrap());
        }
        received
    }
}

#[async_trait]
impl Container for MockContainer {
    fn id(&self) -> &str {
        "mock0123456789abcdef"
    }

    fn span(&self) -> tracing::Span {
        tracing::Span::none()
    }

    async fn create_exec(&self, spec: &ExecSpec) -> Result<String> {
        self.specs.lock().unwrap().push(spec.clone());
        let scripted = self.queue.lock().unwrap().pop_front().unwrap_or_default();

        if let Some(reason) = &scripted.create_error {
            return Err(DockerError::execution(reason.clone()));
        }

        let exec_id = format!("exec-{}", self.next_exec.fetch_add(1, Ordering::SeqCst));
        self.active.lock().unwrap().insert(exec_id.clone(), scripted);
        Ok(exec_id)
    }

    async fn start_exec(&self, exec_id: &str) -> Result<ExecAttachment> {
        let chunks = self
            .active
            .lock()
            .unwrap()
            .get(exec_id)
            .map(|scripted| scripted.chunks.clone())
            .unwrap_or_default();

        let (ours, mut theirs) = tokio::io::duplex(64 * 1024);
        let reader = tokio::spawn(async move {
            let mut received = Vec::new();
            let _ = theirs.read_to_end(&mut received).await;
            received
        });
        self.stdin_readers.lock().unwrap().push(reader);

        let output: Vec<Result<LogOutput>> = chunks.into_iter().map(Ok).collect();
        Ok(ExecAttachment { output: Box::pin(futures::stream::iter(output)), input: Box::pin(ours) })
    }

    async fn inspect_exec(&self, exec_id: &str) -> Result<ExecInspection> {
        let scripted = self.active.lock().unwrap().get(exec_id).cloned().unwrap_or_default();
        if let Some(delay) = scripted.delay {
            tokio::time::sleep(delay).await;
        }
        Ok(ExecInspection { exit_code: Some(scripted.exit_code), running: false })
    }

    async fn stop(&self) -> Result<()> {
        self.stop_calls.fetch_add(1, Ordering::SeqCst);
        Ok(())
    }

    async fn state(&self) -> Result<ContainerInfo> {
        Ok(ContainerInfo {
            id: self.id().to_string(),
            name: "mock".to_string(),
            image: "alpine:3".to_string(),
            state: ContainerState::Running,
            created: String::new(),
            labels: Default::default(),
        })
    }
}

/// Build a step from a declaration with the default plugins
pub fn step(declaration: Value) -> Box<dyn Step> {
    StepFactory::new().create(&declaration).unwrap()
}

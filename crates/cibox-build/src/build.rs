//! A single build: one container, one root step, one output stream

use std::sync::Arc;

use cibox_core::{output_channel, EventEmitter, OutputReceiver, OutputSink, StatusUpdate};
use cibox_docker::Container;
use futures::{stream, Stream};
use tokio::sync::mpsc::UnboundedReceiver;
use tracing::{info, warn};
use uuid::Uuid;

use crate::context::StepContext;
use crate::error::{BuildError, Result};
use crate::events::StepEvent;
use crate::executor::ExecSettings;
use crate::step::Step;

/// Owns the build container, the root step and the build output stream
///
/// The output stream ends once the root step and every step nested in it
/// have finished emitting.
pub struct Build {
    id: String,
    container: Option<Arc<dyn Container>>,
    step: Option<Box<dyn Step>>,
    sink: Option<OutputSink>,
    stream: Option<OutputReceiver>,
    exec: ExecSettings,
    events: EventEmitter<StepEvent>,
    status: EventEmitter<StatusUpdate>,
}

impl Build {
    pub fn new() -> Self {
        let (sink, stream) = output_channel();
        Self {
            id: Uuid::new_v4().to_string(),
            container: None,
            step: None,
            sink: Some(sink),
            stream: Some(stream),
            exec: ExecSettings::default(),
            events: EventEmitter::new(),
            status: EventEmitter::new(),
        }
    }

    pub fn id(&self) -> &str {
        &self.id
    }

    /// Assign the build container; it can only be set once
    pub fn set_container(&mut self, container: Arc<dyn Container>) -> Result<()> {
        if self.container.is_some() {
            return Err(BuildError::ContainerAlreadySet);
        }
        self.container = Some(container);
        Ok(())
    }

    pub fn container(&self) -> Option<&Arc<dyn Container>> {
        self.container.as_ref()
    }

    /// Assign the root step
    pub fn set_step(&mut self, step: Box<dyn Step>) {
        self.step = Some(step);
    }

    pub fn step(&self) -> Option<&dyn Step> {
        self.step.as_deref()
    }

    pub fn set_exec_settings(&mut self, exec: ExecSettings) {
        self.exec = exec;
    }

    /// Take the raw output stream; available once
    pub fn stream(&mut self) -> Result<OutputReceiver> {
        self.stream.take().ok_or(BuildError::StreamTaken)
    }

    /// Take the output stream as newline-terminated JSON records
    pub fn json_stream(&mut self) -> Result<impl Stream<Item = String> + Send + 'static> {
        let receiver = self.stream()?;

        Ok(stream::unfold(receiver, |mut receiver| async move {
            loop {
                let chunk = receiver.recv().await?;
                match chunk.to_json_line() {
                    Ok(line) => return Some((line, receiver)),
                    Err(e) => warn!(step = %chunk.step_id, "Dropping unserializable output chunk: {}", e),
                }
            }
        }))
    }

    /// Lifecycle events from every step in the build
    pub fn subscribe_events(&self) -> UnboundedReceiver<StepEvent> {
        self.events.subscribe()
    }

    /// Status updates from every step in the build
    pub fn subscribe_status(&self) -> UnboundedReceiver<StatusUpdate> {
        self.status.subscribe()
    }

    /// Run the root step inside the container
    ///
    /// The build's own handle on the output stream is released when the root
    /// step finishes, whatever its outcome.
    pub async fn run(&mut self) -> Result<()> {
        let container = self.container.clone().ok_or(BuildError::MissingContainer)?;
        let sink = self.sink.take().ok_or_else(|| BuildError::AlreadyRun { name: self.id.clone() })?;
        let step = self.step.as_mut().ok_or(BuildError::MissingStep)?;

        let ctx = StepContext::new(container, sink)
            .with_exec_settings(self.exec.clone())
            .nested(self.events.clone(), self.status.clone());

        info!(build = %self.id, step = %step.core().name(), "Starting build");
        let result = step.run(&ctx).await;
        drop(ctx);

        match &result {
            Ok(()) => info!(build = %self.id, "Build succeeded"),
            Err(e) => warn!(build = %self.id, error = %e, "Build failed"),
        }

        result
    }
}

impl Default for Build {
    fn default() -> Self {
        Self::new()
    }
}

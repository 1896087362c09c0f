//! Execution context handed to a running step

use std::sync::Arc;

use cibox_core::{EventEmitter, OutputSink, StatusUpdate};
use cibox_docker::Container;

use crate::events::StepEvent;
use crate::executor::ExecSettings;

/// Emitters of every enclosing step list and of the build itself
///
/// Lifecycle events and status updates raised by a step are re-emitted on
/// each of these so that outer observers see nested activity.
#[derive(Debug, Clone, Default)]
pub struct Relay {
    events: Vec<EventEmitter<StepEvent>>,
    status: Vec<EventEmitter<StatusUpdate>>,
}

impl Relay {
    /// Add one level of listeners
    pub fn push(&mut self, events: EventEmitter<StepEvent>, status: EventEmitter<StatusUpdate>) {
        self.events.push(events);
        self.status.push(status);
    }

    /// Number of enclosing levels
    pub fn depth(&self) -> usize {
        self.events.len()
    }

    pub fn emit_event(&self, event: &StepEvent) {
        for emitter in &self.events {
            emitter.emit(event);
        }
    }

    pub fn emit_status(&self, update: &StatusUpdate) {
        for emitter in &self.status {
            emitter.emit(update);
        }
    }
}

/// Everything a step needs while it runs
///
/// The context owns a clone of the build output sink. The build stream ends
/// once every context derived from the build has been dropped.
#[derive(Clone)]
pub struct StepContext {
    container: Arc<dyn Container>,
    output: OutputSink,
    relay: Relay,
    exec: ExecSettings,
}

impl StepContext {
    /// Create a root context
    pub fn new(container: Arc<dyn Container>, output: OutputSink) -> Self {
        Self { container, output, relay: Relay::default(), exec: ExecSettings::default() }
    }

    /// Set the exec settings used by container steps
    pub fn with_exec_settings(mut self, exec: ExecSettings) -> Self {
        self.exec = exec;
        self
    }

    /// Derive a context whose steps also report to the given emitters
    pub fn nested(
        &self,
        events: EventEmitter<StepEvent>,
        status: EventEmitter<StatusUpdate>,
    ) -> Self {
        let mut child = self.clone();
        child.relay.push(events, status);
        child
    }

    pub fn container(&self) -> &Arc<dyn Container> {
        &self.container
    }

    pub fn output(&self) -> &OutputSink {
        &self.output
    }

    pub fn relay(&self) -> &Relay {
        &self.relay
    }

    pub fn exec_settings(&self) -> &ExecSettings {
        &self.exec
    }
}

impl std::fmt::Debug for StepContext {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("StepContext")
            .field("container", &self.container.id())
            .field("relay_depth", &self.relay.depth())
            .field("exec", &self.exec)
            .finish()
    }
}

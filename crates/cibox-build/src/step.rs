//! Step contract and lifecycle
//!
//! Every unit of work in a build is a [`Step`]. Plugins only describe the
//! command to run; the shared lifecycle in [`run_step`] handles timing,
//! timeouts, status reporting and the final state transition.

use std::any::Any;
use std::time::Duration;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use cibox_core::{EventEmitter, Status, StatusUpdate, StepState};
use cibox_docker::ExecResult;
use serde_json::{json, Value};
use tokio::sync::mpsc::UnboundedReceiver;
use tracing::{debug, info, warn};
use uuid::Uuid;

use crate::context::StepContext;
use crate::error::{BuildError, Result};
use crate::events::{StatusChange, StepEvent, StepSnapshot};
use crate::executor::exec_in_container;

/// Timeout applied when a declaration does not set one (20 minutes)
pub const DEFAULT_TIMEOUT: Duration = Duration::from_millis(1_200_000);

/// Attributes exposed by the default JSON form of a step
pub const JSON_ATTRIBUTES: [&str; 8] =
    ["id", "name", "plugin", "timeout", "options", "exitCode", "startTime", "endTime"];

/// State shared by every step kind
#[derive(Debug, Clone)]
pub struct StepCore {
    id: String,
    name: String,
    plugin: String,
    timeout: Option<Duration>,
    continue_on_failure: bool,
    optional: bool,
    options: Value,
    state: StepState,
    exit_code: Option<i64>,
    start_time: Option<DateTime<Utc>>,
    end_time: Option<DateTime<Utc>>,
    error: Option<BuildError>,
    events: EventEmitter<StepEvent>,
    status: EventEmitter<StatusUpdate>,
}

impl StepCore {
    /// Create a pending step with default settings
    pub fn new(plugin: impl Into<String>, name: impl Into<String>) -> Self {
        Self {
            id: Uuid::new_v4().to_string(),
            name: name.into(),
            plugin: plugin.into(),
            timeout: Some(DEFAULT_TIMEOUT),
            continue_on_failure: false,
            optional: false,
            options: Value::Object(Default::default()),
            state: StepState::Pending,
            exit_code: None,
            start_time: None,
            end_time: None,
            error: None,
            events: EventEmitter::new(),
            status: EventEmitter::new(),
        }
    }

    /// Build the shared state from a declaration object
    ///
    /// Recognized keys are `id`, `name`, `timeout` (milliseconds; `0`,
    /// `false` or `null` disable it, `true` keeps the default),
    /// `continueOnFailure` and `optional`. The whole declaration is kept as
    /// the step options.
    pub fn from_options(plugin: &str, options: &Value) -> Result<Self> {
        let map = options
            .as_object()
            .ok_or_else(|| BuildError::invalid(format!("{plugin} step must be an object")))?;

        let mut core = Self::new(plugin, plugin);
        if let Some(id) = map.get("id").and_then(Value::as_str) {
            core.id = id.to_string();
        }
        if let Some(name) = map.get("name") {
            core.name = name
                .as_str()
                .ok_or_else(|| BuildError::invalid("step name must be a string"))?
                .to_string();
        }

        core.timeout = parse_timeout(map.get("timeout"))?;
        core.continue_on_failure = match flag(options, "continueOnFailure")? {
            Some(value) => value,
            None => flag(options, "continue_on_failure")?.unwrap_or(false),
        };
        core.optional = flag(options, "optional")?.unwrap_or(false);
        core.options = options.clone();

        Ok(core)
    }

    pub fn with_id(mut self, id: impl Into<String>) -> Self {
        self.id = id.into();
        self
    }

    pub fn with_timeout(mut self, timeout: Option<Duration>) -> Self {
        self.timeout = timeout;
        self
    }

    pub fn with_continue_on_failure(mut self, continue_on_failure: bool) -> Self {
        self.continue_on_failure = continue_on_failure;
        self
    }

    pub fn with_optional(mut self, optional: bool) -> Self {
        self.optional = optional;
        self
    }

    pub fn id(&self) -> &str {
        &self.id
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn plugin(&self) -> &str {
        &self.plugin
    }

    pub fn timeout(&self) -> Option<Duration> {
        self.timeout
    }

    pub fn continue_on_failure(&self) -> bool {
        self.continue_on_failure
    }

    pub fn optional(&self) -> bool {
        self.optional
    }

    /// The declaration this step was built from
    pub fn options(&self) -> &Value {
        &self.options
    }

    pub fn state(&self) -> StepState {
        self.state
    }

    pub fn exit_code(&self) -> Option<i64> {
        self.exit_code
    }

    pub fn start_time(&self) -> Option<DateTime<Utc>> {
        self.start_time
    }

    pub fn end_time(&self) -> Option<DateTime<Utc>> {
        self.end_time
    }

    /// The error the step last finished with
    pub fn error(&self) -> Option<&BuildError> {
        self.error.as_ref()
    }

    /// Time between start and end; `None` until both are known
    pub fn elapsed_time(&self) -> Option<Duration> {
        let (start, end) = (self.start_time?, self.end_time?);
        (end - start).to_std().ok()
    }

    /// Default status context, `<plugin>/<name>`
    pub fn status_context(&self) -> String {
        format!("{}/{}", self.plugin, self.name)
    }

    pub fn events(&self) -> &EventEmitter<StepEvent> {
        &self.events
    }

    pub fn status(&self) -> &EventEmitter<StatusUpdate> {
        &self.status
    }

    pub fn subscribe_events(&self) -> UnboundedReceiver<StepEvent> {
        self.events.subscribe()
    }

    pub fn subscribe_status(&self) -> UnboundedReceiver<StatusUpdate> {
        self.status.subscribe()
    }

    /// Whitelisted JSON form
    pub fn to_json(&self) -> Value {
        json!({
            "id": self.id,
            "name": self.name,
            "plugin": self.plugin,
            "timeout": self.timeout.map(|t| t.as_millis() as u64),
            "options": self.options,
            "exitCode": self.exit_code,
            "startTime": self.start_time.map(|t| t.timestamp_millis()),
            "endTime": self.end_time.map(|t| t.timestamp_millis()),
        })
    }

    /// Transition to `running` and record the start time
    pub(crate) fn start(&mut self) {
        self.state = StepState::Running;
        self.start_time = Some(Utc::now());
    }

    /// Transition to a terminal state
    ///
    /// The end time is recorded for `completed` and `errored` only; a list
    /// that finished `failed` keeps it unset.
    pub(crate) fn finish(&mut self, state: StepState, error: Option<BuildError>) {
        self.state = state;
        if matches!(state, StepState::Completed | StepState::Errored) {
            self.end_time = Some(Utc::now());
        }
        if error.is_some() {
            self.error = error;
        }
    }

    pub(crate) fn set_error(&mut self, error: BuildError) {
        self.error = Some(error);
    }

    pub(crate) fn set_exit_code(&mut self, exit_code: i64) {
        self.exit_code = Some(exit_code);
    }
}

/// Parse a declaration timeout given in milliseconds
pub fn parse_timeout(value: Option<&Value>) -> Result<Option<Duration>> {
    match value {
        None | Some(Value::Bool(true)) => Ok(Some(DEFAULT_TIMEOUT)),
        Some(Value::Null) | Some(Value::Bool(false)) => Ok(None),
        Some(Value::Number(number)) => match number.as_f64() {
            Some(ms) if ms > 0.0 => Ok(Some(Duration::from_millis(ms.ceil() as u64))),
            _ => Ok(None),
        },
        Some(other) => {
            Err(BuildError::invalid(format!("timeout must be a number of milliseconds, got {other}")))
        }
    }
}

fn flag(options: &Value, key: &str) -> Result<Option<bool>> {
    match options.get(key) {
        None | Some(Value::Null) => Ok(None),
        Some(Value::Bool(value)) => Ok(Some(*value)),
        Some(other) => Err(BuildError::invalid(format!("{key} must be a boolean, got {other}"))),
    }
}

/// A unit of work in a build
///
/// Implementors provide access to their [`StepCore`] and, for container
/// steps, the command to run. The provided `run` drives the lifecycle.
#[async_trait]
pub trait Step: Send + Sync {
    fn core(&self) -> &StepCore;

    fn core_mut(&mut self) -> &mut StepCore;

    fn as_any(&self) -> &dyn Any;

    /// Command to run inside the container
    fn build_command(&self) -> Result<Vec<String>> {
        Err(BuildError::Unimplemented { method: "build_command" })
    }

    /// Human readable summary used in status updates
    fn description(&self) -> String {
        String::new()
    }

    /// Bytes fed to the command's standard input
    fn stdin(&self) -> Option<Vec<u8>> {
        None
    }

    fn to_json(&self) -> Value {
        self.core().to_json()
    }

    fn snapshot(&self) -> StepSnapshot {
        let core = self.core();
        StepSnapshot {
            id: core.id().to_string(),
            name: core.name().to_string(),
            plugin: core.plugin().to_string(),
            state: core.state(),
            description: self.description(),
        }
    }

    /// Report a status change to this step's observers and every enclosing level
    fn update_status(&self, ctx: &StepContext, change: StatusChange, context: Option<&str>) {
        let core = self.core();
        let update = StatusUpdate {
            context: context.map(str::to_string).unwrap_or_else(|| core.status_context()),
            status: Status {
                state: change.state,
                action: change.action.to_string(),
                description: change.description.unwrap_or_else(|| self.description()),
                task: self.to_json(),
            },
        };

        core.status().emit(&update);
        ctx.relay().emit_status(&update);
    }

    /// The step's own work, without lifecycle handling
    async fn execute(&mut self, ctx: &StepContext) -> Result<ExecResult> {
        exec_in_container(&*self, ctx).await
    }

    /// Run the step to completion
    ///
    /// Resolves once the step reached a terminal state. The returned error
    /// is also kept on the step.
    async fn run(&mut self, ctx: &StepContext) -> Result<()> {
        run_step(self, ctx).await
    }
}

/// Shared lifecycle: start, execute under the timeout, then finish
pub async fn run_step<S: Step + ?Sized>(step: &mut S, ctx: &StepContext) -> Result<()> {
    if step.core().state() != StepState::Pending {
        return Err(BuildError::AlreadyRun { name: step.core().name().to_string() });
    }

    step.core_mut().start();
    info!(step = %step.core().name(), plugin = %step.core().plugin(), "Running step");
    step.update_status(ctx, StatusChange::running(), None);

    let outcome = match step.core().timeout() {
        Some(limit) => {
            let result = tokio::time::timeout(limit, step.execute(ctx)).await;
            match result {
                Ok(result) => result,
                Err(_) => Err(handle_timeout(step, ctx, limit).await),
            }
        }
        None => step.execute(ctx).await,
    };

    let outcome = match outcome {
        Ok(ExecResult { exit_code }) => {
            step.core_mut().set_exit_code(exit_code);
            if exit_code == 0 {
                Ok(())
            } else {
                Err(BuildError::NonZeroExit { name: step.core().name().to_string(), exit_code })
            }
        }
        Err(err) => Err(err),
    };

    match outcome {
        Ok(()) => {
            step.core_mut().finish(StepState::Completed, None);
            debug!(step = %step.core().name(), elapsed = ?step.core().elapsed_time(), "Step completed");
            step.update_status(ctx, StatusChange::success(), None);
            Ok(())
        }
        Err(err) => {
            warn!(step = %step.core().name(), error = %err, "Step failed");
            step.core_mut().finish(StepState::Errored, Some(err.clone()));
            step.update_status(ctx, StatusChange::failed(&err), None);
            Err(err)
        }
    }
}

/// Record the timeout, notify observers and stop the container
///
/// The in-flight work has already been dropped, so a late completion can no
/// longer reach the caller.
async fn handle_timeout<S: Step + ?Sized>(
    step: &mut S,
    ctx: &StepContext,
    limit: Duration,
) -> BuildError {
    let name = step.core().name().to_string();
    let err = BuildError::Timeout { name: name.clone(), duration_ms: limit.as_millis() as u64 };

    warn!(step = %name, timeout = ?limit, "Step exceeded its timeout");
    step.core_mut().set_error(err.clone());
    let event = StepEvent::Timeout { step: step.snapshot(), message: err.to_string() };
    step.core().events().emit(&event);
    ctx.relay().emit_event(&event);

    if let Err(stop_err) = ctx.container().stop().await {
        warn!(step = %name, error = %stop_err, "Failed to stop container after timeout");
    }

    err
}

#[cfg(test)]
mod tests {
    use super::*;

    struct BareStep {
        core: StepCore,
    }

    impl Step for BareStep {
        fn core(&self) -> &StepCore {
            &self.core
        }

        fn core_mut(&mut self) -> &mut StepCore {
            &mut self.core
        }

        fn as_any(&self) -> &dyn Any {
            self
        }
    }

    #[test]
    fn test_from_options_defaults() {
        let core = StepCore::from_options("Shell", &json!({ "command": "make" })).unwrap();

        assert_eq!(core.name(), "Shell");
        assert_eq!(core.plugin(), "Shell");
        assert_eq!(core.timeout(), Some(DEFAULT_TIMEOUT));
        assert!(!core.continue_on_failure());
        assert!(!core.optional());
        assert_eq!(core.state(), StepState::Pending);
        assert!(Uuid::parse_str(core.id()).is_ok());
        assert_eq!(core.options()["command"], "make");
    }

    #[test]
    fn test_from_options_flags() {
        let core = StepCore::from_options(
            "Shell",
            &json!({ "id": "lint-1", "name": "lint", "continueOnFailure": true, "optional": true }),
        )
        .unwrap();

        assert_eq!(core.id(), "lint-1");
        assert_eq!(core.name(), "lint");
        assert!(core.continue_on_failure());
        assert!(core.optional());
        assert_eq!(core.status_context(), "Shell/lint");
    }

    #[test]
    fn test_from_options_rejects_bad_values() {
        assert!(StepCore::from_options("Shell", &json!("echo")).is_err());
        assert!(StepCore::from_options("Shell", &json!({ "optional": "yes" })).is_err());
        assert!(StepCore::from_options("Shell", &json!({ "name": 3 })).is_err());
    }

    #[test]
    fn test_parse_timeout() {
        assert_eq!(parse_timeout(None).unwrap(), Some(DEFAULT_TIMEOUT));
        assert_eq!(parse_timeout(Some(&json!(true))).unwrap(), Some(DEFAULT_TIMEOUT));
        assert_eq!(parse_timeout(Some(&json!(false))).unwrap(), None);
        assert_eq!(parse_timeout(Some(&json!(null))).unwrap(), None);
        assert_eq!(parse_timeout(Some(&json!(0))).unwrap(), None);
        assert_eq!(parse_timeout(Some(&json!(1500))).unwrap(), Some(Duration::from_millis(1500)));
        assert!(parse_timeout(Some(&json!("soon"))).is_err());
        assert_eq!(parse_timeout(Some(&json!(0.5))).unwrap(), Some(Duration::from_millis(1)));
        assert_eq!(parse_timeout(Some(&json!(2.2))).unwrap(), Some(Duration::from_millis(3)));
    }

    #[test]
    fn test_to_json_whitelist() {
        let core = StepCore::new("Shell", "build").with_timeout(Some(Duration::from_millis(50)));
        let value = core.to_json();
        let object = value.as_object().unwrap();

        let mut keys: Vec<&str> = object.keys().map(String::as_str).collect();
        let mut expected = JSON_ATTRIBUTES.to_vec();
        keys.sort();
        expected.sort();
        assert_eq!(keys, expected);

        assert_eq!(value["timeout"], 50);
        assert!(value["exitCode"].is_null());
        assert!(value["startTime"].is_null());
    }

    #[test]
    fn test_elapsed_time() {
        let mut core = StepCore::new("Shell", "build");
        assert!(core.elapsed_time().is_none());

        core.start();
        assert!(core.elapsed_time().is_none());

        core.finish(StepState::Completed, None);
        assert!(core.elapsed_time().is_some());
        assert!(core.to_json()["endTime"].is_i64());
    }

    #[test]
    fn test_base_contract_is_unimplemented() {
        let step = BareStep { core: StepCore::new("Bare", "bare") };
        let err = step.build_command().unwrap_err();

        assert!(matches!(err, BuildError::Unimplemented { method: "build_command" }));
        assert!(err.is_fatal());
        assert_eq!(step.description(), "");
        assert!(step.stdin().is_none());
    }
}

//! Ordered composite step
//!
//! A [`StepList`] runs its children one at a time, in order. A failing child
//! halts the list unless it is marked `continueOnFailure`; failures of
//! non-optional children are collected and turn the list `failed` once all
//! remaining children have run.

use std::any::Any;

use async_trait::async_trait;
use cibox_core::StepState;
use serde_json::Value;
use tracing::{info, warn};

use crate::context::StepContext;
use crate::error::{BuildError, Result, StepFailure};
use crate::events::{StatusChange, StepEvent};
use crate::step::{Step, StepCore};

/// Plugin name under which step lists are registered
pub const STEP_LIST_PLUGIN: &str = "StepList";

/// Sequential container of child steps
pub struct StepList {
    core: StepCore,
    steps: Vec<Box<dyn Step>>,
    position: usize,
    emit_errors: bool,
    step_errors: Vec<StepFailure>,
}

impl StepList {
    /// Create an empty list; lists never enforce a timeout of their own
    pub fn new(core: StepCore) -> Self {
        Self {
            core: core.with_timeout(None),
            steps: Vec::new(),
            position: 0,
            emit_errors: false,
            step_errors: Vec::new(),
        }
    }

    /// Build a list from its declaration and already constructed children
    pub fn from_options(options: &Value, steps: Vec<Box<dyn Step>>) -> Result<Self> {
        let core = StepCore::from_options(STEP_LIST_PLUGIN, options)?;
        let emit_errors = match options.get("emitErrors") {
            None | Some(Value::Null) => false,
            Some(Value::Bool(value)) => *value,
            Some(other) => {
                return Err(BuildError::invalid(format!("emitErrors must be a boolean, got {other}")))
            }
        };

        Ok(Self::new(core).with_steps(steps).with_emit_errors(emit_errors))
    }

    pub fn with_steps(mut self, steps: Vec<Box<dyn Step>>) -> Self {
        self.steps = steps;
        self
    }

    /// Emit an `Error` event for every failing child
    pub fn with_emit_errors(mut self, emit_errors: bool) -> Self {
        self.emit_errors = emit_errors;
        self
    }

    pub fn add_step(&mut self, step: Box<dyn Step>) {
        self.steps.push(step);
    }

    pub fn steps(&self) -> &[Box<dyn Step>] {
        &self.steps
    }

    pub fn step(&self, index: usize) -> Option<&dyn Step> {
        self.steps.get(index).map(|step| step.as_ref())
    }

    pub fn len(&self) -> usize {
        self.steps.len()
    }

    pub fn is_empty(&self) -> bool {
        self.steps.is_empty()
    }

    /// Index of the child currently (or last) run
    pub fn position(&self) -> usize {
        self.position
    }

    pub fn emit_errors(&self) -> bool {
        self.emit_errors
    }

    /// Failures of non-optional children collected so far
    pub fn step_errors(&self) -> &[StepFailure] {
        &self.step_errors
    }

    /// Handle a failed child; returns the error when the list must halt
    fn record_failure(
        &mut self,
        ctx: &StepContext,
        index: usize,
        error: BuildError,
    ) -> Option<BuildError> {
        let child = &self.steps[index];
        let core = child.core();

        if self.emit_errors {
            let event = StepEvent::Error { step: child.snapshot(), error: error.clone() };
            emit_lifecycle(&self.core, ctx, event);
        }

        if !core.optional() {
            self.step_errors.push(StepFailure {
                step_id: core.id().to_string(),
                name: core.name().to_string(),
                error: error.clone(),
            });
        }

        if core.continue_on_failure() {
            warn!(
                list = %self.core.name(),
                step = %core.name(),
                error = %error,
                "Continuing after step failure"
            );
            None
        } else {
            Some(error)
        }
    }

    fn finish(&mut self, ctx: &StepContext, state: StepState, error: Option<BuildError>) -> Result<()> {
        self.core.finish(state, error.clone());
        match error {
            None => {
                self.update_status(ctx, StatusChange::success(), None);
                Ok(())
            }
            Some(err) => {
                self.update_status(ctx, StatusChange::failed(&err), None);
                Err(err)
            }
        }
    }
}

/// Emit on the list itself and on every enclosing level
fn emit_lifecycle(core: &StepCore, ctx: &StepContext, event: StepEvent) {
    core.events().emit(&event);
    ctx.relay().emit_event(&event);
}

#[async_trait]
impl Step for StepList {
    fn core(&self) -> &StepCore {
        &self.core
    }

    fn core_mut(&mut self) -> &mut StepCore {
        &mut self.core
    }

    fn as_any(&self) -> &dyn Any {
        self
    }

    async fn run(&mut self, ctx: &StepContext) -> Result<()> {
        if self.core.state() != StepState::Pending {
            return Err(BuildError::AlreadyRun { name: self.core.name().to_string() });
        }

        self.core.start();
        info!(list = %self.core.name(), steps = self.steps.len(), "Running step list");
        self.update_status(ctx, StatusChange::running(), None);

        let child_ctx = ctx.nested(self.core.events().clone(), self.core.status().clone());
        let mut halted = None;

        for index in 0..self.steps.len() {
            self.position = index;
            let snapshot = self.steps[index].snapshot();
            emit_lifecycle(&self.core, ctx, StepEvent::StepStart { step: snapshot });

            let result = self.steps[index].run(&child_ctx).await;
            let error = result.err();

            emit_lifecycle(
                &self.core,
                ctx,
                StepEvent::StepEnd { step: self.steps[index].snapshot(), error: error.clone() },
            );

            if let Some(err) = error {
                if let Some(halt) = self.record_failure(ctx, index, err) {
                    halted = Some(halt);
                    break;
                }
            }
        }
        drop(child_ctx);

        if let Some(err) = halted {
            return self.finish(ctx, StepState::Errored, Some(err));
        }

        if self.step_errors.is_empty() {
            self.finish(ctx, StepState::Completed, None)
        } else {
            let err = BuildError::ChildStepsFailed {
                list: self.core.name().to_string(),
                failures: self.step_errors.clone(),
            };
            self.finish(ctx, StepState::Failed, Some(err))
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_from_options() {
        let list = StepList::from_options(
            &json!({ "name": "checks", "emitErrors": true, "timeout": 5000 }),
            Vec::new(),
        )
        .unwrap();

        assert_eq!(list.core().name(), "checks");
        assert_eq!(list.core().plugin(), STEP_LIST_PLUGIN);
        assert!(list.emit_errors());
        assert!(list.core().timeout().is_none());
        assert!(list.is_empty());
        assert_eq!(list.position(), 0);
    }

    #[test]
    fn test_rejects_bad_emit_errors() {
        assert!(StepList::from_options(&json!({ "emitErrors": "always" }), Vec::new()).is_err());
    }

    #[test]
    fn test_add_step() {
        let mut list = StepList::new(StepCore::new(STEP_LIST_PLUGIN, "outer"));
        list.add_step(Box::new(StepList::new(StepCore::new(STEP_LIST_PLUGIN, "inner"))));

        assert_eq!(list.len(), 1);
        assert_eq!(list.step(0).map(|s| s.core().name().to_string()), Some("inner".to_string()));
        assert!(list.step(1).is_none());
    }
}

//! Step lifecycle events and status changes

use cibox_core::{StatusState, StepState};
use serde::Serialize;

use crate::error::BuildError;

/// Point-in-time view of a step attached to lifecycle events
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct StepSnapshot {
    pub id: String,
    pub name: String,
    pub plugin: String,
    pub state: StepState,
    pub description: String,
}

/// Lifecycle notifications raised by steps and step lists
#[derive(Debug, Clone)]
pub enum StepEvent {
    /// A step list is about to run a child
    StepStart { step: StepSnapshot },
    /// A step list's child has finished
    StepEnd { step: StepSnapshot, error: Option<BuildError> },
    /// The step exceeded its timeout
    Timeout { step: StepSnapshot, message: String },
    /// A child of an error-emitting step list failed
    Error { step: StepSnapshot, error: BuildError },
}

impl StepEvent {
    /// The step the event is about
    pub fn step(&self) -> &StepSnapshot {
        match self {
            Self::StepStart { step }
            | Self::StepEnd { step, .. }
            | Self::Timeout { step, .. }
            | Self::Error { step, .. } => step,
        }
    }

    /// Short event name
    pub fn kind(&self) -> &'static str {
        match self {
            Self::StepStart { .. } => "stepStart",
            Self::StepEnd { .. } => "stepEnd",
            Self::Timeout { .. } => "timeout",
            Self::Error { .. } => "error",
        }
    }
}

/// Status change reported by a step to an external reporter
#[derive(Debug, Clone, PartialEq)]
pub struct StatusChange {
    pub state: StatusState,
    pub action: &'static str,
    /// Overrides the step description when set
    pub description: Option<String>,
}

impl StatusChange {
    pub fn running() -> Self {
        Self { state: StatusState::Pending, action: "running", description: None }
    }

    pub fn success() -> Self {
        Self { state: StatusState::Success, action: "finished", description: None }
    }

    pub fn failed(error: &BuildError) -> Self {
        Self { state: StatusState::Error, action: "finished", description: Some(error.to_string()) }
    }
}

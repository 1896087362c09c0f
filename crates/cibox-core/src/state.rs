//! Step state and status-update vocabularies
//!
//! Two distinct vocabularies live here. [`StepState`] is the internal
//! lifecycle of a step; [`StatusState`] is what gets reported to external
//! status consumers. They must not be conflated.

use std::fmt;

use serde::{Deserialize, Serialize};

/// Internal lifecycle state of a step
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum StepState {
    /// Created, not yet run
    #[default]
    Pending,
    /// Currently running
    Running,
    /// Finished without error
    Completed,
    /// Finished with an error
    Errored,
    /// Step list finished with accumulated child errors
    Failed,
}

impl StepState {
    /// Whether no further transitions can happen
    pub fn is_terminal(&self) -> bool {
        matches!(self, Self::Completed | Self::Errored | Self::Failed)
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Pending => "pending",
            Self::Running => "running",
            Self::Completed => "completed",
            Self::Errored => "errored",
            Self::Failed => "failed",
        }
    }
}

impl fmt::Display for StepState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// State reported in a status update
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum StatusState {
    Pending,
    Running,
    Success,
    Error,
}

/// Body of a status update
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Status {
    /// Reported state
    pub state: StatusState,
    /// What the step is doing, e.g. `running` or `finished`
    pub action: String,
    /// Human readable description
    pub description: String,
    /// Serialized snapshot of the step that produced the update
    pub task: serde_json::Value,
}

/// Status update event emitted by a step
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StatusUpdate {
    /// Reporting context, `"{plugin}/{name}"` unless overridden
    pub context: String,
    pub status: Status,
}

//! Docker-related types and structures

use std::collections::HashMap;

use serde::{Deserialize, Serialize};

/// Container state
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum ContainerState {
    /// Container is being created
    Creating,
    /// Container is running
    Running,
    /// Container is restarting
    Restarting,
    /// Container has exited
    Exited(i64),
    /// Container is paused
    Paused,
    /// Container is being removed
    Removing,
    /// Container is dead
    Dead,
    /// The daemon did not report a state
    Unknown,
}

/// Container info
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ContainerInfo {
    /// Container ID
    pub id: String,
    /// Container name
    pub name: String,
    /// Image used
    pub image: String,
    /// Current state
    pub state: ContainerState,
    /// Creation time
    pub created: String,
    /// Labels
    pub labels: HashMap<String, String>,
}

/// When to pull the container image before provisioning
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum PullPolicy {
    /// Always pull
    Always,
    /// Pull only when the image is missing locally
    #[default]
    IfNotPresent,
    /// Never pull
    Never,
}

/// Parameters of one exec session
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ExecSpec {
    /// Command argv
    pub command: Vec<String>,
    /// Environment as `KEY=value` entries
    pub env: Vec<String>,
    /// Working directory inside the container
    pub working_dir: Option<String>,
    /// User to run as
    pub user: Option<String>,
    /// Whether an input stream will be attached
    pub attach_stdin: bool,
}

impl ExecSpec {
    /// Create a spec for a command
    pub fn new(command: Vec<String>) -> Self {
        Self { command, ..Default::default() }
    }
}

/// Truncate a container or exec id for log correlation
pub fn short_id(id: &str) -> &str {
    id.get(..12).unwrap_or(id)
}

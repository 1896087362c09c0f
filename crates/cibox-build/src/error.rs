//! Error types for the step execution engine

use std::sync::Arc;

use cibox_docker::DockerError;
use thiserror::Error;

/// A child failure recorded by a step list
#[derive(Debug, Clone)]
pub struct StepFailure {
    /// Id of the failing child
    pub step_id: String,
    /// Name of the failing child
    pub name: String,
    /// The error the child finished with
    pub error: BuildError,
}

/// Build-specific error types
///
/// Foreign errors are held behind `Arc` so a step can keep its last failure
/// while also handing it to the caller.
#[derive(Error, Debug, Clone)]
pub enum BuildError {
    /// A method every plugin must provide was called on the base contract
    #[error("{method} must be implemented by the step plugin")]
    Unimplemented { method: &'static str },

    /// No container assigned to the build
    #[error("No container has been assigned to the build")]
    MissingContainer,

    /// The build container can only be assigned once
    #[error("A container has already been assigned to the build")]
    ContainerAlreadySet,

    /// No root step assigned to the build
    #[error("No step has been assigned to the build")]
    MissingStep,

    /// A step or build was run a second time
    #[error("{name} has already been run")]
    AlreadyRun { name: String },

    /// The build output stream was already handed out
    #[error("The build output stream has already been taken")]
    StreamTaken,

    /// Step exceeded its allotted time
    #[error("{name} exited due to timeout.")]
    Timeout { name: String, duration_ms: u64 },

    /// The step command finished with a non-zero exit code
    #[error("{name} exited with code {exit_code}")]
    NonZeroExit { name: String, exit_code: i64 },

    /// The exec session failed; the original error is kept as the source
    #[error("{name} failed to execute: {source}")]
    Exec {
        name: String,
        #[source]
        source: Arc<DockerError>,
    },

    /// A step declaration named a plugin that is not registered
    #[error("{0} is not a valid step plugin.")]
    UnknownPlugin(String),

    /// A step declaration could not be interpreted
    #[error("Invalid step declaration: {reason}")]
    InvalidDeclaration { reason: String },

    /// One or more non-optional children of a step list failed
    #[error("{list}: a child step experienced an error")]
    ChildStepsFailed { list: String, failures: Vec<StepFailure> },

    /// Serialization error
    #[error("Serialization error: {0}")]
    Serialization(#[source] Arc<serde_json::Error>),
}

/// Result type alias for build operations
pub type Result<T> = std::result::Result<T, BuildError>;

impl From<serde_json::Error> for BuildError {
    fn from(err: serde_json::Error) -> Self {
        Self::Serialization(Arc::new(err))
    }
}

impl BuildError {
    /// Wrap an exec failure of the named step
    pub fn exec(name: impl Into<String>, source: DockerError) -> Self {
        Self::Exec { name: name.into(), source: Arc::new(source) }
    }

    /// Create an invalid declaration error
    pub fn invalid(reason: impl Into<String>) -> Self {
        Self::InvalidDeclaration { reason: reason.into() }
    }

    /// Check if this is a step timeout
    pub fn is_timeout(&self) -> bool {
        matches!(self, Self::Timeout { .. })
    }

    /// Programming errors that must never be retried or recovered
    pub fn is_fatal(&self) -> bool {
        match self {
            Self::Unimplemented { .. } | Self::MissingContainer | Self::AlreadyRun { .. } => true,
            Self::Exec { source, .. } => matches!(source.as_ref(), DockerError::MissingContainer),
            _ => false,
        }
    }

    /// Child failures wrapped by a step list error
    pub fn failures(&self) -> &[StepFailure] {
        match self {
            Self::ChildStepsFailed { failures, .. } => failures,
            _ => &[],
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_messages() {
        let err = BuildError::UnknownPlugin("Teleport".to_string());
        assert_eq!(err.to_string(), "Teleport is not a valid step plugin.");

        let err = BuildError::Timeout { name: "compile".to_string(), duration_ms: 2 };
        assert_eq!(err.to_string(), "compile exited due to timeout.");
        assert!(err.is_timeout());
    }

    #[test]
    fn test_exec_error_preserves_source() {
        let err = BuildError::exec("install", DockerError::execution("daemon went away"));
        let source = std::error::Error::source(&err).unwrap();
        assert!(source.to_string().contains("daemon went away"));
        assert!(!err.is_fatal());

        let err = BuildError::exec("install", DockerError::MissingContainer);
        assert!(err.is_fatal());
    }

    #[test]
    fn test_failures_accessor() {
        let child = BuildError::NonZeroExit { name: "lint".to_string(), exit_code: 1 };
        let err = BuildError::ChildStepsFailed {
            list: "checks".to_string(),
            failures: vec![StepFailure {
                step_id: "1".to_string(),
                name: "lint".to_string(),
                error: child,
            }],
        };

        assert_eq!(err.failures().len(), 1);
        assert_eq!(err.failures()[0].name, "lint");
        assert_eq!(err.to_string(), "checks: a child step experienced an error");
        assert!(BuildError::MissingStep.failures().is_empty());
    }
}

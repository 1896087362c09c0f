//! Docker-specific error types

use std::io;

use thiserror::Error;

/// Docker-specific error type
#[derive(Error, Debug)]
pub enum DockerError {
    /// Bollard client error
    #[error("Docker client error: {0}")]
    Client(#[from] bollard::errors::Error),

    /// I/O error on an attached stream
    #[error("Docker stream I/O error: {0}")]
    Io(#[from] io::Error),

    /// Pull failed
    #[error("Docker pull failed for image {image}: {reason}")]
    PullFailed { image: String, reason: String },

    /// Container execution failed
    #[error("Container execution failed: {reason}")]
    ExecutionFailed { reason: String },

    /// An exec session was constructed without a container
    #[error("A container is required to run an exec session")]
    MissingContainer,

    /// The exec session already ran; sessions are not restartable
    #[error("Exec session has already been started")]
    AlreadyStarted,

    /// Exec creation kept failing with a transient error
    #[error("Maximum number of retries exceeded ({attempts} retries)")]
    MaxRetriesExceeded {
        attempts: u32,
        #[source]
        source: Box<DockerError>,
    },
}

/// Result type alias for Docker operations
pub type Result<T> = std::result::Result<T, DockerError>;

impl DockerError {
    /// Create an execution failure
    pub fn execution(reason: impl Into<String>) -> Self {
        Self::ExecutionFailed { reason: reason.into() }
    }

    /// Whether this is the broken-pipe failure seen when the daemon socket
    /// drops a write during exec creation
    pub fn is_broken_pipe(&self) -> bool {
        if let Self::Io(err) = self {
            if err.kind() == io::ErrorKind::BrokenPipe {
                return true;
            }
        }

        let mut current: Option<&(dyn std::error::Error + 'static)> = Some(self);
        while let Some(err) = current {
            if let Some(io_err) = err.downcast_ref::<io::Error>() {
                if io_err.kind() == io::ErrorKind::BrokenPipe {
                    return true;
                }
            }
            let message = err.to_string().to_lowercase();
            if message.contains("broken pipe") || message.contains("epipe") {
                return true;
            }
            current = err.source();
        }

        false
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_broken_pipe_detection() {
        let err = DockerError::Io(io::Error::new(io::ErrorKind::BrokenPipe, "socket closed"));
        assert!(err.is_broken_pipe());

        let err = DockerError::execution("write EPIPE");
        assert!(err.is_broken_pipe());

        let err = DockerError::execution("no such container");
        assert!(!err.is_broken_pipe());

        let err = DockerError::Io(io::Error::new(io::ErrorKind::ConnectionRefused, "refused"));
        assert!(!err.is_broken_pipe());
    }

    #[test]
    fn test_max_retries_message() {
        let err = DockerError::MaxRetriesExceeded {
            attempts: 3,
            source: Box::new(DockerError::execution("write EPIPE")),
        };
        assert!(err.to_string().starts_with("Maximum number of retries exceeded"));
    }
}

//! Docker integration for cibox
//!
//! This crate defines the narrow container capability the build engine
//! runs against, a Docker-backed implementation of it, and
//! [`ContainerExec`], the wrapper around one exec session.

pub mod client;
pub mod container;
pub mod decode;
pub mod error;
pub mod exec;
pub mod image;
pub mod service;
pub mod types;

pub use client::{DockerConfig, DockerService};
pub use container::{ContainerManager, ContainerSpec, DockerContainer, VolumeMount};
pub use decode::{decode_frames, Utf8Decoder};
pub use error::{DockerError, Result};
pub use exec::{ContainerExec, ExecEvent, ExecPhase, ExecResult, DEFAULT_RETRIES, DEFAULT_RETRY_DELAY};
pub use image::ImageManager;
pub use service::{Container, ExecAttachment, ExecInspection, LogOutput, OutputStream};
pub use types::{short_id, ContainerInfo, ContainerState, ExecSpec, PullPolicy};

//! Core types shared by the cibox build engine
//!
//! This crate provides the output record format, the step and status
//! vocabularies, the event emitter used for subscriptions, and the
//! common error type.

pub mod error;
pub mod events;
pub mod output;
pub mod state;

pub use error::{Error, Result};
pub use events::EventEmitter;
pub use output::{output_channel, OutputChunk, OutputReceiver, OutputSink, StreamKind};
pub use state::{Status, StatusState, StatusUpdate, StepState};

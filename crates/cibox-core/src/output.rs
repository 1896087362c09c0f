//! Output records produced by steps
//!
//! Every chunk a step writes to stdout or stderr becomes an [`OutputChunk`]
//! tagged with the step id and a millisecond timestamp. Chunks travel over
//! an unbounded channel; the receiving side ends once every sender has been
//! dropped, which is how step lists join the streams of their children.

use chrono::Utc;
use serde::{Deserialize, Serialize};
use tokio::sync::mpsc;

use crate::error::Result;

/// Which substream a chunk came from
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum StreamKind {
    Stdout,
    Stderr,
}

/// One record of step output
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct OutputChunk {
    /// Originating substream
    pub stream: StreamKind,
    /// Output text
    pub data: String,
    /// Id of the step that produced the output
    pub step_id: String,
    /// Epoch milliseconds at which the chunk was received
    pub time: i64,
}

impl OutputChunk {
    /// Create a chunk stamped with the current time
    pub fn new(stream: StreamKind, data: impl Into<String>, step_id: impl Into<String>) -> Self {
        Self {
            stream,
            data: data.into(),
            step_id: step_id.into(),
            time: Utc::now().timestamp_millis(),
        }
    }

    /// Serialize as one line of a JSON-lines transcript, newline included
    pub fn to_json_line(&self) -> Result<String> {
        let mut line = serde_json::to_string(self)?;
        line.push('\n');
        Ok(line)
    }
}

/// Sending half of an output stream
pub type OutputSink = mpsc::UnboundedSender<OutputChunk>;

/// Receiving half of an output stream
pub type OutputReceiver = mpsc::UnboundedReceiver<OutputChunk>;

/// Create a new output stream
pub fn output_channel() -> (OutputSink, OutputReceiver) {
    mpsc::unbounded_channel()
}

//! Text decoding of attached exec output
//!
//! The daemon frames output at the process's write boundaries, so a
//! multi-byte character can straddle two frames. Each substream keeps the
//! incomplete tail of a frame until the rest of the character arrives.

use std::collections::VecDeque;

use cibox_core::StreamKind;
use futures::{Stream, StreamExt};

use crate::error::Result;
use crate::service::{LogOutput, OutputStream};

/// Incremental UTF-8 decoder for one substream
#[derive(Debug, Default)]
pub struct Utf8Decoder {
    pending: Vec<u8>,
}

impl Utf8Decoder {
    pub fn new() -> Self {
        Self::default()
    }

    /// Decode the complete characters available so far
    ///
    /// Invalid sequences become U+FFFD. A trailing incomplete sequence is
    /// held back for the next call.
    pub fn decode(&mut self, bytes: &[u8]) -> String {
        self.pending.extend_from_slice(bytes);

        let mut text = String::new();
        let mut start = 0;
        loop {
            match std::str::from_utf8(&self.pending[start..]) {
                Ok(valid) => {
                    text.push_str(valid);
                    start = self.pending.len();
                    break;
                }
                Err(err) => {
                    let valid_end = start + err.valid_up_to();
                    text.push_str(&String::from_utf8_lossy(&self.pending[start..valid_end]));
                    match err.error_len() {
                        Some(len) => {
                            text.push(char::REPLACEMENT_CHARACTER);
                            start = valid_end + len;
                        }
                        None => {
                            start = valid_end;
                            break;
                        }
                    }
                }
            }
        }

        self.pending.drain(..start);
        text
    }

    /// Flush whatever is left once the substream ended
    pub fn finish(&mut self) -> String {
        let rest = String::from_utf8_lossy(&self.pending).into_owned();
        self.pending.clear();
        rest
    }

    /// Bytes waiting for the rest of a character
    pub fn pending(&self) -> usize {
        self.pending.len()
    }
}

struct Demux<S> {
    frames: S,
    stdout: Utf8Decoder,
    stderr: Utf8Decoder,
    tail: VecDeque<LogOutput>,
    ended: bool,
}

impl<S> Demux<S> {
    fn decoder(&mut self, kind: StreamKind) -> &mut Utf8Decoder {
        match kind {
            StreamKind::Stdout => &mut self.stdout,
            StreamKind::Stderr => &mut self.stderr,
        }
    }
}

fn chunk(kind: StreamKind, text: String) -> LogOutput {
    match kind {
        StreamKind::Stdout => LogOutput::Stdout(text),
        StreamKind::Stderr => LogOutput::Stderr(text),
    }
}

/// Turn raw output frames into text chunks per substream
///
/// Empty chunks are skipped. Leftover bytes of either substream are flushed
/// lossily after the last frame.
pub fn decode_frames<S>(frames: S) -> OutputStream
where
    S: Stream<Item = Result<(StreamKind, Vec<u8>)>> + Send + 'static,
{
    let state = Demux {
        frames: Box::pin(frames),
        stdout: Utf8Decoder::new(),
        stderr: Utf8Decoder::new(),
        tail: VecDeque::new(),
        ended: false,
    };

    Box::pin(futures::stream::unfold(state, |mut state| async move {
        loop {
            if state.ended {
                return state.tail.pop_front().map(|output| (Ok(output), state));
            }

            match state.frames.next().await {
                Some(Ok((kind, bytes))) => {
                    let text = state.decoder(kind).decode(&bytes);
                    if !text.is_empty() {
                        return Some((Ok(chunk(kind, text)), state));
                    }
                }
                Some(Err(err)) => return Some((Err(err), state)),
                None => {
                    state.ended = true;
                    for kind in [StreamKind::Stdout, StreamKind::Stderr] {
                        let rest = state.decoder(kind).finish();
                        if !rest.is_empty() {
                            state.tail.push_back(chunk(kind, rest));
                        }
                    }
                }
            }
        }
    }))
}

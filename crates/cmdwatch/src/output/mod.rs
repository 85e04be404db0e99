//! Output sinks for command stdout/stderr
//!
//! - [`OutputBuffer`]: everything a command writes, read on demand as lines
//! - [`OutputStream`]: completed lines pushed to a channel as they arrive

mod buffer;
mod stream;

use std::sync::Arc;

use tokio::io::{AsyncRead, AsyncReadExt};
use tracing::{trace, warn};

use crate::error::ProcessError;

pub use buffer::OutputBuffer;
pub use stream::{
    LineBufferOverflow, OutputStream, DEFAULT_LINE_BUFFER_SIZE, DEFAULT_STREAM_CHAN_SIZE,
};

const READ_CHUNK_SIZE: usize = 8192;

/// Where one of the child's output pipes goes: a buffer, a stream, or both
#[derive(Debug, Default)]
pub(crate) struct OutputSink {
    pub(crate) buffer: Option<Arc<OutputBuffer>>,
    pub(crate) stream: Option<OutputStream>,
    /// The stream overflowed mid-line; drop bytes through the next newline
    skip_line: bool,
}

impl OutputSink {
    pub(crate) fn new(buffer: Option<Arc<OutputBuffer>>, stream: Option<OutputStream>) -> Self {
        Self {
            buffer,
            stream,
            skip_line: false,
        }
    }

    pub(crate) fn is_empty(&self) -> bool {
        self.buffer.is_none() && self.stream.is_none()
    }

    /// Buffer first, it cannot fail; then the stream.
    ///
    /// After an overflow the stream resumes at the next line, so the rest of
    /// the overflowed line is never sent as a line of its own.
    async fn write(&mut self, chunk: &[u8]) -> Result<(), LineBufferOverflow> {
        if let Some(buffer) = &self.buffer {
            buffer.write(chunk);
        }

        let Some(stream) = &mut self.stream else {
            return Ok(());
        };
        let mut chunk = chunk;
        if self.skip_line {
            match chunk.iter().position(|&b| b == b'\n') {
                Some(newline) => {
                    chunk = &chunk[newline + 1..];
                    self.skip_line = false;
                }
                None => return Ok(()),
            }
        }

        if let Err(overflow) = stream.write(chunk).await {
            stream.discard_fragment();
            self.skip_line = true;
            return Err(overflow);
        }
        Ok(())
    }
}

/// Copy `reader` into `sink` until EOF.
///
/// Keeps reading after a stream overflow so the child never blocks on a
/// full pipe; the stream drops the overflowed line and picks up at the line
/// after it. The first error is returned once the pipe is drained.
pub(crate) async fn pump<R>(
    mut reader: R,
    mut sink: OutputSink,
    label: &'static str,
) -> Option<ProcessError>
where
    R: AsyncRead + Unpin,
{
    let mut first_error = None;
    let mut chunk = vec![0u8; READ_CHUNK_SIZE];

    loop {
        let n = match reader.read(&mut chunk).await {
            Ok(0) => break,
            Ok(n) => n,
            Err(e) => {
                warn!(stream = label, error = %e, "Failed reading process output");
                if first_error.is_none() {
                    first_error = Some(ProcessError::Pipe(Arc::new(e)));
                }
                break;
            }
        };
        trace!(stream = label, bytes = n, "Read process output");

        if let Err(overflow) = sink.write(&chunk[..n]).await {
            warn!(
                stream = label,
                buffer_size = overflow.buffer_size,
                dropped = overflow.line.len(),
                "Line buffer overflow, skipping to next line"
            );
            if first_error.is_none() {
                first_error = Some(ProcessError::Output(overflow));
            }
        }
    }

    if let Some(stream) = &mut sink.stream {
        stream.finish().await;
    }
    first_error
}

//! Real-time, line-by-line output

use thiserror::Error;
use tokio::sync::mpsc;
use tracing::trace;

/// Default size of the [`OutputStream`] line buffer.
///
/// Usually sufficient; if [`LineBufferOverflow`] errors occur, increase it
/// with [`OutputStream::set_buffer_size`] or
/// [`CmdOptions::line_buffer_size`](crate::CmdOptions::line_buffer_size).
pub const DEFAULT_LINE_BUFFER_SIZE: usize = 16384;

/// Default capacity of the line channels a streaming [`Cmd`](crate::Cmd)
/// creates. Too small a channel makes writes block more often.
pub const DEFAULT_STREAM_CHAN_SIZE: usize = 1000;

/// Returned by [`OutputStream::write`] when the line buffer fills before a
/// newline terminates the line.
///
/// Any lines completed earlier in the same write were already sent. The
/// pending fragment is kept, so the stream is still usable afterwards.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[error(
    "line does not contain newline and is {} bytes too long to buffer (buffer size: {buffer_size})",
    excess(.line, .buffer_size)
)]
pub struct LineBufferOverflow {
    /// Unterminated line that could not be buffered
    pub line: String,
    /// Line buffer capacity
    pub buffer_size: usize,
    /// Free bytes in the line buffer when the write failed
    pub buffer_free: usize,
    /// Bytes of the write consumed, up through the last completed line
    pub consumed: usize,
}

fn excess(line: &str, buffer_size: &usize) -> usize {
    line.len().saturating_sub(*buffer_size)
}

/// Splits written bytes into lines and sends each completed line on a
/// caller-provided channel.
///
/// Lines end with `\n`, optionally preceded by `\r`; both are stripped.
/// Bytes after the last newline are held in a fixed-size line buffer until a
/// later write terminates them.
///
/// `write` waits on the channel when it is full, so the consumer must keep
/// receiving or the producer stalls. The stream never closes the channel
/// itself; it ends once every sender is dropped.
#[derive(Debug)]
pub struct OutputStream {
    tx: mpsc::Sender<String>,
    fragment: Vec<u8>,
    capacity: usize,
}

impl OutputStream {
    /// Create a stream that sends lines on `tx`
    pub fn new(tx: mpsc::Sender<String>) -> Self {
        Self {
            tx,
            fragment: Vec::with_capacity(DEFAULT_LINE_BUFFER_SIZE),
            capacity: DEFAULT_LINE_BUFFER_SIZE,
        }
    }

    /// Replace the line buffer with one of `size` bytes.
    ///
    /// Call before the first write; any pending fragment is discarded.
    pub fn set_buffer_size(&mut self, size: usize) {
        self.capacity = size;
        self.fragment = Vec::with_capacity(size);
    }

    /// Line buffer capacity in bytes
    pub fn buffer_size(&self) -> usize {
        self.capacity
    }

    /// Bytes currently held for an unterminated line
    pub fn pending(&self) -> usize {
        self.fragment.len()
    }

    /// The sender lines are delivered on
    pub fn lines_sender(&self) -> &mpsc::Sender<String> {
        &self.tx
    }

    /// Write `buf`, sending every line it completes.
    ///
    /// Returns the number of bytes consumed, always `buf.len()` on success.
    pub async fn write(&mut self, buf: &[u8]) -> Result<usize, LineBufferOverflow> {
        let mut first = 0;

        while let Some(offset) = buf[first..].iter().position(|&b| b == b'\n') {
            let newline = first + offset;

            let mut line = Vec::with_capacity(self.fragment.len() + offset);
            line.extend_from_slice(&self.fragment);
            line.extend_from_slice(&buf[first..newline]);
            // the "\r" of a "\r\n" may have arrived in an earlier write
            if line.last() == Some(&b'\r') {
                line.pop();
            }
            self.fragment.clear();
            self.send(line).await;

            first = newline + 1;
        }

        if first < buf.len() {
            let remain = &buf[first..];
            let free = self.capacity.saturating_sub(self.fragment.len());
            if remain.len() > free {
                let mut line = self.fragment.clone();
                line.extend_from_slice(remain);
                return Err(LineBufferOverflow {
                    line: String::from_utf8_lossy(&line).into_owned(),
                    buffer_size: self.capacity,
                    buffer_free: free,
                    consumed: first,
                });
            }
            self.fragment.extend_from_slice(remain);
        }

        Ok(buf.len())
    }

    /// Send the pending fragment, if any, as a final line.
    ///
    /// The stream has no notion of end of input; call this once the writer
    /// is known to be finished.
    pub async fn finish(&mut self) {
        if !self.fragment.is_empty() {
            let line = self.fragment.clone();
            self.fragment.clear();
            self.send(line).await;
        }
    }

    /// Drop the pending fragment without sending it
    pub fn discard_fragment(&mut self) {
        self.fragment.clear();
    }

    async fn send(&self, line: Vec<u8>) {
        let text = String::from_utf8(line)
            .unwrap_or_else(|e| String::from_utf8_lossy(e.as_bytes()).into_owned());
        if let Err(mpsc::error::SendError(dropped)) = self.tx.send(text).await {
            trace!(len = dropped.len(), "Line receiver dropped, discarding line");
        }
    }
}

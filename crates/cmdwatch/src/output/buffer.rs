//! Unbounded output buffer, readable while being written

use parking_lot::Mutex;

#[derive(Debug, Default)]
struct BufferState {
    /// Bytes not yet split into lines
    pending: Vec<u8>,
    /// Lines split so far
    lines: Vec<String>,
}

/// Output saved line by line in an unbounded buffer.
///
/// Safe to read from any number of tasks while a command is still writing.
/// Each call to [`lines`](Self::lines) returns every line completed so far,
/// so successive calls return a growing, prefix-stable list. An unterminated
/// trailing line stays pending until a later write ends it with `\n`.
///
/// Lines are split on `\n` only; a `\r` before it is kept as part of the
/// line. [`OutputStream`](super::OutputStream) strips it instead.
#[derive(Debug, Default)]
pub struct OutputBuffer {
    state: Mutex<BufferState>,
}

impl OutputBuffer {
    /// Create an empty buffer
    pub fn new() -> Self {
        Self::default()
    }

    /// Append `bytes`. Never fails; returns `bytes.len()`.
    pub fn write(&self, bytes: &[u8]) -> usize {
        self.state.lock().pending.extend_from_slice(bytes);
        bytes.len()
    }

    /// All lines completed so far
    pub fn lines(&self) -> Vec<String> {
        let mut state = self.state.lock();
        state.split_complete_lines();
        state.lines.clone()
    }

    /// All lines, including an unterminated trailing line.
    ///
    /// Used once the writer has finished; later writes start a new line.
    pub fn final_lines(&self) -> Vec<String> {
        let mut state = self.state.lock();
        state.split_complete_lines();
        if !state.pending.is_empty() {
            let tail = std::mem::take(&mut state.pending);
            state.lines.push(String::from_utf8_lossy(&tail).into_owned());
        }
        state.lines.clone()
    }

    /// Bytes written but not yet terminated by a newline
    pub fn pending_len(&self) -> usize {
        self.state.lock().pending.len()
    }
}

impl BufferState {
    fn split_complete_lines(&mut self) {
        let Some(last_newline) = self.pending.iter().rposition(|&b| b == b'\n') else {
            return;
        };

        let complete: Vec<u8> = self.pending.drain(..=last_newline).collect();
        self.lines.extend(
            complete[..last_newline]
                .split(|&b| b == b'\n')
                .map(|line| String::from_utf8_lossy(line).into_owned()),
        );
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_lines_grow_across_calls() {
        let buf = OutputBuffer::new();
        assert!(buf.lines().is_empty());

        buf.write(b"1\n");
        assert_eq!(buf.lines(), vec!["1"]);

        buf.write(b"2\n3");
        assert_eq!(buf.lines(), vec!["1", "2"]);
        assert_eq!(buf.pending_len(), 1);

        // No new output
        assert_eq!(buf.lines(), vec!["1", "2"]);

        buf.write(b"\n4\n");
        assert_eq!(buf.lines(), vec!["1", "2", "3", "4"]);
        assert_eq!(buf.pending_len(), 0);
    }

    #[test]
    fn test_blank_lines_kept() {
        let buf = OutputBuffer::new();
        buf.write(b"\nfoo\n\n");
        assert_eq!(buf.lines(), vec!["", "foo", ""]);
    }

    #[test]
    fn test_carriage_return_not_stripped() {
        // Differs from OutputStream, which strips the "\r"
        let buf = OutputBuffer::new();
        buf.write(b"foo\r\nbar\n");
        assert_eq!(buf.lines(), vec!["foo\r", "bar"]);
    }

    #[test]
    fn test_final_lines_flushes_tail() {
        let buf = OutputBuffer::new();
        buf.write(b"a\nb");
        assert_eq!(buf.lines(), vec!["a"]);
        assert_eq!(buf.final_lines(), vec!["a", "b"]);
        assert_eq!(buf.final_lines(), vec!["a", "b"]);
    }

    #[test]
    fn test_concurrent_write_and_read() {
        use std::sync::Arc;

        let buf = Arc::new(OutputBuffer::new());
        let writer = {
            let buf = Arc::clone(&buf);
            std::thread::spawn(move || {
                for i in 0..500 {
                    buf.write(format!("{i}\n").as_bytes());
                }
            })
        };

        let mut prev: Vec<String> = Vec::new();
        for _ in 0..100 {
            let cur = buf.lines();
            assert!(cur.len() >= prev.len());
            assert_eq!(&cur[..prev.len()], &prev[..]);
            prev = cur;
        }
        writer.join().unwrap();

        let all = buf.lines();
        assert_eq!(all.len(), 500);
        assert_eq!(all[499], "499");
    }
}

//! # cmdwatch
//!
//! **Purpose**: Run external commands with concurrent access to their output
//! and status
//!
//! A [`Cmd`] runs one process in a background task. Any number of tasks can
//! read its [`Status`] while it runs, stop it, or wait for it to finish.
//!
//! ## Features
//!
//! - **Buffered output**: stdout/stderr saved line by line, readable from
//!   [`Cmd::status`] at any time with a growing, prefix-stable line list
//! - **Streaming output**: completed lines sent to channels as they are
//!   written, with backpressure instead of dropped lines
//! - **Both at once**: each write fans out to the buffer and the stream
//! - **Process groups**: [`Cmd::stop`] terminates the command and its children
//! - **Status snapshots**: exit code, signal, launch errors, timestamps and
//!   runtime in one cloneable value
//!
//! ## Usage
//!
//! ```rust,no_run
//! use cmdwatch::{Cmd, CmdOptions};
//!
//! # #[tokio::main]
//! # async fn main() {
//! // Buffered: wait for the final status
//! let status = Cmd::new("env", Vec::<String>::new()).start().wait().await;
//! for line in &status.stdout {
//!     println!("{line}");
//! }
//!
//! // Streaming: read lines while the command runs
//! let cmd = Cmd::with_options(CmdOptions::streaming(), "make", ["all"]);
//! let mut lines = cmd.take_stdout_stream().expect("streaming enabled");
//! let completion = cmd.start();
//! while let Some(line) = lines.recv().await {
//!     println!("{line}");
//! }
//! let status = completion.wait().await;
//! println!("exit {}", status.exit);
//! # }
//! ```

pub mod cmd;
pub mod config;
pub mod error;
pub mod output;
pub mod status;

mod group;

pub use cmd::{Cmd, Completion, Done};
pub use config::{CmdConfig, CmdOptions};
pub use error::{ProcessError, Result};
pub use output::{
    LineBufferOverflow, OutputBuffer, OutputStream, DEFAULT_LINE_BUFFER_SIZE,
    DEFAULT_STREAM_CHAN_SIZE,
};
pub use status::Status;

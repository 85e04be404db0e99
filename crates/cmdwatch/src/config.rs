//! Command configuration

use std::collections::HashMap;
use std::path::PathBuf;

use serde::{Deserialize, Serialize};

use crate::error::{ProcessError, Result};
use crate::output::{DEFAULT_LINE_BUFFER_SIZE, DEFAULT_STREAM_CHAN_SIZE};

/// How a [`Cmd`](crate::Cmd) exposes output.
///
/// Deserializes with defaults for missing fields, so it can be embedded in a
/// host application's config file:
///
/// ```toml
/// [build]
/// streaming = true
/// line_buffer_size = 65536
/// ```
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct CmdOptions {
    /// Save stdout/stderr to [`Status::stdout`](crate::Status::stdout) and
    /// [`Status::stderr`](crate::Status::stderr)
    pub buffered: bool,
    /// Send stdout/stderr lines to channels as they are written
    pub streaming: bool,
    /// Line buffer size of each output stream
    pub line_buffer_size: usize,
    /// Capacity of each streaming channel
    pub stream_channel_size: usize,
}

impl Default for CmdOptions {
    fn default() -> Self {
        Self {
            buffered: true,
            streaming: false,
            line_buffer_size: DEFAULT_LINE_BUFFER_SIZE,
            stream_channel_size: DEFAULT_STREAM_CHAN_SIZE,
        }
    }
}

impl CmdOptions {
    /// Buffered output only
    pub fn buffered() -> Self {
        Self::default()
    }

    /// Streaming output only
    pub fn streaming() -> Self {
        Self {
            buffered: false,
            streaming: true,
            ..Self::default()
        }
    }

    /// Buffered and streaming output
    pub fn both() -> Self {
        Self {
            buffered: true,
            streaming: true,
            ..Self::default()
        }
    }

    /// Discard all output
    pub fn discard() -> Self {
        Self {
            buffered: false,
            streaming: false,
            ..Self::default()
        }
    }

    /// Set the line buffer size
    pub fn line_buffer_size(mut self, size: usize) -> Self {
        self.line_buffer_size = size;
        self
    }

    /// Set the streaming channel capacity
    pub fn stream_channel_size(mut self, size: usize) -> Self {
        self.stream_channel_size = size;
        self
    }

    /// True if output is observable at all
    pub fn captures_output(&self) -> bool {
        self.buffered || self.streaming
    }

    /// Check sizes are usable
    pub fn validate(&self) -> Result<()> {
        if self.streaming && self.line_buffer_size == 0 {
            return Err(ProcessError::InvalidConfig(
                "line_buffer_size must be greater than 0".to_string(),
            ));
        }
        if self.streaming && self.stream_channel_size == 0 {
            return Err(ProcessError::InvalidConfig(
                "stream_channel_size must be greater than 0".to_string(),
            ));
        }
        Ok(())
    }
}

/// Everything needed to run a command
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CmdConfig {
    /// Executable name or path
    pub name: String,
    /// Command arguments
    pub args: Vec<String>,
    /// Working directory (None = current dir)
    pub dir: Option<PathBuf>,
    /// Environment (None = inherit the parent's, Some = replace it)
    pub env: Option<HashMap<String, String>>,
    /// Output options
    pub options: CmdOptions,
}

impl CmdConfig {
    /// Create configuration for `name` with buffered output
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            args: vec![],
            dir: None,
            env: None,
            options: CmdOptions::default(),
        }
    }

    /// Set command arguments
    pub fn args<I, S>(mut self, args: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.args = args.into_iter().map(Into::into).collect();
        self
    }

    /// Set working directory
    pub fn dir(mut self, dir: impl Into<PathBuf>) -> Self {
        self.dir = Some(dir.into());
        self
    }

    /// Add a variable to the environment override.
    ///
    /// The first call switches from inheriting the parent environment to an
    /// environment holding only the variables set here.
    pub fn env(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.env
            .get_or_insert_with(HashMap::new)
            .insert(key.into(), value.into());
        self
    }

    /// Replace the environment override
    pub fn envs(mut self, env: HashMap<String, String>) -> Self {
        self.env = Some(env);
        self
    }

    /// Set output options
    pub fn options(mut self, options: CmdOptions) -> Self {
        self.options = options;
        self
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults_buffer_only() {
        let opts = CmdOptions::default();
        assert!(opts.buffered);
        assert!(!opts.streaming);
        assert_eq!(opts.line_buffer_size, DEFAULT_LINE_BUFFER_SIZE);
        assert_eq!(opts.stream_channel_size, DEFAULT_STREAM_CHAN_SIZE);
        assert!(opts.validate().is_ok());
    }

    #[test]
    fn test_partial_toml_uses_defaults() {
        let opts: CmdOptions = toml::from_str("streaming = true").unwrap();
        assert!(opts.buffered);
        assert!(opts.streaming);
        assert_eq!(opts.line_buffer_size, DEFAULT_LINE_BUFFER_SIZE);
    }

    #[test]
    fn test_json_round_trip() {
        let opts = CmdOptions::both().line_buffer_size(64);
        let json = serde_json::to_string(&opts).unwrap();
        let back: CmdOptions = serde_json::from_str(&json).unwrap();
        assert_eq!(back, opts);
    }

    #[test]
    fn test_validate_rejects_zero_sizes() {
        let err = CmdOptions::streaming().line_buffer_size(0).validate();
        assert!(matches!(err, Err(ProcessError::InvalidConfig(_))));

        let err = CmdOptions::streaming().stream_channel_size(0).validate();
        assert!(matches!(err, Err(ProcessError::InvalidConfig(_))));

        // Sizes only matter when streaming
        assert!(CmdOptions::buffered().line_buffer_size(0).validate().is_ok());
    }

    #[test]
    fn test_env_switches_to_override() {
        let config = CmdConfig::new("env");
        assert!(config.env.is_none());

        let config = config.env("FOO", "foo").env("BAR", "bar");
        let env = config.env.as_ref().unwrap();
        assert_eq!(env.len(), 2);
        assert_eq!(env["FOO"], "foo");
    }

    #[test]
    fn test_builder() {
        let config = CmdConfig::new("ls")
            .args(["-l", "-a"])
            .dir("/tmp")
            .options(CmdOptions::discard());
        assert_eq!(config.args, vec!["-l", "-a"]);
        assert_eq!(config.dir, Some(PathBuf::from("/tmp")));
        assert!(!config.options.captures_output());
    }
}

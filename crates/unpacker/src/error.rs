//! Error types for archive inspection operations.

use std::path::PathBuf;
use std::time::Duration;
use thiserror::Error;

/// Main error type for the library.
#[derive(Debug, Error)]
pub enum UnpackError {
    /// Attachment file not found at the specified path.
    #[error("Attachment not found: {0}")]
    NotFound(PathBuf),

    /// A temporary staging file could not be provided.
    #[error("Temp file error: {0}")]
    TempFile(#[from] TempFileError),

    /// The archive tool failed in a way that could not be absorbed.
    #[error("Process error: {0}")]
    Process(#[from] ProcessError),

    /// Configuration could not be loaded.
    #[error("Config error: {0}")]
    Config(#[from] ConfigError),

    /// An I/O error occurred while reading an attachment.
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

/// Failures of a single archive tool invocation.
#[derive(Debug, Error)]
pub enum ProcessError {
    /// The command could not be started at all.
    #[error("failed to spawn {command}: {source}")]
    Spawn {
        /// Program that was being started
        command: String,
        /// Underlying OS error
        #[source]
        source: std::io::Error,
    },

    /// The command exited with a nonzero status.
    #[error("command returned error code: {code} error={stderr}")]
    CommandError {
        /// Exit code reported by the OS
        code: i32,
        /// Captured standard error, newlines folded to spaces
        stderr: String,
    },

    /// The command was terminated by a signal.
    #[error("command terminated by signal: {signal}")]
    SignalTerminated {
        /// Signal number (or -1 where the platform does not report one)
        signal: i32,
        /// Captured standard error
        stderr: String,
    },

    /// The command outlived its deadline and was killed.
    #[error("command timed out after {after:?}")]
    TimedOut {
        /// Deadline that was exceeded
        after: Duration,
    },

    /// Writing the command's output into the caller's sink failed.
    #[error("failed writing command output: {0}")]
    Sink(#[source] std::io::Error),

    /// Reading the child's output streams failed.
    #[error("IO error talking to command: {0}")]
    Io(#[from] std::io::Error),
}

impl ProcessError {
    /// Standard error text captured before the failure, when there was any.
    pub fn stderr(&self) -> Option<&str> {
        match self {
            ProcessError::CommandError { stderr, .. }
            | ProcessError::SignalTerminated { stderr, .. } => Some(stderr),
            _ => None,
        }
    }

    /// Whether this failure is a deadline expiry.
    pub fn is_timeout(&self) -> bool {
        matches!(self, ProcessError::TimedOut { .. })
    }

    /// Whether this failure comes from the local host rather than the
    /// archive: the command could not be started or its output could not be
    /// read or stored.
    pub fn is_resource(&self) -> bool {
        matches!(
            self,
            ProcessError::Spawn { .. } | ProcessError::Sink(_) | ProcessError::Io(_)
        )
    }
}

/// Temp file allocation and release failures.
#[derive(Debug, Error)]
pub enum TempFileError {
    /// The filesystem could not provide a unique temp file.
    #[error("could not allocate temp file in {dir}: {source}")]
    Allocate {
        /// Directory the file was requested in
        dir: PathBuf,
        /// Underlying OS error
        #[source]
        source: std::io::Error,
    },

    /// Writing to or removing a staged file failed.
    #[error("temp file IO error on {path}: {source}")]
    Io {
        /// Path of the staged file
        path: PathBuf,
        /// Underlying OS error
        #[source]
        source: std::io::Error,
    },
}

/// Configuration loading failures.
#[derive(Debug, Error)]
pub enum ConfigError {
    /// The config file could not be read.
    #[error("cannot read config {path}: {source}")]
    Read {
        /// Config file path
        path: PathBuf,
        /// Underlying OS error
        #[source]
        source: std::io::Error,
    },

    /// The config file is not valid TOML for this schema.
    #[error("invalid config: {0}")]
    Parse(#[from] toml::de::Error),
}

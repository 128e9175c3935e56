//! Custom error types for the crate.
//!
//! `StreamError` is the single error type surfaced by the library. Most failures
//! inside the ingestion path are *not* fatal: discovery and decode errors are
//! logged by the component that hit them and the pipeline carries on. Only a few
//! operations hand errors back to the caller:
//!
//! - **Configuration**: loading or validating [`crate::config::StreamConfig`].
//! - **Directory**: `set_monitoring_directory` on a directory that cannot be
//!   opened or watched.
//! - **Reads**: a time-span request whose duration is not a positive multiple of
//!   the window duration.
//!
//! Decode failures (`ShortRead`, `RecordCount`, `Io`) are produced by the
//! incremental decoders and consumed by the window assembler, which abandons the
//! iteration and retries after a short delay.

use std::path::PathBuf;
use thiserror::Error;

/// Convenience alias for results using the crate error type.
pub type AppResult<T> = std::result::Result<T, StreamError>;

/// Errors produced by the streaming pipeline.
#[derive(Error, Debug)]
pub enum StreamError {
    /// Configuration could not be loaded or parsed
    #[error("Configuration error: {0}")]
    Config(#[from] Box<figment::Error>),

    /// Configuration loaded but failed validation
    #[error("Configuration validation error: {0}")]
    Configuration(String),

    /// Underlying I/O failure
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// The monitored directory cannot be listed or watched
    #[error("Cannot monitor directory {path:?}: {source}")]
    DirectoryUnavailable {
        /// Requested directory
        path: PathBuf,
        /// Cause
        #[source]
        source: std::io::Error,
    },

    /// The filesystem watcher failed
    #[error("File watcher error: {0}")]
    Watch(#[from] notify::Error),

    /// A file holds fewer bytes than a read asked for
    #[error("Short read on {path:?}: requested {requested} bytes at offset {offset}, file holds {available}")]
    ShortRead {
        /// File read
        path: PathBuf,
        /// Cursor offset of the read
        offset: u64,
        /// Bytes requested
        requested: usize,
        /// File length when the read was attempted
        available: u64,
    },

    /// A decoder returned a different number of records than requested
    #[error("Inconsistent record count from {path:?}: expected {expected}, got {actual}")]
    RecordCount {
        /// File decoded
        path: PathBuf,
        /// Records requested
        expected: usize,
        /// Records returned
        actual: usize,
    },

    /// The recording header is missing or malformed
    #[error("Invalid metadata file {path:?}: {reason}")]
    Metadata {
        /// Header file
        path: PathBuf,
        /// What was wrong
        reason: String,
    },

    /// A read duration is not a positive multiple of the window duration
    #[error("Duration {duration_ms} ms is not a positive multiple of the {window_ms} ms window")]
    InvalidDuration {
        /// Requested duration
        duration_ms: u64,
        /// Configured window duration
        window_ms: u64,
    },

    /// The pipeline has been shut down
    #[error("Pipeline is no longer running")]
    PipelineStopped,
}

impl From<figment::Error> for StreamError {
    fn from(value: figment::Error) -> Self {
        StreamError::Config(Box::new(value))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn decode_errors_name_the_file() {
        let err = StreamError::ShortRead {
            path: PathBuf::from("amp-A-000.dat"),
            offset: 0,
            requested: 64,
            available: 10,
        };
        assert!(err.to_string().contains("amp-A-000.dat"));

        let err = StreamError::RecordCount {
            path: PathBuf::from("time.dat"),
            expected: 10,
            actual: 4,
        };
        assert!(err.to_string().contains("expected 10, got 4"));
    }

    #[test]
    fn invalid_duration_message() {
        let err = StreamError::InvalidDuration {
            duration_ms: 150,
            window_ms: 100,
        };
        assert_eq!(
            err.to_string(),
            "Duration 150 ms is not a positive multiple of the 100 ms window"
        );
    }

    #[test]
    fn io_errors_convert() {
        let io = std::io::Error::new(std::io::ErrorKind::NotFound, "gone");
        let err: StreamError = io.into();
        assert!(matches!(err, StreamError::Io(_)));
    }
}

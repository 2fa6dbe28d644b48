//! Error taxonomy for launcher, stimulus and scenario runs.

use std::net::SocketAddr;
use std::path::PathBuf;
use std::time::Duration;
use thiserror::Error;

/// Result alias used throughout the library
pub type Result<T, E = ProbeError> = std::result::Result<T, E>;

/// Failures a run can report. None of them are retried.
#[derive(Error, Debug)]
pub enum ProbeError {
    /// A required external tool is not on the search path
    #[error("{name} not found in PATH")]
    ExecutableNotFound {
        name: String,
        #[source]
        source: which::Error,
    },

    /// The OS refused to spawn the process
    #[error("failed to start {}: {source}", .command.display())]
    Start {
        command: PathBuf,
        #[source]
        source: std::io::Error,
    },

    /// No listener was reachable within the connect bound
    #[error("could not connect to {addr}: {source}")]
    Connect {
        addr: SocketAddr,
        #[source]
        source: std::io::Error,
    },

    /// Reading the process output failed before end-of-data
    #[error("failed to read {stream}: {source}")]
    Read {
        stream: &'static str,
        #[source]
        source: std::io::Error,
    },

    /// A bounded wait expired
    #[error("timeout hit: {what} did not complete within {bound:?}")]
    Timeout { what: &'static str, bound: Duration },

    /// The drain task went away without signalling completion
    #[error("output drain stopped without delivering a result")]
    DrainAborted,

    /// Captured data differs from the expectation
    #[error("result: {actual:?}, expect: {expected:?}")]
    AssertionMismatch { expected: String, actual: String },

    /// Socket or process plumbing failed outside the categories above
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

impl ProbeError {
    /// Builds a mismatch error from raw bytes, rendering them lossily
    pub fn mismatch(expected: &[u8], actual: &[u8]) -> Self {
        ProbeError::AssertionMismatch {
            expected: String::from_utf8_lossy(expected).into_owned(),
            actual: String::from_utf8_lossy(actual).into_owned(),
        }
    }

    /// True when the failure is a missing tool, which callers may treat as skip
    pub fn is_missing_tool(&self) -> bool {
        matches!(self, ProbeError::ExecutableNotFound { .. })
    }

    pub fn is_timeout(&self) -> bool {
        matches!(self, ProbeError::Timeout { .. })
    }
}

/// Compares captured bytes against the expectation
pub fn check(actual: &[u8], expected: &[u8]) -> Result<()> {
    if actual == expected {
        Ok(())
    } else {
        Err(ProbeError::mismatch(expected, actual))
    }
}

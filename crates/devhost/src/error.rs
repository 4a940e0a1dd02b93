//! Error taxonomy for devhost operations.

use thiserror::Error;

/// Result type for devhost operations.
pub type DevhostResult<T> = Result<T, DevhostError>;

/// Errors surfaced by externally exposed operations.
///
/// Filesystem and parse errors hit during discovery or manifest inspection are
/// recovered locally and reduced to empty results; they never appear here.
#[derive(Debug, Error)]
pub enum DevhostError {
    /// An instance with this identity is already registered.
    #[error("instance '{project}/{instance}' is already running")]
    AlreadyRunning { project: String, instance: String },

    /// The requested port is outside the unprivileged range.
    #[error("invalid port {0}: must be in 1024..=65535")]
    InvalidPort(i64),

    /// No instance with this identity is registered.
    #[error("instance '{project}/{instance}' is not running")]
    NotFound { project: String, instance: String },

    /// A path could not be classified into an execution context.
    #[error("could not resolve execution context for '{0}'")]
    ContextResolutionFailed(String),

    /// A required external tool was not found on PATH.
    #[error("'{0}' was not found; install it or adjust PATH")]
    ToolMissing(String),

    /// No ready session exists for the host id.
    #[error("no active session for host '{0}'")]
    NotConnected(String),

    /// The SSH transport failed.
    #[error("transport error: {0}")]
    Transport(String),

    /// A remote command did not complete within the deadline. The remote side
    /// may still be executing; only the local wait was cancelled.
    #[error("remote command timed out after {0}ms")]
    Timeout(u64),

    /// The remote host rejected the offered credentials.
    #[error("authentication failed for '{0}'")]
    AuthenticationFailed(String),

    /// Malformed identifier or path.
    #[error("invalid input: {0}")]
    InvalidInput(String),

    /// Generic IO error from a spawn or signal step.
    #[error("io error: {0}")]
    Io(#[from] std::io::Error),
}

impl DevhostError {
    /// Translate an `ENOENT`-class spawn failure into a tool-missing error
    /// naming the expected tool; surface every other error verbatim.
    pub fn from_spawn(err: std::io::Error, tool: &str) -> Self {
        if err.kind() == std::io::ErrorKind::NotFound {
            DevhostError::ToolMissing(tool.to_string())
        } else {
            DevhostError::Io(err)
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::{Error, ErrorKind};

    #[test]
    fn test_enoent_becomes_tool_missing() {
        let err = DevhostError::from_spawn(Error::from(ErrorKind::NotFound), "docker");
        assert!(matches!(err, DevhostError::ToolMissing(name) if name == "docker"));
    }

    #[test]
    fn test_other_spawn_errors_surface_verbatim() {
        let err = DevhostError::from_spawn(Error::from(ErrorKind::PermissionDenied), "docker");
        assert!(matches!(err, DevhostError::Io(_)));
    }
}

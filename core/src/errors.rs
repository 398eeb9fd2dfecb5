//! Unified error types for the drivehub core crate.
//!
//! [`DriveError`] is the taxonomy every drive, the copy engine and content
//! delivery report through. Consumers map it to their own transport
//! (the server maps it to HTTP status codes).

use thiserror::Error;

/// Top-level error type for registry and configuration failures.
#[derive(Error, Debug)]
pub enum CoreError {
    /// A drive-level error raised while constructing or using a drive.
    #[error("Drive error: {0}")]
    Drive(#[from] DriveError),

    /// A configuration error (unknown drive type, missing fields, parse failures).
    #[error("Config error: {0}")]
    Config(String),

    /// A low-level I/O error.
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}

/// Errors reported by drives, the copy engine and content delivery.
#[derive(Error, Debug)]
pub enum DriveError {
    /// The requested entry does not exist.
    #[error("Not found: {0}")]
    NotFound(String),

    /// The operation was refused: type conflicts, overwrite disabled,
    /// unreadable content, attempts to touch a drive root.
    #[error("Not allowed: {0}")]
    NotAllowed(String),

    /// The backend does not implement the operation.
    #[error("Operation not supported")]
    Unsupported,

    /// A backend's underlying network call returned a non-success status.
    #[error("Remote API error ({status}): {message}")]
    RemoteApi { status: u16, message: String },

    /// The operation was aborted because its task was cancelled.
    #[error("Operation cancelled")]
    Cancelled,

    /// A low-level I/O error bubbled up from a backend.
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// Transport failure while fetching URL-backed content.
    #[error("HTTP error: {0}")]
    Http(#[from] reqwest::Error),
}

impl DriveError {
    /// Create a NotFound error.
    pub fn not_found(path: impl Into<String>) -> Self {
        Self::NotFound(path.into())
    }

    /// Create a NotAllowed error.
    pub fn not_allowed(message: impl Into<String>) -> Self {
        Self::NotAllowed(message.into())
    }

    pub fn is_not_found(&self) -> bool {
        matches!(self, Self::NotFound(_))
    }

    pub fn is_cancelled(&self) -> bool {
        matches!(self, Self::Cancelled)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn drive_error_display() {
        let err = DriveError::not_found("a/b.txt");
        assert_eq!(err.to_string(), "Not found: a/b.txt");

        let err = DriveError::not_allowed("file exists");
        assert_eq!(err.to_string(), "Not allowed: file exists");

        let err = DriveError::Unsupported;
        assert_eq!(err.to_string(), "Operation not supported");

        let err = DriveError::RemoteApi {
            status: 503,
            message: "failed to copy file".into(),
        };
        assert_eq!(err.to_string(), "Remote API error (503): failed to copy file");

        assert_eq!(DriveError::Cancelled.to_string(), "Operation cancelled");
    }

    #[test]
    fn drive_error_predicates() {
        assert!(DriveError::not_found("x").is_not_found());
        assert!(!DriveError::Cancelled.is_not_found());
        assert!(DriveError::Cancelled.is_cancelled());
        assert!(!DriveError::Unsupported.is_cancelled());
    }

    #[test]
    fn core_error_from_drive_error() {
        let core_err: CoreError = DriveError::not_found("/missing").into();
        assert_eq!(core_err.to_string(), "Drive error: Not found: /missing");
    }

    #[test]
    fn drive_error_from_io_error() {
        let io_err = std::io::Error::new(std::io::ErrorKind::BrokenPipe, "pipe broke");
        let err: DriveError = io_err.into();
        assert_eq!(err.to_string(), "I/O error: pipe broke");
    }
}

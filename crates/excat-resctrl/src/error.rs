//! Error types for resctrl operations.
//!
//! Every variant that originates from a pseudo file carries the failing path,
//! so callers can log the error as-is without adding more context.

use std::io;
use std::path::PathBuf;
use thiserror::Error;

/// Result type alias for resctrl operations.
pub type ResctrlResult<T> = Result<T, ResctrlError>;

/// Errors that can occur while reading or interpreting resctrl state.
#[derive(Debug, Error)]
pub enum ResctrlError {
    /// resctrl is not mounted or RDT CAT is not supported on this host.
    #[error("RDT CAT not available at {path}: {reason}")]
    ProviderUnavailable {
        /// Expected resctrl mount point.
        path: PathBuf,
        /// Why the provider is considered unavailable.
        reason: String,
    },

    /// Pseudo file content does not follow the expected grammar.
    #[error("Format error in {path}: {message}")]
    Format {
        /// The file (or class directory) holding the malformed content.
        path: PathBuf,
        /// Error message.
        message: String,
    },

    /// Pseudo file does not exist.
    #[error("File not found: {path}")]
    NotFound {
        /// The missing path.
        path: PathBuf,
    },

    /// Failed to read a pseudo file.
    #[error("Failed to read {path}: {source}")]
    Io {
        /// The path being read.
        path: PathBuf,
        /// The underlying IO error.
        #[source]
        source: io::Error,
    },

    /// No L2 or L3 buffer is configured on any class.
    #[error("No size labels created: no class configures an L2 or L3 buffer")]
    NoLabels,
}

impl ResctrlError {
    /// Creates a provider unavailable error.
    pub fn unavailable(path: impl Into<PathBuf>, reason: impl Into<String>) -> Self {
        Self::ProviderUnavailable {
            path: path.into(),
            reason: reason.into(),
        }
    }

    /// Creates a format error.
    pub fn format(path: impl Into<PathBuf>, message: impl Into<String>) -> Self {
        Self::Format {
            path: path.into(),
            message: message.into(),
        }
    }

    /// Maps an IO error to `NotFound` or `Io` depending on its kind.
    pub fn io(path: impl Into<PathBuf>, source: io::Error) -> Self {
        let path = path.into();
        if source.kind() == io::ErrorKind::NotFound {
            Self::NotFound { path }
        } else {
            Self::Io { path, source }
        }
    }

    /// Returns true if resctrl itself is missing on this host.
    ///
    /// Fatal at startup. While watching, the daemon logs it and keeps the
    /// last device list until resctrl is back.
    pub fn is_unavailable(&self) -> bool {
        matches!(self, ResctrlError::ProviderUnavailable { .. })
    }

    /// Returns true if the error stems from malformed pseudo file content.
    pub fn is_format(&self) -> bool {
        matches!(self, ResctrlError::Format { .. })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_error_display() {
        let err = ResctrlError::format("/sys/fs/resctrl/c0/size", "unknown format");
        assert_eq!(
            err.to_string(),
            "Format error in /sys/fs/resctrl/c0/size: unknown format"
        );
    }

    #[test]
    fn test_io_not_found_mapping() {
        let err = ResctrlError::io(
            "/sys/fs/resctrl/c0/schemata",
            io::Error::new(io::ErrorKind::NotFound, "gone"),
        );
        assert!(matches!(err, ResctrlError::NotFound { .. }));
        assert_eq!(err.to_string(), "File not found: /sys/fs/resctrl/c0/schemata");

        let err = ResctrlError::io(
            "/sys/fs/resctrl/c0/schemata",
            io::Error::new(io::ErrorKind::PermissionDenied, "denied"),
        );
        assert!(matches!(err, ResctrlError::Io { .. }));
        assert!(err.to_string().contains("denied"));
    }

    #[test]
    fn test_classification() {
        assert!(ResctrlError::unavailable("/sys/fs/resctrl", "not mounted").is_unavailable());
        assert!(ResctrlError::format("/x", "bad").is_format());
        assert!(!ResctrlError::NoLabels.is_unavailable());
        assert!(!ResctrlError::NoLabels.is_format());
    }
}

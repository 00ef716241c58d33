//! Error types for the device plugin

use std::path::PathBuf;

use excat_resctrl::ResctrlError;
use thiserror::Error;

/// Device plugin errors
#[derive(Debug, Error)]
pub enum PluginError {
    /// Reading or interpreting resctrl failed
    #[error(transparent)]
    Resctrl(#[from] ResctrlError),

    /// Registration with the kubelet failed or the kubelet is unreachable
    #[error("Registration of {resource} failed: {message}")]
    Registration { resource: String, message: String },

    /// Serving the device plugin socket failed
    #[error("Device plugin socket {path}: {message}")]
    Socket { path: PathBuf, message: String },

    /// Filesystem watcher setup or event delivery failed
    #[error("Watcher error: {0}")]
    Watch(#[from] notify::Error),

    /// Allocation request violates the one buffer per container rule
    #[error("Only one ExCAT buffer allowed per container: found request for {0:?}")]
    AllocationConstraint(Vec<String>),

    /// Requested device ID is not advertised
    #[error("Requested buffer with device ID {0} does not exist")]
    UnknownDevice(String),

    /// Node label patch failed
    #[error("Node label error: {0}")]
    Label(String),

    /// Configuration error
    #[error("Configuration error: {0}")]
    Config(String),

    /// IO error
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

/// Result type for device plugin operations
pub type Result<T> = std::result::Result<T, PluginError>;

impl PluginError {
    pub fn registration(resource: impl Into<String>, message: impl ToString) -> Self {
        Self::Registration {
            resource: resource.into(),
            message: message.to_string(),
        }
    }

    pub fn socket(path: impl Into<PathBuf>, message: impl ToString) -> Self {
        Self::Socket {
            path: path.into(),
            message: message.to_string(),
        }
    }
}

impl From<PluginError> for tonic::Status {
    fn from(err: PluginError) -> Self {
        match err {
            PluginError::AllocationConstraint(_) => tonic::Status::invalid_argument(err.to_string()),
            PluginError::UnknownDevice(_) => tonic::Status::not_found(err.to_string()),
            other => tonic::Status::internal(other.to_string()),
        }
    }
}

//! Error types for the captive portal core.

use thiserror::Error;

/// Core error type for portal operations.
///
/// Authorization failures are deliberately absent: the auth gate answers
/// them with a redirect response and they never bubble past the route
/// handler.
#[derive(Error, Debug)]
pub enum PortalError {
    /// The backing store cannot be mounted at all. Fatal for the owning
    /// lifecycle (restart/reformat).
    #[error("Storage mount failed: {0}")]
    StorageMount(String),

    /// The persisted document is unreadable or corrupt. Recoverable by
    /// rewriting defaults.
    #[error("Config document unreadable: {0}")]
    ConfigParse(String),

    /// A present-but-malformed field (IP, mask, dot-path value). The
    /// operation aborts without a partial write.
    #[error("Invalid value for {field}: {reason}")]
    Validation { field: String, reason: String },

    /// AP or DNS bring-up failed after the bounded retries.
    #[error("Network bring-up failed: {0}")]
    NetworkBringup(String),

    /// I/O errors from the storage backend.
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// Serialization/deserialization errors.
    #[error("Serialization error: {0}")]
    Serialization(String),
}

/// Result type alias for portal operations.
pub type Result<T> = std::result::Result<T, PortalError>;

impl From<serde_json::Error> for PortalError {
    fn from(err: serde_json::Error) -> Self {
        PortalError::Serialization(err.to_string())
    }
}

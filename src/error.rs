// src/error.rs

use thiserror::Error;

/// Core error types for Sideloader
#[derive(Error, Debug)]
pub enum Error {
    /// Source data is missing, unreadable or corrupt
    #[error("Failed to resolve input: {0}")]
    InputResolution(String),

    /// Container could not be recognised as any supported format
    #[error("Unrecognized container '{path}': {reason}")]
    Classification { path: String, reason: String },

    /// No split in the container is compatible with this device
    #[error("No compatible split for {package}: {reason}")]
    SplitResolution { package: String, reason: String },

    /// The selected backend lacks the privilege the operation needs
    #[error("Authorizer '{authorizer}' cannot {operation}")]
    CapabilityDenied {
        authorizer: String,
        operation: String,
    },

    /// The privileged link was severed; retryable after reconnect
    #[error("Privileged channel '{0}' is dead")]
    ChannelDead(String),

    /// The backend failed for a reason other than link severance
    #[error("Privileged channel '{channel}' failed: {reason}")]
    ChannelFailure { channel: String, reason: String },

    /// The backend refused an install or uninstall
    #[error("Backend rejected operation (code {code}): {reason}")]
    CommitRejected { code: i32, reason: String },

    /// Candidate and installed package are signed by different identities
    #[error("Signature of {package} does not match the installed package")]
    SignatureMismatch { package: String },

    /// Config cascade did not terminate in concrete values
    #[error("Config resolution failed: {0}")]
    ConfigResolution(String),

    /// Operation not valid in the current state
    #[error("Invalid state: {0}")]
    InvalidState(String),

    /// Operation was cancelled by closing the session
    #[error("Operation cancelled")]
    Cancelled,

    /// Network download failed
    #[error("Download error: {0}")]
    Download(String),

    /// Database file does not exist
    #[error("Database not found at path: {0}")]
    DatabaseNotFound(String),

    /// Database-related errors
    #[error("Database error: {0}")]
    Database(#[from] rusqlite::Error),

    /// I/O errors
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// Archive errors
    #[error("Archive error: {0}")]
    Zip(#[from] zip::result::ZipError),

    /// JSON errors
    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),
}

impl Error {
    /// Whether a single reconnect-and-retry is allowed for this error
    pub fn is_retryable(&self) -> bool {
        matches!(self, Error::ChannelDead(_))
    }

    /// Whether this error aborts the whole session rather than one member
    pub fn is_session_fatal(&self) -> bool {
        matches!(
            self,
            Error::Classification { .. } | Error::ConfigResolution(_)
        )
    }

    /// Human-readable reason for a terminal failure
    ///
    /// Actionable conditions get an explanation; backend rejections keep
    /// their raw reason code for diagnostics.
    pub fn user_message(&self) -> String {
        match self {
            Error::CapabilityDenied { authorizer, .. } => format!(
                "Insufficient privilege: the '{}' authorizer cannot perform this operation",
                authorizer
            ),
            Error::SignatureMismatch { package } => format!(
                "Signature mismatch: {} is signed differently from the installed app",
                package
            ),
            Error::SplitResolution { package, reason } => {
                format!("Unsupported device for {}: {}", package, reason)
            }
            Error::ChannelDead(channel) => {
                format!("Lost connection to the '{}' service", channel)
            }
            Error::CommitRejected { code, reason } => format!("{} ({})", reason, code),
            other => other.to_string(),
        }
    }
}

/// Result type alias using Sideloader's Error type
pub type Result<T> = std::result::Result<T, Error>;

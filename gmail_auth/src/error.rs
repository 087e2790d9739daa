use std::path::PathBuf;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum CredentialResolutionError {
    #[error("Configuration error: {0}")]
    Config(String),

    #[error("No OAuth client identity available: {0}")]
    MissingClientIdentity(String),

    #[error("Authorization aborted: {0}")]
    AuthorizationAborted(String),

    #[error("No usable credential found and interactive authorization is disabled")]
    InteractionUnavailable,

    #[error("Token endpoint returned HTTP {status}: {message}")]
    TokenEndpoint { status: u16, message: String },

    #[error("Failed to persist credential to {}: {source}", path.display())]
    Persistence {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("Callback listener error: {0}")]
    Listener(String),

    #[error("HTTP error: {0}")]
    Http(#[from] reqwest::Error),

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),
}

impl CredentialResolutionError {
    /// Configuration problems are never retried.
    pub fn is_configuration(&self) -> bool {
        matches!(self, Self::Config(_) | Self::MissingClientIdentity(_))
    }
}

pub type Result<T> = std::result::Result<T, CredentialResolutionError>;

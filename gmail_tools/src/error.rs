use gmail_auth::CredentialResolutionError;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum GatewayError {
    #[error("Credential error: {0}")]
    Credentials(#[from] CredentialResolutionError),

    #[error("Gmail rejected the credentials even after re-authorization")]
    Unauthorized,

    #[error("Gmail API returned HTTP {status}: {body}")]
    Api { status: u16, body: String },

    #[error("Unexpected Gmail response: {0}")]
    Decode(String),

    #[error("HTTP error: {0}")]
    Http(#[from] reqwest::Error),
}

impl GatewayError {
    /// Auth and transport failures; everything else degrades to an empty result.
    pub fn is_fatal(&self) -> bool {
        matches!(
            self,
            Self::Credentials(_) | Self::Unauthorized | Self::Http(_)
        )
    }
}

pub type Result<T> = std::result::Result<T, GatewayError>;

use chrono::{DateTime, Duration, Utc};
use serde::{Deserialize, Serialize};

use crate::config::DEFAULT_TOKEN_URI;

/// Tokens are treated as expired this long before their real expiry.
const EXPIRY_SKEW_SECS: i64 = 60;

/// Where a credential came from. Decides whether it may be persisted.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum CredentialSource {
    Environment,
    #[default]
    TokenFile,
    Interactive,
}

impl CredentialSource {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Environment => "environment",
            Self::TokenFile => "token_file",
            Self::Interactive => "interactive",
        }
    }

    /// Environment-driven deployments stay stateless.
    pub fn is_persistable(&self) -> bool {
        !matches!(self, Self::Environment)
    }
}

/// OAuth2 token bundle. Serialises to the token-file format.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Credential {
    /// Access token. May be absent until the first refresh.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub token: Option<String>,
    pub refresh_token: String,
    #[serde(default = "default_token_uri")]
    pub token_uri: String,
    pub client_id: String,
    pub client_secret: String,
    #[serde(default)]
    pub scopes: Vec<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub expiry: Option<DateTime<Utc>>,

    #[serde(skip)]
    pub source: CredentialSource,
}

fn default_token_uri() -> String {
    DEFAULT_TOKEN_URI.to_string()
}

/// Successful response body from the token endpoint.
#[derive(Debug, Clone, Deserialize)]
pub struct TokenResponse {
    pub access_token: String,
    #[serde(default)]
    pub expires_in: Option<i64>,
    #[serde(default)]
    pub refresh_token: Option<String>,
    #[serde(default)]
    pub scope: Option<String>,
    #[serde(default)]
    pub token_type: Option<String>,
}

impl Credential {
    pub fn access_token(&self) -> Option<&str> {
        self.token.as_deref()
    }

    /// True once the known expiry (minus skew) has passed. No expiry means never.
    pub fn is_expired(&self) -> bool {
        match self.expiry {
            Some(expiry) => Utc::now() + Duration::seconds(EXPIRY_SKEW_SECS) >= expiry,
            None => false,
        }
    }

    /// Holds an access token that can be sent right now.
    pub fn is_valid(&self) -> bool {
        self.token.as_deref().is_some_and(|t| !t.is_empty()) && !self.is_expired()
    }

    pub fn can_refresh(&self) -> bool {
        !self.refresh_token.is_empty()
            && !self.client_id.is_empty()
            && !self.client_secret.is_empty()
            && !self.token_uri.is_empty()
    }

    /// Valid now, or able to become valid without an operator.
    pub fn is_usable(&self) -> bool {
        self.is_valid() || self.can_refresh()
    }

    pub fn has_scope(&self, scope: &str) -> bool {
        self.scopes.iter().any(|s| s == scope)
    }

    /// Fold a token-endpoint response into this credential.
    pub fn apply_token_response(&mut self, response: TokenResponse) {
        self.token = Some(response.access_token);
        self.expiry = response
            .expires_in
            .map(|secs| Utc::now() + Duration::seconds(secs));
        if let Some(refresh_token) = response.refresh_token.filter(|t| !t.is_empty()) {
            self.refresh_token = refresh_token;
        }
        if let Some(scope) = response.scope.filter(|s| !s.trim().is_empty()) {
            self.scopes = scope.split_whitespace().map(str::to_string).collect();
        }
    }
}

use std::time::Duration;

use reqwest::Client;
use serde::Deserialize;
use tracing::{debug, info};
use url::Url;

use crate::client_identity::ClientIdentity;
use crate::credential::{Credential, CredentialSource, TokenResponse};
use crate::error::{CredentialResolutionError, Result};

/// OAuth error body, e.g. `{"error": "invalid_grant", "error_description": "..."}`.
#[derive(Debug, Deserialize)]
struct OAuthErrorBody {
    error: String,
    #[serde(default)]
    error_description: Option<String>,
}

/// Talks to the provider's token endpoint.
#[derive(Debug, Clone)]
pub struct OAuthClient {
    http: Client,
}

impl OAuthClient {
    pub fn new(timeout: Duration) -> Result<Self> {
        let http = Client::builder().timeout(timeout).build()?;
        Ok(Self { http })
    }

    /// Consent URL. Always asks for offline access and forces the consent
    /// screen so a refresh token comes back on every grant.
    pub fn authorization_url(
        &self,
        identity: &ClientIdentity,
        redirect_uri: &str,
        scopes: &[String],
        state: &str,
    ) -> Result<Url> {
        let mut url = Url::parse(&identity.auth_uri).map_err(|e| {
            CredentialResolutionError::Config(format!(
                "invalid authorization URI '{}': {}",
                identity.auth_uri, e
            ))
        })?;
        url.query_pairs_mut()
            .append_pair("response_type", "code")
            .append_pair("client_id", &identity.client_id)
            .append_pair("redirect_uri", redirect_uri)
            .append_pair("scope", &scopes.join(" "))
            .append_pair("state", state)
            .append_pair("access_type", "offline")
            .append_pair("prompt", "consent");
        Ok(url)
    }

    pub async fn exchange_code(
        &self,
        identity: &ClientIdentity,
        code: &str,
        redirect_uri: &str,
        scopes: &[String],
    ) -> Result<Credential> {
        debug!(token_uri = %identity.token_uri, "exchanging authorization code");
        let params = [
            ("grant_type", "authorization_code"),
            ("code", code),
            ("redirect_uri", redirect_uri),
            ("client_id", identity.client_id.as_str()),
            ("client_secret", identity.client_secret.as_str()),
        ];
        let response = self.post_token_request(&identity.token_uri, &params).await?;

        let refresh_token = response.refresh_token.clone().filter(|t| !t.is_empty()).ok_or_else(|| {
            CredentialResolutionError::AuthorizationAborted(
                "token endpoint did not return a refresh token".into(),
            )
        })?;

        let mut credential = Credential {
            token: None,
            refresh_token,
            token_uri: identity.token_uri.clone(),
            client_id: identity.client_id.clone(),
            client_secret: identity.client_secret.clone(),
            scopes: scopes.to_vec(),
            expiry: None,
            source: CredentialSource::Interactive,
        };
        credential.apply_token_response(response);
        info!("authorization code exchanged for tokens");
        Ok(credential)
    }

    /// One refresh call. Updates the access token and expiry in place.
    pub async fn refresh(&self, credential: &mut Credential) -> Result<()> {
        debug!(token_uri = %credential.token_uri, "refreshing access token");
        let params = [
            ("grant_type", "refresh_token"),
            ("refresh_token", credential.refresh_token.as_str()),
            ("client_id", credential.client_id.as_str()),
            ("client_secret", credential.client_secret.as_str()),
        ];
        let token_uri = credential.token_uri.clone();
        let response = self.post_token_request(&token_uri, &params).await?;
        credential.apply_token_response(response);
        Ok(())
    }

    async fn post_token_request(&self, token_uri: &str, params: &[(&str, &str)]) -> Result<TokenResponse> {
        let response = self.http.post(token_uri).form(params).send().await?;
        let status = response.status();
        let body = response.text().await?;

        if !status.is_success() {
            let message = match serde_json::from_str::<OAuthErrorBody>(&body) {
                Ok(err) => match err.error_description {
                    Some(desc) => format!("{}: {}", err.error, desc),
                    None => err.error,
                },
                Err(_) => body,
            };
            return Err(CredentialResolutionError::TokenEndpoint {
                status: status.as_u16(),
                message,
            });
        }

        Ok(serde_json::from_str(&body)?)
    }
}

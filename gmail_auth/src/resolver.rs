use tracing::{debug, info, warn};

use crate::client_identity::ClientIdentity;
use crate::config::{AuthConfig, InteractiveMode};
use crate::credential::{Credential, CredentialSource};
use crate::error::{CredentialResolutionError, Result};
use crate::flow::{generate_state, CodeReceiver, LoopbackReceiver, ManualReceiver};
use crate::oauth::OAuthClient;
use crate::token_store::TokenStore;

/// Produces a usable [`Credential`] from, in order: the environment, the
/// token file, an interactive authorization.
pub struct CredentialResolver {
    config: AuthConfig,
    oauth: OAuthClient,
    store: TokenStore,
    receiver: Option<Box<dyn CodeReceiver>>,
}

impl std::fmt::Debug for CredentialResolver {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("CredentialResolver")
            .field("token_path", &self.store.path())
            .field("interactive", &self.receiver.is_some())
            .finish()
    }
}

impl CredentialResolver {
    pub fn new(config: AuthConfig) -> Result<Self> {
        let oauth = OAuthClient::new(config.http_timeout)?;
        let store = TokenStore::new(config.token_path.clone());
        let receiver: Option<Box<dyn CodeReceiver>> = match config.interactive {
            InteractiveMode::Browser => Some(Box::new(
                LoopbackReceiver::new(config.callback_port)
                    .open_browser(config.open_browser)
                    .timeout(config.callback_timeout),
            )),
            InteractiveMode::Manual => Some(Box::new(ManualReceiver::new(
                config.loopback_redirect_uri(),
            ))),
            InteractiveMode::Disabled => None,
        };

        Ok(Self {
            config,
            oauth,
            store,
            receiver,
        })
    }

    /// Replace the interactive code receiver.
    pub fn with_receiver(mut self, receiver: impl CodeReceiver + 'static) -> Self {
        self.receiver = Some(Box::new(receiver));
        self
    }

    pub fn config(&self) -> &AuthConfig {
        &self.config
    }

    pub fn token_store(&self) -> &TokenStore {
        &self.store
    }

    pub async fn resolve(&self) -> Result<Credential> {
        if let Some(credential) = self.from_environment() {
            info!(
                tier = "environment",
                has_access_token = credential.token.is_some(),
                "using credentials from environment variables"
            );
            return Ok(credential);
        }
        self.resolve_stored_or_interactive().await
    }

    /// Token file first, interactive authorization second. Skips the environment.
    pub async fn resolve_stored_or_interactive(&self) -> Result<Credential> {
        if let Some(credential) = self.from_token_file().await? {
            return Ok(credential);
        }
        self.authorize().await
    }

    /// Refresh in place, persisting the result unless it came from the environment.
    pub async fn refresh(&self, credential: &mut Credential) -> Result<()> {
        if !credential.can_refresh() {
            return Err(CredentialResolutionError::Config(
                "credential lacks refresh token or client identity".into(),
            ));
        }
        info!(source = credential.source.as_str(), "refresh attempted");
        self.oauth.refresh(credential).await?;
        self.persist(credential)?;
        Ok(())
    }

    /// Renew a credential that expired or was rejected by the mail API.
    ///
    /// Environment credentials get one refresh and nothing else: they are never
    /// persisted and never trigger interactive authorization. Stored and
    /// interactive credentials get one refresh, then the interactive tier.
    pub async fn recover(&self, rejected: &Credential) -> Result<Credential> {
        let mut credential = rejected.clone();
        let refresh_error = if credential.can_refresh() {
            match self.refresh(&mut credential).await {
                Ok(()) => return Ok(credential),
                Err(e @ CredentialResolutionError::Persistence { .. }) => return Err(e),
                Err(e) => e,
            }
        } else {
            CredentialResolutionError::Config(
                "credential lacks refresh token or client identity".into(),
            )
        };

        if credential.source == CredentialSource::Environment {
            warn!(
                tier = "environment",
                error = %refresh_error,
                "environment credential could not be renewed; check GOOGLE_REFRESH_TOKEN"
            );
            return Err(refresh_error);
        }

        warn!(
            source = credential.source.as_str(),
            error = %refresh_error,
            "refresh failed; falling through to interactive authorization"
        );
        self.authorize().await
    }

    /// Run the interactive tier unconditionally and persist the result.
    pub async fn authorize(&self) -> Result<Credential> {
        let identity = ClientIdentity::discover(&self.config)?;
        let receiver = self.receiver.as_deref().ok_or_else(|| {
            warn!(tier = "interactive", "interactive authorization is disabled");
            CredentialResolutionError::InteractionUnavailable
        })?;

        info!(tier = "interactive", client_id = %identity.client_id, "starting interactive authorization");
        let redirect_uri = receiver.redirect_uri();
        let state = generate_state();
        let url = self
            .oauth
            .authorization_url(&identity, &redirect_uri, &self.config.scopes, &state)?;

        let code = receiver.receive_code(&url, &state).await?;
        let credential = self
            .oauth
            .exchange_code(&identity, &code, &redirect_uri, &self.config.scopes)
            .await?;
        self.persist(&credential)?;
        Ok(credential)
    }

    fn from_environment(&self) -> Option<Credential> {
        let env = self.config.env_credentials.as_ref()?;
        Some(Credential {
            token: env.access_token.clone(),
            refresh_token: env.refresh_token.clone(),
            token_uri: self.config.token_uri.clone(),
            client_id: env.client_id.clone(),
            client_secret: env.client_secret.clone(),
            scopes: self.config.scopes.clone(),
            expiry: None,
            source: CredentialSource::Environment,
        })
    }

    async fn from_token_file(&self) -> Result<Option<Credential>> {
        let Some(mut credential) = self.store.load() else {
            return Ok(None);
        };
        if credential.is_valid() {
            info!(tier = "token_file", path = %self.store.path().display(), "stored credential is valid");
            return Ok(Some(credential));
        }
        if !credential.can_refresh() {
            warn!(tier = "token_file", "stored credential is invalid and cannot be refreshed");
            return Ok(None);
        }

        info!(tier = "token_file", expired = credential.is_expired(), "refresh attempted");
        match self.oauth.refresh(&mut credential).await {
            Ok(()) => {
                self.persist(&credential)?;
                Ok(Some(credential))
            }
            Err(e) => {
                warn!(
                    tier = "token_file",
                    error = %e,
                    "refresh failed; falling through to interactive authorization"
                );
                Ok(None)
            }
        }
    }

    fn persist(&self, credential: &Credential) -> Result<()> {
        if !credential.source.is_persistable() {
            debug!("environment credential not persisted");
            return Ok(());
        }
        info!(path = %self.store.path().display(), source = credential.source.as_str(), "persisting credential");
        self.store.save(credential)
    }
}

use std::sync::Arc;

use gmail_auth::{Credential, CredentialResolver};
use reqwest::{RequestBuilder, Response, StatusCode};
use serde::de::DeserializeOwned;
use serde_json::json;
use tokio::sync::Mutex;
use tracing::{debug, error, info, warn};

use crate::error::{GatewayError, Result};
use crate::message::{
    build_raw_message, CreatedResource, GmailMessage, MessageDetail, MessageList, MessageSummary,
};

pub const GMAIL_API_BASE: &str = "https://gmail.googleapis.com/gmail/v1/users/me";

const SCOPE_READONLY: &str = "https://www.googleapis.com/auth/gmail.readonly";
const SCOPE_MODIFY: &str = "https://www.googleapis.com/auth/gmail.modify";
const SCOPE_SEND: &str = "https://www.googleapis.com/auth/gmail.send";
const SCOPE_COMPOSE: &str = "https://www.googleapis.com/auth/gmail.compose";
const SCOPE_FULL: &str = "https://mail.google.com/";

/// Gmail REST calls on behalf of one resolved credential.
pub struct MailGateway {
    resolver: Arc<CredentialResolver>,
    credential: Mutex<Credential>,
    http: reqwest::Client,
    base_url: String,
}

impl std::fmt::Debug for MailGateway {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("MailGateway")
            .field("base_url", &self.base_url)
            .finish_non_exhaustive()
    }
}

impl MailGateway {
    pub fn new(resolver: Arc<CredentialResolver>, credential: Credential) -> Result<Self> {
        let http = reqwest::Client::builder()
            .timeout(resolver.config().http_timeout)
            .build()?;
        Ok(Self {
            resolver,
            credential: Mutex::new(credential),
            http,
            base_url: GMAIL_API_BASE.to_string(),
        })
    }

    /// Resolve a credential and build a gateway around it.
    pub async fn connect(resolver: Arc<CredentialResolver>) -> Result<Self> {
        let credential = resolver.resolve().await?;
        info!(source = credential.source.as_str(), "Gmail credential resolved");
        Self::new(resolver, credential)
    }

    pub fn with_base_url(mut self, base_url: impl Into<String>) -> Self {
        self.base_url = base_url.into().trim_end_matches('/').to_string();
        self
    }

    /// Snapshot of the credential currently in use.
    pub async fn credential(&self) -> Credential {
        self.credential.lock().await.clone()
    }

    pub async fn list_messages(
        &self,
        max_results: u32,
        query: Option<&str>,
    ) -> Result<Vec<MessageSummary>> {
        self.check_scopes("list_messages", &[SCOPE_READONLY, SCOPE_MODIFY, SCOPE_FULL])
            .await;

        let mut url = format!("{}/messages?maxResults={}", self.base_url, max_results);
        if let Some(q) = query.map(str::trim).filter(|q| !q.is_empty()) {
            url.push_str("&q=");
            url.push_str(&urlencoding::encode(q));
        }

        let response = self.send_authorized(|http| http.get(&url)).await?;
        let list: MessageList = match read_json(response).await {
            Ok(list) => list,
            Err(e) if !e.is_fatal() => {
                error!(error = %e, "listing messages failed");
                return Ok(Vec::new());
            }
            Err(e) => return Err(e),
        };
        debug!(count = list.messages.len(), "messages listed");

        let mut summaries = Vec::with_capacity(list.messages.len());
        for entry in list.messages {
            let url = format!(
                "{}/messages/{}?format=metadata&metadataHeaders=Subject",
                self.base_url,
                urlencoding::encode(&entry.id)
            );
            let response = self.send_authorized(|http| http.get(&url)).await?;
            let subject = match read_json::<GmailMessage>(response).await {
                Ok(message) => message.subject(),
                Err(e) if !e.is_fatal() => {
                    warn!(id = %entry.id, error = %e, "failed to fetch message metadata");
                    crate::message::NO_SUBJECT.to_string()
                }
                Err(e) => return Err(e),
            };
            summaries.push(MessageSummary {
                id: entry.id,
                subject,
            });
        }
        Ok(summaries)
    }

    /// `None` when the message does not exist or cannot be decoded.
    pub async fn get_message(&self, id: &str) -> Result<Option<MessageDetail>> {
        self.check_scopes("get_message", &[SCOPE_READONLY, SCOPE_MODIFY, SCOPE_FULL])
            .await;

        let url = format!(
            "{}/messages/{}?format=full",
            self.base_url,
            urlencoding::encode(id)
        );
        let response = self.send_authorized(|http| http.get(&url)).await?;
        if response.status() == StatusCode::NOT_FOUND {
            info!(id, "message not found");
            return Ok(None);
        }
        match read_json::<GmailMessage>(response).await {
            Ok(message) => Ok(Some(message.into_detail())),
            Err(e) if !e.is_fatal() => {
                error!(id, error = %e, "reading message failed");
                Ok(None)
            }
            Err(e) => Err(e),
        }
    }

    pub async fn send_message(&self, to: &str, subject: &str, body: &str) -> Result<String> {
        self.check_scopes("send_message", &[SCOPE_SEND, SCOPE_COMPOSE, SCOPE_MODIFY, SCOPE_FULL])
            .await;

        let url = format!("{}/messages/send", self.base_url);
        let payload = json!({ "raw": build_raw_message(to, subject, body) });
        let response = self
            .send_authorized(|http| http.post(&url).json(&payload))
            .await?;
        let sent: CreatedResource = read_json(response).await?;
        info!(id = %sent.id, "message sent");
        Ok(sent.id)
    }

    pub async fn create_draft(&self, to: &str, subject: &str, body: &str) -> Result<String> {
        self.check_scopes("create_draft", &[SCOPE_COMPOSE, SCOPE_MODIFY, SCOPE_FULL])
            .await;

        let url = format!("{}/drafts", self.base_url);
        let payload = json!({ "message": { "raw": build_raw_message(to, subject, body) } });
        let response = self
            .send_authorized(|http| http.post(&url).json(&payload))
            .await?;
        let draft: CreatedResource = read_json(response).await?;
        info!(id = %draft.id, "draft created");
        Ok(draft.id)
    }

    /// Issue a request with a fresh bearer token. A 401 triggers one
    /// re-resolution and a single retry.
    async fn send_authorized<F>(&self, build: F) -> Result<Response>
    where
        F: Fn(&reqwest::Client) -> RequestBuilder,
    {
        let token = self.access_token().await?;
        let response = build(&self.http).bearer_auth(&token).send().await?;
        if response.status() != StatusCode::UNAUTHORIZED {
            return Ok(response);
        }

        warn!("Gmail rejected the access token; re-resolving credentials");
        let token = self.reauthorize().await?;
        let response = build(&self.http).bearer_auth(&token).send().await?;
        if response.status() == StatusCode::UNAUTHORIZED {
            error!("Gmail rejected the re-resolved credential");
            return Err(GatewayError::Unauthorized);
        }
        Ok(response)
    }

    async fn access_token(&self) -> Result<String> {
        let mut credential = self.credential.lock().await;
        if !credential.is_valid() {
            debug!(source = credential.source.as_str(), "access token missing or expired");
            *credential = self.resolver.recover(&credential).await?;
        }
        bearer(&credential)
    }

    async fn reauthorize(&self) -> Result<String> {
        let mut credential = self.credential.lock().await;
        *credential = self.resolver.recover(&credential).await?;
        bearer(&credential)
    }

    async fn check_scopes(&self, operation: &str, accepted: &[&str]) {
        let credential = self.credential.lock().await;
        if credential.scopes.is_empty() {
            return;
        }
        if !accepted.iter().any(|scope| credential.has_scope(scope)) {
            warn!(
                operation,
                granted = ?credential.scopes,
                "credential may lack the scope this operation needs"
            );
        }
    }
}

fn bearer(credential: &Credential) -> Result<String> {
    credential
        .access_token()
        .map(str::to_string)
        .ok_or_else(|| GatewayError::Decode("token endpoint returned no access token".into()))
}

async fn read_json<T: DeserializeOwned>(response: Response) -> Result<T> {
    let status = response.status();
    let text = response.text().await?;
    if !status.is_success() {
        return Err(GatewayError::Api {
            status: status.as_u16(),
            body: text,
        });
    }
    serde_json::from_str(&text).map_err(|e| GatewayError::Decode(e.to_string()))
}

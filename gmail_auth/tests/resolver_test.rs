use std::fs;
use std::path::Path;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use chrono::Utc;
use pretty_assertions::assert_eq;
use serde_json::json;
use url::Url;
use wiremock::matchers::{body_string_contains, method, path};
use wiremock::{Mock, MockServer, ResponseTemplate};

use gmail_auth::config::{EnvClient, EnvCredentials};
use gmail_auth::{
    AuthConfig, CodeReceiver, Credential, CredentialResolutionError, CredentialResolver,
    CredentialSource, InteractiveMode,
};

/// Hands back a fixed code without any operator involvement.
#[derive(Clone)]
struct StubReceiver {
    code: &'static str,
    calls: Arc<AtomicUsize>,
}

impl StubReceiver {
    fn new(code: &'static str) -> Self {
        Self {
            code,
            calls: Arc::new(AtomicUsize::new(0)),
        }
    }

    fn calls(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl CodeReceiver for StubReceiver {
    fn redirect_uri(&self) -> String {
        "http://localhost:8080/".to_string()
    }

    async fn receive_code(&self, url: &Url, _state: &str) -> gmail_auth::Result<String> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        assert!(url.as_str().contains("prompt=consent"));
        assert!(url.as_str().contains("access_type=offline"));
        Ok(self.code.to_string())
    }
}

fn base_config(dir: &Path) -> AuthConfig {
    let mut config = AuthConfig::for_directory(dir);
    config.interactive = InteractiveMode::Disabled;
    config.http_timeout = Duration::from_secs(10);
    config
}

fn env_credentials(config: &mut AuthConfig, token_uri: &str) {
    config.token_uri = token_uri.to_string();
    config.env_credentials = Some(EnvCredentials {
        client_id: "X".into(),
        client_secret: "Y".into(),
        refresh_token: "Z".into(),
        access_token: None,
    });
}

fn write_client_secrets(dir: &Path, token_uri: &str) {
    let body = json!({
        "installed": {
            "client_id": "file-client",
            "client_secret": "file-secret",
            "auth_uri": "https://accounts.google.com/o/oauth2/auth",
            "token_uri": token_uri,
            "redirect_uris": ["http://localhost"]
        }
    });
    fs::write(
        dir.join("client_secret_test.json"),
        serde_json::to_string_pretty(&body).unwrap(),
    )
    .unwrap();
}

fn write_token_file(config: &AuthConfig, token_uri: &str, access_token: &str, expires_in_secs: i64) {
    let credential = Credential {
        token: Some(access_token.to_string()),
        refresh_token: "stored-refresh".into(),
        token_uri: token_uri.to_string(),
        client_id: "file-client".into(),
        client_secret: "file-secret".into(),
        scopes: config.scopes.clone(),
        expiry: Some(Utc::now() + chrono::Duration::seconds(expires_in_secs)),
        source: CredentialSource::TokenFile,
    };
    fs::write(
        &config.token_path,
        serde_json::to_string_pretty(&credential).unwrap(),
    )
    .unwrap();
}

fn read_token_file(config: &AuthConfig) -> Credential {
    serde_json::from_str(&fs::read_to_string(&config.token_path).unwrap()).unwrap()
}

async fn request_count(server: &MockServer) -> usize {
    server.received_requests().await.map(|r| r.len()).unwrap_or(0)
}

#[tokio::test]
async fn environment_only_returns_tokens_without_side_effects() {
    let server = MockServer::start().await;
    let dir = tempfile::tempdir().unwrap();
    let mut config = base_config(dir.path());
    env_credentials(&mut config, &format!("{}/token", server.uri()));

    let receiver = StubReceiver::new("4/unused");
    let resolver = CredentialResolver::new(config.clone())
        .unwrap()
        .with_receiver(receiver.clone());

    let credential = resolver.resolve().await.unwrap();
    assert_eq!(credential.client_id, "X");
    assert_eq!(credential.client_secret, "Y");
    assert_eq!(credential.refresh_token, "Z");
    assert_eq!(credential.token, None);
    assert_eq!(credential.source, CredentialSource::Environment);

    assert!(!config.token_path.exists(), "environment tier must not write a token file");
    assert_eq!(receiver.calls(), 0);
    assert_eq!(request_count(&server).await, 0);
}

#[tokio::test]
async fn environment_wins_over_token_file_and_interactive() {
    let server = MockServer::start().await;
    let token_uri = format!("{}/token", server.uri());
    let dir = tempfile::tempdir().unwrap();
    let mut config = base_config(dir.path());
    env_credentials(&mut config, &token_uri);
    write_client_secrets(dir.path(), &token_uri);
    write_token_file(&config, &token_uri, "stored-access", 3600);
    let before = fs::read_to_string(&config.token_path).unwrap();

    let receiver = StubReceiver::new("4/unused");
    let resolver = CredentialResolver::new(config.clone())
        .unwrap()
        .with_receiver(receiver.clone());

    let credential = resolver.resolve().await.unwrap();
    assert_eq!(credential.client_id, "X");
    assert_eq!(credential.source, CredentialSource::Environment);
    assert_eq!(fs::read_to_string(&config.token_path).unwrap(), before);
    assert_eq!(receiver.calls(), 0);
}

#[tokio::test]
async fn valid_token_file_wins_over_interactive_without_network() {
    let server = MockServer::start().await;
    let token_uri = format!("{}/token", server.uri());
    let dir = tempfile::tempdir().unwrap();
    let config = base_config(dir.path());
    write_client_secrets(dir.path(), &token_uri);
    write_token_file(&config, &token_uri, "stored-access", 3600);

    let receiver = StubReceiver::new("4/unused");
    let resolver = CredentialResolver::new(config.clone())
        .unwrap()
        .with_receiver(receiver.clone());

    let first = resolver.resolve().await.unwrap();
    let second = resolver.resolve().await.unwrap();
    assert_eq!(first.token.as_deref(), Some("stored-access"));
    assert_eq!(second.token.as_deref(), Some("stored-access"));
    assert_eq!(first.source, CredentialSource::TokenFile);
    assert_eq!(receiver.calls(), 0);
    assert_eq!(request_count(&server).await, 0, "valid credential must not be refreshed");
}

#[tokio::test]
async fn expired_token_file_is_refreshed_once_and_rewritten() {
    let server = MockServer::start().await;
    let token_uri = format!("{}/token", server.uri());
    Mock::given(method("POST"))
        .and(path("/token"))
        .and(body_string_contains("grant_type=refresh_token"))
        .and(body_string_contains("refresh_token=stored-refresh"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({
            "access_token": "fresh-access",
            "expires_in": 3599,
            "token_type": "Bearer"
        })))
        .expect(1)
        .mount(&server)
        .await;

    let dir = tempfile::tempdir().unwrap();
    let config = base_config(dir.path());
    write_token_file(&config, &token_uri, "stale-access", -600);

    let resolver = CredentialResolver::new(config.clone()).unwrap();
    let credential = resolver.resolve().await.unwrap();
    assert_eq!(credential.token.as_deref(), Some("fresh-access"));
    assert!(credential.is_valid());

    let on_disk = read_token_file(&config);
    assert_eq!(on_disk.token.as_deref(), Some("fresh-access"));
    assert_eq!(on_disk.refresh_token, "stored-refresh");
    assert!(on_disk.expiry.unwrap() > Utc::now());

    // Second resolution sees the fresh file and stays offline.
    let again = resolver.resolve().await.unwrap();
    assert_eq!(again.token.as_deref(), Some("fresh-access"));
}

#[tokio::test]
async fn failed_refresh_falls_through_to_interactive() {
    let server = MockServer::start().await;
    let token_uri = format!("{}/token", server.uri());
    Mock::given(method("POST"))
        .and(path("/token"))
        .and(body_string_contains("grant_type=refresh_token"))
        .respond_with(ResponseTemplate::new(400).set_body_json(json!({
            "error": "invalid_grant",
            "error_description": "Token has been expired or revoked."
        })))
        .expect(1)
        .mount(&server)
        .await;
    Mock::given(method("POST"))
        .and(path("/token"))
        .and(body_string_contains("grant_type=authorization_code"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({
            "access_token": "interactive-access",
            "refresh_token": "interactive-refresh",
            "expires_in": 3599,
            "scope": "https://www.googleapis.com/auth/gmail.readonly https://www.googleapis.com/auth/gmail.send",
            "token_type": "Bearer"
        })))
        .expect(1)
        .mount(&server)
        .await;

    let dir = tempfile::tempdir().unwrap();
    let config = base_config(dir.path());
    write_client_secrets(dir.path(), &token_uri);
    write_token_file(&config, &token_uri, "stale-access", -600);

    let receiver = StubReceiver::new("4/new-code");
    let resolver = CredentialResolver::new(config.clone())
        .unwrap()
        .with_receiver(receiver.clone());

    let credential = resolver.resolve().await.unwrap();
    assert_eq!(credential.source, CredentialSource::Interactive);
    assert_eq!(credential.refresh_token, "interactive-refresh");
    assert_eq!(credential.scopes.len(), 2);
    assert_eq!(receiver.calls(), 1);
    assert_eq!(read_token_file(&config).refresh_token, "interactive-refresh");
}

#[tokio::test]
async fn corrupt_token_file_is_treated_as_absent() {
    let server = MockServer::start().await;
    let token_uri = format!("{}/token", server.uri());
    Mock::given(method("POST"))
        .and(path("/token"))
        .and(body_string_contains("code=4%2Fpasted"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({
            "access_token": "a",
            "refresh_token": "r",
            "expires_in": 3599
        })))
        .expect(1)
        .mount(&server)
        .await;

    let dir = tempfile::tempdir().unwrap();
    let config = base_config(dir.path());
    write_client_secrets(dir.path(), &token_uri);
    fs::write(&config.token_path, "{\"token\": \"half-written").unwrap();

    let receiver = StubReceiver::new("4/pasted");
    let resolver = CredentialResolver::new(config.clone())
        .unwrap()
        .with_receiver(receiver.clone());

    let credential = resolver.resolve().await.unwrap();
    assert_eq!(credential.refresh_token, "r");
    assert_eq!(receiver.calls(), 1);
    assert_eq!(read_token_file(&config).refresh_token, "r");
}

#[tokio::test]
async fn interactive_authorization_always_writes_token_file() {
    let server = MockServer::start().await;
    let token_uri = format!("{}/token", server.uri());
    Mock::given(method("POST"))
        .and(path("/token"))
        .and(body_string_contains("grant_type=authorization_code"))
        .and(body_string_contains("client_id=file-client"))
        .and(body_string_contains("redirect_uri=http%3A%2F%2Flocalhost%3A8080%2F"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({
            "access_token": "a",
            "refresh_token": "r",
            "expires_in": 3599
        })))
        .expect(1)
        .mount(&server)
        .await;

    let dir = tempfile::tempdir().unwrap();
    let config = base_config(dir.path());
    write_client_secrets(dir.path(), &token_uri);
    assert!(!config.token_path.exists());

    let resolver = CredentialResolver::new(config.clone())
        .unwrap()
        .with_receiver(StubReceiver::new("4/code"));
    resolver.resolve().await.unwrap();

    let on_disk = read_token_file(&config);
    assert_eq!(on_disk.client_id, "file-client");
    assert_eq!(on_disk.token.as_deref(), Some("a"));
    assert_eq!(on_disk.scopes, config.scopes);
}

#[tokio::test]
async fn exchange_without_refresh_token_is_rejected() {
    let server = MockServer::start().await;
    let token_uri = format!("{}/token", server.uri());
    Mock::given(method("POST"))
        .and(path("/token"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({
            "access_token": "a",
            "expires_in": 3599
        })))
        .mount(&server)
        .await;

    let dir = tempfile::tempdir().unwrap();
    let config = base_config(dir.path());
    write_client_secrets(dir.path(), &token_uri);

    let resolver = CredentialResolver::new(config.clone())
        .unwrap()
        .with_receiver(StubReceiver::new("4/code"));
    let err = resolver.resolve().await.unwrap_err();
    assert!(matches!(err, CredentialResolutionError::AuthorizationAborted(_)));
    assert!(!config.token_path.exists());
}

#[tokio::test]
async fn missing_client_identity_fails_before_any_network_call() {
    let server = MockServer::start().await;
    let dir = tempfile::tempdir().unwrap();
    let mut config = base_config(dir.path());
    config.token_uri = format!("{}/token", server.uri());

    let receiver = StubReceiver::new("4/unused");
    let resolver = CredentialResolver::new(config)
        .unwrap()
        .with_receiver(receiver.clone());

    let err = resolver.resolve().await.unwrap_err();
    assert!(matches!(err, CredentialResolutionError::MissingClientIdentity(_)));
    assert!(err.is_configuration());
    assert_eq!(receiver.calls(), 0);
    assert_eq!(request_count(&server).await, 0);
}

#[tokio::test]
async fn disabled_interaction_is_reported() {
    let dir = tempfile::tempdir().unwrap();
    let mut config = base_config(dir.path());
    config.env_client = Some(EnvClient {
        client_id: "id".into(),
        client_secret: "secret".into(),
    });

    let resolver = CredentialResolver::new(config).unwrap();
    let err = resolver.resolve().await.unwrap_err();
    assert!(matches!(err, CredentialResolutionError::InteractionUnavailable));
}

#[tokio::test]
async fn refreshing_environment_credential_never_persists() {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .and(path("/token"))
        .and(body_string_contains("refresh_token=Z"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({
            "access_token": "env-access",
            "expires_in": 3599
        })))
        .expect(1)
        .mount(&server)
        .await;

    let dir = tempfile::tempdir().unwrap();
    let mut config = base_config(dir.path());
    env_credentials(&mut config, &format!("{}/token", server.uri()));

    let resolver = CredentialResolver::new(config.clone()).unwrap();
    let mut credential = resolver.resolve().await.unwrap();
    resolver.refresh(&mut credential).await.unwrap();

    assert_eq!(credential.access_token(), Some("env-access"));
    assert!(!config.token_path.exists());
}

#[tokio::test]
async fn recover_refreshes_a_rejected_credential() {
    let server = MockServer::start().await;
    let token_uri = format!("{}/token", server.uri());
    Mock::given(method("POST"))
        .and(path("/token"))
        .and(body_string_contains("grant_type=refresh_token"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({
            "access_token": "recovered",
            "expires_in": 3599
        })))
        .expect(1)
        .mount(&server)
        .await;

    let dir = tempfile::tempdir().unwrap();
    let config = base_config(dir.path());
    write_token_file(&config, &token_uri, "revoked-but-unexpired", 3600);

    let resolver = CredentialResolver::new(config.clone()).unwrap();
    let rejected = resolver.resolve().await.unwrap();
    let recovered = resolver.recover(&rejected).await.unwrap();

    assert_eq!(recovered.token.as_deref(), Some("recovered"));
    assert_eq!(read_token_file(&config).token.as_deref(), Some("recovered"));
}

#[tokio::test]
async fn recover_never_escalates_an_environment_credential() {
    let server = MockServer::start().await;
    let token_uri = format!("{}/token", server.uri());
    Mock::given(method("POST"))
        .and(path("/token"))
        .and(body_string_contains("grant_type=refresh_token"))
        .respond_with(ResponseTemplate::new(400).set_body_json(json!({
            "error": "invalid_grant"
        })))
        .expect(1)
        .mount(&server)
        .await;

    let dir = tempfile::tempdir().unwrap();
    let mut config = base_config(dir.path());
    env_credentials(&mut config, &token_uri);
    write_client_secrets(dir.path(), &token_uri);

    let receiver = StubReceiver::new("4/unused");
    let resolver = CredentialResolver::new(config.clone())
        .unwrap()
        .with_receiver(receiver.clone());

    let rejected = resolver.resolve().await.unwrap();
    let err = resolver.recover(&rejected).await.unwrap_err();
    assert!(matches!(err, CredentialResolutionError::TokenEndpoint { status: 400, .. }));
    assert_eq!(receiver.calls(), 0);
    assert!(!config.token_path.exists());
}

/// A directory squatting on the temp path makes every save fail.
fn block_token_writes(config: &AuthConfig) {
    let tmp = config.token_path.with_file_name("token.json.tmp");
    fs::create_dir(&tmp).unwrap();
    fs::write(tmp.join("occupied"), "x").unwrap();
}

#[tokio::test]
async fn persistence_failure_after_file_refresh_is_reported() {
    let server = MockServer::start().await;
    let token_uri = format!("{}/token", server.uri());
    Mock::given(method("POST"))
        .and(path("/token"))
        .and(body_string_contains("grant_type=refresh_token"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({
            "access_token": "fresh-access",
            "expires_in": 3599
        })))
        .expect(1)
        .mount(&server)
        .await;

    let dir = tempfile::tempdir().unwrap();
    let config = base_config(dir.path());
    write_client_secrets(dir.path(), &token_uri);
    write_token_file(&config, &token_uri, "stale-access", -600);
    block_token_writes(&config);

    let receiver = StubReceiver::new("4/unused");
    let resolver = CredentialResolver::new(config.clone())
        .unwrap()
        .with_receiver(receiver.clone());

    let err = resolver.resolve().await.unwrap_err();
    assert!(matches!(err, CredentialResolutionError::Persistence { .. }));
    assert_eq!(receiver.calls(), 0);
    assert_eq!(read_token_file(&config).token.as_deref(), Some("stale-access"));
}

#[tokio::test]
async fn recover_reports_persistence_failure() {
    let server = MockServer::start().await;
    let token_uri = format!("{}/token", server.uri());
    Mock::given(method("POST"))
        .and(path("/token"))
        .and(body_string_contains("grant_type=refresh_token"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({
            "access_token": "recovered",
            "expires_in": 3599
        })))
        .expect(1)
        .mount(&server)
        .await;

    let dir = tempfile::tempdir().unwrap();
    let config = base_config(dir.path());
    write_client_secrets(dir.path(), &token_uri);
    write_token_file(&config, &token_uri, "revoked-but-unexpired", 3600);

    let receiver = StubReceiver::new("4/unused");
    let resolver = CredentialResolver::new(config.clone())
        .unwrap()
        .with_receiver(receiver.clone());
    let rejected = resolver.resolve().await.unwrap();
    block_token_writes(&config);

    let err = resolver.recover(&rejected).await.unwrap_err();
    assert!(matches!(err, CredentialResolutionError::Persistence { .. }));
    assert_eq!(receiver.calls(), 0);
}

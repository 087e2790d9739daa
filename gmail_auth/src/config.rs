use std::path::PathBuf;
use std::str::FromStr;
use std::time::Duration;

use crate::error::{CredentialResolutionError, Result};

/// Scopes requested by every resolution path.
pub const GMAIL_SCOPES: [&str; 3] = [
    "https://www.googleapis.com/auth/gmail.readonly",
    "https://www.googleapis.com/auth/gmail.send",
    "https://www.googleapis.com/auth/gmail.compose",
];

pub const DEFAULT_AUTH_URI: &str = "https://accounts.google.com/o/oauth2/auth";
pub const DEFAULT_TOKEN_URI: &str = "https://oauth2.googleapis.com/token";
pub const DEFAULT_CALLBACK_PORT: u16 = 8080;
pub const TOKEN_FILE_NAME: &str = "token.json";

// Long enough for an operator to paste a code before the transport gives up.
const DEFAULT_HTTP_TIMEOUT_SECS: u64 = 30 * 60;

/// How the interactive tier obtains an authorization code.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum InteractiveMode {
    /// Local callback listener plus the OS browser.
    Browser,
    /// Print the URL, read the redirect URL or code from the console.
    Manual,
    /// Never prompt; resolution fails if no stored credential is usable.
    Disabled,
}

impl FromStr for InteractiveMode {
    type Err = CredentialResolutionError;

    fn from_str(s: &str) -> Result<Self> {
        match s.trim().to_ascii_lowercase().as_str() {
            "browser" | "local" => Ok(Self::Browser),
            "manual" | "console" | "headless" => Ok(Self::Manual),
            "none" | "disabled" | "off" => Ok(Self::Disabled),
            other => Err(CredentialResolutionError::Config(format!(
                "GMAIL_AUTH_MODE must be one of browser, manual, none (got '{}')",
                other
            ))),
        }
    }
}

/// Tokens supplied entirely through the environment.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct EnvCredentials {
    pub client_id: String,
    pub client_secret: String,
    pub refresh_token: String,
    pub access_token: Option<String>,
}

/// Client id/secret pair supplied through the environment.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct EnvClient {
    pub client_id: String,
    pub client_secret: String,
}

/// Everything the resolver needs to know about its surroundings.
///
/// Built once by the caller and passed to `CredentialResolver::new`.
#[derive(Debug, Clone)]
pub struct AuthConfig {
    pub env_credentials: Option<EnvCredentials>,
    pub env_client: Option<EnvClient>,
    pub auth_uri: String,
    pub token_uri: String,
    pub secrets_dir: PathBuf,
    pub credentials_filename: Option<String>,
    pub token_path: PathBuf,
    pub scopes: Vec<String>,
    pub interactive: InteractiveMode,
    pub open_browser: bool,
    pub callback_port: u16,
    pub callback_timeout: Option<Duration>,
    pub http_timeout: Duration,
}

impl AuthConfig {
    /// Defaults rooted at `dir`, ignoring the process environment.
    pub fn for_directory(dir: impl Into<PathBuf>) -> Self {
        let secrets_dir = dir.into();
        Self {
            env_credentials: None,
            env_client: None,
            auth_uri: DEFAULT_AUTH_URI.to_string(),
            token_uri: DEFAULT_TOKEN_URI.to_string(),
            token_path: secrets_dir.join(TOKEN_FILE_NAME),
            secrets_dir,
            credentials_filename: None,
            scopes: GMAIL_SCOPES.iter().map(|s| s.to_string()).collect(),
            interactive: InteractiveMode::Browser,
            open_browser: true,
            callback_port: DEFAULT_CALLBACK_PORT,
            callback_timeout: None,
            http_timeout: Duration::from_secs(DEFAULT_HTTP_TIMEOUT_SECS),
        }
    }

    pub fn from_env() -> Result<Self> {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    /// Build a config from any key/value source. Empty values count as unset.
    pub fn from_lookup<F>(lookup: F) -> Result<Self>
    where
        F: Fn(&str) -> Option<String>,
    {
        let get = |key: &str| lookup(key).filter(|v| !v.trim().is_empty());

        let secrets_dir = match get("GMAIL_SECRETS_DIR") {
            Some(dir) => PathBuf::from(dir),
            None => PathBuf::from("."),
        };
        let mut config = Self::for_directory(secrets_dir);

        if let Some(path) = get("GMAIL_TOKEN_PATH") {
            config.token_path = PathBuf::from(path);
        }
        if let Some(uri) = get("GOOGLE_TOKEN_URI") {
            config.token_uri = uri;
        }
        config.credentials_filename = get("GMAIL_CREDENTIALS_NAME");

        let client_id = get("GOOGLE_CLIENT_ID");
        let client_secret = get("GOOGLE_CLIENT_SECRET");
        if let (Some(client_id), Some(client_secret)) = (&client_id, &client_secret) {
            config.env_client = Some(EnvClient {
                client_id: client_id.clone(),
                client_secret: client_secret.clone(),
            });
            if let Some(refresh_token) = get("GOOGLE_REFRESH_TOKEN") {
                config.env_credentials = Some(EnvCredentials {
                    client_id: client_id.clone(),
                    client_secret: client_secret.clone(),
                    refresh_token,
                    access_token: get("GOOGLE_ACCESS_TOKEN"),
                });
            }
        }

        if let Some(mode) = get("GMAIL_AUTH_MODE") {
            config.interactive = mode.parse()?;
        }
        if let Some(flag) = get("GMAIL_OPEN_BROWSER") {
            config.open_browser = parse_bool("GMAIL_OPEN_BROWSER", &flag)?;
        }
        if let Some(port) = get("GMAIL_CALLBACK_PORT") {
            config.callback_port = parse_number("GMAIL_CALLBACK_PORT", &port)?;
        }
        if let Some(secs) = get("GMAIL_CALLBACK_TIMEOUT_SECS") {
            config.callback_timeout = Some(Duration::from_secs(parse_number(
                "GMAIL_CALLBACK_TIMEOUT_SECS",
                &secs,
            )?));
        }
        if let Some(secs) = get("GMAIL_HTTP_TIMEOUT_SECS") {
            config.http_timeout =
                Duration::from_secs(parse_number("GMAIL_HTTP_TIMEOUT_SECS", &secs)?);
        }

        Ok(config)
    }

    /// Redirect URI served by the loopback listener.
    pub fn loopback_redirect_uri(&self) -> String {
        format!("http://localhost:{}/", self.callback_port)
    }
}

fn parse_bool(key: &str, value: &str) -> Result<bool> {
    match value.trim().to_ascii_lowercase().as_str() {
        "1" | "true" | "yes" | "on" => Ok(true),
        "0" | "false" | "no" | "off" => Ok(false),
        other => Err(CredentialResolutionError::Config(format!(
            "{} must be a boolean (got '{}')",
            key, other
        ))),
    }
}

fn parse_number<T: FromStr>(key: &str, value: &str) -> Result<T> {
    value.trim().parse().map_err(|_| {
        CredentialResolutionError::Config(format!("{} must be a number (got '{}')", key, value))
    })
}

use std::fs;
use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};
use tracing::{debug, info, warn};

use crate::config::{AuthConfig, DEFAULT_AUTH_URI, DEFAULT_TOKEN_URI};
use crate::error::{CredentialResolutionError, Result};

/// Redirect added when a `web` client file is reshaped for the installed flow.
pub const WEB_CLIENT_REDIRECT_URI: &str = "http://localhost:8080/";

const SECRETS_PREFIX: &str = "client_secret_";
const SECRETS_SUFFIX: &str = ".json";

/// One section of a downloaded client-secrets file.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ClientSection {
    pub client_id: String,
    pub client_secret: String,
    #[serde(default = "default_auth_uri")]
    pub auth_uri: String,
    #[serde(default = "default_token_uri")]
    pub token_uri: String,
    #[serde(default)]
    pub redirect_uris: Vec<String>,
}

fn default_auth_uri() -> String {
    DEFAULT_AUTH_URI.to_string()
}

fn default_token_uri() -> String {
    DEFAULT_TOKEN_URI.to_string()
}

/// The JSON document Google hands out for an OAuth client.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ClientSecretsFile {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub installed: Option<ClientSection>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub web: Option<ClientSection>,
}

impl ClientSecretsFile {
    pub fn load(path: &Path) -> Result<Self> {
        let data = fs::read_to_string(path).map_err(|e| {
            CredentialResolutionError::Config(format!("cannot read {}: {}", path.display(), e))
        })?;
        Self::parse(&data)
    }

    pub fn parse(data: &str) -> Result<Self> {
        let file: Self = serde_json::from_str(data)?;
        if file.installed.is_none() && file.web.is_none() {
            return Err(CredentialResolutionError::Config(
                "client secrets file has neither an 'installed' nor a 'web' section".into(),
            ));
        }
        Ok(file)
    }

    pub fn kind(&self) -> &'static str {
        if self.installed.is_some() {
            "installed"
        } else {
            "web"
        }
    }

    /// Reshape into the installed-application layout the authorization flow expects.
    pub fn into_installed(self) -> Result<ClientSection> {
        match (self.installed, self.web) {
            (Some(installed), _) => Ok(installed),
            (None, Some(mut web)) => {
                web.redirect_uris = vec![WEB_CLIENT_REDIRECT_URI.to_string()];
                Ok(web)
            }
            (None, None) => Err(CredentialResolutionError::Config(
                "client secrets file has neither an 'installed' nor a 'web' section".into(),
            )),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum IdentitySource {
    File(PathBuf),
    Environment,
}

/// The application's registered OAuth client.
#[derive(Debug, Clone)]
pub struct ClientIdentity {
    pub client_id: String,
    pub client_secret: String,
    pub auth_uri: String,
    pub token_uri: String,
    pub redirect_uris: Vec<String>,
    pub source: IdentitySource,
}

impl ClientIdentity {
    /// Locate the client identity: secrets file first, environment second.
    pub fn discover(config: &AuthConfig) -> Result<Self> {
        if let Some(path) = find_secrets_file(config) {
            match ClientSecretsFile::load(&path).and_then(|file| {
                let kind = file.kind();
                file.into_installed().map(|section| (kind, section))
            }) {
                Ok((kind, section)) => {
                    info!(path = %path.display(), kind, "loaded client identity from file");
                    return Ok(Self::from_section(section, IdentitySource::File(path)));
                }
                Err(e) => {
                    warn!(
                        path = %path.display(),
                        error = %e,
                        "client secrets file found but unusable; trying environment"
                    );
                }
            }
        } else {
            debug!(dir = %config.secrets_dir.display(), "no client secrets file found");
        }

        if let Some(client) = &config.env_client {
            info!("using client identity from GOOGLE_CLIENT_ID/GOOGLE_CLIENT_SECRET");
            return Ok(Self {
                client_id: client.client_id.clone(),
                client_secret: client.client_secret.clone(),
                auth_uri: config.auth_uri.clone(),
                token_uri: config.token_uri.clone(),
                redirect_uris: Vec::new(),
                source: IdentitySource::Environment,
            });
        }

        Err(CredentialResolutionError::MissingClientIdentity(format!(
            "create a '{}*{}' file in {} or set GOOGLE_CLIENT_ID and GOOGLE_CLIENT_SECRET",
            SECRETS_PREFIX,
            SECRETS_SUFFIX,
            config.secrets_dir.display()
        )))
    }

    fn from_section(section: ClientSection, source: IdentitySource) -> Self {
        Self {
            client_id: section.client_id,
            client_secret: section.client_secret,
            auth_uri: section.auth_uri,
            token_uri: section.token_uri,
            redirect_uris: section.redirect_uris,
            source,
        }
    }
}

/// Path of the client-secrets file to use, if any.
///
/// An explicit `GMAIL_CREDENTIALS_NAME` wins. Otherwise the first
/// `client_secret_*.json` by file name is taken.
pub fn find_secrets_file(config: &AuthConfig) -> Option<PathBuf> {
    if let Some(name) = &config.credentials_filename {
        let path = Path::new(name);
        let path = if path.is_absolute() {
            path.to_path_buf()
        } else {
            config.secrets_dir.join(path)
        };
        if path.is_file() {
            return Some(path);
        }
        warn!(path = %path.display(), "GMAIL_CREDENTIALS_NAME points to a missing file");
        return None;
    }

    let mut candidates: Vec<PathBuf> = fs::read_dir(&config.secrets_dir)
        .ok()?
        .filter_map(|entry| entry.ok())
        .map(|entry| entry.path())
        .filter(|path| {
            path.is_file()
                && path
                    .file_name()
                    .and_then(|n| n.to_str())
                    .is_some_and(|n| n.starts_with(SECRETS_PREFIX) && n.ends_with(SECRETS_SUFFIX))
        })
        .collect();
    candidates.sort();

    let first = candidates.first()?.clone();
    if candidates.len() > 1 {
        warn!(
            count = candidates.len(),
            using = %first.display(),
            "multiple client_secret_*.json files found; using the first"
        );
    }
    Some(first)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::EnvClient;

    const INSTALLED: &str = r#"{"installed": {
        "client_id": "installed-id",
        "client_secret": "installed-secret",
        "auth_uri": "https://accounts.google.com/o/oauth2/auth",
        "token_uri": "https://oauth2.googleapis.com/token",
        "redirect_uris": ["http://localhost"]
    }}"#;

    const WEB: &str = r#"{"web": {
        "client_id": "web-id",
        "client_secret": "web-secret",
        "auth_uri": "https://accounts.google.com/o/oauth2/auth",
        "token_uri": "https://oauth2.googleapis.com/token",
        "redirect_uris": ["https://example.com/callback"]
    }}"#;

    #[test]
    fn web_files_are_normalised_to_installed_shape() {
        let file = ClientSecretsFile::parse(WEB).unwrap();
        assert_eq!(file.kind(), "web");
        let section = file.into_installed().unwrap();
        assert_eq!(section.client_id, "web-id");
        assert_eq!(section.redirect_uris, vec![WEB_CLIENT_REDIRECT_URI.to_string()]);
    }

    #[test]
    fn rejects_files_without_a_section() {
        assert!(ClientSecretsFile::parse(r#"{"other": {}}"#).is_err());
        assert!(ClientSecretsFile::parse("not json").is_err());
    }

    #[test]
    fn picks_first_file_by_name() {
        let dir = tempfile::tempdir().unwrap();
        fs::write(dir.path().join("client_secret_b.json"), WEB).unwrap();
        fs::write(dir.path().join("client_secret_a.json"), INSTALLED).unwrap();
        fs::write(dir.path().join("unrelated.json"), "{}").unwrap();

        let config = AuthConfig::for_directory(dir.path());
        let identity = ClientIdentity::discover(&config).unwrap();
        assert_eq!(identity.client_id, "installed-id");
        assert_eq!(
            identity.source,
            IdentitySource::File(dir.path().join("client_secret_a.json"))
        );
    }

    #[test]
    fn explicit_file_name_overrides_discovery() {
        let dir = tempfile::tempdir().unwrap();
        fs::write(dir.path().join("client_secret_a.json"), INSTALLED).unwrap();
        fs::write(dir.path().join("my_client.json"), WEB).unwrap();

        let mut config = AuthConfig::for_directory(dir.path());
        config.credentials_filename = Some("my_client.json".into());
        let identity = ClientIdentity::discover(&config).unwrap();
        assert_eq!(identity.client_id, "web-id");
    }

    #[test]
    fn corrupt_file_falls_back_to_environment() {
        let dir = tempfile::tempdir().unwrap();
        fs::write(dir.path().join("client_secret_x.json"), "{ broken").unwrap();

        let mut config = AuthConfig::for_directory(dir.path());
        config.env_client = Some(EnvClient {
            client_id: "env-id".into(),
            client_secret: "env-secret".into(),
        });
        let identity = ClientIdentity::discover(&config).unwrap();
        assert_eq!(identity.client_id, "env-id");
        assert_eq!(identity.source, IdentitySource::Environment);
    }

    #[test]
    fn nothing_available_is_missing_identity() {
        let dir = tempfile::tempdir().unwrap();
        let config = AuthConfig::for_directory(dir.path());
        let err = ClientIdentity::discover(&config).unwrap_err();
        assert!(matches!(err, CredentialResolutionError::MissingClientIdentity(_)));
    }
}

//! Token file persistence.
//!
//! The file is replaced wholesale on every save: written to a sibling temp
//! file with owner-only permissions, then renamed over the target. No locking;
//! one writer per token path is assumed.

use std::fs;
use std::io::{self, Write};
use std::path::{Path, PathBuf};

use tracing::{debug, info, warn};

use crate::credential::{Credential, CredentialSource};
use crate::error::{CredentialResolutionError, Result};

#[derive(Debug, Clone)]
pub struct TokenStore {
    path: PathBuf,
}

impl TokenStore {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    pub fn exists(&self) -> bool {
        self.path.is_file()
    }

    /// Read the persisted credential. Unreadable or corrupt files count as absent.
    pub fn load(&self) -> Option<Credential> {
        let data = match fs::read_to_string(&self.path) {
            Ok(data) => data,
            Err(e) if e.kind() == io::ErrorKind::NotFound => {
                debug!(path = %self.path.display(), "no token file");
                return None;
            }
            Err(e) => {
                warn!(path = %self.path.display(), error = %e, "token file unreadable; ignoring it");
                return None;
            }
        };

        match serde_json::from_str::<Credential>(&data) {
            Ok(mut credential) => {
                credential.source = CredentialSource::TokenFile;
                debug!(path = %self.path.display(), "loaded token file");
                Some(credential)
            }
            Err(e) => {
                warn!(path = %self.path.display(), error = %e, "token file is corrupt; ignoring it");
                None
            }
        }
    }

    pub fn save(&self, credential: &Credential) -> Result<()> {
        let json = serde_json::to_string_pretty(credential)?;
        self.write_atomically(json.as_bytes())
            .map_err(|source| CredentialResolutionError::Persistence {
                path: self.path.clone(),
                source,
            })?;
        info!(path = %self.path.display(), "token file written");
        Ok(())
    }

    fn write_atomically(&self, contents: &[u8]) -> io::Result<()> {
        if let Some(parent) = self.path.parent().filter(|p| !p.as_os_str().is_empty()) {
            fs::create_dir_all(parent)?;
        }

        let mut tmp_name = self
            .path
            .file_name()
            .map(|n| n.to_os_string())
            .unwrap_or_else(|| "token.json".into());
        tmp_name.push(".tmp");
        let tmp_path = self.path.with_file_name(tmp_name);

        let result = write_private(&tmp_path, contents).and_then(|()| fs::rename(&tmp_path, &self.path));
        if result.is_err() {
            let _ = fs::remove_file(&tmp_path);
        }
        result
    }
}

/// Create `path` readable by the owner only, then write `contents`.
fn write_private(path: &Path, contents: &[u8]) -> io::Result<()> {
    match fs::remove_file(path) {
        Ok(()) => {}
        Err(e) if e.kind() == io::ErrorKind::NotFound => {}
        Err(e) => return Err(e),
    }

    let mut options = fs::OpenOptions::new();
    options.write(true).create_new(true);
    #[cfg(unix)]
    {
        use std::os::unix::fs::OpenOptionsExt;
        options.mode(0o600);
    }
    let mut file = options.open(path)?;
    file.write_all(contents)?;
    file.sync_all()
}

//! Authorize once in a browser (or console) and write the token file.
//!
//! Reuses an existing token file when it is still valid or refreshable.
//! Environment-supplied tokens are ignored.

use std::path::Path;

use anyhow::{Context, Result};
use tracing::{info, Level};
use tracing_subscriber::EnvFilter;

use gmail_auth::{AuthConfig, Credential, CredentialResolver, CredentialSource};

#[tokio::main]
async fn main() -> Result<()> {
    dotenvy::dotenv().ok();

    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::from_default_env()
                .add_directive(Level::INFO.into()),
        )
        .with_writer(std::io::stderr)
        .with_target(false)
        .init();

    let config = AuthConfig::from_env().context("invalid configuration")?;
    info!(token_path = %config.token_path.display(), "generating Gmail token");

    let resolver = CredentialResolver::new(config)?;
    let credential = resolver
        .resolve_stored_or_interactive()
        .await
        .context("could not obtain Gmail credentials")?;

    println!("{}", report(resolver.token_store().path(), &credential));
    Ok(())
}

fn report(path: &Path, credential: &Credential) -> String {
    let scopes = credential.scopes.join(", ");
    match credential.source {
        CredentialSource::TokenFile => format!(
            "Existing token file at {} is usable (scopes: {})",
            path.display(),
            scopes
        ),
        _ => format!("Token saved to {} (scopes: {})", path.display(), scopes),
    }
}

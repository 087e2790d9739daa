//! Sanity check for a Gmail setup: client identity, credentials, and a
//! listing of the five most recent messages.

use std::sync::Arc;

use anyhow::{Context, Result};
use gmail_auth::client_identity::find_secrets_file;
use gmail_auth::{AuthConfig, ClientSecretsFile, CredentialResolver};
use gmail_tools::MailGateway;
use tracing::Level;
use tracing_subscriber::EnvFilter;

#[tokio::main]
async fn main() -> Result<()> {
    dotenvy::dotenv().ok();

    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::from_default_env().add_directive(Level::WARN.into()))
        .with_writer(std::io::stderr)
        .with_target(false)
        .init();

    let config = AuthConfig::from_env().context("invalid configuration")?;

    match find_secrets_file(&config) {
        Some(path) => {
            let kind = ClientSecretsFile::load(&path)
                .map(|file| file.kind())
                .unwrap_or("unreadable");
            println!("Client secrets file: {} ({})", path.display(), kind);
        }
        None if config.env_client.is_some() => {
            println!("Client identity: GOOGLE_CLIENT_ID/GOOGLE_CLIENT_SECRET");
        }
        None => println!(
            "No client secrets file in {} and no client identity in the environment",
            config.secrets_dir.display()
        ),
    }

    let resolver = Arc::new(CredentialResolver::new(config)?);
    let gateway = MailGateway::connect(resolver)
        .await
        .context("failed to resolve Gmail credentials")?;
    let credential = gateway.credential().await;
    println!("Credentials: {}", credential.source.as_str());

    let messages = gateway
        .list_messages(5, None)
        .await
        .context("failed to list messages")?;
    if messages.is_empty() {
        println!("No messages found.");
    }
    for message in messages {
        println!("{}  {}", message.id, message.subject);
    }
    Ok(())
}

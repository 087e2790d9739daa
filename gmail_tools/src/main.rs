use std::path::PathBuf;
use std::sync::Arc;

use anyhow::{Context, Result};
use gmail_auth::{AuthConfig, CredentialResolver};
use gmail_tools::{GmailTool, MailGateway};
use rmcp::{transport::stdio, ServiceExt};
use tracing::{error, info};
use tracing_subscriber::EnvFilter;

fn log_dir() -> PathBuf {
    if let Some(dir) = std::env::var_os("LOG_DIR").filter(|d| !d.is_empty()) {
        return PathBuf::from(dir);
    }
    dirs::home_dir()
        .unwrap_or_else(|| PathBuf::from("."))
        .join(".gmail-mcp")
        .join("logs")
}

#[tokio::main]
async fn main() -> Result<()> {
    dotenvy::dotenv().ok();

    // stdout carries the MCP protocol, so logs go to a file.
    let log_dir = log_dir();
    let file_appender = tracing_appender::rolling::Builder::new()
        .rotation(tracing_appender::rolling::Rotation::NEVER)
        .filename_prefix("gmail-mcp")
        .filename_suffix("log")
        .build(&log_dir)
        .with_context(|| format!("failed to create log file in {}", log_dir.display()))?;
    let (non_blocking, _guard) = tracing_appender::non_blocking(file_appender);

    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| EnvFilter::new("info,gmail_auth=debug,gmail_tools=debug")),
        )
        .with_writer(non_blocking)
        .with_ansi(false)
        .with_thread_ids(true)
        .with_file(true)
        .with_line_number(true)
        .with_target(true)
        .init();

    info!("Starting Gmail MCP server...");
    info!("Process ID: {}", std::process::id());

    let config = AuthConfig::from_env().context("invalid Gmail configuration")?;
    let resolver = Arc::new(CredentialResolver::new(config)?);
    let gateway = match MailGateway::connect(resolver).await {
        Ok(gateway) => gateway,
        Err(e) => {
            error!(error = %e, "credential resolution failed");
            return Err(e).context("failed to resolve Gmail credentials");
        }
    };

    let tool = GmailTool::new(Arc::new(gateway));
    info!("Initializing RMCP server with stdio transport...");
    let server = tool
        .serve(stdio())
        .await
        .context("failed to start MCP server")?;

    info!("Server is running, waiting for requests...");
    if let Err(e) = server.waiting().await {
        error!("Server encountered an error while running: {}", e);
    }

    info!("Gmail MCP server shutdown complete.");
    Ok(())
}

use std::sync::Arc;

use rmcp::model::{ServerCapabilities, ServerInfo};
use rmcp::{tool, ServerHandler};
use schemars::JsonSchema;
use serde::{Deserialize, Serialize};
use tracing::{error, info};

use crate::gateway::MailGateway;

pub const NO_MESSAGES: &str = "No messages found.";
pub const MESSAGE_NOT_FOUND: &str = "Message not found.";

const MAX_LIST_RESULTS: u32 = 100;

/// Parameters accepted by `list_emails`
#[derive(Debug, Serialize, Deserialize, JsonSchema)]
pub struct ListEmailsParams {
    #[serde(default = "default_max_results")]
    #[schemars(description = "Number of messages to list, 1 to 100 (default: 5)")]
    pub max_results: u32,

    #[serde(default)]
    #[schemars(description = "Optional Gmail search query, e.g. 'is:unread' or 'from:someone@example.com'")]
    pub query: Option<String>,
}

fn default_max_results() -> u32 {
    5
}

/// Parameters accepted by `read_email`
#[derive(Debug, Serialize, Deserialize, JsonSchema)]
pub struct ReadEmailParams {
    #[schemars(description = "Gmail message ID, as returned by list_emails")]
    pub message_id: String,
}

/// Parameters accepted by `send_email` and `create_draft`
#[derive(Debug, Serialize, Deserialize, JsonSchema)]
pub struct ComposeParams {
    #[schemars(description = "Recipient email address")]
    pub to: String,

    #[schemars(description = "Subject line")]
    pub subject: String,

    #[schemars(description = "Plain-text body")]
    pub body: String,
}

impl ComposeParams {
    fn validate(&self) -> Result<(), String> {
        let to = self.to.trim();
        match to.split_once('@') {
            Some((local, domain)) if !local.is_empty() && domain.contains('.') => Ok(()),
            _ => Err(format!("invalid recipient address '{}'", to)),
        }
    }
}

/// Gmail operations exposed to the agent.
#[derive(Debug, Clone)]
pub struct GmailTool {
    gateway: Arc<MailGateway>,
}

impl GmailTool {
    pub fn new(gateway: Arc<MailGateway>) -> Self {
        Self { gateway }
    }
}

#[tool(tool_box)]
impl GmailTool {
    #[tool(description = "Lists recent messages in the Gmail mailbox as JSON (id and subject). Accepts an optional Gmail search query.")]
    pub async fn list_emails(&self, #[tool(aggr)] params: ListEmailsParams) -> String {
        let max_results = params.max_results.clamp(1, MAX_LIST_RESULTS);
        info!(max_results, query = ?params.query, "list_emails called");

        match self
            .gateway
            .list_messages(max_results, params.query.as_deref())
            .await
        {
            Ok(messages) if messages.is_empty() => NO_MESSAGES.to_string(),
            Ok(messages) => serde_json::to_string_pretty(&messages)
                .unwrap_or_else(|e| format!("Failed to format messages: {}", e)),
            Err(e) => {
                error!(error = %e, "list_emails failed");
                format!("Failed to list messages: {}", e)
            }
        }
    }

    #[tool(description = "Reads one Gmail message by ID and returns its subject, sender and plain-text body as JSON.")]
    pub async fn read_email(&self, #[tool(aggr)] params: ReadEmailParams) -> String {
        let id = params.message_id.trim();
        if id.is_empty() {
            return MESSAGE_NOT_FOUND.to_string();
        }
        info!(id, "read_email called");

        match self.gateway.get_message(id).await {
            Ok(Some(detail)) => serde_json::to_string_pretty(&detail)
                .unwrap_or_else(|e| format!("Failed to format message: {}", e)),
            Ok(None) => MESSAGE_NOT_FOUND.to_string(),
            Err(e) => {
                error!(id, error = %e, "read_email failed");
                format!("Failed to read message: {}", e)
            }
        }
    }

    #[tool(description = "Sends a plain-text email from the authorized Gmail account.")]
    pub async fn send_email(&self, #[tool(aggr)] params: ComposeParams) -> String {
        if let Err(reason) = params.validate() {
            return format!("Failed to send email: {}", reason);
        }
        info!(to = %params.to, "send_email called");

        match self
            .gateway
            .send_message(&params.to, &params.subject, &params.body)
            .await
        {
            Ok(id) => format!("Email sent successfully. Message ID: {}", id),
            Err(e) => {
                error!(error = %e, "send_email failed");
                format!("Failed to send email: {}", e)
            }
        }
    }

    #[tool(description = "Saves a plain-text email as a Gmail draft without sending it.")]
    pub async fn create_draft(&self, #[tool(aggr)] params: ComposeParams) -> String {
        if let Err(reason) = params.validate() {
            return format!("Failed to create draft: {}", reason);
        }
        info!(to = %params.to, "create_draft called");

        match self
            .gateway
            .create_draft(&params.to, &params.subject, &params.body)
            .await
        {
            Ok(id) => format!("Draft created successfully. Draft ID: {}", id),
            Err(e) => {
                error!(error = %e, "create_draft failed");
                format!("Failed to create draft: {}", e)
            }
        }
    }
}

#[tool(tool_box)]
impl ServerHandler for GmailTool {
    fn get_info(&self) -> ServerInfo {
        ServerInfo {
            instructions: Some(
                "Gmail tools: list_emails, read_email, send_email, create_draft. Credentials are resolved at startup.".to_string(),
            ),
            capabilities: ServerCapabilities::builder().enable_tools().build(),
            ..Default::default()
        }
    }
}

//! Gmail list/read/send/draft operations over a resolved OAuth2 credential,
//! exposed to agents as MCP tools.

pub mod error;
pub mod gateway;
pub mod message;
pub mod tools;

pub use crate::error::{GatewayError, Result};
pub use crate::gateway::{MailGateway, GMAIL_API_BASE};
pub use crate::message::{MessageDetail, MessageSummary};
pub use crate::tools::GmailTool;

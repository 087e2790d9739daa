//! Gmail message shapes and RFC 822 encoding.

use base64::engine::general_purpose::{STANDARD, URL_SAFE, URL_SAFE_NO_PAD};
use base64::Engine as _;
use serde::{Deserialize, Serialize};

pub const NO_SUBJECT: &str = "(no subject)";

/// Entry of a message listing.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct MessageSummary {
    pub id: String,
    pub subject: String,
}

/// Decoded message for reading.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct MessageDetail {
    pub id: String,
    pub subject: String,
    pub from: Option<String>,
    pub body: String,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub(crate) struct MessageList {
    #[serde(default)]
    pub messages: Vec<MessageRef>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub(crate) struct MessageRef {
    pub id: String,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub(crate) struct GmailMessage {
    pub id: String,
    #[serde(default)]
    pub snippet: Option<String>,
    #[serde(default)]
    pub payload: Option<MessagePart>,
}

#[derive(Debug, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
pub(crate) struct MessagePart {
    #[serde(default)]
    pub mime_type: Option<String>,
    #[serde(default)]
    pub headers: Vec<Header>,
    #[serde(default)]
    pub body: Option<PartBody>,
    #[serde(default)]
    pub parts: Vec<MessagePart>,
}

#[derive(Debug, Deserialize)]
pub(crate) struct Header {
    pub name: String,
    pub value: String,
}

#[derive(Debug, Deserialize)]
pub(crate) struct PartBody {
    #[serde(default)]
    pub data: Option<String>,
}

/// Response of `messages.send` and `drafts.create`.
#[derive(Debug, Deserialize)]
pub(crate) struct CreatedResource {
    pub id: String,
}

impl GmailMessage {
    pub fn header(&self, name: &str) -> Option<&str> {
        self.payload.as_ref()?.headers.iter().find_map(|h| {
            h.name
                .eq_ignore_ascii_case(name)
                .then_some(h.value.as_str())
        })
    }

    pub fn subject(&self) -> String {
        self.header("Subject")
            .filter(|s| !s.trim().is_empty())
            .unwrap_or(NO_SUBJECT)
            .to_string()
    }

    /// Plain text if any part has it, then HTML, then the snippet.
    pub fn body_text(&self) -> String {
        let mut plain = None;
        let mut html = None;
        if let Some(payload) = &self.payload {
            collect_bodies(payload, &mut plain, &mut html);
        }
        plain
            .or(html)
            .or_else(|| self.snippet.clone())
            .unwrap_or_default()
    }

    pub fn into_detail(self) -> MessageDetail {
        MessageDetail {
            subject: self.subject(),
            from: self.header("From").map(str::to_string),
            body: self.body_text(),
            id: self.id,
        }
    }
}

fn collect_bodies(part: &MessagePart, plain: &mut Option<String>, html: &mut Option<String>) {
    let mime = part.mime_type.as_deref().unwrap_or("").to_ascii_lowercase();
    if let Some(data) = part.body.as_ref().and_then(|b| b.data.as_deref()) {
        if let Some(text) = decode_body_data(data) {
            if mime == "text/plain" && plain.is_none() {
                *plain = Some(text);
            } else if mime == "text/html" && html.is_none() {
                *html = Some(text);
            }
        }
    }
    for child in &part.parts {
        collect_bodies(child, plain, html);
    }
}

/// Gmail body data is base64url, with or without padding.
pub fn decode_body_data(data: &str) -> Option<String> {
    let bytes = URL_SAFE_NO_PAD.decode(data.trim_end_matches('=')).ok()?;
    Some(String::from_utf8_lossy(&bytes).into_owned())
}

/// RFC 2047 encoding for non-ASCII header values.
pub fn encode_header_value(value: &str) -> String {
    if value.is_ascii() {
        value.to_string()
    } else {
        format!("=?UTF-8?B?{}?=", STANDARD.encode(value.as_bytes()))
    }
}

/// Plain-text UTF-8 message, base64url encoded for the `raw` field.
pub fn build_raw_message(to: &str, subject: &str, body: &str) -> String {
    let email = format!(
        "To: {}\r\nSubject: {}\r\nMIME-Version: 1.0\r\nContent-Type: text/plain; charset=\"UTF-8\"\r\nContent-Transfer-Encoding: 8bit\r\n\r\n{}",
        to.trim(),
        encode_header_value(subject.trim()),
        body
    );
    URL_SAFE.encode(email.as_bytes())
}

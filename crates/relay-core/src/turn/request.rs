//! Outbound request composition
//!
//! Normalizes chat history into part-based messages and attaches the
//! routing directives parsed from the newest user message.

use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::mentions::{DocumentReference, DocumentSourceKind, ParsedMentions};
use crate::stream::{ContentPart, Snapshot};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Role {
    System,
    User,
    Assistant,
}

/// One normalized message part.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "lowercase")]
pub enum MessagePart {
    Text {
        text: String,
    },
    #[serde(rename_all = "camelCase")]
    Image {
        image: String,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        mime_type: Option<String>,
    },
    #[serde(rename_all = "camelCase")]
    File {
        url: String,
        mime_type: String,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        name: Option<String>,
    },
}

impl MessagePart {
    pub fn text(text: impl Into<String>) -> Self {
        MessagePart::Text { text: text.into() }
    }
}

/// A file or image attached to a user message.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Attachment {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub id: Option<String>,
    pub name: String,
    pub url: String,
    pub content_type: String,
}

impl Attachment {
    pub fn is_image(&self) -> bool {
        self.content_type.starts_with("image/")
    }

    fn to_part(&self) -> MessagePart {
        if self.is_image() {
            MessagePart::Image {
                image: self.url.clone(),
                mime_type: Some(self.content_type.clone()),
            }
        } else {
            MessagePart::File {
                url: self.url.clone(),
                mime_type: self.content_type.clone(),
                name: Some(self.name.clone()),
            }
        }
    }
}

/// A message of the conversation history as held by the caller.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ChatMessage {
    pub id: String,
    pub role: Role,
    pub content: Vec<MessagePart>,
    #[serde(default)]
    pub attachments: Vec<Attachment>,
}

impl ChatMessage {
    pub fn user(id: impl Into<String>, text: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            role: Role::User,
            content: vec![MessagePart::text(text)],
            attachments: Vec::new(),
        }
    }

    pub fn with_attachment(mut self, attachment: Attachment) -> Self {
        self.attachments.push(attachment);
        self
    }

    /// History entry for a finished assistant turn.
    pub fn assistant_from_snapshot(id: impl Into<String>, snapshot: &Snapshot) -> Self {
        let content = snapshot
            .content
            .iter()
            .filter_map(|part| match part {
                ContentPart::Text { text } => Some(MessagePart::text(text.clone())),
                _ => None,
            })
            .collect();
        Self {
            id: id.into(),
            role: Role::Assistant,
            content,
            attachments: Vec::new(),
        }
    }

    /// Concatenated text parts.
    pub fn text(&self) -> String {
        self.content
            .iter()
            .filter_map(|part| match part {
                MessagePart::Text { text } => Some(text.as_str()),
                _ => None,
            })
            .collect::<Vec<_>>()
            .join("\n")
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct OutboundMessage {
    pub id: String,
    pub role: Role,
    pub parts: Vec<MessagePart>,
}

/// Body of a chat or agent request.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ChatRequest {
    pub messages: Vec<OutboundMessage>,
    pub agent_id: String,
    pub thread_id: Option<String>,
    pub enabled_tools: Vec<String>,
    pub model_id: Option<String>,
    #[serde(skip_serializing_if = "Vec::is_empty")]
    pub attachments: Vec<Attachment>,
    #[serde(skip_serializing_if = "Vec::is_empty")]
    pub notebook_ids: Vec<String>,
    #[serde(skip_serializing_if = "Vec::is_empty")]
    pub forced_tools: Vec<String>,
    #[serde(skip_serializing_if = "Vec::is_empty")]
    pub document_ids: Vec<String>,
    #[serde(skip_serializing_if = "Vec::is_empty")]
    pub text_ids: Vec<String>,
    #[serde(skip_serializing_if = "Vec::is_empty")]
    pub document_chat_ids: Vec<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub document_chat_mode: Option<Value>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub default_notebook_id: Option<String>,
}

/// Body of a resume request after a human answer.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ResumeRequest {
    pub thread_id: String,
    pub resume: String,
}

/// Per-request settings not derived from the message text.
#[derive(Debug, Clone, Default)]
pub struct RequestOptions {
    pub thread_id: Option<String>,
    pub enabled_tools: Vec<String>,
    pub model_id: Option<String>,
    pub document_chat_ids: Vec<String>,
    pub document_chat_mode: Option<Value>,
    pub default_notebook_id: Option<String>,
}

/// Text of the newest user message, if any.
pub fn latest_user_text(messages: &[ChatMessage]) -> Option<String> {
    messages
        .iter()
        .rev()
        .find(|m| m.role == Role::User)
        .map(ChatMessage::text)
}

/// Build the outbound request body.
///
/// The newest user message carries the mention-stripped text; its
/// attachments are sent both as inline parts and in `attachments`.
/// Persisted document references are merged into the routing lists.
pub fn build_chat_request(
    messages: &[ChatMessage],
    mentions: ParsedMentions,
    persisted: &[DocumentReference],
    options: RequestOptions,
) -> ChatRequest {
    let newest_user = messages.iter().rposition(|m| m.role == Role::User);

    let mut attachments: Vec<Attachment> = Vec::new();
    let outbound = messages
        .iter()
        .enumerate()
        .map(|(index, message)| {
            if Some(index) == newest_user {
                for attachment in &message.attachments {
                    if !attachments.iter().any(|a| a.url == attachment.url) {
                        attachments.push(attachment.clone());
                    }
                }
                normalize_newest_user(message, &mentions.clean_text)
            } else {
                normalize(message)
            }
        })
        .collect();

    let mut document_ids = mentions.document_ids;
    let mut text_ids = mentions.text_ids;
    for reference in persisted {
        let target = match reference.source {
            DocumentSourceKind::Document => &mut document_ids,
            DocumentSourceKind::Text => &mut text_ids,
        };
        if !target.contains(&reference.id) {
            target.push(reference.id.clone());
        }
    }

    ChatRequest {
        messages: outbound,
        agent_id: mentions.agent_id,
        thread_id: options.thread_id,
        enabled_tools: options.enabled_tools,
        model_id: options.model_id,
        attachments,
        notebook_ids: mentions.notebook_ids,
        forced_tools: mentions.forced_tools,
        document_ids,
        text_ids,
        document_chat_ids: options.document_chat_ids,
        document_chat_mode: options.document_chat_mode,
        default_notebook_id: options.default_notebook_id,
    }
}

fn normalize(message: &ChatMessage) -> OutboundMessage {
    let parts = match message.role {
        // Assistant history is replayed as text only.
        Role::Assistant => message
            .content
            .iter()
            .filter(|p| matches!(p, MessagePart::Text { .. }))
            .cloned()
            .collect(),
        Role::User | Role::System => {
            let mut parts = message.content.clone();
            append_attachment_parts(&mut parts, &message.attachments);
            parts
        }
    };
    OutboundMessage {
        id: message.id.clone(),
        role: message.role,
        parts,
    }
}

fn normalize_newest_user(message: &ChatMessage, clean_text: &str) -> OutboundMessage {
    let original = message.text();
    let text = if clean_text.is_empty() {
        original
    } else {
        clean_text.to_string()
    };

    let mut parts = vec![MessagePart::Text { text }];
    parts.extend(
        message
            .content
            .iter()
            .filter(|p| !matches!(p, MessagePart::Text { .. }))
            .cloned(),
    );
    append_attachment_parts(&mut parts, &message.attachments);

    OutboundMessage {
        id: message.id.clone(),
        role: message.role,
        parts,
    }
}

fn append_attachment_parts(parts: &mut Vec<MessagePart>, attachments: &[Attachment]) {
    for attachment in attachments {
        let already_inline = parts.iter().any(|p| match p {
            MessagePart::Image { image, .. } => image == &attachment.url,
            MessagePart::File { url, .. } => url == &attachment.url,
            MessagePart::Text { .. } => false,
        });
        if !already_inline {
            parts.push(attachment.to_part());
        }
    }
}

//! Data models for conversational context

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Author of a message
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Role {
    System,
    User,
    Assistant,
    Tool,
}

impl Role {
    pub fn as_str(&self) -> &'static str {
        match self {
            Role::System => "system",
            Role::User => "user",
            Role::Assistant => "assistant",
            Role::Tool => "tool",
        }
    }
}

/// One part of a multimodal message
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum ContentPart {
    Text {
        text: String,
    },
    Image {
        #[serde(default, skip_serializing_if = "Option::is_none")]
        width: Option<u32>,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        height: Option<u32>,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        source: Option<String>,
    },
}

impl ContentPart {
    pub fn text(text: impl Into<String>) -> Self {
        ContentPart::Text { text: text.into() }
    }

    pub fn image(width: u32, height: u32) -> Self {
        ContentPart::Image {
            width: Some(width),
            height: Some(height),
            source: None,
        }
    }

    /// Image whose pixel size is not known
    pub fn image_unsized() -> Self {
        ContentPart::Image {
            width: None,
            height: None,
            source: None,
        }
    }
}

/// Message payload
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum Content {
    Text {
        text: String,
    },
    Parts {
        parts: Vec<ContentPart>,
    },
    ToolOutput {
        #[serde(default, skip_serializing_if = "Option::is_none")]
        tool: Option<String>,
        output: String,
    },
}

impl Content {
    pub fn text(text: impl Into<String>) -> Self {
        Content::Text { text: text.into() }
    }

    /// Plain text view: text parts joined by newlines, images omitted
    pub fn plain_text(&self) -> String {
        match self {
            Content::Text { text } => text.clone(),
            Content::ToolOutput { output, .. } => output.clone(),
            Content::Parts { parts } => parts
                .iter()
                .filter_map(|part| match part {
                    ContentPart::Text { text } => Some(text.as_str()),
                    ContentPart::Image { .. } => None,
                })
                .collect::<Vec<_>>()
                .join("\n"),
        }
    }

    pub fn is_empty(&self) -> bool {
        match self {
            Content::Text { text } => text.trim().is_empty(),
            Content::ToolOutput { output, .. } => output.trim().is_empty(),
            Content::Parts { parts } => parts.iter().all(|part| match part {
                ContentPart::Text { text } => text.trim().is_empty(),
                ContentPart::Image { .. } => false,
            }),
        }
    }
}

/// Markers for messages rewritten by compression or truncation
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct MessageFlags {
    #[serde(default)]
    pub compressed: bool,
    #[serde(default)]
    pub truncated: bool,
    /// Character length before truncation
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub original_length: Option<usize>,
    /// Number of messages a summary stands in for
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub original_count: Option<usize>,
}

/// A single conversation message
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Message {
    pub id: String,
    pub role: Role,
    pub content: Content,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub name: Option<String>,
    pub timestamp: DateTime<Utc>,
    /// Cached estimate, filled in when the message enters a ledger
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub token_count: Option<usize>,
    #[serde(default)]
    pub flags: MessageFlags,
}

impl Message {
    pub fn new(role: Role, content: Content) -> Self {
        Self {
            id: uuid::Uuid::new_v4().to_string(),
            role,
            content,
            name: None,
            timestamp: Utc::now(),
            token_count: None,
            flags: MessageFlags::default(),
        }
    }

    pub fn system(text: impl Into<String>) -> Self {
        Self::new(Role::System, Content::text(text))
    }

    pub fn user(text: impl Into<String>) -> Self {
        Self::new(Role::User, Content::text(text))
    }

    pub fn assistant(text: impl Into<String>) -> Self {
        Self::new(Role::Assistant, Content::text(text))
    }

    pub fn tool(text: impl Into<String>) -> Self {
        Self::new(Role::Tool, Content::text(text))
    }

    pub fn tool_output(tool: impl Into<String>, output: impl Into<String>) -> Self {
        Self::new(
            Role::Tool,
            Content::ToolOutput {
                tool: Some(tool.into()),
                output: output.into(),
            },
        )
    }

    pub fn with_parts(role: Role, parts: Vec<ContentPart>) -> Self {
        Self::new(role, Content::Parts { parts })
    }

    pub fn with_timestamp(mut self, timestamp: DateTime<Utc>) -> Self {
        self.timestamp = timestamp;
        self
    }

    pub fn with_name(mut self, name: impl Into<String>) -> Self {
        self.name = Some(name.into());
        self
    }

    /// System instructions. Compression summaries are system-role but can
    /// themselves be folded into a later summary, so they are not pinned.
    pub fn is_pinned(&self) -> bool {
        self.role == Role::System && !self.flags.compressed
    }

    /// Number of original messages this message stands for
    pub fn covered_count(&self) -> usize {
        if self.flags.compressed {
            self.flags.original_count.unwrap_or(1)
        } else {
            1
        }
    }

    /// Tool role or tool-output payload
    pub fn is_tool_like(&self) -> bool {
        self.role == Role::Tool || matches!(self.content, Content::ToolOutput { .. })
    }

    pub fn text(&self) -> String {
        self.content.plain_text()
    }
}

//! Messages exchanged inside a conversation.
//!
//! A message owns an ordered list of content parts. The id is a
//! monotonically increasing ordinal allocated by the store; it doubles as
//! the sort key and as "time" when slicing a trailing context window.

use chrono::Utc;
use serde::{Deserialize, Serialize};
use serde_json::Value;

use super::session::SenderId;

pub type MessageId = u64;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TextPart {
    pub text: String,
}

/// Media parts carry an optional on-device path and an optional stable
/// remote URL. A part without a URL is not yet *available* and must be
/// uploaded before it can appear in a request.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ImagePart {
    pub local_path: Option<String>,
    pub url: Option<String>,
    /// Human- or LLM-authored description used for fallback transcoding.
    pub help_text: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct VideoPart {
    pub local_path: Option<String>,
    pub url: Option<String>,
    pub help_text: Option<String>,
    /// First-frame snapshot, usable as a lightweight proxy on image-capable
    /// models that cannot take video.
    pub first_frame_url: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DocumentPart {
    pub file_name: String,
    pub local_path: Option<String>,
    pub url: Option<String>,
    pub help_text: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ErrorPart {
    pub message: String,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum ContentPart {
    Text(TextPart),
    Image(ImagePart),
    Video(VideoPart),
    Document(DocumentPart),
    Error(ErrorPart),
}

impl ContentPart {
    pub fn text(text: impl Into<String>) -> Self {
        ContentPart::Text(TextPart { text: text.into() })
    }

    pub fn error(message: impl Into<String>) -> Self {
        ContentPart::Error(ErrorPart {
            message: message.into(),
        })
    }

    pub fn as_text(&self) -> Option<&str> {
        match self {
            ContentPart::Text(t) => Some(&t.text),
            _ => None,
        }
    }

    pub fn is_media(&self) -> bool {
        matches!(
            self,
            ContentPart::Image(_) | ContentPart::Video(_) | ContentPart::Document(_)
        )
    }

    pub fn kind_name(&self) -> &'static str {
        match self {
            ContentPart::Text(_) => "text",
            ContentPart::Image(_) => "image",
            ContentPart::Video(_) => "video",
            ContentPart::Document(_) => "document",
            ContentPart::Error(_) => "error",
        }
    }

    /// Remote URL for media parts, if already uploaded.
    pub fn remote_url(&self) -> Option<&str> {
        match self {
            ContentPart::Image(p) => p.url.as_deref(),
            ContentPart::Video(p) => p.url.as_deref(),
            ContentPart::Document(p) => p.url.as_deref(),
            _ => None,
        }
    }

    /// Local path for media parts that still need an upload.
    pub fn pending_local_path(&self) -> Option<&str> {
        if self.remote_url().is_some() {
            return None;
        }
        match self {
            ContentPart::Image(p) => p.local_path.as_deref(),
            ContentPart::Video(p) => p.local_path.as_deref(),
            ContentPart::Document(p) => p.local_path.as_deref(),
            _ => None,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Message {
    pub id: MessageId,
    pub sender_id: SenderId,
    pub parts: Vec<ContentPart>,
    /// Set when a plugin has taken over this message.
    pub plugin_id: Option<String>,
    /// Opaque plugin state, e.g. a pending generation job id.
    pub plugin_extra: Option<Value>,
    pub created: i64,
}

impl Message {
    pub fn new(id: MessageId, sender_id: SenderId) -> Self {
        Self {
            id,
            sender_id,
            parts: Vec::new(),
            plugin_id: None,
            plugin_extra: None,
            created: Utc::now().timestamp(),
        }
    }

    pub fn with_part(mut self, part: ContentPart) -> Self {
        self.parts.push(part);
        self
    }

    pub fn with_text(self, text: impl Into<String>) -> Self {
        self.with_part(ContentPart::text(text))
    }

    /// Concatenated text of all text parts, newline separated.
    pub fn as_concat_text(&self) -> String {
        self.parts
            .iter()
            .filter_map(|p| p.as_text())
            .collect::<Vec<_>>()
            .join("\n")
    }

    pub fn has_media(&self) -> bool {
        self.parts.iter().any(|p| p.is_media())
    }

    pub fn has_image(&self) -> bool {
        self.parts.iter().any(|p| matches!(p, ContentPart::Image(_)))
    }

    pub fn has_video(&self) -> bool {
        self.parts.iter().any(|p| matches!(p, ContentPart::Video(_)))
    }

    pub fn has_error(&self) -> bool {
        self.parts.iter().any(|p| matches!(p, ContentPart::Error(_)))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn concat_text_skips_non_text_parts() {
        let msg = Message::new(1, 1)
            .with_text("hello")
            .with_part(ContentPart::Image(ImagePart {
                local_path: None,
                url: Some("https://cdn.example.com/a.png".to_string()),
                help_text: None,
            }))
            .with_text("world");
        assert_eq!(msg.as_concat_text(), "hello\nworld");
    }

    #[test]
    fn pending_local_path_ignores_uploaded_media() {
        let uploaded = ContentPart::Image(ImagePart {
            local_path: Some("/tmp/a.png".to_string()),
            url: Some("https://cdn.example.com/a.png".to_string()),
            help_text: None,
        });
        assert_eq!(uploaded.pending_local_path(), None);

        let pending = ContentPart::Image(ImagePart {
            local_path: Some("/tmp/b.png".to_string()),
            url: None,
            help_text: None,
        });
        assert_eq!(pending.pending_local_path(), Some("/tmp/b.png"));
    }
}

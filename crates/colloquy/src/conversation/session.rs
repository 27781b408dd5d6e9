use serde::{Deserialize, Serialize};

use crate::model::ModelCode;
use crate::rag::KnowledgeBaseId;

pub type SessionId = u64;
pub type SenderId = u64;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SenderKind {
    User,
    Bot,
}

/// A participant in a session: the one user, or a bot bound to a model and
/// an optional assistant persona.
#[derive(Debug, Clone)]
pub struct Sender {
    pub id: SenderId,
    pub name: String,
    pub kind: SenderKind,
    pub model: Option<ModelCode>,
    /// System-prompt persona instructions for bot senders.
    pub assistant_prompt: Option<String>,
}

impl Sender {
    pub fn user(id: SenderId, name: impl Into<String>) -> Self {
        Self {
            id,
            name: name.into(),
            kind: SenderKind::User,
            model: None,
            assistant_prompt: None,
        }
    }

    pub fn bot(id: SenderId, name: impl Into<String>, model: ModelCode) -> Self {
        Self {
            id,
            name: name.into(),
            kind: SenderKind::Bot,
            model: Some(model),
            assistant_prompt: None,
        }
    }

    pub fn with_assistant_prompt(mut self, prompt: impl Into<String>) -> Self {
        self.assistant_prompt = Some(prompt.into());
        self
    }

    pub fn is_bot(&self) -> bool {
        self.kind == SenderKind::Bot
    }
}

/// An ordered, mutable set of senders plus per-session behavior knobs.
/// Senders keep insertion order; the first one acts as the default.
#[derive(Debug, Clone)]
pub struct ConversationSession {
    pub id: SessionId,
    pub senders: Vec<Sender>,
    /// Cap on the trailing history window sent with a turn. Unbounded when
    /// unset.
    pub history_include: Option<usize>,
    pub enabled_plugins: Vec<String>,
    pub knowledge_base: Option<KnowledgeBaseId>,
}

impl ConversationSession {
    pub fn new(id: SessionId, senders: Vec<Sender>) -> Self {
        Self {
            id,
            senders,
            history_include: None,
            enabled_plugins: Vec::new(),
            knowledge_base: None,
        }
    }

    pub fn primary_sender(&self) -> Option<&Sender> {
        self.senders.first()
    }

    pub fn sender(&self, id: SenderId) -> Option<&Sender> {
        self.senders.iter().find(|s| s.id == id)
    }

    pub fn user_sender(&self) -> Option<&Sender> {
        self.senders.iter().find(|s| s.kind == SenderKind::User)
    }

    pub fn bot_senders(&self) -> impl Iterator<Item = &Sender> {
        self.senders.iter().filter(|s| s.is_bot())
    }

    pub fn plugin_enabled(&self, name: &str) -> bool {
        self.enabled_plugins.iter().any(|p| p == name)
    }
}

//! The message store contract and an in-memory implementation.
//!
//! The mobile host backs this with its on-device database; the engine only
//! needs atomic part-level mutations and ordered snapshot reads. Every
//! mutation for a given message id is issued from the single task that owns
//! that message, so the store itself needs no cross-call locking beyond
//! per-operation atomicity.

use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};

use async_trait::async_trait;
use thiserror::Error;
use tokio::sync::Mutex;

use super::message::{ContentPart, Message, MessageId};
use super::session::SessionId;

#[derive(Error, Debug)]
pub enum StoreError {
    #[error("Message {0} not found")]
    NotFound(MessageId),
    #[error("Storage failure: {0}")]
    Backend(String),
}

/// A boxed in-place mutation, applied atomically by the store.
pub type Mutation = Box<dyn FnOnce(&mut Message) + Send>;

#[async_trait]
pub trait MessageStore: Send + Sync {
    /// Allocate the next monotonically increasing message ordinal.
    async fn allocate_id(&self, session: SessionId) -> Result<MessageId, StoreError>;

    async fn insert(&self, session: SessionId, message: Message) -> Result<(), StoreError>;

    async fn get(&self, session: SessionId, id: MessageId) -> Result<Option<Message>, StoreError>;

    async fn append_part(
        &self,
        session: SessionId,
        id: MessageId,
        part: ContentPart,
    ) -> Result<(), StoreError>;

    /// Append a streaming delta to the message's trailing text part,
    /// creating the part if the message has none.
    async fn append_text_delta(
        &self,
        session: SessionId,
        id: MessageId,
        delta: &str,
    ) -> Result<(), StoreError>;

    /// Drop a trailing empty text part if one exists. Returns whether a
    /// part was removed.
    async fn remove_trailing_empty_text(
        &self,
        session: SessionId,
        id: MessageId,
    ) -> Result<bool, StoreError>;

    /// Apply an arbitrary mutation atomically and return the updated
    /// message. This is the persistence phase plugins write through.
    async fn update(
        &self,
        session: SessionId,
        id: MessageId,
        mutation: Mutation,
    ) -> Result<Message, StoreError>;

    /// Ordered snapshot of messages at or before `until`, trailing
    /// `include` items when set.
    async fn history_until(
        &self,
        session: SessionId,
        until: MessageId,
        include: Option<usize>,
    ) -> Result<Vec<Message>, StoreError>;
}

/// In-memory store used in tests and as the default until the host wires
/// its own persistence.
#[derive(Default)]
pub struct MemoryStore {
    sessions: Mutex<HashMap<SessionId, Vec<Message>>>,
    next_id: AtomicU64,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self {
            sessions: Mutex::new(HashMap::new()),
            next_id: AtomicU64::new(1),
        }
    }

    fn find<'a>(
        messages: &'a mut [Message],
        id: MessageId,
    ) -> Result<&'a mut Message, StoreError> {
        messages
            .iter_mut()
            .find(|m| m.id == id)
            .ok_or(StoreError::NotFound(id))
    }
}

#[async_trait]
impl MessageStore for MemoryStore {
    async fn allocate_id(&self, _session: SessionId) -> Result<MessageId, StoreError> {
        Ok(self.next_id.fetch_add(1, Ordering::SeqCst))
    }

    async fn insert(&self, session: SessionId, message: Message) -> Result<(), StoreError> {
        let mut sessions = self.sessions.lock().await;
        let messages = sessions.entry(session).or_default();
        messages.push(message);
        messages.sort_by_key(|m| m.id);
        Ok(())
    }

    async fn get(&self, session: SessionId, id: MessageId) -> Result<Option<Message>, StoreError> {
        let sessions = self.sessions.lock().await;
        Ok(sessions
            .get(&session)
            .and_then(|msgs| msgs.iter().find(|m| m.id == id).cloned()))
    }

    async fn append_part(
        &self,
        session: SessionId,
        id: MessageId,
        part: ContentPart,
    ) -> Result<(), StoreError> {
        let mut sessions = self.sessions.lock().await;
        let messages = sessions.get_mut(&session).ok_or(StoreError::NotFound(id))?;
        Self::find(messages, id)?.parts.push(part);
        Ok(())
    }

    async fn append_text_delta(
        &self,
        session: SessionId,
        id: MessageId,
        delta: &str,
    ) -> Result<(), StoreError> {
        let mut sessions = self.sessions.lock().await;
        let messages = sessions.get_mut(&session).ok_or(StoreError::NotFound(id))?;
        let message = Self::find(messages, id)?;
        match message.parts.last_mut() {
            Some(ContentPart::Text(text)) => text.text.push_str(delta),
            _ => message.parts.push(ContentPart::text(delta)),
        }
        Ok(())
    }

    async fn remove_trailing_empty_text(
        &self,
        session: SessionId,
        id: MessageId,
    ) -> Result<bool, StoreError> {
        let mut sessions = self.sessions.lock().await;
        let messages = sessions.get_mut(&session).ok_or(StoreError::NotFound(id))?;
        let message = Self::find(messages, id)?;
        if matches!(message.parts.last(), Some(ContentPart::Text(t)) if t.text.is_empty()) {
            message.parts.pop();
            return Ok(true);
        }
        Ok(false)
    }

    async fn update(
        &self,
        session: SessionId,
        id: MessageId,
        mutation: Mutation,
    ) -> Result<Message, StoreError> {
        let mut sessions = self.sessions.lock().await;
        let messages = sessions.get_mut(&session).ok_or(StoreError::NotFound(id))?;
        let message = Self::find(messages, id)?;
        mutation(message);
        Ok(message.clone())
    }

    async fn history_until(
        &self,
        session: SessionId,
        until: MessageId,
        include: Option<usize>,
    ) -> Result<Vec<Message>, StoreError> {
        let sessions = self.sessions.lock().await;
        let mut window: Vec<Message> = sessions
            .get(&session)
            .map(|msgs| msgs.iter().filter(|m| m.id <= until).cloned().collect())
            .unwrap_or_default();
        if let Some(n) = include {
            let skip = window.len().saturating_sub(n);
            window.drain(..skip);
        }
        Ok(window)
    }
}

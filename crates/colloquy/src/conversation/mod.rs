pub mod message;
pub mod session;
pub mod store;

pub use message::{ContentPart, Message, MessageId};
pub use session::{ConversationSession, Sender, SenderId, SenderKind, SessionId};
pub use store::{MemoryStore, MessageStore, StoreError};

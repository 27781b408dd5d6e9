//! Conversation orchestration engine for multi-provider LLM chat.
//!
//! The engine takes a user turn and decides which model answers, assembles a
//! bounded, capability-aware request from persisted history, streams the
//! answer back into the message store, delegates to plugin tool calls when
//! the model asks for one, and augments prompts with retrieved knowledge-base
//! context. Rendering, navigation and persistence internals live in the host
//! application; this crate only speaks to them through traits.

pub mod catalog;
pub mod conversation;
pub mod coordinator;
pub mod error;
pub mod media;
pub mod model;
pub mod plugins;
pub mod providers;
pub mod rag;

pub use coordinator::Coordinator;
pub use error::EngineError;
pub use model::{CapabilityInfo, ModelCode, ProviderRef};

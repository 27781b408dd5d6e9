//! Turns a context window of stored messages into one provider request.
//!
//! Capability-driven shaping happens here: vision-incapable models get a
//! collapsed text transcript, some vendor families get collapsed text even
//! when vision-capable, video is only allowed as the terminal turn, and
//! retrieved knowledge chunks rewrite the final user turn.

use indoc::indoc;

use crate::conversation::message::{ContentPart, Message};
use crate::conversation::session::{ConversationSession, Sender, SenderKind};
use crate::error::EngineError;
use crate::media::{to_fallback_fragments, to_native_fragment, FallbackStrategy};
use crate::model::ModelCode;
use crate::providers::base::{ChatRequest, Fragment, WireMessage, WireRole};
use crate::providers::utils::scrub_text;
use crate::rag::KnowledgeChunk;

static RAG_SYSTEM_NOTE: &str = indoc! {"
    Reference excerpts retrieved from the user's knowledge base are embedded
    in the final message. Use them when they are relevant to the question and
    ignore them when they are not. Do not mention the excerpts themselves."};

fn rag_user_prompt(excerpts: &[&str], query: &str) -> String {
    format!(
        indoc! {"
            Answer the question using the reference excerpts below when they
            are relevant.

            Excerpts:
            {excerpts}

            Question:
            {query}"},
        excerpts = excerpts.join("\n---\n"),
        query = query,
    )
}

fn role_of(session: &ConversationSession, message: &Message) -> WireRole {
    match session.sender(message.sender_id).map(|s| s.kind) {
        Some(SenderKind::Bot) => WireRole::Assistant,
        _ => WireRole::User,
    }
}

/// Build the wire request for `model` from an ordered context window.
///
/// `rag_chunks` being non-empty triggers the augmentation path: a system
/// note plus a rewrite of the last user turn into a context-and-query
/// template. The rewrite keeps only text; dropping other fragments there is
/// a known limitation of the augmentation, not of the caller's input.
pub fn build_chat_request(
    model: &ModelCode,
    bot: &Sender,
    session: &ConversationSession,
    context: &[Message],
    rag_chunks: &[(KnowledgeChunk, f32)],
    strategy: FallbackStrategy,
) -> Result<ChatRequest, EngineError> {
    let caps = model.capabilities();
    let collapse =
        !caps.supports_vision || model.family().rejects_structured_content();

    let mut messages: Vec<WireMessage> = Vec::with_capacity(context.len());
    for (position, message) in context.iter().enumerate() {
        let terminal = position + 1 == context.len();
        let mut fragments: Vec<Fragment> = Vec::new();
        for part in &message.parts {
            match part {
                ContentPart::Text(text) => fragments.push(Fragment::text(scrub_text(&text.text))),
                ContentPart::Error(_) => {}
                media => {
                    if collapse {
                        fragments.extend(to_fallback_fragments(media, &caps, strategy)?);
                    } else {
                        match to_native_fragment(media, &caps) {
                            Some(fragment) => fragments.push(fragment),
                            None => {
                                fragments.extend(to_fallback_fragments(media, &caps, strategy)?)
                            }
                        }
                    }
                }
            }
        }
        // Several vendors reject video anywhere but the final turn.
        if !terminal {
            fragments.retain(|f| !f.is_video());
        }

        let mut wire = WireMessage {
            role: role_of(session, message),
            fragments,
        };
        if collapse {
            let joined = wire.joined_text();
            wire.fragments = vec![Fragment::text(joined)];
        }
        let empty = wire
            .fragments
            .iter()
            .all(|f| f.as_text().is_some_and(str::is_empty));
        if !empty {
            messages.push(wire);
        }
    }

    if !rag_chunks.is_empty() {
        let mut ranked: Vec<&(KnowledgeChunk, f32)> = rag_chunks.iter().collect();
        ranked.sort_by(|a, b| b.1.partial_cmp(&a.1).unwrap_or(std::cmp::Ordering::Equal));
        let excerpts: Vec<&str> = ranked.iter().map(|(c, _)| c.text.as_str()).collect();
        if let Some(last_user) = messages
            .iter_mut()
            .rev()
            .find(|m| m.role == WireRole::User)
        {
            let query = last_user.joined_text();
            last_user.fragments = vec![Fragment::text(rag_user_prompt(&excerpts, &query))];
        }
    }

    let mut preamble: Vec<&str> = Vec::new();
    if let Some(persona) = bot.assistant_prompt.as_deref() {
        if !persona.is_empty() {
            preamble.push(persona);
        }
    }
    if !rag_chunks.is_empty() {
        preamble.push(RAG_SYSTEM_NOTE);
    }

    let mut request = ChatRequest::new(model.code.clone());
    request.system = (!preamble.is_empty()).then(|| preamble.join("\n\n"));
    request.messages = messages;
    Ok(request)
}

//! The conversation coordinator: one `execute_message` call takes a user
//! turn from model selection through request construction, execution, and
//! incremental commit of the reply into the message store.
//!
//! Failure handling follows the partial-text tolerance rule: a stream that
//! dies after producing text leaves the text and no error; a turn that
//! produced nothing gets a normalized error part. Credential checks happen
//! before anything is written.

mod request;

pub use request::build_chat_request;

use std::collections::HashSet;
use std::sync::Arc;

use futures::StreamExt;
use tokio::sync::watch;
use tokio::task::JoinHandle;
use tracing::warn;

use crate::conversation::message::{ContentPart, Message, MessageId};
use crate::conversation::session::{ConversationSession, Sender, SenderId, SessionId};
use crate::conversation::store::MessageStore;
use crate::error::EngineError;
use crate::media::{ensure_available, FallbackStrategy, Uploader};
use crate::model::ModelCode;
use crate::plugins::PluginRegistry;
use crate::providers::base::{ChatRequest, Usage, WireMessage, WireRole};
use crate::providers::factory::ResolveTransport;
use crate::providers::utils::{normalize_error_text, scrub_text};
use crate::rag::{KnowledgeBaseLookup, KnowledgeChunk, RagEngine};

/// Per-media-type model override. `SingleContextFixed` additionally forces
/// the request context down to the triggering message alone, for vision
/// endpoints that reject multi-turn input.
#[derive(Debug, Clone)]
pub enum MediaRecognition {
    Fixed(ModelCode),
    SingleContextFixed(ModelCode),
}

#[derive(Debug, Clone)]
pub struct CoordinatorSettings {
    pub image_recognition: Option<MediaRecognition>,
    pub video_recognition: Option<MediaRecognition>,
    /// Low-cost model used for help side-queries (translation, labeling).
    pub help_model: Option<ModelCode>,
    pub prefer_streaming: bool,
    pub fallback: FallbackStrategy,
}

impl Default for CoordinatorSettings {
    fn default() -> Self {
        Self {
            image_recognition: None,
            video_recognition: None,
            help_model: None,
            prefer_streaming: true,
            fallback: FallbackStrategy::HelpPrompt,
        }
    }
}

/// The set of in-flight bot message ids, observable by the UI for loading
/// state. Mutated only by the owning execution task; a guard removes the id
/// on every exit path, including cancellation.
#[derive(Clone)]
pub struct LiveMessages {
    tx: Arc<watch::Sender<HashSet<MessageId>>>,
}

impl LiveMessages {
    fn new() -> Self {
        let (tx, _) = watch::channel(HashSet::new());
        Self { tx: Arc::new(tx) }
    }

    pub fn subscribe(&self) -> watch::Receiver<HashSet<MessageId>> {
        self.tx.subscribe()
    }

    pub fn is_live(&self, id: MessageId) -> bool {
        self.tx.borrow().contains(&id)
    }

    fn mark(&self, id: MessageId) -> LiveGuard {
        self.tx.send_modify(|set| {
            set.insert(id);
        });
        LiveGuard {
            tx: self.tx.clone(),
            id,
        }
    }
}

struct LiveGuard {
    tx: Arc<watch::Sender<HashSet<MessageId>>>,
    id: MessageId,
}

impl Drop for LiveGuard {
    fn drop(&mut self) {
        self.tx.send_modify(|set| {
            set.remove(&self.id);
        });
    }
}

#[derive(Debug, Clone)]
pub struct ExecuteOutcome {
    /// The bot message this turn wrote into.
    pub message_id: MessageId,
    /// Name of the plugin that took over the turn, if any.
    pub delegated_to: Option<String>,
    /// Normalized error text committed to the message, if the turn failed
    /// without producing output.
    pub error: Option<String>,
    pub usage: Usage,
}

#[derive(Clone)]
struct RagHookup {
    engine: Arc<RagEngine>,
    bases: Arc<dyn KnowledgeBaseLookup>,
}

#[derive(Clone)]
pub struct Coordinator {
    store: Arc<dyn MessageStore>,
    resolver: Arc<dyn ResolveTransport>,
    plugins: Arc<PluginRegistry>,
    rag: Option<RagHookup>,
    uploader: Option<Arc<dyn Uploader>>,
    live: LiveMessages,
    settings: CoordinatorSettings,
}

impl Coordinator {
    pub fn new(store: Arc<dyn MessageStore>, resolver: Arc<dyn ResolveTransport>) -> Self {
        Self {
            store,
            resolver,
            plugins: Arc::new(PluginRegistry::new()),
            rag: None,
            uploader: None,
            live: LiveMessages::new(),
            settings: CoordinatorSettings::default(),
        }
    }

    pub fn with_plugins(mut self, plugins: Arc<PluginRegistry>) -> Self {
        self.plugins = plugins;
        self
    }

    pub fn with_rag(
        mut self,
        engine: Arc<RagEngine>,
        bases: Arc<dyn KnowledgeBaseLookup>,
    ) -> Self {
        self.rag = Some(RagHookup { engine, bases });
        self
    }

    pub fn with_uploader(mut self, uploader: Arc<dyn Uploader>) -> Self {
        self.uploader = Some(uploader);
        self
    }

    pub fn with_settings(mut self, settings: CoordinatorSettings) -> Self {
        self.settings = settings;
        self
    }

    pub fn live_messages(&self) -> &LiveMessages {
        &self.live
    }

    /// Run a turn as a detached task so navigating away from the screen
    /// does not cancel an in-flight generation.
    pub fn spawn_execute(
        &self,
        session: ConversationSession,
        trigger: MessageId,
        bot_sender: SenderId,
    ) -> JoinHandle<Result<ExecuteOutcome, EngineError>> {
        let this = self.clone();
        tokio::spawn(async move { this.execute_message(&session, trigger, bot_sender).await })
    }

    /// Execute one turn: answer the message `trigger` as `bot_sender`.
    ///
    /// Precondition failures (missing credential, unconfigured sender) return
    /// `Err` before anything is written. Everything after the bot placeholder
    /// exists is committed to the store, including failures, and reported
    /// through the returned outcome.
    pub async fn execute_message(
        &self,
        session: &ConversationSession,
        trigger: MessageId,
        bot_sender: SenderId,
    ) -> Result<ExecuteOutcome, EngineError> {
        let bot = session
            .sender(bot_sender)
            .cloned()
            .ok_or_else(|| EngineError::Invalid(format!("Unknown sender {bot_sender}")))?;
        let trigger_msg = self
            .store
            .get(session.id, trigger)
            .await?
            .ok_or_else(|| EngineError::Invalid(format!("Message {trigger} not found")))?;

        let (model, single_context) = self.select_model(&trigger_msg, &bot)?;
        let transport = self.resolver.resolve(&model.provider)?;

        let bot_id = self.store.allocate_id(session.id).await?;
        self.store
            .insert(session.id, Message::new(bot_id, bot.id).with_text(""))
            .await?;
        let _guard = self.live.mark(bot_id);

        let trigger_msg = match &self.uploader {
            Some(uploader) => {
                match ensure_available(
                    self.store.as_ref(),
                    uploader.as_ref(),
                    session.id,
                    &trigger_msg,
                )
                .await
                {
                    Ok(updated) => updated,
                    Err(e) => {
                        let error = self.commit_error(session.id, bot_id, &e.to_string()).await?;
                        return Ok(ExecuteOutcome {
                            message_id: bot_id,
                            delegated_to: None,
                            error: Some(error),
                            usage: Usage::default(),
                        });
                    }
                }
            }
            None => trigger_msg,
        };

        if !session.enabled_plugins.is_empty() {
            match self
                .plugins
                .request_tool_usage(
                    transport.as_ref(),
                    &model,
                    &trigger_msg.as_concat_text(),
                    &session.enabled_plugins,
                )
                .await
            {
                Ok(Some(tool_use)) => {
                    let name = tool_use.plugin.name().to_string();
                    self.store
                        .remove_trailing_empty_text(session.id, bot_id)
                        .await?;
                    let error = match self
                        .plugins
                        .dispatch(tool_use, self.store.as_ref(), session.id, bot_id)
                        .await
                    {
                        Ok(()) => None,
                        Err(e) => {
                            Some(self.commit_error(session.id, bot_id, &e.to_string()).await?)
                        }
                    };
                    return Ok(ExecuteOutcome {
                        message_id: bot_id,
                        delegated_to: Some(name),
                        error,
                        usage: Usage::default(),
                    });
                }
                Ok(None) => {}
                Err(e) => warn!("tool-usage check failed, answering normally: {e}"),
            }
        }

        let context = if single_context {
            vec![trigger_msg.clone()]
        } else {
            self.store
                .history_until(session.id, trigger, session.history_include)
                .await?
        };

        let chunks = self
            .retrieve_chunks(session, &trigger_msg.as_concat_text())
            .await;

        let request = build_chat_request(
            &model,
            &bot,
            session,
            &context,
            &chunks,
            self.settings.fallback,
        )?;

        let caps = model.capabilities();
        let mut usage = Usage::default();
        let mut error = None;
        if caps.supports_streaming && self.settings.prefer_streaming {
            match transport.chat_completion_stream(&request).await {
                Ok(mut stream) => {
                    let mut streamed = 0usize;
                    while let Some(delta) = stream.next().await {
                        match delta {
                            Ok(delta) => {
                                if !delta.text.is_empty() {
                                    self.store
                                        .append_text_delta(session.id, bot_id, &delta.text)
                                        .await?;
                                    streamed += delta.text.len();
                                }
                                if let Some(u) = delta.usage {
                                    usage = u;
                                }
                            }
                            Err(e) if streamed > 0 => {
                                // Partial output already committed counts as
                                // a good-enough answer.
                                warn!("stream failed after {streamed} bytes: {e}");
                                break;
                            }
                            Err(e) => {
                                error = Some(
                                    self.commit_error(session.id, bot_id, &e.to_string()).await?,
                                );
                                break;
                            }
                        }
                    }
                }
                Err(e) => {
                    error = Some(self.commit_error(session.id, bot_id, &e.to_string()).await?);
                }
            }
        } else {
            match transport.chat_completion(&request).await {
                Ok(response) => {
                    usage = response.usage;
                    self.store
                        .append_text_delta(session.id, bot_id, &response.text)
                        .await?;
                }
                Err(e) => {
                    error = Some(self.commit_error(session.id, bot_id, &e.to_string()).await?);
                }
            }
        }

        Ok(ExecuteOutcome {
            message_id: bot_id,
            delegated_to: None,
            error,
            usage,
        })
    }

    /// Side-query for content translation or labeling. Always uses the fixed
    /// help model and a single-message context; the raw text is returned to
    /// the caller and nothing is written to the store.
    pub async fn execute_help(&self, prompt: &str) -> Result<String, EngineError> {
        let model = self
            .settings
            .help_model
            .clone()
            .ok_or_else(|| EngineError::Invalid("No help model configured".to_string()))?;
        let transport = self.resolver.resolve(&model.provider)?;
        let mut request = ChatRequest::new(model.code.clone());
        request
            .messages
            .push(WireMessage::text(WireRole::User, scrub_text(prompt)));
        let response = transport.chat_completion(&request).await?;
        Ok(response.text)
    }

    fn select_model(
        &self,
        trigger: &Message,
        bot: &Sender,
    ) -> Result<(ModelCode, bool), EngineError> {
        let recognition = if trigger.has_video() {
            self.settings.video_recognition.as_ref()
        } else if trigger.has_image() {
            self.settings.image_recognition.as_ref()
        } else {
            None
        };
        match recognition {
            Some(MediaRecognition::Fixed(model)) => Ok((model.clone(), false)),
            Some(MediaRecognition::SingleContextFixed(model)) => Ok((model.clone(), true)),
            None => bot
                .model
                .clone()
                .map(|model| (model, false))
                .ok_or_else(|| {
                    EngineError::Invalid(format!("Sender '{}' has no model configured", bot.name))
                }),
        }
    }

    async fn retrieve_chunks(
        &self,
        session: &ConversationSession,
        query: &str,
    ) -> Vec<(KnowledgeChunk, f32)> {
        let Some(hookup) = &self.rag else {
            return Vec::new();
        };
        let Some(base_id) = session.knowledge_base else {
            return Vec::new();
        };
        let Some(base) = hookup.bases.get(base_id) else {
            warn!(base = base_id, "attached knowledge base not found");
            return Vec::new();
        };
        match hookup.engine.retrieve_related_chunks(&base, query).await {
            Ok(chunks) => chunks,
            Err(e) => {
                warn!("retrieval failed, continuing without augmentation: {e}");
                Vec::new()
            }
        }
    }

    async fn commit_error(
        &self,
        session: SessionId,
        id: MessageId,
        raw: &str,
    ) -> Result<String, EngineError> {
        let cleaned = normalize_error_text(raw);
        self.store.remove_trailing_empty_text(session, id).await?;
        self.store
            .append_part(session, id, ContentPart::error(cleaned.clone()))
            .await?;
        Ok(cleaned)
    }
}

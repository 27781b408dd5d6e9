//! Plugin tool calls.
//!
//! A plugin exposes a function-calling tool spec. When the vendor's
//! tool-calling response names one, the plugin takes over completion of the
//! bot message; the coordinator must not also write a normal answer.
//!
//! Execution is a two-phase protocol enforced by the engine: `run` performs
//! the side-effecting work (calling a generation API, say) and `update`
//! commits its output to storage, in that order. Plugins with asynchronous
//! jobs additionally drive a poll loop: `launch_effect` is re-invoked after
//! each requested delay until it reports `Done`.

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use serde_json::Value;
use tracing::debug;

use crate::conversation::message::{Message, MessageId};
use crate::conversation::session::SessionId;
use crate::conversation::store::{MessageStore, Mutation};
use crate::error::EngineError;
use crate::model::ModelCode;
use crate::providers::base::{ChatRequest, ChatTransport, ToolCallRequest, ToolSpec, WireMessage, WireRole};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EffectDispatch {
    Done,
    Next(Duration),
}

/// Handle through which a plugin reads and persists its bot message. The
/// snapshot tracks every persisted mutation, so sequential plugin code can
/// read back what it wrote.
pub struct ExecCtx<'a> {
    store: &'a dyn MessageStore,
    session: SessionId,
    message: Message,
}

impl ExecCtx<'_> {
    pub fn message(&self) -> &Message {
        &self.message
    }

    /// Apply a mutation to the bot message atomically. This is the only
    /// write path plugins get; side effects belong in `run`.
    pub async fn persist(&mut self, mutation: Mutation) -> Result<(), EngineError> {
        self.message = self
            .store
            .update(self.session, self.message.id, mutation)
            .await?;
        Ok(())
    }
}

#[async_trait]
pub trait Plugin: Send + Sync {
    fn name(&self) -> &str;

    fn tool_spec(&self) -> ToolSpec;

    /// Side-effect phase. External work only; storage is read-only here.
    async fn run(&self, arguments: &Value, ctx: &ExecCtx<'_>) -> Result<Value, EngineError>;

    /// Persistence phase, called with `run`'s output.
    async fn update(&self, output: Value, ctx: &mut ExecCtx<'_>) -> Result<(), EngineError>;

    /// Whether the persisted message state calls for a long-running effect
    /// (e.g. a generation job whose completion must be polled).
    fn should_run_effect(&self, message: &Message) -> bool {
        let _ = message;
        false
    }

    async fn launch_effect(&self, ctx: &mut ExecCtx<'_>) -> Result<EffectDispatch, EngineError> {
        let _ = ctx;
        Ok(EffectDispatch::Done)
    }
}

/// A tool call the model asked for, matched to its plugin.
pub struct ToolUse {
    pub plugin: Arc<dyn Plugin>,
    pub call: ToolCallRequest,
}

#[derive(Default)]
pub struct PluginRegistry {
    plugins: Vec<Arc<dyn Plugin>>,
}

impl PluginRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn register(mut self, plugin: Arc<dyn Plugin>) -> Self {
        self.plugins.push(plugin);
        self
    }

    pub fn get(&self, name: &str) -> Option<Arc<dyn Plugin>> {
        self.plugins.iter().find(|p| p.name() == name).cloned()
    }

    fn enabled_plugins(&self, enabled: &[String]) -> Vec<Arc<dyn Plugin>> {
        self.plugins
            .iter()
            .filter(|p| enabled.iter().any(|name| name == p.name()))
            .cloned()
            .collect()
    }

    /// Ask the model whether the user's turn should be delegated to a tool.
    /// Only plugins on the session's enabled list are offered.
    pub async fn request_tool_usage(
        &self,
        transport: &dyn ChatTransport,
        model: &ModelCode,
        prompt: &str,
        enabled: &[String],
    ) -> Result<Option<ToolUse>, EngineError> {
        let candidates = self.enabled_plugins(enabled);
        if candidates.is_empty() {
            return Ok(None);
        }

        let mut request = ChatRequest::new(model.code.clone());
        request.tools = candidates.iter().map(|p| p.tool_spec()).collect();
        request
            .messages
            .push(WireMessage::text(WireRole::User, prompt));

        let response = transport.chat_completion(&request).await?;
        let Some(call) = response.tool_call else {
            return Ok(None);
        };
        match candidates.into_iter().find(|p| p.name() == call.name) {
            Some(plugin) => {
                debug!(plugin = plugin.name(), "delegating turn to tool");
                Ok(Some(ToolUse { plugin, call }))
            }
            None => Ok(None),
        }
    }

    /// Run a dispatched tool call to completion against `bot_message`,
    /// including any long-running effect it registers.
    pub async fn dispatch(
        &self,
        tool_use: ToolUse,
        store: &dyn MessageStore,
        session: SessionId,
        bot_message: MessageId,
    ) -> Result<(), EngineError> {
        let ToolUse { plugin, call } = tool_use;
        let name = plugin.name().to_string();

        let message = store
            .get(session, bot_message)
            .await?
            .ok_or_else(|| EngineError::Invalid(format!("Bot message {bot_message} missing")))?;
        let mut ctx = ExecCtx {
            store,
            session,
            message,
        };

        let plugin_name = name.clone();
        ctx.persist(Box::new(move |msg| {
            msg.plugin_id = Some(plugin_name);
        }))
        .await?;

        let wrap = |e: EngineError| match e {
            err @ EngineError::Store(_) => err,
            err => EngineError::ToolExecution {
                name: name.clone(),
                message: err.to_string(),
            },
        };

        let output = plugin.run(&call.arguments, &ctx).await.map_err(wrap)?;
        plugin.update(output, &mut ctx).await.map_err(wrap)?;

        if plugin.should_run_effect(ctx.message()) {
            loop {
                match plugin.launch_effect(&mut ctx).await.map_err(wrap)? {
                    EffectDispatch::Done => break,
                    EffectDispatch::Next(delay) => tokio::time::sleep(delay).await,
                }
            }
        }
        Ok(())
    }
}

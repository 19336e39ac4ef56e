//! The chat assistant: snapshot, prompt, optional language model, and the
//! deterministic fallback.

pub mod advice;
pub mod context;

use anyhow::Result;
use async_trait::async_trait;
use std::sync::Arc;
use std::time::Duration;
use thiserror::Error;

use crate::database::MentraDatabase;
use crate::error::DomainError;
use crate::events::{publish, AppEvent, EventSender};
use crate::llm_client::Message;
use crate::models::{ChatMessage, ChatRole};

use advice::AdviceInputs;
use context::{render_system_prompt, ContextBuilder};

pub const DEFAULT_HISTORY_CONTEXT_LIMIT: usize = 10;
pub const DEFAULT_HISTORY_PAGE_LIMIT: usize = 50;
pub const MAX_MESSAGE_CHARS: usize = 1000;
pub const DEFAULT_COMPLETION_TIMEOUT: Duration = Duration::from_secs(30);

#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum CompletionError {
    #[error("completion timed out")]
    Timeout,
    #[error("completion failed: {0}")]
    Failed(String),
}

/// A chat-completion provider.
#[async_trait]
pub trait CompletionBackend: Send + Sync {
    async fn complete(&self, messages: Vec<Message>) -> Result<String, CompletionError>;
}

/// One answered chat turn.
#[derive(Debug, Clone, serde::Serialize)]
pub struct ChatExchange {
    pub user_message: ChatMessage,
    pub reply: ChatMessage,
    pub used_fallback: bool,
}

#[derive(Clone)]
pub struct ChatService {
    db: Arc<MentraDatabase>,
    context: ContextBuilder,
    backend: Option<Arc<dyn CompletionBackend>>,
    timeout: Duration,
    history_limit: usize,
    events: EventSender,
}

impl ChatService {
    pub fn new(
        db: Arc<MentraDatabase>,
        context: ContextBuilder,
        backend: Option<Arc<dyn CompletionBackend>>,
        events: EventSender,
    ) -> Self {
        Self {
            db,
            context,
            backend,
            timeout: DEFAULT_COMPLETION_TIMEOUT,
            history_limit: DEFAULT_HISTORY_CONTEXT_LIMIT,
            events,
        }
    }

    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = timeout;
        self
    }

    pub fn with_history_limit(mut self, limit: usize) -> Self {
        self.history_limit = limit;
        self
    }

    pub fn has_backend(&self) -> bool {
        self.backend.is_some()
    }

    /// Answers `text`. Backend failures never surface here; the fallback
    /// generator always produces a reply.
    pub async fn chat(&self, user_id: &str, text: &str) -> Result<ChatExchange> {
        let text = validate_message(text)?;
        self.db.require_user(user_id)?;

        // Everything that reads storage runs before the user turn is written,
        // so a failed read leaves no unanswered message behind.
        let snapshot = self.context.build(user_id)?;
        let system_prompt = render_system_prompt(&snapshot);
        let history = self.db.get_chat_history(user_id, self.history_limit)?;

        let user_message = self.db.add_chat_message(user_id, ChatRole::User, text, None)?;

        let mut messages = Vec::with_capacity(history.len() + 2);
        messages.push(Message::new("system", system_prompt.as_str()));
        messages.extend(
            history
                .into_iter()
                .map(|m| Message::new(m.role.as_db_str(), m.content)),
        );
        messages.push(Message::new("user", text));

        let (content, used_fallback) = match self.ask_backend(messages).await {
            Some(content) => (content, false),
            None => {
                let inputs = AdviceInputs::from_snapshot(&snapshot);
                (advice::generate(&inputs, text), true)
            }
        };

        let snapshot_json = serde_json::to_value(&snapshot)?;
        let reply =
            self.db
                .add_chat_message(user_id, ChatRole::Assistant, &content, Some(&snapshot_json))?;

        publish(
            &self.events,
            AppEvent::ChatReplied {
                user_id: user_id.to_string(),
                message_id: reply.id.clone(),
                used_fallback,
            },
        );

        Ok(ChatExchange {
            user_message,
            reply,
            used_fallback,
        })
    }

    async fn ask_backend(&self, messages: Vec<Message>) -> Option<String> {
        let backend = self.backend.as_ref()?;
        match tokio::time::timeout(self.timeout, backend.complete(messages)).await {
            Ok(Ok(content)) if !content.trim().is_empty() => Some(content),
            Ok(Ok(_)) => {
                tracing::warn!("Completion backend returned an empty reply; using fallback");
                None
            }
            Ok(Err(error)) => {
                tracing::warn!("Completion backend unavailable ({}); using fallback", error);
                None
            }
            Err(_) => {
                tracing::warn!(
                    "Completion backend did not answer within {:?}; using fallback",
                    self.timeout
                );
                None
            }
        }
    }

    /// The latest `limit` messages, oldest first.
    pub fn history(&self, user_id: &str, limit: usize) -> Result<Vec<ChatMessage>> {
        self.db.get_chat_history(user_id, limit)
    }

    pub fn clear_history(&self, user_id: &str) -> Result<usize> {
        let removed = self.db.clear_chat_history(user_id)?;
        tracing::info!("Cleared {} chat message(s) for {}", removed, user_id);
        Ok(removed)
    }
}

fn validate_message(text: &str) -> Result<&str, DomainError> {
    let trimmed = text.trim();
    if trimmed.is_empty() {
        return Err(DomainError::invalid("message", "must not be empty"));
    }
    if trimmed.chars().count() > MAX_MESSAGE_CHARS {
        return Err(DomainError::invalid(
            "message",
            format!("must be at most {} characters", MAX_MESSAGE_CHARS),
        ));
    }
    Ok(trimmed)
}

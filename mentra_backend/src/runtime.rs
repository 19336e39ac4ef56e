use std::sync::Arc;

use anyhow::{Context, Result};
use flume::Sender;

use crate::activities::ActivityService;
use crate::assistant::context::ContextBuilder;
use crate::assistant::{ChatService, CompletionBackend};
use crate::clock::{Clock, SystemClock};
use crate::config::MentraConfig;
use crate::database::MentraDatabase;
use crate::events::AppEvent;
use crate::llm_client::LlmClient;
use crate::progress::ProgressService;

/// Everything the HTTP layer needs, wired from one config.
pub struct BackendRuntime {
    pub config: MentraConfig,
    pub db: Arc<MentraDatabase>,
    pub clock: Arc<dyn Clock>,
    pub progress: ProgressService,
    pub activities: ActivityService,
    pub chat: ChatService,
}

pub struct BackendRuntimeBuilder {
    config: MentraConfig,
    event_tx: Sender<AppEvent>,
    clock: Option<Arc<dyn Clock>>,
    backend: Option<Arc<dyn CompletionBackend>>,
}

impl BackendRuntimeBuilder {
    pub fn new(config: MentraConfig, event_tx: Sender<AppEvent>) -> Self {
        Self {
            config,
            event_tx,
            clock: None,
            backend: None,
        }
    }

    pub fn with_clock(mut self, clock: Arc<dyn Clock>) -> Self {
        self.clock = Some(clock);
        self
    }

    /// Overrides the backend that would otherwise be built from the LLM settings.
    pub fn with_completion_backend(mut self, backend: Arc<dyn CompletionBackend>) -> Self {
        self.backend = Some(backend);
        self
    }

    pub fn build(self) -> Result<BackendRuntime> {
        let config = self.config;

        let clock = self.clock.unwrap_or_else(|| Arc::new(SystemClock));
        let db = Arc::new(
            MentraDatabase::new(&config.database_path)
                .with_context(|| {
                    format!("Failed to open database at {}", config.database_path)
                })?
                .with_clock(clock.clone()),
        );

        let backend = match self.backend {
            Some(backend) => Some(backend),
            None => build_completion_backend(&config)?,
        };
        match &backend {
            Some(_) => tracing::info!("Assistant uses model '{}'", config.llm_model),
            None => tracing::info!("No LLM configured; assistant uses built-in advice"),
        }

        let progress = ProgressService::new(db.clone(), clock.clone(), self.event_tx.clone());
        let activities =
            ActivityService::new(db.clone(), clock.clone(), progress.clone(), config.rewards);
        let chat = ChatService::new(
            db.clone(),
            ContextBuilder::new(db.clone(), clock.clone()),
            backend,
            self.event_tx,
        )
        .with_timeout(config.llm_timeout())
        .with_history_limit(config.chat_history_context_limit);

        Ok(BackendRuntime {
            config,
            db,
            clock,
            progress,
            activities,
            chat,
        })
    }
}

impl BackendRuntime {
    pub fn bootstrap(config: MentraConfig, event_tx: Sender<AppEvent>) -> Result<Self> {
        BackendRuntimeBuilder::new(config, event_tx).build()
    }
}

fn build_completion_backend(config: &MentraConfig) -> Result<Option<Arc<dyn CompletionBackend>>> {
    if !config.llm_enabled() {
        return Ok(None);
    }
    let client = LlmClient::new(
        config.llm_api_url.clone(),
        config.llm_api_key.clone().unwrap_or_default(),
        config.llm_model.clone(),
        config.llm_max_tokens,
        config.llm_temperature,
        config.llm_timeout(),
    )?;
    let backend: Arc<dyn CompletionBackend> = Arc::new(client);
    Ok(Some(backend))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::activities::NewTask;
    use crate::clock::FixedClock;
    use chrono::NaiveDate;

    fn config_in(dir: &tempfile::TempDir) -> MentraConfig {
        MentraConfig {
            database_path: dir.path().join("mentra.db").to_string_lossy().into_owned(),
            ..MentraConfig::default()
        }
    }

    #[test]
    fn bootstrap_without_key_uses_builtin_advice() {
        let dir = tempfile::tempdir().expect("tempdir");
        let (tx, _rx) = flume::unbounded();
        let runtime = BackendRuntime::bootstrap(config_in(&dir), tx).expect("bootstrap");
        assert!(!runtime.chat.has_backend());
    }

    #[test]
    fn api_key_enables_the_model_backend() {
        let dir = tempfile::tempdir().expect("tempdir");
        let (tx, _rx) = flume::unbounded();
        let config = MentraConfig {
            llm_api_key: Some("sk-test".to_string()),
            ..config_in(&dir)
        };
        let runtime = BackendRuntime::bootstrap(config, tx).expect("bootstrap");
        assert!(runtime.chat.has_backend());
    }

    #[tokio::test]
    async fn services_share_one_database_and_clock() {
        let dir = tempfile::tempdir().expect("tempdir");
        let (tx, rx) = flume::unbounded();
        let clock = Arc::new(FixedClock::at_date(
            NaiveDate::from_ymd_opt(2026, 4, 8).unwrap(),
        ));
        let runtime = BackendRuntimeBuilder::new(config_in(&dir), tx)
            .with_clock(clock)
            .build()
            .expect("build");

        let user = runtime.db.create_user("Rin").expect("user");
        let task = runtime
            .activities
            .create_task(
                &user.id,
                NewTask {
                    title: "Ship it".to_string(),
                    ..NewTask::default()
                },
            )
            .expect("task");
        runtime
            .activities
            .complete_task(&user.id, &task.id)
            .expect("complete");

        let exchange = runtime
            .chat
            .chat(&user.id, "How is my level?")
            .await
            .expect("chat");
        assert!(exchange.used_fallback);
        assert!(exchange.reply.content.contains("**Level 1**"));
        assert!(rx.try_iter().any(|event| event.event_type() == "exp_changed"));
    }
}

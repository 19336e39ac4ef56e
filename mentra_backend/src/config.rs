use anyhow::{anyhow, Context, Result};
use serde::{Deserialize, Serialize};
use std::env;
use std::fs;
use std::path::PathBuf;
use std::time::Duration;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "lowercase")]
pub enum AuthMode {
    #[default]
    Required,
    Disabled,
}

impl AuthMode {
    pub fn parse(raw: &str) -> Result<Self> {
        match raw.trim().to_ascii_lowercase().as_str() {
            "" | "required" | "on" | "enabled" | "true" => Ok(AuthMode::Required),
            "disabled" | "off" | "false" => Ok(AuthMode::Disabled),
            other => Err(anyhow!(
                "Invalid auth mode '{}'. Expected 'required' or 'disabled'",
                other
            )),
        }
    }
}

/// Default EXP for newly created entities.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct RewardConfig {
    #[serde(default = "default_task_reward")]
    pub task: i64,
    #[serde(default = "default_pomodoro_reward")]
    pub pomodoro: i64,
    #[serde(default = "default_schedule_reward")]
    pub schedule: i64,
}

fn default_task_reward() -> i64 {
    10
}

fn default_pomodoro_reward() -> i64 {
    15
}

fn default_schedule_reward() -> i64 {
    5
}

impl Default for RewardConfig {
    fn default() -> Self {
        Self {
            task: default_task_reward(),
            pomodoro: default_pomodoro_reward(),
            schedule: default_schedule_reward(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MentraConfig {
    // Storage and server
    #[serde(default = "default_database_path")]
    pub database_path: String,
    #[serde(default = "default_bind_addr")]
    pub bind_addr: String,
    #[serde(default)]
    pub auth_mode: AuthMode,

    // LLM configuration (OpenAI-compatible: OpenAI, Ollama, LM Studio, vLLM, etc.)
    #[serde(default = "default_llm_url")]
    pub llm_api_url: String,
    #[serde(default = "default_llm_model")]
    pub llm_model: String,
    #[serde(default)]
    pub llm_api_key: Option<String>,
    /// Use the model even without an API key (local servers).
    #[serde(default)]
    pub llm_keyless: bool,
    #[serde(default = "default_llm_timeout_secs")]
    pub llm_timeout_secs: u64,
    #[serde(default = "default_llm_max_tokens")]
    pub llm_max_tokens: u32,
    #[serde(default = "default_llm_temperature")]
    pub llm_temperature: f32,

    // Assistant
    #[serde(default = "default_chat_history_context_limit")]
    pub chat_history_context_limit: usize,

    #[serde(default)]
    pub rewards: RewardConfig,
}

fn default_database_path() -> String {
    "mentra.db".to_string()
}

fn default_bind_addr() -> String {
    "127.0.0.1:8787".to_string()
}

fn default_llm_url() -> String {
    "https://api.openai.com/v1".to_string()
}

fn default_llm_model() -> String {
    "gpt-3.5-turbo".to_string()
}

fn default_llm_timeout_secs() -> u64 {
    30
}

fn default_llm_max_tokens() -> u32 {
    500
}

fn default_llm_temperature() -> f32 {
    0.7
}

fn default_chat_history_context_limit() -> usize {
    10
}

impl Default for MentraConfig {
    fn default() -> Self {
        Self {
            database_path: default_database_path(),
            bind_addr: default_bind_addr(),
            auth_mode: AuthMode::default(),
            llm_api_url: default_llm_url(),
            llm_model: default_llm_model(),
            llm_api_key: None,
            llm_keyless: false,
            llm_timeout_secs: default_llm_timeout_secs(),
            llm_max_tokens: default_llm_max_tokens(),
            llm_temperature: default_llm_temperature(),
            chat_history_context_limit: default_chat_history_context_limit(),
            rewards: RewardConfig::default(),
        }
    }
}

impl MentraConfig {
    /// Get the directory containing the executable
    fn get_base_dir() -> PathBuf {
        match std::env::current_exe() {
            Ok(exe_path) => exe_path
                .parent()
                .map(|p| p.to_path_buf())
                .unwrap_or_else(|| PathBuf::from(".")),
            Err(_) => PathBuf::from("."),
        }
    }

    /// Get the path to the config file (relative to executable)
    pub fn config_path() -> PathBuf {
        Self::get_base_dir().join("mentra_config.toml")
    }

    /// Load config from mentra_config.toml (next to executable), falling back
    /// to defaults plus environment variables.
    pub fn load() -> Self {
        let path = Self::config_path();

        if let Ok(contents) = fs::read_to_string(&path) {
            match toml::from_str::<MentraConfig>(&contents) {
                Ok(config) => {
                    tracing::info!("Loaded config from {:?}", path);
                    return config;
                }
                Err(e) => {
                    tracing::error!("Failed to parse {:?}: {}", path, e);
                }
            }
        }

        tracing::warn!("No config file found, using defaults + env vars");
        Self::from_env()
    }

    /// Save config to file (next to executable)
    pub fn save(&self) -> Result<()> {
        let path = Self::config_path();

        let toml_string = toml::to_string_pretty(self).context("Failed to serialize config")?;

        fs::write(&path, toml_string)
            .with_context(|| format!("Failed to write config to {:?}", path))?;

        tracing::info!("Saved config to {:?}", path);
        Ok(())
    }

    pub fn from_env() -> Self {
        Self::from_lookup(|key| env::var(key).ok())
    }

    fn from_lookup<F>(lookup: F) -> Self
    where
        F: Fn(&str) -> Option<String>,
    {
        let mut config = Self::default();

        if let Some(path) = lookup("MENTRA_DATABASE_PATH").filter(|p| !p.trim().is_empty()) {
            config.database_path = path;
        }

        if let Some(bind) = lookup("MENTRA_BIND").filter(|b| !b.trim().is_empty()) {
            config.bind_addr = bind;
        }

        if let Some(mode) = lookup("MENTRA_AUTH_MODE") {
            match AuthMode::parse(&mode) {
                Ok(mode) => config.auth_mode = mode,
                Err(e) => tracing::warn!("Ignoring MENTRA_AUTH_MODE: {}", e),
            }
        }

        if let Some(url) = lookup("LLM_API_URL") {
            config.llm_api_url = url;
        }

        if let Some(model) = lookup("LLM_MODEL") {
            config.llm_model = model;
        }

        if let Some(key) = lookup("LLM_API_KEY").filter(|k| !k.trim().is_empty()) {
            config.llm_api_key = Some(key);
        }

        if let Some(keyless) = lookup("LLM_KEYLESS") {
            config.llm_keyless = keyless.eq_ignore_ascii_case("1")
                || keyless.eq_ignore_ascii_case("true")
                || keyless.eq_ignore_ascii_case("yes");
        }

        if let Some(timeout) = lookup("LLM_TIMEOUT_SECS") {
            if let Ok(seconds) = timeout.parse() {
                config.llm_timeout_secs = seconds;
            }
        }

        config
    }

    /// The model is used when a key is set or key-less access is allowed.
    pub fn llm_enabled(&self) -> bool {
        self.llm_keyless
            || self
                .llm_api_key
                .as_deref()
                .map(|key| !key.trim().is_empty())
                .unwrap_or(false)
    }

    pub fn llm_timeout(&self) -> Duration {
        Duration::from_secs(self.llm_timeout_secs.max(1))
    }
}

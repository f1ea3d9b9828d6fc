//! Configuration for smartchat.
//!
//! Everything is read from the environment (after loading `.env` if present).
//! Backends whose credentials are missing stay in the config but report
//! themselves as unconfigured, so the orchestrator can skip them.

use std::time::Duration;

use secrecy::{ExposeSecret, SecretString};

use crate::error::ConfigError;
use crate::history::MAX_CONTEXT_LENGTH;
use crate::llm::BackendKind;
use crate::llm::retry::RetryPolicy;
use crate::prompt::{GameSystem, resolve_prompt};

pub const DEFAULT_BASE_URL: &str = "https://api.openai.com/v1";
pub const DEFAULT_MODEL: &str = "gpt-4o-mini";
pub const DEFAULT_TEMPERATURE: f64 = 0.1;
pub const DEFAULT_CONTEXT_LENGTH: usize = 5;

/// Main configuration.
#[derive(Debug, Clone)]
pub struct Config {
    pub premium: AssistantBackendConfig,
    pub assistant: AssistantBackendConfig,
    pub chat: ChatCompletionConfig,
    pub retry: RetryPolicy,
    /// How long to wait for an assistant run before giving up.
    pub run_deadline: Duration,
    /// Per-request transport timeout.
    pub http_timeout: Duration,
    /// Turns of history sent with chat completions (0 disables history).
    pub context_length: usize,
    /// Recreate assistant threads older than this.
    pub session_max_age: Option<Duration>,
}

impl Config {
    /// Load configuration from environment variables.
    pub fn from_env() -> Result<Self, ConfigError> {
        // Load .env file if present (ignore errors if not found)
        let _ = dotenvy::dotenv();
        Self::load()
    }

    fn load() -> Result<Self, ConfigError> {
        let user_key = optional_env("OPENAI_API_KEY")?.map(SecretString::from);
        let user_base_url = base_url_env("OPENAI_BASE_URL")?;

        let premium = AssistantBackendConfig {
            api_key: optional_env("SMARTCHAT_PREMIUM_API_KEY")?.map(SecretString::from),
            assistant_id: optional_env("SMARTCHAT_PREMIUM_ASSISTANT_ID")?,
            base_url: base_url_env("SMARTCHAT_PREMIUM_BASE_URL")?,
        };

        let assistant = AssistantBackendConfig {
            api_key: user_key.clone(),
            assistant_id: optional_env("OPENAI_ASSISTANT_ID")?,
            base_url: user_base_url.clone(),
        };

        let game_system: GameSystem =
            parse_optional_env("SMARTCHAT_GAME_SYSTEM", GameSystem::default())?;
        let custom_prompt = optional_env("SMARTCHAT_GAME_PROMPT")?;
        let chat = ChatCompletionConfig {
            api_key: user_key,
            base_url: user_base_url,
            model: optional_env("OPENAI_MODEL")?.unwrap_or_else(|| DEFAULT_MODEL.to_string()),
            temperature: parse_optional_env("SMARTCHAT_TEMPERATURE", DEFAULT_TEMPERATURE)?,
            game_system,
            prompt: resolve_prompt(game_system, custom_prompt.as_deref()),
        };
        if !(0.0..=2.0).contains(&chat.temperature) {
            return Err(ConfigError::InvalidValue {
                key: "SMARTCHAT_TEMPERATURE".to_string(),
                message: "must be between 0 and 2".to_string(),
            });
        }

        let defaults = RetryPolicy::default();
        let retry = RetryPolicy::new(
            parse_optional_env("SMARTCHAT_RETRY_MAX_ATTEMPTS", defaults.max_attempts)?,
            Duration::from_millis(parse_optional_env(
                "SMARTCHAT_RETRY_INITIAL_DELAY_MS",
                defaults.initial_delay.as_millis() as u64,
            )?),
            Duration::from_millis(parse_optional_env(
                "SMARTCHAT_RETRY_MAX_DELAY_MS",
                defaults.max_delay.as_millis() as u64,
            )?),
            parse_optional_env("SMARTCHAT_RETRY_MULTIPLIER", defaults.backoff_multiplier)?,
        )?;

        let context_length =
            parse_optional_env("SMARTCHAT_CONTEXT_LENGTH", DEFAULT_CONTEXT_LENGTH)?;
        if context_length > MAX_CONTEXT_LENGTH {
            return Err(ConfigError::InvalidValue {
                key: "SMARTCHAT_CONTEXT_LENGTH".to_string(),
                message: format!("must be between 0 and {MAX_CONTEXT_LENGTH}"),
            });
        }

        let run_deadline = Duration::from_secs(positive_secs("SMARTCHAT_RUN_DEADLINE_SECS", 30)?);
        let http_timeout = Duration::from_secs(positive_secs("SMARTCHAT_HTTP_TIMEOUT_SECS", 120)?);
        let session_max_age = optional_env("SMARTCHAT_SESSION_MAX_AGE_SECS")?
            .map(|_| positive_secs("SMARTCHAT_SESSION_MAX_AGE_SECS", 0))
            .transpose()?
            .map(Duration::from_secs);

        Ok(Self {
            premium,
            assistant,
            chat,
            retry,
            run_deadline,
            http_timeout,
            context_length,
            session_max_age,
        })
    }

    /// Backend configs in priority order.
    pub fn backends(&self) -> Vec<BackendConfig> {
        vec![
            BackendConfig::Premium(self.premium.clone()),
            BackendConfig::AssistantThread(self.assistant.clone()),
            BackendConfig::ChatCompletion(self.chat.clone()),
        ]
    }

    /// Whether at least one backend has its credentials.
    pub fn any_backend_configured(&self) -> bool {
        self.backends().iter().any(BackendConfig::is_configured)
    }
}

/// Credentials and endpoint for an assistant-thread backend.
#[derive(Debug, Clone)]
pub struct AssistantBackendConfig {
    pub api_key: Option<SecretString>,
    pub assistant_id: Option<String>,
    pub base_url: String,
}

impl AssistantBackendConfig {
    pub fn is_configured(&self) -> bool {
        has_secret(self.api_key.as_ref())
            && self
                .assistant_id
                .as_deref()
                .is_some_and(|id| !id.trim().is_empty())
    }
}

/// Credentials and request parameters for the chat completion backend.
#[derive(Debug, Clone)]
pub struct ChatCompletionConfig {
    pub api_key: Option<SecretString>,
    pub base_url: String,
    pub model: String,
    pub temperature: f64,
    pub game_system: GameSystem,
    /// Instruction message sent before every question.
    pub prompt: String,
}

impl ChatCompletionConfig {
    pub fn is_configured(&self) -> bool {
        has_secret(self.api_key.as_ref())
    }
}

/// One backend's configuration, tagged by flavor.
#[derive(Debug, Clone)]
pub enum BackendConfig {
    Premium(AssistantBackendConfig),
    AssistantThread(AssistantBackendConfig),
    ChatCompletion(ChatCompletionConfig),
}

impl BackendConfig {
    pub fn kind(&self) -> BackendKind {
        match self {
            Self::Premium(_) => BackendKind::Premium,
            Self::AssistantThread(_) => BackendKind::AssistantThread,
            Self::ChatCompletion(_) => BackendKind::ChatCompletion,
        }
    }

    pub fn is_configured(&self) -> bool {
        match self {
            Self::Premium(c) | Self::AssistantThread(c) => c.is_configured(),
            Self::ChatCompletion(c) => c.is_configured(),
        }
    }
}

fn has_secret(secret: Option<&SecretString>) -> bool {
    secret.is_some_and(|s| !s.expose_secret().trim().is_empty())
}

fn base_url_env(key: &str) -> Result<String, ConfigError> {
    let url = optional_env(key)?.unwrap_or_else(|| DEFAULT_BASE_URL.to_string());
    if !url.starts_with("https://") && !url.starts_with("http://") {
        return Err(ConfigError::InvalidValue {
            key: key.to_string(),
            message: "must start with http:// or https://".to_string(),
        });
    }
    Ok(url.trim_end_matches('/').to_string())
}

fn positive_secs(key: &str, default: u64) -> Result<u64, ConfigError> {
    let secs: u64 = parse_optional_env(key, default)?;
    if secs == 0 {
        return Err(ConfigError::InvalidValue {
            key: key.to_string(),
            message: "must be greater than zero".to_string(),
        });
    }
    Ok(secs)
}

pub(crate) fn optional_env(key: &str) -> Result<Option<String>, ConfigError> {
    match std::env::var(key) {
        Ok(val) if val.is_empty() => Ok(None),
        Ok(val) => Ok(Some(val)),
        Err(std::env::VarError::NotPresent) => Ok(None),
        Err(e) => Err(ConfigError::ParseError(format!(
            "failed to read {key}: {e}"
        ))),
    }
}

pub(crate) fn parse_optional_env<T>(key: &str, default: T) -> Result<T, ConfigError>
where
    T: std::str::FromStr,
    T::Err: std::fmt::Display,
{
    optional_env(key)?
        .map(|s| {
            s.parse().map_err(|e| ConfigError::InvalidValue {
                key: key.to_string(),
                message: format!("{e}"),
            })
        })
        .transpose()
        .map(|opt| opt.unwrap_or(default))
}

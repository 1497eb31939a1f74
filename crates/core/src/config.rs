use std::env;
use std::fs;
use std::path::{Path, PathBuf};
use std::time::Duration;

use secrecy::{ExposeSecret, SecretString};
use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::policy::EnvironmentMode;
use crate::rate_limit::RateLimitConfig;

pub const DEFAULT_SYSTEM_PROMPT: &str = "You manage an industrial automation gateway through the \
provided tools. Every change must be made with a tool call; never write or run arbitrary code. \
Prefer dry runs when unsure, and explain destructive changes before asking for confirmation.";

#[derive(Clone, Debug)]
pub struct AppConfig {
    pub environment: EnvironmentConfig,
    pub model: ModelConfig,
    pub rate_limit: RateLimitSettings,
    pub conversation: ConversationConfig,
    pub execution: ExecutionConfig,
    pub logging: LoggingConfig,
}

#[derive(Clone, Debug)]
pub struct EnvironmentConfig {
    pub mode: EnvironmentMode,
}

#[derive(Clone, Debug)]
pub struct ModelConfig {
    pub provider: ModelProviderKind,
    pub model: String,
    pub api_key: Option<SecretString>,
    pub base_url: Option<String>,
    pub max_tokens: u32,
    pub temperature: f32,
    pub timeout_secs: u64,
}

#[derive(Clone, Debug)]
pub struct RateLimitSettings {
    pub requests_per_minute: u32,
    pub tokens_per_minute: u64,
    pub request_burst: u32,
    pub token_burst: u64,
    pub window_secs: u64,
    pub idle_eviction_secs: u64,
}

#[derive(Clone, Debug)]
pub struct ConversationConfig {
    pub max_tool_iterations: u32,
    pub context_token_budget: usize,
    pub retained_messages: usize,
    pub inactivity_timeout_secs: u64,
    pub sweep_interval_secs: u64,
    pub system_prompt: String,
}

#[derive(Clone, Debug)]
pub struct ExecutionConfig {
    pub handler_timeout_secs: u64,
}

#[derive(Clone, Debug)]
pub struct LoggingConfig {
    pub level: String,
    pub format: LogFormat,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ModelProviderKind {
    OpenAi,
    Anthropic,
    Ollama,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum LogFormat {
    Compact,
    Pretty,
    Json,
}

#[derive(Clone, Debug, Default)]
pub struct ConfigOverrides {
    pub environment_mode: Option<EnvironmentMode>,
    pub log_level: Option<String>,
    pub log_format: Option<LogFormat>,
    pub model_provider: Option<ModelProviderKind>,
    pub model: Option<String>,
    pub model_api_key: Option<String>,
    pub requests_per_minute: Option<u32>,
    pub max_tool_iterations: Option<u32>,
}

#[derive(Clone, Debug, Default)]
pub struct LoadOptions {
    pub config_path: Option<PathBuf>,
    pub require_file: bool,
    pub overrides: ConfigOverrides,
}

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("could not read config file `{path}`: {source}")]
    ReadFile { path: PathBuf, source: std::io::Error },
    #[error("could not parse config file `{path}`: {source}")]
    ParseFile { path: PathBuf, source: toml::de::Error },
    #[error("required config file was not found: `{0}`")]
    MissingConfigFile(PathBuf),
    #[error("environment variable interpolation failed for `{var}`")]
    MissingEnvInterpolation { var: String },
    #[error("unterminated environment interpolation expression")]
    UnterminatedInterpolation,
    #[error("invalid environment override for `{key}`: `{value}`")]
    InvalidEnvOverride { key: String, value: String },
    #[error("configuration validation failed: {0}")]
    Validation(String),
}

impl Default for AppConfig {
    fn default() -> Self {
        Self {
            environment: EnvironmentConfig { mode: EnvironmentMode::Development },
            model: ModelConfig {
                provider: ModelProviderKind::Ollama,
                model: "llama3.1".to_string(),
                api_key: None,
                base_url: Some("http://localhost:11434".to_string()),
                max_tokens: 4_096,
                temperature: 0.2,
                timeout_secs: 60,
            },
            rate_limit: RateLimitSettings {
                requests_per_minute: 60,
                tokens_per_minute: 100_000,
                request_burst: 10,
                token_burst: 0,
                window_secs: 60,
                idle_eviction_secs: 300,
            },
            conversation: ConversationConfig {
                max_tool_iterations: 10,
                context_token_budget: 100_000,
                retained_messages: 10,
                inactivity_timeout_secs: 3_600,
                sweep_interval_secs: 60,
                system_prompt: DEFAULT_SYSTEM_PROMPT.to_string(),
            },
            execution: ExecutionConfig { handler_timeout_secs: 30 },
            logging: LoggingConfig { level: "info".to_string(), format: LogFormat::Compact },
        }
    }
}

impl RateLimitSettings {
    pub fn to_rate_limit_config(&self) -> RateLimitConfig {
        RateLimitConfig {
            requests_per_window: self.requests_per_minute,
            tokens_per_window: self.tokens_per_minute,
            request_burst: self.request_burst,
            token_burst: self.token_burst,
            window: Duration::from_secs(self.window_secs),
            idle_eviction: Duration::from_secs(self.idle_eviction_secs),
        }
    }
}

impl ExecutionConfig {
    pub fn handler_timeout(&self) -> Duration {
        Duration::from_secs(self.handler_timeout_secs)
    }
}

fn secret_value(value: String) -> SecretString {
    value.into()
}

impl std::str::FromStr for ModelProviderKind {
    type Err = ConfigError;

    fn from_str(value: &str) -> Result<Self, Self::Err> {
        match value.trim().to_ascii_lowercase().as_str() {
            "openai" | "open_ai" => Ok(Self::OpenAi),
            "anthropic" => Ok(Self::Anthropic),
            "ollama" => Ok(Self::Ollama),
            other => Err(ConfigError::Validation(format!(
                "unsupported model provider `{other}` (expected openai|anthropic|ollama)"
            ))),
        }
    }
}

impl std::str::FromStr for LogFormat {
    type Err = ConfigError;

    fn from_str(value: &str) -> Result<Self, Self::Err> {
        match value.trim().to_ascii_lowercase().as_str() {
            "compact" => Ok(Self::Compact),
            "pretty" => Ok(Self::Pretty),
            "json" => Ok(Self::Json),
            other => Err(ConfigError::Validation(format!(
                "unsupported log format `{other}` (expected compact|pretty|json)"
            ))),
        }
    }
}

fn parse_mode(key: &str, value: &str) -> Result<EnvironmentMode, ConfigError> {
    EnvironmentMode::parse(value).ok_or_else(|| ConfigError::InvalidEnvOverride {
        key: key.to_string(),
        value: value.to_string(),
    })
}

impl AppConfig {
    pub fn load(options: LoadOptions) -> Result<Self, ConfigError> {
        let mut config = Self::default();
        let maybe_path = resolve_config_path(options.config_path.as_deref());

        if let Some(path) = maybe_path {
            let patch = read_patch(&path)?;
            config.apply_patch(patch);
        } else if options.require_file {
            let expected = options.config_path.unwrap_or_else(|| PathBuf::from("ignis.toml"));
            return Err(ConfigError::MissingConfigFile(expected));
        }

        config.apply_env_overrides()?;
        config.apply_overrides(options.overrides);
        config.validate()?;

        Ok(config)
    }

    fn apply_patch(&mut self, patch: ConfigPatch) {
        if let Some(environment) = patch.environment {
            if let Some(mode) = environment.mode {
                self.environment.mode = mode;
            }
        }

        if let Some(model) = patch.model {
            if let Some(provider) = model.provider {
                self.model.provider = provider;
            }
            if let Some(name) = model.model {
                self.model.model = name;
            }
            if let Some(model_api_key_value) = model.api_key {
                self.model.api_key = Some(secret_value(model_api_key_value));
            }
            if let Some(base_url) = model.base_url {
                self.model.base_url = Some(base_url);
            }
            if let Some(max_tokens) = model.max_tokens {
                self.model.max_tokens = max_tokens;
            }
            if let Some(temperature) = model.temperature {
                self.model.temperature = temperature;
            }
            if let Some(timeout_secs) = model.timeout_secs {
                self.model.timeout_secs = timeout_secs;
            }
        }

        if let Some(rate_limit) = patch.rate_limit {
            if let Some(requests_per_minute) = rate_limit.requests_per_minute {
                self.rate_limit.requests_per_minute = requests_per_minute;
            }
            if let Some(tokens_per_minute) = rate_limit.tokens_per_minute {
                self.rate_limit.tokens_per_minute = tokens_per_minute;
            }
            if let Some(request_burst) = rate_limit.request_burst {
                self.rate_limit.request_burst = request_burst;
            }
            if let Some(token_burst) = rate_limit.token_burst {
                self.rate_limit.token_burst = token_burst;
            }
            if let Some(window_secs) = rate_limit.window_secs {
                self.rate_limit.window_secs = window_secs;
            }
            if let Some(idle_eviction_secs) = rate_limit.idle_eviction_secs {
                self.rate_limit.idle_eviction_secs = idle_eviction_secs;
            }
        }

        if let Some(conversation) = patch.conversation {
            if let Some(max_tool_iterations) = conversation.max_tool_iterations {
                self.conversation.max_tool_iterations = max_tool_iterations;
            }
            if let Some(context_token_budget) = conversation.context_token_budget {
                self.conversation.context_token_budget = context_token_budget;
            }
            if let Some(retained_messages) = conversation.retained_messages {
                self.conversation.retained_messages = retained_messages;
            }
            if let Some(inactivity_timeout_secs) = conversation.inactivity_timeout_secs {
                self.conversation.inactivity_timeout_secs = inactivity_timeout_secs;
            }
            if let Some(sweep_interval_secs) = conversation.sweep_interval_secs {
                self.conversation.sweep_interval_secs = sweep_interval_secs;
            }
            if let Some(system_prompt) = conversation.system_prompt {
                self.conversation.system_prompt = system_prompt;
            }
        }

        if let Some(execution) = patch.execution {
            if let Some(handler_timeout_secs) = execution.handler_timeout_secs {
                self.execution.handler_timeout_secs = handler_timeout_secs;
            }
        }

        if let Some(logging) = patch.logging {
            if let Some(level) = logging.level {
                self.logging.level = level;
            }
            if let Some(format) = logging.format {
                self.logging.format = format;
            }
        }
    }

    fn apply_env_overrides(&mut self) -> Result<(), ConfigError> {
        let mode = read_env("IGNIS_ENVIRONMENT_MODE").map(|v| ("IGNIS_ENVIRONMENT_MODE", v));
        if let Some((key, value)) = mode.or_else(|| read_env("IGNIS_ENV").map(|v| ("IGNIS_ENV", v)))
        {
            self.environment.mode = parse_mode(key, &value)?;
        }

        if let Some(value) = read_env("IGNIS_MODEL_PROVIDER") {
            self.model.provider = value.parse()?;
        }
        if let Some(value) = read_env("IGNIS_MODEL") {
            self.model.model = value;
        }
        if let Some(value) = read_env("IGNIS_MODEL_API_KEY") {
            self.model.api_key = Some(secret_value(value));
        }
        if let Some(value) = read_env("IGNIS_MODEL_BASE_URL") {
            self.model.base_url = Some(value);
        }
        if let Some(value) = read_env("IGNIS_MODEL_MAX_TOKENS") {
            self.model.max_tokens = parse_u32("IGNIS_MODEL_MAX_TOKENS", &value)?;
        }
        if let Some(value) = read_env("IGNIS_MODEL_TEMPERATURE") {
            self.model.temperature = parse_f32("IGNIS_MODEL_TEMPERATURE", &value)?;
        }
        if let Some(value) = read_env("IGNIS_MODEL_TIMEOUT_SECS") {
            self.model.timeout_secs = parse_u64("IGNIS_MODEL_TIMEOUT_SECS", &value)?;
        }

        if let Some(value) = read_env("IGNIS_RATE_LIMIT_REQUESTS_PER_MINUTE") {
            self.rate_limit.requests_per_minute =
                parse_u32("IGNIS_RATE_LIMIT_REQUESTS_PER_MINUTE", &value)?;
        }
        if let Some(value) = read_env("IGNIS_RATE_LIMIT_TOKENS_PER_MINUTE") {
            self.rate_limit.tokens_per_minute =
                parse_u64("IGNIS_RATE_LIMIT_TOKENS_PER_MINUTE", &value)?;
        }
        if let Some(value) = read_env("IGNIS_RATE_LIMIT_REQUEST_BURST") {
            self.rate_limit.request_burst = parse_u32("IGNIS_RATE_LIMIT_REQUEST_BURST", &value)?;
        }
        if let Some(value) = read_env("IGNIS_RATE_LIMIT_TOKEN_BURST") {
            self.rate_limit.token_burst = parse_u64("IGNIS_RATE_LIMIT_TOKEN_BURST", &value)?;
        }
        if let Some(value) = read_env("IGNIS_RATE_LIMIT_WINDOW_SECS") {
            self.rate_limit.window_secs = parse_u64("IGNIS_RATE_LIMIT_WINDOW_SECS", &value)?;
        }
        if let Some(value) = read_env("IGNIS_RATE_LIMIT_IDLE_EVICTION_SECS") {
            self.rate_limit.idle_eviction_secs =
                parse_u64("IGNIS_RATE_LIMIT_IDLE_EVICTION_SECS", &value)?;
        }

        if let Some(value) = read_env("IGNIS_CONVERSATION_MAX_TOOL_ITERATIONS") {
            self.conversation.max_tool_iterations =
                parse_u32("IGNIS_CONVERSATION_MAX_TOOL_ITERATIONS", &value)?;
        }
        if let Some(value) = read_env("IGNIS_CONVERSATION_CONTEXT_TOKEN_BUDGET") {
            self.conversation.context_token_budget =
                parse_usize("IGNIS_CONVERSATION_CONTEXT_TOKEN_BUDGET", &value)?;
        }
        if let Some(value) = read_env("IGNIS_CONVERSATION_RETAINED_MESSAGES") {
            self.conversation.retained_messages =
                parse_usize("IGNIS_CONVERSATION_RETAINED_MESSAGES", &value)?;
        }
        if let Some(value) = read_env("IGNIS_CONVERSATION_INACTIVITY_TIMEOUT_SECS") {
            self.conversation.inactivity_timeout_secs =
                parse_u64("IGNIS_CONVERSATION_INACTIVITY_TIMEOUT_SECS", &value)?;
        }
        if let Some(value) = read_env("IGNIS_CONVERSATION_SWEEP_INTERVAL_SECS") {
            self.conversation.sweep_interval_secs =
                parse_u64("IGNIS_CONVERSATION_SWEEP_INTERVAL_SECS", &value)?;
        }
        if let Some(value) = read_env("IGNIS_CONVERSATION_SYSTEM_PROMPT") {
            self.conversation.system_prompt = value;
        }

        if let Some(value) = read_env("IGNIS_EXECUTION_HANDLER_TIMEOUT_SECS") {
            self.execution.handler_timeout_secs =
                parse_u64("IGNIS_EXECUTION_HANDLER_TIMEOUT_SECS", &value)?;
        }

        let log_level = read_env("IGNIS_LOGGING_LEVEL").or_else(|| read_env("IGNIS_LOG_LEVEL"));
        if let Some(value) = log_level {
            self.logging.level = value;
        }
        let log_format = read_env("IGNIS_LOGGING_FORMAT").or_else(|| read_env("IGNIS_LOG_FORMAT"));
        if let Some(value) = log_format {
            self.logging.format = value.parse()?;
        }

        Ok(())
    }

    fn apply_overrides(&mut self, overrides: ConfigOverrides) {
        if let Some(mode) = overrides.environment_mode {
            self.environment.mode = mode;
        }
        if let Some(log_level) = overrides.log_level {
            self.logging.level = log_level;
        }
        if let Some(log_format) = overrides.log_format {
            self.logging.format = log_format;
        }
        if let Some(provider) = overrides.model_provider {
            self.model.provider = provider;
        }
        if let Some(model) = overrides.model {
            self.model.model = model;
        }
        if let Some(api_key) = overrides.model_api_key {
            self.model.api_key = Some(secret_value(api_key));
        }
        if let Some(requests_per_minute) = overrides.requests_per_minute {
            self.rate_limit.requests_per_minute = requests_per_minute;
        }
        if let Some(max_tool_iterations) = overrides.max_tool_iterations {
            self.conversation.max_tool_iterations = max_tool_iterations;
        }
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        validate_model(&self.model)?;
        validate_rate_limit(&self.rate_limit)?;
        validate_conversation(&self.conversation)?;
        validate_execution(&self.execution)?;
        validate_logging(&self.logging)?;
        Ok(())
    }
}

fn resolve_config_path(explicit_path: Option<&Path>) -> Option<PathBuf> {
    if let Some(path) = explicit_path {
        return path.exists().then_some(path.to_path_buf());
    }

    [PathBuf::from("ignis.toml"), PathBuf::from("config/ignis.toml")]
        .into_iter()
        .find(|path| path.exists())
}

fn read_patch(path: &Path) -> Result<ConfigPatch, ConfigError> {
    let raw = fs::read_to_string(path)
        .map_err(|source| ConfigError::ReadFile { path: path.to_path_buf(), source })?;

    let interpolated = interpolate_env_vars(&raw)?;
    toml::from_str::<ConfigPatch>(&interpolated)
        .map_err(|source| ConfigError::ParseFile { path: path.to_path_buf(), source })
}

fn interpolate_env_vars(input: &str) -> Result<String, ConfigError> {
    let mut output = String::with_capacity(input.len());
    let mut chars = input.chars().peekable();

    while let Some(ch) = chars.next() {
        if ch == '$' && matches!(chars.peek(), Some('{')) {
            chars.next();
            let mut key = String::new();

            loop {
                match chars.next() {
                    Some('}') => break,
                    Some(next) => key.push(next),
                    None => return Err(ConfigError::UnterminatedInterpolation),
                }
            }

            let value = env::var(&key)
                .map_err(|_| ConfigError::MissingEnvInterpolation { var: key.clone() })?;
            output.push_str(&value);
            continue;
        }

        output.push(ch);
    }

    Ok(output)
}

fn validate_model(model: &ModelConfig) -> Result<(), ConfigError> {
    if model.model.trim().is_empty() {
        return Err(ConfigError::Validation("model.model must name a model".to_string()));
    }

    if model.timeout_secs == 0 || model.timeout_secs > 300 {
        return Err(ConfigError::Validation(
            "model.timeout_secs must be in range 1..=300".to_string(),
        ));
    }

    if model.max_tokens == 0 {
        return Err(ConfigError::Validation(
            "model.max_tokens must be greater than zero".to_string(),
        ));
    }

    if !(0.0..=2.0).contains(&model.temperature) {
        return Err(ConfigError::Validation(
            "model.temperature must be in range 0.0..=2.0".to_string(),
        ));
    }

    match model.provider {
        ModelProviderKind::OpenAi | ModelProviderKind::Anthropic => {
            let missing = model
                .api_key
                .as_ref()
                .map(|value| value.expose_secret().trim().is_empty())
                .unwrap_or(true);
            if missing {
                return Err(ConfigError::Validation(
                    "model.api_key is required for openai/anthropic providers (set IGNIS_MODEL_API_KEY)"
                        .to_string(),
                ));
            }
        }
        ModelProviderKind::Ollama => {
            let missing =
                model.base_url.as_ref().map(|value| value.trim().is_empty()).unwrap_or(true);
            if missing {
                return Err(ConfigError::Validation(
                    "model.base_url is required for ollama provider".to_string(),
                ));
            }
        }
    }

    Ok(())
}

fn validate_rate_limit(rate_limit: &RateLimitSettings) -> Result<(), ConfigError> {
    if rate_limit.requests_per_minute == 0 {
        return Err(ConfigError::Validation(
            "rate_limit.requests_per_minute must be greater than zero".to_string(),
        ));
    }

    if rate_limit.tokens_per_minute == 0 {
        return Err(ConfigError::Validation(
            "rate_limit.tokens_per_minute must be greater than zero".to_string(),
        ));
    }

    if rate_limit.window_secs == 0 {
        return Err(ConfigError::Validation(
            "rate_limit.window_secs must be greater than zero".to_string(),
        ));
    }

    if rate_limit.idle_eviction_secs < rate_limit.window_secs {
        return Err(ConfigError::Validation(
            "rate_limit.idle_eviction_secs must not be shorter than rate_limit.window_secs"
                .to_string(),
        ));
    }

    Ok(())
}

fn validate_conversation(conversation: &ConversationConfig) -> Result<(), ConfigError> {
    if conversation.max_tool_iterations == 0 || conversation.max_tool_iterations > 50 {
        return Err(ConfigError::Validation(
            "conversation.max_tool_iterations must be in range 1..=50".to_string(),
        ));
    }

    if conversation.context_token_budget == 0 {
        return Err(ConfigError::Validation(
            "conversation.context_token_budget must be greater than zero".to_string(),
        ));
    }

    if conversation.retained_messages == 0 {
        return Err(ConfigError::Validation(
            "conversation.retained_messages must be greater than zero".to_string(),
        ));
    }

    if conversation.inactivity_timeout_secs == 0 || conversation.sweep_interval_secs == 0 {
        return Err(ConfigError::Validation(
            "conversation.inactivity_timeout_secs and conversation.sweep_interval_secs must be greater than zero"
                .to_string(),
        ));
    }

    Ok(())
}

fn validate_execution(execution: &ExecutionConfig) -> Result<(), ConfigError> {
    if execution.handler_timeout_secs == 0 || execution.handler_timeout_secs > 600 {
        return Err(ConfigError::Validation(
            "execution.handler_timeout_secs must be in range 1..=600".to_string(),
        ));
    }

    Ok(())
}

fn validate_logging(logging: &LoggingConfig) -> Result<(), ConfigError> {
    let level = logging.level.trim().to_ascii_lowercase();
    match level.as_str() {
        "trace" | "debug" | "info" | "warn" | "error" => Ok(()),
        _ => Err(ConfigError::Validation(
            "logging.level must be one of trace|debug|info|warn|error".to_string(),
        )),
    }
}

fn read_env(key: &str) -> Option<String> {
    env::var(key).ok().filter(|value| !value.trim().is_empty())
}

fn invalid(key: &str, value: &str) -> ConfigError {
    ConfigError::InvalidEnvOverride { key: key.to_string(), value: value.to_string() }
}

fn parse_u32(key: &str, value: &str) -> Result<u32, ConfigError> {
    value.trim().parse::<u32>().map_err(|_| invalid(key, value))
}

fn parse_u64(key: &str, value: &str) -> Result<u64, ConfigError> {
    value.trim().parse::<u64>().map_err(|_| invalid(key, value))
}

fn parse_usize(key: &str, value: &str) -> Result<usize, ConfigError> {
    value.trim().parse::<usize>().map_err(|_| invalid(key, value))
}

fn parse_f32(key: &str, value: &str) -> Result<f32, ConfigError> {
    value.trim().parse::<f32>().map_err(|_| invalid(key, value))
}

#[derive(Debug, Default, Deserialize)]
struct ConfigPatch {
    environment: Option<EnvironmentPatch>,
    model: Option<ModelPatch>,
    rate_limit: Option<RateLimitPatch>,
    conversation: Option<ConversationPatch>,
    execution: Option<ExecutionPatch>,
    logging: Option<LoggingPatch>,
}

#[derive(Debug, Default, Deserialize)]
struct EnvironmentPatch {
    mode: Option<EnvironmentMode>,
}

#[derive(Debug, Default, Deserialize)]
struct ModelPatch {
    provider: Option<ModelProviderKind>,
    model: Option<String>,
    api_key: Option<String>,
    base_url: Option<String>,
    max_tokens: Option<u32>,
    temperature: Option<f32>,
    timeout_secs: Option<u64>,
}

#[derive(Debug, Default, Deserialize)]
struct RateLimitPatch {
    requests_per_minute: Option<u32>,
    tokens_per_minute: Option<u64>,
    request_burst: Option<u32>,
    token_burst: Option<u64>,
    window_secs: Option<u64>,
    idle_eviction_secs: Option<u64>,
}

#[derive(Debug, Default, Deserialize)]
struct ConversationPatch {
    max_tool_iterations: Option<u32>,
    context_token_budget: Option<usize>,
    retained_messages: Option<usize>,
    inactivity_timeout_secs: Option<u64>,
    sweep_interval_secs: Option<u64>,
    system_prompt: Option<String>,
}

#[derive(Debug, Default, Deserialize)]
struct ExecutionPatch {
    handler_timeout_secs: Option<u64>,
}

#[derive(Debug, Default, Deserialize)]
struct LoggingPatch {
    level: Option<String>,
    format: Option<LogFormat>,
}

#[cfg(test)]
mod tests {
    use std::env;
    use std::fs;
    use std::io;
    use std::sync::{Mutex, OnceLock};
    use std::time::Duration;

    use secrecy::ExposeSecret;
    use tempfile::TempDir;

    use super::{AppConfig, ConfigError, ConfigOverrides, LoadOptions, LogFormat, ModelProviderKind};
    use crate::policy::EnvironmentMode;

    static ENV_LOCK: OnceLock<Mutex<()>> = OnceLock::new();

    fn env_lock() -> &'static Mutex<()> {
        ENV_LOCK.get_or_init(|| Mutex::new(()))
    }

    fn clear_vars(vars: &[&str]) {
        for var in vars {
            env::remove_var(var);
        }
    }

    fn ensure(condition: bool, message: &'static str) -> Result<(), String> {
        if condition {
            Ok(())
        } else {
            Err(message.to_string())
        }
    }

    #[test]
    fn defaults_match_documented_limits() -> Result<(), String> {
        let config = AppConfig::default();
        config.validate().map_err(|err| err.to_string())?;

        ensure(config.conversation.max_tool_iterations == 10, "ten tool iterations")?;
        ensure(config.conversation.context_token_budget == 100_000, "100k token budget")?;
        ensure(config.conversation.retained_messages == 10, "ten retained messages")?;
        ensure(config.conversation.inactivity_timeout_secs == 3_600, "one hour inactivity")?;
        ensure(config.rate_limit.window_secs == 60, "sixty second window")?;
        ensure(config.rate_limit.idle_eviction_secs == 300, "five minute eviction")?;

        let limits = config.rate_limit.to_rate_limit_config();
        ensure(limits.window == Duration::from_secs(60), "window converts to a duration")?;
        ensure(
            config.execution.handler_timeout() == Duration::from_secs(30),
            "handler timeout converts to a duration",
        )
    }

    #[test]
    fn file_load_supports_env_interpolation() -> Result<(), String> {
        let _guard = env_lock().lock().map_err(|_| "env lock is poisoned".to_string())?;

        env::set_var("TEST_IGNIS_API_KEY", "sk-from-env");

        let result = (|| -> Result<(), String> {
            let dir = TempDir::new().map_err(|err: io::Error| err.to_string())?;
            let path = dir.path().join("ignis.toml");
            fs::write(
                &path,
                r#"
[environment]
mode = "production"

[model]
provider = "anthropic"
model = "claude-sonnet"
api_key = "${TEST_IGNIS_API_KEY}"
"#,
            )
            .map_err(|err| err.to_string())?;

            let config =
                AppConfig::load(LoadOptions { config_path: Some(path), ..LoadOptions::default() })
                    .map_err(|err| format!("config load failed: {err}"))?;

            ensure(
                config.model.api_key.as_ref().map(|key| key.expose_secret().to_string())
                    == Some("sk-from-env".to_string()),
                "api key should be loaded from environment",
            )?;
            ensure(
                config.environment.mode == EnvironmentMode::Production,
                "environment mode should come from the file",
            )?;
            ensure(config.model.provider == ModelProviderKind::Anthropic, "provider from file")
        })();

        clear_vars(&["TEST_IGNIS_API_KEY"]);
        result
    }

    #[test]
    fn logging_env_aliases_are_supported() -> Result<(), String> {
        let _guard = env_lock().lock().map_err(|_| "env lock is poisoned".to_string())?;

        env::set_var("IGNIS_LOG_LEVEL", "warn");
        env::set_var("IGNIS_LOG_FORMAT", "json");

        let result = (|| -> Result<(), String> {
            let config = AppConfig::load(LoadOptions::default())
                .map_err(|err| format!("config load failed: {err}"))?;

            ensure(config.logging.level == "warn", "warning log level should be set from env var")?;
            ensure(
                matches!(config.logging.format, LogFormat::Json),
                "json logging format should be set from env var",
            )
        })();

        clear_vars(&["IGNIS_LOG_LEVEL", "IGNIS_LOG_FORMAT"]);
        result
    }

    #[test]
    fn precedence_defaults_file_env_overrides() -> Result<(), String> {
        let _guard = env_lock().lock().map_err(|_| "env lock is poisoned".to_string())?;

        env::set_var("IGNIS_RATE_LIMIT_REQUESTS_PER_MINUTE", "30");
        env::set_var("IGNIS_CONVERSATION_RETAINED_MESSAGES", "6");
        env::set_var("IGNIS_ENV", "test");

        let result = (|| -> Result<(), String> {
            let dir = TempDir::new().map_err(|err: io::Error| err.to_string())?;
            let path = dir.path().join("ignis.toml");
            fs::write(
                &path,
                r#"
[rate_limit]
requests_per_minute = 20
tokens_per_minute = 5000

[conversation]
retained_messages = 4
max_tool_iterations = 8

[logging]
level = "warn"
"#,
            )
            .map_err(|err| err.to_string())?;

            let config = AppConfig::load(LoadOptions {
                config_path: Some(path),
                overrides: ConfigOverrides {
                    requests_per_minute: Some(45),
                    log_level: Some("debug".to_string()),
                    ..ConfigOverrides::default()
                },
                ..LoadOptions::default()
            })
            .map_err(|err| format!("config load failed: {err}"))?;

            ensure(config.rate_limit.requests_per_minute == 45, "override should win")?;
            ensure(config.rate_limit.tokens_per_minute == 5_000, "file should beat defaults")?;
            ensure(config.conversation.retained_messages == 6, "env should beat file")?;
            ensure(config.conversation.max_tool_iterations == 8, "file value should survive")?;
            ensure(config.environment.mode == EnvironmentMode::Test, "IGNIS_ENV alias applies")?;
            ensure(config.logging.level == "debug", "overridden log level should be debug")
        })();

        clear_vars(&[
            "IGNIS_RATE_LIMIT_REQUESTS_PER_MINUTE",
            "IGNIS_CONVERSATION_RETAINED_MESSAGES",
            "IGNIS_ENV",
        ]);
        result
    }

    #[test]
    fn validation_fails_fast_with_actionable_error() -> Result<(), String> {
        let _guard = env_lock().lock().map_err(|_| "env lock is poisoned".to_string())?;

        env::set_var("IGNIS_MODEL_PROVIDER", "openai");

        let result = (|| -> Result<(), String> {
            let error = match AppConfig::load(LoadOptions::default()) {
                Ok(_) => {
                    return Err("expected validation failure but config load succeeded".to_string())
                }
                Err(error) => error,
            };
            let has_message = matches!(
                error,
                ConfigError::Validation(ref message) if message.contains("model.api_key")
            );
            ensure(has_message, "validation failure should mention model.api_key")
        })();

        clear_vars(&["IGNIS_MODEL_PROVIDER"]);
        result
    }

    #[test]
    fn invalid_numeric_env_is_reported_with_key() -> Result<(), String> {
        let _guard = env_lock().lock().map_err(|_| "env lock is poisoned".to_string())?;

        env::set_var("IGNIS_EXECUTION_HANDLER_TIMEOUT_SECS", "soon");

        let result = match AppConfig::load(LoadOptions::default()) {
            Err(ConfigError::InvalidEnvOverride { key, .. }) => ensure(
                key == "IGNIS_EXECUTION_HANDLER_TIMEOUT_SECS",
                "error should name the offending variable",
            ),
            Err(other) => Err(format!("unexpected error: {other}")),
            Ok(_) => Err("expected invalid override error".to_string()),
        };

        clear_vars(&["IGNIS_EXECUTION_HANDLER_TIMEOUT_SECS"]);
        result
    }

    #[test]
    fn secret_values_are_not_leaked_by_debug() -> Result<(), String> {
        let _guard = env_lock().lock().map_err(|_| "env lock is poisoned".to_string())?;

        env::set_var("IGNIS_MODEL_PROVIDER", "anthropic");
        env::set_var("IGNIS_MODEL_API_KEY", "sk-ant-secret-value");

        let result = (|| -> Result<(), String> {
            let config = AppConfig::load(LoadOptions::default())
                .map_err(|err| format!("config load failed: {err}"))?;
            let debug = format!("{config:?}");

            ensure(!debug.contains("sk-ant-secret-value"), "debug output should not contain key")?;
            ensure(
                matches!(config.logging.format, LogFormat::Compact),
                "default logging format should be compact",
            )
        })();

        clear_vars(&["IGNIS_MODEL_PROVIDER", "IGNIS_MODEL_API_KEY"]);
        result
    }

    #[test]
    fn missing_required_file_is_reported() {
        let error = AppConfig::load(LoadOptions {
            config_path: Some("does-not-exist/ignis.toml".into()),
            require_file: true,
            ..LoadOptions::default()
        });
        assert!(matches!(error, Err(ConfigError::MissingConfigFile(_))));
    }
}

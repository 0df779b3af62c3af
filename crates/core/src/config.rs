use std::env;
use std::fs;
use std::path::{Path, PathBuf};
use std::str::FromStr;

use chrono::Duration as ChronoDuration;
use rust_decimal::Decimal;
use secrecy::{ExposeSecret, SecretString};
use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::ghost::GhostPolicy;
use crate::matching::MatchingConfig;
use crate::scoring::ScoringConfig;

#[derive(Clone, Debug)]
pub struct AppConfig {
    pub database: DatabaseConfig,
    pub extraction: ExtractionConfig,
    pub conversation: ConversationConfig,
    pub matching: MatchingConfig,
    pub scoring: ScoringConfig,
    pub ghost: GhostConfig,
    pub channels: ChannelsConfig,
    pub server: ServerConfig,
    pub logging: LoggingConfig,
}

#[derive(Clone, Debug)]
pub struct DatabaseConfig {
    pub url: String,
    pub max_connections: u32,
    pub timeout_secs: u64,
}

/// Remote intent extraction. Without `base_url` the built-in keyword extractor is used.
#[derive(Clone, Debug)]
pub struct ExtractionConfig {
    pub base_url: Option<String>,
    pub api_key: Option<SecretString>,
    pub timeout_ms: u64,
}

#[derive(Clone, Debug)]
pub struct ConversationConfig {
    pub confidence_threshold: f32,
    pub turn_timeout_ms: u64,
    pub session_ttl_secs: u64,
    pub context_cache_ttl_secs: u64,
}

#[derive(Clone, Debug)]
pub struct GhostConfig {
    pub enabled: bool,
    pub interval_secs: u64,
    pub batch_size: u32,
    pub max_batches_per_cycle: u32,
    pub inactivity_threshold_secs: u64,
    pub max_attempts: u32,
    pub base_delay_ms: u64,
    pub max_delay_ms: u64,
}

#[derive(Clone, Debug)]
pub struct ChannelsConfig {
    /// Relay that forwards outbound messages to the messaging providers.
    pub outbound_url: Option<String>,
    pub outbound_token: Option<SecretString>,
    pub send_timeout_ms: u64,
}

#[derive(Clone, Debug)]
pub struct ServerConfig {
    pub bind_address: String,
    pub port: u16,
    pub graceful_shutdown_secs: u64,
    pub webhook_secret: Option<SecretString>,
}

#[derive(Clone, Debug)]
pub struct LoggingConfig {
    pub level: String,
    pub format: LogFormat,
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
    pub database_url: Option<String>,
    pub log_level: Option<String>,
    pub log_format: Option<LogFormat>,
    pub extraction_base_url: Option<String>,
    pub server_port: Option<u16>,
    pub webhook_secret: Option<String>,
    pub ghost_enabled: Option<bool>,
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
            database: DatabaseConfig {
                url: "sqlite://leadline.db".to_string(),
                max_connections: 5,
                timeout_secs: 30,
            },
            extraction: ExtractionConfig { base_url: None, api_key: None, timeout_ms: 3_000 },
            conversation: ConversationConfig {
                confidence_threshold: 0.6,
                turn_timeout_ms: 10_000,
                session_ttl_secs: 72 * 3_600,
                context_cache_ttl_secs: 15 * 60,
            },
            matching: MatchingConfig::default(),
            scoring: ScoringConfig::default(),
            ghost: GhostConfig {
                enabled: true,
                interval_secs: 300,
                batch_size: 50,
                max_batches_per_cycle: 20,
                inactivity_threshold_secs: 24 * 3_600,
                max_attempts: 3,
                base_delay_ms: 500,
                max_delay_ms: 30_000,
            },
            channels: ChannelsConfig {
                outbound_url: None,
                outbound_token: None,
                send_timeout_ms: 5_000,
            },
            server: ServerConfig {
                bind_address: "127.0.0.1".to_string(),
                port: 8080,
                graceful_shutdown_secs: 15,
                webhook_secret: None,
            },
            logging: LoggingConfig { level: "info".to_string(), format: LogFormat::Compact },
        }
    }
}

impl GhostConfig {
    pub fn policy(&self) -> GhostPolicy {
        let threshold = i64::try_from(self.inactivity_threshold_secs).unwrap_or(i64::MAX);
        GhostPolicy {
            inactivity_threshold: ChronoDuration::try_seconds(threshold)
                .unwrap_or_else(|| ChronoDuration::days(365)),
            batch_size: self.batch_size,
            max_batches_per_cycle: self.max_batches_per_cycle,
        }
    }
}

fn secret_value(value: String) -> SecretString {
    value.into()
}

impl FromStr for LogFormat {
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

impl AppConfig {
    pub fn load(options: LoadOptions) -> Result<Self, ConfigError> {
        let mut config = Self::default();
        let maybe_path = resolve_config_path(options.config_path.as_deref());

        if let Some(path) = maybe_path {
            let patch = read_patch(&path)?;
            config.apply_patch(patch);
        } else if options.require_file {
            let expected = options.config_path.unwrap_or_else(|| PathBuf::from("leadline.toml"));
            return Err(ConfigError::MissingConfigFile(expected));
        }

        config.apply_env_overrides()?;
        config.apply_overrides(options.overrides);
        config.validate()?;

        Ok(config)
    }

    fn apply_patch(&mut self, patch: ConfigPatch) {
        if let Some(database) = patch.database {
            if let Some(url) = database.url {
                self.database.url = url;
            }
            if let Some(max_connections) = database.max_connections {
                self.database.max_connections = max_connections;
            }
            if let Some(timeout_secs) = database.timeout_secs {
                self.database.timeout_secs = timeout_secs;
            }
        }

        if let Some(extraction) = patch.extraction {
            if let Some(base_url) = extraction.base_url {
                self.extraction.base_url = Some(base_url);
            }
            if let Some(api_key_value) = extraction.api_key {
                self.extraction.api_key = Some(secret_value(api_key_value));
            }
            if let Some(timeout_ms) = extraction.timeout_ms {
                self.extraction.timeout_ms = timeout_ms;
            }
        }

        if let Some(conversation) = patch.conversation {
            if let Some(threshold) = conversation.confidence_threshold {
                self.conversation.confidence_threshold = threshold;
            }
            if let Some(turn_timeout_ms) = conversation.turn_timeout_ms {
                self.conversation.turn_timeout_ms = turn_timeout_ms;
            }
            if let Some(session_ttl_secs) = conversation.session_ttl_secs {
                self.conversation.session_ttl_secs = session_ttl_secs;
            }
            if let Some(cache_ttl_secs) = conversation.context_cache_ttl_secs {
                self.conversation.context_cache_ttl_secs = cache_ttl_secs;
            }
        }

        if let Some(matching) = patch.matching {
            self.matching = matching;
        }
        if let Some(scoring) = patch.scoring {
            self.scoring = scoring;
        }

        if let Some(ghost) = patch.ghost {
            if let Some(enabled) = ghost.enabled {
                self.ghost.enabled = enabled;
            }
            if let Some(interval_secs) = ghost.interval_secs {
                self.ghost.interval_secs = interval_secs;
            }
            if let Some(batch_size) = ghost.batch_size {
                self.ghost.batch_size = batch_size;
            }
            if let Some(max_batches) = ghost.max_batches_per_cycle {
                self.ghost.max_batches_per_cycle = max_batches;
            }
            if let Some(threshold) = ghost.inactivity_threshold_secs {
                self.ghost.inactivity_threshold_secs = threshold;
            }
            if let Some(max_attempts) = ghost.max_attempts {
                self.ghost.max_attempts = max_attempts;
            }
            if let Some(base_delay_ms) = ghost.base_delay_ms {
                self.ghost.base_delay_ms = base_delay_ms;
            }
            if let Some(max_delay_ms) = ghost.max_delay_ms {
                self.ghost.max_delay_ms = max_delay_ms;
            }
        }

        if let Some(channels) = patch.channels {
            if let Some(outbound_url) = channels.outbound_url {
                self.channels.outbound_url = Some(outbound_url);
            }
            if let Some(token_value) = channels.outbound_token {
                self.channels.outbound_token = Some(secret_value(token_value));
            }
            if let Some(send_timeout_ms) = channels.send_timeout_ms {
                self.channels.send_timeout_ms = send_timeout_ms;
            }
        }

        if let Some(server) = patch.server {
            if let Some(bind_address) = server.bind_address {
                self.server.bind_address = bind_address;
            }
            if let Some(port) = server.port {
                self.server.port = port;
            }
            if let Some(graceful_shutdown_secs) = server.graceful_shutdown_secs {
                self.server.graceful_shutdown_secs = graceful_shutdown_secs;
            }
            if let Some(secret) = server.webhook_secret {
                self.server.webhook_secret = Some(secret_value(secret));
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
        if let Some(value) = read_env("LEADLINE_DATABASE_URL") {
            self.database.url = value;
        }
        if let Some(value) = read_env("LEADLINE_DATABASE_MAX_CONNECTIONS") {
            self.database.max_connections = parse_env("LEADLINE_DATABASE_MAX_CONNECTIONS", &value)?;
        }
        if let Some(value) = read_env("LEADLINE_DATABASE_TIMEOUT_SECS") {
            self.database.timeout_secs = parse_env("LEADLINE_DATABASE_TIMEOUT_SECS", &value)?;
        }

        if let Some(value) = read_env("LEADLINE_EXTRACTION_BASE_URL") {
            self.extraction.base_url = Some(value);
        }
        if let Some(value) = read_env("LEADLINE_EXTRACTION_API_KEY") {
            self.extraction.api_key = Some(secret_value(value));
        }
        if let Some(value) = read_env("LEADLINE_EXTRACTION_TIMEOUT_MS") {
            self.extraction.timeout_ms = parse_env("LEADLINE_EXTRACTION_TIMEOUT_MS", &value)?;
        }

        if let Some(value) = read_env("LEADLINE_CONVERSATION_CONFIDENCE_THRESHOLD") {
            self.conversation.confidence_threshold =
                parse_env("LEADLINE_CONVERSATION_CONFIDENCE_THRESHOLD", &value)?;
        }
        if let Some(value) = read_env("LEADLINE_CONVERSATION_TURN_TIMEOUT_MS") {
            self.conversation.turn_timeout_ms =
                parse_env("LEADLINE_CONVERSATION_TURN_TIMEOUT_MS", &value)?;
        }
        if let Some(value) = read_env("LEADLINE_CONVERSATION_SESSION_TTL_SECS") {
            self.conversation.session_ttl_secs =
                parse_env("LEADLINE_CONVERSATION_SESSION_TTL_SECS", &value)?;
        }

        if let Some(value) = read_env("LEADLINE_MATCHING_MAX_RESULTS") {
            self.matching.max_results = parse_env("LEADLINE_MATCHING_MAX_RESULTS", &value)?;
        }
        if let Some(value) = read_env("LEADLINE_MATCHING_WIDEN_TOLERANCE") {
            self.matching.widen_tolerance =
                parse_env::<Decimal>("LEADLINE_MATCHING_WIDEN_TOLERANCE", &value)?;
        }

        if let Some(value) = read_env("LEADLINE_GHOST_ENABLED") {
            self.ghost.enabled = parse_env("LEADLINE_GHOST_ENABLED", &value)?;
        }
        if let Some(value) = read_env("LEADLINE_GHOST_INTERVAL_SECS") {
            self.ghost.interval_secs = parse_env("LEADLINE_GHOST_INTERVAL_SECS", &value)?;
        }
        if let Some(value) = read_env("LEADLINE_GHOST_BATCH_SIZE") {
            self.ghost.batch_size = parse_env("LEADLINE_GHOST_BATCH_SIZE", &value)?;
        }
        if let Some(value) = read_env("LEADLINE_GHOST_INACTIVITY_THRESHOLD_SECS") {
            self.ghost.inactivity_threshold_secs =
                parse_env("LEADLINE_GHOST_INACTIVITY_THRESHOLD_SECS", &value)?;
        }
        if let Some(value) = read_env("LEADLINE_GHOST_MAX_ATTEMPTS") {
            self.ghost.max_attempts = parse_env("LEADLINE_GHOST_MAX_ATTEMPTS", &value)?;
        }
        if let Some(value) = read_env("LEADLINE_GHOST_BASE_DELAY_MS") {
            self.ghost.base_delay_ms = parse_env("LEADLINE_GHOST_BASE_DELAY_MS", &value)?;
        }

        if let Some(value) = read_env("LEADLINE_CHANNELS_OUTBOUND_URL") {
            self.channels.outbound_url = Some(value);
        }
        if let Some(value) = read_env("LEADLINE_CHANNELS_OUTBOUND_TOKEN") {
            self.channels.outbound_token = Some(secret_value(value));
        }

        if let Some(value) = read_env("LEADLINE_SERVER_BIND_ADDRESS") {
            self.server.bind_address = value;
        }
        if let Some(value) = read_env("LEADLINE_SERVER_PORT") {
            self.server.port = parse_env("LEADLINE_SERVER_PORT", &value)?;
        }
        if let Some(value) = read_env("LEADLINE_SERVER_GRACEFUL_SHUTDOWN_SECS") {
            self.server.graceful_shutdown_secs =
                parse_env("LEADLINE_SERVER_GRACEFUL_SHUTDOWN_SECS", &value)?;
        }
        if let Some(value) = read_env("LEADLINE_SERVER_WEBHOOK_SECRET") {
            self.server.webhook_secret = Some(secret_value(value));
        }

        let log_level =
            read_env("LEADLINE_LOGGING_LEVEL").or_else(|| read_env("LEADLINE_LOG_LEVEL"));
        if let Some(value) = log_level {
            self.logging.level = value;
        }
        let log_format =
            read_env("LEADLINE_LOGGING_FORMAT").or_else(|| read_env("LEADLINE_LOG_FORMAT"));
        if let Some(value) = log_format {
            self.logging.format = value.parse()?;
        }

        Ok(())
    }

    fn apply_overrides(&mut self, overrides: ConfigOverrides) {
        if let Some(database_url) = overrides.database_url {
            self.database.url = database_url;
        }
        if let Some(log_level) = overrides.log_level {
            self.logging.level = log_level;
        }
        if let Some(log_format) = overrides.log_format {
            self.logging.format = log_format;
        }
        if let Some(base_url) = overrides.extraction_base_url {
            self.extraction.base_url = Some(base_url);
        }
        if let Some(port) = overrides.server_port {
            self.server.port = port;
        }
        if let Some(secret) = overrides.webhook_secret {
            self.server.webhook_secret = Some(secret_value(secret));
        }
        if let Some(enabled) = overrides.ghost_enabled {
            self.ghost.enabled = enabled;
        }
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        validate_database(&self.database)?;
        validate_extraction(&self.extraction)?;
        validate_conversation(&self.conversation)?;
        validate_time_budgets(&self.extraction, &self.conversation)?;
        self.matching.validate().map_err(ConfigError::Validation)?;
        self.scoring.validate().map_err(ConfigError::Validation)?;
        validate_ghost(&self.ghost)?;
        validate_channels(&self.channels)?;
        validate_server(&self.server)?;
        validate_logging(&self.logging)?;
        Ok(())
    }
}

fn resolve_config_path(explicit_path: Option<&Path>) -> Option<PathBuf> {
    if let Some(path) = explicit_path {
        return path.exists().then_some(path.to_path_buf());
    }

    [PathBuf::from("leadline.toml"), PathBuf::from("config/leadline.toml")]
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

fn validate_database(database: &DatabaseConfig) -> Result<(), ConfigError> {
    let url = database.url.trim();
    let sqlite_url =
        url.starts_with("sqlite://") || url.starts_with("sqlite::") || url == ":memory:";
    if !sqlite_url {
        return Err(ConfigError::Validation(
            "database.url must be a sqlite URL (`sqlite://...`, `sqlite::...`, or `:memory:`)"
                .to_string(),
        ));
    }

    if database.max_connections == 0 {
        return Err(ConfigError::Validation(
            "database.max_connections must be greater than zero".to_string(),
        ));
    }

    if database.timeout_secs == 0 || database.timeout_secs > 300 {
        return Err(ConfigError::Validation(
            "database.timeout_secs must be in range 1..=300".to_string(),
        ));
    }

    Ok(())
}

fn validate_extraction(extraction: &ExtractionConfig) -> Result<(), ConfigError> {
    if extraction.timeout_ms == 0 || extraction.timeout_ms > 60_000 {
        return Err(ConfigError::Validation(
            "extraction.timeout_ms must be in range 1..=60000".to_string(),
        ));
    }

    if let Some(base_url) = &extraction.base_url {
        if !base_url.starts_with("http://") && !base_url.starts_with("https://") {
            return Err(ConfigError::Validation(
                "extraction.base_url must start with http:// or https://".to_string(),
            ));
        }
    }

    let blank_key = extraction
        .api_key
        .as_ref()
        .is_some_and(|value| value.expose_secret().trim().is_empty());
    if blank_key {
        return Err(ConfigError::Validation(
            "extraction.api_key is set but empty; remove it or provide a key".to_string(),
        ));
    }

    Ok(())
}

/// Extraction must give up before the turn does, or a slow extractor fails the whole turn.
fn validate_time_budgets(
    extraction: &ExtractionConfig,
    conversation: &ConversationConfig,
) -> Result<(), ConfigError> {
    if extraction.timeout_ms >= conversation.turn_timeout_ms {
        return Err(ConfigError::Validation(format!(
            "extraction.timeout_ms ({}) must be lower than conversation.turn_timeout_ms ({}); \
             raise the turn timeout or shorten the extraction timeout",
            extraction.timeout_ms, conversation.turn_timeout_ms
        )));
    }
    Ok(())
}

fn validate_conversation(conversation: &ConversationConfig) -> Result<(), ConfigError> {
    let threshold = conversation.confidence_threshold;
    if !threshold.is_finite() || !(0.0..=1.0).contains(&threshold) {
        return Err(ConfigError::Validation(
            "conversation.confidence_threshold must be in range 0.0..=1.0".to_string(),
        ));
    }

    if conversation.turn_timeout_ms == 0 {
        return Err(ConfigError::Validation(
            "conversation.turn_timeout_ms must be greater than zero".to_string(),
        ));
    }

    if conversation.session_ttl_secs == 0 || conversation.context_cache_ttl_secs == 0 {
        return Err(ConfigError::Validation(
            "conversation.session_ttl_secs and context_cache_ttl_secs must be greater than zero"
                .to_string(),
        ));
    }

    Ok(())
}

fn validate_ghost(ghost: &GhostConfig) -> Result<(), ConfigError> {
    if ghost.interval_secs == 0 {
        return Err(ConfigError::Validation(
            "ghost.interval_secs must be greater than zero".to_string(),
        ));
    }
    if ghost.batch_size == 0 || ghost.max_batches_per_cycle == 0 {
        return Err(ConfigError::Validation(
            "ghost.batch_size and ghost.max_batches_per_cycle must be greater than zero".to_string(),
        ));
    }
    if ghost.max_attempts == 0 || ghost.max_attempts > 10 {
        return Err(ConfigError::Validation(
            "ghost.max_attempts must be in range 1..=10".to_string(),
        ));
    }
    if ghost.base_delay_ms > ghost.max_delay_ms {
        return Err(ConfigError::Validation(
            "ghost.base_delay_ms must not exceed ghost.max_delay_ms".to_string(),
        ));
    }
    Ok(())
}

fn validate_channels(channels: &ChannelsConfig) -> Result<(), ConfigError> {
    if let Some(url) = &channels.outbound_url {
        if !url.starts_with("http://") && !url.starts_with("https://") {
            return Err(ConfigError::Validation(
                "channels.outbound_url must start with http:// or https://".to_string(),
            ));
        }
        if channels.outbound_token.is_none() {
            return Err(ConfigError::Validation(
                "channels.outbound_token is required when channels.outbound_url is set"
                    .to_string(),
            ));
        }
    }

    if channels.send_timeout_ms == 0 {
        return Err(ConfigError::Validation(
            "channels.send_timeout_ms must be greater than zero".to_string(),
        ));
    }

    Ok(())
}

fn validate_server(server: &ServerConfig) -> Result<(), ConfigError> {
    if server.port == 0 {
        return Err(ConfigError::Validation("server.port must be greater than zero".to_string()));
    }

    if server.graceful_shutdown_secs == 0 {
        return Err(ConfigError::Validation(
            "server.graceful_shutdown_secs must be greater than zero".to_string(),
        ));
    }

    let short_secret = server
        .webhook_secret
        .as_ref()
        .is_some_and(|secret| secret.expose_secret().len() < 16);
    if short_secret {
        return Err(ConfigError::Validation(
            "server.webhook_secret must be at least 16 characters".to_string(),
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

fn parse_env<T: FromStr>(key: &str, value: &str) -> Result<T, ConfigError> {
    value.trim().parse::<T>().map_err(|_| ConfigError::InvalidEnvOverride {
        key: key.to_string(),
        value: value.to_string(),
    })
}

#[derive(Debug, Default, Deserialize)]
struct ConfigPatch {
    database: Option<DatabasePatch>,
    extraction: Option<ExtractionPatch>,
    conversation: Option<ConversationPatch>,
    matching: Option<MatchingConfig>,
    scoring: Option<ScoringConfig>,
    ghost: Option<GhostPatch>,
    channels: Option<ChannelsPatch>,
    server: Option<ServerPatch>,
    logging: Option<LoggingPatch>,
}

#[derive(Debug, Default, Deserialize)]
struct DatabasePatch {
    url: Option<String>,
    max_connections: Option<u32>,
    timeout_secs: Option<u64>,
}

#[derive(Debug, Default, Deserialize)]
struct ExtractionPatch {
    base_url: Option<String>,
    api_key: Option<String>,
    timeout_ms: Option<u64>,
}

#[derive(Debug, Default, Deserialize)]
struct ConversationPatch {
    confidence_threshold: Option<f32>,
    turn_timeout_ms: Option<u64>,
    session_ttl_secs: Option<u64>,
    context_cache_ttl_secs: Option<u64>,
}

#[derive(Debug, Default, Deserialize)]
struct GhostPatch {
    enabled: Option<bool>,
    interval_secs: Option<u64>,
    batch_size: Option<u32>,
    max_batches_per_cycle: Option<u32>,
    inactivity_threshold_secs: Option<u64>,
    max_attempts: Option<u32>,
    base_delay_ms: Option<u64>,
    max_delay_ms: Option<u64>,
}

#[derive(Debug, Default, Deserialize)]
struct ChannelsPatch {
    outbound_url: Option<String>,
    outbound_token: Option<String>,
    send_timeout_ms: Option<u64>,
}

#[derive(Debug, Default, Deserialize)]
struct ServerPatch {
    bind_address: Option<String>,
    port: Option<u16>,
    graceful_shutdown_secs: Option<u64>,
    webhook_secret: Option<String>,
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

    use rust_decimal::Decimal;
    use secrecy::ExposeSecret;
    use tempfile::TempDir;

    use super::{AppConfig, ConfigError, ConfigOverrides, LoadOptions, LogFormat};

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
    fn defaults_are_valid() {
        let config = AppConfig::default();
        assert!(config.validate().is_ok());
        assert_eq!(config.matching.widen_tolerance, Decimal::new(20, 2));
        assert_eq!(config.ghost.max_attempts, 3);
        assert!((config.conversation.confidence_threshold - 0.6).abs() < f32::EPSILON);
    }

    #[test]
    fn file_load_supports_env_interpolation() -> Result<(), String> {
        let _guard = env_lock().lock().map_err(|_| "env lock is poisoned".to_string())?;

        env::set_var("TEST_LEADLINE_WEBHOOK_SECRET", "0123456789abcdef-from-env");
        env::set_var("TEST_LEADLINE_RELAY_TOKEN", "relay-token-from-env");

        let result = (|| -> Result<(), String> {
            let dir = TempDir::new().map_err(|err: io::Error| err.to_string())?;
            let path = dir.path().join("leadline.toml");
            fs::write(
                &path,
                r#"
[server]
webhook_secret = "${TEST_LEADLINE_WEBHOOK_SECRET}"

[channels]
outbound_url = "https://relay.example.com/send"
outbound_token = "${TEST_LEADLINE_RELAY_TOKEN}"
"#,
            )
            .map_err(|err| err.to_string())?;

            let config =
                AppConfig::load(LoadOptions { config_path: Some(path), ..LoadOptions::default() })
                    .map_err(|err| format!("config load failed: {err}"))?;

            ensure(
                config.server.webhook_secret.as_ref().map(|secret| secret.expose_secret())
                    == Some("0123456789abcdef-from-env"),
                "webhook secret should be loaded from environment",
            )?;
            ensure(
                config.channels.outbound_token.as_ref().map(|token| token.expose_secret())
                    == Some("relay-token-from-env"),
                "relay token should be loaded from environment",
            )?;
            Ok(())
        })();

        clear_vars(&["TEST_LEADLINE_WEBHOOK_SECRET", "TEST_LEADLINE_RELAY_TOKEN"]);
        result
    }

    #[test]
    fn tuning_sections_parse_from_file() -> Result<(), String> {
        let _guard = env_lock().lock().map_err(|_| "env lock is poisoned".to_string())?;

        let dir = TempDir::new().map_err(|err: io::Error| err.to_string())?;
        let path = dir.path().join("leadline.toml");
        fs::write(
            &path,
            r#"
[conversation]
confidence_threshold = 0.75

[matching]
max_results = 3
widen_tolerance = "0.10"

[scoring]
urgency_points = 15

[ghost]
inactivity_threshold_secs = 7200
batch_size = 10
"#,
        )
        .map_err(|err| err.to_string())?;

        let config =
            AppConfig::load(LoadOptions { config_path: Some(path), ..LoadOptions::default() })
                .map_err(|err| format!("config load failed: {err}"))?;

        ensure(config.matching.max_results == 3, "max results from file")?;
        ensure(config.matching.widen_tolerance == Decimal::new(10, 2), "tolerance from file")?;
        ensure(config.scoring.urgency_points == 15, "urgency points from file")?;
        ensure(config.scoring.consultation_points == 30, "unspecified weights keep defaults")?;
        ensure(config.ghost.batch_size == 10, "ghost batch size from file")?;
        ensure(
            config.ghost.policy().inactivity_threshold == chrono::Duration::hours(2),
            "ghost policy uses configured threshold",
        )?;
        ensure(
            (config.conversation.confidence_threshold - 0.75).abs() < f32::EPSILON,
            "confidence threshold from file",
        )
    }

    #[test]
    fn logging_env_aliases_are_supported() -> Result<(), String> {
        let _guard = env_lock().lock().map_err(|_| "env lock is poisoned".to_string())?;

        env::set_var("LEADLINE_LOG_LEVEL", "warn");
        env::set_var("LEADLINE_LOG_FORMAT", "pretty");

        let result = (|| -> Result<(), String> {
            let config = AppConfig::load(LoadOptions::default())
                .map_err(|err| format!("config load failed: {err}"))?;

            ensure(config.logging.level == "warn", "warning log level should be set from env var")?;
            ensure(
                matches!(config.logging.format, LogFormat::Pretty),
                "pretty logging format should be set from env var",
            )?;
            Ok(())
        })();

        clear_vars(&["LEADLINE_LOG_LEVEL", "LEADLINE_LOG_FORMAT"]);
        result
    }

    #[test]
    fn precedence_defaults_file_env_overrides() -> Result<(), String> {
        let _guard = env_lock().lock().map_err(|_| "env lock is poisoned".to_string())?;

        env::set_var("LEADLINE_DATABASE_URL", "sqlite://from-env.db");
        env::set_var("LEADLINE_GHOST_BATCH_SIZE", "25");

        let result = (|| -> Result<(), String> {
            let dir = TempDir::new().map_err(|err: io::Error| err.to_string())?;
            let path = dir.path().join("leadline.toml");
            fs::write(
                &path,
                r#"
[database]
url = "sqlite://from-file.db"

[ghost]
batch_size = 5
interval_secs = 60

[logging]
level = "warn"
"#,
            )
            .map_err(|err| err.to_string())?;

            let config = AppConfig::load(LoadOptions {
                config_path: Some(path),
                overrides: ConfigOverrides {
                    database_url: Some("sqlite://from-override.db".to_string()),
                    log_level: Some("debug".to_string()),
                    ..ConfigOverrides::default()
                },
                ..LoadOptions::default()
            })
            .map_err(|err| format!("config load failed: {err}"))?;

            ensure(
                config.database.url == "sqlite://from-override.db",
                "override database url should win",
            )?;
            ensure(config.logging.level == "debug", "overridden log level should be debug")?;
            ensure(config.ghost.batch_size == 25, "env batch size should win over file")?;
            ensure(config.ghost.interval_secs == 60, "file interval should win over defaults")?;
            Ok(())
        })();

        clear_vars(&["LEADLINE_DATABASE_URL", "LEADLINE_GHOST_BATCH_SIZE"]);
        result
    }

    #[test]
    fn invalid_env_value_is_reported_with_its_key() -> Result<(), String> {
        let _guard = env_lock().lock().map_err(|_| "env lock is poisoned".to_string())?;

        env::set_var("LEADLINE_GHOST_MAX_ATTEMPTS", "three");

        let result = match AppConfig::load(LoadOptions::default()) {
            Ok(_) => Err("expected env parse failure".to_string()),
            Err(ConfigError::InvalidEnvOverride { key, .. }) => {
                ensure(key == "LEADLINE_GHOST_MAX_ATTEMPTS", "error should name the variable")
            }
            Err(other) => Err(format!("unexpected error: {other}")),
        };

        clear_vars(&["LEADLINE_GHOST_MAX_ATTEMPTS"]);
        result
    }

    #[test]
    fn validation_fails_fast_with_actionable_error() -> Result<(), String> {
        let _guard = env_lock().lock().map_err(|_| "env lock is poisoned".to_string())?;

        env::set_var("LEADLINE_CHANNELS_OUTBOUND_URL", "https://relay.example.com/send");

        let result = (|| -> Result<(), String> {
            let error = match AppConfig::load(LoadOptions::default()) {
                Ok(_) => {
                    return Err("expected validation failure but config load succeeded".to_string())
                }
                Err(error) => error,
            };
            let has_message = matches!(
                error,
                ConfigError::Validation(ref message) if message.contains("channels.outbound_token")
            );
            ensure(has_message, "validation failure should mention channels.outbound_token")
        })();

        clear_vars(&["LEADLINE_CHANNELS_OUTBOUND_URL"]);
        result
    }

    #[test]
    fn extraction_timeout_must_fit_inside_the_turn_timeout() -> Result<(), String> {
        let _guard = env_lock().lock().map_err(|_| "env lock is poisoned".to_string())?;

        env::set_var("LEADLINE_EXTRACTION_TIMEOUT_MS", "30000");
        env::set_var("LEADLINE_CONVERSATION_TURN_TIMEOUT_MS", "10000");

        let result = (|| -> Result<(), String> {
            let error = match AppConfig::load(LoadOptions::default()) {
                Ok(_) => return Err("a 30s extraction inside a 10s turn must be rejected".to_string()),
                Err(error) => error,
            };
            ensure(
                matches!(
                    error,
                    ConfigError::Validation(ref message)
                        if message.contains("extraction.timeout_ms (30000)")
                            && message.contains("conversation.turn_timeout_ms (10000)")
                ),
                "validation failure should name both timeouts",
            )?;

            env::set_var("LEADLINE_EXTRACTION_TIMEOUT_MS", "10000");
            ensure(
                AppConfig::load(LoadOptions::default()).is_err(),
                "equal timeouts leave no room for the fallback reply",
            )?;

            env::set_var("LEADLINE_EXTRACTION_TIMEOUT_MS", "9999");
            ensure(
                AppConfig::load(LoadOptions::default()).is_ok(),
                "an extraction timeout below the turn timeout is valid",
            )
        })();

        clear_vars(&["LEADLINE_EXTRACTION_TIMEOUT_MS", "LEADLINE_CONVERSATION_TURN_TIMEOUT_MS"]);
        result
    }

    #[test]
    fn secret_values_are_not_leaked_by_debug() -> Result<(), String> {
        let _guard = env_lock().lock().map_err(|_| "env lock is poisoned".to_string())?;

        env::set_var("LEADLINE_EXTRACTION_API_KEY", "sk-extraction-secret-value");
        env::set_var("LEADLINE_SERVER_WEBHOOK_SECRET", "webhook-secret-value-0042");

        let result = (|| -> Result<(), String> {
            let config = AppConfig::load(LoadOptions::default())
                .map_err(|err| format!("config load failed: {err}"))?;
            let debug = format!("{config:?}");

            ensure(
                !debug.contains("sk-extraction-secret-value"),
                "debug output should not contain the extraction key",
            )?;
            ensure(
                !debug.contains("webhook-secret-value-0042"),
                "debug output should not contain the webhook secret",
            )?;
            ensure(
                matches!(config.logging.format, LogFormat::Compact),
                "default logging format should be compact",
            )?;
            Ok(())
        })();

        clear_vars(&["LEADLINE_EXTRACTION_API_KEY", "LEADLINE_SERVER_WEBHOOK_SECRET"]);
        result
    }
}

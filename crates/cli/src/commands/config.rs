use std::env;
use std::fs;
use std::path::{Path, PathBuf};

use leadline_core::config::AppConfig;
use secrecy::{ExposeSecret, SecretString};
use toml::Value;

use crate::commands::load_config;

pub fn run(config_path: Option<&Path>) -> String {
    let config = match load_config(config_path) {
        Ok(config) => config,
        Err(error) => return format!("config validation failed: {error}"),
    };

    let config_file_path = detect_config_path(config_path);
    let config_file_doc = load_config_file_doc(config_file_path.as_deref());

    let mut lines = vec!["effective config (source precedence: env > file > default):".to_string()];
    for (key_path, value, env_key) in effective_values(&config) {
        let source = field_source(
            key_path,
            env_key,
            config_file_doc.as_ref(),
            config_file_path.as_deref(),
        );
        lines.push(render_line(key_path, &value, source));
    }

    lines.join("\n")
}

fn effective_values(config: &AppConfig) -> Vec<(&'static str, String, Option<&'static str>)> {
    let optional = |value: &Option<String>| value.clone().unwrap_or_else(|| "<unset>".to_string());

    vec![
        ("database.url", config.database.url.clone(), Some("LEADLINE_DATABASE_URL")),
        (
            "database.max_connections",
            config.database.max_connections.to_string(),
            Some("LEADLINE_DATABASE_MAX_CONNECTIONS"),
        ),
        (
            "database.timeout_secs",
            config.database.timeout_secs.to_string(),
            Some("LEADLINE_DATABASE_TIMEOUT_SECS"),
        ),
        (
            "extraction.base_url",
            optional(&config.extraction.base_url),
            Some("LEADLINE_EXTRACTION_BASE_URL"),
        ),
        (
            "extraction.api_key",
            redact_secret(config.extraction.api_key.as_ref()),
            Some("LEADLINE_EXTRACTION_API_KEY"),
        ),
        (
            "extraction.timeout_ms",
            config.extraction.timeout_ms.to_string(),
            Some("LEADLINE_EXTRACTION_TIMEOUT_MS"),
        ),
        (
            "conversation.confidence_threshold",
            config.conversation.confidence_threshold.to_string(),
            Some("LEADLINE_CONVERSATION_CONFIDENCE_THRESHOLD"),
        ),
        (
            "conversation.turn_timeout_ms",
            config.conversation.turn_timeout_ms.to_string(),
            Some("LEADLINE_CONVERSATION_TURN_TIMEOUT_MS"),
        ),
        (
            "conversation.session_ttl_secs",
            config.conversation.session_ttl_secs.to_string(),
            Some("LEADLINE_CONVERSATION_SESSION_TTL_SECS"),
        ),
        (
            "matching.max_results",
            config.matching.max_results.to_string(),
            Some("LEADLINE_MATCHING_MAX_RESULTS"),
        ),
        (
            "matching.widen_tolerance",
            config.matching.widen_tolerance.to_string(),
            Some("LEADLINE_MATCHING_WIDEN_TOLERANCE"),
        ),
        ("ghost.enabled", config.ghost.enabled.to_string(), Some("LEADLINE_GHOST_ENABLED")),
        (
            "ghost.interval_secs",
            config.ghost.interval_secs.to_string(),
            Some("LEADLINE_GHOST_INTERVAL_SECS"),
        ),
        ("ghost.batch_size", config.ghost.batch_size.to_string(), Some("LEADLINE_GHOST_BATCH_SIZE")),
        (
            "ghost.inactivity_threshold_secs",
            config.ghost.inactivity_threshold_secs.to_string(),
            Some("LEADLINE_GHOST_INACTIVITY_THRESHOLD_SECS"),
        ),
        (
            "ghost.max_attempts",
            config.ghost.max_attempts.to_string(),
            Some("LEADLINE_GHOST_MAX_ATTEMPTS"),
        ),
        (
            "channels.outbound_url",
            optional(&config.channels.outbound_url),
            Some("LEADLINE_CHANNELS_OUTBOUND_URL"),
        ),
        (
            "channels.outbound_token",
            redact_secret(config.channels.outbound_token.as_ref()),
            Some("LEADLINE_CHANNELS_OUTBOUND_TOKEN"),
        ),
        ("channels.send_timeout_ms", config.channels.send_timeout_ms.to_string(), None),
        (
            "server.bind_address",
            config.server.bind_address.clone(),
            Some("LEADLINE_SERVER_BIND_ADDRESS"),
        ),
        ("server.port", config.server.port.to_string(), Some("LEADLINE_SERVER_PORT")),
        (
            "server.webhook_secret",
            redact_secret(config.server.webhook_secret.as_ref()),
            Some("LEADLINE_SERVER_WEBHOOK_SECRET"),
        ),
        ("logging.level", config.logging.level.clone(), Some("LEADLINE_LOGGING_LEVEL")),
        (
            "logging.format",
            format!("{:?}", config.logging.format),
            Some("LEADLINE_LOGGING_FORMAT"),
        ),
    ]
}

fn detect_config_path(explicit: Option<&Path>) -> Option<PathBuf> {
    if let Some(path) = explicit {
        return path.exists().then(|| path.to_path_buf());
    }

    [PathBuf::from("leadline.toml"), PathBuf::from("config/leadline.toml")]
        .into_iter()
        .find(|path| path.exists())
}

fn load_config_file_doc(path: Option<&Path>) -> Option<Value> {
    let path = path?;
    let raw = fs::read_to_string(path).ok()?;
    raw.parse::<Value>().ok()
}

fn field_source(
    key_path: &str,
    env_key: Option<&str>,
    config_file_doc: Option<&Value>,
    config_file_path: Option<&Path>,
) -> String {
    if let Some(env_key) = env_key {
        if env::var_os(env_key).is_some() {
            return format!("env ({env_key})");
        }
    }

    if let Some(doc) = config_file_doc {
        if contains_path(doc, key_path) {
            let file_path = config_file_path
                .map(|path| path.display().to_string())
                .unwrap_or_else(|| "config file".to_string());
            return format!("file ({file_path})");
        }
    }

    "default".to_string()
}

fn contains_path(root: &Value, key_path: &str) -> bool {
    let mut current = root;
    for key in key_path.split('.') {
        let Some(next) = current.get(key) else {
            return false;
        };
        current = next;
    }
    true
}

fn render_line(key: &str, value: &str, source: String) -> String {
    format!("- {key} = {value} (source: {source})")
}

/// Shows at most a four character prefix of a secret.
fn redact_secret(secret: Option<&SecretString>) -> String {
    let Some(secret) = secret else {
        return "<unset>".to_string();
    };
    let trimmed = secret.expose_secret().trim();
    if trimmed.is_empty() {
        return "<empty>".to_string();
    }
    if trimmed.chars().count() <= 8 {
        return "<redacted>".to_string();
    }
    let prefix = trimmed.chars().take(4).collect::<String>();
    format!("{prefix}***")
}

#[cfg(test)]
mod tests {
    use secrecy::SecretString;
    use toml::Value;

    use super::{contains_path, redact_secret};

    #[test]
    fn secrets_never_render_in_full() {
        let long = SecretString::from("sk-extraction-secret-value".to_string());
        let short = SecretString::from("abc123".to_string());

        assert_eq!(redact_secret(Some(&long)), "sk-e***");
        assert_eq!(redact_secret(Some(&short)), "<redacted>");
        assert_eq!(redact_secret(None), "<unset>");
    }

    #[test]
    fn nested_keys_are_found_in_the_file_document() {
        let doc: Value = "[ghost]\nbatch_size = 25\n".parse().expect("toml");
        assert!(contains_path(&doc, "ghost.batch_size"));
        assert!(!contains_path(&doc, "ghost.max_attempts"));
        assert!(!contains_path(&doc, "server.port"));
    }
}

use std::env;
use std::fs;
use std::path::{Path, PathBuf};

use parley_core::config::{AppConfig, LoadOptions};
use secrecy::ExposeSecret;
use toml::Value;

struct Field {
    key: &'static str,
    value: String,
    env_keys: &'static [&'static str],
}

fn field(key: &'static str, value: String, env_keys: &'static [&'static str]) -> Field {
    Field { key, value, env_keys }
}

pub fn run() -> String {
    let config = match AppConfig::load(LoadOptions::default()) {
        Ok(config) => config,
        Err(error) => return format!("config validation failed: {error}"),
    };

    let config_file_path = detect_config_path();
    let config_file_doc = load_config_file_doc(config_file_path.as_deref());

    let api_key = config
        .llm
        .api_key
        .as_ref()
        .map(|key| redact_token(key.expose_secret()))
        .unwrap_or_else(|| "<unset>".to_string());

    let database = &config.database;
    let llm = &config.llm;
    let quota = &config.quota;
    let fields = vec![
        field("database.url", database.url.clone(), &["PARLEY_DATABASE_URL"]),
        field(
            "database.max_connections",
            database.max_connections.to_string(),
            &["PARLEY_DATABASE_MAX_CONNECTIONS"],
        ),
        field(
            "database.timeout_secs",
            database.timeout_secs.to_string(),
            &["PARLEY_DATABASE_TIMEOUT_SECS"],
        ),
        field("llm.provider", format!("{:?}", llm.provider), &["PARLEY_LLM_PROVIDER"]),
        field("llm.model", llm.model.clone(), &["PARLEY_LLM_MODEL"]),
        field("llm.embedding_model", llm.embedding_model.clone(), &["PARLEY_LLM_EMBEDDING_MODEL"]),
        field("llm.base_url", llm.effective_base_url(), &["PARLEY_LLM_BASE_URL"]),
        field("llm.api_key", api_key, &["PARLEY_LLM_API_KEY"]),
        field("llm.timeout_secs", llm.timeout_secs.to_string(), &["PARLEY_LLM_TIMEOUT_SECS"]),
        field(
            "server.bind_address",
            config.server.bind_address.clone(),
            &["PARLEY_SERVER_BIND_ADDRESS"],
        ),
        field("server.port", config.server.port.to_string(), &["PARLEY_SERVER_PORT"]),
        field(
            "server.trust_forwarded_for",
            config.server.trust_forwarded_for.to_string(),
            &["PARLEY_SERVER_TRUST_FORWARDED_FOR"],
        ),
        field(
            "quota.daily_message_cap",
            quota.daily_message_cap.to_string(),
            &["PARLEY_QUOTA_DAILY_MESSAGE_CAP"],
        ),
        field(
            "quota.daily_token_cap",
            quota.daily_token_cap.to_string(),
            &["PARLEY_QUOTA_DAILY_TOKEN_CAP"],
        ),
        field(
            "quota.ip_requests_per_window",
            quota.ip_requests_per_window.to_string(),
            &["PARLEY_QUOTA_IP_REQUESTS_PER_WINDOW"],
        ),
        field(
            "quota.ip_window_secs",
            quota.ip_window_secs.to_string(),
            &["PARLEY_QUOTA_IP_WINDOW_SECS"],
        ),
        field("cache.ttl_secs", config.cache.ttl_secs.to_string(), &["PARLEY_CACHE_TTL_SECS"]),
        field("cache.key_chars", config.cache.key_chars.to_string(), &["PARLEY_CACHE_KEY_CHARS"]),
        field(
            "logging.level",
            config.logging.level.clone(),
            &["PARLEY_LOGGING_LEVEL", "PARLEY_LOG_LEVEL"],
        ),
        field(
            "logging.format",
            format!("{:?}", config.logging.format),
            &["PARLEY_LOGGING_FORMAT", "PARLEY_LOG_FORMAT"],
        ),
    ];

    let mut lines = vec!["effective config (source precedence: env > file > default):".to_string()];
    for Field { key, value, env_keys } in fields {
        let source =
            field_source(key, env_keys, config_file_doc.as_ref(), config_file_path.as_deref());
        lines.push(render_line(key, &value, source));
    }
    lines.join("\n")
}

fn detect_config_path() -> Option<PathBuf> {
    [PathBuf::from("parley.toml"), PathBuf::from("config/parley.toml")]
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
    env_keys: &[&str],
    config_file_doc: Option<&Value>,
    config_file_path: Option<&Path>,
) -> String {
    if let Some(env_key) = env_keys.iter().find(|key| env::var_os(key).is_some()) {
        return format!("env ({env_key})");
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

/// Keeps a short recognizable prefix such as `sk-` and hides the rest.
fn redact_token(token: &str) -> String {
    let trimmed = token.trim();
    if trimmed.is_empty() {
        return "<empty>".to_string();
    }

    if let Some((prefix, _)) = trimmed.split_once('-') {
        if prefix.len() <= 4 {
            return format!("{prefix}-***");
        }
    }

    "<redacted>".to_string()
}

#[cfg(test)]
mod tests {
    use toml::Value;

    use super::{contains_path, redact_token};

    #[test]
    fn redaction_keeps_only_short_prefixes() {
        assert_eq!(redact_token("sk-live-abcdef"), "sk-***");
        assert_eq!(redact_token("averylongsecret-value"), "<redacted>");
        assert_eq!(redact_token("   "), "<empty>");
    }

    #[test]
    fn nested_paths_are_found_in_file_documents() {
        let doc: Value = "[quota]\ndaily_message_cap = 10\n".parse().expect("toml");
        assert!(contains_path(&doc, "quota.daily_message_cap"));
        assert!(!contains_path(&doc, "quota.daily_token_cap"));
        assert!(!contains_path(&doc, "cache.ttl_secs"));
    }
}

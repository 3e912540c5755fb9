use std::env;
use std::fs;
use std::path::Path;
use std::sync::{Mutex, OnceLock};

use parley_cli::commands::{doctor, import, migrate};
use serde_json::Value;

const BUNDLE: &str = r#"{
    "bot": {"id": "shop-1", "name": "Shop helper", "bot_type": "support", "plan": "starter"},
    "qa_entries": [
        {"question": "Do you ship abroad?", "answer": "Yes, within the EU.", "verified": true}
    ],
    "knowledge_chunks": [
        {"title": "Returns", "content": "Returns are free within 30 days.", "embedding": [0.3, 0.4]}
    ]
}"#;

#[test]
fn migrate_returns_success_with_valid_env() {
    with_env(&[("PARLEY_DATABASE_URL", "sqlite::memory:")], || {
        let result = migrate::run();
        assert_eq!(result.exit_code, 0, "expected successful migrate run");

        let payload = parse_payload(&result.output);
        assert_eq!(payload["command"], "migrate");
        assert_eq!(payload["status"], "ok");
    });
}

#[test]
fn migrate_returns_config_failure_for_invalid_quota() {
    with_env(
        &[
            ("PARLEY_DATABASE_URL", "sqlite::memory:"),
            ("PARLEY_QUOTA_IP_REQUESTS_PER_WINDOW", "0"),
        ],
        || {
            let result = migrate::run();
            assert_eq!(result.exit_code, 2, "expected config validation failure code");

            let payload = parse_payload(&result.output);
            assert_eq!(payload["status"], "error");
            assert_eq!(payload["error_class"], "config_validation");
        },
    );
}

#[test]
fn import_loads_bundle_into_file_database_and_doctor_sees_schema() {
    let dir = tempfile::tempdir().expect("temp dir");
    let bundle_path = dir.path().join("shop.json");
    fs::write(&bundle_path, BUNDLE).expect("write bundle");
    let database_url = file_database_url(&dir.path().join("parley.db"));

    with_env(&[("PARLEY_DATABASE_URL", database_url.as_str())], || {
        let first = import::run(&bundle_path);
        assert_eq!(first.exit_code, 0, "expected import success: {}", first.output);
        let payload = parse_payload(&first.output);
        assert_eq!(payload["command"], "import");
        assert_eq!(
            payload["message"],
            "imported bot `shop-1` with 1 qa entries and 1 knowledge chunks"
        );

        let second = import::run(&bundle_path);
        assert_eq!(second.exit_code, 0, "re-import should update in place");

        let report: Value = serde_json::from_str(&doctor::run(true)).expect("doctor json");
        assert_eq!(report["overall_status"], "pass");
        let schema = report["checks"]
            .as_array()
            .and_then(|checks| checks.iter().find(|check| check["name"] == "database_schema"))
            .cloned()
            .unwrap_or(Value::Null);
        assert_eq!(schema["status"], "pass");
    });
}

#[test]
fn import_reports_missing_and_malformed_bundles() {
    let dir = tempfile::tempdir().expect("temp dir");
    let malformed = dir.path().join("broken.json");
    fs::write(&malformed, "{\"bot\": ").expect("write bundle");

    with_env(&[("PARLEY_DATABASE_URL", "sqlite::memory:")], || {
        let missing = import::run(&dir.path().join("absent.json"));
        assert_eq!(missing.exit_code, 6);
        assert_eq!(parse_payload(&missing.output)["error_class"], "bundle_read");

        let broken = import::run(&malformed);
        assert_eq!(broken.exit_code, 7);
        assert_eq!(parse_payload(&broken.output)["error_class"], "bundle_parse");
    });
}

#[test]
fn doctor_flags_unmigrated_database() {
    with_env(&[("PARLEY_DATABASE_URL", "sqlite::memory:")], || {
        let report: Value = serde_json::from_str(&doctor::run(true)).expect("doctor json");

        assert_eq!(report["overall_status"], "fail");
        let statuses: Vec<(String, String)> = report["checks"]
            .as_array()
            .map(|checks| {
                checks
                    .iter()
                    .map(|check| {
                        (
                            check["name"].as_str().unwrap_or_default().to_string(),
                            check["status"].as_str().unwrap_or_default().to_string(),
                        )
                    })
                    .collect()
            })
            .unwrap_or_default();
        assert!(statuses.contains(&("config_validation".to_string(), "pass".to_string())));
        assert!(statuses.contains(&("database_connectivity".to_string(), "pass".to_string())));
        assert!(statuses.contains(&("database_schema".to_string(), "fail".to_string())));
    });
}

fn file_database_url(path: &Path) -> String {
    format!("sqlite://{}?mode=rwc", path.display())
}

fn parse_payload(output: &str) -> Value {
    serde_json::from_str(output).expect("command output should be valid JSON")
}

fn with_env(vars: &[(&str, &str)], test_fn: impl FnOnce()) {
    static ENV_LOCK: OnceLock<Mutex<()>> = OnceLock::new();
    let _guard =
        ENV_LOCK.get_or_init(|| Mutex::new(())).lock().expect("env mutex should not be poisoned");

    let keys = [
        "PARLEY_DATABASE_URL",
        "PARLEY_DATABASE_MAX_CONNECTIONS",
        "PARLEY_DATABASE_TIMEOUT_SECS",
        "PARLEY_LLM_PROVIDER",
        "PARLEY_LLM_API_KEY",
        "PARLEY_LLM_BASE_URL",
        "PARLEY_LLM_MODEL",
        "PARLEY_LLM_EMBEDDING_MODEL",
        "PARLEY_LLM_TIMEOUT_SECS",
        "PARLEY_SERVER_BIND_ADDRESS",
        "PARLEY_SERVER_PORT",
        "PARLEY_SERVER_GRACEFUL_SHUTDOWN_SECS",
        "PARLEY_SERVER_TRUST_FORWARDED_FOR",
        "PARLEY_QUOTA_DAILY_MESSAGE_CAP",
        "PARLEY_QUOTA_DAILY_TOKEN_CAP",
        "PARLEY_QUOTA_IP_REQUESTS_PER_WINDOW",
        "PARLEY_QUOTA_IP_WINDOW_SECS",
        "PARLEY_CACHE_TTL_SECS",
        "PARLEY_CACHE_KEY_CHARS",
        "PARLEY_LOGGING_LEVEL",
        "PARLEY_LOGGING_FORMAT",
        "PARLEY_LOG_LEVEL",
        "PARLEY_LOG_FORMAT",
    ];

    let previous_values: Vec<(&str, Option<String>)> =
        keys.iter().map(|key| (*key, env::var(key).ok())).collect();

    for key in &keys {
        env::remove_var(key);
    }
    for (key, value) in vars {
        env::set_var(key, value);
    }

    test_fn();

    for (key, value) in previous_values {
        if let Some(value) = value {
            env::set_var(key, value);
        } else {
            env::remove_var(key);
        }
    }
}

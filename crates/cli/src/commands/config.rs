use std::env;
use std::fs;
use std::path::Path;

use forecourt_core::config::{resolve_config_path, AppConfig, LoadOptions};
use toml::Value;

pub fn run() -> String {
    let config = match AppConfig::load(LoadOptions::default()) {
        Ok(config) => config,
        Err(error) => return format!("config validation failed: {error}"),
    };

    let config_file_path = resolve_config_path(None);
    let config_file_doc = load_config_file_doc(config_file_path.as_deref());
    let source = |key_path: &str, env_keys: &[&str]| {
        field_source(key_path, env_keys, config_file_doc.as_ref(), config_file_path.as_deref())
    };

    let entries = [
        ("database.url", config.database.url.clone(), &["FORECOURT_DATABASE_URL"][..]),
        (
            "database.max_connections",
            config.database.max_connections.to_string(),
            &["FORECOURT_DATABASE_MAX_CONNECTIONS"][..],
        ),
        (
            "database.timeout_secs",
            config.database.timeout_secs.to_string(),
            &["FORECOURT_DATABASE_TIMEOUT_SECS"][..],
        ),
        (
            "server.bind_address",
            config.server.bind_address.clone(),
            &["FORECOURT_SERVER_BIND_ADDRESS"][..],
        ),
        ("server.port", config.server.port.to_string(), &["FORECOURT_SERVER_PORT"][..]),
        (
            "server.graceful_shutdown_secs",
            config.server.graceful_shutdown_secs.to_string(),
            &["FORECOURT_SERVER_GRACEFUL_SHUTDOWN_SECS"][..],
        ),
        (
            "inventory.discrepancy_tolerance_litres",
            config.inventory.discrepancy_tolerance_litres.to_string(),
            &["FORECOURT_INVENTORY_DISCREPANCY_TOLERANCE_LITRES"][..],
        ),
        (
            "inventory.low_stock_ratio",
            config.inventory.low_stock_ratio.to_string(),
            &["FORECOURT_INVENTORY_LOW_STOCK_RATIO"][..],
        ),
        (
            "notifications.channel_capacity",
            config.notifications.channel_capacity.to_string(),
            &["FORECOURT_NOTIFICATIONS_CHANNEL_CAPACITY"][..],
        ),
        (
            "notifications.client_retention",
            config.notifications.client_retention.to_string(),
            &["FORECOURT_NOTIFICATIONS_CLIENT_RETENTION"][..],
        ),
        (
            "notifications.dedup_window",
            config.notifications.dedup_window.to_string(),
            &["FORECOURT_NOTIFICATIONS_DEDUP_WINDOW"][..],
        ),
        (
            "logging.level",
            config.logging.level.clone(),
            &["FORECOURT_LOGGING_LEVEL", "FORECOURT_LOG_LEVEL"][..],
        ),
        (
            "logging.format",
            format!("{:?}", config.logging.format),
            &["FORECOURT_LOGGING_FORMAT", "FORECOURT_LOG_FORMAT"][..],
        ),
    ];

    let mut lines = vec!["effective config (source precedence: env > file > default):".to_string()];
    lines.extend(
        entries
            .iter()
            .map(|(key_path, value, env_keys)| render_line(key_path, value, source(key_path, env_keys))),
    );
    lines.join("\n")
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

#[cfg(test)]
mod tests {
    use std::path::Path;

    use toml::Value;

    use super::{contains_path, field_source, render_line};

    #[test]
    fn contains_path_walks_nested_tables() {
        let doc: Value = "[inventory]\nlow_stock_ratio = \"0.2\"\n".parse().expect("toml");

        assert!(contains_path(&doc, "inventory.low_stock_ratio"));
        assert!(!contains_path(&doc, "inventory.discrepancy_tolerance_litres"));
        assert!(!contains_path(&doc, "server.port"));
    }

    #[test]
    fn file_source_names_the_file_when_env_is_absent() {
        let doc: Value = "[server]\nport = 9000\n".parse().expect("toml");

        let source = field_source(
            "server.port",
            &["FORECOURT_CLI_TEST_UNSET_KEY"],
            Some(&doc),
            Some(Path::new("forecourt.toml")),
        );

        assert_eq!(source, "file (forecourt.toml)");
    }

    #[test]
    fn missing_everywhere_is_default() {
        let source = field_source("server.port", &["FORECOURT_CLI_TEST_UNSET_KEY"], None, None);
        assert_eq!(source, "default");
    }

    #[test]
    fn render_line_format_is_stable() {
        assert_eq!(
            render_line("server.port", "8080", "default".to_string()),
            "- server.port = 8080 (source: default)"
        );
    }
}

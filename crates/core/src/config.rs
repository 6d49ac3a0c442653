use std::env;
use std::fs;
use std::path::{Path, PathBuf};
use std::str::FromStr;

use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::discrepancy::DEFAULT_TOLERANCE_LITRES;

pub const ENV_PREFIX: &str = "FORECOURT_";
pub const CONFIG_FILE_CANDIDATES: [&str; 2] = ["forecourt.toml", "config/forecourt.toml"];

#[derive(Clone, Debug)]
pub struct AppConfig {
    pub database: DatabaseConfig,
    pub server: ServerConfig,
    pub inventory: InventoryConfig,
    pub notifications: NotificationConfig,
    pub logging: LoggingConfig,
}

#[derive(Clone, Debug)]
pub struct DatabaseConfig {
    pub url: String,
    pub max_connections: u32,
    pub timeout_secs: u64,
}

#[derive(Clone, Debug)]
pub struct ServerConfig {
    pub bind_address: String,
    pub port: u16,
    pub graceful_shutdown_secs: u64,
}

#[derive(Clone, Debug)]
pub struct InventoryConfig {
    /// Largest pump-vs-dip difference, in litres, still classified as agreement.
    pub discrepancy_tolerance_litres: Decimal,
    /// Fill ratio below which a tank update raises a low-stock notification.
    pub low_stock_ratio: Decimal,
}

#[derive(Clone, Debug)]
pub struct NotificationConfig {
    pub channel_capacity: usize,
    pub client_retention: usize,
    pub dedup_window: usize,
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
    pub server_port: Option<u16>,
    pub discrepancy_tolerance_litres: Option<Decimal>,
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
                url: "sqlite://forecourt.db".to_string(),
                max_connections: 5,
                timeout_secs: 30,
            },
            server: ServerConfig {
                bind_address: "127.0.0.1".to_string(),
                port: 8080,
                graceful_shutdown_secs: 15,
            },
            inventory: InventoryConfig {
                discrepancy_tolerance_litres: DEFAULT_TOLERANCE_LITRES,
                low_stock_ratio: Decimal::new(2, 1),
            },
            notifications: NotificationConfig {
                channel_capacity: 256,
                client_retention: 50,
                dedup_window: 1024,
            },
            logging: LoggingConfig { level: "info".to_string(), format: LogFormat::Compact },
        }
    }
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
            let expected = options
                .config_path
                .unwrap_or_else(|| PathBuf::from(CONFIG_FILE_CANDIDATES[0]));
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
        }

        if let Some(inventory) = patch.inventory {
            if let Some(tolerance) = inventory.discrepancy_tolerance_litres {
                self.inventory.discrepancy_tolerance_litres = tolerance;
            }
            if let Some(ratio) = inventory.low_stock_ratio {
                self.inventory.low_stock_ratio = ratio;
            }
        }

        if let Some(notifications) = patch.notifications {
            if let Some(channel_capacity) = notifications.channel_capacity {
                self.notifications.channel_capacity = channel_capacity;
            }
            if let Some(client_retention) = notifications.client_retention {
                self.notifications.client_retention = client_retention;
            }
            if let Some(dedup_window) = notifications.dedup_window {
                self.notifications.dedup_window = dedup_window;
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
        if let Some(value) = read_env("FORECOURT_DATABASE_URL") {
            self.database.url = value;
        }
        if let Some(value) = read_env("FORECOURT_DATABASE_MAX_CONNECTIONS") {
            self.database.max_connections = parse_env("FORECOURT_DATABASE_MAX_CONNECTIONS", &value)?;
        }
        if let Some(value) = read_env("FORECOURT_DATABASE_TIMEOUT_SECS") {
            self.database.timeout_secs = parse_env("FORECOURT_DATABASE_TIMEOUT_SECS", &value)?;
        }

        if let Some(value) = read_env("FORECOURT_SERVER_BIND_ADDRESS") {
            self.server.bind_address = value;
        }
        if let Some(value) = read_env("FORECOURT_SERVER_PORT") {
            self.server.port = parse_env("FORECOURT_SERVER_PORT", &value)?;
        }
        if let Some(value) = read_env("FORECOURT_SERVER_GRACEFUL_SHUTDOWN_SECS") {
            self.server.graceful_shutdown_secs =
                parse_env("FORECOURT_SERVER_GRACEFUL_SHUTDOWN_SECS", &value)?;
        }

        if let Some(value) = read_env("FORECOURT_INVENTORY_DISCREPANCY_TOLERANCE_LITRES") {
            self.inventory.discrepancy_tolerance_litres =
                parse_env("FORECOURT_INVENTORY_DISCREPANCY_TOLERANCE_LITRES", &value)?;
        }
        if let Some(value) = read_env("FORECOURT_INVENTORY_LOW_STOCK_RATIO") {
            self.inventory.low_stock_ratio =
                parse_env("FORECOURT_INVENTORY_LOW_STOCK_RATIO", &value)?;
        }

        if let Some(value) = read_env("FORECOURT_NOTIFICATIONS_CHANNEL_CAPACITY") {
            self.notifications.channel_capacity =
                parse_env("FORECOURT_NOTIFICATIONS_CHANNEL_CAPACITY", &value)?;
        }
        if let Some(value) = read_env("FORECOURT_NOTIFICATIONS_CLIENT_RETENTION") {
            self.notifications.client_retention =
                parse_env("FORECOURT_NOTIFICATIONS_CLIENT_RETENTION", &value)?;
        }
        if let Some(value) = read_env("FORECOURT_NOTIFICATIONS_DEDUP_WINDOW") {
            self.notifications.dedup_window =
                parse_env("FORECOURT_NOTIFICATIONS_DEDUP_WINDOW", &value)?;
        }

        let log_level =
            read_env("FORECOURT_LOGGING_LEVEL").or_else(|| read_env("FORECOURT_LOG_LEVEL"));
        if let Some(value) = log_level {
            self.logging.level = value;
        }
        let log_format =
            read_env("FORECOURT_LOGGING_FORMAT").or_else(|| read_env("FORECOURT_LOG_FORMAT"));
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
        if let Some(port) = overrides.server_port {
            self.server.port = port;
        }
        if let Some(tolerance) = overrides.discrepancy_tolerance_litres {
            self.inventory.discrepancy_tolerance_litres = tolerance;
        }
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        validate_database(&self.database)?;
        validate_server(&self.server)?;
        validate_inventory(&self.inventory)?;
        validate_notifications(&self.notifications)?;
        validate_logging(&self.logging)?;
        Ok(())
    }
}

/// Explicit path first, then the working-directory candidates.
pub fn resolve_config_path(explicit_path: Option<&Path>) -> Option<PathBuf> {
    if let Some(path) = explicit_path {
        return path.exists().then_some(path.to_path_buf());
    }

    CONFIG_FILE_CANDIDATES.into_iter().map(PathBuf::from).find(|path| path.exists())
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

fn validate_server(server: &ServerConfig) -> Result<(), ConfigError> {
    if server.port == 0 {
        return Err(ConfigError::Validation("server.port must be greater than zero".to_string()));
    }

    if server.graceful_shutdown_secs == 0 {
        return Err(ConfigError::Validation(
            "server.graceful_shutdown_secs must be greater than zero".to_string(),
        ));
    }

    Ok(())
}

fn validate_inventory(inventory: &InventoryConfig) -> Result<(), ConfigError> {
    if inventory.discrepancy_tolerance_litres < Decimal::ZERO {
        return Err(ConfigError::Validation(
            "inventory.discrepancy_tolerance_litres must not be negative".to_string(),
        ));
    }

    if inventory.low_stock_ratio < Decimal::ZERO || inventory.low_stock_ratio >= Decimal::ONE {
        return Err(ConfigError::Validation(
            "inventory.low_stock_ratio must be in range 0 <= ratio < 1".to_string(),
        ));
    }

    Ok(())
}

fn validate_notifications(notifications: &NotificationConfig) -> Result<(), ConfigError> {
    if notifications.channel_capacity == 0 {
        return Err(ConfigError::Validation(
            "notifications.channel_capacity must be greater than zero".to_string(),
        ));
    }

    if notifications.client_retention == 0 {
        return Err(ConfigError::Validation(
            "notifications.client_retention must be greater than zero".to_string(),
        ));
    }

    if notifications.dedup_window == 0 {
        return Err(ConfigError::Validation(
            "notifications.dedup_window must be greater than zero".to_string(),
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
    server: Option<ServerPatch>,
    inventory: Option<InventoryPatch>,
    notifications: Option<NotificationPatch>,
    logging: Option<LoggingPatch>,
}

#[derive(Debug, Default, Deserialize)]
struct DatabasePatch {
    url: Option<String>,
    max_connections: Option<u32>,
    timeout_secs: Option<u64>,
}

#[derive(Debug, Default, Deserialize)]
struct ServerPatch {
    bind_address: Option<String>,
    port: Option<u16>,
    graceful_shutdown_secs: Option<u64>,
}

#[derive(Debug, Default, Deserialize)]
struct InventoryPatch {
    discrepancy_tolerance_litres: Option<Decimal>,
    low_stock_ratio: Option<Decimal>,
}

#[derive(Debug, Default, Deserialize)]
struct NotificationPatch {
    channel_capacity: Option<usize>,
    client_retention: Option<usize>,
    dedup_window: Option<usize>,
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
    fn defaults_are_valid() -> Result<(), String> {
        let config = AppConfig::default();
        config.validate().map_err(|err| format!("default config invalid: {err}"))?;

        ensure(
            config.inventory.discrepancy_tolerance_litres == Decimal::new(5, 0),
            "default tolerance should be five litres",
        )?;
        ensure(config.notifications.client_retention == 50, "clients keep fifty notifications")?;
        ensure(matches!(config.logging.format, LogFormat::Compact), "compact logs by default")
    }

    #[test]
    fn file_load_supports_env_interpolation() -> Result<(), String> {
        let _guard = env_lock().lock().map_err(|_| "env lock is poisoned".to_string())?;

        env::set_var("TEST_FORECOURT_DB", "sqlite://interpolated.db");

        let result = (|| -> Result<(), String> {
            let dir = TempDir::new().map_err(|err: io::Error| err.to_string())?;
            let path = dir.path().join("forecourt.toml");
            fs::write(
                &path,
                r#"
[database]
url = "${TEST_FORECOURT_DB}"

[inventory]
discrepancy_tolerance_litres = "7.5"
low_stock_ratio = "0.25"
"#,
            )
            .map_err(|err| err.to_string())?;

            let config =
                AppConfig::load(LoadOptions { config_path: Some(path), ..LoadOptions::default() })
                    .map_err(|err| format!("config load failed: {err}"))?;

            ensure(
                config.database.url == "sqlite://interpolated.db",
                "database url should be interpolated from environment",
            )?;
            ensure(
                config.inventory.discrepancy_tolerance_litres == Decimal::new(75, 1),
                "tolerance should come from the file",
            )?;
            ensure(
                config.inventory.low_stock_ratio == Decimal::new(25, 2),
                "low-stock ratio should come from the file",
            )?;
            Ok(())
        })();

        clear_vars(&["TEST_FORECOURT_DB"]);
        result
    }

    #[test]
    fn logging_env_aliases_are_supported() -> Result<(), String> {
        let _guard = env_lock().lock().map_err(|_| "env lock is poisoned".to_string())?;

        env::set_var("FORECOURT_LOG_LEVEL", "warn");
        env::set_var("FORECOURT_LOG_FORMAT", "json");

        let result = (|| -> Result<(), String> {
            let config = AppConfig::load(LoadOptions::default())
                .map_err(|err| format!("config load failed: {err}"))?;

            ensure(config.logging.level == "warn", "warning log level should be set from env var")?;
            ensure(
                matches!(config.logging.format, LogFormat::Json),
                "json logging format should be set from env var",
            )?;
            Ok(())
        })();

        clear_vars(&["FORECOURT_LOG_LEVEL", "FORECOURT_LOG_FORMAT"]);
        result
    }

    #[test]
    fn precedence_defaults_file_env_overrides() -> Result<(), String> {
        let _guard = env_lock().lock().map_err(|_| "env lock is poisoned".to_string())?;

        env::set_var("FORECOURT_DATABASE_URL", "sqlite://from-env.db");
        env::set_var("FORECOURT_SERVER_PORT", "9090");

        let result = (|| -> Result<(), String> {
            let dir = TempDir::new().map_err(|err: io::Error| err.to_string())?;
            let path = dir.path().join("forecourt.toml");
            fs::write(
                &path,
                r#"
[database]
url = "sqlite://from-file.db"

[server]
port = 7070
bind_address = "0.0.0.0"

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
            ensure(config.server.port == 9090, "env port should win over file")?;
            ensure(config.server.bind_address == "0.0.0.0", "file bind address should win over default")?;
            Ok(())
        })();

        clear_vars(&["FORECOURT_DATABASE_URL", "FORECOURT_SERVER_PORT"]);
        result
    }

    #[test]
    fn invalid_env_override_names_the_variable() -> Result<(), String> {
        let _guard = env_lock().lock().map_err(|_| "env lock is poisoned".to_string())?;

        env::set_var("FORECOURT_INVENTORY_LOW_STOCK_RATIO", "one fifth");

        let result = (|| -> Result<(), String> {
            let error = match AppConfig::load(LoadOptions::default()) {
                Ok(_) => return Err("expected env parse failure".to_string()),
                Err(error) => error,
            };
            ensure(
                matches!(
                    error,
                    ConfigError::InvalidEnvOverride { ref key, .. }
                        if key == "FORECOURT_INVENTORY_LOW_STOCK_RATIO"
                ),
                "error should name the offending variable",
            )
        })();

        clear_vars(&["FORECOURT_INVENTORY_LOW_STOCK_RATIO"]);
        result
    }

    #[test]
    fn validation_fails_fast_with_actionable_error() -> Result<(), String> {
        let _guard = env_lock().lock().map_err(|_| "env lock is poisoned".to_string())?;

        env::set_var("FORECOURT_DATABASE_URL", "postgres://nope");

        let result = (|| -> Result<(), String> {
            let error = match AppConfig::load(LoadOptions::default()) {
                Ok(_) => {
                    return Err("expected validation failure but config load succeeded".to_string())
                }
                Err(error) => error,
            };
            let has_message = matches!(
                error,
                ConfigError::Validation(ref message) if message.contains("database.url")
            );
            ensure(has_message, "validation failure should mention database.url")
        })();

        clear_vars(&["FORECOURT_DATABASE_URL"]);
        result
    }

    #[test]
    fn low_stock_ratio_must_be_a_fraction() {
        let mut config = AppConfig::default();
        config.inventory.low_stock_ratio = Decimal::ONE;

        assert!(matches!(
            config.validate(),
            Err(ConfigError::Validation(message)) if message.contains("low_stock_ratio")
        ));
    }
}

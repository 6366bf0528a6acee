use std::env;
use std::fs;
use std::path::{Path, PathBuf};

use secrecy::{ExposeSecret, SecretString};
use serde::{Deserialize, Serialize};
use thiserror::Error;

#[derive(Clone, Debug)]
pub struct AppConfig {
    pub database: DatabaseConfig,
    pub server: ServerConfig,
    pub kommo: KommoConfig,
    pub gateway: GatewayConfig,
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
    pub health_check_port: u16,
    pub graceful_shutdown_secs: u64,
}

#[derive(Clone, Debug)]
pub struct KommoConfig {
    pub subdomain: String,
    pub api_token: SecretString,
}

/// Payment-gateway settings. Credentials are optional: without them the
/// service degrades to webhook-archival-only and payment endpoints answer
/// with an unavailable status instead of the process refusing to start.
#[derive(Clone, Debug)]
pub struct GatewayConfig {
    pub api_base_url: String,
    pub checkout_base_url: String,
    pub api_key: Option<SecretString>,
    pub merchant_id: Option<String>,
    pub merchant_secret: Option<SecretString>,
    pub callback_base_url: String,
}

#[derive(Clone, Debug)]
pub struct GatewayCredentials {
    pub api_key: SecretString,
    pub merchant_id: String,
    pub merchant_secret: SecretString,
}

impl GatewayConfig {
    /// Complete credential set, or `None` when any part is missing.
    pub fn credentials(&self) -> Option<GatewayCredentials> {
        let api_key = self.api_key.clone()?;
        let merchant_id = self.merchant_id.clone()?;
        let merchant_secret = self.merchant_secret.clone()?;
        Some(GatewayCredentials { api_key, merchant_id, merchant_secret })
    }

    pub fn callback_url(&self) -> String {
        format!("{}/payment-callback", self.callback_base_url.trim_end_matches('/'))
    }
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
    pub kommo_subdomain: Option<String>,
    pub kommo_api_token: Option<String>,
    pub gateway_api_key: Option<String>,
    pub gateway_merchant_id: Option<String>,
    pub gateway_merchant_secret: Option<String>,
    pub gateway_callback_base_url: Option<String>,
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
                url: "sqlite://paylink.db".to_string(),
                max_connections: 5,
                timeout_secs: 30,
            },
            server: ServerConfig {
                bind_address: "127.0.0.1".to_string(),
                port: 3000,
                health_check_port: 8080,
                graceful_shutdown_secs: 15,
            },
            kommo: KommoConfig { subdomain: String::new(), api_token: String::new().into() },
            gateway: GatewayConfig {
                api_base_url: "https://pay.flitt.com/api".to_string(),
                checkout_base_url: "https://pay.flitt.com".to_string(),
                api_key: None,
                merchant_id: None,
                merchant_secret: None,
                callback_base_url: "http://localhost:3000".to_string(),
            },
            logging: LoggingConfig { level: "info".to_string(), format: LogFormat::Compact },
        }
    }
}

fn secret_value(value: String) -> SecretString {
    value.into()
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

impl AppConfig {
    pub fn load(options: LoadOptions) -> Result<Self, ConfigError> {
        let mut config = Self::default();
        let maybe_path = resolve_config_path(options.config_path.as_deref());

        if let Some(path) = maybe_path {
            let patch = read_patch(&path)?;
            config.apply_patch(patch);
        } else if options.require_file {
            let expected = options.config_path.unwrap_or_else(|| PathBuf::from("paylink.toml"));
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
            if let Some(health_check_port) = server.health_check_port {
                self.server.health_check_port = health_check_port;
            }
            if let Some(graceful_shutdown_secs) = server.graceful_shutdown_secs {
                self.server.graceful_shutdown_secs = graceful_shutdown_secs;
            }
        }

        if let Some(kommo) = patch.kommo {
            if let Some(subdomain) = kommo.subdomain {
                self.kommo.subdomain = subdomain;
            }
            if let Some(kommo_api_token_value) = kommo.api_token {
                self.kommo.api_token = secret_value(kommo_api_token_value);
            }
        }

        if let Some(gateway) = patch.gateway {
            if let Some(api_base_url) = gateway.api_base_url {
                self.gateway.api_base_url = api_base_url;
            }
            if let Some(checkout_base_url) = gateway.checkout_base_url {
                self.gateway.checkout_base_url = checkout_base_url;
            }
            if let Some(gateway_api_key_value) = gateway.api_key {
                self.gateway.api_key = Some(secret_value(gateway_api_key_value));
            }
            if let Some(merchant_id) = gateway.merchant_id {
                self.gateway.merchant_id = Some(merchant_id);
            }
            if let Some(gateway_merchant_secret_value) = gateway.merchant_secret {
                self.gateway.merchant_secret = Some(secret_value(gateway_merchant_secret_value));
            }
            if let Some(callback_base_url) = gateway.callback_base_url {
                self.gateway.callback_base_url = callback_base_url;
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
        if let Some(value) = read_env("PAYLINK_DATABASE_URL") {
            self.database.url = value;
        }
        if let Some(value) = read_env("PAYLINK_DATABASE_MAX_CONNECTIONS") {
            self.database.max_connections = parse_u32("PAYLINK_DATABASE_MAX_CONNECTIONS", &value)?;
        }
        if let Some(value) = read_env("PAYLINK_DATABASE_TIMEOUT_SECS") {
            self.database.timeout_secs = parse_u64("PAYLINK_DATABASE_TIMEOUT_SECS", &value)?;
        }

        if let Some(value) = read_env("PAYLINK_SERVER_BIND_ADDRESS") {
            self.server.bind_address = value;
        }
        if let Some(value) = read_env("PAYLINK_SERVER_PORT") {
            self.server.port = parse_u16("PAYLINK_SERVER_PORT", &value)?;
        }
        if let Some(value) = read_env("PAYLINK_SERVER_HEALTH_CHECK_PORT") {
            self.server.health_check_port =
                parse_u16("PAYLINK_SERVER_HEALTH_CHECK_PORT", &value)?;
        }
        if let Some(value) = read_env("PAYLINK_SERVER_GRACEFUL_SHUTDOWN_SECS") {
            self.server.graceful_shutdown_secs =
                parse_u64("PAYLINK_SERVER_GRACEFUL_SHUTDOWN_SECS", &value)?;
        }

        if let Some(value) = read_env("PAYLINK_KOMMO_SUBDOMAIN") {
            self.kommo.subdomain = value;
        }
        if let Some(value) = read_env("PAYLINK_KOMMO_API_TOKEN") {
            self.kommo.api_token = secret_value(value);
        }

        if let Some(value) = read_env("PAYLINK_GATEWAY_API_BASE_URL") {
            self.gateway.api_base_url = value;
        }
        if let Some(value) = read_env("PAYLINK_GATEWAY_CHECKOUT_BASE_URL") {
            self.gateway.checkout_base_url = value;
        }
        if let Some(value) = read_env("PAYLINK_GATEWAY_API_KEY") {
            self.gateway.api_key = Some(secret_value(value));
        }
        if let Some(value) = read_env("PAYLINK_GATEWAY_MERCHANT_ID") {
            self.gateway.merchant_id = Some(value);
        }
        if let Some(value) = read_env("PAYLINK_GATEWAY_MERCHANT_SECRET") {
            self.gateway.merchant_secret = Some(secret_value(value));
        }
        if let Some(value) = read_env("PAYLINK_GATEWAY_CALLBACK_BASE_URL") {
            self.gateway.callback_base_url = value;
        }

        let log_level = read_env("PAYLINK_LOGGING_LEVEL").or_else(|| read_env("PAYLINK_LOG_LEVEL"));
        if let Some(value) = log_level {
            self.logging.level = value;
        }
        let log_format =
            read_env("PAYLINK_LOGGING_FORMAT").or_else(|| read_env("PAYLINK_LOG_FORMAT"));
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
        if let Some(kommo_subdomain) = overrides.kommo_subdomain {
            self.kommo.subdomain = kommo_subdomain;
        }
        if let Some(kommo_api_token) = overrides.kommo_api_token {
            self.kommo.api_token = secret_value(kommo_api_token);
        }
        if let Some(gateway_api_key) = overrides.gateway_api_key {
            self.gateway.api_key = Some(secret_value(gateway_api_key));
        }
        if let Some(merchant_id) = overrides.gateway_merchant_id {
            self.gateway.merchant_id = Some(merchant_id);
        }
        if let Some(merchant_secret) = overrides.gateway_merchant_secret {
            self.gateway.merchant_secret = Some(secret_value(merchant_secret));
        }
        if let Some(callback_base_url) = overrides.gateway_callback_base_url {
            self.gateway.callback_base_url = callback_base_url;
        }
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        validate_database(&self.database)?;
        validate_server(&self.server)?;
        validate_kommo(&self.kommo)?;
        validate_gateway(&self.gateway)?;
        validate_logging(&self.logging)?;
        Ok(())
    }
}

fn resolve_config_path(explicit_path: Option<&Path>) -> Option<PathBuf> {
    if let Some(path) = explicit_path {
        return path.exists().then_some(path.to_path_buf());
    }

    [PathBuf::from("paylink.toml"), PathBuf::from("config/paylink.toml")]
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

fn validate_server(server: &ServerConfig) -> Result<(), ConfigError> {
    if server.port == 0 {
        return Err(ConfigError::Validation("server.port must be greater than zero".to_string()));
    }

    if server.health_check_port == 0 {
        return Err(ConfigError::Validation(
            "server.health_check_port must be greater than zero".to_string(),
        ));
    }

    if server.graceful_shutdown_secs == 0 {
        return Err(ConfigError::Validation(
            "server.graceful_shutdown_secs must be greater than zero".to_string(),
        ));
    }

    Ok(())
}

fn validate_kommo(kommo: &KommoConfig) -> Result<(), ConfigError> {
    if kommo.subdomain.trim().is_empty() {
        return Err(ConfigError::Validation(
            "kommo.subdomain is required. It is the `<subdomain>` part of https://<subdomain>.kommo.com"
                .to_string(),
        ));
    }

    if kommo.api_token.expose_secret().trim().is_empty() {
        return Err(ConfigError::Validation(
            "kommo.api_token is required. Create a long-lived token under Kommo > Settings > API"
                .to_string(),
        ));
    }

    Ok(())
}

fn validate_gateway(gateway: &GatewayConfig) -> Result<(), ConfigError> {
    for (name, url) in [
        ("gateway.api_base_url", &gateway.api_base_url),
        ("gateway.checkout_base_url", &gateway.checkout_base_url),
        ("gateway.callback_base_url", &gateway.callback_base_url),
    ] {
        if !url.starts_with("http://") && !url.starts_with("https://") {
            return Err(ConfigError::Validation(format!(
                "{name} must start with http:// or https://"
            )));
        }
    }

    // Partial credentials are almost certainly a deployment mistake; either
    // all three are present (payments enabled) or none (archival-only mode).
    let provided = [
        gateway.api_key.is_some(),
        gateway.merchant_id.is_some(),
        gateway.merchant_secret.is_some(),
    ];
    let count = provided.iter().filter(|present| **present).count();
    if count != 0 && count != provided.len() {
        return Err(ConfigError::Validation(
            "gateway credentials are incomplete: set all of gateway.api_key, gateway.merchant_id, gateway.merchant_secret or none of them"
                .to_string(),
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

fn parse_u16(key: &str, value: &str) -> Result<u16, ConfigError> {
    value.parse::<u16>().map_err(|_| ConfigError::InvalidEnvOverride {
        key: key.to_string(),
        value: value.to_string(),
    })
}

fn parse_u32(key: &str, value: &str) -> Result<u32, ConfigError> {
    value.parse::<u32>().map_err(|_| ConfigError::InvalidEnvOverride {
        key: key.to_string(),
        value: value.to_string(),
    })
}

fn parse_u64(key: &str, value: &str) -> Result<u64, ConfigError> {
    value.parse::<u64>().map_err(|_| ConfigError::InvalidEnvOverride {
        key: key.to_string(),
        value: value.to_string(),
    })
}

#[derive(Debug, Default, Deserialize)]
struct ConfigPatch {
    database: Option<DatabasePatch>,
    server: Option<ServerPatch>,
    kommo: Option<KommoPatch>,
    gateway: Option<GatewayPatch>,
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
    health_check_port: Option<u16>,
    graceful_shutdown_secs: Option<u64>,
}

#[derive(Debug, Default, Deserialize)]
struct KommoPatch {
    subdomain: Option<String>,
    api_token: Option<String>,
}

#[derive(Debug, Default, Deserialize)]
struct GatewayPatch {
    api_base_url: Option<String>,
    checkout_base_url: Option<String>,
    api_key: Option<String>,
    merchant_id: Option<String>,
    merchant_secret: Option<String>,
    callback_base_url: Option<String>,
}

#[derive(Debug, Default, Deserialize)]
struct LoggingPatch {
    level: Option<String>,
    format: Option<LogFormat>,
}

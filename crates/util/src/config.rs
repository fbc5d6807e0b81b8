use std::{env, fmt, net::SocketAddr, path::PathBuf};

use serde::Serialize;
use url::Url;

use super::{non_empty_var, server_bind_address};

pub const DEFAULT_ORDERS_PATH: &str = "delivery_pedidos";
pub const DEFAULT_FCM_BASE_URL: &str = "https://fcm.googleapis.com/v1/";
pub const DEFAULT_CLICK_LINK: &str = "https://seu-site.com/index.html";
pub const DEFAULT_ICON: &str = "/img/logo.png";
pub const DEFAULT_BADGE: &str = "/img/badge.png";
pub const DEFAULT_VIBRATE: [u32; 3] = [200, 100, 200];

/// Secret used outside production when `TRIGGER_SECRET` is not provided.
const DEVELOPMENT_TRIGGER_SECRET: &str = "development-trigger-secret";

/// Application runtime environment.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Environment {
    Development,
    Production,
    Test,
}

impl Environment {
    fn from_str(value: &str) -> Result<Self, ConfigError> {
        match value {
            "development" | "dev" => Ok(Self::Development),
            "production" | "prod" => Ok(Self::Production),
            "test" => Ok(Self::Test),
            other => Err(ConfigError::InvalidEnvironment(other.to_string())),
        }
    }

    /// Returns `true` for production deployments.
    pub fn is_production(self) -> bool {
        matches!(self, Self::Production)
    }

    /// Returns the canonical name used for logging/metrics labels.
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Development => "development",
            Self::Production => "production",
            Self::Test => "test",
        }
    }
}

/// How the service authenticates against the Firebase REST APIs.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Credentials {
    /// Pre-issued bearer token, typically used against local emulators.
    StaticToken(String),
    /// Path to a Google service account JSON key.
    ServiceAccountFile(PathBuf),
    /// No credentials; requests are sent without an `Authorization` header.
    Anonymous,
}

/// Backend endpoints and credentials used by the notifier.
#[derive(Debug, Clone)]
pub struct FirebaseSettings {
    pub project_id: String,
    pub database_url: String,
    pub fcm_base_url: Url,
    pub credentials: Credentials,
}

/// Web-push presentation hints attached to every outbound notification.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct NotificationSettings {
    pub click_link: String,
    pub icon: String,
    pub badge: String,
    pub vibrate: Vec<u32>,
}

impl Default for NotificationSettings {
    fn default() -> Self {
        Self {
            click_link: DEFAULT_CLICK_LINK.to_string(),
            icon: DEFAULT_ICON.to_string(),
            badge: DEFAULT_BADGE.to_string(),
            vibrate: DEFAULT_VIBRATE.to_vec(),
        }
    }
}

/// Constants handed to browser clients so they can initialize the Firebase SDK.
///
/// Values default to placeholders that must be substituted per deployment.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ClientBootstrap {
    pub api_key: String,
    pub auth_domain: String,
    pub project_id: String,
    #[serde(rename = "databaseURL")]
    pub database_url: String,
    pub app_id: String,
}

/// Runtime configuration resolved from environment variables.
#[derive(Debug, Clone)]
pub struct AppConfig {
    pub bind_addr: SocketAddr,
    pub environment: Environment,
    pub trigger_secret: String,
    pub orders_path: String,
    pub prune_stale_tokens: bool,
    pub firebase: FirebaseSettings,
    pub notification: NotificationSettings,
    pub client: ClientBootstrap,
}

impl AppConfig {
    /// Constructs the configuration by reading and validating environment variables.
    pub fn from_env() -> Result<Self, ConfigError> {
        let env_value = env::var("APP_ENV").unwrap_or_else(|_| "development".to_string());
        let environment = Environment::from_str(&env_value)?;
        let bind_addr = server_bind_address().map_err(ConfigError::BindAddress)?;

        let trigger_secret = match non_empty_var("TRIGGER_SECRET") {
            Some(secret) => secret,
            None if environment.is_production() => {
                return Err(ConfigError::MissingVar("TRIGGER_SECRET"))
            }
            None => DEVELOPMENT_TRIGGER_SECRET.to_string(),
        };

        let orders_path = var_or("ORDERS_PATH", DEFAULT_ORDERS_PATH)
            .trim_matches('/')
            .to_string();
        if orders_path.is_empty() || orders_path.contains('/') {
            return Err(ConfigError::InvalidVar {
                name: "ORDERS_PATH",
                value: orders_path,
            });
        }

        let prune_stale_tokens = parse_bool("PRUNE_STALE_TOKENS")?;

        let project_id = var_or("FIREBASE_PROJECT_ID", "SEU_PROJECT_ID");
        let database_url = var_or("FIREBASE_DATABASE_URL", "SUA_DATABASE_URL");
        let fcm_base_url = parse_base_url("FCM_BASE_URL", DEFAULT_FCM_BASE_URL)?;
        let credentials = resolve_credentials();

        let notification = NotificationSettings {
            click_link: var_or("NOTIFY_CLICK_LINK", DEFAULT_CLICK_LINK),
            icon: var_or("NOTIFY_ICON", DEFAULT_ICON),
            badge: var_or("NOTIFY_BADGE", DEFAULT_BADGE),
            vibrate: parse_vibrate()?,
        };

        let client = ClientBootstrap {
            api_key: var_or("FIREBASE_API_KEY", "SUA_API_KEY"),
            auth_domain: var_or("FIREBASE_AUTH_DOMAIN", "SEU_AUTH_DOMAIN"),
            project_id: project_id.clone(),
            database_url: database_url.clone(),
            app_id: var_or("FIREBASE_APP_ID", "SEU_APP_ID"),
        };

        Ok(Self {
            bind_addr,
            environment,
            trigger_secret,
            orders_path,
            prune_stale_tokens,
            firebase: FirebaseSettings {
                project_id,
                database_url,
                fcm_base_url,
                credentials,
            },
            notification,
            client,
        })
    }
}

fn var_or(name: &str, default: &str) -> String {
    non_empty_var(name).unwrap_or_else(|| default.to_string())
}

fn parse_bool(name: &'static str) -> Result<bool, ConfigError> {
    match non_empty_var(name) {
        None => Ok(false),
        Some(value) => match value.to_ascii_lowercase().as_str() {
            "1" | "true" | "yes" | "on" => Ok(true),
            "0" | "false" | "no" | "off" => Ok(false),
            _ => Err(ConfigError::InvalidVar { name, value }),
        },
    }
}

fn parse_base_url(name: &'static str, default: &str) -> Result<Url, ConfigError> {
    let mut raw = var_or(name, default);
    // Url::join drops the last segment unless the base ends with a slash.
    if !raw.ends_with('/') {
        raw.push('/');
    }
    Url::parse(&raw).map_err(|source| ConfigError::InvalidUrl { name, source })
}

fn parse_vibrate() -> Result<Vec<u32>, ConfigError> {
    let Some(raw) = non_empty_var("NOTIFY_VIBRATE") else {
        return Ok(DEFAULT_VIBRATE.to_vec());
    };
    raw.split(',')
        .map(|item| item.trim().parse::<u32>())
        .collect::<Result<Vec<_>, _>>()
        .map_err(|_| ConfigError::InvalidVar {
            name: "NOTIFY_VIBRATE",
            value: raw.clone(),
        })
}

fn resolve_credentials() -> Credentials {
    if let Some(token) = non_empty_var("FIREBASE_ACCESS_TOKEN") {
        return Credentials::StaticToken(token);
    }
    match non_empty_var("GOOGLE_APPLICATION_CREDENTIALS") {
        Some(path) => Credentials::ServiceAccountFile(PathBuf::from(path)),
        None => Credentials::Anonymous,
    }
}

/// Errors that can occur during configuration loading.
#[derive(Debug)]
pub enum ConfigError {
    InvalidEnvironment(String),
    BindAddress(std::net::AddrParseError),
    MissingVar(&'static str),
    InvalidVar { name: &'static str, value: String },
    InvalidUrl {
        name: &'static str,
        source: url::ParseError,
    },
}

impl fmt::Display for ConfigError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::InvalidEnvironment(value) => write!(
                f,
                "APP_ENV must be one of 'development', 'production', or 'test' (got {value})"
            ),
            Self::BindAddress(err) => write!(f, "invalid APP_BIND_ADDR value: {err}"),
            Self::MissingVar(name) => write!(f, "{name} must be set"),
            Self::InvalidVar { name, value } => write!(f, "invalid {name} value: {value}"),
            Self::InvalidUrl { name, source } => write!(f, "{name} is not a valid URL: {source}"),
        }
    }
}

impl std::error::Error for ConfigError {}

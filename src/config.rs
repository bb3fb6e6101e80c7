use secrecy::{ExposeSecret, SecretBox};
use std::env;
use std::time::Duration;
use thiserror::Error;
use url::Url;

#[derive(Error, Debug)]
pub enum ConfigError {
    #[error("Missing required environment variable: {0}")]
    MissingEnvVar(String),
    #[error("Invalid value for {var}: {reason}")]
    InvalidVar { var: String, reason: String },
    #[error("Invalid agent endpoint: {0}")]
    UrlParse(#[from] url::ParseError),
}

/// Everything needed to open one agent session.
#[derive(Debug)]
pub struct SessionConfig {
    /// WebSocket endpoint of the ordering agent (ws:// or wss://).
    pub endpoint: Url,
    pub api_key: SecretBox<String>,
    /// Voice profile the agent should speak with.
    pub voice: String,
    /// How long a ready order waits before submitting itself.
    pub auto_submit_grace: Duration,
}

impl SessionConfig {
    /// Loads from the environment, with an optional endpoint override from
    /// the command line taking precedence over `ORDER_AGENT_URL`.
    pub fn load(endpoint_override: Option<Url>) -> Result<Self, ConfigError> {
        // .env is optional, for development.
        dotenvy::dotenv().ok();

        let endpoint = match endpoint_override {
            Some(url) => url,
            None => {
                let raw = env::var("ORDER_AGENT_URL")
                    .map_err(|_| ConfigError::MissingEnvVar("ORDER_AGENT_URL".to_string()))?;
                Url::parse(&raw)?
            }
        };
        if !matches!(endpoint.scheme(), "ws" | "wss") {
            return Err(ConfigError::InvalidVar {
                var: "ORDER_AGENT_URL".to_string(),
                reason: format!("expected a ws:// or wss:// URL, got {}", endpoint.scheme()),
            });
        }

        let api_key = Self::load_api_key("ORDER_AGENT_API_KEY")?;

        let voice = env::var("ORDER_AGENT_VOICE").unwrap_or_else(|_| "amber".to_string());

        let auto_submit_grace = match env::var("ORDER_AUTO_SUBMIT_SECS") {
            Ok(raw) => {
                let secs: u64 = raw.parse().map_err(|_| ConfigError::InvalidVar {
                    var: "ORDER_AUTO_SUBMIT_SECS".to_string(),
                    reason: format!("expected a number of seconds, got '{raw}'"),
                })?;
                Duration::from_secs(secs)
            }
            Err(_) => Duration::from_secs(6),
        };

        Ok(SessionConfig {
            endpoint,
            api_key,
            voice,
            auto_submit_grace,
        })
    }

    fn load_api_key(env_var: &str) -> Result<SecretBox<String>, ConfigError> {
        let key =
            env::var(env_var).map_err(|_| ConfigError::MissingEnvVar(env_var.to_string()))?;
        if key.trim().is_empty() {
            return Err(ConfigError::InvalidVar {
                var: env_var.to_string(),
                reason: "API key cannot be empty".to_string(),
            });
        }
        if key.contains(char::is_whitespace) {
            return Err(ConfigError::InvalidVar {
                var: env_var.to_string(),
                reason: "API key must not contain whitespace".to_string(),
            });
        }
        Ok(SecretBox::new(Box::new(key)))
    }

    pub fn api_key(&self) -> &str {
        self.api_key.expose_secret()
    }
}

/// Load configuration with helpful error messages for development
pub fn load_config(endpoint_override: Option<Url>) -> Result<SessionConfig, ConfigError> {
    match SessionConfig::load(endpoint_override) {
        Ok(config) => {
            log::info!("Configuration loaded (agent: {})", config.endpoint);
            Ok(config)
        }
        Err(ConfigError::MissingEnvVar(var)) => {
            log::error!("Missing required environment variable: {}", var);
            log::error!("Create a .env file in the project root with:");
            log::error!("{}=...", var);
            Err(ConfigError::MissingEnvVar(var))
        }
        Err(e) => {
            log::error!("Configuration error: {}", e);
            Err(e)
        }
    }
}

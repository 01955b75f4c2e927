use clap::Parser;

use crate::utils::logging::{LogFormat, LogLevel};

/// Service settings, environment-sourced with CLI overrides. The target URL
/// and the credential pair are required: clap exits non-zero with a
/// diagnostic when they are missing.
#[derive(Parser, Debug, Clone)]
#[command(author, version, about, long_about = None)]
pub struct Args {
    /// Modeus URL whose login redirect chain ends on the Microsoft IdP.
    #[arg(long, env = "MODEUS_URL")]
    pub modeus_url: String,

    /// Microsoft account username.
    #[arg(long, env = "MS_USERNAME")]
    pub username: String,

    /// Microsoft account password.
    #[arg(long, env = "MS_PASSWORD", hide_env_values = true)]
    pub password: String,

    /// Shared secret expected in the X-API-Key header; unset disables the check.
    #[arg(long, env = "API_KEY", hide_env_values = true)]
    pub api_key: Option<String>,

    /// chromedriver endpoint the login flow drives the browser through.
    #[arg(long, env = "WEBDRIVER_URL", default_value = "http://127.0.0.1:9515")]
    pub webdriver_url: String,

    #[arg(long, env = "HOST", default_value = "0.0.0.0")]
    pub host: String,

    #[arg(long, env = "PORT", default_value_t = 8080)]
    pub port: u16,

    /// Cached token time-to-live in seconds.
    #[arg(long, env = "TOKEN_TTL_SECONDS", default_value_t = 1200)]
    pub token_ttl_seconds: u64,

    #[arg(long, env = "LOG_LEVEL", value_enum)]
    pub log_level: Option<LogLevel>,

    #[arg(long, env = "LOG_FORMAT", value_enum, default_value = "compact")]
    pub log_format: LogFormat,
}

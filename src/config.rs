use std::{net::SocketAddr, path::PathBuf};

use dotenvy::dotenv;
use thiserror::Error;
use tracing::Level;
use url::Url;

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("{0} should be set")]
    Missing(&'static str),

    #[error("{name} can't be parsed: {reason}")]
    Invalid { name: &'static str, reason: String },
}

/// Webhook endpoint; long polling is used when absent.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Webhook {
    pub url: Url,
    pub addr: SocketAddr,
}

#[derive(Debug, Clone)]
pub struct Config {
    pub teloxide_token: String,
    pub database_url: String,
    pub log_level: Level,
    pub questions_dir: PathBuf,
    /// Telegram username allowed to reload question banks.
    pub admin_name: Option<String>,
    pub auto_certificate: bool,
    pub webhook: Option<Webhook>,
}

impl Config {
    /// Loads `.env` if present, then reads the process environment.
    pub fn from_env() -> Result<Self, ConfigError> {
        dotenv().ok();
        Self::from_lookup(|name| std::env::var(name).ok())
    }

    pub fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> Result<Self, ConfigError> {
        let var = |name: &str| lookup(name).filter(|v| !v.trim().is_empty());

        let teloxide_token = var("TELOXIDE_TOKEN").ok_or(ConfigError::Missing("TELOXIDE_TOKEN"))?;
        let database_url = var("DATABASE_URL").unwrap_or_else(|| "sqlite://test_bot.db".into());

        let log_level = match var("LOG_LEVEL") {
            Some(level) => level.parse().map_err(|_| ConfigError::Invalid {
                name: "LOG_LEVEL",
                reason: format!("unknown level '{level}'"),
            })?,
            None => Level::INFO,
        };

        let questions_dir = var("QUESTIONS_DIR").map_or_else(|| PathBuf::from("."), PathBuf::from);
        let admin_name = var("ADMIN_NAME").map(|name| name.trim_start_matches('@').to_owned());

        let auto_certificate = match var("AUTO_CERTIFICATE").as_deref() {
            None => false,
            Some("1" | "true" | "yes" | "on") => true,
            Some("0" | "false" | "no" | "off") => false,
            Some(other) => {
                return Err(ConfigError::Invalid {
                    name: "AUTO_CERTIFICATE",
                    reason: format!("expected a boolean, got '{other}'"),
                })
            }
        };

        let webhook = match (var("NGROK_URL"), var("NGROK_ADDR")) {
            (Some(url), Some(addr)) => Some(Webhook {
                url: url.parse().map_err(|e: url::ParseError| ConfigError::Invalid {
                    name: "NGROK_URL",
                    reason: e.to_string(),
                })?,
                addr: addr
                    .parse()
                    .map_err(|e: std::net::AddrParseError| ConfigError::Invalid {
                        name: "NGROK_ADDR",
                        reason: e.to_string(),
                    })?,
            }),
            _ => None,
        };

        Ok(Self {
            teloxide_token,
            database_url,
            log_level,
            questions_dir,
            admin_name,
            auto_certificate,
            webhook,
        })
    }

    pub fn is_admin(&self, username: Option<&str>) -> bool {
        matches!((&self.admin_name, username), (Some(admin), Some(user)) if admin == user)
    }
}

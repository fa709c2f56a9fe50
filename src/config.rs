use std::env;
use std::time::Duration;

use crate::error::AppError;
use crate::models::snapshot::Role;

#[derive(Debug, Clone)]
pub struct Config {
    pub http_port: u16,
    pub log_level: String,
    pub api_base_url: String,
    pub stream_url: String,
    pub api_token: Option<String>,
    pub fetch_timeout: Duration,
    pub event_buffer_size: usize,
    pub reconnect_delay: Duration,
    pub default_page_limit: u32,
    pub admin_riders_path: String,
    pub moderator_riders_path: String,
}

impl Config {
    pub fn from_env() -> Result<Self, AppError> {
        let _ = dotenvy::dotenv();

        Ok(Self {
            http_port: parse_or_default("HTTP_PORT", 3000)?,
            log_level: env::var("LOG_LEVEL").unwrap_or_else(|_| "info".to_string()),
            api_base_url: env::var("API_BASE_URL")
                .unwrap_or_else(|_| "http://localhost:5000".to_string()),
            stream_url: env::var("STREAM_URL")
                .unwrap_or_else(|_| "ws://localhost:5000/ws".to_string()),
            api_token: env::var("API_TOKEN").ok().filter(|token| !token.is_empty()),
            fetch_timeout: Duration::from_millis(parse_or_default("FETCH_TIMEOUT_MS", 10_000)?),
            event_buffer_size: parse_or_default("EVENT_BUFFER_SIZE", 1024)?,
            reconnect_delay: Duration::from_millis(parse_or_default("RECONNECT_DELAY_MS", 2_000)?),
            default_page_limit: parse_or_default("DEFAULT_PAGE_LIMIT", 10)?,
            admin_riders_path: env::var("ADMIN_RIDERS_PATH")
                .unwrap_or_else(|_| "/api/admin/riders".to_string()),
            moderator_riders_path: env::var("MODERATOR_RIDERS_PATH")
                .unwrap_or_else(|_| "/api/moderator/riders".to_string()),
        })
    }

    pub fn riders_path(&self, role: Role) -> &str {
        match role {
            Role::Admin => &self.admin_riders_path,
            Role::Moderator => &self.moderator_riders_path,
        }
    }

    /// Only the admin console offers the location-history toggle.
    pub fn history_enabled(&self, role: Role) -> bool {
        matches!(role, Role::Admin)
    }
}

fn parse_or_default<T>(key: &str, default: T) -> Result<T, AppError>
where
    T: std::str::FromStr,
    T::Err: std::fmt::Display,
{
    match env::var(key) {
        Ok(raw) => raw
            .parse::<T>()
            .map_err(|err| AppError::Internal(format!("invalid {key}: {err}"))),
        Err(_) => Ok(default),
    }
}

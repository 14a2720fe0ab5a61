use std::env;
use std::net::SocketAddr;

pub mod cors;
pub mod security;

pub use cors::create_cors_layer;
pub use security::security_header_layers;

const DEFAULT_BIND: &str = "0.0.0.0:3001";

#[derive(Debug, Clone)]
pub struct SmtpConfig {
    pub host: String,
    pub port: u16,
    pub username: String,
    pub password: String,
    pub from: String,
}

#[derive(Debug, Clone)]
pub struct Config {
    pub database_url: String,
    pub bind_addr: SocketAddr,
    /// Seconds the duplicate-scan guard keeps an identifier hot.
    pub scan_window_secs: i64,
    /// `None` disables outbound email entirely.
    pub smtp: Option<SmtpConfig>,
}

impl Config {
    pub fn from_env() -> Self {
        let bind_addr = env::var("BIND_ADDR")
            .ok()
            .and_then(|s| s.parse().ok())
            .unwrap_or_else(|| DEFAULT_BIND.parse().expect("default bind addr parses"));
        let scan_window_secs = env::var("SCAN_WINDOW_SECS")
            .ok()
            .and_then(|s| s.parse().ok())
            .unwrap_or(crate::services::validation::DUPLICATE_SCAN_WINDOW_SECS);
        Self {
            database_url: env::var("DATABASE_URL")
                .unwrap_or_else(|_| "postgres://localhost/taquilla".to_string()),
            bind_addr,
            scan_window_secs,
            smtp: Self::smtp_from_env(),
        }
    }

    fn smtp_from_env() -> Option<SmtpConfig> {
        let host = env::var("SMTP_HOST").ok()?;
        Some(SmtpConfig {
            host,
            port: env::var("SMTP_PORT")
                .ok()
                .and_then(|s| s.parse().ok())
                .unwrap_or(587),
            username: env::var("SMTP_USERNAME").unwrap_or_default(),
            password: env::var("SMTP_PASSWORD").unwrap_or_default(),
            from: env::var("SMTP_FROM").unwrap_or_else(|_| "tickets@taquilla.local".to_string()),
        })
    }
}

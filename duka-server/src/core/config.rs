//! Server configuration
//!
//! All settings come from environment variables with defaults suitable for
//! local development against the Daraja sandbox.
//!
//! | Variable | Default | Meaning |
//! |----------|---------|---------|
//! | WORK_DIR | /var/lib/duka | Working directory (database, logs) |
//! | HTTP_PORT | 3000 | HTTP API port |
//! | ENVIRONMENT | development | development \| staging \| production |
//! | STK_TIMEOUT_SECS | 180 | Window before a pending payment is failed |
//! | SWEEP_INTERVAL_SECS | 60 | How often the timeout sweep runs |
//! | MPESA_ENVIRONMENT | sandbox | sandbox \| production |
//! | MPESA_SHORTCODE | 174379 | Paybill / till number |
//! | MPESA_PASSKEY | (empty) | STK password passkey |
//! | MPESA_CONSUMER_KEY | (empty) | Daraja app consumer key |
//! | MPESA_CONSUMER_SECRET | (empty) | Daraja app consumer secret |
//! | MPESA_CALLBACK_URL | http://localhost:3000/api/payments/callback | Public webhook URL |

use crate::payment::gateway::{MpesaConfig, MpesaEnvironment};

#[derive(Debug, Clone)]
pub struct Config {
    /// Working directory for the database and log files
    pub work_dir: String,
    /// HTTP API port
    pub http_port: u16,
    /// Runtime environment: development | staging | production
    pub environment: String,
    /// Seconds a payment may sit `pending` before the sweep fails it
    pub stk_timeout_secs: u64,
    /// Timeout sweep period
    pub sweep_interval_secs: u64,
    /// Gateway credentials
    pub mpesa: MpesaConfig,
}

impl Config {
    /// Load configuration from environment variables, with defaults.
    pub fn from_env() -> Self {
        Self {
            work_dir: std::env::var("WORK_DIR").unwrap_or_else(|_| "/var/lib/duka".into()),
            http_port: std::env::var("HTTP_PORT")
                .ok()
                .and_then(|p| p.parse().ok())
                .unwrap_or(3000),
            environment: std::env::var("ENVIRONMENT").unwrap_or_else(|_| "development".into()),
            stk_timeout_secs: std::env::var("STK_TIMEOUT_SECS")
                .ok()
                .and_then(|p| p.parse().ok())
                .unwrap_or(180),
            sweep_interval_secs: std::env::var("SWEEP_INTERVAL_SECS")
                .ok()
                .and_then(|p| p.parse().ok())
                .unwrap_or(60),
            mpesa: MpesaConfig {
                environment: std::env::var("MPESA_ENVIRONMENT")
                    .ok()
                    .and_then(|v| v.parse().ok())
                    .unwrap_or(MpesaEnvironment::Sandbox),
                shortcode: std::env::var("MPESA_SHORTCODE").unwrap_or_else(|_| "174379".into()),
                passkey: std::env::var("MPESA_PASSKEY").unwrap_or_default(),
                consumer_key: std::env::var("MPESA_CONSUMER_KEY").unwrap_or_default(),
                consumer_secret: std::env::var("MPESA_CONSUMER_SECRET").unwrap_or_default(),
                callback_url: std::env::var("MPESA_CALLBACK_URL")
                    .unwrap_or_else(|_| "http://localhost:3000/api/payments/callback".into()),
            },
        }
    }

    /// Override the bits tests care about.
    pub fn with_overrides(work_dir: impl Into<String>, http_port: u16) -> Self {
        let mut config = Self::from_env();
        config.work_dir = work_dir.into();
        config.http_port = http_port;
        config
    }

    pub fn is_production(&self) -> bool {
        self.environment == "production"
    }

    /// Path of the redb database file under the working directory.
    pub fn database_path(&self) -> std::path::PathBuf {
        std::path::Path::new(&self.work_dir).join("duka.redb")
    }
}

impl Default for Config {
    fn default() -> Self {
        Self::from_env()
    }
}

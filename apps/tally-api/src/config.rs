//! # Server Configuration
//!
//! ## Configuration Sources
//! ```text
//! ┌─────────────────────────────────────────────────────────────────────────┐
//! │                    Configuration Priority                               │
//! │                                                                         │
//! │  1. Environment Variables (highest priority)                           │
//! │     TALLY_BIND_ADDR, DATABASE_PATH, JWT_SECRET,                        │
//! │     TALLY_LOCK_TIMEOUT_MS, TALLY_DECIMAL_SCALE,                        │
//! │     TALLY_VARIANCE_TOLERANCE, TALLY_JWT_LIFETIME_SECS                  │
//! │                                                                         │
//! │  2. TOML Config File                                                   │
//! │     $TALLY_CONFIG, else ./tally.toml                                   │
//! │                                                                         │
//! │  3. Default Values (lowest priority)                                   │
//! └─────────────────────────────────────────────────────────────────────────┘
//! ```
//!
//! ## Configuration File Format
//! ```toml
//! [server]
//! bind_addr = "0.0.0.0:8080"
//!
//! [database]
//! path = "./tally.db"
//! max_connections = 5
//!
//! [auth]
//! jwt_secret = "change-me"
//! access_lifetime_secs = 28800
//!
//! [pos]
//! lock_timeout_ms = 5000
//! decimal_scale = 2
//! default_variance_tolerance = "0.00"
//! ```
//!
//! Settlement switches are not configuration; they live in the
//! `settlement_settings` row and are edited through the API.

use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::time::Duration;
use tracing::{debug, info, warn};

use tally_core::money::{Money, DEFAULT_SCALE};
use tally_core::validation::{parse_amount, validate_scale};

const DEV_JWT_SECRET: &str = "tally-dev-secret-change-in-production";

// =============================================================================
// Sections
// =============================================================================

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ServerSettings {
    #[serde(default = "default_bind_addr")]
    pub bind_addr: String,
}

fn default_bind_addr() -> String {
    "0.0.0.0:8080".to_string()
}

impl Default for ServerSettings {
    fn default() -> Self {
        ServerSettings {
            bind_addr: default_bind_addr(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DatabaseSettings {
    /// SQLite file; `:memory:` for a throwaway database.
    #[serde(default = "default_db_path")]
    pub path: PathBuf,

    #[serde(default = "default_max_connections")]
    pub max_connections: u32,
}

fn default_db_path() -> PathBuf {
    PathBuf::from("./tally.db")
}

fn default_max_connections() -> u32 {
    5
}

impl Default for DatabaseSettings {
    fn default() -> Self {
        DatabaseSettings {
            path: default_db_path(),
            max_connections: default_max_connections(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AuthSettings {
    #[serde(default = "default_jwt_secret")]
    pub jwt_secret: String,

    /// Access token lifetime. One shift by default.
    #[serde(default = "default_access_lifetime")]
    pub access_lifetime_secs: i64,
}

fn default_jwt_secret() -> String {
    DEV_JWT_SECRET.to_string()
}

fn default_access_lifetime() -> i64 {
    8 * 3600
}

impl Default for AuthSettings {
    fn default() -> Self {
        AuthSettings {
            jwt_secret: default_jwt_secret(),
            access_lifetime_secs: default_access_lifetime(),
        }
    }
}

/// Options of the session and cash-handling core.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PosSettings {
    /// Deadline for lock acquisition and database waits; exceeded ⇒ `BUSY`.
    #[serde(default = "default_lock_timeout")]
    pub lock_timeout_ms: u64,

    /// Decimal places of the currency.
    #[serde(default = "default_scale")]
    pub decimal_scale: u32,

    /// `|variance| ≤ tolerance` closes without a reason.
    #[serde(default)]
    pub default_variance_tolerance: Decimal,
}

fn default_lock_timeout() -> u64 {
    5000
}

fn default_scale() -> u32 {
    DEFAULT_SCALE
}

impl Default for PosSettings {
    fn default() -> Self {
        PosSettings {
            lock_timeout_ms: default_lock_timeout(),
            decimal_scale: default_scale(),
            default_variance_tolerance: Decimal::ZERO,
        }
    }
}

// =============================================================================
// Server Configuration
// =============================================================================

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ServerConfig {
    #[serde(default)]
    pub server: ServerSettings,

    #[serde(default)]
    pub database: DatabaseSettings,

    #[serde(default)]
    pub auth: AuthSettings,

    #[serde(default)]
    pub pos: PosSettings,
}

impl ServerConfig {
    /// Loads defaults, then the config file, then environment overrides.
    pub fn load() -> Result<Self, ConfigError> {
        let path = std::env::var("TALLY_CONFIG")
            .map(PathBuf::from)
            .unwrap_or_else(|_| PathBuf::from("tally.toml"));
        Self::load_from(&path)
    }

    /// Same as [`ServerConfig::load`] with an explicit file path.
    pub fn load_from(path: &Path) -> Result<Self, ConfigError> {
        let mut config = if path.exists() {
            info!(?path, "Loading config from file");
            let contents = std::fs::read_to_string(path)
                .map_err(|e| ConfigError::Io(format!("{}: {}", path.display(), e)))?;
            Self::from_toml(&contents)?
        } else {
            debug!(?path, "Config file not found, using defaults");
            Self::default()
        };

        config.apply_env_overrides()?;
        config.validate()?;

        if config.auth.jwt_secret == DEV_JWT_SECRET {
            warn!("JWT_SECRET not set, using the development secret");
        }

        Ok(config)
    }

    pub fn from_toml(contents: &str) -> Result<Self, ConfigError> {
        toml::from_str(contents).map_err(|e| ConfigError::Parse(e.to_string()))
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.pos.lock_timeout_ms == 0 {
            return Err(ConfigError::InvalidValue(
                "pos.lock_timeout_ms must be greater than 0".into(),
            ));
        }
        validate_scale(self.pos.decimal_scale)
            .map_err(|e| ConfigError::InvalidValue(e.to_string()))?;
        self.variance_tolerance()?;

        if self.auth.jwt_secret.trim().is_empty() {
            return Err(ConfigError::MissingRequired("auth.jwt_secret".into()));
        }
        if self.auth.access_lifetime_secs <= 0 {
            return Err(ConfigError::InvalidValue(
                "auth.access_lifetime_secs must be positive".into(),
            ));
        }
        if self.database.max_connections == 0 {
            return Err(ConfigError::InvalidValue(
                "database.max_connections must be greater than 0".into(),
            ));
        }
        Ok(())
    }

    fn apply_env_overrides(&mut self) -> Result<(), ConfigError> {
        if let Ok(addr) = std::env::var("TALLY_BIND_ADDR") {
            debug!(addr = %addr, "Overriding bind address from environment");
            self.server.bind_addr = addr;
        }

        if let Ok(path) = std::env::var("DATABASE_PATH") {
            debug!(path = %path, "Overriding database path from environment");
            self.database.path = PathBuf::from(path);
        }

        if let Ok(secret) = std::env::var("JWT_SECRET") {
            self.auth.jwt_secret = secret;
        }

        if let Ok(value) = std::env::var("TALLY_JWT_LIFETIME_SECS") {
            self.auth.access_lifetime_secs = parse_env("TALLY_JWT_LIFETIME_SECS", &value)?;
        }

        if let Ok(value) = std::env::var("TALLY_LOCK_TIMEOUT_MS") {
            self.pos.lock_timeout_ms = parse_env("TALLY_LOCK_TIMEOUT_MS", &value)?;
        }

        if let Ok(value) = std::env::var("TALLY_DECIMAL_SCALE") {
            self.pos.decimal_scale = parse_env("TALLY_DECIMAL_SCALE", &value)?;
        }

        if let Ok(value) = std::env::var("TALLY_VARIANCE_TOLERANCE") {
            self.pos.default_variance_tolerance = parse_env("TALLY_VARIANCE_TOLERANCE", &value)?;
        }

        Ok(())
    }

    // =========================================================================
    // Convenience Methods
    // =========================================================================

    pub fn lock_timeout(&self) -> Duration {
        Duration::from_millis(self.pos.lock_timeout_ms)
    }

    pub fn scale(&self) -> u32 {
        self.pos.decimal_scale
    }

    /// The configured tolerance in minor units.
    pub fn variance_tolerance(&self) -> Result<Money, ConfigError> {
        parse_amount(
            "default_variance_tolerance",
            self.pos.default_variance_tolerance,
            self.pos.decimal_scale,
        )
        .map_err(|e| ConfigError::InvalidValue(e.to_string()))
    }
}

fn parse_env<T: std::str::FromStr>(name: &str, value: &str) -> Result<T, ConfigError> {
    value
        .trim()
        .parse()
        .map_err(|_| ConfigError::InvalidValue(name.to_string()))
}

/// Configuration error types.
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("Invalid value for {0}")]
    InvalidValue(String),

    #[error("Missing required configuration: {0}")]
    MissingRequired(String),

    #[error("Failed to parse config file: {0}")]
    Parse(String),

    #[error("Failed to read config file: {0}")]
    Io(String),
}

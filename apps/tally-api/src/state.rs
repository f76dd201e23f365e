//! Shared application state.

use tally_core::Money;
use tally_db::Database;

use crate::auth::JwtManager;
use crate::config::{ConfigError, ServerConfig};
use crate::locks::LockRegistry;

/// Everything a handler needs, behind one `Arc`.
pub struct AppState {
    pub db: Database,
    pub config: ServerConfig,
    pub jwt: JwtManager,
    pub locks: LockRegistry,
    /// `default_variance_tolerance` converted once at startup.
    pub tolerance: Money,
}

impl AppState {
    pub fn new(db: Database, config: ServerConfig) -> Result<Self, ConfigError> {
        let tolerance = config.variance_tolerance()?;
        let jwt = JwtManager::new(
            config.auth.jwt_secret.clone(),
            config.auth.access_lifetime_secs,
        );
        let locks = LockRegistry::new(config.lock_timeout());

        Ok(AppState {
            db,
            config,
            jwt,
            locks,
            tolerance,
        })
    }

    pub fn scale(&self) -> u32 {
        self.config.scale()
    }
}

//! Settlement settings and variance reasons.

use std::sync::Arc;

use serde_json::json;
use tracing::info;

use tally_core::{AuditEntry, SettlementReason, SettlementSettings, User};

use crate::error::ApiResult;
use crate::locks::LockKey;
use crate::services::require_admin;
use crate::state::AppState;

pub struct SettingsService {
    state: Arc<AppState>,
}

impl SettingsService {
    pub fn new(state: Arc<AppState>) -> Self {
        SettingsService { state }
    }

    pub async fn get(&self) -> ApiResult<SettlementSettings> {
        let mut conn = self.state.db.acquire().await?;
        Ok(self.state.db.settings().get(&mut conn).await?)
    }

    /// Replaces the whole settings row. Admin only.
    ///
    /// Operations already running keep the snapshot they read.
    pub async fn update(&self, user: &User, settings: SettlementSettings) -> ApiResult<SettlementSettings> {
        require_admin(user, "change settlement settings")?;

        self.state
            .locks
            .run_locked(
                vec![LockKey::Settings],
                update_locked(self.state.clone(), user.id.clone(), settings),
            )
            .await
    }

    pub async fn active_reasons(&self) -> ApiResult<Vec<SettlementReason>> {
        Ok(self.state.db.settings().list_active_reasons().await?)
    }
}

async fn update_locked(
    state: Arc<AppState>,
    actor_id: String,
    settings: SettlementSettings,
) -> ApiResult<SettlementSettings> {
    let db = &state.db;
    let mut tx = db.begin().await?;

    let previous = db.settings().get(&mut tx).await?;
    db.settings().update(&mut tx, &settings, &actor_id).await?;
    db.audit()
        .record(
            &mut tx,
            &AuditEntry::new(
                "settlement_settings",
                "1",
                "update",
                &actor_id,
                json!({ "before": previous, "after": settings }),
            ),
        )
        .await?;
    tx.commit().await?;

    info!(actor_id = %actor_id, "Settlement settings updated");
    Ok(settings)
}

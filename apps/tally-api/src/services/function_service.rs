//! POS function authorization and the role × function matrix.

use std::sync::Arc;

use serde_json::json;
use tracing::info;

use tally_core::functions::RolePosFunctionMapping;
use tally_core::{AuditEntry, User};

use crate::auth::verify_approver;
use crate::dto::{FunctionAuthorizeRequest, FunctionDecision};
use crate::error::ApiResult;
use crate::locks::LockKey;
use crate::services::require_admin;
use crate::state::AppState;

pub struct FunctionService {
    state: Arc<AppState>,
}

impl FunctionService {
    pub fn new(state: Arc<AppState>) -> Self {
        FunctionService { state }
    }

    /// Evaluates a function key for the current user, optionally with an
    /// approver standing by.
    pub async fn authorize(
        &self,
        user: &User,
        request: FunctionAuthorizeRequest,
    ) -> ApiResult<FunctionDecision> {
        let db = &self.state.db;
        let approver = verify_approver(db, request.approver.as_ref(), user).await?;

        let mut conn = db.acquire().await?;
        let matrix = db.functions().load_matrix(&mut conn).await?;
        let verdict = matrix.authorize(
            user.role,
            request.function_code,
            approver.as_ref().map(|a| a.role),
        );

        Ok(FunctionDecision::new(request.function_code, verdict))
    }

    pub async fn list_mappings(&self) -> ApiResult<Vec<RolePosFunctionMapping>> {
        Ok(self.state.db.functions().list_mappings().await?)
    }

    /// Changes one cell of the matrix. Admin only.
    pub async fn upsert_mapping(
        &self,
        user: &User,
        mapping: RolePosFunctionMapping,
    ) -> ApiResult<RolePosFunctionMapping> {
        require_admin(user, "change function mappings")?;
        mapping.validate()?;

        self.state
            .locks
            .run_locked(
                vec![LockKey::Settings],
                upsert_locked(self.state.clone(), user.id.clone(), mapping),
            )
            .await
    }
}

async fn upsert_locked(
    state: Arc<AppState>,
    actor_id: String,
    mapping: RolePosFunctionMapping,
) -> ApiResult<RolePosFunctionMapping> {
    let db = &state.db;
    let mut tx = db.begin().await?;

    db.functions().upsert_mapping(&mut tx, &mapping).await?;
    db.audit()
        .record(
            &mut tx,
            &AuditEntry::new(
                "role_pos_function_mapping",
                &format!("{}:{}", mapping.role, mapping.function_code),
                "upsert",
                &actor_id,
                json!({
                    "allowed": mapping.allowed,
                    "requires_approval": mapping.requires_approval,
                }),
            ),
        )
        .await?;
    tx.commit().await?;

    info!(
        role = %mapping.role,
        function = %mapping.function_code,
        allowed = mapping.allowed,
        requires_approval = mapping.requires_approval,
        "Function mapping updated"
    );
    Ok(mapping)
}

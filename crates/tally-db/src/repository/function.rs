//! # POS Function Repository
//!
//! The `pos_function` registry table and the role × function matrix.

use sqlx::{SqliteConnection, SqlitePool};
use tracing::{debug, info};

use crate::error::{DbError, DbResult};
use tally_core::functions::{seeded_mappings, FunctionMatrix, RolePosFunctionMapping, REGISTRY};

#[derive(Debug, Clone)]
pub struct FunctionRepository {
    pool: SqlitePool,
}

impl FunctionRepository {
    pub fn new(pool: SqlitePool) -> Self {
        FunctionRepository { pool }
    }

    /// Writes the fixed registry. Existing rows are left alone.
    pub async fn seed_registry(&self, conn: &mut SqliteConnection) -> DbResult<()> {
        for function in REGISTRY.iter() {
            sqlx::query(
                r#"
                INSERT OR IGNORE INTO pos_function (code, name, category, is_critical)
                VALUES (?1, ?2, ?3, ?4)
                "#,
            )
            .bind(function.code)
            .bind(function.name)
            .bind(function.category)
            .bind(function.is_critical)
            .execute(&mut *conn)
            .await?;
        }
        debug!(count = REGISTRY.len(), "POS function registry seeded");
        Ok(())
    }

    /// Writes the default role matrix without overwriting edited cells.
    pub async fn seed_role_mappings(&self, conn: &mut SqliteConnection) -> DbResult<()> {
        let mappings = seeded_mappings();
        for mapping in &mappings {
            sqlx::query(
                r#"
                INSERT OR IGNORE INTO role_pos_function_mapping
                    (role, function_code, allowed, requires_approval)
                VALUES (?1, ?2, ?3, ?4)
                "#,
            )
            .bind(mapping.role)
            .bind(mapping.function_code)
            .bind(mapping.allowed)
            .bind(mapping.requires_approval)
            .execute(&mut *conn)
            .await?;
        }
        info!(count = mappings.len(), "Role function mappings seeded");
        Ok(())
    }

    pub async fn list_mappings(&self) -> DbResult<Vec<RolePosFunctionMapping>> {
        let mappings = sqlx::query_as::<_, RolePosFunctionMapping>(
            r#"
            SELECT role, function_code, allowed, requires_approval
            FROM role_pos_function_mapping
            ORDER BY role, function_code
            "#,
        )
        .fetch_all(&self.pool)
        .await?;
        Ok(mappings)
    }

    /// Inserts or replaces one cell of the matrix.
    pub async fn upsert_mapping(
        &self,
        conn: &mut SqliteConnection,
        mapping: &RolePosFunctionMapping,
    ) -> DbResult<()> {
        mapping
            .validate()
            .map_err(|e| DbError::ConstraintViolation(e.to_string()))?;

        debug!(
            role = %mapping.role,
            function = %mapping.function_code,
            allowed = mapping.allowed,
            requires_approval = mapping.requires_approval,
            "Upserting function mapping"
        );

        sqlx::query(
            r#"
            INSERT INTO role_pos_function_mapping (role, function_code, allowed, requires_approval)
            VALUES (?1, ?2, ?3, ?4)
            ON CONFLICT (role, function_code) DO UPDATE SET
                allowed = excluded.allowed,
                requires_approval = excluded.requires_approval
            "#,
        )
        .bind(mapping.role)
        .bind(mapping.function_code)
        .bind(mapping.allowed)
        .bind(mapping.requires_approval)
        .execute(conn)
        .await?;
        Ok(())
    }

    /// Loads the whole matrix as one snapshot.
    pub async fn load_matrix(&self, conn: &mut SqliteConnection) -> DbResult<FunctionMatrix> {
        let mappings = sqlx::query_as::<_, RolePosFunctionMapping>(
            "SELECT role, function_code, allowed, requires_approval FROM role_pos_function_mapping",
        )
        .fetch_all(conn)
        .await?;
        Ok(FunctionMatrix::from_mappings(&mappings))
    }
}

//! # Reference Data
//!
//! Rows every installation needs: the POS function registry, the default
//! role matrix and the stock variance reasons. Seeding is idempotent and
//! never overwrites rows an administrator has edited.
//!
//! Password hashing lives here too so the seed binary and the API agree on
//! one format (argon2id PHC strings).

use argon2::password_hash::rand_core::OsRng;
use argon2::password_hash::{PasswordHash, PasswordHasher, PasswordVerifier, SaltString};
use argon2::Argon2;
use tracing::info;

use crate::error::{DbError, DbResult};
use crate::pool::Database;
use tally_core::{ReasonType, SettlementReason};

/// Variance reasons installed on a fresh database.
pub fn default_reasons() -> Vec<SettlementReason> {
    [
        ("SHORT", "Cash short", ReasonType::Shortage),
        ("MISCOUNT", "Miscounted change", ReasonType::Shortage),
        ("OVER", "Cash over", ReasonType::Excess),
        ("OTHER", "Other (see note)", ReasonType::Other),
    ]
    .into_iter()
    .map(|(code, name, reason_type)| SettlementReason {
        code: code.to_string(),
        name: name.to_string(),
        reason_type,
        is_active: true,
    })
    .collect()
}

/// Installs the registry, the role matrix and the default reasons.
pub async fn seed_reference_data(db: &Database) -> DbResult<()> {
    let mut tx = db.begin().await?;

    db.functions().seed_registry(&mut tx).await?;
    db.functions().seed_role_mappings(&mut tx).await?;
    for reason in default_reasons() {
        db.settings().insert_reason(&mut tx, &reason).await?;
    }

    tx.commit().await?;
    info!("Reference data seeded");
    Ok(())
}

/// Hashes a password for storage.
pub fn hash_password(password: &str) -> DbResult<String> {
    let salt = SaltString::generate(&mut OsRng);
    let hash = Argon2::default()
        .hash_password(password.as_bytes(), &salt)
        .map_err(|e| DbError::Internal(format!("Failed to hash password: {}", e)))?;
    Ok(hash.to_string())
}

/// Checks a password against a stored hash. Malformed hashes never verify.
pub fn verify_password(password: &str, hash: &str) -> bool {
    let Ok(parsed) = PasswordHash::new(hash) else {
        return false;
    };
    Argon2::default()
        .verify_password(password.as_bytes(), &parsed)
        .is_ok()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::pool::DbConfig;
    use tally_core::functions::FunctionCode;
    use tally_core::Role;

    #[test]
    fn test_password_round_trip() {
        let hash = hash_password("s3cret").unwrap();
        assert!(verify_password("s3cret", &hash));
        assert!(!verify_password("wrong", &hash));
        assert!(!verify_password("s3cret", "not-a-hash"));
    }

    #[tokio::test]
    async fn test_seed_is_idempotent() {
        let db = Database::new(DbConfig::in_memory()).await.unwrap();
        seed_reference_data(&db).await.unwrap();
        seed_reference_data(&db).await.unwrap();

        let mappings = db.functions().list_mappings().await.unwrap();
        assert_eq!(mappings.len(), 22 * 3);

        let reasons = db.settings().list_active_reasons().await.unwrap();
        assert_eq!(reasons.len(), default_reasons().len());
    }

    #[tokio::test]
    async fn test_seeded_posuser_needs_approval_for_critical() {
        let db = Database::new(DbConfig::in_memory()).await.unwrap();
        seed_reference_data(&db).await.unwrap();

        let mut conn = db.acquire().await.unwrap();
        let matrix = db.functions().load_matrix(&mut conn).await.unwrap();
        for code in FunctionCode::all().filter(|c| c.is_critical()) {
            assert!(
                !matrix.allows_unapproved(Role::PosUser, code),
                "{} must need approval",
                code
            );
        }
    }
}

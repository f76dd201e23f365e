//! # Organisation Repository
//!
//! Companies, locations, terminals, users and their location mappings.

use chrono::Utc;
use sqlx::{SqliteConnection, SqlitePool};
use tracing::debug;

use crate::error::{DbError, DbResult};
use tally_core::access::validate_mappings;
use tally_core::validation::{validate_code, validate_username};
use tally_core::{
    AccessType, Company, Location, LocationType, MappedLocation, Terminal, User,
    UserLocationMapping,
};

/// A user row together with its password hash.
#[derive(Debug, Clone, sqlx::FromRow)]
pub struct UserCredentials {
    #[sqlx(flatten)]
    pub user: User,
    pub password_hash: String,
}

#[derive(sqlx::FromRow)]
struct MappedRow {
    mapping_id: String,
    user_id: String,
    location_id: String,
    access_type: AccessType,
    is_default: bool,
    mapping_active: bool,
    company_id: String,
    code: String,
    name: String,
    location_type: LocationType,
    location_active: bool,
}

impl From<MappedRow> for MappedLocation {
    fn from(row: MappedRow) -> Self {
        MappedLocation {
            mapping: UserLocationMapping {
                id: row.mapping_id,
                user_id: row.user_id,
                location_id: row.location_id.clone(),
                access_type: row.access_type,
                is_default: row.is_default,
                is_active: row.mapping_active,
            },
            location: Location {
                id: row.location_id,
                company_id: row.company_id,
                code: row.code,
                name: row.name,
                location_type: row.location_type,
                is_active: row.location_active,
            },
        }
    }
}

/// Repository for organisation master data.
#[derive(Debug, Clone)]
pub struct OrgRepository {
    pool: SqlitePool,
}

impl OrgRepository {
    pub fn new(pool: SqlitePool) -> Self {
        OrgRepository { pool }
    }

    // -------------------------------------------------------------------------
    // Companies & locations
    // -------------------------------------------------------------------------

    pub async fn insert_company(&self, conn: &mut SqliteConnection, company: &Company) -> DbResult<()> {
        debug!(id = %company.id, "Inserting company");
        sqlx::query("INSERT INTO company (id, name, created_at) VALUES (?1, ?2, ?3)")
            .bind(&company.id)
            .bind(&company.name)
            .bind(company.created_at)
            .execute(conn)
            .await?;
        Ok(())
    }

    pub async fn insert_location(&self, conn: &mut SqliteConnection, location: &Location) -> DbResult<()> {
        validate_code("code", &location.code).map_err(|e| DbError::ConstraintViolation(e.to_string()))?;
        debug!(id = %location.id, code = %location.code, "Inserting location");

        sqlx::query(
            r#"
            INSERT INTO location (id, company_id, code, name, location_type, is_active)
            VALUES (?1, ?2, ?3, ?4, ?5, ?6)
            "#,
        )
        .bind(&location.id)
        .bind(&location.company_id)
        .bind(&location.code)
        .bind(&location.name)
        .bind(location.location_type)
        .bind(location.is_active)
        .execute(conn)
        .await?;
        Ok(())
    }

    pub async fn find_location(&self, conn: &mut SqliteConnection, id: &str) -> DbResult<Option<Location>> {
        let location = sqlx::query_as::<_, Location>(
            "SELECT id, company_id, code, name, location_type, is_active FROM location WHERE id = ?1",
        )
        .bind(id)
        .fetch_optional(conn)
        .await?;
        Ok(location)
    }

    /// Every location, active or not, ordered by code.
    pub async fn list_locations(&self) -> DbResult<Vec<Location>> {
        let locations = sqlx::query_as::<_, Location>(
            "SELECT id, company_id, code, name, location_type, is_active FROM location ORDER BY code",
        )
        .fetch_all(&self.pool)
        .await?;
        Ok(locations)
    }

    // -------------------------------------------------------------------------
    // Terminals
    // -------------------------------------------------------------------------

    pub async fn insert_terminal(&self, conn: &mut SqliteConnection, terminal: &Terminal) -> DbResult<()> {
        validate_code("code", &terminal.code).map_err(|e| DbError::ConstraintViolation(e.to_string()))?;
        debug!(id = %terminal.id, location_id = %terminal.location_id, "Inserting terminal");

        sqlx::query(
            "INSERT INTO terminal (id, location_id, code, name, is_active) VALUES (?1, ?2, ?3, ?4, ?5)",
        )
        .bind(&terminal.id)
        .bind(&terminal.location_id)
        .bind(&terminal.code)
        .bind(&terminal.name)
        .bind(terminal.is_active)
        .execute(conn)
        .await?;
        Ok(())
    }

    pub async fn find_terminal(&self, conn: &mut SqliteConnection, id: &str) -> DbResult<Option<Terminal>> {
        let terminal = sqlx::query_as::<_, Terminal>(
            "SELECT id, location_id, code, name, is_active FROM terminal WHERE id = ?1",
        )
        .bind(id)
        .fetch_optional(conn)
        .await?;
        Ok(terminal)
    }

    // -------------------------------------------------------------------------
    // Users
    // -------------------------------------------------------------------------

    pub async fn insert_user(
        &self,
        conn: &mut SqliteConnection,
        user: &User,
        password_hash: &str,
    ) -> DbResult<()> {
        validate_username(&user.username).map_err(|e| DbError::ConstraintViolation(e.to_string()))?;
        debug!(id = %user.id, role = %user.role, "Inserting user");

        sqlx::query(
            r#"
            INSERT INTO users (id, username, display_name, password_hash, role, is_active, created_at)
            VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7)
            "#,
        )
        .bind(&user.id)
        .bind(user.username.trim())
        .bind(&user.display_name)
        .bind(password_hash)
        .bind(user.role)
        .bind(user.is_active)
        .bind(Utc::now())
        .execute(conn)
        .await?;
        Ok(())
    }

    pub async fn find_user(&self, conn: &mut SqliteConnection, id: &str) -> DbResult<Option<User>> {
        let user = sqlx::query_as::<_, User>(
            "SELECT id, username, display_name, role, is_active FROM users WHERE id = ?1",
        )
        .bind(id)
        .fetch_optional(conn)
        .await?;
        Ok(user)
    }

    /// Looks a user up by login name, including the password hash.
    pub async fn find_credentials(&self, username: &str) -> DbResult<Option<UserCredentials>> {
        let credentials = sqlx::query_as::<_, UserCredentials>(
            r#"
            SELECT id, username, display_name, role, is_active, password_hash
            FROM users
            WHERE username = ?1
            "#,
        )
        .bind(username.trim())
        .fetch_optional(&self.pool)
        .await?;
        Ok(credentials)
    }

    // -------------------------------------------------------------------------
    // Location mappings
    // -------------------------------------------------------------------------

    /// Adds a mapping after checking it against the user's existing ones.
    pub async fn insert_mapping(
        &self,
        conn: &mut SqliteConnection,
        mapping: &UserLocationMapping,
    ) -> DbResult<()> {
        let user = self
            .find_user(&mut *conn, &mapping.user_id)
            .await?
            .ok_or_else(|| DbError::not_found("User", &mapping.user_id))?;

        let mut all = self.list_mappings(&mut *conn, &mapping.user_id).await?;
        all.push(mapping.clone());
        validate_mappings(user.role, &all).map_err(|e| DbError::ConstraintViolation(e.to_string()))?;

        debug!(user_id = %mapping.user_id, location_id = %mapping.location_id, "Inserting location mapping");
        sqlx::query(
            r#"
            INSERT INTO user_location_mapping (id, user_id, location_id, access_type, is_default, is_active)
            VALUES (?1, ?2, ?3, ?4, ?5, ?6)
            "#,
        )
        .bind(&mapping.id)
        .bind(&mapping.user_id)
        .bind(&mapping.location_id)
        .bind(mapping.access_type)
        .bind(mapping.is_default)
        .bind(mapping.is_active)
        .execute(conn)
        .await?;
        Ok(())
    }

    pub async fn list_mappings(
        &self,
        conn: &mut SqliteConnection,
        user_id: &str,
    ) -> DbResult<Vec<UserLocationMapping>> {
        let mappings = sqlx::query_as::<_, UserLocationMapping>(
            r#"
            SELECT id, user_id, location_id, access_type, is_default, is_active
            FROM user_location_mapping
            WHERE user_id = ?1
            "#,
        )
        .bind(user_id)
        .fetch_all(conn)
        .await?;
        Ok(mappings)
    }

    /// All of a user's mappings joined with their locations.
    ///
    /// Inactive rows are included; the access policy filters them.
    pub async fn mapped_locations(
        &self,
        conn: &mut SqliteConnection,
        user_id: &str,
    ) -> DbResult<Vec<MappedLocation>> {
        let rows = sqlx::query_as::<_, MappedRow>(
            r#"
            SELECT
                m.id          AS mapping_id,
                m.user_id     AS user_id,
                m.location_id AS location_id,
                m.access_type AS access_type,
                m.is_default  AS is_default,
                m.is_active   AS mapping_active,
                l.company_id  AS company_id,
                l.code        AS code,
                l.name        AS name,
                l.location_type AS location_type,
                l.is_active   AS location_active
            FROM user_location_mapping m
            JOIN location l ON l.id = m.location_id
            WHERE m.user_id = ?1
            ORDER BY l.code
            "#,
        )
        .bind(user_id)
        .fetch_all(conn)
        .await?;

        Ok(rows.into_iter().map(MappedLocation::from).collect())
    }
}

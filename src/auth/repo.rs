use async_trait::async_trait;
use sqlx::{postgres::PgPoolOptions, types::Json, PgPool};
use time::OffsetDateTime;
use tracing::{debug, info};
use uuid::Uuid;

use crate::auth::repo_types::{Role, User, UserRow};
use crate::config::AppConfig;
use crate::error::StoreError;

/// Durable user records. Implementations enforce global `email` uniqueness
/// and per-role uniqueness of the profile identifiers.
#[async_trait]
pub trait UserStore: Send + Sync {
    async fn insert(&self, user: &User) -> Result<(), StoreError>;

    /// Writes `name` and `profile` of an existing record. Credentials, the
    /// active flag and the login stamp are left as stored.
    async fn update_details(&self, user: &User) -> Result<(), StoreError>;

    async fn update_password(
        &self,
        id: Uuid,
        password_hash: &str,
        at: OffsetDateTime,
    ) -> Result<(), StoreError>;

    /// Stamps a successful login. Returns false when the user no longer
    /// exists or is no longer active.
    async fn record_login(&self, id: Uuid, at: OffsetDateTime) -> Result<bool, StoreError>;

    async fn find_by_id(&self, id: Uuid) -> Result<Option<User>, StoreError>;

    async fn find_by_email(&self, email: &str) -> Result<Option<User>, StoreError>;

    async fn find_active_by_email_and_role(
        &self,
        email: &str,
        role: Role,
    ) -> Result<Option<User>, StoreError>;

    /// Soft delete / reactivate. Returns false when no such user exists.
    async fn set_active(
        &self,
        id: Uuid,
        active: bool,
        at: OffsetDateTime,
    ) -> Result<bool, StoreError>;

    async fn count(&self) -> Result<i64, StoreError>;

    async fn close(&self);
}

const USER_COLUMNS: &str =
    "id, email, password_hash, name, role, profile, is_active, last_login, created_at, updated_at";

/// PostgreSQL-backed store.
#[derive(Clone)]
pub struct PgUserStore {
    pool: PgPool,
}

impl PgUserStore {
    pub async fn connect(config: &AppConfig) -> Result<Self, sqlx::Error> {
        let pool = PgPoolOptions::new()
            .max_connections(config.database_max_connections)
            .connect(&config.database_url)
            .await?;
        info!("connected to user store");
        Ok(Self { pool })
    }

    pub async fn migrate(&self) -> Result<(), sqlx::migrate::MigrateError> {
        sqlx::migrate!("./migrations").run(&self.pool).await
    }
}

#[async_trait]
impl UserStore for PgUserStore {
    async fn insert(&self, user: &User) -> Result<(), StoreError> {
        sqlx::query(
            r#"
            INSERT INTO users (id, email, password_hash, name, role, profile,
                               is_active, last_login, created_at, updated_at)
            VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10)
            "#,
        )
        .bind(user.id)
        .bind(&user.email)
        .bind(&user.password_hash)
        .bind(&user.name)
        .bind(user.role().as_str())
        .bind(Json(user.profile.to_value()))
        .bind(user.is_active)
        .bind(user.last_login)
        .bind(user.created_at)
        .bind(user.updated_at)
        .execute(&self.pool)
        .await
        .map_err(map_sqlx_error)?;
        debug!(user_id = %user.id, role = %user.role(), "user row inserted");
        Ok(())
    }

    async fn update_details(&self, user: &User) -> Result<(), StoreError> {
        let result = sqlx::query(
            r#"UPDATE users SET name = $2, profile = $3, updated_at = $4 WHERE id = $1"#,
        )
        .bind(user.id)
        .bind(&user.name)
        .bind(Json(user.profile.to_value()))
        .bind(user.updated_at)
        .execute(&self.pool)
        .await
        .map_err(map_sqlx_error)?;
        if result.rows_affected() == 0 {
            return Err(StoreError::NotFound(user.id));
        }
        Ok(())
    }

    async fn update_password(
        &self,
        id: Uuid,
        password_hash: &str,
        at: OffsetDateTime,
    ) -> Result<(), StoreError> {
        let result =
            sqlx::query(r#"UPDATE users SET password_hash = $2, updated_at = $3 WHERE id = $1"#)
                .bind(id)
                .bind(password_hash)
                .bind(at)
                .execute(&self.pool)
                .await
                .map_err(map_sqlx_error)?;
        if result.rows_affected() == 0 {
            return Err(StoreError::NotFound(id));
        }
        Ok(())
    }

    async fn record_login(&self, id: Uuid, at: OffsetDateTime) -> Result<bool, StoreError> {
        let result = sqlx::query(
            r#"UPDATE users SET last_login = $2, updated_at = $2 WHERE id = $1 AND is_active"#,
        )
        .bind(id)
        .bind(at)
        .execute(&self.pool)
        .await
        .map_err(map_sqlx_error)?;
        Ok(result.rows_affected() > 0)
    }

    async fn find_by_id(&self, id: Uuid) -> Result<Option<User>, StoreError> {
        let row = sqlx::query_as::<_, UserRow>(&format!(
            "SELECT {USER_COLUMNS} FROM users WHERE id = $1"
        ))
        .bind(id)
        .fetch_optional(&self.pool)
        .await
        .map_err(map_sqlx_error)?;
        row.map(User::try_from).transpose()
    }

    async fn find_by_email(&self, email: &str) -> Result<Option<User>, StoreError> {
        let row = sqlx::query_as::<_, UserRow>(&format!(
            "SELECT {USER_COLUMNS} FROM users WHERE email = $1"
        ))
        .bind(email)
        .fetch_optional(&self.pool)
        .await
        .map_err(map_sqlx_error)?;
        row.map(User::try_from).transpose()
    }

    async fn find_active_by_email_and_role(
        &self,
        email: &str,
        role: Role,
    ) -> Result<Option<User>, StoreError> {
        let row = sqlx::query_as::<_, UserRow>(&format!(
            "SELECT {USER_COLUMNS} FROM users WHERE email = $1 AND role = $2 AND is_active"
        ))
        .bind(email)
        .bind(role.as_str())
        .fetch_optional(&self.pool)
        .await
        .map_err(map_sqlx_error)?;
        row.map(User::try_from).transpose()
    }

    async fn set_active(
        &self,
        id: Uuid,
        active: bool,
        at: OffsetDateTime,
    ) -> Result<bool, StoreError> {
        let result =
            sqlx::query(r#"UPDATE users SET is_active = $2, updated_at = $3 WHERE id = $1"#)
                .bind(id)
                .bind(active)
                .bind(at)
                .execute(&self.pool)
                .await
                .map_err(map_sqlx_error)?;
        Ok(result.rows_affected() > 0)
    }

    async fn count(&self) -> Result<i64, StoreError> {
        sqlx::query_scalar::<_, i64>("SELECT COUNT(*) FROM users")
            .fetch_one(&self.pool)
            .await
            .map_err(map_sqlx_error)
    }

    async fn close(&self) {
        self.pool.close().await;
        info!("user store connection pool closed");
    }
}

/// Field reported for a violated unique index; names match `migrations/`.
fn field_for_constraint(constraint: Option<&str>) -> &'static str {
    match constraint {
        Some("users_email_key") => "email",
        Some("users_member_id_key") => "memberId",
        Some("users_license_number_key") => "licenseNumber",
        Some("users_npi_number_key") => "npiNumber",
        Some("users_employee_id_key") => "employeeId",
        _ => "record",
    }
}

fn map_sqlx_error(e: sqlx::Error) -> StoreError {
    match &e {
        sqlx::Error::Database(db) if db.is_unique_violation() => StoreError::Duplicate {
            field: field_for_constraint(db.constraint()),
        },
        sqlx::Error::Io(_)
        | sqlx::Error::Tls(_)
        | sqlx::Error::PoolTimedOut
        | sqlx::Error::PoolClosed
        | sqlx::Error::WorkerCrashed => StoreError::Unavailable(e.to_string()),
        sqlx::Error::ColumnDecode { .. } | sqlx::Error::Decode(_) => {
            StoreError::Corrupt(e.to_string())
        }
        _ => StoreError::Backend(e.to_string()),
    }
}

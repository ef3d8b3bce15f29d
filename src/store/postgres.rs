//! PostgreSQL [`Datastore`] on a `sqlx` pool. Schema lives in `sql/schema.sql`.

use super::{
    Datastore, StoreError, StoreResult,
    models::{ApiToken, EmailAddress, RejectedToken, Role, User, UserByEmail},
};
use async_trait::async_trait;
use sqlx::{
    PgPool, Row,
    postgres::{PgPoolOptions, PgRow},
};
use std::time::Duration;
use tracing::{Instrument, Span};

const USER_COLUMNS: &str = "u.id, u.username, u.display_name, u.first_name, u.last_name, \
     u.avatar, u.password_hash, u.totp_secret, u.extra::text AS extra, u.deleted, \
     (SELECT e.address FROM user_emails e WHERE e.user_id = u.id AND e.is_primary LIMIT 1) AS email";

fn query_span(operation: &'static str, statement: &str) -> Span {
    tracing::info_span!(
        "db.query",
        db.system = "postgresql",
        db.operation = operation,
        db.statement = statement
    )
}

#[derive(Clone, Debug)]
pub struct PgStore {
    pool: PgPool,
}

impl PgStore {
    #[must_use]
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }

    /// Connect a pool to `dsn`.
    ///
    /// # Errors
    ///
    /// Returns an error when the database cannot be reached.
    pub async fn connect(dsn: &str, max_connections: u32) -> StoreResult<Self> {
        let pool = PgPoolOptions::new()
            .max_connections(max_connections)
            .acquire_timeout(Duration::from_secs(5))
            .connect(dsn)
            .await?;
        Ok(Self::new(pool))
    }

    async fn fetch_user(&self, filter: &str, value: &str) -> StoreResult<User> {
        let query = format!("SELECT {USER_COLUMNS} FROM users u WHERE {filter}");
        let row = sqlx::query(&query)
            .bind(value)
            .fetch_optional(&self.pool)
            .instrument(query_span("SELECT", &query))
            .await?
            .ok_or(StoreError::NotFound)?;
        user_from_row(&row)
    }

    async fn fetch_roles(&self, query: &'static str, key: &str) -> StoreResult<Vec<Role>> {
        let rows = sqlx::query(query)
            .bind(key)
            .fetch_all(&self.pool)
            .instrument(query_span("SELECT", query))
            .await?;
        rows.iter().map(role_from_row).collect()
    }
}

fn user_from_row(row: &PgRow) -> StoreResult<User> {
    let extra: Option<String> = row.try_get("extra")?;
    let extra = extra
        .map(|raw| serde_json::from_str(&raw))
        .transpose()
        .map_err(|err| StoreError::Other(format!("invalid user extra attributes: {err}")))?;
    Ok(User {
        id: row.try_get("id")?,
        username: row.try_get("username")?,
        display_name: row.try_get("display_name")?,
        first_name: row.try_get("first_name")?,
        last_name: row.try_get("last_name")?,
        avatar: row.try_get("avatar")?,
        password_hash: row.try_get("password_hash")?,
        totp_secret: row.try_get("totp_secret")?,
        email: row.try_get("email")?,
        extra,
        deleted: row.try_get("deleted")?,
    })
}

fn role_from_row(row: &PgRow) -> StoreResult<Role> {
    Ok(Role {
        id: row.try_get("id")?,
        name: row.try_get("name")?,
        description: row.try_get("description")?,
    })
}

fn api_token_from_row(row: &PgRow) -> StoreResult<ApiToken> {
    Ok(ApiToken {
        id: row.try_get("id")?,
        token_hash: row.try_get("token_hash")?,
        redacted: row.try_get("redacted")?,
        description: row.try_get("description")?,
        user_id: row.try_get("user_id")?,
        created_at: row.try_get("created_at")?,
        expires_at: row.try_get("expires_at")?,
    })
}

#[async_trait]
impl Datastore for PgStore {
    async fn get_user_by_id(&self, user_id: &str) -> StoreResult<User> {
        self.fetch_user("u.id = $1", user_id).await
    }

    async fn get_user_by_name(&self, username: &str) -> StoreResult<User> {
        self.fetch_user("u.username = $1", username).await
    }

    async fn get_user_by_email(&self, address: &str) -> StoreResult<UserByEmail> {
        let query = "SELECT user_id, verified FROM user_emails WHERE lower(address) = lower($1)";
        let row = sqlx::query(query)
            .bind(address)
            .fetch_optional(&self.pool)
            .instrument(query_span("SELECT", query))
            .await?
            .ok_or(StoreError::NotFound)?;
        let user_id: String = row.try_get("user_id")?;
        let verified: bool = row.try_get("verified")?;
        let user = self.get_user_by_id(&user_id).await?;
        Ok(UserByEmail { user, verified })
    }

    async fn get_primary_email(&self, user_id: &str) -> StoreResult<EmailAddress> {
        let query =
            "SELECT address, verified FROM user_emails WHERE user_id = $1 AND is_primary LIMIT 1";
        let row = sqlx::query(query)
            .bind(user_id)
            .fetch_optional(&self.pool)
            .instrument(query_span("SELECT", query))
            .await?
            .ok_or(StoreError::NotFound)?;
        Ok(EmailAddress {
            address: row.try_get("address")?,
            verified: row.try_get("verified")?,
        })
    }

    async fn get_roles_for_user(&self, user_id: &str) -> StoreResult<Vec<Role>> {
        self.fetch_roles(
            "SELECT r.id, r.name, r.description FROM roles r \
             JOIN role_assignments a ON a.role_id = r.id \
             WHERE a.user_id = $1 ORDER BY r.id",
            user_id,
        )
        .await
    }

    async fn get_role_permissions(&self, role_id: &str) -> StoreResult<Vec<String>> {
        let query = "SELECT permission FROM role_permissions WHERE role_id = $1 ORDER BY permission";
        let rows = sqlx::query(query)
            .bind(role_id)
            .fetch_all(&self.pool)
            .instrument(query_span("SELECT", query))
            .await?;
        rows.iter()
            .map(|row| row.try_get("permission").map_err(StoreError::from))
            .collect()
    }

    async fn check_and_delete_recovery_code(
        &self,
        user_id: &str,
        code_hash: &str,
    ) -> StoreResult<bool> {
        let query = "DELETE FROM recovery_codes WHERE user_id = $1 AND code_hash = $2";
        let result = sqlx::query(query)
            .bind(user_id)
            .bind(code_hash)
            .execute(&self.pool)
            .instrument(query_span("DELETE", query))
            .await?;
        Ok(result.rows_affected() > 0)
    }

    async fn reject_token(&self, token: RejectedToken) -> StoreResult<()> {
        let query = "INSERT INTO rejected_tokens (token_id, user_id, issued_at, expires_at) \
                     VALUES ($1, $2, $3, $4) ON CONFLICT (token_id) DO NOTHING";
        sqlx::query(query)
            .bind(&token.token_id)
            .bind(&token.user_id)
            .bind(token.issued_at)
            .bind(token.expires_at)
            .execute(&self.pool)
            .instrument(query_span("INSERT", query))
            .await?;
        Ok(())
    }

    async fn is_token_rejected(&self, token_id: &str) -> StoreResult<bool> {
        let query = "SELECT 1 FROM rejected_tokens WHERE token_id = $1";
        let row = sqlx::query(query)
            .bind(token_id)
            .fetch_optional(&self.pool)
            .instrument(query_span("SELECT", query))
            .await?;
        Ok(row.is_some())
    }

    async fn delete_expired_rejections(&self, threshold: i64) -> StoreResult<u64> {
        let query = "DELETE FROM rejected_tokens WHERE expires_at < $1";
        let result = sqlx::query(query)
            .bind(threshold)
            .execute(&self.pool)
            .instrument(query_span("DELETE", query))
            .await?;
        Ok(result.rows_affected())
    }

    async fn create_api_token(&self, token: ApiToken, role_ids: &[String]) -> StoreResult<()> {
        let mut tx = self.pool.begin().await?;

        let query = "INSERT INTO api_tokens \
                     (id, token_hash, redacted, description, user_id, created_at, expires_at) \
                     VALUES ($1, $2, $3, $4, $5, $6, $7)";
        sqlx::query(query)
            .bind(&token.id)
            .bind(&token.token_hash)
            .bind(&token.redacted)
            .bind(&token.description)
            .bind(&token.user_id)
            .bind(token.created_at)
            .bind(token.expires_at)
            .execute(&mut *tx)
            .instrument(query_span("INSERT", query))
            .await?;

        let query = "INSERT INTO api_token_roles (token_id, role_id) VALUES ($1, $2)";
        for role_id in role_ids {
            sqlx::query(query)
                .bind(&token.id)
                .bind(role_id)
                .execute(&mut *tx)
                .instrument(query_span("INSERT", query))
                .await?;
        }

        tx.commit().await?;
        Ok(())
    }

    async fn get_api_token_by_hash(&self, token_hash: &str) -> StoreResult<ApiToken> {
        let query = "SELECT id, token_hash, redacted, description, user_id, created_at, expires_at \
                     FROM api_tokens WHERE token_hash = $1";
        let row = sqlx::query(query)
            .bind(token_hash)
            .fetch_optional(&self.pool)
            .instrument(query_span("SELECT", query))
            .await?
            .ok_or(StoreError::NotFound)?;
        api_token_from_row(&row)
    }

    async fn get_api_tokens_for_user(&self, user_id: &str) -> StoreResult<Vec<ApiToken>> {
        let query = "SELECT id, token_hash, redacted, description, user_id, created_at, expires_at \
                     FROM api_tokens WHERE user_id = $1 ORDER BY created_at, id";
        let rows = sqlx::query(query)
            .bind(user_id)
            .fetch_all(&self.pool)
            .instrument(query_span("SELECT", query))
            .await?;
        rows.iter().map(api_token_from_row).collect()
    }

    async fn get_roles_for_api_token(&self, token_id: &str) -> StoreResult<Vec<Role>> {
        self.fetch_roles(
            "SELECT r.id, r.name, r.description FROM roles r \
             JOIN api_token_roles t ON t.role_id = r.id \
             WHERE t.token_id = $1 ORDER BY r.id",
            token_id,
        )
        .await
    }

    async fn revoke_api_token(&self, token_id: &str, user_id: &str) -> StoreResult<u64> {
        let query = "DELETE FROM api_tokens WHERE id = $1 AND user_id = $2";
        let result = sqlx::query(query)
            .bind(token_id)
            .bind(user_id)
            .execute(&self.pool)
            .instrument(query_span("DELETE", query))
            .await?;
        Ok(result.rows_affected())
    }

    async fn ping(&self) -> StoreResult<()> {
        let query = "SELECT 1";
        sqlx::query(query)
            .execute(&self.pool)
            .instrument(query_span("SELECT", query))
            .await?;
        Ok(())
    }
}

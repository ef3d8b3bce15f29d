//! Persistence contract consumed by the identity core.
//!
//! The core never talks to a database directly; everything goes through the
//! [`Datastore`] trait. [`postgres::PgStore`] backs production deployments and
//! [`memory::MemoryStore`] backs tests and local development.

pub mod memory;
pub mod models;
pub mod postgres;

use async_trait::async_trait;
use thiserror::Error;

use self::models::{ApiToken, EmailAddress, RejectedToken, Role, User, UserByEmail};

#[derive(Debug, Error)]
pub enum StoreError {
    #[error("record not found")]
    NotFound,
    #[error("database error: {0}")]
    Database(#[from] sqlx::Error),
    #[error("store error: {0}")]
    Other(String),
}

impl StoreError {
    #[must_use]
    pub fn is_not_found(&self) -> bool {
        matches!(self, Self::NotFound | Self::Database(sqlx::Error::RowNotFound))
    }
}

pub type StoreResult<T> = Result<T, StoreError>;

#[async_trait]
pub trait Datastore: Send + Sync {
    async fn get_user_by_id(&self, user_id: &str) -> StoreResult<User>;

    async fn get_user_by_name(&self, username: &str) -> StoreResult<User>;

    async fn get_user_by_email(&self, address: &str) -> StoreResult<UserByEmail>;

    async fn get_primary_email(&self, user_id: &str) -> StoreResult<EmailAddress>;

    async fn get_roles_for_user(&self, user_id: &str) -> StoreResult<Vec<Role>>;

    async fn get_role_permissions(&self, role_id: &str) -> StoreResult<Vec<String>>;

    /// Delete a matching recovery code; returns whether one existed.
    async fn check_and_delete_recovery_code(
        &self,
        user_id: &str,
        code_hash: &str,
    ) -> StoreResult<bool>;

    async fn reject_token(&self, token: RejectedToken) -> StoreResult<()>;

    /// `Ok(false)` when no row exists for `token_id`.
    async fn is_token_rejected(&self, token_id: &str) -> StoreResult<bool>;

    /// Remove ledger rows that expired before `threshold`; returns the count.
    async fn delete_expired_rejections(&self, threshold: i64) -> StoreResult<u64>;

    /// Store a token and its role assignments atomically.
    async fn create_api_token(&self, token: ApiToken, role_ids: &[String]) -> StoreResult<()>;

    async fn get_api_token_by_hash(&self, token_hash: &str) -> StoreResult<ApiToken>;

    async fn get_api_tokens_for_user(&self, user_id: &str) -> StoreResult<Vec<ApiToken>>;

    async fn get_roles_for_api_token(&self, token_id: &str) -> StoreResult<Vec<Role>>;

    /// Delete a user's token; returns the number of removed rows.
    async fn revoke_api_token(&self, token_id: &str, user_id: &str) -> StoreResult<u64>;

    async fn ping(&self) -> StoreResult<()>;
}

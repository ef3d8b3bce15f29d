//! Long-lived opaque API tokens owned by a user.

use super::{AuthError, AuthService, Principal};
use crate::{
    store::models::{ApiToken, Role},
    token::api_token,
};
use chrono::Utc;
use serde::{Deserialize, Serialize};
use tracing::{info, instrument};
use utoipa::ToSchema;
use uuid::Uuid;

/// Returned once on creation; the plaintext token is not retrievable later.
#[derive(ToSchema, Serialize, Deserialize, Clone, Debug, PartialEq, Eq)]
pub struct GeneratedApiToken {
    pub id: String,
    pub token: String,
    pub description: String,
    pub expires_at: Option<i64>,
    pub roles: Vec<Role>,
}

#[derive(ToSchema, Serialize, Deserialize, Clone, Debug, PartialEq, Eq)]
pub struct ApiTokenSummary {
    pub id: String,
    /// Leading characters of the token, e.g. `it.abc`.
    pub redacted: String,
    pub description: String,
    pub created_at: i64,
    pub expires_at: Option<i64>,
    pub roles: Vec<Role>,
}

impl AuthService {
    /// Create a token for the caller. `roles` must be a subset of the
    /// caller's roles (matched by id or name); `None` grants all of them.
    ///
    /// # Errors
    ///
    /// `PermissionDenied` for API-token callers or roles outside the caller's
    /// set, `InvalidArgument` for an expiry in the past.
    #[instrument(skip_all, fields(user_id = %principal.user_id()))]
    pub async fn generate_api_token(
        &self,
        principal: &Principal,
        roles: Option<Vec<String>>,
        expires_at: Option<i64>,
        description: &str,
    ) -> Result<GeneratedApiToken, AuthError> {
        if principal.is_api_token() {
            return Err(AuthError::PermissionDenied(
                "API tokens cannot create API tokens".to_string(),
            ));
        }
        let now = Utc::now().timestamp();
        if expires_at.is_some_and(|expires_at| expires_at <= now) {
            return Err(AuthError::InvalidArgument(
                "expiry must be in the future".to_string(),
            ));
        }

        let user_roles = self
            .store
            .get_roles_for_user(principal.user_id())
            .await?;
        let granted = match roles {
            None => user_roles,
            Some(requested) => select_roles(&user_roles, &requested)?,
        };

        let token = api_token::generate()?;
        let record = ApiToken {
            id: Uuid::now_v7().to_string(),
            token_hash: api_token::hash(&token),
            redacted: api_token::redact(&token),
            description: description.trim().to_string(),
            user_id: principal.user_id().to_string(),
            created_at: now,
            expires_at,
        };
        let role_ids: Vec<String> = granted.iter().map(|role| role.id.clone()).collect();
        self.store.create_api_token(record.clone(), &role_ids).await?;
        info!("Created API token {}", record.id);

        Ok(GeneratedApiToken {
            id: record.id,
            token,
            description: record.description,
            expires_at: record.expires_at,
            roles: granted,
        })
    }

    /// # Errors
    ///
    /// `Internal` when the store lookup fails.
    pub async fn list_api_tokens(
        &self,
        principal: &Principal,
    ) -> Result<Vec<ApiTokenSummary>, AuthError> {
        let tokens = self
            .store
            .get_api_tokens_for_user(principal.user_id())
            .await?;
        let mut summaries = Vec::with_capacity(tokens.len());
        for token in tokens {
            let roles = self.store.get_roles_for_api_token(&token.id).await?;
            summaries.push(ApiTokenSummary {
                id: token.id,
                redacted: token.redacted,
                description: token.description,
                created_at: token.created_at,
                expires_at: token.expires_at,
                roles,
            });
        }
        Ok(summaries)
    }

    /// # Errors
    ///
    /// `NotFound` when the caller owns no token with `token_id`.
    #[instrument(skip_all, fields(user_id = %principal.user_id()))]
    pub async fn remove_api_token(
        &self,
        principal: &Principal,
        token_id: &str,
    ) -> Result<(), AuthError> {
        let removed = self
            .store
            .revoke_api_token(token_id, principal.user_id())
            .await?;
        if removed == 0 {
            return Err(AuthError::NotFound(format!("API token {token_id}")));
        }
        info!("Removed API token {token_id}");
        Ok(())
    }
}

fn select_roles(available: &[Role], requested: &[String]) -> Result<Vec<Role>, AuthError> {
    let mut selected: Vec<Role> = Vec::with_capacity(requested.len());
    for wanted in requested {
        let role = available
            .iter()
            .find(|role| role.id == *wanted || role.name == *wanted)
            .ok_or_else(|| AuthError::PermissionDenied(format!("role {wanted} not granted")))?;
        if !selected.iter().any(|r| r.id == role.id) {
            selected.push(role.clone());
        }
    }
    Ok(selected)
}

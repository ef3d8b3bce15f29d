//! In-process [`Datastore`] used by tests and `--dsn memory://` deployments.

use super::{
    Datastore, StoreError, StoreResult,
    models::{ApiToken, EmailAddress, RejectedToken, Role, User, UserByEmail},
};
use async_trait::async_trait;
use serde::Deserialize;
use std::collections::{HashMap, HashSet};
use tokio::sync::RwLock;

#[derive(Debug, Default)]
struct Inner {
    users: HashMap<String, User>,
    emails: HashMap<String, Vec<StoredEmail>>,
    roles: HashMap<String, Role>,
    role_assignments: HashMap<String, Vec<String>>,
    role_permissions: HashMap<String, Vec<String>>,
    recovery_codes: HashMap<String, HashSet<String>>,
    rejected: HashMap<String, RejectedToken>,
    api_tokens: HashMap<String, ApiToken>,
    api_token_roles: HashMap<String, Vec<String>>,
}

#[derive(Clone, Debug)]
struct StoredEmail {
    address: String,
    verified: bool,
    primary: bool,
}

/// Seed document for [`MemoryStore::from_seed`].
#[derive(Debug, Default, Deserialize)]
pub struct Seed {
    #[serde(default)]
    pub roles: Vec<SeedRole>,
    #[serde(default)]
    pub users: Vec<SeedUser>,
}

#[derive(Debug, Deserialize)]
pub struct SeedRole {
    pub id: String,
    pub name: String,
    #[serde(default)]
    pub description: String,
    #[serde(default)]
    pub permissions: Vec<String>,
}

#[derive(Debug, Deserialize)]
pub struct SeedUser {
    pub id: String,
    pub username: String,
    pub password_hash: String,
    #[serde(default)]
    pub display_name: String,
    #[serde(default)]
    pub first_name: String,
    #[serde(default)]
    pub last_name: String,
    #[serde(default)]
    pub email: Option<String>,
    #[serde(default)]
    pub email_verified: bool,
    #[serde(default)]
    pub totp_secret: Option<String>,
    #[serde(default)]
    pub roles: Vec<String>,
    #[serde(default)]
    pub extra: Option<serde_json::Value>,
}

#[derive(Debug, Default)]
pub struct MemoryStore {
    inner: RwLock<Inner>,
}

impl MemoryStore {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    pub async fn from_seed(seed: Seed) -> Self {
        let store = Self::new();
        for role in seed.roles {
            store
                .insert_role(Role {
                    id: role.id.clone(),
                    name: role.name,
                    description: role.description,
                })
                .await;
            store.set_role_permissions(&role.id, role.permissions).await;
        }
        for user in seed.users {
            let id = user.id.clone();
            store
                .insert_user(User {
                    id: user.id,
                    username: user.username,
                    display_name: user.display_name,
                    first_name: user.first_name,
                    last_name: user.last_name,
                    password_hash: user.password_hash,
                    totp_secret: user.totp_secret,
                    extra: user.extra,
                    ..User::default()
                })
                .await;
            if let Some(address) = user.email {
                store
                    .add_email(&id, &address, user.email_verified, true)
                    .await;
            }
            for role_id in user.roles {
                store.assign_role(&id, &role_id).await;
            }
        }
        store
    }

    pub async fn insert_user(&self, user: User) {
        let mut inner = self.inner.write().await;
        inner.users.insert(user.id.clone(), user);
    }

    pub async fn set_totp_secret(&self, user_id: &str, secret: Option<String>) {
        let mut inner = self.inner.write().await;
        if let Some(user) = inner.users.get_mut(user_id) {
            user.totp_secret = secret;
        }
    }

    pub async fn add_email(&self, user_id: &str, address: &str, verified: bool, primary: bool) {
        let mut inner = self.inner.write().await;
        inner
            .emails
            .entry(user_id.to_string())
            .or_default()
            .push(StoredEmail {
                address: address.to_string(),
                verified,
                primary,
            });
    }

    pub async fn insert_role(&self, role: Role) {
        let mut inner = self.inner.write().await;
        inner.roles.insert(role.id.clone(), role);
    }

    pub async fn assign_role(&self, user_id: &str, role_id: &str) {
        let mut inner = self.inner.write().await;
        inner
            .role_assignments
            .entry(user_id.to_string())
            .or_default()
            .push(role_id.to_string());
    }

    pub async fn set_role_permissions(&self, role_id: &str, permissions: Vec<String>) {
        let mut inner = self.inner.write().await;
        inner
            .role_permissions
            .insert(role_id.to_string(), permissions);
    }

    pub async fn add_recovery_code_hash(&self, user_id: &str, code_hash: &str) {
        let mut inner = self.inner.write().await;
        inner
            .recovery_codes
            .entry(user_id.to_string())
            .or_default()
            .insert(code_hash.to_string());
    }

    fn primary_address(inner: &Inner, user_id: &str) -> Option<StoredEmail> {
        inner
            .emails
            .get(user_id)
            .and_then(|emails| emails.iter().find(|email| email.primary).cloned())
    }

    fn with_email(inner: &Inner, user: &User) -> User {
        let mut user = user.clone();
        user.email = Self::primary_address(inner, &user.id).map(|email| email.address);
        user
    }

    fn resolve_roles(inner: &Inner, role_ids: Option<&Vec<String>>) -> Vec<Role> {
        role_ids
            .map(|ids| {
                ids.iter()
                    .filter_map(|id| inner.roles.get(id).cloned())
                    .collect()
            })
            .unwrap_or_default()
    }
}

#[async_trait]
impl Datastore for MemoryStore {
    async fn get_user_by_id(&self, user_id: &str) -> StoreResult<User> {
        let inner = self.inner.read().await;
        inner
            .users
            .get(user_id)
            .map(|user| Self::with_email(&inner, user))
            .ok_or(StoreError::NotFound)
    }

    async fn get_user_by_name(&self, username: &str) -> StoreResult<User> {
        let inner = self.inner.read().await;
        inner
            .users
            .values()
            .find(|user| user.username == username)
            .map(|user| Self::with_email(&inner, user))
            .ok_or(StoreError::NotFound)
    }

    async fn get_user_by_email(&self, address: &str) -> StoreResult<UserByEmail> {
        let inner = self.inner.read().await;
        let (user_id, verified) = inner
            .emails
            .iter()
            .find_map(|(user_id, emails)| {
                emails
                    .iter()
                    .find(|email| email.address.eq_ignore_ascii_case(address))
                    .map(|email| (user_id.clone(), email.verified))
            })
            .ok_or(StoreError::NotFound)?;
        let user = inner.users.get(&user_id).ok_or(StoreError::NotFound)?;
        Ok(UserByEmail {
            user: Self::with_email(&inner, user),
            verified,
        })
    }

    async fn get_primary_email(&self, user_id: &str) -> StoreResult<EmailAddress> {
        let inner = self.inner.read().await;
        Self::primary_address(&inner, user_id)
            .map(|email| EmailAddress {
                address: email.address,
                verified: email.verified,
            })
            .ok_or(StoreError::NotFound)
    }

    async fn get_roles_for_user(&self, user_id: &str) -> StoreResult<Vec<Role>> {
        let inner = self.inner.read().await;
        Ok(Self::resolve_roles(
            &inner,
            inner.role_assignments.get(user_id),
        ))
    }

    async fn get_role_permissions(&self, role_id: &str) -> StoreResult<Vec<String>> {
        let inner = self.inner.read().await;
        Ok(inner
            .role_permissions
            .get(role_id)
            .cloned()
            .unwrap_or_default())
    }

    async fn check_and_delete_recovery_code(
        &self,
        user_id: &str,
        code_hash: &str,
    ) -> StoreResult<bool> {
        let mut inner = self.inner.write().await;
        Ok(inner
            .recovery_codes
            .get_mut(user_id)
            .is_some_and(|codes| codes.remove(code_hash)))
    }

    async fn reject_token(&self, token: RejectedToken) -> StoreResult<()> {
        let mut inner = self.inner.write().await;
        inner.rejected.insert(token.token_id.clone(), token);
        Ok(())
    }

    async fn is_token_rejected(&self, token_id: &str) -> StoreResult<bool> {
        let inner = self.inner.read().await;
        Ok(inner.rejected.contains_key(token_id))
    }

    async fn delete_expired_rejections(&self, threshold: i64) -> StoreResult<u64> {
        let mut inner = self.inner.write().await;
        let before = inner.rejected.len();
        inner
            .rejected
            .retain(|_, token| token.expires_at >= threshold);
        Ok(u64::try_from(before - inner.rejected.len()).unwrap_or(u64::MAX))
    }

    async fn create_api_token(&self, token: ApiToken, role_ids: &[String]) -> StoreResult<()> {
        let mut inner = self.inner.write().await;
        if let Some(missing) = role_ids.iter().find(|id| !inner.roles.contains_key(*id)) {
            return Err(StoreError::Other(format!("unknown role {missing}")));
        }
        inner
            .api_token_roles
            .insert(token.id.clone(), role_ids.to_vec());
        inner.api_tokens.insert(token.id.clone(), token);
        Ok(())
    }

    async fn get_api_token_by_hash(&self, token_hash: &str) -> StoreResult<ApiToken> {
        let inner = self.inner.read().await;
        inner
            .api_tokens
            .values()
            .find(|token| token.token_hash == token_hash)
            .cloned()
            .ok_or(StoreError::NotFound)
    }

    async fn get_api_tokens_for_user(&self, user_id: &str) -> StoreResult<Vec<ApiToken>> {
        let inner = self.inner.read().await;
        let mut tokens: Vec<ApiToken> = inner
            .api_tokens
            .values()
            .filter(|token| token.user_id == user_id)
            .cloned()
            .collect();
        tokens.sort_by(|a, b| a.created_at.cmp(&b.created_at).then(a.id.cmp(&b.id)));
        Ok(tokens)
    }

    async fn get_roles_for_api_token(&self, token_id: &str) -> StoreResult<Vec<Role>> {
        let inner = self.inner.read().await;
        Ok(Self::resolve_roles(
            &inner,
            inner.api_token_roles.get(token_id),
        ))
    }

    async fn revoke_api_token(&self, token_id: &str, user_id: &str) -> StoreResult<u64> {
        let mut inner = self.inner.write().await;
        let owned = inner
            .api_tokens
            .get(token_id)
            .is_some_and(|token| token.user_id == user_id);
        if !owned {
            return Ok(0);
        }
        inner.api_tokens.remove(token_id);
        inner.api_token_roles.remove(token_id);
        Ok(1)
    }

    async fn ping(&self) -> StoreResult<()> {
        Ok(())
    }
}

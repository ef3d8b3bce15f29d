//! Authentication core: login state machine, sessions, API tokens and
//! credential verification.
//!
//! [`AuthService`] owns the shared collaborators; its operations are spread
//! over the submodules by concern.

pub mod api_tokens;
pub mod authenticate;
pub mod error;
pub mod login;
pub mod mfa;
pub mod password;
pub mod redirect;
pub mod revocation;
pub mod session;

#[cfg(test)]
pub(crate) mod test_support;

pub use self::{
    authenticate::{BearerCredential, Principal, PrincipalSource},
    error::{AuthError, ErrorBody},
    login::{Credential, LoginOutcome, LoginRequest, Session},
    mfa::{CodeValidator, TotpValidator},
    revocation::RevocationLedger,
};

use crate::{
    config::IdpConfig,
    store::{Datastore, models::Role},
    token::TokenIssuer,
};
use std::sync::Arc;

#[derive(Clone)]
pub struct AuthService {
    config: Arc<IdpConfig>,
    store: Arc<dyn Datastore>,
    issuer: TokenIssuer,
    ledger: RevocationLedger,
    codes: Arc<dyn CodeValidator>,
}

impl AuthService {
    #[must_use]
    pub fn new(
        config: Arc<IdpConfig>,
        store: Arc<dyn Datastore>,
        codes: Arc<dyn CodeValidator>,
    ) -> Self {
        let ledger = RevocationLedger::new(store.clone(), config.max_refresh_token_ttl());
        Self {
            issuer: TokenIssuer::new(config.clone()),
            config,
            store,
            ledger,
            codes,
        }
    }

    #[must_use]
    pub fn config(&self) -> &IdpConfig {
        &self.config
    }

    #[must_use]
    pub fn store(&self) -> &Arc<dyn Datastore> {
        &self.store
    }

    #[must_use]
    pub fn issuer(&self) -> &TokenIssuer {
        &self.issuer
    }

    #[must_use]
    pub fn ledger(&self) -> &RevocationLedger {
        &self.ledger
    }

    /// Roles that apply to `principal`: the token's role set for API tokens,
    /// the user's assignments otherwise.
    ///
    /// # Errors
    ///
    /// Returns an internal error when the store lookup fails.
    pub async fn principal_roles(&self, principal: &Principal) -> Result<Vec<Role>, AuthError> {
        match &principal.source {
            PrincipalSource::ApiToken { roles, .. } => Ok(roles.clone()),
            PrincipalSource::Session => Ok(self
                .store
                .get_roles_for_user(&principal.claims.subject)
                .await?),
        }
    }
}

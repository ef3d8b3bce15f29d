//! Seeded [`AuthService`] used by the auth unit tests.

use super::{AuthService, CodeValidator, LoginOutcome, LoginRequest, Principal, Session};
use crate::{
    auth::{BearerCredential, Credential, mfa},
    config::IdpConfig,
    store::{
        Datastore,
        memory::MemoryStore,
        models::{Role, User},
    },
};
use argon2::{Argon2, PasswordHasher, password_hash::SaltString};
use axum::http::HeaderMap;
use once_cell::sync::Lazy;
use rand::rngs::OsRng;
use secrecy::SecretString;
use std::{sync::Arc, time::Duration};

pub const PASSWORD: &str = "correct horse battery staple";
pub const VALID_CODE: &str = "123456";
pub const RECOVERY_CODE: &str = "ABCD-EFGH-JKLM";
pub const SECRET: &str = "auth-test-signing-secret";

/// Cheap Argon2id hash of [`PASSWORD`] shared by all fixtures.
static PASSWORD_HASH: Lazy<String> = Lazy::new(|| {
    let params = argon2::Params::new(8, 1, 1, None).expect("params");
    Argon2::new(argon2::Algorithm::Argon2id, argon2::Version::V0x13, params)
        .hash_password(PASSWORD.as_bytes(), &SaltString::generate(&mut OsRng))
        .expect("hash")
        .to_string()
});

/// Accepts exactly [`VALID_CODE`].
pub struct FixedCode;

impl CodeValidator for FixedCode {
    fn validate(&self, _secret: &str, code: &str) -> bool {
        code == VALID_CODE
    }
}

pub struct Fixture {
    pub service: AuthService,
    pub store: Arc<MemoryStore>,
}

impl Fixture {
    pub async fn new() -> Self {
        Self::with_config(|config| config).await
    }

    pub async fn with_config(configure: impl FnOnce(IdpConfig) -> IdpConfig) -> Self {
        let store = Arc::new(MemoryStore::new());
        seed(&store).await;
        let config = configure(
            IdpConfig::new(SecretString::from(SECRET))
                .with_public_url("https://id.example.com".to_string()),
        );
        let service = AuthService::new(
            Arc::new(config),
            store.clone() as Arc<dyn Datastore>,
            Arc::new(FixedCode),
        );
        Self { service, store }
    }

    pub async fn user(&self, username: &str) -> User {
        self.store
            .get_user_by_name(username)
            .await
            .expect("seeded user")
    }

    /// Complete a password login that must not require a second factor.
    pub async fn password_login(&self, username: &str, password: &str) -> Session {
        let request = LoginRequest {
            credential: Credential::Password {
                username: username.to_string(),
                password: SecretString::from(password),
            },
            requested_ttl: Duration::ZERO,
            no_refresh_token: false,
            requested_redirect: None,
        };
        match self
            .service
            .login(request, None, &mut HeaderMap::new())
            .await
            .expect("login")
        {
            LoginOutcome::Authenticated(session) => session,
            LoginOutcome::SecondFactorRequired { .. } => panic!("unexpected second factor"),
        }
    }

    pub async fn principal(&self, session: &Session) -> Principal {
        self.service
            .authenticate(BearerCredential::Jwt(session.access_token.token.clone()))
            .await
            .expect("principal")
    }
}

fn role(id: &str, name: &str) -> Role {
    Role {
        id: id.to_string(),
        name: name.to_string(),
        description: String::new(),
    }
}

async fn seed(store: &MemoryStore) {
    store.insert_role(role("admin", "Administrators")).await;
    store.insert_role(role("viewer", "Viewers")).await;
    store
        .set_role_permissions("admin", vec!["idm".to_string()])
        .await;
    store
        .set_role_permissions("viewer", vec!["idm:users:read".to_string()])
        .await;

    store
        .insert_user(User {
            id: "u-alice".to_string(),
            username: "alice".to_string(),
            first_name: "Alice".to_string(),
            last_name: "Liddell".to_string(),
            password_hash: PASSWORD_HASH.clone(),
            extra: Some(serde_json::json!({"team": "wonderland"})),
            ..User::default()
        })
        .await;
    store
        .add_email("u-alice", "alice@example.com", true, true)
        .await;
    store.assign_role("u-alice", "admin").await;
    store.assign_role("u-alice", "viewer").await;

    store
        .insert_user(User {
            id: "u-bob".to_string(),
            username: "bob".to_string(),
            display_name: "Bob".to_string(),
            password_hash: PASSWORD_HASH.clone(),
            totp_secret: Some("JBSWY3DPEHPK3PXP".to_string()),
            ..User::default()
        })
        .await;
    store.assign_role("u-bob", "viewer").await;
    if let Some(hash) = mfa::recovery_code_hash(RECOVERY_CODE) {
        store.add_recovery_code_hash("u-bob", &hash).await;
    }

    store
        .insert_user(User {
            id: "u-carol".to_string(),
            username: "carol".to_string(),
            password_hash: PASSWORD_HASH.clone(),
            ..User::default()
        })
        .await;
    store
        .add_email("u-carol", "carol@example.com", false, true)
        .await;
}

use crate::{
    api,
    auth::{AuthService, TotpValidator},
    cli::{
        commands::{cookies, forward_auth, jwt},
        telemetry,
    },
    config::{IdpConfig, TtlOverride},
    forward_auth::{ForwardAuthConfig, ForwardAuthEngine, ForwardAuthRules},
    permission::{PermissionResolver, PermissionTree},
    policy::{PolicyEngine, http::OpaHttpEngine},
    store::{
        Datastore,
        memory::{MemoryStore, Seed},
        postgres::PgStore,
    },
};
use anyhow::{Context, Result};
use serde::de::DeserializeOwned;
use std::{path::Path, sync::Arc, time::Duration};
use tracing::{info, warn};
use url::Url;

const MEMORY_DSN_SCHEME: &str = "memory";

#[derive(Debug)]
pub struct Args {
    pub port: u16,
    pub dsn: String,
    pub seed: Option<String>,
    pub max_connections: u32,
    pub jwt: jwt::Options,
    pub cookies: cookies::Options,
    pub forward_auth: forward_auth::Options,
}

/// Execute the server action.
/// # Errors
/// Returns an error if a configuration file cannot be loaded, the datastore is
/// unreachable or the server fails to start.
pub async fn execute(args: Args) -> Result<()> {
    log_startup_args(&args);

    let config = Arc::new(build_config(&args)?);
    let store = open_store(&args).await?;
    let resolver = Arc::new(load_permission_tree(&args.forward_auth.permission_tree_paths)?);
    let rules = load_forward_auth_rules(args.forward_auth.rules_path.as_deref())?;
    let policy = match args.forward_auth.policy_url.as_deref() {
        Some(url) => Some(Arc::new(
            OpaHttpEngine::new(url).context("Failed to build policy engine client")?,
        ) as Arc<dyn PolicyEngine>),
        None => None,
    };

    let auth = AuthService::new(config.clone(), store, Arc::new(TotpValidator));
    let cleanup = auth
        .ledger()
        .clone()
        .spawn_cleanup(config.cleanup_interval());
    let engine = ForwardAuthEngine::new(auth.clone(), rules, resolver, policy)
        .with_trusted_networks(args.forward_auth.trusted_networks.clone());

    let result = api::serve(args.port, api::app(auth, engine)?).await;

    cleanup.abort();
    telemetry::shutdown_tracer();
    result
}

fn build_config(args: &Args) -> Result<IdpConfig> {
    let ttl_overrides: Vec<TtlOverride> = match args.jwt.ttl_overrides_path.as_deref() {
        Some(path) => load_json(path)?,
        None => Vec::new(),
    };

    let mut config = IdpConfig::new(args.jwt.secret.clone())
        .with_signing_algorithm(args.jwt.algorithm)
        .with_access_token_ttl(Duration::from_secs(args.jwt.access_token_ttl_seconds))
        .with_max_access_token_ttl(
            args.jwt
                .max_access_token_ttl_seconds
                .map(Duration::from_secs),
        )
        .with_refresh_token_ttl(Duration::from_secs(args.jwt.refresh_token_ttl_seconds))
        .with_ttl_overrides(ttl_overrides)
        .with_public_url(args.cookies.public_url.clone())
        .with_access_cookie_name(args.cookies.access_cookie_name.clone())
        .with_refresh_cookie_name(args.cookies.refresh_cookie_name.clone())
        .with_refresh_cookie_path(args.cookies.refresh_cookie_path.clone())
        .with_cookie_domain(args.cookies.cookie_domain.clone())
        .with_secure_cookies(args.cookies.secure)
        .with_login_redirect_url(args.cookies.login_url.clone())
        .with_refresh_redirect_url(args.cookies.refresh_url.clone())
        .with_allowed_redirect_domains(args.cookies.allowed_redirect_domains.clone())
        .with_login_by_email(args.cookies.login_by_email)
        .with_cleanup_interval(Duration::from_secs(
            args.forward_auth.cleanup_interval_seconds,
        ));
    if let Some(audience) = &args.jwt.audience {
        config = config.with_audience(audience.clone());
    }
    if let Some(issuer) = &args.jwt.issuer {
        config = config.with_issuer(issuer.clone());
    }
    Ok(config)
}

async fn open_store(args: &Args) -> Result<Arc<dyn Datastore>> {
    let dsn = Url::parse(&args.dsn).context("Invalid --dsn")?;
    if dsn.scheme() == MEMORY_DSN_SCHEME {
        warn!("Using the in-memory datastore; state is lost on restart");
        let seed: Seed = match args.seed.as_deref() {
            Some(path) => load_json(path)?,
            None => Seed::default(),
        };
        return Ok(Arc::new(MemoryStore::from_seed(seed).await));
    }
    if args.seed.is_some() {
        warn!("--seed is ignored for {} datastores", dsn.scheme());
    }
    let store = PgStore::connect(&args.dsn, args.max_connections)
        .await
        .context("Failed to connect to database")?;
    Ok(Arc::new(store))
}

fn load_permission_tree(paths: &[String]) -> Result<PermissionResolver> {
    if paths.is_empty() {
        return Ok(PermissionResolver::Flat);
    }
    let mut tree = PermissionTree::default();
    for path in paths {
        let part: PermissionTree = load_json(path)?;
        tree.merge_from(&part);
    }
    Ok(PermissionResolver::Tree(tree))
}

fn load_forward_auth_rules(path: Option<&str>) -> Result<ForwardAuthRules> {
    let config: ForwardAuthConfig = match path {
        Some(path) => load_json(path)?,
        None => ForwardAuthConfig::default(),
    };
    ForwardAuthRules::compile(config).context("Invalid forward-auth rules")
}

fn load_json<T: DeserializeOwned>(path: impl AsRef<Path>) -> Result<T> {
    let path = path.as_ref();
    let raw = std::fs::read_to_string(path)
        .with_context(|| format!("Failed to read {}", path.display()))?;
    serde_json::from_str(&raw).with_context(|| format!("Failed to parse {}", path.display()))
}

fn redact_dsn(dsn: &str) -> String {
    match Url::parse(dsn) {
        Ok(mut parsed) => {
            if parsed.password().is_some() {
                let _ = parsed.set_password(Some("REDACTED"));
            }
            parsed.to_string()
        }
        Err(_) => "invalid-dsn".to_string(),
    }
}

fn log_startup_args(args: &Args) {
    let short_hash = crate::GIT_COMMIT_HASH.get(..7).unwrap_or(crate::GIT_COMMIT_HASH);
    info!(
        version = env!("CARGO_PKG_VERSION"),
        commit = short_hash,
        port = args.port,
        dsn = %redact_dsn(&args.dsn),
        public_url = %args.cookies.public_url,
        algorithm = %args.jwt.algorithm,
        permission_tree = !args.forward_auth.permission_tree_paths.is_empty(),
        forward_auth_rules = args.forward_auth.rules_path.is_some(),
        policy_engine = args.forward_auth.policy_url.is_some(),
        trusted_proxies = !args.forward_auth.trusted_networks.is_empty(),
        "Starting {}",
        env!("CARGO_PKG_NAME")
    );
}

use crate::{
    config::{DEFAULT_ACCESS_TOKEN_TTL_SECONDS, DEFAULT_REFRESH_TOKEN_TTL_SECONDS},
    token::codec::Algorithm,
};
use anyhow::Context;
use clap::{Arg, ArgMatches, Command};
use secrecy::SecretString;

pub const ARG_JWT_SECRET: &str = "jwt-secret";
pub const ARG_SIGNING_ALGORITHM: &str = "signing-algorithm";
pub const ARG_AUDIENCE: &str = "audience";
pub const ARG_ISSUER: &str = "issuer";
pub const ARG_ACCESS_TOKEN_TTL: &str = "access-token-ttl";
pub const ARG_MAX_ACCESS_TOKEN_TTL: &str = "max-access-token-ttl";
pub const ARG_REFRESH_TOKEN_TTL: &str = "refresh-token-ttl";
pub const ARG_TTL_OVERRIDES: &str = "ttl-overrides";

#[derive(Debug, Clone)]
pub struct Options {
    pub secret: SecretString,
    pub algorithm: Algorithm,
    pub audience: Option<String>,
    pub issuer: Option<String>,
    pub access_token_ttl_seconds: u64,
    pub max_access_token_ttl_seconds: Option<u64>,
    pub refresh_token_ttl_seconds: u64,
    /// JSON file with a list of TTL overrides.
    pub ttl_overrides_path: Option<String>,
}

impl Options {
    /// Parse token signing arguments from matches.
    ///
    /// # Errors
    /// Returns an error if the secret is missing or the algorithm is unknown.
    pub fn parse(matches: &ArgMatches) -> anyhow::Result<Self> {
        let secret = match matches.get_one::<String>(ARG_JWT_SECRET) {
            Some(value) if !value.trim().is_empty() => SecretString::from(value.clone()),
            _ => anyhow::bail!("missing required argument: --{ARG_JWT_SECRET}"),
        };

        let algorithm = matches
            .get_one::<String>(ARG_SIGNING_ALGORITHM)
            .map_or(Ok(Algorithm::default()), |value| value.parse())
            .with_context(|| format!("invalid --{ARG_SIGNING_ALGORITHM}"))?;

        let get_non_empty = |id: &str| {
            matches
                .get_one::<String>(id)
                .cloned()
                .filter(|v| !v.trim().is_empty())
        };

        Ok(Self {
            secret,
            algorithm,
            audience: get_non_empty(ARG_AUDIENCE),
            issuer: get_non_empty(ARG_ISSUER),
            access_token_ttl_seconds: matches
                .get_one::<u64>(ARG_ACCESS_TOKEN_TTL)
                .copied()
                .unwrap_or(DEFAULT_ACCESS_TOKEN_TTL_SECONDS),
            max_access_token_ttl_seconds: matches
                .get_one::<u64>(ARG_MAX_ACCESS_TOKEN_TTL)
                .copied(),
            refresh_token_ttl_seconds: matches
                .get_one::<u64>(ARG_REFRESH_TOKEN_TTL)
                .copied()
                .unwrap_or(DEFAULT_REFRESH_TOKEN_TTL_SECONDS),
            ttl_overrides_path: get_non_empty(ARG_TTL_OVERRIDES),
        })
    }
}

#[must_use]
pub fn with_args(command: Command) -> Command {
    command
        .arg(
            Arg::new(ARG_JWT_SECRET)
                .long(ARG_JWT_SECRET)
                .help("HMAC secret used to sign and verify tokens")
                .env("PORTCULLIS_JWT_SECRET")
                .hide_env_values(true),
        )
        .arg(
            Arg::new(ARG_SIGNING_ALGORITHM)
                .long(ARG_SIGNING_ALGORITHM)
                .help("Signing algorithm: HS256, HS384 or HS512")
                .env("PORTCULLIS_SIGNING_ALGORITHM")
                .default_value("HS512"),
        )
        .arg(
            Arg::new(ARG_AUDIENCE)
                .long(ARG_AUDIENCE)
                .help("Audience claim (defaults to the public URL host)")
                .env("PORTCULLIS_AUDIENCE"),
        )
        .arg(
            Arg::new(ARG_ISSUER)
                .long(ARG_ISSUER)
                .help("Issuer claim (defaults to the public URL host)")
                .env("PORTCULLIS_ISSUER"),
        )
        .arg(
            Arg::new(ARG_ACCESS_TOKEN_TTL)
                .long(ARG_ACCESS_TOKEN_TTL)
                .help("Default access token lifetime in seconds")
                .env("PORTCULLIS_ACCESS_TOKEN_TTL")
                .default_value("3600")
                .value_parser(clap::value_parser!(u64)),
        )
        .arg(
            Arg::new(ARG_MAX_ACCESS_TOKEN_TTL)
                .long(ARG_MAX_ACCESS_TOKEN_TTL)
                .help("Upper bound for requested access token lifetimes in seconds")
                .env("PORTCULLIS_MAX_ACCESS_TOKEN_TTL")
                .value_parser(clap::value_parser!(u64)),
        )
        .arg(
            Arg::new(ARG_REFRESH_TOKEN_TTL)
                .long(ARG_REFRESH_TOKEN_TTL)
                .help("Refresh token lifetime in seconds")
                .env("PORTCULLIS_REFRESH_TOKEN_TTL")
                .default_value("2592000")
                .value_parser(clap::value_parser!(u64)),
        )
        .arg(
            Arg::new(ARG_TTL_OVERRIDES)
                .long(ARG_TTL_OVERRIDES)
                .help("JSON file with per-user or per-role token lifetime overrides")
                .env("PORTCULLIS_TTL_OVERRIDES"),
        )
}

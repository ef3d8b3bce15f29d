//! Map validated CLI arguments to an action.

use crate::cli::{
    actions::{Action, server::Args},
    commands::{ARG_DSN, ARG_MAX_CONNECTIONS, ARG_PORT, ARG_SEED, cookies, forward_auth, jwt},
};
use anyhow::{Context, Result};

/// Map validated CLI matches to a server action.
///
/// # Errors
/// Returns an error if required arguments are missing or inconsistent.
pub fn handler(matches: &clap::ArgMatches) -> Result<Action> {
    let port = matches.get_one::<u16>(ARG_PORT).copied().unwrap_or(8080);
    let dsn = matches
        .get_one::<String>(ARG_DSN)
        .cloned()
        .context("missing required argument: --dsn")?;
    let seed = matches
        .get_one::<String>(ARG_SEED)
        .cloned()
        .filter(|v| !v.trim().is_empty());
    let max_connections = matches
        .get_one::<u32>(ARG_MAX_CONNECTIONS)
        .copied()
        .unwrap_or(5);

    Ok(Action::Server(Args {
        port,
        dsn,
        seed,
        max_connections,
        jwt: jwt::Options::parse(matches)?,
        cookies: cookies::Options::parse(matches)?,
        forward_auth: forward_auth::Options::parse(matches)?,
    }))
}

use crate::{config::DEFAULT_CLEANUP_INTERVAL_SECONDS, forward_auth::TrustedNetworks};
use anyhow::Context;
use clap::{Arg, ArgMatches, Command};

pub const ARG_FORWARD_AUTH_RULES: &str = "forward-auth-rules";
pub const ARG_PERMISSION_TREE: &str = "permission-tree";
pub const ARG_POLICY_URL: &str = "policy-url";
pub const ARG_CLEANUP_INTERVAL: &str = "cleanup-interval";
pub const ARG_TRUSTED_NETWORKS: &str = "trusted-networks";

#[derive(Debug, Clone)]
pub struct Options {
    /// JSON file with URL entries and static rules.
    pub rules_path: Option<String>,
    /// JSON files merged into one permission tree; none selects flat permissions.
    pub permission_tree_paths: Vec<String>,
    /// Base URL of an OPA-compatible policy engine.
    pub policy_url: Option<String>,
    /// Proxies whose `x-forwarded-for` is believed.
    pub trusted_networks: TrustedNetworks,
    pub cleanup_interval_seconds: u64,
}

impl Options {
    /// Parse forward-auth and authorization arguments from matches.
    ///
    /// # Errors
    /// Returns an error if the cleanup interval is zero or a trusted network
    /// is not valid CIDR.
    pub fn parse(matches: &ArgMatches) -> anyhow::Result<Self> {
        let get_non_empty = |id: &str| {
            matches
                .get_one::<String>(id)
                .cloned()
                .filter(|v| !v.trim().is_empty())
        };

        let cleanup_interval_seconds = matches
            .get_one::<u64>(ARG_CLEANUP_INTERVAL)
            .copied()
            .unwrap_or(DEFAULT_CLEANUP_INTERVAL_SECONDS);
        if cleanup_interval_seconds == 0 {
            anyhow::bail!("--{ARG_CLEANUP_INTERVAL} must be greater than zero");
        }

        let trusted_networks = TrustedNetworks::parse(
            matches
                .get_many::<String>(ARG_TRUSTED_NETWORKS)
                .into_iter()
                .flatten(),
        )
        .with_context(|| format!("invalid --{ARG_TRUSTED_NETWORKS}"))?;

        Ok(Self {
            rules_path: get_non_empty(ARG_FORWARD_AUTH_RULES),
            permission_tree_paths: matches
                .get_many::<String>(ARG_PERMISSION_TREE)
                .map(|values| {
                    values
                        .filter(|v| !v.trim().is_empty())
                        .cloned()
                        .collect()
                })
                .unwrap_or_default(),
            policy_url: get_non_empty(ARG_POLICY_URL),
            trusted_networks,
            cleanup_interval_seconds,
        })
    }
}

#[must_use]
pub fn with_args(command: Command) -> Command {
    command
        .arg(
            Arg::new(ARG_FORWARD_AUTH_RULES)
                .long(ARG_FORWARD_AUTH_RULES)
                .help("JSON file with forward-auth URL entries and static rules")
                .env("PORTCULLIS_FORWARD_AUTH_RULES"),
        )
        .arg(
            Arg::new(ARG_PERMISSION_TREE)
                .long(ARG_PERMISSION_TREE)
                .help("Comma separated JSON files merged into the permission tree")
                .env("PORTCULLIS_PERMISSION_TREE")
                .value_delimiter(','),
        )
        .arg(
            Arg::new(ARG_POLICY_URL)
                .long(ARG_POLICY_URL)
                .help("Base URL of an OPA-compatible policy engine")
                .env("PORTCULLIS_POLICY_URL"),
        )
        .arg(
            Arg::new(ARG_TRUSTED_NETWORKS)
                .long(ARG_TRUSTED_NETWORKS)
                .help("Comma separated CIDR networks of proxies allowed to set X-Forwarded-For")
                .env("PORTCULLIS_TRUSTED_NETWORKS")
                .value_delimiter(','),
        )
        .arg(
            Arg::new(ARG_CLEANUP_INTERVAL)
                .long(ARG_CLEANUP_INTERVAL)
                .help("Seconds between purges of expired revocation records")
                .env("PORTCULLIS_CLEANUP_INTERVAL")
                .default_value("3600")
                .value_parser(clap::value_parser!(u64)),
        )
}

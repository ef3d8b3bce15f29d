//! URL entries and static machine-access rules for forward authorization.

use ipnetwork::IpNetwork;
use regex::Regex;
use serde::Deserialize;
use std::net::IpAddr;
use thiserror::Error;
use tracing::debug;

#[derive(Debug, Error)]
pub enum RuleError {
    #[error("invalid url pattern {pattern:?}: {source}")]
    Pattern {
        pattern: String,
        source: regex::Error,
    },
    #[error("invalid ip address {0:?}")]
    Ip(String),
    #[error("invalid network {value:?}: {source}")]
    Network {
        value: String,
        source: ipnetwork::IpNetworkError,
    },
    #[error("allow rule without subject")]
    MissingSubject,
}

/// JSON shape of the forward-auth rules file.
#[derive(Clone, Debug, Deserialize)]
pub struct ForwardAuthConfig {
    #[serde(default = "default_required")]
    pub default_required: bool,
    #[serde(default)]
    pub entries: Vec<EntryConfig>,
}

impl Default for ForwardAuthConfig {
    fn default() -> Self {
        Self {
            default_required: true,
            entries: Vec::new(),
        }
    }
}

const fn default_required() -> bool {
    true
}

#[derive(Clone, Debug, Deserialize)]
pub struct EntryConfig {
    /// Regular expression matched against the reconstructed URL.
    pub url: String,
    #[serde(default)]
    pub methods: Vec<String>,
    #[serde(default)]
    pub required: Option<bool>,
    #[serde(default)]
    pub rules: Vec<RuleConfig>,
}

#[derive(Clone, Debug, Deserialize)]
pub struct RuleConfig {
    #[serde(default)]
    pub ip: Option<String>,
    #[serde(default)]
    pub network: Option<String>,
    #[serde(default)]
    pub token: Option<String>,
    #[serde(default)]
    pub deny: bool,
    #[serde(default)]
    pub subject: Option<String>,
    #[serde(default)]
    pub roles: Vec<String>,
}

#[derive(Clone, Debug)]
struct Rule {
    ip: Option<IpAddr>,
    network: Option<IpNetwork>,
    token: Option<String>,
    deny: bool,
    subject: String,
    roles: Vec<String>,
}

impl Rule {
    fn compile(config: RuleConfig) -> Result<Self, RuleError> {
        let ip = config
            .ip
            .filter(|ip| !ip.trim().is_empty())
            .map(|ip| ip.trim().parse::<IpAddr>().map_err(|_| RuleError::Ip(ip)))
            .transpose()?;
        let network = config
            .network
            .filter(|net| !net.trim().is_empty())
            .map(|net| {
                net.trim()
                    .parse::<IpNetwork>()
                    .map_err(|source| RuleError::Network { value: net, source })
            })
            .transpose()?;
        let subject = config.subject.unwrap_or_default();
        if !config.deny && subject.is_empty() {
            return Err(RuleError::MissingSubject);
        }
        Ok(Self {
            ip,
            network,
            token: config.token.filter(|token| !token.is_empty()),
            deny: config.deny,
            subject,
            roles: config.roles,
        })
    }

    fn matches(&self, client_ip: Option<IpAddr>, bearer: Option<&str>) -> bool {
        if let (Some(expected), Some(ip)) = (self.ip, client_ip) {
            if expected == ip {
                return true;
            }
        }
        if let (Some(network), Some(ip)) = (self.network, client_ip) {
            if network.contains(ip) {
                return true;
            }
        }
        matches!((&self.token, bearer), (Some(expected), Some(token)) if expected == token)
    }
}

/// Identity granted by a static allow rule.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct StaticSubject {
    pub subject: String,
    pub roles: Vec<String>,
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub enum RuleVerdict {
    Deny,
    Allow(StaticSubject),
    NoMatch,
}

#[derive(Clone, Debug)]
pub struct Entry {
    url: Regex,
    methods: Vec<String>,
    required: bool,
    rules: Vec<Rule>,
}

impl Entry {
    fn compile(config: EntryConfig) -> Result<Self, RuleError> {
        let url = Regex::new(&config.url).map_err(|source| RuleError::Pattern {
            pattern: config.url.clone(),
            source,
        })?;
        Ok(Self {
            url,
            methods: config
                .methods
                .iter()
                .map(|method| method.trim().to_ascii_uppercase())
                .collect(),
            required: config.required.unwrap_or(true),
            rules: config
                .rules
                .into_iter()
                .map(Rule::compile)
                .collect::<Result<_, _>>()?,
        })
    }

    fn matches(&self, method: &str, url: &str) -> bool {
        let method_ok =
            self.methods.is_empty() || self.methods.iter().any(|m| m.eq_ignore_ascii_case(method));
        method_ok && self.url.is_match(url)
    }

    #[must_use]
    pub fn required(&self) -> bool {
        self.required
    }

    /// A matching deny rule wins over any allow rule; otherwise the first
    /// matching allow rule supplies the subject.
    #[must_use]
    pub fn evaluate(&self, client_ip: Option<IpAddr>, bearer: Option<&str>) -> RuleVerdict {
        let mut verdict = RuleVerdict::NoMatch;
        for rule in &self.rules {
            if !rule.matches(client_ip, bearer) {
                continue;
            }
            if rule.deny {
                debug!("Deny rule matched");
                return RuleVerdict::Deny;
            }
            if verdict == RuleVerdict::NoMatch {
                verdict = RuleVerdict::Allow(StaticSubject {
                    subject: rule.subject.clone(),
                    roles: rule.roles.clone(),
                });
            }
        }
        verdict
    }
}

/// Compiled rule set, validated once at startup.
#[derive(Clone, Debug)]
pub struct ForwardAuthRules {
    default_required: bool,
    entries: Vec<Entry>,
}

impl Default for ForwardAuthRules {
    fn default() -> Self {
        Self {
            default_required: true,
            entries: Vec::new(),
        }
    }
}

impl ForwardAuthRules {
    /// # Errors
    ///
    /// Returns the first invalid pattern, address or rule.
    pub fn compile(config: ForwardAuthConfig) -> Result<Self, RuleError> {
        Ok(Self {
            default_required: config.default_required,
            entries: config
                .entries
                .into_iter()
                .map(Entry::compile)
                .collect::<Result<_, _>>()?,
        })
    }

    /// First entry matching `method` and `url`.
    #[must_use]
    pub fn matching(&self, method: &str, url: &str) -> Option<&Entry> {
        self.entries.iter().find(|entry| entry.matches(method, url))
    }

    #[must_use]
    pub fn required(&self, entry: Option<&Entry>) -> bool {
        entry.map_or(self.default_required, Entry::required)
    }
}

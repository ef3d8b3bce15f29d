//! Client address resolution behind trusted reverse proxies.

use super::rules::RuleError;
use axum::http::HeaderMap;
use ipnetwork::IpNetwork;
use std::net::IpAddr;
use tracing::warn;

const X_FORWARDED_FOR: &str = "x-forwarded-for";

/// Networks whose `x-forwarded-for` entries are believed.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct TrustedNetworks(Vec<IpNetwork>);

impl TrustedNetworks {
    /// Parse CIDR networks or bare addresses; blank values are skipped.
    ///
    /// # Errors
    ///
    /// Returns the first value that is not a network.
    pub fn parse<I, S>(values: I) -> Result<Self, RuleError>
    where
        I: IntoIterator<Item = S>,
        S: AsRef<str>,
    {
        let mut networks = Vec::new();
        for value in values {
            let value = value.as_ref().trim();
            if value.is_empty() {
                continue;
            }
            let network = value.parse::<IpNetwork>().map_err(|source| RuleError::Network {
                value: value.to_string(),
                source,
            })?;
            networks.push(network);
        }
        Ok(Self(networks))
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    #[must_use]
    pub fn contains(&self, ip: IpAddr) -> bool {
        self.0.iter().any(|network| network.contains(ip))
    }

    /// Address of the client that started the request.
    ///
    /// `x-forwarded-for` is only read when `peer` is trusted. The chain is
    /// walked right to left and the first untrusted hop is the client; a
    /// malformed hop stops the walk at the last trusted address.
    #[must_use]
    pub fn client_ip(&self, headers: &HeaderMap, peer: Option<IpAddr>) -> Option<IpAddr> {
        let peer = peer?;
        if !self.contains(peer) {
            return Some(peer);
        }
        let chain = headers
            .get_all(X_FORWARDED_FOR)
            .iter()
            .filter_map(|value| value.to_str().ok())
            .flat_map(|value| value.split(','))
            .map(str::trim)
            .filter(|hop| !hop.is_empty())
            .collect::<Vec<_>>();

        let mut client = peer;
        for hop in chain.into_iter().rev() {
            let Ok(ip) = hop.parse::<IpAddr>() else {
                warn!("Invalid x-forwarded-for hop: {hop}");
                break;
            };
            client = ip;
            if !self.contains(ip) {
                break;
            }
        }
        Some(client)
    }
}

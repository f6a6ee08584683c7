//! IP reputation and geolocation lookup.
//!
//! The engine consumes a single lookup, `ip -> GeoInfo`. Real deployments plug
//! in a geolocation database or reputation service; [`StaticGeoLookup`]
//! resolves countries from configured CIDR blocks and is the default.

use crate::config::NetworkConfig;
use crate::error::{LookupError, TrustError};
use async_trait::async_trait;
use ipnet::IpNet;
use serde::{Deserialize, Serialize};
use std::net::IpAddr;

/// What a lookup knows about an address.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct GeoInfo {
    /// ISO 3166 alpha-2 country code
    pub country: Option<String>,
    pub is_datacenter: bool,
    pub is_vpn: bool,
}

/// External IP lookup. Implementations must not have side effects the engine
/// depends on; the network analyzer bounds every call with a timeout.
#[async_trait]
pub trait GeoLookup: Send + Sync {
    async fn lookup(&self, ip: IpAddr) -> Result<GeoInfo, LookupError>;
}

/// Lookup backed by configured CIDR -> country assignments.
#[derive(Debug, Clone, Default)]
pub struct StaticGeoLookup {
    ranges: Vec<(IpNet, String)>,
}

impl StaticGeoLookup {
    pub fn new(ranges: Vec<(IpNet, String)>) -> Self {
        Self { ranges }
    }

    pub fn from_config(config: &NetworkConfig) -> Result<Self, TrustError> {
        let ranges = config
            .country_ranges
            .iter()
            .map(|r| {
                r.cidr
                    .parse::<IpNet>()
                    .map(|net| (net, r.country.to_uppercase()))
                    .map_err(|e| TrustError::Config(format!("country range {}: {}", r.cidr, e)))
            })
            .collect::<Result<Vec<_>, _>>()?;
        Ok(Self::new(ranges))
    }

    pub fn is_empty(&self) -> bool {
        self.ranges.is_empty()
    }
}

#[async_trait]
impl GeoLookup for StaticGeoLookup {
    async fn lookup(&self, ip: IpAddr) -> Result<GeoInfo, LookupError> {
        // most specific block wins
        let country = self
            .ranges
            .iter()
            .filter(|(net, _)| net.contains(&ip))
            .max_by_key(|(net, _)| net.prefix_len())
            .map(|(_, country)| country.clone());

        Ok(GeoInfo {
            country,
            ..Default::default()
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::CountryRange;

    #[tokio::test]
    async fn test_static_lookup() {
        let config = NetworkConfig {
            country_ranges: vec![
                CountryRange {
                    cidr: "203.0.113.0/24".into(),
                    country: "de".into(),
                },
                CountryRange {
                    cidr: "203.0.113.128/25".into(),
                    country: "AT".into(),
                },
            ],
            ..Default::default()
        };
        let lookup = StaticGeoLookup::from_config(&config).unwrap();

        let info = lookup.lookup("203.0.113.5".parse().unwrap()).await.unwrap();
        assert_eq!(info.country.as_deref(), Some("DE"));

        let info = lookup.lookup("203.0.113.200".parse().unwrap()).await.unwrap();
        assert_eq!(info.country.as_deref(), Some("AT"));

        let info = lookup.lookup("198.51.100.1".parse().unwrap()).await.unwrap();
        assert!(info.country.is_none());
    }

    #[test]
    fn test_invalid_range() {
        let config = NetworkConfig {
            country_ranges: vec![CountryRange {
                cidr: "not-a-cidr".into(),
                country: "US".into(),
            }],
            ..Default::default()
        };
        assert!(matches!(
            StaticGeoLookup::from_config(&config),
            Err(TrustError::Config(_))
        ));
    }
}

//! Network reputation analyzer.
//!
//! Resolves the client address, then scores it from a neutral 50:
//! - Geolocated country against the declared timezone and language
//! - Proxy and CDN forwarding headers
//! - Datacenter and VPN address ranges (static tables plus lookup flags)
//! - Browser header self-consistency
//! - Negotiated TLS version and cipher
//!
//! Private and loopback addresses short-circuit with a fixed score. The
//! external lookup is best-effort: it is cached, bounded by a timeout, and any
//! failure leaves the geo checks out instead of failing the analysis.

use super::headers::{check_consistency, proxy_headers};
use super::{DetectionContext, Detector};
use crate::cache::LookupCache;
use crate::config::NetworkConfig;
use crate::error::{LookupError, TrustError};
use crate::geo::{GeoInfo, GeoLookup};
use crate::rules::{Rule, RuleHit, ScoreSheet};
use crate::telemetry::{RequestMeta, TelemetrySnapshot, TlsInfo};
use async_trait::async_trait;
use ipnet::IpNet;
use serde::{Deserialize, Serialize};
use std::net::IpAddr;
use std::sync::{Arc, LazyLock};
use std::time::Duration;
use tracing::{debug, warn};

const BASE_SCORE: i32 = 50;

/// Score for private, loopback and link-local clients.
pub const LOCAL_NETWORK_SCORE: u8 = 60;

/// Score when no client address can be determined.
pub const UNRESOLVED_SCORE: u8 = 50;

/// Published ranges of large hosting and cloud providers.
static DEFAULT_DATACENTER_RANGES: &[&str] = &[
    // Amazon
    "3.0.0.0/9",
    "52.0.0.0/10",
    "54.64.0.0/11",
    // Google Cloud
    "34.64.0.0/10",
    "35.184.0.0/13",
    // Microsoft Azure
    "13.64.0.0/11",
    "40.64.0.0/10",
    // DigitalOcean
    "104.131.0.0/16",
    "138.68.0.0/16",
    "159.89.0.0/16",
    "167.99.0.0/16",
    // Hetzner
    "5.9.0.0/16",
    "88.198.0.0/16",
    "116.202.0.0/16",
    // OVH
    "51.68.0.0/16",
    "54.36.0.0/16",
    "145.239.0.0/16",
    // Linode
    "45.33.0.0/17",
    "139.162.0.0/16",
    // Vultr
    "45.32.0.0/16",
    "108.61.0.0/16",
];

static DEFAULT_RANGES: LazyLock<Vec<IpNet>> = LazyLock::new(|| {
    DEFAULT_DATACENTER_RANGES
        .iter()
        .filter_map(|r| r.parse().ok())
        .collect()
});

/// Country -> timezone prefixes and primary language subtags.
static COUNTRY_LOCALES: &[(&str, &[&str], &[&str])] = &[
    ("US", &["America/", "Pacific/Honolulu"], &["en", "es"]),
    ("CA", &["America/"], &["en", "fr"]),
    ("MX", &["America/"], &["es"]),
    ("BR", &["America/"], &["pt"]),
    ("AR", &["America/"], &["es"]),
    ("GB", &["Europe/London"], &["en"]),
    ("IE", &["Europe/Dublin"], &["en", "ga"]),
    ("DE", &["Europe/Berlin", "Europe/Busingen"], &["de"]),
    ("AT", &["Europe/Vienna"], &["de"]),
    ("CH", &["Europe/Zurich"], &["de", "fr", "it"]),
    ("FR", &["Europe/Paris"], &["fr"]),
    ("ES", &["Europe/Madrid", "Atlantic/Canary", "Africa/Ceuta"], &["es", "ca", "gl", "eu"]),
    ("IT", &["Europe/Rome"], &["it"]),
    ("NL", &["Europe/Amsterdam"], &["nl", "en"]),
    ("BE", &["Europe/Brussels"], &["nl", "fr", "de"]),
    ("PL", &["Europe/Warsaw"], &["pl"]),
    ("SE", &["Europe/Stockholm"], &["sv", "en"]),
    ("UA", &["Europe/Kiev", "Europe/Kyiv"], &["uk", "ru"]),
    ("RU", &["Europe/", "Asia/"], &["ru"]),
    ("TR", &["Europe/Istanbul"], &["tr"]),
    ("IN", &["Asia/Kolkata", "Asia/Calcutta"], &["hi", "en"]),
    ("CN", &["Asia/Shanghai", "Asia/Urumqi"], &["zh"]),
    ("JP", &["Asia/Tokyo"], &["ja"]),
    ("KR", &["Asia/Seoul"], &["ko"]),
    ("SG", &["Asia/Singapore"], &["en", "zh", "ms", "ta"]),
    ("AU", &["Australia/"], &["en"]),
    ("NZ", &["Pacific/Auckland"], &["en", "mi"]),
    ("ZA", &["Africa/Johannesburg"], &["en", "af", "zu"]),
];

fn country_locales(country: &str) -> Option<(&'static [&'static str], &'static [&'static str])> {
    COUNTRY_LOCALES
        .iter()
        .find(|(c, _, _)| *c == country)
        .map(|(_, tz, langs)| (*tz, *langs))
}

static OBSOLETE_TLS_VERSIONS: &[&str] = &["sslv2", "sslv3", "tlsv1", "tlsv1.0", "tlsv1.1"];

static OBSOLETE_CIPHER_MARKERS: &[&str] = &["rc4", "des", "null", "export", "md5", "anon"];

/// Pick the client address: first `x-forwarded-for` entry, `x-real-ip`, the
/// connection address, then the address the collector declared.
pub fn resolve_client_ip(snapshot: &TelemetrySnapshot, request: &RequestMeta) -> Option<IpAddr> {
    let forwarded: Option<IpAddr> = request
        .header("x-forwarded-for")
        .and_then(|v| v.split(',').next())
        .and_then(|v| v.trim().parse().ok());
    let real_ip = || -> Option<IpAddr> {
        request
            .header("x-real-ip")
            .and_then(|v| v.trim().parse().ok())
    };
    let declared = || snapshot.network.as_ref().and_then(|n| n.ip);

    forwarded.or_else(real_ip).or(request.remote_addr).or_else(declared)
}

/// Private, loopback, link-local or unspecified addresses.
pub fn is_local_address(ip: &IpAddr) -> bool {
    match ip {
        IpAddr::V4(v4) => v4.is_private() || v4.is_loopback() || v4.is_link_local() || v4.is_unspecified(),
        IpAddr::V6(v6) => {
            let first = v6.segments()[0];
            v6.is_loopback()
                || v6.is_unspecified()
                || (first & 0xfe00) == 0xfc00
                || (first & 0xffc0) == 0xfe80
                || v6.to_ipv4_mapped().is_some_and(|v4| v4.is_private() || v4.is_loopback())
        }
    }
}

/// Primary language subtag, lowercased ("en-US" -> "en").
fn primary_language(tag: &str) -> Option<String> {
    let primary = tag.split([',', ';', '-', '_']).next()?.trim().to_lowercase();
    (!primary.is_empty() && primary != "*").then_some(primary)
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TlsGrade {
    Obsolete,
    Modern,
}

/// Grade a negotiated TLS session. `None` when neither clearly obsolete nor
/// clearly modern.
pub fn grade_tls(tls: &TlsInfo) -> Option<TlsGrade> {
    let version = tls.version.to_lowercase().replace([' ', '_'], "");
    let cipher = tls.cipher.to_lowercase();

    if OBSOLETE_TLS_VERSIONS.contains(&version.as_str())
        || OBSOLETE_CIPHER_MARKERS.iter().any(|m| cipher.contains(m))
    {
        return Some(TlsGrade::Obsolete);
    }
    let aead = cipher.contains("gcm") || cipher.contains("chacha20");
    if version == "tlsv1.3" || (version == "tlsv1.2" && aead) {
        return Some(TlsGrade::Modern);
    }
    None
}

/// Inputs of the network rule table.
#[derive(Debug, Clone, Default)]
pub struct NetworkFacts {
    /// Country agrees with the declared timezone; `None` when either is unknown
    pub geo_match: Option<bool>,
    /// Country agrees with the declared language; `None` when either is unknown
    pub language_match: Option<bool>,
    pub proxy: bool,
    pub datacenter: bool,
    pub vpn: bool,
    /// Header self-consistency; `None` when the UA does not claim a browser
    pub headers_consistent: Option<bool>,
    pub tls: Option<TlsGrade>,
}

pub static NETWORK_RULES: &[Rule<NetworkFacts>] = &[
    Rule {
        signal: "geo_consistent",
        delta: 10,
        predicate: |f| f.geo_match == Some(true),
        message: "IP country matches the timezone",
    },
    Rule {
        signal: "geo_mismatch",
        delta: -15,
        predicate: |f| f.geo_match == Some(false),
        message: "IP country does not match the timezone",
    },
    Rule {
        signal: "language_consistent",
        delta: 5,
        predicate: |f| f.language_match == Some(true),
        message: "IP country matches the language",
    },
    Rule {
        signal: "language_mismatch",
        delta: -10,
        predicate: |f| f.language_match == Some(false),
        message: "IP country does not match the language",
    },
    Rule {
        signal: "proxy",
        delta: -10,
        predicate: |f| f.proxy,
        message: "request passed through a proxy",
    },
    Rule {
        signal: "datacenter",
        delta: -25,
        predicate: |f| f.datacenter,
        message: "IP belongs to a datacenter",
    },
    Rule {
        signal: "vpn",
        delta: -20,
        predicate: |f| f.vpn,
        message: "IP belongs to a VPN provider",
    },
    Rule {
        signal: "headers_consistent",
        delta: 5,
        predicate: |f| f.headers_consistent == Some(true),
        message: "browser headers are consistent",
    },
    Rule {
        signal: "headers_inconsistent",
        delta: -10,
        predicate: |f| f.headers_consistent == Some(false),
        message: "headers contradict the claimed browser",
    },
    Rule {
        signal: "obsolete_tls",
        delta: -5,
        predicate: |f| f.tls == Some(TlsGrade::Obsolete),
        message: "obsolete TLS version or cipher",
    },
    Rule {
        signal: "modern_tls",
        delta: 5,
        predicate: |f| f.tls == Some(TlsGrade::Modern),
        message: "modern TLS",
    },
];

/// Flags surfaced on the verdict.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct NetworkFlags {
    pub local_network: bool,
    pub proxy: bool,
    pub vpn: bool,
    pub datacenter: bool,
    pub geo_mismatch: bool,
}

/// Outcome of the external lookup for one analysis.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum LookupState {
    /// No lookup configured, or the address short-circuited
    #[default]
    Skipped,
    Resolved,
    Cached,
    /// Lookup failed or timed out; geo checks were left out
    Unknown,
}

/// Network analyzer output.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct NetworkAnalysis {
    pub score: u8,
    pub client_ip: Option<IpAddr>,
    pub country: Option<String>,
    pub flags: NetworkFlags,
    pub proxy_headers: Vec<String>,
    pub lookup: LookupState,
    pub anomalies: Vec<String>,
    pub signals: Vec<RuleHit>,
}

/// Network reputation analyzer.
pub struct NetworkAnalyzer {
    datacenter_ranges: Vec<IpNet>,
    vpn_ranges: Vec<IpNet>,
    lookup: Option<Arc<dyn GeoLookup>>,
    cache: LookupCache,
    lookup_timeout: Duration,
    inspect_tls: bool,
}

fn parse_ranges(ranges: &[String], kind: &str) -> Result<Vec<IpNet>, TrustError> {
    ranges
        .iter()
        .map(|r| {
            r.parse::<IpNet>()
                .map_err(|e| TrustError::Config(format!("{} range {}: {}", kind, r, e)))
        })
        .collect()
}

impl NetworkAnalyzer {
    /// Build from configuration. Configured ranges extend the built-in
    /// datacenter table.
    pub fn new(config: &NetworkConfig) -> Result<Self, TrustError> {
        let mut datacenter_ranges = DEFAULT_RANGES.clone();
        datacenter_ranges.extend(parse_ranges(&config.datacenter_ranges, "datacenter")?);

        Ok(Self {
            datacenter_ranges,
            vpn_ranges: parse_ranges(&config.vpn_ranges, "vpn")?,
            lookup: None,
            cache: LookupCache::new(
                config.lookup_cache_size,
                Duration::from_secs(config.lookup_cache_ttl_seconds),
            ),
            lookup_timeout: Duration::from_millis(config.lookup_timeout_ms),
            inspect_tls: config.inspect_tls,
        })
    }

    /// Attach an external lookup.
    pub fn with_lookup(mut self, lookup: Arc<dyn GeoLookup>) -> Self {
        self.lookup = Some(lookup);
        self
    }

    pub fn is_datacenter(&self, ip: &IpAddr) -> bool {
        self.datacenter_ranges.iter().any(|r| r.contains(ip))
    }

    pub fn is_vpn(&self, ip: &IpAddr) -> bool {
        self.vpn_ranges.iter().any(|r| r.contains(ip))
    }

    /// Approximate number of cached lookups.
    pub fn cached_lookups(&self) -> u64 {
        self.cache.entry_count()
    }

    pub fn clear_cache(&self) {
        self.cache.invalidate_all();
    }

    /// Cached, timeout-bounded lookup. Errors become `Unknown`.
    async fn geolocate(&self, ip: IpAddr) -> (Option<GeoInfo>, LookupState) {
        let Some(lookup) = &self.lookup else {
            return (None, LookupState::Skipped);
        };

        if let Some(info) = self.cache.get(&ip).await {
            return (Some(info), LookupState::Cached);
        }

        let timeout_ms = self.lookup_timeout.as_millis() as u64;
        let result = match tokio::time::timeout(self.lookup_timeout, lookup.lookup(ip)).await {
            Ok(result) => result,
            Err(_) => Err(LookupError::Timeout(timeout_ms)),
        };

        match result {
            Ok(info) => {
                self.cache.insert(ip, info.clone()).await;
                (Some(info), LookupState::Resolved)
            }
            Err(e) => {
                warn!(ip = %ip, error = %e, "IP lookup failed, treating origin as unknown");
                (None, LookupState::Unknown)
            }
        }
    }

    /// Score the network origin of a session.
    pub async fn inspect(&self, snapshot: &TelemetrySnapshot, request: &RequestMeta) -> NetworkAnalysis {
        let Some(ip) = resolve_client_ip(snapshot, request) else {
            return NetworkAnalysis {
                score: UNRESOLVED_SCORE,
                anomalies: vec!["client IP could not be determined".to_string()],
                ..Default::default()
            };
        };

        if is_local_address(&ip) {
            return NetworkAnalysis {
                score: LOCAL_NETWORK_SCORE,
                client_ip: Some(ip),
                flags: NetworkFlags {
                    local_network: true,
                    ..Default::default()
                },
                ..Default::default()
            };
        }

        let (geo, lookup) = self.geolocate(ip).await;
        let geo = geo.unwrap_or_default();
        let country = geo.country.as_ref().map(|c| c.to_uppercase());
        let locales = country.as_deref().and_then(country_locales);

        let timezone = snapshot.device.timezone.as_deref().filter(|tz| !tz.is_empty());
        let language = snapshot
            .device
            .language
            .as_deref()
            .or_else(|| request.header("accept-language"))
            .and_then(primary_language);

        let mut found_proxy_headers: Vec<String> = proxy_headers(request).into_iter().map(String::from).collect();
        if let Some(origin) = &snapshot.network {
            for h in &origin.proxy_headers {
                let h = h.to_lowercase();
                if !found_proxy_headers.contains(&h) {
                    found_proxy_headers.push(h);
                }
            }
        }

        let consistency = check_consistency(request);
        let facts = NetworkFacts {
            geo_match: match (locales, timezone) {
                (Some((prefixes, _)), Some(tz)) => Some(prefixes.iter().any(|p| tz.starts_with(p))),
                _ => None,
            },
            language_match: match (locales, &language) {
                (Some((_, langs)), Some(lang)) => Some(langs.contains(&lang.as_str())),
                _ => None,
            },
            proxy: !found_proxy_headers.is_empty(),
            datacenter: geo.is_datacenter || self.is_datacenter(&ip),
            vpn: geo.is_vpn || self.is_vpn(&ip),
            headers_consistent: consistency.claims_browser.then(|| consistency.is_consistent()),
            tls: if self.inspect_tls {
                request.tls.as_ref().and_then(grade_tls)
            } else {
                None
            },
        };

        let mut sheet = ScoreSheet::new(BASE_SCORE);
        sheet.apply(NETWORK_RULES, &facts);

        let flags = NetworkFlags {
            local_network: false,
            proxy: facts.proxy,
            vpn: facts.vpn,
            datacenter: facts.datacenter,
            geo_mismatch: facts.geo_match == Some(false),
        };
        let mut anomalies = sheet.anomalies();
        anomalies.extend(consistency.contradictions.iter().map(|c| format!("header check: {}", c)));

        debug!(
            detector = "network_analyzer",
            ip = %ip,
            country = ?country,
            score = sheet.score(),
            "Network analysis complete"
        );

        NetworkAnalysis {
            score: sheet.score(),
            client_ip: Some(ip),
            country,
            flags,
            proxy_headers: found_proxy_headers,
            lookup,
            anomalies,
            signals: sheet.into_hits(),
        }
    }
}

impl std::fmt::Debug for NetworkAnalyzer {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("NetworkAnalyzer")
            .field("datacenter_ranges", &self.datacenter_ranges.len())
            .field("vpn_ranges", &self.vpn_ranges.len())
            .field("has_lookup", &self.lookup.is_some())
            .field("lookup_timeout", &self.lookup_timeout)
            .finish()
    }
}

#[async_trait]
impl Detector for NetworkAnalyzer {
    type Output = NetworkAnalysis;

    async fn analyze(&self, ctx: &DetectionContext) -> NetworkAnalysis {
        self.inspect(&ctx.snapshot, &ctx.request).await
    }

    fn name(&self) -> &'static str {
        "network_analyzer"
    }
}

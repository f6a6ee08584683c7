//! Configuration types for the session trust agent.

use serde::{Deserialize, Serialize};

/// Main configuration for the session trust agent.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct TrustConfig {
    /// Score thresholds for decisions
    pub thresholds: ThresholdConfig,

    /// Session lifecycle settings
    pub session: SessionConfig,

    /// Behavior analysis settings
    pub behavior: BehaviorConfig,

    /// Network reputation settings
    pub network: NetworkConfig,

    /// Verdict formatting settings
    pub aggregation: AggregationConfig,
}

impl TrustConfig {
    /// Parse a configuration document, YAML when `yaml` is set and JSON otherwise.
    pub fn parse(content: &str, yaml: bool) -> Result<Self, crate::TrustError> {
        let parsed: Self = if yaml {
            serde_yaml::from_str(content).map_err(|e| crate::TrustError::Config(e.to_string()))?
        } else {
            serde_json::from_str(content).map_err(|e| crate::TrustError::Config(e.to_string()))?
        };
        parsed.session.ttl()?;
        Ok(parsed)
    }
}

/// Score thresholds for trust decisions.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ThresholdConfig {
    /// Automation score above which a session is rejected at creation (0-100)
    pub auto_reject_automation_score: u8,

    /// Automation score at which the snapshot counts as automated (0-100)
    pub automation_detected_score: u8,

    /// Reject at creation when the webdriver flag comes with any other
    /// automation signal, whatever the score
    pub reject_corroborated_webdriver: bool,

    /// Final score at or above which a session is human (0-100)
    pub human_score: u8,

    /// Behavior score below which a triggered analysis rejects the session
    pub behavior_reject_score: u8,
}

impl Default for ThresholdConfig {
    fn default() -> Self {
        Self {
            auto_reject_automation_score: 80,
            automation_detected_score: 50,
            reject_corroborated_webdriver: true,
            human_score: 60,
            behavior_reject_score: 30,
        }
    }
}

/// Session lifecycle configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct SessionConfig {
    /// Age after which a session is swept, measured from creation
    pub ttl_seconds: u64,

    /// Interval between sweeps
    pub sweep_interval_seconds: u64,

    /// Event count that triggers the one-shot behavior analysis
    pub behavior_trigger_events: usize,

    /// Events kept after a session reaches a verdict
    pub retained_events: usize,
}

impl SessionConfig {
    /// Session TTL, or a config error when it does not fit a time delta.
    pub fn ttl(&self) -> Result<chrono::Duration, crate::TrustError> {
        i64::try_from(self.ttl_seconds)
            .ok()
            .and_then(chrono::Duration::try_seconds)
            .ok_or_else(|| {
                crate::TrustError::Config(format!("session ttl_seconds out of range: {}", self.ttl_seconds))
            })
    }
}

impl Default for SessionConfig {
    fn default() -> Self {
        Self {
            ttl_seconds: 24 * 3600,
            sweep_interval_seconds: 3600,
            behavior_trigger_events: 10,
            retained_events: 50,
        }
    }
}

/// Behavior analysis configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct BehaviorConfig {
    /// Minimum pointer-move events before behavior is scored
    pub min_pointer_moves: usize,

    /// Number of clusters for the transition outlier check
    pub outlier_clusters: usize,

    /// Cluster share under which the outlier check fires (0.0-1.0)
    pub outlier_min_share: f64,

    /// Score delta applied by the aggregator when the outlier check fires.
    /// Zero keeps the signal diagnostic-only.
    pub outlier_penalty: i32,
}

impl Default for BehaviorConfig {
    fn default() -> Self {
        Self {
            min_pointer_moves: 5,
            outlier_clusters: 3,
            outlier_min_share: 0.10,
            outlier_penalty: 0,
        }
    }
}

/// Network reputation configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct NetworkConfig {
    /// Upper bound on a single external lookup
    pub lookup_timeout_ms: u64,

    /// Lookup cache size
    pub lookup_cache_size: u64,

    /// Lookup cache TTL in seconds
    pub lookup_cache_ttl_seconds: u64,

    /// Extra datacenter ranges (CIDR notation)
    pub datacenter_ranges: Vec<String>,

    /// Extra VPN ranges (CIDR notation)
    pub vpn_ranges: Vec<String>,

    /// Country assignments for the static lookup
    pub country_ranges: Vec<CountryRange>,

    /// Score the negotiated TLS version and cipher
    pub inspect_tls: bool,
}

impl Default for NetworkConfig {
    fn default() -> Self {
        Self {
            lookup_timeout_ms: 500,
            lookup_cache_size: 10_000,
            lookup_cache_ttl_seconds: 3600,
            datacenter_ranges: vec![],
            vpn_ranges: vec![],
            country_ranges: vec![],
            inspect_tls: true,
        }
    }
}

/// A CIDR block mapped to an ISO 3166 country code.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CountryRange {
    pub cidr: String,
    pub country: String,
}

/// Verdict formatting configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct AggregationConfig {
    /// Anomalies listed per analyzer before a "+N more" marker
    pub max_listed_anomalies: usize,
}

impl Default for AggregationConfig {
    fn default() -> Self {
        Self {
            max_listed_anomalies: 3,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_config() {
        let config = TrustConfig::default();
        assert_eq!(config.thresholds.auto_reject_automation_score, 80);
        assert_eq!(config.thresholds.human_score, 60);
        assert_eq!(config.session.behavior_trigger_events, 10);
        assert_eq!(config.session.ttl_seconds, 86_400);
        assert_eq!(config.behavior.outlier_penalty, 0);
    }

    #[test]
    fn test_config_serialization() {
        let config = TrustConfig::default();
        let json = serde_json::to_string(&config).unwrap();
        let parsed: TrustConfig = serde_json::from_str(&json).unwrap();
        assert_eq!(parsed.thresholds.human_score, config.thresholds.human_score);
        assert_eq!(parsed.network.lookup_timeout_ms, 500);
    }

    #[test]
    fn test_partial_yaml() {
        let yaml = "thresholds:\n  human_score: 70\nnetwork:\n  vpn_ranges: [\"10.8.0.0/16\"]\n";
        let config = TrustConfig::parse(yaml, true).unwrap();
        assert_eq!(config.thresholds.human_score, 70);
        assert_eq!(config.thresholds.auto_reject_automation_score, 80);
        assert_eq!(config.network.vpn_ranges, vec!["10.8.0.0/16".to_string()]);
    }

    #[test]
    fn test_session_ttl_range() {
        let config = SessionConfig::default();
        assert_eq!(config.ttl().unwrap(), chrono::Duration::hours(24));

        let huge = SessionConfig {
            ttl_seconds: u64::MAX,
            ..Default::default()
        };
        assert!(matches!(huge.ttl(), Err(crate::TrustError::Config(_))));

        let past_millis = SessionConfig {
            ttl_seconds: (i64::MAX / 1000) as u64 + 1,
            ..Default::default()
        };
        assert!(past_millis.ttl().is_err());
    }

    #[test]
    fn test_out_of_range_ttl_rejected_on_load() {
        let json = r#"{"session": {"ttl_seconds": 18446744073709551615}}"#;
        assert!(matches!(TrustConfig::parse(json, false), Err(crate::TrustError::Config(_))));
    }

    #[test]
    fn test_invalid_document() {
        assert!(TrustConfig::parse("{not json", false).is_err());
    }
}

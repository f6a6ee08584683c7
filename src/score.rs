//! Decision aggregation and verdict types.
//!
//! The aggregator starts from 50 and folds in the four analyses plus
//! session-level signals (age, event volume, missing device data, request
//! headers, timing regularity, clicks without movement). Every fired signal
//! contributes one line to the verdict's reasons.

use crate::config::TrustConfig;
use crate::detectors::behavior::{click_without_movement, timing_cv, REGULAR_TIMING_CV};
use crate::detectors::headers::automation_markers;
use crate::detectors::{AutomationAnalysis, BehaviorAnalysis, FingerprintAnalysis, NetworkAnalysis};
use crate::rules::{clamp_score, Rule, RuleHit, ScoreSheet};
use crate::telemetry::{Event, RequestMeta, TelemetrySnapshot};
use serde::{Deserialize, Serialize};

const BASE_SCORE: i32 = 50;

/// Sessions evaluated sooner than this after creation are suspicious.
const MIN_SESSION_AGE_MS: u64 = 1000;
/// Many events inside this window after creation are suspicious.
const BURST_WINDOW_MS: u64 = 3000;
const BURST_EVENTS: usize = 10;

/// Per-analyzer records carried on a verdict.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct VerificationDetails {
    pub automation: AutomationAnalysis,
    pub behavior: Option<BehaviorAnalysis>,
    pub fingerprint: FingerprintAnalysis,
    pub network: NetworkAnalysis,
}

/// Final verdict of a session.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct VerificationResult {
    pub is_human: bool,
    /// Trust score (0-100), higher is more human
    pub score: u8,
    pub reasons: Vec<String>,
    pub details: VerificationDetails,
}

impl VerificationResult {
    /// Verdict for a session rejected before aggregation.
    pub fn rejected(reason: impl Into<String>, details: VerificationDetails) -> Self {
        Self {
            is_human: false,
            score: 0,
            reasons: vec![reason.into()],
            details,
        }
    }
}

/// How behavior entered the decision.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub enum BehaviorVerdict {
    Human,
    NotHuman,
    /// Not analyzed, or too few pointer moves
    #[default]
    Unavailable,
}

impl BehaviorVerdict {
    pub fn of(behavior: Option<&BehaviorAnalysis>) -> Self {
        match behavior {
            Some(b) if b.insufficient_data => BehaviorVerdict::Unavailable,
            Some(b) if b.is_human => BehaviorVerdict::Human,
            Some(_) => BehaviorVerdict::NotHuman,
            None => BehaviorVerdict::Unavailable,
        }
    }
}

/// Inputs of the fixed-delta decision rules.
#[derive(Debug, Clone, Default)]
pub struct DecisionFacts {
    pub automation_detected: bool,
    pub behavior: BehaviorVerdict,
    pub session_age_ms: u64,
    pub event_count: usize,
    pub missing_device_info: bool,
    pub incomplete_user_agent: bool,
    pub automation_headers: bool,
    pub timing_cv: Option<f64>,
    pub click_without_movement: bool,
}

pub static DECISION_RULES: &[Rule<DecisionFacts>] = &[
    Rule {
        signal: "automation_detected",
        delta: -40,
        predicate: |f| f.automation_detected,
        message: "automation detected",
    },
    Rule {
        signal: "no_automation",
        delta: 20,
        predicate: |f| !f.automation_detected,
        message: "no automation detected",
    },
    Rule {
        signal: "behavior_human",
        delta: 30,
        predicate: |f| f.behavior == BehaviorVerdict::Human,
        message: "interaction behavior is human-like",
    },
    Rule {
        signal: "behavior_not_human",
        delta: -30,
        predicate: |f| f.behavior == BehaviorVerdict::NotHuman,
        message: "interaction behavior is not human-like",
    },
    Rule {
        signal: "behavior_unavailable",
        delta: -20,
        predicate: |f| f.behavior == BehaviorVerdict::Unavailable,
        message: "too few events to analyze behavior",
    },
    Rule {
        signal: "session_too_fast",
        delta: -30,
        predicate: |f| f.session_age_ms < MIN_SESSION_AGE_MS,
        message: "too little time elapsed since the session started",
    },
    Rule {
        signal: "event_burst",
        delta: -20,
        predicate: |f| f.session_age_ms < BURST_WINDOW_MS && f.event_count > BURST_EVENTS,
        message: "too many events in too little time",
    },
    Rule {
        signal: "no_events",
        delta: -30,
        predicate: |f| f.event_count == 0,
        message: "no interaction events recorded",
    },
    Rule {
        signal: "missing_device_info",
        delta: -15,
        predicate: |f| f.missing_device_info,
        message: "missing device info (screen resolution and timezone)",
    },
    Rule {
        signal: "incomplete_user_agent",
        delta: -15,
        predicate: |f| f.incomplete_user_agent,
        message: "user agent could not be fully parsed",
    },
    Rule {
        signal: "automation_headers",
        delta: -15,
        predicate: |f| f.automation_headers,
        message: "request carries automation headers",
    },
    Rule {
        signal: "regular_timing",
        delta: -20,
        predicate: |f| f.timing_cv.is_some_and(|cv| cv < REGULAR_TIMING_CV),
        message: "event timing is suspiciously regular",
    },
    Rule {
        signal: "click_without_movement",
        delta: -20,
        predicate: |f| f.click_without_movement,
        message: "click without any prior pointer movement",
    },
];

/// Everything the aggregator reads for one session.
#[derive(Debug, Clone, Copy)]
pub struct AggregationInput<'a> {
    pub automation: &'a AutomationAnalysis,
    pub behavior: Option<&'a BehaviorAnalysis>,
    pub fingerprint: &'a FingerprintAnalysis,
    pub network: &'a NetworkAnalysis,
    pub snapshot: &'a TelemetrySnapshot,
    pub request: &'a RequestMeta,
    pub events: &'a [Event],
    pub session_age_ms: u64,
}

impl AggregationInput<'_> {
    pub fn facts(&self) -> DecisionFacts {
        DecisionFacts {
            automation_detected: self.automation.is_automated,
            behavior: BehaviorVerdict::of(self.behavior),
            session_age_ms: self.session_age_ms,
            event_count: self.events.len(),
            missing_device_info: self.snapshot.device.screen_resolution.is_none()
                && self
                    .snapshot
                    .device
                    .timezone
                    .as_deref()
                    .map_or(true, |tz| tz.trim().is_empty()),
            incomplete_user_agent: !self.snapshot.user_agent.as_ref().is_some_and(|ua| ua.is_complete()),
            automation_headers: !automation_markers(self.request).is_empty(),
            timing_cv: timing_cv(self.events),
            click_without_movement: click_without_movement(self.events),
        }
    }
}

/// "a, b, c (+2 more)"
pub fn truncate_list(items: &[String], max: usize) -> String {
    let shown = items.iter().take(max).cloned().collect::<Vec<_>>().join(", ");
    if items.len() > max {
        format!("{} (+{} more)", shown, items.len() - max)
    } else {
        shown
    }
}

/// Combines the analyses into a verdict.
#[derive(Debug, Clone)]
pub struct DecisionAggregator {
    human_score: u8,
    outlier_penalty: i32,
    max_listed_anomalies: usize,
}

impl Default for DecisionAggregator {
    fn default() -> Self {
        Self::new(&TrustConfig::default())
    }
}

impl DecisionAggregator {
    pub fn new(config: &TrustConfig) -> Self {
        Self {
            human_score: config.thresholds.human_score,
            outlier_penalty: config.behavior.outlier_penalty,
            max_listed_anomalies: config.aggregation.max_listed_anomalies,
        }
    }

    /// Fused score and reasons for one session.
    pub fn aggregate(&self, input: &AggregationInput<'_>) -> VerificationResult {
        let facts = input.facts();
        let mut sheet = ScoreSheet::new(BASE_SCORE);
        sheet.apply(DECISION_RULES, &facts);

        let fingerprint_delta = (input.fingerprint.score as i32 - 50) / 2;
        if fingerprint_delta != 0 {
            sheet.push(RuleHit::new(
                "fingerprint",
                fingerprint_delta,
                format!("fingerprint score {}", input.fingerprint.score),
            ));
        }

        let network_delta = (input.network.score as i32 - 50) / 2;
        if network_delta != 0 {
            sheet.push(RuleHit::new(
                "network",
                network_delta,
                format!("network score {}", input.network.score),
            ));
        }

        if self.outlier_penalty != 0 && input.behavior.is_some_and(|b| b.has_outliers()) {
            sheet.push(RuleHit::new(
                "behavior_outliers",
                -self.outlier_penalty.abs(),
                "outlier event transitions",
            ));
        }

        let score = clamp_score(sheet.raw_total());
        let reasons = sheet.hits().iter().map(|hit| self.explain(hit, input)).collect();

        VerificationResult {
            is_human: score >= self.human_score,
            score,
            reasons,
            details: VerificationDetails {
                automation: input.automation.clone(),
                behavior: input.behavior.cloned(),
                fingerprint: input.fingerprint.clone(),
                network: input.network.clone(),
            },
        }
    }

    /// Reason line for a fired signal, with the analyzer's anomalies appended
    /// where they explain it.
    fn explain(&self, hit: &RuleHit, input: &AggregationInput<'_>) -> String {
        let details = match hit.signal.as_str() {
            "automation_detected" if !input.automation.detected_tools.is_empty() => {
                &input.automation.detected_tools
            }
            "automation_detected" => &input.automation.anomalies,
            "behavior_not_human" => match input.behavior {
                Some(b) => &b.anomalies,
                None => return hit.message.clone(),
            },
            "fingerprint" if hit.delta < 0 => &input.fingerprint.anomalies,
            "network" if hit.delta < 0 => &input.network.anomalies,
            _ => return hit.message.clone(),
        };

        if details.is_empty() {
            hit.message.clone()
        } else {
            format!("{}: {}", hit.message, truncate_list(details, self.max_listed_anomalies))
        }
    }
}

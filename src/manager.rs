//! Session lifecycle manager.
//!
//! Owns the session store and decides when each analyzer runs:
//! - Automation, fingerprint and network analysis once, at creation
//! - Behavior analysis once, when the event log reaches the trigger size or
//!   lazily at evaluation
//! - Aggregation at evaluation, after which the verdict is cached
//!
//! All mutation of a session happens under its lock. The only suspension
//! point is the network lookup at creation, which runs before the session is
//! stored.

use crate::config::TrustConfig;
use crate::detectors::{
    AutomationDetector, BehaviorAnalyzer, DetectionContext, Detector, FingerprintAnalyzer,
    NetworkAnalyzer,
};
use crate::error::TrustError;
use crate::geo::{GeoLookup, StaticGeoLookup};
use crate::score::{truncate_list, AggregationInput, DecisionAggregator, VerificationDetails, VerificationResult};
use crate::session::{
    InMemorySessionStore, Session, SessionId, SessionStatus, SessionStore, StatusSnapshot,
};
use crate::telemetry::{Event, RequestMeta, TelemetrySnapshot};
use chrono::Utc;
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, info};

/// Result of opening a session.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CreateOutcome {
    pub session_id: SessionId,
    pub status: SessionStatus,
    pub reason: Option<String>,
}

/// Result of recording an event.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "outcome", rename_all = "snake_case")]
pub enum RecordOutcome {
    /// Event appended to a pending session
    Accepted { event_count: usize },
    /// The session already has a verdict; the event was dropped
    Closed {
        status: SessionStatus,
        reason: Option<String>,
    },
    /// The triggered behavior analysis rejected the session
    BehaviorRejected { reason: String, score: u8 },
}

/// Session lifecycle manager.
pub struct SessionManager {
    config: TrustConfig,
    store: Arc<dyn SessionStore>,
    automation: AutomationDetector,
    fingerprint: FingerprintAnalyzer,
    network: NetworkAnalyzer,
    behavior: BehaviorAnalyzer,
    aggregator: DecisionAggregator,
    ttl: chrono::Duration,
}

impl SessionManager {
    /// Create a manager with an in-memory store.
    pub fn new(config: TrustConfig) -> Result<Self, TrustError> {
        Self::with_store(config, Arc::new(InMemorySessionStore::new()))
    }

    /// Create a manager on top of an existing store.
    pub fn with_store(config: TrustConfig, store: Arc<dyn SessionStore>) -> Result<Self, TrustError> {
        let mut network = NetworkAnalyzer::new(&config.network)?;
        let countries = StaticGeoLookup::from_config(&config.network)?;
        if !countries.is_empty() {
            network = network.with_lookup(Arc::new(countries));
        }

        Ok(Self {
            ttl: config.session.ttl()?,
            automation: AutomationDetector::new(config.thresholds.automation_detected_score),
            fingerprint: FingerprintAnalyzer::new(),
            network,
            behavior: BehaviorAnalyzer::new(&config.behavior),
            aggregator: DecisionAggregator::new(&config),
            store,
            config,
        })
    }

    /// Replace the IP lookup used by network analysis.
    pub fn with_lookup(mut self, lookup: Arc<dyn GeoLookup>) -> Self {
        self.network = self.network.with_lookup(lookup);
        self
    }

    pub fn config(&self) -> &TrustConfig {
        &self.config
    }

    pub fn store(&self) -> &Arc<dyn SessionStore> {
        &self.store
    }

    /// Open a session: run the snapshot detectors and reject outright when the
    /// automation score is over the auto-reject threshold, or when the
    /// webdriver flag is backed by another automation signal.
    pub async fn create_session(&self, snapshot: TelemetrySnapshot, request: RequestMeta) -> CreateOutcome {
        let ctx = DetectionContext::new(snapshot, request);

        let automation = self.automation.analyze(&ctx).await;
        debug!(
            detector = self.automation.name(),
            score = automation.score,
            tools = ?automation.detected_tools,
            "Automation analysis complete"
        );

        let fingerprint = self.fingerprint.analyze(&ctx).await;
        debug!(
            detector = self.fingerprint.name(),
            score = fingerprint.score,
            fingerprint_id = %fingerprint.fingerprint_id,
            "Fingerprint analysis complete"
        );

        let network = self.network.analyze(&ctx).await;
        debug!(
            detector = self.network.name(),
            score = network.score,
            "Network analysis complete"
        );

        let DetectionContext { snapshot, request } = ctx;
        let mut session = Session::new(snapshot, request, automation, fingerprint, network);
        let session_id = session.id;

        let thresholds = &self.config.thresholds;
        let corroborated =
            thresholds.reject_corroborated_webdriver && session.automation.webdriver_corroborated();
        let over_threshold = session.automation.score > thresholds.auto_reject_automation_score;
        let rejection = (over_threshold || corroborated).then(|| {
            let cause = if session.automation.detected_tools.is_empty() {
                truncate_list(&session.automation.anomalies, self.config.aggregation.max_listed_anomalies)
            } else {
                session.automation.detected_tools.join(", ")
            };
            format!("automation detected: {}", cause)
        });

        if let Some(reason) = &rejection {
            let verdict = VerificationResult::rejected(
                reason.clone(),
                VerificationDetails {
                    automation: session.automation.clone(),
                    behavior: None,
                    fingerprint: session.fingerprint.clone(),
                    network: session.network.clone(),
                },
            );
            session.finalize(
                SessionStatus::Rejected,
                verdict,
                Some(reason.clone()),
                self.config.session.retained_events,
                Utc::now(),
            );
            info!(
                session_id = %session_id,
                score = session.automation.score,
                reason = %reason,
                "Session rejected at creation"
            );
        } else {
            info!(session_id = %session_id, "Session created");
        }

        let status = session.status;
        self.store.insert(session);

        CreateOutcome {
            session_id,
            status,
            reason: rejection,
        }
    }

    /// Append an event to a pending session.
    pub fn record_event(&self, id: &SessionId, event: Event) -> Result<RecordOutcome, TrustError> {
        let handle = self.store.get(id).ok_or(TrustError::SessionNotFound(*id))?;
        let mut session = handle.lock();

        if !session.push_event(event) {
            return Ok(RecordOutcome::Closed {
                status: session.status,
                reason: session.rejection_reason.clone(),
            });
        }

        let trigger = self.config.session.behavior_trigger_events;
        if session.behavior.is_some() || session.events.len() < trigger {
            return Ok(RecordOutcome::Accepted {
                event_count: session.events.len(),
            });
        }

        let analysis = self.behavior.analyze(&session.events);
        debug!(
            session_id = %id,
            detector = "behavior_analyzer",
            score = analysis.score,
            is_human = analysis.is_human,
            "Behavior analysis triggered"
        );

        let reject = !analysis.is_human && analysis.score < self.config.thresholds.behavior_reject_score;
        let score = analysis.score;
        let reason = if analysis.anomalies.is_empty() {
            format!("behavior analysis failed (score {})", score)
        } else {
            format!(
                "behavior analysis failed (score {}): {}",
                score,
                truncate_list(&analysis.anomalies, self.config.aggregation.max_listed_anomalies)
            )
        };
        session.behavior = Some(analysis);

        if !reject {
            return Ok(RecordOutcome::Accepted {
                event_count: session.events.len(),
            });
        }

        let verdict = VerificationResult::rejected(
            reason.clone(),
            VerificationDetails {
                automation: session.automation.clone(),
                behavior: session.behavior.clone(),
                fingerprint: session.fingerprint.clone(),
                network: session.network.clone(),
            },
        );
        session.finalize(
            SessionStatus::Rejected,
            verdict,
            Some(reason.clone()),
            self.config.session.retained_events,
            Utc::now(),
        );
        info!(session_id = %id, score, reason = %reason, "Session rejected by behavior analysis");

        Ok(RecordOutcome::BehaviorRejected { reason, score })
    }

    /// Produce the session's verdict. Terminal sessions return their cached
    /// verdict unchanged.
    pub fn evaluate(&self, id: &SessionId) -> Result<VerificationResult, TrustError> {
        let handle = self.store.get(id).ok_or(TrustError::SessionNotFound(*id))?;
        let mut session = handle.lock();

        if let Some(verdict) = &session.verdict {
            return Ok(verdict.clone());
        }

        if session.behavior.is_none() && !session.events.is_empty() {
            let analysis = self.behavior.analyze(&session.events);
            debug!(
                session_id = %id,
                detector = "behavior_analyzer",
                score = analysis.score,
                "Behavior analysis at evaluation"
            );
            session.behavior = Some(analysis);
        }

        let now = Utc::now();
        let verdict = {
            let s = &*session;
            self.aggregator.aggregate(&AggregationInput {
                automation: &s.automation,
                behavior: s.behavior.as_ref(),
                fingerprint: &s.fingerprint,
                network: &s.network,
                snapshot: &s.snapshot,
                request: &s.request,
                events: &s.events,
                session_age_ms: s.age_ms(now),
            })
        };

        let (status, rejection_reason) = if verdict.is_human {
            (SessionStatus::Verified, None)
        } else {
            (
                SessionStatus::Rejected,
                Some(format!(
                    "trust score {} below {}",
                    verdict.score, self.config.thresholds.human_score
                )),
            )
        };

        session.finalize(
            status,
            verdict.clone(),
            rejection_reason,
            self.config.session.retained_events,
            now,
        );
        info!(
            session_id = %id,
            score = verdict.score,
            status = %status,
            "Session evaluated"
        );

        Ok(verdict)
    }

    pub fn get_status(&self, id: &SessionId) -> Result<StatusSnapshot, TrustError> {
        let handle = self.store.get(id).ok_or(TrustError::SessionNotFound(*id))?;
        let session = handle.lock();
        Ok(session.status_snapshot())
    }

    /// Remove sessions older than the TTL. Returns the number removed.
    pub fn sweep(&self) -> usize {
        let removed = self.store.sweep(Utc::now(), self.ttl);
        if removed > 0 {
            info!(removed, remaining = self.store.len(), "Swept expired sessions");
        }
        removed
    }

    /// Sweep on a fixed interval until the task is dropped.
    pub async fn sweep_loop(self: Arc<Self>) {
        let interval = Duration::from_secs(self.config.session.sweep_interval_seconds.max(1));
        loop {
            tokio::time::sleep(interval).await;
            self.sweep();
        }
    }

    /// Drop every session and cached lookup.
    pub fn shutdown(&self) {
        let count = self.store.len();
        let cached = self.network.cached_lookups();
        self.store.clear();
        self.network.clear_cache();
        info!(sessions = count, cached_lookups = cached, "Session store cleared");
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::telemetry::ScreenResolution;

    fn manager() -> SessionManager {
        SessionManager::new(TrustConfig::default()).unwrap()
    }

    fn plain_snapshot() -> TelemetrySnapshot {
        let mut s = TelemetrySnapshot::default();
        s.device.screen_resolution = Some(ScreenResolution::new(1440, 900));
        s.device.timezone = Some("Europe/Paris".into());
        s.automation.plugins = Some(vec!["PDF Viewer".into()]);
        s.automation.languages = Some(vec!["fr-FR".into()]);
        s
    }

    #[tokio::test]
    async fn test_create_pending() {
        let m = manager();
        let outcome = m.create_session(plain_snapshot(), RequestMeta::default()).await;
        assert_eq!(outcome.status, SessionStatus::Pending);
        assert!(outcome.reason.is_none());

        let status = m.get_status(&outcome.session_id).unwrap();
        assert_eq!(status.status, SessionStatus::Pending);
        assert_eq!(status.event_count, 0);
        assert!(status.verified_at.is_none());
    }

    #[tokio::test]
    async fn test_unknown_session() {
        let m = manager();
        let id = SessionId::new();
        assert!(matches!(m.get_status(&id), Err(TrustError::SessionNotFound(_))));
        assert!(matches!(m.evaluate(&id), Err(TrustError::SessionNotFound(_))));
        assert!(matches!(
            m.record_event(&id, Event::key_press(0)),
            Err(TrustError::SessionNotFound(_))
        ));
    }

    #[tokio::test]
    async fn test_record_accepts_until_trigger() {
        let m = manager();
        let id = m.create_session(plain_snapshot(), RequestMeta::default()).await.session_id;
        for i in 0..9 {
            let outcome = m.record_event(&id, Event::key_press(i * 150)).unwrap();
            assert_eq!(outcome, RecordOutcome::Accepted { event_count: i as usize + 1 });
        }
        assert!(m.store().get(&id).unwrap().lock().behavior.is_none());
    }

    #[tokio::test]
    async fn test_trigger_rejects_robotic_behavior() {
        let m = manager();
        let id = m.create_session(plain_snapshot(), RequestMeta::default()).await.session_id;
        let mut last = None;
        for i in 0..10u64 {
            last = Some(m.record_event(&id, Event::pointer_move(i as f64 * 10.0, 0.0, i * 100)).unwrap());
        }
        assert!(matches!(last, Some(RecordOutcome::BehaviorRejected { score: 0, .. })));

        let closed = m.record_event(&id, Event::key_press(5000)).unwrap();
        assert!(matches!(closed, RecordOutcome::Closed { status: SessionStatus::Rejected, reason: Some(_) }));

        let verdict = m.evaluate(&id).unwrap();
        assert!(!verdict.is_human);
        assert_eq!(verdict.score, 0);
        assert!(verdict.details.behavior.is_some());
    }

    #[tokio::test]
    async fn test_evaluate_is_idempotent() {
        let m = manager();
        let id = m.create_session(plain_snapshot(), RequestMeta::default()).await.session_id;
        let first = m.evaluate(&id).unwrap();
        let second = m.evaluate(&id).unwrap();
        assert_eq!(
            serde_json::to_string(&first).unwrap(),
            serde_json::to_string(&second).unwrap()
        );
        assert!(m.get_status(&id).unwrap().status.is_terminal());
    }

    #[tokio::test]
    async fn test_sweep_and_shutdown() {
        let m = manager();
        let old = m.create_session(plain_snapshot(), RequestMeta::default()).await.session_id;
        let fresh = m.create_session(plain_snapshot(), RequestMeta::default()).await.session_id;
        m.store().get(&old).unwrap().lock().created_at -= chrono::Duration::hours(25);

        assert_eq!(m.sweep(), 1);
        assert!(m.get_status(&old).is_err());
        assert!(m.get_status(&fresh).is_ok());

        m.shutdown();
        assert!(m.store().is_empty());
    }

    #[tokio::test]
    async fn test_invalid_network_config() {
        let mut config = TrustConfig::default();
        config.network.vpn_ranges = vec!["nonsense".into()];
        assert!(matches!(SessionManager::new(config), Err(TrustError::Config(_))));
    }

    #[tokio::test]
    async fn test_out_of_range_ttl() {
        let mut config = TrustConfig::default();
        config.session.ttl_seconds = u64::MAX;
        assert!(matches!(SessionManager::new(config), Err(TrustError::Config(_))));
    }
}

//! Session records and the session store.
//!
//! A session is shared as `Arc<Mutex<Session>>`: the store only hands out
//! handles, and every mutation happens under the session's own lock. Callers
//! must not touch the store while holding a session lock.

use crate::detectors::{AutomationAnalysis, BehaviorAnalysis, FingerprintAnalysis, NetworkAnalysis};
use crate::score::VerificationResult;
use crate::telemetry::{Event, RequestMeta, TelemetrySnapshot};
use chrono::{DateTime, Duration, Utc};
use dashmap::DashMap;
use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;
use std::sync::Arc;
use uuid::Uuid;

/// Session identifier (UUID v4).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct SessionId(Uuid);

impl SessionId {
    pub fn new() -> Self {
        Self(Uuid::new_v4())
    }
}

impl Default for SessionId {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Display for SessionId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        self.0.fmt(f)
    }
}

impl FromStr for SessionId {
    type Err = uuid::Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Uuid::parse_str(s).map(Self)
    }
}

/// Verification status. `Pending` is the only non-terminal state.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SessionStatus {
    #[default]
    Pending,
    Verified,
    Rejected,
}

impl SessionStatus {
    pub fn is_terminal(&self) -> bool {
        !matches!(self, SessionStatus::Pending)
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            SessionStatus::Pending => "pending",
            SessionStatus::Verified => "verified",
            SessionStatus::Rejected => "rejected",
        }
    }
}

impl fmt::Display for SessionStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// One verification session.
#[derive(Debug, Clone)]
pub struct Session {
    pub id: SessionId,
    pub created_at: DateTime<Utc>,
    pub status: SessionStatus,
    pub snapshot: TelemetrySnapshot,
    pub request: RequestMeta,
    /// Events in arrival order
    pub events: Vec<Event>,
    /// Events accepted over the session's lifetime
    pub total_events: usize,
    pub automation: AutomationAnalysis,
    pub fingerprint: FingerprintAnalysis,
    pub network: NetworkAnalysis,
    /// Computed once, when triggered or at evaluation
    pub behavior: Option<BehaviorAnalysis>,
    pub score: Option<u8>,
    pub reasons: Vec<String>,
    pub rejection_reason: Option<String>,
    pub verified_at: Option<DateTime<Utc>>,
    pub verdict: Option<VerificationResult>,
}

impl Session {
    pub fn new(
        snapshot: TelemetrySnapshot,
        request: RequestMeta,
        automation: AutomationAnalysis,
        fingerprint: FingerprintAnalysis,
        network: NetworkAnalysis,
    ) -> Self {
        Self {
            id: SessionId::new(),
            created_at: Utc::now(),
            status: SessionStatus::Pending,
            snapshot,
            request,
            events: Vec::new(),
            total_events: 0,
            automation,
            fingerprint,
            network,
            behavior: None,
            score: None,
            reasons: Vec::new(),
            rejection_reason: None,
            verified_at: None,
            verdict: None,
        }
    }

    /// Milliseconds since creation, zero if the clock went backwards.
    pub fn age_ms(&self, now: DateTime<Utc>) -> u64 {
        (now - self.created_at).num_milliseconds().max(0) as u64
    }

    /// Append an event. Returns false for terminal sessions.
    pub fn push_event(&mut self, event: Event) -> bool {
        if self.status.is_terminal() {
            return false;
        }
        self.events.push(event);
        self.total_events += 1;
        true
    }

    /// Move to a terminal status and cache the verdict, then cut the event
    /// log down to `retained` entries. No-op on terminal sessions.
    pub fn finalize(
        &mut self,
        status: SessionStatus,
        verdict: VerificationResult,
        rejection_reason: Option<String>,
        retained: usize,
        now: DateTime<Utc>,
    ) -> bool {
        if self.status.is_terminal() || !status.is_terminal() {
            return false;
        }
        self.status = status;
        self.score = Some(verdict.score);
        self.reasons = verdict.reasons.clone();
        self.rejection_reason = rejection_reason;
        self.verified_at = Some(now);
        self.verdict = Some(verdict);
        self.events.truncate(retained);
        true
    }

    pub fn status_snapshot(&self) -> StatusSnapshot {
        StatusSnapshot {
            status: self.status,
            created_at: self.created_at,
            verified_at: self.verified_at,
            event_count: self.total_events,
            rejection_reason: self.rejection_reason.clone(),
            automation_detected: self.automation.is_automated,
            detected_tools: self.automation.detected_tools.clone(),
        }
    }
}

/// Read-only view of a session for status queries.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct StatusSnapshot {
    pub status: SessionStatus,
    pub created_at: DateTime<Utc>,
    pub verified_at: Option<DateTime<Utc>>,
    pub event_count: usize,
    pub rejection_reason: Option<String>,
    pub automation_detected: bool,
    pub detected_tools: Vec<String>,
}

pub type SessionHandle = Arc<Mutex<Session>>;

/// Storage for live sessions.
pub trait SessionStore: Send + Sync {
    fn insert(&self, session: Session) -> SessionHandle;

    fn get(&self, id: &SessionId) -> Option<SessionHandle>;

    fn remove(&self, id: &SessionId) -> Option<SessionHandle>;

    /// Remove sessions created more than `ttl` before `now`. Returns the
    /// number removed.
    fn sweep(&self, now: DateTime<Utc>, ttl: Duration) -> usize;

    fn len(&self) -> usize;

    fn is_empty(&self) -> bool {
        self.len() == 0
    }

    fn clear(&self);
}

/// Process-local session store.
#[derive(Debug, Default)]
pub struct InMemorySessionStore {
    sessions: DashMap<SessionId, SessionHandle>,
}

impl InMemorySessionStore {
    pub fn new() -> Self {
        Self::default()
    }
}

impl SessionStore for InMemorySessionStore {
    fn insert(&self, session: Session) -> SessionHandle {
        let id = session.id;
        let handle = Arc::new(Mutex::new(session));
        self.sessions.insert(id, handle.clone());
        handle
    }

    fn get(&self, id: &SessionId) -> Option<SessionHandle> {
        self.sessions.get(id).map(|entry| entry.value().clone())
    }

    fn remove(&self, id: &SessionId) -> Option<SessionHandle> {
        self.sessions.remove(id).map(|(_, handle)| handle)
    }

    fn sweep(&self, now: DateTime<Utc>, ttl: Duration) -> usize {
        // a TTL reaching past the calendar's start expires nothing
        let Some(cutoff) = now.checked_sub_signed(ttl) else {
            return 0;
        };

        // collect first: removal needs the shard write locks iteration holds
        let expired: Vec<SessionId> = self
            .sessions
            .iter()
            .filter(|entry| entry.value().lock().created_at <= cutoff)
            .map(|entry| *entry.key())
            .collect();

        expired.iter().filter(|id| self.remove(id).is_some()).count()
    }

    fn len(&self) -> usize {
        self.sessions.len()
    }

    fn clear(&self) {
        self.sessions.clear();
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn session() -> Session {
        Session::new(
            TelemetrySnapshot::default(),
            RequestMeta::default(),
            AutomationAnalysis::default(),
            FingerprintAnalysis::default(),
            NetworkAnalysis::default(),
        )
    }

    #[test]
    fn test_session_id_roundtrip() {
        let id = SessionId::new();
        let parsed: SessionId = id.to_string().parse().unwrap();
        assert_eq!(id, parsed);
        assert!("not-a-uuid".parse::<SessionId>().is_err());
    }

    #[test]
    fn test_status_serialization() {
        assert_eq!(serde_json::to_string(&SessionStatus::Verified).unwrap(), "\"verified\"");
        assert!(!SessionStatus::Pending.is_terminal());
        assert!(SessionStatus::Rejected.is_terminal());
    }

    #[test]
    fn test_finalize_is_one_way() {
        let mut s = session();
        for i in 0..60 {
            assert!(s.push_event(Event::key_press(i)));
        }
        assert_eq!(s.events.len(), 60);

        let verdict = VerificationResult {
            is_human: true,
            score: 80,
            ..Default::default()
        };
        assert!(s.finalize(SessionStatus::Verified, verdict, None, 50, Utc::now()));
        assert_eq!(s.events.len(), 50);
        assert_eq!(s.events[0].timestamp, 0);
        assert_eq!(s.total_events, 60);

        let rejected = VerificationResult::rejected("late", Default::default());
        assert!(!s.finalize(SessionStatus::Rejected, rejected, None, 50, Utc::now()));
        assert_eq!(s.status, SessionStatus::Verified);
        assert_eq!(s.score, Some(80));
        assert!(!s.push_event(Event::key_press(99)));
    }

    #[test]
    fn test_finalize_rejects_pending_target() {
        let mut s = session();
        assert!(!s.finalize(SessionStatus::Pending, Default::default(), None, 50, Utc::now()));
        assert_eq!(s.status, SessionStatus::Pending);
    }

    #[test]
    fn test_store_sweep() {
        let store = InMemorySessionStore::new();
        let fresh = store.insert(session());
        let stale = store.insert(session());
        stale.lock().created_at = Utc::now() - Duration::hours(25);

        let removed = store.sweep(Utc::now(), Duration::hours(24));
        assert_eq!(removed, 1);
        assert_eq!(store.len(), 1);
        let fresh_id = fresh.lock().id;
        assert!(store.get(&fresh_id).is_some());
    }

    #[test]
    fn test_store_sweep_with_huge_ttl() {
        let store = InMemorySessionStore::new();
        store.insert(session()).lock().created_at = Utc::now() - Duration::days(365);

        let ttl = Duration::try_seconds(i64::MAX / 1000).unwrap();
        assert_eq!(store.sweep(Utc::now(), ttl), 0);
        assert_eq!(store.len(), 1);
    }

    #[test]
    fn test_store_remove_and_clear() {
        let store = InMemorySessionStore::new();
        let id = store.insert(session()).lock().id;
        store.insert(session());
        assert!(store.remove(&id).is_some());
        assert!(store.get(&id).is_none());
        store.clear();
        assert!(store.is_empty());
    }
}

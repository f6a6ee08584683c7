//! Session trust detectors.
//!
//! Three detectors score the telemetry snapshot when a session is created
//! ([`AutomationDetector`], [`FingerprintAnalyzer`], [`NetworkAnalyzer`]);
//! the [`BehaviorAnalyzer`] scores the event log later. Every detector returns
//! a record with a 0-100 score even when its input is sparse.

pub mod automation;
pub mod behavior;
pub mod clustering;
pub mod fingerprint;
pub mod headers;
pub mod network;
pub mod user_agent;

pub use automation::{AutomationAnalysis, AutomationDetector};
pub use behavior::{BehaviorAnalysis, BehaviorAnalyzer};
pub use fingerprint::{FingerprintAnalysis, FingerprintAnalyzer};
pub use network::{NetworkAnalysis, NetworkAnalyzer};
pub use user_agent::UserAgentParser;

use crate::telemetry::{RequestMeta, TelemetrySnapshot};
use async_trait::async_trait;

/// Context for snapshot detectors: the client telemetry and the request that
/// carried it.
#[derive(Debug, Clone, Default)]
pub struct DetectionContext {
    pub snapshot: TelemetrySnapshot,
    pub request: RequestMeta,
}

impl DetectionContext {
    pub fn new(snapshot: TelemetrySnapshot, request: RequestMeta) -> Self {
        Self { snapshot, request }
    }
}

/// Trait for snapshot detectors.
#[async_trait]
pub trait Detector: Send + Sync {
    type Output: Send;

    /// Analyze the snapshot and return the detector's record.
    async fn analyze(&self, ctx: &DetectionContext) -> Self::Output;

    /// Get the detector name.
    fn name(&self) -> &'static str;
}

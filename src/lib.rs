//! Session Trust Agent for Zentinel
//!
//! Invisible bot detection: each web session collects a telemetry snapshot
//! and a stream of interaction events, and ends with a human/bot verdict and
//! a 0-100 trust score.
//!
//! # Features
//!
//! - Automation signature detection (webdriver, headless, UA/telemetry drift)
//! - Fingerprint consistency checks and a stable identity hash
//! - Network reputation (datacenter/VPN ranges, geo/locale drift, proxies)
//! - Behavior analysis of pointer, click and keystroke streams
//! - One-way session lifecycle with cached verdicts and TTL sweeping
//!
//! # Example
//!
//! ```ignore
//! use zentinel_agent_session_trust::{Event, RequestMeta, SessionManager, TrustConfig};
//!
//! let manager = SessionManager::new(TrustConfig::default())?;
//! let created = manager.create_session(snapshot, RequestMeta::default()).await;
//! manager.record_event(&created.session_id, Event::pointer_move(10.0, 20.0, 0))?;
//! let verdict = manager.evaluate(&created.session_id)?;
//! ```

pub mod cache;
pub mod config;
pub mod detectors;
pub mod error;
pub mod geo;
pub mod manager;
pub mod rules;
pub mod score;
pub mod session;
pub mod telemetry;

pub use config::TrustConfig;
pub use error::{LookupError, TrustError};
pub use geo::{GeoInfo, GeoLookup, StaticGeoLookup};
pub use manager::{CreateOutcome, RecordOutcome, SessionManager};
pub use score::{VerificationDetails, VerificationResult};
pub use session::{SessionId, SessionStatus, SessionStore, StatusSnapshot};
pub use telemetry::{Event, EventKind, RequestMeta, TelemetrySnapshot};

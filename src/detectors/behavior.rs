//! Interaction behavior analysis.
//!
//! Scores an ordered event log on four sub-checks, each adding a fixed delta
//! only when the behavior looks natural:
//! - Pointer trajectory: speed spread, acceleration sign changes, direction
//!   changes and straightness of the point cloud (PCA)
//! - Click cadence and whether clicks follow pointer movement
//! - Inter-event timing variability
//! - Keystroke cadence (only when key presses exist)
//!
//! The transition outlier check from [`super::clustering`] runs alongside and
//! is reported on the record without changing the score.

use super::clustering::{self, OutlierReport};
use crate::config::BehaviorConfig;
use crate::rules::{Rule, RuleHit, ScoreSheet};
use crate::telemetry::{Event, EventKind};
use serde::{Deserialize, Serialize};
use tracing::debug;

/// Speed standard deviation (px/s) above which movement is varied.
const MIN_SPEED_STD_DEV: f64 = 50.0;
const MIN_ACCELERATION_SIGN_CHANGES: usize = 2;
const MIN_DIRECTION_CHANGES: usize = 3;
/// Cosine between consecutive displacements below which the direction changed.
const DIRECTION_CHANGE_COSINE: f64 = 0.9;
/// Explained variance ratio of the first principal component at or above
/// which the path is a straight line.
const MAX_STRAIGHTNESS: f64 = 0.98;

const MIN_CLICK_INTERVAL_MS: f64 = 500.0;
const CLICK_MOVE_WINDOW_MS: u64 = 1000;
const MIN_CLICKS_AFTER_MOVE: f64 = 0.7;

const MIN_TIMING_CV: f64 = 0.2;
/// Timing CV below this is suspiciously regular.
pub const REGULAR_TIMING_CV: f64 = 0.1;

const MIN_KEY_INTERVAL_MS: f64 = 100.0;
const MIN_KEY_STD_DEV_MS: f64 = 50.0;
const FAST_KEY_INTERVAL_MS: f64 = 50.0;

/// Total at or above which behavior is human.
const HUMAN_SCORE: u8 = 50;

fn mean(values: &[f64]) -> f64 {
    if values.is_empty() {
        return 0.0;
    }
    values.iter().sum::<f64>() / values.len() as f64
}

fn std_dev(values: &[f64]) -> f64 {
    if values.is_empty() {
        return 0.0;
    }
    let m = mean(values);
    (values.iter().map(|v| (v - m).powi(2)).sum::<f64>() / values.len() as f64).sqrt()
}

fn intervals(timestamps: impl Iterator<Item = u64>) -> Vec<f64> {
    let ts: Vec<u64> = timestamps.collect();
    ts.windows(2)
        .map(|w| w[1].saturating_sub(w[0]) as f64)
        .collect()
}

/// Coefficient of variation of inter-arrival intervals across all events.
/// `None` with fewer than two intervals.
pub fn timing_cv(events: &[Event]) -> Option<f64> {
    let gaps = intervals(events.iter().map(|e| e.timestamp));
    if gaps.len() < 2 {
        return None;
    }
    let m = mean(&gaps);
    if m <= 0.0 {
        return Some(0.0);
    }
    Some(std_dev(&gaps) / m)
}

/// True if any click has no pointer move anywhere before it in the log.
pub fn click_without_movement(events: &[Event]) -> bool {
    let mut moved = false;
    for event in events {
        match event.kind {
            EventKind::PointerMove => moved = true,
            EventKind::Click if !moved => return true,
            _ => {}
        }
    }
    false
}

/// Measurements taken from the event log.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct BehaviorMetrics {
    pub total_events: usize,
    pub pointer_moves: usize,
    pub clicks: usize,
    pub key_presses: usize,
    /// Standard deviation of pointer speed in px/s
    pub speed_std_dev: Option<f64>,
    pub acceleration_sign_changes: usize,
    pub direction_changes: usize,
    /// Explained variance ratio of the first principal component
    pub straightness: Option<f64>,
    pub mean_click_interval_ms: Option<f64>,
    /// Share of clicks preceded by a pointer move within the window
    pub clicks_after_move: Option<f64>,
    pub timing_cv: Option<f64>,
    pub mean_key_interval_ms: Option<f64>,
    pub key_interval_std_dev_ms: Option<f64>,
}

/// Which sub-checks judged the behavior natural.
#[derive(Debug, Clone, Copy, Default)]
pub struct BehaviorFacts {
    pub trajectory_natural: bool,
    pub clicks_natural: bool,
    pub timing_natural: bool,
    pub keystrokes_natural: bool,
}

pub static BEHAVIOR_RULES: &[Rule<BehaviorFacts>] = &[
    Rule {
        signal: "natural_trajectory",
        delta: 30,
        predicate: |f| f.trajectory_natural,
        message: "pointer trajectory looks natural",
    },
    Rule {
        signal: "natural_clicks",
        delta: 25,
        predicate: |f| f.clicks_natural,
        message: "click cadence looks natural",
    },
    Rule {
        signal: "natural_timing",
        delta: 25,
        predicate: |f| f.timing_natural,
        message: "event timing varies naturally",
    },
    Rule {
        signal: "natural_keystrokes",
        delta: 20,
        predicate: |f| f.keystrokes_natural,
        message: "keystroke cadence looks natural",
    },
];

/// Behavior analyzer output.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct BehaviorAnalysis {
    pub score: u8,
    pub is_human: bool,
    pub insufficient_data: bool,
    pub metrics: BehaviorMetrics,
    pub anomalies: Vec<String>,
    pub signals: Vec<RuleHit>,
    /// Transition outlier check, when there were enough transitions
    pub outliers: Option<OutlierReport>,
}

impl BehaviorAnalysis {
    pub fn has_outliers(&self) -> bool {
        self.outliers.as_ref().is_some_and(|o| o.is_outlier)
    }
}

/// Behavior analyzer.
#[derive(Debug, Clone)]
pub struct BehaviorAnalyzer {
    min_pointer_moves: usize,
    outlier_clusters: usize,
    outlier_min_share: f64,
}

impl Default for BehaviorAnalyzer {
    fn default() -> Self {
        Self::new(&BehaviorConfig::default())
    }
}

impl BehaviorAnalyzer {
    pub fn new(config: &BehaviorConfig) -> Self {
        Self {
            min_pointer_moves: config.min_pointer_moves,
            outlier_clusters: config.outlier_clusters,
            outlier_min_share: config.outlier_min_share,
        }
    }

    /// Analyze an event log in arrival order.
    pub fn analyze(&self, events: &[Event]) -> BehaviorAnalysis {
        let mut metrics = BehaviorMetrics {
            total_events: events.len(),
            pointer_moves: count(events, EventKind::PointerMove),
            clicks: count(events, EventKind::Click),
            key_presses: count(events, EventKind::KeyPress),
            timing_cv: timing_cv(events),
            ..Default::default()
        };
        let outliers = clustering::detect_outliers(events, self.outlier_clusters, self.outlier_min_share);

        if metrics.pointer_moves < self.min_pointer_moves {
            debug!(
                pointer_moves = metrics.pointer_moves,
                required = self.min_pointer_moves,
                "Not enough pointer movement for behavior analysis"
            );
            let reason = format!(
                "only {} pointer moves (need {})",
                metrics.pointer_moves, self.min_pointer_moves
            );
            return BehaviorAnalysis {
                score: 0,
                is_human: false,
                insufficient_data: true,
                metrics,
                anomalies: vec![reason],
                signals: vec![],
                outliers,
            };
        }

        let mut anomalies = Vec::new();
        let facts = BehaviorFacts {
            trajectory_natural: trajectory(events, &mut metrics, &mut anomalies),
            clicks_natural: clicks(events, &mut metrics, &mut anomalies),
            timing_natural: timing(&metrics, &mut anomalies),
            keystrokes_natural: keystrokes(events, &mut metrics, &mut anomalies),
        };

        if outliers.as_ref().is_some_and(|o| o.is_outlier) {
            anomalies.push("outlier event transitions".to_string());
        }

        let mut sheet = ScoreSheet::new(0);
        sheet.apply(BEHAVIOR_RULES, &facts);
        let score = sheet.score();

        BehaviorAnalysis {
            score,
            is_human: score >= HUMAN_SCORE,
            insufficient_data: false,
            metrics,
            anomalies,
            signals: sheet.into_hits(),
            outliers,
        }
    }
}

fn count(events: &[Event], kind: EventKind) -> usize {
    events.iter().filter(|e| e.is(&kind)).count()
}

/// Principal-component explained variance ratio of a point cloud. A
/// degenerate cloud (all points equal) counts as a straight line.
pub fn straightness(points: &[(f64, f64)]) -> f64 {
    if points.len() < 2 {
        return 1.0;
    }
    let n = points.len() as f64;
    let mx = points.iter().map(|p| p.0).sum::<f64>() / n;
    let my = points.iter().map(|p| p.1).sum::<f64>() / n;

    let (mut sxx, mut syy, mut sxy) = (0.0, 0.0, 0.0);
    for (x, y) in points {
        sxx += (x - mx).powi(2);
        syy += (y - my).powi(2);
        sxy += (x - mx) * (y - my);
    }
    sxx /= n;
    syy /= n;
    sxy /= n;

    let trace = sxx + syy;
    if trace <= f64::EPSILON {
        return 1.0;
    }
    let spread = ((sxx - syy).powi(2) + 4.0 * sxy * sxy).sqrt();
    let largest = (trace + spread) / 2.0;
    largest / trace
}

fn trajectory(events: &[Event], metrics: &mut BehaviorMetrics, anomalies: &mut Vec<String>) -> bool {
    let samples: Vec<((f64, f64), u64)> = events
        .iter()
        .filter(|e| e.is(&EventKind::PointerMove))
        .filter_map(|e| e.point().map(|p| (p, e.timestamp)))
        .collect();

    // (speed px/s, dt ms, displacement)
    let mut speeds = Vec::new();
    let mut speed_dts = Vec::new();
    let mut displacements = Vec::new();
    for pair in samples.windows(2) {
        let ((x1, y1), t1) = pair[0];
        let ((x2, y2), t2) = pair[1];
        let (dx, dy) = (x2 - x1, y2 - y1);
        displacements.push((dx, dy));

        let dt = t2.saturating_sub(t1);
        if dt == 0 {
            continue;
        }
        let dist = (dx * dx + dy * dy).sqrt();
        speeds.push(dist / (dt as f64 / 1000.0));
        speed_dts.push(dt as f64);
    }

    let speed_spread = std_dev(&speeds);

    let accelerations: Vec<f64> = speeds
        .windows(2)
        .zip(speed_dts.iter().skip(1))
        .map(|(v, dt)| (v[1] - v[0]) / dt)
        .collect();
    let mut sign_changes = 0;
    let mut last_sign = 0.0;
    for a in accelerations.iter().filter(|a| a.abs() > f64::EPSILON) {
        let sign = a.signum();
        if last_sign != 0.0 && sign != last_sign {
            sign_changes += 1;
        }
        last_sign = sign;
    }

    let mut direction_changes = 0;
    for pair in displacements.windows(2) {
        let (ax, ay) = pair[0];
        let (bx, by) = pair[1];
        let norms = (ax * ax + ay * ay).sqrt() * (bx * bx + by * by).sqrt();
        if norms <= f64::EPSILON {
            continue;
        }
        if (ax * bx + ay * by) / norms < DIRECTION_CHANGE_COSINE {
            direction_changes += 1;
        }
    }

    let points: Vec<(f64, f64)> = samples.iter().map(|(p, _)| *p).collect();
    let ratio = straightness(&points);

    metrics.speed_std_dev = Some(speed_spread);
    metrics.acceleration_sign_changes = sign_changes;
    metrics.direction_changes = direction_changes;
    metrics.straightness = Some(ratio);

    if ratio >= MAX_STRAIGHTNESS {
        anomalies.push("pointer path is a straight line".to_string());
    }
    if speed_spread <= MIN_SPEED_STD_DEV {
        anomalies.push("pointer speed is nearly constant".to_string());
    }

    speed_spread > MIN_SPEED_STD_DEV
        && sign_changes >= MIN_ACCELERATION_SIGN_CHANGES
        && direction_changes >= MIN_DIRECTION_CHANGES
        && ratio < MAX_STRAIGHTNESS
}

fn clicks(events: &[Event], metrics: &mut BehaviorMetrics, anomalies: &mut Vec<String>) -> bool {
    let click_positions: Vec<usize> = events
        .iter()
        .enumerate()
        .filter(|(_, e)| e.is(&EventKind::Click))
        .map(|(i, _)| i)
        .collect();
    if click_positions.is_empty() {
        return false;
    }

    let gaps = intervals(click_positions.iter().map(|&i| events[i].timestamp));
    let interval_ok = if gaps.is_empty() {
        true
    } else {
        let m = mean(&gaps);
        metrics.mean_click_interval_ms = Some(m);
        if m <= MIN_CLICK_INTERVAL_MS {
            anomalies.push(format!("rapid clicking ({:.0} ms apart)", m));
        }
        m > MIN_CLICK_INTERVAL_MS
    };

    let after_move = click_positions
        .iter()
        .filter(|&&i| {
            let click_at = events[i].timestamp;
            events[..i].iter().rev().any(|e| {
                e.is(&EventKind::PointerMove)
                    && e.timestamp <= click_at
                    && click_at - e.timestamp <= CLICK_MOVE_WINDOW_MS
            })
        })
        .count();
    let share = after_move as f64 / click_positions.len() as f64;
    metrics.clicks_after_move = Some(share);
    if share < MIN_CLICKS_AFTER_MOVE {
        anomalies.push("clicks without preceding pointer movement".to_string());
    }

    interval_ok && share >= MIN_CLICKS_AFTER_MOVE
}

fn timing(metrics: &BehaviorMetrics, anomalies: &mut Vec<String>) -> bool {
    let Some(cv) = metrics.timing_cv else {
        return false;
    };
    if cv < REGULAR_TIMING_CV {
        anomalies.push(format!("suspiciously regular timing (cv {:.3})", cv));
    }
    cv > MIN_TIMING_CV
}

fn keystrokes(events: &[Event], metrics: &mut BehaviorMetrics, anomalies: &mut Vec<String>) -> bool {
    let gaps = intervals(
        events
            .iter()
            .filter(|e| e.is(&EventKind::KeyPress))
            .map(|e| e.timestamp),
    );
    if gaps.is_empty() {
        return false;
    }

    let m = mean(&gaps);
    let spread = std_dev(&gaps);
    metrics.mean_key_interval_ms = Some(m);
    metrics.key_interval_std_dev_ms = Some(spread);

    if m < FAST_KEY_INTERVAL_MS {
        anomalies.push(format!("suspiciously fast typing ({:.0} ms per key)", m));
    }
    m > MIN_KEY_INTERVAL_MS && spread > MIN_KEY_STD_DEV_MS
}

#[cfg(test)]
mod tests {
    use super::*;

    /// A wandering pointer path with irregular timing, a few clicks after
    /// movement and some typing.
    fn human_events() -> Vec<Event> {
        let path = [
            (100.0, 100.0, 0),
            (130.0, 112.0, 40),
            (190.0, 150.0, 75),
            (220.0, 230.0, 160),
            (215.0, 260.0, 230),
            (160.0, 300.0, 290),
            (150.0, 305.0, 410),
            (170.0, 290.0, 460),
            (260.0, 280.0, 520),
            (300.0, 200.0, 700),
            (310.0, 190.0, 760),
            (330.0, 240.0, 800),
        ];
        let mut events: Vec<Event> = path.iter().map(|&(x, y, t)| Event::pointer_move(x, y, t)).collect();
        events.push(Event::click(330.0, 240.0, 1200));
        events.push(Event::pointer_move(420.0, 260.0, 1900));
        events.push(Event::click(420.0, 260.0, 2300));
        for t in [3000, 3180, 3290, 3520, 3610, 3900] {
            events.push(Event::key_press(t));
        }
        events
    }

    #[test]
    fn test_insufficient_pointer_moves() {
        let events: Vec<Event> = (0..4).map(|i| Event::pointer_move(i as f64, 0.0, i * 100)).collect();
        let result = BehaviorAnalyzer::default().analyze(&events);
        assert!(result.insufficient_data);
        assert_eq!(result.score, 0);
        assert!(!result.is_human);
    }

    #[test]
    fn test_empty_log() {
        let result = BehaviorAnalyzer::default().analyze(&[]);
        assert!(result.insufficient_data);
        assert!(result.metrics.timing_cv.is_none());
        assert!(result.outliers.is_none());
    }

    #[test]
    fn test_constant_cadence_straight_line() {
        let events: Vec<Event> = (0..10)
            .map(|i| Event::pointer_move(i as f64 * 20.0, i as f64 * 10.0, i * 100))
            .collect();
        let result = BehaviorAnalyzer::default().analyze(&events);
        assert!(!result.insufficient_data);
        assert!(result.metrics.timing_cv.unwrap() < 1e-9);
        assert!((result.metrics.straightness.unwrap() - 1.0).abs() < 1e-9);
        assert!(!result.signals.iter().any(|h| h.signal == "natural_trajectory"));
        assert!(!result.signals.iter().any(|h| h.signal == "natural_timing"));
        assert_eq!(result.score, 0);
        assert!(!result.is_human);
        assert!(result.anomalies.iter().any(|a| a.contains("suspiciously regular")));
    }

    #[test]
    fn test_human_like_events() {
        let result = BehaviorAnalyzer::default().analyze(&human_events());
        assert!(result.signals.iter().any(|h| h.signal == "natural_trajectory"), "{:?}", result.metrics);
        assert!(result.signals.iter().any(|h| h.signal == "natural_clicks"), "{:?}", result.metrics);
        assert!(result.signals.iter().any(|h| h.signal == "natural_timing"), "{:?}", result.metrics);
        assert!(result.signals.iter().any(|h| h.signal == "natural_keystrokes"), "{:?}", result.metrics);
        assert_eq!(result.score, 100);
        assert!(result.is_human);
    }

    #[test]
    fn test_fast_typing_flagged() {
        let mut events: Vec<Event> = human_events().into_iter().filter(|e| !e.is(&EventKind::KeyPress)).collect();
        for i in 0..8 {
            events.push(Event::key_press(5000 + i * 20));
        }
        let result = BehaviorAnalyzer::default().analyze(&events);
        assert!(!result.signals.iter().any(|h| h.signal == "natural_keystrokes"));
        assert!(result.anomalies.iter().any(|a| a.contains("suspiciously fast")));
    }

    #[test]
    fn test_click_without_movement() {
        let events = vec![
            Event::click(10.0, 10.0, 0),
            Event::pointer_move(20.0, 20.0, 100),
            Event::click(20.0, 20.0, 900),
        ];
        assert!(click_without_movement(&events));
        assert!(!click_without_movement(&events[1..]));
        assert!(!click_without_movement(&[]));
    }

    #[test]
    fn test_unknown_events_ignored() {
        let mut events = human_events();
        events.insert(3, Event::new(EventKind::Other("custom".into()), serde_json::Value::Null, 120));
        let result = BehaviorAnalyzer::default().analyze(&events);
        assert_eq!(result.metrics.total_events, events.len());
        assert!(result.signals.iter().any(|h| h.signal == "natural_trajectory"));
    }

    #[test]
    fn test_straightness() {
        assert!((straightness(&[(0.0, 0.0), (1.0, 1.0), (2.0, 2.0)]) - 1.0).abs() < 1e-9);
        let square = [(0.0, 0.0), (1.0, 0.0), (1.0, 1.0), (0.0, 1.0)];
        assert!((straightness(&square) - 0.5).abs() < 1e-9);
        assert_eq!(straightness(&[(3.0, 3.0), (3.0, 3.0)]), 1.0);
    }
}

//! Transition outlier check.
//!
//! Consecutive event pairs become (inter-arrival time, pointer displacement)
//! feature vectors. The vectors are min-max normalised and partitioned with
//! k-means. A non-empty cluster holding only a small share of the transitions
//! marks the session as having outlier transitions.

use crate::telemetry::Event;
use serde::{Deserialize, Serialize};

/// Fewer transitions than this are not clustered.
pub const MIN_TRANSITIONS: usize = 10;

const MAX_ITERATIONS: usize = 25;

/// Outcome of the outlier check.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct OutlierReport {
    pub transitions: usize,
    /// Transition count per cluster, empty clusters included
    pub cluster_sizes: Vec<usize>,
    /// Share of the smallest non-empty cluster
    pub smallest_share: f64,
    pub is_outlier: bool,
}

/// (Δt in ms, Euclidean displacement) for each consecutive event pair.
/// Pairs where either side has no point get a displacement of zero.
pub fn transition_features(events: &[Event]) -> Vec<[f64; 2]> {
    events
        .windows(2)
        .map(|pair| {
            let dt = pair[1].timestamp.saturating_sub(pair[0].timestamp) as f64;
            let displacement = match (pair[0].point(), pair[1].point()) {
                (Some((x1, y1)), Some((x2, y2))) => ((x2 - x1).powi(2) + (y2 - y1).powi(2)).sqrt(),
                _ => 0.0,
            };
            [dt, displacement]
        })
        .collect()
}

/// Scale every dimension into [0, 1]. Constant dimensions become zero.
pub fn normalize(points: &[[f64; 2]]) -> Vec<[f64; 2]> {
    let mut min = [f64::INFINITY; 2];
    let mut max = [f64::NEG_INFINITY; 2];
    for p in points {
        for d in 0..2 {
            min[d] = min[d].min(p[d]);
            max[d] = max[d].max(p[d]);
        }
    }

    points
        .iter()
        .map(|p| {
            let mut scaled = [0.0; 2];
            for d in 0..2 {
                let range = max[d] - min[d];
                if range > f64::EPSILON {
                    scaled[d] = (p[d] - min[d]) / range;
                }
            }
            scaled
        })
        .collect()
}

fn distance_sq(a: &[f64; 2], b: &[f64; 2]) -> f64 {
    (a[0] - b[0]).powi(2) + (a[1] - b[1]).powi(2)
}

fn nearest(point: &[f64; 2], centroids: &[[f64; 2]]) -> usize {
    let mut best = 0;
    let mut best_dist = f64::INFINITY;
    for (i, c) in centroids.iter().enumerate() {
        let d = distance_sq(point, c);
        if d < best_dist {
            best = i;
            best_dist = d;
        }
    }
    best
}

/// Farthest-point seeding starting from the first point, so identical input
/// always yields identical clusters.
fn seed(points: &[[f64; 2]], k: usize) -> Vec<[f64; 2]> {
    let mut centroids = vec![points[0]];
    while centroids.len() < k {
        let next = points
            .iter()
            .map(|p| {
                centroids
                    .iter()
                    .map(|c| distance_sq(p, c))
                    .fold(f64::INFINITY, f64::min)
            })
            .enumerate()
            .fold((0, f64::NEG_INFINITY), |best, (i, d)| if d > best.1 { (i, d) } else { best })
            .0;
        centroids.push(points[next]);
    }
    centroids
}

/// Lloyd's k-means. Returns the cluster index of every point.
pub fn kmeans(points: &[[f64; 2]], k: usize) -> Vec<usize> {
    if points.is_empty() || k == 0 {
        return vec![];
    }

    let mut centroids = seed(points, k.min(points.len()));
    let mut assignment: Vec<usize> = points.iter().map(|p| nearest(p, &centroids)).collect();

    for _ in 0..MAX_ITERATIONS {
        let mut sums = vec![[0.0f64; 2]; centroids.len()];
        let mut counts = vec![0usize; centroids.len()];
        for (p, &c) in points.iter().zip(&assignment) {
            sums[c][0] += p[0];
            sums[c][1] += p[1];
            counts[c] += 1;
        }
        for (i, centroid) in centroids.iter_mut().enumerate() {
            // an empty cluster keeps its previous centroid
            if counts[i] > 0 {
                *centroid = [sums[i][0] / counts[i] as f64, sums[i][1] / counts[i] as f64];
            }
        }

        let next: Vec<usize> = points.iter().map(|p| nearest(p, &centroids)).collect();
        if next == assignment {
            break;
        }
        assignment = next;
    }

    assignment
}

/// Cluster the transitions of an event log. `None` when there are fewer than
/// [`MIN_TRANSITIONS`] transitions.
pub fn detect_outliers(events: &[Event], clusters: usize, min_share: f64) -> Option<OutlierReport> {
    let features = transition_features(events);
    if features.len() < MIN_TRANSITIONS || clusters == 0 {
        return None;
    }

    let normalized = normalize(&features);
    let assignment = kmeans(&normalized, clusters);

    let mut cluster_sizes = vec![0usize; clusters];
    for c in assignment {
        cluster_sizes[c] += 1;
    }

    let total = features.len() as f64;
    let smallest_share = cluster_sizes
        .iter()
        .filter(|&&n| n > 0)
        .map(|&n| n as f64 / total)
        .fold(1.0, f64::min);

    Some(OutlierReport {
        transitions: features.len(),
        cluster_sizes,
        smallest_share,
        is_outlier: smallest_share < min_share,
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_too_few_transitions() {
        let events: Vec<Event> = (0..10).map(|i| Event::pointer_move(i as f64, 0.0, i * 100)).collect();
        assert!(detect_outliers(&events, 3, 0.1).is_none());
    }

    #[test]
    fn test_uniform_transitions_single_cluster() {
        let events: Vec<Event> = (0..20).map(|i| Event::pointer_move(i as f64 * 10.0, 0.0, i * 100)).collect();
        let report = detect_outliers(&events, 3, 0.1).unwrap();
        assert_eq!(report.transitions, 19);
        assert_eq!(report.cluster_sizes.iter().filter(|&&n| n > 0).count(), 1);
        assert!(!report.is_outlier);
    }

    #[test]
    fn test_single_long_pause_is_outlier() {
        let mut events: Vec<Event> = (0..20)
            .map(|i| Event::pointer_move(i as f64 * 10.0 + (i % 3) as f64, (i % 2) as f64 * 5.0, i * 100 + (i % 4) * 7))
            .collect();
        // one 30 second gap followed by a jump across the screen
        events.push(Event::pointer_move(1500.0, 900.0, 32_000));
        let report = detect_outliers(&events, 3, 0.1).unwrap();
        assert!(report.is_outlier, "{:?}", report);
        assert!(report.smallest_share < 0.1);
    }

    #[test]
    fn test_kmeans_deterministic() {
        let points = vec![[0.0, 0.0], [0.1, 0.0], [0.0, 0.1], [1.0, 1.0], [0.9, 1.0], [0.5, 0.5]];
        assert_eq!(kmeans(&points, 3), kmeans(&points, 3));
        let assignment = kmeans(&points, 2);
        assert_eq!(assignment[0], assignment[1]);
        assert_ne!(assignment[0], assignment[3]);
    }

    #[test]
    fn test_normalize_constant_dimension() {
        let normalized = normalize(&[[5.0, 1.0], [5.0, 3.0]]);
        assert_eq!(normalized, vec![[0.0, 0.0], [0.0, 1.0]]);
    }
}

//! Geometry over objective profiles: distance, neighbours, clusters, trends.

use serde::Serialize;

use super::profile::{DIMENSIONS, DimensionalProfile};
use crate::state::{ObjectiveId, PipelineState};

/// Profiles at or below this distance are adjacent.
pub const ADJACENCY_THRESHOLD: f64 = 0.3;
pub const DOMINANT_THRESHOLD: f64 = 0.6;
pub const WEAK_THRESHOLD: f64 = 0.4;
/// Velocity magnitude under which a dimension counts as stable.
pub const STABLE_VELOCITY: f64 = 0.05;
pub const DEFAULT_CLUSTER_DISTANCE: f64 = 0.4;

pub fn distance(a: &DimensionalProfile, b: &DimensionalProfile) -> f64 {
    a.as_array()
        .iter()
        .zip(b.as_array())
        .map(|(x, y)| (x - y).powi(2))
        .sum::<f64>()
        .sqrt()
}

/// `1 - d / sqrt(7)`: 1 for identical profiles, 0 for opposite corners.
pub fn similarity(a: &DimensionalProfile, b: &DimensionalProfile) -> f64 {
    (1.0 - distance(a, b) / 7f64.sqrt()).max(0.0)
}

pub fn is_adjacent(a: &DimensionalProfile, b: &DimensionalProfile) -> bool {
    distance(a, b) <= ADJACENCY_THRESHOLD
}

pub fn dominant_dimensions(profile: &DimensionalProfile) -> Vec<&'static str> {
    profile
        .dimensions()
        .filter(|(_, v)| *v >= DOMINANT_THRESHOLD)
        .map(|(name, _)| name)
        .collect()
}

pub fn weak_dimensions(profile: &DimensionalProfile) -> Vec<&'static str> {
    profile
        .dimensions()
        .filter(|(_, v)| *v <= WEAK_THRESHOLD)
        .map(|(name, _)| name)
        .collect()
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum Direction {
    Increasing,
    Decreasing,
    Stable,
}

impl std::fmt::Display for Direction {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let s = match self {
            Direction::Increasing => "increasing",
            Direction::Decreasing => "decreasing",
            Direction::Stable => "stable",
        };
        f.write_str(s)
    }
}

/// Direction of travel per dimension, from a velocity profile.
pub fn trajectory(velocity: &DimensionalProfile) -> Vec<(&'static str, Direction)> {
    velocity
        .dimensions()
        .map(|(name, v)| {
            let direction = if v > STABLE_VELOCITY {
                Direction::Increasing
            } else if v < -STABLE_VELOCITY {
                Direction::Decreasing
            } else {
                Direction::Stable
            };
            (name, direction)
        })
        .collect()
}

/// Linear extrapolation `steps` snapshots ahead, clamped to the unit cube.
pub fn predict_position(
    profile: &DimensionalProfile,
    velocity: &DimensionalProfile,
    steps: u32,
) -> DimensionalProfile {
    let p = profile.as_array();
    let v = velocity.as_array();
    DimensionalProfile::from_array(std::array::from_fn(|i| {
        (p[i] + v[i] * f64::from(steps)).clamp(0.0, 1.0)
    }))
}

#[derive(Debug, Clone, Copy, PartialEq, Serialize)]
pub struct DimensionStats {
    pub mean: f64,
    pub min: f64,
    pub max: f64,
    /// Population standard deviation.
    pub std: f64,
}

fn centroid<'a>(profiles: impl IntoIterator<Item = &'a DimensionalProfile>) -> DimensionalProfile {
    let mut sum = [0.0; 7];
    let mut n = 0usize;
    for p in profiles {
        for (acc, v) in sum.iter_mut().zip(p.as_array()) {
            *acc += v;
        }
        n += 1;
    }
    if n == 0 {
        return DimensionalProfile::default();
    }
    DimensionalProfile::from_array(sum.map(|s| s / n as f64))
}

/// Snapshot of every objective's position.
#[derive(Debug, Clone, Default)]
pub struct DimensionalSpace {
    points: Vec<(ObjectiveId, DimensionalProfile)>,
}

impl DimensionalSpace {
    pub fn new(points: impl IntoIterator<Item = (ObjectiveId, DimensionalProfile)>) -> Self {
        let mut points: Vec<_> = points.into_iter().collect();
        points.sort_by_key(|(id, _)| *id);
        Self { points }
    }

    pub fn from_state(state: &PipelineState) -> Self {
        Self::new(state.objectives.values().map(|o| (o.id, o.profile)))
    }

    pub fn len(&self) -> usize {
        self.points.len()
    }

    pub fn is_empty(&self) -> bool {
        self.points.is_empty()
    }

    fn profile(&self, id: ObjectiveId) -> Option<&DimensionalProfile> {
        self.points.iter().find(|(pid, _)| *pid == id).map(|(_, p)| p)
    }

    /// The `k` closest other objectives, nearest first.
    pub fn nearest_neighbors(&self, id: ObjectiveId, k: usize) -> Vec<(ObjectiveId, f64)> {
        let Some(origin) = self.profile(id) else {
            return Vec::new();
        };
        let mut others: Vec<(ObjectiveId, f64)> = self
            .points
            .iter()
            .filter(|(other, _)| *other != id)
            .map(|(other, p)| (*other, distance(origin, p)))
            .collect();
        others.sort_by(|a, b| a.1.total_cmp(&b.1).then(a.0.cmp(&b.0)));
        others.truncate(k);
        others
    }

    pub fn adjacent(&self, id: ObjectiveId) -> Vec<ObjectiveId> {
        let Some(origin) = self.profile(id) else {
            return Vec::new();
        };
        self.points
            .iter()
            .filter(|(other, p)| *other != id && is_adjacent(origin, p))
            .map(|(other, _)| *other)
            .collect()
    }

    /// Per-dimension statistics, in `DIMENSIONS` order. Empty when the space is.
    pub fn statistics(&self) -> Vec<(&'static str, DimensionStats)> {
        if self.points.is_empty() {
            return Vec::new();
        }
        let n = self.points.len() as f64;
        DIMENSIONS
            .iter()
            .enumerate()
            .map(|(i, name)| {
                let values: Vec<f64> = self.points.iter().map(|(_, p)| p.as_array()[i]).collect();
                let mean = values.iter().sum::<f64>() / n;
                let min = values.iter().copied().fold(f64::INFINITY, f64::min);
                let max = values.iter().copied().fold(f64::NEG_INFINITY, f64::max);
                let var = values.iter().map(|v| (v - mean).powi(2)).sum::<f64>() / n;
                (
                    *name,
                    DimensionStats {
                        mean,
                        min,
                        max,
                        std: var.sqrt(),
                    },
                )
            })
            .collect()
    }

    /// Agglomerative clustering on centroid distance. The closest pair of clusters
    /// merges until no pair is within `max_distance`.
    pub fn clusters(&self, max_distance: f64) -> Vec<Vec<ObjectiveId>> {
        let mut clusters: Vec<Vec<usize>> = (0..self.points.len()).map(|i| vec![i]).collect();
        loop {
            let centroids: Vec<DimensionalProfile> = clusters
                .iter()
                .map(|members| centroid(members.iter().map(|i| &self.points[*i].1)))
                .collect();

            let mut best: Option<(usize, usize, f64)> = None;
            for i in 0..centroids.len() {
                for j in (i + 1)..centroids.len() {
                    let d = distance(&centroids[i], &centroids[j]);
                    if best.is_none_or(|(_, _, bd)| d < bd) {
                        best = Some((i, j, d));
                    }
                }
            }

            match best {
                Some((i, j, d)) if d <= max_distance => {
                    let absorbed = clusters.remove(j);
                    clusters[i].extend(absorbed);
                }
                _ => break,
            }
        }
        clusters
            .into_iter()
            .map(|members| {
                let mut ids: Vec<ObjectiveId> =
                    members.into_iter().map(|i| self.points[i].0).collect();
                ids.sort();
                ids
            })
            .collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn p(values: [f64; 7]) -> DimensionalProfile {
        DimensionalProfile::from_array(values)
    }

    #[test]
    fn test_distance_and_similarity() {
        let a = DimensionalProfile::zero();
        let b = p([1.0; 7]);
        assert!((distance(&a, &b) - 7f64.sqrt()).abs() < 1e-12);
        assert!(similarity(&a, &b).abs() < 1e-12);
        assert_eq!(similarity(&a, &a), 1.0);
        assert!(is_adjacent(&a, &p([0.1, 0.1, 0.0, 0.0, 0.0, 0.0, 0.0])));
        assert!(!is_adjacent(&a, &p([0.4, 0.0, 0.0, 0.0, 0.0, 0.0, 0.0])));
    }

    #[test]
    fn test_dominant_and_weak() {
        let profile = p([0.6, 0.5, 0.4, 0.9, 0.1, 0.5, 0.5]);
        assert_eq!(dominant_dimensions(&profile), vec!["temporal", "state"]);
        assert_eq!(weak_dimensions(&profile), vec!["data", "error"]);
    }

    #[test]
    fn test_trajectory_and_prediction() {
        let velocity = p([0.1, -0.1, 0.04, 0.0, 0.0, 0.0, 0.0]);
        let dirs = trajectory(&velocity);
        assert_eq!(dirs[0], ("temporal", Direction::Increasing));
        assert_eq!(dirs[1], ("functional", Direction::Decreasing));
        assert_eq!(dirs[2], ("data", Direction::Stable));

        let ahead = predict_position(&p([0.95; 7]), &velocity, 3);
        assert_eq!(ahead.temporal, 1.0);
        assert!((ahead.functional - 0.65).abs() < 1e-9);
    }

    #[test]
    fn test_neighbors_and_adjacency() {
        let space = DimensionalSpace::new([
            (ObjectiveId(1), p([0.5; 7])),
            (ObjectiveId(2), p([0.55; 7])),
            (ObjectiveId(3), p([0.9; 7])),
        ]);
        let near = space.nearest_neighbors(ObjectiveId(1), 1);
        assert_eq!(near.len(), 1);
        assert_eq!(near[0].0, ObjectiveId(2));
        assert_eq!(space.adjacent(ObjectiveId(1)), vec![ObjectiveId(2)]);
        assert!(space.nearest_neighbors(ObjectiveId(9), 3).is_empty());
    }

    #[test]
    fn test_statistics() {
        let space = DimensionalSpace::new([
            (ObjectiveId(1), p([0.2; 7])),
            (ObjectiveId(2), p([0.6; 7])),
        ]);
        let stats = space.statistics();
        assert_eq!(stats.len(), 7);
        let (name, s) = stats[0];
        assert_eq!(name, "temporal");
        assert!((s.mean - 0.4).abs() < 1e-12);
        assert_eq!((s.min, s.max), (0.2, 0.6));
        assert!((s.std - 0.2).abs() < 1e-12);
        assert!(DimensionalSpace::default().statistics().is_empty());
    }

    #[test]
    fn test_clustering() {
        let space = DimensionalSpace::new([
            (ObjectiveId(1), p([0.1; 7])),
            (ObjectiveId(2), p([0.12; 7])),
            (ObjectiveId(3), p([0.9; 7])),
            (ObjectiveId(4), p([0.88; 7])),
            (ObjectiveId(5), p([0.5; 7])),
        ]);
        let clusters = space.clusters(DEFAULT_CLUSTER_DISTANCE);
        assert_eq!(
            clusters,
            vec![
                vec![ObjectiveId(1), ObjectiveId(2)],
                vec![ObjectiveId(3), ObjectiveId(4)],
                vec![ObjectiveId(5)],
            ]
        );
    }
}

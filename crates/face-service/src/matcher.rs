//! Nearest-neighbor matcher derived from the profile store.
//!
//! The index is rebuilt lazily: every call to [`MatcherIndex::ensure_fresh`]
//! recomputes the snapshot key from `(identity id, sample count)` pairs and
//! the threshold, and only rebuilds when the key changed since the last build.

use crate::profile::threshold::AcceptanceThreshold;
use common::face::Identity;
use std::fmt::Write;
use uuid::Uuid;

/// Euclidean distance between two vectors. Vectors of different length are
/// incomparable and sit at infinite distance.
pub fn euclidean_distance(a: &[f32], b: &[f32]) -> f32 {
    if a.len() != b.len() {
        return f32::INFINITY;
    }
    a.iter()
        .zip(b.iter())
        .map(|(x, y)| (x - y) * (x - y))
        .sum::<f32>()
        .sqrt()
}

/// Derive the cache key for a store state and threshold
pub fn snapshot_key(profiles: &[Identity], threshold: AcceptanceThreshold) -> String {
    let mut key = String::with_capacity(profiles.len() * 40 + 8);
    for (i, identity) in profiles.iter().enumerate() {
        if i > 0 {
            key.push('|');
        }
        // Writing into a String cannot fail
        let _ = write!(key, "{}:{}", identity.id, identity.samples.len());
    }
    let _ = write!(key, "_T{}", threshold.value());
    key
}

/// Closest indexed identity for a query vector
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct BestMatch {
    pub identity_id: Uuid,
    pub distance: f32,
}

/// Decision derived from a match distance and the active threshold
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Score {
    pub identified: bool,
    pub confidence: u8,
}

/// Turn a distance into an identity decision and a 0-100 confidence.
///
/// Below the threshold confidence is relative to the threshold; at or above
/// it, confidence is `1 - min(1, distance)` and carries no decision. Both
/// branches are non-increasing in distance.
pub fn score(distance: f32, threshold: AcceptanceThreshold) -> Score {
    let t = threshold.value();
    if distance < t {
        Score {
            identified: true,
            confidence: to_percent(1.0 - distance / t),
        }
    } else {
        Score {
            identified: false,
            confidence: to_percent(1.0 - distance.min(1.0)),
        }
    }
}

fn to_percent(ratio: f32) -> u8 {
    (ratio.max(0.0) * 100.0).round().min(100.0) as u8
}

/// One immutable build of the index
#[derive(Debug, Clone, Default)]
pub struct MatcherSnapshot {
    key: String,
    threshold: AcceptanceThreshold,
    entries: Vec<IndexedIdentity>,
}

#[derive(Debug, Clone)]
struct IndexedIdentity {
    id: Uuid,
    vectors: Vec<Vec<f32>>,
}

impl MatcherSnapshot {
    fn build(key: String, profiles: &[Identity], threshold: AcceptanceThreshold) -> Self {
        let entries = profiles
            .iter()
            .filter(|p| !p.samples.is_empty())
            .map(|p| IndexedIdentity {
                id: p.id,
                vectors: p.samples.iter().map(|s| s.vector.clone()).collect(),
            })
            .collect();

        Self {
            key,
            threshold,
            entries,
        }
    }

    pub fn key(&self) -> &str {
        &self.key
    }

    pub fn threshold(&self) -> AcceptanceThreshold {
        self.threshold
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Number of identities with at least one sample
    pub fn identity_count(&self) -> usize {
        self.entries.len()
    }

    pub fn vector_count(&self) -> usize {
        self.entries.iter().map(|e| e.vectors.len()).sum()
    }

    pub fn contains(&self, id: Uuid) -> bool {
        self.entries.iter().any(|e| e.id == id)
    }

    /// Brute-force nearest neighbor over every indexed vector.
    ///
    /// Ties resolve to the identity that comes first in snapshot order.
    /// Returns `None` on an empty index or when no indexed vector has the
    /// query's dimension.
    pub fn resolve_best_match(&self, query: &[f32]) -> Option<BestMatch> {
        let mut best: Option<BestMatch> = None;

        for entry in &self.entries {
            for vector in entry.vectors.iter().filter(|v| v.len() == query.len()) {
                let distance = euclidean_distance(query, vector);
                if best.map_or(true, |b| distance < b.distance) {
                    best = Some(BestMatch {
                        identity_id: entry.id,
                        distance,
                    });
                }
            }
        }

        best
    }
}

/// Cached matcher owned by one pipeline
#[derive(Debug, Default)]
pub struct MatcherIndex {
    snapshot: Option<MatcherSnapshot>,
    rebuilds: u64,
}

impl MatcherIndex {
    pub fn new() -> Self {
        Self::default()
    }

    /// Return the snapshot for `(profiles, threshold)`, rebuilding only if the
    /// snapshot key differs from the cached one
    pub fn ensure_fresh(
        &mut self,
        profiles: &[Identity],
        threshold: AcceptanceThreshold,
    ) -> &MatcherSnapshot {
        let key = snapshot_key(profiles, threshold);
        let stale = self.snapshot.as_ref().map_or(true, |s| s.key != key);

        if stale {
            let snapshot = MatcherSnapshot::build(key, profiles, threshold);
            self.rebuilds += 1;

            telemetry::metrics::FACE_MATCHER_REBUILDS.inc();
            telemetry::metrics::FACE_MATCHER_INDEXED_VECTORS.set(snapshot.vector_count() as i64);
            tracing::debug!(
                identities = snapshot.identity_count(),
                vectors = snapshot.vector_count(),
                threshold = %threshold,
                "rebuilt matcher index"
            );

            self.snapshot = Some(snapshot);
        }

        self.snapshot.get_or_insert_with(MatcherSnapshot::default)
    }

    /// Number of rebuilds since creation
    pub fn rebuild_count(&self) -> u64 {
        self.rebuilds
    }

    /// Current snapshot without freshness check
    pub fn current(&self) -> Option<&MatcherSnapshot> {
        self.snapshot.as_ref()
    }
}

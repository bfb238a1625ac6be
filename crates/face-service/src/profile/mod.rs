//! Enrolled identities and their reference samples.
//!
//! [`ProfileStore`] is the authoritative, mutable dataset. Every successful
//! mutation hands back a [`Staged`] value carrying the document to write
//! through the [`ProfileRepository`]. Committing it can happen after the
//! store lock is released; a failed write comes back as a warning next to
//! the value and the in-memory change stays in place.

pub mod persist;
pub mod threshold;

use crate::error::{FaceError, FaceResult};
use crate::matcher::euclidean_distance;
use common::face::{Identity, Sample};
use persist::{PendingWrite, ProfileRepository, WriteQueue};
use std::sync::Arc;
use threshold::AcceptanceThreshold;
use uuid::Uuid;

/// Default tolerance for [`ProfileStore::sample_consistency`]
pub const DEFAULT_CONSISTENCY_TOLERANCE: f32 = 0.65;

/// A committed mutation. `warning` carries the persistence failure, if any.
#[derive(Debug)]
pub struct Committed<T> {
    pub value: T,
    pub warning: Option<FaceError>,
}

impl<T> Committed<T> {
    pub fn warning_message(&self) -> Option<String> {
        self.warning.as_ref().map(|w| w.to_string())
    }
}

/// A mutation applied in memory whose document has not been written yet
#[derive(Debug)]
#[must_use = "the change is not durable until committed"]
pub struct Staged<T> {
    pub value: T,
    write: PendingWrite,
}

impl<T> Staged<T> {
    /// Write on the calling thread
    pub fn commit(self) -> Committed<T> {
        let warning = self.write.run();
        Committed {
            value: self.value,
            warning,
        }
    }

    /// Write on the blocking pool, keeping the async worker free
    pub async fn commit_blocking(self) -> Committed<T> {
        let Staged { value, write } = self;
        let warning = match tokio::task::spawn_blocking(move || write.run()).await {
            Ok(warning) => warning,
            Err(e) => Some(FaceError::PersistenceFailed(format!(
                "write task failed: {}",
                e
            ))),
        };
        Committed { value, warning }
    }
}

pub struct ProfileStore {
    identities: Vec<Identity>,
    threshold: AcceptanceThreshold,
    /// Vector dimension shared by every sample; learned from the first vector
    /// unless configured up front
    dimension: Option<usize>,
    repository: Arc<dyn ProfileRepository>,
    writes: Arc<WriteQueue>,
    /// Bumped on every staged write
    revision: u64,
}

impl ProfileStore {
    /// Create an empty store backed by `repository` without reading from it
    pub fn new(repository: Arc<dyn ProfileRepository>) -> Self {
        Self {
            identities: Vec::new(),
            threshold: AcceptanceThreshold::default(),
            dimension: None,
            writes: Arc::new(WriteQueue::new(repository.clone())),
            repository,
            revision: 0,
        }
    }

    /// Load the store from `repository`.
    ///
    /// Unreadable documents are logged and replaced by an empty store or the
    /// default threshold; a persisted threshold outside the valid range is
    /// clamped.
    pub fn open(repository: Arc<dyn ProfileRepository>) -> Self {
        let mut store = Self::new(repository);

        match store.repository.load_profiles() {
            Ok(identities) => store.identities = identities,
            Err(e) => tracing::warn!(error = %e, "failed to load profiles, starting empty"),
        }

        match store.repository.load_threshold() {
            Ok(Some(value)) => {
                store.threshold = AcceptanceThreshold::clamped(value);
                if store.threshold.value() != value {
                    tracing::warn!(
                        persisted = value,
                        threshold = %store.threshold,
                        "persisted threshold out of range, clamped"
                    );
                }
            }
            Ok(None) => {}
            Err(e) => tracing::warn!(error = %e, "failed to load threshold, using default"),
        }

        store.dimension = store
            .identities
            .iter()
            .flat_map(|i| i.samples.iter())
            .map(|s| s.vector.len())
            .next();

        tracing::info!(
            identities = store.identities.len(),
            threshold = %store.threshold,
            dimension = ?store.dimension,
            "profile store loaded"
        );
        telemetry::metrics::FACE_ENROLLED_IDENTITIES.set(store.identities.len() as i64);

        store
    }

    /// Fix the vector dimension up front instead of learning it
    pub fn with_dimension(mut self, dimension: Option<usize>) -> Self {
        if dimension.is_some() {
            self.dimension = dimension;
        }
        self
    }

    pub fn dimension(&self) -> Option<usize> {
        self.dimension
    }

    pub fn threshold(&self) -> AcceptanceThreshold {
        self.threshold
    }

    /// Ordered read-only view of every identity, reflecting the latest mutation
    pub fn snapshot(&self) -> &[Identity] {
        &self.identities
    }

    pub fn get(&self, id: Uuid) -> Option<&Identity> {
        self.identities.iter().find(|i| i.id == id)
    }

    pub fn len(&self) -> usize {
        self.identities.len()
    }

    pub fn is_empty(&self) -> bool {
        self.identities.is_empty()
    }

    /// Create a new identity, with one sample if `vector` is supplied
    pub fn enroll(
        &mut self,
        name: String,
        thumbnail: String,
        vector: Option<Vec<f32>>,
    ) -> FaceResult<Staged<Identity>> {
        if let Some(v) = &vector {
            self.check_dimension(v)?;
        }

        let samples = match vector {
            Some(vector) => vec![Sample { thumbnail, vector }],
            None => Vec::new(),
        };
        if let Some(sample) = samples.first() {
            self.dimension.get_or_insert(sample.vector.len());
        }

        let identity = Identity {
            id: Uuid::new_v4(),
            name,
            created_at: common::validation::safe_unix_timestamp_ms(),
            samples,
        };
        self.identities.push(identity.clone());

        tracing::info!(
            identity_id = %identity.id,
            name = %identity.name,
            samples = identity.samples.len(),
            "enrolled identity"
        );
        Ok(self.stage("enroll", identity))
    }

    /// Remove an identity and all of its samples
    pub fn delete(&mut self, id: Uuid) -> FaceResult<Staged<Identity>> {
        let pos = self.position(id)?;
        let removed = self.identities.remove(pos);

        tracing::info!(identity_id = %id, name = %removed.name, "deleted identity");
        Ok(self.stage("delete", removed))
    }

    pub fn rename(&mut self, id: Uuid, name: String) -> FaceResult<Staged<Identity>> {
        let pos = self.position(id)?;
        self.identities[pos].name = name;
        let identity = self.identities[pos].clone();
        Ok(self.stage("rename", identity))
    }

    /// Append a sample, preserving insertion order
    pub fn add_sample(
        &mut self,
        id: Uuid,
        thumbnail: String,
        vector: Vec<f32>,
    ) -> FaceResult<Staged<Identity>> {
        let pos = self.position(id)?;
        self.check_dimension(&vector)?;
        self.dimension.get_or_insert(vector.len());

        let identity = &mut self.identities[pos];
        identity.samples.push(Sample { thumbnail, vector });
        let identity = identity.clone();

        tracing::info!(
            identity_id = %id,
            samples = identity.samples.len(),
            "added sample"
        );
        Ok(self.stage("add_sample", identity))
    }

    /// Remove the sample at `index`. The identity survives losing its last sample.
    pub fn remove_sample(&mut self, id: Uuid, index: usize) -> FaceResult<Staged<Identity>> {
        let pos = self.position(id)?;
        let identity = &mut self.identities[pos];
        if index >= identity.samples.len() {
            return Err(FaceError::IndexOutOfRange {
                id,
                index,
                len: identity.samples.len(),
            });
        }

        identity.samples.remove(index);
        let identity = identity.clone();

        tracing::info!(
            identity_id = %id,
            index,
            samples = identity.samples.len(),
            "removed sample"
        );
        Ok(self.stage("remove_sample", identity))
    }

    /// Advisory quality gate: true iff `candidate` lies within `tolerance` of
    /// at least one existing sample. Identities without samples accept anything.
    pub fn sample_consistency(
        &self,
        id: Uuid,
        candidate: &[f32],
        tolerance: f32,
    ) -> FaceResult<bool> {
        let identity = self.get(id).ok_or(FaceError::NotFound(id))?;
        self.check_dimension(candidate)?;

        if identity.samples.is_empty() {
            return Ok(true);
        }

        let min_distance = identity
            .samples
            .iter()
            .map(|s| euclidean_distance(candidate, &s.vector))
            .fold(1.0_f32, f32::min);

        tracing::debug!(
            identity_id = %id,
            min_distance,
            tolerance,
            "sample consistency check"
        );
        Ok(min_distance < tolerance)
    }

    pub fn set_threshold(&mut self, threshold: AcceptanceThreshold) -> Staged<AcceptanceThreshold> {
        self.threshold = threshold;
        self.revision += 1;

        tracing::info!(threshold = %threshold, "acceptance threshold updated");
        Staged {
            value: threshold,
            write: PendingWrite::threshold(self.writes.clone(), self.revision, threshold.value()),
        }
    }

    fn position(&self, id: Uuid) -> FaceResult<usize> {
        self.identities
            .iter()
            .position(|i| i.id == id)
            .ok_or(FaceError::NotFound(id))
    }

    fn check_dimension(&self, vector: &[f32]) -> FaceResult<()> {
        match self.dimension {
            Some(expected) if expected != vector.len() => Err(FaceError::DimensionMismatch {
                expected,
                got: vector.len(),
            }),
            _ => Ok(()),
        }
    }

    fn stage<T>(&mut self, operation: &'static str, value: T) -> Staged<T> {
        telemetry::metrics::FACE_ENROLLED_IDENTITIES.set(self.identities.len() as i64);
        self.revision += 1;

        Staged {
            value,
            write: PendingWrite::profiles(
                self.writes.clone(),
                operation,
                self.revision,
                self.identities.clone(),
            ),
        }
    }
}

use crate::error::{FaceError, FaceResult};
use common::face::Identity;
use std::fs;
use std::io::Write;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

pub const PROFILES_FILE: &str = "profiles.json";
pub const THRESHOLD_FILE: &str = "threshold.json";

/// Durable storage for enrolled identities and the acceptance threshold.
///
/// Implementations must be safe for concurrent use. Writes replace the whole
/// document; there is no incremental update.
pub trait ProfileRepository: Send + Sync {
    /// Loads all identities in enrollment order. A missing document is empty.
    fn load_profiles(&self) -> FaceResult<Vec<Identity>>;

    fn save_profiles(&self, identities: &[Identity]) -> FaceResult<()>;

    /// Loads the persisted threshold, `None` when nothing was saved yet.
    fn load_threshold(&self) -> FaceResult<Option<f32>>;

    fn save_threshold(&self, threshold: f32) -> FaceResult<()>;
}

/// Revision of the last document that landed, per document
#[derive(Debug, Default)]
struct Landed {
    profiles: u64,
    threshold: u64,
}

/// A repository shared by every write a store stages.
///
/// Writes run after the store lock is released and may reach the repository
/// out of order. A document staged before one that already landed is
/// dropped; the later document contains its change.
pub struct WriteQueue {
    repository: Arc<dyn ProfileRepository>,
    landed: Mutex<Landed>,
}

impl WriteQueue {
    pub fn new(repository: Arc<dyn ProfileRepository>) -> Self {
        Self {
            repository,
            landed: Mutex::new(Landed::default()),
        }
    }
}

#[derive(Debug)]
enum Document {
    Profiles(Vec<Identity>),
    Threshold(f32),
}

/// One whole-document write, detached from the store that staged it
pub struct PendingWrite {
    queue: Arc<WriteQueue>,
    operation: &'static str,
    revision: u64,
    document: Document,
}

impl std::fmt::Debug for PendingWrite {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("PendingWrite")
            .field("operation", &self.operation)
            .field("revision", &self.revision)
            .finish_non_exhaustive()
    }
}

impl PendingWrite {
    pub(crate) fn profiles(
        queue: Arc<WriteQueue>,
        operation: &'static str,
        revision: u64,
        identities: Vec<Identity>,
    ) -> Self {
        Self {
            queue,
            operation,
            revision,
            document: Document::Profiles(identities),
        }
    }

    pub(crate) fn threshold(queue: Arc<WriteQueue>, revision: u64, threshold: f32) -> Self {
        Self {
            queue,
            operation: "set_threshold",
            revision,
            document: Document::Threshold(threshold),
        }
    }

    /// Blocking write. Returns the failure, if any, after recording it.
    pub fn run(self) -> Option<FaceError> {
        let mut guard = match self.queue.landed.lock() {
            Ok(landed) => landed,
            Err(poisoned) => poisoned.into_inner(),
        };
        let landed: &mut Landed = &mut guard;
        let (last, kind) = match &self.document {
            Document::Profiles(_) => (&mut landed.profiles, "profiles"),
            Document::Threshold(_) => (&mut landed.threshold, "threshold"),
        };

        let repository = &self.queue.repository;
        let result = (self.revision > *last).then(|| match &self.document {
            Document::Profiles(identities) => repository.save_profiles(identities),
            Document::Threshold(value) => repository.save_threshold(*value),
        });

        let warning = match result {
            None => {
                tracing::debug!(
                    operation = self.operation,
                    revision = self.revision,
                    "newer document already written, skipping"
                );
                None
            }
            Some(Ok(())) => {
                *last = self.revision;
                None
            }
            Some(Err(e)) => Some(e),
        };
        drop(guard);

        let status = if warning.is_some() { "unsaved" } else { "success" };
        telemetry::metrics::FACE_STORE_OPERATIONS
            .with_label_values(&[self.operation, status])
            .inc();
        if let Some(e) = &warning {
            telemetry::metrics::FACE_PERSIST_FAILURES
                .with_label_values(&[kind])
                .inc();
            tracing::warn!(
                operation = self.operation,
                error = %e,
                "failed to persist {}, keeping in-memory change",
                kind
            );
        }
        warning
    }
}

/// JSON documents in a data directory, replaced atomically on every write
pub struct JsonFileRepository {
    dir: PathBuf,
}

impl JsonFileRepository {
    pub fn open(dir: impl Into<PathBuf>) -> FaceResult<Self> {
        let dir = dir.into();
        fs::create_dir_all(&dir).map_err(|e| {
            FaceError::PersistenceFailed(format!(
                "failed to create data directory {}: {}",
                dir.display(),
                e
            ))
        })?;
        Ok(Self { dir })
    }

    pub fn dir(&self) -> &Path {
        &self.dir
    }

    fn write_atomic(&self, file_name: &str, bytes: &[u8]) -> FaceResult<()> {
        let target = self.dir.join(file_name);
        let persist_err =
            |e: std::io::Error| FaceError::PersistenceFailed(format!("{}: {}", target.display(), e));

        let mut tmp = tempfile::NamedTempFile::new_in(&self.dir).map_err(persist_err)?;
        tmp.write_all(bytes).map_err(persist_err)?;
        tmp.as_file().sync_all().map_err(persist_err)?;
        tmp.persist(&target).map_err(|e| persist_err(e.error))?;
        Ok(())
    }

    /// Move an unreadable document aside so the next save cannot overwrite it
    fn quarantine(&self, path: &Path) {
        let backup = path.with_extension(format!(
            "json.corrupt-{}",
            common::validation::safe_unix_timestamp_ms()
        ));
        match fs::rename(path, &backup) {
            Ok(()) => tracing::warn!(
                path = %path.display(),
                backup = %backup.display(),
                "moved unreadable document aside"
            ),
            Err(e) => tracing::error!(
                path = %path.display(),
                error = %e,
                "failed to move unreadable document aside"
            ),
        }
    }

    fn read_optional(&self, file_name: &str) -> FaceResult<Option<Vec<u8>>> {
        let path = self.dir.join(file_name);
        match fs::read(&path) {
            Ok(bytes) => Ok(Some(bytes)),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(None),
            Err(e) => Err(FaceError::PersistenceFailed(format!(
                "{}: {}",
                path.display(),
                e
            ))),
        }
    }
}

impl ProfileRepository for JsonFileRepository {
    fn load_profiles(&self) -> FaceResult<Vec<Identity>> {
        let Some(bytes) = self.read_optional(PROFILES_FILE)? else {
            return Ok(Vec::new());
        };

        serde_json::from_slice(&bytes).map_err(|e| {
            self.quarantine(&self.dir.join(PROFILES_FILE));
            FaceError::PersistenceFailed(format!("invalid {}: {}", PROFILES_FILE, e))
        })
    }

    fn save_profiles(&self, identities: &[Identity]) -> FaceResult<()> {
        let bytes = serde_json::to_vec(identities)
            .map_err(|e| FaceError::PersistenceFailed(e.to_string()))?;
        self.write_atomic(PROFILES_FILE, &bytes)
    }

    fn load_threshold(&self) -> FaceResult<Option<f32>> {
        let Some(bytes) = self.read_optional(THRESHOLD_FILE)? else {
            return Ok(None);
        };

        serde_json::from_slice(&bytes)
            .map(Some)
            .map_err(|e| FaceError::PersistenceFailed(format!("invalid {}: {}", THRESHOLD_FILE, e)))
    }

    fn save_threshold(&self, threshold: f32) -> FaceResult<()> {
        let bytes = serde_json::to_vec(&threshold)
            .map_err(|e| FaceError::PersistenceFailed(e.to_string()))?;
        self.write_atomic(THRESHOLD_FILE, &bytes)
    }
}

/// In-memory [`ProfileRepository`].
/// Data is lost on restart. Suitable for testing or ephemeral use.
#[derive(Default)]
pub struct MemoryRepository {
    inner: Mutex<MemoryRepositoryInner>,
    fail_writes: AtomicBool,
    write_delay_ms: AtomicU64,
}

#[derive(Default)]
struct MemoryRepositoryInner {
    identities: Vec<Identity>,
    threshold: Option<f32>,
    writes: usize,
}

impl MemoryRepository {
    pub fn new() -> Self {
        Self::default()
    }

    /// Make every subsequent write fail, as a full disk would
    pub fn set_fail_writes(&self, fail: bool) {
        self.fail_writes.store(fail, Ordering::SeqCst);
    }

    /// Make every subsequent write block for `delay`, as a slow disk would
    pub fn set_write_delay(&self, delay: Duration) {
        self.write_delay_ms
            .store(delay.as_millis() as u64, Ordering::SeqCst);
    }

    /// Number of successful writes so far
    pub fn writes(&self) -> usize {
        self.lock().map(|inner| inner.writes).unwrap_or(0)
    }

    fn lock(&self) -> FaceResult<std::sync::MutexGuard<'_, MemoryRepositoryInner>> {
        self.inner
            .lock()
            .map_err(|e| FaceError::PersistenceFailed(format!("repository lock poisoned: {}", e)))
    }

    fn check_writable(&self) -> FaceResult<()> {
        let delay = self.write_delay_ms.load(Ordering::SeqCst);
        if delay > 0 {
            std::thread::sleep(Duration::from_millis(delay));
        }
        if self.fail_writes.load(Ordering::SeqCst) {
            return Err(FaceError::PersistenceFailed(
                "storage quota exceeded".to_string(),
            ));
        }
        Ok(())
    }
}

impl ProfileRepository for MemoryRepository {
    fn load_profiles(&self) -> FaceResult<Vec<Identity>> {
        Ok(self.lock()?.identities.clone())
    }

    fn save_profiles(&self, identities: &[Identity]) -> FaceResult<()> {
        self.check_writable()?;
        let mut inner = self.lock()?;
        inner.identities = identities.to_vec();
        inner.writes += 1;
        Ok(())
    }

    fn load_threshold(&self) -> FaceResult<Option<f32>> {
        Ok(self.lock()?.threshold)
    }

    fn save_threshold(&self, threshold: f32) -> FaceResult<()> {
        self.check_writable()?;
        let mut inner = self.lock()?;
        inner.threshold = Some(threshold);
        inner.writes += 1;
        Ok(())
    }
}

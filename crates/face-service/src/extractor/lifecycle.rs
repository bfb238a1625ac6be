//! Extractor readiness as an explicit state machine.
//!
//! `Uninitialized -> Loading -> Ready | Failed`, with `Failed -> Loading` on
//! retry. Every attempt walks the configured model sources in order and
//! bounds each one by a timeout. The demographic sub-model loads in the
//! background once the extractor is ready and never fails the attempt.

use super::{FaceExtractor, ModelSource, SharedExtractor};
use crate::error::{FaceError, FaceResult};
use common::face::{ExtractorInfo, ExtractorState, ExtractorStatus};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex, RwLock};
use std::time::Duration;
use tokio::task::JoinHandle;

pub const DEFAULT_INIT_TIMEOUT: Duration = Duration::from_secs(60);

#[derive(Debug, Clone)]
struct LifecycleStatus {
    state: ExtractorState,
    demographics: bool,
    last_error: Option<String>,
}

pub struct ExtractorLifecycle {
    extractor: SharedExtractor,
    info: ExtractorInfo,
    sources: Vec<ModelSource>,
    attempt_timeout: Duration,
    status: Arc<RwLock<LifecycleStatus>>,
    /// Serializes attempts; waiters observe the outcome through `generation`
    attempt: tokio::sync::Mutex<()>,
    generation: Arc<AtomicU64>,
    demographics_task: Mutex<Option<JoinHandle<()>>>,
}

impl ExtractorLifecycle {
    pub fn new<E>(extractor: E, sources: Vec<ModelSource>, attempt_timeout: Duration) -> Self
    where
        E: FaceExtractor + 'static,
    {
        let info = extractor.info();
        telemetry::metrics::FACE_EXTRACTOR_STATE
            .with_label_values(&[&info.id])
            .set(0);

        Self {
            extractor: Arc::new(tokio::sync::RwLock::new(extractor)),
            info,
            sources,
            attempt_timeout,
            status: Arc::new(RwLock::new(LifecycleStatus {
                state: ExtractorState::Uninitialized,
                demographics: false,
                last_error: None,
            })),
            attempt: tokio::sync::Mutex::new(()),
            generation: Arc::new(AtomicU64::new(0)),
            demographics_task: Mutex::new(None),
        }
    }

    pub fn extractor(&self) -> SharedExtractor {
        self.extractor.clone()
    }

    pub fn info(&self) -> &ExtractorInfo {
        &self.info
    }

    pub fn state(&self) -> ExtractorState {
        self.read_status().state
    }

    pub fn is_ready(&self) -> bool {
        self.state() == ExtractorState::Ready
    }

    pub fn demographics_available(&self) -> bool {
        self.read_status().demographics
    }

    pub fn status(&self) -> ExtractorStatus {
        let status = self.read_status();
        ExtractorStatus {
            info: self.info.clone(),
            state: status.state,
            demographics: status.demographics,
            last_error: status.last_error,
        }
    }

    /// Make the extractor usable.
    ///
    /// Returns immediately when ready, waits for an attempt already in
    /// progress and reports its outcome, and otherwise runs a new attempt.
    pub async fn ensure_ready(&self) -> FaceResult<()> {
        if self.is_ready() {
            return Ok(());
        }

        let seen = self.generation.load(Ordering::SeqCst);
        let _attempt = self.attempt.lock().await;

        // Another caller finished an attempt while we waited
        if self.generation.load(Ordering::SeqCst) != seen || self.is_ready() {
            return self.outcome();
        }

        self.run_attempt().await
    }

    /// Ready and the extractor itself reports healthy
    pub async fn health_check(&self) -> bool {
        if !self.is_ready() {
            return false;
        }

        match self.extractor.read().await.health_check().await {
            Ok(healthy) => healthy,
            Err(e) => {
                tracing::warn!(extractor = %self.info.id, error = %e, "extractor health check failed");
                false
            }
        }
    }

    /// Explicit retry after a failure. Same as [`Self::ensure_ready`].
    pub async fn retry(&self) -> FaceResult<()> {
        tracing::info!(extractor = %self.info.id, state = ?self.state(), "extractor retry requested");
        self.ensure_ready().await
    }

    /// Not ready from the moment this is called; the extractor itself is
    /// released once in-flight detections finish.
    pub async fn shutdown(&self) {
        let _attempt = self.attempt.lock().await;
        self.set_status(ExtractorState::Uninitialized, false, None);
        self.generation.fetch_add(1, Ordering::SeqCst);
        self.abort_demographics();

        if let Err(e) = self.extractor.write().await.shutdown().await {
            tracing::error!(extractor = %self.info.id, error = %e, "error shutting down extractor");
        }
    }

    async fn run_attempt(&self) -> FaceResult<()> {
        self.abort_demographics();
        self.set_status(ExtractorState::Loading, false, None);

        if self.sources.is_empty() {
            return self.fail("no model sources configured".to_string());
        }

        let mut errors = Vec::new();
        for source in &self.sources {
            tracing::info!(extractor = %self.info.id, source = %source, "loading extractor models");

            let loaded = tokio::time::timeout(self.attempt_timeout, async {
                self.extractor.write().await.initialize(source).await
            })
            .await;

            let error = match loaded {
                Ok(Ok(())) => {
                    self.record_attempt("success");
                    self.set_status(ExtractorState::Ready, false, None);
                    let generation = self.generation.fetch_add(1, Ordering::SeqCst) + 1;
                    tracing::info!(extractor = %self.info.id, source = %source, "extractor ready");
                    self.spawn_demographics(source.clone(), generation);
                    return Ok(());
                }
                Ok(Err(e)) => {
                    self.record_attempt("failure");
                    format!("{}: {:#}", source, e)
                }
                Err(_) => {
                    self.record_attempt("timeout");
                    format!("{}: timed out after {:?}", source, self.attempt_timeout)
                }
            };

            tracing::warn!(extractor = %self.info.id, error = %error, "model source failed");
            errors.push(error);
        }

        self.fail(errors.join("; "))
    }

    /// Load the demographic sub-model without holding up readiness. The
    /// result only lands if no shutdown or new attempt happened meanwhile.
    fn spawn_demographics(&self, source: ModelSource, generation: u64) {
        let extractor = self.extractor.clone();
        let status = self.status.clone();
        let current = self.generation.clone();
        let extractor_id = self.info.id.clone();
        let timeout = self.attempt_timeout;

        let task = tokio::spawn(async move {
            let loaded = tokio::time::timeout(timeout, async {
                extractor.read().await.initialize_demographics(&source).await
            })
            .await;

            let available = match loaded {
                Ok(Ok(available)) => available,
                Ok(Err(e)) => {
                    tracing::warn!(extractor = %extractor_id, error = %e, "demographic model unavailable");
                    false
                }
                Err(_) => {
                    tracing::warn!(extractor = %extractor_id, "demographic model load timed out");
                    false
                }
            };

            let mut status = match status.write() {
                Ok(status) => status,
                Err(poisoned) => poisoned.into_inner(),
            };
            if current.load(Ordering::SeqCst) == generation && status.state == ExtractorState::Ready {
                status.demographics = available;
                if available {
                    tracing::info!(extractor = %extractor_id, "demographic model loaded");
                }
            }
        });

        if let Some(previous) = self.demographics_slot().replace(task) {
            previous.abort();
        }
    }

    fn abort_demographics(&self) {
        if let Some(task) = self.demographics_slot().take() {
            task.abort();
        }
    }

    fn demographics_slot(&self) -> std::sync::MutexGuard<'_, Option<JoinHandle<()>>> {
        match self.demographics_task.lock() {
            Ok(slot) => slot,
            Err(poisoned) => poisoned.into_inner(),
        }
    }

    fn fail(&self, message: String) -> FaceResult<()> {
        tracing::error!(extractor = %self.info.id, error = %message, "extractor initialization failed");
        self.set_status(ExtractorState::Failed, false, Some(message.clone()));
        self.generation.fetch_add(1, Ordering::SeqCst);
        Err(FaceError::InitializationFailed(message))
    }

    fn outcome(&self) -> FaceResult<()> {
        let status = self.read_status();
        match status.state {
            ExtractorState::Ready => Ok(()),
            _ => Err(FaceError::InitializationFailed(
                status
                    .last_error
                    .unwrap_or_else(|| "extractor not ready".to_string()),
            )),
        }
    }

    fn record_attempt(&self, status: &str) {
        telemetry::metrics::FACE_EXTRACTOR_INIT_ATTEMPTS
            .with_label_values(&[&self.info.id, status])
            .inc();
    }

    fn read_status(&self) -> LifecycleStatus {
        match self.status.read() {
            Ok(status) => status.clone(),
            Err(poisoned) => poisoned.into_inner().clone(),
        }
    }

    fn set_status(&self, state: ExtractorState, demographics: bool, last_error: Option<String>) {
        let mut status = match self.status.write() {
            Ok(status) => status,
            Err(poisoned) => poisoned.into_inner(),
        };
        *status = LifecycleStatus {
            state,
            demographics,
            last_error,
        };

        telemetry::metrics::FACE_EXTRACTOR_STATE
            .with_label_values(&[&self.info.id])
            .set(i64::from(state == ExtractorState::Ready));
    }
}

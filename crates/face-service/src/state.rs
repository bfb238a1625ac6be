use crate::analytics::{self, AnalyticsSummary};
use crate::error::{FaceError, FaceResult};
use crate::event_log::EventLog;
use crate::extractor::lifecycle::ExtractorLifecycle;
use crate::monitor::{self, FramePublisher, MonitorHandle};
use crate::pipeline::{RecognitionPipeline, TickOutcome};
use crate::profile::threshold::AcceptanceThreshold;
use crate::profile::{Committed, ProfileStore, DEFAULT_CONSISTENCY_TOLERANCE};
use common::face::{
    AddSampleRequest, ConsistencyRequest, ConsistencyResponse, EnrollRequest, ExtractMode,
    ExtractorStatus, Identity, IdentitySummary, MonitorStatus, RecognitionEvent,
    RecognizeResponse, VideoFrame,
};
use common::validation;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{Mutex, RwLock};
use tokio_util::sync::CancellationToken;
use tracing::info;
use uuid::Uuid;

/// Largest accepted consistency tolerance
pub const MAX_TOLERANCE: f32 = 2.0;

#[derive(Clone)]
pub struct FaceServiceState {
    inner: Arc<FaceServiceStateInner>,
}

struct FaceServiceStateInner {
    node_id: String,
    store: Arc<RwLock<ProfileStore>>,
    events: Arc<RwLock<EventLog>>,
    lifecycle: Arc<ExtractorLifecycle>,
    pipeline: RecognitionPipeline,
    publisher: FramePublisher,
    monitor: Mutex<Option<MonitorHandle>>,
}

fn invalid(e: anyhow::Error) -> FaceError {
    FaceError::InvalidInput(e.to_string())
}

impl FaceServiceState {
    pub fn new(node_id: String, store: ProfileStore, lifecycle: ExtractorLifecycle) -> Self {
        let store = Arc::new(RwLock::new(store));
        let events = Arc::new(RwLock::new(EventLog::new()));
        let lifecycle = Arc::new(lifecycle);
        let pipeline = RecognitionPipeline::new(store.clone(), events.clone(), lifecycle.clone());
        let (publisher, _) = monitor::latest_frame_channel();

        Self {
            inner: Arc::new(FaceServiceStateInner {
                node_id,
                store,
                events,
                lifecycle,
                pipeline,
                publisher,
                monitor: Mutex::new(None),
            }),
        }
    }

    pub fn node_id(&self) -> &str {
        &self.inner.node_id
    }

    pub fn pipeline(&self) -> &RecognitionPipeline {
        &self.inner.pipeline
    }

    pub fn lifecycle(&self) -> &Arc<ExtractorLifecycle> {
        &self.inner.lifecycle
    }

    // ==== Extractor ====

    pub fn is_ready(&self) -> bool {
        self.inner.lifecycle.is_ready()
    }

    pub async fn health_check(&self) -> bool {
        self.inner.lifecycle.health_check().await
    }

    pub fn extractor_status(&self) -> ExtractorStatus {
        self.inner.lifecycle.status()
    }

    /// Load the extractor models in the background
    pub fn spawn_extractor_init(&self) {
        let lifecycle = self.inner.lifecycle.clone();
        tokio::spawn(async move {
            if let Err(e) = lifecycle.ensure_ready().await {
                tracing::error!(error = %e, "extractor unavailable, recognition disabled until retry");
            }
        });
    }

    pub async fn retry_extractor(&self) -> FaceResult<ExtractorStatus> {
        self.inner.lifecycle.retry().await?;
        Ok(self.inner.lifecycle.status())
    }

    /// Strict single-face capture used for enrollment
    async fn capture_vector(&self, frame: &VideoFrame) -> FaceResult<Vec<f32>> {
        if !self.inner.lifecycle.is_ready() {
            return Err(FaceError::InitializationFailed(
                "extractor not ready".to_string(),
            ));
        }

        let extractor = self.inner.lifecycle.extractor();
        let guard = extractor.try_read().map_err(|_| {
            FaceError::InitializationFailed("extractor is reloading".to_string())
        })?;
        let face = guard
            .detect_single(frame, ExtractMode::Strict)
            .await
            .map_err(|e| FaceError::ExtractionFailed(format!("{:#}", e)))?;

        face.map(|f| f.vector).ok_or(FaceError::NoFaceDetected)
    }

    /// Vector supplied directly or captured from a frame
    async fn sample_vector(
        &self,
        vector: Option<Vec<f32>>,
        frame: Option<&VideoFrame>,
    ) -> FaceResult<Option<Vec<f32>>> {
        match (vector, frame) {
            (Some(vector), _) => {
                validation::validate_vector(&vector, "vector").map_err(invalid)?;
                Ok(Some(vector))
            }
            (None, Some(frame)) => self.capture_vector(frame).await.map(Some),
            (None, None) => Ok(None),
        }
    }

    // ==== Identities ====

    pub async fn list_identities(&self) -> Vec<IdentitySummary> {
        let store = self.inner.store.read().await;
        store.snapshot().iter().map(Identity::summary).collect()
    }

    pub async fn get_identity(&self, id: Uuid) -> FaceResult<Identity> {
        let store = self.inner.store.read().await;
        store.get(id).cloned().ok_or(FaceError::NotFound(id))
    }

    pub async fn identity_count(&self) -> usize {
        self.inner.store.read().await.len()
    }

    pub async fn enroll(&self, request: EnrollRequest) -> FaceResult<Committed<Identity>> {
        validation::validate_name(&request.name, "name").map_err(invalid)?;
        validation::validate_thumbnail(&request.thumbnail).map_err(invalid)?;

        let vector = self
            .sample_vector(request.vector, request.frame.as_ref())
            .await?;

        let staged = self
            .inner
            .store
            .write()
            .await
            .enroll(request.name, request.thumbnail, vector)?;
        Ok(staged.commit_blocking().await)
    }

    pub async fn rename(&self, id: Uuid, name: String) -> FaceResult<Committed<Identity>> {
        validation::validate_name(&name, "name").map_err(invalid)?;
        let staged = self.inner.store.write().await.rename(id, name)?;
        Ok(staged.commit_blocking().await)
    }

    pub async fn delete_identity(&self, id: Uuid) -> FaceResult<Committed<Identity>> {
        let staged = self.inner.store.write().await.delete(id)?;
        Ok(staged.commit_blocking().await)
    }

    pub async fn add_sample(
        &self,
        id: Uuid,
        request: AddSampleRequest,
    ) -> FaceResult<Committed<Identity>> {
        validation::validate_thumbnail(&request.thumbnail).map_err(invalid)?;
        let tolerance = self.tolerance(request.tolerance)?;

        // Unknown ids are rejected before any extraction runs
        if self.inner.store.read().await.get(id).is_none() {
            return Err(FaceError::NotFound(id));
        }

        let vector = self
            .sample_vector(request.vector, request.frame.as_ref())
            .await?
            .ok_or_else(|| FaceError::InvalidInput("a vector or frame is required".to_string()))?;

        let staged = {
            let mut store = self.inner.store.write().await;
            if request.enforce_consistency && !store.sample_consistency(id, &vector, tolerance)? {
                tracing::info!(identity_id = %id, tolerance, "rejected inconsistent sample");
                return Err(FaceError::InconsistentSample(id));
            }
            store.add_sample(id, request.thumbnail, vector)?
        };
        Ok(staged.commit_blocking().await)
    }

    pub async fn remove_sample(&self, id: Uuid, index: usize) -> FaceResult<Committed<Identity>> {
        let staged = self.inner.store.write().await.remove_sample(id, index)?;
        Ok(staged.commit_blocking().await)
    }

    pub async fn check_consistency(
        &self,
        id: Uuid,
        request: ConsistencyRequest,
    ) -> FaceResult<ConsistencyResponse> {
        validation::validate_vector(&request.vector, "vector").map_err(invalid)?;
        let tolerance = self.tolerance(request.tolerance)?;

        let consistent = self
            .inner
            .store
            .read()
            .await
            .sample_consistency(id, &request.vector, tolerance)?;

        Ok(ConsistencyResponse {
            consistent,
            tolerance,
        })
    }

    fn tolerance(&self, requested: Option<f32>) -> FaceResult<f32> {
        let tolerance = requested.unwrap_or(DEFAULT_CONSISTENCY_TOLERANCE);
        if !tolerance.is_finite() || tolerance <= 0.0 {
            return Err(FaceError::InvalidInput(
                "tolerance must be a positive number".to_string(),
            ));
        }
        validation::validate_range(tolerance, 0.0, MAX_TOLERANCE, "tolerance").map_err(invalid)?;
        Ok(tolerance)
    }

    // ==== Threshold ====

    pub async fn threshold(&self) -> AcceptanceThreshold {
        self.inner.store.read().await.threshold()
    }

    pub async fn set_threshold(&self, value: f32) -> FaceResult<Committed<AcceptanceThreshold>> {
        let threshold = AcceptanceThreshold::new(value)?;
        let staged = self.inner.store.write().await.set_threshold(threshold);
        Ok(staged.commit_blocking().await)
    }

    // ==== Recognition ====

    /// Run one recognition tick on `frame`
    pub async fn recognize(&self, frame: VideoFrame) -> FaceResult<RecognizeResponse> {
        self.inner.pipeline.record_frame();

        match self.inner.pipeline.tick(&frame).await {
            TickOutcome::NotReady => Err(FaceError::InitializationFailed(
                "extractor not ready".to_string(),
            )),
            TickOutcome::Skipped => Ok(RecognizeResponse {
                skipped: true,
                results: Vec::new(),
                events_recorded: 0,
                processing_time_ms: None,
            }),
            TickOutcome::Completed(report) => Ok(RecognizeResponse {
                skipped: false,
                results: report.results,
                events_recorded: report.events_recorded,
                processing_time_ms: Some(report.processing_time_ms),
            }),
        }
    }

    /// Hand a frame to the monitor loop, replacing any frame still waiting
    pub fn publish_frame(&self, frame: VideoFrame) {
        self.inner.publisher.publish(frame);
    }

    /// Start the monitor loop; no-op when it is already running
    pub async fn start_monitor(&self, tick_interval: Duration) {
        let mut monitor = self.inner.monitor.lock().await;
        if monitor.as_ref().is_some_and(MonitorHandle::is_running) {
            return;
        }

        *monitor = Some(monitor::start_monitor(
            self.inner.pipeline.clone(),
            self.inner.publisher.subscribe(),
            tick_interval,
            CancellationToken::new(),
        ));
    }

    pub async fn stop_monitor(&self) {
        if let Some(handle) = self.inner.monitor.lock().await.take() {
            handle.stop().await;
        }
    }

    pub async fn monitor_status(&self) -> MonitorStatus {
        let running = self
            .inner
            .monitor
            .lock()
            .await
            .as_ref()
            .is_some_and(MonitorHandle::is_running);
        let pipeline = &self.inner.pipeline;

        MonitorStatus {
            running,
            busy: pipeline.is_busy(),
            fps: pipeline.fps(),
            frames_processed: pipeline.frames_processed(),
            frames_skipped: pipeline.frames_skipped(),
        }
    }

    // ==== Events ====

    pub async fn events(&self) -> Vec<RecognitionEvent> {
        self.inner.events.read().await.events()
    }

    pub async fn recent_events(&self) -> Vec<RecognitionEvent> {
        self.inner.events.read().await.recent()
    }

    pub async fn analytics(&self) -> AnalyticsSummary {
        let identity_count = self.identity_count().await;
        let events = self.inner.events.read().await;
        analytics::summarize(events.iter(), identity_count)
    }

    pub async fn shutdown(&self) -> anyhow::Result<()> {
        info!(node_id = %self.inner.node_id, "shutting down face service");
        self.stop_monitor().await;
        self.inner.lifecycle.shutdown().await;
        Ok(())
    }
}

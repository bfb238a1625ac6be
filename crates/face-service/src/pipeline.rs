//! Per-frame recognition: extract, match, score, emit.

use crate::event_log::{AppendOutcome, EventLog};
use crate::extractor::lifecycle::ExtractorLifecycle;
use crate::matcher::{score, MatcherIndex};
use crate::profile::ProfileStore;
use common::face::{
    DetectedFace, DetectionResult, ExtractMode, RecognitionEvent, VideoFrame, UNKNOWN_LABEL,
};
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::{Arc, Mutex};
use std::time::{Duration, Instant};
use tokio::sync::RwLock;

/// Results at or below this confidence are only logged when identified
pub const EMIT_CONFIDENCE: u8 = 50;

/// FPS counter window
pub const FPS_WINDOW: Duration = Duration::from_millis(1000);

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PipelineState {
    Idle,
    ExtractingAndMatching,
}

#[derive(Debug, Clone, PartialEq)]
pub struct TickReport {
    pub results: Vec<DetectionResult>,
    pub events_recorded: usize,
    pub processing_time_ms: u64,
}

#[derive(Debug, Clone, PartialEq)]
pub enum TickOutcome {
    /// A previous frame was still in flight; this one was dropped
    Skipped,
    /// The extractor is not ready
    NotReady,
    Completed(TickReport),
}

/// Frames seen per wall-clock second, independent of extraction
#[derive(Debug)]
pub struct FpsCounter {
    window_start: Instant,
    frames: u32,
    fps: u32,
}

impl FpsCounter {
    pub fn new(now: Instant) -> Self {
        Self {
            window_start: now,
            frames: 0,
            fps: 0,
        }
    }

    pub fn record(&mut self, now: Instant) {
        if now.duration_since(self.window_start) >= FPS_WINDOW {
            self.fps = self.frames;
            self.frames = 0;
            self.window_start = now;
        }
        self.frames += 1;
    }

    /// Frame count of the last completed window
    pub fn fps(&self) -> u32 {
        self.fps
    }
}

/// Whether a result makes it into the event log
pub fn should_emit(result: &DetectionResult) -> bool {
    result.identified || result.confidence > EMIT_CONFIDENCE
}

/// Exclusive right to run one extraction. Dropping it returns the pipeline
/// to idle, including on early returns.
pub struct TickPermit {
    inner: Arc<PipelineInner>,
}

impl Drop for TickPermit {
    fn drop(&mut self) {
        self.inner.in_flight.store(false, Ordering::Release);
    }
}

#[derive(Clone)]
pub struct RecognitionPipeline {
    inner: Arc<PipelineInner>,
}

struct PipelineInner {
    store: Arc<RwLock<ProfileStore>>,
    events: Arc<RwLock<EventLog>>,
    lifecycle: Arc<ExtractorLifecycle>,
    matcher: Mutex<MatcherIndex>,
    in_flight: AtomicBool,
    fps: Mutex<FpsCounter>,
    frames_processed: AtomicU64,
    frames_skipped: AtomicU64,
}

impl RecognitionPipeline {
    pub fn new(
        store: Arc<RwLock<ProfileStore>>,
        events: Arc<RwLock<EventLog>>,
        lifecycle: Arc<ExtractorLifecycle>,
    ) -> Self {
        Self {
            inner: Arc::new(PipelineInner {
                store,
                events,
                lifecycle,
                matcher: Mutex::new(MatcherIndex::new()),
                in_flight: AtomicBool::new(false),
                fps: Mutex::new(FpsCounter::new(Instant::now())),
                frames_processed: AtomicU64::new(0),
                frames_skipped: AtomicU64::new(0),
            }),
        }
    }

    pub fn state(&self) -> PipelineState {
        if self.inner.in_flight.load(Ordering::Acquire) {
            PipelineState::ExtractingAndMatching
        } else {
            PipelineState::Idle
        }
    }

    pub fn is_busy(&self) -> bool {
        self.state() == PipelineState::ExtractingAndMatching
    }

    pub fn is_ready(&self) -> bool {
        self.inner.lifecycle.is_ready()
    }

    pub fn frames_processed(&self) -> u64 {
        self.inner.frames_processed.load(Ordering::Relaxed)
    }

    pub fn frames_skipped(&self) -> u64 {
        self.inner.frames_skipped.load(Ordering::Relaxed)
    }

    pub fn rebuild_count(&self) -> u64 {
        self.inner
            .matcher
            .lock()
            .map(|m| m.rebuild_count())
            .unwrap_or(0)
    }

    /// Count a delivered frame for FPS telemetry
    pub fn record_frame(&self) {
        if let Ok(mut fps) = self.inner.fps.lock() {
            let previous = fps.fps();
            fps.record(Instant::now());
            if fps.fps() != previous {
                telemetry::metrics::FACE_PIPELINE_FPS.set(i64::from(fps.fps()));
            }
        }
    }

    pub fn fps(&self) -> u32 {
        self.inner.fps.lock().map(|f| f.fps()).unwrap_or(0)
    }

    /// Claim the pipeline for one tick; `None` while another tick is in flight
    pub fn try_begin(&self) -> Option<TickPermit> {
        match self.inner.in_flight.compare_exchange(
            false,
            true,
            Ordering::AcqRel,
            Ordering::Acquire,
        ) {
            Ok(_) => Some(TickPermit {
                inner: self.inner.clone(),
            }),
            Err(_) => {
                self.inner.frames_skipped.fetch_add(1, Ordering::Relaxed);
                telemetry::metrics::FACE_FRAMES_SKIPPED.inc();
                None
            }
        }
    }

    /// Run one tick on `frame`, dropping it if a tick is already in flight
    pub async fn tick(&self, frame: &VideoFrame) -> TickOutcome {
        if !self.is_ready() {
            return TickOutcome::NotReady;
        }
        match self.try_begin() {
            Some(permit) => TickOutcome::Completed(self.run(permit, frame).await),
            None => TickOutcome::Skipped,
        }
    }

    /// Run a tick under an already acquired permit
    pub async fn run(&self, permit: TickPermit, frame: &VideoFrame) -> TickReport {
        let start = Instant::now();

        let faces = self.extract(frame).await;
        let results = if faces.is_empty() {
            Vec::new()
        } else {
            self.match_faces(&faces, frame).await
        };

        let events_recorded = self.emit(&results, frame).await;
        self.inner.frames_processed.fetch_add(1, Ordering::Relaxed);
        drop(permit);

        TickReport {
            results,
            events_recorded,
            processing_time_ms: start.elapsed().as_millis() as u64,
        }
    }

    /// Loose extraction. Failures count as a frame without faces.
    ///
    /// Detection shares the extractor with other readers. A reload or
    /// shutdown that holds or is queued for exclusive access drops the frame
    /// instead of parking the tick behind it.
    async fn extract(&self, frame: &VideoFrame) -> Vec<DetectedFace> {
        let extractor_id = self.inner.lifecycle.info().id.clone();
        let extractor = self.inner.lifecycle.extractor();

        let guard = match extractor.try_read() {
            Ok(guard) => guard,
            Err(_) => {
                telemetry::metrics::FACE_FRAMES_PROCESSED
                    .with_label_values(&[&extractor_id, "busy"])
                    .inc();
                tracing::debug!(
                    source_id = %frame.source_id,
                    sequence = frame.sequence,
                    "extractor busy reloading, dropping frame"
                );
                return Vec::new();
            }
        };

        let start = Instant::now();
        let detected = guard.detect(frame, ExtractMode::Loose).await;
        drop(guard);
        telemetry::metrics::FACE_EXTRACTION_LATENCY
            .with_label_values(&[&extractor_id, "loose"])
            .observe(start.elapsed().as_secs_f64());

        match detected {
            Ok(faces) => {
                telemetry::metrics::FACE_FRAMES_PROCESSED
                    .with_label_values(&[&extractor_id, "success"])
                    .inc();
                faces
            }
            Err(e) => {
                telemetry::metrics::FACE_FRAMES_PROCESSED
                    .with_label_values(&[&extractor_id, "error"])
                    .inc();
                tracing::warn!(
                    source_id = %frame.source_id,
                    sequence = frame.sequence,
                    error = %e,
                    "extraction failed, treating frame as empty"
                );
                Vec::new()
            }
        }
    }

    /// Score every face against the latest store state
    async fn match_faces(&self, faces: &[DetectedFace], frame: &VideoFrame) -> Vec<DetectionResult> {
        let store = self.inner.store.read().await;
        let threshold = store.threshold();

        let mut matcher = match self.inner.matcher.lock() {
            Ok(matcher) => matcher,
            Err(poisoned) => poisoned.into_inner(),
        };
        let snapshot = matcher.ensure_fresh(store.snapshot(), threshold);
        let dimension = store.dimension();

        faces
            .iter()
            .filter(|face| match dimension {
                Some(expected) if face.vector.len() != expected => {
                    telemetry::metrics::FACE_DETECTIONS
                        .with_label_values(&["dimension_mismatch"])
                        .inc();
                    tracing::warn!(
                        source_id = %frame.source_id,
                        sequence = frame.sequence,
                        expected,
                        actual = face.vector.len(),
                        "dropping face with mismatched vector dimension"
                    );
                    false
                }
                _ => true,
            })
            .map(|face| {
                let best = snapshot.resolve_best_match(&face.vector);
                let (identified, confidence, identity_id) = match best {
                    Some(m) => {
                        let s = score(m.distance, threshold);
                        (s.identified, s.confidence, s.identified.then_some(m.identity_id))
                    }
                    None => (false, 0, None),
                };

                // Names are resolved now so renames show up immediately
                let identity_name = identity_id
                    .and_then(|id| store.get(id))
                    .map(|identity| identity.name.clone())
                    .unwrap_or_else(|| UNKNOWN_LABEL.to_string());

                let decision = if identified { "identified" } else { "unknown" };
                telemetry::metrics::FACE_DETECTIONS
                    .with_label_values(&[decision])
                    .inc();

                DetectionResult {
                    identified,
                    identity_id,
                    identity_name,
                    confidence,
                    bbox: face.bbox.normalize(frame.width, frame.height),
                    demographics: face.demographics.clone(),
                }
            })
            .collect()
    }

    async fn emit(&self, results: &[DetectionResult], frame: &VideoFrame) -> usize {
        let emitted: Vec<&DetectionResult> = results.iter().filter(|r| should_emit(r)).collect();
        if emitted.is_empty() {
            return 0;
        }

        let timestamp = if frame.timestamp > 0 {
            frame.timestamp
        } else {
            common::validation::safe_unix_timestamp_ms()
        };

        let mut events = self.inner.events.write().await;
        emitted
            .into_iter()
            .map(|r| events.append(RecognitionEvent::from_result(r, timestamp)))
            .filter(|outcome| *outcome == AppendOutcome::Recorded)
            .count()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::extractor::lifecycle::DEFAULT_INIT_TIMEOUT;
    use crate::extractor::mock::{scripted_frame, MockExtractorConfig, MockFaceExtractor};
    use crate::extractor::ModelSource;
    use crate::profile::persist::MemoryRepository;
    use common::face::{FaceBox, NormalizedBox};

    fn face(vector: Vec<f32>) -> DetectedFace {
        DetectedFace {
            bbox: FaceBox {
                x: 64.0,
                y: 48.0,
                width: 128.0,
                height: 96.0,
            },
            score: 0.9,
            vector,
            demographics: None,
        }
    }

    struct Fixture {
        pipeline: RecognitionPipeline,
        store: Arc<RwLock<ProfileStore>>,
        events: Arc<RwLock<EventLog>>,
    }

    async fn fixture(config: MockExtractorConfig) -> Fixture {
        let store = Arc::new(RwLock::new(ProfileStore::new(Arc::new(
            MemoryRepository::new(),
        ))));
        let events = Arc::new(RwLock::new(EventLog::new()));
        let lifecycle = Arc::new(ExtractorLifecycle::new(
            MockFaceExtractor::with_config(config),
            vec![ModelSource::new("local")],
            DEFAULT_INIT_TIMEOUT,
        ));
        lifecycle.ensure_ready().await.unwrap();

        Fixture {
            pipeline: RecognitionPipeline::new(store.clone(), events.clone(), lifecycle),
            store,
            events,
        }
    }

    fn frame(timestamp: u64, faces: &[DetectedFace]) -> VideoFrame {
        let mut frame = scripted_frame("cam-1", timestamp, 640, 480, faces).unwrap();
        frame.timestamp = timestamp;
        frame
    }

    fn completed(outcome: TickOutcome) -> TickReport {
        match outcome {
            TickOutcome::Completed(report) => report,
            other => panic!("expected completed tick, got {:?}", other),
        }
    }

    #[test]
    fn test_fps_counter_rollover() {
        let start = Instant::now();
        let mut counter = FpsCounter::new(start);
        for i in 0..30 {
            counter.record(start + Duration::from_millis(i * 30));
        }
        assert_eq!(counter.fps(), 0);

        counter.record(start + Duration::from_millis(1000));
        assert_eq!(counter.fps(), 30);

        // Idle second: the next window reports the single frame seen
        counter.record(start + Duration::from_millis(2500));
        assert_eq!(counter.fps(), 1);
    }

    #[test]
    fn test_emission_filter() {
        let mut result = DetectionResult {
            identified: false,
            identity_id: None,
            identity_name: UNKNOWN_LABEL.to_string(),
            confidence: 50,
            bbox: NormalizedBox {
                ymin: 0.0,
                xmin: 0.0,
                ymax: 1.0,
                xmax: 1.0,
            },
            demographics: None,
        };
        assert!(!should_emit(&result));

        result.confidence = 51;
        assert!(should_emit(&result));

        result.confidence = 10;
        result.identified = true;
        assert!(should_emit(&result));
    }

    #[tokio::test]
    async fn test_identifies_enrolled_face() {
        let fx = fixture(MockExtractorConfig::default()).await;
        let alice = fx
            .store
            .write()
            .await
            .enroll("Alice".to_string(), String::new(), Some(vec![0.0, 0.0, 0.0]))
            .unwrap()
            .value;

        let report = completed(
            fx.pipeline
                .tick(&frame(10_000, &[face(vec![0.2, 0.0, 0.0]), face(vec![0.0, 0.7, 0.0])]))
                .await,
        );

        assert_eq!(report.results.len(), 2);
        let near = &report.results[0];
        assert!(near.identified);
        assert_eq!(near.identity_id, Some(alice.id));
        assert_eq!(near.identity_name, "Alice");
        assert_eq!(near.confidence, 64);
        assert!((near.bbox.xmin - 100.0).abs() < 1e-3);
        assert!((near.bbox.ymax - 300.0).abs() < 1e-3);

        let far = &report.results[1];
        assert!(!far.identified);
        assert_eq!(far.identity_name, UNKNOWN_LABEL);
        assert_eq!(far.confidence, 30);

        // Only the identified face clears the emission filter
        assert_eq!(report.events_recorded, 1);
        assert_eq!(fx.events.read().await.len(), 1);
    }

    #[tokio::test]
    async fn test_face_of_other_dimension_is_dropped() {
        let fx = fixture(MockExtractorConfig::default()).await;
        fx.store
            .write()
            .await
            .enroll("Alice".to_string(), String::new(), Some(vec![0.0, 5.0, 5.0]))
            .unwrap()
            .commit();

        let report = completed(
            fx.pipeline
                .tick(&frame(10_000, &[face(vec![0.0]), face(vec![0.0, 5.0, 5.0])]))
                .await,
        );

        // Only the 3-d face is scored; the 1-d one never reaches the matcher
        assert_eq!(report.results.len(), 1);
        assert!(report.results[0].identified);
        assert_eq!(report.results[0].identity_name, "Alice");

        let report = completed(fx.pipeline.tick(&frame(20_000, &[face(vec![0.0])])).await);
        assert!(report.results.is_empty());
        assert_eq!(report.events_recorded, 0);
        assert_eq!(fx.events.read().await.len(), 1);
    }

    #[tokio::test]
    async fn test_tick_does_not_wait_for_exclusive_extractor() {
        let fx = fixture(MockExtractorConfig::default()).await;
        fx.store
            .write()
            .await
            .enroll("Alice".to_string(), String::new(), Some(vec![0.0, 0.0, 0.0]))
            .unwrap()
            .commit();

        let extractor = fx.pipeline.inner.lifecycle.extractor();
        let exclusive = extractor.write().await;

        let outcome = tokio::time::timeout(
            Duration::from_millis(200),
            fx.pipeline.tick(&frame(10_000, &[face(vec![0.0, 0.0, 0.0])])),
        )
        .await
        .expect("tick must not queue behind a reload");
        let report = completed(outcome);
        assert!(report.results.is_empty());
        assert_eq!(fx.pipeline.state(), PipelineState::Idle);

        drop(exclusive);
        let report = completed(
            fx.pipeline
                .tick(&frame(20_000, &[face(vec![0.0, 0.0, 0.0])]))
                .await,
        );
        assert!(report.results[0].identified);
    }

    #[tokio::test]
    async fn test_empty_store_reports_unknown() {
        let fx = fixture(MockExtractorConfig::default()).await;
        let report = completed(fx.pipeline.tick(&frame(1, &[face(vec![0.1, 0.2])])).await);

        assert_eq!(report.results.len(), 1);
        assert!(!report.results[0].identified);
        assert_eq!(report.results[0].confidence, 0);
        assert_eq!(report.events_recorded, 0);
    }

    #[tokio::test]
    async fn test_rename_is_visible_without_rebuild() {
        let fx = fixture(MockExtractorConfig::default()).await;
        let id = fx
            .store
            .write()
            .await
            .enroll("Alice".to_string(), String::new(), Some(vec![0.0, 0.0]))
            .unwrap()
            .value
            .id;

        fx.pipeline.tick(&frame(1, &[face(vec![0.0, 0.0])])).await;
        fx.store
            .write()
            .await
            .rename(id, "Alicia".to_string())
            .unwrap()
            .commit();

        let report = completed(fx.pipeline.tick(&frame(2, &[face(vec![0.0, 0.0])])).await);
        assert_eq!(report.results[0].identity_name, "Alicia");
        assert_eq!(fx.pipeline.rebuild_count(), 1);
    }

    #[tokio::test]
    async fn test_store_mutations_rebuild_index() {
        let fx = fixture(MockExtractorConfig::default()).await;
        let id = fx
            .store
            .write()
            .await
            .enroll("Alice".to_string(), String::new(), Some(vec![0.0, 0.0]))
            .unwrap()
            .value
            .id;

        let repeat_frame = || frame(1, &[face(vec![0.0, 0.0])]);
        fx.pipeline.tick(&repeat_frame()).await;
        fx.pipeline.tick(&repeat_frame()).await;
        assert_eq!(fx.pipeline.rebuild_count(), 1);

        // Losing the last sample drops the identity from the index
        fx.store.write().await.remove_sample(id, 0).unwrap().commit();
        let report = completed(fx.pipeline.tick(&repeat_frame()).await);
        assert_eq!(fx.pipeline.rebuild_count(), 2);
        assert!(!report.results[0].identified);
        assert_eq!(fx.store.read().await.len(), 1);
    }

    #[tokio::test]
    async fn test_single_flight_skips_concurrent_tick() {
        let fx = fixture(MockExtractorConfig {
            simulated_delay_ms: 100,
            ..Default::default()
        })
        .await;

        let f = frame(1, &[face(vec![0.0])]);
        let (first, second) = tokio::join!(fx.pipeline.tick(&f), async {
            tokio::time::sleep(Duration::from_millis(20)).await;
            fx.pipeline.tick(&f).await
        });

        assert!(matches!(first, TickOutcome::Completed(_)));
        assert_eq!(second, TickOutcome::Skipped);
        assert_eq!(fx.pipeline.frames_skipped(), 1);
        assert_eq!(fx.pipeline.state(), PipelineState::Idle);
    }

    #[tokio::test]
    async fn test_extraction_failure_is_empty_frame() {
        let fx = fixture(MockExtractorConfig {
            fail_detection: true,
            ..Default::default()
        })
        .await;

        let report = completed(fx.pipeline.tick(&frame(1, &[face(vec![0.0])])).await);
        assert!(report.results.is_empty());
        assert_eq!(fx.pipeline.state(), PipelineState::Idle);
        assert_eq!(fx.pipeline.frames_processed(), 1);
    }

    #[tokio::test]
    async fn test_not_ready_extractor() {
        let store = Arc::new(RwLock::new(ProfileStore::new(Arc::new(
            MemoryRepository::new(),
        ))));
        let lifecycle = Arc::new(ExtractorLifecycle::new(
            MockFaceExtractor::new(),
            vec![ModelSource::new("local")],
            DEFAULT_INIT_TIMEOUT,
        ));
        let pipeline =
            RecognitionPipeline::new(store, Arc::new(RwLock::new(EventLog::new())), lifecycle);

        assert_eq!(pipeline.tick(&frame(1, &[])).await, TickOutcome::NotReady);
    }

    #[tokio::test]
    async fn test_repeated_detections_are_debounced() {
        let fx = fixture(MockExtractorConfig::default()).await;
        fx.store
            .write()
            .await
            .enroll("Alice".to_string(), String::new(), Some(vec![0.0]))
            .unwrap()
            .commit();

        let hit = |ts| frame(ts, &[face(vec![0.05])]);
        assert_eq!(completed(fx.pipeline.tick(&hit(10_000)).await).events_recorded, 1);
        assert_eq!(completed(fx.pipeline.tick(&hit(11_000)).await).events_recorded, 0);
        assert_eq!(completed(fx.pipeline.tick(&hit(12_000)).await).events_recorded, 1);
        assert_eq!(fx.events.read().await.len(), 2);
    }
}

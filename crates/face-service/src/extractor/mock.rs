/// Scripted face extractor for tests and model-free deployments
use super::{FaceExtractor, ModelSource};
use anyhow::{anyhow, Result};
use async_trait::async_trait;
use base64::Engine;
use common::face::{DetectedFace, ExtractMode, VideoFrame};
use serde::{Deserialize, Serialize};
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::Arc;

/// Frame format understood by [`MockFaceExtractor`]: base64 JSON list of faces
pub const SCRIPTED_FORMAT: &str = "faces+json";

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct MockExtractorConfig {
    /// Faces returned for frames that do not carry their own script
    #[serde(default)]
    pub faces: Vec<DetectedFace>,

    /// Simulate processing delay in milliseconds
    #[serde(default)]
    pub simulated_delay_ms: u64,

    /// Simulate model loading time in milliseconds
    #[serde(default)]
    pub init_delay_ms: u64,

    /// Model sources that refuse to load
    #[serde(default)]
    pub failing_sources: Vec<String>,

    /// Number of initialization calls that fail before loading succeeds
    #[serde(default)]
    pub fail_first_inits: usize,

    /// Whether the demographic sub-model exists
    #[serde(default)]
    pub demographics: bool,

    /// Whether loading the demographic sub-model fails
    #[serde(default)]
    pub fail_demographics: bool,

    /// Simulate demographic model loading time in milliseconds
    #[serde(default)]
    pub demographics_delay_ms: u64,

    /// Every detection call errors
    #[serde(default)]
    pub fail_detection: bool,
}

/// Call counters shared with whoever built the extractor
#[derive(Debug, Default)]
pub struct MockStats {
    init_calls: AtomicUsize,
    detect_calls: AtomicUsize,
}

impl MockStats {
    pub fn init_calls(&self) -> usize {
        self.init_calls.load(Ordering::SeqCst)
    }

    pub fn detect_calls(&self) -> usize {
        self.detect_calls.load(Ordering::SeqCst)
    }
}

pub struct MockFaceExtractor {
    config: MockExtractorConfig,
    initialized: bool,
    demographics_ready: AtomicBool,
    stats: Arc<MockStats>,
}

impl MockFaceExtractor {
    pub fn new() -> Self {
        Self::with_config(MockExtractorConfig::default())
    }

    pub fn with_config(config: MockExtractorConfig) -> Self {
        Self {
            config,
            initialized: false,
            demographics_ready: AtomicBool::new(false),
            stats: Arc::new(MockStats::default()),
        }
    }

    pub fn stats(&self) -> Arc<MockStats> {
        self.stats.clone()
    }

    /// Faces scripted into the frame itself, if it carries any
    fn scripted_faces(frame: &VideoFrame) -> Option<Vec<DetectedFace>> {
        if frame.format != SCRIPTED_FORMAT {
            return None;
        }
        let bytes = base64::prelude::BASE64_STANDARD.decode(&frame.data).ok()?;
        serde_json::from_slice(&bytes).ok()
    }
}

impl Default for MockFaceExtractor {
    fn default() -> Self {
        Self::new()
    }
}

/// Build a frame that makes [`MockFaceExtractor`] report exactly `faces`
pub fn scripted_frame(
    source_id: &str,
    sequence: u64,
    width: u32,
    height: u32,
    faces: &[DetectedFace],
) -> Result<VideoFrame> {
    let json = serde_json::to_vec(faces)?;
    Ok(VideoFrame {
        source_id: source_id.to_string(),
        timestamp: common::validation::safe_unix_timestamp_ms(),
        sequence,
        width,
        height,
        format: SCRIPTED_FORMAT.to_string(),
        data: base64::prelude::BASE64_STANDARD.encode(json),
    })
}

#[async_trait]
impl FaceExtractor for MockFaceExtractor {
    fn id(&self) -> &'static str {
        "mock_face"
    }

    fn name(&self) -> &'static str {
        "Mock Face Extractor"
    }

    fn description(&self) -> &'static str {
        "Returns scripted faces for testing and demonstration"
    }

    fn version(&self) -> &'static str {
        "1.0.0"
    }

    fn config_schema(&self) -> Option<serde_json::Value> {
        Some(serde_json::json!({
            "type": "object",
            "properties": {
                "faces": {
                    "type": "array",
                    "description": "Faces returned for unscripted frames"
                },
                "simulated_delay_ms": {
                    "type": "integer",
                    "minimum": 0,
                    "default": 0,
                    "description": "Simulated processing delay in milliseconds"
                },
                "init_delay_ms": {
                    "type": "integer",
                    "minimum": 0,
                    "default": 0,
                    "description": "Simulated model loading time in milliseconds"
                },
                "demographics": {
                    "type": "boolean",
                    "default": false,
                    "description": "Report age, gender and expression"
                }
            }
        }))
    }

    fn supported_formats(&self) -> Vec<String> {
        vec![SCRIPTED_FORMAT.to_string(), "jpeg".to_string()]
    }

    async fn initialize(&mut self, source: &ModelSource) -> Result<()> {
        let call = self.stats.init_calls.fetch_add(1, Ordering::SeqCst);

        if self.config.init_delay_ms > 0 {
            tokio::time::sleep(tokio::time::Duration::from_millis(
                self.config.init_delay_ms,
            ))
            .await;
        }

        if self.config.failing_sources.iter().any(|s| s == source.as_str()) {
            return Err(anyhow!("model source {} unreachable", source));
        }
        if call < self.config.fail_first_inits {
            return Err(anyhow!("model download from {} interrupted", source));
        }

        self.initialized = true;
        tracing::info!(source = %source, "initialized mock face extractor");
        Ok(())
    }

    async fn initialize_demographics(&self, source: &ModelSource) -> Result<bool> {
        if !self.config.demographics {
            return Ok(false);
        }

        if self.config.demographics_delay_ms > 0 {
            tokio::time::sleep(tokio::time::Duration::from_millis(
                self.config.demographics_delay_ms,
            ))
            .await;
        }

        if self.config.fail_demographics {
            return Err(anyhow!("demographic model missing from {}", source));
        }
        self.demographics_ready.store(true, Ordering::SeqCst);
        Ok(true)
    }

    async fn detect(&self, frame: &VideoFrame, mode: ExtractMode) -> Result<Vec<DetectedFace>> {
        self.stats.detect_calls.fetch_add(1, Ordering::SeqCst);

        if !self.initialized {
            return Err(anyhow!("mock extractor not initialized"));
        }

        if self.config.simulated_delay_ms > 0 {
            tokio::time::sleep(tokio::time::Duration::from_millis(
                self.config.simulated_delay_ms,
            ))
            .await;
        }

        if self.config.fail_detection {
            return Err(anyhow!("simulated detection failure"));
        }

        let faces = Self::scripted_faces(frame).unwrap_or_else(|| self.config.faces.clone());
        let min_score = mode.min_score();
        let demographics_ready = self.demographics_ready.load(Ordering::SeqCst);

        Ok(faces
            .into_iter()
            .filter(|f| f.score >= min_score)
            .map(|mut f| {
                if !demographics_ready {
                    f.demographics = None;
                }
                f
            })
            .collect())
    }

    async fn health_check(&self) -> Result<bool> {
        Ok(self.initialized)
    }

    async fn shutdown(&mut self) -> Result<()> {
        tracing::info!("shutting down mock face extractor");
        self.initialized = false;
        self.demographics_ready.store(false, Ordering::SeqCst);
        Ok(())
    }
}

pub mod lifecycle;
pub mod mock;
pub mod onnx;

use anyhow::Result;
use async_trait::async_trait;
use common::face::{DetectedFace, ExtractMode, ExtractorInfo, VideoFrame};
use std::sync::Arc;
use tokio::sync::RwLock;

/// Extractor shared between the lifecycle, the pipeline and enrollment
pub type SharedExtractor = Arc<RwLock<dyn FaceExtractor>>;

/// Where an extractor loads its models from: a local directory or an
/// http(s) base URL
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ModelSource(pub String);

impl ModelSource {
    pub fn new(location: impl Into<String>) -> Self {
        Self(location.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }

    pub fn is_remote(&self) -> bool {
        self.0.starts_with("http://") || self.0.starts_with("https://")
    }

    /// Location of `file_name` under this source
    pub fn resolve(&self, file_name: &str) -> String {
        format!("{}/{}", self.0.trim_end_matches('/'), file_name)
    }
}

impl std::fmt::Display for ModelSource {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(&self.0)
    }
}

/// Turns frames into detected faces with feature vectors
#[async_trait]
pub trait FaceExtractor: Send + Sync {
    /// Unique extractor identifier (e.g., "onnx_face")
    fn id(&self) -> &'static str;

    fn name(&self) -> &'static str;

    fn description(&self) -> &'static str;

    fn version(&self) -> &'static str;

    fn info(&self) -> ExtractorInfo {
        ExtractorInfo {
            id: self.id().to_string(),
            name: self.name().to_string(),
            description: self.description().to_string(),
            version: self.version().to_string(),
            config_schema: self.config_schema(),
            supported_formats: self.supported_formats(),
            requires_gpu: self.requires_gpu(),
        }
    }

    fn config_schema(&self) -> Option<serde_json::Value> {
        None
    }

    fn supported_formats(&self) -> Vec<String> {
        vec!["jpeg".to_string()]
    }

    fn requires_gpu(&self) -> bool {
        false
    }

    /// Load the detection and feature models from `source`
    async fn initialize(&mut self, source: &ModelSource) -> Result<()>;

    /// Load the optional demographic sub-model. Returns false when the
    /// extractor has no such model. Runs alongside detection, so it only
    /// gets shared access.
    async fn initialize_demographics(&self, _source: &ModelSource) -> Result<bool> {
        Ok(false)
    }

    /// Every face passing the detector threshold of `mode`
    async fn detect(&self, frame: &VideoFrame, mode: ExtractMode) -> Result<Vec<DetectedFace>>;

    /// Highest-scoring face, used for enrollment capture
    async fn detect_single(
        &self,
        frame: &VideoFrame,
        mode: ExtractMode,
    ) -> Result<Option<DetectedFace>> {
        let faces = self.detect(frame, mode).await?;
        Ok(faces.into_iter().reduce(|best, face| {
            if face.score > best.score {
                face
            } else {
                best
            }
        }))
    }

    async fn health_check(&self) -> Result<bool> {
        Ok(true)
    }

    async fn shutdown(&mut self) -> Result<()> {
        Ok(())
    }
}

/// Scale a vector to unit L2 norm; zero vectors are left alone
pub fn l2_normalize(vector: &mut [f32]) {
    let norm: f32 = vector.iter().map(|x| x * x).sum::<f32>().sqrt();
    if norm > 0.0 {
        for val in vector.iter_mut() {
            *val /= norm;
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_model_source_resolve() {
        let local = ModelSource::new("/opt/models/");
        assert!(!local.is_remote());
        assert_eq!(local.resolve("det.onnx"), "/opt/models/det.onnx");

        let remote = ModelSource::new("https://cdn.example.com/face");
        assert!(remote.is_remote());
        assert_eq!(
            remote.resolve("det.onnx"),
            "https://cdn.example.com/face/det.onnx"
        );
    }

    #[test]
    fn test_l2_normalize() {
        let mut v = vec![3.0, 4.0];
        l2_normalize(&mut v);
        assert!((v[0] - 0.6).abs() < 1e-6);
        assert!((v[1] - 0.8).abs() < 1e-6);

        let mut zero = vec![0.0, 0.0];
        l2_normalize(&mut zero);
        assert_eq!(zero, vec![0.0, 0.0]);
    }
}

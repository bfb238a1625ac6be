//! Face recognition contracts shared by the face service and its clients.
//!
//! This module defines the enrolled-identity data model, the frames and
//! detections exchanged with feature extractors, the recognition events
//! written to the event log, and the HTTP request/response bodies.

use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// Side length of the canonical coordinate space boxes are normalized into.
pub const NORMALIZED_BOX_SCALE: f32 = 1000.0;

/// Display name used for detections that did not match an identity.
pub const UNKNOWN_LABEL: &str = "Unknown";

/// A reference face sample captured for an identity
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Sample {
    /// Opaque image payload (usually a JPEG data URL), never used for matching
    pub thumbnail: String,

    /// Feature vector produced by the extractor
    pub vector: Vec<f32>,
}

/// An enrolled person and their reference samples
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Identity {
    /// Immutable identity token
    pub id: Uuid,

    /// Display name
    pub name: String,

    /// Enrollment timestamp (Unix timestamp in milliseconds)
    pub created_at: u64,

    /// Reference samples in capture order
    #[serde(default)]
    pub samples: Vec<Sample>,
}

impl Identity {
    pub fn sample_count(&self) -> usize {
        self.samples.len()
    }

    pub fn summary(&self) -> IdentitySummary {
        IdentitySummary {
            id: self.id,
            name: self.name.clone(),
            created_at: self.created_at,
            sample_count: self.samples.len(),
        }
    }
}

/// Identity listing entry without thumbnails or vectors
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct IdentitySummary {
    pub id: Uuid,
    pub name: String,
    pub created_at: u64,
    pub sample_count: usize,
}

/// Video frame handed to a feature extractor
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct VideoFrame {
    /// Source camera or stream ID
    pub source_id: String,

    /// Frame timestamp (Unix timestamp in milliseconds)
    pub timestamp: u64,

    /// Frame sequence number
    pub sequence: u64,

    /// Frame width in pixels
    pub width: u32,

    /// Frame height in pixels
    pub height: u32,

    /// Image format (e.g., "jpeg", "png")
    pub format: String,

    /// Frame data (base64 encoded for JSON transport)
    pub data: String,
}

/// Detector strictness
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ExtractMode {
    /// Enrollment capture: only confidently detected faces are accepted
    Strict,

    /// Continuous monitoring
    Loose,
}

impl ExtractMode {
    /// Minimum detector score a face needs in this mode
    pub fn min_score(self) -> f32 {
        match self {
            ExtractMode::Strict => 0.85,
            ExtractMode::Loose => 0.5,
        }
    }
}

/// Face bounding box in source pixel coordinates
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct FaceBox {
    pub x: f32,
    pub y: f32,
    pub width: f32,
    pub height: f32,
}

impl FaceBox {
    /// Project the box into the 0..1000 canonical space of a frame.
    ///
    /// Frames reporting a zero dimension fall back to 640x480.
    pub fn normalize(&self, frame_width: u32, frame_height: u32) -> NormalizedBox {
        let width = if frame_width > 0 { frame_width } else { 640 };
        let height = if frame_height > 0 { frame_height } else { 480 };
        let scale_x = NORMALIZED_BOX_SCALE / width as f32;
        let scale_y = NORMALIZED_BOX_SCALE / height as f32;

        NormalizedBox {
            ymin: self.y * scale_y,
            xmin: self.x * scale_x,
            ymax: (self.y + self.height) * scale_y,
            xmax: (self.x + self.width) * scale_x,
        }
    }
}

/// Face box in the canonical 0..1000 coordinate space
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct NormalizedBox {
    pub ymin: f32,
    pub xmin: f32,
    pub ymax: f32,
    pub xmax: f32,
}

/// Probability assigned to one facial expression
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ExpressionScore {
    pub expression: String,
    pub probability: f32,
}

/// Optional output of the demographic sub-model
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Demographics {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub age: Option<u32>,

    #[serde(skip_serializing_if = "Option::is_none")]
    pub gender: Option<String>,

    /// Expressions sorted by descending probability
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub expressions: Vec<ExpressionScore>,
}

impl Demographics {
    /// Most probable expression, if any
    pub fn dominant_expression(&self) -> Option<&str> {
        self.expressions.first().map(|e| e.expression.as_str())
    }
}

/// A face found by the extractor
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DetectedFace {
    /// Bounding box in frame pixels
    pub bbox: FaceBox,

    /// Detector confidence (0.0 to 1.0)
    pub score: f32,

    /// Feature vector
    pub vector: Vec<f32>,

    #[serde(skip_serializing_if = "Option::is_none")]
    pub demographics: Option<Demographics>,
}

/// Scored identity decision for one detected face
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DetectionResult {
    pub identified: bool,

    /// Matched identity, only set when `identified` is true
    #[serde(skip_serializing_if = "Option::is_none")]
    pub identity_id: Option<Uuid>,

    /// Display name resolved at decision time, or "Unknown"
    pub identity_name: String,

    /// 0 to 100
    pub confidence: u8,

    pub bbox: NormalizedBox,

    #[serde(skip_serializing_if = "Option::is_none")]
    pub demographics: Option<Demographics>,
}

/// Entry of the recognition event log
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RecognitionEvent {
    pub id: Uuid,

    /// Unix timestamp in milliseconds
    pub timestamp: u64,

    pub identity_name: String,

    #[serde(skip_serializing_if = "Option::is_none")]
    pub identity_id: Option<Uuid>,

    pub confidence: u8,

    pub is_unknown: bool,

    #[serde(skip_serializing_if = "Option::is_none")]
    pub age: Option<u32>,

    #[serde(skip_serializing_if = "Option::is_none")]
    pub gender: Option<String>,

    #[serde(skip_serializing_if = "Option::is_none")]
    pub expression: Option<String>,
}

impl RecognitionEvent {
    /// Build the event recorded for a detection result at `timestamp`
    pub fn from_result(result: &DetectionResult, timestamp: u64) -> Self {
        let demographics = result.demographics.as_ref();
        Self {
            id: Uuid::new_v4(),
            timestamp,
            identity_name: result.identity_name.clone(),
            identity_id: result.identity_id,
            confidence: result.confidence,
            is_unknown: !result.identified,
            age: demographics.and_then(|d| d.age),
            gender: demographics.and_then(|d| d.gender.clone()),
            expression: demographics
                .and_then(|d| d.dominant_expression())
                .map(str::to_string),
        }
    }
}

/// Extractor metadata and capabilities
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ExtractorInfo {
    pub id: String,
    pub name: String,
    pub description: String,
    pub version: String,

    /// Configuration schema (JSON Schema)
    #[serde(skip_serializing_if = "Option::is_none")]
    pub config_schema: Option<serde_json::Value>,

    pub supported_formats: Vec<String>,
    pub requires_gpu: bool,
}

/// Extractor readiness as reported by the service
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ExtractorState {
    Uninitialized,
    Loading,
    Ready,
    Failed,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ExtractorStatus {
    pub info: ExtractorInfo,
    pub state: ExtractorState,
    pub demographics: bool,

    #[serde(skip_serializing_if = "Option::is_none")]
    pub last_error: Option<String>,
}

/// Request to enroll a new identity.
///
/// The first sample comes either from `vector` or from a strict extraction
/// run over `frame`; with neither the identity starts without samples.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EnrollRequest {
    pub name: String,

    #[serde(default)]
    pub thumbnail: String,

    #[serde(skip_serializing_if = "Option::is_none")]
    pub vector: Option<Vec<f32>>,

    #[serde(skip_serializing_if = "Option::is_none")]
    pub frame: Option<VideoFrame>,
}

/// Request to append a sample to an identity
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AddSampleRequest {
    #[serde(default)]
    pub thumbnail: String,

    #[serde(skip_serializing_if = "Option::is_none")]
    pub vector: Option<Vec<f32>>,

    #[serde(skip_serializing_if = "Option::is_none")]
    pub frame: Option<VideoFrame>,

    /// Reject the sample when it is far from every existing sample
    #[serde(default)]
    pub enforce_consistency: bool,

    #[serde(skip_serializing_if = "Option::is_none")]
    pub tolerance: Option<f32>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RenameRequest {
    pub name: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ConsistencyRequest {
    pub vector: Vec<f32>,

    #[serde(skip_serializing_if = "Option::is_none")]
    pub tolerance: Option<f32>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ConsistencyResponse {
    pub consistent: bool,
    pub tolerance: f32,
}

/// Identity returned from a mutation, with the persistence warning if the
/// change could not be saved
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct IdentityResponse {
    pub identity: Identity,

    #[serde(skip_serializing_if = "Option::is_none")]
    pub warning: Option<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct IdentityListResponse {
    pub identities: Vec<IdentitySummary>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ThresholdRequest {
    pub threshold: f32,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ThresholdResponse {
    pub threshold: f32,
    pub min: f32,
    pub max: f32,

    #[serde(skip_serializing_if = "Option::is_none")]
    pub warning: Option<String>,
}

/// Outcome of one recognition tick
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RecognizeResponse {
    /// True when a previous frame was still in flight and this one was dropped
    pub skipped: bool,

    pub results: Vec<DetectionResult>,

    pub events_recorded: usize,

    #[serde(skip_serializing_if = "Option::is_none")]
    pub processing_time_ms: Option<u64>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EventListResponse {
    pub events: Vec<RecognitionEvent>,
}

/// Live monitor telemetry
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MonitorStatus {
    pub running: bool,
    pub busy: bool,
    pub fps: u32,
    pub frames_processed: u64,
    pub frames_skipped: u64,
}

/// Face extractor backed by ONNX Runtime
///
/// Two stages run per frame:
/// 1. Detection: locates faces with an anchor-free detector (YOLO/SCRFD layout)
/// 2. Embedding: turns each face crop into an L2-normalized feature vector
///
/// Matching is not done here; the recognition pipeline owns it.
use super::{l2_normalize, FaceExtractor, ModelSource};
use anyhow::{anyhow, Context, Result};
use async_trait::async_trait;
use base64::Engine;
use common::face::{DetectedFace, ExtractMode, FaceBox, VideoFrame};
use image::DynamicImage;
use ndarray::{Array, IxDyn};
use ort::{
    execution_providers::{CPUExecutionProvider, CUDAExecutionProvider, TensorRTExecutionProvider},
    session::{builder::GraphOptimizationLevel, Session},
    value::Value,
};
use serde::{Deserialize, Serialize};
use std::path::PathBuf;
use std::sync::{Arc, RwLock};
use std::time::Duration;

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct OnnxExtractorConfig {
    /// Detection model file name, resolved against the model source
    #[serde(default = "default_detection_model")]
    pub detection_model: String,

    /// Embedding model file name, resolved against the model source
    #[serde(default = "default_embedding_model")]
    pub embedding_model: String,

    /// IoU (Intersection over Union) threshold for NMS
    #[serde(default = "default_iou_threshold")]
    pub iou_threshold: f32,

    /// Maximum number of faces to report per frame
    #[serde(default = "default_max_detections")]
    pub max_detections: usize,

    #[serde(default = "default_detection_input_size")]
    pub detection_input_size: u32,

    #[serde(default = "default_embedding_input_size")]
    pub embedding_input_size: u32,

    /// Execution provider preference (CPU, CUDA, TensorRT)
    #[serde(default = "default_execution_provider")]
    pub execution_provider: String,

    /// GPU device ID (0, 1, 2, etc.)
    #[serde(default)]
    pub device_id: i32,

    #[serde(default = "default_intra_threads")]
    pub intra_threads: usize,

    #[serde(default = "default_inter_threads")]
    pub inter_threads: usize,

    /// Where models fetched from remote sources are stored
    #[serde(default = "default_cache_dir")]
    pub cache_dir: PathBuf,

    /// Timeout for a single model download
    #[serde(default = "default_download_timeout_secs")]
    pub download_timeout_secs: u64,
}

fn default_detection_model() -> String {
    "face_detector.onnx".to_string()
}

fn default_embedding_model() -> String {
    "face_embedding.onnx".to_string()
}

fn default_iou_threshold() -> f32 {
    0.4
}

fn default_max_detections() -> usize {
    50
}

fn default_detection_input_size() -> u32 {
    640
}

fn default_embedding_input_size() -> u32 {
    112
}

fn default_execution_provider() -> String {
    "CUDA".to_string()
}

fn default_intra_threads() -> usize {
    4
}

fn default_inter_threads() -> usize {
    1
}

fn default_cache_dir() -> PathBuf {
    PathBuf::from("data/models")
}

fn default_download_timeout_secs() -> u64 {
    60
}

impl Default for OnnxExtractorConfig {
    fn default() -> Self {
        Self {
            detection_model: default_detection_model(),
            embedding_model: default_embedding_model(),
            iou_threshold: default_iou_threshold(),
            max_detections: default_max_detections(),
            detection_input_size: default_detection_input_size(),
            embedding_input_size: default_embedding_input_size(),
            execution_provider: default_execution_provider(),
            device_id: 0,
            intra_threads: default_intra_threads(),
            inter_threads: default_inter_threads(),
            cache_dir: default_cache_dir(),
            download_timeout_secs: default_download_timeout_secs(),
        }
    }
}

/// Loaded ONNX sessions
struct Sessions {
    detection: Arc<tokio::sync::Mutex<Session>>,
    embedding: Arc<tokio::sync::Mutex<Session>>,
}

pub struct OnnxFaceExtractor {
    config: OnnxExtractorConfig,
    sessions: Option<Sessions>,
    execution_provider_used: Arc<RwLock<String>>,
}

impl OnnxFaceExtractor {
    pub fn new(config: OnnxExtractorConfig) -> Self {
        Self {
            config,
            sessions: None,
            execution_provider_used: Arc::new(RwLock::new("CPU".to_string())),
        }
    }

    pub fn config(&self) -> &OnnxExtractorConfig {
        &self.config
    }

    fn execution_provider(&self) -> String {
        self.execution_provider_used
            .read()
            .map(|p| p.clone())
            .unwrap_or_else(|_| "unknown".to_string())
    }

    /// Local path of a model, downloading it first for remote sources
    async fn fetch_model(&self, source: &ModelSource, file_name: &str) -> Result<PathBuf> {
        let location = source.resolve(file_name);
        if !source.is_remote() {
            let path = PathBuf::from(&location);
            if !path.exists() {
                return Err(anyhow!("model file {} not found", location));
            }
            return Ok(path);
        }

        let client = reqwest::Client::builder()
            .timeout(Duration::from_secs(self.config.download_timeout_secs))
            .build()
            .context("Failed to build HTTP client")?;

        tracing::info!(url = %location, "downloading model");
        let bytes = client
            .get(&location)
            .send()
            .await
            .with_context(|| format!("Failed to fetch {}", location))?
            .error_for_status()
            .with_context(|| format!("Model source rejected {}", location))?
            .bytes()
            .await
            .with_context(|| format!("Failed to read body of {}", location))?;

        tokio::fs::create_dir_all(&self.config.cache_dir)
            .await
            .context("Failed to create model cache directory")?;
        let path = self.config.cache_dir.join(file_name);
        tokio::fs::write(&path, &bytes)
            .await
            .with_context(|| format!("Failed to cache model at {}", path.display()))?;

        Ok(path)
    }

    /// Preprocess image for detection model
    fn preprocess_for_detection(&self, img: &DynamicImage) -> Array<f32, IxDyn> {
        let size = self.config.detection_input_size;
        let resized = img.resize_exact(size, size, image::imageops::FilterType::Triangle);
        let rgb_img = resized.to_rgb8();

        // NCHW, normalized to [0, 1]
        let mut input = Array::zeros(IxDyn(&[1, 3, size as usize, size as usize]));
        for (x, y, pixel) in rgb_img.enumerate_pixels() {
            for c in 0..3 {
                input[[0, c, y as usize, x as usize]] = pixel[c] as f32 / 255.0;
            }
        }

        input
    }

    /// Preprocess face crop for embedding model
    fn preprocess_for_embedding(&self, img: &DynamicImage) -> Array<f32, IxDyn> {
        let size = self.config.embedding_input_size;
        let resized = img.resize_exact(size, size, image::imageops::FilterType::Triangle);
        let rgb_img = resized.to_rgb8();

        // NCHW, normalized to [-1, 1] (ArcFace convention)
        let mut input = Array::zeros(IxDyn(&[1, 3, size as usize, size as usize]));
        for (x, y, pixel) in rgb_img.enumerate_pixels() {
            for c in 0..3 {
                input[[0, c, y as usize, x as usize]] = (pixel[c] as f32 / 127.5) - 1.0;
            }
        }

        input
    }

    /// Turn raw detector output `[batch, 5, predictions]` into boxes in frame
    /// pixels, keeping those at or above `min_score`
    fn postprocess_detection(
        &self,
        output: &Array<f32, IxDyn>,
        original_width: u32,
        original_height: u32,
        min_score: f32,
    ) -> Result<Vec<(FaceBox, f32)>> {
        if output.ndim() != 3 || output.shape()[1] < 5 {
            return Err(anyhow!(
                "unexpected detection output shape {:?}",
                output.shape()
            ));
        }

        let scale_x = original_width as f32 / self.config.detection_input_size as f32;
        let scale_y = original_height as f32 / self.config.detection_input_size as f32;

        let mut boxes = Vec::new();
        for i in 0..output.shape()[2] {
            let score = output[[0, 4, i]];
            if score < min_score {
                continue;
            }

            let cx = output[[0, 0, i]];
            let cy = output[[0, 1, i]];
            let w = output[[0, 2, i]];
            let h = output[[0, 3, i]];

            let x = ((cx - w / 2.0) * scale_x).max(0.0);
            let y = ((cy - h / 2.0) * scale_y).max(0.0);
            let width = (w * scale_x).min(original_width as f32 - x);
            let height = (h * scale_y).min(original_height as f32 - y);
            if width <= 1.0 || height <= 1.0 {
                continue;
            }

            boxes.push((
                FaceBox {
                    x,
                    y,
                    width,
                    height,
                },
                score,
            ));
        }

        let mut kept = nms(boxes, self.config.iou_threshold);
        kept.truncate(self.config.max_detections);
        Ok(kept)
    }

    async fn extract_embedding(
        &self,
        session: &tokio::sync::Mutex<Session>,
        face_img: &DynamicImage,
    ) -> Result<Vec<f32>> {
        let input_tensor = Value::from_array(self.preprocess_for_embedding(face_img))?;

        let mut session = session.lock().await;
        let outputs = session.run(ort::inputs![input_tensor])?;

        // Expected shape: [batch, embedding_dim] (e.g., [1, 512])
        let output_value = outputs
            .get("output")
            .or_else(|| outputs.get("output0"))
            .or_else(|| outputs.get("embedding"))
            .context("No embedding output tensor found")?;
        let (shape, data) = output_value.try_extract_tensor::<f32>()?;

        let embedding_dim = shape.as_ref().get(1).copied().unwrap_or(0) as usize;
        if embedding_dim == 0 || data.len() < embedding_dim {
            return Err(anyhow!("empty embedding output"));
        }

        let mut embedding = data[..embedding_dim].to_vec();
        l2_normalize(&mut embedding);
        Ok(embedding)
    }
}

impl Default for OnnxFaceExtractor {
    fn default() -> Self {
        Self::new(OnnxExtractorConfig::default())
    }
}

/// Non-maximum suppression, highest score first
fn nms(mut boxes: Vec<(FaceBox, f32)>, iou_threshold: f32) -> Vec<(FaceBox, f32)> {
    boxes.sort_by(|a, b| b.1.partial_cmp(&a.1).unwrap_or(std::cmp::Ordering::Equal));

    let mut keep: Vec<(FaceBox, f32)> = Vec::new();
    for candidate in boxes {
        if keep
            .iter()
            .all(|kept| iou(&kept.0, &candidate.0) < iou_threshold)
        {
            keep.push(candidate);
        }
    }
    keep
}

/// Intersection over Union of two boxes
fn iou(a: &FaceBox, b: &FaceBox) -> f32 {
    let x1 = a.x.max(b.x);
    let y1 = a.y.max(b.y);
    let x2 = (a.x + a.width).min(b.x + b.width);
    let y2 = (a.y + a.height).min(b.y + b.height);

    let intersection = if x2 > x1 && y2 > y1 {
        (x2 - x1) * (y2 - y1)
    } else {
        0.0
    };
    let union = a.width * a.height + b.width * b.height - intersection;

    if union > 0.0 {
        intersection / union
    } else {
        0.0
    }
}

/// Create an ONNX session, falling back TensorRT -> CUDA -> CPU
fn create_session(config: &OnnxExtractorConfig, model_path: &str) -> Result<(Session, String)> {
    match config.execution_provider.to_uppercase().as_str() {
        "TENSORRT" => {
            tracing::info!(model = model_path, "attempting TensorRT");
            let result = Session::builder()
                .context("Failed to create session builder")?
                .with_optimization_level(GraphOptimizationLevel::Level3)
                .context("Failed to set optimization level")?
                .with_intra_threads(config.intra_threads)
                .context("Failed to set intra threads")?
                .with_inter_threads(config.inter_threads)
                .context("Failed to set inter threads")?
                .with_execution_providers([
                    TensorRTExecutionProvider::default()
                        .with_device_id(config.device_id)
                        .build(),
                    CUDAExecutionProvider::default()
                        .with_device_id(config.device_id)
                        .build(),
                    CPUExecutionProvider::default().build(),
                ])
                .context("Failed to set execution providers")?
                .commit_from_file(model_path);

            match result {
                Ok(session) => Ok((session, "TensorRT".to_string())),
                Err(e) => {
                    tracing::warn!(model = model_path, error = %e, "TensorRT failed, trying CUDA");
                    try_cuda(config, model_path)
                }
            }
        }
        "CUDA" => try_cuda(config, model_path),
        _ => try_cpu(config, model_path),
    }
}

fn try_cuda(config: &OnnxExtractorConfig, model_path: &str) -> Result<(Session, String)> {
    let result = Session::builder()
        .context("Failed to create session builder")?
        .with_optimization_level(GraphOptimizationLevel::Level3)
        .context("Failed to set optimization level")?
        .with_intra_threads(config.intra_threads)
        .context("Failed to set intra threads")?
        .with_inter_threads(config.inter_threads)
        .context("Failed to set inter threads")?
        .with_execution_providers([
            CUDAExecutionProvider::default()
                .with_device_id(config.device_id)
                .build(),
            CPUExecutionProvider::default().build(),
        ])
        .context("Failed to set execution providers")?
        .commit_from_file(model_path);

    match result {
        Ok(session) => Ok((session, "CUDA".to_string())),
        Err(e) => {
            tracing::warn!(model = model_path, error = %e, "CUDA failed, using CPU");
            try_cpu(config, model_path)
        }
    }
}

fn try_cpu(config: &OnnxExtractorConfig, model_path: &str) -> Result<(Session, String)> {
    let session = Session::builder()
        .context("Failed to create session builder")?
        .with_optimization_level(GraphOptimizationLevel::Level3)
        .context("Failed to set optimization level")?
        .with_intra_threads(config.intra_threads)
        .context("Failed to set intra threads")?
        .with_inter_threads(config.inter_threads)
        .context("Failed to set inter threads")?
        .commit_from_file(model_path)
        .context("Failed to load model from file")?;
    Ok((session, "CPU".to_string()))
}

/// Session creation blocks; keep it off the async workers
async fn load_session(config: &OnnxExtractorConfig, path: PathBuf) -> Result<(Session, String)> {
    let config = config.clone();
    tokio::task::spawn_blocking(move || create_session(&config, &path.to_string_lossy()))
        .await
        .context("Session loader task failed")?
}

#[async_trait]
impl FaceExtractor for OnnxFaceExtractor {
    fn id(&self) -> &'static str {
        "onnx_face"
    }

    fn name(&self) -> &'static str {
        "ONNX Face Extractor"
    }

    fn description(&self) -> &'static str {
        "Face detection and embedding extraction with ONNX Runtime"
    }

    fn version(&self) -> &'static str {
        "1.0.0"
    }

    fn config_schema(&self) -> Option<serde_json::Value> {
        Some(serde_json::json!({
            "type": "object",
            "properties": {
                "detection_model": {
                    "type": "string",
                    "default": "face_detector.onnx",
                    "description": "Face detection model file name"
                },
                "embedding_model": {
                    "type": "string",
                    "default": "face_embedding.onnx",
                    "description": "Face embedding model file name"
                },
                "iou_threshold": {
                    "type": "number",
                    "minimum": 0.0,
                    "maximum": 1.0,
                    "default": 0.4,
                    "description": "IoU threshold for Non-Maximum Suppression"
                },
                "max_detections": {
                    "type": "integer",
                    "minimum": 1,
                    "default": 50,
                    "description": "Maximum number of faces per frame"
                },
                "execution_provider": {
                    "type": "string",
                    "enum": ["CPU", "CUDA", "TensorRT"],
                    "default": "CUDA",
                    "description": "Execution provider (CPU, CUDA, TensorRT)"
                },
                "device_id": {
                    "type": "integer",
                    "minimum": 0,
                    "default": 0,
                    "description": "GPU device ID"
                }
            }
        }))
    }

    fn supported_formats(&self) -> Vec<String> {
        vec!["jpeg".to_string(), "png".to_string()]
    }

    async fn initialize(&mut self, source: &ModelSource) -> Result<()> {
        let detection_path = self.fetch_model(source, &self.config.detection_model).await?;
        let embedding_path = self.fetch_model(source, &self.config.embedding_model).await?;

        let (detection, provider) = load_session(&self.config, detection_path).await?;
        let (embedding, embedding_provider) = load_session(&self.config, embedding_path).await?;

        self.sessions = Some(Sessions {
            detection: Arc::new(tokio::sync::Mutex::new(detection)),
            embedding: Arc::new(tokio::sync::Mutex::new(embedding)),
        });
        *self
            .execution_provider_used
            .write()
            .map_err(|e| anyhow!("Failed to lock execution provider: {}", e))? = provider.clone();

        tracing::info!(
            source = %source,
            detection_provider = %provider,
            embedding_provider = %embedding_provider,
            device = self.config.device_id,
            "initialized ONNX face models"
        );
        Ok(())
    }

    async fn detect(&self, frame: &VideoFrame, mode: ExtractMode) -> Result<Vec<DetectedFace>> {
        let sessions = self
            .sessions
            .as_ref()
            .context("Models not initialized - call initialize() first")?;

        let image_data = base64::prelude::BASE64_STANDARD
            .decode(&frame.data)
            .context("Failed to decode base64 image")?;
        let img = image::load_from_memory(&image_data).context("Failed to load image")?;
        let (original_width, original_height) = (img.width(), img.height());

        let input_tensor = Value::from_array(self.preprocess_for_detection(&img))?;

        let inference_start = std::time::Instant::now();
        let output = {
            let mut detection = sessions.detection.lock().await;
            let outputs = detection.run(ort::inputs![input_tensor])?;
            let output_value = outputs
                .get("output0")
                .or_else(|| outputs.get("output"))
                .or_else(|| outputs.get("boxes"))
                .context("No detection output tensor found")?;
            let (shape, data) = output_value.try_extract_tensor::<f32>()?;
            let shape_usize: Vec<usize> = shape.as_ref().iter().map(|&x| x as usize).collect();
            Array::from_shape_vec(IxDyn(&shape_usize), data.to_vec())?
        };

        telemetry::metrics::FACE_INFERENCE_TIME
            .with_label_values(&["detection", &self.execution_provider()])
            .observe(inference_start.elapsed().as_secs_f64());

        let boxes =
            self.postprocess_detection(&output, original_width, original_height, mode.min_score())?;

        let mut faces = Vec::with_capacity(boxes.len());
        for (bbox, score) in boxes {
            let crop = img.crop_imm(
                bbox.x as u32,
                bbox.y as u32,
                bbox.width as u32,
                bbox.height as u32,
            );

            let embedding_start = std::time::Instant::now();
            match self.extract_embedding(&sessions.embedding, &crop).await {
                Ok(vector) => faces.push(DetectedFace {
                    bbox,
                    score,
                    vector,
                    demographics: None,
                }),
                Err(e) => tracing::warn!(error = %e, "embedding extraction failed, dropping face"),
            }
            telemetry::metrics::FACE_INFERENCE_TIME
                .with_label_values(&["embedding", &self.execution_provider()])
                .observe(embedding_start.elapsed().as_secs_f64());
        }

        Ok(faces)
    }

    async fn health_check(&self) -> Result<bool> {
        Ok(self.sessions.is_some())
    }

    async fn shutdown(&mut self) -> Result<()> {
        tracing::info!("shutting down ONNX face extractor");
        self.sessions = None;
        Ok(())
    }
}

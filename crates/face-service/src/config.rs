use crate::extractor::{lifecycle::DEFAULT_INIT_TIMEOUT, ModelSource};
use crate::monitor::DEFAULT_TICK_INTERVAL;
use anyhow::{bail, Context, Result};
use std::env;
use std::path::PathBuf;
use std::time::Duration;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ExtractorKind {
    Onnx,
    Mock,
}

impl ExtractorKind {
    fn parse(value: &str) -> Result<Self> {
        match value.to_lowercase().as_str() {
            "onnx" => Ok(Self::Onnx),
            "mock" => Ok(Self::Mock),
            other => bail!("Invalid EXTRACTOR '{}', expected onnx or mock", other),
        }
    }
}

#[derive(Debug, Clone)]
pub struct FaceServiceConfig {
    /// Address to bind the HTTP server to
    pub bind_addr: String,

    /// Node ID for this face service instance
    pub node_id: String,

    /// Directory holding profiles.json and threshold.json
    pub data_dir: PathBuf,

    pub extractor: ExtractorKind,

    /// Detection model file name
    pub detection_model: String,

    /// Embedding model file name
    pub embedding_model: String,

    /// Model locations tried in order
    pub model_sources: Vec<ModelSource>,

    /// Bound on loading from a single model source
    pub init_timeout: Duration,

    /// Monitor loop period
    pub monitor_tick: Duration,

    /// Fixed feature vector dimension, learned from the first sample when unset
    pub vector_dim: Option<usize>,
}

impl FaceServiceConfig {
    pub fn from_env() -> Result<Self> {
        let bind_addr =
            env::var("FACE_SERVICE_ADDR").unwrap_or_else(|_| "0.0.0.0:8085".to_string());

        let node_id = env::var("NODE_ID").unwrap_or_else(|_| {
            format!(
                "face-service-{}",
                hostname::get()
                    .ok()
                    .and_then(|h| h.into_string().ok())
                    .unwrap_or_else(|| uuid::Uuid::new_v4().to_string())
            )
        });

        let data_dir = PathBuf::from(
            env::var("FACE_DATA_DIR").unwrap_or_else(|_| "./data".to_string()),
        );

        let extractor = env::var("EXTRACTOR")
            .ok()
            .map(|s| ExtractorKind::parse(&s))
            .transpose()?
            .unwrap_or(ExtractorKind::Onnx);

        let detection_model = env::var("FACE_DETECTION_MODEL")
            .unwrap_or_else(|_| "face_detector.onnx".to_string());
        let embedding_model = env::var("FACE_EMBEDDING_MODEL")
            .unwrap_or_else(|_| "face_embedding.onnx".to_string());

        let model_sources = match env::var("FACE_MODEL_SOURCES") {
            Ok(list) => parse_sources(&list),
            Err(_) => vec![ModelSource::new(data_dir.join("models").to_string_lossy())],
        };

        let init_timeout = Duration::from_secs(parse_var(
            "FACE_INIT_TIMEOUT_SECS",
            DEFAULT_INIT_TIMEOUT.as_secs(),
        )?);
        let monitor_tick = Duration::from_millis(parse_var(
            "MONITOR_TICK_MS",
            DEFAULT_TICK_INTERVAL.as_millis() as u64,
        )?);
        if monitor_tick.is_zero() {
            bail!("MONITOR_TICK_MS must be greater than zero");
        }

        let vector_dim = env::var("FACE_VECTOR_DIM")
            .ok()
            .map(|s| s.parse::<usize>().context("Invalid FACE_VECTOR_DIM"))
            .transpose()?;

        Ok(Self {
            bind_addr,
            node_id,
            data_dir,
            extractor,
            detection_model,
            embedding_model,
            model_sources,
            init_timeout,
            monitor_tick,
            vector_dim,
        })
    }
}

/// Comma separated list, blanks dropped
fn parse_sources(list: &str) -> Vec<ModelSource> {
    list.split(',')
        .map(str::trim)
        .filter(|s| !s.is_empty())
        .map(ModelSource::new)
        .collect()
}

fn parse_var(name: &str, default: u64) -> Result<u64> {
    match env::var(name) {
        Ok(value) => value
            .parse()
            .with_context(|| format!("Invalid {}", name)),
        Err(_) => Ok(default),
    }
}

use anyhow::{Context, Result};
use face_service::{
    api,
    config::{ExtractorKind, FaceServiceConfig},
    extractor::{
        mock::MockFaceExtractor,
        onnx::{OnnxExtractorConfig, OnnxFaceExtractor},
    },
    profile::persist::JsonFileRepository,
    ExtractorLifecycle, FaceServiceState, ProfileStore,
};
use std::sync::Arc;
use telemetry::LogConfig;
use tokio::net::TcpListener;
use tracing::info;

#[tokio::main]
async fn main() -> Result<()> {
    let config = FaceServiceConfig::from_env()?;

    // Keep the guard alive so buffered file logs are flushed on exit
    let _log_guard = telemetry::init_structured_logging(
        LogConfig::new("face-service").with_node_id(config.node_id.clone()),
    );

    info!("Starting Face Service...");
    info!(
        bind = %config.bind_addr,
        node_id = %config.node_id,
        data_dir = %config.data_dir.display(),
        extractor = ?config.extractor,
        "face service configuration"
    );

    let repository = JsonFileRepository::open(&config.data_dir)
        .with_context(|| format!("failed to open data dir {}", config.data_dir.display()))?;
    let store = ProfileStore::open(Arc::new(repository)).with_dimension(config.vector_dim);
    info!(
        identities = store.len(),
        threshold = %store.threshold(),
        "profile store loaded"
    );

    let lifecycle = match config.extractor {
        ExtractorKind::Onnx => {
            let extractor = OnnxFaceExtractor::new(OnnxExtractorConfig {
                detection_model: config.detection_model.clone(),
                embedding_model: config.embedding_model.clone(),
                cache_dir: config.data_dir.join("models"),
                ..Default::default()
            });
            ExtractorLifecycle::new(extractor, config.model_sources.clone(), config.init_timeout)
        }
        ExtractorKind::Mock => {
            info!("Using mock extractor");
            ExtractorLifecycle::new(
                MockFaceExtractor::new(),
                config.model_sources.clone(),
                config.init_timeout,
            )
        }
    };

    let state = FaceServiceState::new(config.node_id.clone(), store, lifecycle);

    // Model loading runs in the background; /readyz reports 503 until it completes
    state.spawn_extractor_init();
    state.start_monitor(config.monitor_tick).await;

    let app = api::router(state.clone());

    info!("Binding to {}", config.bind_addr);
    let listener = TcpListener::bind(&config.bind_addr).await?;
    info!("Face Service listening on {}", config.bind_addr);

    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal(state))
        .await?;

    Ok(())
}

async fn shutdown_signal(state: FaceServiceState) {
    let ctrl_c = async {
        if let Err(e) = tokio::signal::ctrl_c().await {
            tracing::error!(error = %e, "failed to install Ctrl+C handler");
            std::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    let terminate = async {
        match tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate()) {
            Ok(mut signal) => {
                signal.recv().await;
            }
            Err(e) => {
                tracing::error!(error = %e, "failed to install signal handler");
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {
            info!("Received Ctrl+C signal");
        },
        _ = terminate => {
            info!("Received terminate signal");
        },
    }

    info!("Shutting down gracefully...");
    if let Err(e) = state.shutdown().await {
        tracing::error!("Error during shutdown: {}", e);
    }
}

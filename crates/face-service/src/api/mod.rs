pub mod routes;

use crate::state::FaceServiceState;
use axum::{
    routing::{delete, get, post, put},
    Router,
};
use tower_http::trace::TraceLayer;

/// Build the API router
pub fn router(state: FaceServiceState) -> Router {
    Router::new()
        // Health and metrics endpoints
        .route("/healthz", get(routes::healthz))
        .route("/readyz", get(routes::readyz))
        .route("/metrics", get(routes::metrics))
        // Extractor lifecycle
        .route("/v1/extractor", get(routes::extractor_status))
        .route("/v1/extractor/retry", post(routes::retry_extractor))
        // Profile store
        .route(
            "/v1/identities",
            get(routes::list_identities).post(routes::enroll),
        )
        .route(
            "/v1/identities/:id",
            get(routes::get_identity)
                .patch(routes::rename_identity)
                .delete(routes::delete_identity),
        )
        .route("/v1/identities/:id/samples", post(routes::add_sample))
        .route(
            "/v1/identities/:id/samples/:index",
            delete(routes::remove_sample),
        )
        .route(
            "/v1/identities/:id/consistency",
            post(routes::check_consistency),
        )
        .route(
            "/v1/threshold",
            get(routes::get_threshold).put(routes::set_threshold),
        )
        // Recognition
        .route("/v1/recognize", post(routes::recognize))
        .route("/v1/monitor", get(routes::monitor_status))
        .route("/v1/monitor/frame", put(routes::publish_frame))
        // Event log
        .route("/v1/events", get(routes::list_events))
        .route("/v1/events/recent", get(routes::recent_events))
        .route("/v1/analytics", get(routes::analytics))
        .layer(TraceLayer::new_for_http())
        .with_state(state)
}

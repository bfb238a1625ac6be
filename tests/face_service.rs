/// End-to-end tests for the face service HTTP API
use axum_test::TestServer;
use common::face::{
    DetectedFace, EventListResponse, ExtractorState, ExtractorStatus, FaceBox, Identity,
    IdentityListResponse, IdentityResponse, RecognizeResponse, ThresholdResponse,
};
use face_service::{
    analytics::AnalyticsSummary,
    api,
    extractor::mock::{scripted_frame, MockExtractorConfig, MockFaceExtractor},
    extractor::{lifecycle::DEFAULT_INIT_TIMEOUT, ModelSource},
    profile::persist::JsonFileRepository,
    ExtractorLifecycle, FaceServiceState, ProfileStore,
};
use serde_json::json;
use std::sync::Arc;
use tempfile::TempDir;

fn face(score: f32, vector: Vec<f32>) -> DetectedFace {
    DetectedFace {
        bbox: FaceBox {
            x: 64.0,
            y: 48.0,
            width: 128.0,
            height: 96.0,
        },
        score,
        vector,
        demographics: None,
    }
}

/// Service backed by a temporary data dir and the mock extractor
fn setup_test_service(dir: &TempDir) -> (TestServer, FaceServiceState) {
    let repository = JsonFileRepository::open(dir.path()).unwrap();
    let store = ProfileStore::open(Arc::new(repository));
    let lifecycle = ExtractorLifecycle::new(
        MockFaceExtractor::with_config(MockExtractorConfig::default()),
        vec![ModelSource::new("local")],
        DEFAULT_INIT_TIMEOUT,
    );
    let state = FaceServiceState::new("test-node".to_string(), store, lifecycle);
    let server = TestServer::new(api::router(state.clone())).unwrap();
    (server, state)
}

async fn ready_service(dir: &TempDir) -> TestServer {
    let (server, state) = setup_test_service(dir);
    state.lifecycle().ensure_ready().await.unwrap();
    server
}

async fn enroll(server: &TestServer, name: &str, vector: Vec<f32>) -> Identity {
    let response = server
        .post("/v1/identities")
        .json(&json!({ "name": name, "thumbnail": "", "vector": vector }))
        .await;
    assert_eq!(response.status_code(), 201);
    response.json::<IdentityResponse>().identity
}

#[tokio::test]
async fn test_healthz() {
    let dir = TempDir::new().unwrap();
    let (server, _state) = setup_test_service(&dir);

    let response = server.get("/healthz").await;
    assert_eq!(response.status_code(), 200);
    let body: serde_json::Value = response.json();
    assert_eq!(body["service"], "face-service");
    assert_eq!(body["node_id"], "test-node");
}

#[tokio::test]
async fn test_readyz_waits_for_extractor() {
    let dir = TempDir::new().unwrap();
    let (server, _state) = setup_test_service(&dir);

    let response = server.get("/readyz").await;
    assert_eq!(response.status_code(), 503);

    let response = server.post("/v1/extractor/retry").await;
    assert_eq!(response.status_code(), 200);
    let status: ExtractorStatus = response.json();
    assert_eq!(status.state, ExtractorState::Ready);
    assert_eq!(status.info.id, "mock_face");

    let response = server.get("/readyz").await;
    assert_eq!(response.status_code(), 200);
}

#[tokio::test]
async fn test_recognize_before_ready_is_unavailable() {
    let dir = TempDir::new().unwrap();
    let (server, _state) = setup_test_service(&dir);

    let frame = scripted_frame("cam-1", 1, 640, 480, &[face(0.9, vec![0.0, 0.0])]).unwrap();
    let response = server.post("/v1/recognize").json(&frame).await;
    assert_eq!(response.status_code(), 503);
}

#[tokio::test]
async fn test_enroll_list_get() {
    let dir = TempDir::new().unwrap();
    let server = ready_service(&dir).await;

    let alice = enroll(&server, "Alice", vec![0.0, 0.0]).await;
    assert_eq!(alice.samples.len(), 1);

    let response = server.get("/v1/identities").await;
    assert_eq!(response.status_code(), 200);
    let list: IdentityListResponse = response.json();
    assert_eq!(list.identities.len(), 1);
    assert_eq!(list.identities[0].name, "Alice");
    assert_eq!(list.identities[0].sample_count, 1);

    let response = server.get(&format!("/v1/identities/{}", alice.id)).await;
    assert_eq!(response.status_code(), 200);
    let fetched: Identity = response.json();
    assert_eq!(fetched.id, alice.id);
}

#[tokio::test]
async fn test_unknown_and_malformed_ids() {
    let dir = TempDir::new().unwrap();
    let server = ready_service(&dir).await;

    let missing = uuid::Uuid::new_v4();
    let response = server.get(&format!("/v1/identities/{}", missing)).await;
    assert_eq!(response.status_code(), 404);

    let response = server.delete(&format!("/v1/identities/{}", missing)).await;
    assert_eq!(response.status_code(), 404);

    let response = server.get("/v1/identities/not-a-uuid").await;
    assert_eq!(response.status_code(), 400);
}

#[tokio::test]
async fn test_enroll_rejects_bad_input() {
    let dir = TempDir::new().unwrap();
    let server = ready_service(&dir).await;

    let response = server
        .post("/v1/identities")
        .json(&json!({ "name": "  ", "thumbnail": "" }))
        .await;
    assert_eq!(response.status_code(), 400);

    enroll(&server, "Alice", vec![0.0, 0.0]).await;
    let response = server
        .post("/v1/identities")
        .json(&json!({ "name": "Bob", "thumbnail": "", "vector": [0.0, 0.0, 0.0] }))
        .await;
    assert_eq!(response.status_code(), 400);
}

#[tokio::test]
async fn test_enroll_from_frame_without_face() {
    let dir = TempDir::new().unwrap();
    let server = ready_service(&dir).await;

    // Loose-quality face only: strict capture finds nothing
    let frame = scripted_frame("enroll", 0, 640, 480, &[face(0.6, vec![1.0, 0.0])]).unwrap();
    let response = server
        .post("/v1/identities")
        .json(&json!({ "name": "Alice", "thumbnail": "", "frame": frame }))
        .await;
    assert_eq!(response.status_code(), 422);
}

#[tokio::test]
async fn test_recognize_identifies_and_debounces() {
    let dir = TempDir::new().unwrap();
    let server = ready_service(&dir).await;
    let alice = enroll(&server, "Alice", vec![0.0, 0.0]).await;

    let frame = scripted_frame("cam-1", 1, 640, 480, &[face(0.9, vec![0.2, 0.0])]).unwrap();
    let response = server.post("/v1/recognize").json(&frame).await;
    assert_eq!(response.status_code(), 200);

    let recognized: RecognizeResponse = response.json();
    assert!(!recognized.skipped);
    assert_eq!(recognized.results.len(), 1);
    let result = &recognized.results[0];
    assert!(result.identified);
    assert_eq!(result.identity_id, Some(alice.id));
    assert_eq!(result.identity_name, "Alice");
    assert_eq!(result.confidence, 64);
    // Boxes come back in the 0..1000 canonical space
    assert!((result.bbox.xmin - 100.0).abs() < 1e-3);
    assert!((result.bbox.ymax - 300.0).abs() < 1e-3);
    assert_eq!(recognized.events_recorded, 1);

    // Same person again within the debounce window
    let frame = scripted_frame("cam-1", 2, 640, 480, &[face(0.9, vec![0.2, 0.0])]).unwrap();
    let recognized: RecognizeResponse = server.post("/v1/recognize").json(&frame).await.json();
    assert_eq!(recognized.events_recorded, 0);

    let events: EventListResponse = server.get("/v1/events").await.json();
    assert_eq!(events.events.len(), 1);
    assert_eq!(events.events[0].identity_name, "Alice");

    let recent: EventListResponse = server.get("/v1/events/recent").await.json();
    assert_eq!(recent.events.len(), 1);
}

#[tokio::test]
async fn test_threshold_validation_and_effect() {
    let dir = TempDir::new().unwrap();
    let server = ready_service(&dir).await;
    enroll(&server, "Alice", vec![0.0, 0.0]).await;

    let current: ThresholdResponse = server.get("/v1/threshold").await.json();
    assert!((current.threshold - 0.55).abs() < 1e-6);
    assert!((current.min - 0.30).abs() < 1e-6);
    assert!((current.max - 0.80).abs() < 1e-6);

    let response = server
        .put("/v1/threshold")
        .json(&json!({ "threshold": 0.95 }))
        .await;
    assert_eq!(response.status_code(), 400);

    let nearby = scripted_frame("cam-1", 1, 640, 480, &[face(0.9, vec![0.6, 0.0])]).unwrap();
    let recognized: RecognizeResponse = server.post("/v1/recognize").json(&nearby).await.json();
    assert!(!recognized.results[0].identified);

    let response = server
        .put("/v1/threshold")
        .json(&json!({ "threshold": 0.7 }))
        .await;
    assert_eq!(response.status_code(), 200);
    let updated: ThresholdResponse = response.json();
    assert!(updated.warning.is_none());

    let recognized: RecognizeResponse = server.post("/v1/recognize").json(&nearby).await.json();
    assert!(recognized.results[0].identified);
}

#[tokio::test]
async fn test_samples_and_consistency() {
    let dir = TempDir::new().unwrap();
    let server = ready_service(&dir).await;
    let alice = enroll(&server, "Alice", vec![0.0, 0.0]).await;
    let samples_path = format!("/v1/identities/{}/samples", alice.id);

    let response = server
        .post(&format!("/v1/identities/{}/consistency", alice.id))
        .json(&json!({ "vector": [0.1, 0.1] }))
        .await;
    assert_eq!(response.status_code(), 200);
    let body: serde_json::Value = response.json();
    assert_eq!(body["consistent"], true);

    let response = server
        .post(&samples_path)
        .json(&json!({ "thumbnail": "", "vector": [3.0, 3.0], "enforce_consistency": true }))
        .await;
    assert_eq!(response.status_code(), 409);

    let response = server
        .post(&samples_path)
        .json(&json!({ "thumbnail": "", "vector": [0.1, 0.0] }))
        .await;
    assert_eq!(response.status_code(), 201);
    let updated: IdentityResponse = response.json();
    assert_eq!(updated.identity.samples.len(), 2);

    let response = server.delete(&format!("{}/5", samples_path)).await;
    assert_eq!(response.status_code(), 404);

    let response = server.delete(&format!("{}/0", samples_path)).await;
    assert_eq!(response.status_code(), 200);
    let updated: IdentityResponse = response.json();
    assert_eq!(updated.identity.samples.len(), 1);
    assert_eq!(updated.identity.samples[0].vector, vec![0.1, 0.0]);
}

#[tokio::test]
async fn test_rename_and_delete() {
    let dir = TempDir::new().unwrap();
    let server = ready_service(&dir).await;
    let alice = enroll(&server, "Alice", vec![0.0, 0.0]).await;
    let path = format!("/v1/identities/{}", alice.id);

    let response = server.patch(&path).json(&json!({ "name": "Alicia" })).await;
    assert_eq!(response.status_code(), 200);

    let frame = scripted_frame("cam-1", 1, 640, 480, &[face(0.9, vec![0.0, 0.0])]).unwrap();
    let recognized: RecognizeResponse = server.post("/v1/recognize").json(&frame).await.json();
    assert_eq!(recognized.results[0].identity_name, "Alicia");

    let response = server.delete(&path).await;
    assert_eq!(response.status_code(), 200);

    let frame = scripted_frame("cam-1", 2, 640, 480, &[face(0.9, vec![0.0, 0.0])]).unwrap();
    let recognized: RecognizeResponse = server.post("/v1/recognize").json(&frame).await.json();
    assert!(!recognized.results[0].identified);
    assert_eq!(recognized.results[0].identity_name, "Unknown");
    assert_eq!(recognized.results[0].confidence, 0);
}

#[tokio::test]
async fn test_profiles_survive_restart() {
    let dir = TempDir::new().unwrap();
    {
        let server = ready_service(&dir).await;
        enroll(&server, "Alice", vec![0.0, 0.0]).await;
        server
            .put("/v1/threshold")
            .json(&json!({ "threshold": 0.4 }))
            .await;
    }

    let server = ready_service(&dir).await;
    let list: IdentityListResponse = server.get("/v1/identities").await.json();
    assert_eq!(list.identities.len(), 1);
    assert_eq!(list.identities[0].name, "Alice");

    let threshold: ThresholdResponse = server.get("/v1/threshold").await.json();
    assert!((threshold.threshold - 0.4).abs() < 1e-6);
}

#[tokio::test]
async fn test_analytics_summary() {
    let dir = TempDir::new().unwrap();
    let server = ready_service(&dir).await;
    enroll(&server, "Alice", vec![0.0, 0.0]).await;
    enroll(&server, "Bob", vec![5.0, 5.0]).await;

    server
        .put("/v1/threshold")
        .json(&json!({ "threshold": 0.3 }))
        .await;

    // Alice is identified, the second face is a confident stranger
    let frame = scripted_frame(
        "cam-1",
        1,
        640,
        480,
        &[face(0.9, vec![0.1, 0.0]), face(0.9, vec![0.0, 0.4])],
    )
    .unwrap();
    let recognized: RecognizeResponse = server.post("/v1/recognize").json(&frame).await.json();
    assert_eq!(recognized.events_recorded, 2);

    let response = server.get("/v1/analytics").await;
    assert_eq!(response.status_code(), 200);
    let summary: AnalyticsSummary = response.json();
    assert_eq!(summary.identity_count, 2);
    assert_eq!(summary.total_events, 2);
    assert_eq!(summary.unknown_events, 1);
    assert_eq!(summary.unknown_rate, 50);
    assert_eq!(summary.hourly.iter().sum::<usize>(), 2);
}

#[tokio::test]
async fn test_monitor_status_and_publish() {
    let dir = TempDir::new().unwrap();
    let (server, state) = setup_test_service(&dir);
    state.lifecycle().ensure_ready().await.unwrap();
    state
        .start_monitor(std::time::Duration::from_millis(5))
        .await;
    enroll(&server, "Alice", vec![0.0, 0.0]).await;

    let frame = scripted_frame("cam-1", 7, 640, 480, &[face(0.9, vec![0.0, 0.0])]).unwrap();
    let response = server.put("/v1/monitor/frame").json(&frame).await;
    assert_eq!(response.status_code(), 202);

    tokio::time::sleep(std::time::Duration::from_millis(100)).await;

    let status: serde_json::Value = server.get("/v1/monitor").await.json();
    assert_eq!(status["running"], true);
    assert_eq!(status["frames_processed"], 1);

    let events: EventListResponse = server.get("/v1/events").await.json();
    assert_eq!(events.events.len(), 1);

    state.shutdown().await.unwrap();
}

#[tokio::test]
async fn test_metrics_endpoint() {
    let dir = TempDir::new().unwrap();
    let server = ready_service(&dir).await;
    enroll(&server, "Alice", vec![0.0, 0.0]).await;

    let response = server.get("/metrics").await;
    assert_eq!(response.status_code(), 200);
    assert!(response.text().contains("face_enrolled_identities"));
}

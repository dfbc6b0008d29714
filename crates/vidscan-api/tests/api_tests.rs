//! Router-level tests with a scripted detector and an in-memory video backend.

use std::path::Path;
use std::sync::Arc;
use std::time::Duration;

use axum::body::Body;
use axum::http::{header, Request, StatusCode};
use axum::Router;
use http_body_util::BodyExt;
use serde_json::{json, Value};
use tempfile::TempDir;
use tower::ServiceExt;

use vidscan_api::{create_router, ApiConfig, AppState};
use vidscan_media::{encode_png, png_data_uri, FrameAnnotator};
use vidscan_models::{JobId, JobStatus};
use vidscan_worker::testing::{
    abnormal_detection, normal_detection, tagged_frame, tagged_frames, MemoryBackend,
    ScriptedDetector,
};

const BOUNDARY: &str = "vidscan-test-boundary";

struct TestApp {
    router: Router,
    state: AppState,
    dir: TempDir,
}

impl TestApp {
    fn new(detector: ScriptedDetector, backend: MemoryBackend) -> Self {
        let dir = TempDir::new().unwrap();
        let config = ApiConfig {
            upload_dir: dir.path().join("uploads"),
            sample_video_path: dir.path().join("vid.mp4"),
            ..ApiConfig::default()
        };
        std::fs::create_dir_all(&config.upload_dir).unwrap();

        let state = AppState::with_components(
            config,
            Arc::new(detector),
            Arc::new(FrameAnnotator::default()),
            Arc::new(backend),
        );
        let router = create_router(state.clone(), None);
        Self { router, state, dir }
    }

    fn upload_dir(&self) -> &Path {
        &self.state.config.upload_dir
    }

    async fn send(&self, request: Request<Body>) -> (StatusCode, axum::http::HeaderMap, Vec<u8>) {
        let response = self.router.clone().oneshot(request).await.unwrap();
        let status = response.status();
        let headers = response.headers().clone();
        let body = response.into_body().collect().await.unwrap().to_bytes().to_vec();
        (status, headers, body)
    }

    async fn get_json(&self, uri: &str) -> (StatusCode, Value) {
        let request = Request::builder().uri(uri).body(Body::empty()).unwrap();
        let (status, _, body) = self.send(request).await;
        (status, serde_json::from_slice(&body).unwrap())
    }

    async fn upload(&self, uri: &str, filename: &str, content: &[u8]) -> (StatusCode, Value) {
        let (status, _, body) = self.send(multipart_request(uri, filename, content)).await;
        (status, serde_json::from_slice(&body).unwrap())
    }

    async fn post_json(&self, uri: &str, payload: Value) -> (StatusCode, Value) {
        let request = Request::builder()
            .method("POST")
            .uri(uri)
            .header(header::CONTENT_TYPE, "application/json")
            .body(Body::from(payload.to_string()))
            .unwrap();
        let (status, _, body) = self.send(request).await;
        (status, serde_json::from_slice(&body).unwrap())
    }

    /// Wait until the active slot is free again.
    async fn wait_idle(&self) {
        tokio::time::timeout(Duration::from_secs(5), async {
            while self.state.jobs.is_busy() {
                tokio::task::yield_now().await;
            }
        })
        .await
        .expect("active slot released in time")
    }

    async fn download(&self, uri: &str) -> (StatusCode, Vec<u8>) {
        let request = Request::builder().uri(uri).body(Body::empty()).unwrap();
        let (status, _, body) = self.send(request).await;
        (status, body)
    }

    fn uploaded_files(&self) -> Vec<String> {
        let mut names: Vec<String> = std::fs::read_dir(self.upload_dir())
            .unwrap()
            .map(|e| e.unwrap().file_name().to_string_lossy().to_string())
            .collect();
        names.sort();
        names
    }

    async fn wait_until(&self, job_id: &JobId, done: impl Fn(&JobStatus) -> bool) -> JobStatus {
        let store = self.state.jobs.get(job_id).expect("job registered");
        let mut rx = store.subscribe();
        tokio::time::timeout(Duration::from_secs(5), async {
            loop {
                let status = store.get();
                if done(&status) {
                    return status;
                }
                rx.changed().await.unwrap();
            }
        })
        .await
        .expect("job reached expected state in time")
    }
}

fn multipart_request(uri: &str, filename: &str, content: &[u8]) -> Request<Body> {
    let mut body = format!(
        "--{BOUNDARY}\r\nContent-Disposition: form-data; name=\"file\"; filename=\"{filename}\"\r\n\
         Content-Type: application/octet-stream\r\n\r\n"
    )
    .into_bytes();
    body.extend_from_slice(content);
    body.extend_from_slice(format!("\r\n--{BOUNDARY}--\r\n").as_bytes());

    Request::builder()
        .method("POST")
        .uri(uri)
        .header(
            header::CONTENT_TYPE,
            format!("multipart/form-data; boundary={BOUNDARY}"),
        )
        .body(Body::from(body))
        .unwrap()
}

fn png_bytes(tag: u8) -> Vec<u8> {
    encode_png(&tagged_frame(tag, 32, 24)).unwrap()
}

fn job_id_of(body: &Value) -> JobId {
    JobId::from_string(body["job_id"].as_str().expect("job_id in response"))
}

fn ten_frame_app() -> TestApp {
    let detector = ScriptedDetector::new()
        .with(3, vec![abnormal_detection()])
        .with(7, vec![abnormal_detection()]);
    TestApp::new(detector, MemoryBackend::new(tagged_frames(10, 32, 24)))
}

#[tokio::test]
async fn test_health() {
    let app = TestApp::new(ScriptedDetector::new(), MemoryBackend::new(Vec::new()));
    let (status, body) = app.get_json("/healthz").await;

    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["status"], "healthy");
    assert!(body["version"].is_string());
}

#[tokio::test]
async fn test_progress_starts_idle() {
    let app = TestApp::new(ScriptedDetector::new(), MemoryBackend::new(Vec::new()));
    let (status, body) = app.get_json("/api/video-progress").await;

    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["status"], "idle");
    assert_eq!(body["progress"].as_f64(), Some(0.0));
}

#[tokio::test]
async fn test_rejects_disallowed_extension() {
    let app = ten_frame_app();
    let (status, body) = app.upload("/api/process-video", "notes.txt", b"hello").await;

    assert_eq!(status, StatusCode::BAD_REQUEST);
    assert_eq!(body, json!({"success": false, "error": "Invalid file type"}));

    assert!(app.state.jobs.is_empty());
    assert!(app.uploaded_files().is_empty());
    let (_, progress) = app.get_json("/api/video-progress").await;
    assert_eq!(progress["status"], "idle");
}

#[tokio::test]
async fn test_rejects_missing_file() {
    let app = ten_frame_app();
    let (status, body) = app.upload("/api/process-video", "", b"").await;
    assert_eq!(status, StatusCode::BAD_REQUEST);
    assert_eq!(body["error"], "No file selected");
}

#[tokio::test]
async fn test_video_job_completes() {
    let app = ten_frame_app();
    let (status, body) = app.upload("/api/process-video", "my clip.mp4", b"fake video").await;

    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["success"], true);
    assert_eq!(body["message"], "Video processing started");
    assert_eq!(body["session_id"].as_str().map(str::len), Some(15));

    let job_id = job_id_of(&body);
    app.wait_until(&job_id, JobStatus::is_terminal).await;

    let (_, progress) = app.get_json("/api/video-progress").await;
    assert_eq!(progress["status"], "completed");
    assert_eq!(progress["progress"].as_f64(), Some(100.0));
    assert_eq!(progress["frame_count"], 10);
    assert_eq!(progress["total_frames"], 10);
    assert_eq!(progress["abnormal_count"], 2);
    assert_eq!(progress["avg_abnormality"].as_f64(), Some(20.0));

    let frames = progress["abnormal_frames"].as_array().unwrap();
    let numbers: Vec<u64> = frames.iter().map(|f| f["frame_number"].as_u64().unwrap()).collect();
    assert_eq!(numbers, vec![3, 7]);
    assert_eq!(frames[0]["abnormal_count"], 1);
    assert!(frames[0]["image"].as_str().unwrap().starts_with("data:image/png;base64,"));

    // Input removed, output kept.
    let files = app.uploaded_files();
    assert!(files.iter().all(|f| !f.starts_with("input_")), "{:?}", files);
    assert!(files.iter().any(|f| f.starts_with("output_") && f.ends_with(".avi")));

    let request = Request::builder()
        .uri("/api/download-video")
        .body(Body::empty())
        .unwrap();
    let (status, headers, bytes) = app.send(request).await;
    assert_eq!(status, StatusCode::OK);
    let disposition = headers[header::CONTENT_DISPOSITION].to_str().unwrap();
    assert!(disposition.contains("output_video.avi"));
    assert!(bytes.starts_with(b"memory video: 10 frames"));
}

#[tokio::test]
async fn test_download_while_processing_is_not_ready() {
    let (backend, _gate) = MemoryBackend::new(tagged_frames(5, 16, 16)).gated();
    let app = TestApp::new(ScriptedDetector::new(), backend);

    let (_, body) = app.upload("/api/process-video", "clip.avi", b"fake").await;
    let job_id = job_id_of(&body);
    app.wait_until(&job_id, JobStatus::is_processing).await;

    let (status, body) = app.get_json("/api/download-video").await;
    assert_eq!(status, StatusCode::BAD_REQUEST);
    assert_eq!(body["error"], "No completed video available");

    let (status, _) = app
        .get_json(&format!("/api/jobs/{}/download", job_id))
        .await;
    assert_eq!(status, StatusCode::BAD_REQUEST);
}

#[tokio::test]
async fn test_download_before_any_job() {
    let app = ten_frame_app();
    let (status, body) = app.get_json("/api/download-video").await;
    assert_eq!(status, StatusCode::BAD_REQUEST);
    assert_eq!(body["success"], false);
}

#[tokio::test]
async fn test_concurrent_submission_conflicts() {
    let (backend, gate) = MemoryBackend::new(tagged_frames(2, 16, 16)).gated();
    let app = TestApp::new(ScriptedDetector::new(), backend);

    let (status, first) = app.upload("/api/process-video", "a.mp4", b"a").await;
    assert_eq!(status, StatusCode::OK);
    let first_id = job_id_of(&first);

    let (status, body) = app.upload("/api/process-video", "b.mp4", b"b").await;
    assert_eq!(status, StatusCode::CONFLICT);
    assert_eq!(body["success"], false);

    // The rejected upload never reached the disk.
    let inputs: Vec<String> = app
        .uploaded_files()
        .into_iter()
        .filter(|f| f.starts_with("input_"))
        .collect();
    assert_eq!(inputs.len(), 1);
    assert!(inputs[0].ends_with("_a.mp4"));

    // The running job is untouched.
    gate.add_permits(3);
    let status = app.wait_until(&first_id, JobStatus::is_terminal).await;
    assert!(matches!(status, JobStatus::Completed { frame_count: 2, .. }));
}

#[tokio::test]
async fn test_back_to_back_jobs_keep_their_artifacts() {
    let (backend, gate) = MemoryBackend::new(tagged_frames(2, 16, 16)).gated();
    let app = TestApp::new(ScriptedDetector::new(), backend);

    gate.add_permits(3);
    let (_, first) = app.upload("/api/process-video", "clip.mp4", b"one").await;
    let first_id = job_id_of(&first);
    let first_status = app.wait_until(&first_id, JobStatus::is_terminal).await;
    app.wait_idle().await;

    // Usually the same second as the first job; the second job stays mid-run.
    let (status, second) = app.upload("/api/process-video", "clip.mp4", b"two").await;
    assert_eq!(status, StatusCode::OK);
    let second_id = job_id_of(&second);
    app.wait_until(&second_id, JobStatus::is_processing).await;

    let first_output = first_status.output_file().unwrap().to_string();
    assert!(first_output.contains(first_id.as_str()));

    // Each job owns its own output file.
    let outputs = || {
        app.uploaded_files()
            .into_iter()
            .filter(|f| f.starts_with("output_"))
            .count()
    };
    tokio::time::timeout(Duration::from_secs(5), async {
        while outputs() < 2 {
            tokio::time::sleep(Duration::from_millis(5)).await;
        }
    })
    .await
    .expect("second job opened its own output");

    let (status, bytes) = app
        .download(&format!("/api/jobs/{}/download", first_id))
        .await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(bytes, b"memory video: 2 frames");
}

#[tokio::test]
async fn test_job_endpoints() {
    let app = ten_frame_app();
    let (status, _) = app.get_json("/api/jobs/does-not-exist/progress").await;
    assert_eq!(status, StatusCode::NOT_FOUND);
    let (status, _) = app.get_json("/api/jobs/does-not-exist/download").await;
    assert_eq!(status, StatusCode::NOT_FOUND);

    let (_, body) = app.upload("/api/process-video", "clip.mov", b"fake").await;
    let job_id = job_id_of(&body);
    app.wait_until(&job_id, JobStatus::is_terminal).await;

    let (status, progress) = app.get_json(&format!("/api/jobs/{}/progress", job_id)).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(progress["status"], "completed");
    assert_eq!(progress["abnormal_count"], 2);
}

#[tokio::test]
async fn test_failed_job_reports_error() {
    let backend = MemoryBackend::new(tagged_frames(3, 16, 16)).failing_open();
    let app = TestApp::new(ScriptedDetector::new(), backend);

    let (status, body) = app.upload("/api/process-video", "broken.mkv", b"junk").await;
    assert_eq!(status, StatusCode::OK);
    app.wait_until(&job_id_of(&body), JobStatus::is_terminal).await;

    let (_, progress) = app.get_json("/api/video-progress").await;
    assert_eq!(progress["status"], "error");
    assert!(progress["error"].as_str().unwrap().starts_with("Could not open video"));
}

#[tokio::test]
async fn test_sample_video() {
    let app = ten_frame_app();
    let (status, body) = app.post_json("/api/process-sample-video", json!({})).await;
    assert_eq!(status, StatusCode::NOT_FOUND);
    assert_eq!(body["error"], "Sample video not found");

    let sample = app.dir.path().join("vid.mp4");
    std::fs::write(&sample, b"sample").unwrap();

    let (status, body) = app.post_json("/api/process-sample-video", json!({})).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["message"], "Sample video processing started");
    let status = app.wait_until(&job_id_of(&body), JobStatus::is_terminal).await;

    let output = status.output_file().unwrap().to_string();
    assert!(output.contains("output_sample_"));
    assert!(sample.exists());
}

#[tokio::test]
async fn test_detect_image_without_detections() {
    let app = TestApp::new(ScriptedDetector::new(), MemoryBackend::new(Vec::new()));
    let (status, body) = app.upload("/api/detect-image", "photo.png", &png_bytes(1)).await;

    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["success"], true);
    assert_eq!(body["total_detections"], 0);
    assert_eq!(body["abnormal_detections"], 0);
    assert_eq!(body["abnormality_percentage"].as_f64(), Some(0.0));
    assert_eq!(body["detections"], json!([]));
    let image = body["image"].as_str().unwrap();
    assert!(image.len() > "data:image/png;base64,".len());

    // Sync endpoints never create jobs.
    assert!(app.state.jobs.is_empty());
}

#[tokio::test]
async fn test_detect_image_reports_detections() {
    let detector = ScriptedDetector::new().with(5, vec![abnormal_detection(), normal_detection()]);
    let app = TestApp::new(detector, MemoryBackend::new(Vec::new()));
    let (status, body) = app.upload("/api/detect-image", "PHOTO.PNG", &png_bytes(5)).await;

    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["total_detections"], 2);
    assert_eq!(body["abnormal_detections"], 1);
    assert_eq!(body["abnormality_percentage"].as_f64(), Some(50.0));
    assert_eq!(
        body["detections"][0],
        json!({
            "index": 0,
            "class": "Abnormal",
            "class_id": 1,
            "confidence": 0.9,
            "bbox": {"x1": 4, "y1": 4, "x2": 12, "y2": 12}
        })
    );
    assert_eq!(body["detections"][1]["class"], "Normal");
}

#[tokio::test]
async fn test_detect_image_rejects_video_extension() {
    let app = TestApp::new(ScriptedDetector::new(), MemoryBackend::new(Vec::new()));
    let (status, body) = app.upload("/api/detect-image", "clip.mp4", &png_bytes(1)).await;
    assert_eq!(status, StatusCode::BAD_REQUEST);
    assert_eq!(body["error"], "Invalid file type");
}

#[tokio::test]
async fn test_detect_image_undecodable() {
    let app = TestApp::new(ScriptedDetector::new(), MemoryBackend::new(Vec::new()));
    let (status, body) = app.upload("/api/detect-image", "photo.jpg", b"not an image").await;
    assert_eq!(status, StatusCode::INTERNAL_SERVER_ERROR);
    assert_eq!(body["success"], false);
}

#[tokio::test]
async fn test_camera_frame() {
    let detector = ScriptedDetector::new().with(2, vec![abnormal_detection(), normal_detection()]);
    let app = TestApp::new(detector, MemoryBackend::new(Vec::new()));
    let frame = png_data_uri(&tagged_frame(2, 32, 24)).unwrap();

    let (status, body) = app
        .post_json("/api/process-camera-frame", json!({ "frame": frame }))
        .await;

    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["success"], true);
    assert_eq!(body["total_detections"], 2);
    assert_eq!(body["abnormal_detections"], 1);
    assert_eq!(body["abnormality_percentage"].as_f64(), Some(50.0));
    assert!(body["frame"].as_str().unwrap().starts_with("data:image/png;base64,"));
    assert!(app.state.jobs.is_empty());
}

#[tokio::test]
async fn test_camera_frame_validation() {
    let app = TestApp::new(ScriptedDetector::new(), MemoryBackend::new(Vec::new()));

    let (status, body) = app.post_json("/api/process-camera-frame", json!({})).await;
    assert_eq!(status, StatusCode::BAD_REQUEST);
    assert_eq!(body["error"], "No frame provided");

    let (status, _) = app
        .post_json(
            "/api/process-camera-frame",
            json!({ "frame": "data:image/png;base64,bm90IGFuIGltYWdl" }),
        )
        .await;
    assert_eq!(status, StatusCode::INTERNAL_SERVER_ERROR);
}

#[tokio::test]
async fn test_response_headers() {
    let app = TestApp::new(ScriptedDetector::new(), MemoryBackend::new(Vec::new()));

    let request = Request::builder()
        .uri("/health")
        .header("x-request-id", "req-123")
        .body(Body::empty())
        .unwrap();
    let (_, headers, _) = app.send(request).await;
    assert_eq!(headers["x-request-id"], "req-123");
    assert_eq!(headers["x-content-type-options"], "nosniff");

    let request = Request::builder().uri("/health").body(Body::empty()).unwrap();
    let (_, headers, _) = app.send(request).await;
    assert!(!headers["x-request-id"].is_empty());
}

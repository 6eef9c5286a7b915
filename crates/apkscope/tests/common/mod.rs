//! Shared harness for end-to-end tests: an in-process router wired to a
//! real database, upload store, queue, and (optionally) worker pool.

use std::io::Write;
use std::sync::Arc;
use std::time::Duration;

use axum::body::Body;
use axum::http::{Request, StatusCode};
use axum::response::Response;
use axum::Router;
use http_body_util::BodyExt;
use tempfile::TempDir;
use tower::util::ServiceExt;
use zip::write::SimpleFileOptions;

use apkscope::api::{self, ApiState};
use apkscope::config::Config;
use apkscope::{ApkAnalyzer, Database, JobQueue, UploadOrchestrator, UploadStore, WorkerPool};

pub const TOKEN_ALICE: &str = "token-alice";
pub const TOKEN_BOB: &str = "token-bob";
pub const APK_CONTENT_TYPE: &str = "application/vnd.android.package-archive";

pub struct TestHarness {
    pub temp_dir: TempDir,
    pub db: Database,
    pub queue: Arc<JobQueue>,
    pub router: Router,
    config: Config,
    pool: Option<WorkerPool>,
}

impl TestHarness {
    pub fn new() -> Self {
        let temp_dir = TempDir::new().unwrap();

        let mut config = Config::default();
        config.upload_dir = temp_dir.path().join("uploads");
        config.output_dir = temp_dir.path().join("output");
        config
            .auth_tokens
            .insert(TOKEN_ALICE.to_string(), "alice".to_string());
        config
            .auth_tokens
            .insert(TOKEN_BOB.to_string(), "bob".to_string());
        // Generous budgets so rate limiting never trips ordinary tests.
        config.limits.upload_rate.max_requests = 1000;
        config.limits.general_rate.max_requests = 10_000;

        let db = Database::open_in_memory().unwrap();
        let (queue, _events) = JobQueue::new(db.clone(), &config.queue.name);
        let queue = Arc::new(queue);

        let orchestrator = Arc::new(UploadOrchestrator::new(
            db.clone(),
            UploadStore::new(&config.upload_dir),
            Arc::clone(&queue),
        ));
        let state = Arc::new(ApiState::new(db.clone(), orchestrator, &config));
        let router = api::router(state, config.limits.max_upload_bytes);

        Self {
            temp_dir,
            db,
            queue,
            router,
            config,
            pool: None,
        }
    }

    /// Starts a worker pool draining this harness's queue.
    pub fn start_workers(&mut self, count: usize) {
        let pool = WorkerPool::start(
            self.db.clone(),
            Arc::clone(&self.queue),
            Arc::new(UploadStore::new(&self.config.upload_dir)),
            Arc::new(ApkAnalyzer::new(&self.config.output_dir)),
            count,
        );
        self.pool = Some(pool);
    }

    pub fn stop_workers(&mut self) {
        if let Some(pool) = self.pool.take() {
            pool.shutdown();
            pool.wait();
        }
    }

    pub async fn upload(&self, token: &str, filename: &str, bytes: &[u8]) -> Response {
        self.upload_with_content_type(token, filename, APK_CONTENT_TYPE, bytes)
            .await
    }

    pub async fn upload_with_content_type(
        &self,
        token: &str,
        filename: &str,
        content_type: &str,
        bytes: &[u8],
    ) -> Response {
        let (body, boundary) = multipart_body("apkFile", filename, content_type, bytes);
        self.router
            .clone()
            .oneshot(
                Request::post("/upload")
                    .header("authorization", format!("Bearer {}", token))
                    .header(
                        "content-type",
                        format!("multipart/form-data; boundary={}", boundary),
                    )
                    .body(Body::from(body))
                    .unwrap(),
            )
            .await
            .unwrap()
    }

    pub async fn get_analysis(&self, token: &str, id: &str) -> Response {
        self.router
            .clone()
            .oneshot(
                Request::get(format!("/analyses/{}", id))
                    .header("authorization", format!("Bearer {}", token))
                    .body(Body::empty())
                    .unwrap(),
            )
            .await
            .unwrap()
    }

    /// Polls the analysis endpoint until the record reaches a terminal
    /// status, returning the final JSON view.
    pub async fn await_terminal(&self, token: &str, id: &str) -> serde_json::Value {
        for _ in 0..200 {
            let response = self.get_analysis(token, id).await;
            assert_eq!(response.status(), StatusCode::OK);
            let json = body_json(response).await;
            let status = json["data"]["status"].as_str().unwrap().to_string();
            if status == "analyzed" || status == "failed" {
                return json;
            }
            tokio::time::sleep(Duration::from_millis(50)).await;
        }
        panic!("analysis {} never reached a terminal status", id);
    }

    pub fn analysis_count(&self) -> u64 {
        self.db
            .with_conn(|conn| {
                let count: u64 =
                    conn.query_row("SELECT COUNT(*) FROM analyses", [], |r| r.get(0))?;
                Ok(count)
            })
            .unwrap()
    }

    pub fn upload_dir_entries(&self) -> usize {
        let dir = self.temp_dir.path().join("uploads");
        if !dir.exists() {
            return 0;
        }
        std::fs::read_dir(dir).unwrap().count()
    }
}

impl Drop for TestHarness {
    fn drop(&mut self) {
        self.stop_workers();
    }
}

pub async fn body_json(response: Response) -> serde_json::Value {
    let bytes = response.into_body().collect().await.unwrap().to_bytes();
    serde_json::from_slice(&bytes).unwrap()
}

/// Builds a single-file multipart body and returns it with its boundary.
pub fn multipart_body(
    field: &str,
    filename: &str,
    content_type: &str,
    bytes: &[u8],
) -> (Vec<u8>, &'static str) {
    const BOUNDARY: &str = "apkscope-test-boundary";
    let mut body = Vec::new();
    body.extend_from_slice(format!("--{}\r\n", BOUNDARY).as_bytes());
    body.extend_from_slice(
        format!(
            "Content-Disposition: form-data; name=\"{}\"; filename=\"{}\"\r\n",
            field, filename
        )
        .as_bytes(),
    );
    body.extend_from_slice(format!("Content-Type: {}\r\n\r\n", content_type).as_bytes());
    body.extend_from_slice(bytes);
    body.extend_from_slice(format!("\r\n--{}--\r\n", BOUNDARY).as_bytes());
    (body, BOUNDARY)
}

/// A structurally valid APK with the given manifest and a few resources.
pub fn apk_with_manifest(manifest: &str) -> Vec<u8> {
    let mut cursor = std::io::Cursor::new(Vec::new());
    {
        let mut writer = zip::ZipWriter::new(&mut cursor);
        let opts = SimpleFileOptions::default();
        writer.start_file("AndroidManifest.xml", opts).unwrap();
        writer.write_all(manifest.as_bytes()).unwrap();
        writer.start_file("classes.dex", opts).unwrap();
        writer.write_all(b"dex").unwrap();
        writer.start_file("res/drawable/icon.png", opts).unwrap();
        writer.write_all(b"png").unwrap();
        writer.finish().unwrap();
    }
    cursor.into_inner()
}

/// A well-formed zip with no manifest entry.
pub fn apk_without_manifest() -> Vec<u8> {
    let mut cursor = std::io::Cursor::new(Vec::new());
    {
        let mut writer = zip::ZipWriter::new(&mut cursor);
        writer
            .start_file("classes.dex", SimpleFileOptions::default())
            .unwrap();
        writer.write_all(b"dex").unwrap();
        writer.finish().unwrap();
    }
    cursor.into_inner()
}

pub const BENIGN_MANIFEST: &str = r#"<?xml version="1.0" encoding="utf-8"?>
<manifest xmlns:android="http://schemas.android.com/apk/res/android"
    package="com.example.benign" android:versionCode="1" android:versionName="1.0">
    <uses-permission android:name="android.permission.INTERNET"/>
    <application>
        <activity android:name=".MainActivity" android:exported="false"/>
    </application>
</manifest>"#;

pub const RISKY_MANIFEST: &str = r#"<?xml version="1.0" encoding="utf-8"?>
<manifest xmlns:android="http://schemas.android.com/apk/res/android"
    package="com.example.risky" android:versionCode="3" android:versionName="2.1">
    <uses-permission android:name="android.permission.CAMERA"/>
    <uses-permission android:name="android.permission.READ_SMS"/>
    <uses-permission android:name="android.permission.INTERNET"/>
    <application>
        <activity android:name=".ExportedActivity" android:exported="true"/>
        <service android:name=".InternalService" android:exported="false"/>
    </application>
</manifest>"#;

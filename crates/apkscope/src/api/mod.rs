//! HTTP surface: upload intake, analysis polling, health.
//!
//! Handlers stay thin. The upload handler authenticates, rate-limits,
//! pulls the multipart field, and hands the bytes to the orchestrator
//! on a blocking thread; nothing heavier runs on the request path.

pub mod rate_limit;
pub mod response;

use std::collections::HashMap;
use std::sync::Arc;

use axum::extract::{DefaultBodyLimit, Multipart, Path, State};
use axum::http::{header, HeaderMap, StatusCode};
use axum::response::Response;
use axum::routing::{get, post};
use axum::Router;
use chrono::{DateTime, Utc};
use serde::Serialize;
use tower_http::trace::TraceLayer;
use tracing::{error, info};

use crate::analysis::AnalysisReport;
use crate::config::Config;
use crate::db::{analysis_repo, Database};
use crate::db::analysis_repo::AnalysisStatus;
use crate::error::UploadError;
use crate::upload::UploadOrchestrator;

use rate_limit::RateLimiter;
use response::{error as error_response, success};

const APK_CONTENT_TYPE: &str = "application/vnd.android.package-archive";
const UPLOAD_FIELD: &str = "apkFile";

pub struct ApiState {
    db: Database,
    orchestrator: Arc<UploadOrchestrator>,
    /// Bearer token -> user id.
    tokens: HashMap<String, String>,
    upload_limiter: RateLimiter,
    general_limiter: RateLimiter,
}

impl ApiState {
    pub fn new(db: Database, orchestrator: Arc<UploadOrchestrator>, config: &Config) -> Self {
        Self {
            db,
            orchestrator,
            tokens: config.auth_tokens.clone(),
            upload_limiter: RateLimiter::new(config.limits.upload_rate),
            general_limiter: RateLimiter::new(config.limits.general_rate),
        }
    }
}

pub fn router(state: Arc<ApiState>, max_upload_bytes: usize) -> Router {
    Router::new()
        .route("/health", get(health))
        .route("/upload", post(upload))
        .route("/analyses/:id", get(get_analysis))
        .layer(DefaultBodyLimit::max(max_upload_bytes))
        .layer(TraceLayer::new_for_http())
        .with_state(state)
}

async fn health() -> &'static str {
    "OK"
}

/// Resolves the bearer token to a user id, or produces the 401 response.
fn authenticate(state: &ApiState, headers: &HeaderMap) -> Result<String, Response> {
    let token = headers
        .get(header::AUTHORIZATION)
        .and_then(|v| v.to_str().ok())
        .and_then(|v| v.strip_prefix("Bearer "));

    match token.and_then(|t| state.tokens.get(t)) {
        Some(user_id) => Ok(user_id.clone()),
        None => Err(error_response(
            StatusCode::UNAUTHORIZED,
            "UNAUTHORIZED",
            "Missing or invalid bearer token",
        )),
    }
}

fn check_rate(limiter: &RateLimiter, user_id: &str) -> Result<(), Response> {
    if limiter.allow(user_id) {
        Ok(())
    } else {
        Err(error_response(
            StatusCode::TOO_MANY_REQUESTS,
            "RATE_LIMIT_EXCEEDED",
            "Too many requests, try again later",
        ))
    }
}

async fn upload(
    State(state): State<Arc<ApiState>>,
    headers: HeaderMap,
    mut multipart: Multipart,
) -> Response {
    let user_id = match authenticate(&state, &headers) {
        Ok(user_id) => user_id,
        Err(response) => return response,
    };
    if let Err(response) = check_rate(&state.general_limiter, &user_id) {
        return response;
    }
    if let Err(response) = check_rate(&state.upload_limiter, &user_id) {
        return response;
    }

    let mut package: Option<(String, Vec<u8>)> = None;
    loop {
        let field = match multipart.next_field().await {
            Ok(Some(field)) => field,
            Ok(None) => break,
            Err(e) => {
                return error_response(
                    StatusCode::BAD_REQUEST,
                    "VALIDATION_ERROR",
                    &format!("Malformed multipart body: {}", e),
                );
            }
        };

        if field.name() != Some(UPLOAD_FIELD) {
            continue;
        }

        if field.content_type() != Some(APK_CONTENT_TYPE) {
            return error_response(
                StatusCode::BAD_REQUEST,
                "VALIDATION_ERROR",
                &format!("Only {} uploads are accepted", APK_CONTENT_TYPE),
            );
        }

        let name = field
            .file_name()
            .map(|n| n.to_string())
            .unwrap_or_else(|| "upload.apk".to_string());
        match field.bytes().await {
            Ok(bytes) => {
                package = Some((name, bytes.to_vec()));
                break;
            }
            Err(e) => {
                return error_response(
                    StatusCode::BAD_REQUEST,
                    "VALIDATION_ERROR",
                    &format!("Failed to read uploaded file: {}", e),
                );
            }
        }
    }

    let Some((name, bytes)) = package else {
        return error_response(
            StatusCode::BAD_REQUEST,
            "NO_FILE_UPLOADED",
            "No file was uploaded",
        );
    };

    let orchestrator = Arc::clone(&state.orchestrator);
    let result = tokio::task::spawn_blocking(move || {
        orchestrator.handle_upload(&user_id, &name, &bytes)
    })
    .await;

    match result {
        Ok(Ok(receipt)) => {
            let message = if receipt.deduplicated {
                "Identical package already submitted; returning existing analysis"
            } else {
                "File uploaded successfully and queued for analysis"
            };
            success(serde_json::json!({
                "analysisId": receipt.analysis_id,
                "fileId": receipt.file_id,
                "message": message,
            }))
        }
        Ok(Err(UploadError::NoFile)) => error_response(
            StatusCode::BAD_REQUEST,
            "NO_FILE_UPLOADED",
            "No file was uploaded",
        ),
        Ok(Err(UploadError::Validation(failure))) => error_response(
            StatusCode::BAD_REQUEST,
            "VALIDATION_ERROR",
            &failure.to_string(),
        ),
        Ok(Err(UploadError::Internal(e))) => {
            error!("Upload failed: {}", e);
            error_response(
                StatusCode::INTERNAL_SERVER_ERROR,
                "INTERNAL_ERROR",
                "Internal server error",
            )
        }
        Err(e) => {
            error!("Upload task panicked: {}", e);
            error_response(
                StatusCode::INTERNAL_SERVER_ERROR,
                "INTERNAL_ERROR",
                "Internal server error",
            )
        }
    }
}

/// Wire view of an analysis record.
#[derive(Serialize)]
#[serde(rename_all = "camelCase")]
struct AnalysisView {
    analysis_id: String,
    apk_name: String,
    content_hash: String,
    status: AnalysisStatus,
    #[serde(skip_serializing_if = "Option::is_none")]
    output_path: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    error_details: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    report: Option<AnalysisReport>,
    created_at: DateTime<Utc>,
    updated_at: DateTime<Utc>,
}

async fn get_analysis(
    State(state): State<Arc<ApiState>>,
    headers: HeaderMap,
    Path(id): Path<String>,
) -> Response {
    let user_id = match authenticate(&state, &headers) {
        Ok(user_id) => user_id,
        Err(response) => return response,
    };
    if let Err(response) = check_rate(&state.general_limiter, &user_id) {
        return response;
    }

    let db = state.db.clone();
    let record = tokio::task::spawn_blocking(move || analysis_repo::find_by_id(&db, &id)).await;

    match record {
        // Records owned by other users are indistinguishable from
        // missing ones.
        Ok(Ok(Some(record))) if record.user_id == user_id => {
            info!("Returning analysis {} ({})", record.id, record.status);
            success(AnalysisView {
                analysis_id: record.id,
                apk_name: record.apk_name,
                content_hash: record.content_hash,
                status: record.status,
                output_path: record.output_path,
                error_details: record.error_details,
                report: record.report,
                created_at: record.created_at,
                updated_at: record.updated_at,
            })
        }
        Ok(Ok(_)) => error_response(StatusCode::NOT_FOUND, "NOT_FOUND", "Analysis not found"),
        Ok(Err(e)) => {
            error!("Record lookup failed: {}", e);
            error_response(
                StatusCode::INTERNAL_SERVER_ERROR,
                "INTERNAL_ERROR",
                "Internal server error",
            )
        }
        Err(e) => {
            error!("Lookup task panicked: {}", e);
            error_response(
                StatusCode::INTERNAL_SERVER_ERROR,
                "INTERNAL_ERROR",
                "Internal server error",
            )
        }
    }
}

//! Wire-level response envelope.
//!
//! Every JSON response is either `{"success": true, "data": ...}` or
//! `{"success": false, "error": {"code", "message"}}`.

use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use axum::Json;
use serde::Serialize;
use serde_json::json;

pub fn success<T: Serialize>(data: T) -> Response {
    Json(json!({ "success": true, "data": data })).into_response()
}

pub fn error(status: StatusCode, code: &str, message: &str) -> Response {
    let body = Json(json!({
        "success": false,
        "error": { "code": code, "message": message }
    }));
    (status, body).into_response()
}

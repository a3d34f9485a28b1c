//! Fs API handlers and the storage-backend interface.
//!
//! The backend that actually resolves and streams file bytes is an external
//! collaborator; this module only defines the interface it presents and the
//! thin handlers that shape its answers into the wire envelopes.

use async_trait::async_trait;
use axum::extract::{Extension, Json, Path, State};
use axum::http::{header, StatusCode};
use axum::response::{IntoResponse, Response};
use bytes::Bytes;
use serde::{Deserialize, Serialize};
use serde_json::json;

use common::identity::StoreError;
use common::path::clean_path;
use common::sign::SignError;

use crate::auth::RequestUser;
use crate::http::error_response;
use crate::GateState;

pub const FS_KIND_FILE: i32 = 0;
pub const FS_KIND_DIR: i32 = 1;

/// One filesystem entry as the fs API reports it.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct FsObject {
    pub name: String,
    pub path: String,
    #[serde(rename = "type")]
    pub kind: i32,
}

/// Raw file content as the backend serves it.
#[derive(Debug, Clone)]
pub struct FileContent {
    pub mime: String,
    pub bytes: Bytes,
}

/// The interface the excluded storage backend presents. Lookups are
/// bounded-latency; "not found" is `Ok(None)`.
#[async_trait]
pub trait Storage: Send + Sync {
    async fn list(&self, path: &str) -> Result<Vec<FsObject>, StoreError>;
    async fn get(&self, path: &str) -> Result<Option<FsObject>, StoreError>;
    async fn fetch(&self, path: &str) -> Result<Option<FileContent>, StoreError>;
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct FsRequest {
    pub path: String,
    /// Accepted for wire compatibility; password checks live in the
    /// excluded storage layer, not in this one.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub password: Option<String>,
}

#[derive(Debug, thiserror::Error)]
pub enum FsError {
    #[error("storage failure: {0}")]
    Storage(#[from] StoreError),
}

impl IntoResponse for FsError {
    fn into_response(self) -> Response {
        tracing::error!("fs handler failed: {self}");
        error_response(StatusCode::INTERNAL_SERVER_ERROR, &self.to_string())
    }
}

pub async fn list_handler(
    State(state): State<GateState>,
    Json(req): Json<FsRequest>,
) -> Result<impl IntoResponse, FsError> {
    let path = clean_path(&req.path);
    let content = state.storage().list(&path).await?;
    Ok(Json(json!({
        "code": 200,
        "message": "success",
        "content": content,
    })))
}

pub async fn get_handler(
    State(state): State<GateState>,
    Json(req): Json<FsRequest>,
) -> Result<impl IntoResponse, FsError> {
    let path = clean_path(&req.path);
    match state.storage().get(&path).await? {
        Some(object) => Ok(Json(json!({
            "code": 200,
            "message": "success",
            "data": object,
        }))),
        None => Ok(Json(json!({
            "code": 404,
            "message": "object not found",
        }))),
    }
}

async fn serve_content(state: &GateState, path: &str) -> Result<Response, FsError> {
    match state.storage().fetch(path).await? {
        Some(content) => Ok((
            StatusCode::OK,
            [(header::CONTENT_TYPE, content.mime)],
            content.bytes,
        )
            .into_response()),
        None => Ok(error_response(StatusCode::NOT_FOUND, "file not found")),
    }
}

pub async fn download_handler(
    State(state): State<GateState>,
    Path(path): Path<String>,
) -> Result<Response, FsError> {
    serve_content(&state, &clean_path(&path)).await
}

pub async fn proxy_handler(
    State(state): State<GateState>,
    Path(path): Path<String>,
) -> Result<Response, FsError> {
    serve_content(&state, &clean_path(&path)).await
}

pub async fn shared_download_handler(
    State(state): State<GateState>,
    Path((_sid, path)): Path<(String, String)>,
) -> Result<Response, FsError> {
    serve_content(&state, &clean_path(&path)).await
}

/// Who am I. Reachable even by a disabled guest.
pub async fn me_handler(Extension(RequestUser(user)): Extension<RequestUser>) -> Response {
    Json(json!({
        "code": 200,
        "message": "success",
        "data": user,
    }))
    .into_response()
}

/// Mint an identity-bearing signed link for a path, bound to the caller.
pub async fn sign_handler(
    State(state): State<GateState>,
    Extension(RequestUser(user)): Extension<RequestUser>,
    Json(req): Json<FsRequest>,
) -> Response {
    let path = clean_path(&req.path);
    match state.signer().sign_with_user(&path, &user.username) {
        Ok(sign) => Json(json!({
            "code": 200,
            "message": "success",
            "data": { "sign": sign },
        }))
        .into_response(),
        Err(SignError::Malformed) => {
            error_response(StatusCode::BAD_REQUEST, "username cannot be signed")
        }
        Err(e) => {
            tracing::error!("signing failed: {e}");
            error_response(StatusCode::INTERNAL_SERVER_ERROR, "signing failed")
        }
    }
}

/// Admin-only: force an eviction sweep of the audit dedup cache.
pub async fn audit_sweep_handler(State(state): State<GateState>) -> Response {
    state.audit().cache().sweep();
    Json(json!({
        "code": 200,
        "message": "success",
    }))
    .into_response()
}

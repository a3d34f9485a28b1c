//! Router assembly and small HTTP helpers.

use std::net::SocketAddr;

use axum::extract::{ConnectInfo, Request};
use axum::http::header::{ACCEPT, AUTHORIZATION, CONTENT_TYPE, ORIGIN, RANGE};
use axum::http::{Method, StatusCode};
use axum::middleware::{from_fn, from_fn_with_state};
use axum::response::{IntoResponse, Response};
use axum::routing::{get, post};
use axum::{Json, Router};
use tower_http::cors::{Any, CorsLayer};
use tower_http::trace::TraceLayer;

use crate::{auth, down, fs, media_audit, GateState};

/// Which content surface a request came through.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum ContentRoute<'a> {
    Download,
    Proxy,
    Shared(&'a str),
}

/// Split a content-route URI path into its surface and the virtual path
/// below it. Returns `None` for non-content paths.
pub(crate) fn strip_content_prefix(path: &str) -> Option<(ContentRoute<'_>, &str)> {
    if let Some(rest) = path.strip_prefix("/d/") {
        return Some((ContentRoute::Download, rest));
    }
    if let Some(rest) = path.strip_prefix("/p/") {
        return Some((ContentRoute::Proxy, rest));
    }
    if let Some(rest) = path.strip_prefix("/sd/") {
        let (sid, below) = rest.split_once('/').unwrap_or((rest, ""));
        if !sid.is_empty() {
            return Some((ContentRoute::Shared(sid), below));
        }
    }
    None
}

/// Uniform JSON error envelope.
pub(crate) fn error_response(status: StatusCode, message: &str) -> Response {
    (
        status,
        Json(serde_json::json!({
            "code": status.as_u16(),
            "message": message,
            "data": null,
        })),
    )
        .into_response()
}

/// Best-effort client address: forwarded headers first, then the socket
/// peer.
pub(crate) fn client_ip(req: &Request) -> String {
    if let Some(forwarded) = req
        .headers()
        .get("x-forwarded-for")
        .and_then(|v| v.to_str().ok())
    {
        if let Some(first) = forwarded.split(',').next().map(str::trim) {
            if !first.is_empty() {
                return first.to_string();
            }
        }
    }
    if let Some(real_ip) = req.headers().get("x-real-ip").and_then(|v| v.to_str().ok()) {
        if !real_ip.is_empty() {
            return real_ip.to_string();
        }
    }
    req.extensions()
        .get::<ConnectInfo<SocketAddr>>()
        .map(|ConnectInfo(addr)| addr.ip().to_string())
        .unwrap_or_else(|| "unknown".to_string())
}

async fn ping_handler() -> &'static str {
    "pong"
}

async fn not_found_handler() -> Response {
    error_response(StatusCode::NOT_FOUND, "not found")
}

/// Build the gateway router.
///
/// Layer order per group, outermost first: caller resolution, then the
/// signature gate, then the audit observer wrapping the handler, so the
/// observer sees both the resolved identity and the outbound response.
pub fn router(state: GateState) -> Router {
    let content = Router::new()
        .route("/d/*path", get(fs::download_handler))
        .route("/p/*path", get(fs::proxy_handler))
        .route("/sd/:sid/*path", get(fs::shared_download_handler))
        .layer(from_fn_with_state(state.clone(), media_audit::media_audit))
        .layer(from_fn_with_state(state.clone(), down::down_gate))
        .layer(from_fn_with_state(state.clone(), auth::optional_auth));

    let fs_api = Router::new()
        .route("/api/fs/list", post(fs::list_handler))
        .route("/api/fs/get", post(fs::get_handler))
        .layer(from_fn_with_state(state.clone(), media_audit::media_audit))
        .layer(from_fn_with_state(state.clone(), auth::require_auth));

    let account_api = Router::new().route("/api/me", get(fs::me_handler)).layer(
        from_fn_with_state(state.clone(), auth::require_auth_allowing_disabled_guest),
    );

    let sign_api = Router::new()
        .route("/api/fs/sign", post(fs::sign_handler))
        .layer(from_fn(auth::require_not_guest))
        .layer(from_fn_with_state(state.clone(), auth::require_auth));

    let admin_api = Router::new()
        .route("/api/admin/audit/sweep", post(fs::audit_sweep_handler))
        .layer(from_fn(auth::require_admin))
        .layer(from_fn_with_state(state.clone(), auth::require_auth));

    let cors = CorsLayer::new()
        .allow_methods([Method::GET, Method::POST, Method::HEAD])
        .allow_headers([ACCEPT, ORIGIN, AUTHORIZATION, CONTENT_TYPE, RANGE])
        .allow_origin(Any);

    Router::new()
        .merge(content)
        .merge(fs_api)
        .merge(account_api)
        .merge(sign_api)
        .merge(admin_api)
        .route("/ping", get(ping_handler))
        .fallback(not_found_handler)
        .layer(cors)
        .layer(TraceLayer::new_for_http())
        .with_state(state)
}

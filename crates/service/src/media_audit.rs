//! Response-observing audit middleware.
//!
//! Two surfaces feed the audit trail: direct media-path requests (extension
//! detection on the request path) and the fs list/get API, whose JSON
//! response bodies are buffered and inspected for media entries, using the
//! response's own path field (which differs from the request path when a
//! directory is being listed). Inspection buffering is capped; a body past
//! the cap is forwarded untouched and simply goes uninspected. Raw content
//! streams are never buffered here.
//!
//! Nothing in this middleware may break file access: every parse, lookup,
//! or buffering failure is logged at debug severity and swallowed.

use axum::body::Body;
use axum::extract::{Query, Request, State};
use axum::http::header::{RANGE, USER_AGENT};
use axum::http::Method;
use axum::middleware::Next;
use axum::response::Response;
use bytes::Bytes;
use futures::stream::{self, StreamExt};
use serde::Deserialize;
use std::collections::HashMap;

use common::audit::{AuditEntry, GUEST_DISPLAY_NAME};
use common::classify::{classify, is_media_name, is_media_path, Behavior};
use common::identity::Sharing;

use crate::auth::RequestUser;
use crate::fs::FsObject;
use crate::http::client_ip;
use crate::GateState;

/// Static assets and liveness probes never produce audit lines.
const IGNORED_PREFIXES: &[&str] = &[
    "/assets/",
    "/images/",
    "/favicon.ico",
    "/robots.txt",
    "/ping",
    "/manifest.json",
];

/// Share identifiers are fixed-length opaque strings.
const SHARING_ID_LEN: usize = 12;

/// Upper bound for inspection buffering. Bodies past the cap pass through
/// uninspected.
const MAX_INSPECT_BYTES: usize = 16 * 1024 * 1024;

/// Outcome of buffering a body for inspection.
enum Inspected {
    /// The whole body fit under the cap.
    Complete(Bytes),
    /// Over the cap or broken mid-stream; the body is reassembled for
    /// pass-through and goes uninspected.
    PassThrough(Body),
}

/// Buffer a body up to `cap` bytes without ever losing it: on overflow the
/// collected prefix is replayed ahead of the remaining stream, and a
/// mid-stream error is replayed after whatever bytes did arrive.
async fn buffer_for_inspection(body: Body, cap: usize) -> Inspected {
    let mut stream = body.into_data_stream();
    let mut collected: Vec<u8> = Vec::new();
    loop {
        let Some(chunk) = stream.next().await else {
            return Inspected::Complete(Bytes::from(collected));
        };
        match chunk {
            Ok(data) => {
                collected.extend_from_slice(&data);
                if collected.len() > cap {
                    let prefix =
                        stream::once(async move { Ok::<_, axum::Error>(Bytes::from(collected)) });
                    return Inspected::PassThrough(Body::from_stream(prefix.chain(stream)));
                }
            }
            Err(e) => {
                let replay = stream::iter(vec![Ok(Bytes::from(collected)), Err(e)]);
                return Inspected::PassThrough(Body::from_stream(replay));
            }
        }
    }
}

const FS_LIST_PATH: &str = "/api/fs/list";
const FS_GET_PATH: &str = "/api/fs/get";

pub async fn media_audit(State(state): State<GateState>, req: Request, next: Next) -> Response {
    let path = req.uri().path().to_string();

    // Players probe with HEAD before the real GET; only the GET counts.
    if req.method() == Method::HEAD || IGNORED_PREFIXES.iter().any(|p| path.starts_with(p)) {
        return next.run(req).await;
    }

    let user_agent = req
        .headers()
        .get(USER_AGENT)
        .and_then(|v| v.to_str().ok())
        .unwrap_or("")
        .to_string();
    let has_range = req.headers().contains_key(RANGE);
    let client_ip = client_ip(&req);
    let query_token = Query::<HashMap<String, String>>::try_from_uri(req.uri())
        .ok()
        .and_then(|Query(q)| q.get("token").cloned());

    let inspect_response = path == FS_LIST_PATH || path == FS_GET_PATH;
    let mut sharing = sharing_from_path(&state, &path).await;

    let mut req = req;
    if inspect_response {
        // Peek at the request body: share-rooted request paths carry the
        // share id as their first segment. The body is restored verbatim.
        let (parts, body) = req.into_parts();
        match buffer_for_inspection(body, MAX_INSPECT_BYTES).await {
            Inspected::Complete(body_bytes) => {
                if sharing.is_none() {
                    sharing = sharing_from_body(&state, &body_bytes).await;
                }
                req = Request::from_parts(parts, Body::from(body_bytes));
            }
            Inspected::PassThrough(body) => {
                tracing::debug!("fs request body not inspectable; passing through");
                req = Request::from_parts(parts, body);
            }
        }
    }

    // The resolved identity travels with the request; capture it before the
    // handler consumes it.
    let resolved = req.extensions().get::<RequestUser>().cloned();
    let response = next.run(req).await;

    let username = audit_username(&state, resolved.as_ref(), query_token.as_deref());

    if is_media_path(&path) {
        let behavior = classify(&path, &user_agent, has_range);
        emit(&state, &client_ip, &username, behavior, &path, &sharing);
        return response;
    }

    if inspect_response {
        let (parts, body) = response.into_parts();
        let body_bytes = match buffer_for_inspection(body, MAX_INSPECT_BYTES).await {
            Inspected::Complete(bytes) => bytes,
            Inspected::PassThrough(body) => {
                tracing::debug!("fs response body not inspectable; passing through");
                return Response::from_parts(parts, body);
            }
        };
        let media_paths = if path == FS_LIST_PATH {
            media_paths_from_list(&body_bytes)
        } else {
            media_paths_from_get(&body_bytes)
        };
        if !media_paths.is_empty() {
            let behavior = classify(&path, &user_agent, has_range);
            for media_path in media_paths {
                emit(&state, &client_ip, &username, behavior, &media_path, &sharing);
            }
        }
        return Response::from_parts(parts, Body::from(body_bytes));
    }

    response
}

fn audit_username(
    state: &GateState,
    resolved: Option<&RequestUser>,
    query_token: Option<&str>,
) -> String {
    if let Some(RequestUser(user)) = resolved {
        if !user.is_guest() {
            return user.username.clone();
        }
    }
    // Some clients only carry a token in the URL; a parseable one still
    // names the caller even when resolution upstream fell back to guest.
    if let Some(token) = query_token {
        if let Ok(claims) = state.sessions().parse(token) {
            return claims.username;
        }
    }
    GUEST_DISPLAY_NAME.to_string()
}

fn emit(
    state: &GateState,
    client_ip: &str,
    username: &str,
    behavior: Behavior,
    path: &str,
    sharing: &Option<Sharing>,
) {
    let entry = AuditEntry::now(
        client_ip.to_string(),
        username.to_string(),
        behavior,
        path.to_string(),
    )
    .with_sharing(sharing.clone());
    if state.audit().log(&entry) {
        // Opportunistic eviction, off the request path.
        let audit = state.audit().clone();
        tokio::spawn(async move { audit.cache().sweep() });
    }
}

async fn lookup_sharing(state: &GateState, sid: &str) -> Option<Sharing> {
    match state.sharings().by_id(sid).await {
        Ok(sharing) => sharing,
        Err(e) => {
            tracing::debug!("sharing lookup failed for {sid}: {e}");
            None
        }
    }
}

async fn sharing_from_path(state: &GateState, path: &str) -> Option<Sharing> {
    let rest = path.strip_prefix("/sd/")?;
    let sid = rest.split('/').next().filter(|s| !s.is_empty())?;
    lookup_sharing(state, sid).await
}

#[derive(Deserialize)]
struct ShareProbe {
    #[serde(default)]
    path: String,
}

async fn sharing_from_body(state: &GateState, body: &Bytes) -> Option<Sharing> {
    let probe: ShareProbe = serde_json::from_slice(body).ok()?;
    let first = probe.path.strip_prefix('/')?.split('/').next()?;
    if first.len() != SHARING_ID_LEN {
        return None;
    }
    lookup_sharing(state, first).await
}

#[derive(Deserialize, Default)]
struct ListBody {
    #[serde(default)]
    code: u16,
    #[serde(default)]
    content: Vec<FsObject>,
}

#[derive(Deserialize, Default)]
struct GetBody {
    #[serde(default)]
    code: u16,
    #[serde(default)]
    data: Option<FsObject>,
}

fn media_paths_from_list(body: &Bytes) -> Vec<String> {
    let Ok(parsed) = serde_json::from_slice::<ListBody>(body) else {
        return Vec::new();
    };
    if parsed.code != 200 {
        return Vec::new();
    }
    parsed
        .content
        .into_iter()
        .filter(|item| is_media_name(&item.name))
        .map(|item| item.path)
        .collect()
}

fn media_paths_from_get(body: &Bytes) -> Vec<String> {
    let Ok(parsed) = serde_json::from_slice::<GetBody>(body) else {
        return Vec::new();
    };
    if parsed.code != 200 {
        return Vec::new();
    }
    parsed
        .data
        .filter(|object| is_media_name(&object.name))
        .map(|object| vec![object.path])
        .unwrap_or_default()
}

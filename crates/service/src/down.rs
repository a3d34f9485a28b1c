//! Path authorization gate for content routes.
//!
//! Decides once per request whether the path mandates a signed link, then
//! verifies the presented signature. An identity-bearing signature also
//! recovers the caller identity, so a signed download link acts as a full
//! credential even without a session; when no signature is required, a bad
//! one only skips identity recovery and is never fatal.

use axum::extract::{Query, Request, State};
use axum::http::StatusCode;
use axum::middleware::Next;
use axum::response::{IntoResponse, Response};
use std::collections::HashMap;

use common::identity::PathMeta;
use common::path::clean_path;
use common::sign::{SignError, SignedQuery};

use crate::auth::RequestUser;
use crate::http::{error_response, strip_content_prefix};
use crate::GateState;

/// Whether `path` may only be served with a valid signature.
///
/// True when the global sign-all policy is on, when the storage backend for
/// the path mandates signing, or when the nearest ancestor metadata carries
/// a password and either is for this exact path or explicitly extends to
/// sub-paths. No password anywhere in the ancestry means no requirement.
pub fn requires_signature(
    sign_all: bool,
    storage_mandates: bool,
    meta: Option<&PathMeta>,
    path: &str,
) -> bool {
    if sign_all || storage_mandates {
        return true;
    }
    let Some(meta) = meta else {
        return false;
    };
    let has_password = meta.password.as_deref().is_some_and(|p| !p.is_empty());
    if !has_password {
        return false;
    }
    path == meta.path || meta.allow_signed_subpaths
}

#[derive(Debug, thiserror::Error)]
pub enum GateError {
    #[error("sign error: {0}")]
    Sign(SignError),
    #[error("metadata lookup failed: {0}")]
    Store(#[from] common::identity::StoreError),
}

impl IntoResponse for GateError {
    fn into_response(self) -> Response {
        match self {
            GateError::Sign(e) => {
                // Mismatch and malformed are deliberately indistinguishable
                // in the response; the real kind only reaches the debug log.
                tracing::debug!("signature rejected: {e}");
                let message = match e {
                    SignError::Expired => "sign expired",
                    SignError::SignatureMismatch | SignError::Malformed => "sign invalid",
                };
                error_response(StatusCode::UNAUTHORIZED, message)
            }
            GateError::Store(e) => {
                tracing::error!("metadata lookup failed: {e}");
                error_response(StatusCode::INTERNAL_SERVER_ERROR, "internal error")
            }
        }
    }
}

/// Content-route middleware: evaluates the gate and verifies signatures.
pub async fn down_gate(State(state): State<GateState>, mut req: Request, next: Next) -> Response {
    let raw_path = match strip_content_prefix(req.uri().path()) {
        Some((_, rest)) => clean_path(rest),
        None => clean_path(req.uri().path()),
    };

    let query: HashMap<String, String> = Query::try_from_uri(req.uri())
        .map(|Query(q)| q)
        .unwrap_or_default();
    let signed = SignedQuery::decode(
        query.get("sign").map(String::as_str).unwrap_or(""),
        query.get("user").map(String::as_str),
    );

    // Not-found metadata is "no restriction"; a hard failure aborts.
    let meta = match state.metas().nearest_meta(&raw_path).await {
        Ok(meta) => meta,
        Err(e) => return GateError::Store(e).into_response(),
    };
    let required = requires_signature(
        state.sign_all(),
        state.metas().storage_requires_sign(&raw_path),
        meta.as_ref(),
        &raw_path,
    );

    // Identity recovery: a signature bound to a username resolves that
    // user, whether or not the path mandated signing. A valid
    // identity-bearing signature authorizes the path on its own, even when
    // the username no longer resolves to a live account.
    let mut verified = false;
    let mut recovered = None;
    if !signed.is_empty() {
        if let Some(username) = &signed.username {
            if state
                .signer()
                .verify_with_user(&raw_path, username, &signed.signature)
                .is_ok()
            {
                verified = true;
                match state.users().by_name(username).await {
                    Ok(Some(user)) => recovered = Some(user),
                    Ok(None) => tracing::debug!("signed-link user {username} does not exist"),
                    Err(e) => tracing::debug!("signed-link user lookup failed: {e}"),
                }
            }
        }
    }

    if required && !verified {
        if let Err(e) = state.signer().verify(&raw_path, &signed.signature) {
            return GateError::Sign(e).into_response();
        }
    }

    if let Some(user) = recovered {
        req.extensions_mut().insert(RequestUser(user));
    }
    next.run(req).await
}

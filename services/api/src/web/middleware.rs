//! services/api/src/web/middleware.rs
//!
//! Authorization guard for protected routes.

use axum::{
    extract::{Request, State},
    http::{header, HeaderMap, StatusCode},
    middleware::Next,
    response::{IntoResponse, Response},
    Json,
};
use moa_core::domain::Principal;
use std::sync::Arc;

use crate::tokens::TokenError;
use crate::web::{state::AppState, ErrorBody};

fn challenge(www_authenticate: &'static str, message: &str, code: &str) -> Response {
    (
        StatusCode::UNAUTHORIZED,
        [(header::WWW_AUTHENTICATE, www_authenticate)],
        Json(ErrorBody::with_code(message, code)),
    )
        .into_response()
}

/// Extracts and validates the bearer access token, producing the request
/// principal. Kept as a plain function so the check is testable without
/// a `Next`. Rejection happens before any other work: a missing header
/// is refused without touching the verifier at all.
pub fn principal_from_headers(headers: &HeaderMap, state: &AppState) -> Result<Principal, Response> {
    let header_value = headers
        .get(header::AUTHORIZATION)
        .and_then(|v| v.to_str().ok())
        .unwrap_or("");
    let Some(token) = header_value.strip_prefix("Bearer ") else {
        return Err(challenge(
            r#"Bearer realm="api", error="invalid_request""#,
            "Authorization Bearer token required",
            "NO_BEARER",
        ));
    };

    match state.tokens.verify_access(token) {
        Ok(claims) => Ok(Principal {
            uid: claims.uid,
            provider: claims.provider,
            provider_id: claims.provider_id,
        }),
        Err(TokenError::Expired) => Err(challenge(
            r#"Bearer error="invalid_token", error_description="expired""#,
            "access token expired",
            "TOKEN_EXPIRED",
        )),
        Err(_) => Err(challenge(
            r#"Bearer error="invalid_token", error_description="invalid signature or malformed""#,
            "invalid access token",
            "TOKEN_INVALID",
        )),
    }
}

/// Middleware that validates the bearer access token and inserts the
/// resulting `Principal` into request extensions for handlers to use.
/// The principal's `uid` is the sole source of ownership scoping; no
/// handler reads a user identifier from the client.
pub async fn require_auth(
    State(state): State<Arc<AppState>>,
    mut req: Request,
    next: Next,
) -> Result<Response, Response> {
    let principal = principal_from_headers(req.headers(), &state)?;
    req.extensions_mut().insert(principal);
    Ok(next.run(req).await)
}

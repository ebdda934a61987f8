//! services/api/src/web/auth.rs
//!
//! Authentication endpoints: identity-assertion verification, two-phase
//! signup, refresh-token rotation and logout.

use axum::{
    extract::State,
    http::{header, HeaderMap, StatusCode},
    Json,
};
use moa_core::domain::{NewUser, SessionMeta, User};
use moa_core::ports::PortError;
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use tracing::{error, info, warn};
use utoipa::ToSchema;
use uuid::Uuid;

use crate::tokens::TokenError;
use crate::web::{fail, port_failure, state::AppState, Ack, ErrorBody, Failure};

//=========================================================================================
// Request/Response Types
//=========================================================================================

#[derive(Deserialize, ToSchema)]
pub struct VerifyRequest {
    pub code: Option<String>,
}

#[derive(Deserialize, ToSchema)]
pub struct SignupRequest {
    #[serde(rename = "providerID")]
    pub provider_id: Option<String>,
    pub nickname: Option<String>,
    pub birthdate: Option<String>,
    pub gender: Option<String>,
    pub email: Option<String>,
    pub name: Option<String>,
    pub picture: Option<String>,
}

#[derive(Deserialize, ToSchema)]
#[serde(rename_all = "camelCase")]
pub struct RefreshRequest {
    pub refresh_token: Option<String>,
}

#[derive(Deserialize, ToSchema)]
#[serde(rename_all = "camelCase")]
pub struct LogoutRequest {
    pub refresh_token: Option<String>,
}

/// The public projection of a user. Never exposes provider identifiers
/// or anything beyond these five fields.
#[derive(Debug, Serialize, ToSchema)]
#[serde(rename_all = "camelCase")]
pub struct UserView {
    pub id: Uuid,
    pub email: Option<String>,
    pub name: Option<String>,
    pub picture: Option<String>,
    pub nickname: Option<String>,
}

pub fn pick_user(user: &User) -> UserView {
    UserView {
        id: user.id,
        email: user.email.clone(),
        name: user.name.clone(),
        picture: user.picture.clone(),
        nickname: user.nickname.clone(),
    }
}

/// Provider-supplied profile fields offered back to the client so the
/// signup form can be prefilled.
#[derive(Debug, Serialize, ToSchema)]
#[serde(rename_all = "camelCase")]
pub struct SignupPrefill {
    pub email: Option<String>,
    pub name: Option<String>,
    pub picture: Option<String>,
}

#[derive(Debug, Serialize, ToSchema)]
#[serde(rename_all = "camelCase")]
pub struct LoginView {
    pub status: String,
    pub access_token: String,
    pub refresh_token: String,
    pub user: UserView,
}

#[derive(Debug, Serialize, ToSchema)]
#[serde(rename_all = "camelCase")]
pub struct NeedSignupView {
    pub status: String,
    pub prefill: SignupPrefill,
    pub hint: String,
}

#[derive(Debug, Serialize, ToSchema)]
#[serde(untagged)]
pub enum VerifyResponse {
    Login(LoginView),
    NeedSignup(NeedSignupView),
}

#[derive(Debug, Serialize, ToSchema)]
#[serde(rename_all = "camelCase")]
pub struct RefreshView {
    pub access_token: String,
    pub refresh_token: String,
}

//=========================================================================================
// Helpers
//=========================================================================================

/// Captures request metadata persisted with each issued session.
fn session_meta(headers: &HeaderMap) -> SessionMeta {
    SessionMeta {
        ip: headers
            .get("x-forwarded-for")
            .and_then(|v| v.to_str().ok())
            .map(|v| v.split(',').next().unwrap_or(v).trim().to_string()),
        user_agent: headers
            .get(header::USER_AGENT)
            .and_then(|v| v.to_str().ok())
            .map(str::to_string),
    }
}

async fn issue_token_pair(
    state: &AppState,
    user: &User,
    meta: SessionMeta,
) -> Result<(String, String), Failure> {
    let access = state.tokens.issue_access(user).map_err(|e| {
        error!("access token signing failed: {e}");
        fail(StatusCode::INTERNAL_SERVER_ERROR, "server error")
    })?;
    let refresh = state
        .tokens
        .issue_refresh(user, state.store.as_ref(), meta)
        .await
        .map_err(|e| port_failure("refresh token issuance", e))?;
    Ok((access, refresh))
}

//=========================================================================================
// Handlers
//=========================================================================================

/// POST /auth/verify - Verify an identity-provider assertion.
///
/// Known identity: issues a token pair and reports `login`. Unknown
/// identity: reports `need-signup` with provider-supplied prefill and
/// the stable external identifier as the signup hint. No user record is
/// created here (two-phase signup).
#[utoipa::path(
    post,
    path = "/auth/verify",
    request_body = VerifyRequest,
    responses(
        (status = 200, description = "Verified; either logged in or signup required"),
        (status = 400, description = "Missing assertion code", body = ErrorBody),
        (status = 401, description = "Assertion exchange or verification failed", body = ErrorBody)
    )
)]
pub async fn verify_handler(
    State(state): State<Arc<AppState>>,
    headers: HeaderMap,
    Json(req): Json<VerifyRequest>,
) -> Result<(StatusCode, Json<VerifyResponse>), Failure> {
    // 1. Require the assertion code.
    let code = match req.code.as_deref() {
        Some(code) if !code.trim().is_empty() => code,
        _ => return Err(fail(StatusCode::BAD_REQUEST, "code is required")),
    };

    // 2. Exchange and verify it with the identity provider.
    let profile = state.identity.verify_assertion(code).await.map_err(|e| {
        warn!("identity assertion verification failed: {e}");
        (
            StatusCode::UNAUTHORIZED,
            Json(ErrorBody::new("invalid identity assertion")),
        )
    })?;

    // 3. Look the identity up; absence means the client must complete signup.
    let existing = state
        .store
        .find_user_by_identity(&profile.provider, &profile.provider_id)
        .await
        .map_err(|e| port_failure("user lookup", e))?;

    let Some(user) = existing else {
        return Ok((
            StatusCode::OK,
            Json(VerifyResponse::NeedSignup(NeedSignupView {
                status: "need-signup".to_string(),
                prefill: SignupPrefill {
                    email: profile.email,
                    name: profile.name,
                    picture: profile.picture,
                },
                hint: profile.provider_id,
            })),
        ));
    };

    // 4. Known user: touch lastLoginAt and issue a fresh token pair.
    state
        .store
        .touch_last_login(user.id)
        .await
        .map_err(|e| port_failure("last-login update", e))?;

    let (access_token, refresh_token) =
        issue_token_pair(&state, &user, session_meta(&headers)).await?;

    info!("user {} logged in via {}", user.id, user.provider);
    Ok((
        StatusCode::OK,
        Json(VerifyResponse::Login(LoginView {
            status: "login".to_string(),
            access_token,
            refresh_token,
            user: pick_user(&user),
        })),
    ))
}

/// POST /auth/signup - Complete the second phase of signup.
#[utoipa::path(
    post,
    path = "/auth/signup",
    request_body = SignupRequest,
    responses(
        (status = 201, description = "User registered", body = LoginView),
        (status = 400, description = "Missing required fields", body = ErrorBody),
        (status = 409, description = "Identity already registered", body = ErrorBody)
    )
)]
pub async fn signup_handler(
    State(state): State<Arc<AppState>>,
    headers: HeaderMap,
    Json(req): Json<SignupRequest>,
) -> Result<(StatusCode, Json<LoginView>), Failure> {
    // 1. Validate the self-reported fields.
    let provider_id = match req.provider_id.as_deref() {
        Some(id) if !id.trim().is_empty() => id.to_string(),
        _ => return Err(fail(StatusCode::BAD_REQUEST, "providerID is required")),
    };
    let nickname = match req.nickname.as_deref() {
        Some(nickname) if !nickname.trim().is_empty() => nickname.to_string(),
        _ => return Err(fail(StatusCode::BAD_REQUEST, "nickname is required")),
    };

    // 2. Create the user; a duplicate (provider, providerID) is a conflict.
    let user = state
        .store
        .create_user(NewUser {
            provider: state.identity.provider_name().to_string(),
            provider_id,
            email: req.email,
            name: req.name,
            picture: req.picture,
            nickname: Some(nickname),
            birthdate: req.birthdate,
            gender: req.gender,
        })
        .await
        .map_err(|e| match e {
            PortError::Conflict(_) => fail(StatusCode::CONFLICT, "already registered"),
            other => port_failure("user creation", other),
        })?;

    // 3. Issue the first token pair for the new user.
    let (access_token, refresh_token) =
        issue_token_pair(&state, &user, session_meta(&headers)).await?;

    info!("user {} registered via {}", user.id, user.provider);
    Ok((
        StatusCode::CREATED,
        Json(LoginView {
            status: "registered".to_string(),
            access_token,
            refresh_token,
            user: pick_user(&user),
        }),
    ))
}

/// POST /auth/refresh - Rotate a refresh token.
///
/// The presented token's session is revoked *before* replacements are
/// issued, so rotation fails closed: whatever happens afterwards, the
/// old token is spent. Exactly one rotation per token can ever succeed;
/// concurrent attempts race on the store's conditional update and the
/// loser observes the revocation.
#[utoipa::path(
    post,
    path = "/auth/refresh",
    request_body = RefreshRequest,
    responses(
        (status = 200, description = "New token pair", body = RefreshView),
        (status = 400, description = "Missing token", body = ErrorBody),
        (status = 401, description = "Invalid, expired, revoked or legacy token", body = ErrorBody),
        (status = 404, description = "User no longer exists", body = ErrorBody)
    )
)]
pub async fn refresh_handler(
    State(state): State<Arc<AppState>>,
    headers: HeaderMap,
    Json(req): Json<RefreshRequest>,
) -> Result<(StatusCode, Json<RefreshView>), Failure> {
    // 1. Require the token.
    let Some(token) = req.refresh_token.as_deref() else {
        return Err(fail(StatusCode::BAD_REQUEST, "refreshToken is required"));
    };

    // 2. Verify signature and expiry; reject legacy payloads with a
    //    re-login instruction instead of accepting them.
    let claims = state.tokens.verify_refresh(token).map_err(|e| {
        let (message, code) = match e {
            TokenError::Expired => ("refresh token expired", "TOKEN_EXPIRED"),
            TokenError::UnsupportedFormat => {
                ("unsupported refresh token, please log in again", "TOKEN_INVALID")
            }
            TokenError::Invalid => ("invalid refresh token", "TOKEN_INVALID"),
        };
        (
            StatusCode::UNAUTHORIZED,
            Json(ErrorBody::with_code(message, code)),
        )
    })?;

    // 3. The session row decides whether the token is still live.
    let session = state
        .store
        .find_session_by_jti(claims.jti)
        .await
        .map_err(|e| port_failure("session lookup", e))?;
    let Some(session) = session else {
        return Err(fail(StatusCode::UNAUTHORIZED, "refresh token not recognized"));
    };
    if session.revoked_at.is_some() {
        // Possible reuse of a rotated-out token.
        warn!("refresh attempted with revoked jti {}", claims.jti);
        return Err(fail(StatusCode::UNAUTHORIZED, "refresh token revoked"));
    }
    if session.expires_at <= chrono::Utc::now() {
        return Err(fail(StatusCode::UNAUTHORIZED, "refresh token expired"));
    }

    // 4. Revoke before reissuing. Losing the race to another rotation
    //    of the same token is indistinguishable from presenting a
    //    revoked token.
    let revoked_now = state
        .store
        .revoke_session(claims.jti)
        .await
        .map_err(|e| port_failure("session revocation", e))?;
    if !revoked_now {
        warn!("lost revocation race for jti {}", claims.jti);
        return Err(fail(StatusCode::UNAUTHORIZED, "refresh token revoked"));
    }

    // 5. The user must still exist.
    let user = state.store.find_user_by_id(claims.uid).await.map_err(|e| match e {
        PortError::NotFound(_) => fail(StatusCode::NOT_FOUND, "user not found"),
        other => port_failure("user fetch", other),
    })?;

    // 6. Issue the replacement pair (a brand new session row).
    let (access_token, refresh_token) =
        issue_token_pair(&state, &user, session_meta(&headers)).await?;

    Ok((
        StatusCode::OK,
        Json(RefreshView {
            access_token,
            refresh_token,
        }),
    ))
}

/// POST /auth/logout - Revoke the presented refresh token's session.
///
/// Revoking an already-revoked session is a no-op success.
#[utoipa::path(
    post,
    path = "/auth/logout",
    request_body = LogoutRequest,
    responses(
        (status = 200, description = "Logged out", body = Ack),
        (status = 400, description = "Missing or invalid token", body = ErrorBody)
    )
)]
pub async fn logout_handler(
    State(state): State<Arc<AppState>>,
    Json(req): Json<LogoutRequest>,
) -> Result<(StatusCode, Json<Ack>), Failure> {
    let Some(token) = req.refresh_token.as_deref() else {
        return Err(fail(StatusCode::BAD_REQUEST, "refreshToken is required"));
    };

    let claims = state
        .tokens
        .verify_refresh(token)
        .map_err(|_| fail(StatusCode::BAD_REQUEST, "invalid refresh token"))?;

    // Idempotent in effect: a second logout finds the session already
    // revoked and still acknowledges.
    state
        .store
        .revoke_session(claims.jti)
        .await
        .map_err(|e| port_failure("session revocation", e))?;

    Ok((StatusCode::OK, Json(Ack::new("logged out"))))
}

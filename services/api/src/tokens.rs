//! services/api/src/tokens.rs
//!
//! Token issuing and verification. Access tokens are short-lived, stateless
//! HS256 credentials that cannot be revoked before expiry; refresh tokens
//! carry a session identifier (`jti`) whose lifecycle is persisted through
//! the store port, so a refresh token is only as alive as its session row.

use chrono::{Duration, Utc};
use jsonwebtoken::{
    decode, encode, errors::ErrorKind, Algorithm, DecodingKey, EncodingKey, Header, Validation,
};
use moa_core::{
    domain::{NewSession, SessionMeta, User},
    ports::{PortError, PortResult, StoreService},
};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// Clock-skew tolerance applied when validating refresh tokens.
const REFRESH_LEEWAY_SECS: u64 = 60;

#[derive(Debug, PartialEq, Eq, thiserror::Error)]
pub enum TokenError {
    #[error("token expired")]
    Expired,
    /// The payload decodes but lacks `uid` or `jti`: a legacy token
    /// format that is rejected with a re-login instruction rather than
    /// silently accepted.
    #[error("unsupported legacy token format")]
    UnsupportedFormat,
    #[error("invalid token")]
    Invalid,
}

/// Claims carried by an access token.
#[derive(Debug, PartialEq, Serialize, Deserialize)]
pub struct AccessClaims {
    pub uid: Uuid,
    pub provider: String,
    #[serde(rename = "providerID")]
    pub provider_id: String,
    pub iat: i64,
    pub exp: i64,
}

/// Refresh claims exactly as decoded from the wire. `uid` and `jti`
/// stay optional so a legacy token surfaces as `UnsupportedFormat`
/// instead of a deserialization error.
#[derive(Debug, Serialize, Deserialize)]
struct RawRefreshClaims {
    uid: Option<Uuid>,
    jti: Option<Uuid>,
    provider: Option<String>,
    #[serde(rename = "providerID")]
    provider_id: Option<String>,
    iat: i64,
    exp: i64,
}

/// A validated refresh token's identifying claims.
#[derive(Debug, Clone, PartialEq)]
pub struct RefreshClaims {
    pub uid: Uuid,
    pub jti: Uuid,
}

/// Mints and verifies the two token kinds. Construct once at startup
/// and share through the application state.
#[derive(Clone)]
pub struct TokenIssuer {
    access_secret: String,
    refresh_secret: String,
    access_ttl: Duration,
    refresh_ttl: Duration,
}

impl TokenIssuer {
    pub fn new(
        access_secret: String,
        refresh_secret: String,
        access_ttl: Duration,
        refresh_ttl: Duration,
    ) -> Self {
        Self {
            access_secret,
            refresh_secret,
            access_ttl,
            refresh_ttl,
        }
    }

    /// Signs a short-lived access token carrying the principal claims.
    pub fn issue_access(&self, user: &User) -> Result<String, TokenError> {
        let now = Utc::now();
        let claims = AccessClaims {
            uid: user.id,
            provider: user.provider.clone(),
            provider_id: user.provider_id.clone(),
            iat: now.timestamp(),
            exp: (now + self.access_ttl).timestamp(),
        };
        encode(
            &Header::new(Algorithm::HS256),
            &claims,
            &EncodingKey::from_secret(self.access_secret.as_bytes()),
        )
        .map_err(|_| TokenError::Invalid)
    }

    /// Issues a refresh token with a fresh `jti` and persists the
    /// matching session row. The row is written before the token leaves
    /// this function; a store failure propagates and no token exists.
    pub async fn issue_refresh(
        &self,
        user: &User,
        store: &dyn StoreService,
        meta: SessionMeta,
    ) -> PortResult<String> {
        let jti = Uuid::new_v4();
        let now = Utc::now();
        let expires_at = now + self.refresh_ttl;

        store
            .create_session(NewSession {
                user_id: user.id,
                jti,
                expires_at,
                ip: meta.ip,
                user_agent: meta.user_agent,
            })
            .await?;

        self.sign_refresh(user, jti, now.timestamp(), expires_at.timestamp())
            .map_err(|e| PortError::Unexpected(format!("refresh token signing failed: {e}")))
    }

    fn sign_refresh(
        &self,
        user: &User,
        jti: Uuid,
        iat: i64,
        exp: i64,
    ) -> Result<String, jsonwebtoken::errors::Error> {
        let claims = RawRefreshClaims {
            uid: Some(user.id),
            jti: Some(jti),
            provider: Some(user.provider.clone()),
            provider_id: Some(user.provider_id.clone()),
            iat,
            exp,
        };
        encode(
            &Header::new(Algorithm::HS256),
            &claims,
            &EncodingKey::from_secret(self.refresh_secret.as_bytes()),
        )
    }

    pub fn verify_access(&self, token: &str) -> Result<AccessClaims, TokenError> {
        let validation = Validation::new(Algorithm::HS256);
        decode::<AccessClaims>(
            token,
            &DecodingKey::from_secret(self.access_secret.as_bytes()),
            &validation,
        )
        .map(|data| data.claims)
        .map_err(|e| match e.kind() {
            ErrorKind::ExpiredSignature => TokenError::Expired,
            _ => TokenError::Invalid,
        })
    }

    /// Verifies a refresh token's signature and expiry (with clock-skew
    /// leeway) and requires both `uid` and `jti` claims.
    pub fn verify_refresh(&self, token: &str) -> Result<RefreshClaims, TokenError> {
        let mut validation = Validation::new(Algorithm::HS256);
        validation.leeway = REFRESH_LEEWAY_SECS;
        let data = decode::<RawRefreshClaims>(
            token,
            &DecodingKey::from_secret(self.refresh_secret.as_bytes()),
            &validation,
        )
        .map_err(|e| match e.kind() {
            ErrorKind::ExpiredSignature => TokenError::Expired,
            _ => TokenError::Invalid,
        })?;

        match (data.claims.uid, data.claims.jti) {
            (Some(uid), Some(jti)) => Ok(RefreshClaims { uid, jti }),
            _ => Err(TokenError::UnsupportedFormat),
        }
    }
}

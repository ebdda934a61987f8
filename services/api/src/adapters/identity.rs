//! services/api/src/adapters/identity.rs
//!
//! This module contains the adapter for the Google identity provider. It
//! implements the `IdentityProviderService` port by exchanging the client's
//! ID-token assertion against the tokeninfo endpoint and checking that the
//! token was minted for this application's client id.

use async_trait::async_trait;
use moa_core::domain::IdentityProfile;
use moa_core::ports::{IdentityProviderService, PortError, PortResult};
use serde::Deserialize;
use std::time::Duration;
use tracing::warn;

const TOKENINFO_URL: &str = "https://oauth2.googleapis.com/tokeninfo";

//=========================================================================================
// The Main Adapter Struct
//=========================================================================================

/// An adapter that verifies Google ID tokens.
#[derive(Clone)]
pub struct GoogleIdentityAdapter {
    http: reqwest::Client,
    client_id: String,
    timeout: Duration,
}

impl GoogleIdentityAdapter {
    /// Creates a new `GoogleIdentityAdapter`.
    pub fn new(http: reqwest::Client, client_id: String, timeout: Duration) -> Self {
        Self {
            http,
            client_id,
            timeout,
        }
    }
}

/// The subset of tokeninfo claims this service consumes. Google encodes
/// booleans as strings here.
#[derive(Deserialize)]
struct TokenInfo {
    sub: String,
    aud: String,
    email: Option<String>,
    name: Option<String>,
    picture: Option<String>,
    email_verified: Option<String>,
}

//=========================================================================================
// `IdentityProviderService` Trait Implementation
//=========================================================================================

#[async_trait]
impl IdentityProviderService for GoogleIdentityAdapter {
    fn provider_name(&self) -> &str {
        "google"
    }

    async fn verify_assertion(&self, assertion: &str) -> PortResult<IdentityProfile> {
        let response = self
            .http
            .get(TOKENINFO_URL)
            .query(&[("id_token", assertion)])
            .timeout(self.timeout)
            .send()
            .await
            .map_err(|e| PortError::Unavailable(format!("tokeninfo request failed: {e}")))?;

        // tokeninfo answers non-2xx for any invalid or expired token.
        if !response.status().is_success() {
            return Err(PortError::Unauthorized);
        }

        let info: TokenInfo = response
            .json()
            .await
            .map_err(|e| PortError::Unavailable(format!("tokeninfo response unreadable: {e}")))?;

        if info.aud != self.client_id {
            warn!("id token audience mismatch: {}", info.aud);
            return Err(PortError::Unauthorized);
        }

        Ok(IdentityProfile {
            provider: self.provider_name().to_string(),
            provider_id: info.sub,
            email: info.email,
            name: info.name,
            picture: info.picture,
            email_verified: info.email_verified.as_deref() == Some("true"),
        })
    }
}

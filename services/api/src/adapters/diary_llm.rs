//! services/api/src/adapters/diary_llm.rs
//!
//! This module contains the adapter for the external diary-generation
//! service. It implements the `DiaryGenerationService` port: the normalized
//! items go out as `{items, persona}`, a narrative text comes back as
//! `{diary}`. The call is bounded by an explicit timeout and is never
//! retried here; a transport failure, a non-2xx status and empty generated
//! text are all surfaced as `Unavailable`.

use async_trait::async_trait;
use moa_core::normalize::GenerationItem;
use moa_core::ports::{DiaryGenerationService, PortError, PortResult};
use serde::{Deserialize, Serialize};
use std::time::Duration;

//=========================================================================================
// The Main Adapter Struct
//=========================================================================================

/// An adapter that implements `DiaryGenerationService` over HTTP.
#[derive(Clone)]
pub struct HttpGenerationAdapter {
    http: reqwest::Client,
    base_url: String,
    timeout: Duration,
}

impl HttpGenerationAdapter {
    /// Creates a new `HttpGenerationAdapter`.
    pub fn new(http: reqwest::Client, base_url: String, timeout: Duration) -> Self {
        Self {
            http,
            base_url,
            timeout,
        }
    }
}

#[derive(Serialize)]
struct GenerateRequest<'a> {
    items: &'a [GenerationItem],
    persona: i32,
}

#[derive(Deserialize)]
struct GenerateResponse {
    diary: Option<String>,
}

//=========================================================================================
// `DiaryGenerationService` Trait Implementation
//=========================================================================================

#[async_trait]
impl DiaryGenerationService for HttpGenerationAdapter {
    async fn generate(&self, items: &[GenerationItem], persona: i32) -> PortResult<String> {
        let url = format!("{}/diary/generate", self.base_url.trim_end_matches('/'));

        let response = self
            .http
            .post(url)
            .timeout(self.timeout)
            .json(&GenerateRequest { items, persona })
            .send()
            .await
            .map_err(|e| PortError::Unavailable(format!("diary generation request failed: {e}")))?;

        if !response.status().is_success() {
            return Err(PortError::Unavailable(format!(
                "diary generation returned {}",
                response.status()
            )));
        }

        let body: GenerateResponse = response
            .json()
            .await
            .map_err(|e| PortError::Unavailable(format!("diary generation response unreadable: {e}")))?;

        let text = body.diary.unwrap_or_default();
        if text.trim().is_empty() {
            return Err(PortError::Unavailable(
                "diary generation returned empty text".to_string(),
            ));
        }
        Ok(text)
    }
}

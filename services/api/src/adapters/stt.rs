//! services/api/src/adapters/stt.rs
//!
//! This module contains the adapter for OpenAI's Speech-to-Text (Whisper)
//! service. It implements the `SpeechToTextService` port from the core crate.

use async_openai::{
    config::OpenAIConfig,
    error::OpenAIError,
    types::audio::{AudioInput, CreateTranscriptionRequest},
    Client,
};
use async_trait::async_trait;
use bytes::Bytes;
use moa_core::ports::{PortError, PortResult, SpeechToTextService};

//=========================================================================================
// The Main Adapter Struct
//=========================================================================================

/// An adapter that implements the `SpeechToTextService` port using the
/// OpenAI Whisper API. Uploaded files are passed through as-is; the
/// filename carries the container format and the configured language
/// hint improves recognition.
#[derive(Clone)]
pub struct WhisperSttAdapter {
    client: Client<OpenAIConfig>,
    model: String,
    language: String,
}

impl WhisperSttAdapter {
    /// Creates a new `WhisperSttAdapter`.
    pub fn new(client: Client<OpenAIConfig>, model: String, language: String) -> Self {
        Self {
            client,
            model,
            language,
        }
    }
}

//=========================================================================================
// `SpeechToTextService` Trait Implementation
//=========================================================================================

#[async_trait]
impl SpeechToTextService for WhisperSttAdapter {
    /// Transcribes an uploaded audio file using the configured Whisper model.
    async fn transcribe(&self, audio: Bytes, filename: &str) -> PortResult<String> {
        let input = AudioInput::from_vec_u8(filename.to_string(), audio.to_vec());

        let request = CreateTranscriptionRequest {
            file: input,
            model: self.model.clone(),
            language: Some(self.language.clone()),
            ..Default::default()
        };

        let response = self
            .client
            .audio()
            .transcription()
            .create(request)
            .await
            .map_err(|e: OpenAIError| PortError::Unavailable(e.to_string()))?;

        Ok(response.text)
    }
}

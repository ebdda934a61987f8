//! services/api/src/config.rs
//!
//! Defines the application's configuration structure and loading logic.
//!
//! All configuration is loaded from environment variables at startup. The `.env`
//! file is used for local development. Timeouts and TTLs for each external
//! collaborator are explicit fields here rather than constants at the call
//! sites, so every bound is visible and tunable in one place. The one
//! remaining implicit bound is the Whisper transcription call, which rides on
//! the OpenAI client's default timeout.

use std::net::SocketAddr;
use std::time::Duration;
use tracing::Level;

/// A custom error type for configuration loading failures.
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("Missing the environment variable {0}")]
    MissingVar(String),
    #[error("Invalid value for the environment variable {0}: {1}")]
    InvalidValue(String, String),
}

/// Holds all configuration loaded from the environment at startup.
#[derive(Clone, Debug)]
pub struct Config {
    pub bind_address: SocketAddr,
    pub database_url: String,
    pub log_level: Level,
    pub frontend_origin: String,

    // Token issuing
    pub jwt_access_secret: String,
    pub jwt_refresh_secret: String,
    pub access_ttl_minutes: i64,
    pub refresh_ttl_days: i64,

    // Identity provider
    pub google_client_id: String,
    pub identity_timeout: Duration,

    // Speech-to-text
    pub openai_api_key: Option<String>,
    pub stt_model: String,
    pub stt_language: String,

    // Diary generation service
    pub ai_service_url: String,
    pub ai_timeout: Duration,

    // Object storage
    pub s3_bucket: String,
    pub presign_ttl: Duration,
}

impl Config {
    /// Loads configuration from environment variables.
    ///
    /// It will look for a `.env` file in the current directory for development,
    /// but this is skipped in test environments to ensure tests are hermetic.
    pub fn from_env() -> Result<Self, ConfigError> {
        // Only load from .env in non-test mode to avoid contamination.
        if !cfg!(test) {
            dotenvy::dotenv().ok();
        }

        // --- Server and Database Settings ---
        let bind_address_str =
            std::env::var("BIND_ADDRESS").unwrap_or_else(|_| "0.0.0.0:3000".to_string());
        let bind_address = bind_address_str
            .parse::<SocketAddr>()
            .map_err(|e| ConfigError::InvalidValue("BIND_ADDRESS".to_string(), e.to_string()))?;

        let database_url = require("DATABASE_URL")?;

        let log_level_str = std::env::var("RUST_LOG").unwrap_or_else(|_| "INFO".to_string());
        let log_level = log_level_str.parse::<Level>().map_err(|_| {
            ConfigError::InvalidValue(
                "RUST_LOG".to_string(),
                format!("'{}' is not a valid log level", log_level_str),
            )
        })?;

        let frontend_origin = std::env::var("FRONTEND_ORIGIN")
            .unwrap_or_else(|_| "http://localhost:3000".to_string());

        // --- Token Settings ---
        let jwt_access_secret = require("JWT_ACCESS_SECRET")?;
        let jwt_refresh_secret = require("JWT_REFRESH_SECRET")?;
        let access_ttl_minutes = parse_or("ACCESS_TTL_MINUTES", 15)?;
        let refresh_ttl_days = parse_or("REFRESH_TTL_DAYS", 30)?;

        // --- Identity Provider Settings ---
        let google_client_id = require("GOOGLE_CLIENT_ID")?;
        let identity_timeout = Duration::from_secs(parse_or("IDENTITY_TIMEOUT_SECS", 10)? as u64);

        // --- Speech-to-Text Settings ---
        let openai_api_key = std::env::var("OPENAI_API_KEY").ok();
        let stt_model = std::env::var("STT_MODEL").unwrap_or_else(|_| "whisper-1".to_string());
        let stt_language = std::env::var("STT_LANGUAGE").unwrap_or_else(|_| "ko".to_string());

        // --- Diary Generation Settings ---
        let ai_service_url = require("AI_SERVICE_URL")?;
        let ai_timeout = Duration::from_secs(parse_or("AI_TIMEOUT_SECS", 60)? as u64);

        // --- Object Storage Settings ---
        let s3_bucket = require("AWS_S3_BUCKET")?;
        let presign_ttl = Duration::from_secs(parse_or("PRESIGN_TTL_SECS", 3600)? as u64);

        Ok(Self {
            bind_address,
            database_url,
            log_level,
            frontend_origin,
            jwt_access_secret,
            jwt_refresh_secret,
            access_ttl_minutes,
            refresh_ttl_days,
            google_client_id,
            identity_timeout,
            openai_api_key,
            stt_model,
            stt_language,
            ai_service_url,
            ai_timeout,
            s3_bucket,
            presign_ttl,
        })
    }
}

fn require(name: &str) -> Result<String, ConfigError> {
    std::env::var(name).map_err(|_| ConfigError::MissingVar(name.to_string()))
}

fn parse_or(name: &str, default: i64) -> Result<i64, ConfigError> {
    match std::env::var(name) {
        Ok(raw) => raw
            .parse::<i64>()
            .map_err(|e| ConfigError::InvalidValue(name.to_string(), e.to_string())),
        Err(_) => Ok(default),
    }
}

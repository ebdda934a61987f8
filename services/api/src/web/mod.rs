//! services/api/src/web/mod.rs
//!
//! Handler modules, the shared failure body, and the master OpenAPI
//! definition for the REST surface.

pub mod auth;
pub mod diary;
pub mod middleware;
pub mod records;
pub mod state;

pub use middleware::require_auth;

use axum::{http::StatusCode, Json};
use moa_core::ports::PortError;
use serde::Serialize;
use tracing::error;
use utoipa::{OpenApi, ToSchema};

//=========================================================================================
// OpenAPI Master Definition
//=========================================================================================

#[derive(OpenApi)]
#[openapi(
    paths(
        auth::verify_handler,
        auth::signup_handler,
        auth::refresh_handler,
        auth::logout_handler,
        records::create_record_handler,
        records::list_records_handler,
        records::update_record_handler,
        records::delete_record_handler,
        diary::create_diary_handler,
        diary::list_diaries_handler,
        diary::get_diary_handler,
        diary::update_diary_handler,
    ),
    components(schemas(
        ErrorBody,
        Ack,
        auth::VerifyRequest,
        auth::SignupRequest,
        auth::RefreshRequest,
        auth::LogoutRequest,
        auth::UserView,
        auth::SignupPrefill,
        auth::LoginView,
        auth::NeedSignupView,
        auth::RefreshView,
        records::RecordView,
        records::RecordListView,
        diary::CreateDiaryRequest,
        diary::UpdateDiaryRequest,
        diary::DiaryView,
        diary::DiaryImageView,
        diary::DiarySourceView,
        diary::DiaryListEntry,
        diary::SourceRecordView,
        diary::DiaryListView,
    )),
    tags(
        (name = "moa API", description = "Personal diary backend: daily records in, generated diary entries out.")
    )
)]
pub struct ApiDoc;

//=========================================================================================
// Failure and Acknowledgement Bodies
//=========================================================================================

/// Structured body returned by every failing operation. `code` is set
/// for authentication failures only, so clients can distinguish
/// "re-login needed" from "retry later".
#[derive(Debug, Serialize, ToSchema)]
pub struct ErrorBody {
    pub message: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub code: Option<String>,
}

impl ErrorBody {
    pub fn new(message: impl Into<String>) -> Self {
        Self {
            message: message.into(),
            code: None,
        }
    }

    pub fn with_code(message: impl Into<String>, code: impl Into<String>) -> Self {
        Self {
            message: message.into(),
            code: Some(code.into()),
        }
    }
}

/// A plain acknowledgement for mutations that return no resource.
#[derive(Debug, Serialize, ToSchema)]
pub struct Ack {
    pub message: String,
}

impl Ack {
    pub fn new(message: impl Into<String>) -> Self {
        Self {
            message: message.into(),
        }
    }
}

/// The error half of every handler result.
pub type Failure = (StatusCode, Json<ErrorBody>);

pub fn fail(status: StatusCode, message: impl Into<String>) -> Failure {
    (status, Json(ErrorBody::new(message)))
}

/// Maps a port error onto the transport taxonomy. Unexpected errors are
/// logged with their detail and reported opaquely.
pub fn port_failure(context: &str, err: PortError) -> Failure {
    match err {
        PortError::NotFound(message) => fail(StatusCode::NOT_FOUND, message),
        PortError::Conflict(message) => fail(StatusCode::CONFLICT, message),
        PortError::Unauthorized => fail(StatusCode::UNAUTHORIZED, "unauthorized"),
        PortError::Unavailable(message) => {
            error!("{context}: upstream failure: {message}");
            fail(StatusCode::BAD_GATEWAY, message)
        }
        PortError::Unexpected(message) => {
            error!("{context} failed: {message}");
            fail(StatusCode::INTERNAL_SERVER_ERROR, "server error")
        }
    }
}

//! services/api/src/web/records.rs
//!
//! Record endpoints: multipart ingestion (text, image, voice), listing,
//! partial update and deletion. Voice submissions are transcribed
//! synchronously and stored as text records; no raw audio is persisted.

use axum::{
    extract::{Multipart, Path, State},
    http::StatusCode,
    Extension, Json,
};
use bytes::Bytes;
use chrono::{DateTime, Utc};
use moa_core::domain::{Media, NewRecord, Principal, Record, RecordChanges, RecordKind};
use moa_core::ports::ObjectStorageService;
use serde::Serialize;
use std::sync::Arc;
use tracing::warn;
use utoipa::ToSchema;
use uuid::Uuid;

use crate::web::{fail, port_failure, state::AppState, Ack, Failure};

//=========================================================================================
// Response Types
//=========================================================================================

#[derive(Debug, Serialize, ToSchema)]
#[serde(rename_all = "camelCase")]
pub struct RecordView {
    pub id: Uuid,
    #[serde(rename = "type")]
    pub kind: String,
    pub context: Option<String>,
    pub image_url: Option<String>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

#[derive(Serialize, ToSchema)]
pub struct RecordListView {
    pub count: usize,
    pub records: Vec<RecordView>,
}

/// Builds the wire view of a record, re-deriving the media URL. A
/// resolution failure degrades the single field to null instead of
/// failing the whole response.
pub(crate) async fn record_view(record: &Record, storage: &dyn ObjectStorageService) -> RecordView {
    let image_url = match &record.media {
        Some(media) => match storage.signed_read_url(&media.key).await {
            Ok(url) => Some(url),
            Err(e) => {
                warn!("failed to resolve media url for record {}: {e}", record.id);
                None
            }
        },
        None => None,
    };
    RecordView {
        id: record.id,
        kind: record.kind.as_str().to_string(),
        context: record.context.clone(),
        image_url,
        created_at: record.created_at,
        updated_at: record.updated_at,
    }
}

//=========================================================================================
// Multipart Form Parsing
//=========================================================================================

struct UploadedFile {
    data: Bytes,
    content_type: String,
    filename: String,
}

#[derive(Default)]
struct RecordForm {
    context: Option<String>,
    image: Option<UploadedFile>,
    audio: Option<UploadedFile>,
    remove_image: bool,
}

async fn parse_record_form(mut multipart: Multipart) -> Result<RecordForm, Failure> {
    let mut form = RecordForm::default();
    while let Some(field) = multipart.next_field().await.map_err(|e| {
        fail(
            StatusCode::BAD_REQUEST,
            format!("failed to read multipart data: {e}"),
        )
    })? {
        let name = field.name().unwrap_or_default().to_string();
        match name.as_str() {
            "context" => {
                let text = field.text().await.map_err(|e| {
                    fail(StatusCode::BAD_REQUEST, format!("failed to read context field: {e}"))
                })?;
                form.context = Some(text);
            }
            "image" | "audio" => {
                let content_type = field
                    .content_type()
                    .unwrap_or("application/octet-stream")
                    .to_string();
                let filename = field
                    .file_name()
                    .unwrap_or(if name == "image" { "image" } else { "voice.webm" })
                    .to_string();
                let data = field.bytes().await.map_err(|e| {
                    fail(StatusCode::BAD_REQUEST, format!("failed to read file bytes: {e}"))
                })?;
                let file = UploadedFile {
                    data,
                    content_type,
                    filename,
                };
                if name == "image" {
                    form.image = Some(file);
                } else {
                    form.audio = Some(file);
                }
            }
            "removeImage" => {
                let text = field.text().await.map_err(|e| {
                    fail(StatusCode::BAD_REQUEST, format!("failed to read removeImage field: {e}"))
                })?;
                form.remove_image = text.eq_ignore_ascii_case("true");
            }
            _ => {}
        }
    }
    Ok(form)
}

fn image_extension(content_type: &str) -> Option<&'static str> {
    match content_type {
        "image/jpeg" => Some("jpg"),
        "image/png" => Some("png"),
        "image/webp" => Some("webp"),
        "image/gif" => Some("gif"),
        _ => None,
    }
}

fn is_audio(content_type: &str) -> bool {
    content_type.starts_with("audio/") || content_type == "video/webm"
}

/// Uploads image bytes under a fresh per-user key and returns the media
/// reference.
async fn store_image(
    state: &AppState,
    uid: Uuid,
    image: UploadedFile,
) -> Result<Media, Failure> {
    let ext = image_extension(&image.content_type)
        .ok_or_else(|| fail(StatusCode::BAD_REQUEST, "unsupported image type"))?;
    let key = format!("records/{}/{}.{}", uid, Uuid::new_v4(), ext);
    let size = image.data.len() as i64;
    state
        .storage
        .put_object(&key, image.data, &image.content_type)
        .await
        .map_err(|e| port_failure("image upload", e))?;
    Ok(Media {
        key,
        content_type: image.content_type,
        size,
    })
}

//=========================================================================================
// Handlers
//=========================================================================================

/// POST /records - Create a record from a multipart submission.
///
/// `context` text, plus at most one of an `image` or `audio` file.
/// Audio is transcribed before anything is stored; an image lands in
/// object storage before the row is written.
#[utoipa::path(
    post,
    path = "/records",
    request_body(content_type = "multipart/form-data", description = "context text and/or one image or audio file"),
    responses(
        (status = 201, description = "Record created", body = RecordView),
        (status = 400, description = "No content, or unsupported file type", body = crate::web::ErrorBody),
        (status = 502, description = "Transcription failed or produced nothing", body = crate::web::ErrorBody)
    )
)]
pub async fn create_record_handler(
    State(state): State<Arc<AppState>>,
    Extension(principal): Extension<Principal>,
    multipart: Multipart,
) -> Result<(StatusCode, Json<RecordView>), Failure> {
    let form = parse_record_form(multipart).await?;
    if form.image.is_some() && form.audio.is_some() {
        return Err(fail(
            StatusCode::BAD_REQUEST,
            "submit either an image or an audio file, not both",
        ));
    }

    let uid = principal.uid;
    let context = form.context.filter(|c| !c.trim().is_empty());

    let new_record = if let Some(audio) = form.audio {
        // Voice submission: transcribe synchronously and persist the
        // transcript as a text record. The raw audio is dropped.
        if !is_audio(&audio.content_type) {
            return Err(fail(StatusCode::BAD_REQUEST, "unsupported audio type"));
        }
        let transcript = state
            .stt
            .transcribe(audio.data, &audio.filename)
            .await
            .map_err(|e| port_failure("transcription", e))?;
        if transcript.trim().is_empty() {
            return Err(fail(
                StatusCode::BAD_GATEWAY,
                "speech-to-text produced an empty transcript",
            ));
        }
        NewRecord {
            user_id: uid,
            kind: RecordKind::Text,
            context: Some(transcript),
            media: None,
        }
    } else if let Some(image) = form.image {
        let media = store_image(&state, uid, image).await?;
        let kind = if context.is_some() {
            RecordKind::TextImage
        } else {
            RecordKind::Image
        };
        NewRecord {
            user_id: uid,
            kind,
            context,
            media: Some(media),
        }
    } else if let Some(context) = context {
        NewRecord {
            user_id: uid,
            kind: RecordKind::Text,
            context: Some(context),
            media: None,
        }
    } else {
        return Err(fail(StatusCode::BAD_REQUEST, "text or file is required"));
    };

    let record = state
        .store
        .create_record(new_record)
        .await
        .map_err(|e| port_failure("record creation", e))?;

    let view = record_view(&record, state.storage.as_ref()).await;
    Ok((StatusCode::CREATED, Json(view)))
}

/// GET /records - List the caller's records, newest first.
#[utoipa::path(
    get,
    path = "/records",
    responses(
        (status = 200, description = "All records for the caller", body = RecordListView)
    )
)]
pub async fn list_records_handler(
    State(state): State<Arc<AppState>>,
    Extension(principal): Extension<Principal>,
) -> Result<(StatusCode, Json<RecordListView>), Failure> {
    let records = state
        .store
        .list_records(principal.uid)
        .await
        .map_err(|e| port_failure("record listing", e))?;

    let mut views = Vec::with_capacity(records.len());
    for record in &records {
        views.push(record_view(record, state.storage.as_ref()).await);
    }

    Ok((
        StatusCode::OK,
        Json(RecordListView {
            count: views.len(),
            records: views,
        }),
    ))
}

/// PATCH /records/{id} - Partially update a record.
///
/// Accepts a new `context`, an `image` to attach or replace, or
/// `removeImage=true`. The record's kind is recomputed so it stays the
/// minimal accurate description of the content. Replaced objects are
/// deleted best-effort only after the row update succeeded.
#[utoipa::path(
    patch,
    path = "/records/{id}",
    params(("id" = Uuid, Path, description = "Record id")),
    request_body(content_type = "multipart/form-data", description = "fields to change"),
    responses(
        (status = 200, description = "Record updated", body = Ack),
        (status = 400, description = "Nothing to update or invalid change", body = crate::web::ErrorBody),
        (status = 403, description = "Not the owner", body = crate::web::ErrorBody),
        (status = 404, description = "No such record", body = crate::web::ErrorBody)
    )
)]
pub async fn update_record_handler(
    State(state): State<Arc<AppState>>,
    Extension(principal): Extension<Principal>,
    Path(id): Path<Uuid>,
    multipart: Multipart,
) -> Result<(StatusCode, Json<Ack>), Failure> {
    let form = parse_record_form(multipart).await?;
    if form.audio.is_some() {
        return Err(fail(
            StatusCode::BAD_REQUEST,
            "audio cannot be attached to an existing record",
        ));
    }
    if form.image.is_some() && form.remove_image {
        return Err(fail(
            StatusCode::BAD_REQUEST,
            "cannot replace and remove the image in the same request",
        ));
    }

    let record = state
        .store
        .find_record_by_id(id)
        .await
        .map_err(|e| port_failure("record lookup", e))?
        .ok_or_else(|| fail(StatusCode::NOT_FOUND, "record not found"))?;
    if record.user_id != principal.uid {
        return Err(fail(StatusCode::FORBIDDEN, "no permission to modify this record"));
    }

    let mut changes = RecordChanges {
        context: form.context.filter(|c| !c.trim().is_empty()),
        ..RecordChanges::default()
    };
    // Keys to delete once the row update has succeeded.
    let mut cleanup: Vec<String> = Vec::new();
    let mut uploaded_key: Option<String> = None;

    if let Some(image) = form.image {
        let media = store_image(&state, principal.uid, image).await?;
        uploaded_key = Some(media.key.clone());
        if let Some(old) = &record.media {
            cleanup.push(old.key.clone());
        }
        changes.media = Some(Some(media));
    } else if form.remove_image {
        if let Some(old) = &record.media {
            cleanup.push(old.key.clone());
            changes.media = Some(None);
        }
    }

    // Recompute the kind for the resulting content. Legacy audio rows
    // keep their kind; everything else stays minimal-accurate.
    if record.kind != RecordKind::Audio {
        let has_context = changes
            .context
            .as_deref()
            .or(record.context.as_deref())
            .map(|c| !c.trim().is_empty())
            .unwrap_or(false);
        let has_media = match &changes.media {
            Some(media) => media.is_some(),
            None => record.media.is_some(),
        };
        let new_kind = match (has_context, has_media) {
            (true, true) => RecordKind::TextImage,
            (false, true) => RecordKind::Image,
            (true, false) => RecordKind::Text,
            (false, false) => {
                return Err(fail(StatusCode::BAD_REQUEST, "record would be left empty"))
            }
        };
        if new_kind != record.kind {
            changes.kind = Some(new_kind);
        }
    }

    if changes.is_empty() {
        return Err(fail(StatusCode::BAD_REQUEST, "at least one field must change"));
    }

    if let Err(e) = state.store.update_record(id, changes).await {
        // The row was not updated; compensate by removing the object
        // that was uploaded for it.
        if let Some(key) = uploaded_key {
            if let Err(del) = state.storage.delete_object(&key).await {
                warn!("failed to clean up orphaned upload {key}: {del}");
            }
        }
        return Err(port_failure("record update", e));
    }

    for key in cleanup {
        if let Err(e) = state.storage.delete_object(&key).await {
            warn!("failed to delete replaced object {key}: {e}");
        }
    }

    Ok((StatusCode::OK, Json(Ack::new("record updated"))))
}

/// DELETE /records/{id} - Delete a record and its stored object.
#[utoipa::path(
    delete,
    path = "/records/{id}",
    params(("id" = Uuid, Path, description = "Record id")),
    responses(
        (status = 200, description = "Record deleted", body = Ack),
        (status = 403, description = "Not the owner", body = crate::web::ErrorBody),
        (status = 404, description = "No such record", body = crate::web::ErrorBody)
    )
)]
pub async fn delete_record_handler(
    State(state): State<Arc<AppState>>,
    Extension(principal): Extension<Principal>,
    Path(id): Path<Uuid>,
) -> Result<(StatusCode, Json<Ack>), Failure> {
    let record = state
        .store
        .find_record_by_id(id)
        .await
        .map_err(|e| port_failure("record lookup", e))?
        .ok_or_else(|| fail(StatusCode::NOT_FOUND, "record not found"))?;
    if record.user_id != principal.uid {
        return Err(fail(StatusCode::FORBIDDEN, "no permission to delete this record"));
    }

    state
        .store
        .delete_record(id)
        .await
        .map_err(|e| port_failure("record deletion", e))?;

    // Best-effort object cleanup; the row is already gone.
    if let Some(media) = record.media {
        if let Err(e) = state.storage.delete_object(&media.key).await {
            warn!("failed to delete stored object {}: {e}", media.key);
        }
    }

    Ok((StatusCode::OK, Json(Ack::new("record deleted"))))
}

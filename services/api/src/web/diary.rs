//! services/api/src/web/diary.rs
//!
//! The diary aggregation pipeline and the diary read/update endpoints.
//! Creation pulls one local day's records, normalizes them for the
//! generation service, persists the result with back-references to the
//! exact record set used, and answers with freshly resolved image URLs.
//! Stored diaries hold storage keys only; every read re-derives URLs.

use axum::{
    extract::{Path, State},
    http::StatusCode,
    Extension, Json,
};
use chrono::{DateTime, NaiveDate, Utc};
use moa_core::domain::{
    Diary, DiaryChanges, DiaryImage, DiarySource, NewDiary, Principal, Record, RecordKind,
};
use moa_core::normalize::to_generation_items;
use moa_core::ports::ObjectStorageService;
use moa_core::window::day_range_utc;
use regex::Regex;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::sync::Arc;
use tracing::{info, warn};
use utoipa::ToSchema;
use uuid::Uuid;

use crate::web::{fail, port_failure, state::AppState, Ack, Failure};

//=========================================================================================
// Request/Response Types
//=========================================================================================

#[derive(Deserialize, ToSchema)]
pub struct CreateDiaryRequest {
    pub date: Option<String>,
    pub persona: Option<i32>,
}

#[derive(Deserialize, ToSchema)]
pub struct UpdateDiaryRequest {
    pub text: Option<String>,
    pub persona: Option<i32>,
    pub emotion: Option<String>,
    /// Replacement list of image storage keys.
    pub images: Option<Vec<String>>,
}

#[derive(Debug, Serialize, ToSchema)]
#[serde(rename_all = "camelCase")]
pub struct DiaryImageView {
    pub url: Option<String>,
    pub created_at: DateTime<Utc>,
}

#[derive(Debug, Serialize, ToSchema)]
#[serde(rename_all = "camelCase")]
pub struct DiarySourceView {
    pub record_id: Uuid,
    #[serde(rename = "type")]
    pub kind: String,
    pub created_at: DateTime<Utc>,
}

#[derive(Debug, Serialize, ToSchema)]
#[serde(rename_all = "camelCase")]
pub struct DiaryView {
    pub id: Uuid,
    pub text: String,
    pub persona: i32,
    pub emotion: Option<String>,
    pub date: String,
    pub images: Vec<DiaryImageView>,
    pub sources: Vec<DiarySourceView>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

/// One source record expanded for the diary list, with freshly resolved
/// media URLs.
#[derive(Serialize, ToSchema)]
#[serde(rename_all = "camelCase")]
pub struct SourceRecordView {
    pub record_id: Uuid,
    #[serde(rename = "type")]
    pub kind: String,
    pub context: Option<String>,
    pub image_url: Option<String>,
    pub audio_url: Option<String>,
    pub created_at: DateTime<Utc>,
}

#[derive(Serialize, ToSchema)]
#[serde(rename_all = "camelCase")]
pub struct DiaryListEntry {
    pub id: Uuid,
    pub date: String,
    pub text: String,
    pub persona: i32,
    pub emotion: Option<String>,
    pub records: Vec<SourceRecordView>,
    pub images: Vec<DiaryImageView>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

#[derive(Serialize, ToSchema)]
pub struct DiaryListView {
    pub count: usize,
    pub diaries: Vec<DiaryListEntry>,
}

//=========================================================================================
// View Helpers
//=========================================================================================

/// Resolves a key to a URL, degrading to null on failure. Only the
/// generation payload treats resolution as mandatory; read paths do not.
async fn resolve_or_none(storage: &dyn ObjectStorageService, key: &str) -> Option<String> {
    match storage.signed_read_url(key).await {
        Ok(url) => Some(url),
        Err(e) => {
            warn!("failed to resolve stored object {key}: {e}");
            None
        }
    }
}

async fn diary_view(diary: &Diary, storage: &dyn ObjectStorageService) -> DiaryView {
    let mut images = Vec::with_capacity(diary.images.len());
    for image in &diary.images {
        images.push(DiaryImageView {
            url: resolve_or_none(storage, &image.key).await,
            created_at: image.created_at,
        });
    }
    DiaryView {
        id: diary.id,
        text: diary.text.clone(),
        persona: diary.persona,
        emotion: diary.emotion.clone(),
        date: diary.date.clone(),
        images,
        sources: diary
            .sources
            .iter()
            .map(|s| DiarySourceView {
                record_id: s.record_id,
                kind: s.kind.as_str().to_string(),
                created_at: s.created_at,
            })
            .collect(),
        created_at: diary.created_at,
        updated_at: diary.updated_at,
    }
}

fn parse_diary_date(raw: Option<&str>) -> Option<NaiveDate> {
    let raw = raw?;
    let pattern = Regex::new(r"^\d{4}-\d{2}-\d{2}$").unwrap();
    if !pattern.is_match(raw) {
        return None;
    }
    NaiveDate::parse_from_str(raw, "%Y-%m-%d").ok()
}

//=========================================================================================
// Handlers
//=========================================================================================

/// POST /diaries - Generate and persist the diary for one local day.
#[utoipa::path(
    post,
    path = "/diaries",
    request_body = CreateDiaryRequest,
    responses(
        (status = 201, description = "Diary created", body = DiaryView),
        (status = 400, description = "Bad date or no usable content", body = crate::web::ErrorBody),
        (status = 404, description = "No records for the specified date", body = crate::web::ErrorBody),
        (status = 502, description = "Generation failed or returned nothing", body = crate::web::ErrorBody)
    )
)]
pub async fn create_diary_handler(
    State(state): State<Arc<AppState>>,
    Extension(principal): Extension<Principal>,
    Json(req): Json<CreateDiaryRequest>,
) -> Result<(StatusCode, Json<DiaryView>), Failure> {
    // 1. Validate the requested day.
    let Some(date) = parse_diary_date(req.date.as_deref()) else {
        return Err(fail(StatusCode::BAD_REQUEST, "date (YYYY-MM-DD) is required"));
    };
    let persona = req.persona.unwrap_or(0);

    // 2. Resolve the day's UTC window and pull its records, ascending.
    let (start, end) = day_range_utc(date);
    let records = state
        .store
        .records_in_window(principal.uid, start, end)
        .await
        .map_err(|e| port_failure("record window query", e))?;
    if records.is_empty() {
        return Err(fail(
            StatusCode::NOT_FOUND,
            "no records for the specified date",
        ));
    }

    // 3. Normalize for the generation service. Media URLs are mandatory
    //    payload content here, so a resolution failure propagates.
    let mut items = to_generation_items(&records, state.storage.as_ref())
        .await
        .map_err(|e| port_failure("media resolution for generation", e))?;
    items.retain(|item| item.has_substance());
    if items.is_empty() {
        return Err(fail(
            StatusCode::BAD_REQUEST,
            "records for the specified date carry no usable content",
        ));
    }

    // 4. One bounded external call; empty text is an upstream failure
    //    and retrying is the client's decision.
    let text = state
        .generator
        .generate(&items, persona)
        .await
        .map_err(|e| port_failure("diary generation", e))?;

    // 5. Persist keys (never URLs) plus the audit trail of sources.
    let images: Vec<DiaryImage> = records
        .iter()
        .filter(|r| matches!(r.kind, RecordKind::Image | RecordKind::TextImage))
        .filter_map(|r| {
            r.media.as_ref().map(|media| DiaryImage {
                key: media.key.clone(),
                created_at: r.created_at,
            })
        })
        .collect();
    let sources: Vec<DiarySource> = records
        .iter()
        .map(|r| DiarySource {
            record_id: r.id,
            kind: r.kind,
            created_at: r.created_at,
        })
        .collect();

    let diary = state
        .store
        .create_diary(NewDiary {
            user_id: principal.uid,
            text,
            persona,
            date: date.format("%Y-%m-%d").to_string(),
            images,
            sources,
        })
        .await
        .map_err(|e| port_failure("diary creation", e))?;

    info!(
        "diary {} created for user {} from {} records",
        diary.id,
        principal.uid,
        diary.sources.len()
    );

    // 6. Respond with freshly resolved URLs.
    let view = diary_view(&diary, state.storage.as_ref()).await;
    Ok((StatusCode::CREATED, Json(view)))
}

/// GET /diaries/{id} - Fetch one diary, re-resolving image URLs.
///
/// Absence and foreign ownership are both 404, so existence never leaks.
#[utoipa::path(
    get,
    path = "/diaries/{id}",
    params(("id" = Uuid, Path, description = "Diary id")),
    responses(
        (status = 200, description = "The diary", body = DiaryView),
        (status = 404, description = "Not found or not owned", body = crate::web::ErrorBody)
    )
)]
pub async fn get_diary_handler(
    State(state): State<Arc<AppState>>,
    Extension(principal): Extension<Principal>,
    Path(id): Path<Uuid>,
) -> Result<(StatusCode, Json<DiaryView>), Failure> {
    let diary = state
        .store
        .find_diary(principal.uid, id)
        .await
        .map_err(|e| port_failure("diary lookup", e))?
        .ok_or_else(|| fail(StatusCode::NOT_FOUND, "diary not found"))?;

    let view = diary_view(&diary, state.storage.as_ref()).await;
    Ok((StatusCode::OK, Json(view)))
}

/// GET /diaries - List the caller's diaries, newest first.
///
/// Source records for all diaries are fetched in a single batched
/// query; N diaries never cost N record queries.
#[utoipa::path(
    get,
    path = "/diaries",
    responses(
        (status = 200, description = "All diaries for the caller", body = DiaryListView)
    )
)]
pub async fn list_diaries_handler(
    State(state): State<Arc<AppState>>,
    Extension(principal): Extension<Principal>,
) -> Result<(StatusCode, Json<DiaryListView>), Failure> {
    let diaries = state
        .store
        .list_diaries(principal.uid)
        .await
        .map_err(|e| port_failure("diary listing", e))?;
    if diaries.is_empty() {
        return Ok((
            StatusCode::OK,
            Json(DiaryListView {
                count: 0,
                diaries: Vec::new(),
            }),
        ));
    }

    // Collect every referenced record id across all diaries, then look
    // them all up at once.
    let mut ids: Vec<Uuid> = diaries
        .iter()
        .flat_map(|d| d.sources.iter().map(|s| s.record_id))
        .collect();
    ids.sort();
    ids.dedup();

    let records = if ids.is_empty() {
        Vec::new()
    } else {
        state
            .store
            .find_records_by_ids(principal.uid, &ids)
            .await
            .map_err(|e| port_failure("batched record lookup", e))?
    };
    let record_map: HashMap<Uuid, &Record> = records.iter().map(|r| (r.id, r)).collect();

    let mut entries = Vec::with_capacity(diaries.len());
    for diary in &diaries {
        let mut sources = diary.sources.clone();
        sources.sort_by_key(|s| s.created_at);

        let mut source_records = Vec::with_capacity(sources.len());
        let mut images = Vec::new();
        for source in &sources {
            // A deleted record leaves a dangling back-reference; skip it.
            let Some(record) = record_map.get(&source.record_id) else {
                continue;
            };

            let mut image_url = None;
            let mut audio_url = None;
            if let Some(media) = &record.media {
                let url = resolve_or_none(state.storage.as_ref(), &media.key).await;
                match record.kind {
                    RecordKind::Image | RecordKind::TextImage => {
                        image_url = url.clone();
                        if let Some(url) = url {
                            images.push(DiaryImageView {
                                url: Some(url),
                                created_at: record.created_at,
                            });
                        }
                    }
                    RecordKind::Audio => audio_url = url,
                    RecordKind::Text => {}
                }
            }

            source_records.push(SourceRecordView {
                record_id: record.id,
                kind: record.kind.as_str().to_string(),
                context: record.context.clone(),
                image_url,
                audio_url,
                created_at: record.created_at,
            });
        }

        entries.push(DiaryListEntry {
            id: diary.id,
            date: diary.date.clone(),
            text: diary.text.clone(),
            persona: diary.persona,
            emotion: diary.emotion.clone(),
            records: source_records,
            images,
            created_at: diary.created_at,
            updated_at: diary.updated_at,
        });
    }

    Ok((
        StatusCode::OK,
        Json(DiaryListView {
            count: entries.len(),
            diaries: entries,
        }),
    ))
}

/// PATCH /diaries/{id} - Partially update a diary.
#[utoipa::path(
    patch,
    path = "/diaries/{id}",
    params(("id" = Uuid, Path, description = "Diary id")),
    request_body = UpdateDiaryRequest,
    responses(
        (status = 200, description = "Diary updated", body = Ack),
        (status = 400, description = "Nothing to update", body = crate::web::ErrorBody),
        (status = 404, description = "Not found or not owned", body = crate::web::ErrorBody)
    )
)]
pub async fn update_diary_handler(
    State(state): State<Arc<AppState>>,
    Extension(principal): Extension<Principal>,
    Path(id): Path<Uuid>,
    Json(req): Json<UpdateDiaryRequest>,
) -> Result<(StatusCode, Json<Ack>), Failure> {
    let now = Utc::now();
    let changes = DiaryChanges {
        text: req.text,
        persona: req.persona,
        emotion: req.emotion,
        images: req.images.map(|keys| {
            keys.into_iter()
                .map(|key| DiaryImage {
                    key,
                    created_at: now,
                })
                .collect()
        }),
    };
    if changes.is_empty() {
        return Err(fail(
            StatusCode::BAD_REQUEST,
            "at least one field must be provided",
        ));
    }

    let updated = state
        .store
        .update_diary(principal.uid, id, changes)
        .await
        .map_err(|e| port_failure("diary update", e))?;
    if !updated {
        return Err(fail(StatusCode::NOT_FOUND, "diary not found"));
    }

    Ok((StatusCode::OK, Json(Ack::new("diary updated"))))
}

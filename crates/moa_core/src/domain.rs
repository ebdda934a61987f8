//! crates/moa_core/src/domain.rs
//!
//! Defines the pure, core data structures for the application.
//! These structs are independent of any database or HTTP framework; the
//! few serde derives exist because diary sub-documents are persisted as
//! JSON and travel to the wire in the same shape.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// A user identity, created on first signup for a (provider, providerID)
/// pair. Profile fields are provider-supplied and mutable; nickname,
/// birthdate and gender are self-reported at signup.
#[derive(Debug, Clone)]
pub struct User {
    pub id: Uuid,
    pub provider: String,
    pub provider_id: String,
    pub email: Option<String>,
    pub name: Option<String>,
    pub picture: Option<String>,
    pub nickname: Option<String>,
    pub birthdate: Option<String>,
    pub gender: Option<String>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
    pub last_login_at: DateTime<Utc>,
}

/// Payload for creating a user at signup.
#[derive(Debug, Clone)]
pub struct NewUser {
    pub provider: String,
    pub provider_id: String,
    pub email: Option<String>,
    pub name: Option<String>,
    pub picture: Option<String>,
    pub nickname: Option<String>,
    pub birthdate: Option<String>,
    pub gender: Option<String>,
}

/// One refresh-token lineage. `revoked_at == None` means the session is
/// still active; a session is revoked exactly once, at first rotation
/// or explicit logout.
#[derive(Debug, Clone)]
pub struct Session {
    pub id: Uuid,
    pub user_id: Uuid,
    pub jti: Uuid,
    pub created_at: DateTime<Utc>,
    pub expires_at: DateTime<Utc>,
    pub revoked_at: Option<DateTime<Utc>>,
    pub ip: Option<String>,
    pub user_agent: Option<String>,
}

#[derive(Debug, Clone)]
pub struct NewSession {
    pub user_id: Uuid,
    pub jti: Uuid,
    pub expires_at: DateTime<Utc>,
    pub ip: Option<String>,
    pub user_agent: Option<String>,
}

/// Request metadata captured when a refresh token is issued.
#[derive(Debug, Clone, Default)]
pub struct SessionMeta {
    pub ip: Option<String>,
    pub user_agent: Option<String>,
}

/// The closed set of record types. A record's kind is always the
/// minimal accurate description of its content: text-only records never
/// carry media, image-bearing records always do, and voice submissions
/// are transcribed at ingestion and stored as `Text`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RecordKind {
    Text,
    Image,
    TextImage,
    Audio,
}

impl RecordKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            RecordKind::Text => "text",
            RecordKind::Image => "image",
            RecordKind::TextImage => "text+image",
            RecordKind::Audio => "audio",
        }
    }

    /// Parses a stored kind. Legacy spellings still present in old rows
    /// (`voice`, `image_with_text`) are folded into the canonical set
    /// here, at the store boundary, so no call site handles them again.
    pub fn parse(raw: &str) -> Option<Self> {
        match raw.to_ascii_lowercase().as_str() {
            "text" => Some(RecordKind::Text),
            "image" => Some(RecordKind::Image),
            "text+image" | "image_with_text" => Some(RecordKind::TextImage),
            "audio" | "voice" => Some(RecordKind::Audio),
            _ => None,
        }
    }
}

impl Serialize for RecordKind {
    fn serialize<S: serde::Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_str(self.as_str())
    }
}

impl<'de> Deserialize<'de> for RecordKind {
    fn deserialize<D: serde::Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        let raw = String::deserialize(deserializer)?;
        RecordKind::parse(&raw)
            .ok_or_else(|| serde::de::Error::custom(format!("unknown record kind '{raw}'")))
    }
}

/// A stored object reference. Present only on image-bearing records;
/// holds the storage key, never a presigned URL.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Media {
    pub key: String,
    pub content_type: String,
    pub size: i64,
}

/// One atomic user-submitted entry.
#[derive(Debug, Clone)]
pub struct Record {
    pub id: Uuid,
    pub user_id: Uuid,
    pub kind: RecordKind,
    pub context: Option<String>,
    pub media: Option<Media>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

#[derive(Debug, Clone)]
pub struct NewRecord {
    pub user_id: Uuid,
    pub kind: RecordKind,
    pub context: Option<String>,
    pub media: Option<Media>,
}

/// Partial update for a record. `media` is doubly optional so a
/// mutation can distinguish "leave untouched" from "clear".
#[derive(Debug, Clone, Default)]
pub struct RecordChanges {
    pub kind: Option<RecordKind>,
    pub context: Option<String>,
    pub media: Option<Option<Media>>,
}

impl RecordChanges {
    pub fn is_empty(&self) -> bool {
        self.kind.is_none() && self.context.is_none() && self.media.is_none()
    }
}

/// Back-reference from a diary to one of the records it was generated
/// from. The audit trail proving which records produced which text.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct DiarySource {
    pub record_id: Uuid,
    #[serde(rename = "type")]
    pub kind: RecordKind,
    pub created_at: DateTime<Utc>,
}

/// An image captured at diary creation time. Stores the storage key;
/// read paths re-derive a fresh URL on every access.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct DiaryImage {
    pub key: String,
    pub created_at: DateTime<Utc>,
}

/// A generated narrative artifact for one user-selected calendar day.
#[derive(Debug, Clone)]
pub struct Diary {
    pub id: Uuid,
    pub user_id: Uuid,
    pub text: String,
    pub persona: i32,
    pub emotion: Option<String>,
    pub date: String,
    pub images: Vec<DiaryImage>,
    pub sources: Vec<DiarySource>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

#[derive(Debug, Clone)]
pub struct NewDiary {
    pub user_id: Uuid,
    pub text: String,
    pub persona: i32,
    pub date: String,
    pub images: Vec<DiaryImage>,
    pub sources: Vec<DiarySource>,
}

/// Partial update for a diary.
#[derive(Debug, Clone, Default)]
pub struct DiaryChanges {
    pub text: Option<String>,
    pub persona: Option<i32>,
    pub emotion: Option<String>,
    pub images: Option<Vec<DiaryImage>>,
}

impl DiaryChanges {
    pub fn is_empty(&self) -> bool {
        self.text.is_none()
            && self.persona.is_none()
            && self.emotion.is_none()
            && self.images.is_none()
    }
}

/// The verified identity derived from a bearer access token. The sole
/// source of ownership scoping; no handler trusts a client-supplied
/// user identifier.
#[derive(Debug, Clone)]
pub struct Principal {
    pub uid: Uuid,
    pub provider: String,
    pub provider_id: String,
}

/// Profile fields returned by the identity provider after a verified
/// token exchange.
#[derive(Debug, Clone)]
pub struct IdentityProfile {
    pub provider: String,
    pub provider_id: String,
    pub email: Option<String>,
    pub name: Option<String>,
    pub picture: Option<String>,
    pub email_verified: bool,
}

//! crates/moa_core/src/ports.rs
//!
//! Defines the service contracts (traits) for the application's core logic.
//! These traits form the boundary of the hexagonal architecture, allowing the core
//! to be independent of specific external implementations like databases or APIs.

use async_trait::async_trait;
use bytes::Bytes;
use chrono::{DateTime, Utc};
use uuid::Uuid;

use crate::domain::{
    Diary, DiaryChanges, IdentityProfile, NewDiary, NewRecord, NewSession, NewUser, Record,
    RecordChanges, Session, User,
};
use crate::normalize::GenerationItem;

//=========================================================================================
// Generic Port Error and Result Types
//=========================================================================================

/// A generic error type for all port operations.
/// This abstracts away the specific errors from external services (e.g., database, network).
#[derive(Debug, thiserror::Error)]
pub enum PortError {
    #[error("Item not found: {0}")]
    NotFound(String),
    #[error("Conflict: {0}")]
    Conflict(String),
    #[error("Unauthorized")]
    Unauthorized,
    #[error("Upstream service failed: {0}")]
    Unavailable(String),
    #[error("An unexpected error occurred: {0}")]
    Unexpected(String),
}

/// A convenience type alias for `Result<T, PortError>`.
pub type PortResult<T> = Result<T, PortError>;

//=========================================================================================
// Service Ports (Traits)
//=========================================================================================

/// The persistent store. All durable state lives behind this trait; the
/// handle is injected into every component that needs it rather than
/// read from a process-wide singleton. Mutations are scoped by owner id
/// and are single-row, so the store's own atomic update semantics are
/// the only concurrency control required.
#[async_trait]
pub trait StoreService: Send + Sync {
    // --- Users ---
    async fn find_user_by_identity(
        &self,
        provider: &str,
        provider_id: &str,
    ) -> PortResult<Option<User>>;

    async fn find_user_by_id(&self, id: Uuid) -> PortResult<User>;

    /// Creates a user. Fails with `Conflict` when a user already exists
    /// for the same (provider, providerID) pair.
    async fn create_user(&self, new_user: NewUser) -> PortResult<User>;

    async fn touch_last_login(&self, id: Uuid) -> PortResult<()>;

    // --- Sessions ---
    async fn create_session(&self, new_session: NewSession) -> PortResult<Session>;

    async fn find_session_by_jti(&self, jti: Uuid) -> PortResult<Option<Session>>;

    /// Marks the session revoked if and only if it is still active.
    /// Returns `true` when this call performed the revocation; a `false`
    /// return means another caller revoked it first. Two concurrent
    /// rotations of the same token race here, and the store's atomic
    /// single-row update decides the winner.
    async fn revoke_session(&self, jti: Uuid) -> PortResult<bool>;

    // --- Records ---
    async fn create_record(&self, new_record: NewRecord) -> PortResult<Record>;

    /// Unscoped lookup, so callers can distinguish "absent" (404) from
    /// "exists but owned by someone else" (403).
    async fn find_record_by_id(&self, id: Uuid) -> PortResult<Option<Record>>;

    /// All records for one user, newest first.
    async fn list_records(&self, user_id: Uuid) -> PortResult<Vec<Record>>;

    /// Records for one user with `created_at` in `[start, end)`,
    /// ascending.
    async fn records_in_window(
        &self,
        user_id: Uuid,
        start: DateTime<Utc>,
        end: DateTime<Utc>,
    ) -> PortResult<Vec<Record>>;

    /// Batched lookup of records by id, ownership-scoped. Used by diary
    /// listing so N diaries never cost N separate record queries.
    async fn find_records_by_ids(&self, user_id: Uuid, ids: &[Uuid]) -> PortResult<Vec<Record>>;

    async fn update_record(&self, id: Uuid, changes: RecordChanges) -> PortResult<()>;

    async fn delete_record(&self, id: Uuid) -> PortResult<()>;

    // --- Diaries ---
    async fn create_diary(&self, new_diary: NewDiary) -> PortResult<Diary>;

    /// Ownership-scoped fetch. Absence and foreign ownership are not
    /// distinguished, to avoid existence leakage.
    async fn find_diary(&self, user_id: Uuid, id: Uuid) -> PortResult<Option<Diary>>;

    /// All diaries for one user, newest first.
    async fn list_diaries(&self, user_id: Uuid) -> PortResult<Vec<Diary>>;

    /// Returns `false` when no diary matched the (user, id) scope.
    async fn update_diary(
        &self,
        user_id: Uuid,
        id: Uuid,
        changes: DiaryChanges,
    ) -> PortResult<bool>;
}

/// The object-storage collaborator (uploads, deletions, presigned
/// reads). Keys are stable; URLs are time-bounded and re-derived on
/// every read path.
#[async_trait]
pub trait ObjectStorageService: Send + Sync {
    async fn put_object(&self, key: &str, data: Bytes, content_type: &str) -> PortResult<()>;

    async fn delete_object(&self, key: &str) -> PortResult<()>;

    /// Resolves a storage key into an externally fetchable URL, valid
    /// for a bounded window.
    async fn signed_read_url(&self, key: &str) -> PortResult<String>;
}

#[async_trait]
pub trait SpeechToTextService: Send + Sync {
    /// Transcribes an uploaded audio file into text. The filename is
    /// forwarded so the service can infer the container format.
    async fn transcribe(&self, audio: Bytes, filename: &str) -> PortResult<String>;
}

#[async_trait]
pub trait DiaryGenerationService: Send + Sync {
    /// Composes the normalized items into a narrative diary text.
    /// Returns `Unavailable` on transport failure, non-2xx responses
    /// and empty generated text alike; retrying is the caller's
    /// concern, never attempted here.
    async fn generate(&self, items: &[GenerationItem], persona: i32) -> PortResult<String>;
}

#[async_trait]
pub trait IdentityProviderService: Send + Sync {
    /// The provider tag stored on users created through this provider
    /// (e.g. `"google"`).
    fn provider_name(&self) -> &str;

    /// Exchanges and verifies an identity assertion from the provider,
    /// returning the stable external identifier and profile fields.
    async fn verify_assertion(&self, assertion: &str) -> PortResult<IdentityProfile>;
}

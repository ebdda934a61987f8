//! services/api/src/adapters/db.rs
//!
//! This module contains the database adapter, the concrete implementation of
//! the `StoreService` port. It handles all interactions with PostgreSQL using
//! `sqlx`. Queries are bound at runtime so the crate builds without a live
//! database; legacy record-kind spellings are folded into the canonical set
//! when rows are mapped to domain values.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use moa_core::domain::{
    Diary, DiaryChanges, DiaryImage, DiarySource, Media, NewDiary, NewRecord, NewSession, NewUser,
    Record, RecordChanges, RecordKind, Session, User,
};
use moa_core::ports::{PortError, PortResult, StoreService};
use sqlx::types::Json;
use sqlx::{FromRow, PgPool};
use uuid::Uuid;

//=========================================================================================
// The Main Adapter Struct
//=========================================================================================

/// A database adapter that implements the `StoreService` port.
#[derive(Clone)]
pub struct DbAdapter {
    pool: PgPool,
}

impl DbAdapter {
    /// Creates a new `DbAdapter`.
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }

    /// A helper function to run database migrations at startup.
    pub async fn run_migrations(&self) -> Result<(), sqlx::Error> {
        sqlx::migrate!("./migrations").run(&self.pool).await?;
        Ok(())
    }
}

fn unexpected(e: sqlx::Error) -> PortError {
    PortError::Unexpected(e.to_string())
}

//=========================================================================================
// "Impure" Database Record Structs
//=========================================================================================

#[derive(FromRow)]
struct UserRow {
    id: Uuid,
    provider: String,
    provider_id: String,
    email: Option<String>,
    name: Option<String>,
    picture: Option<String>,
    nickname: Option<String>,
    birthdate: Option<String>,
    gender: Option<String>,
    created_at: DateTime<Utc>,
    updated_at: DateTime<Utc>,
    last_login_at: DateTime<Utc>,
}

impl UserRow {
    fn to_domain(self) -> User {
        User {
            id: self.id,
            provider: self.provider,
            provider_id: self.provider_id,
            email: self.email,
            name: self.name,
            picture: self.picture,
            nickname: self.nickname,
            birthdate: self.birthdate,
            gender: self.gender,
            created_at: self.created_at,
            updated_at: self.updated_at,
            last_login_at: self.last_login_at,
        }
    }
}

#[derive(FromRow)]
struct SessionRow {
    id: Uuid,
    user_id: Uuid,
    jti: Uuid,
    created_at: DateTime<Utc>,
    expires_at: DateTime<Utc>,
    revoked_at: Option<DateTime<Utc>>,
    ip: Option<String>,
    user_agent: Option<String>,
}

impl SessionRow {
    fn to_domain(self) -> Session {
        Session {
            id: self.id,
            user_id: self.user_id,
            jti: self.jti,
            created_at: self.created_at,
            expires_at: self.expires_at,
            revoked_at: self.revoked_at,
            ip: self.ip,
            user_agent: self.user_agent,
        }
    }
}

#[derive(FromRow)]
struct RecordRow {
    id: Uuid,
    user_id: Uuid,
    kind: String,
    context: Option<String>,
    media_key: Option<String>,
    media_content_type: Option<String>,
    media_size: Option<i64>,
    created_at: DateTime<Utc>,
    updated_at: DateTime<Utc>,
}

impl RecordRow {
    fn to_domain(self) -> PortResult<Record> {
        let kind = RecordKind::parse(&self.kind)
            .ok_or_else(|| PortError::Unexpected(format!("unknown record kind '{}'", self.kind)))?;
        let media = self.media_key.map(|key| Media {
            key,
            content_type: self.media_content_type.unwrap_or_default(),
            size: self.media_size.unwrap_or(0),
        });
        Ok(Record {
            id: self.id,
            user_id: self.user_id,
            kind,
            context: self.context,
            media,
            created_at: self.created_at,
            updated_at: self.updated_at,
        })
    }
}

#[derive(FromRow)]
struct DiaryRow {
    id: Uuid,
    user_id: Uuid,
    body: String,
    persona: i32,
    emotion: Option<String>,
    entry_date: String,
    images: Json<Vec<DiaryImage>>,
    sources: Json<Vec<DiarySource>>,
    created_at: DateTime<Utc>,
    updated_at: DateTime<Utc>,
}

impl DiaryRow {
    fn to_domain(self) -> Diary {
        Diary {
            id: self.id,
            user_id: self.user_id,
            text: self.body,
            persona: self.persona,
            emotion: self.emotion,
            date: self.entry_date,
            images: self.images.0,
            sources: self.sources.0,
            created_at: self.created_at,
            updated_at: self.updated_at,
        }
    }
}

const USER_COLUMNS: &str = "id, provider, provider_id, email, name, picture, nickname, birthdate, gender, created_at, updated_at, last_login_at";
const SESSION_COLUMNS: &str = "id, user_id, jti, created_at, expires_at, revoked_at, ip, user_agent";
const RECORD_COLUMNS: &str = "id, user_id, kind, context, media_key, media_content_type, media_size, created_at, updated_at";
const DIARY_COLUMNS: &str = "id, user_id, body, persona, emotion, entry_date, images, sources, created_at, updated_at";

//=========================================================================================
// `StoreService` Trait Implementation
//=========================================================================================

#[async_trait]
impl StoreService for DbAdapter {
    async fn find_user_by_identity(
        &self,
        provider: &str,
        provider_id: &str,
    ) -> PortResult<Option<User>> {
        let row = sqlx::query_as::<_, UserRow>(&format!(
            "SELECT {USER_COLUMNS} FROM users WHERE provider = $1 AND provider_id = $2"
        ))
        .bind(provider)
        .bind(provider_id)
        .fetch_optional(&self.pool)
        .await
        .map_err(unexpected)?;
        Ok(row.map(UserRow::to_domain))
    }

    async fn find_user_by_id(&self, id: Uuid) -> PortResult<User> {
        let row = sqlx::query_as::<_, UserRow>(&format!(
            "SELECT {USER_COLUMNS} FROM users WHERE id = $1"
        ))
        .bind(id)
        .fetch_optional(&self.pool)
        .await
        .map_err(unexpected)?;
        row.map(UserRow::to_domain)
            .ok_or_else(|| PortError::NotFound(format!("User {} not found", id)))
    }

    async fn create_user(&self, new_user: NewUser) -> PortResult<User> {
        let now = Utc::now();
        let row = sqlx::query_as::<_, UserRow>(&format!(
            "INSERT INTO users ({USER_COLUMNS}) \
             VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10, $10, $10) \
             RETURNING {USER_COLUMNS}"
        ))
        .bind(Uuid::new_v4())
        .bind(&new_user.provider)
        .bind(&new_user.provider_id)
        .bind(&new_user.email)
        .bind(&new_user.name)
        .bind(&new_user.picture)
        .bind(&new_user.nickname)
        .bind(&new_user.birthdate)
        .bind(&new_user.gender)
        .bind(now)
        .fetch_one(&self.pool)
        .await
        .map_err(|e| match &e {
            sqlx::Error::Database(db) if db.is_unique_violation() => PortError::Conflict(format!(
                "user already exists for {}:{}",
                new_user.provider, new_user.provider_id
            )),
            _ => unexpected(e),
        })?;
        Ok(row.to_domain())
    }

    async fn touch_last_login(&self, id: Uuid) -> PortResult<()> {
        sqlx::query("UPDATE users SET last_login_at = $2, updated_at = $2 WHERE id = $1")
            .bind(id)
            .bind(Utc::now())
            .execute(&self.pool)
            .await
            .map_err(unexpected)?;
        Ok(())
    }

    async fn create_session(&self, new_session: NewSession) -> PortResult<Session> {
        let row = sqlx::query_as::<_, SessionRow>(&format!(
            "INSERT INTO sessions ({SESSION_COLUMNS}) \
             VALUES ($1, $2, $3, $4, $5, NULL, $6, $7) \
             RETURNING {SESSION_COLUMNS}"
        ))
        .bind(Uuid::new_v4())
        .bind(new_session.user_id)
        .bind(new_session.jti)
        .bind(Utc::now())
        .bind(new_session.expires_at)
        .bind(&new_session.ip)
        .bind(&new_session.user_agent)
        .fetch_one(&self.pool)
        .await
        .map_err(unexpected)?;
        Ok(row.to_domain())
    }

    async fn find_session_by_jti(&self, jti: Uuid) -> PortResult<Option<Session>> {
        let row = sqlx::query_as::<_, SessionRow>(&format!(
            "SELECT {SESSION_COLUMNS} FROM sessions WHERE jti = $1"
        ))
        .bind(jti)
        .fetch_optional(&self.pool)
        .await
        .map_err(unexpected)?;
        Ok(row.map(SessionRow::to_domain))
    }

    async fn revoke_session(&self, jti: Uuid) -> PortResult<bool> {
        // The conditional update is the only mutual exclusion the
        // rotation protocol needs: exactly one caller sees a row change.
        let result =
            sqlx::query("UPDATE sessions SET revoked_at = $2 WHERE jti = $1 AND revoked_at IS NULL")
                .bind(jti)
                .bind(Utc::now())
                .execute(&self.pool)
                .await
                .map_err(unexpected)?;
        Ok(result.rows_affected() == 1)
    }

    async fn create_record(&self, new_record: NewRecord) -> PortResult<Record> {
        let now = Utc::now();
        let (key, content_type, size) = match &new_record.media {
            Some(media) => (
                Some(media.key.clone()),
                Some(media.content_type.clone()),
                Some(media.size),
            ),
            None => (None, None, None),
        };
        let row = sqlx::query_as::<_, RecordRow>(&format!(
            "INSERT INTO records ({RECORD_COLUMNS}) \
             VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $8) \
             RETURNING {RECORD_COLUMNS}"
        ))
        .bind(Uuid::new_v4())
        .bind(new_record.user_id)
        .bind(new_record.kind.as_str())
        .bind(&new_record.context)
        .bind(key)
        .bind(content_type)
        .bind(size)
        .bind(now)
        .fetch_one(&self.pool)
        .await
        .map_err(unexpected)?;
        row.to_domain()
    }

    async fn find_record_by_id(&self, id: Uuid) -> PortResult<Option<Record>> {
        let row = sqlx::query_as::<_, RecordRow>(&format!(
            "SELECT {RECORD_COLUMNS} FROM records WHERE id = $1"
        ))
        .bind(id)
        .fetch_optional(&self.pool)
        .await
        .map_err(unexpected)?;
        row.map(RecordRow::to_domain).transpose()
    }

    async fn list_records(&self, user_id: Uuid) -> PortResult<Vec<Record>> {
        let rows = sqlx::query_as::<_, RecordRow>(&format!(
            "SELECT {RECORD_COLUMNS} FROM records WHERE user_id = $1 ORDER BY created_at DESC"
        ))
        .bind(user_id)
        .fetch_all(&self.pool)
        .await
        .map_err(unexpected)?;
        rows.into_iter().map(RecordRow::to_domain).collect()
    }

    async fn records_in_window(
        &self,
        user_id: Uuid,
        start: DateTime<Utc>,
        end: DateTime<Utc>,
    ) -> PortResult<Vec<Record>> {
        let rows = sqlx::query_as::<_, RecordRow>(&format!(
            "SELECT {RECORD_COLUMNS} FROM records \
             WHERE user_id = $1 AND created_at >= $2 AND created_at < $3 \
             ORDER BY created_at ASC"
        ))
        .bind(user_id)
        .bind(start)
        .bind(end)
        .fetch_all(&self.pool)
        .await
        .map_err(unexpected)?;
        rows.into_iter().map(RecordRow::to_domain).collect()
    }

    async fn find_records_by_ids(&self, user_id: Uuid, ids: &[Uuid]) -> PortResult<Vec<Record>> {
        let rows = sqlx::query_as::<_, RecordRow>(&format!(
            "SELECT {RECORD_COLUMNS} FROM records WHERE user_id = $1 AND id = ANY($2)"
        ))
        .bind(user_id)
        .bind(ids.to_vec())
        .fetch_all(&self.pool)
        .await
        .map_err(unexpected)?;
        rows.into_iter().map(RecordRow::to_domain).collect()
    }

    async fn update_record(&self, id: Uuid, changes: RecordChanges) -> PortResult<()> {
        let (media_touched, key, content_type, size) = match &changes.media {
            Some(Some(media)) => (
                true,
                Some(media.key.clone()),
                Some(media.content_type.clone()),
                Some(media.size),
            ),
            Some(None) => (true, None, None, None),
            None => (false, None, None, None),
        };
        sqlx::query(
            "UPDATE records SET \
               kind = CASE WHEN $2::text IS NULL THEN kind ELSE $2 END, \
               context = CASE WHEN $3::text IS NULL THEN context ELSE $3 END, \
               media_key = CASE WHEN $4 THEN $5 ELSE media_key END, \
               media_content_type = CASE WHEN $4 THEN $6 ELSE media_content_type END, \
               media_size = CASE WHEN $4 THEN $7 ELSE media_size END, \
               updated_at = $8 \
             WHERE id = $1",
        )
        .bind(id)
        .bind(changes.kind.map(|k| k.as_str()))
        .bind(&changes.context)
        .bind(media_touched)
        .bind(key)
        .bind(content_type)
        .bind(size)
        .bind(Utc::now())
        .execute(&self.pool)
        .await
        .map_err(unexpected)?;
        Ok(())
    }

    async fn delete_record(&self, id: Uuid) -> PortResult<()> {
        sqlx::query("DELETE FROM records WHERE id = $1")
            .bind(id)
            .execute(&self.pool)
            .await
            .map_err(unexpected)?;
        Ok(())
    }

    async fn create_diary(&self, new_diary: NewDiary) -> PortResult<Diary> {
        let row = sqlx::query_as::<_, DiaryRow>(&format!(
            "INSERT INTO diaries ({DIARY_COLUMNS}) \
             VALUES ($1, $2, $3, $4, NULL, $5, $6, $7, $8, $8) \
             RETURNING {DIARY_COLUMNS}"
        ))
        .bind(Uuid::new_v4())
        .bind(new_diary.user_id)
        .bind(&new_diary.text)
        .bind(new_diary.persona)
        .bind(&new_diary.date)
        .bind(Json(&new_diary.images))
        .bind(Json(&new_diary.sources))
        .bind(Utc::now())
        .fetch_one(&self.pool)
        .await
        .map_err(unexpected)?;
        Ok(row.to_domain())
    }

    async fn find_diary(&self, user_id: Uuid, id: Uuid) -> PortResult<Option<Diary>> {
        let row = sqlx::query_as::<_, DiaryRow>(&format!(
            "SELECT {DIARY_COLUMNS} FROM diaries WHERE id = $1 AND user_id = $2"
        ))
        .bind(id)
        .bind(user_id)
        .fetch_optional(&self.pool)
        .await
        .map_err(unexpected)?;
        Ok(row.map(DiaryRow::to_domain))
    }

    async fn list_diaries(&self, user_id: Uuid) -> PortResult<Vec<Diary>> {
        let rows = sqlx::query_as::<_, DiaryRow>(&format!(
            "SELECT {DIARY_COLUMNS} FROM diaries WHERE user_id = $1 ORDER BY created_at DESC"
        ))
        .bind(user_id)
        .fetch_all(&self.pool)
        .await
        .map_err(unexpected)?;
        Ok(rows.into_iter().map(DiaryRow::to_domain).collect())
    }

    async fn update_diary(
        &self,
        user_id: Uuid,
        id: Uuid,
        changes: DiaryChanges,
    ) -> PortResult<bool> {
        let result = sqlx::query(
            "UPDATE diaries SET \
               body = CASE WHEN $3::text IS NULL THEN body ELSE $3 END, \
               persona = CASE WHEN $4::int IS NULL THEN persona ELSE $4 END, \
               emotion = CASE WHEN $5::text IS NULL THEN emotion ELSE $5 END, \
               images = CASE WHEN $6::jsonb IS NULL THEN images ELSE $6 END, \
               updated_at = $7 \
             WHERE id = $1 AND user_id = $2",
        )
        .bind(id)
        .bind(user_id)
        .bind(&changes.text)
        .bind(changes.persona)
        .bind(&changes.emotion)
        .bind(changes.images.as_ref().map(Json))
        .bind(Utc::now())
        .execute(&self.pool)
        .await
        .map_err(unexpected)?;
        Ok(result.rows_affected() > 0)
    }
}

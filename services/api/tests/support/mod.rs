//! Shared test support: in-memory implementations of every port, a state
//! builder, and a multipart request builder for exercising the real
//! handlers without a running server.

use api_lib::config::Config;
use api_lib::tokens::TokenIssuer;
use api_lib::web::state::AppState;
use async_trait::async_trait;
use axum::extract::{FromRequest, Multipart};
use axum::http::header::CONTENT_TYPE;
use bytes::Bytes;
use chrono::{DateTime, Duration, Utc};
use moa_core::domain::{
    Diary, DiaryChanges, IdentityProfile, Media, NewDiary, NewRecord, NewSession, NewUser,
    Principal, Record, RecordChanges, RecordKind, Session, SessionMeta, User,
};
use moa_core::normalize::GenerationItem;
use moa_core::ports::{
    DiaryGenerationService, IdentityProviderService, ObjectStorageService, PortError, PortResult,
    SpeechToTextService, StoreService,
};
use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use uuid::Uuid;

//=========================================================================================
// In-memory store
//=========================================================================================

#[derive(Default)]
pub struct MemoryStore {
    pub users: Mutex<Vec<User>>,
    pub sessions: Mutex<Vec<Session>>,
    pub records: Mutex<Vec<Record>>,
    pub diaries: Mutex<Vec<Diary>>,
    /// Counts calls to the batched record lookup, so tests can assert
    /// that listing N diaries costs exactly one query.
    pub batched_record_queries: AtomicUsize,
}

impl MemoryStore {
    /// Inserts a record with an explicit creation time, for tests that
    /// exercise the day-window boundaries.
    pub fn insert_record_at(
        &self,
        user_id: Uuid,
        kind: RecordKind,
        context: Option<&str>,
        media: Option<Media>,
        created_at: DateTime<Utc>,
    ) -> Record {
        let record = Record {
            id: Uuid::new_v4(),
            user_id,
            kind,
            context: context.map(str::to_owned),
            media,
            created_at,
            updated_at: created_at,
        };
        self.records.lock().unwrap().push(record.clone());
        record
    }

    pub fn remove_user(&self, id: Uuid) {
        self.users.lock().unwrap().retain(|u| u.id != id);
    }

    pub fn session_for_jti(&self, jti: Uuid) -> Option<Session> {
        self.sessions
            .lock()
            .unwrap()
            .iter()
            .find(|s| s.jti == jti)
            .cloned()
    }
}

#[async_trait]
impl StoreService for MemoryStore {
    async fn find_user_by_identity(
        &self,
        provider: &str,
        provider_id: &str,
    ) -> PortResult<Option<User>> {
        Ok(self
            .users
            .lock()
            .unwrap()
            .iter()
            .find(|u| u.provider == provider && u.provider_id == provider_id)
            .cloned())
    }

    async fn find_user_by_id(&self, id: Uuid) -> PortResult<User> {
        self.users
            .lock()
            .unwrap()
            .iter()
            .find(|u| u.id == id)
            .cloned()
            .ok_or_else(|| PortError::NotFound(format!("User {} not found", id)))
    }

    async fn create_user(&self, new_user: NewUser) -> PortResult<User> {
        let mut users = self.users.lock().unwrap();
        if users
            .iter()
            .any(|u| u.provider == new_user.provider && u.provider_id == new_user.provider_id)
        {
            return Err(PortError::Conflict("duplicate identity".into()));
        }
        let now = Utc::now();
        let user = User {
            id: Uuid::new_v4(),
            provider: new_user.provider,
            provider_id: new_user.provider_id,
            email: new_user.email,
            name: new_user.name,
            picture: new_user.picture,
            nickname: new_user.nickname,
            birthdate: new_user.birthdate,
            gender: new_user.gender,
            created_at: now,
            updated_at: now,
            last_login_at: now,
        };
        users.push(user.clone());
        Ok(user)
    }

    async fn touch_last_login(&self, id: Uuid) -> PortResult<()> {
        let mut users = self.users.lock().unwrap();
        if let Some(user) = users.iter_mut().find(|u| u.id == id) {
            user.last_login_at = Utc::now();
        }
        Ok(())
    }

    async fn create_session(&self, new_session: NewSession) -> PortResult<Session> {
        let session = Session {
            id: Uuid::new_v4(),
            user_id: new_session.user_id,
            jti: new_session.jti,
            created_at: Utc::now(),
            expires_at: new_session.expires_at,
            revoked_at: None,
            ip: new_session.ip,
            user_agent: new_session.user_agent,
        };
        self.sessions.lock().unwrap().push(session.clone());
        Ok(session)
    }

    async fn find_session_by_jti(&self, jti: Uuid) -> PortResult<Option<Session>> {
        Ok(self.session_for_jti(jti))
    }

    async fn revoke_session(&self, jti: Uuid) -> PortResult<bool> {
        let mut sessions = self.sessions.lock().unwrap();
        match sessions
            .iter_mut()
            .find(|s| s.jti == jti && s.revoked_at.is_none())
        {
            Some(session) => {
                session.revoked_at = Some(Utc::now());
                Ok(true)
            }
            None => Ok(false),
        }
    }

    async fn create_record(&self, new_record: NewRecord) -> PortResult<Record> {
        let now = Utc::now();
        let record = Record {
            id: Uuid::new_v4(),
            user_id: new_record.user_id,
            kind: new_record.kind,
            context: new_record.context,
            media: new_record.media,
            created_at: now,
            updated_at: now,
        };
        self.records.lock().unwrap().push(record.clone());
        Ok(record)
    }

    async fn find_record_by_id(&self, id: Uuid) -> PortResult<Option<Record>> {
        Ok(self
            .records
            .lock()
            .unwrap()
            .iter()
            .find(|r| r.id == id)
            .cloned())
    }

    async fn list_records(&self, user_id: Uuid) -> PortResult<Vec<Record>> {
        let mut records: Vec<Record> = self
            .records
            .lock()
            .unwrap()
            .iter()
            .filter(|r| r.user_id == user_id)
            .cloned()
            .collect();
        records.sort_by(|a, b| b.created_at.cmp(&a.created_at));
        Ok(records)
    }

    async fn records_in_window(
        &self,
        user_id: Uuid,
        start: DateTime<Utc>,
        end: DateTime<Utc>,
    ) -> PortResult<Vec<Record>> {
        let mut records: Vec<Record> = self
            .records
            .lock()
            .unwrap()
            .iter()
            .filter(|r| r.user_id == user_id && r.created_at >= start && r.created_at < end)
            .cloned()
            .collect();
        records.sort_by_key(|r| r.created_at);
        Ok(records)
    }

    async fn find_records_by_ids(&self, user_id: Uuid, ids: &[Uuid]) -> PortResult<Vec<Record>> {
        self.batched_record_queries.fetch_add(1, Ordering::SeqCst);
        Ok(self
            .records
            .lock()
            .unwrap()
            .iter()
            .filter(|r| r.user_id == user_id && ids.contains(&r.id))
            .cloned()
            .collect())
    }

    async fn update_record(&self, id: Uuid, changes: RecordChanges) -> PortResult<()> {
        let mut records = self.records.lock().unwrap();
        if let Some(record) = records.iter_mut().find(|r| r.id == id) {
            if let Some(kind) = changes.kind {
                record.kind = kind;
            }
            if let Some(context) = changes.context {
                record.context = Some(context);
            }
            if let Some(media) = changes.media {
                record.media = media;
            }
            record.updated_at = Utc::now();
        }
        Ok(())
    }

    async fn delete_record(&self, id: Uuid) -> PortResult<()> {
        self.records.lock().unwrap().retain(|r| r.id != id);
        Ok(())
    }

    async fn create_diary(&self, new_diary: NewDiary) -> PortResult<Diary> {
        let now = Utc::now();
        let diary = Diary {
            id: Uuid::new_v4(),
            user_id: new_diary.user_id,
            text: new_diary.text,
            persona: new_diary.persona,
            emotion: None,
            date: new_diary.date,
            images: new_diary.images,
            sources: new_diary.sources,
            created_at: now,
            updated_at: now,
        };
        self.diaries.lock().unwrap().push(diary.clone());
        Ok(diary)
    }

    async fn find_diary(&self, user_id: Uuid, id: Uuid) -> PortResult<Option<Diary>> {
        Ok(self
            .diaries
            .lock()
            .unwrap()
            .iter()
            .find(|d| d.id == id && d.user_id == user_id)
            .cloned())
    }

    async fn list_diaries(&self, user_id: Uuid) -> PortResult<Vec<Diary>> {
        let mut diaries: Vec<Diary> = self
            .diaries
            .lock()
            .unwrap()
            .iter()
            .filter(|d| d.user_id == user_id)
            .cloned()
            .collect();
        diaries.sort_by(|a, b| b.created_at.cmp(&a.created_at));
        Ok(diaries)
    }

    async fn update_diary(
        &self,
        user_id: Uuid,
        id: Uuid,
        changes: DiaryChanges,
    ) -> PortResult<bool> {
        let mut diaries = self.diaries.lock().unwrap();
        match diaries
            .iter_mut()
            .find(|d| d.id == id && d.user_id == user_id)
        {
            Some(diary) => {
                if let Some(text) = changes.text {
                    diary.text = text;
                }
                if let Some(persona) = changes.persona {
                    diary.persona = persona;
                }
                if let Some(emotion) = changes.emotion {
                    diary.emotion = Some(emotion);
                }
                if let Some(images) = changes.images {
                    diary.images = images;
                }
                diary.updated_at = Utc::now();
                Ok(true)
            }
            None => Ok(false),
        }
    }
}

//=========================================================================================
// In-memory object storage
//=========================================================================================

#[derive(Default)]
pub struct MemoryStorage {
    pub objects: Mutex<HashMap<String, (usize, String)>>,
    pub fail_reads: AtomicBool,
    url_counter: AtomicUsize,
}

impl MemoryStorage {
    pub fn contains(&self, key: &str) -> bool {
        self.objects.lock().unwrap().contains_key(key)
    }
}

#[async_trait]
impl ObjectStorageService for MemoryStorage {
    async fn put_object(&self, key: &str, data: Bytes, content_type: &str) -> PortResult<()> {
        self.objects
            .lock()
            .unwrap()
            .insert(key.to_string(), (data.len(), content_type.to_string()));
        Ok(())
    }

    async fn delete_object(&self, key: &str) -> PortResult<()> {
        self.objects.lock().unwrap().remove(key);
        Ok(())
    }

    async fn signed_read_url(&self, key: &str) -> PortResult<String> {
        if self.fail_reads.load(Ordering::SeqCst) {
            return Err(PortError::Unavailable("storage is down".into()));
        }
        // Each call signs afresh, so two reads of the same key yield
        // different (both valid) URLs, like a real presigner.
        let n = self.url_counter.fetch_add(1, Ordering::SeqCst);
        Ok(format!("https://storage.test/{key}?X-Amz-Expires=3600&sig={n}"))
    }
}

//=========================================================================================
// Fake external services
//=========================================================================================

pub struct FakeStt {
    pub transcript: String,
}

#[async_trait]
impl SpeechToTextService for FakeStt {
    async fn transcribe(&self, _audio: Bytes, _filename: &str) -> PortResult<String> {
        Ok(self.transcript.clone())
    }
}

#[derive(Default)]
pub struct FakeGeneration {
    pub calls: Mutex<Vec<(Vec<GenerationItem>, i32)>>,
    pub response: Mutex<String>,
}

impl FakeGeneration {
    pub fn with_response(text: &str) -> Self {
        Self {
            calls: Mutex::new(Vec::new()),
            response: Mutex::new(text.to_string()),
        }
    }

    pub fn call_count(&self) -> usize {
        self.calls.lock().unwrap().len()
    }
}

#[async_trait]
impl DiaryGenerationService for FakeGeneration {
    async fn generate(&self, items: &[GenerationItem], persona: i32) -> PortResult<String> {
        self.calls.lock().unwrap().push((items.to_vec(), persona));
        let text = self.response.lock().unwrap().clone();
        if text.trim().is_empty() {
            return Err(PortError::Unavailable(
                "diary generation returned empty text".into(),
            ));
        }
        Ok(text)
    }
}

#[derive(Default)]
pub struct FakeIdentity {
    pub known: Mutex<HashMap<String, IdentityProfile>>,
}

impl FakeIdentity {
    /// Registers an assertion code resolving to a Google profile.
    pub fn accept(&self, code: &str, provider_id: &str, email: &str, name: &str) {
        self.known.lock().unwrap().insert(
            code.to_string(),
            IdentityProfile {
                provider: "google".to_string(),
                provider_id: provider_id.to_string(),
                email: Some(email.to_string()),
                name: Some(name.to_string()),
                picture: None,
                email_verified: true,
            },
        );
    }
}

#[async_trait]
impl IdentityProviderService for FakeIdentity {
    fn provider_name(&self) -> &str {
        "google"
    }

    async fn verify_assertion(&self, assertion: &str) -> PortResult<IdentityProfile> {
        self.known
            .lock()
            .unwrap()
            .get(assertion)
            .cloned()
            .ok_or(PortError::Unauthorized)
    }
}

//=========================================================================================
// Harness
//=========================================================================================

pub struct Harness {
    pub state: Arc<AppState>,
    pub store: Arc<MemoryStore>,
    pub storage: Arc<MemoryStorage>,
    pub generator: Arc<FakeGeneration>,
    pub identity: Arc<FakeIdentity>,
}

pub fn test_config() -> Config {
    Config {
        bind_address: "127.0.0.1:3000".parse().unwrap(),
        database_url: "postgres://unused".to_string(),
        log_level: tracing::Level::INFO,
        frontend_origin: "http://localhost:3000".to_string(),
        jwt_access_secret: "test-access-secret".to_string(),
        jwt_refresh_secret: "test-refresh-secret".to_string(),
        access_ttl_minutes: 15,
        refresh_ttl_days: 30,
        google_client_id: "test-client".to_string(),
        identity_timeout: std::time::Duration::from_secs(5),
        openai_api_key: None,
        stt_model: "whisper-1".to_string(),
        stt_language: "ko".to_string(),
        ai_service_url: "http://ai.test".to_string(),
        ai_timeout: std::time::Duration::from_secs(5),
        s3_bucket: "test-bucket".to_string(),
        presign_ttl: std::time::Duration::from_secs(3600),
    }
}

pub fn harness() -> Harness {
    harness_with_stt("안녕하세요")
}

pub fn harness_with_stt(transcript: &str) -> Harness {
    let config = Arc::new(test_config());
    let store = Arc::new(MemoryStore::default());
    let storage = Arc::new(MemoryStorage::default());
    let generator = Arc::new(FakeGeneration::with_response("오늘은 평온한 하루였다."));
    let identity = Arc::new(FakeIdentity::default());
    let stt = Arc::new(FakeStt {
        transcript: transcript.to_string(),
    });
    let tokens = TokenIssuer::new(
        config.jwt_access_secret.clone(),
        config.jwt_refresh_secret.clone(),
        Duration::minutes(config.access_ttl_minutes),
        Duration::days(config.refresh_ttl_days),
    );

    let state = Arc::new(AppState {
        store: store.clone(),
        storage: storage.clone(),
        stt,
        generator: generator.clone(),
        identity: identity.clone(),
        tokens,
        config,
    });

    Harness {
        state,
        store,
        storage,
        generator,
        identity,
    }
}

impl Harness {
    /// Creates a user directly through the store.
    pub async fn seed_user(&self, provider_id: &str, nickname: &str) -> User {
        self.store
            .create_user(NewUser {
                provider: "google".to_string(),
                provider_id: provider_id.to_string(),
                email: Some(format!("{provider_id}@example.com")),
                name: None,
                picture: None,
                nickname: Some(nickname.to_string()),
                birthdate: None,
                gender: None,
            })
            .await
            .unwrap()
    }

    pub fn principal_for(&self, user: &User) -> Principal {
        Principal {
            uid: user.id,
            provider: user.provider.clone(),
            provider_id: user.provider_id.clone(),
        }
    }

    /// Issues a refresh token (and its session row) for a user.
    pub async fn issue_refresh(&self, user: &User) -> String {
        self.state
            .tokens
            .issue_refresh(user, self.store.as_ref(), SessionMeta::default())
            .await
            .unwrap()
    }
}

//=========================================================================================
// Multipart builder
//=========================================================================================

pub enum Part {
    Text(&'static str, String),
    File {
        name: &'static str,
        filename: &'static str,
        content_type: &'static str,
        data: Vec<u8>,
    },
}

/// Builds a real `Multipart` extractor from in-memory parts.
pub async fn multipart(parts: Vec<Part>) -> Multipart {
    let boundary = "test-boundary-7f93c2";
    let mut body: Vec<u8> = Vec::new();
    for part in parts {
        body.extend_from_slice(format!("--{boundary}\r\n").as_bytes());
        match part {
            Part::Text(name, value) => {
                body.extend_from_slice(
                    format!("Content-Disposition: form-data; name=\"{name}\"\r\n\r\n").as_bytes(),
                );
                body.extend_from_slice(value.as_bytes());
            }
            Part::File {
                name,
                filename,
                content_type,
                data,
            } => {
                body.extend_from_slice(
                    format!(
                        "Content-Disposition: form-data; name=\"{name}\"; filename=\"{filename}\"\r\n\
                         Content-Type: {content_type}\r\n\r\n"
                    )
                    .as_bytes(),
                );
                body.extend_from_slice(&data);
            }
        }
        body.extend_from_slice(b"\r\n");
    }
    body.extend_from_slice(format!("--{boundary}--\r\n").as_bytes());

    let request = axum::http::Request::builder()
        .header(
            CONTENT_TYPE,
            format!("multipart/form-data; boundary={boundary}"),
        )
        .body(axum::body::Body::from(body))
        .unwrap();

    Multipart::from_request(request, &()).await.unwrap()
}

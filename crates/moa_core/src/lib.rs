pub mod domain;
pub mod normalize;
pub mod ports;
pub mod window;

pub use domain::{
    Diary, DiaryChanges, DiaryImage, DiarySource, IdentityProfile, Media, NewDiary, NewRecord,
    NewSession, NewUser, Principal, Record, RecordChanges, RecordKind, Session, SessionMeta, User,
};
pub use normalize::GenerationItem;
pub use ports::{
    DiaryGenerationService, IdentityProviderService, ObjectStorageService, PortError, PortResult,
    SpeechToTextService, StoreService,
};

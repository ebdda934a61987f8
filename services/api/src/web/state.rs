//! services/api/src/web/state.rs
//!
//! Defines the application's shared state.

use crate::config::Config;
use crate::tokens::TokenIssuer;
use moa_core::ports::{
    DiaryGenerationService, IdentityProviderService, ObjectStorageService, SpeechToTextService,
    StoreService,
};
use std::sync::Arc;

/// The shared application state, created once at startup and passed to all
/// handlers. Every external collaborator is reached through its port, so
/// tests can swap in in-memory implementations.
#[derive(Clone)]
pub struct AppState {
    pub store: Arc<dyn StoreService>,
    pub storage: Arc<dyn ObjectStorageService>,
    pub stt: Arc<dyn SpeechToTextService>,
    pub generator: Arc<dyn DiaryGenerationService>,
    pub identity: Arc<dyn IdentityProviderService>,
    pub tokens: TokenIssuer,
    pub config: Arc<Config>,
}

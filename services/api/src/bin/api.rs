//! services/api/src/bin/api.rs

use api_lib::{
    adapters::{
        DbAdapter, GoogleIdentityAdapter, HttpGenerationAdapter, S3StorageAdapter,
        WhisperSttAdapter,
    },
    config::Config,
    error::ApiError,
    tokens::TokenIssuer,
    web::{
        auth::{logout_handler, refresh_handler, signup_handler, verify_handler},
        diary::{
            create_diary_handler, get_diary_handler, list_diaries_handler, update_diary_handler,
        },
        middleware::require_auth,
        records::{
            create_record_handler, delete_record_handler, list_records_handler,
            update_record_handler,
        },
        state::AppState,
        ApiDoc,
    },
};
use async_openai::{config::OpenAIConfig, Client};
use axum::{
    extract::DefaultBodyLimit,
    http::{
        header::{ACCEPT, AUTHORIZATION, CONTENT_TYPE},
        HeaderValue, Method,
    },
    middleware as axum_middleware,
    routing::{get, patch, post},
    Router,
};
use chrono::Duration;
use sqlx::postgres::PgPoolOptions;
use std::sync::Arc;
use tower_http::cors::CorsLayer;
use tracing::info;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};
use utoipa::OpenApi;
use utoipa_swagger_ui::SwaggerUi;

#[tokio::main]
async fn main() -> Result<(), ApiError> {
    // --- 1. Load Configuration & Set Up Logging ---
    let config = Arc::new(Config::from_env()?);
    tracing_subscriber::registry()
        .with(tracing_subscriber::EnvFilter::new(config.log_level.to_string()))
        .with(tracing_subscriber::fmt::layer())
        .init();
    info!("Configuration loaded. Starting server...");

    // --- 2. Connect to Database & Run Migrations ---
    info!("Connecting to database...");
    let db_pool = PgPoolOptions::new()
        .max_connections(5)
        .connect(&config.database_url)
        .await?;
    let db_adapter = Arc::new(DbAdapter::new(db_pool.clone()));
    info!("Running database migrations...");
    db_adapter.run_migrations().await?;
    info!("Database migrations complete.");

    // --- 3. Initialize Service Adapters ---
    let openai_config = OpenAIConfig::new().with_api_key(
        config
            .openai_api_key
            .clone()
            .ok_or_else(|| ApiError::Internal("OPENAI_API_KEY is required".to_string()))?,
    );
    let openai_client = Client::with_config(openai_config);
    let stt_adapter = Arc::new(WhisperSttAdapter::new(
        openai_client,
        config.stt_model.clone(),
        config.stt_language.clone(),
    ));

    let http_client = reqwest::Client::new();
    let generation_adapter = Arc::new(HttpGenerationAdapter::new(
        http_client.clone(),
        config.ai_service_url.clone(),
        config.ai_timeout,
    ));
    let identity_adapter = Arc::new(GoogleIdentityAdapter::new(
        http_client,
        config.google_client_id.clone(),
        config.identity_timeout,
    ));

    let aws_config = aws_config::load_from_env().await;
    let storage_adapter = Arc::new(S3StorageAdapter::new(
        aws_sdk_s3::Client::new(&aws_config),
        config.s3_bucket.clone(),
        config.presign_ttl,
    ));

    let token_issuer = TokenIssuer::new(
        config.jwt_access_secret.clone(),
        config.jwt_refresh_secret.clone(),
        Duration::minutes(config.access_ttl_minutes),
        Duration::days(config.refresh_ttl_days),
    );

    // --- 4. Build the Shared AppState ---
    let app_state = Arc::new(AppState {
        store: db_adapter,
        storage: storage_adapter,
        stt: stt_adapter,
        generator: generation_adapter,
        identity: identity_adapter,
        tokens: token_issuer,
        config: config.clone(),
    });

    let cors = CorsLayer::new()
        .allow_origin(
            config
                .frontend_origin
                .parse::<HeaderValue>()
                .map_err(|e| ApiError::Internal(format!("invalid FRONTEND_ORIGIN: {e}")))?,
        )
        .allow_credentials(true)
        .allow_methods([
            Method::GET,
            Method::POST,
            Method::PATCH,
            Method::DELETE,
            Method::OPTIONS,
        ])
        .allow_headers([AUTHORIZATION, CONTENT_TYPE, ACCEPT]);

    // --- 5. Create the Web Router ---
    // Public routes (no auth required)
    let public_routes = Router::new()
        .route("/auth/verify", post(verify_handler))
        .route("/auth/signup", post(signup_handler))
        .route("/auth/refresh", post(refresh_handler))
        .route("/auth/logout", post(logout_handler));

    // Protected routes (bearer access token required)
    let protected_routes = Router::new()
        .route("/records", post(create_record_handler).get(list_records_handler))
        .route(
            "/records/{id}",
            patch(update_record_handler).delete(delete_record_handler),
        )
        .route("/diaries", post(create_diary_handler).get(list_diaries_handler))
        .route(
            "/diaries/{id}",
            get(get_diary_handler).patch(update_diary_handler),
        )
        .layer(axum_middleware::from_fn_with_state(
            app_state.clone(),
            require_auth,
        ));

    // Combine API routes
    let api_router = Router::new()
        .merge(public_routes)
        .merge(protected_routes)
        .layer(DefaultBodyLimit::max(10 * 1024 * 1024))
        .layer(cors)
        .with_state(app_state);

    // Merge the API router with the Swagger UI router for a complete application.
    let app = Router::new()
        .merge(api_router)
        .merge(SwaggerUi::new("/swagger-ui").url("/api-docs/openapi.json", ApiDoc::openapi()));

    // --- 6. Start the Server ---
    info!("Starting server on {}", config.bind_address);
    info!(
        "Swagger UI available at http://{}/swagger-ui",
        config.bind_address
    );
    let listener = tokio::net::TcpListener::bind(&config.bind_address).await?;
    axum::serve(listener, app).await?;

    Ok(())
}

mod auth;
mod error;
mod extract;
mod handlers;

use std::sync::Arc;

use axum::{
    extract::DefaultBodyLimit,
    http::{header, HeaderValue, Method},
    routing::{get, patch, post},
    Router,
};
use chrono::Duration;
use tower::ServiceBuilder;
use tower_http::{
    cors::{AllowOrigin, CorsLayer},
    services::ServeDir,
    trace::TraceLayer,
};

pub use auth::{AdminUser, CurrentUser, TOKEN_COOKIE};
pub use error::ApiError;

use crate::config::{AppConfig, DEFAULT_MAX_UPLOAD_BYTES, DEFAULT_SESSION_TTL_HOURS};
use crate::db::Database;
use crate::severity::SeverityRules;
use crate::uploads::{UploadStore, PUBLIC_PREFIX};

/// Shared handler state. Cloned per request; everything heavy is behind an `Arc`.
#[derive(Clone)]
pub struct AppState {
    pub db: Database,
    pub rules: Arc<SeverityRules>,
    pub uploads: UploadStore,
    pub session_ttl: Duration,
    /// `None` allows any origin without credentials.
    pub cors_origins: Option<Vec<String>>,
    pub max_upload_bytes: usize,
}

impl AppState {
    pub fn new(db: Database, rules: SeverityRules, uploads: UploadStore) -> Self {
        Self {
            db,
            rules: Arc::new(rules),
            uploads,
            session_ttl: Duration::hours(DEFAULT_SESSION_TTL_HOURS),
            cors_origins: None,
            max_upload_bytes: DEFAULT_MAX_UPLOAD_BYTES,
        }
    }

    pub fn from_config(db: Database, rules: SeverityRules, config: &AppConfig) -> Self {
        Self {
            session_ttl: Duration::hours(config.session_ttl_hours),
            cors_origins: config.cors_origins.clone(),
            max_upload_bytes: config.max_upload_bytes,
            ..Self::new(db, rules, UploadStore::new(&config.upload_dir))
        }
    }
}

pub fn create_router(state: AppState) -> Router {
    let api = Router::new()
        // Auth
        .route("/auth/signup", post(handlers::signup))
        .route("/auth/login", post(handlers::login))
        .route("/auth/logout", post(handlers::logout))
        .route("/auth/profile", get(handlers::profile).post(handlers::profile))
        // Issues
        .route("/issues", get(handlers::list_issues).post(handlers::create_issue))
        .route("/issues/mine", get(handlers::list_my_issues))
        .route("/issues/high", get(handlers::list_high_severity_issues))
        .route("/issues/resolved", get(handlers::list_resolved_issues))
        .route("/issues/success", get(handlers::list_resolved_issues))
        .route("/issues/{id}", get(handlers::get_issue).put(handlers::update_issue))
        .route("/issues/{id}/upvote", patch(handlers::upvote_issue))
        .route("/issues/{id}/comments", post(handlers::add_comment))
        .route("/issues/{id}/status", patch(handlers::update_issue_status))
        // Health
        .route("/health", get(handlers::health));

    let layers = ServiceBuilder::new()
        .layer(TraceLayer::new_for_http())
        .layer(cors_layer(state.cors_origins.as_deref()));

    Router::new()
        .nest("/api", api)
        .nest_service(PUBLIC_PREFIX, ServeDir::new(state.uploads.dir()))
        .layer(DefaultBodyLimit::max(state.max_upload_bytes))
        .layer(layers)
        .with_state(state)
}

fn cors_layer(origins: Option<&[String]>) -> CorsLayer {
    let Some(origins) = origins else {
        return CorsLayer::permissive();
    };

    let origins: Vec<HeaderValue> = origins
        .iter()
        .filter_map(|o| match HeaderValue::from_str(o) {
            Ok(value) => Some(value),
            Err(_) => {
                tracing::warn!("Ignoring invalid CORS origin {:?}", o);
                None
            }
        })
        .collect();

    CorsLayer::new()
        .allow_origin(AllowOrigin::list(origins))
        .allow_methods([Method::GET, Method::POST, Method::PUT, Method::PATCH])
        .allow_headers([header::CONTENT_TYPE, header::AUTHORIZATION])
        .allow_credentials(true)
}

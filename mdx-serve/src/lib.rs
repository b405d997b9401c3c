//! mdx-serve library - artifact streaming server
//!
//! Read-only HTTP surface over the mdx-common stores: track data for the
//! browser UI, streamed mixdown/stem audio, structure summaries and raw
//! artifacts. Handlers hold no state beyond the immutable [`AppState`].

use axum::Router;
use chrono::{DateTime, Utc};
use mdx_common::store::Storage;
use tower_http::cors::CorsLayer;
use tower_http::trace::TraceLayer;

pub mod api;
pub mod error;

pub use error::{ApiError, ApiResult};

/// Default `Cache-Control: max-age` for audio, seconds
pub const DEFAULT_CACHE_MAX_AGE: u64 = 3600;

/// Application state shared across HTTP handlers
#[derive(Clone)]
pub struct AppState {
    pub storage: Storage,
    /// `Cache-Control: max-age` for audio responses
    pub cache_max_age: u64,
    pub startup_time: DateTime<Utc>,
}

impl AppState {
    pub fn new(storage: Storage) -> Self {
        Self {
            storage,
            cache_max_age: DEFAULT_CACHE_MAX_AGE,
            startup_time: Utc::now(),
        }
    }

    pub fn with_cache_max_age(mut self, seconds: u64) -> Self {
        self.cache_max_age = seconds;
        self
    }
}

/// Build application router
///
/// Static routes (`/health`, `/api/...`) take precedence over the
/// catch-all `/:track` track-data route.
pub fn build_router(state: AppState) -> Router {
    Router::new()
        .merge(api::health_routes())
        .merge(api::audio_routes())
        .merge(api::summary_routes())
        .merge(api::artifact_routes())
        .merge(api::track_routes())
        .layer(TraceLayer::new_for_http())
        .layer(CorsLayer::permissive())
        .with_state(state)
}

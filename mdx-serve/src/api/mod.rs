//! HTTP API handlers

pub mod artifacts;
pub mod audio;
pub mod health;
pub mod summary;
pub mod track;

pub use artifacts::artifact_routes;
pub use audio::audio_routes;
pub use health::health_routes;
pub use summary::summary_routes;
pub use track::track_routes;

use crate::error::{ApiError, ApiResult};
use mdx_common::{AnalysisResult, TrackId};

/// Parse a track path segment; invalid ids are simply unknown tracks
pub(crate) fn parse_track(raw: &str) -> ApiResult<TrackId> {
    TrackId::new(raw).map_err(|e| ApiError::NotFound(e.to_string()))
}

/// Load a result on the blocking pool
pub(crate) async fn load_result(
    state: &crate::AppState,
    operation: &'static str,
    track: TrackId,
) -> ApiResult<AnalysisResult> {
    let results = state.storage.results.clone();
    let id = track.clone();
    tokio::task::spawn_blocking(move || results.get(&id))
        .await
        .map_err(|e| ApiError::join(operation, track.as_str(), e))?
        .map_err(|e| ApiError::from_store(operation, track.as_str(), e))
}

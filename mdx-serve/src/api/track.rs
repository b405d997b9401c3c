//! Track data for the browser UI
//!
//! `GET /<track>` returns the stored analysis result merged with the audio
//! URLs the UI streams from:
//!
//! ```json
//! {"bpm": 120, ..., "audioUrls": {"mixdown": "/api/audio/<t>/mixdown",
//!   "demixed": {"bass": "...", "drum": "...", "other": "...", "vocal": "..."}}}
//! ```

use axum::{
    extract::{Path, State},
    routing::get,
    Json, Router,
};
use mdx_common::{Stem, TrackId};
use serde::Serialize;
use serde_json::Value;
use std::collections::BTreeMap;

use super::{load_result, parse_track};
use crate::error::{ApiError, ApiResult};
use crate::AppState;

#[derive(Debug, Serialize)]
pub struct AudioUrls {
    pub mixdown: String,
    pub demixed: BTreeMap<&'static str, String>,
}

impl AudioUrls {
    pub fn for_track(track: &TrackId) -> Self {
        Self {
            mixdown: format!("/api/audio/{}/mixdown", track),
            demixed: Stem::ALL
                .into_iter()
                .map(|stem| (stem.url_name(), format!("/api/audio/{}/{}", track, stem.url_name())))
                .collect(),
        }
    }
}

/// GET /:track
pub async fn get_track(
    State(state): State<AppState>,
    Path(track): Path<String>,
) -> ApiResult<Json<Value>> {
    let track = parse_track(&track)?;
    let result = load_result(&state, "get_track", track.clone()).await?;

    let mut body = serde_json::to_value(&result).map_err(|e| {
        tracing::error!(track = %track, error = %e, "Result serialization failed");
        ApiError::Internal
    })?;
    let urls = serde_json::to_value(AudioUrls::for_track(&track)).map_err(|e| {
        tracing::error!(track = %track, error = %e, "Audio URL serialization failed");
        ApiError::Internal
    })?;
    if let Value::Object(map) = &mut body {
        map.insert("audioUrls".to_string(), urls);
    }

    Ok(Json(body))
}

pub fn track_routes() -> Router<AppState> {
    Router::new().route("/:track", get(get_track))
}

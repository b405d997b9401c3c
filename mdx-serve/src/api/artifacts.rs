//! Raw artifact access

use axum::{
    extract::{Path, State},
    http::{header, HeaderValue},
    response::{IntoResponse, Response},
    routing::get,
    Json, Router,
};
use mdx_common::store::ArtifactKind;
use serde::Serialize;

use super::parse_track;
use crate::error::{ApiError, ApiResult};
use crate::AppState;

#[derive(Debug, Serialize)]
pub struct ArtifactEntry {
    pub kind: ArtifactKind,
    pub compressed: bool,
    pub url: String,
}

/// GET /api/artifacts/:track
///
/// Empty list for a track with nothing published.
pub async fn list_artifacts(
    State(state): State<AppState>,
    Path(track): Path<String>,
) -> ApiResult<Json<Vec<ArtifactEntry>>> {
    let track = parse_track(&track)?;
    let artifacts = state.storage.artifacts.clone();
    let id = track.clone();
    let refs = tokio::task::spawn_blocking(move || artifacts.list(&id))
        .await
        .map_err(|e| ApiError::join("list_artifacts", track.as_str(), e))?;

    Ok(Json(
        refs.into_iter()
            .map(|a| ArtifactEntry {
                kind: a.kind,
                compressed: a.compressed,
                url: format!("/api/artifacts/{}/{}", track, a.kind),
            })
            .collect(),
    ))
}

/// GET /api/artifacts/:track/:kind
///
/// Bytes as stored; a compressed result is sent gzip-encoded.
pub async fn get_artifact(
    State(state): State<AppState>,
    Path((track, kind)): Path<(String, String)>,
) -> ApiResult<Response> {
    let track = parse_track(&track)?;
    let kind = ArtifactKind::parse(&kind)
        .map_err(|e| ApiError::from_store("get_artifact", track.as_str(), e))?;

    let artifacts = state.storage.artifacts.clone();
    let id = track.clone();
    let (compressed, bytes) = tokio::task::spawn_blocking(move || {
        let compressed = artifacts.locate(&id, kind).map(|a| a.compressed).unwrap_or(false);
        artifacts.get(&id, kind).map(|bytes| (compressed, bytes))
    })
    .await
    .map_err(|e| ApiError::join("get_artifact", track.as_str(), e))?
    .map_err(|e| ApiError::from_store("get_artifact", track.as_str(), e))?;

    let content_type = HeaderValue::from_static(kind.mime_type());
    if compressed {
        Ok((
            [
                (header::CONTENT_TYPE, content_type),
                (header::CONTENT_ENCODING, HeaderValue::from_static("gzip")),
            ],
            bytes,
        )
            .into_response())
    } else {
        Ok(([(header::CONTENT_TYPE, content_type)], bytes).into_response())
    }
}

pub fn artifact_routes() -> Router<AppState> {
    Router::new()
        .route("/api/artifacts/:track", get(list_artifacts))
        .route("/api/artifacts/:track/:kind", get(get_artifact))
}

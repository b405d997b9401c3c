//! Mixdown and stem streaming
//!
//! `GET /api/audio/<track>/<stem>` with stem one of `mixdown`, `bass`,
//! `drum`, `other`, `vocal` (`drums` and `vocals` are accepted too). A
//! single `Range: bytes=...` request yields 206 Partial Content.

use axum::{
    body::Body,
    extract::{Path, State},
    http::{header, HeaderMap, HeaderValue, StatusCode},
    response::Response,
    routing::get,
    Router,
};
use mdx_common::track::MediaSource;

use super::parse_track;
use crate::error::{ApiError, ApiResult};
use crate::AppState;

/// GET /api/audio/:track/:stem
pub async fn stream_audio(
    State(state): State<AppState>,
    Path((track, stem)): Path<(String, String)>,
    headers: HeaderMap,
) -> ApiResult<Response> {
    let track = parse_track(&track)?;
    let source = MediaSource::parse(&stem)
        .map_err(|e| ApiError::from_store("stream_audio", track.as_str(), e))?;
    let range_header = headers.get(header::RANGE).and_then(|v| v.to_str().ok());

    let stream = state
        .storage
        .media
        .open_with_range_header(&track, source, range_header)
        .await
        .map_err(|e| ApiError::from_store("stream_audio", track.as_str(), e))?;

    tracing::debug!(
        track = %track,
        source = source.url_name(),
        size = stream.size,
        partial = stream.range.is_some(),
        "Streaming audio"
    );

    let cache_control = format!("public, max-age={}", state.cache_max_age);
    let mut builder = Response::builder()
        .header(header::CONTENT_TYPE, HeaderValue::from_static(stream.mime_type))
        .header(header::CONTENT_LENGTH, stream.content_length())
        .header(header::CACHE_CONTROL, cache_control)
        .header(header::ACCEPT_RANGES, HeaderValue::from_static("bytes"));

    builder = match stream.range {
        Some(range) => builder.status(StatusCode::PARTIAL_CONTENT).header(
            header::CONTENT_RANGE,
            format!("bytes {}-{}/{}", range.start, range.end, stream.size),
        ),
        None => builder.status(StatusCode::OK),
    };

    builder
        .body(Body::from_stream(stream.into_body()))
        .map_err(|e| {
            tracing::error!(track = %track, error = %e, "Failed to build audio response");
            ApiError::Internal
        })
}

pub fn audio_routes() -> Router<AppState> {
    Router::new().route("/api/audio/:track/:stem", get(stream_audio))
}

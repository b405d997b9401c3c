//! Structure summary endpoint

use axum::{
    extract::{Path, State},
    routing::get,
    Json, Router,
};
use mdx_common::summary::StructureSummary;

use super::{load_result, parse_track};
use crate::error::ApiResult;
use crate::AppState;

/// GET /api/summary/:track
pub async fn get_summary(
    State(state): State<AppState>,
    Path(track): Path<String>,
) -> ApiResult<Json<StructureSummary>> {
    let track = parse_track(&track)?;
    let result = load_result(&state, "get_summary", track).await?;
    Ok(Json(StructureSummary::from_result(&result)))
}

pub fn summary_routes() -> Router<AppState> {
    Router::new().route("/api/summary/:track", get(get_summary))
}

//! Instance status endpoints

use axum::{
    Json,
    extract::{Path, Query, State},
};
use serde::Deserialize;

use crate::api::{
    error::{ApiError, ApiResult},
    state::ApiState,
};
use crate::store::{IndexSnapshot, StateSnapshot, StatusRecord};

#[derive(Debug, Deserialize)]
pub struct IndexQuery {
    /// Only list instances heard from after this timestamp
    since: Option<String>,
}

#[derive(Debug, Deserialize)]
pub struct StateQuery {
    /// Comma-separated instance ids
    ids: Option<String>,
}

/// Split a comma-separated id list, dropping blanks
fn parse_ids(raw: &str) -> Vec<String> {
    raw.split(',')
        .map(str::trim)
        .filter(|id| !id.is_empty())
        .map(String::from)
        .collect()
}

/// GET /api/v1/instances
pub async fn list_instances(
    State(state): State<ApiState>,
    Query(query): Query<IndexQuery>,
) -> Json<IndexSnapshot> {
    Json(state.store.build_index(query.since.as_deref()).await)
}

/// GET /api/v1/instances/:id
pub async fn get_instance(
    State(state): State<ApiState>,
    Path(id): Path<String>,
) -> ApiResult<Json<StatusRecord>> {
    let id = id.trim();
    if id.is_empty() {
        return Err(ApiError::InvalidRequest("instance id must not be empty".to_string()));
    }

    state
        .store
        .get(id)
        .await
        .map(Json)
        .ok_or_else(|| ApiError::NotFound(format!("unknown instance '{id}'")))
}

/// GET /api/v1/state
pub async fn get_state(
    State(state): State<ApiState>,
    Query(query): Query<StateQuery>,
) -> Json<StateSnapshot> {
    let ids = query.ids.as_deref().map(parse_ids);
    Json(state.store.build_state(ids.as_deref()).await)
}

//! Backfill status routes

use axum::{
    extract::{Path, Query, State},
    http::StatusCode,
    response::{IntoResponse, Response},
    routing::get,
    Json, Router,
};
use conduit_common::types::{BackfillId, Source, TenantId};
use serde::Deserialize;
use serde_json::json;
use std::sync::Arc;

use crate::error::AppError;
use crate::ingest::framework::cursor::SyncCursorStore;
use crate::ingest::framework::progress::ProgressCounters;

/// Default number of backfills listed per tenant
pub const DEFAULT_LIST_LIMIT: i64 = 20;

/// Maximum number of backfills listed per tenant
pub const MAX_LIST_LIMIT: i64 = 200;

#[derive(Clone)]
pub struct StatusState {
    pub counters: Arc<dyn ProgressCounters>,
    pub cursors: Arc<dyn SyncCursorStore>,
}

#[derive(Debug, Deserialize)]
pub struct ListBackfillsQuery {
    pub limit: Option<i64>,
}

/// Create backfill status routes
pub fn backfill_routes() -> Router<StatusState> {
    Router::new()
        .route("/backfills/:tenant_id", get(list_backfills))
        .route("/backfills/:tenant_id/:backfill_id", get(get_backfill))
        .route("/cursors/:tenant_id/:source", get(get_cursors))
}

/// GET /backfills/:tenant_id?limit=20
async fn list_backfills(
    State(state): State<StatusState>,
    Path(tenant_id): Path<String>,
    Query(query): Query<ListBackfillsQuery>,
) -> Result<Response, AppError> {
    let tenant_id = TenantId::parse(tenant_id)?;
    let limit = query.limit.unwrap_or(DEFAULT_LIST_LIMIT).clamp(1, MAX_LIST_LIMIT);

    let backfills = state.counters.list_recent(&tenant_id, limit).await?;
    let items: Vec<_> = backfills
        .iter()
        .map(|progress| json!({ "progress": progress, "complete": progress.is_complete() }))
        .collect();

    Ok((StatusCode::OK, Json(json!({ "backfills": items }))).into_response())
}

/// GET /backfills/:tenant_id/:backfill_id
async fn get_backfill(
    State(state): State<StatusState>,
    Path((tenant_id, backfill_id)): Path<(String, String)>,
) -> Result<Response, AppError> {
    let tenant_id = TenantId::parse(tenant_id)?;
    let backfill_id: BackfillId = backfill_id
        .parse()
        .map_err(|_| AppError::BadRequest(format!("invalid backfill id: {}", backfill_id)))?;

    let progress = state
        .counters
        .get(backfill_id, &tenant_id)
        .await?
        .ok_or_else(|| AppError::NotFound(format!("backfill {} not found", backfill_id)))?;

    Ok((
        StatusCode::OK,
        Json(json!({ "progress": progress, "complete": progress.is_complete() })),
    )
        .into_response())
}

/// GET /cursors/:tenant_id/:source
async fn get_cursors(
    State(state): State<StatusState>,
    Path((tenant_id, source)): Path<(String, String)>,
) -> Result<Response, AppError> {
    let tenant_id = TenantId::parse(tenant_id)?;
    let source: Source = source.parse()?;

    let synced_until = state.cursors.synced_until(&tenant_id, source).await?;
    let full_backfill_complete = state.cursors.full_backfill_complete(&tenant_id, source).await?;

    Ok((
        StatusCode::OK,
        Json(json!({
            "tenant_id": tenant_id,
            "source": source,
            "synced_until": synced_until,
            "full_backfill_complete": full_backfill_complete,
        })),
    )
        .into_response())
}

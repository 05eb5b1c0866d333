//! Fate ticket API handlers.

use axum::{
    extract::{rejection::JsonRejection, rejection::QueryRejection, Path, Query, State},
    http::StatusCode,
    Json,
};
use serde::{Deserialize, Serialize};
use std::sync::Arc;

use fateticket_core::fate::{self, FateTicket};
use fateticket_core::{
    BatchQueueEntry, DeletionReport, FateBatch, GenerateBatchRequest, GenerationReport,
    ListTicketsQuery, TicketPage,
};

use super::error::{api_error, generation_error, service_error, ApiError};
use super::middleware::AuthUser;
use crate::state::AppState;

// ============================================================================
// Request Types
// ============================================================================

#[derive(Debug, Serialize, Deserialize)]
pub struct DeleteTicketsBody {
    pub ticket_ids: Vec<String>,
}

#[derive(Debug, Serialize, Deserialize)]
pub struct DrawTicketBody {
    pub event_date_id: String,
}

fn bad_body(rejection: JsonRejection) -> ApiError {
    api_error(StatusCode::BAD_REQUEST, rejection.body_text())
}

// ============================================================================
// Handlers
// ============================================================================

/// POST /fate/batches
pub async fn generate_batch(
    State(state): State<Arc<AppState>>,
    body: Result<Json<GenerateBatchRequest>, JsonRejection>,
) -> Result<(StatusCode, Json<GenerationReport>), ApiError> {
    let Json(request) = body.map_err(bad_body)?;

    let report = state
        .generator()
        .generate(&request)
        .map_err(generation_error)?;

    Ok((StatusCode::CREATED, Json(report)))
}

/// GET /fate/batches/{id}
pub async fn get_batch(
    State(state): State<Arc<AppState>>,
    Path(id): Path<String>,
) -> Result<Json<FateBatch>, ApiError> {
    fate::batch(state.store(), &id)
        .map(Json)
        .map_err(service_error)
}

/// GET /fate/queue/{id}
pub async fn get_queue_entry(
    State(state): State<Arc<AppState>>,
    Path(id): Path<String>,
) -> Result<Json<BatchQueueEntry>, ApiError> {
    fate::queue_entry(state.store(), &id)
        .map(Json)
        .map_err(service_error)
}

/// GET /fate/tickets?event_id=..&event_date_id=..&page=..&pageSize=..
pub async fn list_tickets(
    State(state): State<Arc<AppState>>,
    query: Result<Query<ListTicketsQuery>, QueryRejection>,
) -> Result<Json<TicketPage>, ApiError> {
    let Query(query) =
        query.map_err(|rejection| api_error(StatusCode::BAD_REQUEST, rejection.body_text()))?;

    fate::list_active_tickets(state.store(), state.fate_config(), &query)
        .map(Json)
        .map_err(service_error)
}

/// POST /fate/tickets/delete
pub async fn delete_tickets(
    State(state): State<Arc<AppState>>,
    body: Result<Json<DeleteTicketsBody>, JsonRejection>,
) -> Result<Json<DeletionReport>, ApiError> {
    let Json(body) = body.map_err(bad_body)?;

    fate::delete_tickets(state.store(), &body.ticket_ids)
        .map(Json)
        .map_err(service_error)
}

/// POST /fate/draw
pub async fn draw_ticket(
    State(state): State<Arc<AppState>>,
    AuthUser(user_id): AuthUser,
    body: Result<Json<DrawTicketBody>, JsonRejection>,
) -> Result<Json<FateTicket>, ApiError> {
    let Json(body) = body.map_err(bad_body)?;

    fate::draw_ticket(state.store(), &body.event_date_id, &user_id)
        .map(Json)
        .map_err(service_error)
}

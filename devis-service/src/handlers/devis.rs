use crate::dtos::{AddLineRequest, AddServiceRequest, CreateDevisRequest};
use crate::models::RequestContext;
use crate::startup::AppState;
use axum::{
    extract::{Path, State},
    http::StatusCode,
    response::IntoResponse,
    Json,
};
use service_core::error::AppError;
use uuid::Uuid;
use validator::Validate;

pub async fn create_devis(
    State(state): State<AppState>,
    ctx: RequestContext,
    Json(req): Json<CreateDevisRequest>,
) -> Result<impl IntoResponse, AppError> {
    req.validate()?;
    let quote = state
        .ledger
        .create_quote(&ctx, req.client_id, req.notes)
        .await?;
    Ok((StatusCode::CREATED, Json(quote)))
}

pub async fn get_devis(
    State(state): State<AppState>,
    _ctx: RequestContext,
    Path(id): Path<Uuid>,
) -> Result<impl IntoResponse, AppError> {
    Ok(Json(state.ledger.get_quote(id).await?))
}

pub async fn delete_devis(
    State(state): State<AppState>,
    _ctx: RequestContext,
    Path(id): Path<Uuid>,
) -> Result<impl IntoResponse, AppError> {
    Ok(Json(state.ledger.delete_quote(id).await?))
}

pub async fn add_line(
    State(state): State<AppState>,
    _ctx: RequestContext,
    Path(id): Path<Uuid>,
    Json(req): Json<AddLineRequest>,
) -> Result<impl IntoResponse, AppError> {
    req.validate()?;
    let quote = state.ledger.add_line(id, req.input, req.description).await?;
    Ok((StatusCode::CREATED, Json(quote)))
}

pub async fn remove_line(
    State(state): State<AppState>,
    _ctx: RequestContext,
    Path((id, line_id)): Path<(Uuid, Uuid)>,
) -> Result<impl IntoResponse, AppError> {
    Ok(Json(state.ledger.remove_line(id, line_id).await?))
}

pub async fn add_service(
    State(state): State<AppState>,
    _ctx: RequestContext,
    Path(id): Path<Uuid>,
    Json(req): Json<AddServiceRequest>,
) -> Result<impl IntoResponse, AppError> {
    let quote = state.ledger.add_service(id, req.service_id).await?;
    Ok((StatusCode::CREATED, Json(quote)))
}

pub async fn remove_service(
    State(state): State<AppState>,
    _ctx: RequestContext,
    Path((id, item_id)): Path<(Uuid, Uuid)>,
) -> Result<impl IntoResponse, AppError> {
    Ok(Json(state.ledger.remove_service(id, item_id).await?))
}

pub async fn validate_devis(
    State(state): State<AppState>,
    _ctx: RequestContext,
    Path(id): Path<Uuid>,
) -> Result<impl IntoResponse, AppError> {
    Ok(Json(state.ledger.validate_quote(id).await?))
}

pub async fn cancel_devis(
    State(state): State<AppState>,
    _ctx: RequestContext,
    Path(id): Path<Uuid>,
) -> Result<impl IntoResponse, AppError> {
    Ok(Json(state.ledger.cancel_quote(id).await?))
}

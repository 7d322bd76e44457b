use crate::dtos::{CloseRegisterRequest, CreateExpenseRequest, ScopeParams, UpdateExpenseRequest};
use crate::middleware::Admin;
use crate::models::RequestContext;
use crate::startup::AppState;
use axum::{
    extract::{Path, Query, State},
    http::StatusCode,
    response::IntoResponse,
    Json,
};
use service_core::error::AppError;
use uuid::Uuid;
use validator::Validate;

pub async fn list_expenses(
    State(state): State<AppState>,
    _admin: Admin,
) -> Result<impl IntoResponse, AppError> {
    Ok(Json(state.ledger.list_expenses().await?))
}

pub async fn create_expense(
    State(state): State<AppState>,
    Admin(ctx): Admin,
    Json(req): Json<CreateExpenseRequest>,
) -> Result<impl IntoResponse, AppError> {
    req.validate()?;
    let expense = state.ledger.create_expense(&ctx, req.into()).await?;
    Ok((StatusCode::CREATED, Json(expense)))
}

pub async fn update_expense(
    State(state): State<AppState>,
    _admin: Admin,
    Path(id): Path<Uuid>,
    Json(req): Json<UpdateExpenseRequest>,
) -> Result<impl IntoResponse, AppError> {
    req.validate()?;
    Ok(Json(state.ledger.update_expense(id, req.into()).await?))
}

pub async fn delete_expense(
    State(state): State<AppState>,
    _admin: Admin,
    Path(id): Path<Uuid>,
) -> Result<impl IntoResponse, AppError> {
    Ok(Json(state.ledger.delete_expense(id).await?))
}

/// Running totals of the open cash-register period.
pub async fn period_stats(
    State(state): State<AppState>,
    _ctx: RequestContext,
    Query(params): Query<ScopeParams>,
) -> Result<impl IntoResponse, AppError> {
    Ok(Json(state.ledger.period_stats(params.scope).await?))
}

pub async fn list_closures(
    State(state): State<AppState>,
    _ctx: RequestContext,
    Query(params): Query<ScopeParams>,
) -> Result<impl IntoResponse, AppError> {
    Ok(Json(state.ledger.list_closures(params.scope).await?))
}

pub async fn close_register(
    State(state): State<AppState>,
    Admin(ctx): Admin,
    Json(req): Json<CloseRegisterRequest>,
) -> Result<impl IntoResponse, AppError> {
    req.validate()?;
    let closure = state
        .ledger
        .close_period(&ctx, req.scope, req.notes)
        .await?;
    Ok((StatusCode::CREATED, Json(closure)))
}

pub async fn dashboard_stats(
    State(state): State<AppState>,
    _admin: Admin,
) -> Result<impl IntoResponse, AppError> {
    Ok(Json(state.ledger.dashboard_stats().await?))
}

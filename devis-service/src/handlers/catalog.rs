use crate::dtos::{
    CreateClientRequest, CreateMaterialRequest, CreateServiceRequest, SetMachinePriceRequest,
    UpdatePriceRequest,
};
use crate::middleware::Admin;
use crate::models::{LineInput, MachineType, RequestContext};
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

/// Price a line without adding it to any quote.
pub async fn resolve_price(
    State(state): State<AppState>,
    _ctx: RequestContext,
    Json(input): Json<LineInput>,
) -> Result<impl IntoResponse, AppError> {
    let price = state.ledger.resolve_line_price(&input).await?;
    Ok(Json(price))
}

pub async fn create_client(
    State(state): State<AppState>,
    _ctx: RequestContext,
    Json(req): Json<CreateClientRequest>,
) -> Result<impl IntoResponse, AppError> {
    req.validate()?;
    let client = state.ledger.create_client(req.into()).await?;
    Ok((StatusCode::CREATED, Json(client)))
}

pub async fn get_client(
    State(state): State<AppState>,
    _ctx: RequestContext,
    Path(id): Path<Uuid>,
) -> Result<impl IntoResponse, AppError> {
    Ok(Json(state.ledger.get_client(id).await?))
}

pub async fn get_client_balance(
    State(state): State<AppState>,
    _ctx: RequestContext,
    Path(id): Path<Uuid>,
) -> Result<impl IntoResponse, AppError> {
    Ok(Json(state.ledger.get_client_balance(id).await?))
}

pub async fn list_client_devis(
    State(state): State<AppState>,
    _ctx: RequestContext,
    Path(id): Path<Uuid>,
) -> Result<impl IntoResponse, AppError> {
    Ok(Json(state.ledger.quotes_for_client(id).await?))
}

pub async fn list_machine_pricing(
    State(state): State<AppState>,
    _ctx: RequestContext,
) -> Result<impl IntoResponse, AppError> {
    Ok(Json(state.ledger.machine_pricing().await?))
}

pub async fn set_machine_price(
    State(state): State<AppState>,
    _admin: Admin,
    Path(machine_type): Path<MachineType>,
    Json(req): Json<SetMachinePriceRequest>,
) -> Result<impl IntoResponse, AppError> {
    req.validate()?;
    let pricing = state
        .ledger
        .set_machine_price(machine_type, req.price_per_unit, req.description)
        .await?;
    Ok(Json(pricing))
}

pub async fn create_material(
    State(state): State<AppState>,
    _admin: Admin,
    Json(req): Json<CreateMaterialRequest>,
) -> Result<impl IntoResponse, AppError> {
    req.validate()?;
    let material = state
        .ledger
        .create_material(req.name, req.price_per_unit, req.unit, req.description)
        .await?;
    Ok((StatusCode::CREATED, Json(material)))
}

pub async fn update_material_price(
    State(state): State<AppState>,
    _admin: Admin,
    Path(id): Path<Uuid>,
    Json(req): Json<UpdatePriceRequest>,
) -> Result<impl IntoResponse, AppError> {
    Ok(Json(state.ledger.update_material_price(id, req.price).await?))
}

pub async fn create_service(
    State(state): State<AppState>,
    _admin: Admin,
    Json(req): Json<CreateServiceRequest>,
) -> Result<impl IntoResponse, AppError> {
    req.validate()?;
    let service = state
        .ledger
        .create_service(req.name, req.price, req.description)
        .await?;
    Ok((StatusCode::CREATED, Json(service)))
}

pub async fn update_service_price(
    State(state): State<AppState>,
    _admin: Admin,
    Path(id): Path<Uuid>,
    Json(req): Json<UpdatePriceRequest>,
) -> Result<impl IntoResponse, AppError> {
    Ok(Json(state.ledger.update_service_price(id, req.price).await?))
}

use crate::dtos::{
    CreateDirectInvoiceRequest, CreateInvoiceFromDevisRequest, CreatePaymentRequest,
    InvoiceResponse,
};
use crate::models::{Invoice, RequestContext};
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

async fn with_stats(state: &AppState, invoice: Invoice) -> Result<InvoiceResponse, AppError> {
    let payment_stats = state.ledger.invoice_payment_stats(invoice.id).await?;
    Ok(InvoiceResponse {
        invoice,
        payment_stats,
    })
}

pub async fn create_invoice_from_devis(
    State(state): State<AppState>,
    ctx: RequestContext,
    Json(req): Json<CreateInvoiceFromDevisRequest>,
) -> Result<impl IntoResponse, AppError> {
    req.validate()?;
    let invoice = state
        .ledger
        .create_invoice_from_quotes(&ctx, &req.devis_ids)
        .await?;
    Ok((StatusCode::CREATED, Json(with_stats(&state, invoice).await?)))
}

pub async fn create_direct_invoice(
    State(state): State<AppState>,
    ctx: RequestContext,
    Json(req): Json<CreateDirectInvoiceRequest>,
) -> Result<impl IntoResponse, AppError> {
    req.validate()?;
    let client_id = req.client_id;
    let invoice = state
        .ledger
        .create_direct_invoice(&ctx, client_id, req.item_tuples())
        .await?;
    Ok((StatusCode::CREATED, Json(with_stats(&state, invoice).await?)))
}

pub async fn get_invoice(
    State(state): State<AppState>,
    _ctx: RequestContext,
    Path(id): Path<Uuid>,
) -> Result<impl IntoResponse, AppError> {
    let invoice = state.ledger.get_invoice(id).await?;
    Ok(Json(with_stats(&state, invoice).await?))
}

pub async fn create_payment(
    State(state): State<AppState>,
    ctx: RequestContext,
    Json(req): Json<CreatePaymentRequest>,
) -> Result<impl IntoResponse, AppError> {
    req.validate()?;
    let new = req.into_new_payment().ok_or_else(|| {
        AppError::BadRequest(anyhow::anyhow!(
            "Exactly one of invoice_id or devis_id is required"
        ))
    })?;
    let payment = state.ledger.apply_payment(&ctx, new).await?;
    Ok((StatusCode::CREATED, Json(payment)))
}

pub async fn delete_payment(
    State(state): State<AppState>,
    _ctx: RequestContext,
    Path(id): Path<Uuid>,
) -> Result<impl IntoResponse, AppError> {
    Ok(Json(state.ledger.delete_payment(id).await?))
}

pub async fn list_invoice_payments(
    State(state): State<AppState>,
    _ctx: RequestContext,
    Path(id): Path<Uuid>,
) -> Result<impl IntoResponse, AppError> {
    Ok(Json(state.ledger.payments_for_invoice(id).await?))
}

pub async fn invoice_payment_stats(
    State(state): State<AppState>,
    _ctx: RequestContext,
    Path(id): Path<Uuid>,
) -> Result<impl IntoResponse, AppError> {
    Ok(Json(state.ledger.invoice_payment_stats(id).await?))
}

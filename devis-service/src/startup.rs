//! Application startup and lifecycle management.

use crate::config::DevisConfig;
use crate::handlers::{self, billing, catalog, devis, finance};
use crate::services::{Database, LedgerService, LedgerStore, MemoryStore};
use axum::{
    middleware,
    routing::{delete, get, post, put},
    Router,
};
use service_core::error::AppError;
use service_core::middleware::metrics::metrics_middleware;
use service_core::middleware::tracing::request_id_middleware;
use std::future::IntoFuture;
use std::sync::Arc;
use tokio::net::TcpListener;
use tower_http::trace::{DefaultMakeSpan, DefaultOnResponse, TraceLayer};
use tracing::Level;

/// Shared application state.
#[derive(Clone)]
pub struct AppState {
    pub config: DevisConfig,
    pub ledger: LedgerService,
}

/// Every route of the service, with tracing, request ids and HTTP metrics.
pub fn build_router(state: AppState) -> Router {
    Router::new()
        .route("/health", get(handlers::health_check))
        .route("/ready", get(handlers::readiness_check))
        .route("/metrics", get(handlers::metrics_handler))
        .route("/pricing/resolve", post(catalog::resolve_price))
        .route("/clients", post(catalog::create_client))
        .route("/clients/:id", get(catalog::get_client))
        .route("/clients/:id/balance", get(catalog::get_client_balance))
        .route("/clients/:id/devis", get(catalog::list_client_devis))
        .route("/machines/pricing", get(catalog::list_machine_pricing))
        .route(
            "/machines/pricing/:machine_type",
            put(catalog::set_machine_price),
        )
        .route("/materials", post(catalog::create_material))
        .route("/materials/:id/price", put(catalog::update_material_price))
        .route("/services", post(catalog::create_service))
        .route("/services/:id/price", put(catalog::update_service_price))
        .route("/devis", post(devis::create_devis))
        .route(
            "/devis/:id",
            get(devis::get_devis).delete(devis::delete_devis),
        )
        .route("/devis/:id/lines", post(devis::add_line))
        .route("/devis/:id/lines/:line_id", delete(devis::remove_line))
        .route("/devis/:id/services", post(devis::add_service))
        .route("/devis/:id/services/:item_id", delete(devis::remove_service))
        .route("/devis/:id/validate", post(devis::validate_devis))
        .route("/devis/:id/cancel", post(devis::cancel_devis))
        .route(
            "/invoices/from-devis",
            post(billing::create_invoice_from_devis),
        )
        .route("/invoices/direct", post(billing::create_direct_invoice))
        .route("/invoices/:id", get(billing::get_invoice))
        .route("/payments", post(billing::create_payment))
        .route("/payments/:id", delete(billing::delete_payment))
        .route(
            "/payments/invoice/:id",
            get(billing::list_invoice_payments),
        )
        .route(
            "/payments/invoice/:id/stats",
            get(billing::invoice_payment_stats),
        )
        .route(
            "/expenses",
            get(finance::list_expenses).post(finance::create_expense),
        )
        .route(
            "/expenses/:id",
            put(finance::update_expense).delete(finance::delete_expense),
        )
        .route("/finance/stats", get(finance::period_stats))
        .route(
            "/finance/closures",
            get(finance::list_closures).post(finance::close_register),
        )
        .route("/dashboard/stats", get(finance::dashboard_stats))
        .layer(
            TraceLayer::new_for_http()
                .make_span_with(DefaultMakeSpan::new().level(Level::INFO))
                .on_response(DefaultOnResponse::new().level(Level::INFO)),
        )
        .layer(middleware::from_fn(metrics_middleware))
        .layer(middleware::from_fn(request_id_middleware))
        .with_state(state)
}

/// Application container for managing server lifecycle.
pub struct Application {
    port: u16,
    server: Box<dyn std::future::Future<Output = std::io::Result<()>> + Send + Unpin>,
    ledger: LedgerService,
}

impl Application {
    /// Build the application with the store selected by configuration.
    pub async fn build(config: DevisConfig) -> Result<Self, AppError> {
        let store: Arc<dyn LedgerStore> = match &config.database {
            Some(db_config) => {
                let db = Database::new(
                    &db_config.url,
                    db_config.max_connections,
                    db_config.min_connections,
                )
                .await
                .map_err(|e| {
                    tracing::error!(error = %e, "Failed to connect to database");
                    AppError::from(e)
                })?;
                db.run_migrations().await.map_err(|e| {
                    tracing::error!(error = %e, "Failed to run database migrations");
                    AppError::from(e)
                })?;
                Arc::new(db)
            }
            None => {
                tracing::warn!("DATABASE_URL not set, using the in-memory ledger store");
                Arc::new(MemoryStore::new())
            }
        };

        Self::build_with_ledger(config, LedgerService::new(store)).await
    }

    /// Build around an existing ledger, so callers can seed or inspect it.
    pub async fn build_with_ledger(
        config: DevisConfig,
        ledger: LedgerService,
    ) -> Result<Self, AppError> {
        let state = AppState {
            config: config.clone(),
            ledger: ledger.clone(),
        };
        let app = build_router(state);

        let addr = config.common.bind_address();
        let listener = TcpListener::bind(&addr).await.map_err(|e| {
            tracing::error!("Failed to bind TCP listener to {}: {}", addr, e);
            AppError::from(e)
        })?;
        let port = listener.local_addr()?.port();

        tracing::info!(port = port, "devis-service listening");

        let server = axum::serve(listener, app);

        Ok(Self {
            port,
            server: Box::new(server.into_future()),
            ledger,
        })
    }

    pub fn port(&self) -> u16 {
        self.port
    }

    pub fn ledger(&self) -> &LedgerService {
        &self.ledger
    }

    pub async fn run_until_stopped(self) -> std::io::Result<()> {
        self.server.await
    }
}

//! Test helper module for devis-service integration tests.
//!
//! Ledger-level tests run against the in-memory store. HTTP tests spawn the
//! full application on a random port. PostgreSQL tests run only when
//! `TEST_DATABASE_URL` is set, each in its own schema.

#![allow(dead_code)]

use devis_service::config::DevisConfig;
use devis_service::models::{
    FixedService, MachineType, Material, NewClient, RequestContext, UserRole,
};
use devis_service::services::{init_metrics, Database, LedgerService};
use devis_service::startup::Application;
use rust_decimal::Decimal;
use std::sync::atomic::{AtomicU32, Ordering};
use std::sync::Arc;
use uuid::Uuid;

// Counter for unique schema names
static SCHEMA_COUNTER: AtomicU32 = AtomicU32::new(0);

pub fn dec(s: &str) -> Decimal {
    s.parse().expect("valid decimal literal")
}

pub fn admin() -> RequestContext {
    RequestContext::new(Uuid::new_v4(), UserRole::Admin)
}

pub fn employee() -> RequestContext {
    RequestContext::new(Uuid::new_v4(), UserRole::Employee)
}

/// A ledger with a priced catalog and one client.
pub struct Workshop {
    pub ledger: LedgerService,
    pub client_id: Uuid,
    pub material: Material,
    pub service: FixedService,
}

impl Workshop {
    /// CNC at 2.0/min, LASER at 3.0/min, CHAMPS at 5.0/m, a 10.0/m² material
    /// and a 15.0 fixed service.
    pub async fn open() -> Self {
        Self::open_on(LedgerService::in_memory()).await
    }

    pub async fn open_on(ledger: LedgerService) -> Self {
        for (machine, price) in [
            (MachineType::Cnc, "2.0"),
            (MachineType::Laser, "3.0"),
            (MachineType::Champs, "5.0"),
        ] {
            ledger
                .set_machine_price(machine, dec(price), None)
                .await
                .expect("Failed to price machine");
        }
        let material = ledger
            .create_material("Plexiglas".into(), dec("10"), "m2".into(), None)
            .await
            .expect("Failed to create material");
        let service = ledger
            .create_service("Pose".into(), dec("15"), None)
            .await
            .expect("Failed to create service");
        let client = ledger
            .create_client(NewClient {
                name: "Atelier Martin".into(),
                ..Default::default()
            })
            .await
            .expect("Failed to create client");

        Self {
            ledger,
            client_id: client.id,
            material,
            service,
        }
    }
}

/// Test application wrapper for HTTP tests.
pub struct TestApp {
    pub address: String,
    pub port: u16,
    pub ledger: LedgerService,
    client: reqwest::Client,
}

impl TestApp {
    /// Spawn a new in-memory application on a random port.
    pub async fn spawn() -> Self {
        init_metrics();

        let app = Application::build(DevisConfig::ephemeral())
            .await
            .expect("Failed to build test application");
        let port = app.port();
        let ledger = app.ledger().clone();
        let address = format!("http://127.0.0.1:{}", port);

        tokio::spawn(async move {
            app.run_until_stopped().await.ok();
        });

        // Wait for the server to be ready by polling the health endpoint
        let client = reqwest::Client::new();
        let health_url = format!("{}/health", address);
        for _ in 0..50 {
            if client.get(&health_url).send().await.is_ok() {
                break;
            }
            tokio::time::sleep(tokio::time::Duration::from_millis(50)).await;
        }

        TestApp {
            address,
            port,
            ledger,
            client,
        }
    }

    pub fn url(&self, path: &str) -> String {
        format!("{}{}", self.address, path)
    }

    /// Request builder carrying the actor headers.
    pub fn as_actor(
        &self,
        method: reqwest::Method,
        path: &str,
        ctx: &RequestContext,
    ) -> reqwest::RequestBuilder {
        self.client
            .request(method, self.url(path))
            .header("X-User-ID", ctx.user_id.to_string())
            .header("X-User-Role", ctx.role.as_str())
    }

    pub fn anonymous(&self, method: reqwest::Method, path: &str) -> reqwest::RequestBuilder {
        self.client.request(method, self.url(path))
    }
}

/// A migrated ledger in a private PostgreSQL schema.
pub struct PgLedger {
    pub ledger: LedgerService,
    pub db: Database,
    base_url: String,
    schema_name: String,
}

impl PgLedger {
    /// `None` when `TEST_DATABASE_URL` is not set.
    pub async fn connect() -> Option<Self> {
        let base_url = std::env::var("TEST_DATABASE_URL").ok()?;
        let counter = SCHEMA_COUNTER.fetch_add(1, Ordering::SeqCst);
        let schema_name = format!("test_devis_{}_{}", std::process::id(), counter);

        let pool = sqlx::postgres::PgPoolOptions::new()
            .max_connections(2)
            .connect(&base_url)
            .await
            .expect("Failed to connect to test database");
        sqlx::query(&format!("DROP SCHEMA IF EXISTS {} CASCADE", schema_name))
            .execute(&pool)
            .await
            .ok();
        sqlx::query(&format!("CREATE SCHEMA {}", schema_name))
            .execute(&pool)
            .await
            .expect("Failed to create test schema");
        pool.close().await;

        let separator = if base_url.contains('?') { "&" } else { "?" };
        let url = format!(
            "{}{}options=-c search_path%3D{}",
            base_url, separator, schema_name
        );
        let db = Database::new(&url, 10, 1)
            .await
            .expect("Failed to create test database");
        db.run_migrations().await.expect("Failed to run migrations");

        Some(Self {
            ledger: LedgerService::new(Arc::new(db.clone())),
            db,
            base_url,
            schema_name,
        })
    }

    pub async fn cleanup(self) {
        self.db.pool().close().await;
        let pool = sqlx::postgres::PgPoolOptions::new()
            .max_connections(1)
            .connect(&self.base_url)
            .await
            .ok();

        if let Some(pool) = pool {
            let _ = sqlx::query(&format!(
                "DROP SCHEMA IF EXISTS {} CASCADE",
                self.schema_name
            ))
            .execute(&pool)
            .await;
            pool.close().await;
        }
    }
}

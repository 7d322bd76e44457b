//! PostgreSQL ledger store for devis-service.
//!
//! One transaction per operation. Aggregate roots are locked with
//! `SELECT ... FOR UPDATE` before their invariants are checked, so concurrent
//! writers serialize on the row instead of racing on stale reads.

use super::metrics::DB_QUERY_DURATION;
use super::store::{LedgerStore, QuoteMutation};
use crate::models::closure::{ensure_period_open, period_start, period_totals};
use crate::models::invoice::{check_quote_selection, invoice_reference};
use crate::models::payment::{ensure_quote_payable, paid_toward_invoice, paid_toward_quote};
use crate::models::quote::quote_reference;
use crate::models::{
    CatalogSnapshot, Client, ClosureScope, DashboardStats, DevisLine, DevisServiceItem,
    DevisStatusCounts, Expense, ExpenseUpdate, FinancialClosure, FixedService, Invoice,
    InvoiceItem, InvoiceSource, LedgerError, LineInput, MachinePricing, Material, NewExpense,
    NewPayment, Payment, PaymentTarget, PeriodTotals, Quote, RequestContext, UserRole,
};
use async_trait::async_trait;
use chrono::{DateTime, Datelike, SubsecRound, Utc};
use rust_decimal::Decimal;
use sqlx::postgres::{PgConnection, PgPool, PgPoolOptions};
use sqlx::types::Json;
use sqlx::FromRow;
use std::collections::HashMap;
use std::time::Duration;
use tracing::{info, instrument};
use uuid::Uuid;

const QUOTE_PREFIX: &str = "DEV";
const INVOICE_PREFIX: &str = "FAC";
const UNIQUE_VIOLATION: &str = "23505";

fn storage(context: &'static str) -> impl FnOnce(sqlx::Error) -> LedgerError {
    move |e| LedgerError::Storage(anyhow::anyhow!("{}: {}", context, e))
}

/// Postgres keeps microseconds; truncate up front so returned values match stored ones.
fn db_now(now: DateTime<Utc>) -> DateTime<Utc> {
    now.trunc_subsecs(6)
}

fn decode<T: std::str::FromStr<Err = LedgerError>>(value: &str) -> Result<T, LedgerError> {
    value
        .parse()
        .map_err(|e: LedgerError| LedgerError::Storage(anyhow::anyhow!("Corrupt row: {}", e)))
}

// ============================================================================
// Row types
// ============================================================================

#[derive(FromRow)]
struct MachinePricingRow {
    machine_type: String,
    price_per_unit: Decimal,
    description: Option<String>,
    updated_utc: DateTime<Utc>,
}

impl TryFrom<MachinePricingRow> for MachinePricing {
    type Error = LedgerError;

    fn try_from(row: MachinePricingRow) -> Result<Self, Self::Error> {
        Ok(Self {
            machine_type: decode(&row.machine_type)?,
            price_per_unit: row.price_per_unit,
            description: row.description,
            updated_utc: row.updated_utc,
        })
    }
}

#[derive(FromRow)]
struct QuoteRow {
    id: Uuid,
    reference: String,
    status: String,
    client_id: Uuid,
    created_by: Uuid,
    notes: Option<String>,
    total_amount: Decimal,
    invoice_id: Option<Uuid>,
    created_utc: DateTime<Utc>,
    updated_utc: DateTime<Utc>,
    validated_utc: Option<DateTime<Utc>>,
}

#[derive(FromRow)]
struct LineRow {
    id: Uuid,
    devis_id: Uuid,
    description: Option<String>,
    input: Json<LineInput>,
    material_id: Option<Uuid>,
    unit_price: Decimal,
    material_cost: Decimal,
    line_total: Decimal,
    created_utc: DateTime<Utc>,
}

#[derive(FromRow)]
struct ServiceItemRow {
    id: Uuid,
    devis_id: Uuid,
    service_id: Uuid,
    name: String,
    price: Decimal,
}

#[derive(FromRow)]
struct InvoiceRow {
    id: Uuid,
    reference: String,
    client_id: Uuid,
    created_by: Uuid,
    total_amount: Decimal,
    source_kind: String,
    created_utc: DateTime<Utc>,
}

#[derive(FromRow)]
struct InvoiceItemRow {
    id: Uuid,
    invoice_id: Uuid,
    description: String,
    quantity: Decimal,
    unit_price: Decimal,
    total: Decimal,
}

#[derive(FromRow)]
struct InvoiceQuoteRow {
    invoice_id: Uuid,
    devis_id: Uuid,
}

#[derive(FromRow)]
struct PaymentRow {
    id: Uuid,
    invoice_id: Option<Uuid>,
    devis_id: Option<Uuid>,
    amount: Decimal,
    payment_date: DateTime<Utc>,
    method: Option<String>,
    reference: Option<String>,
    notes: Option<String>,
    created_by: Uuid,
    created_by_role: String,
    created_utc: DateTime<Utc>,
}

impl TryFrom<PaymentRow> for Payment {
    type Error = LedgerError;

    fn try_from(row: PaymentRow) -> Result<Self, Self::Error> {
        let target = match (row.invoice_id, row.devis_id) {
            (Some(id), None) => PaymentTarget::Invoice(id),
            (None, Some(id)) => PaymentTarget::Devis(id),
            _ => {
                return Err(LedgerError::Storage(anyhow::anyhow!(
                    "Payment {} does not have exactly one target",
                    row.id
                )))
            }
        };
        Ok(Self {
            id: row.id,
            target,
            amount: row.amount,
            payment_date: row.payment_date,
            method: row.method.as_deref().map(decode).transpose()?,
            reference: row.reference,
            notes: row.notes,
            created_by: row.created_by,
            created_by_role: decode(&row.created_by_role)?,
            created_utc: row.created_utc,
        })
    }
}

#[derive(FromRow)]
struct ExpenseRow {
    id: Uuid,
    category: String,
    amount: Decimal,
    expense_date: DateTime<Utc>,
    description: String,
    notes: Option<String>,
    created_by: Uuid,
    created_by_role: String,
    created_utc: DateTime<Utc>,
    updated_utc: DateTime<Utc>,
}

impl TryFrom<ExpenseRow> for Expense {
    type Error = LedgerError;

    fn try_from(row: ExpenseRow) -> Result<Self, Self::Error> {
        Ok(Self {
            id: row.id,
            category: decode(&row.category)?,
            amount: row.amount,
            date: row.expense_date,
            description: row.description,
            notes: row.notes,
            created_by: row.created_by,
            created_by_role: decode(&row.created_by_role)?,
            created_utc: row.created_utc,
            updated_utc: row.updated_utc,
        })
    }
}

#[derive(FromRow)]
struct ClosureRow {
    id: Uuid,
    scope: String,
    period_start: DateTime<Utc>,
    closure_date: DateTime<Utc>,
    total_income: Decimal,
    total_expense: Decimal,
    balance: Decimal,
    notes: Option<String>,
    closed_by: Uuid,
    created_utc: DateTime<Utc>,
}

impl TryFrom<ClosureRow> for FinancialClosure {
    type Error = LedgerError;

    fn try_from(row: ClosureRow) -> Result<Self, Self::Error> {
        Ok(Self {
            id: row.id,
            scope: decode(&row.scope)?,
            period_start: row.period_start,
            closure_date: row.closure_date,
            total_income: row.total_income,
            total_expense: row.total_expense,
            balance: row.balance,
            notes: row.notes,
            closed_by: row.closed_by,
            created_utc: row.created_utc,
        })
    }
}

const QUOTE_COLUMNS: &str = "id, reference, status, client_id, created_by, notes, total_amount, invoice_id, created_utc, updated_utc, validated_utc";
const PAYMENT_COLUMNS: &str = "id, invoice_id, devis_id, amount, payment_date, method, reference, notes, created_by, created_by_role, created_utc";
const EXPENSE_COLUMNS: &str = "id, category, amount, expense_date, description, notes, created_by, created_by_role, created_utc, updated_utc";
const CLOSURE_COLUMNS: &str = "id, scope, period_start, closure_date, total_income, total_expense, balance, notes, closed_by, created_utc";

// ============================================================================
// Shared transaction helpers
// ============================================================================

async fn next_reference_seq(
    conn: &mut PgConnection,
    prefix: &str,
    now: DateTime<Utc>,
) -> Result<i64, LedgerError> {
    sqlx::query_scalar::<_, i64>(
        r#"
        INSERT INTO reference_counters (prefix, year, last_value)
        VALUES ($1, $2, 1)
        ON CONFLICT (prefix, year) DO UPDATE SET last_value = reference_counters.last_value + 1
        RETURNING last_value
        "#,
    )
    .bind(prefix)
    .bind(now.year())
    .fetch_one(conn)
    .await
    .map_err(storage("Failed to allocate reference"))
}

/// Attach lines and service items to quote rows, preserving row order.
async fn hydrate_quotes(
    conn: &mut PgConnection,
    rows: Vec<QuoteRow>,
) -> Result<Vec<Quote>, LedgerError> {
    if rows.is_empty() {
        return Ok(Vec::new());
    }
    let ids: Vec<Uuid> = rows.iter().map(|r| r.id).collect();

    let line_rows = sqlx::query_as::<_, LineRow>(
        r#"
        SELECT id, devis_id, description, input, material_id, unit_price, material_cost, line_total, created_utc
        FROM devis_lines
        WHERE devis_id = ANY($1)
        ORDER BY devis_id, position
        "#,
    )
    .bind(&ids)
    .fetch_all(&mut *conn)
    .await
    .map_err(storage("Failed to load quote lines"))?;

    let service_rows = sqlx::query_as::<_, ServiceItemRow>(
        r#"
        SELECT id, devis_id, service_id, name, price
        FROM devis_services
        WHERE devis_id = ANY($1)
        ORDER BY devis_id, position
        "#,
    )
    .bind(&ids)
    .fetch_all(&mut *conn)
    .await
    .map_err(storage("Failed to load quote services"))?;

    let mut lines: HashMap<Uuid, Vec<DevisLine>> = HashMap::new();
    for row in line_rows {
        let Json(input) = row.input;
        lines.entry(row.devis_id).or_default().push(DevisLine {
            id: row.id,
            machine_type: input.machine_type(),
            description: row.description,
            input,
            material_id: row.material_id,
            unit_price: row.unit_price,
            material_cost: row.material_cost,
            line_total: row.line_total,
            created_utc: row.created_utc,
        });
    }

    let mut services: HashMap<Uuid, Vec<DevisServiceItem>> = HashMap::new();
    for row in service_rows {
        services
            .entry(row.devis_id)
            .or_default()
            .push(DevisServiceItem {
                id: row.id,
                service_id: row.service_id,
                name: row.name,
                price: row.price,
            });
    }

    rows.into_iter()
        .map(|row| {
            Ok(Quote {
                id: row.id,
                reference: row.reference,
                status: decode(&row.status)?,
                client_id: row.client_id,
                created_by: row.created_by,
                notes: row.notes,
                lines: lines.remove(&row.id).unwrap_or_default(),
                services: services.remove(&row.id).unwrap_or_default(),
                total_amount: row.total_amount,
                invoice_id: row.invoice_id,
                created_utc: row.created_utc,
                updated_utc: row.updated_utc,
                validated_utc: row.validated_utc,
            })
        })
        .collect()
}

async fn load_quote(
    conn: &mut PgConnection,
    id: Uuid,
    for_update: bool,
) -> Result<Option<Quote>, LedgerError> {
    let sql = format!(
        "SELECT {} FROM devis WHERE id = $1{}",
        QUOTE_COLUMNS,
        if for_update { " FOR UPDATE" } else { "" }
    );
    let row = sqlx::query_as::<_, QuoteRow>(&sql)
        .bind(id)
        .fetch_optional(&mut *conn)
        .await
        .map_err(storage("Failed to load quote"))?;

    match row {
        Some(row) => Ok(hydrate_quotes(conn, vec![row]).await?.pop()),
        None => Ok(None),
    }
}

/// Write the full aggregate: header row, then lines and services replaced in order.
async fn save_quote(conn: &mut PgConnection, quote: &Quote) -> Result<(), LedgerError> {
    sqlx::query(
        r#"
        UPDATE devis
        SET status = $2, notes = $3, total_amount = $4, invoice_id = $5, updated_utc = $6, validated_utc = $7
        WHERE id = $1
        "#,
    )
    .bind(quote.id)
    .bind(quote.status.as_str())
    .bind(&quote.notes)
    .bind(quote.total_amount)
    .bind(quote.invoice_id)
    .bind(quote.updated_utc)
    .bind(quote.validated_utc)
    .execute(&mut *conn)
    .await
    .map_err(storage("Failed to update quote"))?;

    sqlx::query("DELETE FROM devis_lines WHERE devis_id = $1")
        .bind(quote.id)
        .execute(&mut *conn)
        .await
        .map_err(storage("Failed to replace quote lines"))?;
    sqlx::query("DELETE FROM devis_services WHERE devis_id = $1")
        .bind(quote.id)
        .execute(&mut *conn)
        .await
        .map_err(storage("Failed to replace quote services"))?;

    for (position, line) in quote.lines.iter().enumerate() {
        sqlx::query(
            r#"
            INSERT INTO devis_lines (id, devis_id, position, machine_type, description, input, material_id, service_id, unit_price, material_cost, line_total, created_utc)
            VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10, $11, $12)
            "#,
        )
        .bind(line.id)
        .bind(quote.id)
        .bind(position as i32)
        .bind(line.machine_type.as_str())
        .bind(&line.description)
        .bind(Json(&line.input))
        .bind(line.input.material_ref())
        .bind(line.input.service_ref())
        .bind(line.unit_price)
        .bind(line.material_cost)
        .bind(line.line_total)
        .bind(line.created_utc)
        .execute(&mut *conn)
        .await
        .map_err(storage("Failed to insert quote line"))?;
    }

    for (position, item) in quote.services.iter().enumerate() {
        sqlx::query(
            r#"
            INSERT INTO devis_services (id, devis_id, position, service_id, name, price)
            VALUES ($1, $2, $3, $4, $5, $6)
            "#,
        )
        .bind(item.id)
        .bind(quote.id)
        .bind(position as i32)
        .bind(item.service_id)
        .bind(&item.name)
        .bind(item.price)
        .execute(&mut *conn)
        .await
        .map_err(storage("Failed to insert quote service"))?;
    }

    Ok(())
}

async fn hydrate_invoices(
    conn: &mut PgConnection,
    rows: Vec<InvoiceRow>,
) -> Result<Vec<Invoice>, LedgerError> {
    if rows.is_empty() {
        return Ok(Vec::new());
    }
    let ids: Vec<Uuid> = rows.iter().map(|r| r.id).collect();

    let quote_links = sqlx::query_as::<_, InvoiceQuoteRow>(
        "SELECT invoice_id, devis_id FROM invoice_devis WHERE invoice_id = ANY($1) ORDER BY invoice_id, position",
    )
    .bind(&ids)
    .fetch_all(&mut *conn)
    .await
    .map_err(storage("Failed to load invoice quotes"))?;

    let item_rows = sqlx::query_as::<_, InvoiceItemRow>(
        r#"
        SELECT id, invoice_id, description, quantity, unit_price, total
        FROM invoice_items
        WHERE invoice_id = ANY($1)
        ORDER BY invoice_id, position
        "#,
    )
    .bind(&ids)
    .fetch_all(&mut *conn)
    .await
    .map_err(storage("Failed to load invoice items"))?;

    let mut quote_ids: HashMap<Uuid, Vec<Uuid>> = HashMap::new();
    for link in quote_links {
        quote_ids.entry(link.invoice_id).or_default().push(link.devis_id);
    }
    let mut items: HashMap<Uuid, Vec<InvoiceItem>> = HashMap::new();
    for row in item_rows {
        items.entry(row.invoice_id).or_default().push(InvoiceItem {
            id: row.id,
            description: row.description,
            quantity: row.quantity,
            unit_price: row.unit_price,
            total: row.total,
        });
    }

    rows.into_iter()
        .map(|row| {
            let source = match row.source_kind.as_str() {
                "QUOTES" => InvoiceSource::Quotes {
                    quote_ids: quote_ids.remove(&row.id).unwrap_or_default(),
                },
                "ITEMS" => InvoiceSource::Items {
                    items: items.remove(&row.id).unwrap_or_default(),
                },
                other => {
                    return Err(LedgerError::Storage(anyhow::anyhow!(
                        "Unknown invoice source '{}'",
                        other
                    )))
                }
            };
            Ok(Invoice {
                id: row.id,
                reference: row.reference,
                client_id: row.client_id,
                created_by: row.created_by,
                total_amount: row.total_amount,
                source,
                created_utc: row.created_utc,
            })
        })
        .collect()
}

async fn load_invoice(
    conn: &mut PgConnection,
    id: Uuid,
    for_update: bool,
) -> Result<Option<Invoice>, LedgerError> {
    let sql = format!(
        "SELECT id, reference, client_id, created_by, total_amount, source_kind, created_utc FROM invoices WHERE id = $1{}",
        if for_update { " FOR UPDATE" } else { "" }
    );
    let row = sqlx::query_as::<_, InvoiceRow>(&sql)
        .bind(id)
        .fetch_optional(&mut *conn)
        .await
        .map_err(storage("Failed to load invoice"))?;

    match row {
        Some(row) => Ok(hydrate_invoices(conn, vec![row]).await?.pop()),
        None => Ok(None),
    }
}

async fn insert_invoice(conn: &mut PgConnection, invoice: &Invoice) -> Result<(), LedgerError> {
    let source_kind = match invoice.source {
        InvoiceSource::Quotes { .. } => "QUOTES",
        InvoiceSource::Items { .. } => "ITEMS",
    };
    sqlx::query(
        r#"
        INSERT INTO invoices (id, reference, client_id, created_by, total_amount, source_kind, created_utc)
        VALUES ($1, $2, $3, $4, $5, $6, $7)
        "#,
    )
    .bind(invoice.id)
    .bind(&invoice.reference)
    .bind(invoice.client_id)
    .bind(invoice.created_by)
    .bind(invoice.total_amount)
    .bind(source_kind)
    .bind(invoice.created_utc)
    .execute(&mut *conn)
    .await
    .map_err(storage("Failed to insert invoice"))?;

    match &invoice.source {
        InvoiceSource::Quotes { quote_ids } => {
            for (position, quote_id) in quote_ids.iter().enumerate() {
                sqlx::query(
                    "INSERT INTO invoice_devis (invoice_id, devis_id, position) VALUES ($1, $2, $3)",
                )
                .bind(invoice.id)
                .bind(quote_id)
                .bind(position as i32)
                .execute(&mut *conn)
                .await
                .map_err(storage("Failed to link invoice quote"))?;
            }
        }
        InvoiceSource::Items { items } => {
            for (position, item) in items.iter().enumerate() {
                sqlx::query(
                    r#"
                    INSERT INTO invoice_items (id, invoice_id, position, description, quantity, unit_price, total)
                    VALUES ($1, $2, $3, $4, $5, $6, $7)
                    "#,
                )
                .bind(item.id)
                .bind(invoice.id)
                .bind(position as i32)
                .bind(&item.description)
                .bind(item.quantity)
                .bind(item.unit_price)
                .bind(item.total)
                .execute(&mut *conn)
                .await
                .map_err(storage("Failed to insert invoice item"))?;
            }
        }
    }
    Ok(())
}

async fn fetch_payments(
    conn: &mut PgConnection,
    filter: &str,
    ids: &[Uuid],
) -> Result<Vec<Payment>, LedgerError> {
    let sql = format!(
        "SELECT {} FROM payments WHERE {} ORDER BY payment_date, created_utc",
        PAYMENT_COLUMNS, filter
    );
    sqlx::query_as::<_, PaymentRow>(&sql)
        .bind(ids)
        .fetch_all(conn)
        .await
        .map_err(storage("Failed to load payments"))?
        .into_iter()
        .map(Payment::try_from)
        .collect()
}

async fn invoice_payments(
    conn: &mut PgConnection,
    invoice: &Invoice,
) -> Result<Vec<Payment>, LedgerError> {
    let mut ids = vec![invoice.id];
    ids.extend_from_slice(invoice.quote_ids());
    fetch_payments(
        conn,
        "invoice_id = $1[1] OR devis_id = ANY($1[2:])",
        &ids,
    )
    .await
}

async fn window_entries(
    conn: &mut PgConnection,
    start: DateTime<Utc>,
    end: DateTime<Utc>,
) -> Result<(Vec<Payment>, Vec<Expense>), LedgerError> {
    let payments = sqlx::query_as::<_, PaymentRow>(&format!(
        "SELECT {} FROM payments WHERE payment_date >= $1 AND payment_date < $2",
        PAYMENT_COLUMNS
    ))
    .bind(start)
    .bind(end)
    .fetch_all(&mut *conn)
    .await
    .map_err(storage("Failed to load period payments"))?
    .into_iter()
    .map(Payment::try_from)
    .collect::<Result<Vec<_>, _>>()?;

    let expenses = sqlx::query_as::<_, ExpenseRow>(&format!(
        "SELECT {} FROM expenses WHERE expense_date >= $1 AND expense_date < $2",
        EXPENSE_COLUMNS
    ))
    .bind(start)
    .bind(end)
    .fetch_all(&mut *conn)
    .await
    .map_err(storage("Failed to load period expenses"))?
    .into_iter()
    .map(Expense::try_from)
    .collect::<Result<Vec<_>, _>>()?;

    Ok((payments, expenses))
}

async fn latest_closure(
    conn: &mut PgConnection,
    scope: ClosureScope,
) -> Result<Option<FinancialClosure>, LedgerError> {
    sqlx::query_as::<_, ClosureRow>(&format!(
        "SELECT {} FROM financial_closures WHERE scope = $1 ORDER BY closure_date DESC LIMIT 1",
        CLOSURE_COLUMNS
    ))
    .bind(scope.as_str())
    .fetch_optional(conn)
    .await
    .map_err(storage("Failed to load latest closure"))?
    .map(FinancialClosure::try_from)
    .transpose()
}

/// Take the shared closure lock of every register counting entries recorded by
/// `recorded_by`, then load those registers' latest closures. Closers hold the
/// exclusive lock, so no closure commits until this transaction ends.
async fn lock_open_periods(
    conn: &mut PgConnection,
    recorded_by: UserRole,
) -> Result<Vec<FinancialClosure>, LedgerError> {
    let mut latest = Vec::new();
    for scope in ClosureScope::ALL.iter().filter(|s| s.includes(recorded_by)) {
        sqlx::query("SELECT pg_advisory_xact_lock_shared(hashtext('financial_closures:' || $1))")
            .bind(scope.as_str())
            .execute(&mut *conn)
            .await
            .map_err(storage("Failed to lock closure scope"))?;
        latest.extend(latest_closure(&mut *conn, *scope).await?);
    }
    Ok(latest)
}

/// True when a non-draft quote prices a line or service item from this catalog entry.
async fn referenced_by_finalized_quote(
    conn: &mut PgConnection,
    catalog_id: Uuid,
) -> Result<bool, LedgerError> {
    sqlx::query_scalar::<_, bool>(
        r#"
        SELECT EXISTS (
            SELECT 1 FROM devis_lines l JOIN devis d ON d.id = l.devis_id
            WHERE (l.material_id = $1 OR l.service_id = $1) AND d.status <> 'DRAFT'
        ) OR EXISTS (
            SELECT 1 FROM devis_services s JOIN devis d ON d.id = s.devis_id
            WHERE s.service_id = $1 AND d.status <> 'DRAFT'
        )
        "#,
    )
    .bind(catalog_id)
    .fetch_one(conn)
    .await
    .map_err(storage("Failed to check catalog references"))
}

// ============================================================================
// Database
// ============================================================================

/// Database connection pool wrapper.
#[derive(Clone)]
pub struct Database {
    pool: PgPool,
}

impl Database {
    /// Create a new database connection pool.
    #[instrument(skip(database_url), fields(service = "devis-service"))]
    pub async fn new(
        database_url: &str,
        max_connections: u32,
        min_connections: u32,
    ) -> Result<Self, LedgerError> {
        info!(
            max_connections = max_connections,
            min_connections = min_connections,
            "Connecting to PostgreSQL"
        );

        let pool = PgPoolOptions::new()
            .max_connections(max_connections)
            .min_connections(min_connections)
            .acquire_timeout(Duration::from_secs(30))
            .idle_timeout(Duration::from_secs(600))
            .connect(database_url)
            .await
            .map_err(storage("Failed to connect"))?;

        info!("PostgreSQL connection pool established");

        Ok(Self { pool })
    }

    /// Get a reference to the connection pool.
    pub fn pool(&self) -> &PgPool {
        &self.pool
    }

    /// Run database migrations.
    #[instrument(skip(self))]
    pub async fn run_migrations(&self) -> Result<(), LedgerError> {
        info!("Running database migrations");
        sqlx::migrate!("./migrations")
            .run(&self.pool)
            .await
            .map_err(|e| LedgerError::Storage(anyhow::anyhow!("Migration failed: {}", e)))?;
        info!("Database migrations completed");
        Ok(())
    }

    async fn update_catalog_price(
        &self,
        table: &'static str,
        price_column: &'static str,
        id: Uuid,
        price: Decimal,
        now: DateTime<Utc>,
    ) -> Result<(), LedgerError> {
        let mut tx = self
            .pool
            .begin()
            .await
            .map_err(storage("Failed to begin transaction"))?;

        let exists = sqlx::query_scalar::<_, Uuid>(&format!(
            "SELECT id FROM {} WHERE id = $1 FOR UPDATE",
            table
        ))
        .bind(id)
        .fetch_optional(&mut *tx)
        .await
        .map_err(storage("Failed to lock catalog entry"))?;
        if exists.is_none() {
            return Err(LedgerError::not_found(format!("Catalog entry {} not found", id)));
        }

        if referenced_by_finalized_quote(&mut tx, id).await? {
            return Err(LedgerError::conflict(format!(
                "Catalog entry {} is referenced by a finalized quote",
                id
            )));
        }

        sqlx::query(&format!(
            "UPDATE {} SET {} = $2, updated_utc = $3 WHERE id = $1",
            table, price_column
        ))
        .bind(id)
        .bind(price)
        .bind(now)
        .execute(&mut *tx)
        .await
        .map_err(storage("Failed to update catalog price"))?;

        tx.commit()
            .await
            .map_err(storage("Failed to commit transaction"))
    }
}

#[async_trait]
impl LedgerStore for Database {
    /// Check database health.
    #[instrument(skip(self))]
    async fn health_check(&self) -> Result<(), LedgerError> {
        let timer = DB_QUERY_DURATION
            .with_label_values(&["health_check"])
            .start_timer();

        sqlx::query("SELECT 1")
            .execute(&self.pool)
            .await
            .map_err(storage("Health check failed"))?;

        timer.observe_duration();
        Ok(())
    }

    // =========================================================================
    // Clients & catalog
    // =========================================================================

    #[instrument(skip(self, client), fields(client_id = %client.id))]
    async fn insert_client(&self, client: &Client) -> Result<(), LedgerError> {
        let timer = DB_QUERY_DURATION
            .with_label_values(&["insert_client"])
            .start_timer();

        sqlx::query(
            r#"
            INSERT INTO clients (id, name, phone, email, address, notes, created_utc)
            VALUES ($1, $2, $3, $4, $5, $6, $7)
            "#,
        )
        .bind(client.id)
        .bind(&client.name)
        .bind(&client.phone)
        .bind(&client.email)
        .bind(&client.address)
        .bind(&client.notes)
        .bind(db_now(client.created_utc))
        .execute(&self.pool)
        .await
        .map_err(storage("Failed to insert client"))?;

        timer.observe_duration();
        Ok(())
    }

    #[instrument(skip(self))]
    async fn get_client(&self, id: Uuid) -> Result<Option<Client>, LedgerError> {
        let timer = DB_QUERY_DURATION
            .with_label_values(&["get_client"])
            .start_timer();

        let client = sqlx::query_as::<_, Client>(
            "SELECT id, name, phone, email, address, notes, created_utc FROM clients WHERE id = $1",
        )
        .bind(id)
        .fetch_optional(&self.pool)
        .await
        .map_err(storage("Failed to get client"))?;

        timer.observe_duration();
        Ok(client)
    }

    #[instrument(skip(self, pricing), fields(machine_type = %pricing.machine_type))]
    async fn upsert_machine_pricing(&self, pricing: &MachinePricing) -> Result<(), LedgerError> {
        let timer = DB_QUERY_DURATION
            .with_label_values(&["upsert_machine_pricing"])
            .start_timer();

        sqlx::query(
            r#"
            INSERT INTO machine_pricing (machine_type, price_per_unit, description, updated_utc)
            VALUES ($1, $2, $3, $4)
            ON CONFLICT (machine_type) DO UPDATE
            SET price_per_unit = EXCLUDED.price_per_unit,
                description = EXCLUDED.description,
                updated_utc = EXCLUDED.updated_utc
            "#,
        )
        .bind(pricing.machine_type.as_str())
        .bind(pricing.price_per_unit)
        .bind(&pricing.description)
        .bind(db_now(pricing.updated_utc))
        .execute(&self.pool)
        .await
        .map_err(storage("Failed to upsert machine pricing"))?;

        timer.observe_duration();
        Ok(())
    }

    #[instrument(skip(self))]
    async fn list_machine_pricing(&self) -> Result<Vec<MachinePricing>, LedgerError> {
        let timer = DB_QUERY_DURATION
            .with_label_values(&["list_machine_pricing"])
            .start_timer();

        let rows = sqlx::query_as::<_, MachinePricingRow>(
            "SELECT machine_type, price_per_unit, description, updated_utc FROM machine_pricing ORDER BY machine_type",
        )
        .fetch_all(&self.pool)
        .await
        .map_err(storage("Failed to list machine pricing"))?;

        timer.observe_duration();
        rows.into_iter().map(MachinePricing::try_from).collect()
    }

    #[instrument(skip(self, material), fields(material_id = %material.id))]
    async fn insert_material(&self, material: &Material) -> Result<(), LedgerError> {
        let timer = DB_QUERY_DURATION
            .with_label_values(&["insert_material"])
            .start_timer();

        sqlx::query(
            r#"
            INSERT INTO materials (id, name, price_per_unit, unit, description, is_active, created_utc, updated_utc)
            VALUES ($1, $2, $3, $4, $5, $6, $7, $8)
            "#,
        )
        .bind(material.id)
        .bind(&material.name)
        .bind(material.price_per_unit)
        .bind(&material.unit)
        .bind(&material.description)
        .bind(material.is_active)
        .bind(db_now(material.created_utc))
        .bind(db_now(material.updated_utc))
        .execute(&self.pool)
        .await
        .map_err(storage("Failed to insert material"))?;

        timer.observe_duration();
        Ok(())
    }

    #[instrument(skip(self))]
    async fn update_material_price(
        &self,
        id: Uuid,
        price: Decimal,
        now: DateTime<Utc>,
    ) -> Result<Material, LedgerError> {
        let timer = DB_QUERY_DURATION
            .with_label_values(&["update_material_price"])
            .start_timer();

        self.update_catalog_price("materials", "price_per_unit", id, price, db_now(now))
            .await?;
        let material = sqlx::query_as::<_, Material>(
            "SELECT id, name, price_per_unit, unit, description, is_active, created_utc, updated_utc FROM materials WHERE id = $1",
        )
        .bind(id)
        .fetch_one(&self.pool)
        .await
        .map_err(storage("Failed to reload material"))?;

        timer.observe_duration();
        Ok(material)
    }

    #[instrument(skip(self, service), fields(service_id = %service.id))]
    async fn insert_service(&self, service: &FixedService) -> Result<(), LedgerError> {
        let timer = DB_QUERY_DURATION
            .with_label_values(&["insert_service"])
            .start_timer();

        sqlx::query(
            r#"
            INSERT INTO fixed_services (id, name, price, description, is_active, created_utc, updated_utc)
            VALUES ($1, $2, $3, $4, $5, $6, $7)
            "#,
        )
        .bind(service.id)
        .bind(&service.name)
        .bind(service.price)
        .bind(&service.description)
        .bind(service.is_active)
        .bind(db_now(service.created_utc))
        .bind(db_now(service.updated_utc))
        .execute(&self.pool)
        .await
        .map_err(storage("Failed to insert service"))?;

        timer.observe_duration();
        Ok(())
    }

    #[instrument(skip(self))]
    async fn update_service_price(
        &self,
        id: Uuid,
        price: Decimal,
        now: DateTime<Utc>,
    ) -> Result<FixedService, LedgerError> {
        let timer = DB_QUERY_DURATION
            .with_label_values(&["update_service_price"])
            .start_timer();

        self.update_catalog_price("fixed_services", "price", id, price, db_now(now))
            .await?;
        let service = sqlx::query_as::<_, FixedService>(
            "SELECT id, name, price, description, is_active, created_utc, updated_utc FROM fixed_services WHERE id = $1",
        )
        .bind(id)
        .fetch_one(&self.pool)
        .await
        .map_err(storage("Failed to reload service"))?;

        timer.observe_duration();
        Ok(service)
    }

    #[instrument(skip(self))]
    async fn catalog_snapshot(&self) -> Result<CatalogSnapshot, LedgerError> {
        let timer = DB_QUERY_DURATION
            .with_label_values(&["catalog_snapshot"])
            .start_timer();

        let machine_prices = self
            .list_machine_pricing()
            .await?
            .into_iter()
            .map(|p| (p.machine_type, p.price_per_unit))
            .collect();

        let materials = sqlx::query_as::<_, Material>(
            "SELECT id, name, price_per_unit, unit, description, is_active, created_utc, updated_utc FROM materials WHERE is_active",
        )
        .fetch_all(&self.pool)
        .await
        .map_err(storage("Failed to load materials"))?
        .into_iter()
        .map(|m| (m.id, m))
        .collect();

        let services = sqlx::query_as::<_, FixedService>(
            "SELECT id, name, price, description, is_active, created_utc, updated_utc FROM fixed_services WHERE is_active",
        )
        .fetch_all(&self.pool)
        .await
        .map_err(storage("Failed to load services"))?
        .into_iter()
        .map(|s| (s.id, s))
        .collect();

        timer.observe_duration();
        Ok(CatalogSnapshot {
            machine_prices,
            materials,
            services,
        })
    }

    // =========================================================================
    // Quotes
    // =========================================================================

    #[instrument(skip(self, notes))]
    async fn create_quote(
        &self,
        client_id: Uuid,
        created_by: Uuid,
        notes: Option<String>,
        now: DateTime<Utc>,
    ) -> Result<Quote, LedgerError> {
        let timer = DB_QUERY_DURATION
            .with_label_values(&["create_quote"])
            .start_timer();
        let now = db_now(now);

        let mut tx = self
            .pool
            .begin()
            .await
            .map_err(storage("Failed to begin transaction"))?;

        let client_exists =
            sqlx::query_scalar::<_, bool>("SELECT EXISTS (SELECT 1 FROM clients WHERE id = $1)")
                .bind(client_id)
                .fetch_one(&mut *tx)
                .await
                .map_err(storage("Failed to check client"))?;
        if !client_exists {
            return Err(LedgerError::not_found(format!(
                "Client {} not found",
                client_id
            )));
        }

        let seq = next_reference_seq(&mut tx, QUOTE_PREFIX, now).await?;
        let quote = Quote::new(quote_reference(now, seq), client_id, created_by, notes, now);

        sqlx::query(
            r#"
            INSERT INTO devis (id, reference, status, client_id, created_by, notes, total_amount, created_utc, updated_utc)
            VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9)
            "#,
        )
        .bind(quote.id)
        .bind(&quote.reference)
        .bind(quote.status.as_str())
        .bind(quote.client_id)
        .bind(quote.created_by)
        .bind(&quote.notes)
        .bind(quote.total_amount)
        .bind(quote.created_utc)
        .bind(quote.updated_utc)
        .execute(&mut *tx)
        .await
        .map_err(storage("Failed to insert quote"))?;

        tx.commit()
            .await
            .map_err(storage("Failed to commit transaction"))?;

        timer.observe_duration();
        info!(quote_id = %quote.id, reference = %quote.reference, "Quote row created");
        Ok(quote)
    }

    #[instrument(skip(self))]
    async fn get_quote(&self, id: Uuid) -> Result<Option<Quote>, LedgerError> {
        let timer = DB_QUERY_DURATION
            .with_label_values(&["get_quote"])
            .start_timer();

        let mut conn = self
            .pool
            .acquire()
            .await
            .map_err(storage("Failed to acquire connection"))?;
        let quote = load_quote(&mut conn, id, false).await?;

        timer.observe_duration();
        Ok(quote)
    }

    #[instrument(skip(self))]
    async fn quotes_for_client(&self, client_id: Uuid) -> Result<Vec<Quote>, LedgerError> {
        let timer = DB_QUERY_DURATION
            .with_label_values(&["quotes_for_client"])
            .start_timer();

        let mut conn = self
            .pool
            .acquire()
            .await
            .map_err(storage("Failed to acquire connection"))?;
        let rows = sqlx::query_as::<_, QuoteRow>(&format!(
            "SELECT {} FROM devis WHERE client_id = $1 ORDER BY created_utc, reference",
            QUOTE_COLUMNS
        ))
        .bind(client_id)
        .fetch_all(&mut *conn)
        .await
        .map_err(storage("Failed to list quotes"))?;
        let quotes = hydrate_quotes(&mut conn, rows).await?;

        timer.observe_duration();
        Ok(quotes)
    }

    #[instrument(skip(self, mutation))]
    async fn update_quote(&self, id: Uuid, mutation: QuoteMutation) -> Result<Quote, LedgerError> {
        let timer = DB_QUERY_DURATION
            .with_label_values(&["update_quote"])
            .start_timer();

        let mut tx = self
            .pool
            .begin()
            .await
            .map_err(storage("Failed to begin transaction"))?;

        let mut quote = load_quote(&mut tx, id, true)
            .await?
            .ok_or_else(|| LedgerError::not_found(format!("Quote {} not found", id)))?;
        mutation(&mut quote)?;
        quote.updated_utc = db_now(quote.updated_utc);
        quote.validated_utc = quote.validated_utc.map(db_now);
        for line in &mut quote.lines {
            line.created_utc = db_now(line.created_utc);
        }
        save_quote(&mut tx, &quote).await?;

        tx.commit()
            .await
            .map_err(storage("Failed to commit transaction"))?;

        timer.observe_duration();
        Ok(quote)
    }

    #[instrument(skip(self))]
    async fn delete_quote(&self, id: Uuid) -> Result<Quote, LedgerError> {
        let timer = DB_QUERY_DURATION
            .with_label_values(&["delete_quote"])
            .start_timer();

        let mut tx = self
            .pool
            .begin()
            .await
            .map_err(storage("Failed to begin transaction"))?;

        let quote = load_quote(&mut tx, id, true)
            .await?
            .ok_or_else(|| LedgerError::not_found(format!("Quote {} not found", id)))?;
        quote.ensure_deletable()?;

        let has_payments =
            sqlx::query_scalar::<_, bool>("SELECT EXISTS (SELECT 1 FROM payments WHERE devis_id = $1)")
                .bind(id)
                .fetch_one(&mut *tx)
                .await
                .map_err(storage("Failed to check quote payments"))?;
        if has_payments {
            return Err(LedgerError::conflict(format!(
                "Quote {} has payments and cannot be deleted",
                quote.reference
            )));
        }

        sqlx::query("DELETE FROM devis WHERE id = $1")
            .bind(id)
            .execute(&mut *tx)
            .await
            .map_err(storage("Failed to delete quote"))?;

        tx.commit()
            .await
            .map_err(storage("Failed to commit transaction"))?;

        timer.observe_duration();
        Ok(quote)
    }

    // =========================================================================
    // Invoices
    // =========================================================================

    #[instrument(skip(self))]
    async fn create_invoice_from_quotes(
        &self,
        quote_ids: &[Uuid],
        created_by: Uuid,
        now: DateTime<Utc>,
    ) -> Result<Invoice, LedgerError> {
        let timer = DB_QUERY_DURATION
            .with_label_values(&["create_invoice_from_quotes"])
            .start_timer();
        let now = db_now(now);
        check_quote_selection(quote_ids)?;

        let mut tx = self
            .pool
            .begin()
            .await
            .map_err(storage("Failed to begin transaction"))?;

        // Lock in id order so concurrent consolidations cannot deadlock.
        let mut lock_order = quote_ids.to_vec();
        lock_order.sort();
        let locked = sqlx::query_scalar::<_, Uuid>(
            "SELECT id FROM devis WHERE id = ANY($1) ORDER BY id FOR UPDATE",
        )
        .bind(&lock_order)
        .fetch_all(&mut *tx)
        .await
        .map_err(storage("Failed to lock quotes"))?;
        if let Some(missing) = quote_ids.iter().find(|id| !locked.contains(id)) {
            return Err(LedgerError::not_found(format!(
                "Quote {} not found",
                missing
            )));
        }

        let mut quotes = Vec::with_capacity(quote_ids.len());
        for id in quote_ids {
            let quote = load_quote(&mut tx, *id, false)
                .await?
                .ok_or_else(|| LedgerError::not_found(format!("Quote {} not found", id)))?;
            quotes.push(quote);
        }

        let seq = next_reference_seq(&mut tx, INVOICE_PREFIX, now).await?;
        let invoice =
            Invoice::consolidate(invoice_reference(now, seq), created_by, &mut quotes, now)?;

        insert_invoice(&mut tx, &invoice).await?;
        for quote in &quotes {
            save_quote(&mut tx, quote).await?;
        }

        tx.commit()
            .await
            .map_err(storage("Failed to commit transaction"))?;

        timer.observe_duration();
        Ok(invoice)
    }

    #[instrument(skip(self, items))]
    async fn create_direct_invoice(
        &self,
        client_id: Uuid,
        created_by: Uuid,
        items: Vec<InvoiceItem>,
        now: DateTime<Utc>,
    ) -> Result<Invoice, LedgerError> {
        let timer = DB_QUERY_DURATION
            .with_label_values(&["create_direct_invoice"])
            .start_timer();
        let now = db_now(now);

        let mut tx = self
            .pool
            .begin()
            .await
            .map_err(storage("Failed to begin transaction"))?;

        let client_exists =
            sqlx::query_scalar::<_, bool>("SELECT EXISTS (SELECT 1 FROM clients WHERE id = $1)")
                .bind(client_id)
                .fetch_one(&mut *tx)
                .await
                .map_err(storage("Failed to check client"))?;
        if !client_exists {
            return Err(LedgerError::not_found(format!(
                "Client {} not found",
                client_id
            )));
        }

        let seq = next_reference_seq(&mut tx, INVOICE_PREFIX, now).await?;
        let invoice = Invoice::direct(invoice_reference(now, seq), client_id, created_by, items, now)?;
        insert_invoice(&mut tx, &invoice).await?;

        tx.commit()
            .await
            .map_err(storage("Failed to commit transaction"))?;

        timer.observe_duration();
        Ok(invoice)
    }

    #[instrument(skip(self))]
    async fn get_invoice(&self, id: Uuid) -> Result<Option<Invoice>, LedgerError> {
        let timer = DB_QUERY_DURATION
            .with_label_values(&["get_invoice"])
            .start_timer();

        let mut conn = self
            .pool
            .acquire()
            .await
            .map_err(storage("Failed to acquire connection"))?;
        let invoice = load_invoice(&mut conn, id, false).await?;

        timer.observe_duration();
        Ok(invoice)
    }

    #[instrument(skip(self))]
    async fn invoices_for_client(&self, client_id: Uuid) -> Result<Vec<Invoice>, LedgerError> {
        let timer = DB_QUERY_DURATION
            .with_label_values(&["invoices_for_client"])
            .start_timer();

        let mut conn = self
            .pool
            .acquire()
            .await
            .map_err(storage("Failed to acquire connection"))?;
        let rows = sqlx::query_as::<_, InvoiceRow>(
            r#"
            SELECT id, reference, client_id, created_by, total_amount, source_kind, created_utc
            FROM invoices
            WHERE client_id = $1
            ORDER BY created_utc
            "#,
        )
        .bind(client_id)
        .fetch_all(&mut *conn)
        .await
        .map_err(storage("Failed to list invoices"))?;
        let invoices = hydrate_invoices(&mut conn, rows).await?;

        timer.observe_duration();
        Ok(invoices)
    }

    // =========================================================================
    // Payments
    // =========================================================================

    #[instrument(skip(self, new), fields(target = %new.target, amount = %new.amount))]
    async fn insert_payment(
        &self,
        new: NewPayment,
        ctx: RequestContext,
    ) -> Result<Payment, LedgerError> {
        let timer = DB_QUERY_DURATION
            .with_label_values(&["insert_payment"])
            .start_timer();

        let mut tx = self
            .pool
            .begin()
            .await
            .map_err(storage("Failed to begin transaction"))?;

        // The target row lock serializes concurrent payments on the same target,
        // so the balance read below is the one the insert commits against.
        let (total, already_paid) = match new.target {
            PaymentTarget::Invoice(id) => {
                let invoice = load_invoice(&mut tx, id, true)
                    .await?
                    .ok_or_else(|| LedgerError::not_found(format!("Invoice {} not found", id)))?;
                let payments = invoice_payments(&mut tx, &invoice).await?;
                (invoice.total_amount, paid_toward_invoice(&invoice, &payments))
            }
            PaymentTarget::Devis(id) => {
                let quote = load_quote(&mut tx, id, true)
                    .await?
                    .ok_or_else(|| LedgerError::not_found(format!("Quote {} not found", id)))?;
                ensure_quote_payable(&quote)?;
                let payments = fetch_payments(&mut tx, "devis_id = ANY($1)", &[id]).await?;
                (quote.total_amount, paid_toward_quote(id, &payments))
            }
        };

        let closed = lock_open_periods(&mut tx, ctx.role).await?;
        let now = db_now(Utc::now());
        let mut payment = Payment::record(new, &ctx, total, already_paid, now)?;
        payment.payment_date = db_now(payment.payment_date);
        ensure_period_open(payment.payment_date, payment.created_by_role, &closed)?;
        let (invoice_id, devis_id) = match payment.target {
            PaymentTarget::Invoice(id) => (Some(id), None),
            PaymentTarget::Devis(id) => (None, Some(id)),
        };

        sqlx::query(
            r#"
            INSERT INTO payments (id, invoice_id, devis_id, amount, payment_date, method, reference, notes, created_by, created_by_role, created_utc)
            VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10, $11)
            "#,
        )
        .bind(payment.id)
        .bind(invoice_id)
        .bind(devis_id)
        .bind(payment.amount)
        .bind(payment.payment_date)
        .bind(payment.method.map(|m| m.as_str()))
        .bind(&payment.reference)
        .bind(&payment.notes)
        .bind(payment.created_by)
        .bind(payment.created_by_role.as_str())
        .bind(payment.created_utc)
        .execute(&mut *tx)
        .await
        .map_err(storage("Failed to insert payment"))?;

        tx.commit()
            .await
            .map_err(storage("Failed to commit transaction"))?;

        timer.observe_duration();
        Ok(payment)
    }

    #[instrument(skip(self))]
    async fn delete_payment(&self, id: Uuid) -> Result<Payment, LedgerError> {
        let timer = DB_QUERY_DURATION
            .with_label_values(&["delete_payment"])
            .start_timer();

        let mut tx = self
            .pool
            .begin()
            .await
            .map_err(storage("Failed to begin transaction"))?;

        let payment = sqlx::query_as::<_, PaymentRow>(&format!(
            "SELECT {} FROM payments WHERE id = $1 FOR UPDATE",
            PAYMENT_COLUMNS
        ))
        .bind(id)
        .fetch_optional(&mut *tx)
        .await
        .map_err(storage("Failed to load payment"))?
        .map(Payment::try_from)
        .transpose()?
        .ok_or_else(|| LedgerError::not_found(format!("Payment {} not found", id)))?;
        payment.ensure_deletable()?;
        let closed = lock_open_periods(&mut tx, payment.created_by_role).await?;
        ensure_period_open(payment.payment_date, payment.created_by_role, &closed)?;

        sqlx::query("DELETE FROM payments WHERE id = $1")
            .bind(id)
            .execute(&mut *tx)
            .await
            .map_err(storage("Failed to delete payment"))?;

        tx.commit()
            .await
            .map_err(storage("Failed to commit transaction"))?;

        timer.observe_duration();
        Ok(payment)
    }

    #[instrument(skip(self, invoice), fields(invoice_id = %invoice.id))]
    async fn payments_for_invoice(&self, invoice: &Invoice) -> Result<Vec<Payment>, LedgerError> {
        let timer = DB_QUERY_DURATION
            .with_label_values(&["payments_for_invoice"])
            .start_timer();

        let mut conn = self
            .pool
            .acquire()
            .await
            .map_err(storage("Failed to acquire connection"))?;
        let payments = invoice_payments(&mut conn, invoice).await?;

        timer.observe_duration();
        Ok(payments)
    }

    #[instrument(skip(self))]
    async fn payments_for_client(&self, client_id: Uuid) -> Result<Vec<Payment>, LedgerError> {
        let timer = DB_QUERY_DURATION
            .with_label_values(&["payments_for_client"])
            .start_timer();

        let mut conn = self
            .pool
            .acquire()
            .await
            .map_err(storage("Failed to acquire connection"))?;
        let payments = fetch_payments(
            &mut conn,
            "devis_id IN (SELECT id FROM devis WHERE client_id = $1[1]) \
             OR invoice_id IN (SELECT id FROM invoices WHERE client_id = $1[1])",
            &[client_id],
        )
        .await?;

        timer.observe_duration();
        Ok(payments)
    }

    // =========================================================================
    // Expenses
    // =========================================================================

    #[instrument(skip(self, new), fields(amount = %new.amount))]
    async fn insert_expense(
        &self,
        new: NewExpense,
        ctx: RequestContext,
    ) -> Result<Expense, LedgerError> {
        let timer = DB_QUERY_DURATION
            .with_label_values(&["insert_expense"])
            .start_timer();

        let mut tx = self
            .pool
            .begin()
            .await
            .map_err(storage("Failed to begin transaction"))?;

        let closed = lock_open_periods(&mut tx, ctx.role).await?;
        let mut expense = Expense::create(new, &ctx, db_now(Utc::now()))?;
        expense.date = db_now(expense.date);
        ensure_period_open(expense.date, expense.created_by_role, &closed)?;

        sqlx::query(
            r#"
            INSERT INTO expenses (id, category, amount, expense_date, description, notes, created_by, created_by_role, created_utc, updated_utc)
            VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10)
            "#,
        )
        .bind(expense.id)
        .bind(expense.category.as_str())
        .bind(expense.amount)
        .bind(expense.date)
        .bind(&expense.description)
        .bind(&expense.notes)
        .bind(expense.created_by)
        .bind(expense.created_by_role.as_str())
        .bind(expense.created_utc)
        .bind(expense.updated_utc)
        .execute(&mut *tx)
        .await
        .map_err(storage("Failed to insert expense"))?;

        tx.commit()
            .await
            .map_err(storage("Failed to commit transaction"))?;

        timer.observe_duration();
        Ok(expense)
    }

    #[instrument(skip(self, update))]
    async fn update_expense(
        &self,
        id: Uuid,
        update: ExpenseUpdate,
        now: DateTime<Utc>,
    ) -> Result<Expense, LedgerError> {
        let timer = DB_QUERY_DURATION
            .with_label_values(&["update_expense"])
            .start_timer();

        let mut tx = self
            .pool
            .begin()
            .await
            .map_err(storage("Failed to begin transaction"))?;

        let mut expense = sqlx::query_as::<_, ExpenseRow>(&format!(
            "SELECT {} FROM expenses WHERE id = $1 FOR UPDATE",
            EXPENSE_COLUMNS
        ))
        .bind(id)
        .fetch_optional(&mut *tx)
        .await
        .map_err(storage("Failed to load expense"))?
        .map(Expense::try_from)
        .transpose()?
        .ok_or_else(|| LedgerError::not_found(format!("Expense {} not found", id)))?;

        let closed = lock_open_periods(&mut tx, expense.created_by_role).await?;
        ensure_period_open(expense.date, expense.created_by_role, &closed)?;
        expense.apply(update, db_now(now))?;
        expense.date = db_now(expense.date);
        ensure_period_open(expense.date, expense.created_by_role, &closed)?;

        sqlx::query(
            r#"
            UPDATE expenses
            SET category = $2, amount = $3, expense_date = $4, description = $5, notes = $6, updated_utc = $7
            WHERE id = $1
            "#,
        )
        .bind(expense.id)
        .bind(expense.category.as_str())
        .bind(expense.amount)
        .bind(expense.date)
        .bind(&expense.description)
        .bind(&expense.notes)
        .bind(expense.updated_utc)
        .execute(&mut *tx)
        .await
        .map_err(storage("Failed to update expense"))?;

        tx.commit()
            .await
            .map_err(storage("Failed to commit transaction"))?;

        timer.observe_duration();
        Ok(expense)
    }

    #[instrument(skip(self))]
    async fn delete_expense(&self, id: Uuid) -> Result<Expense, LedgerError> {
        let timer = DB_QUERY_DURATION
            .with_label_values(&["delete_expense"])
            .start_timer();

        let mut tx = self
            .pool
            .begin()
            .await
            .map_err(storage("Failed to begin transaction"))?;

        let expense = sqlx::query_as::<_, ExpenseRow>(&format!(
            "SELECT {} FROM expenses WHERE id = $1 FOR UPDATE",
            EXPENSE_COLUMNS
        ))
        .bind(id)
        .fetch_optional(&mut *tx)
        .await
        .map_err(storage("Failed to load expense"))?
        .map(Expense::try_from)
        .transpose()?
        .ok_or_else(|| LedgerError::not_found(format!("Expense {} not found", id)))?;

        let closed = lock_open_periods(&mut tx, expense.created_by_role).await?;
        ensure_period_open(expense.date, expense.created_by_role, &closed)?;

        sqlx::query("DELETE FROM expenses WHERE id = $1")
            .bind(id)
            .execute(&mut *tx)
            .await
            .map_err(storage("Failed to delete expense"))?;

        tx.commit()
            .await
            .map_err(storage("Failed to commit transaction"))?;

        timer.observe_duration();
        Ok(expense)
    }

    #[instrument(skip(self))]
    async fn list_expenses(&self) -> Result<Vec<Expense>, LedgerError> {
        let timer = DB_QUERY_DURATION
            .with_label_values(&["list_expenses"])
            .start_timer();

        let expenses = sqlx::query_as::<_, ExpenseRow>(&format!(
            "SELECT {} FROM expenses ORDER BY expense_date DESC",
            EXPENSE_COLUMNS
        ))
        .fetch_all(&self.pool)
        .await
        .map_err(storage("Failed to list expenses"))?
        .into_iter()
        .map(Expense::try_from)
        .collect::<Result<Vec<_>, _>>()?;

        timer.observe_duration();
        Ok(expenses)
    }

    // =========================================================================
    // Cash register
    // =========================================================================

    #[instrument(skip(self))]
    async fn period_totals(
        &self,
        scope: ClosureScope,
        now: DateTime<Utc>,
    ) -> Result<PeriodTotals, LedgerError> {
        let timer = DB_QUERY_DURATION
            .with_label_values(&["period_totals"])
            .start_timer();
        let now = db_now(now);

        let mut conn = self
            .pool
            .acquire()
            .await
            .map_err(storage("Failed to acquire connection"))?;
        let start = period_start(latest_closure(&mut conn, scope).await?.as_ref());
        let (payments, expenses) = window_entries(&mut conn, start, now).await?;
        let totals = period_totals(scope, start, now, &payments, &expenses)?;

        timer.observe_duration();
        Ok(totals)
    }

    #[instrument(skip(self, notes))]
    async fn close_period(
        &self,
        scope: ClosureScope,
        notes: Option<String>,
        closed_by: Uuid,
        now: DateTime<Utc>,
    ) -> Result<FinancialClosure, LedgerError> {
        let timer = DB_QUERY_DURATION
            .with_label_values(&["close_period"])
            .start_timer();
        let now = db_now(now);

        let mut tx = self
            .pool
            .begin()
            .await
            .map_err(storage("Failed to begin transaction"))?;

        // One closer per scope at a time, and no entry of the scope in flight.
        // The unique (scope, period_start) constraint catches anything that slips past.
        sqlx::query("SELECT pg_advisory_xact_lock(hashtext('financial_closures:' || $1))")
            .bind(scope.as_str())
            .execute(&mut *tx)
            .await
            .map_err(storage("Failed to lock closure scope"))?;

        let start = period_start(latest_closure(&mut tx, scope).await?.as_ref());
        let (payments, expenses) = window_entries(&mut tx, start, now).await?;
        let totals = period_totals(scope, start, now, &payments, &expenses)?;
        let closure = FinancialClosure::close(&totals, notes, closed_by, now);

        sqlx::query(
            r#"
            INSERT INTO financial_closures (id, scope, period_start, closure_date, total_income, total_expense, balance, notes, closed_by, created_utc)
            VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10)
            "#,
        )
        .bind(closure.id)
        .bind(closure.scope.as_str())
        .bind(closure.period_start)
        .bind(closure.closure_date)
        .bind(closure.total_income)
        .bind(closure.total_expense)
        .bind(closure.balance)
        .bind(&closure.notes)
        .bind(closure.closed_by)
        .bind(closure.created_utc)
        .execute(&mut *tx)
        .await
        .map_err(|e| {
            let duplicate = e
                .as_database_error()
                .and_then(|db| db.code())
                .is_some_and(|code| code == UNIQUE_VIOLATION);
            if duplicate {
                LedgerError::conflict(format!(
                    "A {} closure starting at {} already exists",
                    scope, start
                ))
            } else {
                LedgerError::Storage(anyhow::anyhow!("Failed to insert closure: {}", e))
            }
        })?;

        tx.commit()
            .await
            .map_err(storage("Failed to commit transaction"))?;

        timer.observe_duration();
        Ok(closure)
    }

    #[instrument(skip(self))]
    async fn list_closures(
        &self,
        scope: ClosureScope,
    ) -> Result<Vec<FinancialClosure>, LedgerError> {
        let timer = DB_QUERY_DURATION
            .with_label_values(&["list_closures"])
            .start_timer();

        let closures = sqlx::query_as::<_, ClosureRow>(&format!(
            "SELECT {} FROM financial_closures WHERE scope = $1 ORDER BY closure_date DESC",
            CLOSURE_COLUMNS
        ))
        .bind(scope.as_str())
        .fetch_all(&self.pool)
        .await
        .map_err(storage("Failed to list closures"))?
        .into_iter()
        .map(FinancialClosure::try_from)
        .collect::<Result<Vec<_>, _>>()?;

        timer.observe_duration();
        Ok(closures)
    }

    #[instrument(skip(self))]
    async fn dashboard_stats(&self) -> Result<DashboardStats, LedgerError> {
        let timer = DB_QUERY_DURATION
            .with_label_values(&["dashboard_stats"])
            .start_timer();

        let total_clients = sqlx::query_scalar::<_, i64>("SELECT COUNT(*) FROM clients")
            .fetch_one(&self.pool)
            .await
            .map_err(storage("Failed to count clients"))?;

        let status_rows = sqlx::query_as::<_, (String, i64)>(
            "SELECT status, COUNT(*) FROM devis GROUP BY status",
        )
        .fetch_all(&self.pool)
        .await
        .map_err(storage("Failed to count quotes"))?;
        let mut by_status = DevisStatusCounts::default();
        for (status, count) in status_rows {
            by_status.add(decode(&status)?, count as u64);
        }

        let total_invoices = sqlx::query_scalar::<_, i64>("SELECT COUNT(*) FROM invoices")
            .fetch_one(&self.pool)
            .await
            .map_err(storage("Failed to count invoices"))?;

        let revenue = sqlx::query_scalar::<_, Decimal>("SELECT COALESCE(SUM(amount), 0) FROM payments")
            .fetch_one(&self.pool)
            .await
            .map_err(storage("Failed to sum payments"))?;

        let expenses = sqlx::query_scalar::<_, Decimal>("SELECT COALESCE(SUM(amount), 0) FROM expenses")
            .fetch_one(&self.pool)
            .await
            .map_err(storage("Failed to sum expenses"))?;

        timer.observe_duration();
        Ok(DashboardStats::new(
            total_clients as u64,
            by_status,
            total_invoices as u64,
            revenue,
            expenses,
        ))
    }
}

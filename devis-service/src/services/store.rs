use crate::models::{
    CatalogSnapshot, Client, ClosureScope, DashboardStats, Expense, ExpenseUpdate,
    FinancialClosure, FixedService, Invoice, InvoiceItem, LedgerError, MachinePricing, Material,
    NewExpense, NewPayment, Payment, PeriodTotals, Quote, RequestContext,
};
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use uuid::Uuid;

/// A change applied to a locked quote. Returning an error discards it.
pub type QuoteMutation = Box<dyn FnOnce(&mut Quote) -> Result<(), LedgerError> + Send>;

/// Persistence for the ledger.
///
/// Every method is one atomic unit: it either commits fully or leaves the
/// store untouched. Invariant checks that depend on stored state (remaining
/// balance, quote status, closure period) run inside that unit.
#[async_trait]
pub trait LedgerStore: Send + Sync {
    async fn health_check(&self) -> Result<(), LedgerError>;

    // Clients & catalog
    async fn insert_client(&self, client: &Client) -> Result<(), LedgerError>;
    async fn get_client(&self, id: Uuid) -> Result<Option<Client>, LedgerError>;
    async fn upsert_machine_pricing(&self, pricing: &MachinePricing) -> Result<(), LedgerError>;
    async fn list_machine_pricing(&self) -> Result<Vec<MachinePricing>, LedgerError>;
    async fn insert_material(&self, material: &Material) -> Result<(), LedgerError>;
    /// Refused once a non-draft quote references the material.
    async fn update_material_price(
        &self,
        id: Uuid,
        price: Decimal,
        now: DateTime<Utc>,
    ) -> Result<Material, LedgerError>;
    async fn insert_service(&self, service: &FixedService) -> Result<(), LedgerError>;
    /// Refused once a non-draft quote references the service.
    async fn update_service_price(
        &self,
        id: Uuid,
        price: Decimal,
        now: DateTime<Utc>,
    ) -> Result<FixedService, LedgerError>;
    async fn catalog_snapshot(&self) -> Result<CatalogSnapshot, LedgerError>;

    // Quotes
    async fn create_quote(
        &self,
        client_id: Uuid,
        created_by: Uuid,
        notes: Option<String>,
        now: DateTime<Utc>,
    ) -> Result<Quote, LedgerError>;
    async fn get_quote(&self, id: Uuid) -> Result<Option<Quote>, LedgerError>;
    async fn quotes_for_client(&self, client_id: Uuid) -> Result<Vec<Quote>, LedgerError>;
    async fn update_quote(&self, id: Uuid, mutation: QuoteMutation) -> Result<Quote, LedgerError>;
    async fn delete_quote(&self, id: Uuid) -> Result<Quote, LedgerError>;

    // Invoices
    async fn create_invoice_from_quotes(
        &self,
        quote_ids: &[Uuid],
        created_by: Uuid,
        now: DateTime<Utc>,
    ) -> Result<Invoice, LedgerError>;
    async fn create_direct_invoice(
        &self,
        client_id: Uuid,
        created_by: Uuid,
        items: Vec<InvoiceItem>,
        now: DateTime<Utc>,
    ) -> Result<Invoice, LedgerError>;
    async fn get_invoice(&self, id: Uuid) -> Result<Option<Invoice>, LedgerError>;
    async fn invoices_for_client(&self, client_id: Uuid) -> Result<Vec<Invoice>, LedgerError>;

    // Payments and expenses are dated inside the unit, and refused when the
    // date falls in a period a register has already closed.
    async fn insert_payment(
        &self,
        new: NewPayment,
        ctx: RequestContext,
    ) -> Result<Payment, LedgerError>;
    async fn delete_payment(&self, id: Uuid) -> Result<Payment, LedgerError>;
    /// Payments counting toward an invoice, including those made on its quotes.
    async fn payments_for_invoice(&self, invoice: &Invoice) -> Result<Vec<Payment>, LedgerError>;
    async fn payments_for_client(&self, client_id: Uuid) -> Result<Vec<Payment>, LedgerError>;

    async fn insert_expense(
        &self,
        new: NewExpense,
        ctx: RequestContext,
    ) -> Result<Expense, LedgerError>;
    async fn update_expense(
        &self,
        id: Uuid,
        update: ExpenseUpdate,
        now: DateTime<Utc>,
    ) -> Result<Expense, LedgerError>;
    async fn delete_expense(&self, id: Uuid) -> Result<Expense, LedgerError>;
    async fn list_expenses(&self) -> Result<Vec<Expense>, LedgerError>;

    // Cash register
    async fn period_totals(
        &self,
        scope: ClosureScope,
        now: DateTime<Utc>,
    ) -> Result<PeriodTotals, LedgerError>;
    async fn close_period(
        &self,
        scope: ClosureScope,
        notes: Option<String>,
        closed_by: Uuid,
        now: DateTime<Utc>,
    ) -> Result<FinancialClosure, LedgerError>;
    /// Newest first.
    async fn list_closures(&self, scope: ClosureScope)
        -> Result<Vec<FinancialClosure>, LedgerError>;

    async fn dashboard_stats(&self) -> Result<DashboardStats, LedgerError>;
}

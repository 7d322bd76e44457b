//! Ledger facade: the single entry point for handlers and embedding code.
//!
//! Resolves catalog prices, drives the store, and records logs and metrics
//! for every state change.

use super::memory::MemoryStore;
use super::metrics::{
    record_closure, record_error, record_invoice_created, record_payment, record_quote_event,
};
use super::store::LedgerStore;
use crate::models::error::ensure_positive;
use crate::models::payment::paid_toward_invoice;
use crate::models::{
    client_balance, resolve, Client, ClientBalance, ClosureScope, DashboardStats, DevisLine,
    DevisServiceItem, Expense, ExpenseUpdate, FinancialClosure, FixedService, Invoice, InvoiceItem,
    LedgerError, LineInput, MachinePricing, MachineType, Material, NewClient, NewExpense,
    NewPayment, Payment, PaymentStats, PeriodTotals, PriceCatalog, Quote, RequestContext,
    ResolvedPrice,
};
use chrono::Utc;
use rust_decimal::Decimal;
use std::sync::Arc;
use tracing::{error, info, instrument, warn};
use uuid::Uuid;

/// Log and count a failed operation, then hand the result back unchanged.
fn observe<T>(operation: &'static str, result: Result<T, LedgerError>) -> Result<T, LedgerError> {
    if let Err(e) = &result {
        record_error(e.kind());
        match e {
            LedgerError::Storage(_) => error!(operation, error = %e, "Ledger storage failure"),
            _ => warn!(operation, kind = e.kind(), error = %e, "Ledger operation rejected"),
        }
    }
    result
}

#[derive(Clone)]
pub struct LedgerService {
    store: Arc<dyn LedgerStore>,
}

impl LedgerService {
    pub fn new(store: Arc<dyn LedgerStore>) -> Self {
        Self { store }
    }

    /// A ledger backed by process memory. Nothing survives a restart.
    pub fn in_memory() -> Self {
        Self::new(Arc::new(MemoryStore::new()))
    }

    pub async fn health_check(&self) -> Result<(), LedgerError> {
        self.store.health_check().await
    }

    // =========================================================================
    // Pricing
    // =========================================================================

    /// Price a line against the current catalog without touching any quote.
    #[instrument(skip(self, input), fields(machine_type = %input.machine_type()))]
    pub async fn resolve_line_price(&self, input: &LineInput) -> Result<ResolvedPrice, LedgerError> {
        let result = async {
            let catalog = self.store.catalog_snapshot().await?;
            resolve(input, &catalog)
        }
        .await;
        observe("resolve_line_price", result)
    }

    // =========================================================================
    // Clients & catalog
    // =========================================================================

    #[instrument(skip(self, new), fields(name = %new.name))]
    pub async fn create_client(&self, new: NewClient) -> Result<Client, LedgerError> {
        let result = async {
            let client = Client::create(new, Utc::now())?;
            self.store.insert_client(&client).await?;
            info!(client_id = %client.id, "Client created");
            Ok(client)
        }
        .await;
        observe("create_client", result)
    }

    pub async fn get_client(&self, id: Uuid) -> Result<Client, LedgerError> {
        let result = self
            .store
            .get_client(id)
            .await
            .and_then(|c| c.ok_or_else(|| LedgerError::not_found(format!("Client {} not found", id))));
        observe("get_client", result)
    }

    #[instrument(skip(self, description))]
    pub async fn set_machine_price(
        &self,
        machine_type: MachineType,
        price_per_unit: Decimal,
        description: Option<String>,
    ) -> Result<MachinePricing, LedgerError> {
        let result = async {
            let pricing = MachinePricing::new(machine_type, price_per_unit, description, Utc::now())?;
            self.store.upsert_machine_pricing(&pricing).await?;
            info!(machine_type = %machine_type, price = %price_per_unit, "Machine price set");
            Ok(pricing)
        }
        .await;
        observe("set_machine_price", result)
    }

    pub async fn machine_pricing(&self) -> Result<Vec<MachinePricing>, LedgerError> {
        observe("machine_pricing", self.store.list_machine_pricing().await)
    }

    #[instrument(skip(self, description))]
    pub async fn create_material(
        &self,
        name: String,
        price_per_unit: Decimal,
        unit: String,
        description: Option<String>,
    ) -> Result<Material, LedgerError> {
        let result = async {
            let material = Material::create(name, price_per_unit, unit, description, Utc::now())?;
            self.store.insert_material(&material).await?;
            info!(material_id = %material.id, price = %material.price_per_unit, "Material created");
            Ok(material)
        }
        .await;
        observe("create_material", result)
    }

    #[instrument(skip(self))]
    pub async fn update_material_price(
        &self,
        id: Uuid,
        price_per_unit: Decimal,
    ) -> Result<Material, LedgerError> {
        let result = async {
            ensure_positive("price_per_unit", price_per_unit)?;
            let material = self
                .store
                .update_material_price(id, price_per_unit, Utc::now())
                .await?;
            info!(material_id = %id, price = %price_per_unit, "Material price updated");
            Ok(material)
        }
        .await;
        observe("update_material_price", result)
    }

    #[instrument(skip(self, description))]
    pub async fn create_service(
        &self,
        name: String,
        price: Decimal,
        description: Option<String>,
    ) -> Result<FixedService, LedgerError> {
        let result = async {
            let service = FixedService::create(name, price, description, Utc::now())?;
            self.store.insert_service(&service).await?;
            info!(service_id = %service.id, price = %service.price, "Fixed service created");
            Ok(service)
        }
        .await;
        observe("create_service", result)
    }

    #[instrument(skip(self))]
    pub async fn update_service_price(
        &self,
        id: Uuid,
        price: Decimal,
    ) -> Result<FixedService, LedgerError> {
        let result = async {
            ensure_positive("price", price)?;
            let service = self.store.update_service_price(id, price, Utc::now()).await?;
            info!(service_id = %id, price = %price, "Fixed service price updated");
            Ok(service)
        }
        .await;
        observe("update_service_price", result)
    }

    // =========================================================================
    // Quotes
    // =========================================================================

    #[instrument(skip(self, ctx, notes), fields(user_id = %ctx.user_id))]
    pub async fn create_quote(
        &self,
        ctx: &RequestContext,
        client_id: Uuid,
        notes: Option<String>,
    ) -> Result<Quote, LedgerError> {
        let result = self
            .store
            .create_quote(client_id, ctx.user_id, notes, Utc::now())
            .await;
        if let Ok(quote) = &result {
            record_quote_event("created");
            info!(quote_id = %quote.id, reference = %quote.reference, client_id = %client_id, "Quote created");
        }
        observe("create_quote", result)
    }

    pub async fn get_quote(&self, id: Uuid) -> Result<Quote, LedgerError> {
        let result = self
            .store
            .get_quote(id)
            .await
            .and_then(|q| q.ok_or_else(|| LedgerError::not_found(format!("Quote {} not found", id))));
        observe("get_quote", result)
    }

    pub async fn quotes_for_client(&self, client_id: Uuid) -> Result<Vec<Quote>, LedgerError> {
        let result = async {
            self.get_client(client_id).await?;
            self.store.quotes_for_client(client_id).await
        }
        .await;
        observe("quotes_for_client", result)
    }

    /// Price the line against the current catalog and append it to a draft quote.
    #[instrument(skip(self, input, description), fields(machine_type = %input.machine_type()))]
    pub async fn add_line(
        &self,
        quote_id: Uuid,
        input: LineInput,
        description: Option<String>,
    ) -> Result<Quote, LedgerError> {
        let result = async {
            let catalog = self.store.catalog_snapshot().await?;
            let price = resolve(&input, &catalog)?;
            let now = Utc::now();
            let line = DevisLine::priced(input, description, price, now);
            let line_id = line.id;
            let quote = self
                .store
                .update_quote(quote_id, Box::new(move |q| q.add_line(line, now)))
                .await?;
            info!(
                quote_id = %quote_id,
                line_id = %line_id,
                line_total = %price.line_total,
                total_amount = %quote.total_amount,
                "Line added to quote"
            );
            Ok(quote)
        }
        .await;
        observe("add_line", result)
    }

    #[instrument(skip(self))]
    pub async fn remove_line(&self, quote_id: Uuid, line_id: Uuid) -> Result<Quote, LedgerError> {
        let now = Utc::now();
        let result = self
            .store
            .update_quote(
                quote_id,
                Box::new(move |q| q.remove_line(line_id, now).map(|_| ())),
            )
            .await;
        if let Ok(quote) = &result {
            info!(quote_id = %quote_id, line_id = %line_id, total_amount = %quote.total_amount, "Line removed from quote");
        }
        observe("remove_line", result)
    }

    /// Snapshot an active catalog service onto a draft quote.
    #[instrument(skip(self))]
    pub async fn add_service(&self, quote_id: Uuid, service_id: Uuid) -> Result<Quote, LedgerError> {
        let result = async {
            let catalog = self.store.catalog_snapshot().await?;
            let service = catalog.service(service_id).ok_or_else(|| {
                LedgerError::not_found(format!("Service {} not found or inactive", service_id))
            })?;
            let item = DevisServiceItem::snapshot(service);
            let item_id = item.id;
            let now = Utc::now();
            let quote = self
                .store
                .update_quote(quote_id, Box::new(move |q| q.add_service(item, now)))
                .await?;
            info!(
                quote_id = %quote_id,
                item_id = %item_id,
                total_amount = %quote.total_amount,
                "Service added to quote"
            );
            Ok(quote)
        }
        .await;
        observe("add_service", result)
    }

    #[instrument(skip(self))]
    pub async fn remove_service(&self, quote_id: Uuid, item_id: Uuid) -> Result<Quote, LedgerError> {
        let now = Utc::now();
        let result = self
            .store
            .update_quote(
                quote_id,
                Box::new(move |q| q.remove_service(item_id, now).map(|_| ())),
            )
            .await;
        if let Ok(quote) = &result {
            info!(quote_id = %quote_id, item_id = %item_id, total_amount = %quote.total_amount, "Service removed from quote");
        }
        observe("remove_service", result)
    }

    #[instrument(skip(self))]
    pub async fn validate_quote(&self, quote_id: Uuid) -> Result<Quote, LedgerError> {
        let now = Utc::now();
        let result = self
            .store
            .update_quote(quote_id, Box::new(move |q| q.validate(now)))
            .await;
        if let Ok(quote) = &result {
            record_quote_event("validated");
            info!(quote_id = %quote_id, reference = %quote.reference, total_amount = %quote.total_amount, "Quote validated");
        }
        observe("validate_quote", result)
    }

    #[instrument(skip(self))]
    pub async fn cancel_quote(&self, quote_id: Uuid) -> Result<Quote, LedgerError> {
        let now = Utc::now();
        let result = self
            .store
            .update_quote(quote_id, Box::new(move |q| q.cancel(now)))
            .await;
        if let Ok(quote) = &result {
            record_quote_event("cancelled");
            info!(quote_id = %quote_id, reference = %quote.reference, "Quote cancelled");
        }
        observe("cancel_quote", result)
    }

    #[instrument(skip(self))]
    pub async fn delete_quote(&self, quote_id: Uuid) -> Result<Quote, LedgerError> {
        let result = self.store.delete_quote(quote_id).await;
        if let Ok(quote) = &result {
            record_quote_event("deleted");
            info!(quote_id = %quote_id, reference = %quote.reference, "Quote deleted");
        }
        observe("delete_quote", result)
    }

    // =========================================================================
    // Invoices
    // =========================================================================

    /// Freeze validated quotes of one client into a single invoice.
    #[instrument(skip(self, ctx, quote_ids), fields(user_id = %ctx.user_id, quote_count = quote_ids.len()))]
    pub async fn create_invoice_from_quotes(
        &self,
        ctx: &RequestContext,
        quote_ids: &[Uuid],
    ) -> Result<Invoice, LedgerError> {
        let result = self
            .store
            .create_invoice_from_quotes(quote_ids, ctx.user_id, Utc::now())
            .await;
        if let Ok(invoice) = &result {
            record_invoice_created("quotes");
            for _ in invoice.quote_ids() {
                record_quote_event("invoiced");
            }
            info!(
                invoice_id = %invoice.id,
                reference = %invoice.reference,
                total_amount = %invoice.total_amount,
                "Invoice created from quotes"
            );
        }
        observe("create_invoice_from_quotes", result)
    }

    /// Invoice ad-hoc items with no quote behind them.
    #[instrument(skip(self, ctx, items), fields(user_id = %ctx.user_id, item_count = items.len()))]
    pub async fn create_direct_invoice(
        &self,
        ctx: &RequestContext,
        client_id: Uuid,
        items: Vec<(String, Decimal, Decimal)>,
    ) -> Result<Invoice, LedgerError> {
        let result = async {
            let items = items
                .into_iter()
                .map(|(description, quantity, unit_price)| {
                    InvoiceItem::new(description, quantity, unit_price)
                })
                .collect::<Result<Vec<_>, _>>()?;
            let invoice = self
                .store
                .create_direct_invoice(client_id, ctx.user_id, items, Utc::now())
                .await?;
            record_invoice_created("direct");
            info!(
                invoice_id = %invoice.id,
                reference = %invoice.reference,
                total_amount = %invoice.total_amount,
                "Direct invoice created"
            );
            Ok(invoice)
        }
        .await;
        observe("create_direct_invoice", result)
    }

    pub async fn get_invoice(&self, id: Uuid) -> Result<Invoice, LedgerError> {
        let result = self
            .store
            .get_invoice(id)
            .await
            .and_then(|i| i.ok_or_else(|| LedgerError::not_found(format!("Invoice {} not found", id))));
        observe("get_invoice", result)
    }

    // =========================================================================
    // Payments
    // =========================================================================

    #[instrument(skip(self, ctx, new), fields(user_id = %ctx.user_id, target = %new.target, amount = %new.amount))]
    pub async fn apply_payment(
        &self,
        ctx: &RequestContext,
        new: NewPayment,
    ) -> Result<Payment, LedgerError> {
        let result = self.store.insert_payment(new, *ctx).await;
        if let Ok(payment) = &result {
            record_payment(payment.target.kind(), payment.amount);
            info!(
                payment_id = %payment.id,
                target = %payment.target,
                amount = %payment.amount,
                "Payment applied"
            );
        }
        observe("apply_payment", result)
    }

    #[instrument(skip(self))]
    pub async fn delete_payment(&self, id: Uuid) -> Result<Payment, LedgerError> {
        let result = self.store.delete_payment(id).await;
        if let Ok(payment) = &result {
            info!(payment_id = %id, target = %payment.target, amount = %payment.amount, "Payment deleted");
        }
        observe("delete_payment", result)
    }

    /// Payments counting toward an invoice, its quotes' prior payments included.
    pub async fn payments_for_invoice(&self, invoice_id: Uuid) -> Result<Vec<Payment>, LedgerError> {
        let result = async {
            let invoice = self.get_invoice(invoice_id).await?;
            self.store.payments_for_invoice(&invoice).await
        }
        .await;
        observe("payments_for_invoice", result)
    }

    pub async fn invoice_payment_stats(&self, invoice_id: Uuid) -> Result<PaymentStats, LedgerError> {
        let result = async {
            let invoice = self.get_invoice(invoice_id).await?;
            let payments = self.store.payments_for_invoice(&invoice).await?;
            Ok(invoice.stats(paid_toward_invoice(&invoice, &payments)))
        }
        .await;
        observe("invoice_payment_stats", result)
    }

    #[instrument(skip(self))]
    pub async fn get_client_balance(&self, client_id: Uuid) -> Result<ClientBalance, LedgerError> {
        let result = async {
            self.get_client(client_id).await?;
            let quotes = self.store.quotes_for_client(client_id).await?;
            let invoices = self.store.invoices_for_client(client_id).await?;
            let payments = self.store.payments_for_client(client_id).await?;
            Ok(client_balance(client_id, &quotes, &invoices, &payments))
        }
        .await;
        observe("get_client_balance", result)
    }

    // =========================================================================
    // Expenses
    // =========================================================================

    #[instrument(skip(self, ctx, new), fields(user_id = %ctx.user_id, amount = %new.amount))]
    pub async fn create_expense(
        &self,
        ctx: &RequestContext,
        new: NewExpense,
    ) -> Result<Expense, LedgerError> {
        let result = self.store.insert_expense(new, *ctx).await;
        if let Ok(expense) = &result {
            info!(expense_id = %expense.id, category = expense.category.as_str(), amount = %expense.amount, "Expense recorded");
        }
        observe("create_expense", result)
    }

    #[instrument(skip(self, update))]
    pub async fn update_expense(
        &self,
        id: Uuid,
        update: ExpenseUpdate,
    ) -> Result<Expense, LedgerError> {
        let result = self.store.update_expense(id, update, Utc::now()).await;
        if let Ok(expense) = &result {
            info!(expense_id = %id, amount = %expense.amount, "Expense updated");
        }
        observe("update_expense", result)
    }

    #[instrument(skip(self))]
    pub async fn delete_expense(&self, id: Uuid) -> Result<Expense, LedgerError> {
        let result = self.store.delete_expense(id).await;
        if let Ok(expense) = &result {
            info!(expense_id = %id, amount = %expense.amount, "Expense deleted");
        }
        observe("delete_expense", result)
    }

    pub async fn list_expenses(&self) -> Result<Vec<Expense>, LedgerError> {
        observe("list_expenses", self.store.list_expenses().await)
    }

    // =========================================================================
    // Cash register
    // =========================================================================

    /// Running totals of the open period, without closing it.
    #[instrument(skip(self))]
    pub async fn period_stats(&self, scope: ClosureScope) -> Result<PeriodTotals, LedgerError> {
        observe("period_stats", self.store.period_totals(scope, Utc::now()).await)
    }

    #[instrument(skip(self, ctx, notes), fields(user_id = %ctx.user_id))]
    pub async fn close_period(
        &self,
        ctx: &RequestContext,
        scope: ClosureScope,
        notes: Option<String>,
    ) -> Result<FinancialClosure, LedgerError> {
        let result = self
            .store
            .close_period(scope, notes, ctx.user_id, Utc::now())
            .await;
        if let Ok(closure) = &result {
            record_closure(scope.as_str());
            info!(
                closure_id = %closure.id,
                scope = %scope,
                period_start = %closure.period_start,
                closure_date = %closure.closure_date,
                balance = %closure.balance,
                "Cash register closed"
            );
        }
        observe("close_period", result)
    }

    pub async fn list_closures(
        &self,
        scope: ClosureScope,
    ) -> Result<Vec<FinancialClosure>, LedgerError> {
        observe("list_closures", self.store.list_closures(scope).await)
    }

    pub async fn dashboard_stats(&self) -> Result<DashboardStats, LedgerError> {
        observe("dashboard_stats", self.store.dashboard_stats().await)
    }
}

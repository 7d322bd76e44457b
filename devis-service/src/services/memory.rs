//! In-memory ledger store.
//!
//! All state sits behind one mutex held for the whole read-check-write of each
//! operation, which gives the same atomicity as a database transaction.

use super::store::{LedgerStore, QuoteMutation};
use crate::models::closure::{ensure_period_open, period_start, period_totals};
use crate::models::error::checked_sum;
use crate::models::invoice::{check_quote_selection, invoice_reference};
use crate::models::payment::{ensure_quote_payable, paid_toward_invoice, paid_toward_quote};
use crate::models::quote::quote_reference;
use crate::models::{
    CatalogSnapshot, Client, ClosureScope, DashboardStats, DevisStatusCounts, Expense,
    ExpenseUpdate, FinancialClosure, FixedService, Invoice, InvoiceItem, LedgerError,
    MachinePricing, MachineType, Material, NewExpense, NewPayment, Payment, PaymentTarget,
    PeriodTotals, Quote, QuoteStatus, RequestContext, UserRole,
};
use async_trait::async_trait;
use chrono::{DateTime, Datelike, Utc};
use rust_decimal::Decimal;
use std::collections::{BTreeMap, HashMap};
use tokio::sync::Mutex;
use tracing::instrument;
use uuid::Uuid;

const QUOTE_PREFIX: &str = "DEV";
const INVOICE_PREFIX: &str = "FAC";

#[derive(Default)]
struct State {
    clients: HashMap<Uuid, Client>,
    machine_pricing: BTreeMap<MachineType, MachinePricing>,
    materials: HashMap<Uuid, Material>,
    services: HashMap<Uuid, FixedService>,
    quotes: HashMap<Uuid, Quote>,
    invoices: HashMap<Uuid, Invoice>,
    payments: Vec<Payment>,
    expenses: Vec<Expense>,
    closures: Vec<FinancialClosure>,
    counters: HashMap<(&'static str, i32), i64>,
}

impl State {
    fn next_seq(&self, prefix: &'static str, now: DateTime<Utc>) -> i64 {
        self.counters.get(&(prefix, now.year())).copied().unwrap_or(0) + 1
    }

    fn commit_seq(&mut self, prefix: &'static str, now: DateTime<Utc>, seq: i64) {
        self.counters.insert((prefix, now.year()), seq);
    }

    fn referenced_by_finalized_quote(&self, catalog_id: Uuid) -> bool {
        self.quotes
            .values()
            .any(|q| q.status != QuoteStatus::Draft && q.references_catalog_item(catalog_id))
    }

    fn quote(&self, id: Uuid) -> Result<&Quote, LedgerError> {
        self.quotes
            .get(&id)
            .ok_or_else(|| LedgerError::not_found(format!("Quote {} not found", id)))
    }

    fn latest_closure(&self, scope: ClosureScope) -> Option<&FinancialClosure> {
        self.closures
            .iter()
            .filter(|c| c.scope == scope)
            .max_by_key(|c| c.closure_date)
    }

    fn ensure_period_open(
        &self,
        at: DateTime<Utc>,
        recorded_by: UserRole,
    ) -> Result<(), LedgerError> {
        let latest = ClosureScope::ALL
            .iter()
            .filter_map(|scope| self.latest_closure(*scope));
        ensure_period_open(at, recorded_by, latest)
    }
}

#[derive(Default)]
pub struct MemoryStore {
    state: Mutex<State>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl LedgerStore for MemoryStore {
    async fn health_check(&self) -> Result<(), LedgerError> {
        Ok(())
    }

    async fn insert_client(&self, client: &Client) -> Result<(), LedgerError> {
        let mut state = self.state.lock().await;
        state.clients.insert(client.id, client.clone());
        Ok(())
    }

    async fn get_client(&self, id: Uuid) -> Result<Option<Client>, LedgerError> {
        Ok(self.state.lock().await.clients.get(&id).cloned())
    }

    async fn upsert_machine_pricing(&self, pricing: &MachinePricing) -> Result<(), LedgerError> {
        let mut state = self.state.lock().await;
        state
            .machine_pricing
            .insert(pricing.machine_type, pricing.clone());
        Ok(())
    }

    async fn list_machine_pricing(&self) -> Result<Vec<MachinePricing>, LedgerError> {
        Ok(self
            .state
            .lock()
            .await
            .machine_pricing
            .values()
            .cloned()
            .collect())
    }

    async fn insert_material(&self, material: &Material) -> Result<(), LedgerError> {
        let mut state = self.state.lock().await;
        state.materials.insert(material.id, material.clone());
        Ok(())
    }

    #[instrument(skip(self))]
    async fn update_material_price(
        &self,
        id: Uuid,
        price: Decimal,
        now: DateTime<Utc>,
    ) -> Result<Material, LedgerError> {
        let mut state = self.state.lock().await;
        if !state.materials.contains_key(&id) {
            return Err(LedgerError::not_found(format!("Material {} not found", id)));
        }
        if state.referenced_by_finalized_quote(id) {
            return Err(LedgerError::conflict(format!(
                "Material {} is referenced by a finalized quote",
                id
            )));
        }
        let material = state
            .materials
            .get_mut(&id)
            .ok_or_else(|| LedgerError::not_found(format!("Material {} not found", id)))?;
        material.price_per_unit = price;
        material.updated_utc = now;
        Ok(material.clone())
    }

    async fn insert_service(&self, service: &FixedService) -> Result<(), LedgerError> {
        let mut state = self.state.lock().await;
        state.services.insert(service.id, service.clone());
        Ok(())
    }

    #[instrument(skip(self))]
    async fn update_service_price(
        &self,
        id: Uuid,
        price: Decimal,
        now: DateTime<Utc>,
    ) -> Result<FixedService, LedgerError> {
        let mut state = self.state.lock().await;
        if !state.services.contains_key(&id) {
            return Err(LedgerError::not_found(format!("Service {} not found", id)));
        }
        if state.referenced_by_finalized_quote(id) {
            return Err(LedgerError::conflict(format!(
                "Service {} is referenced by a finalized quote",
                id
            )));
        }
        let service = state
            .services
            .get_mut(&id)
            .ok_or_else(|| LedgerError::not_found(format!("Service {} not found", id)))?;
        service.price = price;
        service.updated_utc = now;
        Ok(service.clone())
    }

    async fn catalog_snapshot(&self) -> Result<CatalogSnapshot, LedgerError> {
        let state = self.state.lock().await;
        Ok(CatalogSnapshot {
            machine_prices: state
                .machine_pricing
                .values()
                .map(|p| (p.machine_type, p.price_per_unit))
                .collect(),
            materials: state.materials.clone(),
            services: state.services.clone(),
        })
    }

    #[instrument(skip(self, notes))]
    async fn create_quote(
        &self,
        client_id: Uuid,
        created_by: Uuid,
        notes: Option<String>,
        now: DateTime<Utc>,
    ) -> Result<Quote, LedgerError> {
        let mut state = self.state.lock().await;
        if !state.clients.contains_key(&client_id) {
            return Err(LedgerError::not_found(format!(
                "Client {} not found",
                client_id
            )));
        }
        let seq = state.next_seq(QUOTE_PREFIX, now);
        let quote = Quote::new(quote_reference(now, seq), client_id, created_by, notes, now);
        state.commit_seq(QUOTE_PREFIX, now, seq);
        state.quotes.insert(quote.id, quote.clone());
        Ok(quote)
    }

    async fn get_quote(&self, id: Uuid) -> Result<Option<Quote>, LedgerError> {
        Ok(self.state.lock().await.quotes.get(&id).cloned())
    }

    async fn quotes_for_client(&self, client_id: Uuid) -> Result<Vec<Quote>, LedgerError> {
        let state = self.state.lock().await;
        let mut quotes: Vec<Quote> = state
            .quotes
            .values()
            .filter(|q| q.client_id == client_id)
            .cloned()
            .collect();
        quotes.sort_by(|a, b| {
            a.created_utc
                .cmp(&b.created_utc)
                .then_with(|| a.reference.cmp(&b.reference))
        });
        Ok(quotes)
    }

    #[instrument(skip(self, mutation))]
    async fn update_quote(&self, id: Uuid, mutation: QuoteMutation) -> Result<Quote, LedgerError> {
        let mut state = self.state.lock().await;
        let mut quote = state.quote(id)?.clone();
        mutation(&mut quote)?;
        state.quotes.insert(id, quote.clone());
        Ok(quote)
    }

    #[instrument(skip(self))]
    async fn delete_quote(&self, id: Uuid) -> Result<Quote, LedgerError> {
        let mut state = self.state.lock().await;
        state.quote(id)?.ensure_deletable()?;
        if state
            .payments
            .iter()
            .any(|p| p.target == PaymentTarget::Devis(id))
        {
            return Err(LedgerError::conflict(format!(
                "Quote {} has payments and cannot be deleted",
                id
            )));
        }
        state
            .quotes
            .remove(&id)
            .ok_or_else(|| LedgerError::not_found(format!("Quote {} not found", id)))
    }

    #[instrument(skip(self))]
    async fn create_invoice_from_quotes(
        &self,
        quote_ids: &[Uuid],
        created_by: Uuid,
        now: DateTime<Utc>,
    ) -> Result<Invoice, LedgerError> {
        let mut state = self.state.lock().await;
        check_quote_selection(quote_ids)?;
        let mut quotes = quote_ids
            .iter()
            .map(|id| state.quote(*id).cloned())
            .collect::<Result<Vec<_>, _>>()?;

        let seq = state.next_seq(INVOICE_PREFIX, now);
        let invoice = Invoice::consolidate(invoice_reference(now, seq), created_by, &mut quotes, now)?;

        state.commit_seq(INVOICE_PREFIX, now, seq);
        for quote in quotes {
            state.quotes.insert(quote.id, quote);
        }
        state.invoices.insert(invoice.id, invoice.clone());
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
        let mut state = self.state.lock().await;
        if !state.clients.contains_key(&client_id) {
            return Err(LedgerError::not_found(format!(
                "Client {} not found",
                client_id
            )));
        }
        let seq = state.next_seq(INVOICE_PREFIX, now);
        let invoice = Invoice::direct(
            invoice_reference(now, seq),
            client_id,
            created_by,
            items,
            now,
        )?;
        state.commit_seq(INVOICE_PREFIX, now, seq);
        state.invoices.insert(invoice.id, invoice.clone());
        Ok(invoice)
    }

    async fn get_invoice(&self, id: Uuid) -> Result<Option<Invoice>, LedgerError> {
        Ok(self.state.lock().await.invoices.get(&id).cloned())
    }

    async fn invoices_for_client(&self, client_id: Uuid) -> Result<Vec<Invoice>, LedgerError> {
        let state = self.state.lock().await;
        let mut invoices: Vec<Invoice> = state
            .invoices
            .values()
            .filter(|i| i.client_id == client_id)
            .cloned()
            .collect();
        invoices.sort_by_key(|i| i.created_utc);
        Ok(invoices)
    }

    #[instrument(skip(self, new), fields(target = %new.target, amount = %new.amount))]
    async fn insert_payment(
        &self,
        new: NewPayment,
        ctx: RequestContext,
    ) -> Result<Payment, LedgerError> {
        let mut state = self.state.lock().await;
        let now = Utc::now();
        state.ensure_period_open(new.payment_date.unwrap_or(now), ctx.role)?;
        let (total, already_paid) = match new.target {
            PaymentTarget::Invoice(id) => {
                let invoice = state
                    .invoices
                    .get(&id)
                    .ok_or_else(|| LedgerError::not_found(format!("Invoice {} not found", id)))?;
                (
                    invoice.total_amount,
                    paid_toward_invoice(invoice, &state.payments),
                )
            }
            PaymentTarget::Devis(id) => {
                let quote = state.quote(id)?;
                ensure_quote_payable(quote)?;
                (quote.total_amount, paid_toward_quote(id, &state.payments))
            }
        };

        let payment = Payment::record(new, &ctx, total, already_paid, now)?;
        state.payments.push(payment.clone());
        Ok(payment)
    }

    #[instrument(skip(self))]
    async fn delete_payment(&self, id: Uuid) -> Result<Payment, LedgerError> {
        let mut state = self.state.lock().await;
        let idx = state
            .payments
            .iter()
            .position(|p| p.id == id)
            .ok_or_else(|| LedgerError::not_found(format!("Payment {} not found", id)))?;
        let payment = &state.payments[idx];
        payment.ensure_deletable()?;
        state.ensure_period_open(payment.payment_date, payment.created_by_role)?;
        Ok(state.payments.remove(idx))
    }

    async fn payments_for_invoice(&self, invoice: &Invoice) -> Result<Vec<Payment>, LedgerError> {
        let state = self.state.lock().await;
        let quote_ids = invoice.quote_ids();
        Ok(state
            .payments
            .iter()
            .filter(|p| match p.target {
                PaymentTarget::Invoice(id) => id == invoice.id,
                PaymentTarget::Devis(id) => quote_ids.contains(&id),
            })
            .cloned()
            .collect())
    }

    async fn payments_for_client(&self, client_id: Uuid) -> Result<Vec<Payment>, LedgerError> {
        let state = self.state.lock().await;
        Ok(state
            .payments
            .iter()
            .filter(|p| match p.target {
                PaymentTarget::Invoice(id) => state
                    .invoices
                    .get(&id)
                    .is_some_and(|i| i.client_id == client_id),
                PaymentTarget::Devis(id) => state
                    .quotes
                    .get(&id)
                    .is_some_and(|q| q.client_id == client_id),
            })
            .cloned()
            .collect())
    }

    async fn insert_expense(
        &self,
        new: NewExpense,
        ctx: RequestContext,
    ) -> Result<Expense, LedgerError> {
        let mut state = self.state.lock().await;
        let expense = Expense::create(new, &ctx, Utc::now())?;
        state.ensure_period_open(expense.date, expense.created_by_role)?;
        state.expenses.push(expense.clone());
        Ok(expense)
    }

    #[instrument(skip(self, update))]
    async fn update_expense(
        &self,
        id: Uuid,
        update: ExpenseUpdate,
        now: DateTime<Utc>,
    ) -> Result<Expense, LedgerError> {
        let mut state = self.state.lock().await;
        let idx = state
            .expenses
            .iter()
            .position(|e| e.id == id)
            .ok_or_else(|| LedgerError::not_found(format!("Expense {} not found", id)))?;
        let mut expense = state.expenses[idx].clone();
        state.ensure_period_open(expense.date, expense.created_by_role)?;
        expense.apply(update, now)?;
        state.ensure_period_open(expense.date, expense.created_by_role)?;
        state.expenses[idx] = expense.clone();
        Ok(expense)
    }

    #[instrument(skip(self))]
    async fn delete_expense(&self, id: Uuid) -> Result<Expense, LedgerError> {
        let mut state = self.state.lock().await;
        let idx = state
            .expenses
            .iter()
            .position(|e| e.id == id)
            .ok_or_else(|| LedgerError::not_found(format!("Expense {} not found", id)))?;
        let expense = &state.expenses[idx];
        state.ensure_period_open(expense.date, expense.created_by_role)?;
        Ok(state.expenses.remove(idx))
    }

    async fn list_expenses(&self) -> Result<Vec<Expense>, LedgerError> {
        let mut expenses = self.state.lock().await.expenses.clone();
        expenses.sort_by(|a, b| b.date.cmp(&a.date));
        Ok(expenses)
    }

    async fn period_totals(
        &self,
        scope: ClosureScope,
        now: DateTime<Utc>,
    ) -> Result<PeriodTotals, LedgerError> {
        let state = self.state.lock().await;
        let start = period_start(state.latest_closure(scope));
        period_totals(scope, start, now, &state.payments, &state.expenses)
    }

    #[instrument(skip(self, notes))]
    async fn close_period(
        &self,
        scope: ClosureScope,
        notes: Option<String>,
        closed_by: Uuid,
        now: DateTime<Utc>,
    ) -> Result<FinancialClosure, LedgerError> {
        let mut state = self.state.lock().await;
        let start = period_start(state.latest_closure(scope));
        if state
            .closures
            .iter()
            .any(|c| c.scope == scope && c.period_start == start)
        {
            return Err(LedgerError::conflict(format!(
                "A {} closure starting at {} already exists",
                scope, start
            )));
        }
        let totals = period_totals(scope, start, now, &state.payments, &state.expenses)?;
        let closure = FinancialClosure::close(&totals, notes, closed_by, now);
        state.closures.push(closure.clone());
        Ok(closure)
    }

    async fn list_closures(
        &self,
        scope: ClosureScope,
    ) -> Result<Vec<FinancialClosure>, LedgerError> {
        let state = self.state.lock().await;
        let mut closures: Vec<FinancialClosure> = state
            .closures
            .iter()
            .filter(|c| c.scope == scope)
            .cloned()
            .collect();
        closures.sort_by(|a, b| b.closure_date.cmp(&a.closure_date));
        Ok(closures)
    }

    async fn dashboard_stats(&self) -> Result<DashboardStats, LedgerError> {
        let state = self.state.lock().await;
        let mut by_status = DevisStatusCounts::default();
        for quote in state.quotes.values() {
            by_status.add(quote.status, 1);
        }
        let revenue = checked_sum(state.payments.iter().map(|p| p.amount))?;
        let expenses = checked_sum(state.expenses.iter().map(|e| e.amount))?;
        Ok(DashboardStats::new(
            state.clients.len() as u64,
            by_status,
            state.invoices.len() as u64,
            revenue,
            expenses,
        ))
    }
}

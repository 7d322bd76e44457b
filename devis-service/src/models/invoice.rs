//! Invoices: consolidation of validated quotes, or direct billing of ad-hoc items.

use super::error::{checked_mul, checked_sum, ensure_positive, LedgerError};
use super::quote::{Quote, QuoteStatus};
use chrono::{DateTime, Datelike, Utc};
use rust_decimal::{Decimal, RoundingStrategy};
use serde::{Deserialize, Serialize};
use std::collections::HashSet;
use uuid::Uuid;

/// Human-readable reference such as `FAC-2026-0003`.
pub fn invoice_reference(now: DateTime<Utc>, seq: i64) -> String {
    format!("FAC-{}-{:04}", now.year(), seq)
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum InvoiceStatus {
    Pending,
    Partial,
    Paid,
}

impl InvoiceStatus {
    /// Status is always derived from the payment set, never stored.
    pub fn derive(paid: Decimal, total: Decimal) -> Self {
        if paid <= Decimal::ZERO {
            Self::Pending
        } else if paid < total {
            Self::Partial
        } else {
            Self::Paid
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct InvoiceItem {
    pub id: Uuid,
    pub description: String,
    pub quantity: Decimal,
    pub unit_price: Decimal,
    pub total: Decimal,
}

impl InvoiceItem {
    pub fn new(
        description: String,
        quantity: Decimal,
        unit_price: Decimal,
    ) -> Result<Self, LedgerError> {
        if description.trim().is_empty() {
            return Err(LedgerError::validation("Item description is required"));
        }
        ensure_positive("quantity", quantity)?;
        ensure_positive("unit_price", unit_price)?;
        Ok(Self {
            id: Uuid::new_v4(),
            description,
            quantity,
            unit_price,
            total: checked_mul(quantity, unit_price)?,
        })
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "SCREAMING_SNAKE_CASE")]
pub enum InvoiceSource {
    Quotes { quote_ids: Vec<Uuid> },
    Items { items: Vec<InvoiceItem> },
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Invoice {
    pub id: Uuid,
    pub reference: String,
    pub client_id: Uuid,
    pub created_by: Uuid,
    pub total_amount: Decimal,
    pub source: InvoiceSource,
    pub created_utc: DateTime<Utc>,
}

/// Reject empty or repeated quote selections before anything is loaded.
pub fn check_quote_selection(quote_ids: &[Uuid]) -> Result<(), LedgerError> {
    if quote_ids.is_empty() {
        return Err(LedgerError::validation(
            "At least one quote is required to create an invoice",
        ));
    }
    let mut seen = HashSet::with_capacity(quote_ids.len());
    for id in quote_ids {
        if !seen.insert(id) {
            return Err(LedgerError::validation(format!(
                "Quote {} is selected more than once",
                id
            )));
        }
    }
    Ok(())
}

impl Invoice {
    /// Freeze validated quotes into one invoice.
    ///
    /// Every precondition is checked before any quote is touched, so either all
    /// quotes become INVOICED or none do.
    pub fn consolidate(
        reference: String,
        created_by: Uuid,
        quotes: &mut [Quote],
        now: DateTime<Utc>,
    ) -> Result<Self, LedgerError> {
        let ids: Vec<Uuid> = quotes.iter().map(|q| q.id).collect();
        check_quote_selection(&ids)?;

        let client_id = quotes[0].client_id;
        for quote in quotes.iter() {
            if quote.status != QuoteStatus::Validated {
                return Err(LedgerError::conflict(format!(
                    "Quote {} is {} and cannot be invoiced",
                    quote.reference, quote.status
                )));
            }
            if quote.client_id != client_id {
                return Err(LedgerError::validation(
                    "All quotes on an invoice must belong to the same client",
                ));
            }
        }

        let invoice = Self {
            id: Uuid::new_v4(),
            reference,
            client_id,
            created_by,
            total_amount: checked_sum(quotes.iter().map(|q| q.total_amount))?,
            source: InvoiceSource::Quotes { quote_ids: ids },
            created_utc: now,
        };

        for quote in quotes.iter_mut() {
            quote.mark_invoiced(invoice.id, now)?;
        }

        Ok(invoice)
    }

    /// Bill ad-hoc items without any quote linkage.
    pub fn direct(
        reference: String,
        client_id: Uuid,
        created_by: Uuid,
        items: Vec<InvoiceItem>,
        now: DateTime<Utc>,
    ) -> Result<Self, LedgerError> {
        if items.is_empty() {
            return Err(LedgerError::validation(
                "At least one item is required to create an invoice",
            ));
        }
        Ok(Self {
            id: Uuid::new_v4(),
            reference,
            client_id,
            created_by,
            total_amount: checked_sum(items.iter().map(|i| i.total))?,
            source: InvoiceSource::Items { items },
            created_utc: now,
        })
    }

    pub fn quote_ids(&self) -> &[Uuid] {
        match &self.source {
            InvoiceSource::Quotes { quote_ids } => quote_ids,
            InvoiceSource::Items { .. } => &[],
        }
    }

    pub fn stats(&self, paid: Decimal) -> PaymentStats {
        PaymentStats::new(self.total_amount, paid)
    }
}

/// Derived payment position of an invoice.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PaymentStats {
    pub total_amount: Decimal,
    pub total_paid: Decimal,
    pub remaining: Decimal,
    pub percent_paid: Decimal,
    pub is_paid: bool,
    pub status: InvoiceStatus,
}

impl PaymentStats {
    pub fn new(total: Decimal, paid: Decimal) -> Self {
        let remaining = (total - paid).max(Decimal::ZERO);
        let percent_paid = if total > Decimal::ZERO {
            (paid / total * Decimal::ONE_HUNDRED)
                .round_dp_with_strategy(2, RoundingStrategy::MidpointAwayFromZero)
        } else {
            Decimal::ZERO
        };
        let status = InvoiceStatus::derive(paid, total);
        Self {
            total_amount: total,
            total_paid: paid,
            remaining,
            percent_paid,
            is_paid: status == InvoiceStatus::Paid,
            status,
        }
    }
}

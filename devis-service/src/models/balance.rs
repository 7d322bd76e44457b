//! Client balance: read-side summary of a client's quotes and payments.

use super::invoice::Invoice;
use super::payment::{Payment, PaymentTarget};
use super::quote::{Quote, QuoteStatus};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use uuid::Uuid;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct QuoteBalance {
    pub quote_id: Uuid,
    pub reference: String,
    pub status: QuoteStatus,
    pub invoice_id: Option<Uuid>,
    pub total_amount: Decimal,
    pub paid_amount: Decimal,
    pub remaining: Decimal,
    pub is_fully_paid: bool,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ClientBalance {
    pub client_id: Uuid,
    pub quotes: Vec<QuoteBalance>,
    pub total_devis_amount: Decimal,
    pub total_paid: Decimal,
    pub outstanding_balance: Decimal,
    pub fully_paid_count: usize,
    pub pending_count: usize,
}

/// Share out each invoice's payments over its quotes in consolidation order,
/// each quote taking at most what it still owes.
fn allocate_invoice_payments(
    quotes: &HashMap<Uuid, &Quote>,
    direct_paid: &HashMap<Uuid, Decimal>,
    invoices: &[Invoice],
    invoice_paid: &HashMap<Uuid, Decimal>,
) -> HashMap<Uuid, Decimal> {
    let mut allocated = HashMap::new();
    for invoice in invoices {
        let mut pool = invoice_paid
            .get(&invoice.id)
            .copied()
            .unwrap_or(Decimal::ZERO);
        for quote_id in invoice.quote_ids() {
            if pool <= Decimal::ZERO {
                break;
            }
            let Some(quote) = quotes.get(quote_id) else {
                continue;
            };
            let owed = quote.total_amount
                - direct_paid.get(quote_id).copied().unwrap_or(Decimal::ZERO);
            let share = pool.min(owed.max(Decimal::ZERO));
            pool -= share;
            allocated.insert(*quote_id, share);
        }
    }
    allocated
}

/// Summarize a client's quotes. CANCELLED quotes are listed but excluded from
/// every total and count.
pub fn client_balance(
    client_id: Uuid,
    quotes: &[Quote],
    invoices: &[Invoice],
    payments: &[Payment],
) -> ClientBalance {
    let mut direct_paid: HashMap<Uuid, Decimal> = HashMap::new();
    let mut invoice_paid: HashMap<Uuid, Decimal> = HashMap::new();
    for payment in payments {
        let bucket = match payment.target {
            PaymentTarget::Devis(id) => direct_paid.entry(id),
            PaymentTarget::Invoice(id) => invoice_paid.entry(id),
        };
        *bucket.or_insert(Decimal::ZERO) += payment.amount;
    }

    let by_id: HashMap<Uuid, &Quote> = quotes.iter().map(|q| (q.id, q)).collect();
    let allocated = allocate_invoice_payments(&by_id, &direct_paid, invoices, &invoice_paid);

    let rows: Vec<QuoteBalance> = quotes
        .iter()
        .map(|quote| {
            let paid = direct_paid.get(&quote.id).copied().unwrap_or(Decimal::ZERO)
                + allocated.get(&quote.id).copied().unwrap_or(Decimal::ZERO);
            let remaining = quote.total_amount - paid;
            QuoteBalance {
                quote_id: quote.id,
                reference: quote.reference.clone(),
                status: quote.status,
                invoice_id: quote.invoice_id,
                total_amount: quote.total_amount,
                paid_amount: paid,
                remaining,
                is_fully_paid: remaining <= Decimal::ZERO,
            }
        })
        .collect();

    let counted = rows.iter().filter(|r| r.status != QuoteStatus::Cancelled);
    let mut total_devis_amount = Decimal::ZERO;
    let mut total_paid = Decimal::ZERO;
    let mut fully_paid_count = 0;
    let mut pending_count = 0;
    for row in counted {
        total_devis_amount += row.total_amount;
        total_paid += row.paid_amount;
        if row.is_fully_paid {
            fully_paid_count += 1;
        } else {
            pending_count += 1;
        }
    }

    ClientBalance {
        client_id,
        quotes: rows,
        total_devis_amount,
        total_paid,
        outstanding_balance: total_devis_amount - total_paid,
        fully_paid_count,
        pending_count,
    }
}

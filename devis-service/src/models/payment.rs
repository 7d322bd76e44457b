//! Payment ledger rules.
//!
//! Paid amounts are never cached: they are summed from the payment set each
//! time a balance or status is needed.

use super::context::{RequestContext, UserRole};
use super::error::{ensure_positive, LedgerError};
use super::invoice::Invoice;
use super::quote::{Quote, QuoteStatus};
use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;
use uuid::Uuid;

/// Exactly one of an invoice or a quote.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(tag = "kind", content = "id", rename_all = "SCREAMING_SNAKE_CASE")]
pub enum PaymentTarget {
    Invoice(Uuid),
    Devis(Uuid),
}

impl PaymentTarget {
    pub fn kind(&self) -> &'static str {
        match self {
            Self::Invoice(_) => "invoice",
            Self::Devis(_) => "devis",
        }
    }

    pub fn id(&self) -> Uuid {
        match self {
            Self::Invoice(id) | Self::Devis(id) => *id,
        }
    }
}

impl fmt::Display for PaymentTarget {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} {}", self.kind(), self.id())
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum PaymentMethod {
    Cash,
    Check,
    Transfer,
    Card,
}

impl PaymentMethod {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Cash => "CASH",
            Self::Check => "CHECK",
            Self::Transfer => "TRANSFER",
            Self::Card => "CARD",
        }
    }
}

impl FromStr for PaymentMethod {
    type Err = LedgerError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "CASH" => Ok(Self::Cash),
            "CHECK" => Ok(Self::Check),
            "TRANSFER" => Ok(Self::Transfer),
            "CARD" => Ok(Self::Card),
            other => Err(LedgerError::validation(format!(
                "Unknown payment method '{}'",
                other
            ))),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Payment {
    pub id: Uuid,
    pub target: PaymentTarget,
    pub amount: Decimal,
    pub payment_date: DateTime<Utc>,
    pub method: Option<PaymentMethod>,
    pub reference: Option<String>,
    pub notes: Option<String>,
    pub created_by: Uuid,
    pub created_by_role: UserRole,
    pub created_utc: DateTime<Utc>,
}

#[derive(Debug, Clone)]
pub struct NewPayment {
    pub target: PaymentTarget,
    pub amount: Decimal,
    pub payment_date: Option<DateTime<Utc>>,
    pub method: Option<PaymentMethod>,
    pub reference: Option<String>,
    pub notes: Option<String>,
}

impl NewPayment {
    pub fn new(target: PaymentTarget, amount: Decimal) -> Self {
        Self {
            target,
            amount,
            payment_date: None,
            method: None,
            reference: None,
            notes: None,
        }
    }

    pub fn dated(mut self, payment_date: DateTime<Utc>) -> Self {
        self.payment_date = Some(payment_date);
        self
    }

    pub fn method(mut self, method: PaymentMethod) -> Self {
        self.method = Some(method);
        self
    }
}

/// Sum of payment amounts.
pub fn total_paid<'a>(payments: impl IntoIterator<Item = &'a Payment>) -> Decimal {
    payments.into_iter().map(|p| p.amount).sum()
}

/// Money already applied to a quote, paid directly on it.
pub fn paid_toward_quote(quote_id: Uuid, payments: &[Payment]) -> Decimal {
    total_paid(
        payments
            .iter()
            .filter(|p| p.target == PaymentTarget::Devis(quote_id)),
    )
}

/// Money already applied to an invoice: its own payments plus payments made on
/// its quotes before they were invoiced.
pub fn paid_toward_invoice(invoice: &Invoice, payments: &[Payment]) -> Decimal {
    let quote_ids = invoice.quote_ids();
    total_paid(payments.iter().filter(|p| match p.target {
        PaymentTarget::Invoice(id) => id == invoice.id,
        PaymentTarget::Devis(id) => quote_ids.contains(&id),
    }))
}

/// Only validated quotes take direct payments: drafts are still moving and
/// invoiced quotes are paid through their invoice.
pub fn ensure_quote_payable(quote: &Quote) -> Result<(), LedgerError> {
    match quote.status {
        QuoteStatus::Validated => Ok(()),
        QuoteStatus::Invoiced => Err(LedgerError::conflict(format!(
            "Quote {} is invoiced; pay invoice {} instead",
            quote.reference,
            quote
                .invoice_id
                .map(|id| id.to_string())
                .unwrap_or_default()
        ))),
        other => Err(LedgerError::conflict(format!(
            "Quote {} is {} and cannot receive payments",
            quote.reference, other
        ))),
    }
}

/// Reject any amount above `total - already_paid`.
pub fn ensure_within_balance(
    requested: Decimal,
    total: Decimal,
    already_paid: Decimal,
) -> Result<(), LedgerError> {
    let remaining = (total - already_paid).max(Decimal::ZERO);
    if requested > remaining {
        return Err(LedgerError::Overpayment {
            requested,
            remaining,
        });
    }
    Ok(())
}

impl Payment {
    /// Build a payment after checking it fits in the target's outstanding balance.
    pub fn record(
        new: NewPayment,
        ctx: &RequestContext,
        target_total: Decimal,
        already_paid: Decimal,
        now: DateTime<Utc>,
    ) -> Result<Self, LedgerError> {
        ensure_positive("amount", new.amount)?;
        ensure_within_balance(new.amount, target_total, already_paid)?;
        Ok(Self {
            id: Uuid::new_v4(),
            target: new.target,
            amount: new.amount,
            payment_date: new.payment_date.unwrap_or(now),
            method: new.method,
            reference: new.reference,
            notes: new.notes,
            created_by: ctx.user_id,
            created_by_role: ctx.role,
            created_utc: now,
        })
    }

    /// Quote-level payments are part of the quote's history and stay put.
    pub fn ensure_deletable(&self) -> Result<(), LedgerError> {
        match self.target {
            PaymentTarget::Invoice(_) => Ok(()),
            PaymentTarget::Devis(_) => Err(LedgerError::conflict(
                "Only invoice payments can be deleted",
            )),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::invoice::InvoiceItem;

    fn d(s: &str) -> Decimal {
        s.parse().unwrap()
    }

    fn ctx() -> RequestContext {
        RequestContext::new(Uuid::new_v4(), UserRole::Employee)
    }

    fn invoice_of(total: &str) -> Invoice {
        Invoice::direct(
            "FAC-2026-0001".into(),
            Uuid::new_v4(),
            Uuid::new_v4(),
            vec![InvoiceItem::new("Gravure".into(), Decimal::ONE, d(total)).unwrap()],
            Utc::now(),
        )
        .unwrap()
    }

    #[test]
    fn partial_then_overpayment_leaves_set_unchanged() {
        let invoice = invoice_of("100");
        let target = PaymentTarget::Invoice(invoice.id);
        let mut payments = Vec::new();

        let paid = paid_toward_invoice(&invoice, &payments);
        payments.push(
            Payment::record(NewPayment::new(target, d("60")), &ctx(), invoice.total_amount, paid, Utc::now())
                .unwrap(),
        );

        let stats = invoice.stats(paid_toward_invoice(&invoice, &payments));
        assert_eq!(stats.status, crate::models::invoice::InvoiceStatus::Partial);
        assert_eq!(stats.remaining, d("40"));

        let paid = paid_toward_invoice(&invoice, &payments);
        let err = Payment::record(NewPayment::new(target, d("41")), &ctx(), invoice.total_amount, paid, Utc::now())
            .unwrap_err();

        match err {
            LedgerError::Overpayment {
                requested,
                remaining,
            } => {
                assert_eq!(requested, d("41"));
                assert_eq!(remaining, d("40"));
            }
            other => panic!("expected overpayment, got {:?}", other),
        }
        assert_eq!(paid_toward_invoice(&invoice, &payments), d("60"));
    }

    #[test]
    fn exact_remaining_amount_is_accepted() {
        assert!(ensure_within_balance(d("40"), d("100"), d("60")).is_ok());
        assert!(ensure_within_balance(d("40.01"), d("100"), d("60")).is_err());
    }

    #[test]
    fn non_positive_amount_is_a_validation_error() {
        let target = PaymentTarget::Devis(Uuid::new_v4());
        assert!(matches!(
            Payment::record(NewPayment::new(target, Decimal::ZERO), &ctx(), d("10"), Decimal::ZERO, Utc::now()),
            Err(LedgerError::Validation(_))
        ));
    }

    #[test]
    fn payment_date_defaults_to_now() {
        let now = Utc::now();
        let payment = Payment::record(
            NewPayment::new(PaymentTarget::Devis(Uuid::new_v4()), d("5")),
            &ctx(),
            d("10"),
            Decimal::ZERO,
            now,
        )
        .unwrap();
        assert_eq!(payment.payment_date, now);
        assert_eq!(payment.created_by_role, UserRole::Employee);
    }

    #[test]
    fn quote_payments_count_toward_their_invoice() {
        let quote_id = Uuid::new_v4();
        let mut invoice = invoice_of("100");
        invoice.source = crate::models::invoice::InvoiceSource::Quotes {
            quote_ids: vec![quote_id],
        };
        let payments = vec![
            Payment::record(
                NewPayment::new(PaymentTarget::Devis(quote_id), d("30")),
                &ctx(),
                d("100"),
                Decimal::ZERO,
                Utc::now(),
            )
            .unwrap(),
            Payment::record(
                NewPayment::new(PaymentTarget::Invoice(invoice.id), d("20")),
                &ctx(),
                d("100"),
                d("30"),
                Utc::now(),
            )
            .unwrap(),
        ];

        assert_eq!(paid_toward_invoice(&invoice, &payments), d("50"));
        assert_eq!(paid_toward_quote(quote_id, &payments), d("30"));
    }

    #[test]
    fn only_invoice_payments_are_deletable() {
        let on_quote = Payment::record(
            NewPayment::new(PaymentTarget::Devis(Uuid::new_v4()), d("5")),
            &ctx(),
            d("10"),
            Decimal::ZERO,
            Utc::now(),
        )
        .unwrap();
        assert!(matches!(
            on_quote.ensure_deletable(),
            Err(LedgerError::StateConflict(_))
        ));
    }

    #[test]
    fn target_serializes_with_kind_and_id() {
        let id = Uuid::nil();
        let json = serde_json::to_value(PaymentTarget::Invoice(id)).unwrap();
        assert_eq!(json["kind"], "INVOICE");
        assert_eq!(json["id"], id.to_string());
    }
}

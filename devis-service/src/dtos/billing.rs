use crate::models::{Invoice, NewPayment, PaymentMethod, PaymentStats, PaymentTarget};
use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use uuid::Uuid;
use validator::{Validate, ValidationError};

#[derive(Debug, Deserialize, Validate)]
pub struct CreateInvoiceFromDevisRequest {
    #[validate(length(min = 1, message = "At least one devis is required"))]
    pub devis_ids: Vec<Uuid>,
}

#[derive(Debug, Serialize, Deserialize, Validate)]
pub struct DirectInvoiceItemRequest {
    #[validate(length(min = 1, max = 500, message = "Item description is required"))]
    pub description: String,
    pub quantity: Decimal,
    pub unit_price: Decimal,
}

#[derive(Debug, Deserialize, Validate)]
pub struct CreateDirectInvoiceRequest {
    pub client_id: Uuid,

    #[validate(length(min = 1, message = "At least one item is required"), nested)]
    pub items: Vec<DirectInvoiceItemRequest>,
}

impl CreateDirectInvoiceRequest {
    pub fn item_tuples(self) -> Vec<(String, Decimal, Decimal)> {
        self.items
            .into_iter()
            .map(|i| (i.description, i.quantity, i.unit_price))
            .collect()
    }
}

/// Invoice with its derived payment state.
#[derive(Debug, Serialize)]
pub struct InvoiceResponse {
    #[serde(flatten)]
    pub invoice: Invoice,
    pub payment_stats: PaymentStats,
}

fn single_target(req: &CreatePaymentRequest) -> Result<(), ValidationError> {
    match (req.invoice_id, req.devis_id) {
        (Some(_), None) | (None, Some(_)) => Ok(()),
        _ => {
            let mut err = ValidationError::new("single_target");
            err.message = Some("Exactly one of invoice_id or devis_id is required".into());
            Err(err)
        }
    }
}

#[derive(Debug, Deserialize, Validate)]
#[validate(schema(function = "single_target"))]
pub struct CreatePaymentRequest {
    pub invoice_id: Option<Uuid>,
    pub devis_id: Option<Uuid>,
    pub amount: Decimal,
    pub payment_date: Option<DateTime<Utc>>,
    pub method: Option<PaymentMethod>,

    #[validate(length(max = 255))]
    pub reference: Option<String>,

    pub notes: Option<String>,
}

impl CreatePaymentRequest {
    /// `None` when the request does not name exactly one target.
    pub fn into_new_payment(self) -> Option<NewPayment> {
        let target = match (self.invoice_id, self.devis_id) {
            (Some(id), None) => PaymentTarget::Invoice(id),
            (None, Some(id)) => PaymentTarget::Devis(id),
            _ => return None,
        };
        Some(NewPayment {
            target,
            amount: self.amount,
            payment_date: self.payment_date,
            method: self.method,
            reference: self.reference,
            notes: self.notes,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn payment(invoice_id: Option<Uuid>, devis_id: Option<Uuid>) -> CreatePaymentRequest {
        CreatePaymentRequest {
            invoice_id,
            devis_id,
            amount: Decimal::new(100, 0),
            payment_date: None,
            method: Some(PaymentMethod::Cash),
            reference: None,
            notes: None,
        }
    }

    #[test]
    fn payment_needs_exactly_one_target() {
        assert!(payment(None, None).validate().is_err());
        assert!(payment(Some(Uuid::new_v4()), Some(Uuid::new_v4()))
            .validate()
            .is_err());
        assert!(payment(None, Some(Uuid::new_v4())).validate().is_ok());
    }

    #[test]
    fn devis_payment_targets_the_quote() {
        let devis_id = Uuid::new_v4();
        let new = payment(None, Some(devis_id)).into_new_payment().unwrap();
        assert_eq!(new.target, PaymentTarget::Devis(devis_id));
        assert_eq!(new.method, Some(PaymentMethod::Cash));
    }

    #[test]
    fn direct_invoice_needs_described_items() {
        let item = |description: &str| DirectInvoiceItemRequest {
            description: description.into(),
            quantity: Decimal::ONE,
            unit_price: Decimal::new(50, 0),
        };
        let request = |items| CreateDirectInvoiceRequest {
            client_id: Uuid::new_v4(),
            items,
        };

        assert!(request(vec![item("Plaque")]).validate().is_ok());
        assert!(request(vec![]).validate().is_err());
        assert!(request(vec![item("")]).validate().is_err());
    }

    #[test]
    fn invoice_response_flattens_the_invoice() {
        let invoice = Invoice::direct(
            "FAC-2026-0001".into(),
            Uuid::new_v4(),
            Uuid::new_v4(),
            vec![crate::models::InvoiceItem::new("Plaque".into(), Decimal::ONE, Decimal::new(50, 0)).unwrap()],
            Utc::now(),
        )
        .unwrap();
        let stats = invoice.stats(Decimal::ZERO);
        let json = serde_json::to_value(InvoiceResponse {
            invoice,
            payment_stats: stats,
        })
        .unwrap();
        assert_eq!(json["reference"], "FAC-2026-0001");
        assert_eq!(json["payment_stats"]["status"], "PENDING");
    }
}

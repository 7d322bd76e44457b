mod common;

use common::{dec, employee, Workshop};
use devis_service::models::{LedgerError, LineInput, NewPayment, PaymentTarget, Quote, QuoteStatus};
use rust_decimal::Decimal;
use uuid::Uuid;

async fn quote_with_minutes(shop: &Workshop, minutes: &str) -> Quote {
    let quote = shop
        .ledger
        .create_quote(&employee(), shop.client_id, None)
        .await
        .unwrap();
    shop.ledger
        .add_line(
            quote.id,
            LineInput::Cnc {
                minutes: dec(minutes),
                dimensions: None,
                material_id: None,
            },
            None,
        )
        .await
        .unwrap()
}

#[tokio::test]
async fn new_client_has_a_zero_balance() {
    let shop = Workshop::open().await;
    let balance = shop.ledger.get_client_balance(shop.client_id).await.unwrap();

    assert!(balance.quotes.is_empty());
    assert_eq!(balance.total_devis_amount, Decimal::ZERO);
    assert_eq!(balance.outstanding_balance, Decimal::ZERO);
    assert_eq!(balance.pending_count, 0);
}

#[tokio::test]
async fn cancelled_quotes_are_listed_but_not_counted() {
    let shop = Workshop::open().await;
    let kept = quote_with_minutes(&shop, "50").await;
    let dropped = quote_with_minutes(&shop, "10").await;
    shop.ledger.cancel_quote(dropped.id).await.unwrap();

    let balance = shop.ledger.get_client_balance(shop.client_id).await.unwrap();

    assert_eq!(balance.quotes.len(), 2);
    assert_eq!(balance.total_devis_amount, dec("100"));
    assert_eq!(balance.outstanding_balance, dec("100"));
    assert_eq!(balance.pending_count, 1);
    let row = balance
        .quotes
        .iter()
        .find(|r| r.quote_id == dropped.id)
        .expect("cancelled quote is still listed");
    assert_eq!(row.status, QuoteStatus::Cancelled);
    assert!(balance.quotes.iter().any(|r| r.quote_id == kept.id));
}

#[tokio::test]
async fn invoice_payments_are_shared_over_quotes_in_order() {
    let shop = Workshop::open().await;
    let ctx = employee();
    let first = quote_with_minutes(&shop, "50").await;
    let second = quote_with_minutes(&shop, "20").await;
    shop.ledger.validate_quote(first.id).await.unwrap();
    shop.ledger.validate_quote(second.id).await.unwrap();

    shop.ledger
        .apply_payment(&ctx, NewPayment::new(PaymentTarget::Devis(first.id), dec("30")))
        .await
        .unwrap();
    let invoice = shop
        .ledger
        .create_invoice_from_quotes(&ctx, &[first.id, second.id])
        .await
        .unwrap();
    shop.ledger
        .apply_payment(
            &ctx,
            NewPayment::new(PaymentTarget::Invoice(invoice.id), dec("90")),
        )
        .await
        .unwrap();

    let balance = shop.ledger.get_client_balance(shop.client_id).await.unwrap();

    let row = |id: Uuid| {
        balance
            .quotes
            .iter()
            .find(|r| r.quote_id == id)
            .expect("quote listed")
    };
    assert_eq!(row(first.id).paid_amount, dec("100"));
    assert!(row(first.id).is_fully_paid);
    assert_eq!(row(second.id).paid_amount, dec("20"));
    assert_eq!(row(second.id).remaining, dec("20"));
    assert_eq!(row(second.id).invoice_id, Some(invoice.id));

    assert_eq!(balance.total_devis_amount, dec("140"));
    assert_eq!(balance.total_paid, dec("120"));
    assert_eq!(balance.outstanding_balance, dec("20"));
    assert_eq!(balance.fully_paid_count, 1);
    assert_eq!(balance.pending_count, 1);
}

#[tokio::test]
async fn unknown_client_balance_is_not_found() {
    let shop = Workshop::open().await;
    let err = shop
        .ledger
        .get_client_balance(Uuid::new_v4())
        .await
        .unwrap_err();
    assert!(matches!(err, LedgerError::NotFound(_)));
}

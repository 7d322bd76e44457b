mod common;

use chrono::{Duration, Utc};
use common::{admin, dec, employee, Workshop};
use devis_service::models::{
    ClosureScope, ExpenseCategory, ExpenseUpdate, Invoice, LedgerError, NewExpense, NewPayment,
    PaymentTarget, RequestContext,
};
use rust_decimal::Decimal;

async fn direct_invoice(shop: &Workshop, amount: &str) -> Invoice {
    shop.ledger
        .create_direct_invoice(
            &admin(),
            shop.client_id,
            vec![("Panneau grave".into(), dec("1"), dec(amount))],
        )
        .await
        .expect("Failed to create invoice")
}

async fn pay_earlier(shop: &Workshop, ctx: &RequestContext, invoice: &Invoice, amount: &str) {
    shop.ledger
        .apply_payment(
            ctx,
            NewPayment::new(PaymentTarget::Invoice(invoice.id), dec(amount))
                .dated(Utc::now() - Duration::minutes(5)),
        )
        .await
        .expect("Failed to apply payment");
}

fn expense(amount: &str) -> NewExpense {
    NewExpense {
        category: ExpenseCategory::Material,
        amount: dec(amount),
        date: Some(Utc::now() - Duration::minutes(5)),
        description: "Plaques alu".into(),
        notes: None,
    }
}

#[tokio::test]
async fn closing_the_register_freezes_the_period() {
    let shop = Workshop::open().await;
    let boss = admin();
    let invoice = direct_invoice(&shop, "500").await;
    pay_earlier(&shop, &boss, &invoice, "500").await;
    shop.ledger
        .create_expense(&boss, expense("120"))
        .await
        .unwrap();

    let open = shop
        .ledger
        .period_stats(ClosureScope::AdminLevel)
        .await
        .unwrap();
    assert_eq!(open.total_income, dec("500"));
    assert_eq!(open.total_expense, dec("120"));
    assert_eq!(open.balance, dec("380"));

    let closure = shop
        .ledger
        .close_period(&boss, ClosureScope::AdminLevel, Some("Fin de mois".into()))
        .await
        .unwrap();
    assert_eq!(closure.total_income, dec("500"));
    assert_eq!(closure.total_expense, dec("120"));
    assert_eq!(closure.balance, dec("380"));
    assert_eq!(closure.closed_by, boss.user_id);

    let next = shop
        .ledger
        .period_stats(ClosureScope::AdminLevel)
        .await
        .unwrap();
    assert_eq!(next.period_start, closure.closure_date);
    assert_eq!(next.total_income, Decimal::ZERO);
    assert_eq!(next.balance, Decimal::ZERO);
}

#[tokio::test]
async fn closures_chain_without_gaps() {
    let shop = Workshop::open().await;
    let boss = admin();

    let first = shop
        .ledger
        .close_period(&boss, ClosureScope::AdminLevel, None)
        .await
        .unwrap();
    let second = shop
        .ledger
        .close_period(&boss, ClosureScope::AdminLevel, None)
        .await
        .unwrap();

    assert_eq!(second.period_start, first.closure_date);
    assert!(second.closure_date >= second.period_start);

    let listed = shop
        .ledger
        .list_closures(ClosureScope::AdminLevel)
        .await
        .unwrap();
    assert_eq!(listed.len(), 2);
    assert_eq!(listed[0].id, second.id, "newest closure first");

    let other_scope = shop
        .ledger
        .list_closures(ClosureScope::EmployeeLevel)
        .await
        .unwrap();
    assert!(other_scope.is_empty());
}

#[tokio::test]
async fn payment_dated_inside_a_closed_period_is_rejected() {
    let shop = Workshop::open().await;
    let boss = admin();
    let invoice = direct_invoice(&shop, "500").await;
    pay_earlier(&shop, &boss, &invoice, "100").await;
    let closure = shop
        .ledger
        .close_period(&boss, ClosureScope::AdminLevel, None)
        .await
        .unwrap();

    let err = shop
        .ledger
        .apply_payment(
            &boss,
            NewPayment::new(PaymentTarget::Invoice(invoice.id), dec("50"))
                .dated(closure.closure_date - Duration::days(1)),
        )
        .await
        .unwrap_err();
    assert!(matches!(err, LedgerError::StateConflict(_)));

    // Undated payments are stamped after the closure and land in the open period.
    shop.ledger
        .apply_payment(
            &boss,
            NewPayment::new(PaymentTarget::Invoice(invoice.id), dec("50")),
        )
        .await
        .unwrap();

    let listed = shop
        .ledger
        .list_closures(ClosureScope::AdminLevel)
        .await
        .unwrap();
    assert_eq!(listed, vec![closure]);

    let open = shop
        .ledger
        .period_stats(ClosureScope::AdminLevel)
        .await
        .unwrap();
    assert_eq!(open.total_income, dec("50"));

    let stats = shop.ledger.invoice_payment_stats(invoice.id).await.unwrap();
    assert_eq!(stats.total_paid, dec("150"));
}

#[tokio::test]
async fn employee_closure_only_locks_employee_entries() {
    let shop = Workshop::open().await;
    let boss = admin();
    let clerk = employee();
    let invoice = direct_invoice(&shop, "500").await;
    shop.ledger
        .close_period(&boss, ClosureScope::EmployeeLevel, None)
        .await
        .unwrap();

    let backdated = || {
        NewPayment::new(PaymentTarget::Invoice(invoice.id), dec("40"))
            .dated(Utc::now() - Duration::minutes(5))
    };
    let err = shop
        .ledger
        .apply_payment(&clerk, backdated())
        .await
        .unwrap_err();
    assert!(matches!(err, LedgerError::StateConflict(_)));

    // The admin register is still open, and it is the only one counting admin entries.
    shop.ledger.apply_payment(&boss, backdated()).await.unwrap();
    let admin_totals = shop
        .ledger
        .period_stats(ClosureScope::AdminLevel)
        .await
        .unwrap();
    assert_eq!(admin_totals.total_income, dec("40"));
}

#[tokio::test]
async fn closed_expenses_are_frozen() {
    let shop = Workshop::open().await;
    let boss = admin();
    let closed = shop
        .ledger
        .create_expense(&boss, expense("120"))
        .await
        .unwrap();
    let closure = shop
        .ledger
        .close_period(&boss, ClosureScope::AdminLevel, None)
        .await
        .unwrap();

    let err = shop
        .ledger
        .create_expense(&boss, expense("30"))
        .await
        .unwrap_err();
    assert!(matches!(err, LedgerError::StateConflict(_)));

    let err = shop
        .ledger
        .update_expense(
            closed.id,
            ExpenseUpdate {
                amount: Some(dec("90")),
                ..Default::default()
            },
        )
        .await
        .unwrap_err();
    assert!(matches!(err, LedgerError::StateConflict(_)));

    let err = shop.ledger.delete_expense(closed.id).await.unwrap_err();
    assert!(matches!(err, LedgerError::StateConflict(_)));

    // An open expense cannot be moved back into the closed period either.
    let open = shop
        .ledger
        .create_expense(
            &boss,
            NewExpense {
                date: None,
                ..expense("45")
            },
        )
        .await
        .unwrap();
    let err = shop
        .ledger
        .update_expense(
            open.id,
            ExpenseUpdate {
                date: Some(closure.closure_date - Duration::minutes(1)),
                ..Default::default()
            },
        )
        .await
        .unwrap_err();
    assert!(matches!(err, LedgerError::StateConflict(_)));

    let totals = shop
        .ledger
        .period_stats(ClosureScope::AdminLevel)
        .await
        .unwrap();
    assert_eq!(totals.total_expense, dec("45"));
    assert_eq!(shop.ledger.list_expenses().await.unwrap().len(), 2);
}

#[tokio::test]
async fn employee_register_only_sees_employee_entries() {
    let shop = Workshop::open().await;
    let boss = admin();
    let clerk = employee();
    let invoice = direct_invoice(&shop, "500").await;
    pay_earlier(&shop, &boss, &invoice, "200").await;
    pay_earlier(&shop, &clerk, &invoice, "80").await;
    pay_earlier(&shop, &clerk, &invoice, "20").await;

    let employee_totals = shop
        .ledger
        .period_stats(ClosureScope::EmployeeLevel)
        .await
        .unwrap();
    assert_eq!(employee_totals.total_income, dec("100"));
    assert_eq!(employee_totals.payment_count, 2);
    assert_eq!(employee_totals.revenue_by_employee.len(), 1);
    assert_eq!(employee_totals.revenue_by_employee[0].user_id, clerk.user_id);
    assert_eq!(employee_totals.revenue_by_employee[0].total_amount, dec("100"));

    let admin_totals = shop
        .ledger
        .period_stats(ClosureScope::AdminLevel)
        .await
        .unwrap();
    assert_eq!(admin_totals.total_income, dec("300"));

    // Closing one scope leaves the other open.
    shop.ledger
        .close_period(&boss, ClosureScope::EmployeeLevel, None)
        .await
        .unwrap();
    let admin_totals = shop
        .ledger
        .period_stats(ClosureScope::AdminLevel)
        .await
        .unwrap();
    assert_eq!(admin_totals.total_income, dec("300"));
}

#[tokio::test]
async fn expenses_can_be_corrected_and_removed() {
    let shop = Workshop::open().await;
    let boss = admin();
    let created = shop
        .ledger
        .create_expense(&boss, expense("120"))
        .await
        .unwrap();

    let updated = shop
        .ledger
        .update_expense(
            created.id,
            ExpenseUpdate {
                amount: Some(dec("90")),
                category: Some(ExpenseCategory::Utilities),
                ..Default::default()
            },
        )
        .await
        .unwrap();
    assert_eq!(updated.amount, dec("90"));
    assert_eq!(updated.category, ExpenseCategory::Utilities);
    assert_eq!(updated.description, "Plaques alu");

    let err = shop
        .ledger
        .update_expense(
            created.id,
            ExpenseUpdate {
                amount: Some(dec("-1")),
                ..Default::default()
            },
        )
        .await
        .unwrap_err();
    assert!(matches!(err, LedgerError::Validation(_)));

    let listed = shop.ledger.list_expenses().await.unwrap();
    assert_eq!(listed.len(), 1);
    assert_eq!(listed[0].amount, dec("90"));

    shop.ledger.delete_expense(created.id).await.unwrap();
    assert!(shop.ledger.list_expenses().await.unwrap().is_empty());
}

#[tokio::test]
async fn dashboard_sums_revenue_and_expenses() {
    let shop = Workshop::open().await;
    let boss = admin();
    let invoice = direct_invoice(&shop, "500").await;
    pay_earlier(&shop, &boss, &invoice, "500").await;
    shop.ledger
        .create_expense(&boss, expense("120"))
        .await
        .unwrap();

    let stats = shop.ledger.dashboard_stats().await.unwrap();
    assert_eq!(stats.total_clients, 1);
    assert_eq!(stats.total_invoices, 1);
    assert_eq!(stats.total_revenue, dec("500"));
    assert_eq!(stats.total_expenses, dec("120"));
    assert_eq!(stats.net_profit, dec("380"));
}

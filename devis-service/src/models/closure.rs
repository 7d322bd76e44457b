//! Cash-register (caisse) periods and their immutable closures.

use super::context::UserRole;
use super::error::{checked_add, checked_sum, LedgerError};
use super::expense::Expense;
use super::payment::Payment;
use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fmt;
use std::str::FromStr;
use uuid::Uuid;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum ClosureScope {
    #[default]
    AdminLevel,
    EmployeeLevel,
}

impl ClosureScope {
    pub const ALL: [ClosureScope; 2] = [Self::AdminLevel, Self::EmployeeLevel];

    pub fn as_str(&self) -> &'static str {
        match self {
            Self::AdminLevel => "ADMIN_LEVEL",
            Self::EmployeeLevel => "EMPLOYEE_LEVEL",
        }
    }

    /// The admin register sees everything; the employee register only what
    /// employees recorded.
    pub fn includes(&self, recorded_by: UserRole) -> bool {
        match self {
            Self::AdminLevel => true,
            Self::EmployeeLevel => recorded_by == UserRole::Employee,
        }
    }
}

impl FromStr for ClosureScope {
    type Err = LedgerError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "ADMIN_LEVEL" => Ok(Self::AdminLevel),
            "EMPLOYEE_LEVEL" => Ok(Self::EmployeeLevel),
            other => Err(LedgerError::validation(format!(
                "Unknown closure scope '{}'",
                other
            ))),
        }
    }
}

impl fmt::Display for ClosureScope {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct EmployeeRevenue {
    pub user_id: Uuid,
    pub payment_count: usize,
    pub total_amount: Decimal,
}

/// Running totals of an accounting window `[period_start, period_end)`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PeriodTotals {
    pub scope: ClosureScope,
    pub period_start: DateTime<Utc>,
    pub period_end: DateTime<Utc>,
    pub total_income: Decimal,
    pub total_expense: Decimal,
    pub balance: Decimal,
    pub payment_count: usize,
    pub expense_count: usize,
    pub revenue_by_employee: Vec<EmployeeRevenue>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FinancialClosure {
    pub id: Uuid,
    pub scope: ClosureScope,
    pub period_start: DateTime<Utc>,
    pub closure_date: DateTime<Utc>,
    pub total_income: Decimal,
    pub total_expense: Decimal,
    pub balance: Decimal,
    pub notes: Option<String>,
    pub closed_by: Uuid,
    pub created_utc: DateTime<Utc>,
}

/// The open period starts where the latest closure of the scope ended.
pub fn period_start(latest: Option<&FinancialClosure>) -> DateTime<Utc> {
    latest
        .map(|c| c.closure_date)
        .unwrap_or(DateTime::UNIX_EPOCH)
}

/// Fail when `at` falls inside a period already closed by a register that
/// counts entries recorded by `recorded_by`. `latest` holds the latest closure
/// of each scope.
pub fn ensure_period_open<'a>(
    at: DateTime<Utc>,
    recorded_by: UserRole,
    latest: impl IntoIterator<Item = &'a FinancialClosure>,
) -> Result<(), LedgerError> {
    for closure in latest {
        if closure.scope.includes(recorded_by) && at < closure.closure_date {
            return Err(LedgerError::conflict(format!(
                "The {} register is closed up to {}; entries dated {} cannot change",
                closure.scope, closure.closure_date, at
            )));
        }
    }
    Ok(())
}

fn in_window(at: DateTime<Utc>, start: DateTime<Utc>, end: DateTime<Utc>) -> bool {
    at >= start && at < end
}

pub fn period_totals(
    scope: ClosureScope,
    start: DateTime<Utc>,
    end: DateTime<Utc>,
    payments: &[Payment],
    expenses: &[Expense],
) -> Result<PeriodTotals, LedgerError> {
    if end < start {
        return Err(LedgerError::conflict(format!(
            "Period end {} precedes period start {}",
            end, start
        )));
    }

    let payments: Vec<&Payment> = payments
        .iter()
        .filter(|p| scope.includes(p.created_by_role) && in_window(p.payment_date, start, end))
        .collect();
    let expenses: Vec<&Expense> = expenses
        .iter()
        .filter(|e| scope.includes(e.created_by_role) && in_window(e.date, start, end))
        .collect();

    let total_income = checked_sum(payments.iter().map(|p| p.amount))?;
    let total_expense = checked_sum(expenses.iter().map(|e| e.amount))?;

    let mut by_employee: BTreeMap<Uuid, (usize, Decimal)> = BTreeMap::new();
    for payment in payments
        .iter()
        .filter(|p| p.created_by_role == UserRole::Employee)
    {
        let entry = by_employee
            .entry(payment.created_by)
            .or_insert((0, Decimal::ZERO));
        entry.0 += 1;
        entry.1 = checked_add(entry.1, payment.amount)?;
    }

    Ok(PeriodTotals {
        scope,
        period_start: start,
        period_end: end,
        total_income,
        total_expense,
        balance: total_income - total_expense,
        payment_count: payments.len(),
        expense_count: expenses.len(),
        revenue_by_employee: by_employee
            .into_iter()
            .map(|(user_id, (payment_count, total_amount))| EmployeeRevenue {
                user_id,
                payment_count,
                total_amount,
            })
            .collect(),
    })
}

impl FinancialClosure {
    pub fn close(
        totals: &PeriodTotals,
        notes: Option<String>,
        closed_by: Uuid,
        now: DateTime<Utc>,
    ) -> Self {
        Self {
            id: Uuid::new_v4(),
            scope: totals.scope,
            period_start: totals.period_start,
            closure_date: totals.period_end,
            total_income: totals.total_income,
            total_expense: totals.total_expense,
            balance: totals.balance,
            notes,
            closed_by,
            created_utc: now,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::context::RequestContext;
    use crate::models::expense::{ExpenseCategory, NewExpense};
    use crate::models::payment::{NewPayment, PaymentTarget};
    use chrono::Duration;

    fn d(s: &str) -> Decimal {
        s.parse().unwrap()
    }

    fn payment(amount: &str, at: DateTime<Utc>, ctx: &RequestContext) -> Payment {
        Payment::record(
            NewPayment::new(PaymentTarget::Devis(Uuid::new_v4()), d(amount)).dated(at),
            ctx,
            d("100000"),
            Decimal::ZERO,
            at,
        )
        .unwrap()
    }

    fn expense(amount: &str, at: DateTime<Utc>, ctx: &RequestContext) -> Expense {
        Expense::create(
            NewExpense {
                category: ExpenseCategory::Material,
                amount: d(amount),
                date: Some(at),
                description: "Plaques".into(),
                notes: None,
            },
            ctx,
            at,
        )
        .unwrap()
    }

    #[test]
    fn closure_balance_and_chaining() {
        let admin = RequestContext::new(Uuid::new_v4(), UserRole::Admin);
        let now = Utc::now();
        let earlier = now - Duration::hours(2);
        let payments = vec![
            payment("300", earlier, &admin),
            payment("200", earlier, &admin),
        ];
        let expenses = vec![expense("120", earlier, &admin)];

        let start = period_start(None);
        let totals =
            period_totals(ClosureScope::AdminLevel, start, now, &payments, &expenses).unwrap();
        let first = FinancialClosure::close(&totals, None, admin.user_id, now);

        assert_eq!(first.total_income, d("500"));
        assert_eq!(first.total_expense, d("120"));
        assert_eq!(first.balance, d("380"));
        assert_eq!(period_start(Some(&first)), first.closure_date);

        let later = now + Duration::minutes(5);
        let next = period_totals(
            ClosureScope::AdminLevel,
            period_start(Some(&first)),
            later,
            &payments,
            &expenses,
        )
        .unwrap();
        assert_eq!(next.period_start, first.closure_date);
        assert_eq!(next.total_income, Decimal::ZERO);
    }

    #[test]
    fn window_is_half_open() {
        let ctx = RequestContext::new(Uuid::new_v4(), UserRole::Admin);
        let start = Utc::now() - Duration::days(1);
        let end = Utc::now();
        let payments = vec![payment("10", start, &ctx), payment("99", end, &ctx)];

        let totals = period_totals(ClosureScope::AdminLevel, start, end, &payments, &[]).unwrap();

        assert_eq!(totals.total_income, d("10"));
    }

    #[test]
    fn employee_scope_only_counts_employee_entries() {
        let admin = RequestContext::new(Uuid::new_v4(), UserRole::Admin);
        let employee = RequestContext::new(Uuid::new_v4(), UserRole::Employee);
        let at = Utc::now() - Duration::minutes(1);
        let payments = vec![
            payment("50", at, &admin),
            payment("20", at, &employee),
            payment("5", at, &employee),
        ];
        let expenses = vec![expense("8", at, &employee), expense("70", at, &admin)];

        let employee_totals = period_totals(
            ClosureScope::EmployeeLevel,
            DateTime::UNIX_EPOCH,
            Utc::now(),
            &payments,
            &expenses,
        )
        .unwrap();
        let admin_totals = period_totals(
            ClosureScope::AdminLevel,
            DateTime::UNIX_EPOCH,
            Utc::now(),
            &payments,
            &expenses,
        )
        .unwrap();

        assert_eq!(employee_totals.total_income, d("25"));
        assert_eq!(employee_totals.total_expense, d("8"));
        assert_eq!(employee_totals.balance, d("17"));
        assert_eq!(admin_totals.total_income, d("75"));
        assert_eq!(admin_totals.balance, d("-3"));

        assert_eq!(admin_totals.revenue_by_employee.len(), 1);
        assert_eq!(admin_totals.revenue_by_employee[0].user_id, employee.user_id);
        assert_eq!(admin_totals.revenue_by_employee[0].payment_count, 2);
        assert_eq!(admin_totals.revenue_by_employee[0].total_amount, d("25"));
    }

    #[test]
    fn closed_periods_refuse_new_dates() {
        let admin = RequestContext::new(Uuid::new_v4(), UserRole::Admin);
        let now = Utc::now();
        let totals = period_totals(ClosureScope::EmployeeLevel, DateTime::UNIX_EPOCH, now, &[], &[])
            .unwrap();
        let employee_closure = FinancialClosure::close(&totals, None, admin.user_id, now);
        let earlier = now - Duration::minutes(1);

        let err = ensure_period_open(earlier, UserRole::Employee, [&employee_closure]).unwrap_err();
        assert!(matches!(err, LedgerError::StateConflict(_)));

        // The employee register never counts admin entries.
        assert!(ensure_period_open(earlier, UserRole::Admin, [&employee_closure]).is_ok());
        // The closure date itself opens the next period.
        assert!(ensure_period_open(now, UserRole::Employee, [&employee_closure]).is_ok());
        assert!(ensure_period_open(earlier, UserRole::Employee, std::iter::empty()).is_ok());
    }

    #[test]
    fn end_before_start_is_a_conflict() {
        let now = Utc::now();
        assert!(matches!(
            period_totals(ClosureScope::AdminLevel, now, now - Duration::seconds(1), &[], &[]),
            Err(LedgerError::StateConflict(_))
        ));
    }
}

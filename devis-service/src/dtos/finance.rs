use crate::models::{ClosureScope, ExpenseCategory, ExpenseUpdate, NewExpense};
use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use serde::Deserialize;
use validator::Validate;

#[derive(Debug, Deserialize, Validate)]
pub struct CreateExpenseRequest {
    pub category: ExpenseCategory,
    pub amount: Decimal,
    pub date: Option<DateTime<Utc>>,

    #[validate(length(min = 1, max = 500, message = "Description is required"))]
    pub description: String,

    pub notes: Option<String>,
}

impl From<CreateExpenseRequest> for NewExpense {
    fn from(req: CreateExpenseRequest) -> Self {
        Self {
            category: req.category,
            amount: req.amount,
            date: req.date,
            description: req.description,
            notes: req.notes,
        }
    }
}

#[derive(Debug, Deserialize, Validate)]
pub struct UpdateExpenseRequest {
    pub category: Option<ExpenseCategory>,
    pub amount: Option<Decimal>,
    pub date: Option<DateTime<Utc>>,

    #[validate(length(min = 1, max = 500))]
    pub description: Option<String>,

    pub notes: Option<String>,
}

impl From<UpdateExpenseRequest> for ExpenseUpdate {
    fn from(req: UpdateExpenseRequest) -> Self {
        Self {
            category: req.category,
            amount: req.amount,
            date: req.date,
            description: req.description,
            notes: req.notes,
        }
    }
}

/// `?scope=ADMIN_LEVEL|EMPLOYEE_LEVEL`, admin level when omitted.
#[derive(Debug, Deserialize)]
pub struct ScopeParams {
    #[serde(default)]
    pub scope: ClosureScope,
}

#[derive(Debug, Deserialize, Validate)]
pub struct CloseRegisterRequest {
    #[serde(default)]
    pub scope: ClosureScope,

    #[validate(length(max = 2000))]
    pub notes: Option<String>,
}

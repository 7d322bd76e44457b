//! Expense model for devis-service.

use super::context::{RequestContext, UserRole};
use super::error::{ensure_positive, LedgerError};
use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use std::str::FromStr;
use uuid::Uuid;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum ExpenseCategory {
    Material,
    Equipment,
    Utilities,
    Salary,
    Rent,
    Other,
}

impl ExpenseCategory {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Material => "MATERIAL",
            Self::Equipment => "EQUIPMENT",
            Self::Utilities => "UTILITIES",
            Self::Salary => "SALARY",
            Self::Rent => "RENT",
            Self::Other => "OTHER",
        }
    }
}

impl FromStr for ExpenseCategory {
    type Err = LedgerError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "MATERIAL" => Ok(Self::Material),
            "EQUIPMENT" => Ok(Self::Equipment),
            "UTILITIES" => Ok(Self::Utilities),
            "SALARY" => Ok(Self::Salary),
            "RENT" => Ok(Self::Rent),
            "OTHER" => Ok(Self::Other),
            other => Err(LedgerError::validation(format!(
                "Unknown expense category '{}'",
                other
            ))),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Expense {
    pub id: Uuid,
    pub category: ExpenseCategory,
    pub amount: Decimal,
    pub date: DateTime<Utc>,
    pub description: String,
    pub notes: Option<String>,
    pub created_by: Uuid,
    pub created_by_role: UserRole,
    pub created_utc: DateTime<Utc>,
    pub updated_utc: DateTime<Utc>,
}

#[derive(Debug, Clone)]
pub struct NewExpense {
    pub category: ExpenseCategory,
    pub amount: Decimal,
    pub date: Option<DateTime<Utc>>,
    pub description: String,
    pub notes: Option<String>,
}

#[derive(Debug, Clone, Default)]
pub struct ExpenseUpdate {
    pub category: Option<ExpenseCategory>,
    pub amount: Option<Decimal>,
    pub date: Option<DateTime<Utc>>,
    pub description: Option<String>,
    pub notes: Option<String>,
}

fn ensure_description(description: &str) -> Result<(), LedgerError> {
    if description.trim().is_empty() {
        return Err(LedgerError::validation("Expense description is required"));
    }
    Ok(())
}

impl Expense {
    pub fn create(
        new: NewExpense,
        ctx: &RequestContext,
        now: DateTime<Utc>,
    ) -> Result<Self, LedgerError> {
        ensure_positive("amount", new.amount)?;
        ensure_description(&new.description)?;
        Ok(Self {
            id: Uuid::new_v4(),
            category: new.category,
            amount: new.amount,
            date: new.date.unwrap_or(now),
            description: new.description,
            notes: new.notes,
            created_by: ctx.user_id,
            created_by_role: ctx.role,
            created_utc: now,
            updated_utc: now,
        })
    }

    /// Apply a partial update. Nothing changes if any field is invalid.
    pub fn apply(&mut self, update: ExpenseUpdate, now: DateTime<Utc>) -> Result<(), LedgerError> {
        if let Some(amount) = update.amount {
            ensure_positive("amount", amount)?;
        }
        if let Some(description) = &update.description {
            ensure_description(description)?;
        }

        if let Some(category) = update.category {
            self.category = category;
        }
        if let Some(amount) = update.amount {
            self.amount = amount;
        }
        if let Some(date) = update.date {
            self.date = date;
        }
        if let Some(description) = update.description {
            self.description = description;
        }
        if update.notes.is_some() {
            self.notes = update.notes;
        }
        self.updated_utc = now;
        Ok(())
    }
}

//! Ledger error taxonomy.

use rust_decimal::Decimal;
use service_core::error::AppError;
use thiserror::Error;

/// Every rejection guards a monetary invariant, so none of these are ever
/// downgraded to warnings.
#[derive(Debug, Error)]
pub enum LedgerError {
    #[error("{0}")]
    Validation(String),

    #[error("{0}")]
    StateConflict(String),

    #[error("Payment of {requested} exceeds the remaining balance of {remaining}")]
    Overpayment {
        requested: Decimal,
        remaining: Decimal,
    },

    #[error("{0}")]
    NotFound(String),

    #[error("Storage failure: {0}")]
    Storage(anyhow::Error),
}

impl LedgerError {
    pub fn validation(msg: impl Into<String>) -> Self {
        Self::Validation(msg.into())
    }

    pub fn conflict(msg: impl Into<String>) -> Self {
        Self::StateConflict(msg.into())
    }

    pub fn not_found(msg: impl Into<String>) -> Self {
        Self::NotFound(msg.into())
    }

    /// Label used for the error counter.
    pub fn kind(&self) -> &'static str {
        match self {
            Self::Validation(_) => "validation",
            Self::StateConflict(_) => "state_conflict",
            Self::Overpayment { .. } => "overpayment",
            Self::NotFound(_) => "not_found",
            Self::Storage(_) => "storage",
        }
    }
}

impl From<LedgerError> for AppError {
    fn from(err: LedgerError) -> Self {
        match err {
            LedgerError::Validation(msg) => AppError::BadRequest(anyhow::anyhow!(msg)),
            LedgerError::StateConflict(msg) => AppError::Conflict(anyhow::anyhow!(msg)),
            e @ LedgerError::Overpayment { .. } => {
                AppError::UnprocessableEntity(anyhow::anyhow!(e.to_string()))
            }
            LedgerError::NotFound(msg) => AppError::NotFound(anyhow::anyhow!(msg)),
            LedgerError::Storage(e) => AppError::DatabaseError(e),
        }
    }
}

/// Fail with a validation error unless `value` is strictly positive.
pub fn ensure_positive(field: &str, value: Decimal) -> Result<(), LedgerError> {
    if value > Decimal::ZERO {
        Ok(())
    } else {
        Err(LedgerError::Validation(format!(
            "{} must be greater than zero",
            field
        )))
    }
}

fn out_of_range() -> LedgerError {
    LedgerError::validation("amount out of range")
}

/// `a * b`, or a validation error when the product does not fit a decimal.
pub fn checked_mul(a: Decimal, b: Decimal) -> Result<Decimal, LedgerError> {
    a.checked_mul(b).ok_or_else(out_of_range)
}

pub fn checked_add(a: Decimal, b: Decimal) -> Result<Decimal, LedgerError> {
    a.checked_add(b).ok_or_else(out_of_range)
}

/// Sum of `amounts`, failing instead of overflowing.
pub fn checked_sum<I>(amounts: I) -> Result<Decimal, LedgerError>
where
    I: IntoIterator<Item = Decimal>,
{
    amounts
        .into_iter()
        .try_fold(Decimal::ZERO, checked_add)
}

#[cfg(test)]
mod tests {
    use super::*;
    use axum::http::StatusCode;
    use axum::response::IntoResponse;

    #[test]
    fn overpayment_reports_both_amounts() {
        let err = LedgerError::Overpayment {
            requested: Decimal::new(41, 0),
            remaining: Decimal::new(40, 0),
        };
        assert_eq!(
            err.to_string(),
            "Payment of 41 exceeds the remaining balance of 40"
        );
    }

    #[test]
    fn errors_map_to_http_statuses() {
        let cases = [
            (LedgerError::validation("bad"), StatusCode::BAD_REQUEST),
            (LedgerError::conflict("draft only"), StatusCode::CONFLICT),
            (LedgerError::not_found("missing"), StatusCode::NOT_FOUND),
            (
                LedgerError::Overpayment {
                    requested: Decimal::ONE,
                    remaining: Decimal::ZERO,
                },
                StatusCode::UNPROCESSABLE_ENTITY,
            ),
            (
                LedgerError::Storage(anyhow::anyhow!("down")),
                StatusCode::INTERNAL_SERVER_ERROR,
            ),
        ];

        for (err, status) in cases {
            let response = AppError::from(err).into_response();
            assert_eq!(response.status(), status);
        }
    }

    #[test]
    fn zero_is_not_positive() {
        assert!(ensure_positive("amount", Decimal::ZERO).is_err());
        assert!(ensure_positive("amount", Decimal::new(-1, 0)).is_err());
        assert!(ensure_positive("amount", Decimal::new(1, 2)).is_ok());
    }

    #[test]
    fn overflowing_amounts_are_validation_errors() {
        assert!(matches!(
            checked_mul(Decimal::MAX, Decimal::TWO),
            Err(LedgerError::Validation(msg)) if msg == "amount out of range"
        ));
        assert!(matches!(
            checked_sum([Decimal::MAX, Decimal::ONE]),
            Err(LedgerError::Validation(_))
        ));
        assert_eq!(
            checked_sum([Decimal::ONE, Decimal::TWO]).unwrap(),
            Decimal::new(3, 0)
        );
    }
}

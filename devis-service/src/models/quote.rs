//! Quote (devis) aggregate and its status state machine.

use super::catalog::{FixedService, MachineType};
use super::error::{checked_add, checked_sum, LedgerError};
use super::pricing::{LineInput, ResolvedPrice};
use chrono::{DateTime, Datelike, Utc};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;
use uuid::Uuid;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum QuoteStatus {
    Draft,
    Validated,
    Invoiced,
    Cancelled,
}

impl QuoteStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Draft => "DRAFT",
            Self::Validated => "VALIDATED",
            Self::Invoiced => "INVOICED",
            Self::Cancelled => "CANCELLED",
        }
    }

    /// Permitted edges: DRAFT -> VALIDATED -> INVOICED, DRAFT | VALIDATED -> CANCELLED.
    pub fn can_become(self, next: QuoteStatus) -> bool {
        matches!(
            (self, next),
            (Self::Draft, Self::Validated)
                | (Self::Validated, Self::Invoiced)
                | (Self::Draft, Self::Cancelled)
                | (Self::Validated, Self::Cancelled)
        )
    }
}

impl FromStr for QuoteStatus {
    type Err = LedgerError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "DRAFT" => Ok(Self::Draft),
            "VALIDATED" => Ok(Self::Validated),
            "INVOICED" => Ok(Self::Invoiced),
            "CANCELLED" => Ok(Self::Cancelled),
            other => Err(LedgerError::validation(format!(
                "Unknown quote status '{}'",
                other
            ))),
        }
    }
}

impl fmt::Display for QuoteStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Human-readable reference such as `DEV-2026-0007`.
pub fn quote_reference(now: DateTime<Utc>, seq: i64) -> String {
    format!("DEV-{}-{:04}", now.year(), seq)
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DevisLine {
    pub id: Uuid,
    pub machine_type: MachineType,
    pub description: Option<String>,
    pub input: LineInput,
    pub material_id: Option<Uuid>,
    pub unit_price: Decimal,
    pub material_cost: Decimal,
    pub line_total: Decimal,
    pub created_utc: DateTime<Utc>,
}

impl DevisLine {
    /// Snapshot a resolved price into a new line.
    pub fn priced(
        input: LineInput,
        description: Option<String>,
        price: ResolvedPrice,
        now: DateTime<Utc>,
    ) -> Self {
        Self {
            id: Uuid::new_v4(),
            machine_type: input.machine_type(),
            description,
            material_id: input.material_ref(),
            input,
            unit_price: price.unit_price,
            material_cost: price.material_cost,
            line_total: price.line_total,
            created_utc: now,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DevisServiceItem {
    pub id: Uuid,
    pub service_id: Uuid,
    pub name: String,
    pub price: Decimal,
}

impl DevisServiceItem {
    pub fn snapshot(service: &FixedService) -> Self {
        Self {
            id: Uuid::new_v4(),
            service_id: service.id,
            name: service.name.clone(),
            price: service.price,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Quote {
    pub id: Uuid,
    pub reference: String,
    pub status: QuoteStatus,
    pub client_id: Uuid,
    pub created_by: Uuid,
    pub notes: Option<String>,
    pub lines: Vec<DevisLine>,
    pub services: Vec<DevisServiceItem>,
    pub total_amount: Decimal,
    pub invoice_id: Option<Uuid>,
    pub created_utc: DateTime<Utc>,
    pub updated_utc: DateTime<Utc>,
    pub validated_utc: Option<DateTime<Utc>>,
}

impl Quote {
    pub fn new(
        reference: String,
        client_id: Uuid,
        created_by: Uuid,
        notes: Option<String>,
        now: DateTime<Utc>,
    ) -> Self {
        Self {
            id: Uuid::new_v4(),
            reference,
            status: QuoteStatus::Draft,
            client_id,
            created_by,
            notes,
            lines: Vec::new(),
            services: Vec::new(),
            total_amount: Decimal::ZERO,
            invoice_id: None,
            created_utc: now,
            updated_utc: now,
            validated_utc: None,
        }
    }

    /// Σ line totals + Σ service prices.
    pub fn computed_total(&self) -> Result<Decimal, LedgerError> {
        let lines = checked_sum(self.lines.iter().map(|l| l.line_total))?;
        let services = checked_sum(self.services.iter().map(|s| s.price))?;
        checked_add(lines, services)
    }

    pub fn is_empty(&self) -> bool {
        self.lines.is_empty() && self.services.is_empty()
    }

    /// True when a line or service item points at the given catalog entry.
    pub fn references_catalog_item(&self, id: Uuid) -> bool {
        self.lines
            .iter()
            .any(|l| l.input.material_ref() == Some(id) || l.input.service_ref() == Some(id))
            || self.services.iter().any(|s| s.service_id == id)
    }

    fn ensure_draft(&self, action: &str) -> Result<(), LedgerError> {
        if self.status == QuoteStatus::Draft {
            Ok(())
        } else {
            Err(LedgerError::conflict(format!(
                "Cannot {} quote {}: status is {}",
                action, self.reference, self.status
            )))
        }
    }

    fn transition(&mut self, next: QuoteStatus, now: DateTime<Utc>) -> Result<(), LedgerError> {
        if !self.status.can_become(next) {
            return Err(LedgerError::conflict(format!(
                "Quote {} cannot move from {} to {}",
                self.reference, self.status, next
            )));
        }
        self.status = next;
        self.updated_utc = now;
        Ok(())
    }

    fn recompute(&mut self, now: DateTime<Utc>) -> Result<(), LedgerError> {
        self.total_amount = self.computed_total()?;
        self.updated_utc = now;
        Ok(())
    }

    pub fn add_line(&mut self, line: DevisLine, now: DateTime<Utc>) -> Result<(), LedgerError> {
        self.ensure_draft("add a line to")?;
        self.lines.push(line);
        self.recompute(now)
    }

    pub fn remove_line(
        &mut self,
        line_id: Uuid,
        now: DateTime<Utc>,
    ) -> Result<DevisLine, LedgerError> {
        self.ensure_draft("remove a line from")?;
        let idx = self
            .lines
            .iter()
            .position(|l| l.id == line_id)
            .ok_or_else(|| LedgerError::not_found(format!("Line {} not found", line_id)))?;
        let line = self.lines.remove(idx);
        self.recompute(now)?;
        Ok(line)
    }

    pub fn add_service(
        &mut self,
        item: DevisServiceItem,
        now: DateTime<Utc>,
    ) -> Result<(), LedgerError> {
        self.ensure_draft("add a service to")?;
        self.services.push(item);
        self.recompute(now)
    }

    pub fn remove_service(
        &mut self,
        item_id: Uuid,
        now: DateTime<Utc>,
    ) -> Result<DevisServiceItem, LedgerError> {
        self.ensure_draft("remove a service from")?;
        let idx = self
            .services
            .iter()
            .position(|s| s.id == item_id)
            .ok_or_else(|| LedgerError::not_found(format!("Service item {} not found", item_id)))?;
        let item = self.services.remove(idx);
        self.recompute(now)?;
        Ok(item)
    }

    pub fn validate(&mut self, now: DateTime<Utc>) -> Result<(), LedgerError> {
        self.ensure_draft("validate")?;
        if self.is_empty() {
            return Err(LedgerError::conflict(format!(
                "Cannot validate quote {}: it has no lines or services",
                self.reference
            )));
        }
        self.transition(QuoteStatus::Validated, now)?;
        self.validated_utc = Some(now);
        Ok(())
    }

    pub fn cancel(&mut self, now: DateTime<Utc>) -> Result<(), LedgerError> {
        self.transition(QuoteStatus::Cancelled, now)
    }

    /// Only invoice consolidation drives this edge.
    pub(crate) fn mark_invoiced(
        &mut self,
        invoice_id: Uuid,
        now: DateTime<Utc>,
    ) -> Result<(), LedgerError> {
        self.transition(QuoteStatus::Invoiced, now)?;
        self.invoice_id = Some(invoice_id);
        Ok(())
    }

    /// Invoiced quotes are permanent financial history.
    pub fn ensure_deletable(&self) -> Result<(), LedgerError> {
        if self.status == QuoteStatus::Invoiced {
            return Err(LedgerError::conflict(format!(
                "Quote {} is invoiced and cannot be deleted",
                self.reference
            )));
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::pricing::MaintenanceMode;
    use std::str::FromStr;

    fn d(s: &str) -> Decimal {
        Decimal::from_str(s).unwrap()
    }

    fn draft() -> Quote {
        Quote::new(
            quote_reference(Utc::now(), 1),
            Uuid::new_v4(),
            Uuid::new_v4(),
            None,
            Utc::now(),
        )
    }

    fn line(total: &str) -> DevisLine {
        let input = LineInput::ServiceMaintenance {
            mode: MaintenanceMode::Manual {
                unit_price: d(total),
            },
        };
        DevisLine::priced(
            input,
            None,
            ResolvedPrice {
                unit_price: d(total),
                material_cost: Decimal::ZERO,
                line_total: d(total),
            },
            Utc::now(),
        )
    }

    fn service(price: &str) -> DevisServiceItem {
        DevisServiceItem {
            id: Uuid::new_v4(),
            service_id: Uuid::new_v4(),
            name: "Pose".into(),
            price: d(price),
        }
    }

    #[test]
    fn reference_is_year_and_padded_sequence() {
        let now = DateTime::parse_from_rfc3339("2026-03-01T10:00:00Z")
            .unwrap()
            .with_timezone(&Utc);
        assert_eq!(quote_reference(now, 7), "DEV-2026-0007");
    }

    #[test]
    fn line_and_service_total_then_validate_locks_the_quote() {
        let mut quote = draft();
        quote.add_line(line("60.0"), Utc::now()).unwrap();
        quote.add_service(service("15.0"), Utc::now()).unwrap();

        assert_eq!(quote.total_amount, d("75.0"));

        quote.validate(Utc::now()).unwrap();
        assert_eq!(quote.status, QuoteStatus::Validated);
        assert!(quote.validated_utc.is_some());

        let err = quote.add_line(line("10"), Utc::now()).unwrap_err();
        assert!(matches!(err, LedgerError::StateConflict(_)));
        assert_eq!(quote.total_amount, d("75.0"));
    }

    #[test]
    fn total_tracks_every_mutation() {
        let mut quote = draft();
        let first = line("12.5");
        let first_id = first.id;
        quote.add_line(first, Utc::now()).unwrap();
        quote.add_line(line("7.5"), Utc::now()).unwrap();
        let svc = service("30");
        let svc_id = svc.id;
        quote.add_service(svc, Utc::now()).unwrap();
        assert_eq!(quote.total_amount, quote.computed_total().unwrap());
        assert_eq!(quote.total_amount, d("50"));

        quote.remove_line(first_id, Utc::now()).unwrap();
        assert_eq!(quote.total_amount, d("37.5"));

        quote.remove_service(svc_id, Utc::now()).unwrap();
        assert_eq!(quote.total_amount, d("7.5"));
        assert_eq!(quote.total_amount, quote.computed_total().unwrap());
    }

    #[test]
    fn total_that_overflows_is_rejected() {
        let mut quote = draft();
        quote.add_line(line("79228162514264337593543950335"), Utc::now()).unwrap();

        let err = quote.add_service(service("1"), Utc::now()).unwrap_err();
        assert!(matches!(err, LedgerError::Validation(msg) if msg == "amount out of range"));
    }

    #[test]
    fn same_service_twice_is_removed_individually() {
        let mut quote = draft();
        let a = service("20");
        let mut b = a.clone();
        b.id = Uuid::new_v4();
        let a_id = a.id;
        quote.add_service(a, Utc::now()).unwrap();
        quote.add_service(b, Utc::now()).unwrap();

        quote.remove_service(a_id, Utc::now()).unwrap();

        assert_eq!(quote.services.len(), 1);
        assert_eq!(quote.total_amount, d("20"));
    }

    #[test]
    fn removing_unknown_line_is_not_found() {
        let mut quote = draft();
        assert!(matches!(
            quote.remove_line(Uuid::new_v4(), Utc::now()),
            Err(LedgerError::NotFound(_))
        ));
    }

    #[test]
    fn empty_quote_cannot_be_validated() {
        let mut quote = draft();
        assert!(matches!(
            quote.validate(Utc::now()),
            Err(LedgerError::StateConflict(_))
        ));
        assert_eq!(quote.status, QuoteStatus::Draft);
    }

    #[test]
    fn only_permitted_edges_are_accepted() {
        use QuoteStatus::*;
        let all = [Draft, Validated, Invoiced, Cancelled];
        let allowed = [
            (Draft, Validated),
            (Validated, Invoiced),
            (Draft, Cancelled),
            (Validated, Cancelled),
        ];
        for from in all {
            for to in all {
                assert_eq!(from.can_become(to), allowed.contains(&(from, to)));
            }
        }
    }

    #[test]
    fn cancel_and_invoice_are_terminal() {
        let mut cancelled = draft();
        cancelled.cancel(Utc::now()).unwrap();
        assert!(cancelled.cancel(Utc::now()).is_err());
        assert!(cancelled.validate(Utc::now()).is_err());

        let mut invoiced = draft();
        invoiced.add_line(line("5"), Utc::now()).unwrap();
        invoiced.validate(Utc::now()).unwrap();
        let invoice_id = Uuid::new_v4();
        invoiced.mark_invoiced(invoice_id, Utc::now()).unwrap();

        assert_eq!(invoiced.invoice_id, Some(invoice_id));
        assert!(matches!(
            invoiced.cancel(Utc::now()),
            Err(LedgerError::StateConflict(_))
        ));
        assert!(invoiced.ensure_deletable().is_err());
    }

    #[test]
    fn draft_cannot_be_invoiced() {
        let mut quote = draft();
        quote.add_line(line("5"), Utc::now()).unwrap();
        assert!(quote.mark_invoiced(Uuid::new_v4(), Utc::now()).is_err());
        assert!(quote.invoice_id.is_none());
    }
}

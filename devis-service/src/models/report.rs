//! Dashboard statistics.

use super::quote::QuoteStatus;
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct DevisStatusCounts {
    pub draft: u64,
    pub validated: u64,
    pub invoiced: u64,
    pub cancelled: u64,
}

impl DevisStatusCounts {
    pub fn add(&mut self, status: QuoteStatus, count: u64) {
        match status {
            QuoteStatus::Draft => self.draft += count,
            QuoteStatus::Validated => self.validated += count,
            QuoteStatus::Invoiced => self.invoiced += count,
            QuoteStatus::Cancelled => self.cancelled += count,
        }
    }

    pub fn total(&self) -> u64 {
        self.draft + self.validated + self.invoiced + self.cancelled
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DashboardStats {
    pub total_clients: u64,
    pub total_devis: u64,
    pub devis_by_status: DevisStatusCounts,
    pub total_invoices: u64,
    pub total_revenue: Decimal,
    pub total_expenses: Decimal,
    pub net_profit: Decimal,
}

impl DashboardStats {
    pub fn new(
        total_clients: u64,
        devis_by_status: DevisStatusCounts,
        total_invoices: u64,
        total_revenue: Decimal,
        total_expenses: Decimal,
    ) -> Self {
        Self {
            total_clients,
            total_devis: devis_by_status.total(),
            devis_by_status,
            total_invoices,
            total_revenue,
            total_expenses,
            net_profit: total_revenue - total_expenses,
        }
    }
}

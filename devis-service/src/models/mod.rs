//! Domain models for devis-service.
//!
//! Everything here is pure: no I/O, no clock. Stores load aggregates, call
//! these rules, and persist the result.

pub mod balance;
pub mod catalog;
pub mod closure;
pub mod context;
pub mod error;
pub mod expense;
pub mod invoice;
pub mod payment;
pub mod pricing;
pub mod quote;
pub mod report;

pub use balance::{client_balance, ClientBalance, QuoteBalance};
pub use catalog::{
    CatalogSnapshot, Client, FixedService, MachinePricing, MachineType, Material, NewClient,
    PriceCatalog,
};
pub use closure::{ClosureScope, EmployeeRevenue, FinancialClosure, PeriodTotals};
pub use context::{RequestContext, UserRole};
pub use error::LedgerError;
pub use expense::{Expense, ExpenseCategory, ExpenseUpdate, NewExpense};
pub use invoice::{Invoice, InvoiceItem, InvoiceSource, InvoiceStatus, PaymentStats};
pub use payment::{NewPayment, Payment, PaymentMethod, PaymentTarget};
pub use pricing::{resolve, DimensionUnit, Dimensions, LineInput, MaintenanceMode, ResolvedPrice};
pub use quote::{DevisLine, DevisServiceItem, Quote, QuoteStatus};
pub use report::{DashboardStats, DevisStatusCounts};

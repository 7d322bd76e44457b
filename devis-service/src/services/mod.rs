//! Services module for devis-service.

pub mod database;
pub mod ledger;
pub mod memory;
pub mod metrics;
pub mod store;

pub use database::Database;
pub use ledger::LedgerService;
pub use memory::MemoryStore;
pub use metrics::{get_metrics, init_metrics};
pub use store::{LedgerStore, QuoteMutation};

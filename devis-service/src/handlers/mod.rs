pub mod billing;
pub mod catalog;
pub mod devis;
pub mod finance;
pub mod health;

pub use health::{health_check, metrics_handler, readiness_check};

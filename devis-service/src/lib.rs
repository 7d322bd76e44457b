//! Devis Service - Quote, invoice, payment and cash-register ledger for an
//! engraving workshop.

pub mod config;
pub mod dtos;
pub mod handlers;
pub mod middleware;
pub mod models;
pub mod services;
pub mod startup;

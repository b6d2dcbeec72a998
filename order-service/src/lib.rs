//! order-service: multi-brand order settlement with vouchers and payment invoices.

pub mod config;
pub mod dtos;
pub mod handlers;
pub mod middleware;
pub mod models;
pub mod services;
pub mod settlement;
pub mod startup;

pub use startup::{build_router, AppState, Application};

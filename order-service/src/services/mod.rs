pub mod database;
pub mod invoice_client;
pub mod memory;
pub mod metrics;
pub mod reconciler;

pub use database::Database;
pub use invoice_client::XenditClient;
pub use memory::{FailPoint, InMemoryStore, MockInvoiceGateway};
pub use reconciler::{InvoiceReconciler, ReconcileReport};

//! Order settlement pipeline: catalog and voucher resolution, assembly into
//! per-brand details, pricing, and the two-transaction coordinator.

pub mod assembler;
pub mod catalog;
pub mod coordinator;
pub mod errors;
pub mod gateways;
pub mod invoice;
pub mod pricing;
pub mod voucher;

#[cfg(test)]
pub(crate) mod test_support;

pub use coordinator::{Settlement, SettlementCoordinator, SettlementRequest};
pub use errors::{SettlementError, SettlementFailure, SettlementStage};
pub use gateways::{CatalogGateway, InvoiceGateway, OrderStore, OrderTransaction, VoucherGateway};
pub use invoice::{InvoiceRef, InvoiceRequest, InvoiceSettings};
pub use voucher::{Discount, DiscountValue};

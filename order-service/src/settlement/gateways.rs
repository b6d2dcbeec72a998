//! Collaborator seams of the settlement pipeline.
//!
//! Postgres implementations live in `services::database`, in-memory ones in
//! `services::memory`.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use service_core::error::AppError;
use uuid::Uuid;

use crate::models::{
    InvoiceRetry, ListOrdersFilter, NewInvoiceDetail, NewOrder, NewOrderDetail, Order, OrderStatus,
    Variant, Voucher,
};
use crate::settlement::invoice::{InvoiceRef, InvoiceRequest};

#[async_trait]
pub trait CatalogGateway: Send + Sync {
    async fn get_variant(&self, variant_id: Uuid) -> Result<Option<Variant>, AppError>;
}

#[async_trait]
pub trait VoucherGateway: Send + Sync {
    /// Voucher that is active and valid at `now`, if any.
    async fn get_active_voucher(
        &self,
        voucher_id: Uuid,
        now: DateTime<Utc>,
    ) -> Result<Option<Voucher>, AppError>;
}

/// Order persistence outside a transaction.
#[async_trait]
pub trait OrderStore: Send + Sync {
    async fn begin(&self) -> Result<Box<dyn OrderTransaction>, AppError>;

    /// Order with nested details and lines.
    async fn get_order(&self, order_id: Uuid) -> Result<Option<Order>, AppError>;

    /// Orders of one user, newest first, without nested details.
    async fn list_orders(
        &self,
        user_id: Uuid,
        filter: &ListOrdersFilter,
    ) -> Result<Vec<Order>, AppError>;

    /// Writes `status` to the order and all of its details. Returns false when
    /// the order does not exist.
    async fn update_status(&self, order_id: Uuid, status: OrderStatus) -> Result<bool, AppError>;

    async fn record_invoice_issued(
        &self,
        order_id: Uuid,
        invoice: &InvoiceRef,
    ) -> Result<(), AppError>;

    async fn record_invoice_failed(&self, order_id: Uuid, error: &str) -> Result<(), AppError>;

    /// Orders awaiting payment whose invoice is pending or failed, created
    /// before `created_before` and due at `now`. Least recently scheduled first.
    async fn list_invoice_retries(
        &self,
        created_before: DateTime<Utc>,
        now: DateTime<Utc>,
        limit: i64,
    ) -> Result<Vec<InvoiceRetry>, AppError>;

    /// Counts one more failed attempt and holds the order back until
    /// `next_attempt_utc`.
    async fn defer_invoice_retry(
        &self,
        order_id: Uuid,
        error: &str,
        next_attempt_utc: DateTime<Utc>,
    ) -> Result<(), AppError>;

    /// Takes the order out of background retries. Manual issuance still works.
    async fn abandon_invoice(&self, order_id: Uuid, error: &str) -> Result<(), AppError>;

    async fn health_check(&self) -> Result<(), AppError>;
}

/// One open unit of work. Dropping it without `commit` discards every write.
#[async_trait]
pub trait OrderTransaction: Send {
    async fn insert_order(&mut self, order: &NewOrder) -> Result<(), AppError>;

    async fn insert_order_detail(&mut self, detail: &NewOrderDetail) -> Result<(), AppError>;

    async fn insert_invoice_detail(&mut self, line: &NewInvoiceDetail) -> Result<(), AppError>;

    /// Locks the order row for the rest of the transaction and returns it with
    /// nested details and lines.
    async fn lock_order(&mut self, order_id: Uuid) -> Result<Option<Order>, AppError>;

    async fn set_detail_totals(
        &mut self,
        order_detail_id: Uuid,
        subtotal: i64,
        total: i64,
        voucher_id: Option<Uuid>,
    ) -> Result<(), AppError>;

    async fn set_order_totals(
        &mut self,
        order_id: Uuid,
        subtotal: i64,
        total: i64,
        voucher_id: Option<Uuid>,
        priced_utc: DateTime<Utc>,
    ) -> Result<(), AppError>;

    /// Takes one unit of voucher stock. False when none is left.
    async fn consume_voucher(&mut self, voucher_id: Uuid) -> Result<bool, AppError>;

    async fn commit(self: Box<Self>) -> Result<(), AppError>;

    async fn rollback(self: Box<Self>) -> Result<(), AppError>;
}

/// External payment-invoice provider.
#[async_trait]
pub trait InvoiceGateway: Send + Sync {
    async fn generate_invoice(&self, request: &InvoiceRequest) -> anyhow::Result<InvoiceRef>;
}

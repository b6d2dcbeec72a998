//! In-memory gateways for tests and local runs without Postgres.
//!
//! A transaction takes the store lock for its whole lifetime and works on a
//! copy of the state, which replaces the shared state only on commit.

use std::collections::HashMap;
use std::sync::Arc;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use service_core::error::AppError;
use tokio::sync::{Mutex, OwnedMutexGuard};
use uuid::Uuid;

use crate::models::{
    InvoiceDetail, InvoiceRetry, InvoiceStatus, ListOrdersFilter, NewInvoiceDetail, NewOrder,
    NewOrderDetail, Order, OrderDetail, OrderStatus, Variant, Voucher,
};
use crate::settlement::gateways::{
    CatalogGateway, InvoiceGateway, OrderStore, OrderTransaction, VoucherGateway,
};
use crate::settlement::invoice::{InvoiceRef, InvoiceRequest};

/// Operation that fails once, the next time it runs.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FailPoint {
    InsertOrder,
    InsertOrderDetail,
    InsertInvoiceDetail,
    SetDetailTotals,
    SetOrderTotals,
    ConsumeVoucher,
    Commit,
}

#[derive(Debug, Clone, Default)]
struct State {
    orders: HashMap<Uuid, Order>,
    details: HashMap<Uuid, OrderDetail>,
    lines: HashMap<Uuid, InvoiceDetail>,
    variants: HashMap<Uuid, Variant>,
    vouchers: HashMap<Uuid, Voucher>,
}

impl State {
    fn nested_order(&self, order_id: Uuid) -> Option<Order> {
        let mut order = self.orders.get(&order_id)?.clone();

        let mut details: Vec<OrderDetail> = self
            .details
            .values()
            .filter(|detail| detail.order_id == order_id)
            .cloned()
            .collect();
        details.sort_by_key(|detail| detail.sort_order);

        for detail in &mut details {
            let mut lines: Vec<InvoiceDetail> = self
                .lines
                .values()
                .filter(|line| line.order_detail_id == detail.order_detail_id)
                .cloned()
                .collect();
            lines.sort_by_key(|line| line.sort_order);
            detail.invoice_details = lines;
        }

        order.order_details = details;
        Some(order)
    }
}

#[derive(Clone, Default)]
pub struct InMemoryStore {
    state: Arc<Mutex<State>>,
    fail_points: Arc<std::sync::Mutex<Vec<FailPoint>>>,
}

impl InMemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub async fn add_variant(&self, variant: Variant) {
        self.state
            .lock()
            .await
            .variants
            .insert(variant.variant_id, variant);
    }

    pub async fn add_voucher(&self, voucher: Voucher) {
        self.state
            .lock()
            .await
            .vouchers
            .insert(voucher.voucher_id, voucher);
    }

    pub async fn voucher_stock(&self, voucher_id: Uuid) -> Option<i32> {
        self.state
            .lock()
            .await
            .vouchers
            .get(&voucher_id)
            .map(|voucher| voucher.stock)
    }

    /// Orders, details and lines stored, counted together.
    pub async fn row_count(&self) -> usize {
        let state = self.state.lock().await;
        state.orders.len() + state.details.len() + state.lines.len()
    }

    /// Every order with nested details, oldest first.
    pub async fn all_orders(&self) -> Vec<Order> {
        let state = self.state.lock().await;
        let mut orders: Vec<Order> = state
            .orders
            .keys()
            .filter_map(|order_id| state.nested_order(*order_id))
            .collect();
        orders.sort_by_key(|order| order.created_utc);
        orders
    }

    /// Moves an order's creation time, for reconciler age checks.
    pub async fn backdate_order(&self, order_id: Uuid, created_utc: DateTime<Utc>) {
        if let Some(order) = self.state.lock().await.orders.get_mut(&order_id) {
            order.created_utc = created_utc;
        }
    }

    pub fn fail_at(&self, point: FailPoint) {
        if let Ok(mut points) = self.fail_points.lock() {
            points.push(point);
        }
    }
}

fn trip(
    fail_points: &std::sync::Mutex<Vec<FailPoint>>,
    point: FailPoint,
) -> Result<(), AppError> {
    let mut points = fail_points
        .lock()
        .map_err(|e| AppError::InternalError(anyhow::anyhow!("Fail point mutex poisoned: {}", e)))?;

    match points.iter().position(|p| *p == point) {
        Some(index) => {
            points.remove(index);
            Err(AppError::DatabaseError(anyhow::anyhow!(
                "injected failure at {:?}",
                point
            )))
        }
        None => Ok(()),
    }
}

#[async_trait]
impl CatalogGateway for InMemoryStore {
    async fn get_variant(&self, variant_id: Uuid) -> Result<Option<Variant>, AppError> {
        Ok(self.state.lock().await.variants.get(&variant_id).cloned())
    }
}

#[async_trait]
impl VoucherGateway for InMemoryStore {
    async fn get_active_voucher(
        &self,
        voucher_id: Uuid,
        now: DateTime<Utc>,
    ) -> Result<Option<Voucher>, AppError> {
        Ok(self
            .state
            .lock()
            .await
            .vouchers
            .get(&voucher_id)
            .filter(|voucher| voucher.is_redeemable_at(now))
            .cloned())
    }
}

#[async_trait]
impl OrderStore for InMemoryStore {
    async fn begin(&self) -> Result<Box<dyn OrderTransaction>, AppError> {
        let guard = self.state.clone().lock_owned().await;
        let working = (*guard).clone();
        Ok(Box::new(InMemoryTransaction {
            guard,
            working,
            fail_points: self.fail_points.clone(),
        }))
    }

    async fn get_order(&self, order_id: Uuid) -> Result<Option<Order>, AppError> {
        Ok(self.state.lock().await.nested_order(order_id))
    }

    async fn list_orders(
        &self,
        user_id: Uuid,
        filter: &ListOrdersFilter,
    ) -> Result<Vec<Order>, AppError> {
        let state = self.state.lock().await;
        let mut orders: Vec<Order> = state
            .orders
            .values()
            .filter(|order| order.user_id == user_id)
            .filter(|order| {
                filter
                    .status
                    .map_or(true, |status| order.status == status.as_str())
            })
            .cloned()
            .collect();
        orders.sort_by(|a, b| b.created_utc.cmp(&a.created_utc));

        Ok(orders
            .into_iter()
            .skip(filter.offset() as usize)
            .take(filter.limit() as usize)
            .collect())
    }

    async fn update_status(&self, order_id: Uuid, status: OrderStatus) -> Result<bool, AppError> {
        let mut state = self.state.lock().await;
        let Some(order) = state.orders.get_mut(&order_id) else {
            return Ok(false);
        };
        order.status = status.as_str().to_string();
        order.updated_utc = Utc::now();

        for detail in state.details.values_mut() {
            if detail.order_id == order_id {
                detail.status = status.as_str().to_string();
            }
        }
        Ok(true)
    }

    async fn record_invoice_issued(
        &self,
        order_id: Uuid,
        invoice: &InvoiceRef,
    ) -> Result<(), AppError> {
        let mut state = self.state.lock().await;
        let order = state
            .orders
            .get_mut(&order_id)
            .ok_or_else(|| AppError::NotFound(anyhow::anyhow!("Order not found")))?;
        order.invoice_status = InvoiceStatus::Issued.as_str().to_string();
        order.invoice_id = Some(invoice.invoice_id.clone());
        order.invoice_url = Some(invoice.invoice_url.clone());
        order.invoice_error = None;
        order.updated_utc = Utc::now();
        Ok(())
    }

    async fn record_invoice_failed(&self, order_id: Uuid, error: &str) -> Result<(), AppError> {
        let mut state = self.state.lock().await;
        let order = state
            .orders
            .get_mut(&order_id)
            .ok_or_else(|| AppError::NotFound(anyhow::anyhow!("Order not found")))?;
        if order.invoice_status == InvoiceStatus::Issued.as_str() {
            return Ok(());
        }
        order.invoice_status = InvoiceStatus::Failed.as_str().to_string();
        order.invoice_error = Some(error.to_string());
        order.updated_utc = Utc::now();
        Ok(())
    }

    async fn list_invoice_retries(
        &self,
        created_before: DateTime<Utc>,
        now: DateTime<Utc>,
        limit: i64,
    ) -> Result<Vec<InvoiceRetry>, AppError> {
        let state = self.state.lock().await;
        let mut orders: Vec<&Order> = state
            .orders
            .values()
            .filter(|order| {
                matches!(
                    order.parsed_invoice_status(),
                    InvoiceStatus::Pending | InvoiceStatus::Failed
                )
            })
            .filter(|order| order.status == OrderStatus::AwaitingPayment.as_str())
            .filter(|order| order.created_utc < created_before)
            .filter(|order| order.next_attempt_utc.map_or(true, |at| at <= now))
            .collect();
        orders.sort_by_key(|order| {
            (
                order.next_attempt_utc.unwrap_or(order.created_utc),
                order.created_utc,
            )
        });

        Ok(orders
            .into_iter()
            .take(limit.max(0) as usize)
            .map(|order| InvoiceRetry {
                order_id: order.order_id,
                invoice_attempts: order.invoice_attempts,
            })
            .collect())
    }

    async fn defer_invoice_retry(
        &self,
        order_id: Uuid,
        error: &str,
        next_attempt_utc: DateTime<Utc>,
    ) -> Result<(), AppError> {
        let mut state = self.state.lock().await;
        if let Some(order) = state.orders.get_mut(&order_id) {
            if matches!(
                order.parsed_invoice_status(),
                InvoiceStatus::Pending | InvoiceStatus::Failed
            ) {
                order.invoice_attempts += 1;
                order.next_attempt_utc = Some(next_attempt_utc);
                order.invoice_error = Some(error.to_string());
                order.updated_utc = Utc::now();
            }
        }
        Ok(())
    }

    async fn abandon_invoice(&self, order_id: Uuid, error: &str) -> Result<(), AppError> {
        let mut state = self.state.lock().await;
        if let Some(order) = state.orders.get_mut(&order_id) {
            if order.parsed_invoice_status() != InvoiceStatus::Issued {
                order.invoice_status = InvoiceStatus::Abandoned.as_str().to_string();
                order.invoice_attempts += 1;
                order.next_attempt_utc = None;
                order.invoice_error = Some(error.to_string());
                order.updated_utc = Utc::now();
            }
        }
        Ok(())
    }

    async fn health_check(&self) -> Result<(), AppError> {
        Ok(())
    }
}

pub struct InMemoryTransaction {
    guard: OwnedMutexGuard<State>,
    working: State,
    fail_points: Arc<std::sync::Mutex<Vec<FailPoint>>>,
}

#[async_trait]
impl OrderTransaction for InMemoryTransaction {
    async fn insert_order(&mut self, order: &NewOrder) -> Result<(), AppError> {
        trip(&self.fail_points, FailPoint::InsertOrder)?;
        if self.working.orders.contains_key(&order.order_id) {
            return Err(AppError::Conflict(anyhow::anyhow!("Order already exists")));
        }

        let now = Utc::now();
        self.working.orders.insert(
            order.order_id,
            Order {
                order_id: order.order_id,
                user_id: order.buyer.user_id,
                buyer_name: order.buyer.name.clone(),
                buyer_email: order.buyer.email.clone(),
                buyer_phone: order.buyer.phone.clone(),
                receiver: order.shipping.receiver.clone(),
                phone_number: order.shipping.phone_number.clone(),
                city: order.shipping.city.clone(),
                postal_code: order.shipping.postal_code.clone(),
                address: order.shipping.address.clone(),
                subtotal: 0,
                total: 0,
                voucher_id: None,
                requested_voucher_id: order.requested_voucher_id,
                status: order.status.as_str().to_string(),
                invoice_status: InvoiceStatus::Pending.as_str().to_string(),
                invoice_id: None,
                invoice_url: None,
                invoice_error: None,
                invoice_attempts: 0,
                next_attempt_utc: None,
                priced_utc: None,
                created_utc: now,
                updated_utc: now,
                order_details: Vec::new(),
            },
        );
        Ok(())
    }

    async fn insert_order_detail(&mut self, detail: &NewOrderDetail) -> Result<(), AppError> {
        trip(&self.fail_points, FailPoint::InsertOrderDetail)?;
        if !self.working.orders.contains_key(&detail.order_id) {
            return Err(AppError::DatabaseError(anyhow::anyhow!(
                "order {} does not exist",
                detail.order_id
            )));
        }

        self.working.details.insert(
            detail.order_detail_id,
            OrderDetail {
                order_detail_id: detail.order_detail_id,
                order_id: detail.order_id,
                brand_id: detail.brand_id,
                invoice_number: detail.invoice_number.clone(),
                subtotal: 0,
                total: 0,
                voucher_id: None,
                status: detail.status.as_str().to_string(),
                sort_order: detail.sort_order,
                created_utc: Utc::now(),
                invoice_details: Vec::new(),
            },
        );
        Ok(())
    }

    async fn insert_invoice_detail(&mut self, line: &NewInvoiceDetail) -> Result<(), AppError> {
        trip(&self.fail_points, FailPoint::InsertInvoiceDetail)?;
        if !self.working.details.contains_key(&line.order_detail_id) {
            return Err(AppError::DatabaseError(anyhow::anyhow!(
                "order detail {} does not exist",
                line.order_detail_id
            )));
        }

        self.working.lines.insert(
            line.invoice_detail_id,
            InvoiceDetail {
                invoice_detail_id: line.invoice_detail_id,
                order_detail_id: line.order_detail_id,
                variant_id: line.variant_id,
                product_name: line.product_name.clone(),
                quantity: line.quantity,
                price: line.price,
                total: line.total,
                sort_order: line.sort_order,
                created_utc: Utc::now(),
            },
        );
        Ok(())
    }

    async fn lock_order(&mut self, order_id: Uuid) -> Result<Option<Order>, AppError> {
        Ok(self.working.nested_order(order_id))
    }

    async fn set_detail_totals(
        &mut self,
        order_detail_id: Uuid,
        subtotal: i64,
        total: i64,
        voucher_id: Option<Uuid>,
    ) -> Result<(), AppError> {
        trip(&self.fail_points, FailPoint::SetDetailTotals)?;
        let detail = self
            .working
            .details
            .get_mut(&order_detail_id)
            .ok_or_else(|| AppError::NotFound(anyhow::anyhow!("Order detail not found")))?;
        detail.subtotal = subtotal;
        detail.total = total;
        detail.voucher_id = voucher_id;
        Ok(())
    }

    async fn set_order_totals(
        &mut self,
        order_id: Uuid,
        subtotal: i64,
        total: i64,
        voucher_id: Option<Uuid>,
        priced_utc: DateTime<Utc>,
    ) -> Result<(), AppError> {
        trip(&self.fail_points, FailPoint::SetOrderTotals)?;
        let order = self
            .working
            .orders
            .get_mut(&order_id)
            .ok_or_else(|| AppError::NotFound(anyhow::anyhow!("Order not found")))?;
        order.subtotal = subtotal;
        order.total = total;
        order.voucher_id = voucher_id;
        order.priced_utc = Some(priced_utc);
        order.updated_utc = priced_utc;
        Ok(())
    }

    async fn consume_voucher(&mut self, voucher_id: Uuid) -> Result<bool, AppError> {
        trip(&self.fail_points, FailPoint::ConsumeVoucher)?;
        match self.working.vouchers.get_mut(&voucher_id) {
            Some(voucher) if voucher.stock > 0 => {
                voucher.stock -= 1;
                Ok(true)
            }
            _ => Ok(false),
        }
    }

    async fn commit(self: Box<Self>) -> Result<(), AppError> {
        trip(&self.fail_points, FailPoint::Commit)?;
        let InMemoryTransaction {
            mut guard, working, ..
        } = *self;
        *guard = working;
        Ok(())
    }

    async fn rollback(self: Box<Self>) -> Result<(), AppError> {
        Ok(())
    }
}

/// Invoice provider double. Records every request and can be told to fail.
#[derive(Default)]
pub struct MockInvoiceGateway {
    requests: std::sync::Mutex<Vec<InvoiceRequest>>,
    failure: std::sync::Mutex<Option<String>>,
}

impl MockInvoiceGateway {
    pub fn new() -> Self {
        Self::default()
    }

    /// Every following call fails with `message` until `recover` is called.
    pub fn fail_with(&self, message: &str) {
        if let Ok(mut failure) = self.failure.lock() {
            *failure = Some(message.to_string());
        }
    }

    pub fn recover(&self) {
        if let Ok(mut failure) = self.failure.lock() {
            *failure = None;
        }
    }

    pub fn requests(&self) -> Vec<InvoiceRequest> {
        self.requests
            .lock()
            .map(|requests| requests.clone())
            .unwrap_or_default()
    }
}

#[async_trait]
impl InvoiceGateway for MockInvoiceGateway {
    async fn generate_invoice(&self, request: &InvoiceRequest) -> anyhow::Result<InvoiceRef> {
        self.requests
            .lock()
            .map_err(|e| anyhow::anyhow!("Mock invoice mutex poisoned: {}", e))?
            .push(request.clone());

        let failure = self
            .failure
            .lock()
            .map_err(|e| anyhow::anyhow!("Mock invoice mutex poisoned: {}", e))?
            .clone();
        if let Some(message) = failure {
            return Err(anyhow::anyhow!(message));
        }

        Ok(InvoiceRef {
            invoice_id: format!("inv-{}", request.external_id),
            invoice_url: format!("https://checkout.invoice.test/{}", request.external_id),
        })
    }
}

use std::sync::Arc;
use std::time::Instant;

use chrono::Utc;
use tracing::{error, info, instrument, warn};
use uuid::Uuid;

use crate::models::{BuyerProfile, CartLine, InvoiceStatus, Order, ShippingAddress};
use crate::services::metrics::{
    INVOICE_GATEWAY_CALLS_TOTAL, ORDER_AMOUNT_TOTAL, SETTLEMENTS_TOTAL, SETTLEMENT_DURATION,
    VOUCHER_CONSUMPTIONS_TOTAL,
};
use crate::settlement::assembler::{self, AssembledOrder};
use crate::settlement::catalog::resolve_lines;
use crate::settlement::errors::{SettlementError, SettlementFailure, SettlementStage};
use crate::settlement::gateways::{
    CatalogGateway, InvoiceGateway, OrderStore, OrderTransaction, VoucherGateway,
};
use crate::settlement::invoice::{build_request, InvoiceRef, InvoiceSettings};
use crate::settlement::pricing::{price_order, PricedOrder};
use crate::settlement::voucher::{resolve_discount, Discount};

/// A checkout submission.
#[derive(Debug, Clone)]
pub struct SettlementRequest {
    pub buyer: BuyerProfile,
    pub shipping: ShippingAddress,
    pub lines: Vec<CartLine>,
    pub voucher_id: Option<Uuid>,
}

/// A completed settlement: the persisted order and its issued invoice.
#[derive(Debug, Clone)]
pub struct Settlement {
    pub order: Order,
    pub invoice: InvoiceRef,
}

/// Drives a checkout through creation (T1), pricing (T2) and invoice issuance.
#[derive(Clone)]
pub struct SettlementCoordinator {
    store: Arc<dyn OrderStore>,
    catalog: Arc<dyn CatalogGateway>,
    vouchers: Arc<dyn VoucherGateway>,
    invoices: Arc<dyn InvoiceGateway>,
    settings: InvoiceSettings,
}

impl SettlementCoordinator {
    pub fn new(
        store: Arc<dyn OrderStore>,
        catalog: Arc<dyn CatalogGateway>,
        vouchers: Arc<dyn VoucherGateway>,
        invoices: Arc<dyn InvoiceGateway>,
        settings: InvoiceSettings,
    ) -> Self {
        Self {
            store,
            catalog,
            vouchers,
            invoices,
            settings,
        }
    }

    pub fn store(&self) -> &Arc<dyn OrderStore> {
        &self.store
    }

    #[instrument(skip(self, request), fields(user_id = %request.buyer.user_id, line_count = request.lines.len()))]
    pub async fn settle(&self, request: SettlementRequest) -> Result<Settlement, SettlementError> {
        let start = Instant::now();
        let result = self.run_settlement(request).await;

        let outcome = match &result {
            Ok(_) => "completed",
            Err(err) => err.failure.label(),
        };
        SETTLEMENTS_TOTAL.with_label_values(&[outcome]).inc();
        SETTLEMENT_DURATION
            .with_label_values(&[outcome])
            .observe(start.elapsed().as_secs_f64());

        if let Err(err) = &result {
            warn!(stage = %err.stage, error = %err.failure, "Settlement failed");
        }
        result
    }

    async fn run_settlement(
        &self,
        request: SettlementRequest,
    ) -> Result<Settlement, SettlementError> {
        let stage = SettlementStage::Drafting;
        validate_request(&request).map_err(|f| f.at(stage))?;

        let now = Utc::now();
        let lines = resolve_lines(self.catalog.as_ref(), &request.lines)
            .await
            .map_err(|f| f.at(stage))?;

        // Resolved before T1 so an unusable voucher leaves no rows behind.
        let discount = resolve_discount(self.vouchers.as_ref(), request.voucher_id, now)
            .await
            .map_err(|f| f.at(stage))?;

        let assembled = assembler::assemble(
            request.buyer,
            request.shipping,
            request.voucher_id,
            lines,
            now,
        )
        .map_err(|f| f.at(stage))?;
        let order_id = assembled.order.order_id;

        self.create(&assembled).await.map_err(|f| f.at(stage))?;
        info!(
            order_id = %order_id,
            stage = %SettlementStage::Created,
            detail_count = assembled.details.len(),
            "Order created"
        );

        let order = self
            .apply_pricing(order_id, &discount)
            .await
            .map_err(|f| f.at(SettlementStage::Created))?;

        self.issue_for(order).await
    }

    /// T1: inserts the order shell with every detail and line, or nothing.
    async fn create(&self, assembled: &AssembledOrder) -> Result<(), SettlementFailure> {
        let mut tx = self.store.begin().await?;

        match insert_assembled(tx.as_mut(), assembled).await {
            Ok(()) => {
                tx.commit().await?;
                Ok(())
            }
            Err(err) => {
                if let Err(rollback_err) = tx.rollback().await {
                    error!(error = %rollback_err, "Failed to roll back order creation");
                }
                Err(err.into())
            }
        }
    }

    /// T2: prices an order from its persisted lines and consumes the voucher.
    /// An order that is already priced is returned as stored.
    #[instrument(skip(self, discount), fields(scope = discount.scope_label()))]
    pub async fn apply_pricing(
        &self,
        order_id: Uuid,
        discount: &Discount,
    ) -> Result<Order, SettlementFailure> {
        let mut tx = self.store.begin().await?;

        let priced = match price_locked(tx.as_mut(), order_id, discount).await {
            Ok(priced) => priced,
            Err(err) => {
                if let Err(rollback_err) = tx.rollback().await {
                    error!(order_id = %order_id, error = %rollback_err, "Failed to roll back pricing");
                }
                return Err(err);
            }
        };
        tx.commit().await?;

        match &priced {
            Some(priced) => {
                if priced.consumed_voucher.is_some() {
                    VOUCHER_CONSUMPTIONS_TOTAL
                        .with_label_values(&[discount.scope_label()])
                        .inc();
                }
                ORDER_AMOUNT_TOTAL
                    .with_label_values(&[self.settings.currency.as_str()])
                    .inc_by(priced.total as f64);
                info!(
                    order_id = %order_id,
                    stage = %SettlementStage::Settled,
                    subtotal = priced.subtotal,
                    total = priced.total,
                    "Order priced"
                );
            }
            None => info!(order_id = %order_id, "Order already priced, keeping stored totals"),
        }

        self.load(order_id).await
    }

    /// Re-runs pricing for an order left unpriced between T1 and T2.
    #[instrument(skip(self))]
    pub async fn reprice(&self, order_id: Uuid) -> Result<Order, SettlementError> {
        let stage = SettlementStage::Created;
        let order = self.load(order_id).await.map_err(|f| f.at(stage))?;
        if order.is_priced() {
            return Ok(order);
        }

        let discount = resolve_discount(
            self.vouchers.as_ref(),
            order.requested_voucher_id,
            Utc::now(),
        )
        .await
        .map_err(|f| f.at(stage))?;

        self.apply_pricing(order_id, &discount)
            .await
            .map_err(|f| f.at(stage))
    }

    /// Issues the payment invoice for a priced order. An order whose invoice
    /// is already issued returns the stored reference without calling out.
    #[instrument(skip(self))]
    pub async fn issue_invoice(&self, order_id: Uuid) -> Result<Settlement, SettlementError> {
        let order = self
            .load(order_id)
            .await
            .map_err(|f| f.at(SettlementStage::Settled))?;
        self.issue_for(order).await
    }

    async fn issue_for(&self, mut order: Order) -> Result<Settlement, SettlementError> {
        let order_id = order.order_id;

        if let Some(invoice) = issued_invoice(&order) {
            return Ok(Settlement { order, invoice });
        }
        if !order.is_priced() {
            return Err(SettlementFailure::Conflict(format!(
                "Order {} has not been priced yet",
                order_id
            ))
            .at(SettlementStage::Created));
        }

        let request = build_request(&order, &self.settings);
        info!(
            order_id = %order_id,
            stage = %SettlementStage::InvoiceRequested,
            amount = request.amount,
            "Requesting invoice"
        );

        match self.invoices.generate_invoice(&request).await {
            Ok(invoice) => {
                INVOICE_GATEWAY_CALLS_TOTAL
                    .with_label_values(&["success"])
                    .inc();
                self.store
                    .record_invoice_issued(order_id, &invoice)
                    .await
                    .map_err(|e| SettlementFailure::from(e).at(SettlementStage::InvoiceRequested))?;

                let order = self
                    .load(order_id)
                    .await
                    .map_err(|f| f.at(SettlementStage::InvoiceRequested))?;
                info!(
                    order_id = %order_id,
                    stage = %SettlementStage::Completed,
                    invoice_id = %invoice.invoice_id,
                    "Invoice issued"
                );
                Ok(Settlement { order, invoice })
            }
            Err(source) => {
                INVOICE_GATEWAY_CALLS_TOTAL
                    .with_label_values(&["failure"])
                    .inc();
                let message = source.to_string();
                error!(order_id = %order_id, error = %message, "Invoice generation failed");

                if let Err(err) = self.store.record_invoice_failed(order_id, &message).await {
                    error!(order_id = %order_id, error = %err, "Failed to record invoice failure");
                }
                order.invoice_status = InvoiceStatus::Failed.as_str().to_string();
                order.invoice_error = Some(message);

                Err(SettlementFailure::Gateway {
                    order: Box::new(order),
                    source,
                }
                .at(SettlementStage::InvoiceRequested))
            }
        }
    }

    async fn load(&self, order_id: Uuid) -> Result<Order, SettlementFailure> {
        self.store
            .get_order(order_id)
            .await?
            .ok_or_else(|| SettlementFailure::NotFound(format!("Order {} not found", order_id)))
    }
}

fn issued_invoice(order: &Order) -> Option<InvoiceRef> {
    if order.parsed_invoice_status() != InvoiceStatus::Issued {
        return None;
    }
    Some(InvoiceRef {
        invoice_id: order.invoice_id.clone()?,
        invoice_url: order.invoice_url.clone()?,
    })
}

async fn insert_assembled(
    tx: &mut dyn OrderTransaction,
    assembled: &AssembledOrder,
) -> Result<(), service_core::error::AppError> {
    tx.insert_order(&assembled.order).await?;
    for detail in &assembled.details {
        tx.insert_order_detail(detail).await?;
    }
    for line in &assembled.lines {
        tx.insert_invoice_detail(line).await?;
    }
    Ok(())
}

/// Pricing body of T2. `None` when the order was already priced.
async fn price_locked(
    tx: &mut dyn OrderTransaction,
    order_id: Uuid,
    discount: &Discount,
) -> Result<Option<PricedOrder>, SettlementFailure> {
    let order = tx
        .lock_order(order_id)
        .await?
        .ok_or_else(|| SettlementFailure::NotFound(format!("Order {} not found", order_id)))?;

    if order.is_priced() {
        return Ok(None);
    }

    let priced = price_order(&order, discount);

    for detail in &priced.details {
        tx.set_detail_totals(
            detail.order_detail_id,
            detail.subtotal,
            detail.total,
            detail.voucher_id,
        )
        .await?;
    }

    if let Some(voucher_id) = priced.consumed_voucher {
        if !tx.consume_voucher(voucher_id).await? {
            return Err(SettlementFailure::OutOfStock(format!(
                "Voucher {} is out of stock",
                voucher_id
            )));
        }
    }

    tx.set_order_totals(
        order_id,
        priced.subtotal,
        priced.total,
        priced.consumed_voucher,
        Utc::now(),
    )
    .await?;

    Ok(Some(priced))
}

/// Rejects submissions that must not open a transaction.
pub fn validate_request(request: &SettlementRequest) -> Result<(), SettlementFailure> {
    if request.buyer.user_id.is_nil() {
        return Err(SettlementFailure::Validation(
            "User id must be provided".to_string(),
        ));
    }

    let shipping = &request.shipping;
    let required = [
        ("receiver", &shipping.receiver),
        ("phone_number", &shipping.phone_number),
        ("city", &shipping.city),
        ("postal_code", &shipping.postal_code),
        ("address", &shipping.address),
    ];
    if let Some((field, _)) = required.iter().find(|(_, value)| value.trim().is_empty()) {
        return Err(SettlementFailure::Validation(format!(
            "{} must be provided",
            field
        )));
    }

    if request.lines.is_empty() {
        return Err(SettlementFailure::Validation(
            "Order must contain at least one line".to_string(),
        ));
    }
    if let Some(line) = request.lines.iter().find(|line| line.quantity < 1) {
        return Err(SettlementFailure::Validation(format!(
            "Quantity for variant {} must be at least 1",
            line.variant_id
        )));
    }

    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::{Variant, Voucher};
    use crate::services::memory::{FailPoint, InMemoryStore, MockInvoiceGateway};

    struct Fixture {
        store: Arc<InMemoryStore>,
        invoices: Arc<MockInvoiceGateway>,
        coordinator: SettlementCoordinator,
    }

    fn fixture() -> Fixture {
        let store = Arc::new(InMemoryStore::new());
        let invoices = Arc::new(MockInvoiceGateway::new());
        let coordinator = SettlementCoordinator::new(
            store.clone(),
            store.clone(),
            store.clone(),
            invoices.clone(),
            InvoiceSettings::default(),
        );
        Fixture {
            store,
            invoices,
            coordinator,
        }
    }

    fn variant(brand_id: Uuid, price: i64) -> Variant {
        Variant {
            variant_id: Uuid::new_v4(),
            product_id: Uuid::new_v4(),
            brand_id,
            product_name: format!("Product {}", price),
            price,
            stock: 10,
            is_active: true,
        }
    }

    fn voucher(scope: &str, brand_id: Option<Uuid>, is_percent: bool, value: i64, stock: i32) -> Voucher {
        Voucher {
            voucher_id: Uuid::new_v4(),
            scope: scope.to_string(),
            name: "Promo".to_string(),
            code: Uuid::new_v4().to_string(),
            brand_id,
            is_percent,
            value,
            stock,
            is_active: true,
            effective_utc: Utc::now() - chrono::Duration::days(1),
            expired_utc: None,
        }
    }

    fn request(lines: &[(&Variant, i32)], voucher_id: Option<Uuid>) -> SettlementRequest {
        SettlementRequest {
            buyer: BuyerProfile {
                user_id: Uuid::new_v4(),
                name: "Ayu".to_string(),
                email: "ayu@example.com".to_string(),
                phone: "+628123456789".to_string(),
            },
            shipping: ShippingAddress {
                receiver: "Ayu".to_string(),
                phone_number: "+628123456789".to_string(),
                city: "Bandung".to_string(),
                postal_code: "40115".to_string(),
                address: "Jl. Braga 1".to_string(),
            },
            lines: lines
                .iter()
                .map(|(v, quantity)| CartLine {
                    variant_id: v.variant_id,
                    quantity: *quantity,
                })
                .collect(),
            voucher_id,
        }
    }

    #[tokio::test]
    async fn unknown_voucher_creates_nothing() {
        let f = fixture();
        let v = variant(Uuid::new_v4(), 1000);
        f.store.add_variant(v.clone()).await;

        let err = f
            .coordinator
            .settle(request(&[(&v, 1)], Some(Uuid::new_v4())))
            .await
            .unwrap_err();

        assert!(matches!(err.failure, SettlementFailure::NotFound(_)));
        assert_eq!(err.stage, SettlementStage::Drafting);
        assert_eq!(f.store.row_count().await, 0);
        assert!(f.invoices.requests().is_empty());
    }

    #[tokio::test]
    async fn failed_line_insert_rolls_back_creation() {
        let f = fixture();
        let v = variant(Uuid::new_v4(), 1000);
        f.store.add_variant(v.clone()).await;
        f.store.fail_at(FailPoint::InsertInvoiceDetail);

        let err = f
            .coordinator
            .settle(request(&[(&v, 1)], None))
            .await
            .unwrap_err();

        assert!(matches!(err.failure, SettlementFailure::Persistence(_)));
        assert_eq!(f.store.row_count().await, 0);
    }

    #[tokio::test]
    async fn out_of_stock_voucher_leaves_order_unpriced() {
        let f = fixture();
        let brand = Uuid::new_v4();
        let v = variant(brand, 1000);
        let promo = voucher("brand", Some(brand), false, 100, 0);
        f.store.add_variant(v.clone()).await;
        f.store.add_voucher(promo.clone()).await;

        let err = f
            .coordinator
            .settle(request(&[(&v, 2)], Some(promo.voucher_id)))
            .await
            .unwrap_err();

        assert!(matches!(err.failure, SettlementFailure::OutOfStock(_)));
        assert_eq!(err.stage, SettlementStage::Created);

        let orders = f.store.all_orders().await;
        assert_eq!(orders.len(), 1);
        assert_eq!(orders[0].total, 0);
        assert!(!orders[0].is_priced());
        assert!(orders[0].order_details.iter().all(|d| d.total == 0));
    }

    #[tokio::test]
    async fn reprice_completes_a_stranded_order_once() {
        let f = fixture();
        let brand = Uuid::new_v4();
        let v = variant(brand, 1000);
        let promo = voucher("total", None, false, 100, 1);
        f.store.add_variant(v.clone()).await;
        f.store.add_voucher(promo.clone()).await;
        f.store.fail_at(FailPoint::SetOrderTotals);

        let err = f
            .coordinator
            .settle(request(&[(&v, 1)], Some(promo.voucher_id)))
            .await
            .unwrap_err();
        assert!(matches!(err.failure, SettlementFailure::Persistence(_)));
        assert_eq!(f.store.voucher_stock(promo.voucher_id).await, Some(1));

        let order_id = f.store.all_orders().await[0].order_id;
        let order = f.coordinator.reprice(order_id).await.unwrap();
        assert_eq!(order.subtotal, 1000);
        assert_eq!(order.total, 900);
        assert_eq!(order.voucher_id, Some(promo.voucher_id));
        assert_eq!(f.store.voucher_stock(promo.voucher_id).await, Some(0));

        let again = f.coordinator.reprice(order_id).await.unwrap();
        assert_eq!(again.total, 900);
        assert_eq!(f.store.voucher_stock(promo.voucher_id).await, Some(0));
    }

    #[tokio::test]
    async fn invoice_issue_is_idempotent() {
        let f = fixture();
        let v = variant(Uuid::new_v4(), 1000);
        f.store.add_variant(v.clone()).await;

        let settlement = f.coordinator.settle(request(&[(&v, 1)], None)).await.unwrap();
        let again = f
            .coordinator
            .issue_invoice(settlement.order.order_id)
            .await
            .unwrap();

        assert_eq!(again.invoice, settlement.invoice);
        assert_eq!(f.invoices.requests().len(), 1);
    }

    #[tokio::test]
    async fn unpriced_order_cannot_be_invoiced() {
        let f = fixture();
        let v = variant(Uuid::new_v4(), 1000);
        f.store.add_variant(v.clone()).await;
        f.store.fail_at(FailPoint::SetOrderTotals);

        f.coordinator
            .settle(request(&[(&v, 1)], None))
            .await
            .unwrap_err();
        let order_id = f.store.all_orders().await[0].order_id;

        let err = f.coordinator.issue_invoice(order_id).await.unwrap_err();
        assert!(matches!(err.failure, SettlementFailure::Conflict(_)));
        assert!(f.invoices.requests().is_empty());
    }

    #[test]
    fn blank_shipping_field_is_rejected() {
        let v = variant(Uuid::new_v4(), 1000);
        let mut req = request(&[(&v, 1)], None);
        req.shipping.city = "  ".to_string();

        let err = validate_request(&req).unwrap_err();
        assert!(err.to_string().contains("city"));
    }

    #[test]
    fn zero_quantity_is_rejected() {
        let v = variant(Uuid::new_v4(), 1000);
        let req = request(&[(&v, 0)], None);
        assert!(matches!(
            validate_request(&req),
            Err(SettlementFailure::Validation(_))
        ));
    }
}

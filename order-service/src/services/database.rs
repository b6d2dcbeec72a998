//! Postgres persistence for order-service.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use service_core::error::AppError;
use sqlx::postgres::{PgConnection, PgPool, PgPoolOptions};
use sqlx::{Postgres, Transaction};
use std::time::Duration;
use tracing::{info, instrument};
use uuid::Uuid;

use crate::models::{
    InvoiceDetail, InvoiceRetry, InvoiceStatus, ListOrdersFilter, NewInvoiceDetail, NewOrder,
    NewOrderDetail, Order, OrderDetail, OrderStatus, Variant, Voucher,
};
use crate::services::metrics::DB_QUERY_DURATION;
use crate::settlement::gateways::{CatalogGateway, OrderStore, OrderTransaction, VoucherGateway};
use crate::settlement::invoice::InvoiceRef;

const ORDER_COLUMNS: &str = "order_id, user_id, buyer_name, buyer_email, buyer_phone, receiver, \
    phone_number, city, postal_code, address, subtotal, total, voucher_id, requested_voucher_id, \
    status, invoice_status, invoice_id, invoice_url, invoice_error, invoice_attempts, next_attempt_utc, \
    priced_utc, created_utc, updated_utc";

/// Database connection pool wrapper.
#[derive(Clone)]
pub struct Database {
    pool: PgPool,
}

impl Database {
    /// Create a new database connection pool.
    #[instrument(skip(database_url), fields(service = "order-service"))]
    pub async fn new(
        database_url: &str,
        max_connections: u32,
        min_connections: u32,
    ) -> Result<Self, AppError> {
        info!(
            max_connections = max_connections,
            min_connections = min_connections,
            "Connecting to PostgreSQL"
        );

        let pool = PgPoolOptions::new()
            .max_connections(max_connections)
            .min_connections(min_connections)
            .acquire_timeout(Duration::from_secs(30))
            .idle_timeout(Duration::from_secs(600))
            .connect(database_url)
            .await
            .map_err(|e| AppError::DatabaseError(anyhow::anyhow!("Failed to connect: {}", e)))?;

        info!("PostgreSQL connection pool established");

        Ok(Self { pool })
    }

    pub fn pool(&self) -> &PgPool {
        &self.pool
    }

    /// Run database migrations.
    #[instrument(skip(self))]
    pub async fn run_migrations(&self) -> Result<(), AppError> {
        info!("Running database migrations");
        sqlx::migrate!("./migrations")
            .run(&self.pool)
            .await
            .map_err(|e| AppError::DatabaseError(anyhow::anyhow!("Migration failed: {}", e)))?;
        info!("Database migrations completed");
        Ok(())
    }
}

/// Loads an order with its details and lines over one connection. With
/// `for_update` the order row stays locked until the transaction ends.
async fn fetch_nested_order(
    conn: &mut PgConnection,
    order_id: Uuid,
    for_update: bool,
) -> Result<Option<Order>, AppError> {
    let sql = format!(
        "SELECT {} FROM orders WHERE order_id = $1{}",
        ORDER_COLUMNS,
        if for_update { " FOR UPDATE" } else { "" }
    );
    let order = sqlx::query_as::<_, Order>(&sql)
        .bind(order_id)
        .fetch_optional(&mut *conn)
        .await
        .map_err(|e| AppError::DatabaseError(anyhow::anyhow!("Failed to get order: {}", e)))?;

    let Some(mut order) = order else {
        return Ok(None);
    };

    let mut details = sqlx::query_as::<_, OrderDetail>(
        r#"
        SELECT order_detail_id, order_id, brand_id, invoice_number, subtotal, total, voucher_id, status, sort_order, created_utc
        FROM order_details
        WHERE order_id = $1
        ORDER BY sort_order
        "#,
    )
    .bind(order_id)
    .fetch_all(&mut *conn)
    .await
    .map_err(|e| AppError::DatabaseError(anyhow::anyhow!("Failed to get order details: {}", e)))?;

    let detail_ids: Vec<Uuid> = details.iter().map(|d| d.order_detail_id).collect();
    let lines = sqlx::query_as::<_, InvoiceDetail>(
        r#"
        SELECT invoice_detail_id, order_detail_id, variant_id, product_name, quantity, price, total, sort_order, created_utc
        FROM invoice_details
        WHERE order_detail_id = ANY($1)
        ORDER BY sort_order
        "#,
    )
    .bind(&detail_ids)
    .fetch_all(&mut *conn)
    .await
    .map_err(|e| AppError::DatabaseError(anyhow::anyhow!("Failed to get invoice details: {}", e)))?;

    for line in lines {
        if let Some(detail) = details
            .iter_mut()
            .find(|d| d.order_detail_id == line.order_detail_id)
        {
            detail.invoice_details.push(line);
        }
    }

    order.order_details = details;
    Ok(Some(order))
}

#[async_trait]
impl CatalogGateway for Database {
    #[instrument(skip(self), fields(variant_id = %variant_id))]
    async fn get_variant(&self, variant_id: Uuid) -> Result<Option<Variant>, AppError> {
        let timer = DB_QUERY_DURATION
            .with_label_values(&["get_variant"])
            .start_timer();

        let variant = sqlx::query_as::<_, Variant>(
            r#"
            SELECT v.variant_id, v.product_id, p.brand_id, p.name AS product_name, v.price, v.stock, v.is_active
            FROM product_variants v
            JOIN products p ON p.product_id = v.product_id
            WHERE v.variant_id = $1
            "#,
        )
        .bind(variant_id)
        .fetch_optional(&self.pool)
        .await
        .map_err(|e| AppError::DatabaseError(anyhow::anyhow!("Failed to get variant: {}", e)))?;

        timer.observe_duration();

        Ok(variant)
    }
}

#[async_trait]
impl VoucherGateway for Database {
    #[instrument(skip(self), fields(voucher_id = %voucher_id))]
    async fn get_active_voucher(
        &self,
        voucher_id: Uuid,
        now: DateTime<Utc>,
    ) -> Result<Option<Voucher>, AppError> {
        let timer = DB_QUERY_DURATION
            .with_label_values(&["get_active_voucher"])
            .start_timer();

        let voucher = sqlx::query_as::<_, Voucher>(
            r#"
            SELECT voucher_id, scope, name, code, brand_id, is_percent, value, stock, is_active, effective_utc, expired_utc
            FROM vouchers
            WHERE voucher_id = $1
              AND is_active
              AND effective_utc <= $2
              AND (expired_utc IS NULL OR expired_utc > $2)
            "#,
        )
        .bind(voucher_id)
        .bind(now)
        .fetch_optional(&self.pool)
        .await
        .map_err(|e| AppError::DatabaseError(anyhow::anyhow!("Failed to get voucher: {}", e)))?;

        timer.observe_duration();

        Ok(voucher)
    }
}

#[async_trait]
impl OrderStore for Database {
    async fn begin(&self) -> Result<Box<dyn OrderTransaction>, AppError> {
        let tx = self.pool.begin().await.map_err(|e| {
            AppError::DatabaseError(anyhow::anyhow!("Failed to begin transaction: {}", e))
        })?;
        Ok(Box::new(PgOrderTransaction { tx }))
    }

    #[instrument(skip(self), fields(order_id = %order_id))]
    async fn get_order(&self, order_id: Uuid) -> Result<Option<Order>, AppError> {
        let timer = DB_QUERY_DURATION
            .with_label_values(&["get_order"])
            .start_timer();

        let mut conn = self.pool.acquire().await.map_err(|e| {
            AppError::DatabaseError(anyhow::anyhow!("Failed to acquire connection: {}", e))
        })?;
        let order = fetch_nested_order(&mut *conn, order_id, false).await?;

        timer.observe_duration();

        Ok(order)
    }

    #[instrument(skip(self, filter), fields(user_id = %user_id))]
    async fn list_orders(
        &self,
        user_id: Uuid,
        filter: &ListOrdersFilter,
    ) -> Result<Vec<Order>, AppError> {
        let timer = DB_QUERY_DURATION
            .with_label_values(&["list_orders"])
            .start_timer();

        let sql = format!(
            "SELECT {} FROM orders \
             WHERE user_id = $1 AND ($2::varchar IS NULL OR status = $2) \
             ORDER BY created_utc DESC \
             LIMIT $3 OFFSET $4",
            ORDER_COLUMNS
        );
        let orders = sqlx::query_as::<_, Order>(&sql)
            .bind(user_id)
            .bind(filter.status.map(|s| s.as_str()))
            .bind(filter.limit())
            .bind(filter.offset())
            .fetch_all(&self.pool)
            .await
            .map_err(|e| AppError::DatabaseError(anyhow::anyhow!("Failed to list orders: {}", e)))?;

        timer.observe_duration();

        Ok(orders)
    }

    #[instrument(skip(self), fields(order_id = %order_id, status = %status))]
    async fn update_status(&self, order_id: Uuid, status: OrderStatus) -> Result<bool, AppError> {
        let timer = DB_QUERY_DURATION
            .with_label_values(&["update_status"])
            .start_timer();

        let mut tx = self.pool.begin().await.map_err(|e| {
            AppError::DatabaseError(anyhow::anyhow!("Failed to begin transaction: {}", e))
        })?;

        let updated = sqlx::query(
            "UPDATE orders SET status = $2, updated_utc = NOW() WHERE order_id = $1",
        )
        .bind(order_id)
        .bind(status.as_str())
        .execute(&mut *tx)
        .await
        .map_err(|e| AppError::DatabaseError(anyhow::anyhow!("Failed to update order: {}", e)))?
        .rows_affected();

        if updated == 0 {
            tx.rollback().await.ok();
            timer.observe_duration();
            return Ok(false);
        }

        sqlx::query("UPDATE order_details SET status = $2 WHERE order_id = $1")
            .bind(order_id)
            .bind(status.as_str())
            .execute(&mut *tx)
            .await
            .map_err(|e| {
                AppError::DatabaseError(anyhow::anyhow!("Failed to update order details: {}", e))
            })?;

        tx.commit().await.map_err(|e| {
            AppError::DatabaseError(anyhow::anyhow!("Failed to commit transaction: {}", e))
        })?;

        timer.observe_duration();

        info!("Order status updated");

        Ok(true)
    }

    #[instrument(skip(self, invoice), fields(order_id = %order_id, invoice_id = %invoice.invoice_id))]
    async fn record_invoice_issued(
        &self,
        order_id: Uuid,
        invoice: &InvoiceRef,
    ) -> Result<(), AppError> {
        let timer = DB_QUERY_DURATION
            .with_label_values(&["record_invoice_issued"])
            .start_timer();

        sqlx::query(
            r#"
            UPDATE orders
            SET invoice_status = $2, invoice_id = $3, invoice_url = $4, invoice_error = NULL, updated_utc = NOW()
            WHERE order_id = $1
            "#,
        )
        .bind(order_id)
        .bind(InvoiceStatus::Issued.as_str())
        .bind(&invoice.invoice_id)
        .bind(&invoice.invoice_url)
        .execute(&self.pool)
        .await
        .map_err(|e| AppError::DatabaseError(anyhow::anyhow!("Failed to record invoice: {}", e)))?;

        timer.observe_duration();

        Ok(())
    }

    #[instrument(skip(self, error), fields(order_id = %order_id))]
    async fn record_invoice_failed(&self, order_id: Uuid, error: &str) -> Result<(), AppError> {
        let timer = DB_QUERY_DURATION
            .with_label_values(&["record_invoice_failed"])
            .start_timer();

        sqlx::query(
            r#"
            UPDATE orders
            SET invoice_status = $2, invoice_error = $3, updated_utc = NOW()
            WHERE order_id = $1 AND invoice_status <> 'issued'
            "#,
        )
        .bind(order_id)
        .bind(InvoiceStatus::Failed.as_str())
        .bind(error)
        .execute(&self.pool)
        .await
        .map_err(|e| {
            AppError::DatabaseError(anyhow::anyhow!("Failed to record invoice failure: {}", e))
        })?;

        timer.observe_duration();

        Ok(())
    }

    #[instrument(skip(self))]
    async fn list_invoice_retries(
        &self,
        created_before: DateTime<Utc>,
        now: DateTime<Utc>,
        limit: i64,
    ) -> Result<Vec<InvoiceRetry>, AppError> {
        let timer = DB_QUERY_DURATION
            .with_label_values(&["list_invoice_retries"])
            .start_timer();

        let retries = sqlx::query_as::<_, InvoiceRetry>(
            r#"
            SELECT order_id, invoice_attempts
            FROM orders
            WHERE invoice_status IN ($1, $2)
              AND status = $3
              AND created_utc < $4
              AND (next_attempt_utc IS NULL OR next_attempt_utc <= $5)
            ORDER BY COALESCE(next_attempt_utc, created_utc), created_utc
            LIMIT $6
            "#,
        )
        .bind(InvoiceStatus::Pending.as_str())
        .bind(InvoiceStatus::Failed.as_str())
        .bind(OrderStatus::AwaitingPayment.as_str())
        .bind(created_before)
        .bind(now)
        .bind(limit)
        .fetch_all(&self.pool)
        .await
        .map_err(|e| {
            AppError::DatabaseError(anyhow::anyhow!("Failed to list invoice retries: {}", e))
        })?;

        timer.observe_duration();

        Ok(retries)
    }

    #[instrument(skip(self, error), fields(order_id = %order_id))]
    async fn defer_invoice_retry(
        &self,
        order_id: Uuid,
        error: &str,
        next_attempt_utc: DateTime<Utc>,
    ) -> Result<(), AppError> {
        let timer = DB_QUERY_DURATION
            .with_label_values(&["defer_invoice_retry"])
            .start_timer();

        sqlx::query(
            r#"
            UPDATE orders
            SET invoice_attempts = invoice_attempts + 1,
                next_attempt_utc = $2,
                invoice_error = $3,
                updated_utc = NOW()
            WHERE order_id = $1 AND invoice_status IN ($4, $5)
            "#,
        )
        .bind(order_id)
        .bind(next_attempt_utc)
        .bind(error)
        .bind(InvoiceStatus::Pending.as_str())
        .bind(InvoiceStatus::Failed.as_str())
        .execute(&self.pool)
        .await
        .map_err(|e| {
            AppError::DatabaseError(anyhow::anyhow!("Failed to defer invoice retry: {}", e))
        })?;

        timer.observe_duration();

        Ok(())
    }

    #[instrument(skip(self, error), fields(order_id = %order_id))]
    async fn abandon_invoice(&self, order_id: Uuid, error: &str) -> Result<(), AppError> {
        let timer = DB_QUERY_DURATION
            .with_label_values(&["abandon_invoice"])
            .start_timer();

        sqlx::query(
            r#"
            UPDATE orders
            SET invoice_status = $2,
                invoice_attempts = invoice_attempts + 1,
                next_attempt_utc = NULL,
                invoice_error = $3,
                updated_utc = NOW()
            WHERE order_id = $1 AND invoice_status <> 'issued'
            "#,
        )
        .bind(order_id)
        .bind(InvoiceStatus::Abandoned.as_str())
        .bind(error)
        .execute(&self.pool)
        .await
        .map_err(|e| {
            AppError::DatabaseError(anyhow::anyhow!("Failed to abandon invoice: {}", e))
        })?;

        timer.observe_duration();

        Ok(())
    }

    #[instrument(skip(self))]
    async fn health_check(&self) -> Result<(), AppError> {
        sqlx::query("SELECT 1")
            .execute(&self.pool)
            .await
            .map_err(|e| AppError::DatabaseError(anyhow::anyhow!("Health check failed: {}", e)))?;
        Ok(())
    }
}

/// Open Postgres transaction. Dropped without commit, sqlx rolls it back.
pub struct PgOrderTransaction {
    tx: Transaction<'static, Postgres>,
}

#[async_trait]
impl OrderTransaction for PgOrderTransaction {
    #[instrument(skip(self, order), fields(order_id = %order.order_id))]
    async fn insert_order(&mut self, order: &NewOrder) -> Result<(), AppError> {
        let timer = DB_QUERY_DURATION
            .with_label_values(&["insert_order"])
            .start_timer();

        sqlx::query(
            r#"
            INSERT INTO orders (order_id, user_id, buyer_name, buyer_email, buyer_phone, receiver, phone_number, city, postal_code, address, requested_voucher_id, status, invoice_status)
            VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10, $11, $12, $13)
            "#,
        )
        .bind(order.order_id)
        .bind(order.buyer.user_id)
        .bind(&order.buyer.name)
        .bind(&order.buyer.email)
        .bind(&order.buyer.phone)
        .bind(&order.shipping.receiver)
        .bind(&order.shipping.phone_number)
        .bind(&order.shipping.city)
        .bind(&order.shipping.postal_code)
        .bind(&order.shipping.address)
        .bind(order.requested_voucher_id)
        .bind(order.status.as_str())
        .bind(InvoiceStatus::Pending.as_str())
        .execute(&mut *self.tx)
        .await
        .map_err(|e| AppError::DatabaseError(anyhow::anyhow!("Failed to insert order: {}", e)))?;

        timer.observe_duration();

        Ok(())
    }

    #[instrument(skip(self, detail), fields(order_detail_id = %detail.order_detail_id, brand_id = %detail.brand_id))]
    async fn insert_order_detail(&mut self, detail: &NewOrderDetail) -> Result<(), AppError> {
        let timer = DB_QUERY_DURATION
            .with_label_values(&["insert_order_detail"])
            .start_timer();

        sqlx::query(
            r#"
            INSERT INTO order_details (order_detail_id, order_id, brand_id, invoice_number, status, sort_order)
            VALUES ($1, $2, $3, $4, $5, $6)
            "#,
        )
        .bind(detail.order_detail_id)
        .bind(detail.order_id)
        .bind(detail.brand_id)
        .bind(&detail.invoice_number)
        .bind(detail.status.as_str())
        .bind(detail.sort_order)
        .execute(&mut *self.tx)
        .await
        .map_err(|e| match e {
            sqlx::Error::Database(ref db_err) if db_err.is_unique_violation() => {
                AppError::Conflict(anyhow::anyhow!(
                    "Invoice number '{}' already exists",
                    detail.invoice_number
                ))
            }
            _ => AppError::DatabaseError(anyhow::anyhow!("Failed to insert order detail: {}", e)),
        })?;

        timer.observe_duration();

        Ok(())
    }

    #[instrument(skip(self, line), fields(invoice_detail_id = %line.invoice_detail_id))]
    async fn insert_invoice_detail(&mut self, line: &NewInvoiceDetail) -> Result<(), AppError> {
        let timer = DB_QUERY_DURATION
            .with_label_values(&["insert_invoice_detail"])
            .start_timer();

        sqlx::query(
            r#"
            INSERT INTO invoice_details (invoice_detail_id, order_detail_id, variant_id, product_name, quantity, price, total, sort_order)
            VALUES ($1, $2, $3, $4, $5, $6, $7, $8)
            "#,
        )
        .bind(line.invoice_detail_id)
        .bind(line.order_detail_id)
        .bind(line.variant_id)
        .bind(&line.product_name)
        .bind(line.quantity)
        .bind(line.price)
        .bind(line.total)
        .bind(line.sort_order)
        .execute(&mut *self.tx)
        .await
        .map_err(|e| {
            AppError::DatabaseError(anyhow::anyhow!("Failed to insert invoice detail: {}", e))
        })?;

        timer.observe_duration();

        Ok(())
    }

    #[instrument(skip(self), fields(order_id = %order_id))]
    async fn lock_order(&mut self, order_id: Uuid) -> Result<Option<Order>, AppError> {
        let timer = DB_QUERY_DURATION
            .with_label_values(&["lock_order"])
            .start_timer();

        let order = fetch_nested_order(&mut *self.tx, order_id, true).await?;

        timer.observe_duration();

        Ok(order)
    }

    #[instrument(skip(self), fields(order_detail_id = %order_detail_id))]
    async fn set_detail_totals(
        &mut self,
        order_detail_id: Uuid,
        subtotal: i64,
        total: i64,
        voucher_id: Option<Uuid>,
    ) -> Result<(), AppError> {
        let timer = DB_QUERY_DURATION
            .with_label_values(&["set_detail_totals"])
            .start_timer();

        sqlx::query(
            "UPDATE order_details SET subtotal = $2, total = $3, voucher_id = $4 WHERE order_detail_id = $1",
        )
        .bind(order_detail_id)
        .bind(subtotal)
        .bind(total)
        .bind(voucher_id)
        .execute(&mut *self.tx)
        .await
        .map_err(|e| {
            AppError::DatabaseError(anyhow::anyhow!("Failed to update order detail: {}", e))
        })?;

        timer.observe_duration();

        Ok(())
    }

    #[instrument(skip(self), fields(order_id = %order_id))]
    async fn set_order_totals(
        &mut self,
        order_id: Uuid,
        subtotal: i64,
        total: i64,
        voucher_id: Option<Uuid>,
        priced_utc: DateTime<Utc>,
    ) -> Result<(), AppError> {
        let timer = DB_QUERY_DURATION
            .with_label_values(&["set_order_totals"])
            .start_timer();

        sqlx::query(
            r#"
            UPDATE orders
            SET subtotal = $2, total = $3, voucher_id = $4, priced_utc = $5, updated_utc = $5
            WHERE order_id = $1
            "#,
        )
        .bind(order_id)
        .bind(subtotal)
        .bind(total)
        .bind(voucher_id)
        .bind(priced_utc)
        .execute(&mut *self.tx)
        .await
        .map_err(|e| AppError::DatabaseError(anyhow::anyhow!("Failed to update order: {}", e)))?;

        timer.observe_duration();

        Ok(())
    }

    #[instrument(skip(self), fields(voucher_id = %voucher_id))]
    async fn consume_voucher(&mut self, voucher_id: Uuid) -> Result<bool, AppError> {
        let timer = DB_QUERY_DURATION
            .with_label_values(&["consume_voucher"])
            .start_timer();

        let consumed = sqlx::query(
            "UPDATE vouchers SET stock = stock - 1 WHERE voucher_id = $1 AND stock > 0",
        )
        .bind(voucher_id)
        .execute(&mut *self.tx)
        .await
        .map_err(|e| AppError::DatabaseError(anyhow::anyhow!("Failed to consume voucher: {}", e)))?
        .rows_affected();

        timer.observe_duration();

        Ok(consumed == 1)
    }

    async fn commit(self: Box<Self>) -> Result<(), AppError> {
        self.tx.commit().await.map_err(|e| {
            AppError::DatabaseError(anyhow::anyhow!("Failed to commit transaction: {}", e))
        })
    }

    async fn rollback(self: Box<Self>) -> Result<(), AppError> {
        self.tx.rollback().await.map_err(|e| {
            AppError::DatabaseError(anyhow::anyhow!("Failed to roll back transaction: {}", e))
        })
    }
}

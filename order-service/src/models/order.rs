//! Order aggregate: one order, one detail per brand, one invoice line per variant.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use sqlx::FromRow;
use uuid::Uuid;

/// Order lifecycle status. Shared by orders and their per-brand details.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum OrderStatus {
    AwaitingPayment,
    Expired,
    Paid,
    Pending,
    Processing,
    Delivery,
    Completed,
    RefundRequested,
    RefundRejected,
    RefundCompleted,
}

impl OrderStatus {
    pub const ALL: [OrderStatus; 10] = [
        OrderStatus::AwaitingPayment,
        OrderStatus::Expired,
        OrderStatus::Paid,
        OrderStatus::Pending,
        OrderStatus::Processing,
        OrderStatus::Delivery,
        OrderStatus::Completed,
        OrderStatus::RefundRequested,
        OrderStatus::RefundRejected,
        OrderStatus::RefundCompleted,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            OrderStatus::AwaitingPayment => "awaiting_payment",
            OrderStatus::Expired => "expired",
            OrderStatus::Paid => "paid",
            OrderStatus::Pending => "pending",
            OrderStatus::Processing => "processing",
            OrderStatus::Delivery => "delivery",
            OrderStatus::Completed => "completed",
            OrderStatus::RefundRequested => "refund_requested",
            OrderStatus::RefundRejected => "refund_rejected",
            OrderStatus::RefundCompleted => "refund_completed",
        }
    }
}

impl std::str::FromStr for OrderStatus {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        OrderStatus::ALL
            .into_iter()
            .find(|status| status.as_str() == s)
            .ok_or_else(|| format!("Invalid order status: {}", s))
    }
}

impl std::fmt::Display for OrderStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

/// Payment-invoice issuance state, tracked apart from the order lifecycle.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum InvoiceStatus {
    Pending,
    Issued,
    Failed,
    /// Retries stopped: the order cannot be priced or ran out of attempts.
    Abandoned,
}

impl InvoiceStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            InvoiceStatus::Pending => "pending",
            InvoiceStatus::Issued => "issued",
            InvoiceStatus::Failed => "failed",
            InvoiceStatus::Abandoned => "abandoned",
        }
    }

    pub fn from_string(s: &str) -> Self {
        match s {
            "issued" => InvoiceStatus::Issued,
            "failed" => InvoiceStatus::Failed,
            "abandoned" => InvoiceStatus::Abandoned,
            _ => InvoiceStatus::Pending,
        }
    }
}

/// Persisted order with its nested details.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, FromRow)]
pub struct Order {
    pub order_id: Uuid,
    pub user_id: Uuid,
    pub buyer_name: String,
    pub buyer_email: String,
    pub buyer_phone: String,
    pub receiver: String,
    pub phone_number: String,
    pub city: String,
    pub postal_code: String,
    pub address: String,
    pub subtotal: i64,
    pub total: i64,
    pub voucher_id: Option<Uuid>,
    pub requested_voucher_id: Option<Uuid>,
    pub status: String,
    pub invoice_status: String,
    pub invoice_id: Option<String>,
    pub invoice_url: Option<String>,
    pub invoice_error: Option<String>,
    pub invoice_attempts: i32,
    pub next_attempt_utc: Option<DateTime<Utc>>,
    pub priced_utc: Option<DateTime<Utc>>,
    pub created_utc: DateTime<Utc>,
    pub updated_utc: DateTime<Utc>,
    #[sqlx(skip)]
    #[serde(default)]
    pub order_details: Vec<OrderDetail>,
}

impl Order {
    pub fn parsed_status(&self) -> Option<OrderStatus> {
        self.status.parse().ok()
    }

    pub fn parsed_invoice_status(&self) -> InvoiceStatus {
        InvoiceStatus::from_string(&self.invoice_status)
    }

    /// Totals are written exactly once, by the pricing phase.
    pub fn is_priced(&self) -> bool {
        self.priced_utc.is_some()
    }

    pub fn buyer(&self) -> BuyerProfile {
        BuyerProfile {
            user_id: self.user_id,
            name: self.buyer_name.clone(),
            email: self.buyer_email.clone(),
            phone: self.buyer_phone.clone(),
        }
    }

    pub fn shipping(&self) -> ShippingAddress {
        ShippingAddress {
            receiver: self.receiver.clone(),
            phone_number: self.phone_number.clone(),
            city: self.city.clone(),
            postal_code: self.postal_code.clone(),
            address: self.address.clone(),
        }
    }
}

/// One brand's slice of an order.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, FromRow)]
pub struct OrderDetail {
    pub order_detail_id: Uuid,
    pub order_id: Uuid,
    pub brand_id: Uuid,
    pub invoice_number: String,
    pub subtotal: i64,
    pub total: i64,
    pub voucher_id: Option<Uuid>,
    pub status: String,
    pub sort_order: i32,
    pub created_utc: DateTime<Utc>,
    #[sqlx(skip)]
    #[serde(default)]
    pub invoice_details: Vec<InvoiceDetail>,
}

/// One product-variant line. Name and price are snapshots taken at checkout.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, FromRow)]
pub struct InvoiceDetail {
    pub invoice_detail_id: Uuid,
    pub order_detail_id: Uuid,
    pub variant_id: Uuid,
    pub product_name: String,
    pub quantity: i32,
    pub price: i64,
    pub total: i64,
    pub sort_order: i32,
    pub created_utc: DateTime<Utc>,
}

/// Purchasing user's contact snapshot, forwarded to the invoice provider.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct BuyerProfile {
    pub user_id: Uuid,
    pub name: String,
    pub email: String,
    pub phone: String,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ShippingAddress {
    pub receiver: String,
    pub phone_number: String,
    pub city: String,
    pub postal_code: String,
    pub address: String,
}

/// Input for inserting an order shell (zero totals).
#[derive(Debug, Clone, PartialEq)]
pub struct NewOrder {
    pub order_id: Uuid,
    pub buyer: BuyerProfile,
    pub shipping: ShippingAddress,
    pub requested_voucher_id: Option<Uuid>,
    pub status: OrderStatus,
}

/// Input for inserting an order detail (zero totals).
#[derive(Debug, Clone, PartialEq)]
pub struct NewOrderDetail {
    pub order_detail_id: Uuid,
    pub order_id: Uuid,
    pub brand_id: Uuid,
    pub invoice_number: String,
    pub status: OrderStatus,
    pub sort_order: i32,
}

/// Input for inserting an invoice line.
#[derive(Debug, Clone, PartialEq)]
pub struct NewInvoiceDetail {
    pub invoice_detail_id: Uuid,
    pub order_detail_id: Uuid,
    pub variant_id: Uuid,
    pub product_name: String,
    pub quantity: i32,
    pub price: i64,
    pub total: i64,
    pub sort_order: i32,
}

/// An order due for another invoice attempt.
#[derive(Debug, Clone, Copy, PartialEq, Eq, FromRow)]
pub struct InvoiceRetry {
    pub order_id: Uuid,
    pub invoice_attempts: i32,
}

/// Filter parameters for listing a user's orders.
#[derive(Debug, Clone)]
pub struct ListOrdersFilter {
    pub status: Option<OrderStatus>,
    pub page: i64,
    pub page_size: i64,
}

impl Default for ListOrdersFilter {
    fn default() -> Self {
        Self {
            status: None,
            page: 1,
            page_size: 20,
        }
    }
}

impl ListOrdersFilter {
    pub fn limit(&self) -> i64 {
        self.page_size.clamp(1, 100)
    }

    pub fn offset(&self) -> i64 {
        (self.page.max(1) - 1).saturating_mul(self.limit())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn status_round_trips_through_its_wire_name() {
        for status in OrderStatus::ALL {
            assert_eq!(status.as_str().parse::<OrderStatus>(), Ok(status));
        }
        assert!("cancelled".parse::<OrderStatus>().is_err());
    }

    #[test]
    fn unknown_invoice_status_reads_as_pending() {
        assert_eq!(InvoiceStatus::from_string("issued"), InvoiceStatus::Issued);
        assert_eq!(
            InvoiceStatus::from_string("abandoned"),
            InvoiceStatus::Abandoned
        );
        assert_eq!(InvoiceStatus::from_string("garbage"), InvoiceStatus::Pending);
    }

    #[test]
    fn list_filter_clamps_page_size() {
        let filter = ListOrdersFilter {
            status: None,
            page: 3,
            page_size: 500,
        };
        assert_eq!(filter.limit(), 100);
        assert_eq!(filter.offset(), 200);

        let filter = ListOrdersFilter {
            status: None,
            page: 0,
            page_size: 0,
        };
        assert_eq!(filter.limit(), 1);
        assert_eq!(filter.offset(), 0);
    }

    #[test]
    fn list_filter_offset_saturates_for_huge_pages() {
        let filter = ListOrdersFilter {
            status: None,
            page: i64::MAX,
            page_size: 20,
        };
        assert_eq!(filter.offset(), i64::MAX);
    }
}

use serde::{Deserialize, Serialize};
use uuid::Uuid;
use validator::Validate;

use crate::models::{CartLine, Order, ShippingAddress};
use crate::settlement::{InvoiceRef, Settlement};

#[derive(Debug, Deserialize, Validate)]
pub struct CreateOrderRequest {
    #[validate(length(min = 1, message = "Receiver is required"))]
    pub receiver: String,

    #[validate(length(min = 1, message = "Phone number is required"))]
    pub phone_number: String,

    #[validate(length(min = 1, message = "City is required"))]
    pub city: String,

    #[validate(length(min = 1, message = "Postal code is required"))]
    pub postal_code: String,

    #[validate(length(min = 1, message = "Address is required"))]
    pub address: String,

    pub voucher_id: Option<Uuid>,

    #[validate(length(min = 1, message = "At least one item is required"))]
    pub items: Vec<CartItem>,
}

impl CreateOrderRequest {
    pub fn shipping(&self) -> ShippingAddress {
        ShippingAddress {
            receiver: self.receiver.clone(),
            phone_number: self.phone_number.clone(),
            city: self.city.clone(),
            postal_code: self.postal_code.clone(),
            address: self.address.clone(),
        }
    }

    pub fn lines(&self) -> Vec<CartLine> {
        self.items
            .iter()
            .map(|item| CartLine {
                variant_id: item.variant_id,
                quantity: item.quantity,
            })
            .collect()
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CartItem {
    pub variant_id: Uuid,
    pub quantity: i32,
}

#[derive(Debug, Serialize)]
pub struct SettlementResponse {
    pub order: Order,
    pub invoice: InvoiceRef,
}

impl From<Settlement> for SettlementResponse {
    fn from(settlement: Settlement) -> Self {
        Self {
            order: settlement.order,
            invoice: settlement.invoice,
        }
    }
}

/// Body of a 502 after the order was committed but invoicing failed.
#[derive(Debug, Serialize)]
pub struct InvoiceFailureResponse {
    pub error: String,
    pub details: String,
    pub order: Order,
}

#[derive(Debug, Deserialize)]
pub struct ListOrdersQuery {
    pub status: Option<String>,
    pub page: Option<i64>,
    pub page_size: Option<i64>,
}

#[derive(Debug, Serialize)]
pub struct OrderListResponse {
    pub orders: Vec<Order>,
    pub page: i64,
    pub page_size: i64,
}

#[derive(Debug, Deserialize, Validate)]
pub struct UpdateStatusRequest {
    #[validate(length(min = 1, message = "Status is required"))]
    pub status: String,
}

#[derive(Debug, Serialize)]
pub struct StatusResponse {
    pub order_id: Uuid,
    pub status: String,
}

/// Invoice provider callback payload. Only the fields this service acts on.
#[derive(Debug, Deserialize)]
pub struct InvoiceCallback {
    #[serde(default)]
    pub id: Option<String>,
    pub external_id: String,
    pub status: String,
}

#[cfg(test)]
mod tests {
    use super::*;

    fn request(items: Vec<CartItem>) -> CreateOrderRequest {
        CreateOrderRequest {
            receiver: "Ayu".to_string(),
            phone_number: "+628123456789".to_string(),
            city: "Bandung".to_string(),
            postal_code: "40115".to_string(),
            address: "Jl. Braga 1".to_string(),
            voucher_id: None,
            items,
        }
    }

    #[test]
    fn empty_cart_fails_validation_on_items() {
        let errors = request(Vec::new()).validate().unwrap_err();
        assert!(errors.field_errors().contains_key("items"));
    }

    #[test]
    fn cart_with_items_passes_validation() {
        let items = vec![CartItem {
            variant_id: Uuid::new_v4(),
            quantity: 2,
        }];
        assert!(request(items).validate().is_ok());
    }
}

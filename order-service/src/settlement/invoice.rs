//! Payment-invoice request built from a priced order.

use serde::{Deserialize, Serialize};

use crate::models::Order;
use crate::settlement::pricing::discount_fees;

const NOTIFICATION_CHANNELS: [&str; 2] = ["email", "sms"];

#[derive(Debug, Clone)]
pub struct InvoiceSettings {
    pub currency: String,
    pub duration_seconds: u64,
    pub country: String,
}

impl Default for InvoiceSettings {
    fn default() -> Self {
        Self {
            currency: "IDR".to_string(),
            duration_seconds: 86400,
            country: "Indonesia".to_string(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct InvoiceRequest {
    pub external_id: String,
    pub amount: i64,
    pub description: String,
    pub invoice_duration: u64,
    pub customer: InvoiceCustomer,
    pub customer_notification_preference: NotificationPreference,
    pub currency: String,
    pub items: Vec<InvoiceItem>,
    pub fees: Vec<InvoiceFee>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct InvoiceCustomer {
    pub given_names: String,
    pub email: String,
    pub mobile_number: String,
    pub address: String,
    pub addresses: Vec<CustomerAddress>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CustomerAddress {
    pub country: String,
    pub street_line1: String,
    pub city: String,
    pub postal_code: String,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct NotificationPreference {
    pub invoice_created: Vec<String>,
    pub invoice_reminder: Vec<String>,
    pub invoice_paid: Vec<String>,
    pub invoice_expired: Vec<String>,
}

impl Default for NotificationPreference {
    fn default() -> Self {
        let channels: Vec<String> = NOTIFICATION_CHANNELS.iter().map(|c| c.to_string()).collect();
        Self {
            invoice_created: channels.clone(),
            invoice_reminder: channels.clone(),
            invoice_paid: channels.clone(),
            invoice_expired: channels,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct InvoiceItem {
    pub name: String,
    pub price: i64,
    pub quantity: i32,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct InvoiceFee {
    #[serde(rename = "type")]
    pub fee_type: String,
    pub value: i64,
}

impl InvoiceFee {
    pub fn discount(value: i64) -> Self {
        Self {
            fee_type: "discount".to_string(),
            value,
        }
    }
}

/// Provider reference for an issued invoice.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct InvoiceRef {
    pub invoice_id: String,
    pub invoice_url: String,
}

/// Builds the provider request from persisted rows only, so every retry for
/// the same order sends the same request.
pub fn build_request(order: &Order, settings: &InvoiceSettings) -> InvoiceRequest {
    let items = order
        .order_details
        .iter()
        .flat_map(|detail| detail.invoice_details.iter())
        .map(|line| InvoiceItem {
            name: line.product_name.clone(),
            price: line.price,
            quantity: line.quantity,
        })
        .collect();

    InvoiceRequest {
        external_id: order.order_id.to_string(),
        amount: order.total,
        description: format!("Invoice for product(s) purchase, order {}", order.order_id),
        invoice_duration: settings.duration_seconds,
        customer: InvoiceCustomer {
            given_names: order.buyer_name.clone(),
            email: order.buyer_email.clone(),
            mobile_number: order.buyer_phone.clone(),
            address: order.address.clone(),
            addresses: vec![CustomerAddress {
                country: settings.country.clone(),
                street_line1: order.address.clone(),
                city: order.city.clone(),
                postal_code: order.postal_code.clone(),
            }],
        },
        customer_notification_preference: NotificationPreference::default(),
        currency: settings.currency.clone(),
        items,
        fees: discount_fees(order),
    }
}

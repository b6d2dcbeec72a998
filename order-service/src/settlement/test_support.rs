use chrono::Utc;
use uuid::Uuid;

use crate::models::{InvoiceDetail, Order, OrderDetail};

/// A brand and the unit prices of its lines, each with quantity 1.
pub struct Brand<'a>(pub Uuid, pub &'a [i64]);

pub fn order_with_details(brands: &[Brand]) -> Order {
    let now = Utc::now();
    let order_id = Uuid::new_v4();
    let user_id = Uuid::new_v4();

    let order_details = brands
        .iter()
        .enumerate()
        .map(|(position, Brand(brand_id, prices))| {
            let order_detail_id = Uuid::new_v4();
            OrderDetail {
                order_detail_id,
                order_id,
                brand_id: *brand_id,
                invoice_number: format!("{}/{}/{}/{}", user_id, order_id, brand_id, now.timestamp()),
                subtotal: 0,
                total: 0,
                voucher_id: None,
                status: "awaiting_payment".to_string(),
                sort_order: position as i32,
                created_utc: now,
                invoice_details: prices
                    .iter()
                    .enumerate()
                    .map(|(line_position, price)| InvoiceDetail {
                        invoice_detail_id: Uuid::new_v4(),
                        order_detail_id,
                        variant_id: Uuid::new_v4(),
                        product_name: format!("Item {}", price),
                        quantity: 1,
                        price: *price,
                        total: *price,
                        sort_order: line_position as i32,
                        created_utc: now,
                    })
                    .collect(),
            }
        })
        .collect();

    Order {
        order_id,
        user_id,
        buyer_name: "Ayu".to_string(),
        buyer_email: "ayu@example.com".to_string(),
        buyer_phone: "+628123456789".to_string(),
        receiver: "Ayu".to_string(),
        phone_number: "+628123456789".to_string(),
        city: "Bandung".to_string(),
        postal_code: "40115".to_string(),
        address: "Jl. Braga 1".to_string(),
        subtotal: 0,
        total: 0,
        voucher_id: None,
        requested_voucher_id: None,
        status: "awaiting_payment".to_string(),
        invoice_status: "pending".to_string(),
        invoice_id: None,
        invoice_url: None,
        invoice_error: None,
        invoice_attempts: 0,
        next_attempt_utc: None,
        priced_utc: None,
        created_utc: now,
        updated_utc: now,
        order_details,
    }
}

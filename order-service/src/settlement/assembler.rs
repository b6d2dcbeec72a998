use chrono::{DateTime, Utc};
use uuid::Uuid;

use crate::models::{
    BuyerProfile, NewInvoiceDetail, NewOrder, NewOrderDetail, OrderStatus, ResolvedLine,
    ShippingAddress,
};
use crate::settlement::errors::SettlementFailure;

/// Drafts for everything T1 inserts.
#[derive(Debug, Clone)]
pub struct AssembledOrder {
    pub order: NewOrder,
    pub details: Vec<NewOrderDetail>,
    pub lines: Vec<NewInvoiceDetail>,
}

/// `userID/orderID/brandID/unixTimestamp`.
pub fn invoice_number(user_id: Uuid, order_id: Uuid, brand_id: Uuid, at: DateTime<Utc>) -> String {
    format!("{}/{}/{}/{}", user_id, order_id, brand_id, at.timestamp())
}

/// Splits resolved lines into one detail per brand, in the order brands first
/// appear in the cart, with one invoice line per variant.
pub fn assemble(
    buyer: BuyerProfile,
    shipping: ShippingAddress,
    requested_voucher_id: Option<Uuid>,
    lines: Vec<ResolvedLine>,
    now: DateTime<Utc>,
) -> Result<AssembledOrder, SettlementFailure> {
    if lines.is_empty() {
        return Err(SettlementFailure::Validation(
            "Order must contain at least one line".to_string(),
        ));
    }

    let order_id = Uuid::new_v4();
    let mut by_brand: Vec<(Uuid, Vec<ResolvedLine>)> = Vec::new();
    for line in lines {
        match by_brand.iter_mut().find(|(brand_id, _)| *brand_id == line.brand_id) {
            Some((_, group)) => group.push(line),
            None => by_brand.push((line.brand_id, vec![line])),
        }
    }

    let mut details = Vec::with_capacity(by_brand.len());
    let mut invoice_lines = Vec::new();
    // Bounds every subtotal pricing computes later.
    let mut order_amount: i64 = 0;

    for (position, (brand_id, group)) in by_brand.into_iter().enumerate() {
        let order_detail_id = Uuid::new_v4();
        details.push(NewOrderDetail {
            order_detail_id,
            order_id,
            brand_id,
            invoice_number: invoice_number(buyer.user_id, order_id, brand_id, now),
            status: OrderStatus::AwaitingPayment,
            sort_order: position as i32,
        });

        for (line_position, line) in group.into_iter().enumerate() {
            let Some((total, running)) = line
                .total()
                .and_then(|total| order_amount.checked_add(total).map(|sum| (total, sum)))
            else {
                return Err(SettlementFailure::Validation(format!(
                    "Amount for variant {} is too large",
                    line.variant_id
                )));
            };
            order_amount = running;

            invoice_lines.push(NewInvoiceDetail {
                invoice_detail_id: Uuid::new_v4(),
                order_detail_id,
                variant_id: line.variant_id,
                product_name: line.product_name,
                quantity: line.quantity,
                price: line.price,
                total,
                sort_order: line_position as i32,
            });
        }
    }

    Ok(AssembledOrder {
        order: NewOrder {
            order_id,
            buyer,
            shipping,
            requested_voucher_id,
            status: OrderStatus::AwaitingPayment,
        },
        details,
        lines: invoice_lines,
    })
}

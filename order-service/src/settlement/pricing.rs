use uuid::Uuid;

use crate::models::{Order, OrderDetail};
use crate::settlement::invoice::InvoiceFee;
use crate::settlement::voucher::Discount;

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PricedDetail {
    pub order_detail_id: Uuid,
    pub subtotal: i64,
    pub total: i64,
    pub voucher_id: Option<Uuid>,
    /// `total - subtotal` when a brand discount applied. Always negative.
    pub discount_fee: Option<i64>,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PricedOrder {
    pub subtotal: i64,
    pub total: i64,
    pub details: Vec<PricedDetail>,
    /// Voucher that must lose one unit of stock for this pricing to commit.
    pub consumed_voucher: Option<Uuid>,
}

/// Prices one brand slice from its persisted invoice lines.
pub fn price_detail(detail: &OrderDetail, discount: &Discount) -> PricedDetail {
    let subtotal: i64 = detail.invoice_details.iter().map(|line| line.total).sum();

    match discount {
        Discount::Brand {
            voucher_id,
            brand_id,
            value,
        } if *brand_id == detail.brand_id => {
            let total = value.apply(subtotal);
            PricedDetail {
                order_detail_id: detail.order_detail_id,
                subtotal,
                total,
                voucher_id: Some(*voucher_id),
                discount_fee: (total < subtotal).then_some(total - subtotal),
            }
        }
        _ => PricedDetail {
            order_detail_id: detail.order_detail_id,
            subtotal,
            total: subtotal,
            voucher_id: None,
            discount_fee: None,
        },
    }
}

/// Prices every detail, then the order aggregate over the detail totals.
pub fn price_order(order: &Order, discount: &Discount) -> PricedOrder {
    let details: Vec<PricedDetail> = order
        .order_details
        .iter()
        .map(|detail| price_detail(detail, discount))
        .collect();

    let subtotal: i64 = details.iter().map(|detail| detail.total).sum();

    let (total, consumed_voucher) = match discount {
        Discount::Order { voucher_id, value } => (value.apply(subtotal), Some(*voucher_id)),
        Discount::Brand { .. } => (
            subtotal,
            details.iter().find_map(|detail| detail.voucher_id),
        ),
        Discount::NoDiscount => (subtotal, None),
    };

    PricedOrder {
        subtotal,
        total,
        details,
        consumed_voucher,
    }
}

/// Discount fee items for an already priced order, rebuilt from its rows.
pub fn discount_fees(order: &Order) -> Vec<InvoiceFee> {
    let mut fees: Vec<InvoiceFee> = order
        .order_details
        .iter()
        .filter(|detail| detail.total < detail.subtotal)
        .map(|detail| InvoiceFee::discount(detail.total - detail.subtotal))
        .collect();

    if order.total < order.subtotal {
        fees.push(InvoiceFee::discount(order.total - order.subtotal));
    }

    fees
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::settlement::test_support::{order_with_details, Brand};
    use crate::settlement::voucher::DiscountValue;

    #[test]
    fn no_voucher_totals_equal_subtotals() {
        let x = Uuid::new_v4();
        let order = order_with_details(&[Brand(x, &[1000, 2000])]);

        let priced = price_order(&order, &Discount::NoDiscount);

        assert_eq!(priced.details[0].subtotal, 3000);
        assert_eq!(priced.details[0].total, 3000);
        assert_eq!(priced.subtotal, 3000);
        assert_eq!(priced.total, 3000);
        assert_eq!(priced.consumed_voucher, None);
    }

    #[test]
    fn brand_voucher_discounts_only_its_brand() {
        let x = Uuid::new_v4();
        let y = Uuid::new_v4();
        let voucher_id = Uuid::new_v4();
        let order = order_with_details(&[Brand(x, &[1000, 2000]), Brand(y, &[700])]);

        let discount = Discount::Brand {
            voucher_id,
            brand_id: x,
            value: DiscountValue::Fixed(500),
        };
        let priced = price_order(&order, &discount);

        assert_eq!(priced.details[0].total, 2500);
        assert_eq!(priced.details[0].discount_fee, Some(-500));
        assert_eq!(priced.details[0].voucher_id, Some(voucher_id));
        assert_eq!(priced.details[1].total, 700);
        assert_eq!(priced.details[1].voucher_id, None);
        assert_eq!(priced.subtotal, 3200);
        assert_eq!(priced.total, 3200);
        assert_eq!(priced.consumed_voucher, Some(voucher_id));
    }

    #[test]
    fn brand_voucher_for_absent_brand_is_not_consumed() {
        let order = order_with_details(&[Brand(Uuid::new_v4(), &[1000])]);
        let discount = Discount::Brand {
            voucher_id: Uuid::new_v4(),
            brand_id: Uuid::new_v4(),
            value: DiscountValue::Percent(50),
        };

        let priced = price_order(&order, &discount);
        assert_eq!(priced.total, 1000);
        assert_eq!(priced.consumed_voucher, None);
    }

    #[test]
    fn order_voucher_leaves_details_untouched() {
        let x = Uuid::new_v4();
        let y = Uuid::new_v4();
        let voucher_id = Uuid::new_v4();
        let order = order_with_details(&[Brand(x, &[1000]), Brand(y, &[2000])]);

        let discount = Discount::Order {
            voucher_id,
            value: DiscountValue::Percent(10),
        };
        let priced = price_order(&order, &discount);

        assert_eq!(priced.details[0].total, priced.details[0].subtotal);
        assert_eq!(priced.details[1].total, priced.details[1].subtotal);
        assert_eq!(priced.subtotal, 3000);
        assert_eq!(priced.total, 2700);
        assert_eq!(priced.consumed_voucher, Some(voucher_id));
    }

    #[test]
    fn fees_are_rebuilt_from_persisted_totals() {
        let x = Uuid::new_v4();
        let mut order = order_with_details(&[Brand(x, &[1000, 2000])]);
        order.order_details[0].subtotal = 3000;
        order.order_details[0].total = 2500;
        order.subtotal = 2500;
        order.total = 2250;

        let fees = discount_fees(&order);
        assert_eq!(
            fees,
            vec![InvoiceFee::discount(-500), InvoiceFee::discount(-250)]
        );
    }
}

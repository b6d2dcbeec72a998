use chrono::{DateTime, Utc};
use tracing::instrument;
use uuid::Uuid;

use crate::models::{Voucher, SCOPE_BRAND, SCOPE_TOTAL};
use crate::settlement::errors::SettlementFailure;
use crate::settlement::gateways::VoucherGateway;

/// How much a voucher takes off a subtotal.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DiscountValue {
    Percent(i64),
    Fixed(i64),
}

impl DiscountValue {
    /// Discounted total for `subtotal`. Percentages truncate toward zero and
    /// the result never drops below zero.
    pub fn apply(&self, subtotal: i64) -> i64 {
        let discounted = match *self {
            DiscountValue::Percent(percent) => {
                // Widened so the product cannot overflow; the cut never exceeds `subtotal`.
                let cut = i128::from(subtotal) * i128::from(percent) / 100;
                subtotal.saturating_sub(i64::try_from(cut).unwrap_or(i64::MAX))
            }
            DiscountValue::Fixed(amount) => subtotal.saturating_sub(amount),
        };
        discounted.max(0)
    }
}

/// Where a voucher applies. An order gets at most one discount, at one level.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Discount {
    NoDiscount,
    Brand {
        voucher_id: Uuid,
        brand_id: Uuid,
        value: DiscountValue,
    },
    Order {
        voucher_id: Uuid,
        value: DiscountValue,
    },
}

impl Discount {
    pub fn voucher_id(&self) -> Option<Uuid> {
        match self {
            Discount::NoDiscount => None,
            Discount::Brand { voucher_id, .. } | Discount::Order { voucher_id, .. } => {
                Some(*voucher_id)
            }
        }
    }

    pub fn scope_label(&self) -> &'static str {
        match self {
            Discount::NoDiscount => "none",
            Discount::Brand { .. } => SCOPE_BRAND,
            Discount::Order { .. } => SCOPE_TOTAL,
        }
    }
}

impl TryFrom<&Voucher> for Discount {
    type Error = SettlementFailure;

    fn try_from(voucher: &Voucher) -> Result<Self, Self::Error> {
        let value = if voucher.is_percent {
            if !(0..=100).contains(&voucher.value) {
                return Err(SettlementFailure::Validation(format!(
                    "Voucher {} has a percentage outside 0..=100",
                    voucher.voucher_id
                )));
            }
            DiscountValue::Percent(voucher.value)
        } else {
            if voucher.value < 0 {
                return Err(SettlementFailure::Validation(format!(
                    "Voucher {} has a negative value",
                    voucher.voucher_id
                )));
            }
            DiscountValue::Fixed(voucher.value)
        };

        match voucher.scope.as_str() {
            SCOPE_BRAND => {
                let brand_id = voucher.brand_id.ok_or_else(|| {
                    SettlementFailure::Validation(format!(
                        "Brand voucher {} has no brand",
                        voucher.voucher_id
                    ))
                })?;
                Ok(Discount::Brand {
                    voucher_id: voucher.voucher_id,
                    brand_id,
                    value,
                })
            }
            SCOPE_TOTAL => Ok(Discount::Order {
                voucher_id: voucher.voucher_id,
                value,
            }),
            other => Err(SettlementFailure::Validation(format!(
                "Voucher {} has unknown scope '{}'",
                voucher.voucher_id, other
            ))),
        }
    }
}

/// Loads the requested voucher as a typed discount. No id means no discount.
#[instrument(skip(vouchers))]
pub async fn resolve_discount(
    vouchers: &dyn VoucherGateway,
    voucher_id: Option<Uuid>,
    now: DateTime<Utc>,
) -> Result<Discount, SettlementFailure> {
    let Some(voucher_id) = voucher_id.filter(|id| !id.is_nil()) else {
        return Ok(Discount::NoDiscount);
    };

    let voucher = vouchers
        .get_active_voucher(voucher_id, now)
        .await?
        .ok_or_else(|| SettlementFailure::NotFound(format!("Voucher {} not found", voucher_id)))?;

    Discount::try_from(&voucher)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn voucher(scope: &str, brand_id: Option<Uuid>, is_percent: bool, value: i64) -> Voucher {
        Voucher {
            voucher_id: Uuid::new_v4(),
            scope: scope.to_string(),
            name: "Test".to_string(),
            code: "TEST".to_string(),
            brand_id,
            is_percent,
            value,
            stock: 1,
            is_active: true,
            effective_utc: Utc::now(),
            expired_utc: None,
        }
    }

    #[test]
    fn percent_truncates_toward_zero() {
        assert_eq!(DiscountValue::Percent(10).apply(999), 900);
        assert_eq!(DiscountValue::Percent(0).apply(999), 999);
        assert_eq!(DiscountValue::Percent(100).apply(999), 0);
    }

    #[test]
    fn fixed_discount_is_clamped_at_zero() {
        assert_eq!(DiscountValue::Fixed(500).apply(3000), 2500);
        assert_eq!(DiscountValue::Fixed(5000).apply(3000), 0);
    }

    #[test]
    fn percent_of_a_huge_subtotal_does_not_overflow() {
        assert_eq!(DiscountValue::Percent(50).apply(i64::MAX), i64::MAX - i64::MAX / 2);
        assert_eq!(DiscountValue::Percent(100).apply(i64::MAX), 0);
        assert_eq!(DiscountValue::Fixed(i64::MAX).apply(0), 0);
    }

    #[test]
    fn brand_scope_carries_its_brand() {
        let brand = Uuid::new_v4();
        let v = voucher("brand", Some(brand), false, 500);
        let discount = Discount::try_from(&v).unwrap();
        assert_eq!(
            discount,
            Discount::Brand {
                voucher_id: v.voucher_id,
                brand_id: brand,
                value: DiscountValue::Fixed(500),
            }
        );
    }

    #[test]
    fn total_scope_is_order_level() {
        let v = voucher("total", None, true, 10);
        assert!(matches!(
            Discount::try_from(&v).unwrap(),
            Discount::Order {
                value: DiscountValue::Percent(10),
                ..
            }
        ));
    }

    #[test]
    fn unknown_scope_is_rejected() {
        let v = voucher("shipping", None, false, 500);
        assert!(matches!(
            Discount::try_from(&v),
            Err(SettlementFailure::Validation(_))
        ));
    }

    #[test]
    fn brand_scope_without_brand_is_rejected() {
        let v = voucher("brand", None, false, 500);
        assert!(matches!(
            Discount::try_from(&v),
            Err(SettlementFailure::Validation(_))
        ));
    }

    #[test]
    fn percentage_above_hundred_is_rejected() {
        let v = voucher("total", None, true, 150);
        assert!(Discount::try_from(&v).is_err());
    }
}

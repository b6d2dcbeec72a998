use serde::{Deserialize, Serialize};
use sqlx::FromRow;
use uuid::Uuid;

/// Purchasable product variant joined with its owning product.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, FromRow)]
pub struct Variant {
    pub variant_id: Uuid,
    pub product_id: Uuid,
    pub brand_id: Uuid,
    pub product_name: String,
    pub price: i64,
    pub stock: i32,
    pub is_active: bool,
}

/// One requested cart line.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct CartLine {
    pub variant_id: Uuid,
    pub quantity: i32,
}

/// Cart line joined with the catalog snapshot it was priced from.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ResolvedLine {
    pub variant_id: Uuid,
    pub brand_id: Uuid,
    pub product_name: String,
    pub price: i64,
    pub quantity: i32,
}

impl ResolvedLine {
    /// `price * quantity`, or `None` when it does not fit an i64.
    pub fn total(&self) -> Option<i64> {
        self.price.checked_mul(i64::from(self.quantity))
    }
}

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use sqlx::FromRow;
use uuid::Uuid;

pub const SCOPE_BRAND: &str = "brand";
pub const SCOPE_TOTAL: &str = "total";

/// Stored discount rule. `scope` is kept as the raw column value; it is
/// turned into a typed discount by the voucher resolver.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, FromRow)]
pub struct Voucher {
    pub voucher_id: Uuid,
    pub scope: String,
    pub name: String,
    pub code: String,
    pub brand_id: Option<Uuid>,
    pub is_percent: bool,
    pub value: i64,
    pub stock: i32,
    pub is_active: bool,
    pub effective_utc: DateTime<Utc>,
    pub expired_utc: Option<DateTime<Utc>>,
}

impl Voucher {
    /// Active and inside its validity window.
    pub fn is_redeemable_at(&self, now: DateTime<Utc>) -> bool {
        self.is_active
            && self.effective_utc <= now
            && self.expired_utc.map_or(true, |expired| now < expired)
    }
}

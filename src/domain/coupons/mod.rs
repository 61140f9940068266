//! Coupon registry and discount math

use rust_decimal::Decimal;
use serde::Serialize;
use std::sync::OnceLock;
use crate::domain::value_objects::format_amount;

#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum CouponKind {
    /// Absolute currency amount off the subtotal.
    Fixed,
    /// 0-100 applied to the subtotal.
    Percentage,
}

#[derive(Clone, Debug, PartialEq, Serialize)]
pub struct Coupon {
    pub code: &'static str,
    pub discount: Decimal,
    pub kind: CouponKind,
}

static REGISTRY: OnceLock<Vec<Coupon>> = OnceLock::new();

/// The static coupon registry. Codes are matched case-insensitively.
pub fn registry() -> &'static [Coupon] {
    REGISTRY.get_or_init(|| vec![
        Coupon { code: "SAVE10", discount: Decimal::new(10, 0), kind: CouponKind::Fixed },
        Coupon { code: "SUMMER25", discount: Decimal::new(25, 0), kind: CouponKind::Percentage },
        Coupon { code: "WELCOME15", discount: Decimal::new(15, 0), kind: CouponKind::Percentage },
        Coupon { code: "FESTIVE100", discount: Decimal::new(100, 0), kind: CouponKind::Fixed },
    ])
}

/// Case-insensitive lookup on the trimmed code.
///
/// Async so call sites keep a stable integration point for a future remote
/// registry; today it resolves against the static table.
pub async fn find_coupon(code: &str) -> Option<&'static Coupon> {
    let code = code.trim();
    registry().iter().find(|c| c.code.eq_ignore_ascii_case(code))
}

impl Coupon {
    /// Full-precision discount; rounding happens only at display boundaries.
    pub fn discount_amount(&self, subtotal: Decimal) -> Decimal {
        match self.kind {
            CouponKind::Fixed => self.discount,
            CouponKind::Percentage => subtotal * self.discount / Decimal::ONE_HUNDRED,
        }
    }

    /// `max(0, subtotal - discount)` formatted to two places. Never negative.
    pub fn final_total(&self, subtotal: Decimal) -> String {
        format_amount((subtotal - self.discount_amount(subtotal)).max(Decimal::ZERO))
    }

    /// Minus-prefixed display string; percentage coupons also show the rate.
    pub fn formatted_discount(&self, subtotal: Decimal) -> String {
        let amount = format_amount(self.discount_amount(subtotal));
        match self.kind {
            CouponKind::Fixed => format!("-{amount}"),
            CouponKind::Percentage => format!("-{amount} ({}%)", self.discount),
        }
    }
}

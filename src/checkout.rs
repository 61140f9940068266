//! Checkout coupon state
//!
//! Holds the coupon input and the single applied coupon for a checkout in
//! progress; all derived amounts are pure functions of (subtotal, applied).

use rust_decimal::Decimal;
use crate::domain::coupons::{find_coupon, registry, Coupon, CouponKind};
use crate::domain::events::Notifier;
use crate::domain::value_objects::format_amount;

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum CouponOutcome {
    Applied,
    Invalid,
    /// Empty or whitespace-only input; nothing happened.
    NoCode,
}

pub struct CheckoutSession {
    coupon_code: String,
    applied: Option<&'static Coupon>,
    is_applying: bool,
    notices: Notifier,
}

impl CheckoutSession {
    pub fn new(notices: Notifier) -> Self {
        Self { coupon_code: String::new(), applied: None, is_applying: false, notices }
    }

    pub fn coupon_code(&self) -> &str { &self.coupon_code }
    pub fn set_coupon_code(&mut self, code: impl Into<String>) { self.coupon_code = code.into(); }
    pub fn applied_coupon(&self) -> Option<&'static Coupon> { self.applied }
    pub fn is_applying(&self) -> bool { self.is_applying }

    /// Validates the entered code against the registry. A match replaces any
    /// previously applied coupon (only one is active at a time) and clears
    /// the input; an invalid code leaves the input populated so the user can
    /// correct it.
    pub async fn apply_coupon(&mut self) -> CouponOutcome {
        let code = self.coupon_code.trim().to_string();
        if code.is_empty() { return CouponOutcome::NoCode; }

        self.is_applying = true;
        let found = find_coupon(&code).await;
        self.is_applying = false;

        match found {
            Some(coupon) => {
                self.applied = Some(coupon);
                self.coupon_code.clear();
                match coupon.kind {
                    CouponKind::Percentage => {
                        self.notices.success(format!("Coupon applied: {}% off.", coupon.discount));
                    }
                    CouponKind::Fixed => {
                        self.notices.success(format!("Coupon applied: {} off.", format_amount(coupon.discount)));
                    }
                }
                CouponOutcome::Applied
            }
            None => {
                self.notices.error(format!("\"{code}\" is not a valid coupon code. Try {}.", registry()[0].code));
                CouponOutcome::Invalid
            }
        }
    }

    /// Clears the applied coupon. Idempotent.
    pub fn remove_coupon(&mut self) {
        if self.applied.take().is_some() {
            self.notices.info("Coupon removed.");
        }
    }

    /// 0 with no coupon applied; full precision otherwise.
    pub fn discount_amount(&self, subtotal: Decimal) -> Decimal {
        self.applied.map_or(Decimal::ZERO, |c| c.discount_amount(subtotal))
    }

    /// `max(0, subtotal - discount)`, formatted. Never negative.
    pub fn final_total(&self, subtotal: Decimal) -> String {
        format_amount((subtotal - self.discount_amount(subtotal)).max(Decimal::ZERO))
    }

    /// Minus-prefixed display string, absent when no coupon is applied.
    pub fn formatted_discount(&self, subtotal: Decimal) -> Option<String> {
        self.applied.map(|c| c.formatted_discount(subtotal))
    }
}

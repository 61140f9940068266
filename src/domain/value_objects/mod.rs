//! Value Objects for the storefront

use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use std::fmt;

/// Rounds at the display boundary only: two decimal places, as a plain string.
pub fn format_amount(amount: Decimal) -> String {
    format!("{:.2}", amount.round_dp(2))
}

/// Owner of a cart: an authenticated user identifier, or the guest sentinel.
#[derive(Clone, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct OwnerId(String);

impl OwnerId {
    pub const GUEST: &'static str = "guest";

    /// Blank identifiers collapse to the guest sentinel.
    pub fn new(value: impl Into<String>) -> Self {
        let value = value.into().trim().to_string();
        if value.is_empty() { Self::guest() } else { Self(value) }
    }

    pub fn guest() -> Self { Self(Self::GUEST.to_string()) }
    pub fn is_guest(&self) -> bool { self.0 == Self::GUEST }
    pub fn as_str(&self) -> &str { &self.0 }
}

impl fmt::Display for OwnerId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result { write!(f, "{}", self.0) }
}

impl From<&str> for OwnerId {
    fn from(value: &str) -> Self { Self::new(value) }
}

impl From<String> for OwnerId {
    fn from(value: String) -> Self { Self::new(value) }
}

/// Money value object
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct Money { amount: Decimal, currency: String }

impl Money {
    pub fn new(amount: Decimal, currency: &str) -> Self { Self { amount, currency: currency.to_string() } }
    pub fn zero(currency: &str) -> Self { Self::new(Decimal::ZERO, currency) }
    pub fn from_minor(minor: i64, currency: &str) -> Self { Self::new(Decimal::new(minor, 2), currency) }
    pub fn amount(&self) -> Decimal { self.amount }
    pub fn currency(&self) -> &str { &self.currency }
    pub fn formatted(&self) -> String { format_amount(self.amount) }

    /// Normalizes a displayed price before any arithmetic happens.
    ///
    /// Accepts currency-prefixed strings with thousands separators
    /// (e.g. `"₹1,299.50"`); everything but digits and the decimal point
    /// is stripped.
    pub fn parse(raw: &str, currency: &str) -> Result<Self, PriceError> {
        let cleaned: String = raw.chars().filter(|c| c.is_ascii_digit() || *c == '.').collect();
        if cleaned.is_empty() { return Err(PriceError::Empty); }
        let amount: Decimal = cleaned.parse().map_err(|_| PriceError::Unparseable)?;
        Ok(Self::new(amount, currency))
    }

    pub fn add(&self, other: &Money) -> Result<Money, MoneyError> {
        if self.currency != other.currency { return Err(MoneyError::CurrencyMismatch); }
        Ok(Money::new(self.amount + other.amount, &self.currency))
    }

    pub fn multiply(&self, qty: u32) -> Money { Money::new(self.amount * Decimal::from(qty), &self.currency) }
}

#[derive(Debug, Clone)] pub enum MoneyError { CurrencyMismatch }
impl std::error::Error for MoneyError {}
impl fmt::Display for MoneyError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result { write!(f, "Currency mismatch") }
}

#[derive(Debug, Clone)] pub enum PriceError { Empty, Unparseable }
impl std::error::Error for PriceError {}
impl fmt::Display for PriceError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self { Self::Empty => write!(f, "Price empty"), Self::Unparseable => write!(f, "Price not a number") }
    }
}

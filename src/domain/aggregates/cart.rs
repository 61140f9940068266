//! Cart Aggregate

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;
use crate::domain::value_objects::{Money, OwnerId};

/// One owner's active purchasing session.
///
/// `total_amount` is derived: every mutation recomputes it over the current
/// line items so it can never drift from them. `version` is the optimistic
/// concurrency counter checked by the store on every conditional write.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct Cart {
    id: Uuid,
    owner: OwnerId,
    status: CartStatus,
    items: Vec<CartItem>,
    total_amount: Money,
    currency: String,
    version: i64,
    created_at: DateTime<Utc>,
    updated_at: DateTime<Utc>,
}

#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct CartItem {
    pub product_id: Uuid,
    pub name: String,
    pub unit_price: Money,
    pub image: Option<String>,
    pub quantity: u32,
}

impl CartItem {
    pub fn line_total(&self) -> Money { self.unit_price.multiply(self.quantity) }
}

#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum CartStatus {
    #[default]
    Active,
    Completed,
}

impl CartStatus {
    pub fn as_str(&self) -> &'static str {
        match self { Self::Active => "active", Self::Completed => "completed" }
    }
}

impl TryFrom<&str> for CartStatus {
    type Error = String;
    fn try_from(value: &str) -> Result<Self, Self::Error> {
        match value {
            "active" => Ok(Self::Active),
            "completed" => Ok(Self::Completed),
            other => Err(format!("unknown cart status: {other}")),
        }
    }
}

/// What a delta-quantity mutation did to the cart.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum CartMutation { Updated, Removed, NotFound }

impl Cart {
    pub fn for_owner(owner: OwnerId, currency: &str) -> Self {
        let now = Utc::now();
        Self {
            id: Uuid::new_v4(), owner, status: CartStatus::Active,
            items: vec![], total_amount: Money::zero(currency), currency: currency.to_string(),
            version: 0, created_at: now, updated_at: now,
        }
    }

    pub fn id(&self) -> Uuid { self.id }
    pub fn owner(&self) -> &OwnerId { &self.owner }
    pub fn status(&self) -> CartStatus { self.status }
    pub fn items(&self) -> &[CartItem] { &self.items }
    pub fn total_amount(&self) -> &Money { &self.total_amount }
    pub fn currency(&self) -> &str { &self.currency }
    pub fn version(&self) -> i64 { self.version }
    pub fn created_at(&self) -> DateTime<Utc> { self.created_at }
    pub fn updated_at(&self) -> DateTime<Utc> { self.updated_at }
    pub fn is_empty(&self) -> bool { self.items.is_empty() }

    /// Sum of all quantities, not the count of distinct line items.
    pub fn item_count(&self) -> u32 { self.items.iter().map(|i| i.quantity).sum() }

    /// Merges by product: an existing line item absorbs the quantity,
    /// otherwise the item is appended in insertion order.
    pub fn add_item(&mut self, item: CartItem) {
        if let Some(existing) = self.items.iter_mut().find(|i| i.product_id == item.product_id) {
            existing.quantity += item.quantity;
        } else {
            self.items.push(item);
        }
        self.recalculate();
    }

    /// Applies a signed quantity delta. A quantity driven to zero or below
    /// removes the line item entirely; it is never kept at quantity 0.
    pub fn update_quantity(&mut self, product_id: Uuid, change: i64) -> CartMutation {
        let Some(item) = self.items.iter_mut().find(|i| i.product_id == product_id) else {
            return CartMutation::NotFound;
        };
        let new_quantity = i64::from(item.quantity) + change;
        let mutation = if new_quantity <= 0 {
            self.items.retain(|i| i.product_id != product_id);
            CartMutation::Removed
        } else {
            item.quantity = new_quantity as u32;
            CartMutation::Updated
        };
        self.recalculate();
        mutation
    }

    /// Removes the line item regardless of quantity. Returns false if absent.
    pub fn remove_item(&mut self, product_id: Uuid) -> bool {
        let before = self.items.len();
        self.items.retain(|i| i.product_id != product_id);
        if self.items.len() == before { return false; }
        self.recalculate();
        true
    }

    /// Empties the cart but keeps the document itself.
    pub fn clear(&mut self) {
        self.items.clear();
        self.recalculate();
    }

    /// Transitions out of `active`; the checkout flow owns this.
    pub fn complete(&mut self) {
        self.status = CartStatus::Completed;
        self.touch();
    }

    fn recalculate(&mut self) {
        self.total_amount = self.items.iter().fold(Money::zero(&self.currency), |acc, i| acc.add(&i.line_total()).unwrap_or(acc));
        self.touch();
    }

    fn touch(&mut self) { self.updated_at = Utc::now(); }

    /// Rehydrates a cart from its persisted fields. Store backends only.
    #[allow(clippy::too_many_arguments)]
    pub(crate) fn restore(
        id: Uuid, owner: OwnerId, status: CartStatus, items: Vec<CartItem>,
        total_amount: Money, currency: String, version: i64,
        created_at: DateTime<Utc>, updated_at: DateTime<Utc>,
    ) -> Self {
        Self { id, owner, status, items, total_amount, currency, version, created_at, updated_at }
    }

    pub(crate) fn set_version(&mut self, version: i64) { self.version = version; }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rust_decimal::Decimal;

    fn item(product_id: Uuid, price: &str, quantity: u32) -> CartItem {
        CartItem {
            product_id, name: "E-book".into(),
            unit_price: Money::parse(price, "INR").unwrap(),
            image: None, quantity,
        }
    }

    #[test]
    fn test_add_merges_quantities_for_same_product() {
        let product = Uuid::new_v4();
        let mut cart = Cart::for_owner(OwnerId::guest(), "INR");
        cart.add_item(item(product, "10.00", 2));
        cart.add_item(item(product, "10.00", 3));
        assert_eq!(cart.items().len(), 1);
        assert_eq!(cart.items()[0].quantity, 5);
        assert_eq!(cart.total_amount().formatted(), "50.00");
    }

    #[test]
    fn test_total_recomputed_on_every_mutation() {
        let a = Uuid::new_v4();
        let b = Uuid::new_v4();
        let mut cart = Cart::for_owner(OwnerId::guest(), "INR");
        cart.add_item(item(a, "19.99", 1));
        cart.add_item(item(b, "5.50", 2));
        assert_eq!(cart.total_amount().formatted(), "30.99");
        cart.update_quantity(b, -1);
        assert_eq!(cart.total_amount().formatted(), "25.49");
        cart.remove_item(a);
        assert_eq!(cart.total_amount().formatted(), "5.50");
    }

    #[test]
    fn test_quantity_driven_to_zero_removes_item() {
        let product = Uuid::new_v4();
        let mut cart = Cart::for_owner(OwnerId::guest(), "INR");
        cart.add_item(item(product, "10.00", 3));
        assert_eq!(cart.update_quantity(product, -3), CartMutation::Removed);
        assert!(cart.is_empty());

        cart.add_item(item(product, "10.00", 2));
        assert_eq!(cart.update_quantity(product, -5), CartMutation::Removed);
        assert!(cart.is_empty());
        assert_eq!(cart.total_amount().amount(), Decimal::ZERO);
    }

    #[test]
    fn test_update_unknown_product_is_not_found() {
        let mut cart = Cart::for_owner(OwnerId::guest(), "INR");
        assert_eq!(cart.update_quantity(Uuid::new_v4(), 1), CartMutation::NotFound);
    }

    #[test]
    fn test_clear_is_idempotent() {
        let mut cart = Cart::for_owner(OwnerId::guest(), "INR");
        cart.add_item(item(Uuid::new_v4(), "99.00", 1));
        cart.clear();
        assert!(cart.is_empty());
        assert_eq!(cart.total_amount().formatted(), "0.00");
        cart.clear();
        assert!(cart.is_empty());
        assert_eq!(cart.total_amount().formatted(), "0.00");
    }

    #[test]
    fn test_item_count_sums_quantities() {
        let mut cart = Cart::for_owner(OwnerId::guest(), "INR");
        cart.add_item(item(Uuid::new_v4(), "10.00", 2));
        cart.add_item(item(Uuid::new_v4(), "20.00", 3));
        assert_eq!(cart.item_count(), 5);
        assert_eq!(cart.items().len(), 2);
    }

    #[test]
    fn test_formatted_price_normalized_before_totaling() {
        let mut cart = Cart::for_owner(OwnerId::guest(), "INR");
        cart.add_item(item(Uuid::new_v4(), "₹1,299.50", 2));
        assert_eq!(cart.total_amount().formatted(), "2599.00");
    }

    #[test]
    fn test_insertion_order_preserved() {
        let first = Uuid::new_v4();
        let second = Uuid::new_v4();
        let mut cart = Cart::for_owner(OwnerId::guest(), "INR");
        cart.add_item(item(first, "1.00", 1));
        cart.add_item(item(second, "2.00", 1));
        cart.add_item(item(first, "1.00", 1));
        let ids: Vec<Uuid> = cart.items().iter().map(|i| i.product_id).collect();
        assert_eq!(ids, vec![first, second]);
    }
}

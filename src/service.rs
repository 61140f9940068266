//! Cart aggregate manager
//!
//! One consistent active cart per owner. Every mutation is a bounded-time
//! read-modify-write against the store's conditional update, retried on
//! version conflict, so racing writers cannot clobber each other's items.
//! Failures surface twice: as a typed `Err` for the caller and as a
//! user-facing notice on the side channel.

use std::future::Future;
use std::sync::Arc;
use std::time::Duration;
use rust_decimal::Decimal;
use serde::Serialize;
use thiserror::Error;
use tokio::sync::broadcast;
use uuid::Uuid;
use crate::domain::aggregates::{Cart, CartItem, CartMutation};
use crate::domain::coupons::{find_coupon, registry};
use crate::domain::events::{CartEvent, Notifier};
use crate::domain::value_objects::{format_amount, Money, OwnerId};
use crate::store::{CartChange, CartStore, StoreError};

const MAX_WRITE_ATTEMPTS: u32 = 3;
const EVENT_SUBJECT: &str = "storefront.cart.events";

/// The product fields a cart line item is built from.
#[derive(Clone, Debug)]
pub struct ProductRef {
    pub id: Uuid,
    pub name: String,
    pub price: Money,
    pub image: Option<String>,
}

impl ProductRef {
    fn into_item(self, quantity: u32) -> CartItem {
        CartItem { product_id: self.id, name: self.name, unit_price: self.price, image: self.image, quantity }
    }
}

/// Whether a mutation found anything to do. Update/remove on a missing cart
/// or item is a no-op, not an error.
#[derive(Clone, Debug)]
pub enum CartOutcome {
    Updated(Cart),
    NoChange,
}

#[derive(Debug, Error)]
pub enum CartServiceError {
    #[error("cart storage failed: {0}")]
    Store(#[from] StoreError),
    #[error("cart write timed out")]
    Timeout,
    #[error("cart still contended after {0} attempts")]
    Contention(u32),
    #[error("cart is empty")]
    EmptyCart,
}

/// Priced summary returned by checkout.
#[derive(Clone, Debug, Serialize)]
pub struct Receipt {
    pub cart_id: Uuid,
    pub subtotal: String,
    pub discount: String,
    pub total: String,
    pub coupon: Option<String>,
}

pub struct CartService<S: CartStore> {
    store: Arc<S>,
    notices: Notifier,
    nats: Option<async_nats::Client>,
    currency: String,
    op_timeout: Duration,
}

impl<S: CartStore> CartService<S> {
    pub fn new(store: Arc<S>, notices: Notifier, nats: Option<async_nats::Client>, currency: &str, op_timeout: Duration) -> Self {
        Self { store, notices, nats, currency: currency.to_string(), op_timeout }
    }

    pub fn notices(&self) -> &Notifier { &self.notices }

    /// Change feed of the backing store; see [`CartStore::changes`].
    pub fn changes(&self) -> broadcast::Receiver<CartChange> { self.store.changes() }

    /// Adds a product, creating the owner's active cart on first use and
    /// merging quantities for a product already present.
    pub async fn add_to_cart(&self, owner: &OwnerId, product: ProductRef, quantity: u32) -> Result<Cart, CartServiceError> {
        let quantity = quantity.max(1);
        let name = product.name.clone();
        let product_id = product.id;
        match self.add_to_cart_inner(owner, product, quantity).await {
            Ok(cart) => {
                self.notices.success(format!("{name} added to your cart."));
                self.publish(CartEvent::ItemAdded { owner: owner.clone(), product_id, quantity }).await;
                Ok(cart)
            }
            Err(e) => Err(self.cart_problem(owner, "add_to_cart", e)),
        }
    }

    /// Applies a signed quantity delta; driving an item to zero removes it.
    /// Silently a no-op when there is no active cart or no such item.
    pub async fn update_quantity(&self, owner: &OwnerId, product_id: Uuid, change: i64) -> Result<CartOutcome, CartServiceError> {
        let result = self
            .mutate_existing(owner, |cart| cart.update_quantity(product_id, change) != CartMutation::NotFound)
            .await;
        match result {
            Ok(CartOutcome::Updated(cart)) => {
                let event = match cart.items().iter().find(|i| i.product_id == product_id) {
                    Some(item) => CartEvent::QuantityChanged { owner: owner.clone(), product_id, quantity: item.quantity },
                    None => CartEvent::ItemRemoved { owner: owner.clone(), product_id },
                };
                self.publish(event).await;
                Ok(CartOutcome::Updated(cart))
            }
            Ok(CartOutcome::NoChange) => Ok(CartOutcome::NoChange),
            Err(e) => Err(self.cart_problem(owner, "update_quantity", e)),
        }
    }

    /// Removes the line item regardless of its quantity.
    pub async fn remove_item(&self, owner: &OwnerId, product_id: Uuid) -> Result<CartOutcome, CartServiceError> {
        let result = self.mutate_existing(owner, |cart| cart.remove_item(product_id)).await;
        match result {
            Ok(CartOutcome::Updated(cart)) => {
                self.notices.success("Item removed from your cart.");
                self.publish(CartEvent::ItemRemoved { owner: owner.clone(), product_id }).await;
                Ok(CartOutcome::Updated(cart))
            }
            Ok(CartOutcome::NoChange) => Ok(CartOutcome::NoChange),
            Err(e) => Err(self.cart_problem(owner, "remove_item", e)),
        }
    }

    /// Empties the cart but keeps the document. Idempotent.
    pub async fn clear_cart(&self, owner: &OwnerId) -> Result<CartOutcome, CartServiceError> {
        let result = self.mutate_existing(owner, |cart| { cart.clear(); true }).await;
        match result {
            Ok(outcome) => {
                self.notices.success("Your cart has been cleared.");
                self.publish(CartEvent::Cleared { owner: owner.clone() }).await;
                Ok(outcome)
            }
            Err(e) => Err(self.cart_problem(owner, "clear_cart", e)),
        }
    }

    /// Pull-based read for call sites that cannot hold the change feed.
    pub async fn refresh_cart(&self, owner: &OwnerId) -> Result<Option<Cart>, CartServiceError> {
        match self.with_timeout(self.store.find_active(owner)).await {
            Ok(cart) => Ok(cart),
            Err(e) => {
                tracing::error!(owner = %owner, error = %e, "failed to load cart");
                self.notices.error("There was a problem loading your cart.");
                Err(e)
            }
        }
    }

    /// Prices the cart (coupon applied), marks it completed, and returns the
    /// receipt. The completed cart stops matching active-cart queries, so the
    /// owner's next add starts a fresh one.
    pub async fn checkout(&self, owner: &OwnerId, coupon_code: Option<&str>) -> Result<Receipt, CartServiceError> {
        match self.checkout_inner(owner, coupon_code).await {
            Ok(receipt) => {
                self.notices.success("Order placed. Thank you!");
                self.publish(CartEvent::CheckedOut { owner: owner.clone(), total: receipt.total.clone() }).await;
                Ok(receipt)
            }
            Err(CartServiceError::EmptyCart) => {
                self.notices.error("Your cart is empty.");
                Err(CartServiceError::EmptyCart)
            }
            Err(e) => Err(self.cart_problem(owner, "checkout", e)),
        }
    }

    async fn add_to_cart_inner(&self, owner: &OwnerId, product: ProductRef, quantity: u32) -> Result<Cart, CartServiceError> {
        for _ in 0..MAX_WRITE_ATTEMPTS {
            match self.with_timeout(self.store.find_active(owner)).await? {
                None => {
                    let mut cart = Cart::for_owner(owner.clone(), &self.currency);
                    cart.add_item(product.clone().into_item(quantity));
                    match self.with_timeout(self.store.insert(&cart)).await {
                        Ok(()) => return Ok(cart),
                        // Lost the creation race; re-read and merge instead.
                        Err(CartServiceError::Store(StoreError::Conflict)) => continue,
                        Err(e) => return Err(e),
                    }
                }
                Some(mut cart) => {
                    cart.add_item(product.clone().into_item(quantity));
                    match self.with_timeout(self.store.update(&cart)).await {
                        Ok(()) => return Ok(cart),
                        Err(CartServiceError::Store(StoreError::Conflict)) => continue,
                        Err(e) => return Err(e),
                    }
                }
            }
        }
        Err(CartServiceError::Contention(MAX_WRITE_ATTEMPTS))
    }

    async fn checkout_inner(&self, owner: &OwnerId, coupon_code: Option<&str>) -> Result<Receipt, CartServiceError> {
        let coupon = match coupon_code.map(str::trim).filter(|c| !c.is_empty()) {
            Some(code) => match find_coupon(code).await {
                Some(coupon) => Some(coupon),
                None => {
                    self.notices.error(format!("\"{code}\" is not a valid coupon code. Try {}.", registry()[0].code));
                    None
                }
            },
            None => None,
        };

        for _ in 0..MAX_WRITE_ATTEMPTS {
            let Some(mut cart) = self.with_timeout(self.store.find_active(owner)).await? else {
                return Err(CartServiceError::EmptyCart);
            };
            if cart.is_empty() { return Err(CartServiceError::EmptyCart); }

            let subtotal = cart.total_amount().amount();
            let discount = coupon.map_or(Decimal::ZERO, |c| c.discount_amount(subtotal));
            let total = (subtotal - discount).max(Decimal::ZERO);

            cart.complete();
            match self.with_timeout(self.store.update(&cart)).await {
                Ok(()) => {
                    return Ok(Receipt {
                        cart_id: cart.id(),
                        subtotal: format_amount(subtotal),
                        discount: format_amount(discount),
                        total: format_amount(total),
                        coupon: coupon.map(|c| c.code.to_string()),
                    });
                }
                Err(CartServiceError::Store(StoreError::Conflict)) => continue,
                Err(e) => return Err(e),
            }
        }
        Err(CartServiceError::Contention(MAX_WRITE_ATTEMPTS))
    }

    /// Read-modify-write loop shared by the delta mutations. `apply` returns
    /// whether it changed anything; an untouched cart is never written back.
    async fn mutate_existing<F>(&self, owner: &OwnerId, apply: F) -> Result<CartOutcome, CartServiceError>
    where
        F: Fn(&mut Cart) -> bool,
    {
        for _ in 0..MAX_WRITE_ATTEMPTS {
            let Some(mut cart) = self.with_timeout(self.store.find_active(owner)).await? else {
                return Ok(CartOutcome::NoChange);
            };
            if !apply(&mut cart) { return Ok(CartOutcome::NoChange); }
            match self.with_timeout(self.store.update(&cart)).await {
                Ok(()) => return Ok(CartOutcome::Updated(cart)),
                Err(CartServiceError::Store(StoreError::Conflict)) => continue,
                Err(e) => return Err(e),
            }
        }
        Err(CartServiceError::Contention(MAX_WRITE_ATTEMPTS))
    }

    async fn with_timeout<T, F>(&self, fut: F) -> Result<T, CartServiceError>
    where
        F: Future<Output = Result<T, StoreError>>,
    {
        match tokio::time::timeout(self.op_timeout, fut).await {
            Ok(Ok(value)) => Ok(value),
            Ok(Err(e)) => Err(e.into()),
            Err(_) => Err(CartServiceError::Timeout),
        }
    }

    fn cart_problem(&self, owner: &OwnerId, op: &str, e: CartServiceError) -> CartServiceError {
        tracing::error!(owner = %owner, operation = op, error = %e, "cart operation failed");
        self.notices.error("There was a problem with your cart.");
        e
    }

    async fn publish(&self, event: CartEvent) {
        let Some(nats) = &self.nats else { return };
        match serde_json::to_vec(&event) {
            Ok(payload) => {
                if let Err(e) = nats.publish(EVENT_SUBJECT.to_string(), payload.into()).await {
                    tracing::warn!(error = %e, "failed to publish cart event");
                }
            }
            Err(e) => tracing::warn!(error = %e, "failed to encode cart event"),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use async_trait::async_trait;
    use crate::domain::events::NoticeLevel;
    use crate::store::MemoryCartStore;

    fn service() -> CartService<MemoryCartStore> {
        CartService::new(Arc::new(MemoryCartStore::new()), Notifier::new(16), None, "INR", Duration::from_secs(1))
    }

    fn product(name: &str, price: &str) -> ProductRef {
        ProductRef {
            id: Uuid::new_v4(), name: name.into(),
            price: Money::parse(price, "INR").unwrap(), image: None,
        }
    }

    #[tokio::test]
    async fn test_first_add_creates_cart_then_merges() {
        let svc = service();
        let owner = OwnerId::new("u1");
        let ebook = product("E-book", "100.00");

        let cart = svc.add_to_cart(&owner, ebook.clone(), 1).await.unwrap();
        assert_eq!(cart.items().len(), 1);
        assert_eq!(cart.total_amount().formatted(), "100.00");

        let cart = svc.add_to_cart(&owner, ebook, 2).await.unwrap();
        assert_eq!(cart.items().len(), 1);
        assert_eq!(cart.items()[0].quantity, 3);
        assert_eq!(cart.total_amount().formatted(), "300.00");
    }

    #[tokio::test]
    async fn test_add_defaults_zero_quantity_to_one() {
        let svc = service();
        let owner = OwnerId::new("u1");
        let cart = svc.add_to_cart(&owner, product("E-book", "10.00"), 0).await.unwrap();
        assert_eq!(cart.items()[0].quantity, 1);
    }

    #[tokio::test]
    async fn test_update_without_cart_is_silent_noop() {
        let svc = service();
        let owner = OwnerId::new("u1");
        let mut notices = svc.notices().subscribe();

        let outcome = svc.update_quantity(&owner, Uuid::new_v4(), 1).await.unwrap();
        assert!(matches!(outcome, CartOutcome::NoChange));
        assert!(notices.try_recv().is_err());
    }

    #[tokio::test]
    async fn test_update_unknown_item_is_silent_noop() {
        let svc = service();
        let owner = OwnerId::new("u1");
        svc.add_to_cart(&owner, product("E-book", "10.00"), 1).await.unwrap();

        let outcome = svc.update_quantity(&owner, Uuid::new_v4(), 1).await.unwrap();
        assert!(matches!(outcome, CartOutcome::NoChange));
    }

    #[tokio::test]
    async fn test_negative_delta_removes_item() {
        let svc = service();
        let owner = OwnerId::new("u1");
        let ebook = product("E-book", "10.00");
        svc.add_to_cart(&owner, ebook.clone(), 2).await.unwrap();

        let outcome = svc.update_quantity(&owner, ebook.id, -2).await.unwrap();
        let CartOutcome::Updated(cart) = outcome else { panic!("expected update") };
        assert!(cart.is_empty());
        assert_eq!(cart.total_amount().formatted(), "0.00");
    }

    #[tokio::test]
    async fn test_remove_item_and_notice() {
        let svc = service();
        let owner = OwnerId::new("u1");
        let ebook = product("E-book", "10.00");
        svc.add_to_cart(&owner, ebook.clone(), 5).await.unwrap();

        let mut notices = svc.notices().subscribe();
        let outcome = svc.remove_item(&owner, ebook.id).await.unwrap();
        let CartOutcome::Updated(cart) = outcome else { panic!("expected update") };
        assert!(cart.is_empty());
        assert_eq!(notices.recv().await.unwrap().message, "Item removed from your cart.");
    }

    #[tokio::test]
    async fn test_clear_twice_keeps_cart_document() {
        let svc = service();
        let owner = OwnerId::new("u1");
        svc.add_to_cart(&owner, product("E-book", "10.00"), 1).await.unwrap();

        svc.clear_cart(&owner).await.unwrap();
        svc.clear_cart(&owner).await.unwrap();

        let cart = svc.refresh_cart(&owner).await.unwrap().unwrap();
        assert!(cart.is_empty());
        assert_eq!(cart.total_amount().formatted(), "0.00");
    }

    #[tokio::test]
    async fn test_add_notice_names_the_product() {
        let svc = service();
        let owner = OwnerId::new("u1");
        let mut notices = svc.notices().subscribe();

        svc.add_to_cart(&owner, product("Film Pack", "49.00"), 1).await.unwrap();
        let notice = notices.recv().await.unwrap();
        assert_eq!(notice.level, NoticeLevel::Success);
        assert_eq!(notice.message, "Film Pack added to your cart.");
    }

    #[tokio::test]
    async fn test_racing_adds_both_land() {
        let svc = Arc::new(service());
        let owner = OwnerId::new("u1");
        let ebook = product("E-book", "10.00");

        let (a, b) = tokio::join!(
            svc.add_to_cart(&owner, ebook.clone(), 1),
            svc.add_to_cart(&owner, ebook.clone(), 1),
        );
        a.unwrap();
        b.unwrap();

        let cart = svc.refresh_cart(&owner).await.unwrap().unwrap();
        assert_eq!(cart.items().len(), 1);
        assert_eq!(cart.items()[0].quantity, 2);
        assert_eq!(cart.total_amount().formatted(), "20.00");
    }

    #[tokio::test]
    async fn test_checkout_applies_coupon_and_completes_cart() {
        let svc = service();
        let owner = OwnerId::new("u1");
        svc.add_to_cart(&owner, product("Album", "200.00"), 1).await.unwrap();

        let receipt = svc.checkout(&owner, Some("save10")).await.unwrap();
        assert_eq!(receipt.subtotal, "200.00");
        assert_eq!(receipt.discount, "10.00");
        assert_eq!(receipt.total, "190.00");
        assert_eq!(receipt.coupon.as_deref(), Some("SAVE10"));

        assert!(svc.refresh_cart(&owner).await.unwrap().is_none());
    }

    #[tokio::test]
    async fn test_checkout_invalid_coupon_prices_undiscounted() {
        let svc = service();
        let owner = OwnerId::new("u1");
        svc.add_to_cart(&owner, product("Album", "200.00"), 1).await.unwrap();

        let mut notices = svc.notices().subscribe();
        let receipt = svc.checkout(&owner, Some("BOGUS")).await.unwrap();
        assert_eq!(receipt.total, "200.00");
        assert!(receipt.coupon.is_none());

        let invalid = notices.recv().await.unwrap();
        assert_eq!(invalid.level, NoticeLevel::Error);
        assert!(invalid.message.contains("BOGUS"));
    }

    #[tokio::test]
    async fn test_checkout_empty_cart_is_an_error() {
        let svc = service();
        let owner = OwnerId::new("u1");
        assert!(matches!(svc.checkout(&owner, None).await, Err(CartServiceError::EmptyCart)));
    }

    struct StalledStore;

    #[async_trait]
    impl CartStore for StalledStore {
        async fn find_active(&self, _owner: &OwnerId) -> Result<Option<Cart>, StoreError> {
            tokio::time::sleep(Duration::from_secs(10)).await;
            Ok(None)
        }
        async fn insert(&self, _cart: &Cart) -> Result<(), StoreError> { Ok(()) }
        async fn update(&self, _cart: &Cart) -> Result<(), StoreError> { Ok(()) }
        fn changes(&self) -> broadcast::Receiver<CartChange> {
            let (tx, rx) = broadcast::channel(1);
            std::mem::forget(tx);
            rx
        }
    }

    #[tokio::test]
    async fn test_hung_store_is_cut_off_by_timeout() {
        let svc = CartService::new(Arc::new(StalledStore), Notifier::new(16), None, "INR", Duration::from_millis(50));
        let owner = OwnerId::new("u1");
        let result = svc.add_to_cart(&owner, product("E-book", "10.00"), 1).await;
        assert!(matches!(result, Err(CartServiceError::Timeout)));
    }
}

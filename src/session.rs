//! Owner-scoped live cart view
//!
//! A [`CartSession`] owns the push subscription for one owner: it loads the
//! cart, then re-queries on every change emission so observers always hold a
//! full-state snapshot. Changing owner (login/logout) tears the subscription
//! down and establishes a fresh one; it is never tied to a UI lifecycle.

use std::sync::Arc;
use rust_decimal::Decimal;
use tokio::sync::{broadcast, watch};
use tokio::task::JoinHandle;
use uuid::Uuid;
use crate::domain::aggregates::Cart;
use crate::domain::value_objects::{format_amount, OwnerId};
use crate::service::{CartOutcome, CartService, CartServiceError, ProductRef, Receipt};
use crate::store::CartStore;

/// What subscribers observe: the current cart (or absence) plus a loading
/// flag covering the initial query.
#[derive(Clone, Debug)]
pub struct CartSnapshot {
    pub cart: Option<Cart>,
    pub loading: bool,
}

pub struct CartSession<S: CartStore> {
    service: Arc<CartService<S>>,
    owner: OwnerId,
    snapshot: watch::Receiver<CartSnapshot>,
    task: JoinHandle<()>,
}

impl<S: CartStore> CartSession<S> {
    pub fn new(service: Arc<CartService<S>>, owner: OwnerId) -> Self {
        let (snapshot, task) = spawn_watch(service.clone(), owner.clone());
        Self { service, owner, snapshot, task }
    }

    pub fn owner(&self) -> &OwnerId { &self.owner }

    /// Switches the session to a new owner: the old subscription is torn
    /// down first, then a new one is established for the new identity.
    /// Guest cart contents are not merged into the new owner's cart.
    pub fn set_owner(&mut self, owner: OwnerId) {
        if owner == self.owner { return; }
        self.task.abort();
        let (snapshot, task) = spawn_watch(self.service.clone(), owner.clone());
        self.owner = owner;
        self.snapshot = snapshot;
        self.task = task;
    }

    pub fn cart(&self) -> Option<Cart> { self.snapshot.borrow().cart.clone() }
    pub fn loading(&self) -> bool { self.snapshot.borrow().loading }

    /// Sum of all line item quantities.
    pub fn cart_count(&self) -> u32 {
        self.snapshot.borrow().cart.as_ref().map_or(0, Cart::item_count)
    }

    /// The raw total-amount string, `"0.00"` when no cart exists.
    pub fn cart_total(&self) -> String {
        self.snapshot.borrow().cart.as_ref()
            .map_or_else(|| format_amount(Decimal::ZERO), |c| c.total_amount().formatted())
    }

    /// A fresh receiver onto the snapshot feed.
    pub fn watch(&self) -> watch::Receiver<CartSnapshot> { self.snapshot.clone() }

    pub async fn add_to_cart(&self, product: ProductRef, quantity: u32) -> Result<Cart, CartServiceError> {
        self.service.add_to_cart(&self.owner, product, quantity).await
    }

    pub async fn update_quantity(&self, product_id: Uuid, change: i64) -> Result<CartOutcome, CartServiceError> {
        self.service.update_quantity(&self.owner, product_id, change).await
    }

    pub async fn remove_item(&self, product_id: Uuid) -> Result<CartOutcome, CartServiceError> {
        self.service.remove_item(&self.owner, product_id).await
    }

    pub async fn clear_cart(&self) -> Result<CartOutcome, CartServiceError> {
        self.service.clear_cart(&self.owner).await
    }

    pub async fn refresh_cart(&self) -> Result<Option<Cart>, CartServiceError> {
        self.service.refresh_cart(&self.owner).await
    }

    pub async fn checkout(&self, coupon_code: Option<&str>) -> Result<Receipt, CartServiceError> {
        self.service.checkout(&self.owner, coupon_code).await
    }
}

impl<S: CartStore> Drop for CartSession<S> {
    fn drop(&mut self) { self.task.abort(); }
}

fn spawn_watch<S: CartStore>(service: Arc<CartService<S>>, owner: OwnerId) -> (watch::Receiver<CartSnapshot>, JoinHandle<()>) {
    let (tx, rx) = watch::channel(CartSnapshot { cart: None, loading: true });
    let task = tokio::spawn(async move {
        // Subscribe before the initial load so no change emission is missed.
        let mut changes = service.changes();
        let cart = service.refresh_cart(&owner).await.ok().flatten();
        if tx.send(CartSnapshot { cart, loading: false }).is_err() { return; }

        loop {
            match changes.recv().await {
                Ok(change) if change.owner == owner => {
                    if let Ok(cart) = service.refresh_cart(&owner).await {
                        if tx.send(CartSnapshot { cart, loading: false }).is_err() { return; }
                    }
                }
                Ok(_) => {}
                Err(broadcast::error::RecvError::Lagged(skipped)) => {
                    tracing::warn!(owner = %owner, skipped, "cart change feed lagged, re-syncing");
                    if let Ok(cart) = service.refresh_cart(&owner).await {
                        if tx.send(CartSnapshot { cart, loading: false }).is_err() { return; }
                    }
                }
                Err(broadcast::error::RecvError::Closed) => return,
            }
        }
    });
    (rx, task)
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;
    use crate::domain::events::Notifier;
    use crate::domain::value_objects::Money;
    use crate::store::MemoryCartStore;

    fn service() -> Arc<CartService<MemoryCartStore>> {
        Arc::new(CartService::new(Arc::new(MemoryCartStore::new()), Notifier::new(16), None, "INR", Duration::from_secs(1)))
    }

    fn product(name: &str, price: &str) -> ProductRef {
        ProductRef {
            id: Uuid::new_v4(), name: name.into(),
            price: Money::parse(price, "INR").unwrap(), image: None,
        }
    }

    async fn settled(rx: &mut watch::Receiver<CartSnapshot>) {
        while rx.borrow_and_update().loading {
            tokio::time::timeout(Duration::from_secs(1), rx.changed()).await.unwrap().unwrap();
        }
    }

    #[tokio::test]
    async fn test_snapshot_loads_then_tracks_external_writes() {
        let svc = service();
        let session = CartSession::new(svc.clone(), OwnerId::new("u1"));
        let mut rx = session.watch();
        settled(&mut rx).await;
        assert_eq!(session.cart_count(), 0);
        assert_eq!(session.cart_total(), "0.00");

        // Write through the service directly, as an admin tool would.
        svc.add_to_cart(&OwnerId::new("u1"), product("E-book", "99.00"), 2).await.unwrap();

        tokio::time::timeout(Duration::from_secs(1), rx.changed()).await.unwrap().unwrap();
        assert_eq!(session.cart_count(), 2);
        assert_eq!(session.cart_total(), "198.00");
        assert!(!session.loading());
    }

    #[tokio::test]
    async fn test_other_owners_writes_are_ignored() {
        let svc = service();
        let session = CartSession::new(svc.clone(), OwnerId::new("u1"));
        let mut rx = session.watch();
        settled(&mut rx).await;

        svc.add_to_cart(&OwnerId::new("u2"), product("E-book", "50.00"), 1).await.unwrap();
        tokio::task::yield_now().await;
        assert_eq!(session.cart_count(), 0);
    }

    #[tokio::test]
    async fn test_set_owner_resubscribes() {
        let svc = service();
        svc.add_to_cart(&OwnerId::new("alice"), product("Album", "120.00"), 1).await.unwrap();

        let mut session = CartSession::new(svc.clone(), OwnerId::guest());
        let mut rx = session.watch();
        settled(&mut rx).await;
        assert_eq!(session.cart_count(), 0);

        session.set_owner(OwnerId::new("alice"));
        let mut rx = session.watch();
        settled(&mut rx).await;
        assert_eq!(session.cart_count(), 1);
        assert_eq!(session.cart_total(), "120.00");
        assert_eq!(session.owner().as_str(), "alice");
    }

    #[tokio::test]
    async fn test_session_mutations_update_snapshot() {
        let svc = service();
        let session = CartSession::new(svc, OwnerId::guest());
        let mut rx = session.watch();
        settled(&mut rx).await;

        let ebook = product("E-book", "10.00");
        session.add_to_cart(ebook.clone(), 3).await.unwrap();
        tokio::time::timeout(Duration::from_secs(1), rx.changed()).await.unwrap().unwrap();
        assert_eq!(session.cart_count(), 3);

        session.clear_cart().await.unwrap();
        tokio::time::timeout(Duration::from_secs(1), rx.changed()).await.unwrap().unwrap();
        assert_eq!(session.cart_count(), 0);
        assert_eq!(session.cart_total(), "0.00");
    }
}

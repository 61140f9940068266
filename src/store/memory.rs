//! In-memory cart store

use std::collections::HashMap;
use async_trait::async_trait;
use tokio::sync::{broadcast, RwLock};
use uuid::Uuid;
use crate::domain::aggregates::{Cart, CartStatus};
use crate::domain::value_objects::OwnerId;
use super::{CartChange, CartStore, StoreError};

/// HashMap-backed [`CartStore`]. Backs the test suite and single-node dev
/// runs; enforces the same version checks as the Postgres backend.
#[derive(Debug)]
pub struct MemoryCartStore {
    carts: RwLock<HashMap<Uuid, Cart>>,
    changes: broadcast::Sender<CartChange>,
}

impl MemoryCartStore {
    pub fn new() -> Self {
        let (changes, _) = broadcast::channel(64);
        Self { carts: RwLock::new(HashMap::new()), changes }
    }

    fn notify(&self, owner: &OwnerId) {
        let _ = self.changes.send(CartChange { owner: owner.clone() });
    }
}

impl Default for MemoryCartStore {
    fn default() -> Self { Self::new() }
}

#[async_trait]
impl CartStore for MemoryCartStore {
    async fn find_active(&self, owner: &OwnerId) -> Result<Option<Cart>, StoreError> {
        let carts = self.carts.read().await;
        Ok(carts.values().find(|c| c.owner() == owner && c.status() == CartStatus::Active).cloned())
    }

    async fn insert(&self, cart: &Cart) -> Result<(), StoreError> {
        let mut carts = self.carts.write().await;
        let already_active = carts.values().any(|c| c.owner() == cart.owner() && c.status() == CartStatus::Active);
        if already_active { return Err(StoreError::Conflict); }
        carts.insert(cart.id(), cart.clone());
        drop(carts);
        self.notify(cart.owner());
        Ok(())
    }

    async fn update(&self, cart: &Cart) -> Result<(), StoreError> {
        let mut carts = self.carts.write().await;
        let stored = carts.get(&cart.id()).ok_or(StoreError::NotFound)?;
        if stored.version() != cart.version() { return Err(StoreError::Conflict); }
        let mut saved = cart.clone();
        saved.set_version(cart.version() + 1);
        carts.insert(cart.id(), saved);
        drop(carts);
        self.notify(cart.owner());
        Ok(())
    }

    fn changes(&self) -> broadcast::Receiver<CartChange> { self.changes.subscribe() }
}

//! Cart persistence: a document-style store with change fan-out
//!
//! Any backend with query, point-read, conditional point-write, and
//! change-subscription primitives fits behind [`CartStore`].

use async_trait::async_trait;
use thiserror::Error;
use tokio::sync::broadcast;
use crate::domain::aggregates::Cart;
use crate::domain::value_objects::OwnerId;

pub mod memory;
pub mod postgres;

pub use memory::MemoryCartStore;
pub use postgres::PgCartStore;

#[derive(Debug, Error)]
pub enum StoreError {
    #[error("cart not found")]
    NotFound,
    #[error("cart was modified concurrently")]
    Conflict,
    #[error("invalid cart status: {0}")]
    InvalidStatus(String),
    #[error("database error: {0}")]
    Database(#[from] sqlx::Error),
    #[error("cart items malformed: {0}")]
    Serialization(#[from] serde_json::Error),
}

/// Emitted whenever an owner's active cart changes, whoever wrote it.
#[derive(Clone, Debug)]
pub struct CartChange {
    pub owner: OwnerId,
}

#[async_trait]
pub trait CartStore: Send + Sync + 'static {
    /// Zero-or-one active cart for the owner.
    async fn find_active(&self, owner: &OwnerId) -> Result<Option<Cart>, StoreError>;

    /// Creates the cart. `Conflict` if the owner already has an active cart
    /// (the one-active-cart invariant is the backend's to enforce).
    async fn insert(&self, cart: &Cart) -> Result<(), StoreError>;

    /// Replaces items, total, and status in one write, conditional on
    /// `cart.version()` still being current. `Conflict` otherwise.
    async fn update(&self, cart: &Cart) -> Result<(), StoreError>;

    /// Push-based change feed. Each emission names the owner whose active
    /// cart changed; consumers re-query and treat the result as a full-state
    /// replacement, not a delta.
    fn changes(&self) -> broadcast::Receiver<CartChange>;
}

//! Postgres cart store

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use sqlx::postgres::{PgListener, PgPool};
use tokio::sync::broadcast;
use uuid::Uuid;
use crate::domain::aggregates::{Cart, CartItem, CartStatus};
use crate::domain::value_objects::{Money, OwnerId};
use super::{CartChange, CartStore, StoreError};

const CHANGE_CHANNEL: &str = "cart_changes";

/// Cart documents in a `carts` table, line items as JSONB. Change fan-out
/// rides LISTEN/NOTIFY via a trigger, so writes from admin tooling reach
/// subscribers too.
pub struct PgCartStore {
    pool: PgPool,
    changes: broadcast::Sender<CartChange>,
}

#[derive(sqlx::FromRow)]
struct CartRow {
    id: Uuid,
    owner: String,
    status: String,
    items: serde_json::Value,
    total_amount: Decimal,
    currency: String,
    version: i64,
    created_at: DateTime<Utc>,
    updated_at: DateTime<Utc>,
}

impl CartRow {
    fn into_cart(self) -> Result<Cart, StoreError> {
        let status = CartStatus::try_from(self.status.as_str()).map_err(StoreError::InvalidStatus)?;
        let items: Vec<CartItem> = serde_json::from_value(self.items)?;
        Ok(Cart::restore(
            self.id, OwnerId::new(self.owner), status, items,
            Money::new(self.total_amount, &self.currency), self.currency,
            self.version, self.created_at, self.updated_at,
        ))
    }
}

impl PgCartStore {
    /// Starts the LISTEN task and returns the store.
    pub async fn connect(pool: PgPool) -> Result<Self, StoreError> {
        let (changes, _) = broadcast::channel(64);
        let mut listener = PgListener::connect_with(&pool).await?;
        listener.listen(CHANGE_CHANNEL).await?;

        let tx = changes.clone();
        tokio::spawn(async move {
            loop {
                match listener.recv().await {
                    Ok(notification) => {
                        let owner = OwnerId::new(notification.payload());
                        let _ = tx.send(CartChange { owner });
                    }
                    Err(e) => {
                        tracing::warn!(error = %e, "cart change listener dropped, retrying");
                        tokio::time::sleep(std::time::Duration::from_secs(1)).await;
                    }
                }
            }
        });

        Ok(Self { pool, changes })
    }
}

#[async_trait]
impl CartStore for PgCartStore {
    async fn find_active(&self, owner: &OwnerId) -> Result<Option<Cart>, StoreError> {
        let row = sqlx::query_as::<_, CartRow>("SELECT id, owner, status, items, total_amount, currency, version, created_at, updated_at FROM carts WHERE owner = $1 AND status = 'active'")
            .bind(owner.as_str()).fetch_optional(&self.pool).await?;
        row.map(CartRow::into_cart).transpose()
    }

    async fn insert(&self, cart: &Cart) -> Result<(), StoreError> {
        let items = serde_json::to_value(cart.items())?;
        let result = sqlx::query("INSERT INTO carts (id, owner, status, items, total_amount, currency, version, created_at, updated_at) VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9) ON CONFLICT (owner) WHERE status = 'active' DO NOTHING")
            .bind(cart.id()).bind(cart.owner().as_str()).bind(cart.status().as_str())
            .bind(items).bind(cart.total_amount().amount().round_dp(2)).bind(cart.currency())
            .bind(cart.version()).bind(cart.created_at()).bind(cart.updated_at())
            .execute(&self.pool).await?;
        if result.rows_affected() == 0 { return Err(StoreError::Conflict); }
        Ok(())
    }

    async fn update(&self, cart: &Cart) -> Result<(), StoreError> {
        let items = serde_json::to_value(cart.items())?;
        let result = sqlx::query("UPDATE carts SET items = $2, total_amount = $3, status = $4, updated_at = $5, version = version + 1 WHERE id = $1 AND version = $6")
            .bind(cart.id()).bind(items).bind(cart.total_amount().amount().round_dp(2))
            .bind(cart.status().as_str()).bind(cart.updated_at()).bind(cart.version())
            .execute(&self.pool).await?;
        if result.rows_affected() == 0 { return Err(StoreError::Conflict); }
        Ok(())
    }

    fn changes(&self) -> broadcast::Receiver<CartChange> { self.changes.subscribe() }
}

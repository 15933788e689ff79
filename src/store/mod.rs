use rust_decimal::Decimal;
use thiserror::Error;
use uuid::Uuid;

use crate::models::{Order, OrderItem, Product};

pub mod memory;
pub mod postgres;

pub use memory::MemoryStore;
pub use postgres::PgStore;

#[derive(Debug, Error)]
pub enum StoreError {
    #[error("database error: {0}")]
    Database(#[from] sqlx::Error),

    #[error("storage unavailable: {0}")]
    Unavailable(String),
}

/// Outcome of a conditional stock decrement.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StockDecrement {
    Applied,
    /// The remaining stock was below the requested amount; nothing changed.
    Insufficient,
}

/// Storage capabilities the checkout flow needs: catalog reads, the atomic
/// stock primitives, and the append-only order ledger. One checkout
/// implementation runs against any adapter of this trait.
///
/// `conditional_decrement_stock` must be atomic with respect to concurrent
/// callers on the same product id; it is the only way stock is ever reduced.
#[allow(async_fn_in_trait)]
pub trait CheckoutStore: Send + Sync {
    async fn get_product(&self, id: Uuid) -> Result<Option<Product>, StoreError>;

    /// Decrement `amount` from the product's stock only if the stock would
    /// stay non-negative, as a single indivisible operation.
    async fn conditional_decrement_stock(
        &self,
        id: Uuid,
        amount: Decimal,
    ) -> Result<StockDecrement, StoreError>;

    /// Add `amount` back to the product's stock. Used to compensate applied
    /// decrements when a later step of the same placement fails.
    async fn restore_stock(&self, id: Uuid, amount: Decimal) -> Result<(), StoreError>;

    /// Persist an order together with its items as one unit.
    async fn insert_order(&self, order: &Order, items: &[OrderItem]) -> Result<(), StoreError>;

    async fn get_order(&self, id: Uuid) -> Result<Option<(Order, Vec<OrderItem>)>, StoreError>;

    /// Orders for one user, newest first.
    async fn list_orders_by_user(&self, user_id: Uuid) -> Result<Vec<Order>, StoreError>;
}

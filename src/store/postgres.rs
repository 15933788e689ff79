use rust_decimal::Decimal;
use uuid::Uuid;

use crate::db::DbPool;
use crate::models::{Order, OrderItem, Product};
use crate::store::{CheckoutStore, StockDecrement, StoreError};

/// Postgres adapter. The conditional decrement is a single `UPDATE ...
/// WHERE stock >= amount`, so concurrent placements on the same product
/// serialize on the row and the losing caller matches zero rows.
#[derive(Clone)]
pub struct PgStore {
    pool: DbPool,
}

impl PgStore {
    pub fn new(pool: DbPool) -> Self {
        Self { pool }
    }
}

impl CheckoutStore for PgStore {
    async fn get_product(&self, id: Uuid) -> Result<Option<Product>, StoreError> {
        let product = sqlx::query_as::<_, Product>("SELECT * FROM products WHERE id = $1")
            .bind(id)
            .fetch_optional(&self.pool)
            .await?;
        Ok(product)
    }

    async fn conditional_decrement_stock(
        &self,
        id: Uuid,
        amount: Decimal,
    ) -> Result<StockDecrement, StoreError> {
        let result = sqlx::query(
            "UPDATE products SET stock = stock - $2 WHERE id = $1 AND stock >= $2",
        )
        .bind(id)
        .bind(amount)
        .execute(&self.pool)
        .await?;

        if result.rows_affected() == 1 {
            Ok(StockDecrement::Applied)
        } else {
            Ok(StockDecrement::Insufficient)
        }
    }

    async fn restore_stock(&self, id: Uuid, amount: Decimal) -> Result<(), StoreError> {
        sqlx::query("UPDATE products SET stock = stock + $2 WHERE id = $1")
            .bind(id)
            .bind(amount)
            .execute(&self.pool)
            .await?;
        Ok(())
    }

    async fn insert_order(&self, order: &Order, items: &[OrderItem]) -> Result<(), StoreError> {
        let mut txn = self.pool.begin().await?;

        sqlx::query(
            r#"
            INSERT INTO orders (id, user_id, total_amount, status, order_date, delivery_date)
            VALUES ($1, $2, $3, $4, $5, $6)
            "#,
        )
        .bind(order.id)
        .bind(order.user_id)
        .bind(order.total_amount)
        .bind(&order.status)
        .bind(order.order_date)
        .bind(order.delivery_date)
        .execute(&mut *txn)
        .await?;

        for item in items {
            sqlx::query(
                r#"
                INSERT INTO order_items (id, order_id, product_id, quantity, price, subtotal)
                VALUES ($1, $2, $3, $4, $5, $6)
                "#,
            )
            .bind(item.id)
            .bind(item.order_id)
            .bind(item.product_id)
            .bind(item.quantity)
            .bind(item.price)
            .bind(item.subtotal)
            .execute(&mut *txn)
            .await?;
        }

        txn.commit().await?;
        Ok(())
    }

    async fn get_order(&self, id: Uuid) -> Result<Option<(Order, Vec<OrderItem>)>, StoreError> {
        let order = sqlx::query_as::<_, Order>("SELECT * FROM orders WHERE id = $1")
            .bind(id)
            .fetch_optional(&self.pool)
            .await?;
        let order = match order {
            Some(o) => o,
            None => return Ok(None),
        };

        let items = sqlx::query_as::<_, OrderItem>(
            "SELECT * FROM order_items WHERE order_id = $1",
        )
        .bind(order.id)
        .fetch_all(&self.pool)
        .await?;

        Ok(Some((order, items)))
    }

    async fn list_orders_by_user(&self, user_id: Uuid) -> Result<Vec<Order>, StoreError> {
        let orders = sqlx::query_as::<_, Order>(
            "SELECT * FROM orders WHERE user_id = $1 ORDER BY order_date DESC",
        )
        .bind(user_id)
        .fetch_all(&self.pool)
        .await?;
        Ok(orders)
    }
}

//! Order placement. Validates a basket against the catalog, snapshots
//! prices, reserves stock through atomic conditional decrements, and
//! persists the order, all-or-nothing. If any step fails after stock has
//! been reserved, the applied decrements are restored before the error is
//! returned, so stock is never left decremented without a matching order.

use chrono::{Duration, Utc};
use rust_decimal::Decimal;
use thiserror::Error;
use uuid::Uuid;

use crate::models::{Order, OrderItem, OrderStatus};
use crate::store::{CheckoutStore, StockDecrement, StoreError};

/// One requested line of a basket. Quantities may be fractional for
/// weight/volume-sold goods.
#[derive(Debug, Clone, Copy)]
pub struct BasketLine {
    pub product_id: Uuid,
    pub quantity: Decimal,
}

#[derive(Debug, Error)]
pub enum PlaceOrderError {
    #[error("basket is empty")]
    EmptyBasket,

    #[error("invalid quantity {quantity} for product {product_id}")]
    InvalidQuantity { product_id: Uuid, quantity: Decimal },

    #[error("product {0} not found")]
    ProductNotFound(Uuid),

    #[error(
        "insufficient stock for product {product_id}: available {available}, requested {requested}"
    )]
    InsufficientStock {
        product_id: Uuid,
        available: Decimal,
        requested: Decimal,
    },

    /// A concurrent order consumed the stock between validation and
    /// reservation. The whole call is safe to retry.
    #[error("stock for product {product_id} was claimed by a concurrent order")]
    ConcurrentStockConflict { product_id: Uuid },

    /// The ledger write failed after stock was reserved; the reserved stock
    /// has already been restored.
    #[error("order could not be persisted")]
    Persistence(#[source] StoreError),

    #[error(transparent)]
    Store(#[from] StoreError),
}

struct PricedLine {
    product_id: Uuid,
    quantity: Decimal,
    price: Decimal,
    subtotal: Decimal,
}

/// Place an order for `user_id`. On success exactly one order and its items
/// are persisted and each referenced product's stock is decremented by the
/// requested quantity. On any failure the store is left as it was.
pub async fn place_order<S: CheckoutStore>(
    store: &S,
    user_id: Uuid,
    lines: &[BasketLine],
) -> Result<(Order, Vec<OrderItem>), PlaceOrderError> {
    if lines.is_empty() {
        return Err(PlaceOrderError::EmptyBasket);
    }
    for line in lines {
        if line.quantity <= Decimal::ZERO {
            return Err(PlaceOrderError::InvalidQuantity {
                product_id: line.product_id,
                quantity: line.quantity,
            });
        }
    }

    // Read-only validation pass, in input order. Prices are snapshotted
    // here; the stock check is only advisory. The conditional decrement
    // below is what actually guards against overselling.
    let mut priced = Vec::with_capacity(lines.len());
    let mut total_amount = Decimal::ZERO;
    for line in lines {
        let product = store
            .get_product(line.product_id)
            .await?
            .ok_or(PlaceOrderError::ProductNotFound(line.product_id))?;
        if product.stock < line.quantity {
            return Err(PlaceOrderError::InsufficientStock {
                product_id: line.product_id,
                available: product.stock,
                requested: line.quantity,
            });
        }
        let subtotal = product.price * line.quantity;
        total_amount += subtotal;
        priced.push(PricedLine {
            product_id: line.product_id,
            quantity: line.quantity,
            price: product.price,
            subtotal,
        });
    }

    // Reservation pass. Each decrement is atomic per product; losing one
    // means a concurrent order got there first, so everything already
    // applied is reverted.
    let mut applied: Vec<&PricedLine> = Vec::with_capacity(priced.len());
    for line in &priced {
        match store
            .conditional_decrement_stock(line.product_id, line.quantity)
            .await
        {
            Ok(StockDecrement::Applied) => applied.push(line),
            Ok(StockDecrement::Insufficient) => {
                restore_applied(store, &applied).await;
                return Err(PlaceOrderError::ConcurrentStockConflict {
                    product_id: line.product_id,
                });
            }
            Err(err) => {
                restore_applied(store, &applied).await;
                return Err(PlaceOrderError::Store(err));
            }
        }
    }

    let now = Utc::now();
    let order = Order {
        id: Uuid::new_v4(),
        user_id,
        total_amount,
        status: OrderStatus::Pending.as_str().to_string(),
        order_date: now,
        delivery_date: Some(now + Duration::days(1)),
    };
    let items: Vec<OrderItem> = priced
        .iter()
        .map(|line| OrderItem {
            id: Uuid::new_v4(),
            order_id: order.id,
            product_id: line.product_id,
            quantity: line.quantity,
            price: line.price,
            subtotal: line.subtotal,
        })
        .collect();

    if let Err(err) = store.insert_order(&order, &items).await {
        let all: Vec<&PricedLine> = priced.iter().collect();
        restore_applied(store, &all).await;
        return Err(PlaceOrderError::Persistence(err));
    }

    Ok((order, items))
}

async fn restore_applied<S: CheckoutStore>(store: &S, applied: &[&PricedLine]) {
    for line in applied {
        if let Err(err) = store.restore_stock(line.product_id, line.quantity).await {
            // Nothing left to do in-band; the discrepancy needs operator
            // attention, so make it loud.
            tracing::error!(
                product_id = %line.product_id,
                amount = %line.quantity,
                error = %err,
                "failed to restore reserved stock"
            );
        }
    }
}

/// Fetch one order with its items. When `owner` is set, orders belonging to
/// a different user are reported as absent.
pub async fn get_order<S: CheckoutStore>(
    store: &S,
    id: Uuid,
    owner: Option<Uuid>,
) -> Result<Option<(Order, Vec<OrderItem>)>, StoreError> {
    let found = store.get_order(id).await?;
    Ok(found.filter(|(order, _)| owner.is_none_or(|user_id| order.user_id == user_id)))
}

/// A user's order history, newest first.
pub async fn list_orders<S: CheckoutStore>(
    store: &S,
    user_id: Uuid,
) -> Result<Vec<Order>, StoreError> {
    store.list_orders_by_user(user_id).await
}

#[cfg(test)]
mod tests {
    use std::sync::Arc;

    use chrono::Utc;
    use rust_decimal_macros::dec;

    use super::*;
    use crate::models::Product;
    use crate::store::MemoryStore;

    fn product(name: &str, price: Decimal, stock: Decimal, unit: &str) -> Product {
        Product {
            id: Uuid::new_v4(),
            name: name.to_string(),
            description: None,
            price,
            stock,
            unit: unit.to_string(),
            created_at: Utc::now(),
        }
    }

    fn line(product_id: Uuid, quantity: Decimal) -> BasketLine {
        BasketLine {
            product_id,
            quantity,
        }
    }

    #[tokio::test]
    async fn success_decrements_stock_and_totals_match() {
        let store = MemoryStore::new();
        let milk = product("Milk (1L)", dec!(50), dec!(10), "Liter");
        let milk_id = milk.id;
        store.insert_product(milk);
        let user_id = Uuid::new_v4();

        let (order, items) = place_order(&store, user_id, &[line(milk_id, dec!(4))])
            .await
            .expect("placement should succeed");

        assert_eq!(order.total_amount, dec!(200));
        assert_eq!(order.status, "pending");
        assert_eq!(items.len(), 1);
        assert_eq!(items[0].price, dec!(50));
        assert_eq!(items[0].subtotal, dec!(200));
        assert_eq!(store.product_stock(milk_id), Some(dec!(6)));

        // Second order exceeding the remaining stock is a clean rejection.
        let err = place_order(&store, user_id, &[line(milk_id, dec!(7))])
            .await
            .unwrap_err();
        match err {
            PlaceOrderError::InsufficientStock {
                available,
                requested,
                ..
            } => {
                assert_eq!(available, dec!(6));
                assert_eq!(requested, dec!(7));
            }
            other => panic!("expected InsufficientStock, got {other:?}"),
        }
        assert_eq!(store.product_stock(milk_id), Some(dec!(6)));
        assert_eq!(store.order_count(), 1);
    }

    #[tokio::test]
    async fn total_is_sum_of_item_subtotals() {
        let store = MemoryStore::new();
        let paneer = product("Paneer (500g)", dec!(250), dec!(30), "grams");
        let ghee = product("Ghee (500ml)", dec!(500), dec!(20), "ml");
        let (paneer_id, ghee_id) = (paneer.id, ghee.id);
        store.insert_product(paneer);
        store.insert_product(ghee);

        // Fractional quantity for a weight-sold good.
        let (order, items) = place_order(
            &store,
            Uuid::new_v4(),
            &[line(paneer_id, dec!(1.5)), line(ghee_id, dec!(2))],
        )
        .await
        .unwrap();

        assert_eq!(items[0].subtotal, dec!(375.0));
        assert_eq!(items[1].subtotal, dec!(1000));
        let sum: Decimal = items.iter().map(|item| item.subtotal).sum();
        assert_eq!(order.total_amount, sum);
        assert_eq!(store.product_stock(paneer_id), Some(dec!(28.5)));
    }

    #[tokio::test]
    async fn empty_basket_is_rejected() {
        let store = MemoryStore::new();
        let err = place_order(&store, Uuid::new_v4(), &[]).await.unwrap_err();
        assert!(matches!(err, PlaceOrderError::EmptyBasket));
    }

    #[tokio::test]
    async fn non_positive_quantity_is_rejected() {
        let store = MemoryStore::new();
        let milk = product("Milk (1L)", dec!(50), dec!(10), "Liter");
        let milk_id = milk.id;
        store.insert_product(milk);

        let err = place_order(&store, Uuid::new_v4(), &[line(milk_id, dec!(0))])
            .await
            .unwrap_err();
        assert!(matches!(err, PlaceOrderError::InvalidQuantity { .. }));
        assert_eq!(store.product_stock(milk_id), Some(dec!(10)));
    }

    #[tokio::test]
    async fn unknown_product_fails_whole_basket_without_side_effects() {
        let store = MemoryStore::new();
        let milk = product("Milk (1L)", dec!(50), dec!(100), "Liter");
        let milk_id = milk.id;
        store.insert_product(milk);
        let missing = Uuid::new_v4();

        let err = place_order(
            &store,
            Uuid::new_v4(),
            &[line(milk_id, dec!(2)), line(missing, dec!(1))],
        )
        .await
        .unwrap_err();

        match err {
            PlaceOrderError::ProductNotFound(id) => assert_eq!(id, missing),
            other => panic!("expected ProductNotFound, got {other:?}"),
        }
        assert_eq!(store.product_stock(milk_id), Some(dec!(100)));
        assert_eq!(store.order_count(), 0);
    }

    /// Delegates to a [`MemoryStore`] but makes one product lose its first
    /// conditional decrement, as if a concurrent order had consumed the
    /// stock between this call's validation and its reservation.
    struct ContendedStore<'a> {
        inner: &'a MemoryStore,
        contended: Uuid,
        lost: std::sync::atomic::AtomicBool,
    }

    impl CheckoutStore for ContendedStore<'_> {
        async fn get_product(&self, id: Uuid) -> Result<Option<Product>, StoreError> {
            self.inner.get_product(id).await
        }

        async fn conditional_decrement_stock(
            &self,
            id: Uuid,
            amount: Decimal,
        ) -> Result<StockDecrement, StoreError> {
            use std::sync::atomic::Ordering;
            if id == self.contended && !self.lost.swap(true, Ordering::SeqCst) {
                return Ok(StockDecrement::Insufficient);
            }
            self.inner.conditional_decrement_stock(id, amount).await
        }

        async fn restore_stock(&self, id: Uuid, amount: Decimal) -> Result<(), StoreError> {
            self.inner.restore_stock(id, amount).await
        }

        async fn insert_order(
            &self,
            order: &Order,
            items: &[OrderItem],
        ) -> Result<(), StoreError> {
            self.inner.insert_order(order, items).await
        }

        async fn get_order(
            &self,
            id: Uuid,
        ) -> Result<Option<(Order, Vec<OrderItem>)>, StoreError> {
            self.inner.get_order(id).await
        }

        async fn list_orders_by_user(&self, user_id: Uuid) -> Result<Vec<Order>, StoreError> {
            self.inner.list_orders_by_user(user_id).await
        }
    }

    #[tokio::test]
    async fn losing_a_decrement_race_rolls_back_earlier_lines() {
        let inner = MemoryStore::new();
        let milk = product("Milk (1L)", dec!(50), dec!(10), "Liter");
        let yogurt = product("Yogurt (500ml)", dec!(80), dec!(3), "ml");
        let (milk_id, yogurt_id) = (milk.id, yogurt.id);
        inner.insert_product(milk);
        inner.insert_product(yogurt);

        let store = ContendedStore {
            inner: &inner,
            contended: yogurt_id,
            lost: std::sync::atomic::AtomicBool::new(false),
        };

        // Validation passes for both lines, the milk decrement is applied,
        // then the yogurt decrement loses the simulated race.
        let err = place_order(
            &store,
            Uuid::new_v4(),
            &[line(milk_id, dec!(2)), line(yogurt_id, dec!(3))],
        )
        .await
        .unwrap_err();
        match err {
            PlaceOrderError::ConcurrentStockConflict { product_id } => {
                assert_eq!(product_id, yogurt_id)
            }
            other => panic!("expected ConcurrentStockConflict, got {other:?}"),
        }
        // The milk decrement from the failed call was restored.
        assert_eq!(inner.product_stock(milk_id), Some(dec!(10)));
        assert_eq!(inner.product_stock(yogurt_id), Some(dec!(3)));
        assert_eq!(inner.order_count(), 0);

        // A plain retry succeeds now that the contention is gone.
        let (order, _) = place_order(
            &store,
            Uuid::new_v4(),
            &[line(milk_id, dec!(2)), line(yogurt_id, dec!(3))],
        )
        .await
        .unwrap();
        assert_eq!(order.total_amount, dec!(340));
        assert_eq!(inner.order_count(), 1);
    }

    #[tokio::test]
    async fn concurrent_placements_never_oversell() {
        let store = Arc::new(MemoryStore::new());
        let cheese = product("Cheese (200g)", dec!(150), dec!(5), "grams");
        let cheese_id = cheese.id;
        store.insert_product(cheese);

        let mut handles = Vec::new();
        for _ in 0..2 {
            let store = Arc::clone(&store);
            handles.push(tokio::spawn(async move {
                place_order(&*store, Uuid::new_v4(), &[line(cheese_id, dec!(5))]).await
            }));
        }

        let mut successes = 0;
        for handle in handles {
            match handle.await.unwrap() {
                Ok(_) => successes += 1,
                Err(PlaceOrderError::InsufficientStock { .. })
                | Err(PlaceOrderError::ConcurrentStockConflict { .. }) => {}
                Err(other) => panic!("unexpected error {other:?}"),
            }
        }

        assert_eq!(successes, 1, "exactly one placement may win the stock");
        assert_eq!(store.product_stock(cheese_id), Some(dec!(0)));
        assert_eq!(store.order_count(), 1);
    }

    #[tokio::test]
    async fn persistence_failure_restores_stock_and_retry_creates_one_order() {
        let store = MemoryStore::new();
        let butter = product("Buttermilk (1L)", dec!(40), dec!(50), "Liter");
        let butter_id = butter.id;
        store.insert_product(butter);
        let user_id = Uuid::new_v4();
        let basket = [line(butter_id, dec!(4))];

        store.inject_insert_failure();
        let err = place_order(&store, user_id, &basket).await.unwrap_err();
        assert!(matches!(err, PlaceOrderError::Persistence(_)));
        assert_eq!(store.product_stock(butter_id), Some(dec!(50)));
        assert_eq!(store.order_count(), 0);

        // The failed attempt left nothing behind; the retry is the only order.
        let (order, _) = place_order(&store, user_id, &basket).await.unwrap();
        assert_eq!(order.total_amount, dec!(160));
        assert_eq!(store.product_stock(butter_id), Some(dec!(46)));
        assert_eq!(store.order_count(), 1);
    }

    #[tokio::test]
    async fn read_path_filters_by_owner() {
        let store = MemoryStore::new();
        let milk = product("Milk (1L)", dec!(50), dec!(10), "Liter");
        let milk_id = milk.id;
        store.insert_product(milk);
        let owner = Uuid::new_v4();

        let (order, _) = place_order(&store, owner, &[line(milk_id, dec!(1))])
            .await
            .unwrap();

        assert!(get_order(&store, order.id, Some(owner)).await.unwrap().is_some());
        assert!(
            get_order(&store, order.id, Some(Uuid::new_v4()))
                .await
                .unwrap()
                .is_none()
        );

        let history = list_orders(&store, owner).await.unwrap();
        assert_eq!(history.len(), 1);
        assert_eq!(history[0].id, order.id);
    }
}

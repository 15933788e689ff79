use std::collections::HashMap;
use std::sync::Mutex;
use std::sync::atomic::{AtomicBool, Ordering};

use rust_decimal::Decimal;
use uuid::Uuid;

use crate::models::{Order, OrderItem, Product};
use crate::store::{CheckoutStore, StockDecrement, StoreError};

/// In-memory adapter. Stock checks and decrements happen under one lock, so
/// the decrement is atomic the same way the SQL `UPDATE ... WHERE stock >=`
/// is. Used by the checkout unit tests and as a reference adapter.
#[derive(Default)]
pub struct MemoryStore {
    products: Mutex<HashMap<Uuid, Product>>,
    orders: Mutex<Vec<(Order, Vec<OrderItem>)>>,
    fail_next_insert: AtomicBool,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn insert_product(&self, product: Product) {
        self.products.lock().unwrap().insert(product.id, product);
    }

    pub fn product_stock(&self, id: Uuid) -> Option<Decimal> {
        self.products.lock().unwrap().get(&id).map(|p| p.stock)
    }

    pub fn order_count(&self) -> usize {
        self.orders.lock().unwrap().len()
    }

    /// Make the next `insert_order` fail, to exercise the compensation path.
    pub fn inject_insert_failure(&self) {
        self.fail_next_insert.store(true, Ordering::SeqCst);
    }
}

impl CheckoutStore for MemoryStore {
    async fn get_product(&self, id: Uuid) -> Result<Option<Product>, StoreError> {
        Ok(self.products.lock().unwrap().get(&id).cloned())
    }

    async fn conditional_decrement_stock(
        &self,
        id: Uuid,
        amount: Decimal,
    ) -> Result<StockDecrement, StoreError> {
        let mut products = self.products.lock().unwrap();
        match products.get_mut(&id) {
            Some(product) if product.stock >= amount => {
                product.stock -= amount;
                Ok(StockDecrement::Applied)
            }
            _ => Ok(StockDecrement::Insufficient),
        }
    }

    async fn restore_stock(&self, id: Uuid, amount: Decimal) -> Result<(), StoreError> {
        if let Some(product) = self.products.lock().unwrap().get_mut(&id) {
            product.stock += amount;
        }
        Ok(())
    }

    async fn insert_order(&self, order: &Order, items: &[OrderItem]) -> Result<(), StoreError> {
        if self.fail_next_insert.swap(false, Ordering::SeqCst) {
            return Err(StoreError::Unavailable("injected insert failure".into()));
        }
        self.orders
            .lock()
            .unwrap()
            .push((order.clone(), items.to_vec()));
        Ok(())
    }

    async fn get_order(&self, id: Uuid) -> Result<Option<(Order, Vec<OrderItem>)>, StoreError> {
        Ok(self
            .orders
            .lock()
            .unwrap()
            .iter()
            .find(|(order, _)| order.id == id)
            .cloned())
    }

    async fn list_orders_by_user(&self, user_id: Uuid) -> Result<Vec<Order>, StoreError> {
        let mut orders: Vec<Order> = self
            .orders
            .lock()
            .unwrap()
            .iter()
            .map(|(order, _)| order.clone())
            .filter(|order| order.user_id == user_id)
            .collect();
        orders.sort_by(|a, b| b.order_date.cmp(&a.order_date));
        Ok(orders)
    }
}

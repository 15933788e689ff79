use uuid::Uuid;

use crate::checkout::{self, BasketLine, PlaceOrderError};
use crate::dto::orders::{OrderList, OrderWithItems, PlaceOrderRequest};
use crate::store::{PgStore, StoreError};
use crate::{
    audit::log_audit,
    error::{AppError, AppResult},
    middleware::auth::AuthUser,
    response::{ApiResponse, Meta},
    state::AppState,
};

/// Run the checkout flow for the caller's basket.
pub async fn place_order(
    state: &AppState,
    user: &AuthUser,
    payload: PlaceOrderRequest,
) -> AppResult<ApiResponse<OrderWithItems>> {
    let lines: Vec<BasketLine> = payload
        .items
        .iter()
        .map(|line| BasketLine {
            product_id: line.product_id,
            quantity: line.quantity,
        })
        .collect();

    let store = PgStore::new(state.pool.clone());
    let (order, items) = checkout::place_order(&store, user.user_id, &lines)
        .await
        .map_err(app_error_from_placement)?;

    if let Err(err) = log_audit(
        &state.pool,
        Some(user.user_id),
        "order_place",
        Some("orders"),
        Some(serde_json::json!({ "order_id": order.id, "total_amount": order.total_amount })),
    )
    .await
    {
        tracing::warn!(error = %err, "audit log failed");
    }

    Ok(ApiResponse::success(
        "Order placed",
        OrderWithItems { order, items },
        Some(Meta::empty()),
    ))
}

/// The caller's order history, newest first.
pub async fn list_orders(state: &AppState, user: &AuthUser) -> AppResult<ApiResponse<OrderList>> {
    let store = PgStore::new(state.pool.clone());
    let orders = checkout::list_orders(&store, user.user_id)
        .await
        .map_err(app_error_from_store)?;

    Ok(ApiResponse::success(
        "Ok",
        OrderList { items: orders },
        Some(Meta::empty()),
    ))
}

/// One of the caller's orders with its items (the receipt view).
pub async fn get_order(
    state: &AppState,
    user: &AuthUser,
    id: Uuid,
) -> AppResult<ApiResponse<OrderWithItems>> {
    let store = PgStore::new(state.pool.clone());
    let found = checkout::get_order(&store, id, Some(user.user_id))
        .await
        .map_err(app_error_from_store)?;

    let (order, items) = match found {
        Some(pair) => pair,
        None => return Err(AppError::NotFound),
    };

    Ok(ApiResponse::success(
        "OK",
        OrderWithItems { order, items },
        Some(Meta::empty()),
    ))
}

fn app_error_from_placement(err: PlaceOrderError) -> AppError {
    match err {
        PlaceOrderError::EmptyBasket
        | PlaceOrderError::InvalidQuantity { .. }
        | PlaceOrderError::ProductNotFound(_)
        | PlaceOrderError::InsufficientStock { .. } => AppError::BadRequest(err.to_string()),
        PlaceOrderError::ConcurrentStockConflict { .. } => AppError::Conflict(err.to_string()),
        PlaceOrderError::Persistence(source) | PlaceOrderError::Store(source) => {
            app_error_from_store(source)
        }
    }
}

fn app_error_from_store(err: StoreError) -> AppError {
    match err {
        StoreError::Database(db) => AppError::DbError(db),
        other => AppError::Internal(anyhow::anyhow!(other)),
    }
}

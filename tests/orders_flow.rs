use chrono::Duration;
use dairy_management_api::{
    db::{create_orm_conn, create_pool, run_migrations},
    dto::orders::{BasketLineRequest, PlaceOrderRequest},
    entity::{
        products::{ActiveModel as ProductActive, Entity as Products},
        users::ActiveModel as UserActive,
    },
    error::AppError,
    middleware::auth::AuthUser,
    models::OrderStatus,
    routes::admin::{LowStockQuery, UpdateOrderStatusRequest},
    routes::params::Pagination,
    services::{admin_service, order_service, product_service},
    state::AppState,
};
use rust_decimal_macros::dec;
use sea_orm::ActiveValue::NotSet;
use sea_orm::{ActiveModelTrait, ConnectionTrait, EntityTrait, Set, Statement};
use uuid::Uuid;

// Integration flow: user places an order against seeded stock; admin updates
// status and sees the order on the dashboard and the product in low stock.
#[tokio::test]
async fn place_order_and_admin_flow() -> anyhow::Result<()> {
    // Allow skipping when no DB is configured in the environment.
    let database_url = match std::env::var("TEST_DATABASE_URL")
        .or_else(|_| std::env::var("DATABASE_URL"))
    {
        Ok(url) => url,
        Err(_) => {
            eprintln!(
                "Skipping test: set TEST_DATABASE_URL or DATABASE_URL to run integration flow tests."
            );
            return Ok(());
        }
    };

    let state = setup_state(&database_url).await?;

    // Seed users
    let user_id = create_user(&state, "user", "customer", "customer@example.com").await?;
    let admin_id = create_user(&state, "admin", "manager", "manager@example.com").await?;

    // Seed product with stock
    let product = ProductActive {
        id: Set(Uuid::new_v4()),
        name: Set("Milk (1L)".into()),
        description: Set(Some("Fresh whole milk".into())),
        price: Set(dec!(50)),
        stock: Set(dec!(10)),
        unit: Set("Liter".into()),
        created_at: NotSet,
    }
    .insert(&state.orm)
    .await?;

    let auth_user = AuthUser {
        user_id,
        role: "user".into(),
    };
    let auth_admin = AuthUser {
        user_id: admin_id,
        role: "admin".into(),
    };

    // Place an order for 4 liters
    let placed = order_service::place_order(
        &state,
        &auth_user,
        PlaceOrderRequest {
            items: vec![BasketLineRequest {
                product_id: product.id,
                quantity: dec!(4),
            }],
        },
    )
    .await?;
    let placed = placed.data.unwrap();
    assert_eq!(placed.order.total_amount, dec!(200));
    assert_eq!(placed.order.status, "pending");
    assert_eq!(placed.items.len(), 1);
    assert_eq!(placed.items[0].subtotal, dec!(200));
    assert_eq!(
        placed.order.delivery_date,
        Some(placed.order.order_date + Duration::days(1))
    );

    let stock_after = Products::find_by_id(product.id)
        .one(&state.orm)
        .await?
        .unwrap()
        .stock;
    assert_eq!(stock_after, dec!(6));

    // Requesting more than the remaining stock is rejected and changes nothing.
    let rejection = order_service::place_order(
        &state,
        &auth_user,
        PlaceOrderRequest {
            items: vec![BasketLineRequest {
                product_id: product.id,
                quantity: dec!(7),
            }],
        },
    )
    .await;
    assert!(matches!(rejection, Err(AppError::BadRequest(_))));
    let stock_after = Products::find_by_id(product.id)
        .one(&state.orm)
        .await?
        .unwrap()
        .stock;
    assert_eq!(stock_after, dec!(6));

    // The owner sees the order; another user does not.
    let receipt = order_service::get_order(&state, &auth_user, placed.order.id).await?;
    assert_eq!(receipt.data.unwrap().order.id, placed.order.id);
    let foreign = order_service::get_order(&state, &auth_admin, placed.order.id).await;
    assert!(matches!(foreign, Err(AppError::NotFound)));

    // A product with order history cannot be deleted.
    let delete = product_service::delete_product(&state, &auth_admin, product.id).await;
    assert!(matches!(delete, Err(AppError::BadRequest(_))));

    // Admin updates status
    let updated = admin_service::update_order_status(
        &state,
        &auth_admin,
        placed.order.id,
        UpdateOrderStatusRequest {
            status: OrderStatus::Completed,
        },
    )
    .await?;
    assert_eq!(updated.data.unwrap().status, "completed");

    // Dashboard reflects the single order and its revenue.
    let dashboard = admin_service::dashboard(&state, &auth_admin).await?;
    let summary = dashboard.data.unwrap();
    assert_eq!(summary.total_orders, 1);
    assert_eq!(summary.total_revenue, dec!(200));
    assert_eq!(summary.total_customers, 1);

    // Low stock should include the product after stock decreased to 6
    let low = admin_service::list_low_stock(
        &state,
        &auth_admin,
        LowStockQuery {
            pagination: Pagination {
                page: Some(1),
                per_page: Some(20),
            },
            threshold: Some(dec!(10)),
        },
    )
    .await?;
    assert!(
        low.data.unwrap().items.iter().any(|p| p.id == product.id),
        "expected product to appear in low-stock list"
    );

    // Two placements racing on the same stock: the conditional decrement
    // lets exactly one through.
    let cheese = ProductActive {
        id: Set(Uuid::new_v4()),
        name: Set("Cheese (200g)".into()),
        description: Set(Some("Processed cheese".into())),
        price: Set(dec!(150)),
        stock: Set(dec!(5)),
        unit: Set("grams".into()),
        created_at: NotSet,
    }
    .insert(&state.orm)
    .await?;

    let mut handles = Vec::new();
    for _ in 0..2 {
        let state = state.clone();
        let auth_user = auth_user.clone();
        let cheese_id = cheese.id;
        handles.push(tokio::spawn(async move {
            order_service::place_order(
                &state,
                &auth_user,
                PlaceOrderRequest {
                    items: vec![BasketLineRequest {
                        product_id: cheese_id,
                        quantity: dec!(5),
                    }],
                },
            )
            .await
        }));
    }

    let mut successes = 0;
    for handle in handles {
        match handle.await? {
            Ok(_) => successes += 1,
            Err(AppError::BadRequest(_)) | Err(AppError::Conflict(_)) => {}
            Err(other) => return Err(other.into()),
        }
    }
    assert_eq!(successes, 1, "exactly one placement may win the stock");

    let cheese_stock = Products::find_by_id(cheese.id)
        .one(&state.orm)
        .await?
        .unwrap()
        .stock;
    assert_eq!(cheese_stock, dec!(0));

    Ok(())
}

async fn setup_state(database_url: &str) -> anyhow::Result<AppState> {
    let pool = create_pool(database_url).await?;
    let orm = create_orm_conn(database_url).await?;
    run_migrations(&orm).await?;

    // Clean tables between runs
    let backend = orm.get_database_backend();
    orm.execute(Statement::from_string(
        backend,
        "TRUNCATE TABLE order_items, orders, audit_logs, products, users RESTART IDENTITY CASCADE",
    ))
    .await?;

    Ok(AppState { pool, orm })
}

async fn create_user(
    state: &AppState,
    role: &str,
    username: &str,
    email: &str,
) -> anyhow::Result<Uuid> {
    let user = UserActive {
        id: Set(Uuid::new_v4()),
        username: Set(username.to_string()),
        email: Set(email.to_string()),
        password_hash: Set("dummy".into()),
        phone: Set("0000000000".into()),
        address: Set("Test Street 1".into()),
        role: Set(role.into()),
        created_at: NotSet,
    }
    .insert(&state.orm)
    .await?;

    Ok(user.id)
}

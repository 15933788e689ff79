use utoipa::{
    Modify, OpenApi,
    openapi::{
        self,
        OpenApi as OpenApiSpec,
        security::{HttpAuthScheme, HttpBuilder, SecurityScheme},
    },
};
use utoipa_scalar::{Scalar, Servable};

use crate::{
    dto::{
        auth::{ChangePasswordRequest, LoginRequest, LoginResponse, RegisterRequest, UserResponse},
        orders::{BasketLineRequest, OrderList, OrderWithItems, PlaceOrderRequest},
        products,
    },
    models::{Order, OrderItem, OrderStatus, Product},
    response::{ApiResponse, Meta},
    routes::{admin, auth, health, orders, params, products as product_routes},
};

struct SecurityAddon;

impl Modify for SecurityAddon {
    fn modify(&self, openapi: &mut openapi::OpenApi) {
        let components = openapi.components.get_or_insert_with(Default::default);
        components.add_security_scheme(
            "bearer_auth",
            SecurityScheme::Http(
                HttpBuilder::new()
                    .scheme(HttpAuthScheme::Bearer)
                    .bearer_format("JWT")
                    .build(),
            ),
        );
    }
}

#[derive(OpenApi)]
#[openapi(
    paths(
        health::health_check,
        auth::login,
        auth::register,
        auth::change_password_handler,
        product_routes::list_products,
        product_routes::create_product,
        product_routes::get_product,
        product_routes::update_product,
        product_routes::delete_product,
        orders::place_order,
        orders::list_orders,
        orders::get_order,
        admin::dashboard,
        admin::list_all_orders,
        admin::get_order_admin,
        admin::update_order_status,
        admin::list_users,
        admin::list_low_stock
    ),
    components(
        schemas(
            Product,
            Order,
            OrderItem,
            OrderStatus,
            UserResponse,
            RegisterRequest,
            LoginRequest,
            LoginResponse,
            ChangePasswordRequest,
            PlaceOrderRequest,
            BasketLineRequest,
            OrderList,
            OrderWithItems,
            admin::ProductList,
            admin::UserList,
            admin::DashboardSummary,
            admin::UpdateOrderStatusRequest,
            admin::LowStockQuery,
            params::Pagination,
            params::ProductQuery,
            params::OrderListQuery,
            products::CreateProductRequest,
            products::UpdateProductRequest,
            products::ProductList,
            Meta,
            ApiResponse<Product>,
            ApiResponse<products::ProductList>,
            ApiResponse<OrderWithItems>,
            ApiResponse<OrderList>,
            ApiResponse<admin::ProductList>,
            ApiResponse<admin::DashboardSummary>
        )
    ),
    security(
        ("bearer_auth" = [])
    ),
    modifiers(&SecurityAddon),
    tags(
        (name = "Health", description = "Health check endpoint"),
        (name = "Auth", description = "Authentication endpoints"),
        (name = "Products", description = "Catalog endpoints"),
        (name = "Orders", description = "Order placement and history"),
        (name = "Admin", description = "Admin endpoints"),
    )
)]
pub struct ApiDoc;

pub fn scalar_docs() -> Scalar<OpenApiSpec> {
    Scalar::with_url("/docs", ApiDoc::openapi())
}

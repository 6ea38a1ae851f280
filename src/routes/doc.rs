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
        auth::{LoginRequest, LoginResponse, RegisterRequest},
        cart::{AddCartItemRequest, UpdateCartItemRequest},
        orders::{CreateOrderRequest, CreatedOrder, OrderDetail, OrderHistory, OrderList, StatusChange},
        payments::{PaymentResult, PaymentUrl, PaymentUrlRequest},
        products::{self, CreateProductRequest, UpdateProductRequest},
    },
    models::{Cart, CartItem, Order, OrderStatusEntry, Payment, Product, User},
    order_status::{Actor, OrderStatus},
    response::{ApiResponse, Meta},
    routes::{
        admin, auth, cart, health, orders, params, payments, products as product_routes,
    },
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
        cart::get_cart,
        cart::add_item,
        cart::update_item,
        cart::remove_item,
        product_routes::list_products,
        product_routes::create_product,
        product_routes::get_product,
        product_routes::update_product,
        product_routes::delete_product,
        orders::create_order,
        orders::list_orders,
        orders::get_order,
        orders::order_history,
        orders::create_payment_url,
        orders::advance_order,
        orders::cancel_order,
        admin::list_all_orders,
        admin::advance_order,
        admin::reject_order,
        payments::vnpay_callback
    ),
    components(
        schemas(
            User,
            Product,
            Cart,
            CartItem,
            Order,
            OrderStatus,
            OrderStatusEntry,
            Actor,
            Payment,
            RegisterRequest,
            LoginRequest,
            LoginResponse,
            AddCartItemRequest,
            UpdateCartItemRequest,
            CreateProductRequest,
            UpdateProductRequest,
            CreateOrderRequest,
            CreatedOrder,
            OrderDetail,
            OrderHistory,
            OrderList,
            StatusChange,
            PaymentUrlRequest,
            PaymentUrl,
            PaymentResult,
            params::Pagination,
            params::ProductQuery,
            params::OrderListQuery,
            products::ProductList,
            Meta,
            ApiResponse<Product>,
            ApiResponse<products::ProductList>,
            ApiResponse<Cart>,
            ApiResponse<CreatedOrder>,
            ApiResponse<OrderDetail>,
            ApiResponse<OrderList>,
            ApiResponse<StatusChange>,
            ApiResponse<PaymentResult>
        )
    ),
    security(
        ("bearer_auth" = [])
    ),
    modifiers(&SecurityAddon),
    tags(
        (name = "Health", description = "Health check endpoint"),
        (name = "Products", description = "Product endpoints"),
        (name = "Cart", description = "Cart endpoints"),
        (name = "Orders", description = "Order endpoints"),
        (name = "Admin", description = "Admin endpoints"),
        (name = "Auth", description = "Authentication endpoints"),
        (name = "Payments", description = "Payment gateway callbacks"),
    )
)]
pub struct ApiDoc;

pub fn scalar_docs() -> Scalar<OpenApiSpec> {
    Scalar::with_url("/docs", ApiDoc::openapi())
}

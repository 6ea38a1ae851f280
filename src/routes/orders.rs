use axum::{
    Json, Router,
    extract::{Path, Query, State},
    routing::{get, post},
};
use uuid::Uuid;

use crate::{
    dto::{
        orders::{CreateOrderRequest, CreatedOrder, OrderDetail, OrderHistory, OrderList, StatusChange},
        payments::{PaymentUrl, PaymentUrlRequest},
    },
    error::AppResult,
    middleware::{auth::AuthUser, client_ip::ClientIp},
    order_status::Action,
    response::ApiResponse,
    routes::params::OrderListQuery,
    services::{order_service, payment_service},
    state::AppState,
};

pub fn router() -> Router<AppState> {
    Router::new()
        .route("/", get(list_orders).post(create_order))
        .route("/{id}", get(get_order))
        .route("/{id}/history", get(order_history))
        .route("/{id}/payment-url", post(create_payment_url))
        .route("/{id}/advance", post(advance_order))
        .route("/{id}/cancel", post(cancel_order))
}

#[utoipa::path(
    post,
    path = "/api/orders",
    request_body = CreateOrderRequest,
    responses(
        (status = 200, description = "Create an order from the cart and open its payment", body = ApiResponse<CreatedOrder>),
        (status = 400, description = "Cart missing, empty or already ordered"),
        (status = 401, description = "Unauthorized"),
    ),
    security(("bearer_auth" = [])),
    tag = "Orders"
)]
pub async fn create_order(
    State(state): State<AppState>,
    user: AuthUser,
    ClientIp(client_ip): ClientIp,
    Json(payload): Json<CreateOrderRequest>,
) -> AppResult<Json<ApiResponse<CreatedOrder>>> {
    let resp = order_service::create_order(&state, &user, &client_ip, payload).await?;
    Ok(Json(resp))
}

#[utoipa::path(
    get,
    path = "/api/orders",
    params(
        ("page" = Option<i64>, Query, description = "Page number, default 1"),
        ("per_page" = Option<i64>, Query, description = "Items per page, default 20"),
        ("status" = Option<String>, Query, description = "Filter by status"),
        ("sort_order" = Option<String>, Query, description = "Sort order: asc, desc")
    ),
    responses(
        (status = 200, description = "Orders of the current user", body = ApiResponse<OrderList>)
    ),
    security(("bearer_auth" = [])),
    tag = "Orders"
)]
pub async fn list_orders(
    State(state): State<AppState>,
    user: AuthUser,
    Query(query): Query<OrderListQuery>,
) -> AppResult<Json<ApiResponse<OrderList>>> {
    let resp = order_service::list_orders(&state, &user, query).await?;
    Ok(Json(resp))
}

#[utoipa::path(
    get,
    path = "/api/orders/{id}",
    params(
        ("id" = Uuid, Path, description = "Order ID")
    ),
    responses(
        (status = 200, description = "Order with its payments", body = ApiResponse<OrderDetail>),
        (status = 404, description = "Order not found"),
    ),
    security(("bearer_auth" = [])),
    tag = "Orders"
)]
pub async fn get_order(
    State(state): State<AppState>,
    user: AuthUser,
    Path(id): Path<Uuid>,
) -> AppResult<Json<ApiResponse<OrderDetail>>> {
    let resp = order_service::get_order(&state, &user, id).await?;
    Ok(Json(resp))
}

#[utoipa::path(
    get,
    path = "/api/orders/{id}/history",
    params(
        ("id" = Uuid, Path, description = "Order ID")
    ),
    responses(
        (status = 200, description = "Status changes, oldest first", body = ApiResponse<OrderHistory>),
        (status = 404, description = "Order not found"),
    ),
    security(("bearer_auth" = [])),
    tag = "Orders"
)]
pub async fn order_history(
    State(state): State<AppState>,
    user: AuthUser,
    Path(id): Path<Uuid>,
) -> AppResult<Json<ApiResponse<OrderHistory>>> {
    let resp = order_service::order_history(&state, &user, id).await?;
    Ok(Json(resp))
}

#[utoipa::path(
    post,
    path = "/api/orders/{id}/payment-url",
    params(
        ("id" = Uuid, Path, description = "Order ID")
    ),
    request_body(content = PaymentUrlRequest, description = "Optional return url override"),
    responses(
        (status = 200, description = "New VNPay payment url", body = ApiResponse<PaymentUrl>),
        (status = 400, description = "Order is not waiting for payment"),
        (status = 404, description = "Order not found"),
    ),
    security(("bearer_auth" = [])),
    tag = "Orders"
)]
pub async fn create_payment_url(
    State(state): State<AppState>,
    user: AuthUser,
    ClientIp(client_ip): ClientIp,
    Path(id): Path<Uuid>,
    payload: Option<Json<PaymentUrlRequest>>,
) -> AppResult<Json<ApiResponse<PaymentUrl>>> {
    let payload = payload.map(|Json(p)| p).unwrap_or_default();
    let resp = payment_service::create_payment_url(&state, &user, id, &client_ip, payload).await?;
    Ok(Json(resp))
}

#[utoipa::path(
    post,
    path = "/api/orders/{id}/advance",
    params(
        ("id" = Uuid, Path, description = "Order ID")
    ),
    responses(
        (status = 200, description = "Confirm receipt of a shipped order", body = ApiResponse<StatusChange>),
        (status = 403, description = "Step not allowed for customers"),
        (status = 404, description = "Order not found"),
        (status = 409, description = "Illegal transition"),
    ),
    security(("bearer_auth" = [])),
    tag = "Orders"
)]
pub async fn advance_order(
    State(state): State<AppState>,
    user: AuthUser,
    Path(id): Path<Uuid>,
) -> AppResult<Json<ApiResponse<StatusChange>>> {
    let resp = order_service::customer_transition(&state, &user, id, Action::Advance).await?;
    Ok(Json(resp))
}

#[utoipa::path(
    post,
    path = "/api/orders/{id}/cancel",
    params(
        ("id" = Uuid, Path, description = "Order ID")
    ),
    responses(
        (status = 200, description = "Cancel an unpaid order", body = ApiResponse<StatusChange>),
        (status = 404, description = "Order not found"),
        (status = 409, description = "Order is no longer waiting for payment"),
    ),
    security(("bearer_auth" = [])),
    tag = "Orders"
)]
pub async fn cancel_order(
    State(state): State<AppState>,
    user: AuthUser,
    Path(id): Path<Uuid>,
) -> AppResult<Json<ApiResponse<StatusChange>>> {
    let resp = order_service::customer_transition(&state, &user, id, Action::Cancel).await?;
    Ok(Json(resp))
}

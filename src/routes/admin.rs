use axum::{
    Json, Router,
    extract::{Path, Query, State},
    routing::{get, post},
};
use uuid::Uuid;

use crate::{
    dto::orders::{OrderList, StatusChange},
    error::AppResult,
    middleware::auth::AuthUser,
    order_status::Action,
    response::ApiResponse,
    routes::params::OrderListQuery,
    services::order_service,
    state::AppState,
};

pub fn router() -> Router<AppState> {
    Router::new()
        .route("/orders", get(list_all_orders))
        .route("/orders/{id}/advance", post(advance_order))
        .route("/orders/{id}/reject", post(reject_order))
}

#[utoipa::path(
    get,
    path = "/api/admin/orders",
    params(
        ("page" = Option<i64>, Query, description = "Page number, default 1"),
        ("per_page" = Option<i64>, Query, description = "Items per page, default 20"),
        ("status" = Option<String>, Query, description = "Filter by status"),
        ("sort_order" = Option<String>, Query, description = "Sort order: asc, desc")
    ),
    responses(
        (status = 200, description = "List all orders (admin only)", body = ApiResponse<OrderList>),
        (status = 400, description = "Unknown status filter"),
        (status = 403, description = "Forbidden"),
    ),
    security(("bearer_auth" = [])),
    tag = "Admin"
)]
pub async fn list_all_orders(
    State(state): State<AppState>,
    user: AuthUser,
    Query(query): Query<OrderListQuery>,
) -> AppResult<Json<ApiResponse<OrderList>>> {
    let resp = order_service::list_all_orders(&state, &user, query).await?;
    Ok(Json(resp))
}

#[utoipa::path(
    post,
    path = "/api/admin/orders/{id}/advance",
    params(
        ("id" = Uuid, Path, description = "Order ID")
    ),
    responses(
        (status = 200, description = "Approve or ship an order (admin only)", body = ApiResponse<StatusChange>),
        (status = 403, description = "Forbidden"),
        (status = 404, description = "Order not found"),
        (status = 409, description = "Illegal transition"),
    ),
    security(("bearer_auth" = [])),
    tag = "Admin"
)]
pub async fn advance_order(
    State(state): State<AppState>,
    user: AuthUser,
    Path(id): Path<Uuid>,
) -> AppResult<Json<ApiResponse<StatusChange>>> {
    let resp = order_service::admin_transition(&state, &user, id, Action::Advance).await?;
    Ok(Json(resp))
}

#[utoipa::path(
    post,
    path = "/api/admin/orders/{id}/reject",
    params(
        ("id" = Uuid, Path, description = "Order ID")
    ),
    responses(
        (status = 200, description = "Reject a pending order (admin only)", body = ApiResponse<StatusChange>),
        (status = 403, description = "Forbidden"),
        (status = 404, description = "Order not found"),
        (status = 409, description = "Order is not pending"),
    ),
    security(("bearer_auth" = [])),
    tag = "Admin"
)]
pub async fn reject_order(
    State(state): State<AppState>,
    user: AuthUser,
    Path(id): Path<Uuid>,
) -> AppResult<Json<ApiResponse<StatusChange>>> {
    let resp = order_service::admin_transition(&state, &user, id, Action::Reject).await?;
    Ok(Json(resp))
}

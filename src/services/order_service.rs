use chrono::Utc;
use sea_orm::sea_query::LockType;
use sea_orm::{
    ActiveModelTrait, ActiveValue::NotSet, ColumnTrait, Condition, ConnectionTrait, EntityTrait,
    PaginatorTrait, QueryFilter, QueryOrder, QuerySelect, Select, Set, TransactionTrait,
};
use uuid::Uuid;

use crate::{
    audit,
    dto::orders::{CreateOrderRequest, CreatedOrder, OrderDetail, OrderHistory, OrderList, StatusChange},
    entity::{
        cart_items::{Column as CartItemCol, Entity as CartItems},
        carts::{ActiveModel as CartActive, Column as CartCol, Entity as Carts},
        order_status_history::{
            ActiveModel as HistoryActive, Column as HistoryCol, Entity as OrderStatusHistory,
        },
        orders::{ActiveModel as OrderActive, Column as OrderCol, Entity as Orders, Model as OrderModel},
        payments::{Column as PaymentCol, Entity as Payments},
    },
    error::{AppError, AppResult},
    middleware::auth::{AuthUser, ensure_admin, ensure_customer},
    models::{CartStatus, Order, OrderStatusEntry, Payment, PaymentMethod, Role},
    order_status::{Action, OrderStatus, OrderStatusChanged, OrderStatusProcessor},
    response::ApiResponse,
    routes::params::{OrderListQuery, SortOrder},
    services::payment_service,
    state::AppState,
};

/// Creates an order in `WaitForPayment` from the caller's cart and opens its first payment.
pub async fn create_order(
    state: &AppState,
    user: &AuthUser,
    client_ip: &str,
    payload: CreateOrderRequest,
) -> AppResult<ApiResponse<CreatedOrder>> {
    let billing_address = payload.billing_address.trim();
    if billing_address.is_empty() {
        return Err(AppError::BadRequest("billing_address is required".into()));
    }

    let txn = state.orm.begin().await?;

    let cart = Carts::find()
        .filter(
            Condition::all()
                .add(CartCol::Id.eq(payload.cart_id))
                .add(CartCol::UserId.eq(user.user_id)),
        )
        .lock(LockType::Update)
        .one(&txn)
        .await?
        .ok_or_else(|| AppError::BadRequest("Cart does not exist".into()))?;

    if cart.status.parse::<CartStatus>()? != CartStatus::Active {
        return Err(AppError::BadRequest("Cart has already been ordered".into()));
    }
    let item_count = CartItems::find()
        .filter(CartItemCol::CartId.eq(cart.id))
        .count(&txn)
        .await?;
    if item_count == 0 {
        return Err(AppError::BadRequest("Cart is empty".into()));
    }

    let order = OrderActive {
        id: Set(Uuid::new_v4()),
        user_id: Set(user.user_id),
        cart_id: Set(cart.id),
        billing_address: Set(billing_address.to_string()),
        payment_method: Set(PaymentMethod::VnPay.as_str().to_string()),
        status: Set(OrderStatus::WaitForPayment.as_str().to_string()),
        total_amount: Set(cart.total_price),
        payment_url: Set(None),
        created_at: NotSet,
        updated_at: NotSet,
    }
    .insert(&txn)
    .await?;

    let mut cart_active: CartActive = cart.clone().into();
    cart_active.status = Set(CartStatus::Ordered.as_str().to_string());
    cart_active.updated_at = Set(Utc::now().into());
    cart_active.update(&txn).await?;

    let return_url = payload
        .return_url
        .as_deref()
        .unwrap_or(&state.vnpay.return_url);
    let opened =
        payment_service::open_payment(&txn, &state.vnpay, order, &cart, return_url, client_ip)
            .await?;

    txn.commit().await?;

    tracing::info!(
        order_id = %opened.order.id,
        cart_id = %cart.id,
        txn_ref = opened.payment.txn_ref,
        "order created"
    );
    audit::record(
        &state.pool,
        Some(user.user_id),
        "order_create",
        "orders",
        serde_json::json!({ "order_id": opened.order.id, "cart_id": cart.id }),
    )
    .await;

    Ok(ApiResponse::ok(
        "Order created",
        CreatedOrder {
            order: Order::try_from(opened.order)?,
            payment_url: opened.url,
        },
    ))
}

pub async fn list_orders(
    state: &AppState,
    user: &AuthUser,
    query: OrderListQuery,
) -> AppResult<ApiResponse<OrderList>> {
    let finder = Orders::find().filter(OrderCol::UserId.eq(user.user_id));
    paged_orders(state, finder, query, "Ok").await
}

/// Admin view over every order, optionally filtered by status.
pub async fn list_all_orders(
    state: &AppState,
    user: &AuthUser,
    query: OrderListQuery,
) -> AppResult<ApiResponse<OrderList>> {
    ensure_admin(user)?;
    paged_orders(state, Orders::find(), query, "Orders").await
}

async fn paged_orders(
    state: &AppState,
    finder: Select<Orders>,
    query: OrderListQuery,
    message: &str,
) -> AppResult<ApiResponse<OrderList>> {
    let (page, limit, offset) = query.pagination.normalize();

    let mut finder = finder;
    if let Some(status) = query.status.as_deref().filter(|s| !s.is_empty()) {
        let status: OrderStatus = status.parse()?;
        finder = finder.filter(OrderCol::Status.eq(status.as_str()));
    }
    finder = match query.sort_order.unwrap_or(SortOrder::Desc) {
        SortOrder::Asc => finder.order_by_asc(OrderCol::CreatedAt),
        SortOrder::Desc => finder.order_by_desc(OrderCol::CreatedAt),
    };

    let total = finder.clone().count(&state.orm).await? as i64;
    let items = finder
        .limit(limit as u64)
        .offset(offset as u64)
        .all(&state.orm)
        .await?
        .into_iter()
        .map(Order::try_from)
        .collect::<AppResult<Vec<_>>>()?;

    Ok(ApiResponse::paged(
        message,
        OrderList { items },
        page,
        limit,
        total,
    ))
}

pub async fn get_order(
    state: &AppState,
    user: &AuthUser,
    id: Uuid,
) -> AppResult<ApiResponse<OrderDetail>> {
    let order = find_visible_order(state, user, id).await?;
    let payments = Payments::find()
        .filter(PaymentCol::OrderId.eq(order.id))
        .order_by_desc(PaymentCol::CreatedAt)
        .all(&state.orm)
        .await?
        .into_iter()
        .map(Payment::try_from)
        .collect::<AppResult<Vec<_>>>()?;

    Ok(ApiResponse::ok(
        "OK",
        OrderDetail {
            order: Order::try_from(order)?,
            payments,
        },
    ))
}

pub async fn order_history(
    state: &AppState,
    user: &AuthUser,
    id: Uuid,
) -> AppResult<ApiResponse<OrderHistory>> {
    let order = find_visible_order(state, user, id).await?;
    let entries = OrderStatusHistory::find()
        .filter(HistoryCol::OrderId.eq(order.id))
        .order_by_asc(HistoryCol::CreatedAt)
        .all(&state.orm)
        .await?
        .into_iter()
        .map(OrderStatusEntry::try_from)
        .collect::<AppResult<Vec<_>>>()?;

    Ok(ApiResponse::ok(
        "OK",
        OrderHistory {
            order_id: order.id,
            entries,
        },
    ))
}

/// Customer-side transition on one of the caller's own orders.
pub async fn customer_transition(
    state: &AppState,
    user: &AuthUser,
    id: Uuid,
    action: Action,
) -> AppResult<ApiResponse<StatusChange>> {
    ensure_customer(user)?;
    transition(state, user, id, action).await
}

/// Shop-side transition, performed by an admin on any order.
pub async fn admin_transition(
    state: &AppState,
    user: &AuthUser,
    id: Uuid,
    action: Action,
) -> AppResult<ApiResponse<StatusChange>> {
    ensure_admin(user)?;
    transition(state, user, id, action).await
}

async fn transition(
    state: &AppState,
    user: &AuthUser,
    id: Uuid,
    action: Action,
) -> AppResult<ApiResponse<StatusChange>> {
    let txn = state.orm.begin().await?;

    let mut condition = Condition::all().add(OrderCol::Id.eq(id));
    if user.role == Role::Customer {
        condition = condition.add(OrderCol::UserId.eq(user.user_id));
    }
    let order = Orders::find()
        .filter(condition)
        .lock(LockType::Update)
        .one(&txn)
        .await?
        .ok_or(AppError::OrderNotFound)?;

    let mut processor = OrderStatusProcessor::from_stored(order.id, &order.status)?;
    let actor = user.role.actor();
    let change = match action {
        Action::Advance => processor.advance(actor),
        Action::Reject => processor.reject(actor),
        Action::Cancel => processor.cancel(actor),
    }?;

    let order = persist_transition(&txn, order, &change).await?;
    txn.commit().await?;

    tracing::info!(
        order_id = %order.id,
        from = %change.from,
        to = %change.to,
        actor = %change.actor,
        "order status changed"
    );
    audit::record(
        &state.pool,
        Some(user.user_id),
        "order_status_change",
        "orders",
        serde_json::json!({
            "order_id": order.id,
            "from": change.from,
            "to": change.to,
        }),
    )
    .await;

    Ok(ApiResponse::ok(
        "Order status updated",
        StatusChange {
            order_id: order.id,
            from: change.from,
            status: change.to,
        },
    ))
}

/// Writes the new status and appends the history row. Callers hold the order row lock.
pub(crate) async fn persist_transition<C: ConnectionTrait>(
    db: &C,
    order: OrderModel,
    change: &OrderStatusChanged,
) -> AppResult<OrderModel> {
    let mut active: OrderActive = order.into();
    active.status = Set(change.to.as_str().to_string());
    active.updated_at = Set(change.at.into());
    let order = active.update(db).await?;

    HistoryActive {
        id: Set(Uuid::new_v4()),
        order_id: Set(order.id),
        from_status: Set(change.from.as_str().to_string()),
        to_status: Set(change.to.as_str().to_string()),
        actor: Set(change.actor.as_str().to_string()),
        created_at: Set(change.at.into()),
    }
    .insert(db)
    .await?;

    Ok(order)
}

async fn find_visible_order(state: &AppState, user: &AuthUser, id: Uuid) -> AppResult<OrderModel> {
    let mut condition = Condition::all().add(OrderCol::Id.eq(id));
    if user.role != Role::Admin {
        condition = condition.add(OrderCol::UserId.eq(user.user_id));
    }
    Orders::find()
        .filter(condition)
        .one(&state.orm)
        .await?
        .ok_or(AppError::OrderNotFound)
}

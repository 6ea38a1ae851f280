use serde::{Deserialize, Serialize};
use utoipa::ToSchema;
use uuid::Uuid;

use crate::{
    models::{Order, OrderStatusEntry, Payment},
    order_status::OrderStatus,
};

/// The owner is the authenticated user; a body-supplied user id is never accepted.
#[derive(Debug, Deserialize, ToSchema)]
pub struct CreateOrderRequest {
    pub cart_id: Uuid,
    pub billing_address: String,
    /// Overrides the configured VNPay return url.
    pub return_url: Option<String>,
}

#[derive(Debug, Serialize, ToSchema)]
pub struct CreatedOrder {
    pub order: Order,
    pub payment_url: String,
}

#[derive(Debug, Serialize, ToSchema)]
pub struct OrderDetail {
    pub order: Order,
    pub payments: Vec<Payment>,
}

#[derive(Debug, Serialize, ToSchema)]
pub struct OrderList {
    pub items: Vec<Order>,
}

#[derive(Debug, Serialize, ToSchema)]
pub struct OrderHistory {
    pub order_id: Uuid,
    pub entries: Vec<OrderStatusEntry>,
}

#[derive(Debug, Serialize, ToSchema)]
pub struct StatusChange {
    pub order_id: Uuid,
    pub from: OrderStatus,
    pub status: OrderStatus,
}

use std::str::FromStr;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use utoipa::ToSchema;
use uuid::Uuid;

use crate::{
    entity::{
        cart_items::Model as CartItemModel, carts::Model as CartModel,
        order_status_history::Model as HistoryModel, orders::Model as OrderModel,
        payments::Model as PaymentModel, products::Model as ProductModel,
        users::Model as UserModel,
    },
    error::AppError,
    order_status::{Actor, OrderStatus},
};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, ToSchema)]
pub enum CartStatus {
    Active,
    /// Consumed by an order; a new active cart is opened on the next add.
    Ordered,
}

impl CartStatus {
    pub fn as_str(self) -> &'static str {
        match self {
            CartStatus::Active => "Active",
            CartStatus::Ordered => "Ordered",
        }
    }
}

impl FromStr for CartStatus {
    type Err = AppError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "Active" => Ok(CartStatus::Active),
            "Ordered" => Ok(CartStatus::Ordered),
            other => Err(AppError::Internal(anyhow::anyhow!(
                "unknown cart status '{other}'"
            ))),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, ToSchema)]
pub enum PaymentStatus {
    Pending,
    Paid,
}

impl PaymentStatus {
    pub fn as_str(self) -> &'static str {
        match self {
            PaymentStatus::Pending => "Pending",
            PaymentStatus::Paid => "Paid",
        }
    }
}

impl FromStr for PaymentStatus {
    type Err = AppError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "Pending" => Ok(PaymentStatus::Pending),
            "Paid" => Ok(PaymentStatus::Paid),
            other => Err(AppError::Internal(anyhow::anyhow!(
                "unknown payment status '{other}'"
            ))),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, ToSchema)]
pub enum PaymentMethod {
    VnPay,
}

impl PaymentMethod {
    pub fn as_str(self) -> &'static str {
        match self {
            PaymentMethod::VnPay => "VnPay",
        }
    }
}

#[derive(Debug, Serialize, Deserialize, ToSchema)]
pub struct User {
    pub id: Uuid,
    pub email: String,
    pub role: String,
    pub created_at: DateTime<Utc>,
}

impl From<UserModel> for User {
    fn from(model: UserModel) -> Self {
        Self {
            id: model.id,
            email: model.email,
            role: model.role,
            created_at: model.created_at.with_timezone(&Utc),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, ToSchema)]
pub struct Product {
    pub id: Uuid,
    pub name: String,
    pub description: Option<String>,
    pub price: i64,
    pub stock: i32,
    pub created_at: DateTime<Utc>,
}

impl From<ProductModel> for Product {
    fn from(model: ProductModel) -> Self {
        Self {
            id: model.id,
            name: model.name,
            description: model.description,
            price: model.price,
            stock: model.stock,
            created_at: model.created_at.with_timezone(&Utc),
        }
    }
}

#[derive(Debug, Serialize, Deserialize, ToSchema)]
pub struct CartItem {
    pub id: Uuid,
    pub product_id: Uuid,
    pub quantity: i32,
    pub price: i64,
    pub created_at: DateTime<Utc>,
}

impl From<CartItemModel> for CartItem {
    fn from(model: CartItemModel) -> Self {
        Self {
            id: model.id,
            product_id: model.product_id,
            quantity: model.quantity,
            price: model.price,
            created_at: model.created_at.with_timezone(&Utc),
        }
    }
}

#[derive(Debug, Serialize, Deserialize, ToSchema)]
pub struct Cart {
    pub id: Uuid,
    pub user_id: Uuid,
    pub total_price: i64,
    pub status: CartStatus,
    pub items: Vec<CartItem>,
    pub updated_at: DateTime<Utc>,
}

impl Cart {
    pub fn from_entity(model: CartModel, items: Vec<CartItemModel>) -> Result<Self, AppError> {
        Ok(Self {
            id: model.id,
            user_id: model.user_id,
            total_price: model.total_price,
            status: model.status.parse()?,
            items: items.into_iter().map(CartItem::from).collect(),
            updated_at: model.updated_at.with_timezone(&Utc),
        })
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, ToSchema)]
pub struct Order {
    pub id: Uuid,
    pub user_id: Uuid,
    pub cart_id: Uuid,
    pub billing_address: String,
    pub payment_method: String,
    pub status: OrderStatus,
    pub total_amount: i64,
    pub payment_url: Option<String>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl TryFrom<OrderModel> for Order {
    type Error = AppError;

    fn try_from(model: OrderModel) -> Result<Self, Self::Error> {
        Ok(Self {
            status: model.status.parse()?,
            id: model.id,
            user_id: model.user_id,
            cart_id: model.cart_id,
            billing_address: model.billing_address,
            payment_method: model.payment_method,
            total_amount: model.total_amount,
            payment_url: model.payment_url,
            created_at: model.created_at.with_timezone(&Utc),
            updated_at: model.updated_at.with_timezone(&Utc),
        })
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, ToSchema)]
pub struct Payment {
    pub id: Uuid,
    pub order_id: Uuid,
    pub txn_ref: i64,
    pub amount: i64,
    pub status: PaymentStatus,
    pub transaction_no: Option<String>,
    pub response_code: Option<String>,
    pub created_at: DateTime<Utc>,
    pub paid_at: Option<DateTime<Utc>>,
}

impl TryFrom<PaymentModel> for Payment {
    type Error = AppError;

    fn try_from(model: PaymentModel) -> Result<Self, Self::Error> {
        Ok(Self {
            status: model.status.parse()?,
            id: model.id,
            order_id: model.order_id,
            txn_ref: model.txn_ref,
            amount: model.amount,
            transaction_no: model.transaction_no,
            response_code: model.response_code,
            created_at: model.created_at.with_timezone(&Utc),
            paid_at: model.paid_at.map(|dt| dt.with_timezone(&Utc)),
        })
    }
}

/// One row of an order's status history.
#[derive(Debug, Clone, Serialize, Deserialize, ToSchema)]
pub struct OrderStatusEntry {
    pub from: OrderStatus,
    pub to: OrderStatus,
    pub actor: String,
    pub at: DateTime<Utc>,
}

impl TryFrom<HistoryModel> for OrderStatusEntry {
    type Error = AppError;

    fn try_from(model: HistoryModel) -> Result<Self, Self::Error> {
        Ok(Self {
            from: model.from_status.parse()?,
            to: model.to_status.parse()?,
            actor: model.actor,
            at: model.created_at.with_timezone(&Utc),
        })
    }
}

/// Role carried in the JWT. Maps onto the actor allowed to drive transitions.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, ToSchema)]
#[serde(rename_all = "snake_case")]
pub enum Role {
    Customer,
    Admin,
}

impl Role {
    pub fn as_str(self) -> &'static str {
        match self {
            Role::Customer => "customer",
            Role::Admin => "admin",
        }
    }

    pub fn actor(self) -> Actor {
        match self {
            Role::Customer => Actor::Customer,
            Role::Admin => Actor::Admin,
        }
    }
}

impl FromStr for Role {
    type Err = AppError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "customer" => Ok(Role::Customer),
            "admin" => Ok(Role::Admin),
            _ => Err(AppError::Unauthorized("Unknown role".into())),
        }
    }
}

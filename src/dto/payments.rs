use serde::{Deserialize, Serialize};
use utoipa::ToSchema;
use uuid::Uuid;

use crate::order_status::OrderStatus;

#[derive(Debug, Default, Deserialize, ToSchema)]
pub struct PaymentUrlRequest {
    pub return_url: Option<String>,
}

#[derive(Debug, Serialize, ToSchema)]
pub struct PaymentUrl {
    pub order_id: Uuid,
    pub txn_ref: i64,
    pub amount: i64,
    pub payment_url: String,
}

/// Outcome of a gateway callback.
#[derive(Debug, Clone, Serialize, ToSchema)]
pub struct PaymentResult {
    pub success: bool,
    pub message: String,
    pub payment_method: String,
    pub order_id: Uuid,
    /// Order status after the callback was handled.
    pub order_status: OrderStatus,
    pub txn_ref: i64,
    pub transaction_id: Option<String>,
    pub response_code: String,
    pub order_description: Option<String>,
    /// True when the callback had already been applied and nothing was written.
    pub replayed: bool,
}

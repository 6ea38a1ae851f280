use axum::{
    Json, Router,
    extract::{Query, State},
    routing::get,
};

use crate::{
    dto::payments::PaymentResult,
    error::AppResult,
    response::ApiResponse,
    services::payment_service,
    state::AppState,
};

pub fn router() -> Router<AppState> {
    Router::new().route("/vnpay/callback", get(vnpay_callback))
}

/// Gateway return/IPN endpoint. Unauthenticated; the signature is the credential.
#[utoipa::path(
    get,
    path = "/api/payments/vnpay/callback",
    params(
        ("vnp_TxnRef" = String, Query, description = "Merchant transaction reference"),
        ("vnp_Amount" = String, Query, description = "Amount in minor units"),
        ("vnp_ResponseCode" = String, Query, description = "Gateway result, 00 on success"),
        ("vnp_SecureHash" = String, Query, description = "HMAC-SHA512 signature")
    ),
    responses(
        (status = 200, description = "Callback processed", body = ApiResponse<PaymentResult>),
        (status = 400, description = "Missing reference or amount mismatch"),
        (status = 401, description = "Invalid signature"),
        (status = 404, description = "Unknown payment or order"),
    ),
    tag = "Payments"
)]
pub async fn vnpay_callback(
    State(state): State<AppState>,
    Query(query): Query<Vec<(String, String)>>,
) -> AppResult<Json<ApiResponse<PaymentResult>>> {
    let result = payment_service::execute_callback(&state, query).await?;
    Ok(Json(ApiResponse::ok(result.message.clone(), result)))
}

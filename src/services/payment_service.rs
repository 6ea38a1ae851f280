//! VNPay payment creation and callback confirmation.

use chrono::{DateTime, Utc};
use sea_orm::sea_query::LockType;
use sea_orm::{
    ActiveModelTrait, ActiveValue::NotSet, ColumnTrait, Condition, ConnectionTrait, EntityTrait,
    QueryFilter, QuerySelect, Set, TransactionTrait,
};
use uuid::Uuid;

use crate::{
    audit,
    config::VnPayConfig,
    dto::payments::{PaymentResult, PaymentUrl, PaymentUrlRequest},
    entity::{
        carts::{Entity as Carts, Model as CartModel},
        orders::{ActiveModel as OrderActive, Column as OrderCol, Entity as Orders, Model as OrderModel},
        payments::{
            ActiveModel as PaymentActive, Column as PaymentCol, Entity as Payments,
            Model as PaymentModel,
        },
    },
    error::{AppError, AppResult},
    middleware::auth::AuthUser,
    models::{PaymentMethod, PaymentStatus, Role},
    order_status::{Actor, OrderStatus, OrderStatusProcessor},
    response::ApiResponse,
    services::order_service::persist_transition,
    state::AppState,
    vnpay::{self, CallbackFields, PaymentRequest},
};

/// A freshly persisted payment and the signed url pointing at it.
#[derive(Debug)]
pub struct OpenedPayment {
    pub order: OrderModel,
    pub payment: PaymentModel,
    pub url: String,
}

/// What a verified, successful callback should do.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Confirmation {
    /// Mark the payment paid and move the order to `Pending`.
    Apply,
    /// This payment was already marked paid by an earlier delivery. Nothing is written.
    Replay,
    /// The gateway captured this payment but its order has left `WaitForPayment`
    /// (cancelled, or confirmed through another payment). The capture is stored
    /// on the payment; the order is left as it is.
    Orphaned,
}

pub fn plan_confirmation(payment: PaymentStatus, order: OrderStatus) -> Confirmation {
    match (payment, order) {
        (PaymentStatus::Paid, _) => Confirmation::Replay,
        (PaymentStatus::Pending, OrderStatus::WaitForPayment) => Confirmation::Apply,
        (PaymentStatus::Pending, _) => Confirmation::Orphaned,
    }
}

/// Persists a `Pending` payment for `order` and stores its redirect url on the order.
///
/// The amount is the cart total in minor units; a non-positive total fails with
/// `InvalidAmount` before anything is written.
pub async fn open_payment<C: ConnectionTrait>(
    db: &C,
    config: &VnPayConfig,
    order: OrderModel,
    cart: &CartModel,
    return_url: &str,
    client_ip: &str,
) -> AppResult<OpenedPayment> {
    let amount = vnpay::to_minor_units(cart.total_price)?;
    if return_url.trim().is_empty() {
        return Err(AppError::BadRequest("return_url is required".into()));
    }

    let payment = PaymentActive {
        id: Set(Uuid::new_v4()),
        order_id: Set(order.id),
        txn_ref: NotSet,
        amount: Set(amount),
        status: Set(PaymentStatus::Pending.as_str().to_string()),
        transaction_no: Set(None),
        response_code: Set(None),
        created_at: NotSet,
        paid_at: Set(None),
    }
    .insert(db)
    .await?;

    let url = PaymentRequest::new()
        .field("vnp_Version", &config.version)
        .field("vnp_Command", "pay")
        .field("vnp_TmnCode", &config.tmn_code)
        .field(vnpay::AMOUNT, amount.to_string())
        .field("vnp_CreateDate", vnpay::gateway_timestamp(Utc::now()))
        .field("vnp_CurrCode", &config.curr_code)
        .field("vnp_IpAddr", client_ip)
        .field("vnp_Locale", &config.locale)
        .field(vnpay::ORDER_INFO, format!("Thanh toan don hang {}", order.id))
        .field("vnp_OrderType", "other")
        .field("vnp_ReturnUrl", return_url)
        .field(vnpay::TXN_REF, payment.txn_ref.to_string())
        .into_url(&config.base_url, &config.hash_secret)?;

    let mut active: OrderActive = order.into();
    active.payment_url = Set(Some(url.clone()));
    active.updated_at = Set(Utc::now().into());
    let order = active.update(db).await?;

    Ok(OpenedPayment {
        order,
        payment,
        url,
    })
}

/// Issues a new payment url for one of the caller's orders still waiting for payment.
pub async fn create_payment_url(
    state: &AppState,
    user: &AuthUser,
    order_id: Uuid,
    client_ip: &str,
    payload: PaymentUrlRequest,
) -> AppResult<ApiResponse<PaymentUrl>> {
    let txn = state.orm.begin().await?;

    let mut condition = Condition::all().add(OrderCol::Id.eq(order_id));
    if user.role != Role::Admin {
        condition = condition.add(OrderCol::UserId.eq(user.user_id));
    }
    let order = Orders::find()
        .filter(condition)
        .lock(LockType::Update)
        .one(&txn)
        .await?
        .ok_or(AppError::OrderNotFound)?;

    let status: OrderStatus = order.status.parse()?;
    if status != OrderStatus::WaitForPayment {
        return Err(AppError::BadRequest(format!(
            "Order is {status}, only orders in {} can be paid",
            OrderStatus::WaitForPayment
        )));
    }
    let cart = Carts::find_by_id(order.cart_id)
        .one(&txn)
        .await?
        .ok_or_else(|| AppError::BadRequest("Order has no cart".into()))?;

    let return_url = payload
        .return_url
        .as_deref()
        .unwrap_or(&state.vnpay.return_url);
    let opened = open_payment(&txn, &state.vnpay, order, &cart, return_url, client_ip).await?;
    txn.commit().await?;

    tracing::info!(
        order_id = %opened.order.id,
        txn_ref = opened.payment.txn_ref,
        amount = opened.payment.amount,
        "payment url issued"
    );

    Ok(ApiResponse::ok(
        "Payment url created",
        PaymentUrl {
            order_id: opened.order.id,
            txn_ref: opened.payment.txn_ref,
            amount: opened.payment.amount,
            payment_url: opened.url,
        },
    ))
}

/// Verifies a gateway callback and applies it at most once.
///
/// A capture for an order that has already moved on is stored on the payment
/// without touching the order, so the charge can be refunded by hand.
///
/// Payment and order rows are locked for the whole call, so a concurrent
/// duplicate waits and then takes the replay path.
pub async fn execute_callback<I>(state: &AppState, query: I) -> AppResult<PaymentResult>
where
    I: IntoIterator<Item = (String, String)>,
{
    let fields = CallbackFields::from_query(query);
    let txn_ref = fields.txn_ref().ok_or(AppError::MissingReference)?;

    let txn = state.orm.begin().await?;
    let payment = Payments::find()
        .filter(PaymentCol::TxnRef.eq(txn_ref))
        .lock(LockType::Update)
        .one(&txn)
        .await?
        .ok_or(AppError::PaymentNotFound)?;
    let order = Orders::find_by_id(payment.order_id)
        .lock(LockType::Update)
        .one(&txn)
        .await?
        .ok_or(AppError::OrderNotFound)?;

    if !fields.verify(&state.vnpay.hash_secret) {
        tracing::warn!(txn_ref, order_id = %order.id, "payment callback signature mismatch");
        return Err(AppError::InvalidSignature);
    }
    if fields.amount() != Some(payment.amount) {
        tracing::warn!(
            txn_ref,
            expected = payment.amount,
            received = ?fields.amount(),
            "payment callback amount mismatch"
        );
        return Err(AppError::InvalidAmount(
            "callback amount does not match the payment".into(),
        ));
    }

    let mut processor = OrderStatusProcessor::from_stored(order.id, &order.status)?;
    let payment_status: PaymentStatus = payment.status.parse()?;

    let response_code = fields.response_code().unwrap_or_default().to_string();
    let mut result = PaymentResult {
        success: false,
        message: format!("Payment failed with response code {response_code}"),
        payment_method: PaymentMethod::VnPay.as_str().to_string(),
        order_id: order.id,
        order_status: processor.status(),
        txn_ref,
        transaction_id: fields.get(vnpay::TRANSACTION_NO).map(str::to_string),
        response_code: response_code.clone(),
        order_description: fields.get(vnpay::ORDER_INFO).map(str::to_string),
        replayed: false,
    };

    if !fields.is_success() {
        tracing::info!(txn_ref, order_id = %order.id, response_code = %response_code, "payment failed at gateway");
        return Ok(result);
    }
    result.success = true;

    match plan_confirmation(payment_status, processor.status()) {
        Confirmation::Replay => {
            tracing::info!(
                txn_ref,
                order_id = %order.id,
                order_status = %processor.status(),
                "payment callback already applied"
            );
            result.replayed = true;
            result.message = "Payment already confirmed".to_string();
            Ok(result)
        }
        Confirmation::Orphaned => {
            let paid_at = Utc::now();
            mark_paid(&txn, payment, &result, paid_at).await?;
            txn.commit().await?;

            tracing::warn!(
                txn_ref,
                order_id = %order.id,
                order_status = %processor.status(),
                transaction_no = ?result.transaction_id,
                "payment captured for an order no longer waiting for payment"
            );
            audit::record(
                &state.pool,
                None,
                "payment_orphaned",
                "payments",
                serde_json::json!({
                    "order_id": order.id,
                    "txn_ref": txn_ref,
                    "order_status": processor.status(),
                    "transaction_no": result.transaction_id,
                }),
            )
            .await;

            result.message = format!(
                "Payment captured but order is {}; the order was not changed",
                processor.status()
            );
            Ok(result)
        }
        Confirmation::Apply => {
            let change = processor.advance(Actor::System)?;
            mark_paid(&txn, payment, &result, change.at).await?;
            let order = persist_transition(&txn, order, &change).await?;
            txn.commit().await?;

            tracing::info!(txn_ref, order_id = %order.id, "payment confirmed");
            audit::record(
                &state.pool,
                None,
                "payment_confirmed",
                "payments",
                serde_json::json!({ "order_id": order.id, "txn_ref": txn_ref }),
            )
            .await;

            result.order_status = change.to;
            result.message = "Payment confirmed".to_string();
            Ok(result)
        }
    }
}

/// Stores the gateway capture on the payment row.
async fn mark_paid<C: ConnectionTrait>(
    db: &C,
    payment: PaymentModel,
    result: &PaymentResult,
    paid_at: DateTime<Utc>,
) -> AppResult<PaymentModel> {
    let mut active: PaymentActive = payment.into();
    active.status = Set(PaymentStatus::Paid.as_str().to_string());
    active.transaction_no = Set(result.transaction_id.clone());
    active.response_code = Set(Some(result.response_code.clone()));
    active.paid_at = Set(Some(paid_at.into()));
    Ok(active.update(db).await?)
}

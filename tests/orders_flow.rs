use std::{collections::BTreeMap, sync::Arc};

use sea_orm::ActiveValue::NotSet;
use sea_orm::{
    ActiveModelTrait, ColumnTrait, ConnectionTrait, EntityTrait, PaginatorTrait, QueryFilter, Set,
    Statement,
};
use shop_order_api::{
    config::VnPayConfig,
    db::{create_pool, orm_from_pool, run_migrations},
    dto::{
        cart::{AddCartItemRequest, UpdateCartItemRequest},
        orders::CreateOrderRequest,
        payments::PaymentUrlRequest,
        products::CreateProductRequest,
    },
    entity::{
        audit_logs::{Column as AuditCol, Entity as AuditLogs},
        order_status_history::{Column as HistoryCol, Entity as OrderStatusHistory},
        products::ActiveModel as ProductActive,
        users::ActiveModel as UserActive,
    },
    error::AppError,
    middleware::auth::AuthUser,
    models::{Payment, PaymentStatus, Role},
    order_status::{Action, OrderStatus, TransitionError},
    routes::params::{OrderListQuery, Pagination, ProductQuery},
    services::{cart_service, order_service, payment_service, product_service},
    state::AppState,
    vnpay,
};
use uuid::Uuid;

const SECRET: &str = "FLOWTESTSECRET";

// Integration flow: cart -> order -> signed callback -> shop and customer steps.
#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn order_lifecycle_with_vnpay_confirmation() -> anyhow::Result<()> {
    // Allow skipping when no DB is configured in the environment.
    let database_url = match std::env::var("TEST_DATABASE_URL")
        .or_else(|_| std::env::var("DATABASE_URL"))
    {
        Ok(url) => url,
        Err(_) => {
            eprintln!(
                "Skipping test: set TEST_DATABASE_URL or DATABASE_URL to run integration flow tests."
            );
            return Ok(());
        }
    };

    let state = setup_state(&database_url).await?;

    let customer = AuthUser {
        user_id: create_user(&state, Role::Customer, "customer@example.com").await?,
        role: Role::Customer,
    };
    let admin = AuthUser {
        user_id: create_user(&state, Role::Admin, "admin@example.com").await?,
        role: Role::Admin,
    };
    let product = create_product(&state, "Test Widget", 150_000).await?;

    // Catalog writes are admin only.
    let spare = CreateProductRequest {
        name: "Spare Part".into(),
        description: None,
        price: 5_000,
        stock: 3,
    };
    let denied = product_service::create_product(
        &state,
        &customer,
        CreateProductRequest {
            name: "Sneaky".into(),
            description: None,
            price: 1,
            stock: 1,
        },
    )
    .await;
    assert!(matches!(denied, Err(AppError::Forbidden)));
    let spare = product_service::create_product(&state, &admin, spare)
        .await?
        .data
        .expect("product");

    let found = product_service::list_products(
        &state,
        ProductQuery {
            pagination: page(),
            q: Some("spare".into()),
            min_price: None,
            max_price: None,
            sort_by: None,
            sort_order: None,
        },
    )
    .await?;
    assert_eq!(found.data.expect("products").items.len(), 1);

    // Quantities accumulate; cart total 300000 gives gateway amount 30000000.
    for _ in 0..2 {
        cart_service::add_item(
            &state,
            &customer,
            AddCartItemRequest {
                product_id: product,
                quantity: 1,
            },
        )
        .await?;
    }
    let cart = cart_service::add_item(
        &state,
        &customer,
        AddCartItemRequest {
            product_id: spare.id,
            quantity: 2,
        },
    )
    .await?
    .data
    .expect("cart");
    assert_eq!(cart.total_price, 310_000);

    let over_stock = cart_service::update_item(
        &state,
        &customer,
        spare.id,
        UpdateCartItemRequest { quantity: 4 },
    )
    .await;
    assert!(matches!(over_stock, Err(AppError::BadRequest(_))));

    let cart = cart_service::update_item(
        &state,
        &customer,
        spare.id,
        UpdateCartItemRequest { quantity: 3 },
    )
    .await?
    .data
    .expect("cart");
    assert_eq!(cart.total_price, 315_000);

    let cart = cart_service::remove_item(&state, &customer, spare.id)
        .await?
        .data
        .expect("cart");
    assert_eq!(cart.total_price, 300_000);
    assert_eq!(cart.items.len(), 1);
    assert_eq!(cart.items[0].quantity, 2);

    let created = order_service::create_order(
        &state,
        &customer,
        "10.0.0.1",
        CreateOrderRequest {
            cart_id: cart.id,
            billing_address: "12 Le Loi, District 1".into(),
            return_url: None,
        },
    )
    .await?
    .data
    .expect("created order");
    let order_id = created.order.id;
    assert_eq!(created.order.status, OrderStatus::WaitForPayment);
    assert_eq!(created.order.total_amount, 300_000);
    assert!(created.payment_url.contains("vnp_SecureHash="));

    // The cart is consumed by the order.
    let reorder = order_service::create_order(
        &state,
        &customer,
        "10.0.0.1",
        CreateOrderRequest {
            cart_id: cart.id,
            billing_address: "12 Le Loi, District 1".into(),
            return_url: None,
        },
    )
    .await;
    assert!(matches!(reorder, Err(AppError::BadRequest(_))));

    let detail = order_service::get_order(&state, &customer, order_id)
        .await?
        .data
        .expect("order detail");
    assert_eq!(detail.payments.len(), 1);
    let payment = &detail.payments[0];
    assert_eq!(payment.amount, 30_000_000);
    assert_eq!(payment.status, PaymentStatus::Pending);
    let txn_ref = payment.txn_ref;

    // Missing and unknown references.
    let missing = payment_service::execute_callback(&state, Vec::<(String, String)>::new()).await;
    assert!(matches!(missing, Err(AppError::MissingReference)));
    let unknown = payment_service::execute_callback(
        &state,
        callback(txn_ref + 999_999, 30_000_000, "00"),
    )
    .await;
    assert!(matches!(unknown, Err(AppError::PaymentNotFound)));

    // Tampered after signing.
    let mut tampered = callback(txn_ref, 30_000_000, "00");
    for (key, value) in tampered.iter_mut() {
        if key == vnpay::TRANSACTION_NO {
            value.push('9');
        }
    }
    let result = payment_service::execute_callback(&state, tampered).await;
    assert!(matches!(result, Err(AppError::InvalidSignature)));

    // Correctly signed, wrong amount.
    let result =
        payment_service::execute_callback(&state, callback(txn_ref, 29_000_000, "00")).await;
    assert!(matches!(result, Err(AppError::InvalidAmount(_))));

    // Declined by the gateway.
    let declined =
        payment_service::execute_callback(&state, callback(txn_ref, 30_000_000, "24")).await?;
    assert!(!declined.success);
    assert_eq!(declined.response_code, "24");
    assert_eq!(order_status(&state, &customer, order_id).await?, OrderStatus::WaitForPayment);

    // Customers cannot confirm payment themselves.
    let result =
        order_service::customer_transition(&state, &customer, order_id, Action::Advance).await;
    assert!(matches!(
        result,
        Err(AppError::Transition(TransitionError::ActorNotAllowed { .. }))
    ));

    // Valid confirmation.
    let confirmed =
        payment_service::execute_callback(&state, callback(txn_ref, 30_000_000, "00")).await?;
    assert!(confirmed.success);
    assert!(!confirmed.replayed);
    assert_eq!(confirmed.order_id, order_id);
    assert_eq!(confirmed.order_status, OrderStatus::Pending);
    assert_eq!(confirmed.transaction_id.as_deref(), Some("14000001"));

    let detail = order_service::get_order(&state, &customer, order_id)
        .await?
        .data
        .expect("order detail");
    assert_eq!(detail.order.status, OrderStatus::Pending);
    assert_eq!(detail.payments[0].status, PaymentStatus::Paid);
    assert!(detail.payments[0].paid_at.is_some());

    // Replay is a success with no second write.
    let replayed =
        payment_service::execute_callback(&state, callback(txn_ref, 30_000_000, "00")).await?;
    assert!(replayed.success);
    assert!(replayed.replayed);
    assert_eq!(history_len(&state, order_id).await?, 1);

    // Pending orders can no longer be cancelled.
    let result =
        order_service::customer_transition(&state, &customer, order_id, Action::Cancel).await;
    assert!(matches!(
        result,
        Err(AppError::Transition(TransitionError::IllegalTransition { .. }))
    ));

    // Shop steps are admin only.
    let result = order_service::admin_transition(&state, &customer, order_id, Action::Advance).await;
    assert!(matches!(result, Err(AppError::Forbidden)));

    let approved = order_service::admin_transition(&state, &admin, order_id, Action::Advance)
        .await?
        .data
        .expect("status change");
    assert_eq!(approved.from, OrderStatus::Pending);
    assert_eq!(approved.status, OrderStatus::Approved);

    let shipped = order_service::admin_transition(&state, &admin, order_id, Action::Advance)
        .await?
        .data
        .expect("status change");
    assert_eq!(shipped.status, OrderStatus::Shipping);

    let received = order_service::customer_transition(&state, &customer, order_id, Action::Advance)
        .await?
        .data
        .expect("status change");
    assert_eq!(received.status, OrderStatus::Received);

    let result =
        order_service::customer_transition(&state, &customer, order_id, Action::Advance).await;
    assert!(matches!(
        result,
        Err(AppError::Transition(TransitionError::IllegalTransition { .. }))
    ));

    let history = order_service::order_history(&state, &customer, order_id)
        .await?
        .data
        .expect("history");
    let steps: Vec<_> = history.entries.iter().map(|e| (e.from, e.to)).collect();
    assert_eq!(
        steps,
        vec![
            (OrderStatus::WaitForPayment, OrderStatus::Pending),
            (OrderStatus::Pending, OrderStatus::Approved),
            (OrderStatus::Approved, OrderStatus::Shipping),
            (OrderStatus::Shipping, OrderStatus::Received),
        ]
    );
    assert_eq!(history.entries[0].actor, "system");

    let own = order_service::list_orders(&state, &customer, orders_query(None))
        .await?
        .data
        .expect("orders");
    assert_eq!(own.items.len(), 1);

    let received_orders =
        order_service::list_all_orders(&state, &admin, orders_query(Some("Received")))
            .await?
            .data
            .expect("orders");
    assert_eq!(received_orders.items.len(), 1);

    let bad_filter =
        order_service::list_all_orders(&state, &admin, orders_query(Some("Shipped"))).await;
    assert!(matches!(
        bad_filter,
        Err(AppError::Transition(TransitionError::InvalidStatus(_)))
    ));
    let not_admin = order_service::list_all_orders(&state, &customer, orders_query(None)).await;
    assert!(matches!(not_admin, Err(AppError::Forbidden)));

    let confirmations = AuditLogs::find()
        .filter(AuditCol::Action.eq("payment_confirmed"))
        .count(&state.orm)
        .await?;
    assert_eq!(confirmations, 1);

    // Second order with two open payments. The first is confirmed by many
    // concurrent deliveries of the same callback.
    let second = open_order(&state, &customer, product).await?;
    let first_ref = payment_refs(&state, &customer, second).await?[0];
    let second_ref = payment_service::create_payment_url(
        &state,
        &customer,
        second,
        "10.0.0.1",
        PaymentUrlRequest::default(),
    )
    .await?
    .data
    .expect("payment url")
    .txn_ref;
    assert_ne!(first_ref, second_ref);

    let handles: Vec<_> = (0..8)
        .map(|_| {
            let state = state.clone();
            let query = callback(first_ref, 15_000_000, "00");
            tokio::spawn(async move { payment_service::execute_callback(&state, query).await })
        })
        .collect();
    let mut applied = 0;
    for handle in handles {
        let result = handle.await??;
        assert!(result.success);
        if !result.replayed {
            applied += 1;
        }
    }
    assert_eq!(applied, 1);
    assert_eq!(history_len(&state, second).await?, 1);
    assert_eq!(order_status(&state, &customer, second).await?, OrderStatus::Pending);

    // The other payment is captured after the order was already confirmed.
    let late = payment_service::execute_callback(&state, callback(second_ref, 15_000_000, "00"))
        .await?;
    assert!(late.success);
    assert!(!late.replayed);
    assert_eq!(late.order_status, OrderStatus::Pending);
    assert_ne!(late.message, "Payment already confirmed");
    let captured = crate::payment(&state, &customer, second, second_ref).await?;
    assert_eq!(captured.status, PaymentStatus::Paid);
    assert_eq!(captured.transaction_no.as_deref(), Some("14000001"));
    assert_eq!(captured.response_code.as_deref(), Some("00"));
    assert!(captured.paid_at.is_some());
    assert_eq!(history_len(&state, second).await?, 1);

    // Its redelivery is a plain replay.
    let again = payment_service::execute_callback(&state, callback(second_ref, 15_000_000, "00"))
        .await?;
    assert!(again.replayed);

    // Cancelled before the gateway reported the charge.
    let cancelled = open_order(&state, &customer, product).await?;
    let cancelled_ref = payment_refs(&state, &customer, cancelled).await?[0];
    order_service::customer_transition(&state, &customer, cancelled, Action::Cancel).await?;
    let charged =
        payment_service::execute_callback(&state, callback(cancelled_ref, 15_000_000, "00"))
            .await?;
    assert!(charged.success);
    assert!(!charged.replayed);
    assert_eq!(charged.order_status, OrderStatus::Cancelled);
    assert_eq!(order_status(&state, &customer, cancelled).await?, OrderStatus::Cancelled);
    let captured = crate::payment(&state, &customer, cancelled, cancelled_ref).await?;
    assert_eq!(captured.status, PaymentStatus::Paid);
    assert_eq!(captured.transaction_no.as_deref(), Some("14000001"));
    assert_eq!(history_len(&state, cancelled).await?, 1);

    let orphaned = AuditLogs::find()
        .filter(AuditCol::Action.eq("payment_orphaned"))
        .count(&state.orm)
        .await?;
    assert_eq!(orphaned, 2);

    Ok(())
}

async fn setup_state(database_url: &str) -> anyhow::Result<AppState> {
    let pool = create_pool(database_url).await?;
    let orm = orm_from_pool(&pool);
    run_migrations(&orm).await?;

    // Clean tables between runs
    let backend = orm.get_database_backend();
    orm.execute(Statement::from_string(
        backend,
        "TRUNCATE TABLE order_status_history, payments, orders, cart_items, carts, audit_logs, products, users CASCADE",
    ))
    .await?;

    Ok(AppState {
        pool,
        orm,
        vnpay: Arc::new(VnPayConfig {
            tmn_code: "DEMO0001".into(),
            hash_secret: SECRET.into(),
            base_url: "https://sandbox.vnpayment.vn/paymentv2/vpcpay.html".into(),
            version: "2.1.0".into(),
            curr_code: "VND".into(),
            locale: "vn".into(),
            return_url: "https://shop.example/payment/return".into(),
        }),
        jwt_secret: Arc::from("flow-test-jwt"),
    })
}

fn page() -> Pagination {
    Pagination {
        page: Some(1),
        per_page: Some(20),
    }
}

fn orders_query(status: Option<&str>) -> OrderListQuery {
    OrderListQuery {
        pagination: page(),
        status: status.map(str::to_string),
        sort_order: None,
    }
}

/// Builds the query a gateway would send back, signed with the test secret.
fn callback(txn_ref: i64, amount: i64, response_code: &str) -> Vec<(String, String)> {
    let mut fields = BTreeMap::new();
    fields.insert(vnpay::TXN_REF.to_string(), txn_ref.to_string());
    fields.insert(vnpay::AMOUNT.to_string(), amount.to_string());
    fields.insert(vnpay::RESPONSE_CODE.to_string(), response_code.to_string());
    fields.insert(vnpay::TRANSACTION_NO.to_string(), "14000001".to_string());
    fields.insert("vnp_BankCode".to_string(), "NCB".to_string());
    fields.insert(vnpay::ORDER_INFO.to_string(), "Thanh toan don hang".to_string());

    let signature = vnpay::sign(&fields, SECRET).expect("sign");
    fields.insert(vnpay::SECURE_HASH.to_string(), signature);
    fields.into_iter().collect()
}

/// Fills a fresh cart with one unit of `product` (150000) and orders it.
async fn open_order(state: &AppState, user: &AuthUser, product: Uuid) -> anyhow::Result<Uuid> {
    let cart = cart_service::add_item(
        state,
        user,
        AddCartItemRequest {
            product_id: product,
            quantity: 1,
        },
    )
    .await?
    .data
    .expect("cart");
    let created = order_service::create_order(
        state,
        user,
        "10.0.0.1",
        CreateOrderRequest {
            cart_id: cart.id,
            billing_address: "12 Le Loi, District 1".into(),
            return_url: None,
        },
    )
    .await?
    .data
    .expect("created order");
    Ok(created.order.id)
}

async fn payment_refs(state: &AppState, user: &AuthUser, order_id: Uuid) -> anyhow::Result<Vec<i64>> {
    let detail = order_service::get_order(state, user, order_id)
        .await?
        .data
        .expect("order detail");
    Ok(detail.payments.iter().map(|p| p.txn_ref).collect())
}

async fn payment(
    state: &AppState,
    user: &AuthUser,
    order_id: Uuid,
    txn_ref: i64,
) -> anyhow::Result<Payment> {
    let detail = order_service::get_order(state, user, order_id)
        .await?
        .data
        .expect("order detail");
    Ok(detail
        .payments
        .into_iter()
        .find(|p| p.txn_ref == txn_ref)
        .expect("payment on order"))
}

async fn order_status(state: &AppState, user: &AuthUser, id: Uuid) -> anyhow::Result<OrderStatus> {
    let detail = order_service::get_order(state, user, id)
        .await?
        .data
        .expect("order detail");
    Ok(detail.order.status)
}

async fn history_len(state: &AppState, order_id: Uuid) -> anyhow::Result<u64> {
    Ok(OrderStatusHistory::find()
        .filter(HistoryCol::OrderId.eq(order_id))
        .count(&state.orm)
        .await?)
}

async fn create_user(state: &AppState, role: Role, email: &str) -> anyhow::Result<Uuid> {
    let user = UserActive {
        id: Set(Uuid::new_v4()),
        email: Set(email.to_string()),
        password_hash: Set("dummy".into()),
        role: Set(role.as_str().into()),
        created_at: NotSet,
    }
    .insert(&state.orm)
    .await?;

    Ok(user.id)
}

async fn create_product(state: &AppState, name: &str, price: i64) -> anyhow::Result<Uuid> {
    let product = ProductActive {
        id: Set(Uuid::new_v4()),
        name: Set(name.into()),
        description: Set(Some("A product for testing".into())),
        price: Set(price),
        stock: Set(10),
        created_at: NotSet,
    }
    .insert(&state.orm)
    .await?;

    Ok(product.id)
}

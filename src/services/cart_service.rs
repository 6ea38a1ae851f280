use chrono::Utc;
use sea_orm::sea_query::LockType;
use sea_orm::{
    ActiveModelTrait, ActiveValue::NotSet, ColumnTrait, Condition, ConnectionTrait, DbErr,
    EntityTrait, QueryFilter, QueryOrder, QuerySelect, Set, TransactionTrait,
};
use uuid::Uuid;

use crate::{
    audit,
    dto::cart::{AddCartItemRequest, UpdateCartItemRequest},
    entity::{
        cart_items::{
            ActiveModel as CartItemActive, Column as CartItemCol, Entity as CartItems,
            Model as CartItemModel,
        },
        carts::{ActiveModel as CartActive, Column as CartCol, Entity as Carts, Model as CartModel},
        products::Entity as Products,
    },
    error::{AppError, AppResult},
    middleware::auth::AuthUser,
    models::{Cart, CartStatus},
    response::ApiResponse,
    state::AppState,
};

pub async fn get_cart(state: &AppState, user: &AuthUser) -> AppResult<ApiResponse<Cart>> {
    let cart = find_active_cart(&state.orm, user.user_id, false)
        .await?
        .ok_or(AppError::NotFound)?;
    let items = cart_items(&state.orm, cart.id).await?;
    Ok(ApiResponse::ok(
        "OK",
        Cart::from_entity(cart, items)?,
    ))
}

pub async fn add_item(
    state: &AppState,
    user: &AuthUser,
    payload: AddCartItemRequest,
) -> AppResult<ApiResponse<Cart>> {
    if payload.quantity <= 0 {
        return Err(AppError::BadRequest(
            "quantity must be greater than 0".to_string(),
        ));
    }

    let txn = state.orm.begin().await?;
    let product = Products::find_by_id(payload.product_id)
        .one(&txn)
        .await?
        .ok_or_else(|| AppError::BadRequest("product not found".to_string()))?;

    let cart = match find_active_cart(&txn, user.user_id, true).await? {
        Some(cart) => cart,
        None => {
            CartActive {
                id: Set(Uuid::new_v4()),
                user_id: Set(user.user_id),
                total_price: Set(0),
                status: Set(CartStatus::Active.as_str().to_string()),
                created_at: NotSet,
                updated_at: NotSet,
            }
            .insert(&txn)
            .await?
        }
    };

    let existing = find_item(&txn, cart.id, product.id).await?;

    let quantity = existing.as_ref().map_or(0, |item| item.quantity) + payload.quantity;
    if quantity > product.stock {
        return Err(AppError::BadRequest(format!(
            "Insufficient stock for product {}",
            product.id
        )));
    }
    let line_price = product
        .price
        .checked_mul(i64::from(quantity))
        .ok_or_else(|| AppError::BadRequest("quantity is too large".into()))?;

    match existing {
        Some(item) => {
            let mut active: CartItemActive = item.into();
            active.quantity = Set(quantity);
            active.price = Set(line_price);
            active.update(&txn).await?;
        }
        None => {
            CartItemActive {
                id: Set(Uuid::new_v4()),
                cart_id: Set(cart.id),
                product_id: Set(product.id),
                quantity: Set(quantity),
                price: Set(line_price),
                created_at: NotSet,
            }
            .insert(&txn)
            .await?;
        }
    }

    let (cart, items) = refresh_total(&txn, cart).await?;
    txn.commit().await?;

    audit::record(
        &state.pool,
        Some(user.user_id),
        "cart_add",
        "carts",
        serde_json::json!({ "cart_id": cart.id, "product_id": payload.product_id, "quantity": payload.quantity }),
    )
    .await;

    Ok(ApiResponse::ok(
        "OK",
        Cart::from_entity(cart, items)?,
    ))
}

pub async fn update_item(
    state: &AppState,
    user: &AuthUser,
    product_id: Uuid,
    payload: UpdateCartItemRequest,
) -> AppResult<ApiResponse<Cart>> {
    if payload.quantity <= 0 {
        return Err(AppError::BadRequest(
            "quantity must be greater than 0".to_string(),
        ));
    }

    let txn = state.orm.begin().await?;
    let cart = find_active_cart(&txn, user.user_id, true)
        .await?
        .ok_or(AppError::NotFound)?;
    let item = find_item(&txn, cart.id, product_id)
        .await?
        .ok_or(AppError::NotFound)?;
    let product = Products::find_by_id(product_id)
        .one(&txn)
        .await?
        .ok_or(AppError::NotFound)?;
    if payload.quantity > product.stock {
        return Err(AppError::BadRequest(format!(
            "Insufficient stock for product {}",
            product.id
        )));
    }

    let line_price = product
        .price
        .checked_mul(i64::from(payload.quantity))
        .ok_or_else(|| AppError::BadRequest("quantity is too large".into()))?;
    let mut active: CartItemActive = item.into();
    active.quantity = Set(payload.quantity);
    active.price = Set(line_price);
    active.update(&txn).await?;

    let (cart, items) = refresh_total(&txn, cart).await?;
    txn.commit().await?;

    audit::record(
        &state.pool,
        Some(user.user_id),
        "cart_update",
        "carts",
        serde_json::json!({ "cart_id": cart.id, "product_id": product_id, "quantity": payload.quantity }),
    )
    .await;

    Ok(ApiResponse::ok(
        "OK",
        Cart::from_entity(cart, items)?,
    ))
}

pub async fn remove_item(
    state: &AppState,
    user: &AuthUser,
    product_id: Uuid,
) -> AppResult<ApiResponse<Cart>> {
    let txn = state.orm.begin().await?;
    let cart = find_active_cart(&txn, user.user_id, true)
        .await?
        .ok_or(AppError::NotFound)?;

    let result = CartItems::delete_many()
        .filter(
            Condition::all()
                .add(CartItemCol::CartId.eq(cart.id))
                .add(CartItemCol::ProductId.eq(product_id)),
        )
        .exec(&txn)
        .await?;
    if result.rows_affected == 0 {
        return Err(AppError::NotFound);
    }

    let (cart, items) = refresh_total(&txn, cart).await?;
    txn.commit().await?;

    audit::record(
        &state.pool,
        Some(user.user_id),
        "cart_remove",
        "carts",
        serde_json::json!({ "cart_id": cart.id, "product_id": product_id }),
    )
    .await;

    Ok(ApiResponse::ok(
        "Removed from cart",
        Cart::from_entity(cart, items)?,
    ))
}

async fn find_active_cart<C: ConnectionTrait>(
    db: &C,
    user_id: Uuid,
    for_update: bool,
) -> Result<Option<CartModel>, DbErr> {
    let mut finder = Carts::find().filter(
        Condition::all()
            .add(CartCol::UserId.eq(user_id))
            .add(CartCol::Status.eq(CartStatus::Active.as_str())),
    );
    if for_update {
        finder = finder.lock(LockType::Update);
    }
    finder.one(db).await
}

async fn find_item<C: ConnectionTrait>(
    db: &C,
    cart_id: Uuid,
    product_id: Uuid,
) -> Result<Option<CartItemModel>, DbErr> {
    CartItems::find()
        .filter(
            Condition::all()
                .add(CartItemCol::CartId.eq(cart_id))
                .add(CartItemCol::ProductId.eq(product_id)),
        )
        .one(db)
        .await
}

async fn cart_items<C: ConnectionTrait>(db: &C, cart_id: Uuid) -> Result<Vec<CartItemModel>, DbErr> {
    CartItems::find()
        .filter(CartItemCol::CartId.eq(cart_id))
        .order_by_asc(CartItemCol::CreatedAt)
        .all(db)
        .await
}

/// Recomputes the cart total from its lines.
async fn refresh_total<C: ConnectionTrait>(
    db: &C,
    cart: CartModel,
) -> AppResult<(CartModel, Vec<CartItemModel>)> {
    let items = cart_items(db, cart.id).await?;
    let total = items
        .iter()
        .try_fold(0_i64, |acc, item| acc.checked_add(item.price))
        .ok_or_else(|| AppError::BadRequest("cart total is too large".into()))?;

    let mut active: CartActive = cart.into();
    active.total_price = Set(total);
    active.updated_at = Set(Utc::now().into());
    let cart = active.update(db).await?;
    Ok((cart, items))
}

use shop_order_api::{
    config::AppConfig,
    db::{DbPool, create_pool, orm_from_pool, run_migrations},
    models::Role,
    services::auth_service::hash_password,
};
use uuid::Uuid;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    dotenvy::dotenv().ok();
    let config = AppConfig::from_env()?;

    let pool = create_pool(&config.database_url).await?;
    // Ensure migrations are applied.
    run_migrations(&orm_from_pool(&pool)).await?;

    let admin_id = ensure_user(&pool, "admin@example.com", "admin123", Role::Admin).await?;
    let customer_id =
        ensure_user(&pool, "customer@example.com", "customer123", Role::Customer).await?;
    seed_products(&pool).await?;

    println!("Seed completed. Admin ID: {admin_id}, Customer ID: {customer_id}");
    Ok(())
}

async fn ensure_user(pool: &DbPool, email: &str, password: &str, role: Role) -> anyhow::Result<Uuid> {
    let password_hash = hash_password(password).map_err(|e| anyhow::anyhow!(e.to_string()))?;

    let (user_id,): (Uuid,) = sqlx::query_as(
        r#"
        INSERT INTO users (id, email, password_hash, role)
        VALUES ($1, $2, $3, $4)
        ON CONFLICT (email) DO UPDATE SET role = EXCLUDED.role
        RETURNING id
        "#,
    )
    .bind(Uuid::new_v4())
    .bind(email)
    .bind(password_hash)
    .bind(role.as_str())
    .fetch_one(pool)
    .await?;

    println!("Ensured user {email} (role={})", role.as_str());
    Ok(user_id)
}

async fn seed_products(pool: &DbPool) -> anyhow::Result<()> {
    let products = vec![
        ("Ao thun basic", "Cotton t-shirt, unisex", 150000_i64, 50),
        ("Quan jean slim", "Slim fit denim", 450000, 30),
        ("Giay the thao", "Everyday sneakers", 890000, 20),
        ("Balo laptop", "Fits 15 inch laptops", 320000, 40),
    ];

    for (name, desc, price, stock) in products {
        sqlx::query(
            r#"
            INSERT INTO products (id, name, description, price, stock)
            VALUES ($1, $2, $3, $4, $5)
            ON CONFLICT (name) DO NOTHING
            "#,
        )
        .bind(Uuid::new_v4())
        .bind(name)
        .bind(desc)
        .bind(price)
        .bind(stock)
        .execute(pool)
        .await?;
    }

    println!("Seeded products");
    Ok(())
}

use argon2::{
    Argon2, PasswordHasher,
    password_hash::{SaltString, rand_core::OsRng},
};
use dairy_management_api::{
    config::AppConfig,
    db::{create_orm_conn, create_pool, run_migrations},
};
use rust_decimal::Decimal;
use uuid::Uuid;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    dotenvy::dotenv().ok();
    let config = AppConfig::from_env()?;

    let pool = create_pool(&config.database_url).await?;
    // Ensure migrations are applied.
    let orm = create_orm_conn(&config.database_url).await?;
    run_migrations(&orm).await?;

    let admin_id = ensure_user(
        &pool,
        "admin",
        "admin@dairymanagement.com",
        "admin123",
        "9999999999",
        "Dairy Management HQ",
        "admin",
    )
    .await?;
    seed_products(&pool).await?;

    println!("Seed completed. Admin ID: {admin_id}");
    Ok(())
}

async fn ensure_user(
    pool: &sqlx::PgPool,
    username: &str,
    email: &str,
    password: &str,
    phone: &str,
    address: &str,
    role: &str,
) -> anyhow::Result<Uuid> {
    let salt = SaltString::generate(&mut OsRng);
    let argon2 = Argon2::default();
    let password_hash = argon2
        .hash_password(password.as_bytes(), &salt)
        .map_err(|e| anyhow::anyhow!(e.to_string()))?
        .to_string();

    let row: Option<(Uuid,)> = sqlx::query_as(
        r#"
        INSERT INTO users (id, username, email, password_hash, phone, address, role)
        VALUES ($1, $2, $3, $4, $5, $6, $7)
        ON CONFLICT (username) DO UPDATE SET role = EXCLUDED.role
        RETURNING id
        "#,
    )
    .bind(Uuid::new_v4())
    .bind(username)
    .bind(email)
    .bind(password_hash)
    .bind(phone)
    .bind(address)
    .bind(role)
    .fetch_optional(pool)
    .await?;

    // If user already exists, fetch id
    let user_id = match row {
        Some((id,)) => id,
        None => {
            let existing: (Uuid,) = sqlx::query_as("SELECT id FROM users WHERE username = $1")
                .bind(username)
                .fetch_one(pool)
                .await?;
            existing.0
        }
    };

    println!("Ensured user {username} (role={role})");
    Ok(user_id)
}

async fn seed_products(pool: &sqlx::PgPool) -> anyhow::Result<()> {
    let products = vec![
        ("Milk (1L)", "Fresh whole milk", 50, 100, "Liter"),
        ("Yogurt (500ml)", "Creamy yogurt", 80, 75, "ml"),
        ("Buttermilk (1L)", "Fresh buttermilk", 40, 50, "Liter"),
        ("Paneer (500g)", "Fresh cottage cheese", 250, 30, "grams"),
        ("Ghee (500ml)", "Pure clarified butter", 500, 20, "ml"),
        ("Cheese (200g)", "Processed cheese", 150, 40, "grams"),
    ];

    for (name, desc, price, stock, unit) in products {
        sqlx::query(
            r#"
            INSERT INTO products (id, name, description, price, stock, unit)
            VALUES ($1, $2, $3, $4, $5, $6)
            ON CONFLICT (name) DO NOTHING
            "#,
        )
        .bind(Uuid::new_v4())
        .bind(name)
        .bind(desc)
        .bind(Decimal::from(price))
        .bind(Decimal::from(stock))
        .bind(unit)
        .execute(pool)
        .await?;
    }

    println!("Seeded products");
    Ok(())
}

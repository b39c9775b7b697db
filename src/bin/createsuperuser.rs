use bcrypt::{hash, DEFAULT_COST};
use dotenvy::dotenv;
use rag_chatbot::handlers::auth::{validate_email, validate_password, validate_username};
use sqlx::{postgres::PgPoolOptions, Row};
use std::io::{self, Write};

fn prompt(label: &str) -> io::Result<String> {
    print!("{}", label);
    io::stdout().flush()?;
    let mut value = String::new();
    io::stdin().read_line(&mut value)?;
    Ok(value.trim().to_string())
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    println!("RAG Chatbot - Create Superuser");
    println!("==============================");

    dotenv().ok();

    let database_url = std::env::var("DATABASE_URL").map_err(|_| "DATABASE_URL must be set")?;

    let pool = PgPoolOptions::new()
        .max_connections(2)
        .connect(&database_url)
        .await?;
    rag_chatbot::db::run_migrations(&pool).await?;

    let username = prompt("Username: ")?;
    if let Err(e) = validate_username(&username) {
        eprintln!("Invalid username: {}", e);
        return Ok(());
    }

    let email = prompt("Email address (optional): ")?;
    if let Err(e) = validate_email(&email) {
        eprintln!("Invalid email: {}", e);
        return Ok(());
    }

    let existing_user = sqlx::query("SELECT id FROM users WHERE username = $1")
        .bind(&username)
        .fetch_optional(&pool)
        .await?;

    if existing_user.is_some() {
        eprintln!("A user with that username already exists");
        return Ok(());
    }

    print!("Password: ");
    io::stdout().flush()?;
    let password = rpassword::read_password()?;

    if let Err(e) = validate_password(&password) {
        eprintln!("{}", e);
        return Ok(());
    }

    print!("Password (again): ");
    io::stdout().flush()?;
    let password_confirm = rpassword::read_password()?;

    if password != password_confirm {
        eprintln!("Passwords don't match");
        return Ok(());
    }

    let password_hash = hash(&password, DEFAULT_COST)?;

    let row = sqlx::query(
        "INSERT INTO users (username, email, password_hash, is_active, is_staff, is_superuser, date_joined)
         VALUES ($1, $2, $3, true, true, true, NOW())
         RETURNING id, username, email",
    )
    .bind(&username)
    .bind(&email)
    .bind(&password_hash)
    .fetch_one(&pool)
    .await?;

    let id: i64 = row.get("id");
    let username: String = row.get("username");
    let email: String = row.get("email");

    println!();
    println!("Superuser created successfully!");
    println!("   ID: {}", id);
    println!("   Username: {}", username);
    println!("   Email: {}", if email.is_empty() { "(none)" } else { &email });

    pool.close().await;
    Ok(())
}

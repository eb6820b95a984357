//! Creates a staff account that can log in and manage the catalog.
//!
//! ```text
//! DATABASE_URL=postgres://... create-superuser --email admin@example.com --first-name Ana
//! ```
//!
//! The password is read from `--password` or the `SUPERUSER_PASSWORD`
//! environment variable.

use anyhow::{bail, Context};
use clap::Parser;

use achados::db::{create_pool, run_migrations, AccountStore, PgStore};
use achados::models::{normalize_email, NewUser};
use achados::services::auth_service::hash_password;

#[derive(Parser, Debug)]
#[command(name = "create-superuser")]
#[command(about = "Creates a staff superuser account", long_about = None)]
struct Args {
    /// Email address used to log in
    #[arg(long, value_name = "EMAIL")]
    email: String,

    #[arg(long, env = "SUPERUSER_PASSWORD", hide_env_values = true)]
    password: String,

    #[arg(long, default_value = "")]
    first_name: String,

    #[arg(long, default_value = "")]
    last_name: String,

    #[arg(long, env = "DATABASE_URL", hide_env_values = true)]
    database_url: String,

    /// Apply pending migrations before creating the user
    #[arg(long)]
    migrate: bool,
}

fn validate_email(email: &str) -> bool {
    match email.split_once('@') {
        Some((local, domain)) => !local.is_empty() && domain.contains('.'),
        None => false,
    }
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    dotenvy::dotenv().ok();
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "achados=info".into()),
        )
        .init();

    let args = Args::parse();

    let email = normalize_email(&args.email);
    if !validate_email(&email) {
        bail!("invalid email address: {}", args.email);
    }
    if args.password.len() < 8 {
        bail!("password must be at least 8 characters");
    }

    let pool = create_pool(&args.database_url)
        .await
        .context("failed to connect to database")?;
    if args.migrate {
        run_migrations(&pool).await.context("failed to run migrations")?;
    }
    let store = PgStore::new(pool);

    let password_hash = hash_password(&args.password)?;
    let user = store
        .create_user(NewUser {
            email,
            password_hash,
            first_name: args.first_name,
            last_name: args.last_name,
            is_staff: true,
            is_superuser: true,
        })
        .await?;

    tracing::info!("Superuser {} created (id={})", user.email, user.id);
    Ok(())
}

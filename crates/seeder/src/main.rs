//! Platform provisioning binary
//!
//! Runs migrations and the idempotent bootstrap sequence: base plans and
//! modules, the matrix tenant with its super administrator, and optionally
//! the demo tenant. Safe to run on every deploy.
//!
//! Configuration (environment):
//!   DATABASE_URL           required
//!   SUPER_ADMIN_PASSWORD   required on first run, ignored once the super
//!                          admin exists
//!   SEED_DEMO              "true" to provision the demo tenant
//!   SEED_DEMO_PASSWORD     demo account password, default "password123"

use agsuite_entitlement::{Bootstrap, BootstrapOptions};
use agsuite_shared::db;
use anyhow::Context;
use tracing::info;
use tracing_subscriber::EnvFilter;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    dotenvy::dotenv().ok();

    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .init();

    let database_url = std::env::var("DATABASE_URL").context("DATABASE_URL must be set")?;
    let super_admin_password =
        std::env::var("SUPER_ADMIN_PASSWORD").context("SUPER_ADMIN_PASSWORD must be set")?;
    let seed_demo = std::env::var("SEED_DEMO")
        .map(|v| v == "true" || v == "1")
        .unwrap_or(false);
    let demo_password =
        std::env::var("SEED_DEMO_PASSWORD").unwrap_or_else(|_| "password123".to_string());

    info!("Running migrations");
    let migration_pool = db::create_migration_pool(&database_url)
        .await
        .context("Failed to connect for migrations")?;
    db::run_migrations(&migration_pool)
        .await
        .context("Failed to run migrations")?;
    migration_pool.close().await;

    let pool = db::create_pool(&database_url)
        .await
        .context("Failed to create database pool")?;

    let outcome = Bootstrap::new(pool.clone())
        .run(&BootstrapOptions {
            super_admin_password,
            demo_password,
            seed_demo,
        })
        .await
        .context("Bootstrap failed")?;

    info!(
        matrix_client_id = %outcome.matrix_client.id,
        matrix_company_id = %outcome.matrix_company.id,
        super_admin_id = %outcome.super_admin.id,
        seed_demo,
        "Bootstrap complete"
    );

    pool.close().await;

    Ok(())
}

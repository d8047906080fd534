//! Integration tests for the entitlement core
//!
//! Covers the catalog, registry, client/company/user stores and the
//! evaluator against a real Postgres instance.
//!
//! ## Running Tests
//! ```bash
//! export DATABASE_URL="postgres://..."
//! cargo test -p agsuite-entitlement -- --ignored
//! ```
//!
//! Each test provisions its own plans, clients and modules under unique
//! slugs and emails, so tests can run concurrently against one database.

#![allow(clippy::unwrap_used, clippy::expect_used)]

use agsuite_entitlement::{
    ClientService, CompanyService, EntitlementError, EntitlementEvaluator, ModuleRegistry,
    PlanCatalog, UserService,
};
use agsuite_shared::{
    db, Client, GrantTerms, NewClient, NewCompany, NewModule, NewPlan, NewUser, UserKind,
};
use serde_json::json;
use sqlx::PgPool;
use time::{Duration, OffsetDateTime};
use uuid::Uuid;

// ============================================================================
// Test Utilities
// ============================================================================

async fn setup() -> PgPool {
    let database_url =
        std::env::var("DATABASE_URL").expect("DATABASE_URL must be set for integration tests");

    let pool = db::create_pool(&database_url)
        .await
        .expect("Failed to connect to test database");
    db::run_migrations(&pool)
        .await
        .expect("Failed to run migrations");
    pool
}

fn unique(prefix: &str) -> String {
    format!("{}-{}", prefix, Uuid::new_v4())
}

/// A basico-shaped plan under a unique slug, with overridable caps
fn test_plan(
    slug: &str,
    included_companies: i32,
    max_total_companies: Option<i32>,
    included_users: i32,
    max_total_users: Option<i32>,
) -> NewPlan {
    NewPlan {
        slug: slug.to_string(),
        name: "Test Plan".to_string(),
        description: None,
        monthly_price_cents: 29000,
        annual_price_cents: 290000,
        extra_user_monthly_cents: 8000,
        extra_user_annual_cents: 80000,
        extra_company_monthly_cents: 15000,
        extra_company_annual_cents: 150000,
        included_companies,
        included_users,
        allows_extra_companies: true,
        allows_extra_users: true,
        max_total_companies,
        max_total_users,
        storage_gb: 5,
        priority_support: false,
        auto_backup: true,
        api_access: false,
        display_order: 99,
        is_active: true,
        is_featured: false,
        features: json!([]),
    }
}

fn test_client_profile(email: &str, metadata: serde_json::Value) -> NewClient {
    NewClient {
        name: unique("Test Client"),
        email: email.to_string(),
        phone: None,
        address: None,
        contact_name: None,
        subscription_start: OffsetDateTime::now_utc().date(),
        subscription_end: None,
        metadata,
    }
}

fn test_company(name: &str) -> NewCompany {
    NewCompany {
        name: name.to_string(),
        country_code: Some("MX".to_string()),
        country: Some("México".to_string()),
        city: Some("Ciudad de México".to_string()),
        address: None,
        phone: None,
        email: None,
        tax_id: None,
        timezone: "America/Mexico_City".to_string(),
        currency: "MXN".to_string(),
        config: json!({}),
    }
}

fn test_user(email: &str) -> NewUser {
    NewUser {
        name: "Test User".to_string(),
        email: email.to_string(),
        password: "password123".to_string(),
        kind: UserKind::Member,
    }
}

/// Plan + client under that plan, both unique to the calling test
async fn setup_client(
    pool: &PgPool,
    max_total_companies: Option<i32>,
    max_total_users: Option<i32>,
) -> Client {
    let catalog = PlanCatalog::new(pool.clone());
    let clients = ClientService::new(pool.clone());

    let slug = unique("plan");
    catalog
        .create_plan(test_plan(&slug, 1, max_total_companies, 1, max_total_users))
        .await
        .expect("Failed to create test plan");

    clients
        .create_client(
            &slug,
            test_client_profile(&unique("client@test.example"), json!({})),
        )
        .await
        .expect("Failed to create test client")
}

// ============================================================================
// Catalog
// ============================================================================

#[tokio::test]
#[ignore] // Requires database
async fn test_duplicate_plan_slug_rejected() {
    let pool = setup().await;
    let catalog = PlanCatalog::new(pool.clone());

    let slug = unique("plan");
    catalog
        .create_plan(test_plan(&slug, 1, Some(2), 5, Some(20)))
        .await
        .expect("First create should succeed");

    let err = catalog
        .create_plan(test_plan(&slug, 1, Some(2), 5, Some(20)))
        .await
        .expect_err("Second create should fail");
    assert!(matches!(err, EntitlementError::DuplicateSlug(s) if s == slug));
}

#[tokio::test]
#[ignore] // Requires database
async fn test_upsert_plan_updates_in_place() {
    let pool = setup().await;
    let catalog = PlanCatalog::new(pool.clone());

    let slug = unique("plan");
    let created = catalog
        .upsert_plan(test_plan(&slug, 1, Some(2), 5, Some(20)))
        .await
        .expect("Failed to upsert plan");

    let mut updated = test_plan(&slug, 1, Some(3), 5, Some(25));
    updated.monthly_price_cents = 35000;
    let upserted = catalog
        .upsert_plan(updated)
        .await
        .expect("Failed to upsert plan again");

    assert_eq!(upserted.id, created.id);
    assert_eq!(upserted.monthly_price_cents, 35000);
    assert_eq!(upserted.max_total_companies, Some(3));
}

#[tokio::test]
#[ignore] // Requires database
async fn test_invalid_plan_caps_rejected() {
    let pool = setup().await;
    let catalog = PlanCatalog::new(pool.clone());

    // Cap below the included limit
    let err = catalog
        .create_plan(test_plan(&unique("plan"), 3, Some(2), 5, Some(20)))
        .await
        .expect_err("Plan with cap below included limit should be rejected");
    assert!(matches!(err, EntitlementError::InvalidInput(_)));
}

// ============================================================================
// Module grants
// ============================================================================

#[tokio::test]
#[ignore] // Requires database
async fn test_grant_module_is_idempotent() {
    let pool = setup().await;
    let registry = ModuleRegistry::new(pool.clone());
    let clients = ClientService::new(pool.clone());

    let client = setup_client(&pool, Some(2), Some(20)).await;
    let slug = unique("module");
    registry
        .register_module(NewModule {
            slug: slug.clone(),
            name: "Test Module".to_string(),
            description: None,
            icon: None,
            display_order: 99,
            is_core: false,
        })
        .await
        .expect("Failed to register module");

    let today = OffsetDateTime::now_utc().date();
    let first_expiry = today.saturating_add(Duration::days(30));
    let second_expiry = today.saturating_add(Duration::days(365));

    clients
        .grant_module(
            client.id,
            &slug,
            GrantTerms {
                activated_on: today,
                expires_on: Some(first_expiry),
                config: None,
            },
        )
        .await
        .expect("First grant should succeed");

    let grant = clients
        .grant_module(
            client.id,
            &slug,
            GrantTerms {
                activated_on: today,
                expires_on: Some(second_expiry),
                config: Some(json!({ "nivel": "premium" })),
            },
        )
        .await
        .expect("Repeated grant should succeed");

    // Updated in place, not duplicated
    assert_eq!(grant.expires_on, Some(second_expiry));
    let (count,): (i64,) = sqlx::query_as(
        r#"
        SELECT COUNT(*) FROM client_modules g
        JOIN modules m ON m.id = g.module_id
        WHERE g.client_id = $1 AND m.slug = $2
        "#,
    )
    .bind(client.id)
    .bind(&slug)
    .fetch_one(&pool)
    .await
    .expect("Failed to count grants");
    assert_eq!(count, 1);

    assert!(clients
        .is_module_active(client.id, &slug, today)
        .await
        .expect("Failed to check module"));
}

#[tokio::test]
#[ignore] // Requires database
async fn test_revoked_and_expired_grants_inactive() {
    let pool = setup().await;
    let registry = ModuleRegistry::new(pool.clone());
    let clients = ClientService::new(pool.clone());

    let client = setup_client(&pool, Some(2), Some(20)).await;
    let slug = unique("module");
    registry
        .register_module(NewModule {
            slug: slug.clone(),
            name: "Test Module".to_string(),
            description: None,
            icon: None,
            display_order: 99,
            is_core: false,
        })
        .await
        .expect("Failed to register module");

    let today = OffsetDateTime::now_utc().date();
    let expiry = today.saturating_add(Duration::days(30));
    clients
        .grant_module(
            client.id,
            &slug,
            GrantTerms {
                activated_on: today,
                expires_on: Some(expiry),
                config: None,
            },
        )
        .await
        .expect("Failed to grant module");

    // The expiry date itself still counts; the day after does not
    assert!(clients
        .is_module_active(client.id, &slug, expiry)
        .await
        .unwrap());
    assert!(!clients
        .is_module_active(client.id, &slug, expiry.saturating_add(Duration::days(1)))
        .await
        .unwrap());

    clients
        .revoke_module(client.id, &slug)
        .await
        .expect("Failed to revoke module");
    assert!(!clients
        .is_module_active(client.id, &slug, today)
        .await
        .unwrap());
}

// ============================================================================
// Company caps
// ============================================================================

#[tokio::test]
#[ignore] // Requires database
async fn test_company_cap_enforced_and_freed_on_deactivation() {
    let pool = setup().await;
    let companies = CompanyService::new(pool.clone());

    let client = setup_client(&pool, Some(2), Some(20)).await;

    let first = companies
        .create_company(client.id, test_company(&unique("Company")))
        .await
        .expect("First company should fit");
    companies
        .create_company(client.id, test_company(&unique("Company")))
        .await
        .expect("Second company should fit");

    let err = companies
        .create_company(client.id, test_company(&unique("Company")))
        .await
        .expect_err("Third company should exceed the cap");
    assert!(matches!(
        err,
        EntitlementError::CapExceeded {
            resource: "companies",
            current: 2,
            cap: 2,
        }
    ));

    // Deactivation frees a slot
    companies
        .deactivate_company(first.id)
        .await
        .expect("Failed to deactivate company");
    companies
        .create_company(client.id, test_company(&unique("Company")))
        .await
        .expect("Company should fit after a slot was freed");
}

#[tokio::test]
#[ignore] // Requires database
async fn test_find_or_create_company_returns_existing_unmodified() {
    let pool = setup().await;
    let companies = CompanyService::new(pool.clone());

    let client = setup_client(&pool, Some(2), Some(20)).await;
    let name = unique("Company");

    let mut attrs = test_company(&name);
    attrs.city = Some("Monterrey".to_string());
    let created = companies
        .create_company(client.id, attrs)
        .await
        .expect("Failed to create company");

    let mut other_attrs = test_company(&name);
    other_attrs.city = Some("Guadalajara".to_string());
    let found = companies
        .find_or_create_by_name(client.id, &name, other_attrs)
        .await
        .expect("Failed to find-or-create company");

    // Existing row wins; the new attributes are ignored
    assert_eq!(found.id, created.id);
    assert_eq!(found.city.as_deref(), Some("Monterrey"));
}

// ============================================================================
// Users
// ============================================================================

#[tokio::test]
#[ignore] // Requires database
async fn test_user_cap_spans_all_companies_of_client() {
    let pool = setup().await;
    let companies = CompanyService::new(pool.clone());
    let users = UserService::new(pool.clone());

    // Cap of 2 users across the whole client
    let client = setup_client(&pool, Some(2), Some(2)).await;
    let first = companies
        .create_company(client.id, test_company(&unique("Company")))
        .await
        .expect("Failed to create company");
    let second = companies
        .create_company(client.id, test_company(&unique("Company")))
        .await
        .expect("Failed to create company");

    users
        .create_user(first.id, test_user(&unique("a@test.example")), None)
        .await
        .expect("First user should fit");
    users
        .create_user(second.id, test_user(&unique("b@test.example")), None)
        .await
        .expect("Second user should fit");

    let err = users
        .create_user(first.id, test_user(&unique("c@test.example")), None)
        .await
        .expect_err("Third user should exceed the cap");
    assert!(matches!(
        err,
        EntitlementError::CapExceeded {
            resource: "users",
            ..
        }
    ));
}

#[tokio::test]
#[ignore] // Requires database
async fn test_duplicate_user_email_rejected() {
    let pool = setup().await;
    let companies = CompanyService::new(pool.clone());
    let users = UserService::new(pool.clone());

    let client = setup_client(&pool, Some(2), Some(20)).await;
    let company = companies
        .create_company(client.id, test_company(&unique("Company")))
        .await
        .expect("Failed to create company");

    let email = unique("user@test.example");
    users
        .create_user(company.id, test_user(&email), None)
        .await
        .expect("First user should succeed");

    let err = users
        .create_user(company.id, test_user(&email), None)
        .await
        .expect_err("Duplicate email should fail");
    assert!(matches!(err, EntitlementError::DuplicateEmail(e) if e == email));

    // find_or_create returns the existing user instead
    let found = users
        .find_or_create_by_email(company.id, &email, test_user(&email), None)
        .await
        .expect("find_or_create should succeed");
    assert_eq!(found.email, email);
}

#[tokio::test]
#[ignore] // Requires database
async fn test_password_stored_hashed_and_verifiable() {
    let pool = setup().await;
    let companies = CompanyService::new(pool.clone());
    let users = UserService::new(pool.clone());

    let client = setup_client(&pool, Some(2), Some(20)).await;
    let company = companies
        .create_company(client.id, test_company(&unique("Company")))
        .await
        .expect("Failed to create company");

    let email = unique("user@test.example");
    let created = users
        .create_user(company.id, test_user(&email), None)
        .await
        .expect("Failed to create user");

    assert_ne!(created.password_hash, "password123");
    assert!(created.password_hash.starts_with("$argon2"));

    let verified = users
        .verify_credentials(&email, "password123")
        .await
        .expect("Verification should not error");
    assert_eq!(verified.map(|u| u.id), Some(created.id));

    let rejected = users
        .verify_credentials(&email, "wrong-password")
        .await
        .expect("Verification should not error");
    assert!(rejected.is_none());
}

// ============================================================================
// Matrix tenant
// ============================================================================

#[tokio::test]
#[ignore] // Requires database
async fn test_matrix_client_bypasses_caps_and_receives_new_modules() {
    let pool = setup().await;
    let catalog = PlanCatalog::new(pool.clone());
    let registry = ModuleRegistry::new(pool.clone());
    let clients = ClientService::new(pool.clone());
    let companies = CompanyService::new(pool.clone());

    // A restrictive plan the matrix flag must override
    let slug = unique("plan");
    catalog
        .create_plan(test_plan(&slug, 1, Some(1), 1, Some(1)))
        .await
        .expect("Failed to create plan");

    let matrix = clients
        .create_client(
            &slug,
            test_client_profile(&unique("matrix@test.example"), json!({ "es_matriz": true })),
        )
        .await
        .expect("Failed to create matrix client");

    // Cap bypass
    for _ in 0..3 {
        companies
            .create_company(matrix.id, test_company(&unique("Company")))
            .await
            .expect("Matrix client should not be capped");
    }

    // A module registered after the client exists is granted live
    let module_slug = unique("module");
    registry
        .register_module(NewModule {
            slug: module_slug.clone(),
            name: "Late Module".to_string(),
            description: None,
            icon: None,
            display_order: 99,
            is_core: false,
        })
        .await
        .expect("Failed to register module");

    let today = OffsetDateTime::now_utc().date();
    assert!(clients
        .is_module_active(matrix.id, &module_slug, today)
        .await
        .expect("Failed to check module"));
}

// ============================================================================
// Evaluator
// ============================================================================

#[tokio::test]
#[ignore] // Requires database
async fn test_evaluator_summary_reflects_state() {
    let pool = setup().await;
    let registry = ModuleRegistry::new(pool.clone());
    let clients = ClientService::new(pool.clone());
    let companies = CompanyService::new(pool.clone());
    let evaluator = EntitlementEvaluator::new(pool.clone());

    let client = setup_client(&pool, Some(2), Some(20)).await;
    companies
        .create_company(client.id, test_company(&unique("Company")))
        .await
        .expect("Failed to create company");

    let module_slug = unique("module");
    registry
        .register_module(NewModule {
            slug: module_slug.clone(),
            name: "Test Module".to_string(),
            description: None,
            icon: None,
            display_order: 99,
            is_core: false,
        })
        .await
        .expect("Failed to register module");

    let today = OffsetDateTime::now_utc().date();
    clients
        .grant_module(
            client.id,
            &module_slug,
            GrantTerms {
                activated_on: today,
                expires_on: None,
                config: None,
            },
        )
        .await
        .expect("Failed to grant module");

    let summary = evaluator
        .evaluate(client.id, today)
        .await
        .expect("Failed to evaluate");

    assert!(!summary.is_matrix);
    assert_eq!(summary.active_companies, 1);
    assert_eq!(summary.active_users, 0);
    assert_eq!(summary.companies_remaining, Some(1));
    assert!(summary.can_create_company);
    assert!(summary.can_create_user);
    assert!(summary.active_modules.contains(&module_slug));

    assert!(evaluator
        .can_create_company(client.id)
        .await
        .expect("Failed to check company headroom"));
}

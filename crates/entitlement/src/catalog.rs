//! Plan catalog
//!
//! Subscription tiers and their numeric/boolean limits. Plans are
//! provisioned at deploy time and rarely mutated; price changes go through
//! `upsert_plan` as versioned updates keyed on the immutable slug, never as
//! silent edits of active subscriptions.

use agsuite_shared::{NewPlan, Plan};
use sqlx::postgres::{PgArguments, Postgres};
use sqlx::query::QueryAs;
use sqlx::PgPool;

use crate::error::{unique_violation, EntitlementError, EntitlementResult};

const INSERT_PLAN: &str = r#"
    INSERT INTO plans (
        slug, name, description,
        monthly_price_cents, annual_price_cents,
        extra_user_monthly_cents, extra_user_annual_cents,
        extra_company_monthly_cents, extra_company_annual_cents,
        included_companies, included_users,
        allows_extra_companies, allows_extra_users,
        max_total_companies, max_total_users,
        storage_gb, priority_support, auto_backup, api_access,
        display_order, is_active, is_featured, features
    ) VALUES (
        $1, $2, $3, $4, $5, $6, $7, $8, $9, $10, $11, $12,
        $13, $14, $15, $16, $17, $18, $19, $20, $21, $22, $23
    )
"#;

const UPSERT_PLAN_CONFLICT: &str = r#"
    ON CONFLICT (slug) DO UPDATE SET
        name = EXCLUDED.name,
        description = EXCLUDED.description,
        monthly_price_cents = EXCLUDED.monthly_price_cents,
        annual_price_cents = EXCLUDED.annual_price_cents,
        extra_user_monthly_cents = EXCLUDED.extra_user_monthly_cents,
        extra_user_annual_cents = EXCLUDED.extra_user_annual_cents,
        extra_company_monthly_cents = EXCLUDED.extra_company_monthly_cents,
        extra_company_annual_cents = EXCLUDED.extra_company_annual_cents,
        included_companies = EXCLUDED.included_companies,
        included_users = EXCLUDED.included_users,
        allows_extra_companies = EXCLUDED.allows_extra_companies,
        allows_extra_users = EXCLUDED.allows_extra_users,
        max_total_companies = EXCLUDED.max_total_companies,
        max_total_users = EXCLUDED.max_total_users,
        storage_gb = EXCLUDED.storage_gb,
        priority_support = EXCLUDED.priority_support,
        auto_backup = EXCLUDED.auto_backup,
        api_access = EXCLUDED.api_access,
        display_order = EXCLUDED.display_order,
        is_active = EXCLUDED.is_active,
        is_featured = EXCLUDED.is_featured,
        features = EXCLUDED.features,
        updated_at = NOW()
"#;

/// Bind every NewPlan field in INSERT_PLAN column order
fn bind_plan<'q>(
    query: QueryAs<'q, Postgres, Plan, PgArguments>,
    plan: &'q NewPlan,
) -> QueryAs<'q, Postgres, Plan, PgArguments> {
    query
        .bind(&plan.slug)
        .bind(&plan.name)
        .bind(&plan.description)
        .bind(plan.monthly_price_cents)
        .bind(plan.annual_price_cents)
        .bind(plan.extra_user_monthly_cents)
        .bind(plan.extra_user_annual_cents)
        .bind(plan.extra_company_monthly_cents)
        .bind(plan.extra_company_annual_cents)
        .bind(plan.included_companies)
        .bind(plan.included_users)
        .bind(plan.allows_extra_companies)
        .bind(plan.allows_extra_users)
        .bind(plan.max_total_companies)
        .bind(plan.max_total_users)
        .bind(plan.storage_gb)
        .bind(plan.priority_support)
        .bind(plan.auto_backup)
        .bind(plan.api_access)
        .bind(plan.display_order)
        .bind(plan.is_active)
        .bind(plan.is_featured)
        .bind(&plan.features)
}

/// Plan catalog service
pub struct PlanCatalog {
    pool: PgPool,
}

impl PlanCatalog {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }

    /// Insert a new plan. Fails with `DuplicateSlug` when the slug is taken.
    pub async fn create_plan(&self, plan: NewPlan) -> EntitlementResult<Plan> {
        plan.validate()?;

        let sql = format!("{INSERT_PLAN} RETURNING *");
        let created: Plan = bind_plan(sqlx::query_as(&sql), &plan)
            .fetch_one(&self.pool)
            .await
            .map_err(|e| match unique_violation(&e) {
                Some(c) if c == "plans_slug_key" => {
                    EntitlementError::DuplicateSlug(plan.slug.clone())
                }
                _ => e.into(),
            })?;

        tracing::info!(plan_id = %created.id, slug = %created.slug, "Created plan");

        Ok(created)
    }

    /// Update-or-create keyed on slug. Everything except the slug itself is
    /// replaced on conflict.
    pub async fn upsert_plan(&self, plan: NewPlan) -> EntitlementResult<Plan> {
        plan.validate()?;

        let sql = format!("{INSERT_PLAN} {UPSERT_PLAN_CONFLICT} RETURNING *");
        let upserted: Plan = bind_plan(sqlx::query_as(&sql), &plan)
            .fetch_one(&self.pool)
            .await?;

        tracing::info!(plan_id = %upserted.id, slug = %upserted.slug, "Upserted plan");

        Ok(upserted)
    }

    /// Look up a plan by its slug
    pub async fn get_plan_by_slug(&self, slug: &str) -> EntitlementResult<Plan> {
        let plan: Option<Plan> = sqlx::query_as("SELECT * FROM plans WHERE slug = $1")
            .bind(slug)
            .fetch_optional(&self.pool)
            .await?;

        plan.ok_or_else(|| EntitlementError::NotFound(format!("Plan '{}' not found", slug)))
    }

    /// Active plans ordered by display order ascending
    pub async fn list_active_plans(&self) -> EntitlementResult<Vec<Plan>> {
        let plans: Vec<Plan> = sqlx::query_as(
            "SELECT * FROM plans WHERE is_active ORDER BY display_order ASC, slug ASC",
        )
        .fetch_all(&self.pool)
        .await?;

        Ok(plans)
    }
}

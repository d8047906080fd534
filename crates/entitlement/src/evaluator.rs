//! Entitlement evaluator
//!
//! Answers "what may this client do right now?" as a pure function over a
//! consistent snapshot of client + plan + grants + counts. Loading and
//! computing are split so the computation is deterministic and testable
//! without storage.

use agsuite_shared::{Cap, Client, ClientId, Plan};
use serde::{Deserialize, Serialize};
use sqlx::PgPool;
use time::Date;

use crate::error::{EntitlementError, EntitlementResult};

/// Raw data needed to evaluate a client's entitlements
#[derive(Debug, Clone)]
pub struct RawEntitlementData {
    pub client: Client,
    pub plan: Plan,
    /// Active (non-deactivated) companies under the client
    pub active_companies: i64,
    /// Active users across all of the client's companies
    pub active_users: i64,
    /// (module slug, grant active flag, expiry) for every grant
    pub grants: Vec<(String, bool, Option<Date>)>,
}

/// Computed entitlement projection for a client
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EntitlementSummary {
    pub client_id: ClientId,
    pub plan_slug: String,
    pub is_matrix: bool,
    pub company_cap: Cap,
    pub user_cap: Cap,
    pub active_companies: i64,
    pub active_users: i64,
    /// None = unlimited
    pub companies_remaining: Option<i64>,
    pub users_remaining: Option<i64>,
    pub can_create_company: bool,
    pub can_create_user: bool,
    /// Slugs of modules granted, active, and unexpired as of `as_of`
    pub active_modules: Vec<String>,
    pub as_of: Date,
}

/// Pure function: compute the entitlement summary from raw data.
/// The matrix tenant bypasses all caps.
pub fn compute_from_raw(raw: &RawEntitlementData, as_of: Date) -> EntitlementSummary {
    let is_matrix = raw.client.is_matrix();

    let (company_cap, user_cap) = if is_matrix {
        (Cap::Unlimited, Cap::Unlimited)
    } else {
        (raw.plan.company_cap(), raw.plan.user_cap())
    };

    let mut active_modules: Vec<String> = raw
        .grants
        .iter()
        .filter(|(_, active, expires)| *active && expires.map_or(true, |e| e >= as_of))
        .map(|(slug, _, _)| slug.clone())
        .collect();
    active_modules.sort();

    EntitlementSummary {
        client_id: raw.client.id,
        plan_slug: raw.plan.slug.clone(),
        is_matrix,
        company_cap,
        user_cap,
        active_companies: raw.active_companies,
        active_users: raw.active_users,
        companies_remaining: company_cap.remaining(raw.active_companies),
        users_remaining: user_cap.remaining(raw.active_users),
        can_create_company: company_cap.allows_one_more(raw.active_companies),
        can_create_user: user_cap.allows_one_more(raw.active_users),
        active_modules,
        as_of,
    }
}

/// Reject with `CapExceeded` when one more item does not fit.
/// Shared with the stores, which re-check inside their own transactions.
pub(crate) fn ensure_cap(resource: &'static str, cap: Cap, current: i64) -> EntitlementResult<()> {
    match cap {
        Cap::AtMost(max) if current >= max => Err(EntitlementError::CapExceeded {
            resource,
            current,
            cap: max,
        }),
        _ => Ok(()),
    }
}

/// Entitlement evaluator service
pub struct EntitlementEvaluator {
    pool: PgPool,
}

impl EntitlementEvaluator {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }

    /// Full entitlement projection for a client as of the given date
    pub async fn evaluate(
        &self,
        client_id: ClientId,
        as_of: Date,
    ) -> EntitlementResult<EntitlementSummary> {
        let raw = self.load_raw(client_id).await?;
        Ok(compute_from_raw(&raw, as_of))
    }

    /// Whether the client may create one more company right now
    pub async fn can_create_company(&self, client_id: ClientId) -> EntitlementResult<bool> {
        let raw = self.load_raw(client_id).await?;
        if raw.client.is_matrix() {
            return Ok(true);
        }
        Ok(raw.plan.company_cap().allows_one_more(raw.active_companies))
    }

    /// Whether the client may create one more user right now
    pub async fn can_create_user(&self, client_id: ClientId) -> EntitlementResult<bool> {
        let raw = self.load_raw(client_id).await?;
        if raw.client.is_matrix() {
            return Ok(true);
        }
        Ok(raw.plan.user_cap().allows_one_more(raw.active_users))
    }

    /// Load a consistent snapshot for evaluation. Reads take no locks; the
    /// mutating stores re-check caps under a client row lock.
    async fn load_raw(&self, client_id: ClientId) -> EntitlementResult<RawEntitlementData> {
        let client: Option<Client> = sqlx::query_as("SELECT * FROM clients WHERE id = $1")
            .bind(client_id)
            .fetch_optional(&self.pool)
            .await?;
        let client = client
            .ok_or_else(|| EntitlementError::NotFound(format!("Client {} not found", client_id)))?;

        let plan: Plan = sqlx::query_as("SELECT * FROM plans WHERE id = $1")
            .bind(client.plan_id)
            .fetch_one(&self.pool)
            .await?;

        let (active_companies,): (i64,) = sqlx::query_as(
            "SELECT COUNT(*) FROM companies WHERE client_id = $1 AND is_active",
        )
        .bind(client_id)
        .fetch_one(&self.pool)
        .await?;

        let (active_users,): (i64,) = sqlx::query_as(
            r#"
            SELECT COUNT(*)
            FROM users u
            JOIN companies c ON c.id = u.company_id
            WHERE c.client_id = $1 AND u.is_active
            "#,
        )
        .bind(client_id)
        .fetch_one(&self.pool)
        .await?;

        let grants: Vec<(String, bool, Option<Date>)> = sqlx::query_as(
            r#"
            SELECT m.slug, g.is_active, g.expires_on
            FROM client_modules g
            JOIN modules m ON m.id = g.module_id
            WHERE g.client_id = $1
            "#,
        )
        .bind(client_id)
        .fetch_all(&self.pool)
        .await?;

        Ok(RawEntitlementData {
            client,
            plan,
            active_companies,
            active_users,
            grants,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use agsuite_shared::{ClientId, PlanId};
    use serde_json::json;
    use time::macros::date;
    use time::OffsetDateTime;

    fn test_plan(
        included_companies: i32,
        allows_extra_companies: bool,
        max_total_companies: Option<i32>,
    ) -> Plan {
        Plan {
            id: PlanId::new(),
            slug: "basico".to_string(),
            name: "Básico".to_string(),
            description: None,
            monthly_price_cents: 29000,
            annual_price_cents: 290000,
            extra_user_monthly_cents: 8000,
            extra_user_annual_cents: 80000,
            extra_company_monthly_cents: 15000,
            extra_company_annual_cents: 150000,
            included_companies,
            included_users: 5,
            allows_extra_companies,
            allows_extra_users: true,
            max_total_companies,
            max_total_users: Some(20),
            storage_gb: 5,
            priority_support: false,
            auto_backup: true,
            api_access: false,
            display_order: 1,
            is_active: true,
            is_featured: false,
            features: json!([]),
            created_at: OffsetDateTime::now_utc(),
            updated_at: OffsetDateTime::now_utc(),
        }
    }

    fn test_client(metadata: serde_json::Value, plan_id: PlanId) -> Client {
        Client {
            id: ClientId::new(),
            plan_id,
            name: "Grupo Restaurantero ABC".to_string(),
            email: "contacto@restauranteroabc.com".to_string(),
            phone: None,
            address: None,
            contact_name: None,
            subscription_start: date!(2026 - 01 - 01),
            subscription_end: None,
            is_active: true,
            metadata,
            created_at: OffsetDateTime::now_utc(),
            updated_at: OffsetDateTime::now_utc(),
        }
    }

    fn raw(
        plan: Plan,
        metadata: serde_json::Value,
        active_companies: i64,
        active_users: i64,
    ) -> RawEntitlementData {
        let client = test_client(metadata, plan.id);
        RawEntitlementData {
            client,
            plan,
            active_companies,
            active_users,
            grants: Vec::new(),
        }
    }

    #[test]
    fn test_basico_company_cap_scenario() {
        // limite_empresas=1, maximo=2, adicionales=true: two companies fit,
        // a third does not
        let plan = test_plan(1, true, Some(2));
        let as_of = date!(2026 - 06 - 01);

        let s = compute_from_raw(&raw(plan.clone(), json!({}), 0, 0), as_of);
        assert!(s.can_create_company);
        assert_eq!(s.companies_remaining, Some(2));

        let s = compute_from_raw(&raw(plan.clone(), json!({}), 1, 0), as_of);
        assert!(s.can_create_company);

        let s = compute_from_raw(&raw(plan, json!({}), 2, 0), as_of);
        assert!(!s.can_create_company);
        assert_eq!(s.companies_remaining, Some(0));
    }

    #[test]
    fn test_null_cap_with_extras_is_unlimited() {
        let plan = test_plan(3, true, None);
        let s = compute_from_raw(&raw(plan, json!({}), 50_000, 0), date!(2026 - 06 - 01));
        assert_eq!(s.company_cap, Cap::Unlimited);
        assert!(s.can_create_company);
        assert_eq!(s.companies_remaining, None);
    }

    #[test]
    fn test_null_cap_without_extras_collapses_to_included() {
        let plan = test_plan(3, false, None);
        let s = compute_from_raw(&raw(plan.clone(), json!({}), 2, 0), date!(2026 - 06 - 01));
        assert!(s.can_create_company);

        let s = compute_from_raw(&raw(plan, json!({}), 3, 0), date!(2026 - 06 - 01));
        assert_eq!(s.company_cap, Cap::AtMost(3));
        assert!(!s.can_create_company);
    }

    #[test]
    fn test_matrix_bypasses_all_caps() {
        // Even a plan that would forbid creation is bypassed for matrix
        let plan = test_plan(1, false, Some(1));
        let s = compute_from_raw(
            &raw(plan, json!({ "es_matriz": true }), 10_000, 10_000),
            date!(2026 - 06 - 01),
        );
        assert!(s.is_matrix);
        assert_eq!(s.company_cap, Cap::Unlimited);
        assert_eq!(s.user_cap, Cap::Unlimited);
        assert!(s.can_create_company);
        assert!(s.can_create_user);
    }

    #[test]
    fn test_user_cap_independent_of_company_cap() {
        let plan = test_plan(1, true, Some(2));
        // max_total_users = 20 in the fixture
        let s = compute_from_raw(&raw(plan.clone(), json!({}), 2, 19), date!(2026 - 06 - 01));
        assert!(!s.can_create_company);
        assert!(s.can_create_user);

        let s = compute_from_raw(&raw(plan, json!({}), 0, 20), date!(2026 - 06 - 01));
        assert!(s.can_create_company);
        assert!(!s.can_create_user);
    }

    #[test]
    fn test_active_modules_filtering() {
        let plan = test_plan(1, true, Some(2));
        let mut data = raw(plan, json!({}), 0, 0);
        data.grants = vec![
            ("dashboard".to_string(), true, None),
            ("productos".to_string(), true, Some(date!(2026 - 12 - 31))),
            ("reportes".to_string(), true, Some(date!(2026 - 01 - 31))),
            ("usuarios".to_string(), false, None),
        ];

        let s = compute_from_raw(&data, date!(2026 - 06 - 01));
        assert_eq!(s.active_modules, vec!["dashboard", "productos"]);

        // Expiry date itself still counts
        let s = compute_from_raw(&data, date!(2026 - 01 - 31));
        assert_eq!(s.active_modules, vec!["dashboard", "productos", "reportes"]);
    }

    #[test]
    fn test_ensure_cap() {
        assert!(ensure_cap("companies", Cap::Unlimited, i64::MAX - 1).is_ok());
        assert!(ensure_cap("companies", Cap::AtMost(2), 1).is_ok());
        let err = ensure_cap("companies", Cap::AtMost(2), 2).unwrap_err();
        assert!(matches!(
            err,
            EntitlementError::CapExceeded {
                resource: "companies",
                current: 2,
                cap: 2,
            }
        ));
    }
}

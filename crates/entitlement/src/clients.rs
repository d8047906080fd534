//! Client (tenant) store
//!
//! A client references exactly one plan and owns its module grants.
//! Grants follow sync-without-detach semantics: re-granting updates the
//! existing relation in place and never removes grants that the new call
//! does not mention.

use agsuite_shared::{
    is_matrix_metadata, Client, ClientId, GrantTerms, ModuleGrant, NewClient, PlanId,
    MATRIX_METADATA_KEY,
};
use sqlx::PgPool;
use time::Date;
use tokio_retry::strategy::ExponentialBackoff;
use tokio_retry::RetryIf;

use crate::error::{is_transient, unique_violation, EntitlementError, EntitlementResult};

/// Bounded retry for idempotent upserts hitting transient storage errors
const UPSERT_RETRIES: usize = 2;

pub(crate) fn upsert_retry_strategy() -> impl Iterator<Item = std::time::Duration> {
    ExponentialBackoff::from_millis(50).take(UPSERT_RETRIES)
}

/// Client store service
pub struct ClientService {
    pool: PgPool,
}

impl ClientService {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }

    /// Create a client subscribed to the plan named by `plan_slug`.
    ///
    /// A client flagged as matrix in its metadata is granted every
    /// registered module inside the same transaction.
    pub async fn create_client(
        &self,
        plan_slug: &str,
        profile: NewClient,
    ) -> EntitlementResult<Client> {
        let mut tx = self.pool.begin().await?;

        let plan: Option<(PlanId,)> = sqlx::query_as("SELECT id FROM plans WHERE slug = $1")
            .bind(plan_slug)
            .fetch_optional(&mut *tx)
            .await?;
        let (plan_id,) =
            plan.ok_or_else(|| EntitlementError::PlanNotFound(plan_slug.to_string()))?;

        let client: Client = sqlx::query_as(
            r#"
            INSERT INTO clients (
                plan_id, name, email, phone, address, contact_name,
                subscription_start, subscription_end, metadata
            ) VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9)
            RETURNING *
            "#,
        )
        .bind(plan_id)
        .bind(&profile.name)
        .bind(&profile.email)
        .bind(&profile.phone)
        .bind(&profile.address)
        .bind(&profile.contact_name)
        .bind(profile.subscription_start)
        .bind(profile.subscription_end)
        .bind(&profile.metadata)
        .fetch_one(&mut *tx)
        .await
        .map_err(|e| match unique_violation(&e) {
            Some(c) if c == "clients_email_key" => {
                EntitlementError::DuplicateEmail(profile.email.clone())
            }
            _ => e.into(),
        })?;

        let mut matrix_grants = 0;
        if is_matrix_metadata(&profile.metadata) {
            let granted = sqlx::query(
                r#"
                INSERT INTO client_modules (client_id, module_id, is_active, activated_on, expires_on, config)
                SELECT $1, m.id, true, CURRENT_DATE, NULL, $2
                FROM modules m
                WHERE m.is_active
                ON CONFLICT (client_id, module_id) DO UPDATE SET
                    is_active = true,
                    updated_at = NOW()
                "#,
            )
            .bind(client.id)
            .bind(serde_json::json!({ "acceso_completo": true }))
            .execute(&mut *tx)
            .await?;
            matrix_grants = granted.rows_affected();
        }

        tx.commit().await?;

        tracing::info!(
            client_id = %client.id,
            plan = plan_slug,
            matrix = client.is_matrix(),
            matrix_grants,
            "Created client"
        );

        Ok(client)
    }

    /// Look up a client by id
    pub async fn get_client(&self, client_id: ClientId) -> EntitlementResult<Client> {
        let client: Option<Client> = sqlx::query_as("SELECT * FROM clients WHERE id = $1")
            .bind(client_id)
            .fetch_optional(&self.pool)
            .await?;

        client.ok_or_else(|| EntitlementError::NotFound(format!("Client {} not found", client_id)))
    }

    /// Look up a client by its unique email
    pub async fn get_client_by_email(&self, email: &str) -> EntitlementResult<Client> {
        let client: Option<Client> = sqlx::query_as("SELECT * FROM clients WHERE email = $1")
            .bind(email)
            .fetch_optional(&self.pool)
            .await?;

        client.ok_or_else(|| EntitlementError::NotFound(format!("Client '{}' not found", email)))
    }

    /// Grant a module to a client, or refresh an existing grant in place.
    ///
    /// Idempotent and safe under retry: keyed on (client, module), so a
    /// repeated call updates activity/expiry/config instead of duplicating
    /// the relation. Transient storage errors are retried a bounded number
    /// of times.
    pub async fn grant_module(
        &self,
        client_id: ClientId,
        module_slug: &str,
        terms: GrantTerms,
    ) -> EntitlementResult<ModuleGrant> {
        RetryIf::spawn(
            upsert_retry_strategy(),
            || self.grant_module_once(client_id, module_slug, &terms),
            is_transient,
        )
        .await
    }

    async fn grant_module_once(
        &self,
        client_id: ClientId,
        module_slug: &str,
        terms: &GrantTerms,
    ) -> EntitlementResult<ModuleGrant> {
        let module: Option<(agsuite_shared::ModuleId,)> =
            sqlx::query_as("SELECT id FROM modules WHERE slug = $1")
                .bind(module_slug)
                .fetch_optional(&self.pool)
                .await?;
        let (module_id,) = module.ok_or_else(|| {
            EntitlementError::NotFound(format!("Module '{}' not found", module_slug))
        })?;

        let grant: ModuleGrant = sqlx::query_as(
            r#"
            INSERT INTO client_modules (client_id, module_id, is_active, activated_on, expires_on, config)
            VALUES ($1, $2, true, $3, $4, $5)
            ON CONFLICT (client_id, module_id) DO UPDATE SET
                is_active = true,
                activated_on = EXCLUDED.activated_on,
                expires_on = EXCLUDED.expires_on,
                config = EXCLUDED.config,
                updated_at = NOW()
            RETURNING *
            "#,
        )
        .bind(client_id)
        .bind(module_id)
        .bind(terms.activated_on)
        .bind(terms.expires_on)
        .bind(&terms.config)
        .fetch_one(&self.pool)
        .await
        .map_err(|e| {
            if crate::error::fk_violation(&e) {
                EntitlementError::NotFound(format!("Client {} not found", client_id))
            } else {
                e.into()
            }
        })?;

        tracing::info!(
            client_id = %client_id,
            module = module_slug,
            expires_on = ?grant.expires_on,
            "Granted module"
        );

        Ok(grant)
    }

    /// Deactivate a grant without removing the relation (history preserved)
    pub async fn revoke_module(
        &self,
        client_id: ClientId,
        module_slug: &str,
    ) -> EntitlementResult<()> {
        let result = sqlx::query(
            r#"
            UPDATE client_modules g
            SET is_active = false, updated_at = NOW()
            FROM modules m
            WHERE m.id = g.module_id AND g.client_id = $1 AND m.slug = $2
            "#,
        )
        .bind(client_id)
        .bind(module_slug)
        .execute(&self.pool)
        .await?;

        if result.rows_affected() == 0 {
            return Err(EntitlementError::NotFound(format!(
                "No grant of module '{}' for client {}",
                module_slug, client_id
            )));
        }

        tracing::info!(client_id = %client_id, module = module_slug, "Revoked module");

        Ok(())
    }

    /// Whether a module is currently granted and unexpired as of `as_of`
    pub async fn is_module_active(
        &self,
        client_id: ClientId,
        module_slug: &str,
        as_of: Date,
    ) -> EntitlementResult<bool> {
        let grant: Option<(bool, Option<Date>)> = sqlx::query_as(
            r#"
            SELECT g.is_active, g.expires_on
            FROM client_modules g
            JOIN modules m ON m.id = g.module_id
            WHERE g.client_id = $1 AND m.slug = $2
            "#,
        )
        .bind(client_id)
        .bind(module_slug)
        .fetch_optional(&self.pool)
        .await?;

        Ok(matches!(
            grant,
            Some((true, expires)) if expires.map_or(true, |e| e >= as_of)
        ))
    }

    /// Re-grant every active module to every matrix client. Idempotent;
    /// used at bootstrap and as a repair step. Returns the number of grant
    /// rows touched.
    pub async fn sync_matrix_modules(&self) -> EntitlementResult<u64> {
        let result = sqlx::query(
            r#"
            INSERT INTO client_modules (client_id, module_id, is_active, activated_on, expires_on, config)
            SELECT c.id, m.id, true, CURRENT_DATE, NULL, $2
            FROM clients c
            CROSS JOIN modules m
            WHERE c.metadata ->> $1 = 'true' AND m.is_active
            ON CONFLICT (client_id, module_id) DO UPDATE SET
                is_active = true,
                updated_at = NOW()
            "#,
        )
        .bind(MATRIX_METADATA_KEY)
        .bind(serde_json::json!({ "acceso_completo": true }))
        .execute(&self.pool)
        .await?;

        tracing::info!(grants = result.rows_affected(), "Synced matrix module grants");

        Ok(result.rows_affected())
    }

    /// Move a client onto a different plan (plan change or renewal)
    pub async fn change_plan(&self, client_id: ClientId, plan_slug: &str) -> EntitlementResult<()> {
        let plan: Option<(PlanId,)> = sqlx::query_as("SELECT id FROM plans WHERE slug = $1")
            .bind(plan_slug)
            .fetch_optional(&self.pool)
            .await?;
        let (plan_id,) =
            plan.ok_or_else(|| EntitlementError::PlanNotFound(plan_slug.to_string()))?;

        let result = sqlx::query("UPDATE clients SET plan_id = $1, updated_at = NOW() WHERE id = $2")
            .bind(plan_id)
            .bind(client_id)
            .execute(&self.pool)
            .await?;

        if result.rows_affected() == 0 {
            return Err(EntitlementError::NotFound(format!(
                "Client {} not found",
                client_id
            )));
        }

        tracing::info!(client_id = %client_id, plan = plan_slug, "Changed client plan");

        Ok(())
    }

    /// Soft-deactivate a client on churn. Companies and users keep their
    /// rows for billing history.
    pub async fn deactivate_client(&self, client_id: ClientId) -> EntitlementResult<()> {
        let result = sqlx::query("UPDATE clients SET is_active = false, updated_at = NOW() WHERE id = $1")
            .bind(client_id)
            .execute(&self.pool)
            .await?;

        if result.rows_affected() == 0 {
            return Err(EntitlementError::NotFound(format!(
                "Client {} not found",
                client_id
            )));
        }

        tracing::info!(client_id = %client_id, "Deactivated client");

        Ok(())
    }
}

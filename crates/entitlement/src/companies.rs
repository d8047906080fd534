//! Company store
//!
//! Companies are the operational business units under a client and the
//! resource the company cap counts. Creation takes the client row lock so
//! two concurrent creations cannot both pass the cap check.

use agsuite_shared::{Client, ClientId, Company, CompanyId, NewCompany, Plan};
use sqlx::PgPool;
use tokio_retry::RetryIf;

use crate::clients::upsert_retry_strategy;
use crate::error::{is_transient, unique_violation, EntitlementError, EntitlementResult};
use crate::evaluator::ensure_cap;

/// Company store service
pub struct CompanyService {
    pool: PgPool,
}

impl CompanyService {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }

    /// Create a company under a client, enforcing the plan's company cap.
    ///
    /// The client row is locked for the duration of the transaction, so the
    /// count-then-insert sequence is serialized against concurrent creations
    /// for the same client. The matrix tenant bypasses the cap.
    pub async fn create_company(
        &self,
        client_id: ClientId,
        attrs: NewCompany,
    ) -> EntitlementResult<Company> {
        let mut tx = self.pool.begin().await?;

        let client: Option<Client> =
            sqlx::query_as("SELECT * FROM clients WHERE id = $1 FOR UPDATE")
                .bind(client_id)
                .fetch_optional(&mut *tx)
                .await?;
        let client = client
            .ok_or_else(|| EntitlementError::NotFound(format!("Client {} not found", client_id)))?;

        if !client.is_matrix() {
            let plan: Plan = sqlx::query_as("SELECT * FROM plans WHERE id = $1")
                .bind(client.plan_id)
                .fetch_one(&mut *tx)
                .await?;

            let (current,): (i64,) = sqlx::query_as(
                "SELECT COUNT(*) FROM companies WHERE client_id = $1 AND is_active",
            )
            .bind(client_id)
            .fetch_one(&mut *tx)
            .await?;

            ensure_cap("companies", plan.company_cap(), current)?;
        }

        let company: Company = sqlx::query_as(
            r#"
            INSERT INTO companies (
                client_id, name, country_code, country, city, address,
                phone, email, tax_id, timezone, currency, config
            ) VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10, $11, $12)
            RETURNING *
            "#,
        )
        .bind(client_id)
        .bind(&attrs.name)
        .bind(&attrs.country_code)
        .bind(&attrs.country)
        .bind(&attrs.city)
        .bind(&attrs.address)
        .bind(&attrs.phone)
        .bind(&attrs.email)
        .bind(&attrs.tax_id)
        .bind(&attrs.timezone)
        .bind(&attrs.currency)
        .bind(&attrs.config)
        .fetch_one(&mut *tx)
        .await
        .map_err(|e| match unique_violation(&e) {
            Some(c) if c == "companies_client_id_name_key" => {
                EntitlementError::DuplicateName(attrs.name.clone())
            }
            _ => e.into(),
        })?;

        tx.commit().await?;

        tracing::info!(
            company_id = %company.id,
            client_id = %client_id,
            name = %company.name,
            "Created company"
        );

        Ok(company)
    }

    /// Return the company with this name under the client, creating it with
    /// `attrs` only when absent. An existing company is returned unmodified.
    pub async fn find_or_create_by_name(
        &self,
        client_id: ClientId,
        name: &str,
        attrs: NewCompany,
    ) -> EntitlementResult<Company> {
        RetryIf::spawn(
            upsert_retry_strategy(),
            || self.find_or_create_once(client_id, name, &attrs),
            is_transient,
        )
        .await
    }

    async fn find_or_create_once(
        &self,
        client_id: ClientId,
        name: &str,
        attrs: &NewCompany,
    ) -> EntitlementResult<Company> {
        if let Some(existing) = self.find_by_name(client_id, name).await? {
            return Ok(existing);
        }

        let mut attrs = attrs.clone();
        attrs.name = name.to_string();
        match self.create_company(client_id, attrs).await {
            Ok(company) => Ok(company),
            // Lost the race to a concurrent creator; the row exists now
            Err(EntitlementError::DuplicateName(_)) => {
                let company = self.find_by_name(client_id, name).await?;
                company.ok_or_else(|| {
                    EntitlementError::Internal(format!(
                        "Company '{}' vanished after duplicate-name conflict",
                        name
                    ))
                })
            }
            Err(e) => Err(e),
        }
    }

    async fn find_by_name(
        &self,
        client_id: ClientId,
        name: &str,
    ) -> EntitlementResult<Option<Company>> {
        let company: Option<Company> =
            sqlx::query_as("SELECT * FROM companies WHERE client_id = $1 AND name = $2")
                .bind(client_id)
                .bind(name)
                .fetch_optional(&self.pool)
                .await?;

        Ok(company)
    }

    /// Look up a company by id
    pub async fn get_company(&self, company_id: CompanyId) -> EntitlementResult<Company> {
        let company: Option<Company> = sqlx::query_as("SELECT * FROM companies WHERE id = $1")
            .bind(company_id)
            .fetch_optional(&self.pool)
            .await?;

        company
            .ok_or_else(|| EntitlementError::NotFound(format!("Company {} not found", company_id)))
    }

    /// Active companies under a client, oldest first
    pub async fn list_companies(&self, client_id: ClientId) -> EntitlementResult<Vec<Company>> {
        let companies: Vec<Company> = sqlx::query_as(
            "SELECT * FROM companies WHERE client_id = $1 AND is_active ORDER BY created_at ASC",
        )
        .bind(client_id)
        .fetch_all(&self.pool)
        .await?;

        Ok(companies)
    }

    /// Soft-deactivate a company. Frees a cap slot; users under the company
    /// keep their rows.
    pub async fn deactivate_company(&self, company_id: CompanyId) -> EntitlementResult<()> {
        let result =
            sqlx::query("UPDATE companies SET is_active = false, updated_at = NOW() WHERE id = $1")
                .bind(company_id)
                .execute(&self.pool)
                .await?;

        if result.rows_affected() == 0 {
            return Err(EntitlementError::NotFound(format!(
                "Company {} not found",
                company_id
            )));
        }

        tracing::info!(company_id = %company_id, "Deactivated company");

        Ok(())
    }
}

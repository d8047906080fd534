//! User store
//!
//! Users belong to exactly one company; the user cap counts active users
//! across all companies of the owning client. Creation locks the client row
//! so the count-then-insert sequence cannot race past the cap.

use agsuite_shared::{Client, CompanyId, NewUser, Plan, User, UserId};
use sqlx::PgPool;
use time::OffsetDateTime;

use crate::error::{unique_violation, EntitlementError, EntitlementResult};
use crate::evaluator::ensure_cap;
use crate::password;
use crate::roles::{NoopRoleAssigner, RoleAssigner};

/// User store service, generic over the external role-assignment seam
pub struct UserService<R = NoopRoleAssigner> {
    pool: PgPool,
    roles: R,
}

impl UserService<NoopRoleAssigner> {
    pub fn new(pool: PgPool) -> Self {
        Self {
            pool,
            roles: NoopRoleAssigner,
        }
    }
}

impl<R: RoleAssigner> UserService<R> {
    pub fn with_role_assigner(pool: PgPool, roles: R) -> Self {
        Self { pool, roles }
    }

    /// Create a user in a company, enforcing the owning client's user cap.
    ///
    /// The password is hashed before it touches storage. When `role` is
    /// given, assignment happens after commit and is best-effort: a missing
    /// role or a failing authorization system never undoes the creation.
    pub async fn create_user(
        &self,
        company_id: CompanyId,
        attrs: NewUser,
        role: Option<&str>,
    ) -> EntitlementResult<User> {
        let password_hash = password::hash_password(&attrs.password)
            .map_err(|e| EntitlementError::Internal(e.to_string()))?;

        let mut tx = self.pool.begin().await?;

        // Lock the owning client, not the company: the cap spans every
        // company of the client
        let client: Option<Client> = sqlx::query_as(
            r#"
            SELECT cl.* FROM clients cl
            JOIN companies c ON c.client_id = cl.id
            WHERE c.id = $1
            FOR UPDATE OF cl
            "#,
        )
        .bind(company_id)
        .fetch_optional(&mut *tx)
        .await?;
        let client = client.ok_or_else(|| {
            EntitlementError::NotFound(format!("Company {} not found", company_id))
        })?;

        if !client.is_matrix() {
            let plan: Plan = sqlx::query_as("SELECT * FROM plans WHERE id = $1")
                .bind(client.plan_id)
                .fetch_one(&mut *tx)
                .await?;

            let (current,): (i64,) = sqlx::query_as(
                r#"
                SELECT COUNT(*)
                FROM users u
                JOIN companies c ON c.id = u.company_id
                WHERE c.client_id = $1 AND u.is_active
                "#,
            )
            .bind(client.id)
            .fetch_one(&mut *tx)
            .await?;

            ensure_cap("users", plan.user_cap(), current)?;
        }

        let user: User = sqlx::query_as(
            r#"
            INSERT INTO users (company_id, name, email, password_hash, kind)
            VALUES ($1, $2, $3, $4, $5)
            RETURNING *
            "#,
        )
        .bind(company_id)
        .bind(&attrs.name)
        .bind(&attrs.email)
        .bind(&password_hash)
        .bind(attrs.kind.to_string())
        .fetch_one(&mut *tx)
        .await
        .map_err(|e| match unique_violation(&e) {
            Some(c) if c == "users_email_key" => {
                EntitlementError::DuplicateEmail(attrs.email.clone())
            }
            _ => e.into(),
        })?;

        tx.commit().await?;

        tracing::info!(
            user_id = %user.id,
            company_id = %company_id,
            kind = %user.kind,
            "Created user"
        );

        if let Some(role_name) = role {
            match self.roles.assign_role_if_exists(user.id, role_name).await {
                Ok(true) => {
                    tracing::info!(user_id = %user.id, role = role_name, "Assigned role")
                }
                Ok(false) => {
                    tracing::debug!(user_id = %user.id, role = role_name, "Role absent, skipped")
                }
                Err(e) => {
                    tracing::warn!(
                        user_id = %user.id,
                        role = role_name,
                        error = %e,
                        "Role assignment failed, user kept"
                    )
                }
            }
        }

        Ok(user)
    }

    /// Return the user with this email, creating them in `company_id` with
    /// `attrs` only when absent. An existing user is returned unmodified,
    /// even if they belong to a different company.
    pub async fn find_or_create_by_email(
        &self,
        company_id: CompanyId,
        email: &str,
        attrs: NewUser,
        role: Option<&str>,
    ) -> EntitlementResult<User> {
        if let Some(existing) = self.find_by_email(email).await? {
            return Ok(existing);
        }

        let mut attrs = attrs;
        attrs.email = email.to_string();
        match self.create_user(company_id, attrs, role).await {
            Ok(user) => Ok(user),
            // Lost the race to a concurrent creator
            Err(EntitlementError::DuplicateEmail(_)) => {
                let user = self.find_by_email(email).await?;
                user.ok_or_else(|| {
                    EntitlementError::Internal(format!(
                        "User '{}' vanished after duplicate-email conflict",
                        email
                    ))
                })
            }
            Err(e) => Err(e),
        }
    }

    async fn find_by_email(&self, email: &str) -> EntitlementResult<Option<User>> {
        let user: Option<User> = sqlx::query_as("SELECT * FROM users WHERE email = $1")
            .bind(email)
            .fetch_optional(&self.pool)
            .await?;

        Ok(user)
    }

    /// Look up a user by id
    pub async fn get_user(&self, user_id: UserId) -> EntitlementResult<User> {
        let user: Option<User> = sqlx::query_as("SELECT * FROM users WHERE id = $1")
            .bind(user_id)
            .fetch_optional(&self.pool)
            .await?;

        user.ok_or_else(|| EntitlementError::NotFound(format!("User {} not found", user_id)))
    }

    /// Verify a login credential against the stored hash
    pub async fn verify_credentials(
        &self,
        email: &str,
        password: &str,
    ) -> EntitlementResult<Option<User>> {
        let user = match self.find_by_email(email).await? {
            Some(u) if u.is_active => u,
            _ => return Ok(None),
        };

        let ok = password::verify_password(password, &user.password_hash)
            .map_err(|e| EntitlementError::Internal(e.to_string()))?;

        Ok(ok.then_some(user))
    }

    /// Record a successful access
    pub async fn touch_last_access(&self, user_id: UserId) -> EntitlementResult<()> {
        let result =
            sqlx::query("UPDATE users SET last_access_at = $1, updated_at = NOW() WHERE id = $2")
                .bind(OffsetDateTime::now_utc())
                .bind(user_id)
                .execute(&self.pool)
                .await?;

        if result.rows_affected() == 0 {
            return Err(EntitlementError::NotFound(format!(
                "User {} not found",
                user_id
            )));
        }

        Ok(())
    }

    /// Soft-deactivate a user. Frees a cap slot; the row is kept.
    pub async fn deactivate_user(&self, user_id: UserId) -> EntitlementResult<()> {
        let result =
            sqlx::query("UPDATE users SET is_active = false, updated_at = NOW() WHERE id = $1")
                .bind(user_id)
                .execute(&self.pool)
                .await?;

        if result.rows_affected() == 0 {
            return Err(EntitlementError::NotFound(format!(
                "User {} not found",
                user_id
            )));
        }

        tracing::info!(user_id = %user_id, "Deactivated user");

        Ok(())
    }
}

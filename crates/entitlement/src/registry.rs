//! Module registry
//!
//! Reference data: the set of assignable feature modules. Registering a
//! module also re-syncs the matrix tenants in the same transaction, so the
//! matrix bypass is never frozen to the modules that existed when the
//! matrix client was created.

use agsuite_shared::{Module, NewModule, MATRIX_METADATA_KEY};
use sqlx::PgPool;

use crate::error::{EntitlementError, EntitlementResult};

/// Module registry service
pub struct ModuleRegistry {
    pool: PgPool,
}

impl ModuleRegistry {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }

    /// Register a module (upsert keyed on slug) and grant it to every
    /// matrix client, atomically.
    pub async fn register_module(&self, module: NewModule) -> EntitlementResult<Module> {
        let mut tx = self.pool.begin().await?;

        let registered: Module = sqlx::query_as(
            r#"
            INSERT INTO modules (slug, name, description, icon, display_order, is_core)
            VALUES ($1, $2, $3, $4, $5, $6)
            ON CONFLICT (slug) DO UPDATE SET
                name = EXCLUDED.name,
                description = EXCLUDED.description,
                icon = EXCLUDED.icon,
                display_order = EXCLUDED.display_order,
                is_core = EXCLUDED.is_core,
                is_active = true,
                updated_at = NOW()
            RETURNING *
            "#,
        )
        .bind(&module.slug)
        .bind(&module.name)
        .bind(&module.description)
        .bind(&module.icon)
        .bind(module.display_order)
        .bind(module.is_core)
        .fetch_one(&mut *tx)
        .await?;

        // Live sync: matrix tenants receive every module as it appears
        let granted = sqlx::query(
            r#"
            INSERT INTO client_modules (client_id, module_id, is_active, activated_on, expires_on, config)
            SELECT c.id, $1, true, CURRENT_DATE, NULL, $3
            FROM clients c
            WHERE c.metadata ->> $2 = 'true'
            ON CONFLICT (client_id, module_id) DO UPDATE SET
                is_active = true,
                updated_at = NOW()
            "#,
        )
        .bind(registered.id)
        .bind(MATRIX_METADATA_KEY)
        .bind(serde_json::json!({ "acceso_completo": true }))
        .execute(&mut *tx)
        .await?;

        tx.commit().await?;

        tracing::info!(
            module_id = %registered.id,
            slug = %registered.slug,
            matrix_grants = granted.rows_affected(),
            "Registered module"
        );

        Ok(registered)
    }

    /// Look up a module by its slug
    pub async fn get_module_by_slug(&self, slug: &str) -> EntitlementResult<Module> {
        let module: Option<Module> = sqlx::query_as("SELECT * FROM modules WHERE slug = $1")
            .bind(slug)
            .fetch_optional(&self.pool)
            .await?;

        module.ok_or_else(|| EntitlementError::NotFound(format!("Module '{}' not found", slug)))
    }

    /// All registered modules, ordered for display
    pub async fn list_modules(&self) -> EntitlementResult<Vec<Module>> {
        let modules: Vec<Module> =
            sqlx::query_as("SELECT * FROM modules ORDER BY display_order ASC, slug ASC")
                .fetch_all(&self.pool)
                .await?;

        Ok(modules)
    }
}

//! Platform bootstrap
//!
//! Provisions the base catalog (plans, modules), the distinguished matrix
//! tenant with its company and super administrator, and optionally a demo
//! tenant. Every step is an upsert or find-or-create, so the sequence is
//! idempotent and safe to run on every deploy.

use agsuite_shared::{
    Client, Company, NewClient, NewCompany, NewModule, NewPlan, NewUser, User, UserKind,
};
use serde_json::json;
use sqlx::PgPool;
use time::{Date, Duration, OffsetDateTime};

use crate::catalog::PlanCatalog;
use crate::clients::ClientService;
use crate::companies::CompanyService;
use crate::error::{EntitlementError, EntitlementResult};
use crate::registry::ModuleRegistry;
use crate::users::UserService;

const MATRIX_CLIENT_EMAIL: &str = "facturacion@agbusinesssuite.com";
const MATRIX_COMPANY_NAME: &str = "AG Business Suite";
const SUPER_ADMIN_EMAIL: &str = "admin@agbusinesssuite.com";
const SUPER_ADMIN_ROLE: &str = "Super Administrador";

/// The built-in subscription tiers
pub fn base_plans() -> Vec<NewPlan> {
    vec![
        NewPlan {
            slug: "basico".to_string(),
            name: "Básico".to_string(),
            description: Some(
                "Plan ideal para pequeñas empresas que están comenzando".to_string(),
            ),
            monthly_price_cents: 29000,
            annual_price_cents: 290000,
            extra_user_monthly_cents: 8000,
            extra_user_annual_cents: 80000,
            extra_company_monthly_cents: 15000,
            extra_company_annual_cents: 150000,
            included_companies: 1,
            included_users: 5,
            allows_extra_companies: true,
            allows_extra_users: true,
            max_total_companies: Some(2),
            max_total_users: Some(20),
            storage_gb: 5,
            priority_support: false,
            auto_backup: true,
            api_access: false,
            display_order: 1,
            is_active: true,
            is_featured: false,
            features: json!([
                "Hasta 5 usuarios incluidos",
                "Hasta 20 usuarios adicionales",
                "1 empresa incluida",
                "Hasta 2 empresas totales",
                "5 GB de almacenamiento",
                "Backup automático diario",
                "Soporte estándar"
            ]),
        },
        NewPlan {
            slug: "profesional".to_string(),
            name: "Profesional".to_string(),
            description: Some("Plan completo para empresas en crecimiento".to_string()),
            monthly_price_cents: 79000,
            annual_price_cents: 790000,
            extra_user_monthly_cents: 6000,
            extra_user_annual_cents: 60000,
            extra_company_monthly_cents: 25000,
            extra_company_annual_cents: 250000,
            included_companies: 2,
            included_users: 10,
            allows_extra_companies: true,
            allows_extra_users: true,
            max_total_companies: Some(4),
            max_total_users: Some(40),
            storage_gb: 10,
            priority_support: true,
            auto_backup: true,
            api_access: true,
            display_order: 2,
            is_active: true,
            is_featured: true,
            features: json!([
                "Hasta 10 usuarios incluidos",
                "Hasta 40 usuarios adicionales",
                "Hasta 4 empresas adicionales",
                "10 GB de almacenamiento",
                "Backup automático diario",
                "API de integración",
                "Soporte prioritario"
            ]),
        },
        NewPlan {
            slug: "empresarial".to_string(),
            name: "Empresarial".to_string(),
            description: Some("Plan completo para grandes organizaciones".to_string()),
            monthly_price_cents: 149000,
            annual_price_cents: 1490000,
            extra_user_monthly_cents: 4000,
            extra_user_annual_cents: 40000,
            extra_company_monthly_cents: 20000,
            extra_company_annual_cents: 200000,
            included_companies: 3,
            included_users: 25,
            allows_extra_companies: true,
            allows_extra_users: true,
            max_total_companies: None,
            max_total_users: None,
            storage_gb: 50,
            priority_support: true,
            auto_backup: true,
            api_access: true,
            display_order: 3,
            is_active: true,
            is_featured: false,
            features: json!([
                "Hasta 25 usuarios incluidos",
                "Usuarios adicionales ilimitados",
                "Hasta 3 empresas incluidas",
                "Empresas adicionales ilimitadas",
                "50 GB de almacenamiento",
                "Backup automático cada 6 horas",
                "API completa",
                "Soporte prioritario 24/7",
                "Reportes avanzados"
            ]),
        },
        NewPlan {
            slug: "matriz-saas".to_string(),
            name: "Matriz SaaS".to_string(),
            description: Some("Plan especial para la empresa matriz del SaaS".to_string()),
            monthly_price_cents: 0,
            annual_price_cents: 0,
            extra_user_monthly_cents: 0,
            extra_user_annual_cents: 0,
            extra_company_monthly_cents: 0,
            extra_company_annual_cents: 0,
            included_companies: 999999,
            included_users: 999999,
            allows_extra_companies: true,
            allows_extra_users: true,
            max_total_companies: None,
            max_total_users: None,
            storage_gb: 999999,
            priority_support: true,
            auto_backup: true,
            api_access: true,
            display_order: 0,
            is_active: true,
            is_featured: false,
            features: json!([
                "Acceso ilimitado a todos los módulos",
                "Usuarios ilimitados",
                "Empresas ilimitadas",
                "Almacenamiento ilimitado",
                "Acceso completo de administración",
                "Plan especial para empresa matriz"
            ]),
        },
    ]
}

/// The built-in feature modules: five core plus the first business module
pub fn base_modules() -> Vec<NewModule> {
    vec![
        NewModule {
            slug: "dashboard".to_string(),
            name: "Dashboard".to_string(),
            description: Some("Panel principal con indicadores del negocio".to_string()),
            icon: Some("chart-bar".to_string()),
            display_order: 1,
            is_core: true,
        },
        NewModule {
            slug: "usuarios".to_string(),
            name: "Usuarios".to_string(),
            description: Some("Gestión de usuarios y accesos".to_string()),
            icon: Some("users".to_string()),
            display_order: 2,
            is_core: true,
        },
        NewModule {
            slug: "empresas".to_string(),
            name: "Empresas".to_string(),
            description: Some("Gestión de empresas y sucursales".to_string()),
            icon: Some("building".to_string()),
            display_order: 3,
            is_core: true,
        },
        NewModule {
            slug: "configuracion".to_string(),
            name: "Configuración".to_string(),
            description: Some("Configuración general del sistema".to_string()),
            icon: Some("cog".to_string()),
            display_order: 4,
            is_core: true,
        },
        NewModule {
            slug: "reportes".to_string(),
            name: "Reportes".to_string(),
            description: Some("Reportes e informes del negocio".to_string()),
            icon: Some("document-report".to_string()),
            display_order: 5,
            is_core: true,
        },
        NewModule {
            slug: "productos".to_string(),
            name: "Productos".to_string(),
            description: Some("Catálogo de productos e inventario".to_string()),
            icon: Some("cube".to_string()),
            display_order: 10,
            is_core: false,
        },
    ]
}

/// Bootstrap options. Passwords come from deployment configuration, never
/// from source.
#[derive(Debug, Clone)]
pub struct BootstrapOptions {
    pub super_admin_password: String,
    pub demo_password: String,
    pub seed_demo: bool,
}

/// What the bootstrap provisioned (or found already present)
#[derive(Debug, Clone)]
pub struct BootstrapOutcome {
    pub matrix_client: Client,
    pub matrix_company: Company,
    pub super_admin: User,
}

/// Idempotent platform provisioner
pub struct Bootstrap {
    pool: PgPool,
}

impl Bootstrap {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }

    pub async fn run(&self, options: &BootstrapOptions) -> EntitlementResult<BootstrapOutcome> {
        let catalog = PlanCatalog::new(self.pool.clone());
        let registry = ModuleRegistry::new(self.pool.clone());
        let clients = ClientService::new(self.pool.clone());
        let companies = CompanyService::new(self.pool.clone());
        let users = UserService::new(self.pool.clone());

        for plan in base_plans() {
            catalog.upsert_plan(plan).await?;
        }
        tracing::info!("Provisioned base plans");

        for module in base_modules() {
            registry.register_module(module).await?;
        }
        tracing::info!("Provisioned base modules");

        let matrix_client = self.find_or_create_matrix_client(&clients).await?;

        // Repair step: covers matrix rows that predate some modules
        clients.sync_matrix_modules().await?;

        let matrix_company = companies
            .find_or_create_by_name(
                matrix_client.id,
                MATRIX_COMPANY_NAME,
                NewCompany {
                    name: MATRIX_COMPANY_NAME.to_string(),
                    country_code: Some("CO".to_string()),
                    country: Some("Colombia".to_string()),
                    city: Some("Bogotá".to_string()),
                    address: Some("Cra 15 #93-07, Bogotá, Colombia".to_string()),
                    phone: Some("+57 300 123 4567".to_string()),
                    email: Some(SUPER_ADMIN_EMAIL.to_string()),
                    tax_id: Some("900123456-1".to_string()),
                    timezone: "America/Bogota".to_string(),
                    currency: "COP".to_string(),
                    config: json!({
                        "es_matriz": true,
                        "acceso_total_sistema": true,
                        "tipo": "Empresa Matriz SaaS"
                    }),
                },
            )
            .await?;

        let super_admin = users
            .find_or_create_by_email(
                matrix_company.id,
                SUPER_ADMIN_EMAIL,
                NewUser {
                    name: "Super Administrador".to_string(),
                    email: SUPER_ADMIN_EMAIL.to_string(),
                    password: options.super_admin_password.clone(),
                    kind: UserKind::SuperAdmin,
                },
                Some(SUPER_ADMIN_ROLE),
            )
            .await?;

        tracing::info!(
            matrix_client_id = %matrix_client.id,
            super_admin_id = %super_admin.id,
            "Matrix tenant ready"
        );

        if options.seed_demo {
            self.seed_demo_tenant(&clients, &companies, &users, &options.demo_password)
                .await?;
        }

        Ok(BootstrapOutcome {
            matrix_client,
            matrix_company,
            super_admin,
        })
    }

    async fn find_or_create_matrix_client(
        &self,
        clients: &ClientService,
    ) -> EntitlementResult<Client> {
        let profile = NewClient {
            name: MATRIX_COMPANY_NAME.to_string(),
            email: MATRIX_CLIENT_EMAIL.to_string(),
            phone: Some("+57 300 123 4567".to_string()),
            address: Some("Cra 15 #93-07, Bogotá, Colombia".to_string()),
            contact_name: Some("AG Development Team".to_string()),
            subscription_start: today(),
            subscription_end: None,
            metadata: json!({
                "es_matriz": true,
                "origen_suscripcion": "fundador",
                "acceso_total_sistema": true,
                "tipo_cliente": "matriz_saas"
            }),
        };

        match clients.create_client("matriz-saas", profile).await {
            Ok(client) => Ok(client),
            Err(EntitlementError::DuplicateEmail(_)) => {
                clients.get_client_by_email(MATRIX_CLIENT_EMAIL).await
            }
            Err(e) => Err(e),
        }
    }

    async fn seed_demo_tenant(
        &self,
        clients: &ClientService,
        companies: &CompanyService,
        users: &UserService,
        demo_password: &str,
    ) -> EntitlementResult<()> {
        let start = today();
        let end = one_year_after(start);

        let demo = match clients
            .create_client(
                "profesional",
                NewClient {
                    name: "Grupo Restaurantero ABC".to_string(),
                    email: "contacto@restauranteroabc.com".to_string(),
                    phone: Some("+52 55 1234 5678".to_string()),
                    address: Some("Av. Reforma 123, Ciudad de México".to_string()),
                    contact_name: Some("Carlos Mendoza".to_string()),
                    subscription_start: start,
                    subscription_end: Some(end),
                    metadata: json!({
                        "industria": "Restaurantes",
                        "tamaño": "Mediana empresa",
                        "notas": "Cliente piloto para testing del sistema"
                    }),
                },
            )
            .await
        {
            Ok(client) => client,
            Err(EntitlementError::DuplicateEmail(_)) => {
                clients
                    .get_client_by_email("contacto@restauranteroabc.com")
                    .await?
            }
            Err(e) => Err(e)?,
        };

        for slug in ["productos", "dashboard"] {
            clients
                .grant_module(
                    demo.id,
                    slug,
                    agsuite_shared::GrantTerms {
                        activated_on: start,
                        expires_on: Some(end),
                        config: None,
                    },
                )
                .await?;
        }

        let centro = companies
            .find_or_create_by_name(
                demo.id,
                "Restaurante Centro",
                NewCompany {
                    name: "Restaurante Centro".to_string(),
                    country_code: Some("MX".to_string()),
                    country: Some("México".to_string()),
                    city: Some("Ciudad de México".to_string()),
                    address: Some("Centro Histórico, CDMX".to_string()),
                    phone: Some("+52 55 1111 2222".to_string()),
                    email: Some("centro@restauranteroabc.com".to_string()),
                    tax_id: Some("RAB123456789".to_string()),
                    timezone: "America/Mexico_City".to_string(),
                    currency: "MXN".to_string(),
                    config: json!({
                        "horario_operacion": "09:00-22:00",
                        "capacidad": 100,
                        "tipo": "Restaurante principal"
                    }),
                },
            )
            .await?;

        let norte = companies
            .find_or_create_by_name(
                demo.id,
                "Restaurante Norte",
                NewCompany {
                    name: "Restaurante Norte".to_string(),
                    country_code: Some("MX".to_string()),
                    country: Some("México".to_string()),
                    city: Some("Monterrey".to_string()),
                    address: Some("Zona Norte, Monterrey, NL".to_string()),
                    phone: Some("+52 81 3333 4444".to_string()),
                    email: Some("norte@restauranteroabc.com".to_string()),
                    tax_id: Some("RAN987654321".to_string()),
                    timezone: "America/Mexico_City".to_string(),
                    currency: "MXN".to_string(),
                    config: json!({
                        "horario_operacion": "10:00-23:00",
                        "capacidad": 80,
                        "tipo": "Sucursal"
                    }),
                },
            )
            .await?;

        let members = [
            ("Juan Pérez", "juan.perez@restauranteroabc.com", centro.id),
            ("María López", "maria.lopez@restauranteroabc.com", centro.id),
            ("Ana García", "ana.garcia@restauranteroabc.com", norte.id),
        ];
        for (name, email, company_id) in members {
            users
                .find_or_create_by_email(
                    company_id,
                    email,
                    NewUser {
                        name: name.to_string(),
                        email: email.to_string(),
                        password: demo_password.to_string(),
                        kind: UserKind::Member,
                    },
                    None,
                )
                .await?;
        }

        tracing::info!(client_id = %demo.id, "Demo tenant ready");

        Ok(())
    }
}

fn today() -> Date {
    OffsetDateTime::now_utc().date()
}

fn one_year_after(start: Date) -> Date {
    start
        .replace_year(start.year() + 1)
        .unwrap_or_else(|_| start.saturating_add(Duration::days(365)))
}

#[cfg(test)]
mod tests {
    use super::*;
    use time::macros::date;

    #[test]
    fn test_base_plans_are_valid_and_ordered() {
        let plans = base_plans();
        assert_eq!(plans.len(), 4);
        for plan in &plans {
            assert!(plan.validate().is_ok(), "plan {} invalid", plan.slug);
        }

        let slugs: Vec<&str> = plans.iter().map(|p| p.slug.as_str()).collect();
        assert_eq!(slugs, ["basico", "profesional", "empresarial", "matriz-saas"]);

        // The matrix plan sorts first for display
        let matrix = &plans[3];
        assert_eq!(matrix.display_order, 0);
        assert_eq!(matrix.monthly_price_cents, 0);
        assert_eq!(matrix.included_companies, 999999);
        assert_eq!(matrix.max_total_companies, None);
        assert!(matrix.allows_extra_companies);
    }

    #[test]
    fn test_empresarial_has_unlimited_caps() {
        let plans = base_plans();
        let empresarial = plans.iter().find(|p| p.slug == "empresarial").unwrap();
        assert_eq!(empresarial.max_total_companies, None);
        assert_eq!(empresarial.max_total_users, None);
        assert!(empresarial.allows_extra_companies);
        assert!(empresarial.allows_extra_users);
    }

    #[test]
    fn test_base_modules_split() {
        let modules = base_modules();
        assert_eq!(modules.len(), 6);
        assert_eq!(modules.iter().filter(|m| m.is_core).count(), 5);

        let business: Vec<&str> = modules
            .iter()
            .filter(|m| !m.is_core)
            .map(|m| m.slug.as_str())
            .collect();
        assert_eq!(business, ["productos"]);
    }

    #[test]
    fn test_one_year_after() {
        assert_eq!(one_year_after(date!(2026 - 08 - 29)), date!(2027 - 08 - 29));
        // Leap day falls back to day arithmetic
        assert_eq!(one_year_after(date!(2028 - 02 - 29)), date!(2029 - 02 - 28));
    }
}

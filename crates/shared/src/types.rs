//! Common types used across AG Suite

use serde::{Deserialize, Serialize};
use sqlx::FromRow;
use time::{Date, OffsetDateTime};
use uuid::Uuid;

/// Metadata key flagging the distinguished matrix (platform operator) tenant.
/// The Spanish spelling is kept for compatibility with stored client data.
pub const MATRIX_METADATA_KEY: &str = "es_matriz";

// =============================================================================
// ID Wrappers
// =============================================================================

macro_rules! id_wrapper {
    ($(#[$doc:meta])* $name:ident) => {
        $(#[$doc])*
        #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, sqlx::Type)]
        #[serde(transparent)]
        #[sqlx(transparent)]
        pub struct $name(pub Uuid);

        impl $name {
            pub fn new() -> Self {
                Self(Uuid::new_v4())
            }
        }

        impl Default for $name {
            fn default() -> Self {
                Self::new()
            }
        }

        impl From<Uuid> for $name {
            fn from(id: Uuid) -> Self {
                Self(id)
            }
        }

        impl std::fmt::Display for $name {
            fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
                self.0.fmt(f)
            }
        }
    };
}

id_wrapper!(
    /// Plan ID wrapper
    PlanId
);
id_wrapper!(
    /// Module ID wrapper
    ModuleId
);
id_wrapper!(
    /// Client (tenant) ID wrapper
    ClientId
);
id_wrapper!(
    /// Company ID wrapper
    CompanyId
);
id_wrapper!(
    /// User ID wrapper
    UserId
);

// =============================================================================
// Enums
// =============================================================================

/// User type tag
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum UserKind {
    /// Platform operator account, owned by the matrix company
    SuperAdmin,
    /// Regular tenant-member account
    Member,
}

impl Default for UserKind {
    fn default() -> Self {
        Self::Member
    }
}

impl std::fmt::Display for UserKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::SuperAdmin => write!(f, "super_admin"),
            Self::Member => write!(f, "member"),
        }
    }
}

impl std::str::FromStr for UserKind {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_lowercase().as_str() {
            "super_admin" => Ok(Self::SuperAdmin),
            "member" => Ok(Self::Member),
            _ => Err(format!("Invalid user kind: {}", s)),
        }
    }
}

// =============================================================================
// Caps
// =============================================================================

/// Effective ceiling on how many companies or users a client may have
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Cap {
    /// No ceiling at all
    Unlimited,
    /// Hard ceiling on the total count
    AtMost(i64),
}

impl Cap {
    /// Whether one more item fits under this cap given the current count
    pub fn allows_one_more(&self, current: i64) -> bool {
        match self {
            Self::Unlimited => true,
            Self::AtMost(max) => current < *max,
        }
    }

    /// Remaining slots, None when unlimited
    pub fn remaining(&self, current: i64) -> Option<i64> {
        match self {
            Self::Unlimited => None,
            Self::AtMost(max) => Some((max - current).max(0)),
        }
    }
}

// =============================================================================
// Database Models
// =============================================================================

/// Subscription plan model
#[derive(Debug, Clone, Serialize, Deserialize, FromRow)]
pub struct Plan {
    pub id: PlanId,
    pub slug: String,
    pub name: String,
    pub description: Option<String>,
    pub monthly_price_cents: i64,
    pub annual_price_cents: i64,
    pub extra_user_monthly_cents: i64,
    pub extra_user_annual_cents: i64,
    pub extra_company_monthly_cents: i64,
    pub extra_company_annual_cents: i64,
    pub included_companies: i32,
    pub included_users: i32,
    pub allows_extra_companies: bool,
    pub allows_extra_users: bool,
    pub max_total_companies: Option<i32>,
    pub max_total_users: Option<i32>,
    pub storage_gb: i32,
    pub priority_support: bool,
    pub auto_backup: bool,
    pub api_access: bool,
    pub display_order: i32,
    pub is_active: bool,
    pub is_featured: bool,
    pub features: serde_json::Value,
    pub created_at: OffsetDateTime,
    pub updated_at: OffsetDateTime,
}

impl Plan {
    /// Effective company cap for this plan.
    ///
    /// A null hard cap alone does NOT mean unlimited: it is unlimited only
    /// when extra companies are purchasable; otherwise the cap collapses to
    /// the included limit.
    pub fn company_cap(&self) -> Cap {
        effective_cap(
            self.max_total_companies,
            self.allows_extra_companies,
            self.included_companies,
        )
    }

    /// Effective user cap for this plan. Same asymmetry as `company_cap`.
    pub fn user_cap(&self) -> Cap {
        effective_cap(
            self.max_total_users,
            self.allows_extra_users,
            self.included_users,
        )
    }
}

/// Compute an effective cap from (hard cap, add-on flag, included limit)
fn effective_cap(max_total: Option<i32>, allows_extra: bool, included: i32) -> Cap {
    match (max_total, allows_extra) {
        (Some(max), _) => Cap::AtMost(max as i64),
        (None, true) => Cap::Unlimited,
        (None, false) => Cap::AtMost(included as i64),
    }
}

/// Feature module model
#[derive(Debug, Clone, Serialize, Deserialize, FromRow)]
pub struct Module {
    pub id: ModuleId,
    pub slug: String,
    pub name: String,
    pub description: Option<String>,
    pub icon: Option<String>,
    pub display_order: i32,
    pub is_core: bool,
    pub is_active: bool,
    pub created_at: OffsetDateTime,
    pub updated_at: OffsetDateTime,
}

/// Client (tenant) model
#[derive(Debug, Clone, Serialize, Deserialize, FromRow)]
pub struct Client {
    pub id: ClientId,
    pub plan_id: PlanId,
    pub name: String,
    pub email: String,
    pub phone: Option<String>,
    pub address: Option<String>,
    pub contact_name: Option<String>,
    pub subscription_start: Date,
    /// None = subscription never expires
    pub subscription_end: Option<Date>,
    pub is_active: bool,
    pub metadata: serde_json::Value,
    pub created_at: OffsetDateTime,
    pub updated_at: OffsetDateTime,
}

impl Client {
    /// Whether this client is the distinguished matrix tenant.
    /// Accepts both a JSON boolean and the string "true" (legacy rows were
    /// written by a system that serialized metadata inconsistently).
    pub fn is_matrix(&self) -> bool {
        is_matrix_metadata(&self.metadata)
    }
}

/// Matrix-flag check over raw client metadata
pub fn is_matrix_metadata(metadata: &serde_json::Value) -> bool {
    match metadata.get(MATRIX_METADATA_KEY) {
        Some(serde_json::Value::Bool(b)) => *b,
        Some(serde_json::Value::String(s)) => s == "true",
        _ => false,
    }
}

/// Module grant: the join record linking a client to a module
#[derive(Debug, Clone, Serialize, Deserialize, FromRow)]
pub struct ModuleGrant {
    pub client_id: ClientId,
    pub module_id: ModuleId,
    pub is_active: bool,
    pub activated_on: Date,
    /// None = grant never expires
    pub expires_on: Option<Date>,
    pub config: Option<serde_json::Value>,
    pub created_at: OffsetDateTime,
    pub updated_at: OffsetDateTime,
}

impl ModuleGrant {
    /// Whether the grant confers access as of the given date
    pub fn is_active_as_of(&self, as_of: Date) -> bool {
        self.is_active && self.expires_on.map_or(true, |exp| exp >= as_of)
    }
}

/// Company model (operational business unit under a client)
#[derive(Debug, Clone, Serialize, Deserialize, FromRow)]
pub struct Company {
    pub id: CompanyId,
    pub client_id: ClientId,
    pub name: String,
    pub country_code: Option<String>,
    pub country: Option<String>,
    pub city: Option<String>,
    pub address: Option<String>,
    pub phone: Option<String>,
    pub email: Option<String>,
    pub tax_id: Option<String>,
    pub timezone: String,
    pub currency: String,
    pub is_active: bool,
    pub config: serde_json::Value,
    pub created_at: OffsetDateTime,
    pub updated_at: OffsetDateTime,
}

/// User model
#[derive(Debug, Clone, Serialize, Deserialize, FromRow)]
pub struct User {
    pub id: UserId,
    pub company_id: CompanyId,
    pub name: String,
    pub email: String,
    #[serde(skip_serializing)]
    pub password_hash: String,
    pub kind: String,
    pub is_active: bool,
    pub email_verified_at: Option<OffsetDateTime>,
    pub last_access_at: Option<OffsetDateTime>,
    pub created_at: OffsetDateTime,
    pub updated_at: OffsetDateTime,
}

impl User {
    /// Parse the user kind tag, defaulting unknown values to Member
    pub fn user_kind(&self) -> UserKind {
        self.kind.parse().unwrap_or_default()
    }
}

// =============================================================================
// Input Types
// =============================================================================

/// New plan attributes for catalog upserts
#[derive(Debug, Clone, Deserialize)]
pub struct NewPlan {
    pub slug: String,
    pub name: String,
    pub description: Option<String>,
    pub monthly_price_cents: i64,
    pub annual_price_cents: i64,
    pub extra_user_monthly_cents: i64,
    pub extra_user_annual_cents: i64,
    pub extra_company_monthly_cents: i64,
    pub extra_company_annual_cents: i64,
    pub included_companies: i32,
    pub included_users: i32,
    pub allows_extra_companies: bool,
    pub allows_extra_users: bool,
    pub max_total_companies: Option<i32>,
    pub max_total_users: Option<i32>,
    pub storage_gb: i32,
    pub priority_support: bool,
    pub auto_backup: bool,
    pub api_access: bool,
    pub display_order: i32,
    pub is_active: bool,
    pub is_featured: bool,
    pub features: serde_json::Value,
}

impl NewPlan {
    /// Caps, when set, must cover at least the included limits
    pub fn validate(&self) -> Result<(), crate::SuiteError> {
        if let Some(max) = self.max_total_companies {
            if max < self.included_companies {
                return Err(crate::SuiteError::Validation(format!(
                    "Plan '{}': company cap {} below included limit {}",
                    self.slug, max, self.included_companies
                )));
            }
        }
        if let Some(max) = self.max_total_users {
            if max < self.included_users {
                return Err(crate::SuiteError::Validation(format!(
                    "Plan '{}': user cap {} below included limit {}",
                    self.slug, max, self.included_users
                )));
            }
        }
        Ok(())
    }
}

/// New module attributes for registry upserts
#[derive(Debug, Clone, Deserialize)]
pub struct NewModule {
    pub slug: String,
    pub name: String,
    pub description: Option<String>,
    pub icon: Option<String>,
    pub display_order: i32,
    pub is_core: bool,
}

/// New client profile (plan is resolved separately by slug)
#[derive(Debug, Clone, Deserialize)]
pub struct NewClient {
    pub name: String,
    pub email: String,
    pub phone: Option<String>,
    pub address: Option<String>,
    pub contact_name: Option<String>,
    pub subscription_start: Date,
    pub subscription_end: Option<Date>,
    pub metadata: serde_json::Value,
}

/// Terms of a module grant
#[derive(Debug, Clone, Deserialize)]
pub struct GrantTerms {
    pub activated_on: Date,
    pub expires_on: Option<Date>,
    pub config: Option<serde_json::Value>,
}

/// New company attributes
#[derive(Debug, Clone, Deserialize)]
pub struct NewCompany {
    pub name: String,
    pub country_code: Option<String>,
    pub country: Option<String>,
    pub city: Option<String>,
    pub address: Option<String>,
    pub phone: Option<String>,
    pub email: Option<String>,
    pub tax_id: Option<String>,
    pub timezone: String,
    pub currency: String,
    pub config: serde_json::Value,
}

/// New user attributes. `password` is the plaintext credential; it is hashed
/// before persistence and never stored or logged as-is.
#[derive(Debug, Clone, Deserialize)]
pub struct NewUser {
    pub name: String,
    pub email: String,
    pub password: String,
    pub kind: UserKind,
}

// =============================================================================
// Tests
// =============================================================================

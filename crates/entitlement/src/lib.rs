//! AG Suite Entitlement Core
//!
//! The rules governing how a client (tenant) subscribes to a plan, which
//! modules it is entitled to, and how many companies and users it may
//! create. Plans and modules are reference data provisioned at deploy
//! time; clients own module grants and companies; users belong to
//! companies. The evaluator answers "may this client create one more
//! company/user, and which modules are active right now?".

pub mod bootstrap;
pub mod catalog;
pub mod clients;
pub mod companies;
pub mod error;
pub mod evaluator;
pub mod password;
pub mod registry;
pub mod roles;
pub mod users;

pub use bootstrap::{Bootstrap, BootstrapOptions, BootstrapOutcome};
pub use catalog::PlanCatalog;
pub use clients::ClientService;
pub use companies::CompanyService;
pub use error::{EntitlementError, EntitlementResult};
pub use evaluator::{EntitlementEvaluator, EntitlementSummary};
pub use registry::ModuleRegistry;
pub use roles::{NoopRoleAssigner, RoleAssigner};
pub use users::UserService;

//! Service definitions and per-service access policy.
//!
//! A [`ServiceDefinition`] names an upstream base URL, the hostnames the
//! gateway intercepts for it, the credential-injection recipe, and an
//! ordered rule list deciding which requests are forwarded silently and
//! which require a human decision. The [`ServiceTable`] is the live,
//! runtime-mutable view the proxy consults on every request; the admin
//! override surface replaces whole definitions atomically.

pub mod evaluator;
pub mod loader;
pub mod schema;
pub mod table;

pub use evaluator::resolve_action;
pub use loader::{validate_definition, validate_services, PolicyConfigError};
pub use schema::{CredentialRecipe, PolicyAction, PolicyRule, ServiceDefinition, ServicePolicy};
pub use table::ServiceTable;

//! The front proxy: terminates agent HTTP, authenticates the shared agent
//! key, resolves the target service by path prefix or intercept hostname,
//! walks the security pipeline (SSRF guard, policy, approval), injects the
//! real credential, forwards upstream, and streams the response back while
//! recording exactly one audit row per terminal outcome.

pub mod admin;
pub mod capture;
pub mod error;
pub mod headers;
pub mod introspect;
pub mod pipeline;
pub mod routing;
pub mod server;

pub use server::{build_router, AppState, CaptureConfig, GateState};

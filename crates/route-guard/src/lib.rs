//! Pure validation functions applied to every upstream destination the
//! gateway is asked to reach: the hostname allowlist, the private-address
//! block, the protocol whitelist, the runtime host-pin, and the redirect
//! re-check. Also hosts the IP/CIDR allowlist used by the admin surface.
//!
//! Nothing in this crate holds state; every check takes the policy and the
//! value under test and returns a result.

pub mod guard;
pub mod ipcheck;

pub use guard::{
    check_redirect, host_allowed, is_private_host, pin_host, resolves_privately, scheme_allowed,
    validate_upstream, GuardError, GuardPolicy,
};
pub use ipcheck::client_ip_allowed;

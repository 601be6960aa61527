//! Durable persistence for the gateway: the append-only request log, the
//! approval grants that survive restarts, the paired-approver registry, and
//! the service-override table written by the admin plane.
//!
//! Backed by a single SQLite database in WAL mode. The store is a
//! single-writer sink: every operation goes through one connection behind an
//! async mutex, which is ample for this workload (one row per proxied
//! request). Schema evolution is additive: missing nullable columns are
//! added at open without rewriting history.

pub mod record;
pub mod stats;
pub mod store;

pub use record::{ApprovalRow, NewRequest, OverrideRow, PairedApprover, RequestRecord};
pub use stats::{CountRow, DashboardStats};
pub use store::{AuditStore, StoreError};

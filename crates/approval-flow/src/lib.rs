//! The approval coordinator: per-service time-bounded grants, the registry
//! of requests waiting on a human decision, and the state machine that ties
//! them to the out-of-band notifier and the durable store.
//!
//! A request that resolves to `require_approval` either rides an existing
//! live grant or parks on a one-shot reply channel until the approver
//! decides or the pipeline deadline fires. Grants are persisted before they
//! are installed so a crash between the two leaves a row the next start
//! picks up.

pub mod coordinator;
pub mod grant;
pub mod pending;

pub use coordinator::{
    ApprovalCoordinator, ApprovalPrompter, PromptError, SEND_FAILURE_APPROVER, TIMEOUT_APPROVER,
    UNPAIRED_APPROVER,
};
pub use grant::Grant;
pub use pending::{ApprovalDecision, ApprovalPrompt, PendingRegistry};

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// One terminal request outcome, as returned to the introspection surface.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RequestRecord {
    pub id: i64,
    pub timestamp: DateTime<Utc>,
    pub service: String,
    pub method: String,
    pub path: String,
    pub approved: bool,
    pub response_status: Option<u16>,
    pub agent_ip: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub request_body: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub response_body: Option<String>,
}

/// Fields the pipeline supplies when appending a request row; id and
/// timestamp are assigned by the store.
#[derive(Debug, Clone)]
pub struct NewRequest {
    pub service: String,
    pub method: String,
    pub path: String,
    pub approved: bool,
    pub response_status: Option<u16>,
    pub agent_ip: String,
    pub request_body: Option<String>,
    pub response_body: Option<String>,
}

/// A persisted approval grant.
#[derive(Debug, Clone)]
pub struct ApprovalRow {
    pub id: i64,
    pub timestamp: DateTime<Utc>,
    pub service: String,
    pub approved_by: String,
    pub ttl_seconds: i64,
    pub expires_at: DateTime<Utc>,
    pub revoked: bool,
}

/// An approver chat identity admitted by the pairing handshake.
#[derive(Debug, Clone, Serialize)]
pub struct PairedApprover {
    pub chat_id: i64,
    pub name: String,
    pub paired_at: DateTime<Utc>,
}

/// A service definition written by the admin plane, stored as JSON.
#[derive(Debug, Clone)]
pub struct OverrideRow {
    pub service_name: String,
    pub config_json: String,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

use chrono::Local;
use uuid::Uuid;

use approval_flow::ApprovalPrompt;

use crate::api::{InlineKeyboardButton, InlineKeyboardMarkup};

/// The five approval choices plus deny, in button order.
const ACTIONS: [(&str, &str, i64); 6] = [
    ("approve_once", "Once", 1),
    ("approve_15m", "15m", 900),
    ("approve_1h", "1h", 3600),
    ("approve_8h", "8h", 28800),
    ("approve_24h", "24h", 86400),
    ("deny", "Deny", 0),
];

/// A parsed button tap.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PromptAction {
    Approve { ttl_seconds: i64 },
    Deny,
}

/// Render the approval prompt text.
pub fn render_prompt(prompt: &ApprovalPrompt) -> String {
    format!(
        "Approval required\n\
         Service: {}\n\
         Request: {} {}\n\
         Agent: {}\n\
         Time: {}\n\
         Id: {}",
        prompt.service,
        prompt.method,
        prompt.path,
        prompt.agent_ip,
        prompt
            .requested_at
            .with_timezone(&Local)
            .format("%Y-%m-%d %H:%M:%S"),
        prompt.request_id,
    )
}

/// The six-button keyboard for one pending approval. Each button carries
/// `<action>:<request_id>`.
pub fn ttl_keyboard(request_id: Uuid) -> InlineKeyboardMarkup {
    let buttons: Vec<InlineKeyboardButton> = ACTIONS
        .iter()
        .map(|(action, label, _)| InlineKeyboardButton {
            text: label.to_string(),
            callback_data: format!("{action}:{request_id}"),
        })
        .collect();
    // Approvals on the first row, deny alone on the second.
    let (approvals, deny) = buttons.split_at(5);
    InlineKeyboardMarkup {
        inline_keyboard: vec![approvals.to_vec(), deny.to_vec()],
    }
}

/// Parse `<action>:<request_id>` callback data.
pub fn parse_callback(data: &str) -> Option<(PromptAction, Uuid)> {
    let (action, id) = data.split_once(':')?;
    let id = Uuid::parse_str(id).ok()?;
    if action == "deny" {
        return Some((PromptAction::Deny, id));
    }
    ACTIONS
        .iter()
        .find(|(name, _, _)| *name == action && action.starts_with("approve_"))
        .map(|(_, _, ttl)| (PromptAction::Approve { ttl_seconds: *ttl }, id))
}

/// Human label for an approval TTL, used when editing the prompt.
pub fn ttl_label(ttl_seconds: i64) -> &'static str {
    ACTIONS
        .iter()
        .find(|(_, _, ttl)| *ttl == ttl_seconds)
        .map(|(_, label, _)| *label)
        .unwrap_or("?")
}

/// Text the original prompt is edited to once decided.
pub fn render_decision(original: &str, approved: bool, ttl_seconds: i64, approver: &str) -> String {
    if approved {
        format!(
            "{original}\n\nApproved for {} by {approver}",
            ttl_label(ttl_seconds)
        )
    } else {
        format!("{original}\n\nDenied by {approver}")
    }
}

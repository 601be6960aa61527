use std::collections::HashMap;
use std::sync::{Arc, Mutex};

use async_trait::async_trait;
use tokio::sync::broadcast;
use tracing::{debug, error, info, warn};
use uuid::Uuid;

use approval_flow::{
    ApprovalDecision, ApprovalPrompt, ApprovalPrompter, PendingRegistry, PromptError,
    UNPAIRED_APPROVER,
};
use audit_store::AuditStore;

use crate::api::{CallbackQuery, ChatApi, Message, Update};
use crate::prompt::{parse_callback, render_decision, render_prompt, ttl_keyboard, PromptAction};

#[derive(Debug, Clone)]
pub struct NotifierConfig {
    /// Chat the prompts are pushed into.
    pub chat_id: i64,
    /// Whether approvers must pair before their decisions count.
    pub pairing_enabled: bool,
    /// Secret presented via `/pair`.
    pub pairing_secret: Option<String>,
}

/// The Telegram-facing half of the approval flow.
///
/// Outbound, it renders prompts and pushes them into the configured chat
/// (the [`ApprovalPrompter`] impl). Inbound, [`Notifier::run`] long-polls
/// for button taps and commands and routes them into the pending registry.
pub struct Notifier {
    api: Arc<dyn ChatApi>,
    config: NotifierConfig,
    pending: Arc<PendingRegistry>,
    store: AuditStore,
    /// request id -> (message id, rendered prompt) for the decision edit.
    sent_prompts: Mutex<HashMap<Uuid, (i64, String)>>,
}

impl Notifier {
    pub fn new(
        api: Arc<dyn ChatApi>,
        config: NotifierConfig,
        pending: Arc<PendingRegistry>,
        store: AuditStore,
    ) -> Self {
        Self {
            api,
            config,
            pending,
            store,
            sent_prompts: Mutex::new(HashMap::new()),
        }
    }

    /// Long-poll for updates until the shutdown signal arrives.
    pub async fn run(self: Arc<Self>, mut shutdown: broadcast::Receiver<()>) {
        let mut offset = 0i64;
        info!(chat_id = self.config.chat_id, "notifier polling started");
        loop {
            let updates = tokio::select! {
                _ = shutdown.recv() => {
                    info!("notifier polling stopped");
                    return;
                }
                result = self.api.get_updates(offset, 30) => match result {
                    Ok(updates) => updates,
                    Err(err) => {
                        warn!(%err, "getUpdates failed; backing off");
                        tokio::time::sleep(std::time::Duration::from_secs(3)).await;
                        continue;
                    }
                },
            };

            for update in updates {
                offset = offset.max(update.update_id + 1);
                self.handle_update(update).await;
            }
        }
    }

    pub async fn handle_update(&self, update: Update) {
        if let Some(message) = update.message {
            self.handle_message(message).await;
        } else if let Some(query) = update.callback_query {
            self.handle_callback(query).await;
        }
    }

    // -- commands -----------------------------------------------------------

    async fn handle_message(&self, message: Message) {
        let Some(text) = message.text.as_deref() else {
            return;
        };
        let Some(from) = message.from.clone() else {
            return;
        };
        let chat_id = message.chat.id;
        debug!(chat_id, from = %from.display_name(), text, "chat command");

        let mut parts = text.split_whitespace();
        let reply = match parts.next() {
            Some("/pair") => {
                self.pair(from.id, &from.display_name(), parts.next().unwrap_or(""))
                    .await
            }
            Some("/unpair") => self.unpair(from.id).await,
            Some("/status") => self.pairing_status(from.id).await,
            _ => return,
        };

        if let Err(err) = self.api.send_message(chat_id, &reply, None).await {
            warn!(%err, "failed to send command reply");
        }
    }

    async fn pair(&self, chat_id: i64, name: &str, presented: &str) -> String {
        if !self.config.pairing_enabled {
            return "Pairing is not enabled on this gateway.".to_string();
        }
        let expected = self.config.pairing_secret.as_deref().unwrap_or_default();
        if expected.is_empty() || presented != expected {
            warn!(chat_id, "pairing attempt with wrong secret");
            return "Wrong pairing secret.".to_string();
        }
        match self.store.pair_approver(chat_id, name).await {
            Ok(()) => {
                info!(chat_id, name, "approver paired");
                format!("Paired as {name}. You can now decide approval requests.")
            }
            Err(err) => {
                error!(%err, "failed to persist pairing");
                "Pairing failed; try again.".to_string()
            }
        }
    }

    async fn unpair(&self, chat_id: i64) -> String {
        match self.store.unpair_approver(chat_id).await {
            Ok(true) => {
                info!(chat_id, "approver unpaired");
                "Unpaired.".to_string()
            }
            Ok(false) => "You were not paired.".to_string(),
            Err(err) => {
                error!(%err, "failed to persist unpairing");
                "Unpairing failed; try again.".to_string()
            }
        }
    }

    async fn pairing_status(&self, chat_id: i64) -> String {
        if !self.config.pairing_enabled {
            return "Pairing is disabled; any member of this chat may decide.".to_string();
        }
        match self.store.is_paired(chat_id).await {
            Ok(true) => "You are paired.".to_string(),
            Ok(false) => "You are not paired. Send /pair <secret> to pair.".to_string(),
            Err(err) => {
                error!(%err, "pairing lookup failed");
                "Status unavailable; try again.".to_string()
            }
        }
    }

    // -- decisions ----------------------------------------------------------

    async fn handle_callback(&self, query: CallbackQuery) {
        let answer = |text: &'static str| {
            let api = Arc::clone(&self.api);
            let query_id = query.id.clone();
            async move {
                if let Err(err) = api.answer_callback_query(&query_id, text).await {
                    warn!(%err, "failed to answer callback query");
                }
            }
        };

        let Some((action, request_id)) = query.data.as_deref().and_then(parse_callback) else {
            answer("Unrecognized action.").await;
            return;
        };

        let paired = if self.config.pairing_enabled {
            self.store.is_paired(query.from.id).await.unwrap_or(false)
        } else {
            true
        };

        // An unpaired sender may not grant access, but a deny is honored
        // fail-closed and attributed to the sentinel identity.
        let decision = match (action, paired) {
            (PromptAction::Approve { .. }, false) => {
                warn!(sender = query.from.id, %request_id, "unpaired approval attempt refused");
                answer("You are not paired. Send /pair <secret> first.").await;
                return;
            }
            (PromptAction::Deny, false) => ApprovalDecision {
                approved: false,
                ttl_seconds: 0,
                approver: UNPAIRED_APPROVER.to_string(),
            },
            (PromptAction::Approve { ttl_seconds }, true) => ApprovalDecision {
                approved: true,
                ttl_seconds,
                approver: query.from.display_name(),
            },
            (PromptAction::Deny, true) => ApprovalDecision {
                approved: false,
                ttl_seconds: 0,
                approver: query.from.display_name(),
            },
        };

        let Some(_prompt) = self.pending.fulfill(request_id, decision.clone()) else {
            answer("This request already expired.").await;
            return;
        };

        info!(
            %request_id,
            approver = %decision.approver,
            approved = decision.approved,
            "decision routed"
        );
        answer("Recorded.").await;

        // Edit the original prompt to show the outcome.
        let sent = self
            .sent_prompts
            .lock()
            .expect("sent prompts lock poisoned")
            .remove(&request_id);
        if let Some((message_id, original)) = sent {
            let text = render_decision(
                &original,
                decision.approved,
                decision.ttl_seconds,
                &decision.approver,
            );
            if let Err(err) = self
                .api
                .edit_message_text(self.config.chat_id, message_id, &text)
                .await
            {
                warn!(%err, "failed to edit prompt with decision");
            }
        }
    }
}

#[async_trait]
impl ApprovalPrompter for Notifier {
    async fn prompt(&self, prompt: &ApprovalPrompt) -> Result<(), PromptError> {
        let text = render_prompt(prompt);
        let keyboard = ttl_keyboard(prompt.request_id);
        let message_id = self
            .api
            .send_message(self.config.chat_id, &text, Some(keyboard))
            .await
            .map_err(|err| PromptError(err.to_string()))?;
        self.sent_prompts
            .lock()
            .expect("sent prompts lock poisoned")
            .insert(prompt.request_id, (message_id, text));
        Ok(())
    }
}

use std::time::Duration;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use serde_json::json;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum ApiError {
    #[error("transport error: {0}")]
    Transport(#[from] reqwest::Error),

    #[error("Telegram API rejected the call: {0}")]
    Rejected(String),
}

// Typed subset of the Bot API objects the gateway touches.

#[derive(Debug, Clone, Deserialize)]
pub struct Update {
    pub update_id: i64,
    #[serde(default)]
    pub message: Option<Message>,
    #[serde(default)]
    pub callback_query: Option<CallbackQuery>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct Message {
    pub message_id: i64,
    pub chat: Chat,
    #[serde(default)]
    pub from: Option<User>,
    #[serde(default)]
    pub text: Option<String>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct Chat {
    pub id: i64,
}

#[derive(Debug, Clone, Deserialize)]
pub struct User {
    pub id: i64,
    pub first_name: String,
    #[serde(default)]
    pub username: Option<String>,
}

impl User {
    /// The name shown in prompts and recorded as the approver identity.
    pub fn display_name(&self) -> String {
        self.username
            .as_ref()
            .map(|u| format!("@{u}"))
            .unwrap_or_else(|| self.first_name.clone())
    }
}

#[derive(Debug, Clone, Deserialize)]
pub struct CallbackQuery {
    pub id: String,
    pub from: User,
    #[serde(default)]
    pub message: Option<Message>,
    #[serde(default)]
    pub data: Option<String>,
}

#[derive(Debug, Clone, Serialize)]
pub struct InlineKeyboardMarkup {
    pub inline_keyboard: Vec<Vec<InlineKeyboardButton>>,
}

#[derive(Debug, Clone, Serialize)]
pub struct InlineKeyboardButton {
    pub text: String,
    pub callback_data: String,
}

/// The outbound half of the chat transport. Implemented over HTTP by
/// [`TelegramApi`]; tests substitute a recording fake.
#[async_trait]
pub trait ChatApi: Send + Sync {
    /// Send a message, returning its id so it can be edited later.
    async fn send_message(
        &self,
        chat_id: i64,
        text: &str,
        keyboard: Option<InlineKeyboardMarkup>,
    ) -> Result<i64, ApiError>;

    async fn edit_message_text(
        &self,
        chat_id: i64,
        message_id: i64,
        text: &str,
    ) -> Result<(), ApiError>;

    async fn answer_callback_query(&self, query_id: &str, text: &str) -> Result<(), ApiError>;

    /// Long-poll for updates past `offset`.
    async fn get_updates(&self, offset: i64, timeout_secs: u64) -> Result<Vec<Update>, ApiError>;
}

/// Every Bot API response wraps its payload in this envelope.
#[derive(Debug, Deserialize)]
struct Envelope<T> {
    ok: bool,
    #[serde(default)]
    result: Option<T>,
    #[serde(default)]
    description: Option<String>,
}

impl<T> Envelope<T> {
    fn into_result(self) -> Result<T, ApiError> {
        if self.ok {
            self.result
                .ok_or_else(|| ApiError::Rejected("ok response without result".to_string()))
        } else {
            Err(ApiError::Rejected(
                self.description
                    .unwrap_or_else(|| "no description".to_string()),
            ))
        }
    }
}

#[derive(Debug, Default, Deserialize)]
struct SentMessage {
    message_id: i64,
}

/// Bot API client. One reqwest client, the bot token baked into the base
/// URL.
pub struct TelegramApi {
    client: reqwest::Client,
    base: String,
}

impl TelegramApi {
    pub fn new(bot_token: &str) -> Result<Self, ApiError> {
        // The long-poll timeout rides on top of this; leave headroom.
        let client = reqwest::Client::builder()
            .timeout(Duration::from_secs(40))
            .build()?;
        Ok(Self {
            client,
            base: format!("https://api.telegram.org/bot{bot_token}"),
        })
    }

    async fn call<T: serde::de::DeserializeOwned + Default>(
        &self,
        method: &str,
        body: serde_json::Value,
    ) -> Result<T, ApiError> {
        let envelope: Envelope<T> = self
            .client
            .post(format!("{}/{method}", self.base))
            .json(&body)
            .send()
            .await?
            .json()
            .await?;
        envelope.into_result()
    }
}

#[async_trait]
impl ChatApi for TelegramApi {
    async fn send_message(
        &self,
        chat_id: i64,
        text: &str,
        keyboard: Option<InlineKeyboardMarkup>,
    ) -> Result<i64, ApiError> {
        let mut body = json!({ "chat_id": chat_id, "text": text });
        if let Some(keyboard) = keyboard {
            body["reply_markup"] = serde_json::to_value(&keyboard)
                .map_err(|e| ApiError::Rejected(e.to_string()))?;
        }
        let sent: SentMessage = self.call("sendMessage", body).await?;
        Ok(sent.message_id)
    }

    async fn edit_message_text(
        &self,
        chat_id: i64,
        message_id: i64,
        text: &str,
    ) -> Result<(), ApiError> {
        // editMessageText returns the edited message; we only care that the
        // call succeeded.
        let _: serde_json::Value = self
            .call(
                "editMessageText",
                json!({ "chat_id": chat_id, "message_id": message_id, "text": text }),
            )
            .await?;
        Ok(())
    }

    async fn answer_callback_query(&self, query_id: &str, text: &str) -> Result<(), ApiError> {
        let _: serde_json::Value = self
            .call(
                "answerCallbackQuery",
                json!({ "callback_query_id": query_id, "text": text }),
            )
            .await?;
        Ok(())
    }

    async fn get_updates(&self, offset: i64, timeout_secs: u64) -> Result<Vec<Update>, ApiError> {
        self.call(
            "getUpdates",
            json!({
                "offset": offset,
                "timeout": timeout_secs,
                "allowed_updates": ["message", "callback_query"],
            }),
        )
        .await
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn envelope_ok_unwraps_result() {
        let raw = r#"{"ok":true,"result":{"message_id":7}}"#;
        let env: Envelope<SentMessage> = serde_json::from_str(raw).unwrap();
        assert_eq!(env.into_result().unwrap().message_id, 7);
    }

    #[test]
    fn envelope_error_carries_description() {
        let raw = r#"{"ok":false,"description":"Bad Request: chat not found"}"#;
        let env: Envelope<SentMessage> = serde_json::from_str(raw).unwrap();
        let err = env.into_result().unwrap_err();
        assert!(err.to_string().contains("chat not found"));
    }

    #[test]
    fn update_with_callback_query_parses() {
        let raw = r#"{
            "update_id": 10,
            "callback_query": {
                "id": "q1",
                "from": {"id": 42, "first_name": "Alice", "username": "alice"},
                "message": {"message_id": 3, "chat": {"id": -100}},
                "data": "deny:5e0c7f1e-0000-0000-0000-000000000000"
            }
        }"#;
        let update: Update = serde_json::from_str(raw).unwrap();
        let cq = update.callback_query.unwrap();
        assert_eq!(cq.from.display_name(), "@alice");
        assert_eq!(cq.message.unwrap().chat.id, -100);
        assert!(cq.data.unwrap().starts_with("deny:"));
    }

    #[test]
    fn display_name_falls_back_to_first_name() {
        let user = User {
            id: 1,
            first_name: "Bob".to_string(),
            username: None,
        };
        assert_eq!(user.display_name(), "Bob");
    }
}

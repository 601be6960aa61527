//! Out-of-band approval channel over the Telegram Bot API.
//!
//! Pushes approval prompts (six inline buttons: five TTL choices and a
//! deny) into a configured chat, long-polls for the approver's taps and
//! commands, enforces pairing, and routes each decision back to the pending
//! approval it belongs to. The Bot API surface is behind the [`ChatApi`]
//! trait so the routing logic is testable without the network.

pub mod api;
pub mod bot;
pub mod prompt;

pub use api::{ApiError, ChatApi, TelegramApi};
pub use bot::{Notifier, NotifierConfig};

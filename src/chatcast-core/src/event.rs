//! Inbound chat events.

use serde::{Deserialize, Serialize};

use crate::character::ChatIdentity;

/// Everything a chat connector can deliver to the bot.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "event", rename_all = "snake_case")]
pub enum ChatEvent {
    /// The connection is authenticated and channels can be joined.
    Ready,
    Message(ChatMessage),
    Command(ChatCommand),
}

/// A regular chat line.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ChatMessage {
    pub user: ChatIdentity,
    pub text: String,
    #[serde(default)]
    pub is_subscriber: bool,
}

impl ChatMessage {
    pub fn new(user: impl Into<ChatIdentity>, text: impl Into<String>, is_subscriber: bool) -> Self {
        Self {
            user: user.into(),
            text: text.into(),
            is_subscriber,
        }
    }
}

/// A prefixed command such as `!roll 2d6`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ChatCommand {
    pub user: ChatIdentity,
    /// Command name without prefix, lowercased.
    pub name: String,
    /// Everything after the name, trimmed.
    #[serde(default)]
    pub parameter: String,
    #[serde(default)]
    pub is_broadcaster: bool,
    /// Platform id of the invoking message, used to thread replies.
    #[serde(default)]
    pub message_id: Option<String>,
}

impl ChatCommand {
    pub fn new(
        user: impl Into<ChatIdentity>,
        name: impl Into<String>,
        parameter: impl Into<String>,
        is_broadcaster: bool,
    ) -> Self {
        Self {
            user: user.into(),
            name: name.into().to_lowercase(),
            parameter: parameter.into().trim().to_string(),
            is_broadcaster,
            message_id: None,
        }
    }

    /// Split `text` into a command if it starts with `prefix` followed by
    /// one of `known` names. Anything else is an ordinary message.
    pub fn parse(
        user: &ChatIdentity,
        text: &str,
        prefix: &str,
        known: &[&str],
        is_broadcaster: bool,
    ) -> Option<Self> {
        let rest = text.trim().strip_prefix(prefix)?;
        let (name, parameter) = rest.split_once(char::is_whitespace).unwrap_or((rest, ""));
        let name = name.to_lowercase();
        if !known.contains(&name.as_str()) {
            return None;
        }

        Some(Self::new(user.clone(), name, parameter, is_broadcaster))
    }
}

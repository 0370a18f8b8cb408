//! Character and chat identity definitions.
//!
//! A character is a persona (voice plus optional image prompt) that one chat
//! speaker at a time can be cast as.

use serde::{Deserialize, Serialize};
use std::fmt;

/// Handle of a chat user. Compared case-insensitively, since chat platforms
/// treat `Alice` and `alice` as the same account.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(from = "String", into = "String")]
pub struct ChatIdentity(String);

impl ChatIdentity {
    pub fn new(handle: impl AsRef<str>) -> Self {
        Self(handle.as_ref().trim().to_lowercase())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl From<String> for ChatIdentity {
    fn from(value: String) -> Self {
        Self::new(value)
    }
}

impl From<&str> for ChatIdentity {
    fn from(value: &str) -> Self {
        Self::new(value)
    }
}

impl From<ChatIdentity> for String {
    fn from(value: ChatIdentity) -> Self {
        value.0
    }
}

impl fmt::Display for ChatIdentity {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

fn default_speed() -> f32 {
    1.0
}

/// A persona from the configured roster.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct Character {
    /// Stable identifier, unique within the roster.
    pub id: String,
    /// Display name announced in chat and overlays.
    pub name: String,
    /// Voice ID for TTS.
    pub voice: String,
    /// Prompt describing the character portrait, used for image generation.
    #[serde(default)]
    pub image_prompt: Option<String>,
    /// Playback speed multiplier applied to synthesized speech.
    #[serde(default = "default_speed")]
    pub speed: f32,
    /// Only subscribers may be cast as this character.
    #[serde(default)]
    pub subscribers_only: bool,
}

impl Character {
    /// Create a new character with the given id, name and voice.
    pub fn new(id: impl Into<String>, name: impl Into<String>, voice: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            name: name.into(),
            voice: voice.into(),
            image_prompt: None,
            speed: default_speed(),
            subscribers_only: false,
        }
    }

    pub fn with_image_prompt(mut self, prompt: impl Into<String>) -> Self {
        self.image_prompt = Some(prompt.into());
        self
    }

    pub fn with_speed(mut self, speed: f32) -> Self {
        self.speed = speed;
        self
    }

    /// Restrict this character to subscribers.
    pub fn subscribers_only(mut self) -> Self {
        self.subscribers_only = true;
        self
    }

    /// Whether a speaker with the given subscriber status may take this character.
    pub fn is_eligible(&self, is_subscriber: bool) -> bool {
        is_subscriber || !self.subscribers_only
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_identity_is_case_insensitive() {
        assert_eq!(ChatIdentity::new("Alice"), ChatIdentity::new(" alice "));
        assert_eq!(ChatIdentity::from("BOB").as_str(), "bob");
    }

    #[test]
    fn test_subscriber_eligibility() {
        let open = Character::new("knight", "Sir Reginald", "bm_george");
        let locked = Character::new("queen", "The Queen", "bf_emma").subscribers_only();

        assert!(open.is_eligible(false));
        assert!(open.is_eligible(true));
        assert!(!locked.is_eligible(false));
        assert!(locked.is_eligible(true));
    }
}

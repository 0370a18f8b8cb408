//! Configuration module for loading TOML config files.

use serde::Deserialize;
use std::collections::HashSet;
use std::fs;
use std::path::{Path, PathBuf};
use std::time::Duration;

use crate::character::{Character, ChatIdentity};
use crate::dice::{DEFAULT_MAX_DICE, DEFAULT_MAX_SIDES, DiceSpec};
use crate::error::ChatCastError;
use crate::playback::QueueTiming;

/// Root configuration structure.
#[derive(Debug, Clone, Deserialize)]
pub struct Config {
    #[serde(default)]
    pub bot: BotConfig,
    #[serde(default)]
    pub playback: PlaybackConfig,
    #[serde(default)]
    pub media: MediaConfig,
    #[serde(default)]
    pub dice: DiceConfig,
    #[serde(default = "default_roster")]
    pub characters: Vec<Character>,
}

/// Chat-side settings.
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct BotConfig {
    pub channel: String,
    pub command_prefix: String,
    /// Accounts whose messages are never voiced (other bots, usually).
    pub ignored_users: Vec<String>,
}

impl Default for BotConfig {
    fn default() -> Self {
        Self {
            channel: String::new(),
            command_prefix: "!".to_string(),
            ignored_users: vec!["nightbot".to_string(), "streamelements".to_string()],
        }
    }
}

impl BotConfig {
    pub fn ignored_identities(&self) -> HashSet<ChatIdentity> {
        self.ignored_users.iter().map(ChatIdentity::new).collect()
    }
}

/// Queue timing and message handling.
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct PlaybackConfig {
    pub tick_ms: u64,
    pub generation_timeout_secs: u64,
    pub ready_timeout_secs: u64,
    pub chars_per_second: f32,
    pub min_duration_ms: u64,
    pub gap_ms: u64,
    pub max_concurrent_generations: usize,
    pub max_message_chars: usize,
}

impl Default for PlaybackConfig {
    fn default() -> Self {
        Self {
            tick_ms: 100,
            generation_timeout_secs: 30,
            ready_timeout_secs: 120,
            chars_per_second: 14.0,
            min_duration_ms: 1500,
            gap_ms: 500,
            max_concurrent_generations: 2,
            max_message_chars: 200,
        }
    }
}

impl PlaybackConfig {
    pub fn tick_interval(&self) -> Duration {
        Duration::from_millis(self.tick_ms)
    }

    pub fn min_duration(&self) -> Duration {
        Duration::from_millis(self.min_duration_ms)
    }

    pub fn queue_timing(&self) -> QueueTiming {
        QueueTiming {
            generation_timeout: Duration::from_secs(self.generation_timeout_secs),
            ready_timeout: Duration::from_secs(self.ready_timeout_secs),
            gap: Duration::from_millis(self.gap_ms),
        }
    }
}

/// Where generated media goes and how it is produced.
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct MediaConfig {
    pub scratch_dir: PathBuf,
    pub image: ImageConfig,
}

impl Default for MediaConfig {
    fn default() -> Self {
        Self {
            scratch_dir: PathBuf::from("local"),
            image: ImageConfig::default(),
        }
    }
}

/// Portrait generation settings.
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct ImageConfig {
    pub enabled: bool,
    pub model: String,
    pub size: String,
    /// Placeholders: `{name}`, `{description}`, `{text}`.
    pub prompt_template: String,
}

impl Default for ImageConfig {
    fn default() -> Self {
        Self {
            enabled: false,
            model: "dall-e-2".to_string(),
            size: "512x512".to_string(),
            prompt_template: "{description}, speaking the words \"{text}\", digital painting"
                .to_string(),
        }
    }
}

/// Dice used by a bare `roll` and the limits on custom rolls.
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct DiceConfig {
    pub count: u32,
    pub sides: u32,
    pub bonus: i32,
    pub max_dice: u32,
    pub max_sides: u32,
}

impl Default for DiceConfig {
    fn default() -> Self {
        let spec = DiceSpec::default();
        Self {
            count: spec.count,
            sides: spec.sides,
            bonus: spec.bonus,
            max_dice: DEFAULT_MAX_DICE,
            max_sides: DEFAULT_MAX_SIDES,
        }
    }
}

impl DiceConfig {
    pub fn default_spec(&self) -> DiceSpec {
        DiceSpec::new(self.count, self.sides, self.bonus)
    }
}

impl Config {
    /// Load configuration from a TOML file.
    pub fn load<P: AsRef<Path>>(path: P) -> Result<Self, ChatCastError> {
        let content = fs::read_to_string(path.as_ref())
            .map_err(|e| ChatCastError::ConfigError(format!("Failed to read config: {}", e)))?;

        Self::from_str(&content)
    }

    /// Load configuration from string content.
    pub fn from_str(content: &str) -> Result<Self, ChatCastError> {
        let config: Config = toml::from_str(content)
            .map_err(|e| ChatCastError::ConfigError(format!("Failed to parse config: {}", e)))?;
        config.validate()?;
        Ok(config)
    }

    /// Reject configurations the bot cannot run with.
    pub fn validate(&self) -> Result<(), ChatCastError> {
        if self.characters.is_empty() {
            return Err(ChatCastError::ConfigError(
                "At least one character is required".to_string(),
            ));
        }

        let mut ids = HashSet::new();
        for character in &self.characters {
            if !ids.insert(character.id.as_str()) {
                return Err(ChatCastError::ConfigError(format!(
                    "Duplicate character id '{}'",
                    character.id
                )));
            }
            if !positive_finite(character.speed) {
                return Err(ChatCastError::ConfigError(format!(
                    "Character '{}' needs a positive speed",
                    character.id
                )));
            }
        }

        if self.playback.tick_ms == 0 {
            return Err(ChatCastError::ConfigError(
                "playback.tick_ms must be positive".to_string(),
            ));
        }
        if !positive_finite(self.playback.chars_per_second) {
            return Err(ChatCastError::ConfigError(
                "playback.chars_per_second must be a positive number".to_string(),
            ));
        }
        if self.playback.max_concurrent_generations == 0 {
            return Err(ChatCastError::ConfigError(
                "playback.max_concurrent_generations must be positive".to_string(),
            ));
        }
        if self.dice.count == 0 || self.dice.sides == 0 {
            return Err(ChatCastError::ConfigError(
                "Default dice need at least one die with one side".to_string(),
            ));
        }
        if self.dice.count > self.dice.max_dice || self.dice.sides > self.dice.max_sides {
            return Err(ChatCastError::ConfigError(format!(
                "Default dice {} exceed the roll limits of {} dice with {} sides",
                self.dice.default_spec(),
                self.dice.max_dice,
                self.dice.max_sides
            )));
        }

        Ok(())
    }
}

fn positive_finite(value: f32) -> bool {
    value.is_finite() && value > 0.0
}

/// Default configuration embedded in the binary.
pub fn default_config() -> Config {
    Config {
        bot: BotConfig::default(),
        playback: PlaybackConfig::default(),
        media: MediaConfig::default(),
        dice: DiceConfig::default(),
        characters: default_roster(),
    }
}

fn default_roster() -> Vec<Character> {
    vec![
        Character::new("knight", "Sir Reginald", "bm_george")
            .with_image_prompt("a stout knight in dented plate armour"),
        Character::new("bard", "Emma the Bard", "bf_emma")
            .with_image_prompt("a cheerful bard holding a lute")
            .with_speed(1.1),
        Character::new("wizard", "Old Lewis", "bm_lewis")
            .with_image_prompt("an old wizard with a long grey beard")
            .with_speed(0.9),
        Character::new("rogue", "Sky", "af_sky")
            .with_image_prompt("a hooded rogue lurking in shadows"),
        Character::new("queen", "Queen Isabella", "bf_isabella")
            .with_image_prompt("a regal queen on a golden throne")
            .subscribers_only(),
    ]
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_config_is_valid() {
        let config = default_config();
        assert!(config.validate().is_ok());
        assert_eq!(config.playback.tick_interval(), Duration::from_millis(100));
        assert_eq!(config.dice.default_spec(), DiceSpec::new(1, 20, 0));
    }

    #[test]
    fn test_minimal_toml_uses_defaults() {
        let config = Config::from_str("[bot]\nchannel = \"mychannel\"\n").unwrap();
        assert_eq!(config.bot.channel, "mychannel");
        assert_eq!(config.bot.command_prefix, "!");
        assert_eq!(config.characters.len(), 5);
        assert_eq!(config.media.scratch_dir, PathBuf::from("local"));
    }

    #[test]
    fn test_full_toml() {
        let toml = r#"
            [bot]
            channel = "dungeon"
            ignored_users = ["Nightbot"]

            [playback]
            tick_ms = 50
            gap_ms = 0

            [dice]
            count = 2
            sides = 6
            bonus = 1

            [[characters]]
            id = "a"
            name = "Alpha"
            voice = "af_sky"

            [[characters]]
            id = "b"
            name = "Beta"
            voice = "bm_george"
            subscribers_only = true
            speed = 0.8
        "#;

        let config = Config::from_str(toml).unwrap();
        assert_eq!(config.playback.tick_ms, 50);
        assert_eq!(config.playback.queue_timing().gap, Duration::ZERO);
        assert_eq!(config.dice.default_spec(), DiceSpec::new(2, 6, 1));
        assert_eq!(config.characters.len(), 2);
        assert!(config.characters[1].subscribers_only);
        assert_eq!(config.characters[0].speed, 1.0);
        assert!(config.bot.ignored_identities().contains(&ChatIdentity::new("nightbot")));
    }

    #[test]
    fn test_rejects_duplicate_ids() {
        let toml = r#"
            [[characters]]
            id = "a"
            name = "Alpha"
            voice = "af_sky"

            [[characters]]
            id = "a"
            name = "Again"
            voice = "bm_george"
        "#;
        assert!(matches!(
            Config::from_str(toml),
            Err(ChatCastError::ConfigError(_))
        ));
    }

    #[test]
    fn test_rejects_empty_roster_and_zero_tick() {
        assert!(Config::from_str("characters = []").is_err());
        assert!(Config::from_str("[playback]\ntick_ms = 0").is_err());
    }

    #[test]
    fn test_rejects_rates_that_are_not_positive_numbers() {
        for rate in ["nan", "inf", "-inf", "0.0", "-3.0"] {
            let toml = format!("[playback]\nchars_per_second = {rate}");
            assert!(
                matches!(Config::from_str(&toml), Err(ChatCastError::ConfigError(_))),
                "chars_per_second = {rate} was accepted"
            );
        }

        for speed in ["nan", "inf", "0.0"] {
            let toml = format!(
                "[[characters]]\nid = \"a\"\nname = \"Alpha\"\nvoice = \"af_sky\"\nspeed = {speed}"
            );
            assert!(Config::from_str(&toml).is_err(), "speed = {speed} was accepted");
        }
    }

    #[test]
    fn test_default_dice_must_fit_roll_limits() {
        let err = Config::from_str("[dice]\ncount = 4000000000").unwrap_err();
        assert!(err.to_string().contains("exceed the roll limits"), "{err}");
        assert!(Config::from_str("[dice]\nsides = 5000\nmax_sides = 1000").is_err());
        assert!(Config::from_str("[dice]\ncount = 50\nmax_dice = 50").is_ok());
    }
}

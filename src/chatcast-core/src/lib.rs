//! ChatCast Core Library
//!
//! Turns live-stream chat into character voice playback: assigns chatters
//! to roster characters, queues generated speech, and answers the
//! broadcaster's dice, swap and mute commands.

pub mod bot;
pub mod character;
pub mod clock;
pub mod config;
pub mod connector;
pub mod dice;
pub mod error;
pub mod event;
pub mod manager;
pub mod media;
pub mod mute;
pub mod playback;
pub mod registry;

pub use bot::Bot;
pub use character::{Character, ChatIdentity};
pub use clock::{Clock, ManualClock, SystemClock};
pub use config::{Config, default_config};
pub use connector::{ChannelConnector, ChatConnector, TwitchConnector, TwitchCredentials};
pub use dice::{DiceSpec, RollOutcome, roll_dice};
pub use error::ChatCastError;
pub use event::{ChatCommand, ChatEvent, ChatMessage};
pub use manager::{COMMAND_NAMES, Manager, ManagerCallback, ManagerEvent, MessageOutcome};
pub use media::{CharacterMediaGenerator, GeneratedMedia, MediaGenerator, MediaJob};
pub use playback::{PlaybackQueue, PlaybackRequest, RequestId, RequestState, TickReport};
pub use registry::CharacterRegistry;

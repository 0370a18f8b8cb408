//! Error types for the chat playback bot.

use thiserror::Error;

#[derive(Error, Debug)]
pub enum ChatCastError {
    #[error("Invalid roll expression '{input}': {reason}")]
    Parse { input: String, reason: String },

    #[error("No free character available for {identity}")]
    NoCharactersAvailable { identity: String },

    #[error("Media generation failed: {0}")]
    Generation(String),

    #[error("Configuration error: {0}")]
    ConfigError(String),

    #[error("TTS error: {0}")]
    TtsError(String),

    #[error("Image generation error: {0}")]
    ImageError(String),

    #[error("Chat connector error: {0}")]
    Connector(String),

    #[error("WebSocket error: {0}")]
    WebSocket(#[from] tokio_tungstenite::tungstenite::Error),

    #[error("HTTP error: {0}")]
    Http(#[from] reqwest::Error),

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}

impl ChatCastError {
    pub(crate) fn parse(input: &str, reason: impl Into<String>) -> Self {
        ChatCastError::Parse {
            input: input.to_string(),
            reason: reason.into(),
        }
    }
}

//! Chat platform connectors.
//!
//! A connector delivers [`ChatEvent`]s and posts replies. The bot loop only
//! talks to this trait.

pub mod twitch;

use async_trait::async_trait;
use tokio::sync::mpsc;

use crate::error::ChatCastError;
use crate::event::{ChatCommand, ChatEvent};

pub use twitch::{TwitchConnector, TwitchCredentials};

#[async_trait]
pub trait ChatConnector: Send {
    /// Next inbound event, `None` once the connection is closed.
    ///
    /// Must be cancel safe: the bot loop races it against the timer.
    async fn next_event(&mut self) -> Option<ChatEvent>;

    async fn join(&mut self, channel: &str) -> Result<(), ChatCastError>;

    async fn reply(&mut self, command: &ChatCommand, text: &str) -> Result<(), ChatCastError>;
}

/// A reply posted through a [`ChannelConnector`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Reply {
    pub to: String,
    pub text: String,
}

/// Connector backed by in-process channels: events are fed in by the
/// owner of the sender, replies and joins come out on the other side.
pub struct ChannelConnector {
    events: mpsc::Receiver<ChatEvent>,
    replies: mpsc::UnboundedSender<Reply>,
    joined: Vec<String>,
}

impl ChannelConnector {
    pub fn new(events: mpsc::Receiver<ChatEvent>, replies: mpsc::UnboundedSender<Reply>) -> Self {
        Self {
            events,
            replies,
            joined: Vec::new(),
        }
    }

    /// Build a connector together with its event sender and reply receiver.
    pub fn pair(
        capacity: usize,
    ) -> (
        Self,
        mpsc::Sender<ChatEvent>,
        mpsc::UnboundedReceiver<Reply>,
    ) {
        let (event_tx, event_rx) = mpsc::channel(capacity);
        let (reply_tx, reply_rx) = mpsc::unbounded_channel();
        (Self::new(event_rx, reply_tx), event_tx, reply_rx)
    }

    pub fn joined(&self) -> &[String] {
        &self.joined
    }
}

#[async_trait]
impl ChatConnector for ChannelConnector {
    async fn next_event(&mut self) -> Option<ChatEvent> {
        self.events.recv().await
    }

    async fn join(&mut self, channel: &str) -> Result<(), ChatCastError> {
        self.joined.push(channel.to_string());
        Ok(())
    }

    async fn reply(&mut self, command: &ChatCommand, text: &str) -> Result<(), ChatCastError> {
        self.replies
            .send(Reply {
                to: command.user.to_string(),
                text: text.to_string(),
            })
            .map_err(|_| ChatCastError::Connector("Reply receiver closed".to_string()))
    }
}

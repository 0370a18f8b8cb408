//! Bot event loop.
//!
//! The loop is the single owner of the [`Manager`]: chat events, commands
//! and timer ticks are handled one at a time, so manager state never needs
//! a lock.

use std::future::Future;
use std::time::Duration;
use tokio::time::MissedTickBehavior;

use crate::connector::ChatConnector;
use crate::error::ChatCastError;
use crate::event::ChatEvent;
use crate::manager::Manager;

pub struct Bot<C: ChatConnector> {
    manager: Manager,
    connector: C,
    channel: String,
    tick_interval: Duration,
}

impl<C: ChatConnector> Bot<C> {
    pub fn new(
        manager: Manager,
        connector: C,
        channel: impl Into<String>,
        tick_interval: Duration,
    ) -> Self {
        Self {
            manager,
            connector,
            channel: channel.into(),
            tick_interval,
        }
    }

    /// Run until the connector closes.
    pub async fn run(&mut self) -> Result<(), ChatCastError> {
        self.run_until(std::future::pending()).await
    }

    /// Run until the connector closes or `shutdown` completes.
    pub async fn run_until<F>(&mut self, shutdown: F) -> Result<(), ChatCastError>
    where
        F: Future<Output = ()>,
    {
        let mut ticker = tokio::time::interval(self.tick_interval);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Skip);
        tokio::pin!(shutdown);

        loop {
            tokio::select! {
                _ = &mut shutdown => {
                    tracing::info!("shutting down");
                    break;
                }
                event = self.connector.next_event() => match event {
                    Some(event) => self.dispatch(event).await?,
                    None => {
                        tracing::warn!("chat connection closed, stopping the bot");
                        break;
                    }
                },
                _ = ticker.tick() => {
                    let report = self.manager.update_timer();
                    if !report.is_empty() {
                        tracing::debug!(
                            promoted = ?report.promoted,
                            finished = report.finished.len(),
                            expired = report.expired.len(),
                            "queue advanced"
                        );
                    }
                }
            }
        }

        Ok(())
    }

    /// Route one chat event. Only a failed channel join is fatal; a reply
    /// that cannot be posted is logged and dropped.
    pub async fn dispatch(&mut self, event: ChatEvent) -> Result<(), ChatCastError> {
        match event {
            ChatEvent::Ready => {
                tracing::info!(channel = %self.channel, "bot is ready, joining channel");
                self.connector.join(&self.channel).await?;
            }
            ChatEvent::Message(message) => {
                let outcome =
                    self.manager
                        .handle_message(&message.user, &message.text, message.is_subscriber);
                tracing::debug!(user = %message.user, ?outcome, "message handled");
            }
            ChatEvent::Command(command) => {
                if let Some(reply) = self.manager.handle_command(&command) {
                    if let Err(e) = self.connector.reply(&command, &reply).await {
                        tracing::warn!(error = %e, "failed to post reply");
                    }
                }
            }
        }
        Ok(())
    }

    pub fn manager(&self) -> &Manager {
        &self.manager
    }

    pub fn connector(&self) -> &C {
        &self.connector
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::character::Character;
    use crate::config::default_config;
    use crate::connector::ChannelConnector;
    use crate::event::{ChatCommand, ChatMessage};
    use crate::manager::{MUTE_REPLY, SWAP_REPLY};
    use crate::media::{GeneratedMedia, MediaGenerator, MediaJob};
    use async_trait::async_trait;
    use std::sync::Arc;

    /// Generation that never finishes, so requests stay queued.
    struct StalledGenerator;

    #[async_trait]
    impl MediaGenerator for StalledGenerator {
        async fn generate(&self, _job: &MediaJob) -> Result<GeneratedMedia, ChatCastError> {
            std::future::pending().await
        }
    }

    fn manager() -> Manager {
        let mut config = default_config();
        config.characters = vec![
            Character::new("a", "Character A", "bf_emma"),
            Character::new("b", "Character B", "bm_george"),
        ];
        Manager::new(&config, Arc::new(StalledGenerator)).with_seed(3)
    }

    #[tokio::test]
    async fn test_event_loop_routes_events() {
        let (connector, events, mut replies) = ChannelConnector::pair(16);
        let mut bot = Bot::new(manager(), connector, "dungeon", Duration::from_millis(10));

        for event in [
            ChatEvent::Ready,
            ChatEvent::Message(ChatMessage::new("alice", "hello", false)),
            ChatEvent::Command(ChatCommand::new("viewer", "mute", "", false)),
            ChatEvent::Command(ChatCommand::new("host", "mute", "", true)),
            ChatEvent::Message(ChatMessage::new("bob", "hi", false)),
            ChatEvent::Command(ChatCommand::new("host", "roll", "3d6+2", true)),
        ] {
            events.send(event).await.unwrap();
        }
        drop(events);

        bot.run().await.unwrap();

        assert_eq!(bot.connector().joined(), ["dungeon".to_string()]);
        assert!(bot.manager().is_muted());
        assert_eq!(bot.manager().queue().len(), 1);
        assert_eq!(bot.manager().registry().assigned_count(), 1);

        assert_eq!(replies.recv().await.unwrap().text, MUTE_REPLY);
        let roll = replies.recv().await.unwrap();
        assert_eq!(roll.to, "host");
        assert!(roll.text.starts_with("🎲 3d6+2"), "{}", roll.text);
        assert!(replies.try_recv().is_err());
    }

    #[tokio::test]
    async fn test_swap_through_dispatch() {
        let (connector, _events, mut replies) = ChannelConnector::pair(4);
        let mut bot = Bot::new(manager(), connector, "dungeon", Duration::from_millis(10));

        bot.dispatch(ChatEvent::Message(ChatMessage::new("alice", "hello", false)))
            .await
            .unwrap();
        bot.dispatch(ChatEvent::Command(ChatCommand::new("host", "swap", "", true)))
            .await
            .unwrap();

        assert!(bot.manager().queue().is_empty());
        assert_eq!(bot.manager().registry().assigned_count(), 0);
        assert_eq!(replies.recv().await.unwrap().text, SWAP_REPLY);
    }

    #[tokio::test]
    async fn test_shutdown_stops_loop() {
        let (connector, _events, _replies) = ChannelConnector::pair(4);
        let mut bot = Bot::new(manager(), connector, "dungeon", Duration::from_millis(10));

        bot.run_until(tokio::time::sleep(Duration::from_millis(30)))
            .await
            .unwrap();

        assert!(bot.connector().joined().is_empty());
    }
}

//! Twitch chat over IRC, carried in WebSocket text frames over TLS.
//!
//! Requests the `tags` capability so every `PRIVMSG` carries badges,
//! subscriber status and a message id for threaded replies.

use async_trait::async_trait;
use futures_util::{SinkExt, StreamExt};
use std::collections::HashMap;
use std::time::Duration;
use tokio::net::TcpStream;
use tokio::sync::mpsc;
use tokio_tungstenite::tungstenite::Message;
use tokio_tungstenite::{MaybeTlsStream, WebSocketStream, connect_async};

use crate::character::ChatIdentity;
use crate::connector::ChatConnector;
use crate::error::ChatCastError;
use crate::event::{ChatCommand, ChatEvent, ChatMessage};

pub const TWITCH_IRC_URL: &str = "wss://irc-ws.chat.twitch.tv:443";

/// Consecutive failed reconnects before the connector gives up.
const MAX_RECONNECT_ATTEMPTS: u32 = 5;

type IrcSocket = WebSocketStream<MaybeTlsStream<TcpStream>>;

/// Login for the bot account.
#[derive(Debug, Clone)]
pub struct TwitchCredentials {
    pub nick: String,
    pub oauth_token: String,
}

impl TwitchCredentials {
    pub fn new(nick: impl Into<String>, oauth_token: impl Into<String>) -> Self {
        Self {
            nick: nick.into().to_lowercase(),
            oauth_token: oauth_token.into(),
        }
    }

    fn pass(&self) -> String {
        if self.oauth_token.starts_with("oauth:") {
            self.oauth_token.clone()
        } else {
            format!("oauth:{}", self.oauth_token)
        }
    }
}

/// One parsed IRC line.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct IrcLine {
    pub tags: HashMap<String, String>,
    /// Nick part of the prefix, if any.
    pub nick: Option<String>,
    pub command: String,
    pub params: Vec<String>,
}

impl IrcLine {
    pub fn parse(line: &str) -> Option<Self> {
        let mut rest = line.trim_end_matches(['\r', '\n']);
        let mut parsed = IrcLine::default();

        if let Some(stripped) = rest.strip_prefix('@') {
            let (tags, tail) = stripped.split_once(' ')?;
            parsed.tags = tags
                .split(';')
                .filter_map(|tag| {
                    let (key, value) = tag.split_once('=').unwrap_or((tag, ""));
                    (!key.is_empty()).then(|| (key.to_string(), unescape_tag(value)))
                })
                .collect();
            rest = tail.trim_start();
        }

        if let Some(stripped) = rest.strip_prefix(':') {
            let (prefix, tail) = stripped.split_once(' ')?;
            let nick = prefix.split('!').next().unwrap_or(prefix);
            parsed.nick = Some(nick.to_string());
            rest = tail.trim_start();
        }

        let (head, trailing) = match rest.split_once(" :") {
            Some((head, trailing)) => (head, Some(trailing)),
            None => (rest, None),
        };
        let mut words = head.split_whitespace();
        parsed.command = words.next()?.to_uppercase();
        parsed.params = words.map(str::to_string).collect();
        if let Some(trailing) = trailing {
            parsed.params.push(trailing.to_string());
        }

        Some(parsed)
    }

    fn tag(&self, key: &str) -> Option<&str> {
        self.tags.get(key).map(String::as_str)
    }

    fn has_badge(&self, badge: &str) -> bool {
        self.tag("badges").is_some_and(|badges| {
            badges
                .split(',')
                .any(|b| b.split('/').next() == Some(badge))
        })
    }

    /// Translate a server line into a bot event. `PING` and other protocol
    /// noise yield `None`.
    pub fn to_event(&self, command_prefix: &str, known_commands: &[&str]) -> Option<ChatEvent> {
        match self.command.as_str() {
            "001" => Some(ChatEvent::Ready),
            "PRIVMSG" => {
                let text = self.params.get(1)?;
                let handle = self
                    .tag("display-name")
                    .filter(|name| !name.is_empty())
                    .or(self.nick.as_deref())?;
                let user = ChatIdentity::new(handle);

                let is_broadcaster = self.has_badge("broadcaster");
                if let Some(mut command) =
                    ChatCommand::parse(&user, text, command_prefix, known_commands, is_broadcaster)
                {
                    command.message_id = self.tag("id").map(str::to_string);
                    return Some(ChatEvent::Command(command));
                }

                let is_subscriber = self.tag("subscriber") == Some("1")
                    || self.has_badge("subscriber")
                    || self.has_badge("founder");
                Some(ChatEvent::Message(ChatMessage::new(user, text.as_str(), is_subscriber)))
            }
            _ => None,
        }
    }
}

fn unescape_tag(value: &str) -> String {
    let mut out = String::with_capacity(value.len());
    let mut chars = value.chars();
    while let Some(c) = chars.next() {
        if c != '\\' {
            out.push(c);
            continue;
        }
        match chars.next() {
            Some(':') => out.push(';'),
            Some('s') => out.push(' '),
            Some('r') => out.push('\r'),
            Some('n') => out.push('\n'),
            Some(other) => out.push(other),
            None => {}
        }
    }
    out
}

/// Connection to Twitch chat.
///
/// A session task owns the socket: it forwards outbound lines, answers
/// `PING`, turns `PRIVMSG` into events and reconnects when Twitch sends
/// `RECONNECT` or drops the connection. Each new session yields a fresh
/// `Ready`, so the bot rejoins its channel.
pub struct TwitchConnector {
    events: mpsc::Receiver<ChatEvent>,
    outbound: mpsc::UnboundedSender<String>,
    channel: Option<String>,
}

impl TwitchConnector {
    /// Connect to Twitch and log in. `Ready` is delivered once the server
    /// welcomes us.
    pub async fn connect(
        credentials: &TwitchCredentials,
        command_prefix: &str,
        known_commands: &'static [&'static str],
    ) -> Result<Self, ChatCastError> {
        Self::connect_to(TWITCH_IRC_URL, credentials, command_prefix, known_commands).await
    }

    /// Connect to an IRC-over-WebSocket endpoint at `url`.
    pub async fn connect_to(
        url: &str,
        credentials: &TwitchCredentials,
        command_prefix: &str,
        known_commands: &'static [&'static str],
    ) -> Result<Self, ChatCastError> {
        let socket = open_session(url, credentials).await?;

        let (event_tx, event_rx) = mpsc::channel(256);
        let (outbound_tx, outbound_rx) = mpsc::unbounded_channel();

        let session = Session {
            url: url.to_string(),
            credentials: credentials.clone(),
            command_prefix: command_prefix.to_string(),
            known_commands,
            events: event_tx,
            outbound: outbound_rx,
        };
        tokio::spawn(session.run(socket));

        Ok(Self {
            events: event_rx,
            outbound: outbound_tx,
            channel: None,
        })
    }

    fn send(&self, line: String) -> Result<(), ChatCastError> {
        self.outbound
            .send(line)
            .map_err(|_| ChatCastError::Connector("Twitch session closed".to_string()))
    }
}

/// Open the socket and send the login lines.
async fn open_session(
    url: &str,
    credentials: &TwitchCredentials,
) -> Result<IrcSocket, ChatCastError> {
    let (mut socket, _) = connect_async(url).await?;
    for line in [
        "CAP REQ :twitch.tv/tags twitch.tv/commands".to_string(),
        format!("PASS {}", credentials.pass()),
        format!("NICK {}", credentials.nick),
    ] {
        socket.send(Message::Text(line)).await?;
    }
    tracing::info!(url, "connected to twitch chat");
    Ok(socket)
}

enum SessionEnd {
    /// The connector was dropped.
    Shutdown,
    Reconnect,
}

struct Session {
    url: String,
    credentials: TwitchCredentials,
    command_prefix: String,
    known_commands: &'static [&'static str],
    events: mpsc::Sender<ChatEvent>,
    outbound: mpsc::UnboundedReceiver<String>,
}

impl Session {
    async fn run(mut self, mut socket: IrcSocket) {
        loop {
            let end = self.pump(&mut socket).await;
            let _ = socket.close(None).await;
            if let SessionEnd::Shutdown = end {
                return;
            }

            socket = match self.reconnect().await {
                Some(socket) => socket,
                None => {
                    tracing::warn!("giving up on twitch after repeated reconnect failures");
                    return;
                }
            };
        }
    }

    async fn pump(&mut self, socket: &mut IrcSocket) -> SessionEnd {
        loop {
            tokio::select! {
                line = self.outbound.recv() => match line {
                    Some(line) => {
                        if let Err(e) = socket.send(Message::Text(line)).await {
                            tracing::warn!(error = %e, "twitch write failed");
                            return SessionEnd::Reconnect;
                        }
                    }
                    None => return SessionEnd::Shutdown,
                },
                frame = socket.next() => match frame {
                    Some(Ok(Message::Text(text))) => {
                        for line in text.lines() {
                            if let Some(end) = self.handle_line(socket, line).await {
                                return end;
                            }
                        }
                    }
                    Some(Ok(Message::Close(frame))) => {
                        tracing::warn!(?frame, "twitch closed the connection");
                        return SessionEnd::Reconnect;
                    }
                    // pings are answered by tungstenite itself
                    Some(Ok(_)) => {}
                    Some(Err(e)) => {
                        tracing::warn!(error = %e, "twitch read failed");
                        return SessionEnd::Reconnect;
                    }
                    None => {
                        tracing::warn!("twitch connection ended");
                        return SessionEnd::Reconnect;
                    }
                },
            }
        }
    }

    async fn handle_line(&self, socket: &mut IrcSocket, line: &str) -> Option<SessionEnd> {
        let parsed = IrcLine::parse(line)?;
        match parsed.command.as_str() {
            "PING" => {
                let token = parsed.params.last().map(String::as_str).unwrap_or_default();
                if let Err(e) = socket.send(Message::Text(format!("PONG :{}", token))).await {
                    tracing::warn!(error = %e, "twitch write failed");
                    return Some(SessionEnd::Reconnect);
                }
            }
            "RECONNECT" => {
                tracing::warn!("twitch asked us to reconnect");
                return Some(SessionEnd::Reconnect);
            }
            "NOTICE" => {
                tracing::warn!(notice = ?parsed.params.last(), "twitch notice");
            }
            _ => {
                let event = parsed.to_event(&self.command_prefix, self.known_commands)?;
                if self.events.send(event).await.is_err() {
                    return Some(SessionEnd::Shutdown);
                }
            }
        }
        None
    }

    async fn reconnect(&self) -> Option<IrcSocket> {
        for attempt in 0..MAX_RECONNECT_ATTEMPTS {
            if attempt > 0 {
                tokio::time::sleep(Duration::from_secs(1 << attempt)).await;
            }
            match open_session(&self.url, &self.credentials).await {
                Ok(socket) => return Some(socket),
                Err(e) => {
                    tracing::warn!(attempt = attempt + 1, error = %e, "twitch reconnect failed")
                }
            }
        }
        None
    }
}

#[async_trait]
impl ChatConnector for TwitchConnector {
    async fn next_event(&mut self) -> Option<ChatEvent> {
        self.events.recv().await
    }

    async fn join(&mut self, channel: &str) -> Result<(), ChatCastError> {
        let channel = channel.trim_start_matches('#').to_lowercase();
        self.send(format!("JOIN #{}", channel))?;
        tracing::info!(channel = %channel, "joined channel");
        self.channel = Some(channel);
        Ok(())
    }

    async fn reply(&mut self, command: &ChatCommand, text: &str) -> Result<(), ChatCastError> {
        let channel = self
            .channel
            .as_deref()
            .ok_or_else(|| ChatCastError::Connector("Reply before joining a channel".to_string()))?;
        self.send(privmsg(channel, command.message_id.as_deref(), text))
    }
}

fn privmsg(channel: &str, reply_to: Option<&str>, text: &str) -> String {
    let text = text.replace(['\r', '\n'], " ");
    match reply_to {
        Some(id) => format!("@reply-parent-msg-id={} PRIVMSG #{} :{}", id, channel, text),
        None => format!("PRIVMSG #{} :{}", channel, text),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tokio::net::TcpListener;

    const KNOWN: &[&str] = &["roll", "swap", "mute", "unmute"];

    #[test]
    fn test_parse_privmsg_with_tags() {
        let line = "@badge-info=;badges=broadcaster/1;display-name=HostName;id=abc-123;subscriber=0 \
                    :hostname!hostname@hostname.tmi.twitch.tv PRIVMSG #hostname :!roll 3d6+2\r\n";
        let parsed = IrcLine::parse(line).unwrap();

        assert_eq!(parsed.command, "PRIVMSG");
        assert_eq!(parsed.nick.as_deref(), Some("hostname"));
        assert_eq!(parsed.params, vec!["#hostname", "!roll 3d6+2"]);
        assert_eq!(parsed.tag("id"), Some("abc-123"));

        let Some(ChatEvent::Command(command)) = parsed.to_event("!", KNOWN) else {
            panic!("expected a command");
        };
        assert_eq!(command.user, ChatIdentity::new("hostname"));
        assert_eq!(command.name, "roll");
        assert_eq!(command.parameter, "3d6+2");
        assert!(command.is_broadcaster);
        assert_eq!(command.message_id.as_deref(), Some("abc-123"));
    }

    #[test]
    fn test_subscriber_message() {
        let line = "@badges=subscriber/12;display-name=Alice;subscriber=1 \
                    :alice!alice@alice.tmi.twitch.tv PRIVMSG #host :hello there";
        let event = IrcLine::parse(line).unwrap().to_event("!", KNOWN);
        assert_eq!(
            event,
            Some(ChatEvent::Message(ChatMessage::new("alice", "hello there", true)))
        );
    }

    #[test]
    fn test_unknown_command_is_a_message() {
        let line = ":bob!bob@bob.tmi.twitch.tv PRIVMSG #host :!lurk";
        let event = IrcLine::parse(line).unwrap().to_event("!", KNOWN);
        assert_eq!(
            event,
            Some(ChatEvent::Message(ChatMessage::new("bob", "!lurk", false)))
        );
    }

    #[test]
    fn test_moderator_is_not_broadcaster() {
        let line = "@badges=moderator/1 :mod!mod@mod.tmi.twitch.tv PRIVMSG #host :!swap";
        let Some(ChatEvent::Command(command)) = IrcLine::parse(line).unwrap().to_event("!", KNOWN)
        else {
            panic!("expected a command");
        };
        assert!(!command.is_broadcaster);
    }

    #[test]
    fn test_welcome_and_ping() {
        let welcome = IrcLine::parse(":tmi.twitch.tv 001 chatbot :Welcome, GLHF!").unwrap();
        assert_eq!(welcome.to_event("!", KNOWN), Some(ChatEvent::Ready));

        let ping = IrcLine::parse("PING :tmi.twitch.tv").unwrap();
        assert_eq!(ping.command, "PING");
        assert_eq!(ping.params, vec!["tmi.twitch.tv"]);
        assert_eq!(ping.to_event("!", KNOWN), None);
    }

    #[test]
    fn test_tag_unescape() {
        assert_eq!(unescape_tag(r"hello\sworld\:\\"), "hello world;\\");
    }

    #[test]
    fn test_privmsg_formatting() {
        assert_eq!(
            privmsg("host", Some("abc"), "Swapping users!"),
            "@reply-parent-msg-id=abc PRIVMSG #host :Swapping users!"
        );
        assert_eq!(privmsg("host", None, "a\r\nb"), "PRIVMSG #host :a  b");
    }

    #[tokio::test]
    async fn test_session_logs_in_and_follows_reconnect() {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let url = format!("ws://{}", listener.local_addr().unwrap());

        let server = tokio::spawn(async move {
            let mut logins = Vec::new();
            let mut received = Vec::new();
            for round in 0..2 {
                let (stream, _) = listener.accept().await.unwrap();
                let mut ws = tokio_tungstenite::accept_async(stream).await.unwrap();
                let mut login = Vec::new();
                for _ in 0..3 {
                    login.push(next_text(&mut ws).await);
                }
                logins.push(login);
                send_text(&mut ws, ":tmi.twitch.tv 001 chatbot :Welcome, GLHF!").await;

                if round == 0 {
                    send_text(&mut ws, ":tmi.twitch.tv RECONNECT").await;
                    while let Some(Ok(_)) = ws.next().await {}
                } else {
                    send_text(
                        &mut ws,
                        "@badges=broadcaster/1;id=m1 :host!host@host.tmi.twitch.tv PRIVMSG #host :!mute\r\n\
                         PING :tmi.twitch.tv",
                    )
                    .await;
                    for _ in 0..3 {
                        received.push(next_text(&mut ws).await);
                    }
                }
            }
            (logins, received)
        });

        let credentials = TwitchCredentials::new("ChatBot", "secret");
        let mut connector = TwitchConnector::connect_to(&url, &credentials, "!", KNOWN)
            .await
            .unwrap();

        assert_eq!(connector.next_event().await, Some(ChatEvent::Ready));
        assert_eq!(connector.next_event().await, Some(ChatEvent::Ready));
        connector.join("#Host").await.unwrap();
        let Some(ChatEvent::Command(command)) = connector.next_event().await else {
            panic!("expected a command");
        };
        connector.reply(&command, "Stopping voice chat").await.unwrap();

        let (logins, mut received) = server.await.unwrap();
        let expected_login = vec![
            "CAP REQ :twitch.tv/tags twitch.tv/commands".to_string(),
            "PASS oauth:secret".to_string(),
            "NICK chatbot".to_string(),
        ];
        assert_eq!(logins, vec![expected_login.clone(), expected_login]);

        received.sort();
        assert_eq!(
            received,
            vec![
                "@reply-parent-msg-id=m1 PRIVMSG #host :Stopping voice chat",
                "JOIN #host",
                "PONG :tmi.twitch.tv",
            ]
        );
    }

    async fn next_text(ws: &mut WebSocketStream<TcpStream>) -> String {
        loop {
            match ws.next().await {
                Some(Ok(Message::Text(text))) => return text,
                Some(Ok(_)) => continue,
                other => panic!("connection ended early: {other:?}"),
            }
        }
    }

    async fn send_text(ws: &mut WebSocketStream<TcpStream>, text: &str) {
        ws.send(Message::Text(text.to_string())).await.unwrap();
    }

    #[test]
    fn test_credentials_pass() {
        assert_eq!(TwitchCredentials::new("Bot", "xyz").pass(), "oauth:xyz");
        assert_eq!(TwitchCredentials::new("Bot", "oauth:xyz").pass(), "oauth:xyz");
    }
}

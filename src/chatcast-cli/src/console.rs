//! Console connector: chat events as JSON lines on stdin, replies on stdout.
//!
//! ```text
//! {"event": "ready"}
//! {"event": "message", "user": "alice", "text": "hello", "is_subscriber": false}
//! {"event": "command", "user": "host", "name": "roll", "parameter": "3d6+2", "is_broadcaster": true}
//! ```

use chatcast_core::ChatEvent;
use chatcast_core::connector::ChannelConnector;
use colored::Colorize;
use tokio::io::{AsyncBufReadExt, BufReader};

/// Start reading stdin and printing replies. The connector closes when
/// stdin does.
pub fn connect() -> ChannelConnector {
    let (connector, events, mut replies) = ChannelConnector::pair(64);

    tokio::spawn(async move {
        let mut lines = BufReader::new(tokio::io::stdin()).lines();
        while let Ok(Some(line)) = lines.next_line().await {
            let line = line.trim();
            if line.is_empty() {
                continue;
            }
            match serde_json::from_str::<ChatEvent>(line) {
                Ok(event) => {
                    if events.send(event).await.is_err() {
                        break;
                    }
                }
                Err(e) => eprintln!("{} {}", "Ignoring malformed event:".yellow(), e),
            }
        }
    });

    tokio::spawn(async move {
        while let Some(reply) = replies.recv().await {
            println!("{} @{} {}", "bot ▶".bright_green().bold(), reply.to, reply.text);
        }
    });

    connector
}

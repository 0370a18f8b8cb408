//! ChatCast CLI - chat to character voices
//!
//! Connects to a chat, casts every chatter as a character from the roster
//! and voices their messages one at a time.

mod console;

use chatcast_core::config::Config;
use chatcast_core::connector::{ChatConnector, TwitchConnector, TwitchCredentials};
use chatcast_core::media::{
    self, CharacterMediaGenerator, ImageClient, KokoroSpeech, SilentSpeech, SpeechSynthesizer,
};
use chatcast_core::{Bot, COMMAND_NAMES, Manager, ManagerEvent, default_config};
use clap::{Parser, ValueEnum};
use colored::Colorize;
use std::env;
use std::path::PathBuf;
use std::sync::Arc;
use tracing_subscriber::EnvFilter;

#[derive(Debug, Clone, Copy, ValueEnum)]
enum ConnectorKind {
    /// Twitch chat over IRC
    Twitch,
    /// JSON-lines events on stdin
    Console,
}

#[derive(Parser)]
#[command(
    name = "chatcast",
    version,
    about = "Voice live-stream chat through a cast of characters",
    long_about = "Assigns every chatter a character voice, speaks their messages in order, \
                  and answers the broadcaster's !roll, !swap, !mute and !unmute commands."
)]
struct Cli {
    /// Path to a TOML config file (built-in roster if omitted)
    #[arg(short, long, value_name = "FILE")]
    config: Option<PathBuf>,

    /// Channel to join, overrides the config
    #[arg(long, value_name = "CHANNEL")]
    channel: Option<String>,

    /// Directory for generated media, overrides the config
    #[arg(long, value_name = "DIR")]
    scratch_dir: Option<PathBuf>,

    /// Timer cadence in milliseconds, overrides the config
    #[arg(long, value_name = "MS")]
    tick_ms: Option<u64>,

    /// Where chat comes from
    #[arg(long, value_enum, default_value = "twitch")]
    connector: ConnectorKind,

    /// Write silence instead of running the TTS model
    #[arg(long)]
    silent: bool,

    /// Skip portrait generation even if the config enables it
    #[arg(long)]
    no_images: bool,
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    // Load environment variables from .env file if present
    dotenvy::dotenv().ok();

    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")))
        .init();

    let cli = Cli::parse();

    let mut config = match &cli.config {
        Some(path) => Config::load(path)?,
        None => default_config(),
    };
    if let Some(channel) = cli.channel.clone() {
        config.bot.channel = channel;
    }
    if let Some(dir) = cli.scratch_dir.clone() {
        config.media.scratch_dir = dir;
    }
    if let Some(tick_ms) = cli.tick_ms {
        config.playback.tick_ms = tick_ms;
    }
    config.validate()?;

    media::clear_scratch_dir(&config.media.scratch_dir)?;

    let speech: Arc<dyn SpeechSynthesizer> = if cli.silent {
        Arc::new(SilentSpeech)
    } else {
        println!("{}", "Loading TTS model (first run downloads it)...".dimmed());
        let kokoro = KokoroSpeech::new().await?;
        kokoro.validate_roster(&config.characters)?;
        println!(
            "{}",
            format!("TTS ready, {} voices available", kokoro.available_voices().len()).dimmed()
        );
        Arc::new(kokoro)
    };

    let mut generator = CharacterMediaGenerator::new(speech);
    if config.media.image.enabled && !cli.no_images {
        let api_base = env::var("OPENAI_API_BASE")
            .or_else(|_| env::var("OPENAI_BASE_URL"))
            .unwrap_or_else(|_| "https://api.openai.com/v1".to_string());
        let api_key = env::var("OPENAI_API_KEY").unwrap_or_else(|_| {
            eprintln!(
                "{}",
                "Warning: OPENAI_API_KEY not set. Image generation may fail.".yellow()
            );
            String::new()
        });
        generator = generator.with_images(ImageClient::new(
            config.media.image.clone(),
            api_base,
            api_key,
        )?);
    }

    let manager = Manager::new(&config, Arc::new(generator)).with_callback(create_console_callback());

    print_header(&config);

    match cli.connector {
        ConnectorKind::Console => {
            let channel = if config.bot.channel.is_empty() {
                "console".to_string()
            } else {
                config.bot.channel.clone()
            };
            run_bot(manager, console::connect(), channel, &config).await?;
        }
        ConnectorKind::Twitch => {
            if config.bot.channel.is_empty() {
                return Err("No channel configured. Use --channel or [bot] channel.".into());
            }
            let nick = env::var("TWITCH_NICK").map_err(|_| "TWITCH_NICK must be set")?;
            let token =
                env::var("TWITCH_OAUTH_TOKEN").map_err(|_| "TWITCH_OAUTH_TOKEN must be set")?;
            let credentials = TwitchCredentials::new(nick, token);

            let connector =
                TwitchConnector::connect(&credentials, &config.bot.command_prefix, COMMAND_NAMES)
                    .await?;
            let channel = config.bot.channel.clone();
            run_bot(manager, connector, channel, &config).await?;
        }
    }

    println!("{}", "  Bot stopped.".bright_green().bold());
    Ok(())
}

async fn run_bot<C: ChatConnector>(
    manager: Manager,
    connector: C,
    channel: String,
    config: &Config,
) -> Result<(), Box<dyn std::error::Error>> {
    let mut bot = Bot::new(manager, connector, channel, config.playback.tick_interval());
    bot.run_until(async {
        tokio::signal::ctrl_c().await.ok();
    })
    .await?;
    Ok(())
}

fn print_header(config: &Config) {
    println!();
    println!("{}", "═".repeat(70).bright_blue());
    println!("{}", "  ChatCast".bright_blue().bold());
    println!("{}", "═".repeat(70).bright_blue());
    println!();
    println!("{}", "Cast:".bold());
    for (i, c) in config.characters.iter().enumerate() {
        let badge = if c.subscribers_only { " [subs]" } else { "" };
        println!(
            "  {}. {} - voice {}{}",
            i + 1,
            c.name.bright_cyan(),
            c.voice.dimmed(),
            badge.yellow()
        );
    }
    println!();
    println!("{}", "─".repeat(70).dimmed());
}

/// Create a callback that prints manager events to the console.
fn create_console_callback() -> Box<dyn Fn(&ManagerEvent) + Send + Sync> {
    Box::new(move |event| match event {
        ManagerEvent::Assigned { user, character } => {
            println!("{} {} is now {}", "★".yellow(), user, character.bright_cyan().bold());
        }
        ManagerEvent::Enqueued { .. } | ManagerEvent::Finished { .. } => {}
        ManagerEvent::NowPlaying {
            character,
            text,
            audio,
            image,
            ..
        } => {
            println!("{} {}: {}", "▶".bright_cyan(), character.bright_cyan().bold(), text);
            println!("  {}", audio.display().to_string().dimmed());
            if let Some(image) = image {
                println!("  {}", image.display().to_string().dimmed());
            }
        }
        ManagerEvent::Expired { user, .. } => {
            println!("{} dropped a message from {}", "✗".red(), user);
        }
        ManagerEvent::Swapped { discarded } => {
            println!(
                "{}",
                format!("  ⇄ Cast released, {} queued messages dropped", discarded)
                    .bright_magenta()
                    .bold()
            );
        }
        ManagerEvent::MuteChanged { muted } => {
            let state = if *muted { "muted" } else { "unmuted" };
            println!("{}", format!("  Voice chat {}", state).bright_magenta());
        }
        ManagerEvent::Rolled(outcome) => {
            println!("{} {}", "🎲".bold(), outcome);
        }
    })
}

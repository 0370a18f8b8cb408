//! Chat-driven character playback.
//!
//! The manager owns the character registry, the playback queue and the mute
//! gate. It turns chat lines into playback requests, runs media generation
//! in the background and advances the queue on every timer tick.

use rand::SeedableRng;
use rand::rngs::StdRng;
use std::collections::{HashMap, HashSet};
use std::path::PathBuf;
use std::sync::Arc;
use tokio::sync::mpsc::{self, UnboundedReceiver, UnboundedSender};
use tokio::task::JoinHandle;

use crate::character::ChatIdentity;
use crate::clock::{Clock, SystemClock};
use crate::config::{Config, DiceConfig, PlaybackConfig};
use crate::dice::{self, DiceSpec, RollOutcome};
use crate::error::ChatCastError;
use crate::event::ChatCommand;
use crate::media::{self, GeneratedMedia, MediaGenerator, MediaJob};
use crate::mute::MuteGate;
use crate::playback::{PlaybackQueue, PlaybackRequest, RequestId, RequestState, TickReport};
use crate::registry::CharacterRegistry;

/// Commands the manager answers, without prefix.
pub const COMMAND_NAMES: &[&str] = &["roll", "swap", "mute", "unmute"];

pub const SWAP_REPLY: &str = "Swapping users!";
pub const MUTE_REPLY: &str = "Stopping voice chat";
pub const UNMUTE_REPLY: &str = "Resuming voice chat";

/// Callback for manager events.
pub type ManagerCallback = Box<dyn Fn(&ManagerEvent) + Send + Sync>;

/// Events emitted while the manager works.
#[derive(Debug, Clone)]
pub enum ManagerEvent {
    /// A speaker was cast as a character.
    Assigned { user: ChatIdentity, character: String },
    /// A message was queued for playback.
    Enqueued { id: RequestId, user: ChatIdentity, character: String },
    /// A request became the active one.
    NowPlaying {
        id: RequestId,
        character: String,
        text: String,
        audio: PathBuf,
        image: Option<PathBuf>,
    },
    /// The active request finished its playback window.
    Finished { id: RequestId },
    /// A request was dropped without playing.
    Expired { id: RequestId, user: ChatIdentity },
    /// All assignments were released; `discarded` requests were dropped.
    Swapped { discarded: usize },
    MuteChanged { muted: bool },
    Rolled(RollOutcome),
}

/// What became of an incoming chat message.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MessageOutcome {
    Enqueued(RequestId),
    Muted,
    /// Ignored speaker, or nothing left to say after sanitizing.
    Ignored,
    /// Every eligible character is taken.
    NoCharacter,
}

struct GenerationResult {
    id: RequestId,
    result: Result<GeneratedMedia, ChatCastError>,
}

pub struct Manager {
    registry: CharacterRegistry,
    queue: PlaybackQueue,
    mute: MuteGate,
    generator: Arc<dyn MediaGenerator>,
    clock: Arc<dyn Clock>,
    rng: StdRng,
    playback: PlaybackConfig,
    dice: DiceConfig,
    scratch_dir: PathBuf,
    ignored: HashSet<ChatIdentity>,
    next_id: RequestId,
    in_flight: HashMap<RequestId, JoinHandle<()>>,
    /// In-flight jobs whose request expired. They keep their generation slot
    /// until the backend returns, then their files are deleted.
    abandoned: HashSet<RequestId>,
    results_tx: UnboundedSender<GenerationResult>,
    results_rx: UnboundedReceiver<GenerationResult>,
    callback: Option<ManagerCallback>,
}

impl Manager {
    /// Create a manager for `config`, rendering media with `generator`.
    pub fn new(config: &Config, generator: Arc<dyn MediaGenerator>) -> Self {
        let (results_tx, results_rx) = mpsc::unbounded_channel();

        Self {
            registry: CharacterRegistry::new(config.characters.clone()),
            queue: PlaybackQueue::new(config.playback.queue_timing()),
            mute: MuteGate::default(),
            generator,
            clock: Arc::new(SystemClock),
            rng: StdRng::from_os_rng(),
            playback: config.playback.clone(),
            dice: config.dice.clone(),
            scratch_dir: config.media.scratch_dir.clone(),
            ignored: config.bot.ignored_identities(),
            next_id: 1,
            in_flight: HashMap::new(),
            abandoned: HashSet::new(),
            results_tx,
            results_rx,
            callback: None,
        }
    }

    pub fn with_clock(mut self, clock: Arc<dyn Clock>) -> Self {
        self.clock = clock;
        self
    }

    /// Use a fixed RNG seed for dice.
    pub fn with_seed(mut self, seed: u64) -> Self {
        self.rng = StdRng::seed_from_u64(seed);
        self
    }

    /// Set a callback for manager events.
    pub fn with_callback(mut self, callback: ManagerCallback) -> Self {
        self.callback = Some(callback);
        self
    }

    /// Queue playback for a chat line, casting the speaker as a character
    /// if they have none yet.
    pub fn handle_message(
        &mut self,
        identity: &ChatIdentity,
        text: &str,
        is_subscriber: bool,
    ) -> MessageOutcome {
        if self.mute.is_muted() {
            tracing::debug!(user = %identity, "muted, message not voiced");
            return MessageOutcome::Muted;
        }
        if self.ignored.contains(identity) {
            tracing::debug!(user = %identity, "ignored user");
            return MessageOutcome::Ignored;
        }

        let text = media::sanitize_text(text, self.playback.max_message_chars);
        if text.is_empty() {
            return MessageOutcome::Ignored;
        }

        let was_assigned = self.registry.character_for(identity).is_some();
        let character = match self.registry.assign(identity, is_subscriber) {
            Ok(character) => character.clone(),
            Err(e) => {
                tracing::info!(user = %identity, "{}", e);
                return MessageOutcome::NoCharacter;
            }
        };
        if !was_assigned {
            tracing::info!(user = %identity, character = %character.id, "assigned character");
            self.emit_event(ManagerEvent::Assigned {
                user: identity.clone(),
                character: character.name.clone(),
            });
        }

        let id = self.next_id;
        self.next_id += 1;

        let estimate = media::estimate_duration(
            &text,
            self.playback.chars_per_second,
            self.playback.min_duration(),
        );
        let character_name = character.name.clone();
        self.queue.enqueue(PlaybackRequest::new(
            id,
            identity.clone(),
            character,
            text,
            estimate,
            self.clock.now(),
        ));

        self.emit_event(ManagerEvent::Enqueued {
            id,
            user: identity.clone(),
            character: character_name,
        });
        MessageOutcome::Enqueued(id)
    }

    /// Roll `expression` (`NdS`, `NdS+B`), or the configured default dice
    /// when it is empty. Never touches the registry or queue.
    pub fn roll_dice(&mut self, expression: &str) -> Result<RollOutcome, ChatCastError> {
        let spec = if expression.trim().is_empty() {
            self.dice.default_spec()
        } else {
            DiceSpec::parse_with_limits(expression, self.dice.max_dice, self.dice.max_sides)?
        };

        let outcome = dice::roll_dice(spec, &mut self.rng);
        tracing::info!(roll = %outcome, "rolled dice");
        self.emit_event(ManagerEvent::Rolled(outcome.clone()));
        Ok(outcome)
    }

    /// Release every character and drop everything queued. Generation still
    /// running for dropped requests is left to finish; its files are deleted
    /// when the result arrives.
    pub fn change_users(&mut self) -> usize {
        self.registry.release_all();

        let dropped = self.queue.clear();
        media::reclaim(dropped.iter().flat_map(PlaybackRequest::media_paths));
        self.abandoned.extend(
            dropped
                .iter()
                .map(|request| request.id)
                .filter(|id| self.in_flight.contains_key(id)),
        );

        tracing::info!(discarded = dropped.len(), "swapped users");
        self.emit_event(ManagerEvent::Swapped {
            discarded: dropped.len(),
        });
        dropped.len()
    }

    /// Stop voicing new messages. Already queued requests still play.
    pub fn mute(&mut self) -> bool {
        let changed = self.mute.mute();
        if changed {
            tracing::info!("muted");
            self.emit_event(ManagerEvent::MuteChanged { muted: true });
        }
        changed
    }

    pub fn unmute(&mut self) -> bool {
        let changed = self.mute.unmute();
        if changed {
            tracing::info!("unmuted");
            self.emit_event(ManagerEvent::MuteChanged { muted: false });
        }
        changed
    }

    /// Run a moderator command and return the reply to post, if any.
    /// Commands from anyone but the broadcaster are ignored without reply.
    pub fn handle_command(&mut self, command: &ChatCommand) -> Option<String> {
        if !command.is_broadcaster {
            tracing::debug!(user = %command.user, command = %command.name, "not privileged");
            return None;
        }

        match command.name.as_str() {
            "roll" => match self.roll_dice(&command.parameter) {
                Ok(outcome) => Some(format!("🎲 {}", outcome)),
                Err(e) => {
                    tracing::warn!(error = %e, "bad roll");
                    Some(format!(
                        "Can't roll '{}', try NdS or NdS+B",
                        command.parameter.trim()
                    ))
                }
            },
            "swap" => {
                self.change_users();
                Some(SWAP_REPLY.to_string())
            }
            "mute" => {
                self.mute();
                Some(MUTE_REPLY.to_string())
            }
            "unmute" => {
                self.unmute();
                Some(UNMUTE_REPLY.to_string())
            }
            _ => None,
        }
    }

    /// Called on every timer pulse. Applies finished generations, starts
    /// new ones, advances the queue and deletes media that is no longer
    /// needed. Never waits on generation.
    pub fn update_timer(&mut self) -> TickReport {
        self.poll_generation();
        self.dispatch_generation();

        let report = self.queue.tick(self.clock.now());
        media::reclaim(report.reclaimable_paths());

        if report.promoted.is_some() {
            if let Some(active) = self.queue.active() {
                let event = now_playing(active);
                tracing::info!(id = active.id, character = %active.character.id, "now playing");
                self.emit_event(event);
            }
        }
        for done in &report.finished {
            self.emit_event(ManagerEvent::Finished { id: done.id });
        }
        for expired in &report.expired {
            // keeps its slot until it reports back; its files go then
            if self.in_flight.contains_key(&expired.id) {
                self.abandoned.insert(expired.id);
            }
            tracing::info!(id = expired.id, user = %expired.speaker, "request expired");
            self.emit_event(ManagerEvent::Expired {
                id: expired.id,
                user: expired.speaker.clone(),
            });
        }

        report
    }

    /// Apply generation results that have arrived. Returns how many.
    pub fn poll_generation(&mut self) -> usize {
        let now = self.clock.now();
        let mut applied = 0;

        while let Ok(GenerationResult { id, result }) = self.results_rx.try_recv() {
            self.in_flight.remove(&id);
            let abandoned = self.abandoned.remove(&id);
            applied += 1;

            match result {
                Ok(generated) => {
                    let paths = generated.paths();
                    if !self.queue.mark_ready(id, generated, now) {
                        tracing::debug!(id, abandoned, "discarding media for dropped request");
                        media::reclaim(paths);
                    }
                }
                Err(e) => {
                    tracing::warn!(id, error = %e, "generation failed");
                    self.queue.mark_failed(id);
                }
            }
        }

        self.in_flight.retain(|_, handle| !handle.is_finished());
        self.abandoned.retain(|id| self.in_flight.contains_key(id));
        applied
    }

    fn dispatch_generation(&mut self) {
        let capacity = self
            .playback
            .max_concurrent_generations
            .saturating_sub(self.in_flight.len());
        if capacity == 0 {
            return;
        }

        for id in self.queue.pending_ids(capacity) {
            let Some(job) = self.queue.get(id).map(|r| MediaJob {
                request_id: r.id,
                character: r.character.clone(),
                text: r.text.clone(),
                scratch_dir: self.scratch_dir.clone(),
                estimated_duration: r.estimated_duration,
            }) else {
                continue;
            };
            self.queue.mark_generating(id);

            let generator = Arc::clone(&self.generator);
            let results = self.results_tx.clone();
            let handle = tokio::spawn(async move {
                let result = generator.generate(&job).await;
                // Only fails once the manager is gone.
                let _ = results.send(GenerationResult { id, result });
            });
            self.in_flight.insert(id, handle);
        }
    }

    /// Emit an event if a callback is registered.
    fn emit_event(&self, event: ManagerEvent) {
        if let Some(ref callback) = self.callback {
            callback(&event);
        }
    }

    pub fn is_muted(&self) -> bool {
        self.mute.is_muted()
    }

    pub fn registry(&self) -> &CharacterRegistry {
        &self.registry
    }

    pub fn queue(&self) -> &PlaybackQueue {
        &self.queue
    }

    pub fn request_state(&self, id: RequestId) -> Option<RequestState> {
        self.queue.get(id).map(PlaybackRequest::state)
    }

    /// Generation tasks started and not yet reported back, including
    /// abandoned ones.
    pub fn in_flight(&self) -> usize {
        self.in_flight.len()
    }

    /// In-flight tasks whose request has already expired.
    pub fn abandoned(&self) -> usize {
        self.abandoned.len()
    }
}

fn now_playing(request: &PlaybackRequest) -> ManagerEvent {
    let (audio, image) = request
        .media
        .as_ref()
        .map(|m| (m.audio.clone(), m.image.clone()))
        .unwrap_or_default();

    ManagerEvent::NowPlaying {
        id: request.id,
        character: request.character.name.clone(),
        text: request.text.clone(),
        audio,
        image,
    }
}

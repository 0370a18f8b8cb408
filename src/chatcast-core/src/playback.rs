//! Playback queue and timer progression.
//!
//! Requests are served strictly in arrival order. Only the head of the queue
//! can become active, so at most one request plays at a time. All state
//! transitions are keyed on elapsed time, never on tick count, so jittery or
//! skipped ticks only delay progress.

use std::collections::VecDeque;
use std::path::PathBuf;
use std::time::{Duration, Instant};

use crate::character::{Character, ChatIdentity};
use crate::media::GeneratedMedia;

pub type RequestId = u64;

/// Lifecycle of a playback request.
///
/// `Pending -> Generating -> Ready -> Active -> Done`, with `Expired`
/// reachable from the three states before `Active`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RequestState {
    Pending,
    Generating,
    Ready,
    Active,
    Done,
    Expired,
}

impl RequestState {
    pub fn is_terminal(self) -> bool {
        matches!(self, RequestState::Done | RequestState::Expired)
    }
}

/// One chat message on its way to being played.
#[derive(Debug, Clone)]
pub struct PlaybackRequest {
    pub id: RequestId,
    pub speaker: ChatIdentity,
    pub character: Character,
    /// Sanitized message text handed to the generators.
    pub text: String,
    pub media: Option<GeneratedMedia>,
    pub created_at: Instant,
    /// Playback length used when the generated audio has no known duration.
    pub estimated_duration: Duration,
    state: RequestState,
    ready_at: Option<Instant>,
    activated_at: Option<Instant>,
}

impl PlaybackRequest {
    pub fn new(
        id: RequestId,
        speaker: ChatIdentity,
        character: Character,
        text: impl Into<String>,
        estimated_duration: Duration,
        created_at: Instant,
    ) -> Self {
        Self {
            id,
            speaker,
            character,
            text: text.into(),
            media: None,
            created_at,
            estimated_duration,
            state: RequestState::Pending,
            ready_at: None,
            activated_at: None,
        }
    }

    pub fn state(&self) -> RequestState {
        self.state
    }

    /// How long this request occupies the active slot.
    pub fn playback_window(&self, gap: Duration) -> Duration {
        self.media
            .as_ref()
            .and_then(|m| m.duration)
            .unwrap_or(self.estimated_duration)
            + gap
    }

    /// Media files backing this request, for reclaiming.
    pub fn media_paths(&self) -> Vec<PathBuf> {
        self.media
            .as_ref()
            .map(GeneratedMedia::paths)
            .unwrap_or_default()
    }

    fn is_stale(&self, now: Instant, timing: &QueueTiming) -> bool {
        match self.state {
            RequestState::Expired => true,
            RequestState::Pending | RequestState::Generating => {
                now.saturating_duration_since(self.created_at) >= timing.generation_timeout
            }
            RequestState::Ready => self
                .ready_at
                .is_some_and(|t| now.saturating_duration_since(t) >= timing.ready_timeout),
            RequestState::Active | RequestState::Done => false,
        }
    }
}

/// Time limits applied by [`PlaybackQueue::tick`].
#[derive(Debug, Clone, Copy)]
pub struct QueueTiming {
    /// A request still pending or generating after this long is expired.
    pub generation_timeout: Duration,
    /// A ready request that waited this long without playing is expired.
    pub ready_timeout: Duration,
    /// Silence kept after each request before the next one may start.
    pub gap: Duration,
}

impl Default for QueueTiming {
    fn default() -> Self {
        Self {
            generation_timeout: Duration::from_secs(30),
            ready_timeout: Duration::from_secs(120),
            gap: Duration::from_millis(500),
        }
    }
}

/// What a single tick changed.
#[derive(Debug, Default)]
pub struct TickReport {
    pub promoted: Option<RequestId>,
    pub finished: Vec<PlaybackRequest>,
    pub expired: Vec<PlaybackRequest>,
}

impl TickReport {
    pub fn is_empty(&self) -> bool {
        self.promoted.is_none() && self.finished.is_empty() && self.expired.is_empty()
    }

    /// Media files of every request that left the queue during this tick.
    pub fn reclaimable_paths(&self) -> Vec<PathBuf> {
        self.finished
            .iter()
            .chain(self.expired.iter())
            .flat_map(PlaybackRequest::media_paths)
            .collect()
    }
}

pub struct PlaybackQueue {
    requests: VecDeque<PlaybackRequest>,
    timing: QueueTiming,
}

impl PlaybackQueue {
    pub fn new(timing: QueueTiming) -> Self {
        Self {
            requests: VecDeque::new(),
            timing,
        }
    }

    /// Append a request at the tail.
    pub fn enqueue(&mut self, request: PlaybackRequest) {
        self.requests.push_back(request);
    }

    /// Advance the queue to `now`: promote, complete, sweep.
    pub fn tick(&mut self, now: Instant) -> TickReport {
        let mut report = TickReport::default();

        if let Some(head) = self.requests.front_mut() {
            if head.state == RequestState::Ready {
                head.state = RequestState::Active;
                head.activated_at = Some(now);
                report.promoted = Some(head.id);
            }
        }

        let gap = self.timing.gap;
        let head_finished = self.requests.front().is_some_and(|head| {
            head.state == RequestState::Active
                && head.activated_at.is_some_and(|started| {
                    now.saturating_duration_since(started) >= head.playback_window(gap)
                })
        });
        if head_finished {
            if let Some(mut done) = self.requests.pop_front() {
                done.state = RequestState::Done;
                report.finished.push(done);
            }
        }

        let mut kept = VecDeque::with_capacity(self.requests.len());
        for mut request in self.requests.drain(..) {
            if request.is_stale(now, &self.timing) {
                request.state = RequestState::Expired;
                report.expired.push(request);
            } else {
                kept.push_back(request);
            }
        }
        self.requests = kept;

        report
    }

    pub fn mark_generating(&mut self, id: RequestId) -> bool {
        match self.get_mut(id) {
            Some(r) if r.state == RequestState::Pending => {
                r.state = RequestState::Generating;
                true
            }
            _ => false,
        }
    }

    /// Attach generated media. Returns `false` if the request is gone or no
    /// longer waiting for media, in which case the caller owns the files.
    pub fn mark_ready(&mut self, id: RequestId, media: GeneratedMedia, now: Instant) -> bool {
        match self.get_mut(id) {
            Some(r) if matches!(r.state, RequestState::Pending | RequestState::Generating) => {
                r.media = Some(media);
                r.state = RequestState::Ready;
                r.ready_at = Some(now);
                true
            }
            _ => false,
        }
    }

    /// Generation failed: the request expires and is swept on the next tick.
    pub fn mark_failed(&mut self, id: RequestId) -> bool {
        match self.get_mut(id) {
            Some(r) if matches!(r.state, RequestState::Pending | RequestState::Generating) => {
                r.state = RequestState::Expired;
                true
            }
            _ => false,
        }
    }

    /// Remove every request, active one included.
    pub fn clear(&mut self) -> Vec<PlaybackRequest> {
        self.requests
            .drain(..)
            .map(|mut r| {
                if !r.state.is_terminal() {
                    r.state = RequestState::Expired;
                }
                r
            })
            .collect()
    }

    /// Ids of the oldest `limit` requests still waiting for generation.
    pub fn pending_ids(&self, limit: usize) -> Vec<RequestId> {
        self.requests
            .iter()
            .filter(|r| r.state == RequestState::Pending)
            .take(limit)
            .map(|r| r.id)
            .collect()
    }

    pub fn count_in(&self, state: RequestState) -> usize {
        self.requests.iter().filter(|r| r.state == state).count()
    }

    pub fn active(&self) -> Option<&PlaybackRequest> {
        self.requests
            .front()
            .filter(|r| r.state == RequestState::Active)
    }

    pub fn get(&self, id: RequestId) -> Option<&PlaybackRequest> {
        self.requests.iter().find(|r| r.id == id)
    }

    fn get_mut(&mut self, id: RequestId) -> Option<&mut PlaybackRequest> {
        self.requests.iter_mut().find(|r| r.id == id)
    }

    pub fn iter(&self) -> impl Iterator<Item = &PlaybackRequest> {
        self.requests.iter()
    }

    pub fn len(&self) -> usize {
        self.requests.len()
    }

    pub fn is_empty(&self) -> bool {
        self.requests.is_empty()
    }
}

//! Media generation for playback requests.
//!
//! Generators turn a message into files in the scratch directory. The
//! manager only keeps the resulting paths and deletes them once the request
//! has been played or has expired.

pub mod image;
pub mod tts;

use async_trait::async_trait;
use regex::Regex;
use std::io::ErrorKind;
use std::path::{Path, PathBuf};
use std::sync::{Arc, LazyLock};
use std::time::Duration;

use crate::character::Character;
use crate::error::ChatCastError;
use crate::playback::RequestId;

pub use image::ImageClient;
pub use tts::{KokoroSpeech, SilentSpeech, SpeechSynthesizer};

/// Extensions of files the bot writes into the scratch directory.
pub const MEDIA_EXTENSIONS: &[&str] = &["mp3", "wav", "png", "jpeg", "jpg"];

static URL_RE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"(?i)\b(?:https?://|www\.)\S+").expect("url pattern is valid"));
static WS_RE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"\s+").expect("whitespace pattern is valid"));

/// Files produced for one request.
#[derive(Debug, Clone, PartialEq)]
pub struct GeneratedMedia {
    pub audio: PathBuf,
    pub image: Option<PathBuf>,
    /// Length of the audio, when the backend knows it.
    pub duration: Option<Duration>,
}

impl GeneratedMedia {
    pub fn paths(&self) -> Vec<PathBuf> {
        std::iter::once(self.audio.clone())
            .chain(self.image.clone())
            .collect()
    }
}

/// Everything a generator needs to render one message.
#[derive(Debug, Clone)]
pub struct MediaJob {
    pub request_id: RequestId,
    pub character: Character,
    pub text: String,
    pub scratch_dir: PathBuf,
    pub estimated_duration: Duration,
}

impl MediaJob {
    /// Path in the scratch directory for this job with the given extension.
    pub fn output_path(&self, extension: &str) -> PathBuf {
        self.scratch_dir
            .join(format!("{}-{}.{}", self.request_id, self.character.id, extension))
    }
}

/// Backend that renders a message to media files.
#[async_trait]
pub trait MediaGenerator: Send + Sync {
    async fn generate(&self, job: &MediaJob) -> Result<GeneratedMedia, ChatCastError>;
}

/// Speech plus an optional portrait per message.
///
/// A failed portrait only costs the image; a failed speech synthesis fails
/// the whole job.
pub struct CharacterMediaGenerator {
    speech: Arc<dyn SpeechSynthesizer>,
    image: Option<ImageClient>,
}

impl CharacterMediaGenerator {
    pub fn new(speech: Arc<dyn SpeechSynthesizer>) -> Self {
        Self {
            speech,
            image: None,
        }
    }

    pub fn with_images(mut self, client: ImageClient) -> Self {
        self.image = Some(client);
        self
    }
}

#[async_trait]
impl MediaGenerator for CharacterMediaGenerator {
    async fn generate(&self, job: &MediaJob) -> Result<GeneratedMedia, ChatCastError> {
        let audio_path = job.output_path("wav");

        let (speech, image) = match &self.image {
            Some(client) => {
                let (speech, image) = tokio::join!(
                    self.speech.synthesize(job, &audio_path),
                    client.generate(job)
                );
                (speech, Some(image))
            }
            None => (self.speech.synthesize(job, &audio_path).await, None),
        };

        let image = match image {
            Some(Ok(path)) => Some(path),
            Some(Err(e)) => {
                tracing::warn!(request = job.request_id, error = %e, "portrait generation failed");
                None
            }
            None => None,
        };

        match speech {
            Ok(duration) => Ok(GeneratedMedia {
                audio: audio_path,
                image,
                duration,
            }),
            Err(e) => {
                if let Some(path) = &image {
                    remove_media_file(path);
                }
                Err(ChatCastError::Generation(e.to_string()))
            }
        }
    }
}

/// Prepare text for synthesis: drop links, collapse whitespace and cut to
/// `max_chars` characters.
pub fn sanitize_text(text: &str, max_chars: usize) -> String {
    let without_links = URL_RE.replace_all(text, "");
    let collapsed = WS_RE.replace_all(&without_links, " ");
    let trimmed = collapsed.trim();

    match trimmed.char_indices().nth(max_chars) {
        Some((cut, _)) => trimmed[..cut].trim_end().to_string(),
        None => trimmed.to_string(),
    }
}

/// Rough speaking time for `text`, never below `minimum`.
pub fn estimate_duration(text: &str, chars_per_second: f32, minimum: Duration) -> Duration {
    if !(chars_per_second.is_finite() && chars_per_second > 0.0) {
        return minimum;
    }
    let secs = text.chars().count() as f32 / chars_per_second;
    Duration::try_from_secs_f32(secs).map_or(minimum, |estimate| estimate.max(minimum))
}

/// Create `dir` if needed and delete any media files left from an earlier run.
pub fn clear_scratch_dir(dir: &Path) -> Result<usize, ChatCastError> {
    std::fs::create_dir_all(dir)?;

    let mut removed = 0;
    for entry in std::fs::read_dir(dir)? {
        let path = entry?.path();
        let is_media = path
            .extension()
            .and_then(|e| e.to_str())
            .is_some_and(|e| MEDIA_EXTENSIONS.contains(&e.to_ascii_lowercase().as_str()));
        if is_media && path.is_file() && remove_media_file(&path) {
            removed += 1;
        }
    }

    tracing::info!(dir = %dir.display(), removed, "cleared scratch directory");
    Ok(removed)
}

/// Delete a generated file. A missing file counts as deleted; other
/// failures are logged and reported as `false`.
pub fn remove_media_file(path: &Path) -> bool {
    match std::fs::remove_file(path) {
        Ok(()) => true,
        Err(e) if e.kind() == ErrorKind::NotFound => true,
        Err(e) => {
            tracing::warn!(path = %path.display(), error = %e, "failed to reclaim media file");
            false
        }
    }
}

/// Delete every path, continuing past failures. Returns how many are gone.
pub fn reclaim<I, P>(paths: I) -> usize
where
    I: IntoIterator<Item = P>,
    P: AsRef<Path>,
{
    paths
        .into_iter()
        .filter(|p| remove_media_file(p.as_ref()))
        .count()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_sanitize_strips_links_and_whitespace() {
        let text = "check   this\nout https://example.com/x?y=1 now";
        assert_eq!(sanitize_text(text, 200), "check this out now");
    }

    #[test]
    fn test_sanitize_truncates_on_char_boundary() {
        assert_eq!(sanitize_text("héllo wörld", 7), "héllo w");
        assert_eq!(sanitize_text("short", 50), "short");
        assert_eq!(sanitize_text("   ", 50), "");
    }

    #[test]
    fn test_estimate_duration() {
        let min = Duration::from_millis(1500);
        assert_eq!(estimate_duration("hi", 10.0, min), min);
        assert_eq!(
            estimate_duration(&"a".repeat(50), 10.0, min),
            Duration::from_secs(5)
        );
        assert_eq!(estimate_duration("anything", 0.0, min), min);
    }

    #[test]
    fn test_estimate_duration_survives_degenerate_rates() {
        let min = Duration::from_millis(1500);
        for rate in [f32::NAN, f32::INFINITY, f32::NEG_INFINITY, 1e-39] {
            assert_eq!(estimate_duration("hello chat", rate, min), min, "rate {rate}");
        }
    }

    #[test]
    fn test_clear_scratch_dir_keeps_other_files() {
        let dir = tempfile::tempdir().unwrap();
        for name in ["a.mp3", "b.png", "c.jpeg", "d.wav", "keep.txt"] {
            std::fs::write(dir.path().join(name), b"x").unwrap();
        }

        let removed = clear_scratch_dir(dir.path()).unwrap();

        assert_eq!(removed, 4);
        assert!(dir.path().join("keep.txt").exists());
        assert!(!dir.path().join("a.mp3").exists());
    }

    #[test]
    fn test_clear_scratch_dir_creates_missing_dir() {
        let dir = tempfile::tempdir().unwrap();
        let scratch = dir.path().join("local");

        assert_eq!(clear_scratch_dir(&scratch).unwrap(), 0);
        assert!(scratch.is_dir());
    }

    #[test]
    fn test_reclaim_tolerates_missing_files() {
        let dir = tempfile::tempdir().unwrap();
        let present = dir.path().join("1-a.wav");
        std::fs::write(&present, b"x").unwrap();
        let missing = dir.path().join("2-a.wav");

        assert_eq!(reclaim([&present, &missing]), 2);
        assert!(!present.exists());
    }

    #[test]
    fn test_output_path_names_request_and_character() {
        let job = MediaJob {
            request_id: 7,
            character: Character::new("knight", "Sir Reginald", "bm_george"),
            text: "hello".to_string(),
            scratch_dir: PathBuf::from("local"),
            estimated_duration: Duration::from_secs(1),
        };
        assert_eq!(job.output_path("wav"), PathBuf::from("local/7-knight.wav"));
    }
}

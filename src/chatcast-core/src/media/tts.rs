//! Speech synthesis for character voices.

use async_trait::async_trait;
use kokoro_tiny::TtsEngine;
use std::path::Path;
use std::sync::{Arc, Mutex};
use std::time::Duration;

use crate::character::Character;
use crate::error::ChatCastError;
use crate::media::MediaJob;

/// Sample rate of kokoro output.
pub const SAMPLE_RATE: u32 = 24_000;

/// Renders a job's text to a WAV file at `path`, returning the audio length
/// when known.
#[async_trait]
pub trait SpeechSynthesizer: Send + Sync {
    async fn synthesize(
        &self,
        job: &MediaJob,
        path: &Path,
    ) -> Result<Option<Duration>, ChatCastError>;
}

/// Kokoro TTS shared between generation tasks.
///
/// Synthesis is CPU bound, so it runs on the blocking pool one job at a time.
pub struct KokoroSpeech {
    engine: Arc<Mutex<TtsEngine>>,
    available_voices: Vec<String>,
}

impl KokoroSpeech {
    /// Initialize the TTS engine (downloads model on first run).
    pub async fn new() -> Result<Self, ChatCastError> {
        let engine = TtsEngine::new()
            .await
            .map_err(|e| ChatCastError::TtsError(format!("Failed to initialize TTS: {}", e)))?;

        let available_voices = engine.voices();

        Ok(Self {
            engine: Arc::new(Mutex::new(engine)),
            available_voices,
        })
    }

    /// Get list of available voice IDs.
    pub fn available_voices(&self) -> &[String] {
        &self.available_voices
    }

    /// Validate that a voice ID exists.
    pub fn validate_voice(&self, voice_id: &str) -> Result<(), ChatCastError> {
        if voice_id.is_empty() {
            return Err(ChatCastError::TtsError(format!(
                "Voice ID cannot be empty. Available voices:\n{}",
                self.format_available_voices()
            )));
        }

        if !self.available_voices.iter().any(|v| v == voice_id) {
            return Err(ChatCastError::TtsError(format!(
                "Unknown voice '{}'. Available voices:\n{}",
                voice_id,
                self.format_available_voices()
            )));
        }

        Ok(())
    }

    /// Validate the voice of every roster character.
    pub fn validate_roster(&self, roster: &[Character]) -> Result<(), ChatCastError> {
        for character in roster {
            self.validate_voice(&character.voice).map_err(|e| {
                ChatCastError::ConfigError(format!("Character '{}': {}", character.id, e))
            })?;
        }
        Ok(())
    }

    fn format_available_voices(&self) -> String {
        let mut voices: Vec<&String> = self.available_voices.iter().collect();
        voices.sort();

        voices
            .iter()
            .map(|v| format!("  - {}", v))
            .collect::<Vec<_>>()
            .join("\n")
    }
}

#[async_trait]
impl SpeechSynthesizer for KokoroSpeech {
    async fn synthesize(
        &self,
        job: &MediaJob,
        path: &Path,
    ) -> Result<Option<Duration>, ChatCastError> {
        self.validate_voice(&job.character.voice)?;

        let engine = Arc::clone(&self.engine);
        let text = job.text.clone();
        let voice = job.character.voice.clone();
        let speed = job.character.speed;
        let path = path.to_path_buf();

        tokio::task::spawn_blocking(move || -> Result<Option<Duration>, ChatCastError> {
            let mut engine = engine
                .lock()
                .map_err(|_| ChatCastError::TtsError("TTS engine lock poisoned".to_string()))?;
            let samples = synthesize_chunks(&mut engine, &text, &voice)?;
            drop(engine);

            let samples = adjust_audio_speed(samples, speed);
            write_wav(&path, &samples)?;
            Ok(Some(samples_duration(samples.len())))
        })
        .await
        .map_err(|e| ChatCastError::TtsError(format!("Synthesis task failed: {}", e)))?
    }
}

/// Writes silence of the estimated length. Lets the bot run end to end
/// without a TTS model.
#[derive(Debug, Default, Clone, Copy)]
pub struct SilentSpeech;

#[async_trait]
impl SpeechSynthesizer for SilentSpeech {
    async fn synthesize(
        &self,
        job: &MediaJob,
        path: &Path,
    ) -> Result<Option<Duration>, ChatCastError> {
        let len = (job.estimated_duration.as_secs_f32() * SAMPLE_RATE as f32) as usize;
        let path = path.to_path_buf();

        tokio::task::spawn_blocking(move || -> Result<Option<Duration>, ChatCastError> {
            write_wav(&path, &vec![0.0; len])?;
            Ok(Some(samples_duration(len)))
        })
        .await
        .map_err(|e| ChatCastError::TtsError(format!("Synthesis task failed: {}", e)))?
    }
}

/// Kokoro rejects long inputs, so text is voiced a chunk at a time with a
/// short pause between chunks.
fn synthesize_chunks(
    engine: &mut TtsEngine,
    text: &str,
    voice_id: &str,
) -> Result<Vec<f32>, ChatCastError> {
    let mut all_samples = Vec::new();

    for chunk in split_into_chunks(text, 200) {
        let samples = engine
            .synthesize(&chunk, Some(voice_id))
            .map_err(|e| ChatCastError::TtsError(format!("Synthesis failed: {}", e)))?;

        all_samples.extend(samples);
        all_samples.extend(std::iter::repeat_n(0.0, SAMPLE_RATE as usize / 5));
    }

    if all_samples.is_empty() {
        return Err(ChatCastError::TtsError("Nothing to synthesize".to_string()));
    }

    Ok(all_samples)
}

/// Write mono 16-bit PCM at [`SAMPLE_RATE`].
pub fn write_wav(path: &Path, samples: &[f32]) -> Result<(), ChatCastError> {
    let spec = hound::WavSpec {
        channels: 1,
        sample_rate: SAMPLE_RATE,
        bits_per_sample: 16,
        sample_format: hound::SampleFormat::Int,
    };

    let wav_err = |e: hound::Error| ChatCastError::TtsError(format!("Failed to write WAV: {}", e));
    let mut writer = hound::WavWriter::create(path, spec).map_err(wav_err)?;
    for &sample in samples {
        let value = (sample.clamp(-1.0, 1.0) * f32::from(i16::MAX)) as i16;
        writer.write_sample(value).map_err(wav_err)?;
    }
    writer.finalize().map_err(wav_err)
}

fn samples_duration(len: usize) -> Duration {
    Duration::from_secs_f64(len as f64 / f64::from(SAMPLE_RATE))
}

/// Pack whole words into chunks of at most `max_chars`, closing a chunk
/// early at sentence ends once it is half full. A single word longer than
/// the limit becomes its own chunk.
fn split_into_chunks(text: &str, max_chars: usize) -> Vec<String> {
    let mut chunks = Vec::new();
    let mut chunk = String::new();

    for word in text.split_whitespace() {
        if !chunk.is_empty() && chunk.len() + 1 + word.len() > max_chars {
            chunks.push(std::mem::take(&mut chunk));
        }
        if !chunk.is_empty() {
            chunk.push(' ');
        }
        chunk.push_str(word);

        if chunk.len() * 2 >= max_chars && word.ends_with(['.', '!', '?']) {
            chunks.push(std::mem::take(&mut chunk));
        }
    }
    if !chunk.is_empty() {
        chunks.push(chunk);
    }

    chunks
}

/// Resample by linear interpolation so the clip plays `rate` times faster.
/// Rates at or below zero, or within a hair of 1.0, leave samples untouched.
pub fn adjust_audio_speed(samples: Vec<f32>, rate: f32) -> Vec<f32> {
    if rate <= 0.0 || (rate - 1.0).abs() < 0.001 || samples.is_empty() {
        return samples;
    }

    let out_len = (samples.len() as f32 / rate) as usize;
    let last = samples.len() - 1;
    (0..out_len)
        .map(|i| {
            let pos = i as f32 * rate;
            let lo = (pos as usize).min(last);
            let hi = (lo + 1).min(last);
            let t = pos - lo as f32;
            samples[lo] + (samples[hi] - samples[lo]) * t
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::path::PathBuf;

    #[test]
    fn test_split_into_chunks() {
        let text = "Hello world. This is a test. Another sentence here.";
        let chunks = split_into_chunks(text, 30);
        assert_eq!(
            chunks,
            vec!["Hello world. This is a test.", "Another sentence here."]
        );
        assert!(chunks.iter().all(|c| c.len() <= 30));
    }

    #[test]
    fn test_split_short_message_is_single_chunk() {
        assert_eq!(split_into_chunks("  hello   chat ", 200), vec!["hello chat"]);
        assert!(split_into_chunks("   ", 200).is_empty());
    }

    #[test]
    fn test_adjust_audio_speed() {
        let samples = vec![0.5; 100];
        assert_eq!(adjust_audio_speed(samples.clone(), 1.0).len(), 100);
        assert_eq!(adjust_audio_speed(samples.clone(), 2.0).len(), 50);
        assert_eq!(adjust_audio_speed(samples, 0.5).len(), 200);
    }

    #[tokio::test]
    async fn test_silent_speech_writes_wav_of_estimated_length() {
        let dir = tempfile::tempdir().unwrap();
        let job = MediaJob {
            request_id: 1,
            character: Character::new("a", "Character A", "bf_emma"),
            text: "hello".to_string(),
            scratch_dir: PathBuf::from(dir.path()),
            estimated_duration: Duration::from_millis(500),
        };
        let path = job.output_path("wav");

        let duration = SilentSpeech.synthesize(&job, &path).await.unwrap();

        assert_eq!(duration, Some(Duration::from_millis(500)));
        let reader = hound::WavReader::open(&path).unwrap();
        assert_eq!(reader.spec().sample_rate, SAMPLE_RATE);
        assert_eq!(reader.duration(), 12_000);
    }
}

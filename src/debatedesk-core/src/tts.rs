//! Text-to-speech playback for opponent replies.
//!
//! `Speaker` enforces the playback contract on top of a platform backend:
//! one utterance at a time, locale-matched voice selection, and failures
//! that are logged rather than returned.

use std::sync::Arc;

use tracing::{debug, warn};

use crate::error::DebateError;

/// A voice offered by a backend.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Voice {
    pub id: String,
    /// BCP 47 style locale, e.g. `zh-CN`.
    pub locale: String,
}

/// Text to speak plus the chosen voice.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Utterance {
    pub text: String,
    pub language: String,
    /// `None` means the backend's default voice.
    pub voice: Option<Voice>,
}

/// Platform speech synthesis.
pub trait SpeechBackend: Send + Sync {
    fn is_supported(&self) -> bool;

    fn voices(&self) -> Vec<Voice>;

    /// Stop whatever is being spoken. A no-op when idle.
    fn cancel(&self);

    fn speak(&self, utterance: Utterance) -> Result<(), DebateError>;
}

/// Backend for hosts without speech synthesis.
#[derive(Debug, Default, Clone, Copy)]
pub struct NoPlayback;

impl SpeechBackend for NoPlayback {
    fn is_supported(&self) -> bool {
        false
    }

    fn voices(&self) -> Vec<Voice> {
        Vec::new()
    }

    fn cancel(&self) {}

    fn speak(&self, _utterance: Utterance) -> Result<(), DebateError> {
        Err(DebateError::UnsupportedCapability(
            crate::error::Capability::SpeechSynthesis,
        ))
    }
}

/// What happened to a speak request.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum PlaybackOutcome {
    Started { voice: Option<String> },
    /// Synthesis is unavailable; the note should be shown with the text.
    Unsupported { note: String },
    /// The backend failed; already logged.
    Failed,
}

impl PlaybackOutcome {
    pub fn note(&self) -> Option<String> {
        match self {
            PlaybackOutcome::Unsupported { note } => Some(note.clone()),
            _ => None,
        }
    }
}

/// Fire-and-forget playback front end.
pub struct Speaker {
    backend: Arc<dyn SpeechBackend>,
    language: String,
    preferred_voice: Option<String>,
    unsupported_note: String,
}

impl Speaker {
    pub fn new(
        backend: Arc<dyn SpeechBackend>,
        language: impl Into<String>,
        unsupported_note: impl Into<String>,
    ) -> Self {
        Self {
            backend,
            language: language.into(),
            preferred_voice: None,
            unsupported_note: unsupported_note.into(),
        }
    }

    /// Prefer a specific voice id when the backend offers it.
    pub fn with_voice(mut self, voice_id: Option<String>) -> Self {
        self.preferred_voice = voice_id;
        self
    }

    /// Speak `text`, cancelling any utterance still in progress.
    pub fn speak(&self, text: &str) -> PlaybackOutcome {
        if !self.backend.is_supported() {
            debug!("Speech synthesis unsupported, skipping playback");
            return PlaybackOutcome::Unsupported {
                note: self.unsupported_note.clone(),
            };
        }

        self.backend.cancel();

        let voices = self.backend.voices();
        let voice = self
            .preferred_voice
            .as_ref()
            .and_then(|id| voices.iter().find(|v| &v.id == id).cloned())
            .or_else(|| select_voice(&voices, &self.language));
        let voice_id = voice.as_ref().map(|v| v.id.clone());

        let utterance = Utterance {
            text: text.to_string(),
            language: self.language.clone(),
            voice,
        };

        match self.backend.speak(utterance) {
            Ok(()) => PlaybackOutcome::Started { voice: voice_id },
            Err(e) => {
                warn!(error = %e, "Playback failed");
                PlaybackOutcome::Failed
            }
        }
    }
}

/// Pick the first voice whose locale shares the target's primary language.
pub fn select_voice(voices: &[Voice], language: &str) -> Option<Voice> {
    let primary = primary_language(language);
    voices
        .iter()
        .find(|v| primary_language(&v.locale) == primary)
        .cloned()
}

fn primary_language(locale: &str) -> String {
    locale
        .split(['-', '_'])
        .next()
        .unwrap_or_default()
        .to_ascii_lowercase()
}

const SENTENCE_ENDS: &[char] = &['.', '!', '?', ';', '。', '！', '？', '；'];
const CLAUSE_ENDS: &[char] = &[',', '，', '、'];

/// Pack text into pieces of at most `max_chars` for synthesis.
///
/// Sentences stay whole where they fit; a sentence longer than the limit is
/// broken at clause punctuation instead.
pub fn split_into_chunks(text: &str, max_chars: usize) -> Vec<String> {
    let pieces = text
        .split_inclusive(SENTENCE_ENDS)
        .map(str::trim)
        .filter(|s| !s.is_empty())
        .flat_map(|sentence| {
            if sentence.chars().count() > max_chars {
                sentence
                    .split_inclusive(CLAUSE_ENDS)
                    .map(str::trim)
                    .filter(|s| !s.is_empty())
                    .collect::<Vec<_>>()
            } else {
                vec![sentence]
            }
        });

    let mut chunks: Vec<String> = Vec::new();
    let mut len = 0;
    for piece in pieces {
        let piece_len = piece.chars().count();
        match chunks.last_mut() {
            Some(chunk) if len + piece_len < max_chars => {
                // CJK text runs on without a separator.
                if chunk.chars().next_back().is_some_and(|c| c.is_ascii()) {
                    chunk.push(' ');
                    len += 1;
                }
                chunk.push_str(piece);
                len += piece_len;
            }
            _ => {
                chunks.push(piece.to_string());
                len = piece_len;
            }
        }
    }
    chunks
}

#[cfg(feature = "kokoro")]
pub use kokoro::KokoroPlayback;

#[cfg(feature = "kokoro")]
mod kokoro {
    use std::path::{Path, PathBuf};
    use std::sync::atomic::{AtomicU64, Ordering};
    use std::sync::{Arc, Mutex};

    use kokoro_tiny::TtsEngine;
    use tracing::{info, warn};

    use super::{SpeechBackend, Utterance, Voice, split_into_chunks};
    use crate::error::DebateError;

    const SAMPLE_RATE: u32 = 24_000;
    // 0.3 s between chunks, 0.5 s after the last one.
    const CHUNK_GAP: usize = 7_200;
    const TRAILING_PAD: usize = 12_000;
    const CHUNK_CHARS: usize = 200;

    /// Renders each utterance to a WAV file with Kokoro.
    ///
    /// A newer utterance supersedes one that is still rendering; the stale
    /// render is discarded instead of written.
    pub struct KokoroPlayback {
        engine: Arc<Mutex<TtsEngine>>,
        voices: Vec<Voice>,
        output_dir: PathBuf,
        epoch: Arc<AtomicU64>,
    }

    impl KokoroPlayback {
        /// Initialize the TTS engine (downloads model on first run).
        pub async fn new(output_dir: impl Into<PathBuf>) -> Result<Self, DebateError> {
            let engine = TtsEngine::new()
                .await
                .map_err(|e| DebateError::TtsError(format!("Failed to initialize TTS: {}", e)))?;

            let voices = engine
                .voices()
                .into_iter()
                .map(|id| {
                    let locale = kokoro_locale(&id).to_string();
                    Voice { id, locale }
                })
                .collect();

            let output_dir = output_dir.into();
            std::fs::create_dir_all(&output_dir)
                .map_err(|e| DebateError::TtsError(format!("Failed to create output dir: {}", e)))?;

            Ok(Self {
                engine: Arc::new(Mutex::new(engine)),
                voices,
                output_dir,
                epoch: Arc::new(AtomicU64::new(0)),
            })
        }
    }

    /// Locale implied by a Kokoro voice id prefix (`zf_xiaobei` → `zh-CN`).
    pub(super) fn kokoro_locale(voice_id: &str) -> &'static str {
        match voice_id.chars().next() {
            Some('a') => "en-US",
            Some('b') => "en-GB",
            Some('z') => "zh-CN",
            Some('j') => "ja-JP",
            Some('e') => "es-ES",
            Some('f') => "fr-FR",
            Some('h') => "hi-IN",
            Some('i') => "it-IT",
            Some('p') => "pt-BR",
            _ => "und",
        }
    }

    fn write_wav(path: &Path, samples: &[f32]) -> Result<(), DebateError> {
        let spec = hound::WavSpec {
            channels: 1,
            sample_rate: SAMPLE_RATE,
            bits_per_sample: 32,
            sample_format: hound::SampleFormat::Float,
        };
        let to_err = |e: hound::Error| DebateError::TtsError(format!("Failed to save WAV: {}", e));

        let mut writer = hound::WavWriter::create(path, spec).map_err(to_err)?;
        for &sample in samples {
            writer.write_sample(sample).map_err(to_err)?;
        }
        writer.finalize().map_err(to_err)
    }

    impl SpeechBackend for KokoroPlayback {
        fn is_supported(&self) -> bool {
            true
        }

        fn voices(&self) -> Vec<Voice> {
            self.voices.clone()
        }

        fn cancel(&self) {
            self.epoch.fetch_add(1, Ordering::SeqCst);
        }

        fn speak(&self, utterance: Utterance) -> Result<(), DebateError> {
            let epoch = self.epoch.fetch_add(1, Ordering::SeqCst) + 1;
            let current = self.epoch.clone();
            let engine = self.engine.clone();
            let path = self.output_dir.join(format!("reply-{:04}.wav", epoch));
            let voice_id = utterance.voice.map(|v| v.id);

            tokio::task::spawn_blocking(move || {
                let mut samples = Vec::new();
                for chunk in split_into_chunks(&utterance.text, CHUNK_CHARS) {
                    if current.load(Ordering::SeqCst) != epoch {
                        return;
                    }
                    let mut engine = engine.lock().unwrap_or_else(|p| p.into_inner());
                    match engine.synthesize(&chunk, voice_id.as_deref()) {
                        Ok(chunk_samples) => samples.extend(chunk_samples),
                        Err(e) => {
                            warn!(error = %e, "Synthesis failed");
                            return;
                        }
                    }
                    samples.extend(std::iter::repeat_n(0.0, CHUNK_GAP));
                }
                samples.extend(std::iter::repeat_n(0.0, TRAILING_PAD));

                if current.load(Ordering::SeqCst) != epoch {
                    return;
                }
                match write_wav(&path, &samples) {
                    Ok(()) => info!(path = %path.display(), "Reply rendered"),
                    Err(e) => warn!(error = %e, "Failed to write reply audio"),
                }
            });

            Ok(())
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Mutex;

    #[derive(Default)]
    struct RecordingBackend {
        calls: Mutex<Vec<String>>,
        fail: bool,
    }

    impl SpeechBackend for RecordingBackend {
        fn is_supported(&self) -> bool {
            true
        }

        fn voices(&self) -> Vec<Voice> {
            vec![
                Voice { id: "en-1".into(), locale: "en-US".into() },
                Voice { id: "zh-1".into(), locale: "zh-CN".into() },
                Voice { id: "zh-2".into(), locale: "zh-TW".into() },
            ]
        }

        fn cancel(&self) {
            self.calls.lock().unwrap().push("cancel".to_string());
        }

        fn speak(&self, utterance: Utterance) -> Result<(), DebateError> {
            let voice = utterance.voice.map(|v| v.id).unwrap_or_default();
            self.calls.lock().unwrap().push(format!("speak:{}:{}", voice, utterance.text));
            if self.fail {
                Err(DebateError::TtsError("device busy".into()))
            } else {
                Ok(())
            }
        }
    }

    #[test]
    fn test_select_voice_by_locale() {
        let voices = RecordingBackend::default().voices();
        assert_eq!(select_voice(&voices, "zh-CN").unwrap().id, "zh-1");
        assert_eq!(select_voice(&voices, "en").unwrap().id, "en-1");
        assert_eq!(select_voice(&voices, "ja-JP"), None);
    }

    #[test]
    fn test_speak_cancels_before_starting() {
        let backend = Arc::new(RecordingBackend::default());
        let speaker = Speaker::new(backend.clone(), "zh-CN", "note");

        let outcome = speaker.speak("你好");
        assert_eq!(outcome, PlaybackOutcome::Started { voice: Some("zh-1".into()) });
        speaker.speak("再见");

        let calls = backend.calls.lock().unwrap().clone();
        assert_eq!(
            calls,
            vec!["cancel", "speak:zh-1:你好", "cancel", "speak:zh-1:再见"]
        );
    }

    #[test]
    fn test_default_voice_when_no_locale_match() {
        let backend = Arc::new(RecordingBackend::default());
        let speaker = Speaker::new(backend.clone(), "fr-FR", "note");

        assert_eq!(speaker.speak("bonjour"), PlaybackOutcome::Started { voice: None });
    }

    #[test]
    fn test_preferred_voice_wins() {
        let backend = Arc::new(RecordingBackend::default());
        let speaker = Speaker::new(backend, "zh-CN", "note").with_voice(Some("zh-2".into()));

        assert_eq!(speaker.speak("你好"), PlaybackOutcome::Started { voice: Some("zh-2".into()) });
    }

    #[test]
    fn test_unsupported_returns_note() {
        let speaker = Speaker::new(Arc::new(NoPlayback), "zh-CN", "（不支持）");
        let outcome = speaker.speak("text");
        assert_eq!(outcome.note().as_deref(), Some("（不支持）"));
    }

    #[test]
    fn test_backend_failure_is_swallowed() {
        let backend = Arc::new(RecordingBackend {
            fail: true,
            ..Default::default()
        });
        let speaker = Speaker::new(backend, "zh-CN", "note");
        assert_eq!(speaker.speak("text"), PlaybackOutcome::Failed);
    }

    #[test]
    fn test_split_into_chunks() {
        let text = "Hello world. This is a test. Another sentence here.";
        let chunks = split_into_chunks(text, 30);
        assert_eq!(
            chunks,
            vec!["Hello world. This is a test.", "Another sentence here."]
        );
    }

    #[test]
    fn test_split_overlong_sentence_at_clauses() {
        let chunks = split_into_chunks("第一点很重要，第二点也重要，第三点更重要。", 8);
        assert_eq!(chunks, vec!["第一点很重要，", "第二点也重要，", "第三点更重要。"]);
    }

    #[test]
    fn test_split_into_chunks_cjk() {
        let text = "我方认为政策有效。数据支持这一观点！对方的论证不成立。";
        let chunks = split_into_chunks(text, 12);
        assert_eq!(chunks.len(), 3);
        assert_eq!(chunks[0], "我方认为政策有效。");
    }

    #[cfg(feature = "kokoro")]
    #[test]
    fn test_kokoro_locale() {
        assert_eq!(kokoro::kokoro_locale("zf_xiaobei"), "zh-CN");
        assert_eq!(kokoro::kokoro_locale("bm_george"), "en-GB");
    }
}

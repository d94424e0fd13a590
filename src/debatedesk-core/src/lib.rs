//! DebateDesk Core Library
//!
//! Phase sequencing, per-side speaking clocks, speech capture and the
//! automated opponent turn for a formatted debate session.

pub mod capture;
pub mod clock;
pub mod config;
pub mod controller;
pub mod credentials;
pub mod debate_format;
pub mod error;
pub mod events;
pub mod generator;
pub mod phase;
pub mod sequencer;
pub mod tts;

pub use capture::{ChannelRecognizer, NoRecognizer, SpeechCapture, SpeechRecognizer, TranscriptBuffer, UtteranceFeed};
pub use clock::{ClockStart, format_time};
pub use config::{Config, default_config};
pub use controller::{Controller, NextOutcome, Reply, ReplyTask, RunSnapshot, SessionStatus};
pub use credentials::{CredentialStore, SessionKeyStore};
pub use debate_format::{CollegiateFormat, DebateFormat};
pub use error::DebateError;
pub use events::{DebateCallback, DebateEvent};
pub use generator::ReplyGenerator;
pub use phase::{FreeDebatePolicy, Phase, PhaseKind, Side};
pub use tts::{NoPlayback, PlaybackOutcome, Speaker, SpeechBackend};

//! Events emitted while a debate session runs.

use std::sync::Arc;

use crate::phase::{Phase, Side};

/// Callback for debate events.
pub type DebateCallback = Arc<dyn Fn(DebateEvent) + Send + Sync>;

/// Events emitted during a session.
#[derive(Debug, Clone)]
pub enum DebateEvent {
    /// The session left `Idle`.
    DebateStart { phase: Phase },
    /// A new phase is current.
    PhaseEntered { phase: Phase },
    /// The human side should speak now.
    UserTurn { phase: Phase },
    /// The current phase needs no speech.
    NoSpeech { phase: Phase },
    /// One second was charged to a side.
    Tick { side: Side, remaining: u32 },
    /// A side's budget reached zero and its clock halted.
    TimeExpired { side: Side },
    /// The opponent reply is being generated.
    Thinking { phase: Phase },
    /// The opponent reply is ready and was handed to playback.
    Reply {
        text: String,
        /// Diagnostic note when playback could not run.
        playback_note: Option<String>,
    },
    /// Generating the opponent reply failed.
    ReplyFailed { message: String },
    /// A capture session began listening.
    CaptureStarted,
    /// A capture session produced its final transcript.
    Transcript { text: String },
    /// A capture session failed.
    CaptureFailed { message: String },
    /// A capture session was stopped early.
    CaptureStopped,
    /// The sequence is exhausted.
    DebateEnd,
}

pub(crate) fn emit(callback: &Option<DebateCallback>, event: DebateEvent) {
    if let Some(callback) = callback {
        callback(event);
    }
}

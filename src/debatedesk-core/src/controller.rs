//! Session controller.
//!
//! Drives the phase sequence, the single countdown clock, speech capture and
//! the opponent turn in response to user actions. All session state lives in
//! one `RunState` that only the controller and its tick task touch.
//!
//! Every method must be called from within a Tokio runtime.

use std::sync::{Arc, Mutex, MutexGuard};

use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use crate::capture::{SpeechCapture, SpeechRecognizer, TranscriptBuffer};
use crate::clock::{Budgets, Clock, ClockHandle, ClockStart, TICK_PERIOD, TickControl};
use crate::config::Config;
use crate::error::DebateError;
use crate::events::{DebateCallback, DebateEvent, emit};
use crate::generator::ReplyGenerator;
use crate::phase::{Phase, Side};
use crate::sequencer::PhaseSequencer;
use crate::tts::{PlaybackOutcome, Speaker};

/// Top-level session state.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SessionStatus {
    Idle,
    Running,
    /// Terminal; no further phase transitions are accepted.
    Ended,
}

/// Mutable session state: phase cursor, budgets and the clock.
///
/// The clock can only be running for a side, so "timer running" always
/// implies an active side.
#[derive(Debug)]
pub struct RunState {
    status: SessionStatus,
    sequencer: PhaseSequencer,
    budgets: Budgets,
    clock: Clock,
}

impl RunState {
    pub fn new(phases: Vec<Phase>, budget_secs: u32) -> Result<Self, DebateError> {
        Ok(Self {
            status: SessionStatus::Idle,
            sequencer: PhaseSequencer::new(phases)?,
            budgets: Budgets::new(budget_secs),
            clock: Clock::new(),
        })
    }

    pub fn status(&self) -> SessionStatus {
        self.status
    }

    pub fn current_phase_index(&self) -> usize {
        self.sequencer.index()
    }

    pub fn current_phase(&self) -> &Phase {
        self.sequencer.current()
    }

    pub fn timer_running(&self) -> bool {
        self.clock.is_running()
    }

    /// Side derived from the current phase.
    pub fn active_side(&self) -> Option<Side> {
        self.sequencer.current_side()
    }

    pub fn budgets(&self) -> &Budgets {
        &self.budgets
    }
}

/// Point-in-time copy of the session for display.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RunSnapshot {
    pub status: SessionStatus,
    pub phase: Phase,
    pub timer_running: bool,
    pub active_side: Option<Side>,
    /// Side whose clock is counting down, if any.
    pub running_side: Option<Side>,
    pub budget_a: u32,
    pub budget_b: u32,
}

/// A finished opponent turn.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Reply {
    pub text: String,
    pub playback: PlaybackOutcome,
}

/// The spawned generate-then-speak task of one opponent turn.
///
/// The caller decides whether to await it; dropping it lets the turn finish
/// in the background.
#[derive(Debug)]
pub struct ReplyTask {
    phase: Phase,
    cancel: CancellationToken,
    task: JoinHandle<Result<Reply, DebateError>>,
}

impl ReplyTask {
    pub fn phase(&self) -> &Phase {
        &self.phase
    }

    pub fn is_finished(&self) -> bool {
        self.task.is_finished()
    }

    /// Abort the turn; the pending request resolves with `Cancelled`.
    pub fn cancel(&self) {
        self.cancel.cancel();
    }

    pub async fn join(self) -> Result<Reply, DebateError> {
        match self.task.await {
            Ok(result) => result,
            Err(e) if e.is_cancelled() => Err(DebateError::Cancelled),
            Err(e) => Err(DebateError::Internal(format!("Reply task failed: {}", e))),
        }
    }
}

/// What `next` led to.
#[derive(Debug)]
pub enum NextOutcome {
    /// The sequence is exhausted; the session has ended.
    Ended,
    /// The human side speaks.
    UserTurn { phase: Phase },
    /// The remote model answers; the phase change is already complete.
    OpponentTurn { phase: Phase, reply: ReplyTask },
    /// Nobody speaks in this phase.
    NoSpeech { phase: Phase },
}

impl NextOutcome {
    pub fn phase(&self) -> Option<&Phase> {
        match self {
            NextOutcome::Ended => None,
            NextOutcome::UserTurn { phase }
            | NextOutcome::OpponentTurn { phase, .. }
            | NextOutcome::NoSpeech { phase } => Some(phase),
        }
    }
}

/// Orchestrates a debate session.
pub struct Controller {
    state: Arc<Mutex<RunState>>,
    clock_task: Option<ClockHandle>,
    generator: Arc<ReplyGenerator>,
    speaker: Arc<Speaker>,
    capture: SpeechCapture,
    ai_side: Side,
    cancel_on_advance: bool,
    pending_reply: Option<CancellationToken>,
    callback: Option<DebateCallback>,
}

impl Controller {
    /// Create a controller in `Idle` with full budgets.
    pub fn new(
        config: &Config,
        generator: Arc<ReplyGenerator>,
        speaker: Arc<Speaker>,
        recognizer: Arc<dyn SpeechRecognizer>,
    ) -> Result<Self, DebateError> {
        let phases = config.phases()?;
        if !phases.iter().any(Phase::is_speaking) {
            return Err(DebateError::ConfigError(
                "Debate format has no speaking phase".to_string(),
            ));
        }

        let state = RunState::new(phases, config.session.budget_secs)?;
        let capture = SpeechCapture::new(
            recognizer,
            config.session.language.clone(),
            TranscriptBuffer::new(),
        );

        Ok(Self {
            state: Arc::new(Mutex::new(state)),
            clock_task: None,
            generator,
            speaker,
            capture,
            ai_side: config.session.ai_side,
            cancel_on_advance: config.remote.cancel_on_advance,
            pending_reply: None,
            callback: None,
        })
    }

    /// Set a callback for session events.
    pub fn with_callback(mut self, callback: DebateCallback) -> Self {
        self.capture.set_callback(callback.clone());
        self.callback = Some(callback);
        self
    }

    fn lock(&self) -> MutexGuard<'_, RunState> {
        lock_state(&self.state)
    }

    pub fn snapshot(&self) -> RunSnapshot {
        let state = self.lock();
        RunSnapshot {
            status: state.status,
            phase: state.current_phase().clone(),
            timer_running: state.timer_running(),
            active_side: state.active_side(),
            running_side: state.clock.running_side(),
            budget_a: state.budgets.get(Side::A).remaining(),
            budget_b: state.budgets.get(Side::B).remaining(),
        }
    }

    pub fn phases(&self) -> Vec<Phase> {
        self.lock().sequencer.phases().to_vec()
    }

    pub fn transcript(&self) -> &TranscriptBuffer {
        self.capture.buffer()
    }

    pub fn is_recording(&self) -> bool {
        self.capture.is_active()
    }

    /// Store the remote access key.
    pub fn set_api_key(&self, key: &str) -> Result<(), DebateError> {
        self.generator.credentials().set(key)
    }

    /// Leave `Idle` for the first speaking phase and start its clock.
    pub fn start(&mut self) -> Result<Phase, DebateError> {
        let (phase, side) = {
            let mut state = self.lock();
            match state.status {
                SessionStatus::Idle => {}
                SessionStatus::Running => {
                    return Err(DebateError::InvalidTransition(
                        "debate already started".to_string(),
                    ));
                }
                SessionStatus::Ended => {
                    return Err(DebateError::InvalidTransition(
                        "debate has ended".to_string(),
                    ));
                }
            }
            let phase = state.sequencer.jump_to_first_speaking().clone();
            state.status = SessionStatus::Running;
            (phase.clone(), phase.side)
        };

        info!(phase = %phase.label, "Debate started");
        emit(&self.callback, DebateEvent::DebateStart { phase: phase.clone() });
        if let Some(side) = side {
            self.start_clock(side);
        }
        Ok(phase)
    }

    /// Advance one phase.
    ///
    /// The phase change and clock hand-over complete before this returns;
    /// an opponent turn runs afterwards as a separate task whose failure
    /// never touches phase state.
    pub fn next(&mut self) -> Result<NextOutcome, DebateError> {
        let advanced = {
            let mut state = self.lock();
            if state.status == SessionStatus::Ended {
                return Err(DebateError::SequenceExhausted);
            }
            state.clock.pause();
            match state.sequencer.advance() {
                Ok(phase) => {
                    let phase = phase.clone();
                    state.status = SessionStatus::Running;
                    Some(phase)
                }
                Err(DebateError::SequenceExhausted) => {
                    state.status = SessionStatus::Ended;
                    None
                }
                Err(e) => return Err(e),
            }
        };
        self.stop_clock_task();

        if self.cancel_on_advance {
            if let Some(pending) = self.pending_reply.take() {
                debug!("Cancelling pending reply");
                pending.cancel();
            }
        }

        let Some(phase) = advanced else {
            info!("Debate finished");
            emit(&self.callback, DebateEvent::DebateEnd);
            return Ok(NextOutcome::Ended);
        };

        info!(index = phase.index, phase = %phase.label, "Entered phase");
        emit(&self.callback, DebateEvent::PhaseEntered { phase: phase.clone() });

        if let Some(side) = phase.side {
            self.start_clock(side);
        }

        Ok(match phase.side {
            Some(side) if side == self.ai_side => {
                let reply = self.spawn_reply(phase.clone());
                NextOutcome::OpponentTurn { phase, reply }
            }
            Some(_) => {
                emit(&self.callback, DebateEvent::UserTurn { phase: phase.clone() });
                NextOutcome::UserTurn { phase }
            }
            None => {
                emit(&self.callback, DebateEvent::NoSpeech { phase: phase.clone() });
                NextOutcome::NoSpeech { phase }
            }
        })
    }

    /// Halt the clock, keeping remaining time. Returns whether it was running.
    pub fn pause(&mut self) -> bool {
        let was_running = self.lock().clock.pause();
        self.stop_clock_task();
        was_running
    }

    /// Restart the clock for the current phase's side.
    pub fn resume(&mut self) -> Result<ClockStart, DebateError> {
        let side = {
            let state = self.lock();
            if state.status == SessionStatus::Ended {
                return Err(DebateError::InvalidTransition(
                    "debate has ended".to_string(),
                ));
            }
            state.active_side().ok_or_else(|| {
                DebateError::InvalidTransition(
                    "current phase has no speaking side".to_string(),
                )
            })?
        };
        Ok(self.start_clock(side))
    }

    /// Begin a speech capture session.
    pub fn record(&mut self) -> Result<(), DebateError> {
        self.capture.activate()
    }

    /// End the running capture session early.
    pub fn stop_recording(&mut self) -> Result<(), DebateError> {
        self.capture.deactivate()
    }

    fn start_clock(&mut self, side: Side) -> ClockStart {
        let started = {
            let mut state = self.lock();
            let budgets = state.budgets;
            state.clock.start(side, &budgets)
        };

        match started {
            ClockStart::Started { run } => {
                let state = self.state.clone();
                let callback = self.callback.clone();
                let handle = ClockHandle::spawn(TICK_PERIOD, move || {
                    let tick = {
                        let mut state = lock_state(&state);
                        let RunState { clock, budgets, .. } = &mut *state;
                        clock.tick(run, budgets)
                    };
                    let Some(tick) = tick else {
                        return TickControl::Stop;
                    };
                    emit(
                        &callback,
                        DebateEvent::Tick {
                            side: tick.side,
                            remaining: tick.remaining,
                        },
                    );
                    if tick.expired {
                        emit(&callback, DebateEvent::TimeExpired { side: tick.side });
                        TickControl::Stop
                    } else {
                        TickControl::Continue
                    }
                });
                if let Some(previous) = self.clock_task.replace(handle) {
                    previous.cancel();
                }
            }
            ClockStart::AlreadyRunning => debug!("Clock already running"),
            ClockStart::Exhausted => {
                warn!(side = side.display_name(), "No time left for side");
            }
        }
        started
    }

    fn stop_clock_task(&mut self) {
        if let Some(handle) = self.clock_task.take() {
            handle.cancel();
        }
    }

    fn spawn_reply(&mut self, phase: Phase) -> ReplyTask {
        let transcript = self.capture.buffer().latest();
        let cancel = CancellationToken::new();
        self.pending_reply = Some(cancel.clone());

        emit(&self.callback, DebateEvent::Thinking { phase: phase.clone() });

        let task = tokio::spawn(respond(
            self.generator.clone(),
            self.speaker.clone(),
            transcript,
            phase.clone(),
            cancel.clone(),
            self.callback.clone(),
        ));

        ReplyTask {
            phase,
            cancel,
            task,
        }
    }
}

fn lock_state(state: &Mutex<RunState>) -> MutexGuard<'_, RunState> {
    state.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
}

/// Generate the reply and hand it to playback. Playback problems never fail
/// the turn.
///
/// A malformed response still yields its fallback text, which is shown and
/// spoken like a reply; the turn then reports `MalformedResponse`.
async fn respond(
    generator: Arc<ReplyGenerator>,
    speaker: Arc<Speaker>,
    transcript: String,
    phase: Phase,
    cancel: CancellationToken,
    callback: Option<DebateCallback>,
) -> Result<Reply, DebateError> {
    match generator.generate(&transcript, &phase, &cancel).await {
        Ok(text) => {
            let playback = speaker.speak(&text);
            emit(
                &callback,
                DebateEvent::Reply {
                    text: text.clone(),
                    playback_note: playback.note(),
                },
            );
            Ok(Reply { text, playback })
        }
        Err(DebateError::MalformedResponse { fallback }) => {
            warn!(phase = %phase.label, "Reply was malformed, speaking fallback");
            let playback = speaker.speak(&fallback);
            emit(
                &callback,
                DebateEvent::Reply {
                    text: fallback.clone(),
                    playback_note: playback.note(),
                },
            );
            Err(DebateError::MalformedResponse { fallback })
        }
        Err(e) => {
            warn!(error = %e, phase = %phase.label, "Reply generation failed");
            emit(
                &callback,
                DebateEvent::ReplyFailed {
                    message: e.to_string(),
                },
            );
            Err(e)
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::capture::NoRecognizer;
    use crate::config::default_config;
    use crate::credentials::SessionKeyStore;
    use crate::tts::NoPlayback;
    use std::time::Duration;

    fn controller(config: &Config) -> Controller {
        let generator = ReplyGenerator::new(
            config.remote.clone(),
            config.prompts.clone(),
            Arc::new(SessionKeyStore::new()),
        )
        .unwrap();
        let speaker = Speaker::new(Arc::new(NoPlayback), "zh-CN", "note");
        Controller::new(
            config,
            Arc::new(generator),
            Arc::new(speaker),
            Arc::new(NoRecognizer),
        )
        .unwrap()
    }

    #[tokio::test]
    async fn test_start_only_from_idle() {
        let mut ctl = controller(&default_config());
        assert_eq!(ctl.snapshot().status, SessionStatus::Idle);

        let phase = ctl.start().unwrap();
        assert_eq!(phase.index, 1);
        let snap = ctl.snapshot();
        assert_eq!(snap.status, SessionStatus::Running);
        assert!(snap.timer_running);
        assert_eq!(snap.running_side, Some(Side::A));

        assert!(matches!(ctl.start(), Err(DebateError::InvalidTransition(_))));
    }

    #[tokio::test(start_paused = true)]
    async fn test_five_ticks_charge_side_a() {
        let mut ctl = controller(&default_config());
        ctl.start().unwrap();

        tokio::time::sleep(Duration::from_millis(5500)).await;

        let snap = ctl.snapshot();
        assert_eq!(snap.budget_a, 1015);
        assert_eq!(snap.budget_b, 1020);
        assert_eq!(crate::clock::format_time(snap.budget_a), "16:55");
    }

    #[tokio::test(start_paused = true)]
    async fn test_pause_and_resume_keep_remaining() {
        let mut ctl = controller(&default_config());
        ctl.start().unwrap();
        tokio::time::sleep(Duration::from_millis(2500)).await;

        assert!(ctl.pause());
        assert!(!ctl.pause());
        tokio::time::sleep(Duration::from_secs(10)).await;
        assert_eq!(ctl.snapshot().budget_a, 1018);

        assert!(matches!(ctl.resume().unwrap(), ClockStart::Started { .. }));
        tokio::time::sleep(Duration::from_millis(1500)).await;
        assert_eq!(ctl.snapshot().budget_a, 1017);
    }

    #[tokio::test(start_paused = true)]
    async fn test_resume_while_running_does_not_double_count() {
        let mut ctl = controller(&default_config());
        ctl.start().unwrap();

        assert_eq!(ctl.resume().unwrap(), ClockStart::AlreadyRunning);
        assert_eq!(ctl.resume().unwrap(), ClockStart::AlreadyRunning);
        tokio::time::sleep(Duration::from_millis(3500)).await;
        assert_eq!(ctl.snapshot().budget_a, 1017);
    }

    #[tokio::test]
    async fn test_resume_without_side_is_invalid() {
        let mut ctl = controller(&default_config());
        // Idle sits on the preparation phase, which has no side.
        let before = ctl.snapshot();
        assert!(matches!(ctl.resume(), Err(DebateError::InvalidTransition(_))));
        let after = ctl.snapshot();
        assert_eq!(before, after);
        assert!(!after.timer_running);
    }

    #[tokio::test(start_paused = true)]
    async fn test_expiry_stops_clock_once_and_session_continues() {
        let mut config = default_config();
        config.session.budget_secs = 3;
        let expirations = Arc::new(Mutex::new(0));
        let counter = expirations.clone();
        let mut ctl = controller(&config).with_callback(Arc::new(move |event: DebateEvent| {
            if let DebateEvent::TimeExpired { side } = event {
                assert_eq!(side, Side::A);
                *counter.lock().unwrap() += 1;
            }
        }));

        ctl.start().unwrap();
        tokio::time::sleep(Duration::from_secs(10)).await;

        let snap = ctl.snapshot();
        assert_eq!(snap.budget_a, 0);
        assert!(!snap.timer_running);
        assert_eq!(snap.status, SessionStatus::Running);
        assert_eq!(*expirations.lock().unwrap(), 1);

        assert_eq!(ctl.resume().unwrap(), ClockStart::Exhausted);
        tokio::time::sleep(Duration::from_secs(3)).await;
        assert_eq!(*expirations.lock().unwrap(), 1);
        assert_eq!(ctl.snapshot().budget_a, 0);
    }

    #[tokio::test]
    async fn test_full_traversal_ends_once() {
        let mut ctl = controller(&default_config());
        let total = ctl.phases().len();

        for expected in 1..total {
            let outcome = ctl.next().unwrap();
            assert_eq!(outcome.phase().unwrap().index, expected);
            assert_eq!(ctl.snapshot().phase.index, expected);
        }

        assert!(matches!(ctl.next().unwrap(), NextOutcome::Ended));
        let ended = ctl.snapshot();
        assert_eq!(ended.status, SessionStatus::Ended);
        assert!(!ended.timer_running);

        for _ in 0..3 {
            assert!(matches!(ctl.next(), Err(DebateError::SequenceExhausted)));
            assert_eq!(ctl.snapshot(), ended);
        }
        assert!(matches!(ctl.start(), Err(DebateError::InvalidTransition(_))));
        assert!(matches!(ctl.resume(), Err(DebateError::InvalidTransition(_))));
    }

    #[tokio::test]
    async fn test_next_hands_clock_to_new_side() {
        let mut ctl = controller(&default_config());
        ctl.start().unwrap();
        assert_eq!(ctl.snapshot().running_side, Some(Side::A));

        let outcome = ctl.next().unwrap();
        assert!(matches!(outcome, NextOutcome::OpponentTurn { .. }));
        let snap = ctl.snapshot();
        assert_eq!(snap.active_side, Some(Side::B));
        assert_eq!(snap.running_side, Some(Side::B));
    }

    #[tokio::test]
    async fn test_outcome_per_side() {
        let mut ctl = controller(&default_config());
        ctl.start().unwrap();

        let mut kinds = Vec::new();
        while let Ok(outcome) = ctl.next() {
            kinds.push(match outcome {
                NextOutcome::Ended => "end",
                NextOutcome::UserTurn { .. } => "user",
                NextOutcome::OpponentTurn { .. } => "ai",
                NextOutcome::NoSpeech { .. } => "none",
            });
        }

        assert_eq!(
            kinds,
            vec![
                "ai", "ai", "user", "user", "ai", "ai", "user", "ai", "user", "none", "ai",
                "user", "end"
            ]
        );
    }

    #[tokio::test]
    async fn test_missing_key_does_not_block_advance() {
        let mut ctl = controller(&default_config());
        ctl.start().unwrap();

        let NextOutcome::OpponentTurn { phase, reply } = ctl.next().unwrap() else {
            panic!("expected opponent turn");
        };
        assert_eq!(ctl.snapshot().phase, phase);

        let err = reply.join().await.unwrap_err();
        assert!(matches!(err, DebateError::MissingCredential));
        assert_eq!(ctl.snapshot().phase.index, 2);
        assert_eq!(ctl.snapshot().status, SessionStatus::Running);
    }

    #[tokio::test]
    async fn test_record_unsupported() {
        let mut ctl = controller(&default_config());
        assert!(matches!(
            ctl.record(),
            Err(DebateError::UnsupportedCapability(_))
        ));
        assert!(matches!(
            ctl.stop_recording(),
            Err(DebateError::CaptureNotActive)
        ));
    }

    #[tokio::test]
    async fn test_set_api_key_validates_prefix() {
        let ctl = controller(&default_config());
        assert!(ctl.set_api_key("bad-key").is_err());
        assert!(ctl.set_api_key("sk-good").is_ok());
    }
}

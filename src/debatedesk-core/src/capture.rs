//! Speech-to-text capture sessions.
//!
//! A session is non-continuous and final-only: it yields at most one
//! transcript and then ends by itself. Only one session may run at a time.

use std::sync::{Arc, Mutex};

use async_trait::async_trait;
use tokio::sync::{Mutex as AsyncMutex, mpsc};
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use crate::error::{Capability, DebateError};
use crate::events::{DebateCallback, DebateEvent, emit};

/// Platform speech recognition.
#[async_trait]
pub trait SpeechRecognizer: Send + Sync {
    fn is_supported(&self) -> bool {
        true
    }

    /// Listen for one utterance. Resolves with `None` when cancelled or
    /// when nothing was heard.
    async fn recognize(
        &self,
        language: &str,
        cancel: CancellationToken,
    ) -> Result<Option<String>, DebateError>;
}

/// Recognizer for hosts without speech capture.
#[derive(Debug, Default, Clone, Copy)]
pub struct NoRecognizer;

#[async_trait]
impl SpeechRecognizer for NoRecognizer {
    fn is_supported(&self) -> bool {
        false
    }

    async fn recognize(
        &self,
        _language: &str,
        _cancel: CancellationToken,
    ) -> Result<Option<String>, DebateError> {
        Err(DebateError::UnsupportedCapability(Capability::SpeechCapture))
    }
}

/// Recognizer fed with already-transcribed lines, e.g. typed input.
pub struct ChannelRecognizer {
    lines: AsyncMutex<mpsc::UnboundedReceiver<String>>,
}

/// Sending half of a `ChannelRecognizer`.
#[derive(Debug, Clone)]
pub struct UtteranceFeed {
    tx: mpsc::UnboundedSender<String>,
}

impl UtteranceFeed {
    /// Deliver an utterance. Returns false once the recognizer is gone.
    pub fn send(&self, text: impl Into<String>) -> bool {
        self.tx.send(text.into()).is_ok()
    }
}

impl ChannelRecognizer {
    pub fn new() -> (Self, UtteranceFeed) {
        let (tx, rx) = mpsc::unbounded_channel();
        (
            Self {
                lines: AsyncMutex::new(rx),
            },
            UtteranceFeed { tx },
        )
    }
}

#[async_trait]
impl SpeechRecognizer for ChannelRecognizer {
    async fn recognize(
        &self,
        _language: &str,
        cancel: CancellationToken,
    ) -> Result<Option<String>, DebateError> {
        let mut lines = self.lines.lock().await;
        tokio::select! {
            _ = cancel.cancelled() => Ok(None),
            line = lines.recv() => Ok(line
                .map(|l| l.trim().to_string())
                .filter(|l| !l.is_empty())),
        }
    }
}

/// The single most recent captured utterance.
#[derive(Debug, Clone, Default)]
pub struct TranscriptBuffer {
    latest: Arc<Mutex<String>>,
}

impl TranscriptBuffer {
    pub fn new() -> Self {
        Self::default()
    }

    /// Replace the stored utterance.
    pub fn set(&self, text: impl Into<String>) {
        *self.latest.lock().unwrap_or_else(|p| p.into_inner()) = text.into();
    }

    pub fn latest(&self) -> String {
        self.latest.lock().unwrap_or_else(|p| p.into_inner()).clone()
    }
}

struct CaptureSession {
    cancel: CancellationToken,
    task: JoinHandle<()>,
}

/// Guards a recognizer so at most one session runs at a time.
pub struct SpeechCapture {
    recognizer: Arc<dyn SpeechRecognizer>,
    language: String,
    buffer: TranscriptBuffer,
    session: Option<CaptureSession>,
    callback: Option<DebateCallback>,
}

impl SpeechCapture {
    pub fn new(
        recognizer: Arc<dyn SpeechRecognizer>,
        language: impl Into<String>,
        buffer: TranscriptBuffer,
    ) -> Self {
        Self {
            recognizer,
            language: language.into(),
            buffer,
            session: None,
            callback: None,
        }
    }

    /// Set a callback for capture events.
    pub fn with_callback(mut self, callback: DebateCallback) -> Self {
        self.set_callback(callback);
        self
    }

    pub fn set_callback(&mut self, callback: DebateCallback) {
        self.callback = Some(callback);
    }

    pub fn buffer(&self) -> &TranscriptBuffer {
        &self.buffer
    }

    pub fn is_active(&self) -> bool {
        self.session
            .as_ref()
            .is_some_and(|session| !session.task.is_finished())
    }

    /// Begin a capture session.
    ///
    /// Fails with `UnsupportedCapability` when the platform cannot capture
    /// and with `CaptureAlreadyActive` while another session runs.
    pub fn activate(&mut self) -> Result<(), DebateError> {
        if !self.recognizer.is_supported() {
            return Err(DebateError::UnsupportedCapability(Capability::SpeechCapture));
        }
        if self.is_active() {
            return Err(DebateError::CaptureAlreadyActive);
        }

        let cancel = CancellationToken::new();
        let token = cancel.clone();
        let recognizer = self.recognizer.clone();
        let language = self.language.clone();
        let buffer = self.buffer.clone();
        let callback = self.callback.clone();

        emit(&callback, DebateEvent::CaptureStarted);
        info!(language = %language, "Capture started");

        let task = tokio::spawn(async move {
            let result = recognizer.recognize(&language, token.clone()).await;
            if token.is_cancelled() {
                debug!("Capture result discarded after stop");
                return;
            }
            match result {
                Ok(Some(text)) => {
                    buffer.set(text.clone());
                    debug!(chars = text.chars().count(), "Transcript captured");
                    emit(&callback, DebateEvent::Transcript { text });
                }
                Ok(None) => debug!("Capture ended without speech"),
                Err(e) => {
                    warn!(error = %e, "Capture failed");
                    emit(&callback, DebateEvent::CaptureFailed { message: e.to_string() });
                }
            }
        });

        self.session = Some(CaptureSession { cancel, task });
        Ok(())
    }

    /// End the running session early. Reports `CaptureNotActive` when idle.
    pub fn deactivate(&mut self) -> Result<(), DebateError> {
        if !self.is_active() {
            self.session = None;
            return Err(DebateError::CaptureNotActive);
        }
        if let Some(session) = self.session.take() {
            session.cancel.cancel();
        }
        info!("Capture stopped");
        emit(&self.callback, DebateEvent::CaptureStopped);
        Ok(())
    }
}

impl Drop for SpeechCapture {
    fn drop(&mut self) {
        if let Some(session) = self.session.take() {
            session.cancel.cancel();
        }
    }
}

//! Ordered phase sequence with a single cursor.

use tracing::debug;

use crate::error::DebateError;
use crate::phase::{Phase, Side, side_of};

/// Walks the fixed phase list one step at a time.
#[derive(Debug, Clone)]
pub struct PhaseSequencer {
    phases: Vec<Phase>,
    cursor: usize,
}

impl PhaseSequencer {
    /// Create a sequencer positioned on phase 0.
    pub fn new(phases: Vec<Phase>) -> Result<Self, DebateError> {
        if phases.is_empty() {
            return Err(DebateError::ConfigError(
                "Phase sequence cannot be empty".to_string(),
            ));
        }
        Ok(Self { phases, cursor: 0 })
    }

    pub fn current(&self) -> &Phase {
        &self.phases[self.cursor]
    }

    pub fn index(&self) -> usize {
        self.cursor
    }

    pub fn phases(&self) -> &[Phase] {
        &self.phases
    }

    pub fn is_terminal(&self) -> bool {
        self.cursor + 1 == self.phases.len()
    }

    /// Side speaking in the current phase.
    pub fn current_side(&self) -> Option<Side> {
        side_of(self.current())
    }

    /// Move to the next phase. At the terminal phase this is a no-op that
    /// reports `SequenceExhausted`.
    pub fn advance(&mut self) -> Result<&Phase, DebateError> {
        if self.is_terminal() {
            return Err(DebateError::SequenceExhausted);
        }
        self.cursor += 1;
        debug!(index = self.cursor, label = %self.current().label, "Advanced phase");
        Ok(self.current())
    }

    /// Jump to the first speaking phase.
    pub fn jump_to_first_speaking(&mut self) -> &Phase {
        if let Some(index) = self.phases.iter().position(Phase::is_speaking) {
            self.cursor = index;
        }
        self.current()
    }
}

//! Debate format definitions and trait.
//!
//! A format yields the fixed, ordered phase sequence of a debate. Index 0 is
//! always a non-speaking preparation phase and the last phase is terminal.

use crate::config::PhaseConfig;
use crate::error::DebateError;
use crate::phase::{FreeDebatePolicy, Phase, PhaseKind, classify_side};

/// Trait for defining debate formats.
pub trait DebateFormat: Send + Sync {
    /// Returns the name of this debate format.
    fn name(&self) -> &str;

    /// Returns the display name for the format.
    fn display_name(&self) -> &str;

    /// Returns all phases of the debate in order.
    fn phases(&self) -> Vec<Phase>;
}

/// Chinese collegiate debate format (正方 vs 反方, four debaters a side).
#[derive(Debug, Clone, Default)]
pub struct CollegiateFormat {
    free_debate: FreeDebatePolicy,
}

const COLLEGIATE_LABELS: &[&str] = &[
    "准备中",
    "正方一辩陈词",
    "反方四辩质询",
    "反方一辩陈词",
    "正方四辩质询",
    "正方二辩陈词",
    "反方三辩质询",
    "反方二辩陈词",
    "正方三辩质询",
    "反方三辩小结",
    "正方三辩小结",
    "自由辩论",
    "反方总结",
    "正方总结",
];

impl CollegiateFormat {
    pub fn new(free_debate: FreeDebatePolicy) -> Self {
        Self { free_debate }
    }
}

impl DebateFormat for CollegiateFormat {
    fn name(&self) -> &str {
        "collegiate"
    }

    fn display_name(&self) -> &str {
        "Collegiate Debate (4 vs 4)"
    }

    fn phases(&self) -> Vec<Phase> {
        COLLEGIATE_LABELS
            .iter()
            .enumerate()
            .map(|(i, label)| Phase::from_label(i, *label, self.free_debate))
            .collect()
    }
}

/// A format whose phases come from the `[[phases]]` config list.
#[derive(Debug, Clone)]
pub struct ConfiguredFormat {
    phases: Vec<Phase>,
}

impl ConfiguredFormat {
    /// Build the phase list, filling missing tags from the label markers.
    pub fn new(entries: &[PhaseConfig], free_debate: FreeDebatePolicy) -> Result<Self, DebateError> {
        if entries.len() < 2 {
            return Err(DebateError::ConfigError(format!(
                "A debate needs a preparation phase and at least one speaking phase, got {} phases",
                entries.len()
            )));
        }

        let phases: Vec<Phase> = entries
            .iter()
            .enumerate()
            .map(|(i, entry)| {
                let derived = Phase::from_label(i, &entry.label, free_debate);
                let kind = entry.kind.unwrap_or(derived.kind);
                let side = match (entry.side, kind) {
                    (Some(side), _) => Some(side),
                    (None, PhaseKind::FreeDebate) if classify_side(&entry.label).is_none() => {
                        free_debate.side()
                    }
                    (None, _) => derived.side,
                };
                Phase::new(i, entry.label.clone(), side, kind)
            })
            .collect();

        if phases[0].is_speaking() || phases[0].side.is_some() {
            return Err(DebateError::ConfigError(format!(
                "First phase '{}' must be a non-speaking preparation phase",
                phases[0].label
            )));
        }

        Ok(Self { phases })
    }
}

impl DebateFormat for ConfiguredFormat {
    fn name(&self) -> &str {
        "configured"
    }

    fn display_name(&self) -> &str {
        "Configured Debate"
    }

    fn phases(&self) -> Vec<Phase> {
        self.phases.clone()
    }
}

/// Get a debate format by name.
pub fn get_format(name: &str, free_debate: FreeDebatePolicy) -> Option<Box<dyn DebateFormat>> {
    match name.to_lowercase().as_str() {
        "collegiate" => Some(Box::new(CollegiateFormat::new(free_debate))),
        _ => None,
    }
}

/// List all available debate format names.
pub fn available_formats() -> Vec<&'static str> {
    vec!["collegiate"]
}

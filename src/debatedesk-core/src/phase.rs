//! Phase and side definitions.
//!
//! Every phase carries its side and kind as explicit tags. Labels are only
//! consulted once, when a phase is built without tags.

use serde::{Deserialize, Serialize};

/// Debate team affiliation.
///
/// A phase with no speaking side is represented as `Option<Side>::None`.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash)]
pub enum Side {
    /// Affirmative team (正方).
    A,
    /// Negative team (反方).
    B,
}

impl Side {
    pub fn display_name(&self) -> &str {
        match self {
            Side::A => "A",
            Side::B => "B",
        }
    }
}

/// What kind of speech a phase calls for.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash)]
#[serde(rename_all = "snake_case")]
pub enum PhaseKind {
    /// Non-speaking setup phase.
    Preparing,
    CrossExam,
    Statement,
    Summary,
    FreeDebate,
    /// A speaking phase with no recognised kind marker.
    Other,
}

impl PhaseKind {
    pub fn is_speaking(&self) -> bool {
        !matches!(self, PhaseKind::Preparing)
    }
}

/// How free-debate phases map onto a side.
///
/// Free debate has no single speaker, so the mapping is a policy choice
/// rather than something derivable from the label.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Default)]
#[serde(rename_all = "snake_case")]
pub enum FreeDebatePolicy {
    /// No side; the clock does not run and no reply is generated.
    #[default]
    Neutral,
    SideA,
    SideB,
}

impl FreeDebatePolicy {
    pub fn side(&self) -> Option<Side> {
        match self {
            FreeDebatePolicy::Neutral => None,
            FreeDebatePolicy::SideA => Some(Side::A),
            FreeDebatePolicy::SideB => Some(Side::B),
        }
    }
}

/// One named step in the debate sequence.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct Phase {
    pub index: usize,
    pub label: String,
    pub side: Option<Side>,
    pub kind: PhaseKind,
}

impl Phase {
    pub fn new(index: usize, label: impl Into<String>, side: Option<Side>, kind: PhaseKind) -> Self {
        Self {
            index,
            label: label.into(),
            side,
            kind,
        }
    }

    /// Build a phase whose tags are classified from the label markers.
    pub fn from_label(index: usize, label: impl Into<String>, policy: FreeDebatePolicy) -> Self {
        let label = label.into();
        let kind = if index == 0 && classify_kind(&label) == PhaseKind::Other {
            PhaseKind::Preparing
        } else {
            classify_kind(&label)
        };
        let side = match (classify_side(&label), kind) {
            (None, PhaseKind::FreeDebate) => policy.side(),
            (side, _) => side,
        };
        Self {
            index,
            label,
            side,
            kind,
        }
    }

    pub fn is_speaking(&self) -> bool {
        self.kind.is_speaking()
    }
}

/// The side that speaks in a phase.
pub fn side_of(phase: &Phase) -> Option<Side> {
    phase.side
}

const SIDE_A_MARKERS: &[&str] = &["正方", "side-A"];
const SIDE_B_MARKERS: &[&str] = &["反方", "side-B"];

const CROSS_EXAM_MARKERS: &[&str] = &["质询", "cross-exam"];
const STATEMENT_MARKERS: &[&str] = &["陈词", "statement"];
const SUMMARY_MARKERS: &[&str] = &["小结", "总结", "summary"];
const FREE_DEBATE_MARKERS: &[&str] = &["自由", "free-debate"];
const PREPARING_MARKERS: &[&str] = &["准备", "preparing"];

fn contains_any(label: &str, markers: &[&str]) -> bool {
    markers.iter().any(|m| label.contains(m))
}

/// Map a label to a side by its side marker.
pub fn classify_side(label: &str) -> Option<Side> {
    if contains_any(label, SIDE_A_MARKERS) {
        Some(Side::A)
    } else if contains_any(label, SIDE_B_MARKERS) {
        Some(Side::B)
    } else {
        None
    }
}

/// Map a label to a phase kind.
///
/// Markers are checked in a fixed precedence: cross-examination, statement,
/// summary, free debate.
pub fn classify_kind(label: &str) -> PhaseKind {
    if contains_any(label, CROSS_EXAM_MARKERS) {
        PhaseKind::CrossExam
    } else if contains_any(label, STATEMENT_MARKERS) {
        PhaseKind::Statement
    } else if contains_any(label, SUMMARY_MARKERS) {
        PhaseKind::Summary
    } else if contains_any(label, FREE_DEBATE_MARKERS) {
        PhaseKind::FreeDebate
    } else if contains_any(label, PREPARING_MARKERS) {
        PhaseKind::Preparing
    } else {
        PhaseKind::Other
    }
}

//! Session configuration, read from TOML with defaults for every section.

use serde::Deserialize;
use std::fs;
use std::path::{Path, PathBuf};

use crate::clock::DEFAULT_BUDGET_SECS;
use crate::debate_format::{self, ConfiguredFormat, DebateFormat};
use crate::error::DebateError;
use crate::phase::{FreeDebatePolicy, Phase, PhaseKind, Side};

/// Root configuration structure.
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(default)]
pub struct Config {
    pub session: SessionConfig,
    pub remote: RemoteConfig,
    pub prompts: PromptsConfig,
    pub voice: VoiceConfig,
    /// Overrides the named format's phases when non-empty.
    pub phases: Vec<PhaseConfig>,
}

/// Session rules.
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct SessionConfig {
    pub format: String,
    /// Speaking time per side, in seconds.
    pub budget_secs: u32,
    /// Language for capture and playback.
    pub language: String,
    /// Side answered by the remote model.
    pub ai_side: Side,
    pub free_debate: FreeDebatePolicy,
}

impl Default for SessionConfig {
    fn default() -> Self {
        Self {
            format: "collegiate".to_string(),
            budget_secs: DEFAULT_BUDGET_SECS,
            language: "zh-CN".to_string(),
            ai_side: Side::B,
            free_debate: FreeDebatePolicy::Neutral,
        }
    }
}

/// Remote completion endpoint.
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct RemoteConfig {
    pub endpoint: String,
    pub model: String,
    pub timeout_secs: u64,
    pub connect_timeout_secs: u64,
    /// Abort a still-pending reply when the debate advances again.
    pub cancel_on_advance: bool,
}

impl Default for RemoteConfig {
    fn default() -> Self {
        Self {
            endpoint: "https://dashscope.aliyuncs.com/compatible-mode/v1/chat/completions"
                .to_string(),
            model: "qwen-plus".to_string(),
            timeout_secs: 120,
            connect_timeout_secs: 30,
            cancel_on_advance: false,
        }
    }
}

/// Prompt templates. `{camp}` and `{phase}` are replaced in the phase
/// templates, `{transcript}` and `{phase}` in the user template.
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct PromptsConfig {
    pub ruleset: String,
    pub cross_exam: String,
    pub statement: String,
    pub summary: String,
    pub free_debate: String,
    pub fallback: String,
    pub user_template: String,
    /// Stands in for the transcript when nothing was captured.
    pub no_speech: String,
    pub side_a_name: String,
    pub side_b_name: String,
    pub neutral_name: String,
}

impl Default for PromptsConfig {
    fn default() -> Self {
        Self {
            ruleset: DEFAULT_RULESET.to_string(),
            cross_exam: "你现在是{camp}的辩手，处在“{phase}”阶段。请基于用户上一阶段的发言，进行有逻辑、有针对性的质询和反驳，提出问题或反例，语气简洁犀利。".to_string(),
            statement: "你现在是{camp}的辩手，处在“{phase}”阶段。请系统性阐述本方立场，不反驳自己，只需从论据、逻辑、例证角度强化己方观点。".to_string(),
            summary: "你现在处在“{phase}”阶段，应总结本方主要论点，重申立场要点，并回应对方主要质询。".to_string(),
            free_debate: "你现在处在自由辩论阶段，请以快速反击的方式回应对方观点，简短有力。".to_string(),
            fallback: "你是本场辩论的{camp}，请根据阶段自由陈述。".to_string(),
            user_template: "上一阶段用户发言：{transcript}。\n当前阶段：{phase}".to_string(),
            no_speech: "（无用户发言）".to_string(),
            side_a_name: "正方".to_string(),
            side_b_name: "反方".to_string(),
            neutral_name: "辩论AI".to_string(),
        }
    }
}

impl PromptsConfig {
    /// Display name of a side inside prompts.
    pub fn camp(&self, side: Option<Side>) -> &str {
        match side {
            Some(Side::A) => &self.side_a_name,
            Some(Side::B) => &self.side_b_name,
            None => &self.neutral_name,
        }
    }

    /// Template for a phase kind.
    pub fn template(&self, kind: PhaseKind) -> &str {
        match kind {
            PhaseKind::CrossExam => &self.cross_exam,
            PhaseKind::Statement => &self.statement,
            PhaseKind::Summary => &self.summary,
            PhaseKind::FreeDebate => &self.free_debate,
            PhaseKind::Preparing | PhaseKind::Other => &self.fallback,
        }
    }
}

/// Playback settings.
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct VoiceConfig {
    /// Appended to the displayed reply when synthesis is unavailable.
    pub unsupported_note: String,
    /// Preferred voice id; falls back to locale matching when absent.
    pub voice: Option<String>,
    /// Where rendered replies are written.
    pub output_dir: PathBuf,
}

impl Default for VoiceConfig {
    fn default() -> Self {
        Self {
            unsupported_note: "（当前环境不支持语音合成）".to_string(),
            voice: None,
            output_dir: PathBuf::from("replies"),
        }
    }
}

/// One `[[phases]]` entry. Missing tags are classified from the label.
#[derive(Debug, Clone, Deserialize)]
pub struct PhaseConfig {
    pub label: String,
    #[serde(default)]
    pub side: Option<Side>,
    #[serde(default)]
    pub kind: Option<PhaseKind>,
}

impl PhaseConfig {
    pub fn new(label: impl Into<String>, side: Option<Side>, kind: Option<PhaseKind>) -> Self {
        Self {
            label: label.into(),
            side,
            kind,
        }
    }
}

impl Config {
    /// Load configuration from a TOML file.
    pub fn load<P: AsRef<Path>>(path: P) -> Result<Self, DebateError> {
        let content = fs::read_to_string(path.as_ref())
            .map_err(|e| DebateError::ConfigError(format!("Failed to read config: {}", e)))?;

        Self::from_str(&content)
    }

    /// Load configuration from string content.
    #[allow(clippy::should_implement_trait)]
    pub fn from_str(content: &str) -> Result<Self, DebateError> {
        toml::from_str(content)
            .map_err(|e| DebateError::ConfigError(format!("Failed to parse config: {}", e)))
    }

    /// The debate format this config selects.
    pub fn format(&self) -> Result<Box<dyn DebateFormat>, DebateError> {
        if !self.phases.is_empty() {
            return Ok(Box::new(ConfiguredFormat::new(
                &self.phases,
                self.session.free_debate,
            )?));
        }

        debate_format::get_format(&self.session.format, self.session.free_debate).ok_or_else(
            || {
                DebateError::ConfigError(format!(
                    "Unknown debate format: '{}'. Available formats: {}",
                    self.session.format,
                    debate_format::available_formats().join(", ")
                ))
            },
        )
    }

    /// The phase sequence this config selects.
    pub fn phases(&self) -> Result<Vec<Phase>, DebateError> {
        Ok(self.format()?.phases())
    }
}

/// Default configuration embedded in the binary.
pub fn default_config() -> Config {
    Config::default()
}

const DEFAULT_RULESET: &str = "你是一名专业的中文辩论AI，请遵循中国大学生辩论赛逻辑进行发言。规则：\n1. 质询阶段 → 针对对方（用户）上阶段反驳。\n2. 陈词/小结/总结 → 强化己方立场，不反驳自己。\n3. 自由辩论 → 简短针对性反击。\n";

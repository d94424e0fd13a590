//! Opponent reply generation via an OpenAI-compatible chat endpoint.
//!
//! Prompt building is pure and stateless per call: the phase kind picks one
//! instruction template, which is appended to the fixed ruleset.

use std::sync::{Arc, LazyLock};
use std::time::{Duration, Instant};

use async_openai::types::chat::{
    ChatCompletionRequestMessage, ChatCompletionRequestSystemMessage,
    ChatCompletionRequestUserMessage, CreateChatCompletionRequest,
    CreateChatCompletionRequestArgs,
};
use regex::Regex;
use serde_json::Value;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use crate::config::{PromptsConfig, RemoteConfig};
use crate::credentials::CredentialStore;
use crate::error::DebateError;
use crate::phase::{Phase, PhaseKind};

/// Shown when the remote answered without any usable text.
pub const NO_RESULT_FALLBACK: &str = "（AI没有返回结果）";

/// The two messages sent for one reply.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Prompt {
    /// Phase kind whose template was used.
    pub kind: PhaseKind,
    pub system: String,
    pub user: String,
}

/// Builds prompts and requests completions from the remote model.
pub struct ReplyGenerator {
    http: reqwest::Client,
    remote: RemoteConfig,
    prompts: PromptsConfig,
    credentials: Arc<dyn CredentialStore>,
}

impl ReplyGenerator {
    pub fn new(
        remote: RemoteConfig,
        prompts: PromptsConfig,
        credentials: Arc<dyn CredentialStore>,
    ) -> Result<Self, DebateError> {
        let http = reqwest::Client::builder()
            .timeout(Duration::from_secs(remote.timeout_secs))
            .connect_timeout(Duration::from_secs(remote.connect_timeout_secs))
            .build()
            .map_err(|e| DebateError::ConfigError(format!("Failed to create HTTP client: {}", e)))?;

        Ok(Self {
            http,
            remote,
            prompts,
            credentials,
        })
    }

    pub fn credentials(&self) -> &Arc<dyn CredentialStore> {
        &self.credentials
    }

    /// Build the system and user messages for a phase.
    pub fn build_prompt(&self, transcript: &str, phase: &Phase) -> Prompt {
        let camp = self.prompts.camp(phase.side);
        let instruction = fill_template(
            self.prompts.template(phase.kind),
            &[("camp", camp), ("phase", &phase.label)],
        );

        let transcript = if transcript.trim().is_empty() {
            self.prompts.no_speech.as_str()
        } else {
            transcript
        };
        let user = fill_template(
            &self.prompts.user_template,
            &[("transcript", transcript), ("phase", &phase.label)],
        );

        Prompt {
            kind: phase.kind,
            system: format!("{}{}", self.prompts.ruleset, instruction),
            user,
        }
    }

    fn build_request(&self, prompt: &Prompt) -> Result<CreateChatCompletionRequest, DebateError> {
        let messages = vec![
            ChatCompletionRequestMessage::System(ChatCompletionRequestSystemMessage {
                content: prompt.system.clone().into(),
                name: None,
            }),
            ChatCompletionRequestMessage::User(ChatCompletionRequestUserMessage {
                content: prompt.user.clone().into(),
                name: None,
            }),
        ];

        Ok(CreateChatCompletionRequestArgs::default()
            .model(&self.remote.model)
            .messages(messages)
            .build()?)
    }

    /// Generate the reply for `phase` given the last captured speech.
    ///
    /// Fails with `MissingCredential` before any network traffic when no key
    /// is stored. No retries are attempted.
    pub async fn generate(
        &self,
        transcript: &str,
        phase: &Phase,
        cancel: &CancellationToken,
    ) -> Result<String, DebateError> {
        let api_key = self
            .credentials
            .get()
            .ok_or(DebateError::MissingCredential)?;

        let prompt = self.build_prompt(transcript, phase);
        let request = self.build_request(&prompt)?;
        debug!(phase = %phase.label, kind = ?prompt.kind, "Requesting reply");

        let started = Instant::now();
        let send = self
            .http
            .post(&self.remote.endpoint)
            .bearer_auth(&api_key)
            .json(&request)
            .send();

        let response = tokio::select! {
            _ = cancel.cancelled() => return Err(DebateError::Cancelled),
            response = send => response?,
        };

        let status = response.status();
        info!(
            status = status.as_u16(),
            elapsed_ms = started.elapsed().as_millis() as u64,
            "Remote model responded"
        );
        if !status.is_success() {
            return Err(DebateError::RemoteError {
                status: status.as_u16(),
            });
        }

        let body = tokio::select! {
            _ = cancel.cancelled() => return Err(DebateError::Cancelled),
            body = response.text() => body?,
        };

        let text = serde_json::from_str::<Value>(&body)
            .ok()
            .and_then(|value| extract_text(&value))
            .map(|text| sanitize_response(&text))
            .filter(|text| !text.is_empty());

        text.ok_or_else(|| {
            warn!("Remote response carried no usable text");
            DebateError::MalformedResponse {
                fallback: NO_RESULT_FALLBACK.to_string(),
            }
        })
    }
}

/// Substitute `{name}` placeholders in one left-to-right pass.
///
/// Inserted values are never scanned again, so speech that happens to
/// contain a placeholder stays literal. Unknown placeholders are kept.
fn fill_template(template: &str, values: &[(&str, &str)]) -> String {
    let mut out = String::with_capacity(template.len());
    let mut rest = template;

    while let Some(open) = rest.find('{') {
        out.push_str(&rest[..open]);
        let tail = &rest[open + 1..];
        let hit = values.iter().find(|(name, _)| {
            tail.strip_prefix(*name)
                .is_some_and(|after| after.starts_with('}'))
        });
        match hit {
            Some((name, value)) => {
                out.push_str(value);
                rest = &tail[name.len() + 1..];
            }
            None => {
                out.push('{');
                rest = tail;
            }
        }
    }
    out.push_str(rest);
    out
}

/// Pull the reply text out of a completion body.
///
/// Prefers `choices[0].message.content`, then `output_text`. Empty strings
/// count as missing.
pub fn extract_text(body: &Value) -> Option<String> {
    let non_empty = |v: Option<&Value>| {
        v.and_then(Value::as_str)
            .filter(|s| !s.is_empty())
            .map(str::to_string)
    };

    non_empty(body.pointer("/choices/0/message/content"))
        .or_else(|| non_empty(body.get("output_text")))
}

/// Tags whose whole body is model reasoning rather than reply text.
const REASONING_TAGS: &[&str] = &[
    "thinking",
    "think",
    "reflection",
    "reflect",
    "internal",
    "reasoning",
    "thought",
    "scratchpad",
    "analysis",
];

static REASONING_BLOCKS: LazyLock<Vec<Regex>> = LazyLock::new(|| {
    REASONING_TAGS
        .iter()
        .filter_map(|tag| Regex::new(&format!(r"(?is)<{tag}[^>]*>.*?</{tag}>")).ok())
        .collect()
});
static ORPHAN_REASONING_TAG: LazyLock<Option<Regex>> = LazyLock::new(|| {
    Regex::new(&format!(r"(?i)</?(?:{})\b[^>]*>", REASONING_TAGS.join("|"))).ok()
});
static WHITESPACE: LazyLock<Option<Regex>> = LazyLock::new(|| Regex::new(r"\s+").ok());

/// Clean a reply for display and speech.
///
/// Drops reasoning blocks such as `<think>...</think>`, unpaired reasoning
/// tags and markdown emphasis, then collapses whitespace. Other angle
/// brackets are reply text and stay.
pub fn sanitize_response(response: &str) -> String {
    let mut text = REASONING_BLOCKS
        .iter()
        .fold(response.to_string(), |acc, re| re.replace_all(&acc, "").into_owned());

    if let Some(re) = ORPHAN_REASONING_TAG.as_ref() {
        text = re.replace_all(&text, "").into_owned();
    }
    // Markdown emphasis reads badly once spoken.
    text.retain(|c| c != '*');
    if let Some(re) = WHITESPACE.as_ref() {
        text = re.replace_all(&text, " ").into_owned();
    }

    text.trim().to_string()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::credentials::SessionKeyStore;
    use crate::phase::{FreeDebatePolicy, Side};
    use serde_json::json;

    fn generator() -> ReplyGenerator {
        ReplyGenerator::new(
            RemoteConfig::default(),
            PromptsConfig::default(),
            Arc::new(SessionKeyStore::new()),
        )
        .unwrap()
    }

    fn phase(index: usize, label: &str) -> Phase {
        Phase::from_label(index, label, FreeDebatePolicy::Neutral)
    }

    #[test]
    fn test_cross_exam_template_selected() {
        let prompt = generator().build_prompt("", &phase(2, "反方四辩质询"));

        assert_eq!(prompt.kind, PhaseKind::CrossExam);
        assert!(prompt.system.starts_with("你是一名专业的中文辩论AI"));
        assert!(prompt.system.contains("你现在是反方的辩手，处在“反方四辩质询”阶段"));
        assert!(prompt.system.contains("质询和反驳"));
    }

    #[test]
    fn test_phase_kind_only_changes_instruction() {
        let generator = generator();
        let cross = Phase::new(2, "第二阶段", Some(Side::B), PhaseKind::CrossExam);
        let statement = Phase::new(2, "第二阶段", Some(Side::B), PhaseKind::Statement);

        let a = generator.build_prompt("", &cross);
        let b = generator.build_prompt("", &statement);

        assert_ne!(a.kind, b.kind);
        assert_ne!(a.system, b.system);
        assert_eq!(a.user, b.user);
        let ruleset = PromptsConfig::default().ruleset;
        assert!(a.system.starts_with(&ruleset));
        assert!(b.system.starts_with(&ruleset));
    }

    #[test]
    fn test_prompt_is_deterministic() {
        let generator = generator();
        let p = phase(6, "反方三辩质询");
        assert_eq!(generator.build_prompt("x", &p), generator.build_prompt("x", &p));
    }

    #[test]
    fn test_user_message_with_and_without_transcript() {
        let generator = generator();
        let p = phase(3, "反方一辩陈词");

        let empty = generator.build_prompt("", &p);
        assert_eq!(empty.user, "上一阶段用户发言：（无用户发言）。\n当前阶段：反方一辩陈词");

        let spoken = generator.build_prompt("climate policy works", &p);
        assert_eq!(
            spoken.user,
            "上一阶段用户发言：climate policy works。\n当前阶段：反方一辩陈词"
        );
    }

    #[test]
    fn test_placeholders_in_speech_stay_literal() {
        let p = phase(2, "反方四辩质询");
        let prompt = generator().build_prompt("the {phase} rule helps {camp}", &p);
        assert_eq!(
            prompt.user,
            "上一阶段用户发言：the {phase} rule helps {camp}。\n当前阶段：反方四辩质询"
        );
    }

    #[test]
    fn test_fill_template_single_pass() {
        let filled = fill_template(
            "{a}-{b}-{c}",
            &[("a", "{b}"), ("b", "x")],
        );
        assert_eq!(filled, "{b}-x-{c}");
        assert_eq!(fill_template("no braces", &[("a", "1")]), "no braces");
    }

    #[test]
    fn test_fallback_template_for_unmarked_phase() {
        let p = Phase::new(5, "open remarks", None, PhaseKind::Other);
        let prompt = generator().build_prompt("", &p);
        assert!(prompt.system.contains("你是本场辩论的辩论AI，请根据阶段自由陈述。"));
    }

    #[test]
    fn test_build_request_shape() {
        let generator = generator();
        let prompt = generator.build_prompt("hi", &phase(2, "反方四辩质询"));
        let request = generator.build_request(&prompt).unwrap();
        let body = serde_json::to_value(&request).unwrap();

        assert_eq!(body["model"], "qwen-plus");
        assert_eq!(body["messages"][0]["role"], "system");
        assert_eq!(body["messages"][0]["content"], prompt.system.as_str());
        assert_eq!(body["messages"][1]["role"], "user");
        assert_eq!(body["messages"][1]["content"], prompt.user.as_str());
    }

    #[test]
    fn test_extract_text_prefers_choices() {
        let body = json!({
            "choices": [{"message": {"content": "primary"}}],
            "output_text": "secondary"
        });
        assert_eq!(extract_text(&body).as_deref(), Some("primary"));
    }

    #[test]
    fn test_extract_text_whitespace_content_is_kept() {
        let body = json!({"choices": [{"message": {"content": "  "}}], "output_text": "secondary"});
        assert_eq!(extract_text(&body).as_deref(), Some("  "));
        assert_eq!(sanitize_response("  "), "");
    }

    #[test]
    fn test_extract_text_falls_back_to_output_text() {
        let body = json!({"choices": [{"message": {"content": ""}}], "output_text": "secondary"});
        assert_eq!(extract_text(&body).as_deref(), Some("secondary"));
        assert_eq!(extract_text(&json!({"id": "x"})), None);
    }

    #[test]
    fn test_sanitize_response_thinking_tags() {
        let input = "<think>先想一想</think>我方认为该政策有效。";
        assert_eq!(sanitize_response(input), "我方认为该政策有效。");
    }

    #[test]
    fn test_sanitize_response_multiline_tags() {
        let input = "<thinking>\nMultiple\nlines\n</thinking>Final answer here.";
        assert_eq!(sanitize_response(input), "Final answer here.");
    }

    #[test]
    fn test_sanitize_response_keeps_comparisons() {
        let input = "成本<收益，而收益>风险，所以该政策可行。";
        assert_eq!(sanitize_response(input), input);
        assert_eq!(sanitize_response("if a < b and c > d"), "if a < b and c > d");
    }

    #[test]
    fn test_sanitize_response_unpaired_reasoning_tag() {
        assert_eq!(sanitize_response("草稿</think>我方认为可行。"), "草稿我方认为可行。");
        assert_eq!(sanitize_response("<Thinking>结论"), "结论");
    }

    #[test]
    fn test_sanitize_response_emphasis_and_whitespace() {
        let input = "**重点**   在于\n\n证据";
        assert_eq!(sanitize_response(input), "重点 在于 证据");
    }

    #[tokio::test]
    async fn test_generate_without_key_fails_fast() {
        let err = generator()
            .generate("anything", &phase(2, "反方四辩质询"), &CancellationToken::new())
            .await
            .unwrap_err();
        assert!(matches!(err, DebateError::MissingCredential));
    }
}

use smallvec::SmallVec;
use std::sync::Arc;

/// Canonical message role (spec S3: "tagged union of roles `{system, user, assistant,
/// tool}`").
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum CanonicalRole {
    System,
    User,
    Assistant,
    Tool,
}

/// A single part of a message's content (spec S3 part variants).
#[derive(Debug, Clone)]
pub enum CanonicalPart {
    Text(String),
    Image {
        bytes: bytes::Bytes,
        mime_type: String,
    },
    ToolCall {
        id: String,
        name: String,
        args_json: String,
    },
    ToolResult {
        tool_call_id: String,
        content: String,
    },
}

/// A single message in the canonical conversation.
///
/// Invariant (spec S3): within one assistant message, text parts precede tool_call
/// parts in ordering as produced. A `tool` message carries only `tool_result` parts.
#[derive(Debug, Clone)]
pub struct CanonicalMessage {
    pub role: CanonicalRole,
    pub parts: SmallVec<[CanonicalPart; 2]>,
}

impl CanonicalMessage {
    #[must_use]
    pub fn text(role: CanonicalRole, text: impl Into<String>) -> Self {
        let mut parts = SmallVec::new();
        parts.push(CanonicalPart::Text(text.into()));
        Self { role, parts }
    }
}

/// A tool declaration (spec S3).
#[derive(Debug, Clone, PartialEq)]
pub struct CanonicalToolDecl {
    pub name: String,
    pub description: Option<String>,
    pub parameters_json_schema: serde_json::Value,
}

/// Tool-choice (spec S3).
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum CanonicalToolChoice {
    Auto,
    None,
    Required,
    Tool(String),
}

/// Generation request (internal), spec S3.
#[derive(Debug, Clone)]
pub struct GenerationRequest {
    pub messages: Vec<CanonicalMessage>,
    pub system: Option<String>,
    pub tools: Option<Arc<[CanonicalToolDecl]>>,
    pub tool_choice: Option<CanonicalToolChoice>,
    pub temperature: Option<f64>,
    pub top_p: Option<f64>,
    pub max_tokens: Option<u64>,
    pub stream: bool,
}

/// Reason the model stopped generating, spec S3's canonical five-value alphabet.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FinishReason {
    Stop,
    ToolCalls,
    Length,
    Error,
    Other,
}

impl FinishReason {
    #[must_use]
    pub fn as_str(self) -> &'static str {
        match self {
            FinishReason::Stop => "stop",
            FinishReason::ToolCalls => "tool_calls",
            FinishReason::Length => "length",
            FinishReason::Error => "error",
            FinishReason::Other => "other",
        }
    }
}

/// Token usage, spec S3's `{promptTokens, completionTokens}`.
#[derive(Debug, Clone, Copy, Default)]
pub struct CanonicalUsage {
    pub prompt_tokens: u64,
    pub completion_tokens: u64,
}

/// A single event in the canonical stream emitted by any adapter (spec S3).
///
/// Invariants: exactly one `Finish` per stream as the final event unless an `Error`
/// terminates the stream; `TextDelta` events are ordered and concatenation yields the
/// assistant text; a given `ToolCall.id` appears at most once.
#[derive(Debug, Clone)]
pub enum CanonicalStreamEvent {
    TextDelta {
        delta: String,
    },
    ToolCall {
        id: String,
        name: String,
        args_json: String,
    },
    Finish {
        reason: FinishReason,
        usage: CanonicalUsage,
    },
    Error {
        message: String,
    },
}

/// A single resolved tool call in a non-streaming response.
#[derive(Debug, Clone)]
pub struct ToolCallResult {
    pub id: String,
    pub name: String,
    pub args_json: String,
}

/// Non-streaming generation result (spec S4.2: `generate(req) -> {text, toolCalls,
/// finishReason, usage, rawCall}`). `rawCall` is dropped per SPEC_FULL.md S9 (not part
/// of the external contract, not observable).
#[derive(Debug, Clone, Default)]
pub struct GenerateResult {
    pub text: String,
    pub tool_calls: Vec<ToolCallResult>,
    pub finish_reason: Option<FinishReason>,
    pub usage: CanonicalUsage,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn finish_reason_spellings_are_canonical() {
        assert_eq!(FinishReason::Stop.as_str(), "stop");
        assert_eq!(FinishReason::ToolCalls.as_str(), "tool_calls");
        assert_eq!(FinishReason::Length.as_str(), "length");
        assert_eq!(FinishReason::Error.as_str(), "error");
        assert_eq!(FinishReason::Other.as_str(), "other");
    }

    #[test]
    fn canonical_message_text_helper_produces_single_text_part() {
        let msg = CanonicalMessage::text(CanonicalRole::User, "hi");
        assert_eq!(msg.parts.len(), 1);
        matches!(msg.parts[0], CanonicalPart::Text(ref s) if s == "hi");
    }
}

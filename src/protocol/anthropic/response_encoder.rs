//! Canonical `GenerateResult` -> client-facing Messages response (spec S4.7).

use std::sync::atomic::AtomicU64;

use crate::protocol::canonical::{FinishReason, GenerateResult};
use crate::protocol::mapping::canonical_finish_reason_to_anthropic_stop_reason;
use crate::util::next_generated_id;

use super::{AnthropicContentBlock, AnthropicMessagesResponse, AnthropicUsage};

static MESSAGE_ID_COUNTER: AtomicU64 = AtomicU64::new(1);

/// Build a non-streaming Messages response from a canonical result.
#[must_use]
pub fn encode_response(result: &GenerateResult, model: &str) -> AnthropicMessagesResponse {
    let mut content = Vec::with_capacity(1 + result.tool_calls.len());
    if !result.text.is_empty() {
        content.push(AnthropicContentBlock::Text {
            text: result.text.clone(),
        });
    }
    for call in &result.tool_calls {
        content.push(AnthropicContentBlock::ToolUse {
            id: call.id.clone(),
            name: call.name.clone(),
            input: serde_json::from_str(&call.args_json).unwrap_or(serde_json::Value::Null),
        });
    }

    let stop_reason =
        canonical_finish_reason_to_anthropic_stop_reason(result.finish_reason.unwrap_or(FinishReason::Stop));

    AnthropicMessagesResponse {
        id: next_generated_id("msg", &MESSAGE_ID_COUNTER),
        type_: "message".to_string(),
        role: "assistant".to_string(),
        model: model.to_string(),
        content,
        stop_reason: Some(stop_reason.to_string()),
        usage: AnthropicUsage {
            input_tokens: result.usage.prompt_tokens,
            output_tokens: result.usage.completion_tokens,
        },
    }
}

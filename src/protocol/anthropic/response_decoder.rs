//! Upstream Anthropic Messages response -> canonical `GenerateResult`, used by the
//! Anthropic-compatible adapter's non-streaming `generate()` (spec S4.5.b).

use crate::error::GatewayError;
use crate::protocol::canonical::{CanonicalUsage, GenerateResult, ToolCallResult};
use crate::protocol::mapping::anthropic_stop_reason_to_canonical;
use crate::util::validate_json_string;

use super::{AnthropicContentBlock, AnthropicMessagesResponse};

/// Decode an upstream Anthropic Messages response into a canonical result.
pub fn decode_response(resp: &AnthropicMessagesResponse) -> Result<GenerateResult, GatewayError> {
    let mut text = String::new();
    let mut tool_calls = Vec::new();

    for block in &resp.content {
        match block {
            AnthropicContentBlock::Text { text: t } => text.push_str(t),
            AnthropicContentBlock::ToolUse { id, name, input } => {
                let args_json = validate_json_string(input.to_string(), "tool_use.input")?;
                tool_calls.push(ToolCallResult {
                    id: id.clone(),
                    name: name.clone(),
                    args_json,
                });
            }
        }
    }

    let finish_reason = resp
        .stop_reason
        .as_deref()
        .map(anthropic_stop_reason_to_canonical);

    Ok(GenerateResult {
        text,
        tool_calls,
        finish_reason,
        usage: CanonicalUsage {
            prompt_tokens: resp.usage.input_tokens,
            completion_tokens: resp.usage.output_tokens,
        },
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::protocol::anthropic::AnthropicUsage;
    use crate::protocol::canonical::FinishReason;
    use serde_json::json;

    #[test]
    fn decodes_text_and_tool_use_blocks() {
        let resp = AnthropicMessagesResponse {
            id: "msg_1".to_string(),
            type_: "message".to_string(),
            role: "assistant".to_string(),
            model: "claude-3-5-sonnet".to_string(),
            content: vec![
                AnthropicContentBlock::Text {
                    text: "checking".to_string(),
                },
                AnthropicContentBlock::ToolUse {
                    id: "call_1".to_string(),
                    name: "search".to_string(),
                    input: json!({"q": "rust"}),
                },
            ],
            stop_reason: Some("tool_use".to_string()),
            usage: AnthropicUsage {
                input_tokens: 10,
                output_tokens: 5,
            },
        };
        let result = decode_response(&resp).unwrap();
        assert_eq!(result.text, "checking");
        assert_eq!(result.tool_calls.len(), 1);
        assert_eq!(result.finish_reason, Some(FinishReason::ToolCalls));
    }
}

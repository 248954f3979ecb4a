//! Upstream Chat-Completions response -> canonical `GenerateResult`, used by the Bearer
//! adapter's non-streaming `generate()` (spec S4.5.a).

use crate::error::GatewayError;
use crate::protocol::canonical::{CanonicalUsage, FinishReason, GenerateResult, ToolCallResult};
use crate::protocol::mapping::openai_finish_reason_to_canonical;

use super::OpenAiChatResponse;

/// Decode an upstream Chat-Completions response into a canonical result.
pub fn decode_response(resp: &OpenAiChatResponse) -> Result<GenerateResult, GatewayError> {
    let choice = resp.choices.first().ok_or_else(|| {
        GatewayError::ProtocolParseFailed("chat completion response has no choices".to_string())
    })?;

    let text = choice
        .message
        .content
        .as_ref()
        .and_then(|v| v.as_str())
        .unwrap_or_default()
        .to_string();

    let tool_calls = choice
        .message
        .tool_calls
        .iter()
        .flatten()
        .map(|call| ToolCallResult {
            id: call.id.clone(),
            name: call.function.name.clone(),
            args_json: call.function.arguments.clone(),
        })
        .collect();

    let finish_reason = choice
        .finish_reason
        .as_deref()
        .map(openai_finish_reason_to_canonical);

    let usage = resp
        .usage
        .as_ref()
        .map(|u| CanonicalUsage {
            prompt_tokens: u.prompt_tokens,
            completion_tokens: u.completion_tokens,
        })
        .unwrap_or_default();

    Ok(GenerateResult {
        text,
        tool_calls,
        finish_reason,
        usage,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::protocol::openai_chat::{OpenAiChoice, OpenAiMessage, OpenAiUsage};
    use serde_json::json;

    #[test]
    fn decodes_text_response() {
        let resp = OpenAiChatResponse {
            id: "chatcmpl-1".to_string(),
            object: "chat.completion".to_string(),
            created: Some(1),
            model: "gpt-4o".to_string(),
            choices: vec![OpenAiChoice {
                index: 0,
                message: OpenAiMessage {
                    role: "assistant".to_string(),
                    content: Some(json!("hello")),
                    name: None,
                    tool_calls: None,
                    tool_call_id: None,
                },
                finish_reason: Some("stop".to_string()),
            }],
            usage: Some(OpenAiUsage {
                prompt_tokens: 3,
                completion_tokens: 1,
                total_tokens: 4,
            }),
        };
        let result = decode_response(&resp).unwrap();
        assert_eq!(result.text, "hello");
        assert_eq!(result.finish_reason, Some(FinishReason::Stop));
        assert_eq!(result.usage.prompt_tokens, 3);
    }

    #[test]
    fn missing_choices_is_parse_error() {
        let resp = OpenAiChatResponse {
            id: "chatcmpl-1".to_string(),
            object: "chat.completion".to_string(),
            created: None,
            model: "gpt-4o".to_string(),
            choices: vec![],
            usage: None,
        };
        assert!(decode_response(&resp).is_err());
    }
}

//! Canonical `GenerateResult` -> client-facing `chat.completion` response (spec S4.7).

use serde_json::Value;

use crate::protocol::canonical::{FinishReason, GenerateResult};
use crate::protocol::mapping::canonical_finish_reason_to_openai;
use crate::util::unix_now_secs;

use super::{OpenAiChatResponse, OpenAiChoice, OpenAiMessage, OpenAiToolCall, OpenAiToolCallFunction, OpenAiUsage};

/// Build a non-streaming `chat.completion` response from a canonical result.
#[must_use]
pub fn encode_response(result: &GenerateResult, id: &str, model: &str) -> OpenAiChatResponse {
    let tool_calls: Vec<OpenAiToolCall> = result
        .tool_calls
        .iter()
        .map(|call| OpenAiToolCall {
            id: call.id.clone(),
            type_: "function".to_string(),
            function: OpenAiToolCallFunction {
                name: call.name.clone(),
                arguments: call.args_json.clone(),
            },
        })
        .collect();

    let finish_reason = result
        .finish_reason
        .unwrap_or(FinishReason::Stop);

    OpenAiChatResponse {
        id: id.to_string(),
        object: "chat.completion".to_string(),
        created: Some(unix_now_secs()),
        model: model.to_string(),
        choices: vec![OpenAiChoice {
            index: 0,
            message: OpenAiMessage {
                role: "assistant".to_string(),
                content: if result.text.is_empty() && !tool_calls.is_empty() {
                    None
                } else {
                    Some(Value::String(result.text.clone()))
                },
                name: None,
                tool_calls: if tool_calls.is_empty() {
                    None
                } else {
                    Some(tool_calls)
                },
                tool_call_id: None,
            },
            finish_reason: Some(canonical_finish_reason_to_openai(finish_reason).to_string()),
        }],
        usage: Some(OpenAiUsage {
            prompt_tokens: result.usage.prompt_tokens,
            completion_tokens: result.usage.completion_tokens,
            total_tokens: result.usage.prompt_tokens + result.usage.completion_tokens,
        }),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::protocol::canonical::{CanonicalUsage, ToolCallResult};

    #[test]
    fn encodes_text_only_result() {
        let result = GenerateResult {
            text: "hi there".to_string(),
            tool_calls: vec![],
            finish_reason: Some(FinishReason::Stop),
            usage: CanonicalUsage {
                prompt_tokens: 2,
                completion_tokens: 3,
            },
        };
        let resp = encode_response(&result, "chatcmpl-abc", "gpt-4o");
        assert_eq!(resp.choices[0].message.content, Some(Value::String("hi there".to_string())));
        assert_eq!(resp.choices[0].finish_reason.as_deref(), Some("stop"));
        assert_eq!(resp.usage.unwrap().total_tokens, 5);
    }

    #[test]
    fn encodes_tool_call_result_with_null_content() {
        let result = GenerateResult {
            text: String::new(),
            tool_calls: vec![ToolCallResult {
                id: "call_1".to_string(),
                name: "get_weather".to_string(),
                args_json: "{}".to_string(),
            }],
            finish_reason: Some(FinishReason::ToolCalls),
            usage: CanonicalUsage::default(),
        };
        let resp = encode_response(&result, "chatcmpl-abc", "gpt-4o");
        assert!(resp.choices[0].message.content.is_none());
        assert_eq!(resp.choices[0].finish_reason.as_deref(), Some("tool_calls"));
    }
}

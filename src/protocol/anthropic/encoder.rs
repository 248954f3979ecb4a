//! Canonical -> Anthropic-Messages-shaped request, used by the Anthropic-compatible
//! adapter (spec S4.5.b) to build the upstream request body.

use serde_json::{json, Value};

use crate::protocol::canonical::{CanonicalMessage, CanonicalPart, CanonicalRole, GenerationRequest};
use crate::protocol::mapping::canonical_role_to_anthropic;
use crate::protocol::tools::{canonical_tool_choice_to_anthropic, canonical_tool_to_anthropic};

use super::{AnthropicMessage, AnthropicMessagesRequest, AnthropicTool};

/// Encode a generation request into the upstream Anthropic Messages wire shape.
#[must_use]
pub fn encode_request(req: &GenerationRequest, model: &str) -> AnthropicMessagesRequest {
    let mut system_text = req.system.clone().unwrap_or_default();
    let mut messages = Vec::with_capacity(req.messages.len());
    let mut pending_tool_results: Vec<Value> = Vec::new();

    for msg in &req.messages {
        match msg.role {
            CanonicalRole::System => {
                if let Some(text) = message_text(msg) {
                    if !system_text.is_empty() {
                        system_text.push('\n');
                    }
                    system_text.push_str(&text);
                }
            }
            CanonicalRole::Tool => {
                pending_tool_results.extend(tool_result_blocks(msg));
            }
            CanonicalRole::User => {
                let mut blocks = std::mem::take(&mut pending_tool_results);
                blocks.extend(user_content_blocks(msg));
                messages.push(AnthropicMessage {
                    role: "user".to_string(),
                    content: Value::Array(blocks),
                });
            }
            CanonicalRole::Assistant => {
                if !pending_tool_results.is_empty() {
                    messages.push(AnthropicMessage {
                        role: "user".to_string(),
                        content: Value::Array(std::mem::take(&mut pending_tool_results)),
                    });
                }
                messages.push(AnthropicMessage {
                    role: "assistant".to_string(),
                    content: Value::Array(assistant_content_blocks(msg)),
                });
            }
        }
    }

    if !pending_tool_results.is_empty() {
        messages.push(AnthropicMessage {
            role: "user".to_string(),
            content: Value::Array(pending_tool_results),
        });
    }

    let tools = req.tools.as_ref().map(|tools| {
        tools
            .iter()
            .map(|decl| {
                let wire = canonical_tool_to_anthropic(decl);
                serde_json::from_value::<AnthropicTool>(wire).unwrap_or(AnthropicTool {
                    name: decl.name.clone(),
                    description: decl.description.clone(),
                    input_schema: decl.parameters_json_schema.clone(),
                })
            })
            .collect()
    });

    AnthropicMessagesRequest {
        model: model.to_string(),
        messages,
        system: if system_text.is_empty() {
            None
        } else {
            Some(Value::String(system_text))
        },
        tools,
        tool_choice: req
            .tool_choice
            .as_ref()
            .map(canonical_tool_choice_to_anthropic),
        max_tokens: req.max_tokens.unwrap_or(4096),
        temperature: req.temperature,
        top_p: req.top_p,
        stream: Some(req.stream),
    }
}

fn message_text(msg: &CanonicalMessage) -> Option<String> {
    let text = msg
        .parts
        .iter()
        .filter_map(|p| match p {
            CanonicalPart::Text(t) => Some(t.as_str()),
            _ => None,
        })
        .collect::<Vec<_>>()
        .join("");
    if text.is_empty() {
        None
    } else {
        Some(text)
    }
}

fn tool_result_blocks(msg: &CanonicalMessage) -> Vec<Value> {
    msg.parts
        .iter()
        .filter_map(|p| match p {
            CanonicalPart::ToolResult {
                tool_call_id,
                content,
            } => Some(json!({
                "type": "tool_result",
                "tool_use_id": tool_call_id,
                "content": content,
            })),
            _ => None,
        })
        .collect()
}

fn user_content_blocks(msg: &CanonicalMessage) -> Vec<Value> {
    msg.parts
        .iter()
        .filter_map(|p| match p {
            CanonicalPart::Text(t) => Some(json!({"type": "text", "text": t})),
            CanonicalPart::Image { bytes, mime_type } => Some(json!({
                "type": "image",
                "source": {
                    "type": "base64",
                    "media_type": mime_type,
                    "data": base64_encode(bytes),
                }
            })),
            _ => None,
        })
        .collect()
}

fn assistant_content_blocks(msg: &CanonicalMessage) -> Vec<Value> {
    msg.parts
        .iter()
        .filter_map(|p| match p {
            CanonicalPart::Text(t) => Some(json!({"type": "text", "text": t})),
            CanonicalPart::ToolCall {
                id,
                name,
                args_json,
            } => {
                let input: Value = serde_json::from_str(args_json).unwrap_or(Value::Null);
                Some(json!({"type": "tool_use", "id": id, "name": name, "input": input}))
            }
            _ => None,
        })
        .collect()
}

fn base64_encode(bytes: &bytes::Bytes) -> String {
    use base64::{engine::general_purpose::STANDARD, Engine as _};
    STANDARD.encode(bytes)
}

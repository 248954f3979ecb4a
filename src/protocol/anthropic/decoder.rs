//! Anthropic Messages request -> canonical (spec S4.3).
//!
//! Tool results arrive embedded in a `user` message's content array alongside plain
//! text/image blocks. They are split into standalone canonical `tool` messages emitted
//! *before* the canonical `user` message built from the remaining blocks of the same
//! inbound message, so `tool_result` ids always precede the text that follows them in
//! the canonical conversation — mirroring how providers expect tool-augmented turns to
//! be reconstructed (spec S4.3 "Ordering rationale").

use std::sync::Arc;

use base64::{engine::general_purpose::STANDARD, Engine as _};
use serde_json::Value;
use smallvec::SmallVec;

use crate::error::GatewayError;
use crate::protocol::canonical::{
    CanonicalMessage, CanonicalPart, CanonicalRole, CanonicalToolDecl, GenerationRequest,
};
use crate::protocol::mapping::anthropic_role_to_canonical;
use crate::protocol::tools::{decode_anthropic_tool, decode_anthropic_tool_choice};
use crate::util::validate_json_string;

use super::{AnthropicMessage, AnthropicMessagesRequest, AnthropicTool};

/// Decode an Anthropic Messages request into the internal generation request.
pub fn decode_request(req: &AnthropicMessagesRequest) -> Result<GenerationRequest, GatewayError> {
    let mut messages = Vec::with_capacity(req.messages.len());
    for msg in &req.messages {
        decode_message(msg, &mut messages)?;
    }

    Ok(GenerationRequest {
        messages,
        system: decode_system(req.system.as_ref()),
        tools: decode_tools(req.tools.as_deref())?,
        tool_choice: Some(decode_anthropic_tool_choice(req.tool_choice.as_ref())),
        temperature: req.temperature,
        top_p: req.top_p,
        max_tokens: Some(req.max_tokens),
        stream: req.stream.unwrap_or(false),
    })
}

fn decode_system(system: Option<&Value>) -> Option<String> {
    match system? {
        Value::String(s) => Some(s.clone()),
        Value::Array(blocks) => {
            let joined = blocks
                .iter()
                .filter_map(|b| b.get("text").and_then(Value::as_str))
                .collect::<Vec<_>>()
                .join("\n");
            if joined.is_empty() {
                None
            } else {
                Some(joined)
            }
        }
        _ => None,
    }
}

fn decode_message(
    msg: &AnthropicMessage,
    out: &mut Vec<CanonicalMessage>,
) -> Result<(), GatewayError> {
    let role = anthropic_role_to_canonical(&msg.role);

    match &msg.content {
        Value::String(s) => {
            out.push(CanonicalMessage::text(role, s.clone()));
        }
        Value::Array(blocks) => {
            if role == CanonicalRole::User {
                decode_user_content_blocks(blocks, out)?;
            } else {
                decode_assistant_content_blocks(blocks, out)?;
            }
        }
        _ => {
            return Err(GatewayError::BadRequest(
                "unsupported message content shape".to_string(),
            ))
        }
    }

    Ok(())
}

fn decode_user_content_blocks(
    blocks: &[Value],
    out: &mut Vec<CanonicalMessage>,
) -> Result<(), GatewayError> {
    let mut remainder: SmallVec<[CanonicalPart; 2]> = SmallVec::new();

    for block in blocks {
        let type_ = block.get("type").and_then(Value::as_str).unwrap_or("");
        match type_ {
            "tool_result" => {
                let tool_call_id = block
                    .get("tool_use_id")
                    .and_then(Value::as_str)
                    .ok_or_else(|| {
                        GatewayError::BadRequest("tool_result missing tool_use_id".to_string())
                    })?
                    .to_string();
                let content = tool_result_content_text(block.get("content"));
                out.push(CanonicalMessage {
                    role: CanonicalRole::Tool,
                    parts: {
                        let mut parts = SmallVec::new();
                        parts.push(CanonicalPart::ToolResult {
                            tool_call_id,
                            content,
                        });
                        parts
                    },
                });
            }
            "text" => {
                if let Some(text) = block.get("text").and_then(Value::as_str) {
                    remainder.push(CanonicalPart::Text(text.to_string()));
                }
            }
            "image" => {
                remainder.push(decode_image_block(block)?);
            }
            _ => {}
        }
    }

    if !remainder.is_empty() {
        out.push(CanonicalMessage {
            role: CanonicalRole::User,
            parts: remainder,
        });
    }

    Ok(())
}

fn decode_assistant_content_blocks(
    blocks: &[Value],
    out: &mut Vec<CanonicalMessage>,
) -> Result<(), GatewayError> {
    let mut parts: SmallVec<[CanonicalPart; 2]> = SmallVec::new();

    for block in blocks {
        let type_ = block.get("type").and_then(Value::as_str).unwrap_or("");
        match type_ {
            "text" => {
                if let Some(text) = block.get("text").and_then(Value::as_str) {
                    parts.push(CanonicalPart::Text(text.to_string()));
                }
            }
            "tool_use" => {
                let id = block
                    .get("id")
                    .and_then(Value::as_str)
                    .ok_or_else(|| GatewayError::BadRequest("tool_use missing id".to_string()))?
                    .to_string();
                let name = block
                    .get("name")
                    .and_then(Value::as_str)
                    .ok_or_else(|| GatewayError::BadRequest("tool_use missing name".to_string()))?
                    .to_string();
                let args_json = validate_json_string(
                    block
                        .get("input")
                        .cloned()
                        .unwrap_or_else(|| Value::Object(serde_json::Map::new()))
                        .to_string(),
                    "tool_use.input",
                )?;
                parts.push(CanonicalPart::ToolCall {
                    id,
                    name,
                    args_json,
                });
            }
            "thinking" | "redacted_thinking" => {}
            _ => {}
        }
    }

    out.push(CanonicalMessage {
        role: CanonicalRole::Assistant,
        parts,
    });

    Ok(())
}

fn decode_image_block(block: &Value) -> Result<CanonicalPart, GatewayError> {
    let source = block
        .get("source")
        .ok_or_else(|| GatewayError::BadRequest("image block missing source".to_string()))?;
    let mime_type = source
        .get("media_type")
        .and_then(Value::as_str)
        .unwrap_or("application/octet-stream")
        .to_string();
    let data = source
        .get("data")
        .and_then(Value::as_str)
        .ok_or_else(|| GatewayError::BadRequest("image source missing data".to_string()))?;
    let bytes = STANDARD
        .decode(data)
        .map_err(|e| GatewayError::BadRequest(format!("invalid base64 image data: {e}")))?;
    Ok(CanonicalPart::Image {
        bytes: bytes::Bytes::from(bytes),
        mime_type,
    })
}

fn tool_result_content_text(content: Option<&Value>) -> String {
    match content {
        Some(Value::String(s)) => s.clone(),
        Some(Value::Array(blocks)) => blocks
            .iter()
            .filter_map(|b| b.get("text").and_then(Value::as_str))
            .collect::<Vec<_>>()
            .join(""),
        _ => String::new(),
    }
}

fn decode_tools(
    tools: Option<&[AnthropicTool]>,
) -> Result<Option<Arc<[CanonicalToolDecl]>>, GatewayError> {
    let Some(tools) = tools else {
        return Ok(None);
    };
    let mut decls = Vec::with_capacity(tools.len());
    for tool in tools {
        let value = serde_json::to_value(tool)
            .map_err(|e| GatewayError::ProtocolParseFailed(format!("tool encode: {e}")))?;
        let decl = decode_anthropic_tool(&value)
            .ok_or_else(|| GatewayError::BadRequest("malformed tool declaration".to_string()))?;
        decls.push(decl);
    }
    Ok(Some(Arc::from(decls)))
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn request(messages: Vec<AnthropicMessage>) -> AnthropicMessagesRequest {
        AnthropicMessagesRequest {
            model: "claude-3-5-sonnet".to_string(),
            messages,
            system: None,
            tools: None,
            tool_choice: None,
            max_tokens: 1024,
            temperature: None,
            top_p: None,
            stream: None,
        }
    }

    #[test]
    fn decodes_plain_string_content() {
        let req = request(vec![AnthropicMessage {
            role: "user".to_string(),
            content: Value::String("hi".to_string()),
        }]);
        let decoded = decode_request(&req).unwrap();
        assert_eq!(decoded.messages.len(), 1);
        assert_eq!(decoded.messages[0].role, CanonicalRole::User);
    }

    #[test]
    fn tool_result_emitted_before_text_from_same_message() {
        let req = request(vec![AnthropicMessage {
            role: "user".to_string(),
            content: json!([
                {"type": "tool_result", "tool_use_id": "call_1", "content": "72F"},
                {"type": "text", "text": "thanks"}
            ]),
        }]);
        let decoded = decode_request(&req).unwrap();
        assert_eq!(decoded.messages.len(), 2);
        assert_eq!(decoded.messages[0].role, CanonicalRole::Tool);
        assert_eq!(decoded.messages[1].role, CanonicalRole::User);
        match &decoded.messages[0].parts[0] {
            CanonicalPart::ToolResult { tool_call_id, .. } => assert_eq!(tool_call_id, "call_1"),
            other => panic!("expected tool result, got {other:?}"),
        }
    }

    #[test]
    fn system_array_of_text_blocks_joined_with_newline() {
        let mut req = request(vec![]);
        req.system = Some(json!([{"type": "text", "text": "a"}, {"type": "text", "text": "b"}]));
        let decoded = decode_request(&req).unwrap();
        assert_eq!(decoded.system.as_deref(), Some("a\nb"));
    }

    #[test]
    fn assistant_tool_use_and_thinking_blocks() {
        let req = request(vec![AnthropicMessage {
            role: "assistant".to_string(),
            content: json!([
                {"type": "thinking", "thinking": "pondering"},
                {"type": "text", "text": "let me check"},
                {"type": "tool_use", "id": "call_1", "name": "search", "input": {"q": "rust"}}
            ]),
        }]);
        let decoded = decode_request(&req).unwrap();
        assert_eq!(decoded.messages.len(), 1);
        assert_eq!(decoded.messages[0].parts.len(), 2);
        matches!(decoded.messages[0].parts[0], CanonicalPart::Text(_));
        matches!(decoded.messages[0].parts[1], CanonicalPart::ToolCall { .. });
    }
}

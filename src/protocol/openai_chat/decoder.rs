//! Chat-Completions request -> canonical (spec S4.3).

use std::sync::Arc;

use base64::{engine::general_purpose::STANDARD, Engine as _};
use serde_json::Value;
use smallvec::SmallVec;

use crate::error::GatewayError;
use crate::protocol::canonical::{
    CanonicalMessage, CanonicalPart, CanonicalRole, CanonicalToolDecl, GenerationRequest,
};
use crate::protocol::mapping::openai_role_to_canonical;
use crate::protocol::tools::{decode_openai_tool, decode_openai_tool_choice};
use crate::util::validate_json_string;

use super::{OpenAiChatRequest, OpenAiMessage, OpenAiTool};

/// Decode a Chat-Completions request into the internal generation request.
pub fn decode_request(req: &OpenAiChatRequest) -> Result<GenerationRequest, GatewayError> {
    let mut messages = Vec::with_capacity(req.messages.len());
    for msg in &req.messages {
        messages.push(decode_message(msg)?);
    }

    Ok(GenerationRequest {
        messages,
        system: None,
        tools: decode_tools(req.tools.as_deref())?,
        tool_choice: Some(decode_openai_tool_choice(req.tool_choice.as_ref())),
        temperature: req.temperature,
        top_p: req.top_p,
        max_tokens: req.max_completion_tokens.or(req.max_tokens),
        stream: req.stream.unwrap_or(false),
    })
}

fn decode_message(msg: &OpenAiMessage) -> Result<CanonicalMessage, GatewayError> {
    let role = openai_role_to_canonical(&msg.role);

    if role == CanonicalRole::Tool {
        let tool_call_id = msg.tool_call_id.clone().ok_or_else(|| {
            GatewayError::BadRequest("tool message missing tool_call_id".to_string())
        })?;
        let content = content_as_text(msg.content.as_ref());
        let mut parts = SmallVec::new();
        parts.push(CanonicalPart::ToolResult {
            tool_call_id,
            content,
        });
        return Ok(CanonicalMessage { role, parts });
    }

    let mut parts: SmallVec<[CanonicalPart; 2]> = SmallVec::new();
    match msg.content.as_ref() {
        Some(Value::String(s)) => parts.push(CanonicalPart::Text(s.clone())),
        Some(Value::Array(items)) => {
            for item in items {
                if let Some(part) = decode_content_part(item)? {
                    parts.push(part);
                }
            }
        }
        Some(Value::Null) | None => {}
        Some(_) => {
            return Err(GatewayError::BadRequest(
                "unsupported message content shape".to_string(),
            ))
        }
    }

    if let Some(tool_calls) = &msg.tool_calls {
        for call in tool_calls {
            let args_json =
                validate_json_string(call.function.arguments.clone(), "tool_call.arguments")?;
            parts.push(CanonicalPart::ToolCall {
                id: call.id.clone(),
                name: call.function.name.clone(),
                args_json,
            });
        }
    }

    Ok(CanonicalMessage { role, parts })
}

fn content_as_text(content: Option<&Value>) -> String {
    match content {
        Some(Value::String(s)) => s.clone(),
        Some(Value::Array(items)) => items
            .iter()
            .filter_map(|item| item.get("text").and_then(Value::as_str))
            .collect::<Vec<_>>()
            .join(""),
        _ => String::new(),
    }
}

fn decode_content_part(item: &Value) -> Result<Option<CanonicalPart>, GatewayError> {
    let type_ = item.get("type").and_then(Value::as_str).unwrap_or("text");
    match type_ {
        "text" => Ok(item
            .get("text")
            .and_then(Value::as_str)
            .map(|t| CanonicalPart::Text(t.to_string()))),
        "image_url" => {
            let url = item
                .get("image_url")
                .and_then(|v| v.get("url"))
                .and_then(Value::as_str)
                .ok_or_else(|| {
                    GatewayError::BadRequest("image_url part missing url".to_string())
                })?;
            decode_data_url(url).map(Some)
        }
        _ => Ok(None),
    }
}

fn decode_data_url(url: &str) -> Result<CanonicalPart, GatewayError> {
    let rest = url.strip_prefix("data:").ok_or_else(|| {
        GatewayError::BadRequest("only data: image URLs are supported".to_string())
    })?;
    let (meta, data) = rest
        .split_once(',')
        .ok_or_else(|| GatewayError::BadRequest("malformed data URL".to_string()))?;
    let mime_type = meta
        .split(';')
        .next()
        .unwrap_or("application/octet-stream")
        .to_string();
    let bytes = STANDARD
        .decode(data)
        .map_err(|e| GatewayError::BadRequest(format!("invalid base64 image data: {e}")))?;
    Ok(CanonicalPart::Image {
        bytes: bytes::Bytes::from(bytes),
        mime_type,
    })
}

fn decode_tools(
    tools: Option<&[OpenAiTool]>,
) -> Result<Option<Arc<[CanonicalToolDecl]>>, GatewayError> {
    let Some(tools) = tools else {
        return Ok(None);
    };
    let mut decls = Vec::with_capacity(tools.len());
    for tool in tools {
        let value = serde_json::to_value(tool)
            .map_err(|e| GatewayError::ProtocolParseFailed(format!("tool encode: {e}")))?;
        let decl = decode_openai_tool(&value)
            .ok_or_else(|| GatewayError::BadRequest("malformed tool declaration".to_string()))?;
        decls.push(decl);
    }
    Ok(Some(Arc::from(decls)))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::protocol::openai_chat::{OpenAiToolCall, OpenAiToolCallFunction};

    fn message(role: &str, content: Option<Value>) -> OpenAiMessage {
        OpenAiMessage {
            role: role.to_string(),
            content,
            name: None,
            tool_calls: None,
            tool_call_id: None,
        }
    }

    fn request(messages: Vec<OpenAiMessage>) -> OpenAiChatRequest {
        OpenAiChatRequest {
            model: "gpt-4o".to_string(),
            messages,
            tools: None,
            tool_choice: None,
            stream: None,
            temperature: None,
            max_tokens: None,
            max_completion_tokens: None,
            top_p: None,
            extra: serde_json::Map::new(),
        }
    }

    #[test]
    fn decodes_plain_text_messages() {
        let req = request(vec![
            message("system", Some(Value::String("be terse".to_string()))),
            message("user", Some(Value::String("hi".to_string()))),
        ]);
        let decoded = decode_request(&req).unwrap();
        assert_eq!(decoded.messages.len(), 2);
        assert_eq!(decoded.messages[0].role, CanonicalRole::System);
        assert_eq!(decoded.messages[1].role, CanonicalRole::User);
    }

    #[test]
    fn decodes_assistant_tool_calls() {
        let mut msg = message("assistant", None);
        msg.tool_calls = Some(vec![OpenAiToolCall {
            id: "call_1".to_string(),
            type_: "function".to_string(),
            function: OpenAiToolCallFunction {
                name: "get_weather".to_string(),
                arguments: "{\"city\":\"nyc\"}".to_string(),
            },
        }]);
        let req = request(vec![msg]);
        let decoded = decode_request(&req).unwrap();
        match &decoded.messages[0].parts[0] {
            CanonicalPart::ToolCall { name, .. } => assert_eq!(name, "get_weather"),
            other => panic!("expected tool call part, got {other:?}"),
        }
    }

    #[test]
    fn decodes_tool_result_message() {
        let mut msg = message("tool", Some(Value::String("72F".to_string())));
        msg.tool_call_id = Some("call_1".to_string());
        let req = request(vec![msg]);
        let decoded = decode_request(&req).unwrap();
        match &decoded.messages[0].parts[0] {
            CanonicalPart::ToolResult {
                tool_call_id,
                content,
            } => {
                assert_eq!(tool_call_id, "call_1");
                assert_eq!(content, "72F");
            }
            other => panic!("expected tool result part, got {other:?}"),
        }
    }

    #[test]
    fn tool_result_message_missing_id_is_bad_request() {
        let msg = message("tool", Some(Value::String("x".to_string())));
        let req = request(vec![msg]);
        assert!(decode_request(&req).is_err());
    }
}

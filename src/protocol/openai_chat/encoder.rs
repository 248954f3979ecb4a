//! Canonical -> Chat-Completions-shaped request, used by the Bearer adapter (spec S4.5.a)
//! to build the upstream request body.

use serde_json::Value;

use crate::protocol::canonical::{CanonicalMessage, CanonicalPart, CanonicalRole, GenerationRequest};
use crate::protocol::mapping::canonical_role_to_openai;
use crate::protocol::tools::{canonical_tool_choice_to_openai, canonical_tool_to_openai};

use super::{OpenAiChatRequest, OpenAiMessage, OpenAiTool, OpenAiToolCall, OpenAiToolCallFunction};

/// Encode a generation request into the upstream Chat-Completions wire shape.
#[must_use]
pub fn encode_request(req: &GenerationRequest, model: &str) -> OpenAiChatRequest {
    let mut messages = Vec::with_capacity(req.messages.len() + 1);
    if let Some(system) = req.system.as_deref() {
        messages.push(OpenAiMessage {
            role: "system".to_string(),
            content: Some(Value::String(system.to_string())),
            name: None,
            tool_calls: None,
            tool_call_id: None,
        });
    }
    for msg in &req.messages {
        encode_message(msg, &mut messages);
    }

    let tools = req.tools.as_ref().map(|tools| {
        tools
            .iter()
            .map(|decl| {
                let wire = canonical_tool_to_openai(decl);
                serde_json::from_value::<OpenAiTool>(wire).unwrap_or(OpenAiTool {
                    type_: "function".to_string(),
                    function: super::OpenAiToolFunction {
                        name: decl.name.clone(),
                        description: decl.description.clone(),
                        parameters: Some(decl.parameters_json_schema.clone()),
                    },
                })
            })
            .collect()
    });

    OpenAiChatRequest {
        model: model.to_string(),
        messages,
        tools,
        tool_choice: req.tool_choice.as_ref().map(canonical_tool_choice_to_openai),
        stream: Some(req.stream),
        temperature: req.temperature,
        max_tokens: req.max_tokens,
        max_completion_tokens: None,
        top_p: req.top_p,
        extra: serde_json::Map::new(),
    }
}

fn encode_message(msg: &CanonicalMessage, out: &mut Vec<OpenAiMessage>) {
    if msg.role == CanonicalRole::Tool {
        for part in &msg.parts {
            if let CanonicalPart::ToolResult {
                tool_call_id,
                content,
            } = part
            {
                out.push(OpenAiMessage {
                    role: "tool".to_string(),
                    content: Some(Value::String(content.clone())),
                    name: None,
                    tool_calls: None,
                    tool_call_id: Some(tool_call_id.clone()),
                });
            }
        }
        return;
    }

    let mut text = String::new();
    let mut tool_calls = Vec::new();
    for part in &msg.parts {
        match part {
            CanonicalPart::Text(t) => text.push_str(t),
            CanonicalPart::ToolCall {
                id,
                name,
                args_json,
            } => tool_calls.push(OpenAiToolCall {
                id: id.clone(),
                type_: "function".to_string(),
                function: OpenAiToolCallFunction {
                    name: name.clone(),
                    arguments: args_json.clone(),
                },
            }),
            CanonicalPart::Image { .. } | CanonicalPart::ToolResult { .. } => {}
        }
    }

    out.push(OpenAiMessage {
        role: canonical_role_to_openai(msg.role).to_string(),
        content: if text.is_empty() && !tool_calls.is_empty() {
            None
        } else {
            Some(Value::String(text))
        },
        name: None,
        tool_calls: if tool_calls.is_empty() {
            None
        } else {
            Some(tool_calls)
        },
        tool_call_id: None,
    });
}

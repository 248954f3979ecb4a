//! Consumes the canonical event stream and writes one of the two external SSE
//! framings, managing block-index bookkeeping for the Messages shape (spec S4.6).

use crate::protocol::canonical::{CanonicalStreamEvent, FinishReason};
use crate::protocol::mapping::canonical_finish_reason_to_openai;
use crate::protocol::openai_chat::{
    OpenAiDelta, OpenAiStreamChoice, OpenAiStreamChunk, OpenAiStreamFunctionDelta,
    OpenAiStreamToolCallDelta,
};
use crate::util::next_generated_id;

use super::sse::{anthropic_sse_frame, done_frame, openai_sse_frame};

use std::sync::atomic::AtomicU64;

/// Frames a canonical event stream as Chat-Completions `chat.completion.chunk` SSE.
pub struct ChatCompletionsMultiplexer {
    id: String,
    model: String,
    created: u64,
}

impl ChatCompletionsMultiplexer {
    #[must_use]
    pub fn new(id: String, model: String, created: u64) -> Self {
        Self { id, model, created }
    }

    /// Encode one canonical event as SSE text. Terminal events append the
    /// `data: [DONE]\n\n` frame.
    #[must_use]
    pub fn encode(&self, event: &CanonicalStreamEvent) -> String {
        match event {
            CanonicalStreamEvent::TextDelta { delta } => self.chunk_frame(
                OpenAiDelta {
                    content: Some(delta.clone()),
                    tool_calls: None,
                },
                None,
            ),
            CanonicalStreamEvent::ToolCall {
                id,
                name,
                args_json,
            } => self.chunk_frame(
                OpenAiDelta {
                    content: None,
                    tool_calls: Some(vec![OpenAiStreamToolCallDelta {
                        index: 0,
                        id: Some(id.clone()),
                        type_: Some("function".to_string()),
                        function: Some(OpenAiStreamFunctionDelta {
                            name: Some(name.clone()),
                            arguments: Some(args_json.clone()),
                        }),
                    }]),
                },
                None,
            ),
            CanonicalStreamEvent::Finish { reason, .. } => {
                let mut out = self.chunk_frame(OpenAiDelta::default(), Some(*reason));
                out.push_str(&done_frame());
                out
            }
            CanonicalStreamEvent::Error { message } => {
                let mut out = self.chunk_frame(
                    OpenAiDelta {
                        content: None,
                        tool_calls: None,
                    },
                    Some(FinishReason::Error),
                );
                let _ = message;
                out.push_str(&done_frame());
                out
            }
        }
    }

    fn chunk_frame(&self, delta: OpenAiDelta, finish_reason: Option<FinishReason>) -> String {
        let chunk = OpenAiStreamChunk {
            id: self.id.clone(),
            object: "chat.completion.chunk".to_string(),
            created: self.created,
            model: self.model.clone(),
            choices: vec![OpenAiStreamChoice {
                index: 0,
                delta,
                finish_reason: finish_reason.map(canonical_finish_reason_to_openai).map(String::from),
            }],
            usage: None,
        };
        let json = serde_json::to_string(&chunk).unwrap_or_else(|_| "{}".to_string());
        openai_sse_frame(&json)
    }
}

static MESSAGE_ID_COUNTER: AtomicU64 = AtomicU64::new(1);

/// Frames a canonical event stream as an Anthropic Messages event-stream.
///
/// Maintains the block-index state machine described in spec S4.6: a single open
/// text block accumulates consecutive `TextDelta`s, a `ToolCall` closes any open
/// text block and opens/fills/closes its own `tool_use` block in one step.
pub struct MessagesMultiplexer {
    model: String,
    block_index: i64,
    text_block_open: bool,
    has_tool_calls: bool,
}

impl MessagesMultiplexer {
    #[must_use]
    pub fn new(model: String) -> Self {
        Self {
            model,
            block_index: -1,
            text_block_open: false,
            has_tool_calls: false,
        }
    }

    /// The opening `message_start` frame. Call once before feeding any events.
    #[must_use]
    pub fn start_frame(&self) -> String {
        let id = next_generated_id("msg", &MESSAGE_ID_COUNTER);
        let json = serde_json::json!({
            "type": "message_start",
            "message": {
                "id": id,
                "type": "message",
                "role": "assistant",
                "model": self.model,
                "content": [],
                "stop_reason": null,
                "usage": {"input_tokens": 0, "output_tokens": 0},
            }
        })
        .to_string();
        anthropic_sse_frame("message_start", &json)
    }

    /// Encode one canonical event, returning zero or more SSE frames.
    pub fn encode(&mut self, event: &CanonicalStreamEvent) -> Vec<String> {
        match event {
            CanonicalStreamEvent::TextDelta { delta } => self.encode_text_delta(delta),
            CanonicalStreamEvent::ToolCall {
                id,
                name,
                args_json,
            } => self.encode_tool_call(id, name, args_json),
            CanonicalStreamEvent::Finish { .. } => self.encode_finish(),
            CanonicalStreamEvent::Error { message } => self.encode_error(message),
        }
    }

    fn encode_text_delta(&mut self, delta: &str) -> Vec<String> {
        let mut out = Vec::with_capacity(2);
        if !self.text_block_open {
            self.block_index += 1;
            self.text_block_open = true;
            out.push(self.content_block_start_text());
        }
        out.push(self.content_block_delta_text(delta));
        out
    }

    fn encode_tool_call(&mut self, id: &str, name: &str, args_json: &str) -> Vec<String> {
        let mut out = Vec::with_capacity(4);
        if self.text_block_open {
            out.push(self.content_block_stop());
            self.text_block_open = false;
        }
        self.block_index += 1;
        self.has_tool_calls = true;

        let start_json = serde_json::json!({
            "type": "content_block_start",
            "index": self.block_index,
            "content_block": {
                "type": "tool_use",
                "id": id,
                "name": name,
                "input": {},
            }
        })
        .to_string();
        out.push(anthropic_sse_frame("content_block_start", &start_json));

        let delta_json = serde_json::json!({
            "type": "content_block_delta",
            "index": self.block_index,
            "delta": {"type": "input_json_delta", "partial_json": args_json},
        })
        .to_string();
        out.push(anthropic_sse_frame("content_block_delta", &delta_json));

        out.push(self.content_block_stop());
        out
    }

    fn encode_finish(&mut self) -> Vec<String> {
        let mut out = Vec::with_capacity(3);
        if self.text_block_open {
            out.push(self.content_block_stop());
            self.text_block_open = false;
        }

        let stop_reason = if self.has_tool_calls {
            "tool_use"
        } else {
            "end_turn"
        };
        let delta_json = serde_json::json!({
            "type": "message_delta",
            "delta": {"stop_reason": stop_reason, "stop_sequence": null},
            "usage": {"output_tokens": 0},
        })
        .to_string();
        out.push(anthropic_sse_frame("message_delta", &delta_json));
        out.push(anthropic_sse_frame("message_stop", "{\"type\":\"message_stop\"}"));
        out
    }

    fn encode_error(&mut self, message: &str) -> Vec<String> {
        let json = serde_json::json!({"type": "error", "error": {"type": "api_error", "message": message}}).to_string();
        vec![anthropic_sse_frame("error", &json)]
    }

    fn content_block_start_text(&self) -> String {
        let json = serde_json::json!({
            "type": "content_block_start",
            "index": self.block_index,
            "content_block": {"type": "text", "text": ""},
        })
        .to_string();
        anthropic_sse_frame("content_block_start", &json)
    }

    fn content_block_delta_text(&self, text: &str) -> String {
        let json = serde_json::json!({
            "type": "content_block_delta",
            "index": self.block_index,
            "delta": {"type": "text_delta", "text": text},
        })
        .to_string();
        anthropic_sse_frame("content_block_delta", &json)
    }

    fn content_block_stop(&self) -> String {
        let json = serde_json::json!({"type": "content_block_stop", "index": self.block_index}).to_string();
        anthropic_sse_frame("content_block_stop", &json)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn chat_completions_text_delta_then_finish_emits_done() {
        let mux = ChatCompletionsMultiplexer::new("chatcmpl-1".to_string(), "gpt-4o".to_string(), 0);
        let frame = mux.encode(&CanonicalStreamEvent::TextDelta {
            delta: "hi".to_string(),
        });
        assert!(frame.starts_with("data: "));
        assert!(frame.contains("\"content\":\"hi\""));

        let frame = mux.encode(&CanonicalStreamEvent::Finish {
            reason: FinishReason::Stop,
            usage: crate::protocol::canonical::CanonicalUsage::default(),
        });
        assert!(frame.contains("\"finish_reason\":\"stop\""));
        assert!(frame.ends_with("data: [DONE]\n\n"));
    }

    #[test]
    fn messages_text_then_tool_call_then_finish_closes_blocks_in_order() {
        let mut mux = MessagesMultiplexer::new("claude-3-5-sonnet".to_string());
        let start = mux.start_frame();
        assert!(start.starts_with("event: message_start"));

        let frames = mux.encode(&CanonicalStreamEvent::TextDelta {
            delta: "checking".to_string(),
        });
        assert_eq!(frames.len(), 2);
        assert!(frames[0].contains("content_block_start"));
        assert!(frames[1].contains("content_block_delta"));

        let frames = mux.encode(&CanonicalStreamEvent::ToolCall {
            id: "call_1".to_string(),
            name: "search".to_string(),
            args_json: "{\"q\":\"rust\"}".to_string(),
        });
        // text block stop, tool_use start, tool_use delta, tool_use stop
        assert_eq!(frames.len(), 4);
        assert!(frames[0].contains("content_block_stop") && frames[0].contains("\"index\":0"));
        assert!(frames[1].contains("tool_use") && frames[1].contains("\"index\":1"));

        let frames = mux.encode(&CanonicalStreamEvent::Finish {
            reason: FinishReason::ToolCalls,
            usage: crate::protocol::canonical::CanonicalUsage::default(),
        });
        assert_eq!(frames.len(), 2);
        assert!(frames[0].contains("\"stop_reason\":\"tool_use\""));
        assert!(frames[1].starts_with("event: message_stop"));
    }
}

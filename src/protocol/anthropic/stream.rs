//! Upstream Messages API event-stream -> canonical stream events, used by the
//! Anthropic-compatible adapter's streaming path (spec S4.5.b).

use rustc_hash::FxHashMap;

use crate::protocol::canonical::{CanonicalStreamEvent, CanonicalUsage};
use crate::protocol::mapping::anthropic_stop_reason_to_canonical;

use super::{AnthropicStreamContentBlock, AnthropicStreamDelta, AnthropicStreamEvent};

#[derive(Default)]
struct ToolUseAccum {
    id: String,
    name: String,
    args: String,
}

/// Tracks open content blocks by index and emits canonical events as upstream
/// `message_start`/`content_block_*`/`message_delta`/`message_stop` events arrive.
#[derive(Default)]
pub struct AnthropicStreamDecoder {
    tool_blocks: FxHashMap<usize, ToolUseAccum>,
    usage: CanonicalUsage,
}

impl AnthropicStreamDecoder {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Feed one decoded stream event, returning zero or more canonical events.
    pub fn feed(&mut self, event: &AnthropicStreamEvent) -> Vec<CanonicalStreamEvent> {
        let mut out = Vec::new();

        match event {
            AnthropicStreamEvent::MessageStart { message } => {
                self.usage.prompt_tokens = message.usage.input_tokens;
            }
            AnthropicStreamEvent::ContentBlockStart {
                index,
                content_block,
            } => {
                if let AnthropicStreamContentBlock::ToolUse { id, name } = content_block {
                    self.tool_blocks.insert(
                        *index,
                        ToolUseAccum {
                            id: id.clone(),
                            name: name.clone(),
                            args: String::new(),
                        },
                    );
                }
            }
            AnthropicStreamEvent::ContentBlockDelta { index, delta } => match delta {
                AnthropicStreamDelta::TextDelta { text } => {
                    if !text.is_empty() {
                        out.push(CanonicalStreamEvent::TextDelta {
                            delta: text.clone(),
                        });
                    }
                }
                AnthropicStreamDelta::InputJsonDelta { partial_json } => {
                    if let Some(accum) = self.tool_blocks.get_mut(index) {
                        accum.args.push_str(partial_json);
                    }
                }
                AnthropicStreamDelta::Unknown => {}
            },
            AnthropicStreamEvent::ContentBlockStop { index } => {
                if let Some(accum) = self.tool_blocks.remove(index) {
                    let args_json = if accum.args.is_empty() {
                        "{}".to_string()
                    } else {
                        accum.args
                    };
                    out.push(CanonicalStreamEvent::ToolCall {
                        id: accum.id,
                        name: accum.name,
                        args_json,
                    });
                }
            }
            AnthropicStreamEvent::MessageDelta { delta, usage } => {
                self.usage.completion_tokens = usage.output_tokens;
                if let Some(reason) = delta.stop_reason.as_deref() {
                    out.push(CanonicalStreamEvent::Finish {
                        reason: anthropic_stop_reason_to_canonical(reason),
                        usage: self.usage,
                    });
                }
            }
            AnthropicStreamEvent::MessageStop {} | AnthropicStreamEvent::Ping {} => {}
            AnthropicStreamEvent::Unknown => {}
        }

        out
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::protocol::anthropic::AnthropicStreamMessage;
    use crate::protocol::canonical::FinishReason;

    #[test]
    fn emits_text_delta_from_content_block_delta() {
        let mut decoder = AnthropicStreamDecoder::new();
        let events = decoder.feed(&AnthropicStreamEvent::ContentBlockDelta {
            index: 0,
            delta: AnthropicStreamDelta::TextDelta {
                text: "hi".to_string(),
            },
        });
        assert_eq!(events.len(), 1);
        match &events[0] {
            CanonicalStreamEvent::TextDelta { delta } => assert_eq!(delta, "hi"),
            other => panic!("expected text delta, got {other:?}"),
        }
    }

    #[test]
    fn accumulates_tool_use_json_and_flushes_on_block_stop() {
        let mut decoder = AnthropicStreamDecoder::new();
        decoder.feed(&AnthropicStreamEvent::ContentBlockStart {
            index: 1,
            content_block: AnthropicStreamContentBlock::ToolUse {
                id: "call_1".to_string(),
                name: "search".to_string(),
            },
        });
        decoder.feed(&AnthropicStreamEvent::ContentBlockDelta {
            index: 1,
            delta: AnthropicStreamDelta::InputJsonDelta {
                partial_json: "{\"q\":".to_string(),
            },
        });
        decoder.feed(&AnthropicStreamEvent::ContentBlockDelta {
            index: 1,
            delta: AnthropicStreamDelta::InputJsonDelta {
                partial_json: "\"rust\"}".to_string(),
            },
        });
        let events = decoder.feed(&AnthropicStreamEvent::ContentBlockStop { index: 1 });
        assert_eq!(events.len(), 1);
        match &events[0] {
            CanonicalStreamEvent::ToolCall {
                id,
                name,
                args_json,
            } => {
                assert_eq!(id, "call_1");
                assert_eq!(name, "search");
                assert_eq!(args_json, "{\"q\":\"rust\"}");
            }
            other => panic!("expected tool call, got {other:?}"),
        }
    }

    #[test]
    fn message_delta_with_stop_reason_emits_finish_with_usage() {
        let mut decoder = AnthropicStreamDecoder::new();
        decoder.feed(&AnthropicStreamEvent::MessageStart {
            message: AnthropicStreamMessage {
                usage: crate::protocol::anthropic::AnthropicStreamUsage {
                    input_tokens: 12,
                    output_tokens: 0,
                },
            },
        });
        let events = decoder.feed(&AnthropicStreamEvent::MessageDelta {
            delta: crate::protocol::anthropic::AnthropicMessageDelta {
                stop_reason: Some("end_turn".to_string()),
            },
            usage: crate::protocol::anthropic::AnthropicStreamUsage {
                input_tokens: 0,
                output_tokens: 7,
            },
        });
        assert_eq!(events.len(), 1);
        match &events[0] {
            CanonicalStreamEvent::Finish { reason, usage } => {
                assert_eq!(*reason, FinishReason::Stop);
                assert_eq!(usage.prompt_tokens, 12);
                assert_eq!(usage.completion_tokens, 7);
            }
            other => panic!("expected finish, got {other:?}"),
        }
    }
}

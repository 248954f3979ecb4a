//! Upstream Chat-Completions-style SSE chunk -> canonical stream events, used by the
//! Bearer adapter's streaming path (spec S4.5.a).

use rustc_hash::FxHashMap;

use crate::protocol::canonical::{CanonicalStreamEvent, CanonicalUsage};
use crate::protocol::mapping::openai_finish_reason_to_canonical;

use super::OpenAiStreamChunk;

#[derive(Default)]
struct ToolCallAccum {
    id: String,
    name: String,
    args: String,
}

/// Accumulates streaming tool-call argument fragments by index and emits canonical
/// events as upstream Chat-Completions-shaped SSE chunks arrive.
#[derive(Default)]
pub struct OpenAiStreamDecoder {
    order: Vec<u32>,
    calls: FxHashMap<u32, ToolCallAccum>,
    usage: CanonicalUsage,
}

impl OpenAiStreamDecoder {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Feed one decoded stream chunk, returning zero or more canonical events.
    pub fn feed(&mut self, chunk: &OpenAiStreamChunk) -> Vec<CanonicalStreamEvent> {
        let mut out = Vec::new();
        if let Some(usage) = &chunk.usage {
            self.usage = CanonicalUsage {
                prompt_tokens: usage.prompt_tokens,
                completion_tokens: usage.completion_tokens,
            };
        }

        let Some(choice) = chunk.choices.first() else {
            return out;
        };

        if let Some(content) = choice.delta.content.as_deref() {
            if !content.is_empty() {
                out.push(CanonicalStreamEvent::TextDelta {
                    delta: content.to_string(),
                });
            }
        }

        if let Some(deltas) = &choice.delta.tool_calls {
            for delta in deltas {
                let entry = self.calls.entry(delta.index).or_insert_with(|| {
                    self.order.push(delta.index);
                    ToolCallAccum::default()
                });
                if let Some(id) = &delta.id {
                    entry.id = id.clone();
                }
                if let Some(function) = &delta.function {
                    if let Some(name) = &function.name {
                        entry.name = name.clone();
                    }
                    if let Some(args) = &function.arguments {
                        entry.args.push_str(args);
                    }
                }
            }
        }

        if let Some(reason) = choice.finish_reason.as_deref() {
            for index in std::mem::take(&mut self.order) {
                if let Some(call) = self.calls.remove(&index) {
                    out.push(CanonicalStreamEvent::ToolCall {
                        id: call.id,
                        name: call.name,
                        args_json: call.args,
                    });
                }
            }
            out.push(CanonicalStreamEvent::Finish {
                reason: openai_finish_reason_to_canonical(reason),
                usage: self.usage,
            });
        }

        out
    }
}

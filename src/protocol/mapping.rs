use super::canonical::{CanonicalRole, FinishReason};

// ---------------------------------------------------------------------------
// Role mappings
// ---------------------------------------------------------------------------

#[must_use]
pub fn canonical_role_to_openai(role: CanonicalRole) -> &'static str {
    match role {
        CanonicalRole::System => "system",
        CanonicalRole::User => "user",
        CanonicalRole::Assistant => "assistant",
        CanonicalRole::Tool => "tool",
    }
}

#[must_use]
pub fn openai_role_to_canonical(s: &str) -> CanonicalRole {
    match s {
        "system" | "developer" => CanonicalRole::System,
        "assistant" => CanonicalRole::Assistant,
        "tool" => CanonicalRole::Tool,
        _ => CanonicalRole::User,
    }
}

#[must_use]
pub fn canonical_role_to_anthropic(role: CanonicalRole) -> &'static str {
    match role {
        CanonicalRole::System | CanonicalRole::User | CanonicalRole::Tool => "user",
        CanonicalRole::Assistant => "assistant",
    }
}

#[must_use]
pub fn anthropic_role_to_canonical(s: &str) -> CanonicalRole {
    match s {
        "assistant" => CanonicalRole::Assistant,
        _ => CanonicalRole::User,
    }
}

// ---------------------------------------------------------------------------
// Finish reason mappings (spec S3/S4.5a/S4.5b)
// ---------------------------------------------------------------------------

#[must_use]
pub fn openai_finish_reason_to_canonical(s: &str) -> FinishReason {
    match s {
        "stop" => FinishReason::Stop,
        "length" => FinishReason::Length,
        "tool_calls" => FinishReason::ToolCalls,
        _ => FinishReason::Other,
    }
}

#[must_use]
pub fn canonical_finish_reason_to_openai(reason: FinishReason) -> &'static str {
    match reason {
        FinishReason::Stop => "stop",
        FinishReason::Length => "length",
        FinishReason::ToolCalls => "tool_calls",
        FinishReason::Error | FinishReason::Other => "stop",
    }
}

#[must_use]
pub fn anthropic_stop_reason_to_canonical(s: &str) -> FinishReason {
    match s {
        "tool_use" => FinishReason::ToolCalls,
        "end_turn" => FinishReason::Stop,
        "max_tokens" => FinishReason::Length,
        _ => FinishReason::Other,
    }
}

/// Anthropic's non-streaming/ `message_delta.stop_reason` has only two values the
/// multiplexer picks between (spec S4.6): `tool_use` when any tool call was produced,
/// `end_turn` otherwise.
#[must_use]
pub fn canonical_finish_reason_to_anthropic_stop_reason(reason: FinishReason) -> &'static str {
    match reason {
        FinishReason::ToolCalls => "tool_use",
        FinishReason::Length => "max_tokens",
        _ => "end_turn",
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn openai_role_roundtrip() {
        for role in [
            CanonicalRole::System,
            CanonicalRole::User,
            CanonicalRole::Assistant,
            CanonicalRole::Tool,
        ] {
            let wire = canonical_role_to_openai(role);
            assert_eq!(openai_role_to_canonical(wire), role);
        }
    }

    #[test]
    fn openai_developer_role_maps_to_system() {
        assert_eq!(openai_role_to_canonical("developer"), CanonicalRole::System);
    }

    #[test]
    fn openai_finish_reason_mapping() {
        assert_eq!(openai_finish_reason_to_canonical("stop"), FinishReason::Stop);
        assert_eq!(
            openai_finish_reason_to_canonical("tool_calls"),
            FinishReason::ToolCalls
        );
        assert_eq!(
            openai_finish_reason_to_canonical("length"),
            FinishReason::Length
        );
        assert_eq!(
            openai_finish_reason_to_canonical("content_filter"),
            FinishReason::Other
        );
    }

    #[test]
    fn anthropic_stop_reason_mapping() {
        assert_eq!(
            anthropic_stop_reason_to_canonical("tool_use"),
            FinishReason::ToolCalls
        );
        assert_eq!(
            anthropic_stop_reason_to_canonical("end_turn"),
            FinishReason::Stop
        );
        assert_eq!(
            anthropic_stop_reason_to_canonical("max_tokens"),
            FinishReason::Length
        );
    }
}

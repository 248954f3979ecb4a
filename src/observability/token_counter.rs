use crate::protocol::canonical::CanonicalUsage;
use std::time::Duration;
use tracing::info;

/// Log token usage for a completed request at INFO level.
pub fn log_request_usage(model: &str, usage: &CanonicalUsage, duration: Duration) {
    info!(
        model = model,
        prompt_tokens = usage.prompt_tokens,
        completion_tokens = usage.completion_tokens,
        duration_seconds = duration.as_secs_f64(),
        "request completed"
    );
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn logs_without_panicking() {
        let usage = CanonicalUsage {
            prompt_tokens: 10,
            completion_tokens: 5,
        };
        log_request_usage("openai/gpt-4o-mini", &usage, Duration::from_millis(42));
    }
}

//! Subprocess adapter (spec S4.5.d): `cursor-agent`, driven as a child process rather
//! than an HTTPS upstream. No credential record is consulted — the caller is expected to
//! have already authenticated `cursor-agent` out of band (its own OAuth/API-key store),
//! matching the teacher's `claude_subprocess` provider which shells out to an
//! already-logged-in CLI instead of holding its own bearer token.

use std::collections::HashMap;
use std::process::Stdio;
use std::time::Duration;

use futures_util::stream::{self, BoxStream, StreamExt};
use serde::Deserialize;
use serde_json::Value;
use tokio::io::{AsyncBufReadExt, AsyncWriteExt, BufReader};
use tokio::process::{Child, Command};

use crate::error::GatewayError;
use crate::protocol::canonical::{
    CanonicalMessage, CanonicalPart, CanonicalRole, CanonicalStreamEvent, CanonicalToolDecl,
    CanonicalUsage, FinishReason, GenerateResult, GenerationRequest, ToolCallResult,
};

use super::LanguageModel;

const WALL_TIMEOUT: Duration = Duration::from_secs(120);
const DEFAULT_EXECUTABLE: &str = "cursor-agent";

/// Terminates the child with SIGTERM (spec S4.5.d / S5: wall-timeout and
/// cancellation kill the subprocess with SIGTERM, not SIGKILL). Falls back to
/// `start_kill` off Unix, where there is no SIGTERM to send.
fn terminate_child(child: &mut Child) {
    #[cfg(unix)]
    {
        if let Some(pid) = child.id() {
            unsafe {
                libc::kill(pid as libc::pid_t, libc::SIGTERM);
            }
        }
    }
    #[cfg(not(unix))]
    {
        let _ = child.start_kill();
    }
}

/// Drives `cursor-agent` as a child process, translating its stdin prompt / stdout
/// NDJSON protocol into the canonical event alphabet.
pub struct CursorSubprocessAdapter {
    model: String,
    executable: String,
}

impl CursorSubprocessAdapter {
    #[must_use]
    pub fn new(model: String) -> Self {
        let executable = std::env::var("CURSOR_AGENT_EXECUTABLE")
            .unwrap_or_else(|_| DEFAULT_EXECUTABLE.to_string());
        Self { model, executable }
    }

    fn build_command(&self, req: &GenerationRequest) -> Command {
        let mut cmd = Command::new(&self.executable);
        cmd.args([
            "--print",
            "--output-format",
            "stream-json",
            "--stream-partial-output",
            "--force",
            "--model",
            &self.model,
        ]);

        let has_tools = req.tools.as_deref().is_some_and(|t| !t.is_empty());
        if has_tools {
            // Default mode already lets the model call the tools described in the
            // composed prompt.
        } else {
            cmd.args(["--mode", "ask"]);
        }

        cmd.stdin(Stdio::piped())
            .stdout(Stdio::piped())
            .stderr(Stdio::null())
            .kill_on_drop(true);
        cmd
    }
}

#[async_trait::async_trait]
impl LanguageModel for CursorSubprocessAdapter {
    async fn generate(&self, req: &GenerationRequest) -> Result<GenerateResult, GatewayError> {
        let mut events = self.stream(req).await?;
        let mut result = GenerateResult::default();
        while let Some(event) = events.next().await {
            match event {
                CanonicalStreamEvent::TextDelta { delta } => result.text.push_str(&delta),
                CanonicalStreamEvent::ToolCall {
                    id,
                    name,
                    args_json,
                } => result.tool_calls.push(ToolCallResult {
                    id,
                    name,
                    args_json,
                }),
                CanonicalStreamEvent::Finish { reason, usage } => {
                    result.finish_reason = Some(reason);
                    result.usage = usage;
                }
                CanonicalStreamEvent::Error { message } => {
                    return Err(GatewayError::SubprocessFailed {
                        code: None,
                        stderr_excerpt: message,
                    });
                }
            }
        }
        Ok(result)
    }

    async fn stream(
        &self,
        req: &GenerationRequest,
    ) -> Result<BoxStream<'static, CanonicalStreamEvent>, GatewayError> {
        let prompt = compose_prompt(req);
        let mut cmd = self.build_command(req);

        let mut child = cmd
            .spawn()
            .map_err(|e| GatewayError::SubprocessFailed {
                code: None,
                stderr_excerpt: format!("failed to spawn {}: {e}", self.executable),
            })?;

        let mut stdin = child.stdin.take().ok_or_else(|| GatewayError::Internal(
            "cursor-agent child missing stdin".to_string(),
        ))?;
        let stdout = child.stdout.take().ok_or_else(|| GatewayError::Internal(
            "cursor-agent child missing stdout".to_string(),
        ))?;

        stdin
            .write_all(prompt.as_bytes())
            .await
            .map_err(|e| GatewayError::SubprocessFailed {
                code: None,
                stderr_excerpt: e.to_string(),
            })?;
        drop(stdin);

        let tool_names: Vec<String> = req
            .tools
            .as_deref()
            .map(|tools| tools.iter().map(|t| t.name.clone()).collect())
            .unwrap_or_default();

        let (tx, rx) = tokio::sync::mpsc::unbounded_channel::<CanonicalStreamEvent>();

        tokio::spawn(async move {
            let mut reader = BufReader::new(stdout).lines();
            let mut state = CursorDecoder::new(tool_names);
            let timeout = tokio::time::sleep(WALL_TIMEOUT);
            tokio::pin!(timeout);

            loop {
                tokio::select! {
                    line = reader.next_line() => {
                        match line {
                            Ok(Some(line)) => {
                                if line.trim().is_empty() {
                                    continue;
                                }
                                for event in state.feed_line(&line) {
                                    if tx.send(event).is_err() {
                                        terminate_child(&mut child);
                                        return;
                                    }
                                }
                            }
                            Ok(None) => break,
                            Err(_) => break,
                        }
                    }
                    () = &mut timeout => {
                        terminate_child(&mut child);
                        let _ = tx.send(CanonicalStreamEvent::Error {
                            message: "cursor-agent exceeded 120s wall timeout".to_string(),
                        });
                        return;
                    }
                }
            }

            let _ = child.wait().await;
            let reason = if state.emitted_tool_call {
                FinishReason::ToolCalls
            } else {
                FinishReason::Stop
            };
            let _ = tx.send(CanonicalStreamEvent::Finish {
                reason,
                usage: CanonicalUsage::default(),
            });
        });

        Ok(Box::pin(stream::unfold(rx, |mut rx| async move {
            rx.recv().await.map(|event| (event, rx))
        })))
    }
}

/// Incremental decoder over `cursor-agent`'s NDJSON stdout, tracking cumulative
/// assistant text (spec S4.5.d: "the adapter computes a delta against the last-seen
/// value") and de-duplicating tool calls by `call_id`.
struct CursorDecoder {
    tool_names: Vec<String>,
    last_text: String,
    seen_call_ids: std::collections::HashSet<String>,
    emitted_tool_call: bool,
}

#[derive(Deserialize)]
struct CursorLine {
    #[serde(rename = "type")]
    line_type: String,
    #[serde(default)]
    text: String,
    #[serde(flatten)]
    rest: HashMap<String, Value>,
}

impl CursorDecoder {
    fn new(tool_names: Vec<String>) -> Self {
        Self {
            tool_names,
            last_text: String::new(),
            seen_call_ids: std::collections::HashSet::new(),
            emitted_tool_call: false,
        }
    }

    fn feed_line(&mut self, line: &str) -> Vec<CanonicalStreamEvent> {
        let Ok(parsed) = serde_json::from_str::<CursorLine>(line) else {
            return Vec::new();
        };

        match parsed.line_type.as_str() {
            "assistant" => self.feed_assistant(&parsed.text),
            "tool_call" => self.feed_tool_call(&parsed.rest),
            _ => Vec::new(),
        }
    }

    fn feed_assistant(&mut self, cumulative_text: &str) -> Vec<CanonicalStreamEvent> {
        if !cumulative_text.starts_with(self.last_text.as_str()) {
            // The upstream restarted its cumulative buffer; treat the new text as the
            // delta in full rather than producing a negative-length slice.
            self.last_text = cumulative_text.to_string();
            if cumulative_text.is_empty() {
                return Vec::new();
            }
            return vec![CanonicalStreamEvent::TextDelta {
                delta: cumulative_text.to_string(),
            }];
        }

        let delta = &cumulative_text[self.last_text.len()..];
        if delta.is_empty() {
            return Vec::new();
        }
        let out = vec![CanonicalStreamEvent::TextDelta {
            delta: delta.to_string(),
        }];
        self.last_text = cumulative_text.to_string();
        out
    }

    fn feed_tool_call(&mut self, rest: &HashMap<String, Value>) -> Vec<CanonicalStreamEvent> {
        // The payload nests the actual call under a single camelCase key, e.g.
        // `readToolCall`, whose prefix is the tool name once de-camelCased.
        let Some((wire_key, payload)) = rest.iter().next() else {
            return Vec::new();
        };

        let raw_name = de_camel_case_tool_key(wire_key);
        let Some(matched_name) = self.match_tool_name(&raw_name) else {
            return Vec::new();
        };

        let call_id = payload
            .get("call_id")
            .or_else(|| payload.get("callId"))
            .and_then(Value::as_str)
            .map(str::to_string)
            .unwrap_or_else(crate::util::next_call_id);

        if !self.seen_call_ids.insert(call_id.clone()) {
            return Vec::new();
        }

        let args_json = payload
            .get("args")
            .cloned()
            .unwrap_or(Value::Null)
            .to_string();

        self.emitted_tool_call = true;
        vec![CanonicalStreamEvent::ToolCall {
            id: call_id,
            name: matched_name,
            args_json,
        }]
    }

    /// Case-insensitive, alphanumeric-only match against the caller-provided tool list
    /// (spec S4.5.d). Returns the caller's declared spelling so names round-trip.
    fn match_tool_name(&self, candidate: &str) -> Option<String> {
        let normalized_candidate = normalize_tool_name(candidate);
        self.tool_names
            .iter()
            .find(|name| normalize_tool_name(name) == normalized_candidate)
            .cloned()
    }
}

fn normalize_tool_name(name: &str) -> String {
    name.chars()
        .filter(|c| c.is_ascii_alphanumeric())
        .flat_map(char::to_lowercase)
        .collect()
}

/// `readToolCall` -> `read`, `runTerminalCommandToolCall` -> `runTerminalCommand`.
fn de_camel_case_tool_key(key: &str) -> String {
    key.strip_suffix("ToolCall").unwrap_or(key).to_string()
}

/// Composes the stdin prompt from the canonical message list using labeled sections,
/// since `cursor-agent` takes a single text prompt rather than a structured message
/// array (spec S4.5.d).
fn compose_prompt(req: &GenerationRequest) -> String {
    let mut out = String::new();

    if let Some(system) = &req.system {
        out.push_str("SYSTEM:\n");
        out.push_str(system);
        out.push_str("\n\n");
    }

    if let Some(tools) = &req.tools {
        if !tools.is_empty() {
            out.push_str("SYSTEM:\n");
            out.push_str("The following tools are available. Call them using your normal tool-call mechanism.\n");
            for tool in tools.iter() {
                push_tool_description(&mut out, tool);
            }
            out.push('\n');
        }
    }

    let mut trailing_tool_result = false;
    for msg in &req.messages {
        match msg.role {
            CanonicalRole::System => {
                out.push_str("SYSTEM:\n");
                push_parts_text(&mut out, msg);
                out.push_str("\n\n");
            }
            CanonicalRole::User => {
                out.push_str("USER:\n");
                push_parts_text(&mut out, msg);
                out.push_str("\n\n");
                trailing_tool_result = false;
            }
            CanonicalRole::Assistant => {
                out.push_str("ASSISTANT:\n");
                push_parts_text(&mut out, msg);
                out.push_str("\n\n");
                trailing_tool_result = false;
            }
            CanonicalRole::Tool => {
                out.push_str("TOOL_RESULT:\n");
                push_parts_text(&mut out, msg);
                out.push_str("\n\n");
                trailing_tool_result = true;
            }
        }
    }

    if trailing_tool_result {
        out.push_str("Continue.\n");
    }

    out
}

fn push_tool_description(out: &mut String, tool: &CanonicalToolDecl) {
    out.push_str("- ");
    out.push_str(&tool.name);
    if let Some(description) = &tool.description {
        out.push_str(": ");
        out.push_str(description);
    }
    out.push_str("\n  schema: ");
    out.push_str(&tool.parameters_json_schema.to_string());
    out.push('\n');
}

fn push_parts_text(out: &mut String, msg: &CanonicalMessage) {
    for part in &msg.parts {
        match part {
            CanonicalPart::Text(text) => out.push_str(text),
            CanonicalPart::Image { mime_type, .. } => {
                out.push_str(&format!("[image: {mime_type}]"));
            }
            CanonicalPart::ToolCall { name, args_json, .. } => {
                out.push_str(&format!("[called {name} with {args_json}]"));
            }
            CanonicalPart::ToolResult { content, .. } => out.push_str(content),
        }
        out.push('\n');
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn de_camel_case_strips_tool_call_suffix() {
        assert_eq!(de_camel_case_tool_key("readToolCall"), "read");
        assert_eq!(
            de_camel_case_tool_key("runTerminalCommandToolCall"),
            "runTerminalCommand"
        );
    }

    #[test]
    fn normalize_tool_name_ignores_case_and_punctuation() {
        assert_eq!(normalize_tool_name("get_weather"), "getweather");
        assert_eq!(normalize_tool_name("GetWeather"), "getweather");
    }

    #[test]
    fn assistant_cumulative_text_emits_delta() {
        let mut decoder = CursorDecoder::new(vec![]);
        let first = decoder.feed_assistant("Hel");
        assert_eq!(first.len(), 1);
        matches!(&first[0], CanonicalStreamEvent::TextDelta { delta } if delta == "Hel");

        let second = decoder.feed_assistant("Hello");
        matches!(&second[0], CanonicalStreamEvent::TextDelta { delta } if delta == "lo");
    }

    #[test]
    fn tool_call_matched_against_caller_tools_case_insensitively() {
        let mut decoder = CursorDecoder::new(vec!["GetWeather".to_string()]);
        let mut rest = HashMap::new();
        rest.insert(
            "getWeatherToolCall".to_string(),
            serde_json::json!({"call_id": "c1", "args": {"city": "Tokyo"}}),
        );
        let events = decoder.feed_tool_call(&rest);
        assert_eq!(events.len(), 1);
        match &events[0] {
            CanonicalStreamEvent::ToolCall { id, name, .. } => {
                assert_eq!(id, "c1");
                assert_eq!(name, "GetWeather");
            }
            _ => panic!("expected tool call"),
        }
    }

    #[test]
    fn tool_call_not_matching_caller_tools_is_ignored() {
        let mut decoder = CursorDecoder::new(vec!["search".to_string()]);
        let mut rest = HashMap::new();
        rest.insert(
            "readToolCall".to_string(),
            serde_json::json!({"call_id": "c2", "args": {}}),
        );
        assert!(decoder.feed_tool_call(&rest).is_empty());
    }

    #[test]
    fn duplicate_call_id_emitted_once() {
        let mut decoder = CursorDecoder::new(vec!["search".to_string()]);
        let mut rest = HashMap::new();
        rest.insert(
            "searchToolCall".to_string(),
            serde_json::json!({"call_id": "c3", "args": {}}),
        );
        assert_eq!(decoder.feed_tool_call(&rest).len(), 1);
        assert!(decoder.feed_tool_call(&rest).is_empty());
    }

    #[test]
    fn compose_prompt_includes_labeled_sections() {
        let req = GenerationRequest {
            messages: vec![
                CanonicalMessage::text(CanonicalRole::User, "hi there"),
                CanonicalMessage::text(CanonicalRole::Assistant, "hello"),
            ],
            system: Some("be nice".to_string()),
            tools: None,
            tool_choice: None,
            temperature: None,
            top_p: None,
            max_tokens: None,
            stream: true,
        };
        let prompt = compose_prompt(&req);
        assert!(prompt.contains("SYSTEM:\nbe nice"));
        assert!(prompt.contains("USER:\nhi there"));
        assert!(prompt.contains("ASSISTANT:\nhello"));
    }

    #[test]
    fn compose_prompt_adds_continue_marker_after_tool_result() {
        let req = GenerationRequest {
            messages: vec![CanonicalMessage {
                role: CanonicalRole::Tool,
                parts: {
                    let mut p = smallvec::SmallVec::new();
                    p.push(CanonicalPart::ToolResult {
                        tool_call_id: "c1".to_string(),
                        content: "42".to_string(),
                    });
                    p
                },
            }],
            system: None,
            tools: None,
            tool_choice: None,
            temperature: None,
            top_p: None,
            max_tokens: None,
            stream: false,
        };
        let prompt = compose_prompt(&req);
        assert!(prompt.contains("TOOL_RESULT:\n42"));
        assert!(prompt.trim_end().ends_with("Continue."));
    }
}

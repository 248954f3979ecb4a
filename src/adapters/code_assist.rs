//! Google Code Assist adapter (spec S4.5.c): the internal RPC surface backing
//! `gemini-cli` and `antigravity`. Distinct from the public Gemini API — requests are
//! wrapped in a `{project, model, request}` envelope and a per-account GCP project id
//! must be discovered once via `loadCodeAssist` before the first generation call.

use std::sync::Arc;

use futures_util::stream::{self, BoxStream, StreamExt};
use serde_json::{json, Value};

use crate::credentials::CredentialStore;
use crate::error::GatewayError;
use crate::protocol::canonical::{
    CanonicalMessage, CanonicalPart, CanonicalRole, CanonicalStreamEvent, CanonicalToolChoice,
    CanonicalUsage, FinishReason, GenerateResult, GenerationRequest, ToolCallResult,
};
use crate::protocol::tools::canonical_tool_to_google_function_declaration;
use crate::stream::sse_frame_stream;
use crate::util::validate_json_string;

use super::{shared_http_client, truncate_body, LanguageModel};

const MAX_ERROR_BODY_CHARS: usize = 2048;
const IDE_CLIENT: &str = "ai-gateway";
const IDE_VERSION: &str = "1.0.0";

/// Code Assist streaming/non-streaming HTTPS adapter.
pub struct CodeAssistAdapter {
    base_url: String,
    access_token: String,
    model: String,
    project_id: Option<String>,
    store: Arc<CredentialStore>,
    provider_id: String,
}

impl CodeAssistAdapter {
    #[must_use]
    pub fn new(
        base_url: String,
        access_token: String,
        model: String,
        project_id: Option<String>,
        store: Arc<CredentialStore>,
        provider_id: String,
    ) -> Self {
        Self {
            base_url,
            access_token,
            model,
            project_id,
            store,
            provider_id,
        }
    }

    fn request_builder(&self, path: &str) -> reqwest::RequestBuilder {
        shared_http_client()
            .post(format!("{}/{path}", self.base_url.trim_end_matches('/')))
            .bearer_auth(&self.access_token)
    }

    /// Returns the bound GCP project id, discovering and caching it on first use.
    ///
    /// The discovery call is idempotent: if two requests race to discover it, both
    /// write the same derived value, which is an acceptable duplicate write (spec S5).
    async fn ensure_project_id(&self) -> Result<String, GatewayError> {
        if let Some(project_id) = &self.project_id {
            return Ok(project_id.clone());
        }

        let body = json!({
            "cloudaicompanionProject": null,
            "metadata": {
                "ideType": "IDE_UNSPECIFIED",
                "platform": "PLATFORM_UNSPECIFIED",
                "pluginType": "GEMINI",
                "ideVersion": IDE_VERSION,
            }
        });

        let resp = self
            .request_builder("v1internal:loadCodeAssist")
            .json(&body)
            .send()
            .await
            .map_err(|e| GatewayError::UpstreamUnreachable(e.to_string()))?;

        let status = resp.status();
        if !status.is_success() {
            let text = resp.text().await.unwrap_or_default();
            return Err(GatewayError::UpstreamRejected {
                status: status.as_u16(),
                body_excerpt: truncate_body(&text, MAX_ERROR_BODY_CHARS),
            });
        }

        let parsed: Value = resp
            .json()
            .await
            .map_err(|e| GatewayError::ProtocolParseFailed(e.to_string()))?;
        let project_id = parsed
            .get("cloudaicompanionProject")
            .and_then(|p| p.get("id"))
            .and_then(Value::as_str)
            .ok_or_else(|| {
                GatewayError::ProtocolParseFailed(
                    "loadCodeAssist response missing cloudaicompanionProject.id".to_string(),
                )
            })?
            .to_string();

        let mut record = self
            .store
            .get(&self.provider_id)
            .unwrap_or_default();
        record.project_id = Some(project_id.clone());
        let _ = self.store.put(&self.provider_id, record);

        Ok(project_id)
    }

    fn build_envelope(&self, req: &GenerationRequest, project_id: &str) -> Value {
        json!({
            "project": project_id,
            "model": self.model,
            "userAgent": format!("{IDE_CLIENT}/{IDE_VERSION}"),
            "requestId": crate::util::next_request_id(),
            "request": build_generate_content_request(req),
        })
    }
}

#[async_trait::async_trait]
impl LanguageModel for CodeAssistAdapter {
    async fn generate(&self, req: &GenerationRequest) -> Result<GenerateResult, GatewayError> {
        let project_id = self.ensure_project_id().await?;
        let envelope = self.build_envelope(req, &project_id);

        let resp = self
            .request_builder("v1internal:generateContent")
            .json(&envelope)
            .send()
            .await
            .map_err(|e| GatewayError::UpstreamUnreachable(e.to_string()))?;

        let status = resp.status();
        if !status.is_success() {
            let text = resp.text().await.unwrap_or_default();
            return Err(GatewayError::UpstreamRejected {
                status: status.as_u16(),
                body_excerpt: truncate_body(&text, MAX_ERROR_BODY_CHARS),
            });
        }

        let parsed: Value = resp
            .json()
            .await
            .map_err(|e| GatewayError::ProtocolParseFailed(e.to_string()))?;
        decode_generate_content_response(&parsed)
    }

    async fn stream(
        &self,
        req: &GenerationRequest,
    ) -> Result<BoxStream<'static, CanonicalStreamEvent>, GatewayError> {
        let project_id = self.ensure_project_id().await?;
        let envelope = self.build_envelope(req, &project_id);

        let resp = self
            .request_builder("v1internal:streamGenerateContent?alt=sse")
            .json(&envelope)
            .send()
            .await
            .map_err(|e| GatewayError::UpstreamUnreachable(e.to_string()))?;

        let status = resp.status();
        if !status.is_success() {
            let text = resp.text().await.unwrap_or_default();
            return Err(GatewayError::UpstreamRejected {
                status: status.as_u16(),
                body_excerpt: truncate_body(&text, MAX_ERROR_BODY_CHARS),
            });
        }

        let byte_stream = resp.bytes_stream();
        let events = sse_frame_stream(byte_stream);
        let decoded = events.flat_map(|event| {
            let out = match serde_json::from_str::<Value>(&event.data) {
                Ok(value) => decode_stream_candidate(&value),
                Err(_) => Vec::new(),
            };
            stream::iter(out)
        });

        Ok(Box::pin(decoded))
    }
}

fn build_generate_content_request(req: &GenerationRequest) -> Value {
    let mut contents = Vec::with_capacity(req.messages.len());
    for msg in &req.messages {
        if let Some(content) = message_to_content(msg) {
            contents.push(content);
        }
    }

    let mut request = json!({
        "contents": contents,
        "generationConfig": generation_config(req),
    });

    if let Some(system) = &req.system {
        request["systemInstruction"] = json!({"parts": [{"text": system}]});
    }

    if let Some(tools) = &req.tools {
        if !tools.is_empty() {
            let decls: Vec<Value> = tools
                .iter()
                .map(canonical_tool_to_google_function_declaration)
                .collect();
            request["tools"] = json!([{"functionDeclarations": decls}]);
            request["toolConfig"] = tool_config(req.tool_choice.as_ref());
        }
    }

    request
}

fn generation_config(req: &GenerationRequest) -> Value {
    let mut config = json!({
        "thinkingConfig": {"includeThoughts": true, "thinkingLevel": "LOW"},
    });
    if let Some(temperature) = req.temperature {
        config["temperature"] = json!(temperature);
    }
    if let Some(top_p) = req.top_p {
        config["topP"] = json!(top_p);
    }
    if let Some(max_tokens) = req.max_tokens {
        config["maxOutputTokens"] = json!(max_tokens);
    }
    config
}

fn tool_config(choice: Option<&CanonicalToolChoice>) -> Value {
    match choice {
        Some(CanonicalToolChoice::None) => json!({"functionCallingConfig": {"mode": "NONE"}}),
        Some(CanonicalToolChoice::Required) => json!({"functionCallingConfig": {"mode": "ANY"}}),
        Some(CanonicalToolChoice::Tool(name)) => json!({
            "functionCallingConfig": {"mode": "ANY", "allowedFunctionNames": [name]}
        }),
        Some(CanonicalToolChoice::Auto) | None => json!({"functionCallingConfig": {"mode": "AUTO"}}),
    }
}

fn message_to_content(msg: &CanonicalMessage) -> Option<Value> {
    let role = match msg.role {
        CanonicalRole::Assistant => "model",
        CanonicalRole::System => return None,
        CanonicalRole::User | CanonicalRole::Tool => "user",
    };

    let mut parts = Vec::with_capacity(msg.parts.len());
    for part in &msg.parts {
        match part {
            CanonicalPart::Text(text) => parts.push(json!({"text": text})),
            CanonicalPart::Image { bytes, mime_type } => {
                use base64::{engine::general_purpose::STANDARD, Engine as _};
                parts.push(json!({
                    "inlineData": {"mimeType": mime_type, "data": STANDARD.encode(bytes)}
                }));
            }
            CanonicalPart::ToolCall {
                id,
                name,
                args_json,
            } => {
                let args: Value = serde_json::from_str(args_json).unwrap_or(Value::Null);
                parts.push(json!({"functionCall": {"id": id, "name": name, "args": args}}));
            }
            CanonicalPart::ToolResult {
                tool_call_id,
                content,
            } => {
                parts.push(json!({
                    "functionResponse": {
                        "id": tool_call_id,
                        "name": tool_call_id,
                        "response": {"output": content},
                    }
                }));
            }
        }
    }

    if parts.is_empty() {
        return None;
    }
    Some(json!({"role": role, "parts": parts}))
}

fn response_candidate(value: &Value) -> Option<&Value> {
    value
        .get("response")
        .unwrap_or(value)
        .get("candidates")
        .and_then(Value::as_array)
        .and_then(|c| c.first())
}

fn decode_generate_content_response(value: &Value) -> Result<GenerateResult, GatewayError> {
    let Some(candidate) = response_candidate(value) else {
        return Ok(GenerateResult::default());
    };

    let mut text = String::new();
    let mut tool_calls = Vec::new();
    if let Some(parts) = candidate
        .get("content")
        .and_then(|c| c.get("parts"))
        .and_then(Value::as_array)
    {
        for part in parts {
            if let Some(t) = part.get("text").and_then(Value::as_str) {
                text.push_str(t);
            }
            if let Some(call) = part.get("functionCall") {
                let id = call
                    .get("id")
                    .and_then(Value::as_str)
                    .unwrap_or_else(|| call.get("name").and_then(Value::as_str).unwrap_or("call"))
                    .to_string();
                let name = call
                    .get("name")
                    .and_then(Value::as_str)
                    .unwrap_or_default()
                    .to_string();
                let args_json = validate_json_string(
                    call.get("args").cloned().unwrap_or(Value::Null).to_string(),
                    "functionCall.args",
                )?;
                tool_calls.push(ToolCallResult {
                    id,
                    name,
                    args_json,
                });
            }
        }
    }

    let finish_reason = candidate
        .get("finishReason")
        .and_then(Value::as_str)
        .map(google_finish_reason_to_canonical);

    let usage = value
        .get("response")
        .unwrap_or(value)
        .get("usageMetadata");
    let prompt_tokens = usage
        .and_then(|u| u.get("promptTokenCount"))
        .and_then(Value::as_u64)
        .unwrap_or(0);
    let completion_tokens = usage
        .and_then(|u| u.get("candidatesTokenCount"))
        .and_then(Value::as_u64)
        .unwrap_or(0)
        + usage
            .and_then(|u| u.get("thoughtsTokenCount"))
            .and_then(Value::as_u64)
            .unwrap_or(0);

    Ok(GenerateResult {
        text,
        tool_calls,
        finish_reason,
        usage: CanonicalUsage {
            prompt_tokens,
            completion_tokens,
        },
    })
}

fn decode_stream_candidate(value: &Value) -> Vec<CanonicalStreamEvent> {
    let mut out = Vec::new();
    let Some(candidate) = response_candidate(value) else {
        return out;
    };

    if let Some(parts) = candidate
        .get("content")
        .and_then(|c| c.get("parts"))
        .and_then(Value::as_array)
    {
        for part in parts {
            if let Some(t) = part.get("text").and_then(Value::as_str) {
                if !t.is_empty() {
                    out.push(CanonicalStreamEvent::TextDelta {
                        delta: t.to_string(),
                    });
                }
            }
            if let Some(call) = part.get("functionCall") {
                let id = call
                    .get("id")
                    .and_then(Value::as_str)
                    .unwrap_or_else(|| call.get("name").and_then(Value::as_str).unwrap_or("call"))
                    .to_string();
                let name = call
                    .get("name")
                    .and_then(Value::as_str)
                    .unwrap_or_default()
                    .to_string();
                let args_json = call
                    .get("args")
                    .cloned()
                    .unwrap_or(Value::Null)
                    .to_string();
                out.push(CanonicalStreamEvent::ToolCall {
                    id,
                    name,
                    args_json,
                });
            }
        }
    }

    if let Some(reason) = candidate.get("finishReason").and_then(Value::as_str) {
        let usage = value.get("response").unwrap_or(value).get("usageMetadata");
        let prompt_tokens = usage
            .and_then(|u| u.get("promptTokenCount"))
            .and_then(Value::as_u64)
            .unwrap_or(0);
        let completion_tokens = usage
            .and_then(|u| u.get("candidatesTokenCount"))
            .and_then(Value::as_u64)
            .unwrap_or(0)
            + usage
                .and_then(|u| u.get("thoughtsTokenCount"))
                .and_then(Value::as_u64)
                .unwrap_or(0);
        out.push(CanonicalStreamEvent::Finish {
            reason: google_finish_reason_to_canonical(reason),
            usage: CanonicalUsage {
                prompt_tokens,
                completion_tokens,
            },
        });
    }

    out
}

fn google_finish_reason_to_canonical(reason: &str) -> FinishReason {
    match reason {
        "STOP" => FinishReason::Stop,
        "MAX_TOKENS" => FinishReason::Length,
        _ => FinishReason::Other,
    }
}

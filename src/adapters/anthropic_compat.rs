//! Anthropic-compatible adapter for the Messages API and its header-variant
//! siblings (spec S4.5.b: `anthropic`, `anthropic-token`, `minimax-cn`,
//! `kimi-coding`, `vercel-ai-gateway`).

use futures_util::stream::{self, BoxStream, StreamExt};

use crate::error::GatewayError;
use crate::protocol::anthropic::stream::AnthropicStreamDecoder;
use crate::protocol::anthropic::{encoder, response_decoder, AnthropicMessagesResponse, AnthropicStreamEvent};
use crate::protocol::canonical::{CanonicalStreamEvent, GenerateResult, GenerationRequest};
use crate::stream::sse_frame_stream;

use super::{shared_http_client, truncate_body, LanguageModel};

const MAX_ERROR_BODY_CHARS: usize = 2048;

/// How the adapter authenticates against the Messages endpoint.
#[derive(Debug, Clone)]
pub enum AnthropicAuth {
    /// `x-api-key: <key>` — the native Anthropic key shape.
    ApiKeyHeader,
    /// `Authorization: Bearer <key>` plus fixed identifying headers (the
    /// `anthropic-token` binding, used by Claude subscription OAuth tokens).
    BearerWithHeaders(Vec<(&'static str, String)>),
}

/// Anthropic Messages-API-compatible adapter.
pub struct AnthropicCompatAdapter {
    base_url: String,
    api_key: String,
    model: String,
    auth: AnthropicAuth,
}

impl AnthropicCompatAdapter {
    #[must_use]
    pub fn new(base_url: String, api_key: String, model: String, auth: AnthropicAuth) -> Self {
        Self {
            base_url,
            api_key,
            model,
            auth,
        }
    }

    fn endpoint(&self) -> String {
        format!("{}/v1/messages", self.base_url.trim_end_matches('/'))
    }

    fn request_builder(&self, body: &serde_json::Value) -> reqwest::RequestBuilder {
        let mut builder = shared_http_client()
            .post(self.endpoint())
            .header("anthropic-version", "2023-06-01")
            .json(body);
        builder = match &self.auth {
            AnthropicAuth::ApiKeyHeader => builder.header("x-api-key", &self.api_key),
            AnthropicAuth::BearerWithHeaders(headers) => {
                builder = builder.bearer_auth(&self.api_key);
                for (name, value) in headers {
                    builder = builder.header(*name, value);
                }
                builder
            }
        };
        builder
    }
}

#[async_trait::async_trait]
impl LanguageModel for AnthropicCompatAdapter {
    async fn generate(&self, req: &GenerationRequest) -> Result<GenerateResult, GatewayError> {
        let mut wire = encoder::encode_request(req, &self.model);
        wire.stream = Some(false);
        let body = serde_json::to_value(&wire)
            .map_err(|e| GatewayError::Internal(format!("encode request: {e}")))?;

        let resp = self
            .request_builder(&body)
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

        let parsed: AnthropicMessagesResponse = resp
            .json()
            .await
            .map_err(|e| GatewayError::ProtocolParseFailed(e.to_string()))?;
        response_decoder::decode_response(&parsed)
    }

    async fn stream(
        &self,
        req: &GenerationRequest,
    ) -> Result<BoxStream<'static, CanonicalStreamEvent>, GatewayError> {
        let mut wire = encoder::encode_request(req, &self.model);
        wire.stream = Some(true);
        let body = serde_json::to_value(&wire)
            .map_err(|e| GatewayError::Internal(format!("encode request: {e}")))?;

        let resp = self
            .request_builder(&body)
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
        let decoded = events
            .scan(AnthropicStreamDecoder::new(), |decoder, event| {
                let out = match serde_json::from_str::<AnthropicStreamEvent>(&event.data) {
                    Ok(wire_event) => decoder.feed(&wire_event),
                    Err(_) => Vec::new(),
                };
                futures_util::future::ready(Some(out))
            })
            .flat_map(stream::iter);

        Ok(Box::pin(decoded))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn endpoint_appends_messages_path() {
        let adapter = AnthropicCompatAdapter::new(
            "https://api.anthropic.com".to_string(),
            "sk-ant-test".to_string(),
            "claude-3-5-sonnet".to_string(),
            AnthropicAuth::ApiKeyHeader,
        );
        assert_eq!(adapter.endpoint(), "https://api.anthropic.com/v1/messages");
    }
}

//! Bearer/API-key adapter for the large family of Chat-Completions-compatible
//! upstreams (spec S4.2's Bearer apiKey row: openai, deepseek, openrouter, xai,
//! moonshot, zhipu, groq, together, minimax, cerebras, mistral, huggingface,
//! opencode, zai, plus credential-derived bases for ollama/litellm).

use futures_util::stream::{self, BoxStream, StreamExt};

use crate::error::GatewayError;
use crate::protocol::canonical::{CanonicalStreamEvent, GenerateResult, GenerationRequest};
use crate::protocol::openai_chat::stream::OpenAiStreamDecoder;
use crate::protocol::openai_chat::{encoder, response_decoder, OpenAiChatResponse, OpenAiStreamChunk};
use crate::stream::sse::is_done_event;
use crate::stream::sse_frame_stream;

use super::{shared_http_client, truncate_body, LanguageModel};

const MAX_ERROR_BODY_CHARS: usize = 2048;

/// A single extra header sent with every request (e.g. `anthropic-beta` style
/// provider-identifying headers for variants of this auth shape).
pub type ExtraHeader = (&'static str, String);

/// How the credential is attached to the request. Covers the handful of providers in
/// the Bearer family whose wire shape is Chat-Completions-compatible but whose auth
/// convention isn't a plain `Authorization: Bearer` header (spec S4.2's `google` row
/// uses a query parameter; `azure` uses a named header).
#[derive(Debug, Clone)]
pub enum BearerAuth {
    Bearer,
    Header(&'static str),
    QueryParam(&'static str),
}

/// Bearer-token Chat-Completions-compatible adapter.
pub struct BearerAdapter {
    base_url: String,
    api_key: String,
    model: String,
    extra_headers: Vec<ExtraHeader>,
    auth: BearerAuth,
    endpoint_override: Option<String>,
}

impl BearerAdapter {
    #[must_use]
    pub fn new(base_url: String, api_key: String, model: String) -> Self {
        Self {
            base_url,
            api_key,
            model,
            extra_headers: Vec::new(),
            auth: BearerAuth::Bearer,
            endpoint_override: None,
        }
    }

    #[must_use]
    pub fn with_extra_headers(mut self, headers: Vec<ExtraHeader>) -> Self {
        self.extra_headers = headers;
        self
    }

    #[must_use]
    pub fn with_auth(mut self, auth: BearerAuth) -> Self {
        self.auth = auth;
        self
    }

    /// Override the derived `{base}/chat/completions` endpoint with a literal URL (for
    /// providers like `azure` whose path embeds the deployment name).
    #[must_use]
    pub fn with_endpoint_override(mut self, endpoint: String) -> Self {
        self.endpoint_override = Some(endpoint);
        self
    }

    fn endpoint(&self) -> String {
        let base = self
            .endpoint_override
            .clone()
            .unwrap_or_else(|| format!("{}/chat/completions", self.base_url.trim_end_matches('/')));
        match &self.auth {
            BearerAuth::QueryParam(name) => {
                let sep = if base.contains('?') { '&' } else { '?' };
                format!("{base}{sep}{name}={}", self.api_key)
            }
            BearerAuth::Bearer | BearerAuth::Header(_) => base,
        }
    }

    fn request_builder(&self, body: &serde_json::Value) -> reqwest::RequestBuilder {
        let mut builder = shared_http_client().post(self.endpoint());
        builder = match &self.auth {
            BearerAuth::Bearer => builder.bearer_auth(&self.api_key),
            BearerAuth::Header(name) => builder.header(*name, &self.api_key),
            BearerAuth::QueryParam(_) => builder,
        };
        builder = builder.json(body);
        for (name, value) in &self.extra_headers {
            builder = builder.header(*name, value);
        }
        builder
    }
}

#[async_trait::async_trait]
impl LanguageModel for BearerAdapter {
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

        let parsed: OpenAiChatResponse = resp
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
            .scan(OpenAiStreamDecoder::new(), |decoder, event| {
                let out = if is_done_event(&event) {
                    Vec::new()
                } else {
                    match serde_json::from_str::<OpenAiStreamChunk>(&event.data) {
                        Ok(chunk) => decoder.feed(&chunk),
                        Err(_) => Vec::new(),
                    }
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
    fn endpoint_joins_base_and_path() {
        let adapter = BearerAdapter::new(
            "https://api.openai.com/v1".to_string(),
            "sk-test".to_string(),
            "gpt-4o".to_string(),
        );
        assert_eq!(adapter.endpoint(), "https://api.openai.com/v1/chat/completions");
    }

    #[test]
    fn endpoint_trims_trailing_slash() {
        let adapter = BearerAdapter::new(
            "https://api.openai.com/v1/".to_string(),
            "sk-test".to_string(),
            "gpt-4o".to_string(),
        );
        assert_eq!(adapter.endpoint(), "https://api.openai.com/v1/chat/completions");
    }
}

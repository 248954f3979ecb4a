//! Amazon Bedrock adapter (spec S4.2's `bedrock` row): AWS SigV4-signed calls against
//! the Bedrock Runtime `invoke` API, carrying the Anthropic Messages wire shape (every
//! Claude model on Bedrock accepts the native Anthropic body under
//! `anthropic_version: bedrock-2023-05-31`).
//!
//! Bedrock's streaming invocation returns `application/vnd.amazon.eventstream`, a
//! binary frame format distinct from SSE. Rather than implement a second wire decoder
//! for a single provider, `stream()` issues the non-streaming call and replays the
//! completed result as a single-chunk canonical stream — the same fallback a thin
//! adapter takes for any upstream that can't be made to speak incremental deltas.

use std::time::SystemTime;

use futures_util::stream::{self, BoxStream};
use sha2::{Digest, Sha256};

use crate::error::GatewayError;
use crate::protocol::anthropic::encoder;
use crate::protocol::anthropic::response_decoder;
use crate::protocol::anthropic::AnthropicMessagesResponse;
use crate::protocol::canonical::{CanonicalStreamEvent, CanonicalUsage, GenerateResult, GenerationRequest};

use super::{shared_http_client, truncate_body, LanguageModel};

const MAX_ERROR_BODY_CHARS: usize = 2048;
const SERVICE: &str = "bedrock";

/// Bedrock Runtime adapter. `access_key`/`secret_key`/`region` come from the
/// credential record's `apiKey`/`projectId`/`refresh` fields respectively (spec S4.2
/// Glossary: "AWS secret access key for bedrock").
pub struct BedrockAdapter {
    access_key: String,
    secret_key: String,
    region: String,
    model_id: String,
}

impl BedrockAdapter {
    #[must_use]
    pub fn new(access_key: String, secret_key: String, region: String, model_id: String) -> Self {
        Self {
            access_key,
            secret_key,
            region,
            model_id,
        }
    }

    fn host(&self) -> String {
        format!("bedrock-runtime.{}.amazonaws.com", self.region)
    }

    fn path(&self) -> String {
        format!("/model/{}/invoke", self.model_id)
    }

    fn endpoint(&self) -> String {
        format!("https://{}{}", self.host(), self.path())
    }

    fn build_body(&self, req: &GenerationRequest) -> serde_json::Value {
        let wire = encoder::encode_request(req, &self.model_id);
        let mut value = serde_json::to_value(&wire).unwrap_or(serde_json::Value::Null);
        if let Some(obj) = value.as_object_mut() {
            obj.remove("model");
            obj.remove("stream");
            obj.insert(
                "anthropic_version".to_string(),
                serde_json::Value::String("bedrock-2023-05-31".to_string()),
            );
        }
        value
    }

    fn sign(&self, body: &[u8]) -> Vec<(String, String)> {
        sigv4_sign(
            &self.access_key,
            &self.secret_key,
            &self.region,
            &self.host(),
            &self.path(),
            body,
        )
    }
}

#[async_trait::async_trait]
impl LanguageModel for BedrockAdapter {
    async fn generate(&self, req: &GenerationRequest) -> Result<GenerateResult, GatewayError> {
        let body = self.build_body(req);
        let body_bytes = serde_json::to_vec(&body)
            .map_err(|e| GatewayError::Internal(format!("encode request: {e}")))?;
        let headers = self.sign(&body_bytes);

        let mut builder = shared_http_client().post(self.endpoint()).body(body_bytes);
        for (name, value) in headers {
            builder = builder.header(name, value);
        }

        let resp = builder
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
        let result = self.generate(req).await?;
        let mut events = Vec::with_capacity(2 + result.tool_calls.len());
        if !result.text.is_empty() {
            events.push(CanonicalStreamEvent::TextDelta { delta: result.text });
        }
        for call in result.tool_calls {
            events.push(CanonicalStreamEvent::ToolCall {
                id: call.id,
                name: call.name,
                args_json: call.args_json,
            });
        }
        events.push(CanonicalStreamEvent::Finish {
            reason: result.finish_reason.unwrap_or(crate::protocol::canonical::FinishReason::Stop),
            usage: CanonicalUsage {
                prompt_tokens: result.usage.prompt_tokens,
                completion_tokens: result.usage.completion_tokens,
            },
        });
        Ok(Box::pin(stream::iter(events)))
    }
}

fn sigv4_sign(
    access_key: &str,
    secret_key: &str,
    region: &str,
    host: &str,
    path: &str,
    body: &[u8],
) -> Vec<(String, String)> {
    let (amz_date, date_stamp) = amz_timestamps();
    let payload_hash = sha256_hex(body);

    let canonical_headers = format!(
        "content-type:application/json\nhost:{host}\nx-amz-date:{amz_date}\n"
    );
    let signed_headers = "content-type;host;x-amz-date";

    let canonical_request = format!(
        "POST\n{path}\n\n{canonical_headers}\n{signed_headers}\n{payload_hash}"
    );

    let credential_scope = format!("{date_stamp}/{region}/{SERVICE}/aws4_request");
    let string_to_sign = format!(
        "AWS4-HMAC-SHA256\n{amz_date}\n{credential_scope}\n{}",
        sha256_hex(canonical_request.as_bytes())
    );

    let k_date = hmac_sha256(format!("AWS4{secret_key}").as_bytes(), date_stamp.as_bytes());
    let k_region = hmac_sha256(&k_date, region.as_bytes());
    let k_service = hmac_sha256(&k_region, SERVICE.as_bytes());
    let k_signing = hmac_sha256(&k_service, b"aws4_request");
    let signature = hex_encode(&hmac_sha256(&k_signing, string_to_sign.as_bytes()));

    let authorization = format!(
        "AWS4-HMAC-SHA256 Credential={access_key}/{credential_scope}, SignedHeaders={signed_headers}, Signature={signature}"
    );

    vec![
        ("host".to_string(), host.to_string()),
        ("x-amz-date".to_string(), amz_date),
        ("content-type".to_string(), "application/json".to_string()),
        ("authorization".to_string(), authorization),
    ]
}

/// Derives the `YYYYMMDDTHHMMSSZ` / `YYYYMMDD` pair SigV4 requires from the system
/// clock, reusing `httpdate`'s RFC 1123 formatter (already a dependency for HTTP date
/// headers) rather than hand-rolling calendar arithmetic.
fn amz_timestamps() -> (String, String) {
    let rfc1123 = httpdate::fmt_http_date(SystemTime::now());
    let fields: Vec<&str> = rfc1123.split_whitespace().collect();
    // "Tue, 15 Nov 1994 08:12:31 GMT"
    let day = fields.get(1).copied().unwrap_or("01");
    let month = month_number(fields.get(2).copied().unwrap_or("Jan"));
    let year = fields.get(3).copied().unwrap_or("1970");
    let time = fields.get(4).copied().unwrap_or("00:00:00");
    let time_compact = time.replace(':', "");
    let date_stamp = format!("{year}{month}{day}");
    let amz_date = format!("{date_stamp}T{time_compact}Z");
    (amz_date, date_stamp)
}

fn month_number(name: &str) -> &'static str {
    match name {
        "Jan" => "01",
        "Feb" => "02",
        "Mar" => "03",
        "Apr" => "04",
        "May" => "05",
        "Jun" => "06",
        "Jul" => "07",
        "Aug" => "08",
        "Sep" => "09",
        "Oct" => "10",
        "Nov" => "11",
        _ => "12",
    }
}

fn hmac_sha256(key: &[u8], data: &[u8]) -> [u8; 32] {
    const BLOCK_SIZE: usize = 64;
    let mut key_block = [0u8; BLOCK_SIZE];
    if key.len() > BLOCK_SIZE {
        let hashed = Sha256::digest(key);
        key_block[..32].copy_from_slice(&hashed);
    } else {
        key_block[..key.len()].copy_from_slice(key);
    }

    let mut ipad = [0x36u8; BLOCK_SIZE];
    let mut opad = [0x5cu8; BLOCK_SIZE];
    for i in 0..BLOCK_SIZE {
        ipad[i] ^= key_block[i];
        opad[i] ^= key_block[i];
    }

    let mut inner = Sha256::new();
    inner.update(ipad);
    inner.update(data);
    let inner_hash = inner.finalize();

    let mut outer = Sha256::new();
    outer.update(opad);
    outer.update(inner_hash);
    outer.finalize().into()
}

fn sha256_hex(data: &[u8]) -> String {
    hex_encode(&Sha256::digest(data))
}

fn hex_encode(bytes: &[u8]) -> String {
    use std::fmt::Write;
    let mut out = String::with_capacity(bytes.len() * 2);
    for b in bytes {
        let _ = write!(out, "{b:02x}");
    }
    out
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn endpoint_embeds_region_and_model() {
        let adapter = BedrockAdapter::new(
            "AKIA".to_string(),
            "secret".to_string(),
            "us-east-1".to_string(),
            "anthropic.claude-3-5-sonnet-20241022-v2:0".to_string(),
        );
        assert_eq!(
            adapter.endpoint(),
            "https://bedrock-runtime.us-east-1.amazonaws.com/model/anthropic.claude-3-5-sonnet-20241022-v2:0/invoke"
        );
    }

    #[test]
    fn signature_is_stable_for_identical_inputs() {
        let a = sigv4_sign("AKIA", "secret", "us-east-1", "bedrock-runtime.us-east-1.amazonaws.com", "/model/x/invoke", b"{}");
        let b = sigv4_sign("AKIA", "secret", "us-east-1", "bedrock-runtime.us-east-1.amazonaws.com", "/model/x/invoke", b"{}");
        assert_eq!(a, b);
    }

    #[test]
    fn hmac_sha256_matches_known_test_vector() {
        // RFC 4231 test case 1.
        let key = [0x0bu8; 20];
        let data = b"Hi There";
        let mac = hmac_sha256(&key, data);
        assert_eq!(
            hex_encode(&mac),
            "b0344c61d8db38535ca8afceaf0bf12b881dc200c9833da726e9376c2e32cff"
        );
    }
}

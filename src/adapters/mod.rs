//! Provider adapters (C5): per-provider request construction, streaming parse, and
//! canonical event emission.

pub mod anthropic_compat;
pub mod bearer;
pub mod bedrock;
pub mod code_assist;
pub mod cursor_subprocess;

use crate::error::GatewayError;
use crate::protocol::canonical::{CanonicalStreamEvent, GenerateResult, GenerationRequest};
use futures_util::stream::BoxStream;
use std::sync::{Arc, Once, OnceLock};
use std::time::Duration;

static RUSTLS_PROVIDER_INIT: Once = Once::new();
static SHARED_HTTP_CLIENT: OnceLock<reqwest::Client> = OnceLock::new();

/// Lazily builds and caches the reqwest client shared by every HTTPS-based adapter.
/// All adapters share one connection pool; the subprocess adapter (`cursor`) does not
/// use HTTP at all.
pub fn shared_http_client() -> reqwest::Client {
    SHARED_HTTP_CLIENT
        .get_or_init(|| {
            RUSTLS_PROVIDER_INIT.call_once(|| {
                let _ = rustls::crypto::ring::default_provider().install_default();
            });
            reqwest::Client::builder()
                .pool_max_idle_per_host(32)
                .tcp_nodelay(true)
                .connect_timeout(Duration::from_secs(10))
                .redirect(reqwest::redirect::Policy::none())
                .timeout(Duration::from_secs(120))
                .build()
                .unwrap_or_else(|_| reqwest::Client::new())
        })
        .clone()
}

/// Uniform handle over a bound provider+model+credentials (spec S4.2).
#[async_trait::async_trait]
pub trait LanguageModel: Send + Sync {
    /// Non-streaming generation.
    async fn generate(&self, req: &GenerationRequest) -> Result<GenerateResult, GatewayError>;

    /// Streaming generation; the returned stream yields canonical events in order and
    /// terminates on `Finish` or `Error`.
    async fn stream(
        &self,
        req: &GenerationRequest,
    ) -> Result<BoxStream<'static, CanonicalStreamEvent>, GatewayError>;
}

pub type SharedLanguageModel = Arc<dyn LanguageModel>;

/// Truncates an upstream error body for inclusion in a `GatewayError`, so a runaway
/// HTML error page doesn't end up verbatim in a client-facing 500.
#[must_use]
pub fn truncate_body(body: &str, max_len: usize) -> String {
    if body.len() <= max_len {
        body.to_string()
    } else {
        let mut end = max_len;
        while !body.is_char_boundary(end) {
            end -= 1;
        }
        format!("{}…", &body[..end])
    }
}
